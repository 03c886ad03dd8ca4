pub mod config;
pub mod logger;
pub mod providers;
pub mod server;

pub use config::*;
pub use logger::*;
pub use providers::{ProviderCatalog, ProviderTable};
pub use server::ResolverApplicationServer;
