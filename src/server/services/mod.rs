pub mod app_services;
pub mod auth_services;
pub mod extractor_services;
pub mod relay_services;
pub mod resolver_services;

pub use relay_services::DynRelayService;
pub use resolver_services::DynResolverService;
