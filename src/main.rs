use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;

use tracing::{error, info};

use resolver::{AppConfig, Logger, ProviderCatalog, ProviderTable, ResolverApplicationServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(AppConfig::parse());

    // init logger and sentry, guards are kept alive to flush logs and maintain sentry connection
    let _guards = Logger::init(config.cargo_env, config.sentry_dsn.clone());

    info!("logger and env prepped, loading providers...");

    let table = match &config.providers_path {
        Some(path) => ProviderTable::load(path)?,
        None => ProviderTable::bundled().context("bundled provider table is broken")?,
    };

    info!("{} providers loaded: {}", table.len(), table.ids().join(", "));

    let catalog = Arc::new(ProviderCatalog::new(table));

    #[cfg(unix)]
    if let Some(path) = config.providers_path.clone() {
        reload_on_hangup(catalog.clone(), path);
    }

    ResolverApplicationServer::serve(config, catalog)
        .await
        .context("resolver server failed to start")?;

    Ok(())
}

/// SIGHUP re-reads the provider table, a broken file keeps the current one
#[cfg(unix)]
fn reload_on_hangup(catalog: Arc<ProviderCatalog>, path: std::path::PathBuf) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                error!("failed to install sighup handler, reload disabled: {}", e);
                return;
            }
        };

        while hangup.recv().await.is_some() {
            if let Err(e) = catalog.reload_from(&path) {
                error!("provider reload failed, keeping the current table: {:#}", e);
            }
        }
    });
}
