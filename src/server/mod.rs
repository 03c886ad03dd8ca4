pub mod api;
pub mod dtos;
pub mod error;
pub mod extractors;
pub mod services;
pub mod utils;

use std::{net::SocketAddr, sync::Arc, time::Instant};

use anyhow::Context;
use axum::{
    Extension, Router, ServiceExt,
    extract::Request,
    http::{HeaderValue, Method},
    routing::get,
};
use once_cell::sync::Lazy;
use tokio::net::TcpListener;
use tower::{Layer, ServiceBuilder, limit::GlobalConcurrencyLimitLayer};
use tower_http::{
    cors::{Any, CorsLayer},
    normalize_path::NormalizePathLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{config::AppConfig, providers::ProviderCatalog};

use api::health_controller::health_endpoint;
use services::app_services::AppServices;

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

pub fn get_uptime_seconds() -> u64 {
    START_TIME.elapsed().as_secs()
}

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub struct ResolverApplicationServer;

impl ResolverApplicationServer {
    pub fn router(services: AppServices) -> Router {
        let max_concurrent = services.config.max_concurrent_requests.max(1);
        let cors = Self::cors_layer(&services.config.cors_origin);

        Router::new()
            .route("/health", get(health_endpoint))
            .merge(api::app())
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors)
                    .layer(Extension(services)),
            )
            .layer(GlobalConcurrencyLimitLayer::new(max_concurrent))
    }

    fn cors_layer(cors_origin: &str) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers(Any);

        if cors_origin.split(',').any(|o| o.trim() == "*") {
            return layer.allow_origin(Any);
        }

        let origins: Vec<HeaderValue> = cors_origin
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("ignoring cors origin '{}': {}", o, e);
                    None
                }
            })
            .collect();

        layer.allow_origin(origins)
    }

    pub async fn serve(config: Arc<AppConfig>, catalog: Arc<ProviderCatalog>) -> anyhow::Result<()> {
        Lazy::force(&START_TIME);

        let services = AppServices::new(catalog, config.clone())?;
        let app = NormalizePathLayer::trim_trailing_slash().layer(Self::router(services));

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        info!("resolver listening on {}", addr);

        axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("error while serving")?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install sigterm handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
