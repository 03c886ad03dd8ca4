use axum::Extension;
use axum::Json;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::error;

use crate::server::dtos::health_dto::{
    HealthResponse, HealthStatus, ProviderHealth, RelayHealth, ServiceHealthDetails,
};
use crate::server::services::app_services::AppServices;
use crate::server::{get_app_version, get_uptime_seconds};

/// relay latency plus provider table size, an empty table means nothing can resolve
pub async fn health_endpoint(
    Extension(services): Extension<AppServices>,
) -> (StatusCode, Json<HealthResponse>) {
    let relay = check_relay_health(&services).await;

    let count = services.resolver.provider_count();
    let providers = ProviderHealth {
        status: if count == 0 {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        },
        count,
    };

    // relay-only providers break without the relay, the rest keep working
    let overall_status = if providers.status == HealthStatus::Unhealthy {
        HealthStatus::Unhealthy
    } else if relay.status == "unhealthy" {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    let response = HealthResponse {
        status: overall_status,
        timestamp: Utc::now(),
        uptime_seconds: get_uptime_seconds(),
        version: get_app_version().to_string(),
        environment: format!("{:?}", services.config.cargo_env).to_lowercase(),
        services: ServiceHealthDetails { relay, providers },
    };

    let http_status = match overall_status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(response))
}

async fn check_relay_health(services: &AppServices) -> RelayHealth {
    if !services.relay_configured {
        return RelayHealth {
            status: "not-configured".to_string(),
            response_time_ms: 0.0,
        };
    }

    match services.relay.health().await {
        Ok(response_time) => RelayHealth {
            status: "healthy".to_string(),
            response_time_ms: response_time,
        },
        Err(e) => {
            error!("relay health check failed: {}", e);
            RelayHealth {
                status: "unhealthy".to_string(),
                response_time_ms: 0.0,
            }
        }
    }
}
