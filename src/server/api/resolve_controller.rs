use axum::{Extension, Json, Router, routing::get};
use tracing::{debug, error};

use crate::server::{
    dtos::resolve_dto::{ResolveQuery, ResolveResponse},
    error::{AppResult, Error},
    extractors::ValidatedQuery,
    services::{app_services::AppServices, extractor_services::ExtractionRequest},
};

pub struct ResolveController;

impl ResolveController {
    pub fn app() -> Router {
        Router::new().route("/", get(Self::resolve))
    }

    async fn resolve(
        Extension(services): Extension<AppServices>,
        ValidatedQuery(query): ValidatedQuery<ResolveQuery>,
    ) -> AppResult<Json<ResolveResponse>> {
        let request = ExtractionRequest::from(query);
        debug!(
            "resolve {} for {} (locale {:?}, mirror {:?})",
            request.content_ref, request.provider_id, request.locale, request.mirror
        );

        let resolution = services.resolver.resolve(request).await.map_err(|err| {
            error!("resolve failed: {}", err);
            Error::from(err)
        })?;

        Ok(Json(ResolveResponse::from(&resolution)))
    }
}
