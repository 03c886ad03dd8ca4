use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::server::services::{
    extractor_services::ExtractionRequest, resolver_services::Resolution,
};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ResolveQuery {
    #[validate(length(min = 1, max = 64, message = "provider must be 1-64 characters"))]
    pub provider: String,

    #[validate(length(min = 1, max = 256, message = "content must be 1-256 characters"))]
    pub content: String,

    #[validate(length(equal = 2, message = "locale must be a two letter code"))]
    pub locale: Option<String>,

    pub mirror: Option<usize>,
}

impl From<ResolveQuery> for ExtractionRequest {
    fn from(query: ResolveQuery) -> Self {
        ExtractionRequest {
            provider_id: query.provider.trim().to_ascii_lowercase(),
            content_ref: query.content,
            locale: query.locale.map(|l| l.to_ascii_lowercase()),
            mirror: query.mirror,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    pub success: bool,
    pub stream_url: String,
    pub method: String,
    pub provider: String,
}

impl From<&Resolution> for ResolveResponse {
    fn from(resolution: &Resolution) -> Self {
        Self {
            success: true,
            stream_url: resolution.stream_url.to_string(),
            method: resolution.method.clone(),
            provider: resolution.provider_id.clone(),
        }
    }
}
