use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use mockall::automock;
use tracing::{info, warn};
use url::Url;

use crate::{
    providers::{ProviderCatalog, ProviderProfile, ProviderTable},
    server::{
        error::ResolveError,
        services::{
            auth_services::KeyAuthenticator,
            extractor_services::{Extraction, ExtractionRequest, ProviderExtractor},
            relay_services::DynRelayService,
        },
    },
};

pub type DynResolverService = Arc<dyn ResolverServiceTrait + Send + Sync>;

#[derive(Debug, Clone)]
pub struct Resolution {
    /// provider that actually produced the url, differs from the request after a sibling fallback
    pub provider_id: String,
    pub stream_url: Url,
    /// "<provider>:<strategy>"
    pub method: String,
    pub mirror: String,
    pub authenticator: KeyAuthenticator,
}

#[automock]
#[async_trait]
pub trait ResolverServiceTrait {
    async fn resolve(&self, request: ExtractionRequest) -> Result<Resolution, ResolveError>;
    fn provider_count(&self) -> usize;
}

pub struct ResolverService {
    catalog: Arc<ProviderCatalog>,
    extractor: ProviderExtractor,
    relay: DynRelayService,
    timeout: Duration,
}

impl ResolverService {
    pub fn new(catalog: Arc<ProviderCatalog>, relay: DynRelayService, timeout: Duration) -> Self {
        Self {
            catalog,
            extractor: ProviderExtractor::new(relay.clone()),
            relay,
            timeout,
        }
    }

    /// requested provider first, then its siblings in table order, unknown ones skipped
    fn candidates(table: &ProviderTable, primary: Arc<ProviderProfile>) -> Vec<Arc<ProviderProfile>> {
        let mut candidates = vec![primary.clone()];
        for sibling in &primary.fallback_providers {
            if candidates.iter().any(|c| &c.id == sibling) {
                continue;
            }
            if let Some(profile) = table.get(sibling) {
                candidates.push(profile);
            }
        }
        candidates
    }

    async fn resolve_with_fallback(
        &self,
        table: &ProviderTable,
        primary: Arc<ProviderProfile>,
        request: &ExtractionRequest,
    ) -> Result<Resolution, ResolveError> {
        let mut primary_failure = None;

        for (i, profile) in Self::candidates(table, primary).into_iter().enumerate() {
            let attempt = if i == 0 {
                request.clone()
            } else {
                info!(
                    "trying sibling provider {} for {}",
                    profile.id, request.provider_id
                );
                ExtractionRequest {
                    provider_id: profile.id.clone(),
                    mirror: None,
                    ..request.clone()
                }
            };

            match self.extractor.extract(profile.clone(), &attempt).await {
                Ok(extraction) => return Ok(self.resolution(extraction)),
                Err(cause) => {
                    let fall_through = cause.allows_sibling_fallback();
                    let err = ResolveError::ExtractionFailed {
                        provider: profile.id.clone(),
                        cause,
                    };

                    if i == 0 {
                        if !fall_through {
                            return Err(err);
                        }
                        primary_failure = Some(err);
                    } else {
                        warn!("sibling provider {} failed: {}", profile.id, err);
                    }
                }
            }
        }

        Err(primary_failure
            .unwrap_or_else(|| ResolveError::UnknownProvider(request.provider_id.clone())))
    }

    fn resolution(&self, extraction: Extraction) -> Resolution {
        let Extraction {
            stream_url,
            profile,
            token,
            mirror,
        } = extraction;

        Resolution {
            provider_id: profile.id.clone(),
            method: format!("{}:{}", profile.id, profile.decode.id()),
            stream_url,
            mirror,
            authenticator: KeyAuthenticator::new(profile, token, self.relay.clone()),
        }
    }
}

#[async_trait]
impl ResolverServiceTrait for ResolverService {
    async fn resolve(&self, request: ExtractionRequest) -> Result<Resolution, ResolveError> {
        // one snapshot per request, a reload in the middle does not mix tables
        let table = self.catalog.snapshot();
        let primary = table
            .get(&request.provider_id)
            .ok_or_else(|| ResolveError::UnknownProvider(request.provider_id.clone()))?;

        match tokio::time::timeout(
            self.timeout,
            self.resolve_with_fallback(&table, primary, &request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "resolving {} for {} timed out after {:?}",
                    request.content_ref, request.provider_id, self.timeout
                );
                Err(ResolveError::Timeout(self.timeout))
            }
        }
    }

    fn provider_count(&self) -> usize {
        self.catalog.snapshot().len()
    }
}
