use std::{sync::Arc, time::Duration};

use anyhow::bail;
use tracing::info;

use crate::{config::AppConfig, providers::ProviderCatalog};

use super::{
    relay_services::{DynRelayService, RelayCredential, RelayService},
    resolver_services::{DynResolverService, ResolverService},
};

/// everything the controllers need, cloned into each request through an Extension
#[derive(Clone)]
pub struct AppServices {
    pub resolver: DynResolverService,
    pub relay: DynRelayService,
    pub catalog: Arc<ProviderCatalog>,
    pub relay_configured: bool,
    pub config: Arc<AppConfig>,
}

impl AppServices {
    pub fn new(catalog: Arc<ProviderCatalog>, config: Arc<AppConfig>) -> anyhow::Result<Self> {
        info!("starting services...");

        let credential = match (&config.relay_base_url, &config.relay_secret) {
            (Some(base_url), Some(secret)) => Some(Arc::new(RelayCredential::new(base_url, secret.clone())?)),
            (None, None) => None,
            // half a credential is a deployment mistake, don't start with it
            _ => bail!("RELAY_BASE_URL and RELAY_SECRET must be set together"),
        };

        match &credential {
            Some(credential) => info!("relay configured at {}", credential.base_url()),
            None => info!("no relay configured, relay-only providers will fail"),
        }

        let relay_configured = credential.is_some();
        let relay = Arc::new(RelayService::new(credential)) as DynRelayService;

        info!("relay client ok, starting resolver...");
        let resolver = Arc::new(ResolverService::new(
            catalog.clone(),
            relay.clone(),
            Duration::from_secs(config.resolve_timeout_secs),
        )) as DynResolverService;

        Ok(Self {
            resolver,
            relay,
            catalog,
            relay_configured,
            config,
        })
    }
}
