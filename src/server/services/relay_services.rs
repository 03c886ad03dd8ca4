use std::{
    fmt,
    io::Read,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use mockall::automock;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use url::Url;

use crate::{providers::ProviderProfile, server::error::RelayError};

/// the relay secret only ever travels in this header
pub const RELAY_KEY_HEADER: &str = "x-relay-key";
/// set by the relay when the status it returns is the origin's, not its own
pub const RELAY_UPSTREAM_STATUS_HEADER: &str = "x-relay-upstream-status";
pub const RELAY_FINAL_URL_HEADER: &str = "x-relay-final-url";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

// we only decompress what we can decode ourselves
const ACCEPT_ENCODING: &str = "gzip, zstd";
const DETAIL_LIMIT: usize = 256;

pub type DynRelayService = Arc<dyn RelayServiceTrait + Send + Sync>;

/// relay base url plus its secret, loaded once at startup and read-only after
pub struct RelayCredential {
    base_url: Url,
    secret: String,
}

impl RelayCredential {
    pub fn new(base_url: &str, secret: impl Into<String>) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("relay base url is not a url: {}", e))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            anyhow::bail!("relay base url must be an http(s) base url");
        }

        let secret = secret.into();
        if secret.trim().is_empty() {
            anyhow::bail!("relay secret must not be empty");
        }

        Ok(Self { base_url, secret })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn secret(&self) -> &str {
        &self.secret
    }

    fn endpoint(&self, name: &str) -> Result<Url, RelayError> {
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| RelayError::RelayUnavailable("relay base url cannot hold a path".into()))?
            .pop_if_empty()
            .push(name);
        Ok(url)
    }

    /// GET {base}/proxy?url=<target>, the secret is deliberately not part of it
    pub fn proxy_url(&self, target: &str, options: &FetchOptions) -> Result<Url, RelayError> {
        let mut url = self.endpoint("proxy")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("url", target);
            if options.method == FetchMethod::Head {
                query.append_pair("method", "HEAD");
            }
            if let Some(referer) = &options.referer {
                query.append_pair("referer", referer);
            }
            if let Some(origin) = &options.origin {
                query.append_pair("origin", origin);
            }
        }
        Ok(url)
    }

    pub fn health_url(&self) -> Result<Url, RelayError> {
        self.endpoint("health")
    }
}

impl fmt::Debug for RelayCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayCredential")
            .field("base_url", &self.base_url.as_str())
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMethod {
    #[default]
    Get,
    Head,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub method: FetchMethod,
    pub referer: Option<String>,
    pub origin: Option<String>,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub status: u16,
    /// where the request ended up after redirects
    pub final_url: String,
    pub body: Vec<u8>,
}

impl RelayResponse {
    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }
}

#[automock]
#[async_trait]
pub trait RelayServiceTrait {
    /// direct when the provider allows it, through the relay when `relay_required` is set
    async fn fetch(
        &self,
        url: &str,
        options: &FetchOptions,
        profile: &ProviderProfile,
    ) -> Result<RelayResponse, RelayError>;

    /// liveness of the relay in milliseconds
    async fn health(&self) -> Result<f64, RelayError>;
}

pub struct RelayService {
    http: reqwest::Client,
    credential: Option<Arc<RelayCredential>>,
}

impl RelayService {
    pub fn new(credential: Option<Arc<RelayCredential>>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(Duration::from_secs(30))
            .http2_adaptive_window(true)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { http, credential }
    }

    fn request_headers(options: &FetchOptions, profile: &ProviderProfile) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static(ACCEPT_ENCODING));
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let mut set = |name: &str, value: &str| {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("skipping unusable header '{}' for {}", name, profile.id),
            }
        };

        if let Some(referer) = &options.referer {
            set(header::REFERER.as_str(), referer);
        }
        if let Some(origin) = &options.origin {
            set(header::ORIGIN.as_str(), origin);
        }
        // provider headers first so per-call headers win
        for (name, value) in &profile.headers {
            set(name, value);
        }
        for (name, value) in &options.headers {
            set(name, value);
        }

        headers
    }

    async fn fetch_direct(
        &self,
        url: &str,
        options: &FetchOptions,
        profile: &ProviderProfile,
    ) -> Result<RelayResponse, RelayError> {
        let request = match options.method {
            FetchMethod::Get => self.http.get(url),
            FetchMethod::Head => self.http.head(url),
        };

        let response = request
            .headers(Self::request_headers(options, profile))
            .send()
            .await
            .map_err(|e| {
                error!("direct request to {} failed: {}", url, e);
                RelayError::Transport(e.to_string())
            })?;

        let status = response.status();
        let final_url = response.url().to_string();
        let encoding = content_encoding(response.headers());
        let bytes = response.bytes().await.map_err(|e| {
            error!("failed to read body from {}: {}", url, e);
            RelayError::Transport(e.to_string())
        })?;

        let body = decode_body(encoding.as_deref(), &bytes);

        if !status.is_success() {
            debug!("origin {} answered {}", url, status);
            return Err(RelayError::UpstreamError {
                status: status.as_u16(),
                detail: snippet(body.as_deref().unwrap_or(&bytes)),
            });
        }

        let body = body.map_err(|e| {
            error!("failed to decompress body from {}: {}", url, e);
            RelayError::Transport(format!("failed to decompress body: {}", e))
        })?;

        Ok(RelayResponse {
            status: status.as_u16(),
            final_url,
            body,
        })
    }

    async fn fetch_relayed(
        &self,
        url: &str,
        options: &FetchOptions,
        profile: &ProviderProfile,
    ) -> Result<RelayResponse, RelayError> {
        let credential = self.credential.as_ref().ok_or(RelayError::NotConfigured)?;
        let relay_url = credential.proxy_url(url, options)?;

        let mut headers = Self::request_headers(options, profile);
        let key = HeaderValue::from_str(credential.secret()).map_err(|_| {
            error!("relay secret is not a valid header value");
            RelayError::NotConfigured
        })?;
        headers.insert(HeaderName::from_static(RELAY_KEY_HEADER), key);

        debug!("relaying {} for provider {}", url, profile.id);

        let response = self
            .http
            .get(relay_url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| {
                error!("relay request for {} failed: {}", url, e);
                RelayError::RelayUnavailable(e.to_string())
            })?;

        let status = response.status();
        let upstream_status = response
            .headers()
            .get(RELAY_UPSTREAM_STATUS_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u16>().ok());
        let final_url = response
            .headers()
            .get(RELAY_FINAL_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .unwrap_or_else(|| url.to_string());
        let encoding = content_encoding(response.headers());

        let bytes = response.bytes().await.map_err(|e| {
            error!("failed to read relay body for {}: {}", url, e);
            RelayError::RelayUnavailable(e.to_string())
        })?;
        let body = decode_body(encoding.as_deref(), &bytes);

        match upstream_status {
            Some(origin) if !(200..300).contains(&origin) => {
                debug!("origin {} answered {} through the relay", url, origin);
                return Err(RelayError::UpstreamError {
                    status: origin,
                    detail: snippet(body.as_deref().unwrap_or(&bytes)),
                });
            }
            None if !status.is_success() => {
                error!("relay answered {} for {}", status, url);
                return Err(RelayError::RelayUnavailable(format!(
                    "relay answered {}",
                    status
                )));
            }
            _ => {}
        }

        let body = body.map_err(|e| {
            RelayError::RelayUnavailable(format!("failed to decompress relay body: {}", e))
        })?;

        Ok(RelayResponse {
            status: upstream_status.unwrap_or(status.as_u16()),
            final_url,
            body,
        })
    }
}

#[async_trait]
impl RelayServiceTrait for RelayService {
    async fn fetch(
        &self,
        url: &str,
        options: &FetchOptions,
        profile: &ProviderProfile,
    ) -> Result<RelayResponse, RelayError> {
        if profile.relay_required {
            self.fetch_relayed(url, options, profile).await
        } else {
            self.fetch_direct(url, options, profile).await
        }
    }

    async fn health(&self) -> Result<f64, RelayError> {
        let credential = self.credential.as_ref().ok_or(RelayError::NotConfigured)?;
        let start = Instant::now();

        let response = self
            .http
            .get(credential.health_url()?)
            .send()
            .await
            .map_err(|e| RelayError::RelayUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RelayError::RelayUnavailable(format!(
                "health answered {}",
                response.status()
            )));
        }

        Ok(start.elapsed().as_secs_f64() * 1000.0)
    }
}

fn content_encoding(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_ascii_lowercase())
}

fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// decompress by content-encoding, or by gzip magic when the header went missing
pub(crate) fn decode_body(encoding: Option<&str>, bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    match encoding {
        Some("zstd") => zstd::decode_all(bytes),
        Some("gzip") => gunzip(bytes),
        _ if bytes.len() > 2 && bytes[0] == 0x1f && bytes[1] == 0x8b => {
            // key bodies are random bytes and can start with the magic by chance
            Ok(gunzip(bytes).unwrap_or_else(|_| bytes.to_vec()))
        }
        _ => Ok(bytes.to_vec()),
    }
}

fn snippet(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).chars().take(DETAIL_LIMIT).collect()
}
