use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::Utc;
use nanoid::nanoid;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::{
    providers::{AuthPolicy, ProviderProfile},
    server::{
        error::{AuthError, KeyFetchError, RelayError},
        services::relay_services::{DEFAULT_USER_AGENT, DynRelayService, FetchOptions, RelayResponse},
        utils::{
            pow_utils::{
                Difficulty, SearchBounds, nonce_search, skewed_timestamp, timestamp_in_window,
                verify_nonce,
            },
            signature_utils::SignatureUtil,
        },
    },
};

pub const AUTHORIZATION_HEADER: &str = "authorization";
pub const SESSION_HEADER: &str = "x-session-id";
pub const FINGERPRINT_HEADER: &str = "x-fingerprint";
pub const TIMESTAMP_HEADER: &str = "x-key-timestamp";
pub const NONCE_HEADER: &str = "x-key-nonce";
pub const SIGNATURE_HEADER: &str = "x-key-signature";

const AUTH_HEADER_NAMES: [&str; 6] = [
    AUTHORIZATION_HEADER,
    SESSION_HEADER,
    FINGERPRINT_HEADER,
    TIMESTAMP_HEADER,
    NONCE_HEADER,
    SIGNATURE_HEADER,
];

/// the full header set for a gated key/segment request. The gate rejects partial sets harder
/// than no set at all, so there is no way to build one with a field missing
#[derive(Clone, PartialEq, Eq)]
pub struct AuthHeaders {
    pub token: String,
    pub session_id: String,
    pub fingerprint: String,
    pub timestamp: i64,
    pub nonce: u64,
    pub signature: String,
}

impl AuthHeaders {
    pub fn pairs(&self) -> Vec<(String, String)> {
        vec![
            (AUTHORIZATION_HEADER.to_string(), format!("Bearer {}", self.token)),
            (SESSION_HEADER.to_string(), self.session_id.clone()),
            (FINGERPRINT_HEADER.to_string(), self.fingerprint.clone()),
            (TIMESTAMP_HEADER.to_string(), self.timestamp.to_string()),
            (NONCE_HEADER.to_string(), self.nonce.to_string()),
            (SIGNATURE_HEADER.to_string(), self.signature.clone()),
        ]
    }

    pub fn to_header_map(&self) -> Result<HeaderMap, AuthError> {
        let mut headers = HeaderMap::with_capacity(AUTH_HEADER_NAMES.len());
        for (name, value) in self.pairs() {
            // one bad value would leave a partial set, refuse the whole thing
            let name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| AuthError::IncompleteHeaders)?;
            let value = HeaderValue::from_str(&value).map_err(|_| AuthError::IncompleteHeaders)?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

impl fmt::Debug for AuthHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthHeaders")
            .field("token", &"<redacted>")
            .field("session_id", &self.session_id)
            .field("fingerprint", &self.fingerprint)
            .field("timestamp", &self.timestamp)
            .field("nonce", &self.nonce)
            .field("signature", &self.signature)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// no auth headers at all, the public path
    Public,
    Authenticated,
}

/// Mirrors what the upstream key gate does with an incoming request: nothing is public, some but
/// not all is rejected, everything present has to carry a fresh timestamp, a nonce meeting the
/// difficulty and a signature made with the bearer token.
pub fn verify_gate(
    headers: &HeaderMap,
    resource: &str,
    key_id: &str,
    policy: &AuthPolicy,
    now: i64,
) -> Result<GateDecision, AuthError> {
    let values = AUTH_HEADER_NAMES.map(|name| headers.get(name).and_then(|v| v.to_str().ok()));

    if values.iter().all(Option::is_none) {
        return Ok(GateDecision::Public);
    }

    let [
        Some(authorization),
        Some(session_id),
        Some(fingerprint),
        Some(timestamp),
        Some(nonce),
        Some(signature),
    ] = values
    else {
        return Err(AuthError::IncompleteHeaders);
    };

    let token = authorization
        .strip_prefix("Bearer ")
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::IncompleteHeaders)?;
    if session_id.is_empty() || fingerprint.is_empty() {
        return Err(AuthError::IncompleteHeaders);
    }

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| AuthError::TimestampOutOfRange)?;
    if !timestamp_in_window(ts, now, policy) {
        return Err(AuthError::TimestampOutOfRange);
    }

    let nonce_value: u64 = nonce.parse().map_err(|_| AuthError::InvalidSignature)?;
    if !verify_nonce(resource, key_id, ts, nonce_value, policy.difficulty) {
        return Err(AuthError::InvalidSignature);
    }

    if !SignatureUtil::new(token).verify_signature(&[resource, key_id, timestamp, nonce], signature)
    {
        return Err(AuthError::InvalidSignature);
    }

    Ok(GateDecision::Authenticated)
}

struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// runs the nonce search on the blocking pool; dropping the returned future stops the search
pub async fn search_nonce(
    resource: &str,
    key_id: &str,
    timestamp: i64,
    difficulty: Difficulty,
    bounds: SearchBounds,
) -> Result<u64, KeyFetchError> {
    let cancel = Arc::new(AtomicBool::new(false));
    let _guard = CancelOnDrop(cancel.clone());

    let resource = resource.to_string();
    let key_id = key_id.to_string();
    let handle = tokio::task::spawn_blocking(move || {
        nonce_search(&resource, &key_id, timestamp, difficulty, bounds, &cancel)
    });

    match handle.await {
        Ok(result) => Ok(result?),
        Err(e) => Err(KeyFetchError::Worker(e.to_string())),
    }
}

/// handed back with every resolution, authenticates key/segment calls for that provider
#[derive(Clone)]
pub struct KeyAuthenticator {
    profile: Arc<ProviderProfile>,
    token: Option<String>,
    session_id: String,
    fingerprint: String,
    relay: DynRelayService,
}

impl KeyAuthenticator {
    pub fn new(profile: Arc<ProviderProfile>, token: Option<String>, relay: DynRelayService) -> Self {
        let fingerprint = SignatureUtil::fingerprint(&[&profile.id, DEFAULT_USER_AGENT]);
        Self {
            profile,
            token,
            session_id: nanoid!(),
            fingerprint,
            relay,
        }
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn build_auth(&self, resource: &str, key_id: &str) -> Result<AuthHeaders, KeyFetchError> {
        self.build_auth_at(resource, key_id, Utc::now().timestamp()).await
    }

    pub async fn build_auth_at(
        &self,
        resource: &str,
        key_id: &str,
        now: i64,
    ) -> Result<AuthHeaders, KeyFetchError> {
        let policy = self.profile.auth.as_ref().ok_or(AuthError::IncompleteHeaders)?;
        let token = self
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::IncompleteHeaders)?;

        let timestamp = skewed_timestamp(now, policy);
        let nonce = search_nonce(
            resource,
            key_id,
            timestamp,
            policy.difficulty,
            SearchBounds::from(policy),
        )
        .await?;

        let ts = timestamp.to_string();
        let n = nonce.to_string();
        let signature = SignatureUtil::new(token).generate_signature(&[resource, key_id, &ts, &n]);

        debug!(
            "built auth for {} key {} (ts {}, nonce {})",
            self.profile.id, key_id, timestamp, nonce
        );

        let headers = AuthHeaders {
            token: token.to_string(),
            session_id: self.session_id.clone(),
            fingerprint: self.fingerprint.clone(),
            timestamp,
            nonce,
            signature,
        };
        // make sure every value survives as a header before anyone sends it
        headers.to_header_map()?;

        Ok(headers)
    }

    /// key or segment fetch, failures go back to the caller, there is no provider fallback here
    pub async fn fetch(
        &self,
        url: &str,
        resource: &str,
        key_id: &str,
    ) -> Result<RelayResponse, KeyFetchError> {
        let mut options = FetchOptions::default();
        if self.profile.auth.is_some() {
            options.headers = self.build_auth(resource, key_id).await?.pairs();
        }

        match self.relay.fetch(url, &options, &self.profile).await {
            Ok(response) => Ok(response),
            Err(RelayError::UpstreamError { status, detail }) => {
                match AuthError::from_upstream(status, &detail) {
                    Some(auth) => {
                        warn!(
                            "key gate for {} rejected {} ({}): {}",
                            self.profile.id,
                            key_id,
                            auth.stage(),
                            status
                        );
                        Err(auth.into())
                    }
                    None => Err(RelayError::UpstreamError { status, detail }.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Debug for KeyAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyAuthenticator")
            .field("provider", &self.profile.id)
            .field("has_token", &self.token.is_some())
            .field("session_id", &self.session_id)
            .finish()
    }
}
