mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use common::{ok, profile};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use resolver::{
    providers::ProviderProfile,
    server::{
        error::{AuthError, KeyFetchError, RelayError},
        services::{
            auth_services::{GateDecision, KeyAuthenticator, verify_gate},
            relay_services::{FetchOptions, RelayResponse, RelayServiceTrait},
        },
    },
};

/// plays the upstream key gate: checks the header set and answers the way the real one does
struct GateRelay {
    /// seconds added to the gate's clock
    clock_offset: i64,
    decisions: Mutex<Vec<GateDecision>>,
}

impl GateRelay {
    fn new(clock_offset: i64) -> Arc<Self> {
        Arc::new(Self {
            clock_offset,
            decisions: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RelayServiceTrait for GateRelay {
    async fn fetch(
        &self,
        url: &str,
        options: &FetchOptions,
        profile: &ProviderProfile,
    ) -> Result<RelayResponse, RelayError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }

        let policy = profile.auth.as_ref().unwrap();
        let now = Utc::now().timestamp() + self.clock_offset;

        match verify_gate(&headers, "premium51", "5886102", policy, now) {
            Ok(decision) => {
                self.decisions.lock().unwrap().push(decision);
                ok(url, "0123456789abcdef")
            }
            Err(err) => Err(RelayError::UpstreamError {
                status: 403,
                detail: match err {
                    AuthError::IncompleteHeaders => "{\"error\":\"Missing required headers\"}",
                    AuthError::TimestampOutOfRange => "{\"error\":\"Timestamp out of range\"}",
                    AuthError::InvalidSignature => "{\"error\":\"Invalid signature\"}",
                }
                .to_string(),
            }),
        }
    }

    async fn health(&self) -> Result<f64, RelayError> {
        Ok(0.0)
    }
}

fn authenticator(relay: Arc<GateRelay>, token: Option<&str>) -> KeyAuthenticator {
    KeyAuthenticator::new(
        Arc::new(profile("cdnlive", &["cdn.test"])),
        token.map(str::to_string),
        relay,
    )
}

#[tokio::test]
async fn test_passes_the_gate_with_a_complete_header_set() {
    let relay = GateRelay::new(0);
    let auth = authenticator(relay.clone(), Some("tok-123"));

    let response = auth
        .fetch("https://keys.test/key/5886102", "premium51", "5886102")
        .await
        .unwrap();

    assert_eq!(response.body, b"0123456789abcdef");
    assert_eq!(
        *relay.decisions.lock().unwrap(),
        vec![GateDecision::Authenticated]
    );
}

#[tokio::test]
async fn test_emits_all_headers_or_none() {
    let auth = authenticator(GateRelay::new(0), Some("tok-123"));
    let headers = auth.build_auth("premium51", "5886102").await.unwrap();

    let names: Vec<String> = headers.pairs().into_iter().map(|(n, _)| n).collect();
    assert_eq!(
        names,
        vec![
            "authorization",
            "x-session-id",
            "x-fingerprint",
            "x-key-timestamp",
            "x-key-nonce",
            "x-key-signature"
        ]
    );
    assert!(headers.pairs().iter().all(|(_, v)| !v.is_empty()));
    assert_eq!(headers.session_id, auth.session_id());
}

#[tokio::test]
async fn test_refuses_to_build_a_partial_set_without_a_token() {
    let relay = GateRelay::new(0);
    let auth = authenticator(relay.clone(), None);

    let err = auth
        .fetch("https://keys.test/key/5886102", "premium51", "5886102")
        .await
        .unwrap_err();

    assert_eq!(err, KeyFetchError::Auth(AuthError::IncompleteHeaders));
    // nothing was sent
    assert!(relay.decisions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_maps_a_stale_timestamp_to_its_stage() {
    // the gate's clock runs two minutes ahead, outside the 60s window
    let auth = authenticator(GateRelay::new(120), Some("tok-123"));

    let err = auth
        .fetch("https://keys.test/key/5886102", "premium51", "5886102")
        .await
        .unwrap_err();

    match err {
        KeyFetchError::Auth(auth) => {
            assert_eq!(auth, AuthError::TimestampOutOfRange);
            assert_eq!(auth.stage(), "timestamp-out-of-range");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_maps_a_wrong_resource_to_invalid_signature() {
    let auth = authenticator(GateRelay::new(0), Some("tok-123"));

    // the gate checks premium51, this signs premium52
    let err = auth
        .fetch("https://keys.test/key/5886102", "premium52", "5886102")
        .await
        .unwrap_err();

    assert_eq!(err, KeyFetchError::Auth(AuthError::InvalidSignature));
}
