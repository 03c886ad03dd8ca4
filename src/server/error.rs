use std::{fmt, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, Error>;

/// http facing errors, everything the controllers return ends up here
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Upstream {
        stage: &'static str,
        message: String,
    },

    #[error("request timed out")]
    GatewayTimeout,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, stage) = match &self {
            Error::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, None),
            Error::Upstream { stage, .. } => (StatusCode::BAD_GATEWAY, Some(*stage)),
            Error::GatewayTimeout => (StatusCode::GATEWAY_TIMEOUT, None),
        };
        let message = self.to_string();

        let body = match stage {
            Some(stage) => json!({ "success": false, "error": message, "stage": stage }),
            None => json!({ "success": false, "error": message }),
        };

        (status, Json(body)).into_response()
    }
}

/// the step of the fetch chain a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Embed,
    Redirect,
    Player,
    ExtractPayload,
    Decode,
    Validate,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Embed => "embed",
            Stage::Redirect => "redirect",
            Stage::Player => "player",
            Stage::ExtractPayload => "extract-payload",
            Stage::Decode => "decode",
            Stage::Validate => "validate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeReason {
    MalformedToken,
    OutOfRangeCode,
    TableMiss,
    InvalidParameter,
}

impl DecodeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeReason::MalformedToken => "malformed-token",
            DecodeReason::OutOfRangeCode => "out-of-range-code",
            DecodeReason::TableMiss => "table-miss",
            DecodeReason::InvalidParameter => "invalid-parameter",
        }
    }
}

impl fmt::Display for DecodeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{strategy} decode failed ({reason}): {detail}")]
pub struct DecodeError {
    pub strategy: &'static str,
    pub reason: DecodeReason,
    pub detail: String,
}

impl DecodeError {
    pub fn new(strategy: &'static str, reason: DecodeReason, detail: impl Into<String>) -> Self {
        Self {
            strategy,
            reason,
            detail: detail.into(),
        }
    }
}

/// `url` is the rejected candidate, for logs only; Display leaves it out
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("candidate rejected, honeypot token '{token}'")]
    Honeypot { url: String, token: String },

    #[error("candidate rejected: {reason}")]
    Malformed { url: String, reason: String },
}

impl ValidationError {
    pub fn candidate(&self) -> &str {
        match self {
            ValidationError::Honeypot { url, .. } | ValidationError::Malformed { url, .. } => url,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("auth header set is incomplete")]
    IncompleteHeaders,

    #[error("auth signature rejected")]
    InvalidSignature,

    #[error("auth timestamp outside the accepted window")]
    TimestampOutOfRange,
}

impl AuthError {
    pub fn stage(&self) -> &'static str {
        match self {
            AuthError::IncompleteHeaders => "headers-missing",
            AuthError::InvalidSignature => "invalid-signature",
            AuthError::TimestampOutOfRange => "timestamp-out-of-range",
        }
    }

    /// maps a rejected key/segment response onto the gate failure it reports
    pub fn from_upstream(status: u16, body: &str) -> Option<Self> {
        if !(400..500).contains(&status) {
            return None;
        }

        let body = body.to_ascii_lowercase();
        if body.contains("missing required headers") || body.contains("missing header") {
            Some(AuthError::IncompleteHeaders)
        } else if body.contains("timestamp") {
            Some(AuthError::TimestampOutOfRange)
        } else if body.contains("signature") || body.contains("invalid nonce") {
            Some(AuthError::InvalidSignature)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("nonce search gave up after {attempts} attempts")]
pub struct PowTimeout {
    pub attempts: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),

    #[error("upstream returned status {status}")]
    UpstreamError { status: u16, detail: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("relay required but no relay credential is configured")]
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchCause {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("unparsable body: {0}")]
    UnparsableBody(String),

    #[error("no target url: {0}")]
    NoTarget(String),

    #[error("payload element missing: {0}")]
    PayloadMissing(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} failed: {cause}")]
pub struct FetchError {
    pub stage: Stage,
    pub cause: FetchCause,
}

impl FetchError {
    pub fn new(stage: Stage, cause: impl Into<FetchCause>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionFailed {
    #[error("all {tried} mirror(s) failed, last error: {last}")]
    MirrorsExhausted { tried: usize, last: FetchError },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Validate(#[from] ValidationError),

    #[error("provider has no mirrors configured")]
    NoMirrors,
}

impl ExtractionFailed {
    pub fn stage(&self) -> &'static str {
        match self {
            ExtractionFailed::MirrorsExhausted { last, .. } => last.stage.as_str(),
            ExtractionFailed::Decode(_) => Stage::Decode.as_str(),
            ExtractionFailed::Validate(_) => Stage::Validate.as_str(),
            ExtractionFailed::NoMirrors => Stage::Embed.as_str(),
        }
    }

    /// only fetch-side exhaustion lets the orchestrator move on to a sibling provider
    pub fn allows_sibling_fallback(&self) -> bool {
        matches!(
            self,
            ExtractionFailed::MirrorsExhausted { .. } | ExtractionFailed::NoMirrors
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("extraction failed for provider '{provider}': {cause}")]
    ExtractionFailed {
        provider: String,
        cause: ExtractionFailed,
    },

    #[error("resolution timed out after {0:?}")]
    Timeout(Duration),
}

impl From<ResolveError> for Error {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::UnknownProvider(id) => Error::NotFound(format!("unknown provider '{}'", id)),
            ResolveError::Timeout(_) => Error::GatewayTimeout,
            ResolveError::ExtractionFailed { ref cause, .. } => Error::Upstream {
                stage: cause.stage(),
                message: err.to_string(),
            },
        }
    }
}

/// failures of an authenticated key/segment call, never retried on another provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyFetchError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    PowTimeout(#[from] PowTimeout),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("nonce search worker failed: {0}")]
    Worker(String),
}
