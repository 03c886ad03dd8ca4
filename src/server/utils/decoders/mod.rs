//! Decoder registry. Every obfuscation scheme is a named strategy whose parameters live in the
//! provider table, so a new provider is a table entry and a new scheme is one variant here plus
//! its module.
//!
//! Strategies are pure: the same payload and parameters always give the same text, and anything
//! outside the grammar a strategy understands comes back as a [`DecodeError`].

mod base_conversion;
mod packed;
mod rotate_base64;
mod shift_substitution;

use std::{collections::BTreeMap, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::server::error::{DecodeError, DecodeReason};

pub use base_conversion::{BaseConversion, MASTER_ALPHABET};
pub use packed::parse_packed_call;
pub use rotate_base64::RotateBase64;
pub use shift_substitution::{PrintableRange, ShiftSubstitution};

/// anything bigger than this is not a stream url payload
pub const MAX_PAYLOAD_LEN: usize = 1 << 20;

/// raw payload plus whatever parameters the page shipped alongside it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedPayload {
    pub text: String,
    pub params: BTreeMap<String, String>,
    pub token: Option<String>,
}

impl EncodedPayload {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// typed per-request parameter, a present but unparsable value is an error
    pub(crate) fn param<T: FromStr>(
        &self,
        strategy: &'static str,
        key: &str,
    ) -> Result<Option<T>, DecodeError> {
        self.params
            .get(key)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|_| {
                    DecodeError::new(
                        strategy,
                        DecodeReason::InvalidParameter,
                        format!("parameter '{}' has unusable value '{}'", key, raw),
                    )
                })
            })
            .transpose()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum Strategy {
    ShiftSubstitution(ShiftSubstitution),
    BaseConversion(BaseConversion),
    RotateBase64(RotateBase64),
}

impl Strategy {
    pub fn id(&self) -> &'static str {
        match self {
            Strategy::ShiftSubstitution(_) => shift_substitution::ID,
            Strategy::BaseConversion(_) => base_conversion::ID,
            Strategy::RotateBase64(_) => rotate_base64::ID,
        }
    }

    /// static parameter check, run when the provider table loads
    pub fn check(&self) -> Result<(), DecodeError> {
        match self {
            Strategy::ShiftSubstitution(s) => s.range.width().map(|_| ()),
            Strategy::BaseConversion(s) => s.check(),
            Strategy::RotateBase64(_) => Ok(()),
        }
    }
}

pub fn decode(strategy: &Strategy, payload: &EncodedPayload) -> Result<String, DecodeError> {
    if payload.text.len() > MAX_PAYLOAD_LEN {
        return Err(DecodeError::new(
            strategy.id(),
            DecodeReason::MalformedToken,
            format!("payload of {} bytes is over the limit", payload.text.len()),
        ));
    }

    match strategy {
        Strategy::ShiftSubstitution(s) => s.decode(payload),
        Strategy::BaseConversion(s) => s.decode(payload),
        Strategy::RotateBase64(s) => s.decode(payload),
    }
}
