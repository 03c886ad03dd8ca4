use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::EncodedPayload;
use crate::server::error::{DecodeError, DecodeReason};

pub(super) const ID: &str = "shift-substitution";

/// Caesar-style shift over a printable range. Characters in `substitutions` stand in for
/// reserved syntax (separators, delimiters) and never take part in the shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftSubstitution {
    pub delta: i32,
    #[serde(default)]
    pub substitutions: BTreeMap<char, char>,
    #[serde(default)]
    pub range: PrintableRange,
}

/// inclusive code point range the shift wraps around in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintableRange {
    pub start: u32,
    pub end: u32,
}

impl Default for PrintableRange {
    fn default() -> Self {
        // '!' to '~'
        Self { start: 33, end: 126 }
    }
}

impl PrintableRange {
    pub fn width(&self) -> Result<u32, DecodeError> {
        if self.end < self.start || char::from_u32(self.end).is_none() {
            return Err(DecodeError::new(
                ID,
                DecodeReason::InvalidParameter,
                format!("range {}..={} is not usable", self.start, self.end),
            ));
        }
        Ok(self.end - self.start + 1)
    }

    fn contains(&self, code: u32) -> bool {
        (self.start..=self.end).contains(&code)
    }
}

impl ShiftSubstitution {
    pub fn decode(&self, payload: &EncodedPayload) -> Result<String, DecodeError> {
        let width = self.range.width()?;
        let delta = payload.param::<i32>(ID, "delta")?.unwrap_or(self.delta);
        let delta = delta.rem_euclid(width as i32) as u32;

        payload
            .text
            .chars()
            .map(|c| self.decode_char(c, delta, width))
            .collect()
    }

    fn decode_char(&self, c: char, delta: u32, width: u32) -> Result<char, DecodeError> {
        if let Some(&mapped) = self.substitutions.get(&c) {
            return Ok(mapped);
        }

        let code = c as u32;
        if !self.range.contains(code) {
            return Ok(c);
        }

        let shifted = self.range.start + (code - self.range.start + delta) % width;
        char::from_u32(shifted).ok_or_else(|| {
            DecodeError::new(
                ID,
                DecodeReason::OutOfRangeCode,
                format!("'{}' shifts to invalid code point {}", c, shifted),
            )
        })
    }
}
