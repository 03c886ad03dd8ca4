use serde::{Deserialize, Serialize};

use super::EncodedPayload;
use crate::server::error::{DecodeError, DecodeReason};

pub(super) const ID: &str = "base-conversion";

pub const MASTER_ALPHABET: &str =
    "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ+/";

/// Interpreter for the packed "token, delimiter, base conversion" grammar.
///
/// The payload is a run of tokens, each terminated by a delimiter symbol. A token is a number
/// written least-significant symbol last in base `src_base`; re-expressed in base `dst_base`
/// and read as decimal it gives a byte code plus `offset`. The bytes are UTF-8.
///
/// Any of the numeric parameters may be left out of the table and supplied per request through
/// [`EncodedPayload::params`] (`src_base`, `dst_base`, `delimiter_index`, `offset`), which is how
/// packed pages ship them. A per-request `alphabet` replaces the master alphabet as the symbol
/// table, the digit value of a symbol being its index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseConversion {
    #[serde(default = "default_master")]
    pub master_alphabet: String,
    #[serde(default)]
    pub src_base: Option<u32>,
    #[serde(default = "default_dst_base")]
    pub dst_base: u32,
    #[serde(default)]
    pub delimiter_index: Option<usize>,
    #[serde(default)]
    pub offset: Option<i64>,
}

fn default_master() -> String {
    MASTER_ALPHABET.to_string()
}

fn default_dst_base() -> u32 {
    10
}

impl Default for BaseConversion {
    fn default() -> Self {
        Self {
            master_alphabet: default_master(),
            src_base: None,
            dst_base: default_dst_base(),
            delimiter_index: None,
            offset: None,
        }
    }
}

/// parameters after per-request overrides are applied
struct Resolved {
    symbols: Vec<char>,
    target: Vec<char>,
    src_base: u32,
    dst_base: u32,
    delimiter: char,
    offset: i64,
}

fn invalid(detail: impl Into<String>) -> DecodeError {
    DecodeError::new(ID, DecodeReason::InvalidParameter, detail)
}

impl BaseConversion {
    pub(super) fn check(&self) -> Result<(), DecodeError> {
        let master_len = self.master_alphabet.chars().count() as u32;
        if !(2..=master_len).contains(&self.dst_base) {
            return Err(invalid(format!(
                "dst_base {} outside 2..={}",
                self.dst_base, master_len
            )));
        }
        if let Some(src) = self.src_base {
            if !(2..=master_len).contains(&src) {
                return Err(invalid(format!("src_base {} outside 2..={}", src, master_len)));
            }
        }
        Ok(())
    }

    fn resolve(&self, payload: &EncodedPayload) -> Result<Resolved, DecodeError> {
        self.check()?;

        let master: Vec<char> = self.master_alphabet.chars().collect();
        let symbols: Vec<char> = match payload.params.get("alphabet") {
            Some(alphabet) => alphabet.chars().collect(),
            None => master.clone(),
        };

        let src_base = payload
            .param::<u32>(ID, "src_base")?
            .or(self.src_base)
            .ok_or_else(|| invalid("src_base is missing"))?;
        let dst_base = payload.param::<u32>(ID, "dst_base")?.unwrap_or(self.dst_base);
        let delimiter_index = payload
            .param::<usize>(ID, "delimiter_index")?
            .or(self.delimiter_index)
            .ok_or_else(|| invalid("delimiter_index is missing"))?;
        let offset = payload
            .param::<i64>(ID, "offset")?
            .or(self.offset)
            .ok_or_else(|| invalid("offset is missing"))?;

        if src_base < 2 || src_base as usize > symbols.len() || src_base as usize > master.len() {
            return Err(invalid(format!("src_base {} does not fit the alphabet", src_base)));
        }
        if dst_base < 2 || dst_base as usize > master.len() {
            return Err(invalid(format!("dst_base {} does not fit the alphabet", dst_base)));
        }
        // a delimiter inside the digit range would make tokens ambiguous
        if delimiter_index < src_base as usize {
            return Err(invalid(format!(
                "delimiter_index {} collides with a base-{} digit",
                delimiter_index, src_base
            )));
        }
        let delimiter = *symbols
            .get(delimiter_index)
            .ok_or_else(|| invalid(format!("delimiter_index {} is past the alphabet", delimiter_index)))?;

        Ok(Resolved {
            target: master[..dst_base as usize].to_vec(),
            symbols,
            src_base,
            dst_base,
            delimiter,
            offset,
        })
    }

    pub fn decode(&self, payload: &EncodedPayload) -> Result<String, DecodeError> {
        let params = self.resolve(payload)?;

        let mut tokens: Vec<&str> = payload.text.split(params.delimiter).collect();
        // every token is delimiter-terminated, so the tail after the last one is empty
        if tokens.last().is_some_and(|t| t.is_empty()) {
            tokens.pop();
        }

        let mut bytes = Vec::with_capacity(tokens.len());
        for token in tokens {
            let value = token_value(token, &params)?;
            let digits = to_base(value, &params);
            bytes.push(token_byte(token, &digits, params.offset)?);
        }

        String::from_utf8(bytes).map_err(|e| {
            DecodeError::new(
                ID,
                DecodeReason::MalformedToken,
                format!("decoded bytes are not utf-8: {}", e),
            )
        })
    }
}

fn token_value(token: &str, params: &Resolved) -> Result<u128, DecodeError> {
    let base = params.src_base as u128;
    let mut value: u128 = 0;
    let mut weight: u128 = 1;

    for (position, symbol) in token.chars().rev().enumerate() {
        let digit = params
            .symbols
            .iter()
            .position(|s| *s == symbol)
            .filter(|d| (*d as u32) < params.src_base)
            .ok_or_else(|| {
                DecodeError::new(
                    ID,
                    DecodeReason::TableMiss,
                    format!("symbol '{}' is not a base-{} digit", symbol, params.src_base),
                )
            })?;

        if position > 0 {
            weight = weight.checked_mul(base).ok_or_else(|| overflow(token))?;
        }
        value = (digit as u128)
            .checked_mul(weight)
            .and_then(|term| value.checked_add(term))
            .ok_or_else(|| overflow(token))?;
    }

    Ok(value)
}

fn overflow(token: &str) -> DecodeError {
    DecodeError::new(
        ID,
        DecodeReason::MalformedToken,
        format!("token '{}' overflows", token),
    )
}

/// most significant digit first, zero is the target zero digit rather than an empty string
fn to_base(mut value: u128, params: &Resolved) -> String {
    if value == 0 {
        return params.target[0].to_string();
    }

    let base = params.dst_base as u128;
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(params.target[(value % base) as usize]);
        value /= base;
    }
    digits.iter().rev().collect()
}

fn token_byte(token: &str, digits: &str, offset: i64) -> Result<u8, DecodeError> {
    let code: i64 = digits.parse().map_err(|_| {
        DecodeError::new(
            ID,
            DecodeReason::MalformedToken,
            format!("token '{}' converts to non-decimal '{}'", token, digits),
        )
    })?;

    code.checked_sub(offset)
        .and_then(|c| u8::try_from(c).ok())
        .ok_or_else(|| {
            DecodeError::new(
                ID,
                DecodeReason::OutOfRangeCode,
                format!("code {} minus offset {} is not a byte", code, offset),
            )
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// inverse transform for fixtures: byte + offset in decimal, re-read as base `dst`, written in
    /// base `src` with `symbols`, each token terminated by the delimiter
    pub(crate) fn encode(
        plain: &str,
        symbols: &[char],
        src_base: u32,
        delimiter_index: usize,
        offset: i64,
    ) -> String {
        let mut out = String::new();
        for byte in plain.as_bytes() {
            let code = (*byte as i64 + offset) as u128;
            // dst base is 10, the decimal digits of `code` are the target digit string
            let mut value = code;
            let mut digits = Vec::new();
            if value == 0 {
                digits.push(symbols[0]);
            }
            while value > 0 {
                digits.push(symbols[(value % src_base as u128) as usize]);
                value /= src_base as u128;
            }
            out.extend(digits.iter().rev());
            out.push(symbols[delimiter_index]);
        }
        out
    }

    fn fixed(src_base: u32, delimiter_index: usize, offset: i64) -> BaseConversion {
        BaseConversion {
            src_base: Some(src_base),
            delimiter_index: Some(delimiter_index),
            offset: Some(offset),
            ..Default::default()
        }
    }

    #[test]
    fn round_trips_with_master_alphabet() {
        let master: Vec<char> = MASTER_ALPHABET.chars().collect();
        let plain = "https://edge.example.net/api/v1/channels/fr-canal-plus/playlist.m3u8";
        let strategy = fixed(7, 40, 23);

        let encoded = encode(plain, &master, 7, 40, 23);
        let decoded = strategy.decode(&EncodedPayload::new(encoded)).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn round_trips_with_per_request_alphabet_and_unicode() {
        let alphabet: Vec<char> = "qwertyuiop".chars().collect();
        let plain = "https://cdn.example/ch/über-tv/index.m3u8";

        let encoded = encode(plain, &alphabet, 5, 5, 41);
        let payload = EncodedPayload::new(encoded)
            .with_param("alphabet", "qwertyuiop")
            .with_param("src_base", "5")
            .with_param("delimiter_index", "5")
            .with_param("offset", "41");

        let decoded = BaseConversion::default().decode(&payload).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn zero_valued_tokens_emit_the_zero_digit() {
        // value 0 -> "0" -> code 0 - (-48) = '0'
        let strategy = fixed(2, 10, -48);
        let payload = EncodedPayload::new("0a1a");
        // "0" -> 0 -> "0" -> 48 ('0'), "1" -> 1 -> "1" -> 49 ('1')
        assert_eq!(strategy.decode(&payload).unwrap(), "01");

        // an empty token is a zero as well
        assert_eq!(strategy.decode(&EncodedPayload::new("a")).unwrap(), "0");
    }

    #[test]
    fn rejects_symbols_outside_the_source_base() {
        let strategy = fixed(3, 10, 0);
        let err = strategy.decode(&EncodedPayload::new("19a")).unwrap_err();
        assert_eq!(err.reason, DecodeReason::TableMiss);
        assert_eq!(err.strategy, "base-conversion");
    }

    #[test]
    fn rejects_codes_that_are_not_bytes() {
        let strategy = fixed(10, 10, 0);
        let err = strategy.decode(&EncodedPayload::new("999a")).unwrap_err();
        assert_eq!(err.reason, DecodeReason::OutOfRangeCode);

        let below = fixed(10, 10, 50);
        let err = below.decode(&EncodedPayload::new("49a")).unwrap_err();
        assert_eq!(err.reason, DecodeReason::OutOfRangeCode);
    }

    #[test]
    fn rejects_overflowing_tokens() {
        let strategy = fixed(9, 10, 0);
        let token = "8".repeat(60);
        let err = strategy
            .decode(&EncodedPayload::new(format!("{}a", token)))
            .unwrap_err();
        assert_eq!(err.reason, DecodeReason::MalformedToken);
    }

    #[test]
    fn missing_or_colliding_parameters_are_invalid() {
        let err = BaseConversion::default()
            .decode(&EncodedPayload::new("1a"))
            .unwrap_err();
        assert_eq!(err.reason, DecodeReason::InvalidParameter);

        let err = fixed(10, 4, 0).decode(&EncodedPayload::new("1a")).unwrap_err();
        assert_eq!(err.reason, DecodeReason::InvalidParameter);
    }
}
