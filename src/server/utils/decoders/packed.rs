use once_cell::sync::Lazy;
use regex::Regex;

use super::{EncodedPayload, base_conversion};
use crate::server::error::{DecodeError, DecodeReason};

// eval(function(h,u,n,t,e,r){...}("payload",u,"alphabet",offset,base,r))
// only the argument list is read, the function body is never looked at past its braces
static PACKED_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)eval\(\s*function\s*\(\s*\w+(?:\s*,\s*\w+){5}\s*\)\s*\{.*?\}\s*\(\s*["'](?P<payload>[^"']*)["']\s*,\s*\d+\s*,\s*["'](?P<alphabet>[^"']+)["']\s*,\s*(?P<offset>\d+)\s*,\s*(?P<base>\d+)\s*,\s*\d+\s*\)\s*\)"#,
    )
    .expect("packed call regex should compile")
});

/// Pulls the payload and its per-request parameters out of a packed eval call. The script is
/// matched against one fixed shape and never executed, anything else is refused.
pub fn parse_packed_call(script: &str) -> Result<EncodedPayload, DecodeError> {
    let captures = PACKED_CALL.captures(script).ok_or_else(|| {
        DecodeError::new(
            base_conversion::ID,
            DecodeReason::MalformedToken,
            "script is not a recognized packed call",
        )
    })?;

    // the regex guarantees all four groups on a match
    let group = |name: &str| captures.name(name).map(|m| m.as_str()).unwrap_or_default();

    let base = group("base");
    Ok(EncodedPayload::new(group("payload"))
        .with_param("alphabet", group("alphabet"))
        .with_param("src_base", base)
        .with_param("delimiter_index", base)
        .with_param("dst_base", "10")
        .with_param("offset", group("offset")))
}
