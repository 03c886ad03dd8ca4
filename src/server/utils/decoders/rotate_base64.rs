use base64::Engine;
use serde::{Deserialize, Serialize};

use super::EncodedPayload;
use crate::server::error::{DecodeError, DecodeReason};

pub(super) const ID: &str = "rotate-base64";

/// rotated custom charset over '!'..='~' that lands on standard base64 once rotated back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotateBase64 {
    pub rotation: u32,
}

fn rotate(input: &str, rotation: u32) -> String {
    input
        .chars()
        .map(|c| {
            let code = c as u32;
            if (33..=126).contains(&code) {
                char::from_u32(33 + ((code - 33) + rotation) % 94).unwrap_or(c)
            } else {
                c
            }
        })
        .collect()
}

impl RotateBase64 {
    pub fn decode(&self, payload: &EncodedPayload) -> Result<String, DecodeError> {
        let rotation = payload.param::<u32>(ID, "rotation")?.unwrap_or(self.rotation) % 94;
        let standard = rotate(payload.text.trim(), rotation);

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(standard.as_bytes())
            .map_err(|e| {
                DecodeError::new(
                    ID,
                    DecodeReason::MalformedToken,
                    format!("not base64 after rotating by {}: {}", rotation, e),
                )
            })?;

        String::from_utf8(bytes).map_err(|e| {
            DecodeError::new(
                ID,
                DecodeReason::MalformedToken,
                format!("decoded bytes are not utf-8: {}", e),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(plain: &str, rotation: u32) -> String {
        let standard = base64::engine::general_purpose::STANDARD.encode(plain.as_bytes());
        rotate(&standard, 94 - rotation % 94)
    }

    #[test]
    fn round_trips_through_the_rotated_charset() {
        let plain = "https://strm.example.in/live/nfl-buf-den/playlist.m3u8";
        let strategy = RotateBase64 { rotation: 71 };

        let encoded = encode(plain, 71);
        assert!(!encoded.starts_with("aHR0"));
        assert_eq!(strategy.decode(&EncodedPayload::new(encoded)).unwrap(), plain);
    }

    #[test]
    fn wrong_rotation_is_a_typed_error() {
        let encoded = encode("https://a.example/x.m3u8", 71);
        let payload = EncodedPayload::new(encoded).with_param("rotation", "12");
        let err = RotateBase64 { rotation: 71 }.decode(&payload).unwrap_err();
        assert_eq!(err.reason, DecodeReason::MalformedToken);
    }
}
