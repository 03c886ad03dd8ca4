use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{providers::AuthPolicy, server::error::PowTimeout};

/// how many hashes between checks of the deadline and the cancel flag
const CHECK_EVERY: u64 = 1024;

/// what a challenge digest has to look like for the gate to take it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Difficulty {
    LeadingZeroBits { bits: u32 },
    /// the first `hex_digits` of the hex digest, read as a number, are below `threshold`
    PrefixBelow { hex_digits: usize, threshold: u64 },
}

impl Difficulty {
    pub fn check(&self) -> Result<(), String> {
        match *self {
            Difficulty::LeadingZeroBits { bits } if bits > 256 => {
                Err(format!("{} leading zero bits is more than the digest has", bits))
            }
            Difficulty::PrefixBelow { hex_digits, .. } if !(1..=16).contains(&hex_digits) => {
                Err(format!("hex_digits {} must be within 1..=16", hex_digits))
            }
            _ => Ok(()),
        }
    }

    pub fn is_satisfied_by(&self, digest: &[u8]) -> bool {
        match *self {
            Difficulty::LeadingZeroBits { bits } => leading_zero_bits(digest) >= bits,
            Difficulty::PrefixBelow {
                hex_digits,
                threshold,
            } => {
                let hex = hex::encode(digest);
                hex.get(..hex_digits.min(16))
                    .and_then(|prefix| u64::from_str_radix(prefix, 16).ok())
                    .is_some_and(|value| value < threshold)
            }
        }
    }
}

fn leading_zero_bits(digest: &[u8]) -> u32 {
    let mut total = 0;
    for byte in digest {
        if *byte == 0 {
            total += 8;
        } else {
            total += byte.leading_zeros();
            break;
        }
    }
    total
}

pub fn challenge_message(resource: &str, key_id: &str, timestamp: i64, nonce: u64) -> String {
    format!("{}|{}|{}|{}", resource, key_id, timestamp, nonce)
}

pub fn challenge_digest(resource: &str, key_id: &str, timestamp: i64, nonce: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(challenge_message(resource, key_id, timestamp, nonce).as_bytes());
    hasher.finalize().into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchBounds {
    pub max_attempts: u64,
    pub max_duration: Duration,
}

impl From<&AuthPolicy> for SearchBounds {
    fn from(policy: &AuthPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            max_duration: Duration::from_millis(policy.max_duration_ms),
        }
    }
}

/// Brute force nonces from 0 up until the digest meets `difficulty`. CPU bound, keep it off the
/// async workers. `cancel` is polled together with the deadline.
pub fn nonce_search(
    resource: &str,
    key_id: &str,
    timestamp: i64,
    difficulty: Difficulty,
    bounds: SearchBounds,
    cancel: &AtomicBool,
) -> Result<u64, PowTimeout> {
    let deadline = Instant::now() + bounds.max_duration;

    for nonce in 0..bounds.max_attempts {
        if nonce % CHECK_EVERY == 0
            && nonce > 0
            && (cancel.load(Ordering::Relaxed) || Instant::now() >= deadline)
        {
            return Err(PowTimeout { attempts: nonce });
        }

        let digest = challenge_digest(resource, key_id, timestamp, nonce);
        if difficulty.is_satisfied_by(&digest) {
            return Ok(nonce);
        }
    }

    Err(PowTimeout {
        attempts: bounds.max_attempts,
    })
}

pub fn verify_nonce(
    resource: &str,
    key_id: &str,
    timestamp: i64,
    nonce: u64,
    difficulty: Difficulty,
) -> bool {
    difficulty.is_satisfied_by(&challenge_digest(resource, key_id, timestamp, nonce))
}

/// timestamp to present, `now` minus the provider's configured skew
pub fn skewed_timestamp(now: i64, policy: &AuthPolicy) -> i64 {
    now.saturating_sub(policy.skew_secs)
}

/// gate side check: timestamp must sit in [now - max_skew, now - min_skew]
pub fn timestamp_in_window(timestamp: i64, now: i64, policy: &AuthPolicy) -> bool {
    (now.saturating_sub(policy.max_skew_secs)..=now.saturating_sub(policy.min_skew_secs))
        .contains(&timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(skew: i64, min: i64, max: i64) -> AuthPolicy {
        AuthPolicy {
            skew_secs: skew,
            min_skew_secs: min,
            max_skew_secs: max,
            difficulty: Difficulty::LeadingZeroBits { bits: 8 },
            max_attempts: 1_000_000,
            max_duration_ms: 5_000,
        }
    }

    fn bounds() -> SearchBounds {
        SearchBounds {
            max_attempts: 2_000_000,
            max_duration: Duration::from_secs(10),
        }
    }

    #[test]
    fn found_nonce_satisfies_the_predicate_when_recomputed() {
        let cancel = AtomicBool::new(false);
        for difficulty in [
            Difficulty::LeadingZeroBits { bits: 12 },
            Difficulty::PrefixBelow {
                hex_digits: 4,
                threshold: 0x1000,
            },
        ] {
            let nonce =
                nonce_search("premium51", "5886102", 1_760_000_000, difficulty, bounds(), &cancel)
                    .unwrap();
            assert!(verify_nonce("premium51", "5886102", 1_760_000_000, nonce, difficulty));
            // the search returns the first hit
            assert!(
                (0..nonce).all(|n| !verify_nonce("premium51", "5886102", 1_760_000_000, n, difficulty))
            );
        }
    }

    #[test]
    fn gives_up_when_attempts_run_out() {
        let cancel = AtomicBool::new(false);
        let tight = SearchBounds {
            max_attempts: 10,
            max_duration: Duration::from_secs(10),
        };
        let err = nonce_search(
            "r",
            "k",
            1,
            Difficulty::LeadingZeroBits { bits: 200 },
            tight,
            &cancel,
        )
        .unwrap_err();
        assert_eq!(err.attempts, 10);
    }

    #[test]
    fn stops_when_cancelled() {
        let cancel = AtomicBool::new(true);
        let err = nonce_search(
            "r",
            "k",
            1,
            Difficulty::LeadingZeroBits { bits: 200 },
            bounds(),
            &cancel,
        )
        .unwrap_err();
        assert_eq!(err.attempts, CHECK_EVERY);
    }

    #[test]
    fn counts_leading_zero_bits() {
        assert_eq!(leading_zero_bits(&[0, 0, 0b0001_0000, 0xff]), 19);
        assert_eq!(leading_zero_bits(&[0xff]), 0);
        assert_eq!(leading_zero_bits(&[0, 0]), 16);
    }

    #[test]
    fn timestamp_window_uses_the_profile_skews() {
        let now = 1_760_000_000;
        let policy = policy(10, 5, 60);

        let ts = skewed_timestamp(now, &policy);
        assert_eq!(ts, now - 10);
        assert!(timestamp_in_window(ts, now, &policy));
        assert!(timestamp_in_window(now - 5, now, &policy));
        assert!(timestamp_in_window(now - 60, now, &policy));

        // too fresh and too stale both fail
        assert!(!timestamp_in_window(now, now, &policy));
        assert!(!timestamp_in_window(now - 4, now, &policy));
        assert!(!timestamp_in_window(now - 61, now, &policy));
    }

    #[test]
    fn extreme_skews_saturate_instead_of_overflowing() {
        let policy = policy(i64::MIN, i64::MIN, i64::MIN);
        assert_eq!(skewed_timestamp(1, &policy), i64::MAX);
        assert!(timestamp_in_window(i64::MAX, 1, &policy));
        assert!(!timestamp_in_window(0, 1, &policy));
    }

    #[test]
    fn difficulty_check_catches_impossible_settings() {
        assert!(Difficulty::LeadingZeroBits { bits: 300 }.check().is_err());
        assert!(
            Difficulty::PrefixBelow {
                hex_digits: 0,
                threshold: 1
            }
            .check()
            .is_err()
        );
        assert!(Difficulty::LeadingZeroBits { bits: 16 }.check().is_ok());
    }
}
