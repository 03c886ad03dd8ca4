use regex::Regex;
use url::Url;

use crate::{providers::ProviderProfile, server::error::ValidationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(Url),
    Honeypot { token: String },
    Malformed { reason: String },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }

    pub fn into_result(self, candidate: &str) -> Result<Url, ValidationError> {
        match self {
            Verdict::Accepted(url) => Ok(url),
            Verdict::Honeypot { token } => Err(ValidationError::Honeypot {
                url: candidate.to_string(),
                token,
            }),
            Verdict::Malformed { reason } => Err(ValidationError::Malformed {
                url: candidate.to_string(),
                reason,
            }),
        }
    }
}

pub fn validate(candidate: &str, profile: &ProviderProfile) -> Verdict {
    classify(
        candidate,
        profile.allow_pattern.regex(),
        &profile.honeypot_tokens,
    )
}

/// honeypot tokens are checked before the allow pattern, a decoy shaped like a real playlist
/// still has to lose
pub fn classify(candidate: &str, allow_pattern: &Regex, honeypot_tokens: &[String]) -> Verdict {
    let url = match Url::parse(candidate.trim()) {
        Ok(url) => url,
        Err(e) => {
            return Verdict::Malformed {
                reason: format!("not an absolute url: {}", e),
            };
        }
    };

    if !matches!(url.scheme(), "http" | "https") {
        return Verdict::Malformed {
            reason: format!("unsupported scheme '{}'", url.scheme()),
        };
    }

    let raw_path = url.path().to_ascii_lowercase();
    // decoys sometimes percent-encode their marker
    let decoded_path = urlencoding::decode(&raw_path)
        .map(|p| p.to_lowercase())
        .unwrap_or_else(|_| raw_path.clone());

    for token in honeypot_tokens {
        let token = token.to_ascii_lowercase();
        if token.is_empty() {
            continue;
        }
        if raw_path.contains(&token) || decoded_path.contains(&token) {
            return Verdict::Honeypot { token };
        }
    }

    if !allow_pattern.is_match(url.path()) {
        return Verdict::Malformed {
            reason: format!("path does not match allow pattern {}", allow_pattern.as_str()),
        };
    }

    Verdict::Accepted(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow() -> Regex {
        Regex::new(r"^/api/v1/channels/[a-z]{2}-[a-z0-9-]+/(index|playlist)\.m3u8$").unwrap()
    }

    fn tokens() -> Vec<String> {
        vec!["flyx.m3u8".to_string(), "honeypot".to_string()]
    }

    #[test]
    fn accepts_the_structural_shape() {
        for candidate in [
            "https://cdn-live-tv.ru/api/v1/channels/us-espn/index.m3u8",
            "http://edge.example.net/api/v1/channels/uk-sky-news-2/playlist.m3u8?t=1",
        ] {
            assert!(classify(candidate, &allow(), &tokens()).is_accepted(), "{}", candidate);
        }
    }

    #[test]
    fn honeypot_wins_regardless_of_case() {
        let verdict = classify(
            "https://cdn-live-tv.ru/api/v1/channels/us-espn/FLYX.m3u8",
            &allow(),
            &tokens(),
        );
        assert_eq!(
            verdict,
            Verdict::Honeypot {
                token: "flyx.m3u8".into()
            }
        );

        // shaped exactly like an accepted playlist, still a decoy
        let lookalike = Regex::new(r"^/api/v1/channels/.+\.m3u8$").unwrap();
        let verdict = classify(
            "https://cdn.example/api/v1/channels/HoneyPot-1/index.m3u8",
            &lookalike,
            &tokens(),
        );
        assert!(matches!(verdict, Verdict::Honeypot { .. }));
    }

    #[test]
    fn literal_flyx_segment_is_a_honeypot() {
        let verdict = classify("https://edge.example.net/hls/flyx.m3u8", &allow(), &tokens());
        assert!(matches!(verdict, Verdict::Honeypot { ref token } if token == "flyx.m3u8"));
        assert!(verdict.into_result("x").is_err());
    }

    #[test]
    fn percent_encoded_decoys_are_caught() {
        let verdict = classify(
            "https://edge.example.net/api/v1/channels/us-a/flyx%2Em3u8",
            &allow(),
            &tokens(),
        );
        assert!(matches!(verdict, Verdict::Honeypot { .. }));
    }

    #[test]
    fn rejects_everything_off_pattern() {
        for candidate in [
            "not a url",
            "/api/v1/channels/us-espn/index.m3u8",
            "ftp://cdn.example/api/v1/channels/us-espn/index.m3u8",
            "https://cdn.example/api/v1/channels/us-espn/index",
            "https://cdn.example/api/v1/channels/usa-espn/index.m3u8",
            "https://cdn.example/api/v1/channels/us-espn/master.m3u8",
        ] {
            let verdict = classify(candidate, &allow(), &tokens());
            assert!(matches!(verdict, Verdict::Malformed { .. }), "{}", candidate);
        }
    }
}
