#![allow(dead_code)]

use resolver::{
    providers::{ProviderProfile, ProviderTable},
    server::{error::RelayError, services::relay_services::RelayResponse},
};

pub const SCENARIO_PAYLOAD: &str = "eqqmp7,,`ak*ifsb*qs+or,^mf,s.,`e^kkbip,rp*bpmk,fkabu+j0r5";
pub const SCENARIO_URL: &str = "https://cdn-live-tv.ru/api/v1/channels/us-espn/index.m3u8";

/// provider entry shaped like the bundled cdnlive one, served over plain http from `mirrors`
pub fn profile_json(id: &str, mirrors: &[&str], fallbacks: &[&str]) -> String {
    let quoted = |items: &[&str]| {
        items
            .iter()
            .map(|m| format!("\"{}\"", m))
            .collect::<Vec<_>>()
            .join(",")
    };

    format!(
        r#"{{
            "id": "{id}",
            "mirrors": [{mirrors}],
            "max_mirrors": 3,
            "chain": {{
                "embed": {{ "kind": "template", "url": "http://{{mirror}}/embed/{{content}}?c={{locale}}" }},
                "player": {{ "kind": "follow", "pattern": "<iframe[^>]+src=\"(?P<url>[^\"]+)\"" }}
            }},
            "payload": {{
                "kind": "element",
                "selector": "div#player[data-src]",
                "attribute": "data-src",
                "params": {{ "delta": "data-shift" }},
                "token_pattern": "\"token\"\\s*:\\s*\"(?P<token>[^\"]+)\""
            }},
            "decode": {{
                "strategy": "shift-substitution",
                "delta": 3,
                "substitutions": {{ "7": ":", ",": "/", "*": "-", "+": ".", "<": "?", ">": "&" }}
            }},
            "allow_pattern": "^/api/v1/channels/[a-z]{{2}}-[a-z0-9-]+/(index|playlist)\\.m3u8$",
            "honeypot_tokens": ["FLYX.m3u8", "decoy"],
            "auth": {{
                "skew_secs": 10,
                "min_skew_secs": 5,
                "max_skew_secs": 60,
                "difficulty": {{ "kind": "leading-zero-bits", "bits": 8 }}
            }},
            "fallback_providers": [{fallbacks}]
        }}"#,
        id = id,
        mirrors = quoted(mirrors),
        fallbacks = quoted(fallbacks),
    )
}

pub fn table(entries: &[String]) -> ProviderTable {
    ProviderTable::from_json_str(&format!("[{}]", entries.join(","))).unwrap()
}

pub fn profile(id: &str, mirrors: &[&str]) -> ProviderProfile {
    let table = table(&[profile_json(id, mirrors, &[])]);
    (*table.get(id).unwrap()).clone()
}

/// inverse of the delta +3 table above, lowercase urls only
pub fn encode_shift(plain: &str) -> String {
    plain
        .chars()
        .map(|c| match c {
            ':' => '7',
            '/' => ',',
            '-' => '*',
            '.' => '+',
            '?' => '<',
            '&' => '>',
            c if (33..=126).contains(&(c as u32)) => {
                char::from_u32(33 + (c as u32 - 33 + 94 - 3) % 94).unwrap()
            }
            c => c,
        })
        .collect()
}

pub fn embed_page(mirror: &str, content: &str) -> String {
    format!(
        r#"<html><body><iframe width="100%" src="http://{}/player/{}"></iframe></body></html>"#,
        mirror, content
    )
}

pub fn player_page(payload: &str) -> String {
    format!(
        r#"<html><body>
            <div id="player" data-src="{}"></div>
            <script>var cfg = {{"token": "tok-123"}};</script>
        </body></html>"#,
        payload
    )
}

pub fn ok(url: &str, body: impl Into<String>) -> Result<RelayResponse, RelayError> {
    Ok(RelayResponse {
        status: 200,
        final_url: url.to_string(),
        body: body.into().into_bytes(),
    })
}

pub fn status(code: u16) -> Result<RelayResponse, RelayError> {
    Err(RelayError::UpstreamError {
        status: code,
        detail: String::new(),
    })
}

/// host of a fetched url, mirrors are matched on this
pub fn host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}
