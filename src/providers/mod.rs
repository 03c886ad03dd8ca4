pub mod model;

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, RwLock},
};

use anyhow::{Context, bail};
use scraper::Selector;
use tracing::{info, warn};

pub use model::*;

/// a day, anything past this is a broken table
const MAX_SKEW_SECS: i64 = 86_400;

/// bundled table, used when no --providers-path is given
const BUNDLED_PROVIDERS: &str = include_str!("../../providers.json");

/// immutable provider lookup, built once and only ever replaced whole
#[derive(Debug, Default)]
pub struct ProviderTable {
    profiles: HashMap<String, Arc<ProviderProfile>>,
}

impl ProviderTable {
    pub fn from_profiles(profiles: Vec<ProviderProfile>) -> anyhow::Result<Self> {
        let mut table = HashMap::with_capacity(profiles.len());

        for mut profile in profiles {
            validate_profile(&profile)
                .with_context(|| format!("provider '{}' is invalid", profile.id))?;

            // matching is case-insensitive, normalize once here
            profile.honeypot_tokens = profile
                .honeypot_tokens
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect();

            if table.contains_key(&profile.id) {
                bail!("provider '{}' is defined twice", profile.id);
            }
            table.insert(profile.id.clone(), Arc::new(profile));
        }

        for profile in table.values() {
            for sibling in &profile.fallback_providers {
                if !table.contains_key(sibling) {
                    warn!(
                        "provider '{}' lists unknown fallback '{}', it will be skipped",
                        profile.id, sibling
                    );
                }
            }
        }

        Ok(Self { profiles: table })
    }

    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let profiles: Vec<ProviderProfile> =
            serde_json::from_str(json).context("failed to parse provider table")?;
        Self::from_profiles(profiles)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read provider table {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn bundled() -> anyhow::Result<Self> {
        Self::from_json_str(BUNDLED_PROVIDERS)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ProviderProfile>> {
        self.profiles.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

fn validate_profile(profile: &ProviderProfile) -> anyhow::Result<()> {
    if profile.id.trim().is_empty() {
        bail!("id must not be empty");
    }
    if profile.mirrors.is_empty() {
        bail!("at least one mirror is required");
    }
    if profile.max_mirrors == 0 {
        bail!("max_mirrors must be at least 1");
    }

    let selector = profile.payload.source.selector();
    if let Err(e) = Selector::parse(selector) {
        bail!("payload selector '{}' does not parse: {:?}", selector, e);
    }
    if let PayloadSource::ScriptAssignment { pattern, .. } = &profile.payload.source {
        if !pattern.has_group("payload") {
            bail!("script assignment pattern '{}' has no 'payload' group", pattern.as_str());
        }
    }

    profile
        .decode
        .check()
        .map_err(|e| anyhow::anyhow!("decode strategy rejected: {}", e))?;

    if let Some(auth) = &profile.auth {
        for skew in [auth.skew_secs, auth.min_skew_secs, auth.max_skew_secs] {
            if !(0..=MAX_SKEW_SECS).contains(&skew) {
                bail!("skew {} is outside 0..={}", skew, MAX_SKEW_SECS);
            }
        }
        if auth.min_skew_secs > auth.max_skew_secs {
            bail!(
                "skew window is inverted ({} > {})",
                auth.min_skew_secs,
                auth.max_skew_secs
            );
        }
        if !(auth.min_skew_secs..=auth.max_skew_secs).contains(&auth.skew_secs) {
            bail!(
                "skew {} is outside the window [{}, {}]",
                auth.skew_secs,
                auth.min_skew_secs,
                auth.max_skew_secs
            );
        }
        if auth.max_attempts == 0 || auth.max_duration_ms == 0 {
            bail!("nonce search bounds must be positive");
        }
        auth.difficulty
            .check()
            .map_err(|e| anyhow::anyhow!("difficulty rejected: {}", e))?;
    }

    Ok(())
}

/// holds the current table, reload swaps the whole Arc so readers never see a half update
#[derive(Debug)]
pub struct ProviderCatalog {
    current: RwLock<Arc<ProviderTable>>,
}

impl ProviderCatalog {
    pub fn new(table: ProviderTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    pub fn snapshot(&self) -> Arc<ProviderTable> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            // a writer can only panic between swaps, the Arc inside is still whole
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn swap(&self, table: ProviderTable) {
        let table = Arc::new(table);
        match self.current.write() {
            Ok(mut guard) => *guard = table,
            Err(poisoned) => *poisoned.into_inner() = table,
        }
    }

    pub fn reload_from(&self, path: &Path) -> anyhow::Result<usize> {
        let table = ProviderTable::load(path)?;
        let count = table.len();
        self.swap(table);
        info!("provider table reloaded from {} ({} providers)", path.display(), count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"[{
        "id": "alpha",
        "mirrors": ["alpha.example"],
        "chain": {
            "embed": { "kind": "template", "url": "https://{mirror}/embed/{content}" },
            "player": { "kind": "follow", "pattern": "src=\"(?P<url>[^\"]+)\"" }
        },
        "payload": { "kind": "element", "selector": "div#data" },
        "decode": { "strategy": "shift-substitution", "delta": 3 },
        "allow_pattern": "^/live/.+\\.m3u8$",
        "honeypot_tokens": ["FLYX"]
    }]"#;

    #[test]
    fn bundled_table_loads() {
        let table = ProviderTable::bundled().unwrap();
        assert!(!table.is_empty());
        assert!(table.get("cdnlive").is_some());
    }

    #[test]
    fn tokens_are_lowercased_and_defaults_apply() {
        let table = ProviderTable::from_json_str(MINIMAL).unwrap();
        let profile = table.get("alpha").unwrap();
        assert_eq!(profile.honeypot_tokens, vec!["flyx".to_string()]);
        assert_eq!(profile.max_mirrors, 3);
        assert!(!profile.relay_required);
        assert!(profile.auth.is_none());
    }

    #[test]
    fn rejects_skew_outside_window() {
        let json = MINIMAL.replace(
            "\"honeypot_tokens\": [\"FLYX\"]",
            r#""honeypot_tokens": [],
            "auth": {
                "skew_secs": 90, "min_skew_secs": 5, "max_skew_secs": 60,
                "difficulty": { "kind": "leading-zero-bits", "bits": 8 }
            }"#,
        );
        let err = ProviderTable::from_json_str(&json).unwrap_err();
        assert!(format!("{:#}", err).contains("outside the window"));
    }

    #[test]
    fn rejects_extreme_skews() {
        let json = MINIMAL.replace(
            "\"honeypot_tokens\": [\"FLYX\"]",
            r#""honeypot_tokens": [],
            "auth": {
                "skew_secs": -9223372036854775808, "min_skew_secs": -9223372036854775808,
                "max_skew_secs": 60,
                "difficulty": { "kind": "leading-zero-bits", "bits": 8 }
            }"#,
        );
        let err = ProviderTable::from_json_str(&json).unwrap_err();
        assert!(format!("{:#}", err).contains("outside 0..=86400"));
    }

    #[test]
    fn script_assignment_needs_a_payload_group() {
        let locator = r#"{ "kind": "element", "selector": "div#data" }"#;
        let with_group = MINIMAL.replace(
            locator,
            r#"{ "kind": "script_assignment", "selector": "script",
                 "pattern": "window\\['cfg'\\]\\s*=\\s*'(?P<payload>[^']*)'" }"#,
        );
        assert!(ProviderTable::from_json_str(&with_group).is_ok());

        let without = MINIMAL.replace(
            locator,
            r#"{ "kind": "script_assignment", "selector": "script", "pattern": "window\\['cfg'\\]='([^']*)'" }"#,
        );
        let err = ProviderTable::from_json_str(&without).unwrap_err();
        assert!(format!("{:#}", err).contains("no 'payload' group"));
    }

    #[test]
    fn rejects_duplicates_and_bad_patterns() {
        let twice = format!("[{0},{0}]", MINIMAL.trim().trim_start_matches('[').trim_end_matches(']'));
        assert!(ProviderTable::from_json_str(&twice).is_err());

        let bad_regex = MINIMAL.replace("^/live/.+\\\\.m3u8$", "(unclosed");
        assert!(ProviderTable::from_json_str(&bad_regex).is_err());
    }

    #[test]
    fn swap_replaces_the_whole_table() {
        let catalog = ProviderCatalog::new(ProviderTable::default());
        let before = catalog.snapshot();
        assert!(before.is_empty());

        catalog.swap(ProviderTable::from_json_str(MINIMAL).unwrap());

        // the old snapshot is untouched, new readers see the new table
        assert!(before.is_empty());
        assert_eq!(catalog.snapshot().len(), 1);
    }
}
