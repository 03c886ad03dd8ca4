use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::server::{
    services::relay_services::FetchMethod,
    utils::{decoders::Strategy, pow_utils::Difficulty},
};

/// these all come from the provider table json, one entry per upstream host family. Nothing in
/// here is mutated once the table is loaded

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: String,
    /// hosts in priority order
    pub mirrors: Vec<String>,
    #[serde(default = "default_max_mirrors")]
    pub max_mirrors: usize,
    pub chain: FetchChain,
    pub payload: PayloadLocator,
    pub decode: Strategy,
    pub allow_pattern: Pattern,
    #[serde(default)]
    pub honeypot_tokens: Vec<String>,
    #[serde(default)]
    pub relay_required: bool,
    #[serde(default)]
    pub auth: Option<AuthPolicy>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub fallback_providers: Vec<String>,
}

fn default_max_mirrors() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchChain {
    pub embed: FetchStep,
    #[serde(default)]
    pub redirect: Option<FetchStep>,
    pub player: FetchStep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchStep {
    #[serde(default)]
    pub method: FetchMethod,
    #[serde(flatten)]
    pub target: StepTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepTarget {
    /// placeholders: {mirror} {content} {locale} {previous}
    Template { url: String },
    /// regex with a named `url` group, run over the previous page
    Follow { pattern: Pattern },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadLocator {
    #[serde(flatten)]
    pub source: PayloadSource,
    /// regex with a named `token` group, captures the session token for key requests
    #[serde(default)]
    pub token_pattern: Option<Pattern>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadSource {
    /// hidden marker element, payload is its text or `attribute`
    Element {
        selector: String,
        #[serde(default)]
        attribute: Option<String>,
        /// strategy parameter name -> attribute name on the same element
        #[serde(default)]
        params: BTreeMap<String, String>,
    },
    /// script element carrying a packed eval call
    Packed { selector: String },
    /// inline script assigning the payload to a variable, e.g. `window['k']='...'`. `pattern`
    /// must have a named `payload` group, the script itself is only matched
    ScriptAssignment { selector: String, pattern: Pattern },
}

impl PayloadSource {
    pub fn selector(&self) -> &str {
        match self {
            PayloadSource::Element { selector, .. }
            | PayloadSource::Packed { selector }
            | PayloadSource::ScriptAssignment { selector, .. } => selector,
        }
    }
}

/// key gate policy. skew and difficulty are observed values that drift, keep them in the table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPolicy {
    pub skew_secs: i64,
    pub min_skew_secs: i64,
    pub max_skew_secs: i64,
    pub difficulty: Difficulty,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u64,
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
}

fn default_max_attempts() -> u64 {
    5_000_000
}

fn default_max_duration_ms() -> u64 {
    5_000
}

/// compiled regex that (de)serializes as its source string
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Self)
    }

    pub fn regex(&self) -> &Regex {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.0.capture_names().flatten().any(|n| n == name)
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Pattern::new(&source).map_err(serde::de::Error::custom)
    }
}
