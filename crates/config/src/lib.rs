//! Configuration loading and validation for the Engram engine.
//!
//! Loads configuration from a TOML file (path from the `ENGRAM_CONFIG`
//! environment variable when not given explicitly) with serde defaults for
//! every field, and validates all settings before the engine is built.
//! Token weights are configuration, not code: operators own the trade-off
//! between memory recall, external information, and chat history.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Environment variable naming the config file path.
pub const CONFIG_PATH_ENV: &str = "ENGRAM_CONFIG";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// How a memory kind's relevance threshold responds to the session's
/// memory balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceBias {
    /// Threshold relaxes as the balance moves toward long-term recall.
    Persistence,
    /// Threshold tightens as the balance moves toward long-term recall.
    Recency,
    /// Threshold is a fixed minimum, independent of the balance.
    Fixed { min: f64 },
}

/// One entry of the ordered memory map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryKindConfig {
    /// Storage tag for the kind (e.g. "long-term", "working")
    pub name: String,

    /// Threshold behavior for this kind
    pub bias: BalanceBias,
}

impl MemoryKindConfig {
    /// The domain memory kind this entry describes.
    pub fn kind(&self) -> engram_core::MemoryKind {
        engram_core::MemoryKind::parse(&self.name)
    }
}

/// Post-turn memory extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Maximum tokens the extraction completion may generate
    #[serde(default = "default_extraction_response_tokens")]
    pub response_token_limit: usize,
}

fn default_extraction_response_tokens() -> usize {
    512
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            response_token_limit: default_extraction_response_tokens(),
        }
    }
}

/// The root engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Display name of the assistant
    #[serde(default = "default_bot_name")]
    pub bot_name: String,

    /// Whether callers are authenticated. When false every turn runs as the
    /// anonymous default user and audience extraction is skipped entirely.
    #[serde(default)]
    pub authentication_enabled: bool,

    /// Total token window of the completion model
    #[serde(default = "default_completion_token_limit")]
    pub completion_token_limit: usize,

    /// Tokens reserved for the model's response
    #[serde(default = "default_response_reservation")]
    pub response_token_reservation: usize,

    /// Tokens reserved for provider-side tool calls
    #[serde(default = "default_tool_call_reservation")]
    pub tool_call_token_reservation: usize,

    /// Fixed overhead of request framing the provider adds around the prompt
    #[serde(default = "default_framing_overhead")]
    pub framing_token_overhead: usize,

    /// Fraction of the remaining budget given to memory retrieval
    #[serde(default = "default_memories_weight")]
    pub memories_weight: f64,

    /// Fraction of the remaining budget given to planner/tool output
    #[serde(default = "default_external_info_weight")]
    pub external_info_weight: f64,

    /// Lower bound of the relevance interpolation
    #[serde(default = "default_relevance_lower")]
    pub relevance_lower_bound: f64,

    /// Upper bound of the relevance interpolation; also the near-duplicate
    /// threshold used by extraction dedup
    #[serde(default = "default_relevance_upper")]
    pub relevance_upper_bound: f64,

    /// Fixed minimum relevance for document memories
    #[serde(default = "default_document_min_relevance")]
    pub document_min_relevance: f64,

    /// Name of the memory index all chat memories live in
    #[serde(default = "default_memory_index")]
    pub memory_index: String,

    /// Ordered memory map; declaration order is formatting order
    #[serde(default = "default_memory_map")]
    pub memory_map: Vec<MemoryKindConfig>,

    /// Token cap for the bounded audience/intent helper completions
    #[serde(default = "default_helper_token_limit")]
    pub helper_token_limit: usize,

    /// How many prior messages to fetch when filling chat history
    #[serde(default = "default_history_fetch_count")]
    pub history_fetch_count: usize,

    /// Post-turn extraction settings
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Optional wall-clock limit for a whole turn, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_timeout_secs: Option<u64>,

    /// System persona template; `{{bot_name}}` and `{{system_description}}`
    /// are substituted per turn
    #[serde(default = "default_persona_template")]
    pub persona_template: String,

    /// Audience extraction prompt template (`{{history}}`)
    #[serde(default = "default_audience_prompt")]
    pub audience_prompt: String,

    /// Intent extraction prompt template (`{{history}}`, `{{message}}`)
    #[serde(default = "default_intent_prompt")]
    pub intent_prompt: String,

    /// Memory extraction prompt template (`{{kind}}`, `{{exchange}}`)
    #[serde(default = "default_extraction_prompt")]
    pub extraction_prompt: String,
}

fn default_bot_name() -> String {
    "Engram".into()
}
fn default_completion_token_limit() -> usize {
    4096
}
fn default_response_reservation() -> usize {
    1024
}
fn default_tool_call_reservation() -> usize {
    512
}
fn default_framing_overhead() -> usize {
    16
}
fn default_memories_weight() -> f64 {
    0.5
}
fn default_external_info_weight() -> f64 {
    0.3
}
fn default_relevance_lower() -> f64 {
    0.6
}
fn default_relevance_upper() -> f64 {
    0.9
}
fn default_document_min_relevance() -> f64 {
    0.8
}
fn default_memory_index() -> String {
    "chat-memory".into()
}
fn default_memory_map() -> Vec<MemoryKindConfig> {
    vec![
        MemoryKindConfig {
            name: "long-term".into(),
            bias: BalanceBias::Persistence,
        },
        MemoryKindConfig {
            name: "working".into(),
            bias: BalanceBias::Recency,
        },
    ]
}
fn default_helper_token_limit() -> usize {
    512
}
fn default_history_fetch_count() -> usize {
    100
}
fn default_persona_template() -> String {
    "You are {{bot_name}}. {{system_description}}\n\
     Answer using the context provided in this conversation. When you quote \
     a shared document, cite its link in square brackets at the end of the \
     sentence."
        .into()
}
fn default_audience_prompt() -> String {
    "List the names of everyone who has spoken in the conversation below, \
     separated by commas. Output only the list.\n\n{{history}}"
        .into()
}
fn default_intent_prompt() -> String {
    "Rewrite the user's latest message as a single self-contained sentence \
     describing their goal, using the conversation for context.\n\n\
     {{history}}\nLatest message: {{message}}\nGoal:"
        .into()
}
fn default_extraction_prompt() -> String {
    "Review the exchange below and extract {{kind}} memories worth keeping \
     for future conversations. Respond with JSON of the form \
     {\"items\": [{\"text\": \"...\"}]} and nothing else.\n\n{{exchange}}"
        .into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        // Round-trips through serde so defaults live in exactly one place.
        toml::from_str("").expect("empty config must deserialize via defaults")
    }
}

impl EngineConfig {
    /// Parse a TOML string and validate the result.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load from the path in `ENGRAM_CONFIG`, or fall back to defaults when
    /// the variable is unset.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load(path),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Validate settings. Weights summing over 1 are the operator's
    /// responsibility and only produce a warning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |name: &str, v: f64| -> Result<(), ConfigError> {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [0, 1], got {v}"
                )));
            }
            Ok(())
        };

        unit("relevance_lower_bound", self.relevance_lower_bound)?;
        unit("relevance_upper_bound", self.relevance_upper_bound)?;
        unit("document_min_relevance", self.document_min_relevance)?;
        unit("memories_weight", self.memories_weight)?;
        unit("external_info_weight", self.external_info_weight)?;

        if self.relevance_lower_bound > self.relevance_upper_bound {
            return Err(ConfigError::Invalid(format!(
                "relevance_lower_bound ({}) exceeds relevance_upper_bound ({})",
                self.relevance_lower_bound, self.relevance_upper_bound
            )));
        }

        let reserved = self.response_token_reservation
            + self.tool_call_token_reservation
            + self.framing_token_overhead;
        if self.completion_token_limit <= reserved {
            return Err(ConfigError::Invalid(format!(
                "completion_token_limit ({}) must exceed reservations plus framing overhead ({reserved})",
                self.completion_token_limit
            )));
        }

        for kind in &self.memory_map {
            if kind.name.trim().is_empty() {
                return Err(ConfigError::Invalid("memory map entry with empty name".into()));
            }
            if let BalanceBias::Fixed { min } = kind.bias {
                unit(&format!("memory map '{}' fixed minimum", kind.name), min)?;
            }
        }

        if self.memories_weight + self.external_info_weight > 1.0 {
            warn!(
                memories_weight = self.memories_weight,
                external_info_weight = self.external_info_weight,
                "Configured stage weights sum over 1.0; later stages may be starved"
            );
        }

        Ok(())
    }

    /// The persona variables every turn starts from.
    pub fn base_persona_vars(&self, system_description: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("bot_name".to_string(), self.bot_name.clone()),
            (
                "system_description".to_string(),
                system_description.to_string(),
            ),
        ])
    }
}
