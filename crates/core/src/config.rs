//! SmartMark configuration
//!
//! YAML configuration files plus environment overrides.
//!
//! Load order (later wins):
//! - `$HOME/.config/smartmark/config.yaml`
//! - `./.smartmark.yaml`
//! - an explicit `--config` path
//! - `SMARTMARK_*` environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::protocol::{
    DEFAULT_INTERRUPTION_TAG, DEFAULT_TERMINATOR, MIN_SEPARATOR_LEN, MarkerSet,
};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid environment value {name}={value}")]
    InvalidEnv { name: String, value: String },

    #[error("Invalid config: {message}")]
    Invalid { message: String },
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartMarkConfig {
    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub markers: MarkerConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    /// System prompt sent ahead of the transcript
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for SmartMarkConfig {
    fn default() -> Self {
        Self {
            context: ContextConfig::default(),
            markers: MarkerConfig::default(),
            llm: LlmConfig::default(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}

/// Context collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Turn pairs collected above the cursor
    #[serde(default = "default_depth")]
    pub depth: usize,
}

fn default_depth() -> usize {
    10
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            depth: default_depth(),
        }
    }
}

/// Marker literals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerConfig {
    /// Dash count of the separator the writer emits
    #[serde(default = "default_separator_repeat")]
    pub separator_repeat: usize,

    /// Hard terminator token
    #[serde(default = "default_terminator")]
    pub terminator: String,

    /// Line written before the boundary of an interrupted reply
    #[serde(default = "default_interruption_tag")]
    pub interruption_tag: String,

    /// Append a timestamp comment after each reply
    #[serde(default = "default_true")]
    pub timestamp: bool,
}

fn default_separator_repeat() -> usize {
    MIN_SEPARATOR_LEN
}

fn default_terminator() -> String {
    DEFAULT_TERMINATOR.to_string()
}

fn default_interruption_tag() -> String {
    DEFAULT_INTERRUPTION_TAG.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            separator_repeat: default_separator_repeat(),
            terminator: default_terminator(),
            interruption_tag: default_interruption_tag(),
            timestamp: true,
        }
    }
}

/// Model provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// API base URL
    pub base_url: Option<String>,

    /// API key
    pub api_key: Option<String>,

    /// Organization ID
    pub organization: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout (seconds)
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Stream replies chunk by chunk
    #[serde(default = "default_true")]
    pub stream: bool,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            organization: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout: default_timeout(),
            stream: true,
        }
    }
}

impl SmartMarkConfig {
    /// Parse a YAML document
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Check values the core depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.markers.separator_repeat < 3 {
            return Err(ConfigError::Invalid {
                message: format!(
                    "markers.separator_repeat must be at least 3, got {}",
                    self.markers.separator_repeat
                ),
            });
        }
        if self.markers.terminator.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "markers.terminator must not be empty".to_string(),
            });
        }
        if self.markers.interruption_tag.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "markers.interruption_tag must not be empty".to_string(),
            });
        }
        let markers = MarkerSet::from(&self.markers);
        if markers.classify(&self.markers.interruption_tag).is_marker() {
            return Err(ConfigError::Invalid {
                message: format!(
                    "markers.interruption_tag '{}' reads as a marker line",
                    self.markers.interruption_tag
                ),
            });
        }
        Ok(())
    }
}

/// Layered configuration loader
#[derive(Debug, Default)]
pub struct SmartMarkConfigLoader {
    config: SmartMarkConfig,
    merged: Option<serde_yaml::Value>,
    sources: Vec<PathBuf>,
}

impl SmartMarkConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default file locations, lowest priority first
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(home) = std::env::var("HOME") {
            paths.push(
                PathBuf::from(home)
                    .join(".config")
                    .join("smartmark")
                    .join("config.yaml"),
            );
        }
        paths.push(PathBuf::from(".smartmark.yaml"));
        paths
    }

    /// Load default locations, then `explicit`, then environment overrides
    pub fn load(&mut self, explicit: Option<&Path>) -> Result<&SmartMarkConfig, ConfigError> {
        for path in Self::default_paths() {
            if path.is_file() {
                self.merge_file(&path)?;
            }
        }
        if let Some(path) = explicit {
            self.merge_file(path)?;
        }
        self.rebuild()?;
        self.apply_env(|name| std::env::var(name).ok())?;
        self.config.validate()?;
        Ok(&self.config)
    }

    /// Merge one YAML file over what was loaded so far
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: serde_yaml::Value =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        match self.merged.as_mut() {
            Some(base) => merge_values(base, value),
            None => self.merged = Some(value),
        }
        self.sources.push(path.to_path_buf());
        debug!(path = %path.display(), "config file merged");
        Ok(())
    }

    fn rebuild(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = self.merged.clone() {
            let path = self.sources.last().cloned().unwrap_or_default();
            self.config = serde_yaml::from_value(value)
                .map_err(|source| ConfigError::Parse { path, source })?;
        }
        Ok(())
    }

    /// Apply `SMARTMARK_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("SMARTMARK_CONTEXT_DEPTH") {
            self.config.context.depth =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    name: "SMARTMARK_CONTEXT_DEPTH".to_string(),
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup("SMARTMARK_TERMINATOR") {
            self.config.markers.terminator = value;
        }
        if let Some(value) = lookup("SMARTMARK_MODEL") {
            self.config.llm.model = value;
        }
        if let Some(value) = lookup("SMARTMARK_BASE_URL") {
            self.config.llm.base_url = Some(value);
        }
        if let Some(value) = lookup("SMARTMARK_LLM_API_KEY") {
            self.config.llm.api_key = Some(value);
        }
        Ok(())
    }

    pub fn config(&self) -> &SmartMarkConfig {
        &self.config
    }

    pub fn into_config(self) -> SmartMarkConfig {
        self.config
    }

    /// Files that contributed to the loaded config
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }
}

/// Deep-merge YAML mappings; non-mapping values are replaced
fn merge_values(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base), serde_yaml::Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
