//! Configuration consumed by the pipeline.
//!
//! `TranslationConfig` describes how each chunk request is built and how the document is
//! chunked. It is stored as pretty-printed JSON so front-ends can edit it directly.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::request::{Role, Turn};
use crate::error::{Result, TranslateBatchError};

/// Default model used when a config file does not name one.
pub const DEFAULT_MODEL_NAME: &str = "gemini-2.5-flash";

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 5000;

const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are an expert professional translator. \
Translate the user's text into natural, idiomatic Korean, keeping the original meaning, \
tone and formatting. Output only the translated text.";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Settings for building chunk requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Model identifier without the `models/` prefix (e.g. "gemini-2.5-flash")
    pub model_name: String,

    /// System instruction attached to every chunk request
    pub system_instruction: String,

    /// Sampling temperature, 0.0..=2.0
    pub temperature: f32,

    /// Nucleus sampling, 0.0..=1.0
    pub top_p: f32,

    /// Maximum characters per chunk, 100..=100000
    pub chunk_size: usize,

    /// Thinking token budget, 0..=1024
    pub thinking_budget: u32,

    /// Priming turns prepended to every chunk's user turn
    pub prefill_cached_history: Vec<Turn>,

    /// Harm category -> block threshold
    pub safety_settings: BTreeMap<String, String>,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            temperature: 1.0,
            top_p: 0.95,
            chunk_size: DEFAULT_CHUNK_SIZE,
            thinking_budget: 128,
            prefill_cached_history: vec![
                Turn::text(
                    Role::User,
                    "(OOC: the translation should read as if it had been written in the \
                     target language from the start.)",
                ),
                Turn::text(
                    Role::Model,
                    "(Understood. I will follow the guidelines and provide only the \
                     translated result.)",
                ),
            ],
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|category| (category.to_string(), "BLOCK_NONE".to_string()))
                .collect(),
        }
    }
}

impl TranslationConfig {
    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(invalid("model_name must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid(format!(
                "temperature {} is outside 0.0..=2.0",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(invalid(format!(
                "top_p {} is outside 0.0..=1.0",
                self.top_p
            )));
        }
        if !(100..=100_000).contains(&self.chunk_size) {
            return Err(invalid(format!(
                "chunk_size {} is outside 100..=100000",
                self.chunk_size
            )));
        }
        if self.thinking_budget > 1024 {
            return Err(invalid(format!(
                "thinking_budget {} is outside 0..=1024",
                self.thinking_budget
            )));
        }
        Ok(())
    }

    /// Load the config at `path`.
    ///
    /// A missing file is created with default values. A file that cannot be read or parsed
    /// is replaced by the defaults. Failures are logged and never returned.
    pub fn load_or_create(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, creating defaults");
                return Self::saved_defaults(path);
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to read config file, using defaults");
                return Self::saved_defaults(path);
            }
        };

        match serde_json::from_str::<Self>(&contents) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Loaded config");
                config
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to parse config file, reverting to defaults");
                Self::saved_defaults(path)
            }
        }
    }

    /// Defaults, written to `path` when possible. A failed write is logged only.
    fn saved_defaults(path: &Path) -> Self {
        let config = Self::default();
        if let Err(e) = config.save(path) {
            tracing::error!(path = %path.display(), error = %e, "Failed to write default config");
        }
        config
    }

    /// Write the config to `path` as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::debug!(path = %path.display(), "Saved config");
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> TranslateBatchError {
    TranslateBatchError::ConfigInvalid(message.into())
}

/// Configuration for the job monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// How long to wait between status polls (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000, // Poll every 10 seconds by default
        }
    }
}

/// Connection settings for the hosted batch API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the API, without a trailing slash
    pub base_url: String,

    /// API key sent in the `x-goog-api-key` header
    #[serde(skip_serializing)]
    pub api_key: String,

    /// Page size used when listing batch jobs
    pub list_page_size: usize,

    /// Timeout for each individual call in milliseconds
    pub timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_key: String::new(),
            list_page_size: 50,
            timeout_ms: 300_000,
        }
    }
}
