//! Per-chunk request records.
//!
//! Each chunk becomes one self-contained request: the shared priming turns, followed by the
//! chunk text as the user turn, plus model and sampling settings. The record key encodes the
//! chunk index so responses can be put back in order no matter how the service returns them.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::chunk::Chunk;
use crate::config::TranslationConfig;
use crate::error::{Result, TranslateBatchError};

const KEY_PREFIX: &str = "chunk_";

/// Build the request key for a chunk index.
pub fn make_key(index: usize) -> String {
    format!("{KEY_PREFIX}{index}")
}

/// Recover the chunk index from a request key.
///
/// Accepts any key whose text after the last `_` is a positive integer, so keys produced by
/// [`make_key`] always round-trip. Returns `None` for anything else.
pub fn parse_index(key: &str) -> Option<usize> {
    let (_, suffix) = key.rsplit_once('_')?;
    match suffix.parse::<usize>() {
        Ok(index) if index > 0 => Some(index),
        _ => None,
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One text part of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

/// A role-tagged conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    /// A turn with a single text part.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part { text: text.into() }],
        }
    }
}

/// Sampling parameters attached to every request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub thinking_budget: u32,
}

/// A fully built request for one chunk.
///
/// Immutable once built; every record owns its own copy of the priming turns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestRecord {
    /// `chunk_<index>`
    pub key: String,
    /// Model identifier without the `models/` prefix
    pub model: String,
    /// Priming turns followed by the chunk's user turn
    pub contents: Vec<Turn>,
    pub system_instruction: String,
    pub generation_config: GenerationConfig,
    /// Harm category -> block threshold
    pub safety_thresholds: BTreeMap<String, String>,
}

impl RequestRecord {
    /// The chunk index encoded in this record's key.
    pub fn chunk_index(&self) -> Option<usize> {
        parse_index(&self.key)
    }

    /// Serialize as one line of the batch input file.
    pub fn to_jsonl_line(&self) -> Result<String> {
        let line = WireRequestLine {
            key: &self.key,
            request: WireRequest {
                model: qualified_model(&self.model),
                contents: &self.contents,
                system_instruction: WireContent {
                    parts: vec![WirePart {
                        text: &self.system_instruction,
                    }],
                },
                generation_config: WireGenerationConfig {
                    temperature: self.generation_config.temperature,
                    top_p: self.generation_config.top_p,
                    thinking_config: WireThinkingConfig {
                        thinking_budget: self.generation_config.thinking_budget,
                    },
                },
                safety_settings: self
                    .safety_thresholds
                    .iter()
                    .map(|(category, threshold)| WireSafetySetting {
                        category,
                        threshold,
                    })
                    .collect(),
            },
        };
        Ok(serde_json::to_string(&line)?)
    }
}

/// Serialize records as a JSONL batch input payload, one record per line.
pub fn records_to_jsonl(records: &[RequestRecord]) -> Result<String> {
    let mut payload = String::new();
    for record in records {
        payload.push_str(&record.to_jsonl_line()?);
        payload.push('\n');
    }
    Ok(payload)
}

/// Prefix a bare model id with `models/`.
pub fn qualified_model(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

#[derive(Serialize)]
struct WireRequestLine<'a> {
    key: &'a str,
    request: WireRequest<'a>,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: String,
    contents: &'a [Turn],
    system_instruction: WireContent<'a>,
    generation_config: WireGenerationConfig,
    safety_settings: Vec<WireSafetySetting<'a>>,
}

#[derive(Serialize)]
struct WireContent<'a> {
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
struct WirePart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct WireGenerationConfig {
    temperature: f32,
    top_p: f32,
    #[serde(rename = "thinkingConfig")]
    thinking_config: WireThinkingConfig,
}

#[derive(Serialize)]
struct WireThinkingConfig {
    thinking_budget: u32,
}

#[derive(Serialize)]
struct WireSafetySetting<'a> {
    category: &'a str,
    threshold: &'a str,
}

/// Builds request records from chunks using one configuration bundle.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    model_id: String,
    system_instruction: String,
    priming_turns: Vec<Turn>,
    generation_config: GenerationConfig,
    safety_thresholds: BTreeMap<String, String>,
}

impl RequestBuilder {
    pub fn new(
        model_id: impl Into<String>,
        system_instruction: impl Into<String>,
        priming_turns: Vec<Turn>,
        generation_config: GenerationConfig,
        safety_thresholds: BTreeMap<String, String>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            system_instruction: system_instruction.into(),
            priming_turns,
            generation_config,
            safety_thresholds,
        }
    }

    pub fn from_config(config: &TranslationConfig) -> Self {
        Self::new(
            config.model_name.clone(),
            config.system_instruction.clone(),
            config.prefill_cached_history.clone(),
            GenerationConfig {
                temperature: config.temperature,
                top_p: config.top_p,
                thinking_budget: config.thinking_budget,
            },
            config.safety_settings.clone(),
        )
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Build the request for one chunk.
    pub fn build(&self, chunk: &Chunk) -> Result<RequestRecord> {
        if self.model_id.trim().is_empty() {
            return Err(TranslateBatchError::ConfigInvalid(
                "model id must not be empty".to_string(),
            ));
        }
        if chunk.index == 0 {
            return Err(TranslateBatchError::ConfigInvalid(
                "chunk indices start at 1".to_string(),
            ));
        }
        if chunk.text.is_empty() {
            return Err(TranslateBatchError::ConfigInvalid(format!(
                "chunk {} has no text",
                chunk.index
            )));
        }

        let mut contents = Vec::with_capacity(self.priming_turns.len() + 1);
        contents.extend(self.priming_turns.iter().cloned());
        contents.push(Turn::text(Role::User, chunk.text.clone()));

        Ok(RequestRecord {
            key: make_key(chunk.index),
            model: self.model_id.clone(),
            contents,
            system_instruction: self.system_instruction.clone(),
            generation_config: self.generation_config,
            safety_thresholds: self.safety_thresholds.clone(),
        })
    }

    /// Build requests for a sequence of chunks, rejecting duplicate keys.
    pub fn build_all<I>(&self, chunks: I) -> Result<Vec<RequestRecord>>
    where
        I: IntoIterator<Item = Chunk>,
    {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for chunk in chunks {
            let record = self.build(&chunk)?;
            if !seen.insert(record.key.clone()) {
                return Err(TranslateBatchError::ConfigInvalid(format!(
                    "duplicate request key '{}'",
                    record.key
                )));
            }
            records.push(record);
        }
        tracing::debug!(count = records.len(), model = %self.model_id, "Built chunk requests");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chunk::chunk_text;

    fn builder() -> RequestBuilder {
        RequestBuilder::new(
            "gemini-test",
            "Translate to Korean.",
            vec![
                Turn::text(Role::User, "prime"),
                Turn::text(Role::Model, "ok"),
            ],
            GenerationConfig {
                temperature: 1.2,
                top_p: 0.9,
                thinking_budget: 64,
            },
            BTreeMap::from([(
                "HARM_CATEGORY_HARASSMENT".to_string(),
                "BLOCK_NONE".to_string(),
            )]),
        )
    }

    #[test]
    fn test_key_round_trip() {
        for i in 1..=1000 {
            assert_eq!(parse_index(&make_key(i)), Some(i));
        }
    }

    #[test]
    fn test_parse_index_rejects_bad_keys() {
        assert_eq!(parse_index("chunk"), None);
        assert_eq!(parse_index("chunk_"), None);
        assert_eq!(parse_index("chunk_abc"), None);
        assert_eq!(parse_index("chunk_0"), None);
        assert_eq!(parse_index("chunk_-3"), None);
        assert_eq!(parse_index("custom_prefix_12"), Some(12));
    }

    #[test]
    fn test_contents_are_priming_turns_then_chunk() {
        let record = builder()
            .build(&Chunk {
                index: 3,
                text: "Hello".to_string(),
            })
            .unwrap();

        assert_eq!(record.key, "chunk_3");
        assert_eq!(record.chunk_index(), Some(3));
        assert_eq!(record.contents.len(), 3);
        assert_eq!(record.contents[0], Turn::text(Role::User, "prime"));
        assert_eq!(record.contents[1], Turn::text(Role::Model, "ok"));
        assert_eq!(record.contents[2], Turn::text(Role::User, "Hello"));
    }

    #[test]
    fn test_records_do_not_share_contents() {
        let builder = builder();
        let records = builder
            .build_all(chunk_text("aaaabbbb", 4).unwrap())
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].contents.len(), 3);
        assert_eq!(records[1].contents.len(), 3);
        assert_eq!(records[0].contents[2].parts[0].text, "aaaa");
        assert_eq!(records[1].contents[2].parts[0].text, "bbbb");
        // Building again produces identical records: nothing accumulated in the builder
        assert_eq!(builder.build_all(chunk_text("aaaabbbb", 4).unwrap()).unwrap(), records);
    }

    #[test]
    fn test_empty_model_or_text_is_rejected() {
        let chunk = Chunk {
            index: 1,
            text: "text".to_string(),
        };
        let no_model = RequestBuilder::new(
            "",
            "",
            vec![],
            GenerationConfig {
                temperature: 1.0,
                top_p: 1.0,
                thinking_budget: 0,
            },
            BTreeMap::new(),
        );
        assert!(matches!(
            no_model.build(&chunk),
            Err(TranslateBatchError::ConfigInvalid(_))
        ));

        let empty_chunk = Chunk {
            index: 1,
            text: String::new(),
        };
        assert!(matches!(
            builder().build(&empty_chunk),
            Err(TranslateBatchError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_zero_index_is_rejected() {
        let chunk = Chunk {
            index: 0,
            text: "text".to_string(),
        };
        assert!(matches!(
            builder().build(&chunk),
            Err(TranslateBatchError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_duplicate_keys_are_rejected() {
        let chunks = vec![
            Chunk {
                index: 1,
                text: "a".to_string(),
            },
            Chunk {
                index: 1,
                text: "b".to_string(),
            },
        ];
        assert!(matches!(
            builder().build_all(chunks),
            Err(TranslateBatchError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_jsonl_line_shape() {
        let record = builder()
            .build(&Chunk {
                index: 7,
                text: "번역할 문장".to_string(),
            })
            .unwrap();
        let line = record.to_jsonl_line().unwrap();
        assert!(!line.contains('\n'));

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["key"], "chunk_7");
        assert_eq!(value["request"]["model"], "models/gemini-test");
        assert_eq!(value["request"]["contents"][2]["role"], "user");
        assert_eq!(value["request"]["contents"][2]["parts"][0]["text"], "번역할 문장");
        assert_eq!(
            value["request"]["system_instruction"]["parts"][0]["text"],
            "Translate to Korean."
        );
        assert_eq!(
            value["request"]["generation_config"]["thinkingConfig"]["thinking_budget"],
            64
        );
        assert_eq!(
            value["request"]["safety_settings"][0]["category"],
            "HARM_CATEGORY_HARASSMENT"
        );
        assert_eq!(value["request"]["safety_settings"][0]["threshold"], "BLOCK_NONE");
    }

    #[test]
    fn test_qualified_model_is_idempotent() {
        assert_eq!(qualified_model("gemini"), "models/gemini");
        assert_eq!(qualified_model("models/gemini"), "models/gemini");
    }
}
