//! Analyst configuration, stored as TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::graph::TraversalLimits;
use crate::llm::OllamaConfig;

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalystConfig {
    /// Directory for the durable state store. Memory-only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub planner: PlannerSettings,
    #[serde(default)]
    pub answer: AnswerSettings,
    #[serde(default)]
    pub formatter: FormatterSettings,
    #[serde(default)]
    pub traversal: TraversalLimits,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub sparql: SparqlSettings,
}

/// Reasoning service connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Bound on every reasoning-service call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "llama3.2".into()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmSettings {
    pub fn to_ollama(&self) -> OllamaConfig {
        OllamaConfig {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerSettings {
    /// Row cap of the fallback "return everything" step.
    #[serde(default = "default_fallback_limit")]
    pub fallback_limit: usize,
    #[serde(default = "default_planner_prompt")]
    pub system_prompt: String,
}

fn default_fallback_limit() -> usize {
    50
}

fn default_planner_prompt() -> String {
    "You are an expert database query planner. Always return valid JSON in the exact format requested."
        .into()
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            fallback_limit: default_fallback_limit(),
            system_prompt: default_planner_prompt(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSettings {
    #[serde(default = "default_answer_prompt")]
    pub system_prompt: String,
}

fn default_answer_prompt() -> String {
    "You are an expert at analyzing graph data and providing comprehensive answers.".into()
}

impl Default for AnswerSettings {
    fn default() -> Self {
        Self {
            system_prompt: default_answer_prompt(),
        }
    }
}

/// Caps on how much of each step result the context digest shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatterSettings {
    pub max_names: usize,
    pub max_paths: usize,
    pub max_items: usize,
    pub max_blob_chars: usize,
}

impl Default for FormatterSettings {
    fn default() -> Self {
        Self {
            max_names: 10,
            max_paths: 20,
            max_items: 10,
            max_blob_chars: 200,
        }
    }
}

/// Micro-batch sizing and grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Estimated-token ceiling a single batch prompt must stay under.
    pub token_ceiling: usize,
    /// Tokens estimated per whitespace-separated word.
    pub tokens_per_word: f64,
    /// Batch sizes probed, in increasing order.
    pub candidate_sizes: Vec<usize>,
    /// Field `count` and `aggregate` group by.
    pub group_field: String,
    /// Field `classify` writes.
    pub category_field: String,
}

impl BatchSettings {
    /// Candidate batch sizes in increasing order, duplicates removed.
    pub fn sorted_candidates(&self) -> Vec<usize> {
        let mut sizes = self.candidate_sizes.clone();
        sizes.sort_unstable();
        sizes.dedup();
        sizes
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            token_ceiling: 3000,
            tokens_per_word: 1.3,
            candidate_sizes: vec![5, 10, 20, 50],
            group_field: crate::graph::KIND_KEY.into(),
            category_field: "category".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparqlSettings {
    /// Namespace the managed backend is scoped to.
    pub namespace: String,
    /// Directory of a persistent oxigraph store. In-memory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

impl Default for SparqlSettings {
    fn default() -> Self {
        Self {
            namespace: "default".into(),
            store_path: None,
        }
    }
}

impl AnalystConfig {
    /// Load from a TOML file and validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.into(),
            })
        };
        if self.batch.token_ceiling == 0 {
            return invalid("batch.token_ceiling must be greater than zero");
        }
        if self.batch.tokens_per_word.is_nan() || self.batch.tokens_per_word <= 0.0 {
            return invalid("batch.tokens_per_word must be positive");
        }
        if self.batch.candidate_sizes.is_empty() || self.batch.candidate_sizes.contains(&0) {
            return invalid("batch.candidate_sizes must be a non-empty list of positive sizes");
        }
        if self.batch.group_field.is_empty() || self.batch.category_field.is_empty() {
            return invalid("batch.group_field and batch.category_field must be set");
        }
        if self.planner.fallback_limit == 0 {
            return invalid("planner.fallback_limit must be greater than zero");
        }
        if self.sparql.namespace.is_empty() {
            return invalid("sparql.namespace must not be empty");
        }
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: AnalystConfig = toml::from_str("").unwrap();
        assert_eq!(config, AnalystConfig::default());
        assert_eq!(config.batch.candidate_sizes, vec![5, 10, 20, 50]);
        assert_eq!(config.formatter.max_paths, 20);
        assert_eq!(config.traversal.max_path_edges, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: AnalystConfig = toml::from_str(
            r#"
            [llm]
            model = "qwen2.5"

            [batch]
            token_ceiling = 1500
            "#,
        )
        .unwrap();
        assert_eq!(config.llm.model, "qwen2.5");
        assert_eq!(config.llm.base_url, "http://localhost:11434");
        assert_eq!(config.batch.token_ceiling, 1500);
        assert_eq!(config.batch.group_field, "entity_type");
    }

    #[test]
    fn save_load_preserves_settings() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("analyst.toml");
        let mut config = AnalystConfig::default();
        config.sparql.namespace = "papers".into();
        config.state_dir = Some(dir.path().join("state"));
        config.save(&path).unwrap();

        let loaded = AnalystConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn validate_rejects_unusable_batch_settings() {
        let mut config = AnalystConfig::default();
        config.batch.candidate_sizes.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = AnalystConfig::default();
        config.batch.tokens_per_word = 0.0;
        assert!(config.validate().is_err());

        let mut config = AnalystConfig::default();
        config.batch.token_ceiling = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[batch\n").unwrap();
        let err = AnalystConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path: p, .. } if p.ends_with("bad.toml")));
    }

    #[test]
    fn sorted_candidates_dedups() {
        let settings = BatchSettings {
            candidate_sizes: vec![20, 5, 20, 10],
            ..BatchSettings::default()
        };
        assert_eq!(settings.sorted_candidates(), vec![5, 10, 20]);
    }
}
