//! Pipeline configuration.
//!
//! All options have defaults, so a configuration file only needs to list the
//! values it changes:
//!
//! ```
//! use pii_oxide::config::{MergeStrategy, PipelineConfig};
//!
//! let config = PipelineConfig::from_json_str(r#"{ "slot_count": 3, "merge_strategy": "overlap" }"#)
//!     .unwrap();
//! assert_eq!(config.slot_count, 3);
//! assert_eq!(config.merge_strategy, MergeStrategy::Overlap);
//! assert_eq!(config.default_language, "en");
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Compute resource a slot is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// CPU worker
    #[default]
    Cpu,
    /// GPU device
    Gpu,
}

/// How the merger collapses spans from different detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Collapse only spans with identical `(start, end)` boundaries.
    #[default]
    Exact,
    /// Collapse every cluster of (transitively) overlapping spans into its
    /// best-scoring member.
    Overlap,
}

/// What the runner does when no page has enough text to identify the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsufficientTextPolicy {
    /// Continue with `default_language` and log a warning.
    #[default]
    UseDefault,
    /// Fail the run with [`Error::InsufficientText`].
    Abort,
}

/// Configuration for [`PipelineRunner`](crate::runner::PipelineRunner).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Languages with a detector configuration. Anything else routes to
    /// `default_language`.
    pub supported_languages: Vec<String>,

    /// Fallback language (must be supported).
    pub default_language: String,

    /// NER model name per supported language.
    pub language_models: BTreeMap<String, String>,

    /// Number of detector slots (workers). Must be >= 1.
    pub slot_count: usize,

    /// Resource kind the slots are pinned to.
    pub resource: ResourceKind,

    /// Page text beyond this many characters is not scanned.
    pub max_page_chars: usize,

    /// Detector sources in tie-break order, highest priority first.
    pub detector_priority: Vec<String>,

    /// A page is a language sample only if its trimmed text is longer than this.
    pub min_language_sample_chars: usize,

    /// Span fusion strategy.
    pub merge_strategy: MergeStrategy,

    /// Spans scoring below this are dropped before fusion.
    pub min_score: f32,

    /// Behavior when no language sample page exists.
    pub insufficient_text: InsufficientTextPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        let language_models = [
            ("en", "en_core_web_lg"),
            ("bg", "bg_news_trf"),
            ("ru", "ru_core_news_lg"),
        ]
        .into_iter()
        .map(|(lang, model)| (lang.to_string(), model.to_string()))
        .collect();

        Self {
            supported_languages: vec!["en".to_string(), "bg".to_string(), "ru".to_string()],
            default_language: "en".to_string(),
            language_models,
            slot_count: 1,
            resource: ResourceKind::Cpu,
            max_page_chars: 50_000,
            detector_priority: vec!["pattern".to_string(), "ner".to_string(), "llm".to_string()],
            min_language_sample_chars: 50,
            merge_strategy: MergeStrategy::Exact,
            min_score: 0.0,
            insufficient_text: InsufficientTextPolicy::UseDefault,
        }
    }

    /// Parse a JSON configuration. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loaded configuration from {}", path.as_ref().display());
        Self::from_json_str(&contents)
    }

    /// Set the number of slots.
    pub fn with_slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self
    }

    /// Set the resource kind slots are pinned to.
    pub fn with_resource(mut self, resource: ResourceKind) -> Self {
        self.resource = resource;
        self
    }

    /// Set the per-page truncation cap.
    pub fn with_max_page_chars(mut self, max_page_chars: usize) -> Self {
        self.max_page_chars = max_page_chars;
        self
    }

    /// Set the detector tie-break order.
    pub fn with_detector_priority<I, S>(mut self, priority: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.detector_priority = priority.into_iter().map(Into::into).collect();
        self
    }

    /// Set the merge strategy.
    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = strategy;
        self
    }

    /// Set the minimum span score kept by the merger.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Set the language sample threshold.
    pub fn with_min_language_sample_chars(mut self, chars: usize) -> Self {
        self.min_language_sample_chars = chars;
        self
    }

    /// Set the insufficient-text policy.
    pub fn with_insufficient_text(mut self, policy: InsufficientTextPolicy) -> Self {
        self.insufficient_text = policy;
        self
    }

    /// Add a supported language together with its NER model.
    pub fn with_language(mut self, language: impl Into<String>, model: impl Into<String>) -> Self {
        let language = language.into();
        if !self.supported_languages.contains(&language) {
            self.supported_languages.push(language.clone());
        }
        self.language_models.insert(language, model.into());
        self
    }

    /// Whether `language` has a detector configuration.
    pub fn supports(&self, language: &str) -> bool {
        self.supported_languages.iter().any(|l| l == language)
    }

    /// NER model configured for `language`.
    pub fn model_for(&self, language: &str) -> Option<&str> {
        self.language_models.get(language).map(String::as_str)
    }

    /// Check the configuration before a run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if:
    /// - `slot_count` is zero
    /// - no language is supported, or `default_language` is not supported
    /// - a supported language has no NER model entry
    /// - `max_page_chars` is zero or `min_score` is outside `[0, 1]`
    pub fn validate(&self) -> Result<()> {
        if self.slot_count == 0 {
            return Err(Error::Configuration("slot_count must be >= 1".to_string()));
        }
        if self.supported_languages.is_empty() {
            return Err(Error::Configuration("supported_languages is empty".to_string()));
        }
        if !self.supports(&self.default_language) {
            return Err(Error::Configuration(format!(
                "default_language '{}' is not in supported_languages",
                self.default_language
            )));
        }
        if let Some(missing) = self
            .supported_languages
            .iter()
            .find(|lang| !self.language_models.contains_key(*lang))
        {
            return Err(Error::Configuration(format!(
                "no language model configured for '{}'",
                missing
            )));
        }
        if self.max_page_chars == 0 {
            return Err(Error::Configuration("max_page_chars must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(Error::Configuration(format!(
                "min_score {} is outside [0, 1]",
                self.min_score
            )));
        }
        Ok(())
    }
}
