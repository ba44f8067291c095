//! Detector capability and the reference detectors.
//!
//! A [`Detector`] scans one page of text and returns [`Span`]s with character
//! offsets. Detectors are owned by a slot and called sequentially, so they may
//! keep mutable state (a loaded model, a tokenizer cache, ...).
//!
//! # Detectors
//!
//! | Detector | Source | Backing engine |
//! |----------|--------|----------------|
//! | [`PatternDetector`] | `pattern` | built-in regexes |
//! | [`NerDetector`] | `ner` | external [`NerEngine`] |
//! | [`LlmDetector`] | `llm` | external [`LlmClient`] |
//!
//! Detector sets are built per slot by a [`DetectorFactory`];
//! [`StandardDetectorFactory`] composes the three detectors above.

pub mod llm;
pub mod ner;
pub mod pattern;

pub use llm::{LlmClient, LlmDetector, LLM_SOURCE};
pub use ner::{NerDetector, NerEngine, NerEntity, NerModelLoader, NER_SOURCE};
pub use pattern::{PatternDetector, PATTERN_SOURCE};

use crate::assign::SlotId;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::span::Span;
use std::sync::Arc;

/// A PII detection capability.
pub trait Detector: Send {
    /// Source name recorded on every span this detector produces.
    fn name(&self) -> &str;

    /// Scan `text` (already truncated by the scheduler) written in `language`.
    fn detect(&mut self, text: &str, language: &str) -> Result<Vec<Span>>;
}

/// The detectors bound to one slot.
pub type DetectorSet = Vec<Box<dyn Detector>>;

/// Builds the detector context of a slot.
///
/// Called at most once per slot and run, from the slot's worker thread, the
/// first time a page is routed to the slot. An error marks the slot as failed
/// for the whole run.
pub trait DetectorFactory: Sync {
    /// Create the detectors for `slot`, configured for `language`.
    fn create(&self, slot: &SlotId, language: &str) -> Result<DetectorSet>;
}

impl<F> DetectorFactory for F
where
    F: Fn(&SlotId, &str) -> Result<DetectorSet> + Sync,
{
    fn create(&self, slot: &SlotId, language: &str) -> Result<DetectorSet> {
        self(slot, language)
    }
}

/// Factory for the pattern / NER / LLM detector stack.
///
/// The NER model for a slot is chosen from
/// [`PipelineConfig::language_models`] by the routed language.
pub struct StandardDetectorFactory {
    config: PipelineConfig,
    pattern: bool,
    ner_loader: Option<Arc<dyn NerModelLoader>>,
    llm_client: Option<Arc<dyn LlmClient>>,
    llm_prompt: Option<String>,
}

impl StandardDetectorFactory {
    /// Factory producing only the pattern detector.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            pattern: true,
            ner_loader: None,
            llm_client: None,
            llm_prompt: None,
        }
    }

    /// Enable or disable the pattern detector.
    pub fn with_pattern(mut self, enabled: bool) -> Self {
        self.pattern = enabled;
        self
    }

    /// Add NER detection using models loaded by `loader`.
    pub fn with_ner(mut self, loader: Arc<dyn NerModelLoader>) -> Self {
        self.ner_loader = Some(loader);
        self
    }

    /// Add LLM extraction through `client`.
    pub fn with_llm(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm_client = Some(client);
        self
    }

    /// Replace the LLM system prompt.
    pub fn with_llm_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.llm_prompt = Some(prompt.into());
        self
    }
}

impl DetectorFactory for StandardDetectorFactory {
    fn create(&self, slot: &SlotId, language: &str) -> Result<DetectorSet> {
        let mut detectors: DetectorSet = Vec::new();

        if self.pattern {
            detectors.push(Box::new(PatternDetector::new()));
        }

        if let Some(loader) = &self.ner_loader {
            let model = self.config.model_for(language).ok_or_else(|| {
                Error::Configuration(format!("no language model configured for '{}'", language))
            })?;
            detectors.push(Box::new(NerDetector::load(loader.as_ref(), model, slot)?));
        }

        if let Some(client) = &self.llm_client {
            let mut detector = LlmDetector::new(Arc::clone(client));
            if let Some(prompt) = &self.llm_prompt {
                detector = detector.with_system_prompt(prompt.clone());
            }
            detectors.push(Box::new(detector));
        }

        if detectors.is_empty() {
            log::warn!("{} has no detectors enabled", slot);
        }
        Ok(detectors)
    }
}
