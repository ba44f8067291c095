//! Statistical named-entity recognition adapter.
//!
//! The NER engine itself (a transformer pipeline, typically) is an external
//! collaborator behind [`NerEngine`]. This adapter keeps the entity classes
//! that carry PII, normalizes their labels and assigns the engine-independent
//! score the fusion step expects.

use super::Detector;
use crate::assign::SlotId;
use crate::error::{Error, Result};
use crate::span::{EntityType, Span};

/// Source name of spans produced by [`NerDetector`].
pub const NER_SOURCE: &str = "ner";

/// Score assigned to entities whose engine reports no confidence.
pub const DEFAULT_NER_SCORE: f32 = 0.85;

/// An entity as reported by an NER engine (character offsets).
#[derive(Debug, Clone, PartialEq)]
pub struct NerEntity {
    /// Engine label (`PERSON`, `ORG`, `GPE`, `LOC`, `DATE`, ...)
    pub label: String,
    /// Start offset (characters)
    pub start: usize,
    /// End offset (characters)
    pub end: usize,
    /// Engine confidence, if it reports one
    pub score: Option<f32>,
}

/// A loaded NER model.
///
/// Engines are stateful and not shared: each slot owns one.
pub trait NerEngine: Send {
    /// Run the model over `text`.
    fn entities(&mut self, text: &str) -> Result<Vec<NerEntity>>;
}

/// Loads NER models for a slot.
///
/// Called once per slot; the loader decides how the slot's device is used
/// (e.g. `SlotId::device` selects the GPU).
pub trait NerModelLoader: Send + Sync {
    /// Load `model` for `slot`.
    fn load(&self, model: &str, slot: &SlotId) -> Result<Box<dyn NerEngine>>;
}

/// Adapter turning NER entities into PII spans.
pub struct NerDetector {
    engine: Box<dyn NerEngine>,
    model: String,
    default_score: f32,
}

impl NerDetector {
    /// Wrap a loaded engine.
    pub fn new(engine: Box<dyn NerEngine>, model: impl Into<String>) -> Self {
        Self {
            engine,
            model: model.into(),
            default_score: DEFAULT_NER_SCORE,
        }
    }

    /// Load `model` through `loader` for `slot`.
    pub fn load(loader: &dyn NerModelLoader, model: &str, slot: &SlotId) -> Result<Self> {
        let engine = loader.load(model, slot)?;
        log::debug!("Loaded NER model '{}' on {}", model, slot);
        Ok(Self::new(engine, model))
    }

    /// Override the score used when the engine reports none.
    pub fn with_default_score(mut self, score: f32) -> Self {
        self.default_score = score;
        self
    }

    /// Name of the wrapped model.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Map an engine label to a PII category; `None` for non-PII classes.
    pub fn pii_label(label: &str) -> Option<EntityType> {
        match EntityType::parse(label) {
            label @ (EntityType::Person | EntityType::Org | EntityType::Location) => Some(label),
            _ => None,
        }
    }
}

impl Detector for NerDetector {
    fn name(&self) -> &str {
        NER_SOURCE
    }

    fn detect(&mut self, text: &str, language: &str) -> Result<Vec<Span>> {
        let entities = self
            .engine
            .entities(text)
            .map_err(|e| Error::detector(NER_SOURCE, format!("{} ({}): {}", self.model, language, e)))?;

        let mut spans = Vec::with_capacity(entities.len());
        for entity in entities {
            let Some(label) = Self::pii_label(&entity.label) else {
                continue;
            };
            let score = entity.score.unwrap_or(self.default_score);
            match Span::from_text(text, entity.start, entity.end, label, score, NER_SOURCE) {
                Ok(span) => spans.push(span),
                Err(e) => log::warn!("Dropping NER entity from '{}': {}", self.model, e),
            }
        }
        Ok(spans)
    }
}
