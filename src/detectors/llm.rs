//! LLM-based PII extraction adapter.
//!
//! The model is prompted with the page text and asked to answer with a JSON
//! array of findings:
//!
//! ```text
//! [{"value": "Jane Doe", "type": "PERSON", "score": 0.9}, ...]
//! ```
//!
//! The model only returns values, not offsets, so every occurrence of a value
//! in the page becomes a span. A response that is not a JSON array is a
//! [`Error::MalformedUpstreamOutput`]: the page simply gets no LLM spans.

use super::Detector;
use crate::error::{Error, Result};
use crate::span::{CharIndex, EntityType, Span};
use serde::Deserialize;
use std::sync::Arc;

/// Source name of spans produced by [`LlmDetector`].
pub const LLM_SOURCE: &str = "llm";

/// Score for findings the model does not score itself.
pub const DEFAULT_LLM_SCORE: f32 = 0.5;

/// Default system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a PII detection system. \
Return ONLY a JSON array. Each element is an object with the keys \"value\" \
(the exact text as it appears), \"type\" (one of PERSON, ORG, LOCATION, EMAIL, \
PHONE, CREDIT_CARD, IBAN, IP_ADDRESS) and \"score\" (confidence between 0 and 1). \
Return [] if the text contains no PII.";

/// Chat transport to a language model (e.g. a local Ollama server).
pub trait LlmClient: Send + Sync {
    /// Send one system + user exchange and return the assistant message.
    fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct Finding {
    #[serde(alias = "text_value", alias = "text")]
    value: String,
    #[serde(rename = "type", alias = "pii_type", alias = "label")]
    kind: String,
    #[serde(default)]
    score: Option<f32>,
}

/// Detector that asks an LLM for PII and maps the answer back onto the page.
pub struct LlmDetector {
    client: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl LlmDetector {
    /// Create a detector using the default system prompt.
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Replace the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// User message for a page.
    pub fn user_prompt(text: &str) -> String {
        format!("Text:\n{} Scan the text for any PII.", text)
    }

    /// Parse a model response into spans over `text`.
    pub fn parse_response(text: &str, response: &str) -> Result<Vec<Span>> {
        let body = strip_wrapping(response);
        let values: Vec<serde_json::Value> =
            serde_json::from_str(body).map_err(|e| Error::malformed(LLM_SOURCE, e))?;

        let index = CharIndex::new(text);
        let mut spans = Vec::new();
        for value in values {
            let finding: Finding = match serde_json::from_value(value) {
                Ok(finding) => finding,
                Err(e) => {
                    log::debug!("Skipping unusable LLM finding: {}", e);
                    continue;
                },
            };
            let needle = finding.value.trim();
            if needle.is_empty() {
                continue;
            }
            let label = EntityType::parse(&finding.kind);
            let score = finding.score.unwrap_or(DEFAULT_LLM_SCORE);

            let mut found = false;
            for (byte, matched) in text.match_indices(needle) {
                let (start, end) = index.char_range(byte..byte + matched.len());
                spans.push(Span::from_text(text, start, end, label.clone(), score, LLM_SOURCE)?);
                found = true;
            }
            if !found {
                log::debug!("LLM reported '{}' which does not occur in the page", needle);
            }
        }
        Ok(spans)
    }
}

impl Detector for LlmDetector {
    fn name(&self) -> &str {
        LLM_SOURCE
    }

    fn detect(&mut self, text: &str, _language: &str) -> Result<Vec<Span>> {
        let response = self
            .client
            .chat(&self.system_prompt, &Self::user_prompt(text))
            .map_err(|e| match e {
                e @ Error::MalformedUpstreamOutput { .. } => e,
                other => Error::detector(LLM_SOURCE, other),
            })?;
        Self::parse_response(text, &response)
    }
}

/// Remove a leading reasoning block and Markdown code fences around the JSON.
fn strip_wrapping(response: &str) -> &str {
    let mut body = response.trim();
    if body.starts_with("<think>") {
        if let Some(end) = body.find("</think>") {
            body = body[end + "</think>".len()..].trim();
        }
    }
    if let Some(rest) = body.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        body = rest.strip_suffix("```").unwrap_or(rest).trim();
    }
    body
}
