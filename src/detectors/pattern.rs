//! Regex-based detection of structured PII.
//!
//! Recognizes identifiers whose shape is language independent: email
//! addresses, phone numbers, payment card numbers, IBANs and IPv4 addresses.
//! Candidates with a checksum (cards, IBANs) are validated; a card number that
//! fails the Luhn check is still reported at the base score, an IBAN that
//! fails mod-97 is dropped.

use super::Detector;
use crate::error::Result;
use crate::span::{CharIndex, EntityType, Span};
use lazy_static::lazy_static;
use regex::Regex;

/// Source name of spans produced by [`PatternDetector`].
pub const PATTERN_SOURCE: &str = "pattern";

lazy_static! {
    static ref EMAIL_RE: Regex =
        Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").unwrap();
    static ref CREDIT_CARD_RE: Regex =
        Regex::new(r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b").unwrap();
    static ref PHONE_SHORT_RE: Regex = Regex::new(r"\b\d{3}[-.]?\d{4}\b").unwrap();
    static ref PHONE_INTL_RE: Regex =
        Regex::new(r"\+\d{1,3}[\s.-]?\(?\d{1,4}\)?(?:[\s.-]?\d{2,4}){2,4}\b").unwrap();
    static ref IBAN_RE: Regex =
        Regex::new(r"\b[A-Z]{2}\d{2}(?: ?[A-Z0-9]{4}){2,7}(?: ?[A-Z0-9]{1,3})?\b").unwrap();
    static ref IPV4_RE: Regex = Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap();
}

/// Scores a regex match; `None` rejects the candidate.
type Validator = fn(&str) -> Option<f32>;

struct Recognizer {
    label: EntityType,
    regex: &'static Regex,
    validate: Validator,
}

/// Pattern recognizer for structured PII.
pub struct PatternDetector {
    recognizers: Vec<Recognizer>,
    score_threshold: f32,
}

impl std::fmt::Debug for PatternDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<&str> = self.recognizers.iter().map(|r| r.label.as_str()).collect();
        f.debug_struct("PatternDetector")
            .field("entities", &labels)
            .field("score_threshold", &self.score_threshold)
            .finish()
    }
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternDetector {
    /// Create a detector for all supported entity types.
    pub fn new() -> Self {
        let recognizers = vec![
            Recognizer {
                label: EntityType::Email,
                regex: &EMAIL_RE,
                validate: |_| Some(1.0),
            },
            Recognizer {
                label: EntityType::CreditCard,
                regex: &CREDIT_CARD_RE,
                validate: |m| Some(if luhn_valid(m) { 1.0 } else { 0.9 }),
            },
            Recognizer {
                label: EntityType::Phone,
                regex: &PHONE_INTL_RE,
                validate: |m| {
                    let digits = m.chars().filter(char::is_ascii_digit).count();
                    (8..=15).contains(&digits).then_some(0.75)
                },
            },
            Recognizer {
                label: EntityType::Phone,
                regex: &PHONE_SHORT_RE,
                validate: |_| Some(0.8),
            },
            Recognizer {
                label: EntityType::Iban,
                regex: &IBAN_RE,
                validate: |m| iban_valid(m).then_some(1.0),
            },
            Recognizer {
                label: EntityType::IpAddress,
                regex: &IPV4_RE,
                validate: |m| m.split('.').all(|octet| octet.parse::<u8>().is_ok()).then_some(0.95),
            },
        ];
        Self {
            recognizers,
            score_threshold: 0.0,
        }
    }

    /// Restrict detection to the given entity types.
    pub fn with_entities(mut self, entities: &[EntityType]) -> Self {
        self.recognizers.retain(|r| entities.contains(&r.label));
        self
    }

    /// Drop candidates scoring below `threshold`.
    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    /// Entity types this detector reports.
    pub fn entities(&self) -> Vec<EntityType> {
        let mut labels: Vec<EntityType> = self.recognizers.iter().map(|r| r.label.clone()).collect();
        labels.dedup();
        labels
    }

    /// Scan `text` and return spans with character offsets.
    pub fn analyze(&self, text: &str) -> Vec<Span> {
        if text.is_empty() {
            return Vec::new();
        }
        let index = CharIndex::new(text);
        let mut spans = Vec::new();

        for recognizer in &self.recognizers {
            for m in recognizer.regex.find_iter(text) {
                let Some(score) = (recognizer.validate)(m.as_str()) else {
                    log::trace!("Rejected {} candidate '{}'", recognizer.label, m.as_str());
                    continue;
                };
                if score < self.score_threshold {
                    continue;
                }
                let (start, end) = index.char_range(m.range());
                spans.push(Span {
                    label: recognizer.label.clone(),
                    text_value: m.as_str().to_string(),
                    start,
                    end,
                    score,
                    source: PATTERN_SOURCE.to_string(),
                });
            }
        }

        spans
    }
}

impl Detector for PatternDetector {
    fn name(&self) -> &str {
        PATTERN_SOURCE
    }

    fn detect(&mut self, text: &str, _language: &str) -> Result<Vec<Span>> {
        Ok(self.analyze(text))
    }
}

/// Luhn checksum over the digits of `candidate`.
fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 12 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// ISO 13616 mod-97 check.
fn iban_valid(candidate: &str) -> bool {
    let compact: String = candidate.chars().filter(|c| !c.is_whitespace()).collect();
    if !(15..=34).contains(&compact.len()) {
        return false;
    }
    let (head, tail) = compact.split_at(4);
    let mut remainder: u32 = 0;
    for c in tail.chars().chain(head.chars()) {
        let value = match c.to_digit(36) {
            Some(v) => v,
            None => return false,
        };
        remainder = if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        };
    }
    remainder == 1
}
