//! Detected PII spans.
//!
//! A [`Span`] is a half-open interval `[start, end)` over the *characters*
//! (Unicode scalar values) of a page's text. Every detector reports offsets
//! in this unit, so the merger can compare spans from different sources
//! directly. Detectors that work on byte offsets (the regex engine, for
//! instance) convert through [`CharIndex`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity category of a span.
///
/// The set is open: labels a detector reports that are not one of the known
/// categories are kept verbatim in [`EntityType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityType {
    /// Person name
    Person,
    /// Organization name
    Org,
    /// Location (city, country, address fragment)
    Location,
    /// Email address
    Email,
    /// Phone number
    Phone,
    /// Payment card number
    CreditCard,
    /// International bank account number
    Iban,
    /// IP address
    IpAddress,
    /// Any other category, stored as reported
    Other(String),
}

impl EntityType {
    /// Canonical upper-case name used in output.
    pub fn as_str(&self) -> &str {
        match self {
            EntityType::Person => "PERSON",
            EntityType::Org => "ORG",
            EntityType::Location => "LOCATION",
            EntityType::Email => "EMAIL",
            EntityType::Phone => "PHONE",
            EntityType::CreditCard => "CREDIT_CARD",
            EntityType::Iban => "IBAN",
            EntityType::IpAddress => "IP_ADDRESS",
            EntityType::Other(name) => name,
        }
    }

    /// Parse a label, accepting the common aliases used by NER and
    /// pattern engines (`EMAIL_ADDRESS`, `PHONE_NUMBER`, `IBAN_CODE`, `GPE`, ...).
    pub fn parse(label: &str) -> Self {
        let normalized = label.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "PERSON" | "PER" => EntityType::Person,
            "ORG" | "ORGANIZATION" => EntityType::Org,
            "LOCATION" | "LOC" | "GPE" => EntityType::Location,
            "EMAIL" | "EMAIL_ADDRESS" => EntityType::Email,
            "PHONE" | "PHONE_NUMBER" => EntityType::Phone,
            "CREDIT_CARD" | "CREDIT_CARD_NUMBER" => EntityType::CreditCard,
            "IBAN" | "IBAN_CODE" => EntityType::Iban,
            "IP_ADDRESS" | "IP" => EntityType::IpAddress,
            _ => EntityType::Other(normalized),
        }
    }
}

impl From<String> for EntityType {
    fn from(label: String) -> Self {
        EntityType::parse(&label)
    }
}

impl From<EntityType> for String {
    fn from(label: EntityType) -> Self {
        label.as_str().to_string()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A labeled, scored character interval identifying a candidate PII occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Entity category
    #[serde(rename = "type")]
    pub label: EntityType,
    /// The covered text
    pub text_value: String,
    /// Start offset (characters, inclusive)
    pub start: usize,
    /// End offset (characters, exclusive)
    pub end: usize,
    /// Confidence score (0.0 - 1.0)
    pub score: f32,
    /// Name of the detector that produced the span
    pub source: String,
}

impl Span {
    /// Create a span over `text[start..end]` (character offsets).
    ///
    /// Fails with [`Error::InvalidSpan`] when the interval is empty or leaves
    /// the text. The score is clamped into `[0, 1]`.
    pub fn from_text(
        text: &str,
        start: usize,
        end: usize,
        label: EntityType,
        score: f32,
        source: impl Into<String>,
    ) -> Result<Self> {
        let len = char_len(text);
        let text_value = slice_chars(text, start, end).ok_or(Error::InvalidSpan { start, end, len })?;
        Ok(Self {
            label,
            text_value: text_value.to_string(),
            start,
            end,
            score: if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) },
            source: source.into(),
        })
    }

    /// Number of characters covered.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Whether the span covers no characters (such a span is invalid).
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Whether two spans share at least one character.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Check the span invariants against a text of `text_len` characters.
    pub fn validate(&self, text_len: usize) -> Result<()> {
        if self.start >= self.end || self.end > text_len {
            return Err(Error::InvalidSpan {
                start: self.start,
                end: self.end,
                len: text_len,
            });
        }
        if !(0.0..=1.0).contains(&self.score) {
            return Err(Error::InvalidScore { score: self.score });
        }
        Ok(())
    }
}

/// Number of characters in `text`.
#[inline]
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Slice `text` by character offsets. Returns `None` for empty or
/// out-of-range intervals.
pub fn slice_chars(text: &str, start: usize, end: usize) -> Option<&str> {
    if start >= end {
        return None;
    }
    let mut boundaries = text.char_indices().map(|(b, _)| b).chain(std::iter::once(text.len()));
    let start_byte = boundaries.nth(start)?;
    let end_byte = boundaries.nth(end - start - 1)?;
    Some(&text[start_byte..end_byte])
}

/// Keep at most `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Byte-offset to character-offset conversion table for one text.
///
/// Building the table is O(n); each lookup is a binary search.
#[derive(Debug, Clone)]
pub struct CharIndex {
    boundaries: Vec<usize>,
}

impl CharIndex {
    /// Build the table for `text`.
    pub fn new(text: &str) -> Self {
        let mut boundaries: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        boundaries.push(text.len());
        Self { boundaries }
    }

    /// Character offset of a byte offset that lies on a char boundary.
    ///
    /// Offsets inside a multi-byte character resolve to the character that
    /// contains them.
    pub fn char_offset(&self, byte: usize) -> usize {
        match self.boundaries.binary_search(&byte) {
            Ok(idx) => idx,
            Err(idx) => idx.saturating_sub(1),
        }
    }

    /// Convert a byte range (as returned by `regex`) into a character range.
    pub fn char_range(&self, bytes: std::ops::Range<usize>) -> (usize, usize) {
        (self.char_offset(bytes.start), self.char_offset(bytes.end))
    }

    /// Number of characters in the indexed text.
    pub fn char_len(&self) -> usize {
        self.boundaries.len() - 1
    }
}
