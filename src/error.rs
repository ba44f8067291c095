//! Error types for the detection pipeline.
//!
//! Only [`Error::Configuration`] (and [`Error::InsufficientText`] when the
//! runner is configured to abort) stop a run. Detector and slot failures are
//! recorded against the affected pages and the run continues.

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while detecting and fusing PII spans.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid pipeline configuration (zero slots, unknown default language, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No page had enough text to identify the document language
    #[error("Insufficient text for language detection: no page exceeds {min_chars} characters")]
    InsufficientText {
        /// Minimum trimmed character count a sample page must exceed
        min_chars: usize,
    },

    /// The language identifier failed on a sample page
    #[error("Language identification failed on page {page}: {reason}")]
    LanguageIdentification {
        /// Page number of the sample
        page: u32,
        /// Reason reported by the identifier
        reason: String,
    },

    /// A detector failed on a page
    #[error("Detector '{detector}' failed: {reason}")]
    Detector {
        /// Detector source name
        detector: String,
        /// Reason for the failure
        reason: String,
    },

    /// A slot's detector context could not be initialized
    #[error("Slot {slot} failed to initialize: {reason}")]
    SlotInitialization {
        /// Slot index
        slot: usize,
        /// Reason for the failure
        reason: String,
    },

    /// A detector's upstream (e.g. LLM) response could not be parsed
    #[error("Malformed output from '{detector}': {reason}")]
    MalformedUpstreamOutput {
        /// Detector source name
        detector: String,
        /// Parse failure description
        reason: String,
    },

    /// Span violates its invariants
    #[error("Invalid span [{start}, {end}) for text of {len} characters")]
    InvalidSpan {
        /// Start offset (characters)
        start: usize,
        /// End offset (characters)
        end: usize,
        /// Length of the text the span refers to (characters)
        len: usize,
    },

    /// Span score is NaN or outside `[0, 1]`
    #[error("Invalid span score {score}: must be within [0, 1]")]
    InvalidScore {
        /// Reported score
        score: f32,
    },

    /// Input document is malformed (duplicate or zero page numbers)
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error must abort the whole run.
    ///
    /// Detector, slot and upstream-output errors only degrade the affected
    /// pages.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::Detector { .. }
                | Error::SlotInitialization { .. }
                | Error::MalformedUpstreamOutput { .. }
                | Error::InvalidSpan { .. }
                | Error::InvalidScore { .. }
        )
    }

    pub(crate) fn detector(detector: impl Into<String>, reason: impl ToString) -> Self {
        Error::Detector {
            detector: detector.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn malformed(detector: impl Into<String>, reason: impl ToString) -> Self {
        Error::MalformedUpstreamOutput {
            detector: detector.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error() {
        let err = Error::Configuration("slot_count must be >= 1".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("Configuration error"));
        assert!(msg.contains("slot_count"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_insufficient_text_error() {
        let err = Error::InsufficientText { min_chars: 50 };
        assert!(format!("{}", err).contains("50"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_detector_errors_are_recoverable() {
        assert!(!Error::detector("ner", "model crashed").is_fatal());
        assert!(!Error::malformed("llm", "expected array").is_fatal());
        assert!(!Error::SlotInitialization {
            slot: 2,
            reason: "cuda unavailable".to_string()
        }
        .is_fatal());
    }

    #[test]
    fn test_invalid_span_error() {
        let err = Error::InvalidSpan {
            start: 4,
            end: 4,
            len: 10,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("[4, 4)"));
        assert!(msg.contains("10 characters"));
    }

    #[test]
    fn test_invalid_score_error() {
        let err = Error::InvalidScore { score: 1.5 };
        let msg = format!("{}", err);
        assert!(msg.contains("score 1.5"));
        assert!(!msg.contains("characters"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.json");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(format!("{}", err).contains("missing.json"));
    }
}
