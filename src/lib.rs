#![allow(clippy::type_complexity)]
#![allow(clippy::should_implement_trait)]
#![cfg_attr(test, allow(dead_code))]

//! # PII Oxide
//!
//! Multilingual detection of personally identifiable information in paged
//! documents.
//!
//! ## Core Features
//!
//! - **Language Routing**: one language per document, identified from the
//!   first page with enough text and normalized to a supported language
//! - **Pluggable Detectors**: regex patterns, NER engines and LLM backends
//!   behind a single [`Detector`](detectors::Detector) trait
//! - **Slot Pool**: pages spread round-robin over a fixed set of worker
//!   slots, each with its own lazily built detector context
//! - **Failure Isolation**: a failing detector or slot degrades only the pages
//!   it touches; every page is always reported
//! - **Deterministic Merging**: one span per location, chosen by score and
//!   detector priority, independent of input order
//!
//! ## Quick Start
//!
//! ```no_run
//! use pii_oxide::config::PipelineConfig;
//! use pii_oxide::detectors::StandardDetectorFactory;
//! use pii_oxide::document::Document;
//! use pii_oxide::language::ScriptLanguageIdentifier;
//! use pii_oxide::runner::PipelineRunner;
//!
//! # fn main() -> pii_oxide::Result<()> {
//! let config = PipelineConfig::default().with_slot_count(2);
//! let factory = StandardDetectorFactory::new(config.clone());
//! let runner = PipelineRunner::new(config, Box::new(ScriptLanguageIdentifier), Box::new(factory))?;
//!
//! let document = Document::from_json_file("contract_text.json")?;
//! let scanned = runner.run(&document)?;
//! println!("{}", scanned.report().to_json_pretty()?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

// Error handling
pub mod error;

// Data model
pub mod config;
pub mod document;
pub mod span;

// Detection
pub mod detectors;
pub mod language;

// Orchestration
pub mod assign;
pub mod merge;
pub mod runner;
pub mod scheduler;

// Re-exports
pub use config::{InsufficientTextPolicy, MergeStrategy, PipelineConfig, ResourceKind};
pub use detectors::{Detector, DetectorFactory, DetectorSet, StandardDetectorFactory};
pub use document::{DetectionReport, DetectionResult, Document, Page, PageStatus};
pub use error::{Error, Result};
pub use language::{LanguageIdentifier, LanguageRouter, ScriptLanguageIdentifier};
pub use merge::Merger;
pub use runner::{PipelineRunner, RunSummary};
pub use scheduler::{CancellationToken, PageScheduler};
pub use span::{EntityType, Span};

// Internal utilities
pub(crate) mod utils {
    //! Internal utility functions for the library.

    use std::cmp::Ordering;

    /// Total order over scores.
    ///
    /// NaN compares equal to NaN and greater than every number, so sorting by
    /// score never panics.
    #[inline]
    pub fn safe_float_cmp(a: f32, b: f32) -> Ordering {
        match a.partial_cmp(&b) {
            Some(ordering) => ordering,
            None => a.is_nan().cmp(&b.is_nan()),
        }
    }

}

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
