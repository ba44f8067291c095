//! Top-level detection pipeline.
//!
//! ```text
//! Document
//!     ↓
//! [LanguageRouter] (one language for the whole document)
//!     ↓
//! [ResourceAssignor] (page i → slot i mod n)
//!     ↓
//! [PageScheduler] (slots in parallel, detectors per page)
//!     ↓
//! [Merger] (one span per location)
//!     ↓
//! Document with detections
//! ```

use crate::assign::ResourceAssignor;
use crate::config::{InsufficientTextPolicy, PipelineConfig};
use crate::detectors::DetectorFactory;
use crate::document::{Document, PageStatus};
use crate::error::{Error, Result};
use crate::language::{LanguageIdentifier, LanguageRouter, RoutedLanguage};
use crate::merge::Merger;
use crate::scheduler::{CancellationToken, PageScheduler};
use std::fmt;
use std::time::{Duration, Instant};

/// Counters describing one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Language the document was routed with
    pub language: String,
    /// Number of pages in the document
    pub pages: usize,
    /// Pages on which every detector ran
    pub completed: usize,
    /// Pages with at least one failed detector or a failed slot
    pub degraded: usize,
    /// Pages never dispatched because the run was cancelled
    pub cancelled: usize,
    /// Merged spans across all pages
    pub spans: usize,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

impl RunSummary {
    fn collect(document: &Document, language: &str, elapsed: Duration) -> Self {
        let count = |status: PageStatus| {
            document
                .pages
                .iter()
                .filter(|p| p.status == Some(status))
                .count()
        };
        Self {
            language: language.to_string(),
            pages: document.pages.len(),
            completed: count(PageStatus::Complete),
            degraded: count(PageStatus::Degraded),
            cancelled: count(PageStatus::Cancelled),
            spans: document.pages.iter().map(|p| p.detections.len()).sum(),
            elapsed,
        }
    }

    /// Whether every page completed.
    pub fn is_clean(&self) -> bool {
        self.completed == self.pages
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pages ({} complete, {} degraded, {} cancelled), {} spans, language '{}', {:.2}s",
            self.pages,
            self.completed,
            self.degraded,
            self.cancelled,
            self.spans,
            self.language,
            self.elapsed.as_secs_f64()
        )
    }
}

/// The PII detection pipeline.
///
/// A runner is built once and can process any number of documents; each call
/// to [`run`](Self::run) initializes its own slots.
pub struct PipelineRunner {
    config: PipelineConfig,
    router: LanguageRouter,
    factory: Box<dyn DetectorFactory>,
    merger: Merger,
    cancellation: CancellationToken,
}

impl PipelineRunner {
    /// Create a runner.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `config` fails validation.
    pub fn new(
        config: PipelineConfig,
        identifier: Box<dyn LanguageIdentifier>,
        factory: Box<dyn DetectorFactory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            router: LanguageRouter::new(identifier, &config),
            merger: Merger::from_config(&config),
            factory,
            config,
            cancellation: CancellationToken::new(),
        })
    }

    /// Observe `token` for cancellation requests.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Token that cancels runs of this runner.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Detect PII in `document`, returning a copy carrying the detections.
    ///
    /// Every page of the input appears in the output with a status.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidDocument`] if page numbers are not positive and unique
    /// - [`Error::InsufficientText`] if no page has enough text to identify the
    ///   language and the policy is [`InsufficientTextPolicy::Abort`]
    pub fn run(&self, document: &Document) -> Result<Document> {
        self.run_with_summary(document).map(|(doc, _)| doc)
    }

    /// Like [`run`](Self::run), also returning the run's counters.
    pub fn run_with_summary(&self, document: &Document) -> Result<(Document, RunSummary)> {
        let start = Instant::now();
        document.validate()?;

        let routed = self.route(document)?;
        let language = routed.language;

        let assignor = ResourceAssignor::new(self.config.slot_count, self.config.resource)?;
        let work_items = assignor.assign(&document.pages);
        log::info!(
            "Scanning '{}': {} pages over {} {:?} slots",
            document.source,
            document.page_count(),
            assignor.slot_count(),
            self.config.resource
        );

        let results = PageScheduler::new(self.factory.as_ref(), &self.merger, self.config.max_page_chars)
            .with_cancellation(self.cancellation.clone())
            .run(&document.pages, &work_items, &language);

        let mut output = document.clone();
        output.language = Some(language.clone());
        for (page, result) in output.pages.iter_mut().zip(results) {
            page.language = Some(language.clone());
            page.status = Some(result.status);
            page.detections = result.detections;
        }

        let summary = RunSummary::collect(&output, &language, start.elapsed());
        log::info!("Finished '{}': {}", output.source, summary);
        Ok((output, summary))
    }

    fn route(&self, document: &Document) -> Result<RoutedLanguage> {
        let default = self.router.default_language();
        match self.router.route(document) {
            Ok(routed) => Ok(routed),
            Err(Error::InsufficientText { min_chars }) => match self.config.insufficient_text {
                InsufficientTextPolicy::UseDefault => {
                    log::warn!(
                        "No page of '{}' has more than {} characters, using default language '{}'",
                        document.source,
                        min_chars,
                        default
                    );
                    Ok(RoutedLanguage::fallback(default))
                },
                InsufficientTextPolicy::Abort => Err(Error::InsufficientText { min_chars }),
            },
            Err(Error::LanguageIdentification { page, reason }) => {
                log::warn!(
                    "Could not identify the language of '{}' (last attempt on page {}: {}), using '{}'",
                    document.source,
                    page,
                    reason,
                    default
                );
                Ok(RoutedLanguage::fallback(default))
            },
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::SlotId;
    use crate::detectors::{Detector, DetectorSet, PatternDetector};
    use crate::language::ScriptLanguageIdentifier;

    fn pattern_factory() -> Box<dyn DetectorFactory> {
        Box::new(|_: &SlotId, _: &str| -> Result<DetectorSet> {
            Ok(vec![Box::new(PatternDetector::new()) as Box<dyn Detector>])
        })
    }

    fn runner(config: PipelineConfig) -> PipelineRunner {
        PipelineRunner::new(config, Box::new(ScriptLanguageIdentifier), pattern_factory()).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = PipelineRunner::new(
            PipelineConfig::default().with_slot_count(0),
            Box::new(ScriptLanguageIdentifier),
            pattern_factory(),
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_run_sets_language_and_status() {
        let doc = Document::from_texts(
            "contract.pdf",
            [
                "Contact John at john.doe@example.com or call 555-1234 for further details.",
                "",
            ],
        );
        let (out, summary) = runner(PipelineConfig::default()).run_with_summary(&doc).unwrap();

        assert_eq!(out.language.as_deref(), Some("en"));
        assert_eq!(out.pages[0].status, Some(PageStatus::Complete));
        assert_eq!(out.pages[1].status, Some(PageStatus::Complete));
        assert!(out.pages[1].detections.is_empty());
        assert_eq!(out.pages[0].detections.len(), 2);
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.spans, 2);
        assert!(summary.is_clean());
        // Input is untouched
        assert!(doc.pages[0].detections.is_empty());
    }

    #[test]
    fn test_insufficient_text_policies() {
        let doc = Document::from_texts("short.pdf", ["tiny", "a@b.co"]);

        let out = runner(PipelineConfig::default()).run(&doc).unwrap();
        assert_eq!(out.language.as_deref(), Some("en"));
        assert_eq!(out.pages[1].detections.len(), 1);

        let abort = PipelineConfig::default().with_insufficient_text(InsufficientTextPolicy::Abort);
        let err = runner(abort).run(&doc).unwrap_err();
        assert!(matches!(err, Error::InsufficientText { .. }));
    }

    #[test]
    fn test_identification_failure_falls_back() {
        let identifier = |_: &str| -> Result<String> { Err(Error::detector("langid", "unavailable")) };
        let runner = PipelineRunner::new(
            PipelineConfig::default(),
            Box::new(identifier),
            pattern_factory(),
        )
        .unwrap();
        let doc = Document::from_texts("d", ["x".repeat(100)]);
        let out = runner.run(&doc).unwrap();
        assert_eq!(out.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_invalid_document_rejected() {
        let mut doc = Document::from_texts("d", ["a", "b"]);
        doc.pages[1].page_number = 1;
        let err = runner(PipelineConfig::default()).run(&doc).unwrap_err();
        assert!(matches!(err, Error::InvalidDocument(_)));
    }

    #[test]
    fn test_summary_display() {
        let summary = RunSummary {
            language: "bg".to_string(),
            pages: 3,
            completed: 2,
            degraded: 1,
            cancelled: 0,
            spans: 7,
            elapsed: Duration::from_millis(1500),
        };
        let text = summary.to_string();
        assert!(text.contains("3 pages"));
        assert!(text.contains("1 degraded"));
        assert!(text.contains("'bg'"));
        assert!(!summary.is_clean());
    }
}
