//! Documents, pages and per-page detection results.
//!
//! Documents come from the upstream text extraction step as an ordered list of
//! `{page_number, text}` records. The pipeline only ever writes the language,
//! detections and status of a page; the text itself is read-only.

use crate::error::{Error, Result};
use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Diagnostic outcome of a page's detection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// Every detector ran (or the page was empty).
    Complete,
    /// At least one detector failed or the page's slot failed to initialize;
    /// the detections are whatever the remaining detectors found.
    Degraded,
    /// The run was cancelled before the page was dispatched.
    Cancelled,
}

/// One page of extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number, unique within the document
    pub page_number: u32,
    /// Raw page text (may be empty)
    #[serde(default, alias = "content")]
    pub text: String,
    /// Language the page was routed with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Merged detections
    #[serde(default)]
    pub detections: Vec<Span>,
    /// Detection outcome, `None` until the page has been through the pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PageStatus>,
}

impl Page {
    /// Create an unprocessed page.
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
            language: None,
            detections: Vec::new(),
            status: None,
        }
    }

    /// Whether the page has no text worth scanning.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Merged detections for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Page number the detections belong to
    pub page_number: u32,
    /// Detection outcome
    pub status: PageStatus,
    /// Spans ordered by ascending start, then ascending end
    pub detections: Vec<Span>,
}

impl DetectionResult {
    /// Result for a page that produced no detections.
    pub fn empty(page_number: u32, status: PageStatus) -> Self {
        Self {
            page_number,
            status,
            detections: Vec::new(),
        }
    }
}

/// A paged document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Source name (usually the PDF file name)
    #[serde(alias = "filename")]
    pub source: String,
    /// Document language, set by the pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Pages in document order
    pub pages: Vec<Page>,
}

impl Document {
    /// Create a document, checking that page numbers are positive and unique.
    pub fn new(source: impl Into<String>, pages: Vec<Page>) -> Result<Self> {
        let doc = Self {
            source: source.into(),
            language: None,
            pages,
        };
        doc.validate()?;
        Ok(doc)
    }

    /// Create a document from page texts, numbering pages from 1.
    pub fn from_texts<I, S>(source: impl Into<String>, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pages = texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Page::new(i as u32 + 1, text))
            .collect();
        Self {
            source: source.into(),
            language: None,
            pages,
        }
    }

    /// Parse the extraction step's JSON output.
    ///
    /// Extraction output numbers pages from 0; such documents are shifted to
    /// 1-based numbering.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut doc: Self = serde_json::from_str(json)?;
        if doc.pages.iter().any(|p| p.page_number == 0) {
            log::info!("Document '{}' uses 0-based page numbers, renumbering from 1", doc.source);
            for page in &mut doc.pages {
                page.page_number += 1;
            }
        }
        doc.validate()?;
        Ok(doc)
    }

    /// Load the extraction step's JSON output from a file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Check page-number invariants.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.pages.len());
        for page in &self.pages {
            if page.page_number == 0 {
                return Err(Error::InvalidDocument("page numbers must be positive".to_string()));
            }
            if !seen.insert(page.page_number) {
                return Err(Error::InvalidDocument(format!(
                    "duplicate page number {}",
                    page.page_number
                )));
            }
        }
        Ok(())
    }

    /// Number of pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Per-page results of a processed document, in page order.
    ///
    /// Pages that have not been through the pipeline are omitted.
    pub fn results(&self) -> Vec<DetectionResult> {
        self.pages
            .iter()
            .filter_map(|page| {
                page.status.map(|status| DetectionResult {
                    page_number: page.page_number,
                    status,
                    detections: page.detections.clone(),
                })
            })
            .collect()
    }

    /// Build the serializable detection report (page texts are not included).
    pub fn report(&self) -> DetectionReport {
        DetectionReport {
            source: self.source.clone(),
            language: self.language.clone(),
            pages: self.results(),
        }
    }
}

/// Output of a pipeline run: detections per page without page texts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    /// Source name of the document
    pub source: String,
    /// Language the document was routed with
    pub language: Option<String>,
    /// Per-page results in page order
    pub pages: Vec<DetectionResult>,
}

impl DetectionReport {
    /// Serialize as pretty-printed JSON (UTF-8, no escaping of non-ASCII).
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Total number of detections across pages.
    pub fn detection_count(&self) -> usize {
        self.pages.iter().map(|p| p.detections.len()).sum()
    }
}
