//! Parallel page processing over the slot pool.
//!
//! Each slot owns one worker thread. A worker processes the pages assigned to
//! its slot one at a time, in page order, and builds the slot's detectors the
//! first time it needs them. Workers report finished pages over a channel;
//! results are reassembled in page order once every worker is done.
//!
//! ```text
//! [slot 0 worker] --(ordinal, result)--\
//! [slot 1 worker] --(ordinal, result)---> [collector] -> results in page order
//! [slot n worker] --(ordinal, result)--/
//! ```
//!
//! Pages that are blank after trimming are reported complete without
//! touching the slot. Span text is always the slice of the page its offsets
//! cover, whatever the detector reported.
//!
//! Failures are contained at the smallest scope possible:
//!
//! - a detector error (or panic) on a page drops that detector's output for
//!   the page and marks it degraded
//! - a slot whose detectors cannot be built reports all of its pages as
//!   degraded with no detections
//!
//! Every page always gets exactly one result.

use crate::assign::{SlotId, WorkItem};
use crate::detectors::{DetectorFactory, DetectorSet};
use crate::document::{DetectionResult, Page, PageStatus};
use crate::merge::Merger;
use crate::span::{char_len, slice_chars, truncate_chars};
use crossbeam_channel::{unbounded, Sender};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Cooperative cancellation flag shared between a run and its caller.
///
/// Cancelling does not interrupt a page that is already being scanned; pages
/// not yet dispatched are reported as [`PageStatus::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Runs detection for a document's pages across the slot pool.
pub struct PageScheduler<'a> {
    factory: &'a dyn DetectorFactory,
    merger: &'a Merger,
    max_page_chars: usize,
    cancellation: CancellationToken,
}

/// Detector state of a slot within one run.
enum SlotState {
    Uninitialized,
    Ready(DetectorSet),
    Failed,
}

impl<'a> PageScheduler<'a> {
    /// Create a scheduler.
    ///
    /// # Arguments
    ///
    /// * `factory` - Builds each slot's detectors
    /// * `merger` - Reconciles each page's detections
    /// * `max_page_chars` - Page text is truncated to this many characters
    ///   before it reaches a detector
    pub fn new(factory: &'a dyn DetectorFactory, merger: &'a Merger, max_page_chars: usize) -> Self {
        Self {
            factory,
            merger,
            max_page_chars,
            cancellation: CancellationToken::new(),
        }
    }

    /// Observe `token` for cancellation requests.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Process `pages` according to `work_items`.
    ///
    /// Returns one result per page, in the order of `pages`. Pages without a
    /// work item are reported as degraded.
    pub fn run(&self, pages: &[Page], work_items: &[WorkItem], language: &str) -> Vec<DetectionResult> {
        let mut queues: BTreeMap<SlotId, Vec<&WorkItem>> = BTreeMap::new();
        for item in work_items {
            if item.ordinal < pages.len() {
                queues.entry(item.slot).or_default().push(item);
            } else {
                log::warn!("Ignoring work item for unknown page ordinal {}", item.ordinal);
            }
        }

        let (tx, rx) = unbounded::<(usize, DetectionResult)>();

        thread::scope(|scope| {
            let handles: Vec<_> = queues
                .into_iter()
                .map(|(slot, items)| {
                    let tx = tx.clone();
                    let handle = scope.spawn(move || self.run_slot(slot, &items, pages, language, &tx));
                    (slot, handle)
                })
                .collect();

            for (slot, handle) in handles {
                if handle.join().is_err() {
                    log::error!("Worker for {} panicked", slot);
                }
            }
        });
        drop(tx);

        let mut slots: Vec<Option<DetectionResult>> = vec![None; pages.len()];
        for (ordinal, result) in rx.iter() {
            slots[ordinal] = Some(result);
        }

        slots
            .into_iter()
            .zip(pages)
            .map(|(result, page)| {
                result.unwrap_or_else(|| {
                    log::warn!("No result for page {}, reporting it as degraded", page.page_number);
                    DetectionResult::empty(page.page_number, PageStatus::Degraded)
                })
            })
            .collect()
    }

    fn run_slot(
        &self,
        slot: SlotId,
        items: &[&WorkItem],
        pages: &[Page],
        language: &str,
        tx: &Sender<(usize, DetectionResult)>,
    ) {
        let mut state = SlotState::Uninitialized;
        log::debug!("{} processing {} pages", slot, items.len());

        for item in items {
            let page = &pages[item.ordinal];
            let result = if self.cancellation.is_cancelled() {
                DetectionResult::empty(page.page_number, PageStatus::Cancelled)
            } else if page.is_blank() {
                DetectionResult::empty(page.page_number, PageStatus::Complete)
            } else {
                if let SlotState::Uninitialized = state {
                    state = self.initialize(&slot, language);
                }
                match &mut state {
                    SlotState::Ready(detectors) => self.process_page(detectors, page, language),
                    _ => DetectionResult::empty(page.page_number, PageStatus::Degraded),
                }
            };

            if tx.send((item.ordinal, result)).is_err() {
                log::error!("{}: result channel closed", slot);
                return;
            }
        }
    }

    fn initialize(&self, slot: &SlotId, language: &str) -> SlotState {
        let created = panic::catch_unwind(AssertUnwindSafe(|| self.factory.create(slot, language)));
        match created {
            Ok(Ok(detectors)) => {
                log::debug!("{} initialized with {} detectors for '{}'", slot, detectors.len(), language);
                SlotState::Ready(detectors)
            },
            Ok(Err(e)) => {
                log::error!("Failed to initialize {}: {}", slot, e);
                SlotState::Failed
            },
            Err(_) => {
                log::error!("Failed to initialize {}: detector factory panicked", slot);
                SlotState::Failed
            },
        }
    }

    fn process_page(&self, detectors: &mut DetectorSet, page: &Page, language: &str) -> DetectionResult {
        let text = truncate_chars(&page.text, self.max_page_chars);
        let text_len = char_len(text);
        if text.len() < page.text.len() {
            log::debug!(
                "Page {} truncated to {} characters for detection",
                page.page_number,
                self.max_page_chars
            );
        }

        let mut status = PageStatus::Complete;
        let mut spans = Vec::new();

        for detector in detectors.iter_mut() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(text, language)));
            match outcome {
                Ok(Ok(found)) => {
                    for mut span in found {
                        match span.validate(text_len) {
                            Ok(()) => {
                                if let Some(covered) = slice_chars(text, span.start, span.end) {
                                    if covered != span.text_value {
                                        log::warn!(
                                            "'{}' reported '{}' for [{}, {}) on page {}, which covers '{}'",
                                            detector.name(),
                                            span.text_value,
                                            span.start,
                                            span.end,
                                            page.page_number,
                                            covered
                                        );
                                        span.text_value = covered.to_string();
                                    }
                                }
                                spans.push(span);
                            },
                            Err(e) => log::warn!(
                                "Dropping span from '{}' on page {}: {}",
                                detector.name(),
                                page.page_number,
                                e
                            ),
                        }
                    }
                },
                Ok(Err(e)) => {
                    log::warn!(
                        "Detector '{}' failed on page {}: {}",
                        detector.name(),
                        page.page_number,
                        e
                    );
                    status = PageStatus::Degraded;
                },
                Err(_) => {
                    log::warn!("Detector '{}' panicked on page {}", detector.name(), page.page_number);
                    status = PageStatus::Degraded;
                },
            }
        }

        DetectionResult {
            page_number: page.page_number,
            status,
            detections: self.merger.merge(spans),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::ResourceAssignor;
    use crate::config::ResourceKind;
    use crate::detectors::Detector;
    use crate::document::Document;
    use crate::error::{Error, Result};
    use crate::span::{EntityType, Span};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Reports the whole page as one span and records the text it saw.
    struct WholePage {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Detector for WholePage {
        fn name(&self) -> &str {
            "whole"
        }

        fn detect(&mut self, text: &str, _language: &str) -> Result<Vec<Span>> {
            self.seen.lock().unwrap().push(text.to_string());
            Ok(vec![Span::from_text(text, 0, char_len(text), EntityType::Person, 0.9, "whole")?])
        }
    }

    struct Failing;

    impl Detector for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn detect(&mut self, _text: &str, _language: &str) -> Result<Vec<Span>> {
            Err(Error::detector("failing", "model crashed"))
        }
    }

    /// Reports `[0, 4)` with a text that does not match those offsets.
    struct Mislabeled;

    impl Detector for Mislabeled {
        fn name(&self) -> &str {
            "mislabeled"
        }

        fn detect(&mut self, _text: &str, _language: &str) -> Result<Vec<Span>> {
            Ok(vec![Span {
                label: EntityType::Person,
                text_value: "Bob Smith".to_string(),
                start: 0,
                end: 4,
                score: 0.9,
                source: "mislabeled".to_string(),
            }])
        }
    }

    fn items(doc: &Document, slots: usize) -> Vec<WorkItem> {
        ResourceAssignor::new(slots, ResourceKind::Cpu).unwrap().assign(&doc.pages)
    }

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_results_in_page_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let factory = {
            let seen = seen.clone();
            move |_: &SlotId, _: &str| -> Result<DetectorSet> {
                Ok(vec![Box::new(WholePage { seen: seen.clone() }) as Box<dyn Detector>])
            }
        };
        let merger = Merger::default();
        let doc = Document::from_texts("d", ["one", "two", "three", "four", "five"]);
        let results = PageScheduler::new(&factory, &merger, 100).run(&doc.pages, &items(&doc, 3), "en");

        let numbers: Vec<u32> = results.iter().map(|r| r.page_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert!(results.iter().all(|r| r.status == PageStatus::Complete));
        assert_eq!(results[2].detections[0].text_value, "three");
        assert_eq!(seen.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_lazy_init_once_per_slot() {
        let created = AtomicUsize::new(0);
        let factory = |_: &SlotId, _: &str| -> Result<DetectorSet> {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        };
        let merger = Merger::default();
        let doc = Document::from_texts("d", ["a", "b", "c", "d", "e", "f"]);
        PageScheduler::new(&factory, &merger, 100).run(&doc.pages, &items(&doc, 2), "en");
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_pages_skip_initialization() {
        let created = AtomicUsize::new(0);
        let factory = |_: &SlotId, _: &str| -> Result<DetectorSet> {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Box::new(Failing) as Box<dyn Detector>])
        };
        let merger = Merger::default();
        let doc = Document::from_texts("d", ["", ""]);
        let results = PageScheduler::new(&factory, &merger, 100).run(&doc.pages, &items(&doc, 1), "en");
        assert_eq!(created.load(Ordering::SeqCst), 0);
        assert!(results
            .iter()
            .all(|r| r.status == PageStatus::Complete && r.detections.is_empty()));
    }

    #[test]
    fn test_whitespace_pages_skip_slot_and_detectors() {
        let created = AtomicUsize::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let factory = |_: &SlotId, _: &str| -> Result<DetectorSet> {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Box::new(WholePage { seen: seen.clone() }) as Box<dyn Detector>])
        };
        let merger = Merger::default();
        let doc = Document::from_texts("d", ["   \n\t  ", " "]);
        let results = PageScheduler::new(&factory, &merger, 100).run(&doc.pages, &items(&doc, 1), "en");

        assert_eq!(created.load(Ordering::SeqCst), 0);
        assert!(seen.lock().unwrap().is_empty());
        assert!(results.iter().all(|r| r.status == PageStatus::Complete));

        let failing = |slot: &SlotId, _: &str| -> Result<DetectorSet> {
            Err(Error::SlotInitialization {
                slot: slot.index,
                reason: "no device".to_string(),
            })
        };
        let results = PageScheduler::new(&failing, &merger, 100).run(&doc.pages, &items(&doc, 1), "en");
        assert!(results.iter().all(|r| r.status == PageStatus::Complete));
    }

    #[test]
    fn test_span_text_follows_offsets() {
        let factory =
            |_: &SlotId, _: &str| -> Result<DetectorSet> { Ok(vec![Box::new(Mislabeled) as Box<dyn Detector>]) };
        let merger = Merger::default();
        let doc = Document::from_texts("d", ["Jane called"]);
        let results = PageScheduler::new(&factory, &merger, 100).run(&doc.pages, &items(&doc, 1), "en");

        assert_eq!(results[0].status, PageStatus::Complete);
        assert_eq!(results[0].detections.len(), 1);
        assert_eq!(results[0].detections[0].text_value, "Jane");
        assert_eq!((results[0].detections[0].start, results[0].detections[0].end), (0, 4));
    }

    #[test]
    fn test_failed_slot_degrades_only_its_pages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let factory = {
            let seen = seen.clone();
            move |slot: &SlotId, _: &str| -> Result<DetectorSet> {
                if slot.index == 1 {
                    return Err(Error::SlotInitialization {
                        slot: slot.index,
                        reason: "out of memory".to_string(),
                    });
                }
                Ok(vec![Box::new(WholePage { seen: seen.clone() }) as Box<dyn Detector>])
            }
        };
        let merger = Merger::default();
        let doc = Document::from_texts("d", ["p1", "p2", "p3", "p4"]);
        let results = PageScheduler::new(&factory, &merger, 100).run(&doc.pages, &items(&doc, 2), "en");

        let statuses: Vec<PageStatus> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                PageStatus::Complete,
                PageStatus::Degraded,
                PageStatus::Complete,
                PageStatus::Degraded
            ]
        );
        assert!(results[1].detections.is_empty());
        assert!(results[3].detections.is_empty());
    }

    #[test]
    fn test_detector_failure_keeps_other_output() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let factory = {
            let seen = seen.clone();
            move |_: &SlotId, _: &str| -> Result<DetectorSet> {
                Ok(vec![
                    Box::new(Failing) as Box<dyn Detector>,
                    Box::new(WholePage { seen: seen.clone() }),
                ])
            }
        };
        let merger = Merger::default();
        let doc = Document::from_texts("d", ["Jane"]);
        let results = PageScheduler::new(&factory, &merger, 100).run(&doc.pages, &items(&doc, 1), "en");
        assert_eq!(results[0].status, PageStatus::Degraded);
        assert_eq!(results[0].detections.len(), 1);
    }

    #[test]
    fn test_truncation_by_characters() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let factory = {
            let seen = seen.clone();
            move |_: &SlotId, _: &str| -> Result<DetectorSet> {
                Ok(vec![Box::new(WholePage { seen: seen.clone() }) as Box<dyn Detector>])
            }
        };
        let merger = Merger::default();
        let doc = Document::from_texts("d", ["Иван Петров"]);
        let results = PageScheduler::new(&factory, &merger, 4).run(&doc.pages, &items(&doc, 1), "bg");
        assert_eq!(seen.lock().unwrap()[0], "Иван");
        assert_eq!(results[0].detections[0].end, 4);
    }

    #[test]
    fn test_cancelled_before_dispatch() {
        let factory = |_: &SlotId, _: &str| -> Result<DetectorSet> { Ok(Vec::new()) };
        let merger = Merger::default();
        let token = CancellationToken::new();
        token.cancel();
        let doc = Document::from_texts("d", ["a", "b", "c"]);
        let results = PageScheduler::new(&factory, &merger, 100)
            .with_cancellation(token)
            .run(&doc.pages, &items(&doc, 2), "en");
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.status == PageStatus::Cancelled));
    }

    #[test]
    fn test_missing_work_item_is_degraded() {
        let factory = |_: &SlotId, _: &str| -> Result<DetectorSet> { Ok(Vec::new()) };
        let merger = Merger::default();
        let doc = Document::from_texts("d", ["a", "b"]);
        let mut work = items(&doc, 1);
        work.pop();
        let results = PageScheduler::new(&factory, &merger, 100).run(&doc.pages, &work, "en");
        assert_eq!(results[0].status, PageStatus::Complete);
        assert_eq!(results[1].status, PageStatus::Degraded);
    }
}
