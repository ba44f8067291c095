//! Fusion of spans reported by several detectors for one page.
//!
//! The merger is a pure function of its input set: the same spans in any
//! order produce the same output, and merging an already merged list changes
//! nothing.
//!
//! # Strategies
//!
//! - [`MergeStrategy::Exact`]: spans sharing the exact `(start, end)` interval
//!   collapse into one. Overlapping spans with different boundaries are all
//!   kept, so an output may contain e.g. both `Jane` and `Jane Doe`.
//! - [`MergeStrategy::Overlap`]: every cluster of transitively overlapping
//!   spans collapses into its best member.
//!
//! # Winner selection
//!
//! 1. Highest score
//! 2. Detector source earlier in the priority list (unlisted sources last)
//! 3. Label name, then source name, then position, so that equal candidates
//!    still resolve the same way regardless of input order

use crate::config::{MergeStrategy, PipelineConfig};
use crate::span::Span;
use crate::utils::safe_float_cmp;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Span merger configured with a detector priority order.
#[derive(Debug, Clone, PartialEq)]
pub struct Merger {
    priority: Vec<String>,
    strategy: MergeStrategy,
    min_score: f32,
}

impl Default for Merger {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl Merger {
    /// Create an exact-boundary merger with the given source priority
    /// (highest first).
    pub fn new<I, S>(priority: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            priority: priority.into_iter().map(Into::into).collect(),
            strategy: MergeStrategy::Exact,
            min_score: 0.0,
        }
    }

    /// Create a merger from the pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.detector_priority.iter().cloned())
            .with_strategy(config.merge_strategy)
            .with_min_score(config.min_score)
    }

    /// Set the merge strategy.
    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Drop spans scoring below `min_score` before merging.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Active strategy.
    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Merge spans into a deduplicated list ordered by `(start, end)`.
    pub fn merge(&self, spans: Vec<Span>) -> Vec<Span> {
        let spans: Vec<Span> = spans
            .into_iter()
            .filter(|s| s.score >= self.min_score)
            .collect();

        let mut merged = match self.strategy {
            MergeStrategy::Exact => self.merge_exact(spans),
            MergeStrategy::Overlap => self.merge_overlapping(spans),
        };
        merged.sort_by(|a, b| position_cmp(a, b).then_with(|| self.preference(a, b)));
        merged
    }

    fn merge_exact(&self, spans: Vec<Span>) -> Vec<Span> {
        let mut best: BTreeMap<(usize, usize), Span> = BTreeMap::new();
        for span in spans {
            match best.get_mut(&(span.start, span.end)) {
                Some(current) => {
                    if self.preference(&span, current) == Ordering::Less {
                        *current = span;
                    }
                },
                None => {
                    best.insert((span.start, span.end), span);
                },
            }
        }
        best.into_values().collect()
    }

    fn merge_overlapping(&self, mut spans: Vec<Span>) -> Vec<Span> {
        spans.sort_by(|a, b| position_cmp(a, b).then_with(|| self.preference(a, b)));

        let mut merged = Vec::new();
        let mut iter = spans.into_iter();
        let Some(first) = iter.next() else {
            return merged;
        };
        let mut cluster_end = first.end;
        let mut winner = first;

        for span in iter {
            if span.start < cluster_end {
                cluster_end = cluster_end.max(span.end);
                if self.preference(&span, &winner) == Ordering::Less {
                    winner = span;
                }
            } else {
                merged.push(winner);
                cluster_end = span.end;
                winner = span;
            }
        }
        merged.push(winner);
        merged
    }

    /// Rank of a detector source; lower is preferred.
    fn source_rank(&self, source: &str) -> usize {
        self.priority
            .iter()
            .position(|p| p == source)
            .unwrap_or(self.priority.len())
    }

    /// Total preference order: `Less` means `a` wins over `b`.
    fn preference(&self, a: &Span, b: &Span) -> Ordering {
        safe_float_cmp(b.score, a.score)
            .then_with(|| self.source_rank(&a.source).cmp(&self.source_rank(&b.source)))
            .then_with(|| a.label.as_str().cmp(b.label.as_str()))
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| position_cmp(a, b))
            .then_with(|| a.text_value.cmp(&b.text_value))
    }
}

fn position_cmp(a: &Span, b: &Span) -> Ordering {
    a.start.cmp(&b.start).then(a.end.cmp(&b.end))
}
