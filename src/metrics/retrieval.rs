//! Ranked-retrieval metrics: Hit, Recall@K, Precision@K and reciprocal rank.
//!
//! All functions consider only the first `k` retrieved pages and treat the
//! expected pages as a set.

use crate::dataset::PageRef;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Per-case retrieval metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMetrics {
    pub hit: bool,
    pub recall_at_k: f64,
    pub precision_at_k: f64,
    pub reciprocal_rank: f64,
}

fn window(retrieved: &[PageRef], k: usize) -> &[PageRef] {
    &retrieved[..k.min(retrieved.len())]
}

/// Number of distinct expected pages found in the top-K window.
fn found_in_window(expected: &HashSet<PageRef>, retrieved: &[PageRef], k: usize) -> usize {
    let top_k: HashSet<&PageRef> = window(retrieved, k).iter().collect();
    expected.iter().filter(|p| top_k.contains(p)).count()
}

/// Hit: at least one expected page appears in the top-K window.
pub fn hit_at_k(expected: &[PageRef], retrieved: &[PageRef], k: usize) -> bool {
    window(retrieved, k).iter().any(|p| expected.contains(p))
}

/// Recall at K: |expected ∩ top-K| / |expected|.
/// Vacuously 1.0 when nothing is expected.
pub fn recall_at_k(expected: &[PageRef], retrieved: &[PageRef], k: usize) -> f64 {
    let expected: HashSet<PageRef> = expected.iter().copied().collect();
    if expected.is_empty() {
        return 1.0;
    }
    found_in_window(&expected, retrieved, k) as f64 / expected.len() as f64
}

/// Precision at K: |expected ∩ top-K| / K. If k is 0, returns 0.0.
pub fn precision_at_k(expected: &[PageRef], retrieved: &[PageRef], k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    let expected: HashSet<PageRef> = expected.iter().copied().collect();
    found_in_window(&expected, retrieved, k) as f64 / k as f64
}

/// 1 / rank of the first expected page in the top-K window (ranks are 1-based),
/// or 0.0 if none is present.
pub fn reciprocal_rank(expected: &[PageRef], retrieved: &[PageRef], k: usize) -> f64 {
    window(retrieved, k)
        .iter()
        .position(|p| expected.contains(p))
        .map(|idx| 1.0 / (idx + 1) as f64)
        .unwrap_or(0.0)
}

/// Compute all four metrics for one case.
pub fn calculate_retrieval_metrics(
    expected: &[PageRef],
    retrieved: &[PageRef],
    k: usize,
) -> RetrievalMetrics {
    RetrievalMetrics {
        hit: hit_at_k(expected, retrieved, k),
        recall_at_k: recall_at_k(expected, retrieved, k),
        precision_at_k: precision_at_k(expected, retrieved, k),
        reciprocal_rank: reciprocal_rank(expected, retrieved, k),
    }
}

/// Dataset-level retrieval summary.
///
/// Means cover only cases that have ground-truth pages; they are `None` when
/// no such case exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalSummary {
    /// Cases that contributed to the means.
    pub graded_cases: usize,
    /// Cases whose retrieval was measured at all.
    pub measured_cases: usize,
    pub hit_rate: Option<f64>,
    pub mean_recall_at_k: Option<f64>,
    pub mean_precision_at_k: Option<f64>,
    pub mrr: Option<f64>,
    /// graded_cases / measured_cases.
    pub retrieval_coverage: Option<f64>,
}

/// Accumulates per-case retrieval metrics.
#[derive(Debug, Default)]
pub struct RetrievalMetricsAggregator {
    graded: Vec<RetrievalMetrics>,
    measured: usize,
}

impl RetrievalMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one case. Cases without expected pages count towards coverage only.
    pub fn add(&mut self, has_expected_pages: bool, metrics: RetrievalMetrics) {
        self.measured += 1;
        if has_expected_pages {
            self.graded.push(metrics);
        }
    }

    pub fn len(&self) -> usize {
        self.measured
    }

    pub fn is_empty(&self) -> bool {
        self.measured == 0
    }

    fn mean_of(&self, f: impl Fn(&RetrievalMetrics) -> f64) -> Option<f64> {
        if self.graded.is_empty() {
            return None;
        }
        Some(self.graded.iter().map(f).sum::<f64>() / self.graded.len() as f64)
    }

    pub fn summary(&self) -> RetrievalSummary {
        let n = self.graded.len();

        RetrievalSummary {
            graded_cases: n,
            measured_cases: self.measured,
            hit_rate: self.mean_of(|m| if m.hit { 1.0 } else { 0.0 }),
            mean_recall_at_k: self.mean_of(|m| m.recall_at_k),
            mean_precision_at_k: self.mean_of(|m| m.precision_at_k),
            mrr: self.mean_of(|m| m.reciprocal_rank),
            retrieval_coverage: if self.measured == 0 {
                None
            } else {
                Some(n as f64 / self.measured as f64)
            },
        }
    }
}
