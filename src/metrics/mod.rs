//! Retrieval and generation metrics.

mod generation;
mod retrieval;

pub use generation::{
    GenerationMetricsAggregator, GenerationScores, GenerationSummary, JudgeFailure, JudgeOutcome,
    ScoredCase,
};
pub use retrieval::{
    RetrievalMetrics, RetrievalMetricsAggregator, RetrievalSummary, calculate_retrieval_metrics,
    hit_at_k, precision_at_k, recall_at_k, reciprocal_rank,
};

/// Round to 4 decimal places, the precision used in every report.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round4() {
        assert_eq!(round4(1.0 / 3.0), 0.3333);
        assert_eq!(round4(2.0 / 3.0), 0.6667);
        assert_eq!(round4(0.5), 0.5);
    }
}
