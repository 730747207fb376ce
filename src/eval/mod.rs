//! Evaluation: metrics (P@5, R@10, MRR), score records with exclusions,
//! per-method aggregation, and the pipeline driving it all.

pub mod harness;
pub mod metrics;
pub mod report;

pub use harness::EvalHarness;
pub use metrics::{precision_at_k, recall_at_k, reciprocal_rank, UndefinedMetric, PRECISION_K, RECALL_K};
pub use report::{
    EvalReport, ExclusionReason, Metric, MethodOutcome, MethodSummary, MetricSummary, MetricValue,
    ScoreRecord, Thresholds, UnavailableRecord,
};
