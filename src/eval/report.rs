//! Per-control score records, exclusions, and per-method aggregates.

use crate::eval::metrics::{precision_at_k, recall_at_k, reciprocal_rank, UndefinedMetric, PRECISION_K, RECALL_K};
use crate::retrieval::{Method, RankedResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Why a control contributes no value to a metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    NoRelevantChunks,
    NoResults,
    EmbeddingUnavailable { message: String },
}

impl ExclusionReason {
    pub fn kind(&self) -> &'static str {
        match self {
            ExclusionReason::NoRelevantChunks => "no_relevant_chunks",
            ExclusionReason::NoResults => "no_results",
            ExclusionReason::EmbeddingUnavailable { .. } => "embedding_unavailable",
        }
    }
}

impl From<UndefinedMetric> for ExclusionReason {
    fn from(undefined: UndefinedMetric) -> Self {
        match undefined {
            UndefinedMetric::NoRelevantChunks => ExclusionReason::NoRelevantChunks,
            UndefinedMetric::NoResults => ExclusionReason::NoResults,
        }
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::NoRelevantChunks => f.write_str("no relevant chunks"),
            ExclusionReason::NoResults => f.write_str("no results"),
            ExclusionReason::EmbeddingUnavailable { message } => {
                write!(f, "embedding unavailable: {}", message)
            }
        }
    }
}

/// A metric value, or the reason it is excluded from aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    Value(f64),
    Excluded(ExclusionReason),
}

impl MetricValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            MetricValue::Value(v) => Some(*v),
            MetricValue::Excluded(_) => None,
        }
    }
}

impl From<Result<f64, UndefinedMetric>> for MetricValue {
    fn from(outcome: Result<f64, UndefinedMetric>) -> Self {
        match outcome {
            Ok(v) => MetricValue::Value(v),
            Err(undefined) => MetricValue::Excluded(undefined.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    PrecisionAt5,
    RecallAt10,
    Mrr,
}

/// Scores of one method on one control.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRecord {
    pub control_id: String,
    pub method: Method,
    pub precision_at_5: MetricValue,
    pub recall_at_10: MetricValue,
    pub mrr: MetricValue,
}

impl ScoreRecord {
    /// Score a ranking against the control's relevant chunk ids.
    pub fn score(ranked: &RankedResult, relevant: &BTreeSet<String>) -> Self {
        Self {
            control_id: ranked.control_id.clone(),
            method: ranked.method,
            precision_at_5: precision_at_k(&ranked.entries, relevant, PRECISION_K).into(),
            recall_at_10: recall_at_k(&ranked.entries, relevant, RECALL_K).into(),
            mrr: reciprocal_rank(&ranked.entries, relevant).into(),
        }
    }

    pub fn metric(&self, metric: Metric) -> &MetricValue {
        match metric {
            Metric::PrecisionAt5 => &self.precision_at_5,
            Metric::RecallAt10 => &self.recall_at_10,
            Metric::Mrr => &self.mrr,
        }
    }
}

/// A method that could not run for a control; all of its metrics are excluded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnavailableRecord {
    pub control_id: String,
    pub method: Method,
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MethodOutcome {
    Scored(ScoreRecord),
    Unavailable(UnavailableRecord),
}

impl MethodOutcome {
    pub fn method(&self) -> Method {
        match self {
            MethodOutcome::Scored(r) => r.method,
            MethodOutcome::Unavailable(u) => u.method,
        }
    }
}

/// Mean of one metric over the controls where it is defined.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSummary {
    /// None when no control has a defined value
    pub mean: Option<f64>,
    pub defined: usize,
    pub excluded: usize,
    /// Excluded controls by reason kind
    pub exclusions: BTreeMap<&'static str, usize>,
    #[serde(skip)]
    sum: f64,
}

impl MetricSummary {
    fn add(&mut self, value: &MetricValue) {
        match value {
            MetricValue::Value(v) => {
                self.sum += v;
                self.defined += 1;
                self.mean = Some(self.sum / self.defined as f64);
            }
            MetricValue::Excluded(reason) => self.exclude(reason),
        }
    }

    fn exclude(&mut self, reason: &ExclusionReason) {
        self.excluded += 1;
        *self.exclusions.entry(reason.kind()).or_insert(0) += 1;
    }
}

/// Aggregate statistics of one method, as handed to a report sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodSummary {
    pub method: Method,
    pub controls: usize,
    pub precision_at_5: MetricSummary,
    pub recall_at_10: MetricSummary,
    pub mrr: MetricSummary,
}

impl MethodSummary {
    fn new(method: Method) -> Self {
        Self {
            method,
            controls: 0,
            precision_at_5: MetricSummary::default(),
            recall_at_10: MetricSummary::default(),
            mrr: MetricSummary::default(),
        }
    }

    fn add(&mut self, outcome: &MethodOutcome) {
        self.controls += 1;
        match outcome {
            MethodOutcome::Scored(record) => {
                self.precision_at_5.add(&record.precision_at_5);
                self.recall_at_10.add(&record.recall_at_10);
                self.mrr.add(&record.mrr);
            }
            MethodOutcome::Unavailable(unavailable) => {
                self.precision_at_5.exclude(&unavailable.reason);
                self.recall_at_10.exclude(&unavailable.reason);
                self.mrr.exclude(&unavailable.reason);
            }
        }
    }

    pub fn metric(&self, metric: Metric) -> &MetricSummary {
        match metric {
            Metric::PrecisionAt5 => &self.precision_at_5,
            Metric::RecallAt10 => &self.recall_at_10,
            Metric::Mrr => &self.mrr,
        }
    }
}

/// Minimum means a run must reach; unset fields are not checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Thresholds {
    #[serde(default)]
    pub min_precision: Option<f64>,
    #[serde(default)]
    pub min_recall: Option<f64>,
    #[serde(default)]
    pub min_mrr: Option<f64>,
}

/// Result of one evaluation run.
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub generated_at: DateTime<Utc>,
    pub embedding_model: Option<String>,
    /// Number of judged controls evaluated
    pub controls: usize,
    /// Corpus controls without a relevance judgment; never scored
    pub unjudged: Vec<String>,
    pub records: Vec<ScoreRecord>,
    pub unavailable: Vec<UnavailableRecord>,
    pub summaries: BTreeMap<Method, MethodSummary>,
}

impl EvalReport {
    /// Aggregate outcomes (already in control order) for `methods`.
    pub fn from_outcomes(
        outcomes: Vec<MethodOutcome>,
        methods: &[Method],
        controls: usize,
        embedding_model: Option<String>,
    ) -> Self {
        let mut summaries: BTreeMap<Method, MethodSummary> = methods
            .iter()
            .map(|&m| (m, MethodSummary::new(m)))
            .collect();
        let mut records = Vec::new();
        let mut unavailable = Vec::new();

        for outcome in outcomes {
            let Some(summary) = summaries.get_mut(&outcome.method()) else {
                continue;
            };
            summary.add(&outcome);
            match outcome {
                MethodOutcome::Scored(record) => records.push(record),
                MethodOutcome::Unavailable(u) => unavailable.push(u),
            }
        }

        Self {
            generated_at: Utc::now(),
            embedding_model,
            controls,
            unjudged: Vec::new(),
            records,
            unavailable,
            summaries,
        }
    }

    pub fn summary(&self, method: Method) -> Option<&MethodSummary> {
        self.summaries.get(&method)
    }

    pub fn record(&self, control_id: &str, method: Method) -> Option<&ScoreRecord> {
        self.records
            .iter()
            .find(|r| r.control_id == control_id && r.method == method)
    }

    /// Threshold violations, one message per failing (method, metric).
    pub fn check(&self, thresholds: &Thresholds) -> Vec<String> {
        let checks = [
            (Metric::PrecisionAt5, "Precision@5", thresholds.min_precision),
            (Metric::RecallAt10, "Recall@10", thresholds.min_recall),
            (Metric::Mrr, "MRR", thresholds.min_mrr),
        ];

        let mut failures = Vec::new();
        for summary in self.summaries.values() {
            for (metric, label, min) in checks {
                let Some(min) = min else { continue };
                match summary.metric(metric).mean {
                    Some(mean) if mean >= min => {}
                    Some(mean) => failures.push(format!(
                        "{} {} {:.3} < {:.3}",
                        summary.method, label, mean, min
                    )),
                    None => failures.push(format!(
                        "{} {} undefined for every control",
                        summary.method, label
                    )),
                }
            }
        }
        failures
    }
}
