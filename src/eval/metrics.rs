//! Ranking metrics: Precision@K, Recall@K and reciprocal rank.
//!
//! Degenerate inputs do not produce a number. They return an
//! [`UndefinedMetric`] which the scorer turns into an exclusion.

use crate::retrieval::RankedChunk;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Cutoff for precision
pub const PRECISION_K: usize = 5;
/// Cutoff for recall
pub const RECALL_K: usize = 10;

/// Why a metric has no value for a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedMetric {
    /// The control has no relevant chunks
    NoRelevantChunks,
    /// The method returned nothing to score
    NoResults,
}

impl fmt::Display for UndefinedMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UndefinedMetric::NoRelevantChunks => f.write_str("no relevant chunks"),
            UndefinedMetric::NoResults => f.write_str("no results"),
        }
    }
}

fn hits(top: &[RankedChunk], relevant: &BTreeSet<String>) -> usize {
    top.iter().filter(|r| relevant.contains(&r.chunk_id)).count()
}

/// Precision at K: relevant results in the top K over the number of results
/// actually returned in the top K.
///
/// A ranking shorter than K is not penalised for its missing slots: three
/// results with one hit scores 1/3. An empty ranking is undefined.
pub fn precision_at_k(
    results: &[RankedChunk],
    relevant: &BTreeSet<String>,
    k: usize,
) -> Result<f64, UndefinedMetric> {
    let top = &results[..results.len().min(k)];
    if top.is_empty() {
        return Err(UndefinedMetric::NoResults);
    }
    Ok(hits(top, relevant) as f64 / top.len() as f64)
}

/// Recall at K: relevant results in the top K over all relevant chunks.
/// Undefined when the control has no relevant chunks.
pub fn recall_at_k(
    results: &[RankedChunk],
    relevant: &BTreeSet<String>,
    k: usize,
) -> Result<f64, UndefinedMetric> {
    if relevant.is_empty() {
        return Err(UndefinedMetric::NoRelevantChunks);
    }
    let top = &results[..results.len().min(k)];
    Ok(hits(top, relevant) as f64 / relevant.len() as f64)
}

/// Reciprocal rank of the first relevant result (1-indexed), anywhere in the
/// ranking; 0.0 when none is relevant.
///
/// Undefined when there is nothing relevant, and distinctly undefined when
/// the method returned nothing at all.
pub fn reciprocal_rank(
    results: &[RankedChunk],
    relevant: &BTreeSet<String>,
) -> Result<f64, UndefinedMetric> {
    if relevant.is_empty() {
        return Err(UndefinedMetric::NoRelevantChunks);
    }
    if results.is_empty() {
        return Err(UndefinedMetric::NoResults);
    }
    Ok(results
        .iter()
        .position(|r| relevant.contains(&r.chunk_id))
        .map(|idx| 1.0 / (idx + 1) as f64)
        .unwrap_or(0.0))
}
