//! Retrieval methods ranking a control's evidence pool.
//!
//! Every method implements [`Retriever`]; all of them order by descending
//! score and break exact ties by ascending chunk id, so a ranking is a pure
//! function of its inputs.

pub mod embedding;
pub mod hybrid;
pub mod keyword;

pub use embedding::EmbeddingRetriever;
pub use hybrid::{HybridRetriever, HybridRule, DEFAULT_RRF_K};
pub use keyword::{KeywordRetriever, TfIdfIndex};

use crate::corpus::{Control, EvidenceChunk};
use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Retrieval method under evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[serde(alias = "tfidf")]
    Keyword,
    Embedding,
    Hybrid,
}

impl Method {
    pub const ALL: [Method; 3] = [Method::Keyword, Method::Embedding, Method::Hybrid];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Keyword => "keyword",
            Method::Embedding => "embedding",
            Method::Hybrid => "hybrid",
        }
    }

    /// Whether the method needs the embedding capability.
    pub fn uses_embeddings(&self) -> bool {
        !matches!(self, Method::Keyword)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyword" | "tfidf" => Ok(Method::Keyword),
            "embedding" => Ok(Method::Embedding),
            "hybrid" => Ok(Method::Hybrid),
            other => Err(HarnessError::InvalidInput(format!(
                "unknown retrieval method: {}",
                other
            ))),
        }
    }
}

/// One entry of a ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedChunk {
    pub chunk_id: String,
    pub score: f32,
    /// 1-indexed position
    pub rank: usize,
}

/// Ordered chunk ids for one (control, method) pair. Ids are unique and all
/// belong to `control_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub control_id: String,
    pub method: Method,
    pub entries: Vec<RankedChunk>,
}

impl RankedResult {
    pub fn empty(control_id: &str, method: Method) -> Self {
        Self {
            control_id: control_id.to_string(),
            method,
            entries: Vec::new(),
        }
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.chunk_id.as_str()).collect()
    }

    /// 0-indexed position of `chunk_id`, if ranked.
    pub fn position(&self, chunk_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.chunk_id == chunk_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Capability interface shared by the three retrieval methods.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn method(&self) -> Method;

    /// Rank `pool` against `control`. An empty pool yields an empty result.
    async fn rank(&self, control: &Control, pool: &[EvidenceChunk]) -> Result<RankedResult>;
}

/// Chunks of `pool` owned by `control`, first occurrence of each id only.
pub(crate) fn own_chunks<'a>(control: &Control, pool: &'a [EvidenceChunk]) -> Vec<&'a EvidenceChunk> {
    let mut seen = HashSet::new();
    pool.iter()
        .filter(|chunk| {
            if chunk.control_id != control.id {
                log::warn!(
                    "Skipping chunk {} of control {} in pool of {}",
                    chunk.id,
                    chunk.control_id,
                    control.id
                );
                return false;
            }
            seen.insert(chunk.id.as_str())
        })
        .collect()
}

/// Sort scored chunk ids by descending score, ascending id on exact ties,
/// and assign 1-indexed ranks.
pub(crate) fn rank_scored(control_id: &str, method: Method, mut scored: Vec<(f32, String)>) -> RankedResult {
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    let entries = scored
        .into_iter()
        .enumerate()
        .map(|(idx, (score, chunk_id))| RankedChunk {
            chunk_id,
            score,
            rank: idx + 1,
        })
        .collect();

    RankedResult {
        control_id: control_id.to_string(),
        method,
        entries,
    }
}

/// Cosine similarity of two dense vectors of equal length.
///
/// Returns 0.0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "cosine similarity over mismatched dimensions");

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_scored_breaks_ties_by_id() {
        let ranked = rank_scored(
            "C1",
            Method::Keyword,
            vec![
                (0.5, "c".to_string()),
                (0.9, "b".to_string()),
                (0.5, "a".to_string()),
                (0.0, "d".to_string()),
            ],
        );
        assert_eq!(ranked.ids(), vec!["b", "a", "c", "d"]);
        assert_eq!(ranked.entries[0].rank, 1);
        assert_eq!(ranked.entries[3].rank, 4);
        assert_eq!(ranked.position("c"), Some(2));
    }

    #[test]
    fn test_own_chunks_filters_foreign_and_duplicate_ids() {
        let control = Control::new("C1");
        let pool = vec![
            EvidenceChunk { id: "a".into(), control_id: "C1".into(), text: String::new() },
            EvidenceChunk { id: "x".into(), control_id: "C2".into(), text: String::new() },
            EvidenceChunk { id: "a".into(), control_id: "C1".into(), text: String::new() },
        ];
        let own: Vec<&str> = own_chunks(&control, &pool).iter().map(|c| c.id.as_str()).collect();
        assert_eq!(own, vec!["a"]);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let similarity = cosine_similarity(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]);
        assert!((similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_magnitude() {
        let similarity = cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0]);
        assert_eq!(similarity, 0.0);
        assert!(!similarity.is_nan());
    }

    #[test]
    fn test_cosine_similarity_magnitude_independent() {
        let similarity = cosine_similarity(&[1.0, 0.0, 0.0], &[2.0, 0.0, 0.0]);
        assert!((similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_method_parse_and_display() {
        assert_eq!("Hybrid".parse::<Method>().unwrap(), Method::Hybrid);
        assert_eq!(Method::Embedding.to_string(), "embedding");
        assert!("bm25".parse::<Method>().is_err());
        assert!(!Method::Keyword.uses_embeddings());
        assert!(Method::Hybrid.uses_embeddings());
    }

    #[test]
    fn test_config_names_match_cli_names() {
        for name in ["keyword", "tfidf", "embedding", "hybrid"] {
            let parsed: Method = name.parse().unwrap();
            let from_config: Method = serde_json::from_str(&format!("\"{}\"", name)).unwrap();
            assert_eq!(parsed, from_config, "{}", name);
        }
        assert_eq!(serde_json::to_string(&Method::Keyword).unwrap(), "\"keyword\"");
    }
}
