//! Hybrid retrieval: union of the keyword and embedding rankings.
//!
//! The default [`HybridRule::BestRank`] merge law:
//!
//! 1. ids ranked by both sources come before ids ranked by only one;
//! 2. within a tier, ids are ordered by their best (lowest) position in
//!    either source;
//! 3. remaining ties are broken by ascending chunk id.
//!
//! [`HybridRule::ReciprocalRankFusion`] is available as an alternative:
//!
//! ```text
//! RRF_score(d) = Σ weight_i / (K + rank_i(d))
//! ```
//!
//! with rank_i 1-indexed, ties again broken by ascending chunk id.

use crate::corpus::{Control, EvidenceChunk};
use crate::error::{HarnessError, Result};
use crate::retrieval::{rank_scored, Method, RankedChunk, RankedResult, Retriever};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default RRF constant (Cormack et al., 2009)
pub const DEFAULT_RRF_K: f32 = 60.0;

/// Combination rule for the union of the two source rankings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HybridRule {
    BestRank,
    ReciprocalRankFusion {
        k: f32,
        keyword_weight: f32,
        embedding_weight: f32,
    },
}

impl Default for HybridRule {
    fn default() -> Self {
        HybridRule::BestRank
    }
}

/// Positions of one id in the two sources (0-indexed).
#[derive(Default)]
struct Sources {
    keyword: Option<usize>,
    embedding: Option<usize>,
}

impl Sources {
    fn count(&self) -> usize {
        usize::from(self.keyword.is_some()) + usize::from(self.embedding.is_some())
    }

    fn best(&self) -> usize {
        match (self.keyword, self.embedding) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => usize::MAX,
        }
    }
}

/// Merge the keyword and embedding rankings of the same control.
pub fn merge(keyword: &RankedResult, embedding: &RankedResult, rule: HybridRule) -> Result<RankedResult> {
    if keyword.control_id != embedding.control_id {
        return Err(HarnessError::InvalidInput(format!(
            "cannot merge rankings of different controls: {} and {}",
            keyword.control_id, embedding.control_id
        )));
    }

    let mut sources: BTreeMap<&str, Sources> = BTreeMap::new();
    for (pos, entry) in keyword.entries.iter().enumerate() {
        sources
            .entry(entry.chunk_id.as_str())
            .or_default()
            .keyword
            .get_or_insert(pos);
    }
    for (pos, entry) in embedding.entries.iter().enumerate() {
        sources
            .entry(entry.chunk_id.as_str())
            .or_default()
            .embedding
            .get_or_insert(pos);
    }

    let merged = match rule {
        HybridRule::BestRank => merge_best_rank(&keyword.control_id, sources),
        HybridRule::ReciprocalRankFusion {
            k,
            keyword_weight,
            embedding_weight,
        } => {
            let scored = sources
                .into_iter()
                .map(|(id, src)| {
                    let rrf = |pos: Option<usize>, weight: f32| {
                        pos.map(|p| weight / (k + (p + 1) as f32)).unwrap_or(0.0)
                    };
                    let score = rrf(src.keyword, keyword_weight) + rrf(src.embedding, embedding_weight);
                    (score, id.to_string())
                })
                .collect();
            rank_scored(&keyword.control_id, Method::Hybrid, scored)
        }
    };

    Ok(merged)
}

fn merge_best_rank(control_id: &str, sources: BTreeMap<&str, Sources>) -> RankedResult {
    let mut ordered: Vec<(&str, Sources)> = sources.into_iter().collect();
    ordered.sort_by(|(id_a, a), (id_b, b)| {
        b.count()
            .cmp(&a.count())
            .then_with(|| a.best().cmp(&b.best()))
            .then_with(|| id_a.cmp(id_b))
    });

    let entries = ordered
        .into_iter()
        .enumerate()
        .map(|(idx, (id, src))| RankedChunk {
            chunk_id: id.to_string(),
            // informational only: source count plus reciprocal best rank
            score: src.count() as f32 + 1.0 / (src.best() + 1) as f32,
            rank: idx + 1,
        })
        .collect();

    RankedResult {
        control_id: control_id.to_string(),
        method: Method::Hybrid,
        entries,
    }
}

/// Runs both source retrievers and merges their rankings.
pub struct HybridRetriever {
    keyword: Arc<dyn Retriever>,
    embedding: Arc<dyn Retriever>,
    rule: HybridRule,
}

impl HybridRetriever {
    pub fn new(keyword: Arc<dyn Retriever>, embedding: Arc<dyn Retriever>, rule: HybridRule) -> Self {
        Self {
            keyword,
            embedding,
            rule,
        }
    }
}

#[async_trait]
impl Retriever for HybridRetriever {
    fn method(&self) -> Method {
        Method::Hybrid
    }

    async fn rank(&self, control: &Control, pool: &[EvidenceChunk]) -> Result<RankedResult> {
        let keyword = self.keyword.rank(control, pool).await?;
        let embedding = self.embedding.rank(control, pool).await?;
        merge(&keyword, &embedding, self.rule)
    }
}
