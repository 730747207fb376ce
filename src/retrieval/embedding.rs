//! Dense-embedding retrieval.
//!
//! Owns only similarity ranking; inference is delegated to an [`Embedder`].
//! Embeddings go through a run-scoped [`EmbeddingCache`] keyed by exact text.

use crate::cache::EmbeddingCache;
use crate::corpus::{Control, EvidenceChunk};
use crate::embeddings::Embedder;
use crate::error::{HarnessError, Result};
use crate::retrieval::{cosine_similarity, own_chunks, rank_scored, Method, RankedResult, Retriever};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct EmbeddingRetriever {
    embedder: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
}

impl EmbeddingRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, cache: Arc<EmbeddingCache>) -> Self {
        Self { embedder, cache }
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Embed `texts`, serving repeats from the cache and sending every miss
    /// in a single batch call. Output order matches `texts`.
    async fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut resolved: HashMap<&str, Vec<f32>> = HashMap::with_capacity(texts.len());
        let mut seen: HashSet<&str> = HashSet::with_capacity(texts.len());
        let mut misses: Vec<&str> = Vec::new();

        for &text in texts {
            if !seen.insert(text) {
                continue;
            }
            match self.cache.get(text) {
                Some(vector) => {
                    resolved.insert(text, vector);
                }
                None => misses.push(text),
            }
        }

        if !misses.is_empty() {
            let batch: Vec<String> = misses.iter().map(|t| t.to_string()).collect();
            let vectors = self.embedder.embed_batch(&batch).await?;
            if vectors.len() != batch.len() {
                return Err(HarnessError::EmbeddingUnavailable(format!(
                    "{} returned {} embeddings for {} texts",
                    self.embedder.model(),
                    vectors.len(),
                    batch.len()
                )));
            }
            for (text, vector) in misses.into_iter().zip(vectors) {
                self.cache.put(text.to_string(), vector.clone());
                resolved.insert(text, vector);
            }
        }

        texts
            .iter()
            .map(|text| {
                resolved.get(text).cloned().ok_or_else(|| {
                    HarnessError::EmbeddingUnavailable(format!("no embedding for text {:?}", text))
                })
            })
            .collect()
    }
}

/// All vectors must be non-empty and share one dimension.
fn check_dimensions(vectors: &[Vec<f32>]) -> Result<()> {
    let expected = vectors.first().map(Vec::len).unwrap_or(0);
    if expected == 0 {
        return Err(HarnessError::EmbeddingUnavailable(
            "embedding capability returned an empty vector".to_string(),
        ));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        return Err(HarnessError::EmbeddingUnavailable(format!(
            "inconsistent embedding dimension: expected {}, got {}",
            expected,
            bad.len()
        )));
    }
    Ok(())
}

#[async_trait]
impl Retriever for EmbeddingRetriever {
    fn method(&self) -> Method {
        Method::Embedding
    }

    async fn rank(&self, control: &Control, pool: &[EvidenceChunk]) -> Result<RankedResult> {
        let chunks = own_chunks(control, pool);
        if chunks.is_empty() {
            return Ok(RankedResult::empty(&control.id, Method::Embedding));
        }

        let start = std::time::Instant::now();
        let query = control.query_text();
        let texts: Vec<&str> = std::iter::once(query.as_str())
            .chain(chunks.iter().map(|c| c.text.as_str()))
            .collect();

        let vectors = self.embed_texts(&texts).await?;
        check_dimensions(&vectors)?;

        let (query_vec, chunk_vecs) = vectors.split_at(1);
        let scored = chunks
            .iter()
            .zip(chunk_vecs)
            .map(|(chunk, vector)| (cosine_similarity(&query_vec[0], vector), chunk.id.clone()))
            .collect();

        log::debug!(
            "Embedding ranking for {} ({} chunks) took {:?}",
            control.id,
            chunks.len(),
            start.elapsed()
        );

        Ok(rank_scored(&control.id, Method::Embedding, scored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{ChunkRecord, CorpusStore};
    use crate::test_utils::{FixedEmbedder, HashingEmbedder};

    fn corpus() -> CorpusStore {
        let control = Control {
            id: "CC8.1".to_string(),
            title: Some("pull request review".to_string()),
            ..Default::default()
        };
        CorpusStore::from_records(
            vec![control],
            vec![
                ChunkRecord::new("CC8.1", "p3", "deploy log"),
                ChunkRecord::new("CC8.1", "p1", "pull request review approved"),
                ChunkRecord::new("CC8.1", "p2", "review"),
                ChunkRecord::new("CC8.1", "p4", "deploy log"),
            ],
        )
        .unwrap()
    }

    fn retriever(embedder: Arc<dyn Embedder>) -> EmbeddingRetriever {
        EmbeddingRetriever::new(embedder, Arc::new(EmbeddingCache::new()))
    }

    #[tokio::test]
    async fn test_rank_by_cosine_with_id_tiebreak() {
        let store = corpus();
        let retriever = retriever(Arc::new(HashingEmbedder::new()));
        let control = store.control("CC8.1").unwrap();
        let ranked = retriever.rank(control, store.pool("CC8.1")).await.unwrap();

        assert_eq!(ranked.method, Method::Embedding);
        assert_eq!(ranked.entries[0].chunk_id, "p1");
        // identical texts score identically: ascending id
        let p3 = ranked.position("p3").unwrap();
        let p4 = ranked.position("p4").unwrap();
        assert!(p3 < p4);
        assert_eq!(ranked.entries[p3].score, ranked.entries[p4].score);
    }

    #[tokio::test]
    async fn test_repeated_text_embedded_once_and_cached() {
        let store = corpus();
        let embedder = Arc::new(HashingEmbedder::new());
        let retriever = retriever(embedder.clone());
        let control = store.control("CC8.1").unwrap();

        let first = retriever.rank(control, store.pool("CC8.1")).await.unwrap();
        // query + 3 distinct chunk texts in one batch
        assert_eq!(embedder.batch_calls(), 1);
        assert_eq!(embedder.texts_embedded(), 4);
        assert_eq!(retriever.cache().len(), 4);

        let second = retriever.rank(control, store.pool("CC8.1")).await.unwrap();
        assert_eq!(embedder.batch_calls(), 1, "second run served from cache");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_many_duplicate_texts_sent_once() {
        let control = Control::new("CC7.2");
        let mut records = Vec::new();
        for i in 0..500 {
            let text = format!("alert {}", i % 10);
            records.push(ChunkRecord::new("CC7.2", &format!("c{:03}", i), &text));
        }
        let store = CorpusStore::from_records(vec![control], records).unwrap();
        let embedder = Arc::new(HashingEmbedder::new());
        let retriever = retriever(embedder.clone());
        let control = store.control("CC7.2").unwrap();

        let ranked = retriever.rank(control, store.pool("CC7.2")).await.unwrap();
        assert_eq!(ranked.len(), 500);
        assert_eq!(embedder.batch_calls(), 1);
        // query + 10 distinct chunk texts
        assert_eq!(embedder.texts_embedded(), 11);
    }

    #[tokio::test]
    async fn test_empty_pool_skips_embedder() {
        let embedder = Arc::new(HashingEmbedder::new());
        let retriever = retriever(embedder.clone());
        let ranked = retriever.rank(&Control::new("CC1.1"), &[]).await.unwrap();
        assert!(ranked.is_empty());
        assert_eq!(embedder.batch_calls(), 0);
    }

    #[tokio::test]
    async fn test_embedder_failure_propagates() {
        let store = corpus();
        let retriever = retriever(Arc::new(HashingEmbedder::failing_on("deploy")));
        let control = store.control("CC8.1").unwrap();
        let err = retriever.rank(control, store.pool("CC8.1")).await.unwrap_err();
        assert!(matches!(err, HarnessError::EmbeddingUnavailable(_)));
        assert!(retriever.cache().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_vector_count_is_unavailable() {
        let store = corpus();
        let retriever = retriever(Arc::new(FixedEmbedder(vec![vec![1.0, 0.0]])));
        let control = store.control("CC8.1").unwrap();
        let err = retriever.rank(control, store.pool("CC8.1")).await.unwrap_err();
        assert!(matches!(err, HarnessError::EmbeddingUnavailable(_)));
    }

    #[test]
    fn test_check_dimensions() {
        assert!(check_dimensions(&[vec![1.0, 2.0], vec![0.0, 0.0]]).is_ok());
        assert!(check_dimensions(&[vec![1.0, 2.0], vec![0.0]]).is_err());
        assert!(check_dimensions(&[vec![], vec![]]).is_err());
    }
}
