//! Wiring from a [`Config`] to loaded stores, retrievers and the harness.

use crate::cache::EmbeddingCache;
use crate::config::{Config, EmbeddingsConfig};
use crate::corpus::{CorpusStore, LabelSet};
use crate::embeddings::{Embedder, OpenAIEmbedder};
use crate::eval::EvalHarness;
use crate::retrieval::{EmbeddingRetriever, HybridRetriever, KeywordRetriever, Method, Retriever};
use crate::source::Dataset;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

/// Build the OpenAI embedder described by the `[embeddings]` section.
pub fn build_embedder(config: &EmbeddingsConfig) -> Result<OpenAIEmbedder> {
    let api_key = config.api_key()?;
    let mut embedder = OpenAIEmbedder::new(
        api_key,
        config.model.clone(),
        config.batch_size,
        Duration::from_secs(config.timeout_secs),
    )?
    .with_max_retries(config.max_retries)
    .with_dimensions(config.dimensions);
    if let Some(base_url) = &config.base_url {
        embedder = embedder.with_base_url(base_url.clone());
    }
    Ok(embedder)
}

/// Loaded stores plus the retrievers of one run.
pub struct Pipeline {
    pub corpus: Arc<CorpusStore>,
    pub labels: Arc<LabelSet>,
    keyword: Arc<KeywordRetriever>,
    embedding: Option<(Arc<EmbeddingRetriever>, String)>,
    config: Config,
}

impl Pipeline {
    /// Load and validate the dataset, fit the keyword index and, when the
    /// configured methods need it, set up the embedding retriever.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let dataset = Dataset::load(&config.corpus)
            .await
            .context("Failed to load evidence dataset")?;
        let (corpus, labels) = dataset
            .into_stores()
            .context("Evidence dataset failed validation")?;

        let keyword = KeywordRetriever::from_corpus(&corpus)?;
        let mut pipeline = Self {
            corpus: Arc::new(corpus),
            labels: Arc::new(labels),
            keyword: Arc::new(keyword),
            embedding: None,
            config: config.clone(),
        };

        if config.eval.uses_embeddings() {
            let embeddings = config
                .embeddings
                .as_ref()
                .context("[embeddings] section is required for embedding-based methods")?;
            let embedder: Arc<dyn Embedder> = Arc::new(build_embedder(embeddings)?);
            pipeline = pipeline.with_embedder(embedder);
        }

        Ok(pipeline)
    }

    /// Use the given embedder for the embedding and hybrid methods, with a
    /// fresh cache scoped to this pipeline.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        let model = embedder.model().to_string();
        let retriever = EmbeddingRetriever::new(embedder, Arc::new(EmbeddingCache::new()));
        self.embedding = Some((Arc::new(retriever), model));
        self
    }

    /// Retriever for a single method.
    pub fn retriever(&self, method: Method) -> Result<Arc<dyn Retriever>> {
        let keyword: Arc<dyn Retriever> = self.keyword.clone();
        match method {
            Method::Keyword => Ok(keyword),
            Method::Embedding | Method::Hybrid => {
                let (embedding, _) = self
                    .embedding
                    .as_ref()
                    .with_context(|| format!("method {} needs an embedding retriever", method))?;
                let embedding: Arc<dyn Retriever> = embedding.clone();
                if method == Method::Embedding {
                    Ok(embedding)
                } else {
                    Ok(Arc::new(HybridRetriever::new(
                        keyword,
                        embedding,
                        self.config.eval.hybrid_rule(),
                    )))
                }
            }
        }
    }

    /// Harness configured from the `[eval]` section.
    pub fn harness(&self) -> Result<EvalHarness> {
        let mut harness = EvalHarness::new(self.corpus.clone(), self.labels.clone(), self.keyword.clone());
        if let Some((embedding, model)) = &self.embedding {
            harness = harness.with_embedding(embedding.clone(), model.clone());
        }
        Ok(harness
            .with_hybrid_rule(self.config.eval.hybrid_rule())
            .with_max_concurrency(self.config.eval.max_concurrency)
            .with_methods(&self.config.eval.methods)?)
    }

    /// Embedding cache `(hits, misses)`, when an embedding retriever exists.
    pub fn cache_stats(&self) -> Option<(usize, usize)> {
        self.embedding.as_ref().map(|(r, _)| r.cache().stats())
    }
}
