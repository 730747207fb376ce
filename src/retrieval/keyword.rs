//! TF-IDF keyword retrieval.
//!
//! The vocabulary and document frequencies come from the whole corpus and are
//! fixed when the index is built, so every control is scored against the same
//! term weights for the whole run.

use crate::corpus::{Control, CorpusStore, EvidenceChunk};
use crate::error::{HarnessError, Result};
use crate::retrieval::{own_chunks, rank_scored, Method, RankedResult, Retriever};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Tokens are runs of two or more word characters.
const TOKEN_PATTERN: &str = r"\b\w\w+\b";

const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "either", "else",
    "etc", "few", "for", "from", "further", "had", "has", "have", "having", "he", "her", "here",
    "hers", "him", "his", "how", "ie", "if", "in", "into", "is", "it", "its", "itself", "just",
    "may", "me", "might", "more", "most", "must", "my", "no", "nor", "not", "now", "of", "off",
    "on", "once", "only", "or", "other", "our", "ours", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "those", "through", "to", "too", "under", "until", "up", "upon",
    "us", "very", "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom",
    "why", "will", "with", "within", "without", "would", "you", "your", "yours",
];

/// Sparse L2-normalised vector: `(term index, weight)` sorted by term index.
type SparseVector = Vec<(usize, f32)>;

/// Corpus-wide TF-IDF model with precomputed chunk vectors.
pub struct TfIdfIndex {
    tokenizer: Regex,
    stop_words: HashSet<&'static str>,
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
    chunk_vectors: HashMap<String, SparseVector>,
}

impl TfIdfIndex {
    /// Fit the vocabulary on every chunk of the corpus.
    ///
    /// idf(t) = ln((1 + n) / (1 + df(t))) + 1
    pub fn build(corpus: &CorpusStore) -> Result<Self> {
        let tokenizer = Regex::new(TOKEN_PATTERN)
            .map_err(|e| HarnessError::Parse(format!("invalid token pattern: {}", e)))?;
        let mut index = Self {
            tokenizer,
            stop_words: STOP_WORDS.iter().copied().collect(),
            vocabulary: HashMap::new(),
            idf: Vec::new(),
            chunk_vectors: HashMap::new(),
        };

        let tokenized: Vec<(&str, Vec<String>)> = corpus
            .chunks()
            .map(|chunk| (chunk.id.as_str(), index.tokenize(&chunk.text)))
            .collect();

        // Sorted vocabulary keeps term indices stable across runs
        let mut document_frequency: BTreeMap<&str, usize> = BTreeMap::new();
        for (_, tokens) in &tokenized {
            let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
            for term in unique {
                *document_frequency.entry(term).or_insert(0) += 1;
            }
        }

        let n = tokenized.len() as f32;
        let mut vocabulary = HashMap::with_capacity(document_frequency.len());
        let mut idf = Vec::with_capacity(document_frequency.len());
        for (idx, (term, df)) in document_frequency.into_iter().enumerate() {
            vocabulary.insert(term.to_string(), idx);
            idf.push(((1.0 + n) / (1.0 + df as f32)).ln() + 1.0);
        }
        index.vocabulary = vocabulary;
        index.idf = idf;

        let chunk_vectors = tokenized
            .iter()
            .map(|(id, tokens)| (id.to_string(), index.weigh(tokens)))
            .collect();
        index.chunk_vectors = chunk_vectors;

        log::info!(
            "TF-IDF index built: {} chunks, {} terms",
            index.chunk_vectors.len(),
            index.vocabulary.len()
        );

        Ok(index)
    }

    /// Lowercased tokens with stop words removed.
    fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        self.tokenizer
            .find_iter(&lowered)
            .map(|m| m.as_str())
            .filter(|t| !self.stop_words.contains(t))
            .map(String::from)
            .collect()
    }

    /// Raw term counts times idf, L2-normalised. Out-of-vocabulary terms are dropped.
    fn weigh(&self, tokens: &[String]) -> SparseVector {
        let mut counts: BTreeMap<usize, f32> = BTreeMap::new();
        for token in tokens {
            if let Some(&idx) = self.vocabulary.get(token) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }

        let mut vector: SparseVector = counts
            .into_iter()
            .map(|(idx, tf)| (idx, tf * self.idf[idx]))
            .collect();

        let norm = vector.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for (_, w) in vector.iter_mut() {
                *w /= norm;
            }
        }
        vector
    }

    /// TF-IDF vector of arbitrary text under the fitted vocabulary.
    pub fn vectorize(&self, text: &str) -> Vec<(usize, f32)> {
        self.weigh(&self.tokenize(text))
    }

    /// Cosine similarity between `query` and a chunk. Zero-norm vectors score 0.
    fn similarity(&self, query: &SparseVector, chunk: &EvidenceChunk) -> f32 {
        match self.chunk_vectors.get(&chunk.id) {
            Some(vector) => sparse_dot(query, vector),
            None => sparse_dot(query, &self.vectorize(&chunk.text)),
        }
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }
}

/// Dot product of two sparse vectors sorted by index. Both sides are
/// unit-length or empty, so this is their cosine similarity.
fn sparse_dot(a: &[(usize, f32)], b: &[(usize, f32)]) -> f32 {
    let (mut i, mut j) = (0, 0);
    let mut dot = 0.0;
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    dot
}

/// Keyword retriever over a shared [`TfIdfIndex`].
#[derive(Clone)]
pub struct KeywordRetriever {
    index: Arc<TfIdfIndex>,
}

impl KeywordRetriever {
    pub fn new(index: Arc<TfIdfIndex>) -> Self {
        Self { index }
    }

    /// Build the index from `corpus` and wrap it.
    pub fn from_corpus(corpus: &CorpusStore) -> Result<Self> {
        Ok(Self::new(Arc::new(TfIdfIndex::build(corpus)?)))
    }

    /// Synchronous ranking; the trait method delegates here.
    pub fn rank_pool(&self, control: &Control, pool: &[EvidenceChunk]) -> RankedResult {
        let chunks = own_chunks(control, pool);
        if chunks.is_empty() {
            return RankedResult::empty(&control.id, Method::Keyword);
        }

        let query = self.index.vectorize(&control.query_text());
        let scored = chunks
            .into_iter()
            .map(|chunk| (self.index.similarity(&query, chunk), chunk.id.clone()))
            .collect();

        rank_scored(&control.id, Method::Keyword, scored)
    }
}

#[async_trait]
impl Retriever for KeywordRetriever {
    fn method(&self) -> Method {
        Method::Keyword
    }

    async fn rank(&self, control: &Control, pool: &[EvidenceChunk]) -> Result<RankedResult> {
        Ok(self.rank_pool(control, pool))
    }
}
