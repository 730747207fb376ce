//! Test doubles for the external embedding capability.
//!
//! Only compiled when running tests.

use crate::embeddings::Embedder;
use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

const DIMENSIONS: usize = 32;

/// Deterministic bag-of-words embedder: each lowercase alphanumeric word is
/// hashed (FNV-1a) into one of 32 buckets.
///
/// Fails every call whose batch contains a text including `fail_marker`.
#[derive(Default)]
pub struct HashingEmbedder {
    fail_marker: Option<String>,
    batch_calls: AtomicUsize,
    texts_embedded: AtomicUsize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Self::default()
        }
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; DIMENSIONS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hash: u32 = 0x811c_9dc5;
            for byte in word.to_lowercase().bytes() {
                hash ^= u32::from(byte);
                hash = hash.wrapping_mul(0x0100_0193);
            }
            v[hash as usize % DIMENSIONS] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model(&self) -> &str {
        "hashing-test"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_marker {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(HarnessError::EmbeddingUnavailable(format!(
                    "simulated outage for {}",
                    marker
                )));
            }
        }
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Embedder returning a fixed set of vectors, for malformed-response tests.
pub struct FixedEmbedder(pub Vec<Vec<f32>>);

#[async_trait]
impl Embedder for FixedEmbedder {
    fn model(&self) -> &str {
        "fixed-test"
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(self.0.clone())
    }
}
