//! External embedding capability.
//!
//! The harness treats embedding inference as a black box mapping text to a
//! fixed-length vector. Any failure surfaces as
//! [`HarnessError::EmbeddingUnavailable`](crate::error::HarnessError).

pub mod openai;

pub use openai::OpenAIEmbedder;

use crate::error::{HarnessError, Result};
use async_trait::async_trait;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, used in logs and reports.
    fn model(&self) -> &str;

    /// Embed many texts in one logical call, one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| HarnessError::EmbeddingUnavailable("empty embedding response".to_string()))
    }
}
