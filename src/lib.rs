pub mod cache;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod eval;
pub mod pipeline;
pub mod retrieval;
pub mod source;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use corpus::{ChunkRecord, Control, CorpusStore, EvidenceChunk, LabelRecord, LabelSet, RelevanceJudgment};
pub use error::{HarnessError, Result};
pub use eval::{EvalHarness, EvalReport, ScoreRecord};
pub use pipeline::Pipeline;
pub use retrieval::{Method, RankedResult, Retriever};
pub use source::Dataset;
