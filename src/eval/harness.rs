//! Evaluation pipeline.
//!
//! Per control: keyword ranking, embedding ranking, hybrid merge, then
//! scoring. Controls are independent and share the corpus and label set
//! read-only.

use crate::corpus::{Control, CorpusStore, LabelSet};
use crate::error::{HarnessError, Result};
use crate::eval::report::{EvalReport, ExclusionReason, MethodOutcome, ScoreRecord, UnavailableRecord};
use crate::retrieval::{hybrid, HybridRule, Method, RankedResult, Retriever};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct EvalHarness {
    corpus: Arc<CorpusStore>,
    labels: Arc<LabelSet>,
    keyword: Arc<dyn Retriever>,
    embedding: Option<Arc<dyn Retriever>>,
    embedding_model: Option<String>,
    hybrid_rule: HybridRule,
    methods: Vec<Method>,
    max_concurrency: usize,
}

impl EvalHarness {
    /// Harness evaluating the keyword method only. Add an embedding
    /// retriever with [`with_embedding`](Self::with_embedding) to enable the
    /// other two.
    pub fn new(corpus: Arc<CorpusStore>, labels: Arc<LabelSet>, keyword: Arc<dyn Retriever>) -> Self {
        Self {
            corpus,
            labels,
            keyword,
            embedding: None,
            embedding_model: None,
            hybrid_rule: HybridRule::default(),
            methods: vec![Method::Keyword],
            max_concurrency: 1,
        }
    }

    /// Enable the embedding and hybrid methods.
    pub fn with_embedding(mut self, retriever: Arc<dyn Retriever>, model: impl Into<String>) -> Self {
        self.embedding = Some(retriever);
        self.embedding_model = Some(model.into());
        self.methods = Method::ALL.to_vec();
        self
    }

    pub fn with_hybrid_rule(mut self, rule: HybridRule) -> Self {
        self.hybrid_rule = rule;
        self
    }

    /// Restrict the evaluated methods. Fails when an embedding-based method
    /// is requested without an embedding retriever.
    pub fn with_methods(mut self, methods: &[Method]) -> Result<Self> {
        if methods.is_empty() {
            return Err(HarnessError::Config("no retrieval methods selected".to_string()));
        }
        if self.embedding.is_none() {
            if let Some(m) = methods.iter().find(|m| m.uses_embeddings()) {
                return Err(HarnessError::Config(format!(
                    "method {} requires an embedding retriever",
                    m
                )));
            }
        }
        let mut selected: Vec<Method> = methods.to_vec();
        selected.sort();
        selected.dedup();
        self.methods = selected;
        Ok(self)
    }

    /// Number of controls evaluated concurrently (at least 1). Output order
    /// does not depend on it.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Evaluate every control that has a relevance judgment, in control
    /// order. Controls without one are listed in the report as unjudged and
    /// contribute to no aggregate.
    ///
    /// Aborts on the first fatal error. An embedding outage only excludes
    /// the affected control from the embedding and hybrid methods.
    pub async fn run(&self) -> Result<EvalReport> {
        let start = std::time::Instant::now();

        let mut controls: Vec<&Control> = Vec::with_capacity(self.labels.len());
        for judgment in self.labels.judgments() {
            let control = self.corpus.control(&judgment.control_id).ok_or_else(|| {
                HarnessError::DataIntegrity(format!(
                    "judgment for unknown control: {}",
                    judgment.control_id
                ))
            })?;
            controls.push(control);
        }

        let unjudged: Vec<String> = self
            .corpus
            .controls()
            .filter(|c| self.labels.judgment(&c.id).is_none())
            .map(|c| c.id.clone())
            .collect();
        if !unjudged.is_empty() {
            log::info!(
                "{} controls have no relevance judgment and are not scored",
                unjudged.len()
            );
        }

        let per_control: Vec<Vec<MethodOutcome>> = stream::iter(controls.iter().copied())
            .map(|control| self.evaluate_control(control))
            .buffered(self.max_concurrency)
            .try_collect()
            .await?;

        let mut report = EvalReport::from_outcomes(
            per_control.into_iter().flatten().collect(),
            &self.methods,
            controls.len(),
            self.embedding_model.clone(),
        );
        report.unjudged = unjudged;

        log::info!(
            "Evaluated {} controls x {} methods in {:?} ({} unavailable, {} unjudged)",
            controls.len(),
            self.methods.len(),
            start.elapsed(),
            report.unavailable.len(),
            report.unjudged.len()
        );

        Ok(report)
    }

    /// Outcomes of every selected method for one judged control, in method
    /// order. A control without a judgment is a data integrity error.
    pub async fn evaluate_control(&self, control: &Control) -> Result<Vec<MethodOutcome>> {
        let pool = self.corpus.pool(&control.id);
        let relevant = &self
            .labels
            .judgment(&control.id)
            .ok_or_else(|| {
                HarnessError::DataIntegrity(format!(
                    "control {} has no relevance judgment",
                    control.id
                ))
            })?
            .relevant_chunk_ids;

        let wants = |m: Method| self.methods.contains(&m);

        let keyword = if wants(Method::Keyword) || wants(Method::Hybrid) {
            let ranked = self.keyword.rank(control, pool).await?;
            self.check_ranking(control, &ranked)?;
            Some(ranked)
        } else {
            None
        };

        let embedding = match (&self.embedding, wants(Method::Embedding) || wants(Method::Hybrid)) {
            (Some(retriever), true) => match retriever.rank(control, pool).await {
                Ok(ranked) => {
                    self.check_ranking(control, &ranked)?;
                    Some(Ok(ranked))
                }
                Err(e) if !e.is_fatal() => {
                    log::warn!(
                        "Control {} excluded from embedding-based methods: {}",
                        control.id,
                        e
                    );
                    Some(Err(ExclusionReason::EmbeddingUnavailable {
                        message: e.to_string(),
                    }))
                }
                Err(e) => return Err(e),
            },
            _ => None,
        };

        let mut outcomes = Vec::with_capacity(self.methods.len());
        for &method in &self.methods {
            let ranked: std::result::Result<RankedResult, ExclusionReason> = match method {
                Method::Keyword => Ok(keyword.clone().ok_or_else(|| missing(method))?),
                Method::Embedding => embedding.clone().ok_or_else(|| missing(method))?,
                Method::Hybrid => {
                    let kw = keyword.as_ref().ok_or_else(|| missing(method))?;
                    match embedding.as_ref().ok_or_else(|| missing(method))? {
                        Ok(em) => Ok(hybrid::merge(kw, em, self.hybrid_rule)?),
                        Err(reason) => Err(reason.clone()),
                    }
                }
            };

            outcomes.push(match ranked {
                Ok(ranked) => MethodOutcome::Scored(ScoreRecord::score(&ranked, relevant)),
                Err(reason) => MethodOutcome::Unavailable(UnavailableRecord {
                    control_id: control.id.clone(),
                    method,
                    reason,
                }),
            });
        }

        Ok(outcomes)
    }

    /// Ranked ids must be unique and owned by the control.
    fn check_ranking(&self, control: &Control, ranked: &RankedResult) -> Result<()> {
        let mut seen = BTreeSet::new();
        for entry in &ranked.entries {
            if !seen.insert(entry.chunk_id.as_str()) {
                return Err(HarnessError::DataIntegrity(format!(
                    "{} ranking for {} repeats chunk {}",
                    ranked.method, control.id, entry.chunk_id
                )));
            }
            if self.corpus.owner_of(&entry.chunk_id) != Some(control.id.as_str()) {
                return Err(HarnessError::DataIntegrity(format!(
                    "{} ranking for {} contains foreign chunk {}",
                    ranked.method, control.id, entry.chunk_id
                )));
            }
        }
        Ok(())
    }
}

fn missing(method: Method) -> HarnessError {
    HarnessError::Config(format!("no retriever configured for method {}", method))
}
