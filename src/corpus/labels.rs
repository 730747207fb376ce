//! Label set: ground-truth relevance judgments per control.

use crate::corpus::CorpusStore;
use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

fn default_relevance() -> u8 {
    1
}

/// One graded label row. A chunk is relevant when `relevance >= 1`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LabelRecord {
    pub control_id: String,
    pub chunk_id: String,
    #[serde(default = "default_relevance")]
    pub relevance: u8,
}

impl LabelRecord {
    pub fn new(control_id: &str, chunk_id: &str, relevance: u8) -> Self {
        Self {
            control_id: control_id.to_string(),
            chunk_id: chunk_id.to_string(),
            relevance,
        }
    }
}

/// Relevant chunk ids for one control.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelevanceJudgment {
    pub control_id: String,
    pub relevant_chunk_ids: BTreeSet<String>,
}

impl RelevanceJudgment {
    pub fn is_relevant(&self, chunk_id: &str) -> bool {
        self.relevant_chunk_ids.contains(chunk_id)
    }
}

/// Validated set of judgments, keyed by control id.
#[derive(Debug, Clone, Default)]
pub struct LabelSet {
    judgments: BTreeMap<String, RelevanceJudgment>,
}

impl LabelSet {
    /// Build from graded label rows.
    ///
    /// Every row is checked against the corpus, including grade-0 rows, which
    /// still register their control as judged. Repeated rows for the same
    /// pair keep the highest grade.
    pub fn from_records(records: Vec<LabelRecord>, corpus: &CorpusStore) -> Result<Self> {
        let mut grades: BTreeMap<String, BTreeMap<String, u8>> = BTreeMap::new();

        for record in records {
            check_reference(corpus, &record.control_id, &record.chunk_id)?;
            let grade = grades
                .entry(record.control_id)
                .or_default()
                .entry(record.chunk_id)
                .or_insert(0);
            *grade = (*grade).max(record.relevance);
        }

        let judgments = grades
            .into_iter()
            .map(|(control_id, chunks)| {
                let relevant_chunk_ids = chunks
                    .into_iter()
                    .filter(|(_, grade)| *grade >= 1)
                    .map(|(chunk_id, _)| chunk_id)
                    .collect();
                (
                    control_id.clone(),
                    RelevanceJudgment {
                        control_id,
                        relevant_chunk_ids,
                    },
                )
            })
            .collect();

        let set = Self { judgments };
        log::info!(
            "Label set loaded: {} judged controls, {} relevant pairs",
            set.len(),
            set.judgments
                .values()
                .map(|j| j.relevant_chunk_ids.len())
                .sum::<usize>()
        );
        Ok(set)
    }

    /// Build from `(control_id, relevant chunk ids)` pairs. A control with an
    /// empty id list is judged with no relevant chunks.
    pub fn from_judgments<I>(judgments: I, corpus: &CorpusStore) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut out: BTreeMap<String, RelevanceJudgment> = BTreeMap::new();
        for (control_id, chunk_ids) in judgments {
            if corpus.control(&control_id).is_none() {
                return Err(unknown_control(&control_id));
            }
            for chunk_id in &chunk_ids {
                check_reference(corpus, &control_id, chunk_id)?;
            }
            out.entry(control_id.clone())
                .or_insert_with(|| RelevanceJudgment {
                    control_id,
                    relevant_chunk_ids: BTreeSet::new(),
                })
                .relevant_chunk_ids
                .extend(chunk_ids);
        }
        Ok(Self { judgments: out })
    }

    pub fn judgment(&self, control_id: &str) -> Option<&RelevanceJudgment> {
        self.judgments.get(control_id)
    }

    /// Judged controls in ascending id order.
    pub fn judgments(&self) -> impl Iterator<Item = &RelevanceJudgment> {
        self.judgments.values()
    }

    pub fn len(&self) -> usize {
        self.judgments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.judgments.is_empty()
    }
}

fn unknown_control(control_id: &str) -> HarnessError {
    HarnessError::DataIntegrity(format!(
        "label references unknown control: {}",
        control_id
    ))
}

/// Referential check of one `(control, chunk)` label pair against the corpus.
fn check_reference(corpus: &CorpusStore, control_id: &str, chunk_id: &str) -> Result<()> {
    if corpus.control(control_id).is_none() {
        return Err(unknown_control(control_id));
    }
    match corpus.owner_of(chunk_id) {
        None => Err(HarnessError::DataIntegrity(format!(
            "label for control {} references unknown chunk: {}",
            control_id, chunk_id
        ))),
        Some(owner) if owner != control_id => Err(HarnessError::DataIntegrity(format!(
            "label for control {} references chunk {} owned by control {}",
            control_id, chunk_id, owner
        ))),
        Some(_) => Ok(()),
    }
}
