//! Corpus store: evidence chunks grouped by the control that owns them.

pub mod labels;

pub use labels::{LabelRecord, LabelSet, RelevanceJudgment};

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A unit of textual evidence attached to one control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvidenceChunk {
    pub id: String,
    pub control_id: String,
    pub text: String,
}

/// Raw `(control_id, chunk_id, text)` record as delivered by a source.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkRecord {
    pub control_id: String,
    pub chunk_id: String,
    #[serde(default)]
    pub text: String,
}

impl ChunkRecord {
    pub fn new(control_id: &str, chunk_id: &str, text: &str) -> Self {
        Self {
            control_id: control_id.to_string(),
            chunk_id: chunk_id.to_string(),
            text: text.to_string(),
        }
    }
}

/// SOC 2 control. Only `id` is required; the rest of the profile feeds the
/// query text used by the retrievers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Control {
    pub id: String,
    /// Framework code, e.g. "CC6.1".
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Auditor checklist items (what evidence is expected).
    #[serde(default)]
    pub checklist: Vec<String>,
}

impl Control {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Query text for this control: code, title, description and checklist
    /// items joined by single spaces, skipping blanks. Falls back to the id.
    pub fn query_text(&self) -> String {
        let parts: Vec<&str> = [&self.code, &self.title, &self.description]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .chain(self.checklist.iter().map(String::as_str))
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        if parts.is_empty() {
            self.id.clone()
        } else {
            parts.join(" ")
        }
    }
}

/// Immutable, in-memory corpus for one evaluation run.
#[derive(Debug, Clone, Default)]
pub struct CorpusStore {
    controls: BTreeMap<String, Control>,
    pools: BTreeMap<String, Vec<EvidenceChunk>>,
    owners: HashMap<String, String>,
}

impl CorpusStore {
    /// Build the store from control profiles and chunk records.
    ///
    /// Fails fast on a chunk id collision or a duplicated control profile.
    /// Controls referenced only by chunks get an empty profile; controls with
    /// a profile and no chunks get an empty pool.
    pub fn from_records(controls: Vec<Control>, chunks: Vec<ChunkRecord>) -> Result<Self> {
        let mut store = CorpusStore::default();

        for control in controls {
            if control.id.trim().is_empty() {
                return Err(HarnessError::InvalidInput(
                    "control profile with empty id".to_string(),
                ));
            }
            if store.controls.contains_key(&control.id) {
                return Err(HarnessError::DataIntegrity(format!(
                    "duplicate control id: {}",
                    control.id
                )));
            }
            store.pools.entry(control.id.clone()).or_default();
            store.controls.insert(control.id.clone(), control);
        }

        for record in chunks {
            if record.chunk_id.trim().is_empty() || record.control_id.trim().is_empty() {
                return Err(HarnessError::InvalidInput(format!(
                    "chunk record with empty identifier (control_id={:?}, chunk_id={:?})",
                    record.control_id, record.chunk_id
                )));
            }
            if let Some(owner) = store.owners.get(&record.chunk_id) {
                return Err(HarnessError::DataIntegrity(format!(
                    "chunk id collision: {} (controls {} and {})",
                    record.chunk_id, owner, record.control_id
                )));
            }

            store
                .controls
                .entry(record.control_id.clone())
                .or_insert_with(|| Control::new(record.control_id.clone()));
            store
                .owners
                .insert(record.chunk_id.clone(), record.control_id.clone());
            store
                .pools
                .entry(record.control_id.clone())
                .or_default()
                .push(EvidenceChunk {
                    id: record.chunk_id,
                    control_id: record.control_id,
                    text: record.text,
                });
        }

        log::info!(
            "Corpus loaded: {} chunks across {} controls",
            store.owners.len(),
            store.controls.len()
        );

        Ok(store)
    }

    /// Controls in ascending id order.
    pub fn controls(&self) -> impl Iterator<Item = &Control> {
        self.controls.values()
    }

    pub fn control(&self, control_id: &str) -> Option<&Control> {
        self.controls.get(control_id)
    }

    /// Evidence pool of a control; empty for unknown controls.
    pub fn pool(&self, control_id: &str) -> &[EvidenceChunk] {
        self.pools
            .get(control_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All chunks, grouped by control in ascending control id order.
    pub fn chunks(&self) -> impl Iterator<Item = &EvidenceChunk> {
        self.pools.values().flatten()
    }

    /// Control that owns `chunk_id`, if the chunk exists.
    pub fn owner_of(&self, chunk_id: &str) -> Option<&str> {
        self.owners.get(chunk_id).map(String::as_str)
    }

    pub fn control_count(&self) -> usize {
        self.controls.len()
    }

    /// Number of chunks
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<ChunkRecord> {
        vec![
            ChunkRecord::new("CC6.1", "a1", "MFA enforced via Okta policy"),
            ChunkRecord::new("CC6.1", "a2", "Okta MFA user export"),
            ChunkRecord::new("CC8.1", "b1", "Branch protection requires one review"),
        ]
    }

    #[test]
    fn test_pools_grouped_by_control() {
        let store = CorpusStore::from_records(vec![], records()).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.control_count(), 2);
        assert_eq!(store.pool("CC6.1").len(), 2);
        assert_eq!(store.pool("CC8.1")[0].id, "b1");
        assert!(store.pool("CC9.9").is_empty());
        assert_eq!(store.owner_of("a2"), Some("CC6.1"));
        assert_eq!(store.owner_of("zz"), None);
    }

    #[test]
    fn test_chunk_id_collision_fails_fast() {
        let mut recs = records();
        recs.push(ChunkRecord::new("CC8.1", "a1", "duplicate id"));
        let err = CorpusStore::from_records(vec![], recs).unwrap_err();
        assert!(matches!(err, HarnessError::DataIntegrity(_)));
        assert!(err.to_string().contains("a1"));
    }

    #[test]
    fn test_duplicate_control_profile_rejected() {
        let controls = vec![Control::new("CC6.1"), Control::new("CC6.1")];
        let err = CorpusStore::from_records(controls, vec![]).unwrap_err();
        assert!(matches!(err, HarnessError::DataIntegrity(_)));
    }

    #[test]
    fn test_empty_identifiers_rejected() {
        let err =
            CorpusStore::from_records(vec![], vec![ChunkRecord::new("CC6.1", " ", "x")]).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidInput(_)));
    }

    #[test]
    fn test_profile_without_chunks_has_empty_pool() {
        let store = CorpusStore::from_records(vec![Control::new("CC7.2")], records()).unwrap();
        assert_eq!(store.control_count(), 3);
        assert!(store.pool("CC7.2").is_empty());
        let ids: Vec<&str> = store.controls().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["CC6.1", "CC7.2", "CC8.1"]);
    }

    #[test]
    fn test_query_text_joins_profile_parts() {
        let control = Control {
            id: "1".to_string(),
            code: Some("CC6.1".to_string()),
            title: Some("MFA enforced".to_string()),
            description: Some("  ".to_string()),
            checklist: vec!["MFA policy export".to_string(), String::new()],
        };
        assert_eq!(control.query_text(), "CC6.1 MFA enforced MFA policy export");
    }

    #[test]
    fn test_query_text_falls_back_to_id() {
        assert_eq!(Control::new("CC6.3").query_text(), "CC6.3");
    }
}
