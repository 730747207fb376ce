//! Dataset sources: JSON files or a SQLite evidence store.

use crate::config::{CorpusConfig, SourceKind};
use crate::corpus::{ChunkRecord, Control, CorpusStore, LabelRecord, LabelSet};
use crate::db::{evidence, Db};
use crate::error::{HarnessError, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Raw records of one dataset, before validation.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub controls: Vec<Control>,
    pub chunks: Vec<ChunkRecord>,
    pub labels: Vec<LabelRecord>,
}

impl Dataset {
    /// Load the source named by the corpus configuration.
    pub async fn load(config: &CorpusConfig) -> Result<Self> {
        match config.source {
            SourceKind::Json => {
                let chunks = config
                    .chunks_path
                    .as_deref()
                    .ok_or_else(|| HarnessError::Config("corpus.chunks_path is not set".to_string()))?;
                let labels = config
                    .labels_path
                    .as_deref()
                    .ok_or_else(|| HarnessError::Config("corpus.labels_path is not set".to_string()))?;
                Self::from_json_files(config.controls_path.as_deref(), chunks, labels)
            }
            SourceKind::Sqlite => {
                let db_path = config
                    .db_path
                    .as_deref()
                    .ok_or_else(|| HarnessError::Config("corpus.db_path is not set".to_string()))?;
                Self::from_sqlite(&Db::new(db_path)).await
            }
        }
    }

    /// Read JSON arrays of control profiles (optional), chunks and labels.
    pub fn from_json_files(
        controls_path: Option<&Path>,
        chunks_path: &Path,
        labels_path: &Path,
    ) -> Result<Self> {
        let controls = match controls_path {
            Some(path) => read_json_array(path)?,
            None => Vec::new(),
        };
        let dataset = Self {
            controls,
            chunks: read_json_array(chunks_path)?,
            labels: read_json_array(labels_path)?,
        };
        log::info!(
            "Loaded JSON dataset: {} control profiles, {} chunks, {} labels",
            dataset.controls.len(),
            dataset.chunks.len(),
            dataset.labels.len()
        );
        Ok(dataset)
    }

    /// Read every table of a SQLite evidence store.
    pub async fn from_sqlite(db: &Db) -> Result<Self> {
        let path = db.path().display().to_string();
        let dataset = db
            .with_connection(|conn| {
                Ok(Self {
                    controls: evidence::load_controls(conn)?,
                    chunks: evidence::load_chunks(conn)?,
                    labels: evidence::load_labels(conn)?,
                })
            })
            .await?;
        log::info!(
            "Loaded SQLite dataset from {}: {} control profiles, {} chunks, {} labels",
            path,
            dataset.controls.len(),
            dataset.chunks.len(),
            dataset.labels.len()
        );
        Ok(dataset)
    }

    /// Replace the contents of a SQLite evidence store with this dataset.
    pub async fn write_sqlite(&self, db: &Db) -> Result<()> {
        let dataset = self.clone();
        db.with_connection(move |conn| {
            evidence::replace_all(conn, &dataset.controls, &dataset.chunks, &dataset.labels)
        })
        .await
    }

    /// Validate into the immutable corpus store and label set.
    pub fn into_stores(self) -> Result<(CorpusStore, LabelSet)> {
        let corpus = CorpusStore::from_records(self.controls, self.chunks)?;
        let labels = LabelSet::from_records(self.labels, &corpus)?;
        Ok((corpus, labels))
    }
}

fn read_json_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| HarnessError::Parse(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn sample_files(dir: &TempDir) -> (std::path::PathBuf, std::path::PathBuf, std::path::PathBuf) {
        let controls = write(
            dir,
            "controls.json",
            r#"[{"id": "CC6.1", "code": "CC6.1", "title": "Logical access", "checklist": ["MFA"]},
                {"id": "CC9.9", "title": "Vendor management"}]"#,
        );
        let chunks = write(
            dir,
            "chunks.json",
            r#"[{"control_id": "CC6.1", "chunk_id": "c1", "text": "MFA enforced for all users"},
                {"control_id": "CC6.1", "chunk_id": "c2", "text": "Password policy"},
                {"control_id": "CC8.1", "chunk_id": "c3", "text": "Change tickets"}]"#,
        );
        let labels = write(
            dir,
            "labels.json",
            r#"[{"control_id": "CC6.1", "chunk_id": "c1", "relevance": 2},
                {"control_id": "CC8.1", "chunk_id": "c3"}]"#,
        );
        (controls, chunks, labels)
    }

    #[test]
    fn test_json_dataset_builds_stores() {
        let dir = TempDir::new().unwrap();
        let (controls, chunks, labels) = sample_files(&dir);

        let dataset = Dataset::from_json_files(Some(&controls), &chunks, &labels).unwrap();
        let (corpus, labels) = dataset.into_stores().unwrap();

        assert_eq!(corpus.control_count(), 3);
        assert!(corpus.pool("CC9.9").is_empty());
        assert_eq!(corpus.pool("CC6.1").len(), 2);
        assert!(labels.judgment("CC8.1").unwrap().is_relevant("c3"));
    }

    #[test]
    fn test_json_without_profiles() {
        let dir = TempDir::new().unwrap();
        let (_, chunks, labels) = sample_files(&dir);

        let dataset = Dataset::from_json_files(None, &chunks, &labels).unwrap();
        assert!(dataset.controls.is_empty());
        let (corpus, _) = dataset.into_stores().unwrap();
        assert_eq!(corpus.control_count(), 2);
    }

    #[test]
    fn test_malformed_json_names_file() {
        let dir = TempDir::new().unwrap();
        let (_, chunks, _) = sample_files(&dir);
        let labels = write(&dir, "broken.json", r#"{"control_id": "CC6.1"}"#);

        let err = Dataset::from_json_files(None, &chunks, &labels).unwrap_err();
        assert!(matches!(err, HarnessError::Parse(ref msg) if msg.contains("broken.json")));
    }

    #[test]
    fn test_unknown_label_chunk_is_integrity_error() {
        let dir = TempDir::new().unwrap();
        let (_, chunks, _) = sample_files(&dir);
        let labels = write(&dir, "labels.json", r#"[{"control_id": "CC6.1", "chunk_id": "nope"}]"#);

        let dataset = Dataset::from_json_files(None, &chunks, &labels).unwrap();
        assert!(matches!(dataset.into_stores(), Err(HarnessError::DataIntegrity(_))));
    }

    #[tokio::test]
    async fn test_sqlite_round_trip_matches_json() {
        let dir = TempDir::new().unwrap();
        let (controls, chunks, labels) = sample_files(&dir);
        let json = Dataset::from_json_files(Some(&controls), &chunks, &labels).unwrap();

        let db = Db::new(dir.path().join("evidence.db"));
        json.write_sqlite(&db).await.unwrap();

        let config = CorpusConfig {
            source: SourceKind::Sqlite,
            controls_path: None,
            chunks_path: None,
            labels_path: None,
            db_path: Some(dir.path().join("evidence.db")),
        };
        let loaded = Dataset::load(&config).await.unwrap();

        let (json_corpus, json_labels) = json.into_stores().unwrap();
        let (db_corpus, db_labels) = loaded.into_stores().unwrap();
        assert_eq!(json_corpus.chunks().collect::<Vec<_>>(), db_corpus.chunks().collect::<Vec<_>>());
        assert_eq!(
            json_labels.judgments().collect::<Vec<_>>(),
            db_labels.judgments().collect::<Vec<_>>()
        );
        assert_eq!(
            json_corpus.control("CC6.1").unwrap().query_text(),
            db_corpus.control("CC6.1").unwrap().query_text()
        );
    }

    #[tokio::test]
    async fn test_load_reports_missing_path() {
        let config = CorpusConfig {
            source: SourceKind::Json,
            controls_path: None,
            chunks_path: None,
            labels_path: None,
            db_path: None,
        };
        assert!(matches!(Dataset::load(&config).await, Err(HarnessError::Config(_))));
    }
}
