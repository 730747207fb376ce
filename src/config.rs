use crate::eval::Thresholds;
use crate::retrieval::{HybridRule, Method, DEFAULT_RRF_K};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub harness: HarnessConfig,
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub embeddings: Option<EmbeddingsConfig>,
    #[serde(default)]
    pub eval: EvalConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarnessConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Where the controls, chunks and labels come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Json,
    Sqlite,
}

/// Corpus source configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusConfig {
    #[serde(default)]
    pub source: SourceKind,
    /// Optional JSON array of control profiles.
    #[serde(default)]
    pub controls_path: Option<PathBuf>,
    #[serde(default)]
    pub chunks_path: Option<PathBuf>,
    #[serde(default)]
    pub labels_path: Option<PathBuf>,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

/// Embeddings configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Requested output dimensions; the model default when unset.
    #[serde(default)]
    pub dimensions: Option<usize>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl EmbeddingsConfig {
    /// API key read from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env).with_context(|| {
            format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable with your OpenAI API key.",
                self.api_key_env
            )
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HybridRuleKind {
    #[default]
    BestRank,
    ReciprocalRankFusion,
}

/// Evaluation run configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EvalConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_methods")]
    pub methods: Vec<Method>,
    #[serde(default)]
    pub hybrid_rule: HybridRuleKind,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,
    #[serde(default = "default_weight")]
    pub keyword_weight: f32,
    #[serde(default = "default_weight")]
    pub embedding_weight: f32,
    #[serde(default)]
    pub thresholds: Thresholds,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            methods: default_methods(),
            hybrid_rule: HybridRuleKind::default(),
            rrf_k: default_rrf_k(),
            keyword_weight: default_weight(),
            embedding_weight: default_weight(),
            thresholds: Thresholds::default(),
        }
    }
}

impl EvalConfig {
    pub fn hybrid_rule(&self) -> HybridRule {
        match self.hybrid_rule {
            HybridRuleKind::BestRank => HybridRule::BestRank,
            HybridRuleKind::ReciprocalRankFusion => HybridRule::ReciprocalRankFusion {
                k: self.rrf_k,
                keyword_weight: self.keyword_weight,
                embedding_weight: self.embedding_weight,
            },
        }
    }

    pub fn uses_embeddings(&self) -> bool {
        self.methods.iter().any(Method::uses_embeddings)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> usize {
    3
}

fn default_max_concurrency() -> usize {
    1
}

fn default_methods() -> Vec<Method> {
    Method::ALL.to_vec()
}

fn default_rrf_k() -> f32 {
    DEFAULT_RRF_K
}

fn default_weight() -> f32 {
    1.0
}

impl Config {
    /// Load configuration from file
    ///
    /// Looks for config file in this order:
    /// 1. Path specified in EVIDENCE_EVAL_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("EVIDENCE_EVAL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::load_from(&config_path)
    }

    /// Load and validate a specific config file
    ///
    /// Loads environment variables from .env file (if present) first.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let _ = dotenv::dotenv();

        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        match self.corpus.source {
            SourceKind::Json => {
                if let Some(path) = &self.corpus.controls_path {
                    require_file("corpus.controls_path", Some(path))?;
                }
                require_file("corpus.chunks_path", self.corpus.chunks_path.as_deref())?;
                require_file("corpus.labels_path", self.corpus.labels_path.as_deref())?;
            }
            SourceKind::Sqlite => {
                require_file("corpus.db_path", self.corpus.db_path.as_deref())?;
            }
        }

        if self.eval.methods.is_empty() {
            anyhow::bail!("eval.methods must name at least one of keyword, embedding, hybrid");
        }

        if self.eval.max_concurrency == 0 {
            anyhow::bail!("eval.max_concurrency must be greater than 0");
        }

        if self.eval.hybrid_rule == HybridRuleKind::ReciprocalRankFusion {
            if self.eval.rrf_k <= 0.0 {
                anyhow::bail!("eval.rrf_k must be greater than 0");
            }
            if self.eval.keyword_weight < 0.0 || self.eval.embedding_weight < 0.0 {
                anyhow::bail!("eval.keyword_weight and eval.embedding_weight must not be negative");
            }
        }

        if self.eval.uses_embeddings() {
            let embeddings = self.embeddings.as_ref().context(
                "[embeddings] section is required when the embedding or hybrid method is selected",
            )?;
            if embeddings.provider != "openai" {
                anyhow::bail!("Unsupported embeddings.provider: {}", embeddings.provider);
            }
            if embeddings.batch_size == 0 {
                anyhow::bail!("embeddings.batch_size must be greater than 0");
            }
            if embeddings.dimensions == Some(0) {
                anyhow::bail!("embeddings.dimensions must be greater than 0");
            }
            embeddings.api_key()?;
        }

        Ok(())
    }

    pub fn log_level(&self) -> &str {
        &self.harness.log_level
    }
}

fn require_file(key: &str, path: Option<&Path>) -> Result<()> {
    let path = path.with_context(|| format!("{} must be set", key))?;
    if !path.is_file() {
        anyhow::bail!("{} does not exist or is not a file: {}", key, path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide cwd and env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    const API_KEY_ENV: &str = "EVIDENCE_EVAL_TEST_OPENAI_KEY";

    fn escaped(path: &Path) -> String {
        path.to_str().unwrap().replace('\\', "\\\\")
    }

    fn write_sources(temp_dir: &TempDir) {
        fs::write(temp_dir.path().join("chunks.json"), "[]").unwrap();
        fs::write(temp_dir.path().join("labels.json"), "[]").unwrap();
    }

    fn create_test_config(temp_dir: &TempDir, eval_section: &str) -> PathBuf {
        write_sources(temp_dir);
        let dir = temp_dir.path().canonicalize().unwrap();
        let content = format!(
            r#"
[harness]
log_level = "debug"

[corpus]
source = "json"
chunks_path = "{chunks}"
labels_path = "{labels}"

[embeddings]
model = "text-embedding-3-small"
api_key_env = "{key}"
batch_size = 64
dimensions = 512

{eval}
"#,
            chunks = escaped(&dir.join("chunks.json")),
            labels = escaped(&dir.join("labels.json")),
            key = API_KEY_ENV,
            eval = eval_section,
        );
        let path = dir.join("config.toml");
        fs::write(&path, content).unwrap();
        path
    }

    /// Restores cwd when dropped (e.g. on panic).
    struct CwdGuard(PathBuf);
    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.0);
        }
    }

    fn with_api_key(api_key: Option<&str>, f: impl FnOnce()) {
        let original = std::env::var(API_KEY_ENV).ok();
        match api_key {
            Some(k) => std::env::set_var(API_KEY_ENV, k),
            None => std::env::remove_var(API_KEY_ENV),
        }
        f();
        std::env::remove_var(API_KEY_ENV);
        if let Some(val) = original {
            std::env::set_var(API_KEY_ENV, val);
        }
    }

    #[test]
    fn test_config_load_success() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_config(&temp_dir, "[eval]\nmax_concurrency = 4\n");
        with_api_key(Some("test-key"), || {
            let config = Config::load_from(&path);
            assert!(config.is_ok(), "Config::load_from() failed: {:?}", config.err());
            let config = config.unwrap();
            assert_eq!(config.log_level(), "debug");
            assert_eq!(config.eval.max_concurrency, 4);
            assert_eq!(config.eval.methods, Method::ALL.to_vec());
            assert_eq!(config.eval.hybrid_rule(), HybridRule::BestRank);
            let embeddings = config.embeddings.unwrap();
            assert_eq!(embeddings.batch_size, 64);
            assert_eq!(embeddings.dimensions, Some(512));
            assert_eq!(embeddings.max_retries, 3);
        });
    }

    #[test]
    fn test_config_missing_api_key() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_config(&temp_dir, "");
        with_api_key(None, || {
            let config = Config::load_from(&path);
            assert!(config.is_err(), "Expected missing API key error");
            assert!(config.unwrap_err().to_string().contains(API_KEY_ENV));
        });
    }

    #[test]
    fn test_keyword_only_needs_no_api_key() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_config(&temp_dir, "[eval]\nmethods = [\"keyword\"]\n");
        with_api_key(None, || {
            let config = Config::load_from(&path).unwrap();
            assert!(!config.eval.uses_embeddings());
        });
    }

    #[test]
    fn test_config_loads_key_from_env_file() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_config(&temp_dir, "");
        fs::write(
            temp_dir.path().join(".env"),
            format!("{}=test-key-from-env-file\n", API_KEY_ENV),
        )
        .unwrap();
        let _cwd = CwdGuard(std::env::current_dir().unwrap());
        std::env::set_current_dir(temp_dir.path()).unwrap();
        with_api_key(None, || {
            let config = Config::load_from(&path);
            assert!(config.is_ok(), "Config should load with API key from .env file");
        });
    }

    #[test]
    fn test_default_load_reads_env_file() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_config(&temp_dir, "");
        fs::write(
            temp_dir.path().join(".env"),
            format!("{}=test-key-from-env-file\n", API_KEY_ENV),
        )
        .unwrap();
        let _cwd = CwdGuard(std::env::current_dir().unwrap());
        std::env::set_current_dir(temp_dir.path()).unwrap();
        let original = std::env::var("EVIDENCE_EVAL_CONFIG").ok();
        std::env::set_var("EVIDENCE_EVAL_CONFIG", &path);
        with_api_key(None, || {
            let config = Config::load().unwrap();
            assert_eq!(
                config.embeddings.unwrap().api_key().unwrap(),
                "test-key-from-env-file"
            );
        });
        std::env::remove_var("EVIDENCE_EVAL_CONFIG");
        if let Some(v) = original {
            std::env::set_var("EVIDENCE_EVAL_CONFIG", v);
        }
    }

    #[test]
    fn test_rrf_rule_from_config() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_config(
            &temp_dir,
            "[eval]\nhybrid_rule = \"reciprocal_rank_fusion\"\nrrf_k = 30.0\nkeyword_weight = 0.4\nembedding_weight = 0.6\n\n[eval.thresholds]\nmin_mrr = 0.5\n",
        );
        with_api_key(Some("test-key"), || {
            let config = Config::load_from(&path).unwrap();
            assert_eq!(
                config.eval.hybrid_rule(),
                HybridRule::ReciprocalRankFusion {
                    k: 30.0,
                    keyword_weight: 0.4,
                    embedding_weight: 0.6
                }
            );
            assert_eq!(config.eval.thresholds.min_mrr, Some(0.5));
        });
    }

    #[test]
    fn test_rejects_invalid_values() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        with_api_key(Some("test-key"), || {
            for (section, needle) in [
                ("[eval]\nmax_concurrency = 0\n", "max_concurrency"),
                ("[eval]\nmethods = []\n", "eval.methods"),
                ("[eval]\nmethods = [\"bm25\"]\n", "Failed to parse"),
            ] {
                let path = create_test_config(&temp_dir, section);
                let err = Config::load_from(&path).unwrap_err();
                assert!(format!("{:#}", err).contains(needle), "{}: {:#}", section, err);
            }
        });
    }

    #[test]
    fn test_missing_source_file() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_config(&temp_dir, "[eval]\nmethods = [\"keyword\"]\n");
        fs::remove_file(temp_dir.path().join("labels.json")).unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("corpus.labels_path"));
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("EVIDENCE_EVAL_CONFIG").ok();
        std::env::set_var("EVIDENCE_EVAL_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("EVIDENCE_EVAL_CONFIG");
        if let Some(v) = original {
            std::env::set_var("EVIDENCE_EVAL_CONFIG", v);
        }
    }
}
