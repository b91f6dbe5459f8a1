//! Configuration for the retrieval evaluator.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values.

use crate::error::{EvalError, Result};
use crate::membership::MembershipEncoding;
use crate::sync::UploadMode;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Question ids evaluated when no explicit list is given.
pub const DEFAULT_EVAL_QIDS: &[u32] = &[
    2, 4, 11, 19, 23, 24, 29, 50, 51, 53, 54, 58, 59, 62, 63, 68, 70, 73, 74, 75, 76, 78, 79, 80,
    81, 82, 83, 89, 92, 93, 94, 96, 98, 99,
];

/// Default base URL of the hosted vector-search API.
pub const DEFAULT_API_BASE: &str = "https://api.colivara.com";

/// Remote service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL for the API (e.g., "https://api.colivara.com")
    pub api_base: String,

    /// API key for authentication
    pub api_key: String,

    /// Retries after the first failed attempt of an upsert or search
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff, in milliseconds
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Per-request timeout in seconds; a timed-out request is retried
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: String::new(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Local file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub questions: PathBuf,
    pub ground_truths: PathBuf,
    /// Root of the source store, laid out as `{source_dir}/{category}/{id}.pdf`.
    pub source_dir: PathBuf,
    pub results_log: PathBuf,
    pub index_log: PathBuf,
    /// Scratch directory for rendered page images.
    pub tmp_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            questions: PathBuf::from("dataset/preliminary/questions.json"),
            ground_truths: PathBuf::from("dataset/preliminary/ground_truths.json"),
            source_dir: PathBuf::from("reference"),
            results_log: PathBuf::from("eval/colivara_results.jsonl"),
            index_log: PathBuf::from("eval/indexed_files.jsonl"),
            tmp_dir: PathBuf::from("tmp"),
        }
    }
}

impl PathsConfig {
    /// Point both fixture paths at `questions.json` / `ground_truths.json` in `dir`.
    pub fn with_dataset_dir(mut self, dir: &Path) -> Self {
        self.questions = dir.join("questions.json");
        self.ground_truths = dir.join("ground_truths.json");
        self
    }
}

/// Evaluation run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub mode: UploadMode,
    pub encoding: MembershipEncoding,
    /// Overrides the per-mode default result count.
    pub top_k: Option<usize>,
    /// Collapse repeated document ids in the hit list.
    pub dedupe: bool,
    /// Resolution used when rendering pages.
    pub dpi: u32,
    pub qids: Vec<u32>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            mode: UploadMode::Document,
            encoding: MembershipEncoding::Keys,
            top_k: None,
            dedupe: true,
            dpi: 100,
            qids: DEFAULT_EVAL_QIDS.to_vec(),
        }
    }
}

impl EvalConfig {
    /// Effective top-K: the override if set, otherwise the mode's default.
    ///
    /// Page collections return several hits per document, so they ask for more.
    pub fn effective_top_k(&self) -> usize {
        self.top_k.unwrap_or(match self.mode {
            UploadMode::Document => 3,
            UploadMode::Pages => 5,
        })
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub service: ServiceConfig,
    pub paths: PathsConfig,
    pub eval: EvalConfig,
}

/// Configuration file structure (YAML format).
#[derive(Debug, Deserialize)]
struct ConfigFile {
    service: Option<ServiceFileSection>,
    paths: Option<PathsConfig>,
    eval: Option<EvalConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceFileSection {
    api_base: Option<String>,
    api_key: Option<String>,
    max_retries: Option<u32>,
    retry_base_ms: Option<u64>,
    timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (COLIVARA_API_BASE, COLIVARA_API_KEY, EVAL_DATASET_DIR, EVAL_SOURCE_DIR)
    /// 2. Config file (explicit path, or ~/.config/retrieval-eval/config.yaml)
    /// 3. Default values
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        // A missing .env is normal
        dotenv::dotenv().ok();

        let mut config = match explicit_path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::config_file_path() {
                Some(path) if path.exists() => Self::load_from_file(&path)?,
                _ => Config::default(),
            },
        };

        if let Ok(api_base) = env::var("COLIVARA_API_BASE") {
            config.service.api_base = api_base;
        }

        if let Ok(api_key) = env::var("COLIVARA_API_KEY") {
            config.service.api_key = api_key;
        }

        if let Ok(dir) = env::var("EVAL_DATASET_DIR") {
            config.paths = config.paths.with_dataset_dir(Path::new(&dir));
        }

        if let Ok(dir) = env::var("EVAL_SOURCE_DIR") {
            config.paths.source_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EvalError::MissingFile(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, filling gaps with defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file_config: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| EvalError::Config(format!("Failed to parse config file: {}", e)))?;

        let mut config = Config::default();

        if let Some(service) = file_config.service {
            if let Some(api_base) = service.api_base {
                config.service.api_base = api_base;
            }
            if let Some(api_key) = service.api_key {
                config.service.api_key = api_key;
            }
            if let Some(max_retries) = service.max_retries {
                config.service.max_retries = max_retries;
            }
            if let Some(retry_base_ms) = service.retry_base_ms {
                config.service.retry_base_ms = retry_base_ms;
            }
            if let Some(timeout_secs) = service.timeout_secs {
                config.service.timeout_secs = timeout_secs;
            }
        }
        if let Some(paths) = file_config.paths {
            config.paths = paths;
        }
        if let Some(eval) = file_config.eval {
            config.eval = eval;
        }

        Ok(config)
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "retrieval-eval")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Validate that required configuration is present.
    pub fn validate(&self) -> Result<()> {
        if self.service.api_base.is_empty() {
            return Err(EvalError::Config(
                "API base URL is required. Set COLIVARA_API_BASE environment variable or add to config file.".to_string()
            ));
        }

        if self.service.api_key.is_empty() {
            return Err(EvalError::Config(
                "API key is required. Set COLIVARA_API_KEY environment variable or add to config file.".to_string()
            ));
        }

        if self.eval.top_k == Some(0) {
            return Err(EvalError::Config("top_k must be at least 1".to_string()));
        }

        if self.service.timeout_secs == 0 {
            return Err(EvalError::Config("timeout_secs must be at least 1".to_string()));
        }

        Ok(())
    }

    /// Create a config with explicit service credentials (useful for testing).
    pub fn with_service(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            service: ServiceConfig {
                api_base: api_base.into(),
                api_key: api_key.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
