use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration, loaded from a TOML file with sensible defaults.
///
/// The oracle API key is deliberately not part of this struct: it comes from
/// the `GROQ_API_KEY` environment variable only, so it can never end up in a
/// config file, a log line, or a serialized error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Path to the read-only SQLite dataset.
    pub database: PathBuf,
    /// Address the HTTP server binds to.
    pub listen: String,
    /// Directory for persisted session history. Defaults to the platform
    /// data dir when unset.
    pub data_dir: Option<PathBuf>,
    /// Optional file with business rules injected into every prompt.
    pub business_rules: Option<PathBuf>,
    pub oracle: OracleConfig,
    pub limits: QueryLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// OpenAI-compatible chat completions endpoint.
    pub base_url: String,
    pub model: String,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLimits {
    /// Maximum SQL generation attempts per turn.
    pub max_attempts: u32,
    /// Number of prior turns included in prompt context.
    pub history_window: usize,
    /// LIMIT injected into non-aggregate queries that lack one.
    pub default_row_limit: usize,
    /// Hard row cap enforced by the executor regardless of any LIMIT.
    pub max_rows: usize,
    /// Wall-clock budget for a single query.
    pub query_timeout_secs: u64,
    /// Longest candidate statement the validator will look at.
    pub max_statement_len: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("transactions.sqlite"),
            listen: String::from("127.0.0.1:8080"),
            data_dir: None,
            business_rules: None,
            oracle: OracleConfig::default(),
            limits: QueryLimits::default(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://api.groq.com/openai/v1"),
            model: String::from("llama-3.3-70b-versatile"),
            timeout_secs: 60,
        }
    }
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            history_window: 5,
            default_row_limit: 1000,
            max_rows: 5000,
            query_timeout_secs: 30,
            max_statement_len: 8192,
        }
    }
}

impl AppConfig {
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("askdb")
            .join("config.toml")
    }

    /// Load configuration from `path`, or from the default location if it
    /// exists, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = Self::default_config_path();
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Resolve the directory session history is persisted under.
    pub fn history_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("askdb")
                .join("sessions"),
        }
    }
}

/// Read the oracle API key from the environment.
pub fn api_key_from_env() -> Result<String> {
    std::env::var("GROQ_API_KEY")
        .context("GROQ_API_KEY is not set; export it before starting the server")
}
