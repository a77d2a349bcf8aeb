//! TOML configuration with environment overrides for secrets.
//!
//! ```toml
//! [db]
//! path = "./data/reports.sqlite"
//!
//! [analysis]
//! base_url = "http://localhost"
//! dataset_name = "weekly_report"
//! embedding_model = "embedding-3"
//! chunk_token_num = 2048
//!
//! [polling]
//! wait_for_parsing = true
//! max_wait_secs = 300
//! poll_interval_secs = 10
//!
//! [object_store]
//! endpoint = "localhost:9000"
//! bucket = "excel-reports"
//! secure = false
//!
//! [uploads]
//! dir = "./uploads"
//!
//! [server]
//! bind = "127.0.0.1:5000"
//! ```
//!
//! Secrets are normally supplied through the environment (or a `.env` file):
//! `RAGFLOW_API_KEY`, `MINIO_ACCESS_KEY`, `MINIO_SECRET_KEY`. The variables
//! `MINIO_ENDPOINT`, `MINIO_BUCKET`, `MINIO_SECURE` and `UPLOAD_FOLDER`
//! override their TOML counterparts when set.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,
    #[serde(default = "default_dataset_description")]
    pub dataset_description: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_chunk_token_num")]
    pub chunk_token_num: u32,
    /// Prompt used when no question is given. `{name}` is replaced by the
    /// file name without its extension.
    #[serde(default = "default_question_template")]
    pub question_template: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_dataset_name() -> String {
    "weekly_report".to_string()
}
fn default_dataset_description() -> String {
    "Weekly report dataset".to_string()
}
fn default_embedding_model() -> String {
    "embedding-3".to_string()
}
fn default_chunk_token_num() -> u32 {
    2048
}
fn default_question_template() -> String {
    "Analyze the {name} data and produce a detailed report".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_wait_for_parsing")]
    pub wait_for_parsing: bool,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            wait_for_parsing: true,
            max_wait_secs: 300,
            poll_interval_secs: 10,
        }
    }
}

fn default_wait_for_parsing() -> bool {
    true
}
fn default_max_wait_secs() -> u64 {
    300
}
fn default_poll_interval_secs() -> u64 {
    10
}

impl PollingConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ObjectStoreConfig {
    /// `host[:port]` of the S3-compatible service. A scheme prefix is tolerated.
    pub endpoint: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

fn default_bucket() -> String {
    "excel-reports".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadsConfig {
    #[serde(default = "default_upload_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
            include_globs: default_include_globs(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}
fn default_include_globs() -> Vec<String> {
    vec!["*.xlsx".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".to_string(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;

    Ok(config)
}

/// Overlay environment variables onto the parsed file. `lookup` is injected
/// so tests do not have to mutate the process environment.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(key) = lookup("RAGFLOW_API_KEY") {
        config.analysis.api_key = Some(key);
    }
    if let Some(endpoint) = lookup("MINIO_ENDPOINT") {
        config.object_store.endpoint = endpoint;
    }
    if let Some(bucket) = lookup("MINIO_BUCKET") {
        config.object_store.bucket = bucket;
    }
    if let Some(secure) = lookup("MINIO_SECURE") {
        config.object_store.secure = secure.eq_ignore_ascii_case("true");
    }
    if let Some(access) = lookup("MINIO_ACCESS_KEY") {
        config.object_store.access_key = Some(access);
    }
    if let Some(secret) = lookup("MINIO_SECRET_KEY") {
        config.object_store.secret_key = Some(secret);
    }
    if let Some(dir) = lookup("UPLOAD_FOLDER") {
        config.uploads.dir = PathBuf::from(dir);
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.analysis.base_url.trim().is_empty() {
        anyhow::bail!("analysis.base_url must not be empty");
    }
    if config.analysis.dataset_name.trim().is_empty() {
        anyhow::bail!("analysis.dataset_name must not be empty");
    }
    if config.analysis.chunk_token_num == 0 {
        anyhow::bail!("analysis.chunk_token_num must be > 0");
    }
    if config.polling.poll_interval_secs == 0 {
        anyhow::bail!("polling.poll_interval_secs must be > 0");
    }
    if config.object_store.bucket.trim().is_empty() {
        anyhow::bail!("object_store.bucket must not be empty");
    }
    if config.uploads.include_globs.is_empty() {
        anyhow::bail!("uploads.include_globs must list at least one pattern");
    }
    Ok(())
}
