//! TOML configuration parsing.
//!
//! Every section is optional, so an empty file (or [`Config::default`])
//! yields a working configuration pointed at the public Coda API.
//!
//! ```toml
//! [workspace]
//! base_url = "https://coda.io/apis/v1"
//! token_env = "CODA_API_TOKEN"
//!
//! [detection]
//! unused_days_threshold = 30.0
//! allowed_domains = ["yourcompany.com"]
//!
//! [scan]
//! concurrency = 4
//! interval_secs = 900
//!
//! [server]
//! bind = "127.0.0.1:3000"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Where the CLI looks for its config when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/sentinel.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Connection settings for the Coda REST API.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Rows requested per page when walking a table.
    #[serde(default = "default_row_page_size")]
    pub row_page_size: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            row_page_size: default_row_page_size(),
        }
    }
}

fn default_base_url() -> String {
    "https://coda.io/apis/v1".to_string()
}
fn default_token_env() -> String {
    "CODA_API_TOKEN".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_row_page_size() -> usize {
    50
}

/// Rule thresholds.
///
/// `unused_days_threshold` is fractional: `0.001` (about 90 seconds) is handy
/// when demoing against a freshly edited doc, while the default flags
/// documents untouched for a month.
#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_unused_days_threshold")]
    pub unused_days_threshold: f64,
    #[serde(default = "default_unused_severity")]
    pub unused_severity: u8,
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
    #[serde(default = "default_fetch_failed_severity")]
    pub fetch_failed_severity: u8,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            unused_days_threshold: default_unused_days_threshold(),
            unused_severity: default_unused_severity(),
            allowed_domains: default_allowed_domains(),
            fetch_failed_severity: default_fetch_failed_severity(),
        }
    }
}

fn default_unused_days_threshold() -> f64 {
    30.0
}
fn default_unused_severity() -> u8 {
    5
}
fn default_allowed_domains() -> Vec<String> {
    vec!["yourcompany.com".to_string()]
}
fn default_fetch_failed_severity() -> u8 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    /// Documents processed in parallel within one stage.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Upper bound for any single workspace fetch, retries included.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub report_fetch_failures: bool,
    #[serde(default = "default_true")]
    pub scan_on_startup: bool,
    /// Periodic rescan interval for `serve`. Unset disables the poller.
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            report_fetch_failures: true,
            scan_on_startup: true,
            interval_secs: None,
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_fetch_timeout_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Config {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.detection.unused_days_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            anyhow::bail!("detection.unused_days_threshold must be a finite value >= 0");
        }
        if !(1..=10).contains(&self.detection.unused_severity) {
            anyhow::bail!("detection.unused_severity must be in [1, 10]");
        }
        if !(1..=10).contains(&self.detection.fetch_failed_severity) {
            anyhow::bail!("detection.fetch_failed_severity must be in [1, 10]");
        }
        if self.scan.concurrency == 0 {
            anyhow::bail!("scan.concurrency must be >= 1");
        }
        if self.scan.fetch_timeout_secs == 0 {
            anyhow::bail!("scan.fetch_timeout_secs must be >= 1");
        }
        if self.scan.interval_secs == Some(0) {
            anyhow::bail!("scan.interval_secs must be >= 1 when set");
        }
        if self.workspace.row_page_size == 0 {
            anyhow::bail!("workspace.row_page_size must be >= 1");
        }
        if self.workspace.timeout_secs == 0 {
            anyhow::bail!("workspace.timeout_secs must be >= 1");
        }
        if self.workspace.base_url.trim().is_empty() {
            anyhow::bail!("workspace.base_url must not be empty");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

/// Load `path` if given, else [`DEFAULT_CONFIG_PATH`].
///
/// An explicit path must exist. The default path may be absent, in which
/// case [`Config::default`] is used.
pub fn load_config_or_default(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return load_config(path);
    }

    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if !default_path.exists() {
        tracing::debug!(path = DEFAULT_CONFIG_PATH, "no config file; using defaults");
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }
    load_config(default_path)
}
