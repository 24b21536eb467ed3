use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Git-backed data directory holding `sources/` bundles and the
    /// per-directory index files. Synced across machines.
    pub data_dir: PathBuf,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub git: GitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub base_url: String,
    /// Name of the environment variable holding the API credential.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_store_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "LOREBASE_API_KEY".to_string()
}
fn default_store_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractorConfig {
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_extractor_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            model: None,
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_extractor_timeout(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}
fn default_extractor_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessingConfig {
    /// Files processed concurrently per batch. Bounded to respect the
    /// extractor's rate limits.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Pause between batches to smooth API load.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

fn default_concurrency() -> usize {
    2
}
fn default_batch_delay_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    /// Window for coalescing filesystem event bursts into one run.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Cadence of pull-enabled runs that pick up other machines' changes.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Per-machine directory for `daemon.pid`, `daemon.status.json`,
    /// `daemon.log`, and `sources.json`. Defaults to the platform state dir.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            state_dir: None,
        }
    }
}

fn default_debounce_ms() -> u64 {
    2000
}
fn default_poll_interval_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    /// When false, sync runs never commit or push the data directory.
    #[serde(default = "default_true")]
    pub push: bool,
    #[serde(default = "default_remote")]
    pub remote: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            push: default_true(),
            remote: default_remote(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_remote() -> String {
    "origin".to_string()
}

impl Config {
    /// Per-machine state directory (daemon files, sync source records).
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.daemon.state_dir {
            return dir.clone();
        }
        ProjectDirs::from("", "", "lorebase")
            .map(|d| d.data_local_dir().to_path_buf())
            .unwrap_or_else(|| self.data_dir.join(".state"))
    }

    pub fn sources_file(&self) -> PathBuf {
        self.state_dir().join("sources.json")
    }

    /// Minimal config for tests and commands that only touch local state.
    pub fn minimal(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            store: StoreConfig::default(),
            extractor: ExtractorConfig::default(),
            processing: ProcessingConfig::default(),
            daemon: DaemonConfig::default(),
            git: GitConfig::default(),
        }
    }
}

/// Default config file location (`<platform config dir>/config.toml`).
pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("", "", "lorebase")
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("./lorebase.toml"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.data_dir.as_os_str().is_empty() {
        anyhow::bail!("data_dir must not be empty");
    }
    if config.processing.concurrency == 0 {
        anyhow::bail!("processing.concurrency must be >= 1");
    }
    if config.daemon.debounce_ms == 0 {
        anyhow::bail!("daemon.debounce_ms must be >= 1");
    }
    if config.daemon.poll_interval_secs == 0 {
        anyhow::bail!("daemon.poll_interval_secs must be >= 1");
    }

    Ok(config)
}
