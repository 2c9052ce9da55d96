//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::services::target_inference::HitboxModel;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Root of fetched artifacts (match_<id>/, event_window_<id>/)
    #[serde(default = "default_raw_dir")]
    pub raw_dir: String,
    /// Root of replay frame output
    #[serde(default = "default_processed_dir")]
    pub processed_dir: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self { raw_dir: default_raw_dir(), processed_dir: default_processed_dir() }
    }
}

fn default_raw_dir() -> String {
    "data/raw".to_string()
}

fn default_processed_dir() -> String {
    "data/processed".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

fn default_db_path() -> String {
    "data/combat.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the bearer token
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Lookback for tournament discovery
    #[serde(default = "default_discovery_interval_secs")]
    pub discovery_interval_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            discovery_interval_secs: default_discovery_interval_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.osirion.gg/fortnite/v1".to_string()
}

fn default_api_key_env() -> String {
    "API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_discovery_interval_secs() -> u64 {
    2_592_000 // 30 days
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    #[serde(default = "default_sample_hz")]
    pub sample_hz: u32,
    #[serde(default = "default_frames_per_chunk")]
    pub frames_per_chunk: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { sample_hz: default_sample_hz(), frames_per_chunk: default_frames_per_chunk() }
    }
}

fn default_sample_hz() -> u32 {
    20
}

fn default_frames_per_chunk() -> usize {
    600 // 30s at 20Hz
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_base_radius")]
    pub base_radius: f64,
    #[serde(default = "default_growth_per_m")]
    pub growth_per_m: f64,
    #[serde(default = "default_max_range")]
    pub max_range: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_radius: default_base_radius(),
            growth_per_m: default_growth_per_m(),
            max_range: default_max_range(),
        }
    }
}

fn default_base_radius() -> f64 {
    HitboxModel::DEFAULT_BASE_RADIUS
}

fn default_growth_per_m() -> f64 {
    HitboxModel::DEFAULT_GROWTH_PER_M
}

fn default_max_range() -> f64 {
    HitboxModel::DEFAULT_MAX_RANGE
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// A processing claim older than this may be taken over by another run
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { stale_lock_secs: default_stale_lock_secs() }
    }
}

fn default_stale_lock_secs() -> u64 {
    21_600 // 6h
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    raw_dir: PathBuf,
    processed_dir: PathBuf,
    db_path: PathBuf,
    api_base_url: String,
    api_key_env: String,
    api_timeout: Duration,
    fetch_max_attempts: u32,
    fetch_base_delay: Duration,
    fetch_max_delay: Duration,
    discovery_interval_secs: u64,
    sample_hz: u32,
    frames_per_chunk: usize,
    hitbox: HitboxModel,
    stale_lock_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            raw_dir: PathBuf::from(toml_config.data.raw_dir),
            processed_dir: PathBuf::from(toml_config.data.processed_dir),
            db_path: PathBuf::from(toml_config.database.path),
            api_base_url: toml_config.api.base_url.trim_end_matches('/').to_string(),
            api_key_env: toml_config.api.api_key_env,
            api_timeout: Duration::from_secs(toml_config.api.timeout_secs),
            fetch_max_attempts: toml_config.api.max_attempts.max(1),
            fetch_base_delay: Duration::from_millis(toml_config.api.base_delay_ms),
            fetch_max_delay: Duration::from_millis(toml_config.api.max_delay_ms),
            discovery_interval_secs: toml_config.api.discovery_interval_secs,
            sample_hz: toml_config.replay.sample_hz.max(1),
            frames_per_chunk: toml_config.replay.frames_per_chunk.max(1),
            hitbox: HitboxModel {
                base_radius: toml_config.inference.base_radius,
                growth_per_m: toml_config.inference.growth_per_m,
                max_range: toml_config.inference.max_range,
            },
            stale_lock_secs: toml_config.pipeline.stale_lock_secs,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Bearer token from the configured environment variable, if set
    pub fn api_key(&self) -> Option<String> {
        env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    pub fn api_key_env(&self) -> &str {
        &self.api_key_env
    }

    pub fn api_timeout(&self) -> Duration {
        self.api_timeout
    }

    pub fn fetch_max_attempts(&self) -> u32 {
        self.fetch_max_attempts
    }

    pub fn fetch_base_delay(&self) -> Duration {
        self.fetch_base_delay
    }

    pub fn fetch_max_delay(&self) -> Duration {
        self.fetch_max_delay
    }

    pub fn discovery_interval_secs(&self) -> u64 {
        self.discovery_interval_secs
    }

    pub fn sample_hz(&self) -> u32 {
        self.sample_hz
    }

    pub fn frames_per_chunk(&self) -> usize {
        self.frames_per_chunk
    }

    pub fn hitbox(&self) -> HitboxModel {
        self.hitbox
    }

    pub fn stale_lock_secs(&self) -> u64 {
        self.stale_lock_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to redirect all on-disk state
    pub fn with_data_root(mut self, root: &Path) -> Self {
        self.raw_dir = root.join("raw");
        self.processed_dir = root.join("processed");
        self.db_path = root.join("combat.db");
        self
    }
}
