use std::{fs, path::PathBuf, sync::OnceLock};

use serde::Deserialize;

use crate::domain::Algo;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigLoadingError {
    #[error("failed to read the config ({0}): {1}")]
    FailedToReadConfig(PathBuf, String),

    #[error("failed to parse the config: {0}")]
    FailedToParseConfig(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub metastore: MetaStoreConfig,
    pub blobstore: BlobStoreConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default = "default_algo")]
    pub algo: Algo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetaStoreConfig {
    pub sqlite_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BlobStoreConfig {
    Fs { root: PathBuf, prefix: Option<String> },
    Http { base_url: String, prefix: Option<String> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_stability_poll_ms")]
    pub stability_poll_ms: u64,
    #[serde(default = "default_stability_attempts")]
    pub stability_attempts: u32,
    #[serde(default = "default_fleet_rescan_ms")]
    pub fleet_rescan_debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            stability_poll_ms: default_stability_poll_ms(),
            stability_attempts: default_stability_attempts(),
            fleet_rescan_debounce_ms: default_fleet_rescan_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    750
}

fn default_stability_poll_ms() -> u64 {
    150
}

fn default_stability_attempts() -> u32 {
    10
}

fn default_fleet_rescan_ms() -> u64 {
    300
}

fn default_algo() -> Algo {
    Algo::Sha256
}

impl Config {
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigLoadingError> {
        let config_str = fs::read_to_string(path)
            .map_err(|err| ConfigLoadingError::FailedToReadConfig(path.to_path_buf(), err.to_string()))?;

        toml::from_str(&config_str).map_err(|err| ConfigLoadingError::FailedToParseConfig(err.to_string()))
    }

    pub fn load() -> Result<Self, ConfigLoadingError> {
        Self::load_from(std::path::Path::new("portsy.toml"))
    }
}

static CONFIG_PATH_OVERRIDE: OnceLock<PathBuf> = OnceLock::new();

/// Lets the CLI point at a config file before the first `get_config()` call;
/// a no-op once the config has already been memoized.
pub fn set_config_path(path: PathBuf) {
    let _ = CONFIG_PATH_OVERRIDE.set(path);
}

pub fn get_config() -> Result<&'static Config, ConfigLoadingError> {
    static CONFIG: OnceLock<Result<Config, ConfigLoadingError>> = OnceLock::new();

    let result = CONFIG.get_or_init(|| {
        let path = CONFIG_PATH_OVERRIDE
            .get()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("portsy.toml"));
        Config::load_from(&path)
    });

    match result {
        Ok(config) => Ok(config),
        Err(err) => Err(err.clone()),
    }
}
