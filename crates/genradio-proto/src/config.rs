use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;
use tracing::{info, warn};

/// Environment variable overriding `directory.base_url`.
pub const DIRECTORY_URL_ENV: &str = "GENRADIO_DIRECTORY_URL";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Remote station catalog (radio-browser.info compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Base of the `json/stations` endpoints.
    #[serde(default = "default_directory_url")]
    pub base_url: String,
    /// Size of the top-voted listing loaded at startup.
    #[serde(default = "default_top_limit")]
    pub top_limit: usize,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_directory_url(),
            top_limit: default_top_limit(),
            search_limit: default_search_limit(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_directory_url() -> String {
    "https://de1.api.radio-browser.info/json/stations".to_string()
}

fn default_top_limit() -> usize {
    30
}

fn default_search_limit() -> usize {
    30
}

fn default_user_agent() -> String {
    format!("genradio/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_volume() -> f32 {
    0.8
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        let mut config = if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            info!("Wrote default config to {}", config_path.display());
            config
        } else {
            Self::load_from(&config_path)?
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The catalog base address is the only setting read from the environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(DIRECTORY_URL_ENV) {
            let url = url.trim();
            if url.is_empty() {
                warn!("{} is set but empty, ignoring", DIRECTORY_URL_ENV);
            } else {
                self.directory.base_url = url.trim_end_matches('/').to_string();
            }
        }
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
