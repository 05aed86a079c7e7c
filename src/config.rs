// ABOUTME: TOML configuration for the update server, sync policy and update cadence
// ABOUTME: Loaded once by the binary and passed explicitly to the feed and engine

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::policy::SyncPolicy;

const DEFAULT_BASE_URL: &str = "http://10.0.2.2/webservice/";

/// A hundred years; anything longer is a typo.
const MAX_UPDATE_CHECK_PERIOD_HOURS: u64 = 100 * 365 * 24;

/// Update server connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub access_key: String,
    /// Records requested per page
    pub batch_size: u32,
    pub timeout_secs: u64,
    /// Restrict synchronisation to a single municipality (sent as `domain`).
    pub municipality: Option<i64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            access_key: String::new(),
            batch_size: 500,
            timeout_secs: 30,
            municipality: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub policy: SyncPolicy,
    /// How long a synchronised mirror stays fresh.
    pub update_check_period_hours: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            policy: SyncPolicy::default(),
            update_check_period_hours: 24,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        if config.server.batch_size == 0 {
            anyhow::bail!("server.batch_size must be at least 1");
        }
        if config.update_check_period_hours > MAX_UPDATE_CHECK_PERIOD_HOURS {
            anyhow::bail!(
                "update_check_period_hours must be at most {}, got {}",
                MAX_UPDATE_CHECK_PERIOD_HOURS,
                config.update_check_period_hours
            );
        }
        Ok(config)
    }

    /// Load `path` if given, otherwise the default location when it exists.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = default_config_path()?;
                if default.exists() {
                    Self::load(&default)
                } else {
                    tracing::debug!(
                        "No config file at {}, using built-in defaults",
                        default.display()
                    );
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn update_check_period(&self) -> Duration {
        Duration::from_secs(self.update_check_period_hours.saturating_mul(60 * 60))
    }
}

/// `~/.aquatest-sync/`, the home of the config and state files.
pub fn app_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
    Ok(home.join(".aquatest-sync"))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(app_dir()?.join("config.toml"))
}
