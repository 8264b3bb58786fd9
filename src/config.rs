use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::version::DEFAULT_VERSION;

/// Defaults applied when an option is left out
pub mod defaults {
    use std::path::PathBuf;

    /// HTTP port used when the caller passes 0
    pub const PORT: u16 = 6363;
    /// Bolt port for 3.x servers when none is given
    pub const BOLT_PORT: u16 = 6365;
    pub const START_TIMEOUT_SECS: u64 = 60;
    pub const STOP_TIMEOUT_SECS: u64 = 30;
    /// Environment variable naming the install root
    pub const HOME_ENV: &str = "NEOTESTDB_HOME";

    /// Install root: `$NEOTESTDB_HOME`, else the current directory
    pub fn home() -> PathBuf {
        std::env::var_os(HOME_ENV)
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Options for a single managed server
///
/// `home` must contain `bin/neo4j-community-<version>/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bolt_port: Option<u16>,
    pub home: PathBuf,
    pub start_timeout_secs: u64,
    pub stop_timeout_secs: u64,
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self {
            port: None,
            version: DEFAULT_VERSION.to_string(),
            bolt_port: None,
            home: defaults::home(),
            start_timeout_secs: defaults::START_TIMEOUT_SECS,
            stop_timeout_secs: defaults::STOP_TIMEOUT_SECS,
        }
    }
}

impl InstanceOptions {
    pub fn new(port: u16) -> Self {
        Self {
            port: Some(port),
            ..Self::default()
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn bolt_port(mut self, bolt_port: u16) -> Self {
        self.bolt_port = Some(bolt_port);
        self
    }

    pub fn home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Write options to a TOML file
pub async fn write_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize options to TOML: {}", e)))?;

    tokio::fs::write(path, content)
        .await
        .map_err(|e| Error::io(format!("Failed to write config to {}", path.display()), e))?;

    Ok(())
}

/// Read options from a TOML file
pub async fn read_config<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::io(format!("Failed to read config from {}", path.display()), e))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}
