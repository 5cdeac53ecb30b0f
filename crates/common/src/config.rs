use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::{DEFAULT_APP_NAME, DEFAULT_PORT, DEFAULT_REPLICA_SET_NAME};

/// Unit configuration surface.
///
/// `replica_set_name` is the only operator option; the rest are deployment
/// settings fixed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    pub replica_set_name: String,
    pub app_name: String,
    pub port: u16,
    pub image: String,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            replica_set_name: DEFAULT_REPLICA_SET_NAME.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            port: DEFAULT_PORT,
            image: "mongodb:4.4.1".to_string(),
        }
    }
}

impl UnitConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: UnitConfig =
            serde_yaml::from_str(raw).context("failed to parse unit configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml_str(&raw)
    }

    pub fn with_replica_set_name(mut self, name: impl Into<String>) -> Self {
        self.replica_set_name = name.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.replica_set_name.is_empty() {
            bail!("replica_set_name must not be empty");
        }
        if self
            .replica_set_name
            .chars()
            .any(|c| c.is_whitespace() || c == '/')
        {
            bail!(
                "replica_set_name `{}` contains whitespace or '/'",
                self.replica_set_name
            );
        }
        if self.app_name.is_empty() {
            bail!("app_name must not be empty");
        }
        if self.port == 0 {
            bail!("port must be non-zero");
        }
        Ok(())
    }
}
