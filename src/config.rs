use std::fs::read_to_string;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file")]
    FailedToRead,
    #[error("invalid toml in configuration file")]
    InvalidToml,
    #[error("missing required configuration: {0}")]
    MissingField(&'static str),
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Configuration {
    pub working_directory: Option<String>,

    pub number_of_stripes: Option<usize>,
    pub flush_highwaters_after_n_updates: Option<u64>,
    pub compact_delta_after_n_updates: Option<u64>,
    pub compaction_interval_millis: Option<u64>,
    pub default_quorum_timeout_millis: Option<u64>,
}

impl Configuration {
    // default configuration file location is /etc/amza/config.toml
    pub fn parse_config_file(file: &str) -> Result<Configuration> {
        info!("parsing configuration file: {}", file);

        let file_contents = read_to_string(file).map_err(|_| {
            error!("failed to read configuration file {}", file);
            anyhow!(ConfigError::FailedToRead)
        })?;

        let ret: Configuration = toml::from_str(&file_contents).map_err(|e| {
            error!("failed to parse configuration file: {}", e);
            anyhow!(ConfigError::InvalidToml)
        })?;

        debug!("configuration: {:?}", ret);
        Ok(ret)
    }

    pub fn validate(&self) -> Result<()> {
        if self.working_directory.is_none() {
            return Err(anyhow!(ConfigError::MissingField("working_directory")));
        }
        if self.number_of_stripes == Some(0) {
            return Err(anyhow!(ConfigError::MissingField("number_of_stripes")));
        }
        Ok(())
    }

    pub fn working_directory(&self) -> PathBuf {
        self.working_directory
            .as_deref()
            .unwrap_or("/var/lib/amza")
            .into()
    }

    pub fn number_of_stripes(&self) -> usize {
        self.number_of_stripes.unwrap_or(3)
    }

    pub fn flush_highwaters_after_n_updates(&self) -> u64 {
        self.flush_highwaters_after_n_updates.unwrap_or(10_000)
    }

    pub fn compact_delta_after_n_updates(&self) -> u64 {
        self.compact_delta_after_n_updates.unwrap_or(50_000)
    }

    pub fn compaction_interval_millis(&self) -> u64 {
        self.compaction_interval_millis.unwrap_or(60_000)
    }

    pub fn default_quorum_timeout_millis(&self) -> u64 {
        self.default_quorum_timeout_millis.unwrap_or(30_000)
    }
}
