// src/config.rs

//! Loads the operator configuration from TOML, applies environment overrides
//! and validates the result.

use crate::core::instance::{Address, Credentials, TlsMode};
use crate::core::recovery::RecoverySettings;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Environment variable that overrides `connection.password`.
pub const PASSWORD_ENV: &str = "GROUPWARDEN_PASSWORD";

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct AdminConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Members asked for the catalog when looking a cluster up.
    #[serde(default)]
    pub seeds: Vec<Address>,
    pub connection: Credentials,
    #[serde(default)]
    pub recovery: RecoverySettings,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            seeds: Vec::new(),
            connection: Credentials::default(),
            recovery: RecoverySettings::default(),
        }
    }
}

impl AdminConfig {
    /// Reads and validates the configuration file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the file and applies environment overrides, leaving validation
    /// to the caller so command-line seeds can be added first.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{}'", path.display()))?;
        let mut config = Self::from_toml(&contents)
            .with_context(|| format!("Invalid configuration in '{}'", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Parses a configuration without environment overrides or validation.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse TOML")
    }

    /// Takes the password from the environment when it is set there.
    pub fn apply_env(&mut self) {
        if let Ok(password) = std::env::var(PASSWORD_ENV)
            && !password.is_empty()
        {
            self.connection.password = password;
        }
    }

    /// Appends seeds given on the command line, skipping duplicates.
    pub fn add_seeds(&mut self, seeds: impl IntoIterator<Item = Address>) {
        for seed in seeds {
            if !self.seeds.contains(&seed) {
                self.seeds.push(seed);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection.user.trim().is_empty() {
            return Err(anyhow!("connection.user cannot be empty"));
        }
        if self.seeds.is_empty() {
            return Err(anyhow!("at least one seed address is required"));
        }
        if self.connection.tls == TlsMode::VerifyCa && self.connection.ssl_ca.is_none() {
            return Err(anyhow!(
                "connection.ssl_ca is required when connection.tls is \"verify-ca\""
            ));
        }
        if self.connection.password.is_empty() {
            warn!(
                "No password configured for '{}'; set connection.password or {}",
                self.connection.user, PASSWORD_ENV
            );
        }

        let recovery = &self.recovery;
        let timeouts = [
            ("connect_timeout", recovery.connect_timeout),
            ("query_timeout", recovery.query_timeout),
            ("member_online_timeout", recovery.member_online_timeout),
            ("poll_interval", recovery.poll_interval),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(anyhow!("recovery.{name} cannot be 0"));
            }
        }
        if recovery.poll_interval > recovery.member_online_timeout {
            return Err(anyhow!(
                "recovery.poll_interval cannot exceed recovery.member_online_timeout"
            ));
        }
        Ok(())
    }
}
