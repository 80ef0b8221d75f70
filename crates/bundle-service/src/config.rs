//! Configuration management for the bundle service
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Where bundle records are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Redis,
    Memory,
}

impl FromStr for StorageMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("Unknown STORAGE_MODE: {} (expected redis or memory)", other),
        }
    }
}

/// Which controller the service talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerMode {
    Remote,
    Mock,
}

impl FromStr for ControllerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "mock" => Ok(Self::Mock),
            other => anyhow::bail!("Unknown CONTROLLER_MODE: {} (expected remote or mock)", other),
        }
    }
}

/// Application configuration
#[derive(Clone)]
pub struct Config {
    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    /// Redis connection URL
    pub redis_url: String,

    pub storage_mode: StorageMode,

    pub controller_mode: ControllerMode,

    /// Controller host, required in remote mode
    pub controller_address: Option<String>,

    pub controller_port: u16,

    /// Admin token of the controller, required in remote mode
    pub controller_token: Option<String>,

    /// Transport timeout of controller calls, in seconds
    pub controller_timeout_secs: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_host", &self.api_host)
            .field("api_port", &self.api_port)
            .field("redis_url", &self.redis_url)
            .field("storage_mode", &self.storage_mode)
            .field("controller_mode", &self.controller_mode)
            .field("controller_address", &self.controller_address)
            .field("controller_port", &self.controller_port)
            .field("controller_token", &self.controller_token.as_ref().map(|_| "***"))
            .field("controller_timeout_secs", &self.controller_timeout_secs)
            .finish()
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let config = Config {
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "8086".to_string())
                .parse()
                .context("Invalid API_PORT")?,

            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),

            storage_mode: env::var("STORAGE_MODE")
                .unwrap_or_else(|_| "redis".to_string())
                .parse()?,

            controller_mode: env::var("CONTROLLER_MODE")
                .unwrap_or_else(|_| "remote".to_string())
                .parse()?,

            controller_address: non_empty("CONTROLLER_ADDRESS"),

            controller_port: env::var("CONTROLLER_PORT")
                .unwrap_or_else(|_| "17070".to_string())
                .parse()
                .context("Invalid CONTROLLER_PORT")?,

            controller_token: non_empty("CONTROLLER_TOKEN"),

            controller_timeout_secs: env::var("CONTROLLER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid CONTROLLER_TIMEOUT_SECS")?,
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }

        if self.controller_timeout_secs == 0 {
            anyhow::bail!("CONTROLLER_TIMEOUT_SECS must be greater than 0");
        }

        if self.controller_mode == ControllerMode::Remote {
            if self.controller_address.is_none() {
                anyhow::bail!("CONTROLLER_ADDRESS is required when CONTROLLER_MODE is remote");
            }
            if self.controller_token.is_none() {
                anyhow::bail!("CONTROLLER_TOKEN is required when CONTROLLER_MODE is remote");
            }
            if self.controller_port == 0 {
                anyhow::bail!("CONTROLLER_PORT must be greater than 0");
            }
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    pub fn controller_timeout(&self) -> Duration {
        Duration::from_secs(self.controller_timeout_secs)
    }
}
