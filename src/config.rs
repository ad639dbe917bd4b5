use crate::error::{ExtractError, Result};
use std::path::PathBuf;

pub const DEFAULT_API_URL: &str = "http://localhost:5000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const APP_DIR_NAME: &str = "invoice-extract";
pub const DB_FILE_NAME: &str = "invoice_extract.db";

pub const ENV_API_URL: &str = "EXTRACT_API_URL";
pub const ENV_TIMEOUT: &str = "EXTRACT_TIMEOUT_SECS";
pub const ENV_DATA_DIR: &str = "EXTRACT_DATA_DIR";
pub const ENV_API_KEY: &str = "EXTRACT_API_KEY";

/// Values given on the command line; they win over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_url: String,
    pub timeout_secs: u64,
    pub data_dir: PathBuf,
    pub api_key: Option<String>,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR_NAME))
}

impl Config {
    /// Reads `.env` (working dir, then the app data dir) and the process environment,
    /// then applies `overrides`.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let data_dir = overrides
            .data_dir
            .clone()
            .or_else(|| std::env::var(ENV_DATA_DIR).ok().map(PathBuf::from))
            .unwrap_or_else(default_data_dir);
        let env_path = data_dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
        }
        Self::from_lookup(|key| std::env::var(key).ok(), overrides)
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F, overrides: &ConfigOverrides) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_url = overrides
            .api_url
            .clone()
            .or_else(|| non_empty(ENV_API_URL))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let timeout_secs = match overrides.timeout_secs {
            Some(t) => t,
            None => match non_empty(ENV_TIMEOUT) {
                Some(raw) => raw.parse::<u64>().map_err(|_| {
                    ExtractError::Config(format!("{} must be a whole number of seconds, got '{}'", ENV_TIMEOUT, raw))
                })?,
                None => DEFAULT_TIMEOUT_SECS,
            },
        };

        let data_dir = overrides
            .data_dir
            .clone()
            .or_else(|| non_empty(ENV_DATA_DIR).map(PathBuf::from))
            .unwrap_or_else(default_data_dir);

        let config = Config {
            api_url: api_url.trim().trim_end_matches('/').to_string(),
            timeout_secs,
            data_dir,
            api_key: non_empty(ENV_API_KEY),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ExtractError::Config(format!(
                "API URL must start with http:// or https://, got '{}'",
                self.api_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ExtractError::Config(
                "Request timeout must be greater than 0 seconds".to_string(),
            ));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }
}
