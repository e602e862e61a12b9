use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::ArchiverError;

/// Single-layer DVD.
pub const DEFAULT_CAPACITY_BYTES: u64 = 4_700_000_000;
pub const DEFAULT_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_BACKUP_DIR: &str = "./lumo_backups";
pub const DEFAULT_STATE_FILE: &str = "./lumo_backup_state.json";

pub const ENV_BASE_URL: &str = "LUMO_MA_BASE_URL";
pub const ENV_API_KEY: &str = "LUMO_MA_API_KEY";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub backup_dir: Option<String>,
    #[serde(default)]
    pub state_file: Option<String>,
    #[serde(default)]
    pub capacity_bytes: Option<u64>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

/// Flag-level overrides collected by the CLI; they win over the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub backup_dir: Option<String>,
    pub state_file: Option<String>,
    pub capacity_bytes: Option<u64>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub base_url: String,
    pub api_key: String,
    pub backup_dir: Utf8PathBuf,
    pub state_file: Utf8PathBuf,
    pub capacity_bytes: u64,
    pub page_size: u32,
}

/// Subset of the settings needed by commands that never talk to the catalog
/// (`status`, `reset`).
#[derive(Debug, Clone)]
pub struct LocalSettings {
    pub backup_dir: Utf8PathBuf,
    pub state_file: Utf8PathBuf,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolution order per field: CLI flag, then config file, then
    /// environment (credentials only), then built-in default.
    pub fn resolve(
        path: Option<&str>,
        overrides: Overrides,
    ) -> Result<ResolvedSettings, ArchiverError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("lumo-ma.json"),
        };

        if path.is_some() && !config_path.exists() {
            return Err(ArchiverError::ConfigRead(config_path));
        }

        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| ArchiverError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content)
                .map_err(|err| ArchiverError::ConfigParse(err.to_string()))?
        } else {
            Config::default()
        };

        Self::resolve_config(config, overrides)
    }

    /// Resolve only the local paths; credentials may be absent.
    pub fn resolve_local(
        path: Option<&str>,
        overrides: Overrides,
    ) -> Result<LocalSettings, ArchiverError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("lumo-ma.json"),
        };
        if path.is_some() && !config_path.exists() {
            return Err(ArchiverError::ConfigRead(config_path));
        }
        let config: Config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| ArchiverError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content)
                .map_err(|err| ArchiverError::ConfigParse(err.to_string()))?
        } else {
            Config::default()
        };

        Ok(LocalSettings {
            backup_dir: Utf8PathBuf::from(
                overrides
                    .backup_dir
                    .or(config.backup_dir)
                    .unwrap_or_else(|| DEFAULT_BACKUP_DIR.to_string()),
            ),
            state_file: Utf8PathBuf::from(
                overrides
                    .state_file
                    .or(config.state_file)
                    .unwrap_or_else(|| DEFAULT_STATE_FILE.to_string()),
            ),
        })
    }

    pub fn resolve_config(
        config: Config,
        overrides: Overrides,
    ) -> Result<ResolvedSettings, ArchiverError> {
        let base_url = overrides
            .base_url
            .or(config.base_url)
            .or_else(|| non_empty_env(ENV_BASE_URL))
            .ok_or_else(|| {
                ArchiverError::InvalidConfig(format!(
                    "catalog base URL is required (--base-url, config file, or {ENV_BASE_URL})"
                ))
            })?;
        let api_key = overrides
            .api_key
            .or(config.api_key)
            .or_else(|| non_empty_env(ENV_API_KEY))
            .ok_or_else(|| {
                ArchiverError::InvalidConfig(format!(
                    "catalog API key is required (--api-key, config file, or {ENV_API_KEY})"
                ))
            })?;

        let capacity_bytes = overrides
            .capacity_bytes
            .or(config.capacity_bytes)
            .unwrap_or(DEFAULT_CAPACITY_BYTES);
        if capacity_bytes == 0 {
            return Err(ArchiverError::InvalidConfig(
                "chunk capacity must be greater than zero".to_string(),
            ));
        }
        let page_size = overrides
            .page_size
            .or(config.page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(ArchiverError::InvalidConfig(
                "page size must be greater than zero".to_string(),
            ));
        }

        Ok(ResolvedSettings {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            backup_dir: Utf8PathBuf::from(
                overrides
                    .backup_dir
                    .or(config.backup_dir)
                    .unwrap_or_else(|| DEFAULT_BACKUP_DIR.to_string()),
            ),
            state_file: Utf8PathBuf::from(
                overrides
                    .state_file
                    .or(config.state_file)
                    .unwrap_or_else(|| DEFAULT_STATE_FILE.to_string()),
            ),
            capacity_bytes,
            page_size,
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
