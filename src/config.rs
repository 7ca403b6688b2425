//! Configuration Surface
//!
//! TOML-backed settings: folder layout, exclusion zones, marker/logo
//! sizing, passphrase policy, store endpoint and retry behavior. Zone
//! specs are validated at load time so malformed zones are fatal at
//! startup, not mid-job.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::geometry::{ZoneError, ZoneSpec};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("configuration parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Zone(#[from] ZoneError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub paths: Paths,
    pub settings: Settings,
    #[serde(default)]
    pub zones: BTreeMap<String, ZoneSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paths {
    pub watch_folder: PathBuf,
    pub output_folder: PathBuf,
    pub keys_folder: PathBuf,
    pub archive_folder: PathBuf,
    pub ledger_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub passphrase: String,
    /// Identity bytes bound into every signature payload.
    pub logo_id: String,
    #[serde(default = "default_true")]
    pub passphrase_prompt: bool,
    #[serde(default = "default_font_size")]
    pub marker_font_size: u32,
    #[serde(default = "default_logo_size")]
    pub logo_size: u32,
    #[serde(default = "default_store_api")]
    pub store_api: String,
    /// Strict posture: stop the watch loop on the first failed job.
    #[serde(default)]
    pub halt_on_error: bool,
    #[serde(default = "default_upload_attempts")]
    pub upload_attempts: u32,
    #[serde(default = "default_upload_retry_ms")]
    pub upload_retry_ms: u64,
    #[serde(default = "default_stability_ms")]
    pub stability_interval_ms: u64,
    #[serde(default = "default_extension")]
    pub image_extension: String,
}

fn default_true() -> bool {
    true
}
fn default_font_size() -> u32 {
    24
}
fn default_logo_size() -> u32 {
    100
}
fn default_store_api() -> String {
    "http://127.0.0.1:5001".to_string()
}
fn default_upload_attempts() -> u32 {
    3
}
fn default_upload_retry_ms() -> u64 {
    2000
}
fn default_stability_ms() -> u64 {
    100
}
fn default_extension() -> String {
    "jpg".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for zone in self.zones.values() {
            zone.validate()?;
        }
        Ok(())
    }

    pub fn zone_specs(&self) -> Vec<ZoneSpec> {
        self.zones.values().cloned().collect()
    }

    pub fn ensure_folders(&self) -> std::io::Result<()> {
        for folder in [
            &self.paths.watch_folder,
            &self.paths.output_folder,
            &self.paths.keys_folder,
            &self.paths.archive_folder,
        ] {
            fs::create_dir_all(folder)?;
        }
        if let Some(parent) = self.paths.ledger_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}
