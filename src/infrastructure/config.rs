use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::write_json_atomic;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use url::Url;

pub const CONFIG_JSON: &str = "config.json";
pub const DEFAULT_DATASET: &str = "default";
const CONFIG_SCHEMA: u64 = 1;
const DEFAULT_LOG_LEVEL: &str = "info";

const SYNC_URL_KEYS: &[&str] = &["BLOCKDAY_SYNC_URL", "CLOUDFLARE_WORKER_URL"];
const VOICE_URL_KEYS: &[&str] = &["BLOCKDAY_VOICE_API_URL", "VOICE_MONKEY_API_URL"];
const DATASET_KEYS: &[&str] = &["BLOCKDAY_DATASET"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimerConfig {
    pub enable_announcements: bool,
    pub warning_at_minutes: Vec<u32>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            enable_announcements: true,
            warning_at_minutes: vec![5, 2],
        }
    }
}

impl TimerConfig {
    /// Warning points in seconds remaining, zero entries dropped.
    pub fn warning_thresholds(&self) -> Vec<u32> {
        let mut thresholds = self
            .warning_at_minutes
            .iter()
            .filter(|minutes| **minutes > 0)
            .map(|minutes| minutes.saturating_mul(60))
            .collect::<Vec<_>>();
        thresholds.sort_unstable_by(|left, right| right.cmp(left));
        thresholds.dedup();
        thresholds
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnnouncementBackend {
    #[default]
    Voice,
    Local,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AnnouncementConfig {
    pub backend: AnnouncementBackend,
    pub voice_api_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub worker_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub schema: u8,
    pub timer: TimerConfig,
    pub announcements: AnnouncementConfig,
    pub sync: SyncConfig,
    pub active_dataset: String,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema: 1,
            timer: TimerConfig::default(),
            announcements: AnnouncementConfig::default(),
            sync: SyncConfig::default(),
            active_dataset: DEFAULT_DATASET.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigWarning {
    #[error("sync is enabled but no worker URL is configured; sync will skip every file")]
    SyncWithoutEndpoint,
    #[error("sync worker URL is not a valid http(s) URL: {0}")]
    InvalidSyncEndpoint(String),
    #[error("voice announcements are enabled but no API URL is configured; announcements will only be logged")]
    VoiceWithoutEndpoint,
    #[error("voice announcement URL is not a valid http(s) URL: {0}")]
    InvalidVoiceEndpoint(String),
    #[error("dataset name '{0}' is not usable; falling back to 'default'")]
    InvalidDataset(String),
}

impl AppConfig {
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup_value(&lookup, SYNC_URL_KEYS) {
            self.sync.worker_url = url;
        }
        if let Some(url) = lookup_value(&lookup, VOICE_URL_KEYS) {
            self.announcements.voice_api_url = url;
        }
        if let Some(dataset) = lookup_value(&lookup, DATASET_KEYS) {
            self.active_dataset = dataset;
        }
    }

    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.sync.enabled {
            let url = self.sync.worker_url.trim();
            if url.is_empty() {
                warnings.push(ConfigWarning::SyncWithoutEndpoint);
            } else if !is_http_url(url) {
                warnings.push(ConfigWarning::InvalidSyncEndpoint(url.to_string()));
            }
        }

        if self.timer.enable_announcements
            && self.announcements.backend == AnnouncementBackend::Voice
        {
            let url = self.announcements.voice_api_url.trim();
            if url.is_empty() {
                warnings.push(ConfigWarning::VoiceWithoutEndpoint);
            } else if !is_http_url(url) {
                warnings.push(ConfigWarning::InvalidVoiceEndpoint(url.to_string()));
            }
        }

        if !is_valid_dataset_name(self.active_dataset.trim()) {
            warnings.push(ConfigWarning::InvalidDataset(self.active_dataset.clone()));
        }

        warnings
    }

    /// The worker base URL when sync is switched on and the URL is usable.
    pub fn sync_endpoint(&self) -> Option<&str> {
        let url = self.sync.worker_url.trim();
        (self.sync.enabled && is_http_url(url)).then_some(url.trim_end_matches('/'))
    }

    pub fn voice_endpoint(&self) -> Option<&str> {
        let url = self.announcements.voice_api_url.trim();
        is_http_url(url).then_some(url)
    }

    pub fn dataset_name(&self) -> &str {
        let name = self.active_dataset.trim();
        if is_valid_dataset_name(name) {
            name
        } else {
            DEFAULT_DATASET
        }
    }
}

pub fn ensure_default_config(root: &Path) -> Result<(), InfraError> {
    let path = root.join(CONFIG_JSON);
    if !path.exists() {
        write_json_atomic(&path, &AppConfig::default())?;
    }
    Ok(())
}

pub fn load_config(root: &Path) -> Result<AppConfig, InfraError> {
    let path = root.join(CONFIG_JSON);
    let raw = fs::read_to_string(&path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != CONFIG_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(serde_json::from_value(parsed)?)
}

/// Loads `config.json`, falling back to defaults when the file is unreadable,
/// then applies environment overrides.
pub fn load_config_or_default<F>(root: &Path, lookup: F) -> AppConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match load_config(root) {
        Ok(config) => config,
        Err(error) => {
            tracing::warn!(%error, "config.json unusable, using built-in defaults");
            AppConfig::default()
        }
    };
    config.apply_overrides(lookup);
    config
}

pub fn save_config(root: &Path, config: &AppConfig) -> Result<(), InfraError> {
    write_json_atomic(&root.join(CONFIG_JSON), config)
}

pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}

fn is_http_url(value: &str) -> bool {
    Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
        .unwrap_or(false)
}

fn is_valid_dataset_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}
