use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

/// Tunables for the consumption engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Advance past errored clips without waiting for a manual skip
    pub auto_skip: bool,
    pub load_timeout_ms: u64,
    pub max_transient_retries: u32,
    pub queue_ttl_secs: u64,
    pub queue_window: usize,
    pub empty_backoff_ms: u64,
    pub remove_settle_ms: u64,
    pub tick_interval_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            auto_skip: true,
            load_timeout_ms: 8_000,
            max_transient_retries: 3,
            queue_ttl_secs: 300,
            queue_window: 8,
            empty_backoff_ms: 5_000,
            remove_settle_ms: 2_000,
            tick_interval_ms: 1_000,
        }
    }
}

impl EngineSettings {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn queue_ttl(&self) -> Duration {
        Duration::from_secs(self.queue_ttl_secs)
    }

    pub fn empty_backoff(&self) -> Duration {
        Duration::from_millis(self.empty_backoff_ms)
    }

    pub fn remove_settle(&self) -> Duration {
        Duration::from_millis(self.remove_settle_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Where the remote service lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub access_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".into(),
            access_token: None,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserSettings {
    engine: EngineSettings,
    backend: BackendConfig,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring unreadable settings at {}: {err}",
                    path.display()
                );
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn engine(&self) -> EngineSettings {
        self.read().engine.clone()
    }

    pub fn backend(&self) -> BackendConfig {
        self.read().backend.clone()
    }

    pub fn update_engine(&self, settings: EngineSettings) -> Result<()> {
        let mut guard = self.write();
        guard.engine = settings;
        self.persist(&guard)
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("watchloop-{}-{}.json", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = SettingsStore::new(temp_path("missing")).unwrap();
        assert_eq!(store.engine(), EngineSettings::default());
        assert!(store.backend().access_token.is_none());
    }

    #[test]
    fn update_persists_and_reloads() {
        let path = temp_path("roundtrip");
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut settings = store.engine();
        settings.auto_skip = false;
        settings.queue_window = 5;
        store.update_engine(settings.clone()).unwrap();

        let reloaded = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(reloaded.engine(), settings);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let path = temp_path("partial");
        fs::write(&path, r#"{ "engine": { "auto_skip": false } }"#).unwrap();

        let store = SettingsStore::new(path.clone()).unwrap();
        let engine = store.engine();
        assert!(!engine.auto_skip);
        assert_eq!(engine.load_timeout_ms, 8_000);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn garbage_json_falls_back_to_defaults() {
        let path = temp_path("garbage");
        fs::write(&path, "not json").unwrap();
        let store = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(store.engine(), EngineSettings::default());
        let _ = fs::remove_file(path);
    }
}
