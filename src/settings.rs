// Per-user refresh preferences over an injectable key-value backend.
// load() never fails: missing or corrupt data falls back to the default
// without rewriting storage.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::models::RefreshSettings;

const KEY_NAMESPACE: &str = "dashboard.refresh";

/// Storage key for one user. Namespaced so switching users never reads or
/// overwrites another user's preference.
pub fn settings_key(user_id: &str) -> String {
    format!("{KEY_NAMESPACE}.{user_id}")
}

/// Backing storage seam; lets tests run against an in-memory map.
pub trait SettingsBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsBackend for MemoryBackend {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|m| m.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut m = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("settings map poisoned"))?;
        m.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut m = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("settings map poisoned"))?;
        m.remove(key);
        Ok(())
    }
}

/// One JSON file per key under a directory.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl SettingsBackend for FileBackend {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        std::fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Clone)]
pub struct SettingsStore {
    backend: Arc<dyn SettingsBackend>,
}

impl SettingsStore {
    pub fn new(backend: Arc<dyn SettingsBackend>) -> Self {
        Self { backend }
    }

    /// Never errors. Missing key, unreadable backend, malformed JSON, or an
    /// out-of-range interval all yield the default; storage is not rewritten.
    pub fn load(&self, user_id: &str) -> RefreshSettings {
        let Some(raw) = self.backend.get(&settings_key(user_id)) else {
            return RefreshSettings::default();
        };
        match serde_json::from_str::<RefreshSettings>(&raw) {
            Ok(s) if s.interval_minutes >= 1 => s,
            Ok(s) => {
                warn!(
                    user_id,
                    interval = s.interval_minutes,
                    "stored refresh interval out of range; using defaults"
                );
                RefreshSettings::default()
            }
            Err(e) => {
                warn!(user_id, error = %e, "malformed refresh settings; using defaults");
                RefreshSettings::default()
            }
        }
    }

    pub fn save(&self, user_id: &str, settings: &RefreshSettings) -> anyhow::Result<()> {
        anyhow::ensure!(
            settings.interval_minutes >= 1,
            "interval_minutes must be >= 1, got {}",
            settings.interval_minutes
        );
        let raw = serde_json::to_string(settings)?;
        self.backend.put(&settings_key(user_id), &raw)
    }

    /// Reverts the user to the default (disabled / 5 minutes).
    pub fn clear(&self, user_id: &str) -> anyhow::Result<()> {
        self.backend.remove(&settings_key(user_id))
    }
}
