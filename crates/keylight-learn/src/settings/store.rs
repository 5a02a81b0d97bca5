//! Key/value settings stores
//!
//! Keys are flat slash-separated strings (`learn_colors/left_hand/white_keys/current`),
//! values are YAML values. The file-backed store rewrites the whole mapping on
//! every `set`; settings change rarely and the file is small.

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Persisted user settings
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> anyhow::Result<()>;
}

/// Get the default settings file path
///
/// Returns: ~/.config/keylight/settings.yaml
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keylight")
        .join("settings.yaml")
}

/// Read a typed value
///
/// Values written by older front ends may be strings (`"1"`, `"[0, 255, 0]"`);
/// those are parsed as YAML before giving up. Malformed values are logged and
/// treated as missing.
pub fn read_value<T: DeserializeOwned>(store: &dyn SettingsStore, key: &str) -> Option<T> {
    let value = store.get(key)?;
    if let Value::String(text) = &value {
        if let Ok(parsed) = serde_yaml::from_str::<T>(text) {
            return Some(parsed);
        }
    }
    match serde_yaml::from_value::<T>(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            log::warn!("Settings: Ignoring malformed value for '{}': {}", key, e);
            None
        }
    }
}

/// Read an on/off flag stored as a bool or as 0/1
pub fn read_flag(store: &dyn SettingsStore, key: &str) -> Option<bool> {
    match store.get(key)? {
        Value::Bool(flag) => Some(flag),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(text) => match text.trim() {
            "1" | "true" | "True" => Some(true),
            "0" | "false" | "False" => Some(false),
            other => {
                log::warn!("Settings: Ignoring malformed flag for '{}': {:?}", key, other);
                None
            }
        },
        other => {
            log::warn!("Settings: Ignoring malformed flag for '{}': {:?}", key, other);
            None
        }
    }
}

/// Serialize and store a typed value
pub fn write_value<T: Serialize>(
    store: &dyn SettingsStore,
    key: &str,
    value: &T,
) -> anyhow::Result<()> {
    let value = serde_yaml::to_value(value)
        .with_context(|| format!("Failed to serialize setting '{}'", key))?;
    store.set(key, value)
}

/// Settings held in memory only
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: RwLock<BTreeMap<String, Value>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert for seeding a store
    pub fn with(self, key: &str, value: impl Into<Value>) -> Self {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value.into());
        }
        self
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.values
            .write()
            .map_err(|_| anyhow::anyhow!("Settings lock poisoned"))?
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// Settings persisted to a flat YAML mapping
#[derive(Debug)]
pub struct YamlSettingsStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, Value>>,
}

impl YamlSettingsStore {
    /// Open the settings file
    ///
    /// If the file doesn't exist or is invalid, logs and starts empty
    /// (every setting at its default).
    pub fn open(path: &Path) -> Self {
        log::info!("YamlSettingsStore: Loading from {:?}", path);

        let values = if !path.exists() {
            log::info!("YamlSettingsStore: Settings file doesn't exist, using defaults");
            BTreeMap::new()
        } else {
            match std::fs::read_to_string(path) {
                Ok(contents) => {
                    match serde_yaml::from_str::<Option<BTreeMap<String, Value>>>(&contents) {
                        Ok(values) => values.unwrap_or_default(),
                        Err(e) => {
                            log::warn!(
                                "YamlSettingsStore: Failed to parse settings: {}, using defaults",
                                e
                            );
                            BTreeMap::new()
                        }
                    }
                }
                Err(e) => {
                    log::warn!(
                        "YamlSettingsStore: Failed to read settings file: {}, using defaults",
                        e
                    );
                    BTreeMap::new()
                }
            }
        };

        Self {
            path: path.to_path_buf(),
            values: RwLock::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, Value>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory: {:?}", parent))?;
        }

        let yaml = serde_yaml::to_string(values).context("Failed to serialize settings to YAML")?;

        std::fs::write(&self.path, yaml)
            .with_context(|| format!("Failed to write settings file: {:?}", self.path))?;

        Ok(())
    }
}

impl SettingsStore for YamlSettingsStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| anyhow::anyhow!("Settings lock poisoned"))?;
        values.insert(key.to_string(), value);
        self.persist(&values)
    }
}
