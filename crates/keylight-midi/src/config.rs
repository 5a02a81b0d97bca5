//! MIDI port configuration schema and loader
//!
//! Configuration is stored as YAML next to the trainer settings.
//! Default location: ~/.config/keylight/midi.yaml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default capacity of the keyboard input queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// Which ports the trainer talks to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiPortsConfig {
    /// Input port name substring to match (case-insensitive)
    pub input_port: String,

    /// Output port for accompaniment playback; `None` disables playback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_port: Option<String>,

    /// Capacity of the keyboard input queue
    pub queue_capacity: usize,
}

impl Default for MidiPortsConfig {
    fn default() -> Self {
        Self {
            input_port: String::new(),
            playback_port: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Get the default MIDI port config file path
///
/// Returns: ~/.config/keylight/midi.yaml
pub fn default_ports_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keylight")
        .join("midi.yaml")
}

/// Load port configuration from a YAML file
///
/// If the file doesn't exist or is invalid, logs and returns the default
/// (first available input port, no playback).
pub fn load_ports_config(path: &Path) -> MidiPortsConfig {
    log::info!("load_ports_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_ports_config: Config file doesn't exist, using defaults");
        return MidiPortsConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<MidiPortsConfig>(&contents) {
            Ok(config) => {
                log::info!(
                    "load_ports_config: input '{}', playback {:?}",
                    config.input_port,
                    config.playback_port
                );
                config
            }
            Err(e) => {
                log::warn!("load_ports_config: Failed to parse config: {}", e);
                MidiPortsConfig::default()
            }
        },
        Err(e) => {
            log::warn!("load_ports_config: Failed to read config file: {}", e);
            MidiPortsConfig::default()
        }
    }
}

/// Save port configuration to a YAML file
///
/// Creates parent directories if they don't exist.
pub fn save_ports_config(config: &MidiPortsConfig, path: &Path) -> anyhow::Result<()> {
    use anyhow::Context;

    log::info!("save_ports_config: Saving to {:?}", path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize MIDI config to YAML")?;

    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write MIDI config file: {:?}", path))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Route the load/save log lines to the test output
    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_default_config() {
        let config = MidiPortsConfig::default();
        assert!(config.input_port.is_empty());
        assert_eq!(config.playback_port, None);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_yaml_parsing_partial() {
        let yaml = r#"
input_port: "digital piano"
playback_port: "fluid"
"#;
        let config: MidiPortsConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.input_port, "digital piano");
        assert_eq!(config.playback_port.as_deref(), Some("fluid"));
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_save_and_load() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("midi.yaml");

        let config = MidiPortsConfig {
            input_port: "usb".to_string(),
            playback_port: Some("synth".to_string()),
            queue_capacity: 64,
        };
        save_ports_config(&config, &path).unwrap();
        assert_eq!(load_ports_config(&path), config);
    }

    #[test]
    fn test_invalid_file_falls_back_to_default() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("midi.yaml");
        std::fs::write(&path, "queue_capacity: [not a number").unwrap();
        assert_eq!(load_ports_config(&path), MidiPortsConfig::default());
    }
}
