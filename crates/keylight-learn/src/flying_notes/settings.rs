//! Renderer settings (`flying_notes/*` keys)

use crate::settings::{read_flag, read_value, write_value, SettingsStore};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MIN_SMOOTHNESS_HZ: u32 = 1;
pub const MAX_SMOOTHNESS_HZ: u32 = 240;

mod keys {
    pub const ENABLED: &str = "flying_notes/enabled";
    pub const SPEED: &str = "flying_notes/speed";
    pub const NOTE_HEIGHT: &str = "flying_notes/note_height";
    pub const KEYBOARD_HEIGHT: &str = "flying_notes/keyboard_height";
    pub const SHOW_MEASURES: &str = "flying_notes/show_measures";
    pub const ANIMATION_SMOOTHNESS: &str = "flying_notes/animation_smoothness";
    pub const CANVAS_HEIGHT: &str = "flying_notes/canvas_height";
    pub const FALL_DISTANCE: &str = "flying_notes/fall_distance";
}

/// Settings of the flying-notes view, sent with every frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlyingNotesSettings {
    pub enabled: bool,
    /// Song seconds per wall-clock second
    pub speed: f64,
    pub note_height: u32,
    pub keyboard_height: u32,
    pub show_measures: bool,
    /// Frame rate in Hz
    pub animation_smoothness: u32,
    pub canvas_height: u32,
    /// Pixels a note falls before reaching the keyboard
    pub fall_distance: u32,
}

impl Default for FlyingNotesSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            speed: 1.0,
            note_height: 20,
            keyboard_height: 80,
            show_measures: true,
            animation_smoothness: 60,
            canvas_height: 600,
            fall_distance: 520,
        }
    }
}

impl FlyingNotesSettings {
    /// Read from `store`, keeping defaults for missing keys
    pub fn load(store: &dyn SettingsStore) -> Self {
        let d = Self::default();
        Self {
            enabled: read_flag(store, keys::ENABLED).unwrap_or(d.enabled),
            speed: read_value(store, keys::SPEED).unwrap_or(d.speed),
            note_height: read_value(store, keys::NOTE_HEIGHT).unwrap_or(d.note_height),
            keyboard_height: read_value(store, keys::KEYBOARD_HEIGHT).unwrap_or(d.keyboard_height),
            show_measures: read_flag(store, keys::SHOW_MEASURES).unwrap_or(d.show_measures),
            animation_smoothness: read_value(store, keys::ANIMATION_SMOOTHNESS)
                .unwrap_or(d.animation_smoothness),
            canvas_height: read_value(store, keys::CANVAS_HEIGHT).unwrap_or(d.canvas_height),
            fall_distance: read_value(store, keys::FALL_DISTANCE).unwrap_or(d.fall_distance),
        }
        .sanitized()
    }

    /// Replace values the frame loop cannot work with
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        if !self.speed.is_finite() || self.speed <= 0.0 {
            log::warn!("[FlyingNotes] Invalid speed {}, using {}", self.speed, d.speed);
            self.speed = d.speed;
        }
        if self.fall_distance == 0 {
            self.fall_distance = d.fall_distance;
        }
        self.animation_smoothness = self
            .animation_smoothness
            .clamp(MIN_SMOOTHNESS_HZ, MAX_SMOOTHNESS_HZ);
        self
    }

    /// Song seconds visible above the keyboard
    pub fn lookahead_seconds(&self) -> f64 {
        self.fall_distance as f64 / 100.0
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.animation_smoothness.max(MIN_SMOOTHNESS_HZ) as f64)
    }
}

/// Partial settings update, as posted by the web front end
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FlyingNotesPatch {
    pub enabled: Option<bool>,
    pub speed: Option<f64>,
    pub note_height: Option<u32>,
    pub keyboard_height: Option<u32>,
    pub show_measures: Option<bool>,
    pub animation_smoothness: Option<u32>,
    pub canvas_height: Option<u32>,
    pub fall_distance: Option<u32>,
}

impl FlyingNotesPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply to `settings` and return the sanitized result
    pub fn apply(&self, settings: &FlyingNotesSettings) -> FlyingNotesSettings {
        let mut next = settings.clone();
        if let Some(v) = self.enabled {
            next.enabled = v;
        }
        if let Some(v) = self.speed {
            next.speed = v;
        }
        if let Some(v) = self.note_height {
            next.note_height = v;
        }
        if let Some(v) = self.keyboard_height {
            next.keyboard_height = v;
        }
        if let Some(v) = self.show_measures {
            next.show_measures = v;
        }
        if let Some(v) = self.animation_smoothness {
            next.animation_smoothness = v;
        }
        if let Some(v) = self.canvas_height {
            next.canvas_height = v;
        }
        if let Some(v) = self.fall_distance {
            next.fall_distance = v;
        }
        next.sanitized()
    }

    /// Write the provided keys; flags are stored as 0/1
    pub fn persist(&self, store: &dyn SettingsStore) -> anyhow::Result<()> {
        if let Some(v) = self.enabled {
            write_value(store, keys::ENABLED, &(v as u8))?;
        }
        if let Some(v) = self.speed {
            write_value(store, keys::SPEED, &v)?;
        }
        if let Some(v) = self.note_height {
            write_value(store, keys::NOTE_HEIGHT, &v)?;
        }
        if let Some(v) = self.keyboard_height {
            write_value(store, keys::KEYBOARD_HEIGHT, &v)?;
        }
        if let Some(v) = self.show_measures {
            write_value(store, keys::SHOW_MEASURES, &(v as u8))?;
        }
        if let Some(v) = self.animation_smoothness {
            write_value(store, keys::ANIMATION_SMOOTHNESS, &v)?;
        }
        if let Some(v) = self.canvas_height {
            write_value(store, keys::CANVAS_HEIGHT, &v)?;
        }
        if let Some(v) = self.fall_distance {
            write_value(store, keys::FALL_DISTANCE, &v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettingsStore;

    #[test]
    fn test_load_accepts_string_and_int_values() {
        let store = MemorySettingsStore::new()
            .with(keys::ENABLED, "1")
            .with(keys::SPEED, "1.5")
            .with(keys::SHOW_MEASURES, 0)
            .with(keys::ANIMATION_SMOOTHNESS, 30);
        let settings = FlyingNotesSettings::load(&store);
        assert!(settings.enabled);
        assert_eq!(settings.speed, 1.5);
        assert!(!settings.show_measures);
        assert_eq!(settings.animation_smoothness, 30);
        assert_eq!(settings.fall_distance, 520);
    }

    #[test]
    fn test_sanitized_rejects_unusable_values() {
        let settings = FlyingNotesSettings {
            speed: 0.0,
            animation_smoothness: 0,
            fall_distance: 0,
            ..FlyingNotesSettings::default()
        }
        .sanitized();
        assert_eq!(settings.speed, 1.0);
        assert_eq!(settings.animation_smoothness, MIN_SMOOTHNESS_HZ);
        assert_eq!(settings.fall_distance, 520);
        assert_eq!(settings.lookahead_seconds(), 5.2);
    }

    #[test]
    fn test_patch_persists_only_given_keys() {
        let store = MemorySettingsStore::new();
        let patch = FlyingNotesPatch {
            enabled: Some(true),
            note_height: Some(30),
            ..FlyingNotesPatch::default()
        };
        patch.persist(&store).unwrap();

        assert_eq!(read_value::<u8>(&store, keys::ENABLED), Some(1));
        assert_eq!(read_value::<u32>(&store, keys::NOTE_HEIGHT), Some(30));
        assert!(store.get(keys::SPEED).is_none());

        let applied = patch.apply(&FlyingNotesSettings::default());
        assert!(applied.enabled);
        assert_eq!(applied.note_height, 30);
        assert_eq!(applied.keyboard_height, 80);
    }

    #[test]
    fn test_patch_from_json() {
        let patch: FlyingNotesPatch = serde_json::from_str(r#"{"speed": 2.0}"#).unwrap();
        assert_eq!(patch.speed, Some(2.0));
        assert!(patch.enabled.is_none());
        assert!(!patch.is_empty());
        assert!(FlyingNotesPatch::default().is_empty());
    }
}
