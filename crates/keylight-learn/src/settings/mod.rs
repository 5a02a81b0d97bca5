//! Practice settings
//!
//! [`LearnSettings`] is a typed snapshot of the user settings the practice
//! engine needs. It is read from a [`SettingsStore`] once when the engine is
//! built and again on explicit reload; missing or malformed keys fall back to
//! defaults.
//!
//! Enumerations are stored as integers (`practice: 0` = Melody) so settings
//! files written by the web front end keep working.

mod store;

pub use store::{
    default_settings_path, read_flag, read_value, write_value, MemorySettingsStore,
    SettingsStore, YamlSettingsStore,
};

use crate::color::{BrightnessLevels, ColorTable, LegacyPalette, Rgb};
use crate::led::KeyMapping;
use crate::timeline::{Hand, LEFT_HAND_CHANNEL, RIGHT_HAND_CHANNEL};
use std::time::Duration;

/// Minimum width of a practice loop, in percent of the song
pub const MIN_LOOP_WIDTH_PCT: f64 = 10.0;
pub const MIN_TEMPO_SCALE_PCT: u32 = 10;
pub const MAX_TEMPO_SCALE_PCT: u32 = 200;
pub const MAX_MISTAKE_THRESHOLD: u32 = 255;

macro_rules! indexed_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $index:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub enum $name {
            #[default]
            $($variant),+
        }

        impl $name {
            /// Settings-file index
            pub fn index(self) -> u8 {
                match self {
                    $($name::$variant => $index),+
                }
            }

            pub fn from_index(index: u8) -> Option<Self> {
                match index {
                    $($index => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

indexed_enum!(
    /// How the engine treats the player
    PracticeMode { Melody = 0, Rhythm = 1, Listen = 2 }
);

indexed_enum!(
    /// Which hand the player is asked to play
    HandsFilter { Both = 0, Right = 1, Left = 2 }
);

indexed_enum!(
    /// Hand whose accompaniment is not played back
    MuteHand { Off = 0, Right = 1, Left = 2 }
);

impl HandsFilter {
    /// Does this filter ask the player to press notes on `channel`?
    pub fn includes(self, channel: u8) -> bool {
        match self {
            HandsFilter::Both => true,
            HandsFilter::Right => channel == RIGHT_HAND_CHANNEL,
            HandsFilter::Left => channel == LEFT_HAND_CHANNEL,
        }
    }
}

/// Engine pacing knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSettings {
    /// Subtracted from every pacing sleep to absorb processing overhead
    pub epsilon_ms: u64,
    /// Pause (and strip clear) before each pass over the loop
    pub lead_in_ms: u64,
    /// Longest single wait on the input queue while a gate is open
    pub gate_poll_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            epsilon_ms: 3,
            lead_in_ms: 1000,
            gate_poll_ms: 5,
        }
    }
}

impl TimingSettings {
    pub fn epsilon(&self) -> Duration {
        Duration::from_millis(self.epsilon_ms)
    }

    pub fn lead_in(&self) -> Duration {
        Duration::from_millis(self.lead_in_ms)
    }

    pub fn gate_poll(&self) -> Duration {
        Duration::from_millis(self.gate_poll_ms.max(1))
    }
}

/// Settings snapshot used by one practice run
#[derive(Debug, Clone, PartialEq)]
pub struct LearnSettings {
    pub practice_mode: PracticeMode,
    pub hands_filter: HandsFilter,
    pub mute_hand: MuteHand,
    pub loop_start_pct: f64,
    pub loop_end_pct: f64,
    pub tempo_scale_pct: u32,
    /// 0 disables mistake-triggered restarts
    pub mistake_threshold: u32,
    pub show_wrong_notes: bool,
    pub show_future_notes: bool,
    pub loop_enabled: bool,
    pub led_active_left: bool,
    pub led_active_right: bool,
    pub colors: ColorTable,
    pub brightness: BrightnessLevels,
    pub timing: TimingSettings,
    pub key_mapping: KeyMapping,
}

impl Default for LearnSettings {
    fn default() -> Self {
        Self {
            practice_mode: PracticeMode::Melody,
            hands_filter: HandsFilter::Both,
            mute_hand: MuteHand::Off,
            loop_start_pct: 0.0,
            loop_end_pct: 100.0,
            tempo_scale_pct: 100,
            mistake_threshold: 0,
            show_wrong_notes: true,
            show_future_notes: true,
            loop_enabled: true,
            led_active_left: true,
            led_active_right: true,
            colors: ColorTable::default(),
            brightness: BrightnessLevels::default(),
            timing: TimingSettings::default(),
            key_mapping: KeyMapping::default(),
        }
    }
}

pub mod keys {
    pub const PRACTICE: &str = "practice";
    pub const HANDS: &str = "hands";
    pub const MUTE_HAND: &str = "mute_hand";
    pub const START_POINT: &str = "start_point";
    pub const END_POINT: &str = "end_point";
    pub const SET_TEMPO: &str = "set_tempo";
    pub const NUMBER_OF_MISTAKES: &str = "number_of_mistakes";
    pub const SHOW_WRONG_NOTES: &str = "show_wrong_notes";
    pub const SHOW_FUTURE_NOTES: &str = "show_future_notes";
    pub const IS_LOOP_ACTIVE: &str = "is_loop_active";
    pub const IS_LED_ACTIVE_LEFT: &str = "is_led_activeL";
    pub const IS_LED_ACTIVE_RIGHT: &str = "is_led_activeR";
    pub const HAND_COLOR_RIGHT: &str = "hand_colorR";
    pub const HAND_COLOR_LEFT: &str = "hand_colorL";
    pub const HAND_COLOR_LIST: &str = "hand_colorList";
    pub const BRIGHTNESS_CURRENT: &str = "learn_brightness/current";
    pub const BRIGHTNESS_UPCOMING: &str = "learn_brightness/upcoming";
    pub const BRIGHTNESS_HINT: &str = "learn_brightness/hint";
    pub const EPSILON_MS: &str = "learn_timing/epsilon_ms";
    pub const LEAD_IN_MS: &str = "learn_timing/lead_in_ms";
    pub const GATE_POLL_MS: &str = "learn_timing/gate_poll_ms";
    pub const LED_FIRST_NOTE: &str = "led/first_note";
    pub const LED_COUNT: &str = "led/led_count";
    pub const LED_PER_KEY: &str = "led/leds_per_key";
    pub const LED_REVERSE: &str = "led/reverse";
}

/// `learn_colors/<hand>/<keys>/<timing>`
pub fn color_key(hand: Hand, is_black: bool, is_upcoming: bool) -> String {
    format!(
        "learn_colors/{}/{}/{}",
        match hand {
            Hand::Left => "left_hand",
            Hand::Right => "right_hand",
        },
        if is_black { "black_keys" } else { "white_keys" },
        if is_upcoming { "upcoming" } else { "current" },
    )
}

impl LearnSettings {
    /// Read a snapshot from `store`, defaulting anything missing
    pub fn load(store: &dyn SettingsStore) -> Self {
        let defaults = Self::default();

        let index = |key: &str| read_value::<u8>(store, key);
        let mut settings = Self {
            practice_mode: index(keys::PRACTICE)
                .and_then(PracticeMode::from_index)
                .unwrap_or(defaults.practice_mode),
            hands_filter: index(keys::HANDS)
                .and_then(HandsFilter::from_index)
                .unwrap_or(defaults.hands_filter),
            mute_hand: index(keys::MUTE_HAND)
                .and_then(MuteHand::from_index)
                .unwrap_or(defaults.mute_hand),
            loop_start_pct: read_value(store, keys::START_POINT).unwrap_or(defaults.loop_start_pct),
            loop_end_pct: read_value(store, keys::END_POINT).unwrap_or(defaults.loop_end_pct),
            tempo_scale_pct: read_value(store, keys::SET_TEMPO).unwrap_or(defaults.tempo_scale_pct),
            mistake_threshold: read_value(store, keys::NUMBER_OF_MISTAKES)
                .unwrap_or(defaults.mistake_threshold),
            show_wrong_notes: read_flag(store, keys::SHOW_WRONG_NOTES)
                .unwrap_or(defaults.show_wrong_notes),
            show_future_notes: read_flag(store, keys::SHOW_FUTURE_NOTES)
                .unwrap_or(defaults.show_future_notes),
            loop_enabled: read_flag(store, keys::IS_LOOP_ACTIVE).unwrap_or(defaults.loop_enabled),
            led_active_left: read_flag(store, keys::IS_LED_ACTIVE_LEFT)
                .unwrap_or(defaults.led_active_left),
            led_active_right: read_flag(store, keys::IS_LED_ACTIVE_RIGHT)
                .unwrap_or(defaults.led_active_right),
            colors: load_colors(store),
            brightness: BrightnessLevels {
                current: read_value(store, keys::BRIGHTNESS_CURRENT)
                    .unwrap_or(defaults.brightness.current),
                upcoming: read_value(store, keys::BRIGHTNESS_UPCOMING)
                    .unwrap_or(defaults.brightness.upcoming),
                hint: read_value(store, keys::BRIGHTNESS_HINT).unwrap_or(defaults.brightness.hint),
            },
            timing: TimingSettings {
                epsilon_ms: read_value(store, keys::EPSILON_MS).unwrap_or(defaults.timing.epsilon_ms),
                lead_in_ms: read_value(store, keys::LEAD_IN_MS).unwrap_or(defaults.timing.lead_in_ms),
                gate_poll_ms: read_value(store, keys::GATE_POLL_MS)
                    .unwrap_or(defaults.timing.gate_poll_ms),
            },
            key_mapping: KeyMapping {
                first_note: read_value(store, keys::LED_FIRST_NOTE)
                    .unwrap_or(defaults.key_mapping.first_note),
                leds_per_key: read_value(store, keys::LED_PER_KEY)
                    .unwrap_or(defaults.key_mapping.leds_per_key),
                led_count: read_value(store, keys::LED_COUNT)
                    .unwrap_or(defaults.key_mapping.led_count),
                reverse: read_flag(store, keys::LED_REVERSE).unwrap_or(defaults.key_mapping.reverse),
            },
        };

        // Stored values may predate the clamps
        let (start, end) = (settings.loop_start_pct, settings.loop_end_pct);
        settings.loop_end_pct = 100.0;
        settings.set_loop_start(start);
        settings.set_loop_end(end);
        settings.set_tempo_scale(settings.tempo_scale_pct);
        settings.set_mistake_threshold(settings.mistake_threshold);

        log::info!(
            "LearnSettings: mode {:?}, hands {:?}, mute {:?}, loop {}..{}%, tempo {}%",
            settings.practice_mode,
            settings.hands_filter,
            settings.mute_hand,
            settings.loop_start_pct,
            settings.loop_end_pct,
            settings.tempo_scale_pct
        );
        settings
    }

    /// Re-read the color table and brightness from `store`
    pub fn reload_colors(&mut self, store: &dyn SettingsStore) {
        let fresh = Self::load(store);
        self.colors = fresh.colors;
        self.brightness = fresh.brightness;
    }

    /// Clamp to `0..=end-10`; returns the stored value
    pub fn set_loop_start(&mut self, pct: f64) -> f64 {
        let max = (self.loop_end_pct - MIN_LOOP_WIDTH_PCT).max(0.0);
        self.loop_start_pct = if pct.is_finite() { pct.clamp(0.0, max) } else { 0.0 };
        self.loop_start_pct
    }

    /// Clamp to `start+10..=100`; returns the stored value
    pub fn set_loop_end(&mut self, pct: f64) -> f64 {
        let min = (self.loop_start_pct + MIN_LOOP_WIDTH_PCT).min(100.0);
        self.loop_end_pct = if pct.is_finite() { pct.clamp(min, 100.0) } else { 100.0 };
        self.loop_end_pct
    }

    pub fn set_tempo_scale(&mut self, pct: u32) -> u32 {
        self.tempo_scale_pct = pct.clamp(MIN_TEMPO_SCALE_PCT, MAX_TEMPO_SCALE_PCT);
        self.tempo_scale_pct
    }

    pub fn set_mistake_threshold(&mut self, threshold: u32) -> u32 {
        self.mistake_threshold = threshold.min(MAX_MISTAKE_THRESHOLD);
        self.mistake_threshold
    }

    /// Is LED hinting enabled for `hand`?
    pub fn led_active(&self, hand: Hand) -> bool {
        match hand {
            Hand::Left => self.led_active_left,
            Hand::Right => self.led_active_right,
        }
    }
}

/// Build the color table
///
/// With no `learn_colors/*` keys at all the built-in table is used. Once any
/// entry is configured, unconfigured entries stay empty and resolve through
/// the legacy palette.
fn load_colors(store: &dyn SettingsStore) -> ColorTable {
    let mut legacy = LegacyPalette::default();
    if let Some(colors) = read_value::<Vec<Rgb>>(store, keys::HAND_COLOR_LIST) {
        if !colors.is_empty() {
            legacy.colors = colors;
        }
    }
    if let Some(index) = read_value::<usize>(store, keys::HAND_COLOR_RIGHT) {
        legacy.right_index = index;
    }
    if let Some(index) = read_value::<usize>(store, keys::HAND_COLOR_LEFT) {
        legacy.left_index = index;
    }

    let mut table = ColorTable::empty(legacy.clone());
    let mut configured = 0;
    for hand in [Hand::Left, Hand::Right] {
        for is_black in [false, true] {
            for is_upcoming in [false, true] {
                let color = read_value::<Rgb>(store, &color_key(hand, is_black, is_upcoming));
                configured += color.is_some() as usize;
                table.set_entry(hand, is_black, is_upcoming, color);
            }
        }
    }

    if configured == 0 {
        return ColorTable::default().with_legacy(legacy);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_indexes() {
        assert_eq!(PracticeMode::from_index(2), Some(PracticeMode::Listen));
        assert_eq!(HandsFilter::from_index(1), Some(HandsFilter::Right));
        assert_eq!(MuteHand::from_index(3), None);
        assert_eq!(MuteHand::Left.index(), 2);
        assert_eq!(PracticeMode::default(), PracticeMode::Melody);
    }

    #[test]
    fn test_hands_filter_channels() {
        assert!(HandsFilter::Both.includes(2));
        assert!(HandsFilter::Right.includes(1));
        assert!(!HandsFilter::Right.includes(2));
        assert!(HandsFilter::Left.includes(2));
        assert!(!HandsFilter::Left.includes(1));
    }

    #[test]
    fn test_load_defaults_from_empty_store() {
        let settings = LearnSettings::load(&MemorySettingsStore::new());
        assert_eq!(settings, LearnSettings::default());
    }

    #[test]
    fn test_load_typed_values() {
        let store = MemorySettingsStore::new()
            .with(keys::PRACTICE, 1)
            .with(keys::HANDS, "2")
            .with(keys::MUTE_HAND, 1)
            .with(keys::START_POINT, 20.0)
            .with(keys::END_POINT, 60.0)
            .with(keys::SET_TEMPO, 400)
            .with(keys::NUMBER_OF_MISTAKES, 3)
            .with(keys::SHOW_WRONG_NOTES, 0)
            .with(keys::IS_LED_ACTIVE_LEFT, 0)
            .with(keys::LEAD_IN_MS, 0);
        let settings = LearnSettings::load(&store);
        assert_eq!(settings.practice_mode, PracticeMode::Rhythm);
        assert_eq!(settings.hands_filter, HandsFilter::Left);
        assert_eq!(settings.mute_hand, MuteHand::Right);
        assert_eq!(settings.loop_start_pct, 20.0);
        assert_eq!(settings.loop_end_pct, 60.0);
        assert_eq!(settings.tempo_scale_pct, MAX_TEMPO_SCALE_PCT);
        assert_eq!(settings.mistake_threshold, 3);
        assert!(!settings.show_wrong_notes);
        assert!(!settings.led_active(Hand::Left));
        assert!(settings.led_active(Hand::Right));
        assert_eq!(settings.timing.lead_in_ms, 0);
    }

    #[test]
    fn test_loop_bound_clamps() {
        let mut settings = LearnSettings::default();
        assert_eq!(settings.set_loop_start(95.0), 90.0);
        assert_eq!(settings.set_loop_end(50.0), 100.0);
        assert_eq!(settings.set_loop_start(-5.0), 0.0);
        assert_eq!(settings.set_loop_end(5.0), 10.0);
        assert_eq!(settings.set_loop_start(30.0), 0.0);
        assert_eq!(settings.set_tempo_scale(1), 10);
        assert_eq!(settings.set_mistake_threshold(1000), 255);
    }

    #[test]
    fn test_partial_color_table_falls_back_to_legacy() {
        let store = MemorySettingsStore::new()
            .with(
                &color_key(Hand::Right, false, false),
                serde_yaml::to_value([1u8, 2, 3]).unwrap(),
            )
            .with(keys::HAND_COLOR_LEFT, 0);
        let settings = LearnSettings::load(&store);
        let colors = &settings.colors;
        assert_eq!(colors.color(Hand::Right, false, false), Rgb::new(1, 2, 3));
        assert_eq!(colors.entry(Hand::Right, false, true), None);
        assert_eq!(colors.color(Hand::Right, false, true), Rgb::new(0, 0, 255));
        assert_eq!(colors.color(Hand::Left, true, false), Rgb::new(255, 0, 0));
    }

    #[test]
    fn test_reload_colors_keeps_other_fields() {
        let store = MemorySettingsStore::new();
        let mut settings = LearnSettings::load(&store);
        settings.set_tempo_scale(50);

        store
            .set(keys::BRIGHTNESS_CURRENT, serde_yaml::Value::from(0.8))
            .unwrap();
        settings.reload_colors(&store);
        assert_eq!(settings.brightness.current, 0.8);
        assert_eq!(settings.tempo_scale_pct, 50);
    }
}
