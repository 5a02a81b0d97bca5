//! Color policy for lit keys
//!
//! Hue comes from a hand × key-color × timing table; brightness is a separate
//! multiplicative scalar so the two can be tuned independently. When a table
//! entry is absent the lookup falls back to the per-hand legacy palette.

use crate::timeline::Hand;
use serde::{Deserialize, Serialize};

/// 8-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);
    /// Wrong-note indicator
    pub const WRONG: Rgb = Rgb::new(255, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Multiply every channel by `brightness` (truncating, like integer LED math)
    pub fn scaled(self, brightness: f32) -> Self {
        let scale = |c: u8| (c as f32 * brightness.clamp(0.0, 1.0)) as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }

    pub fn is_off(self) -> bool {
        self == Self::OFF
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self::new(r, g, b)
    }
}

impl From<Rgb> for [u8; 3] {
    fn from(c: Rgb) -> Self {
        [c.r, c.g, c.b]
    }
}

/// Black keys are C#, D#, F#, G#, A#
pub fn is_black_key(note: u8) -> bool {
    matches!(note % 12, 1 | 3 | 6 | 8 | 10)
}

/// Brightness scalars applied on top of the table hue
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrightnessLevels {
    /// Keys to press now
    pub current: f32,
    /// Predicted next gate
    pub upcoming: f32,
    /// Re-asserted hints after a wrong note
    pub hint: f32,
}

impl Default for BrightnessLevels {
    fn default() -> Self {
        Self {
            current: 0.5,
            upcoming: 0.05,
            hint: 0.025,
        }
    }
}

/// Single color per hand, used when the table has no entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyPalette {
    pub colors: Vec<Rgb>,
    pub right_index: usize,
    pub left_index: usize,
}

impl LegacyPalette {
    /// Select the palette entry for `hand`, clamped to the palette; returns the stored index
    pub fn set_index(&mut self, hand: Hand, index: usize) -> usize {
        let index = index.min(self.colors.len().saturating_sub(1));
        match hand {
            Hand::Right => self.right_index = index,
            Hand::Left => self.left_index = index,
        }
        index
    }

    pub fn color(&self, hand: Hand) -> Rgb {
        let index = match hand {
            Hand::Right => self.right_index,
            Hand::Left => self.left_index,
        };
        self.colors
            .get(index)
            .or_else(|| self.colors.first())
            .copied()
            .unwrap_or(Rgb::new(255, 255, 255))
    }
}

impl Default for LegacyPalette {
    fn default() -> Self {
        Self {
            colors: vec![
                Rgb::new(255, 0, 0),
                Rgb::new(0, 0, 255),
                Rgb::new(0, 255, 0),
                Rgb::new(255, 255, 0),
                Rgb::new(255, 0, 255),
                Rgb::new(0, 255, 255),
                Rgb::new(255, 255, 255),
            ],
            right_index: 1,
            left_index: 2,
        }
    }
}

fn hand_slot(hand: Hand) -> usize {
    match hand {
        Hand::Left => 0,
        Hand::Right => 1,
    }
}

/// Hand × key-color × timing color table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorTable {
    /// `[hand][is_black][is_upcoming]`
    entries: [[[Option<Rgb>; 2]; 2]; 2],
    legacy: LegacyPalette,
}

impl ColorTable {
    /// A table with no entries: every lookup uses the legacy palette
    pub fn empty(legacy: LegacyPalette) -> Self {
        Self {
            entries: [[[None; 2]; 2]; 2],
            legacy,
        }
    }

    pub fn entry(&self, hand: Hand, is_black: bool, is_upcoming: bool) -> Option<Rgb> {
        self.entries[hand_slot(hand)][is_black as usize][is_upcoming as usize]
    }

    pub fn set_entry(&mut self, hand: Hand, is_black: bool, is_upcoming: bool, color: Option<Rgb>) {
        self.entries[hand_slot(hand)][is_black as usize][is_upcoming as usize] = color;
    }

    /// Replace the fallback palette, keeping the entries
    pub fn with_legacy(mut self, legacy: LegacyPalette) -> Self {
        self.legacy = legacy;
        self
    }

    pub fn legacy(&self) -> &LegacyPalette {
        &self.legacy
    }

    pub fn set_legacy_index(&mut self, hand: Hand, index: usize) -> usize {
        self.legacy.set_index(hand, index)
    }

    /// Resolve a hue
    pub fn color(&self, hand: Hand, is_black: bool, is_upcoming: bool) -> Rgb {
        match self.entry(hand, is_black, is_upcoming) {
            Some(color) => color,
            None => self.legacy.color(hand),
        }
    }

    /// Resolve the hue for a note, then apply `brightness`
    pub fn note_color(&self, hand: Hand, note: u8, is_upcoming: bool, brightness: f32) -> Rgb {
        self.color(hand, is_black_key(note), is_upcoming)
            .scaled(brightness)
    }
}

impl Default for ColorTable {
    fn default() -> Self {
        let mut table = Self::empty(LegacyPalette::default());
        for (hand, white, black) in [
            (
                Hand::Left,
                [Rgb::new(0, 255, 0), Rgb::new(0, 128, 0)],
                [Rgb::new(0, 200, 0), Rgb::new(0, 100, 0)],
            ),
            (
                Hand::Right,
                [Rgb::new(0, 0, 255), Rgb::new(0, 0, 128)],
                [Rgb::new(0, 0, 200), Rgb::new(0, 0, 100)],
            ),
        ] {
            table.set_entry(hand, false, false, Some(white[0]));
            table.set_entry(hand, false, true, Some(white[1]));
            table.set_entry(hand, true, false, Some(black[0]));
            table.set_entry(hand, true, true, Some(black[1]));
        }
        table
    }
}
