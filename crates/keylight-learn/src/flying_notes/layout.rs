//! Static 88-key keyboard geometry shared with the display client

use crate::color::is_black_key;
use serde::Serialize;

pub const FIRST_NOTE: u8 = 21;
pub const LAST_NOTE: u8 = 108;
pub const WHITE_KEY_WIDTH: u32 = 20;
pub const BLACK_KEY_WIDTH: u32 = 12;

/// One key as drawn by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PianoKey {
    pub midi_note: u8,
    pub x_position: i32,
    pub is_black: bool,
    pub width: u32,
}

/// Black keys sit between white keys, nudged towards their group's edges
fn black_key_offset(note: u8) -> i32 {
    match note % 12 {
        1 => -6,
        3 => 6,
        6 => -8,
        10 => 8,
        _ => 0,
    }
}

/// Keys A0 (21) through C8 (108)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyboardLayout {
    keys: Vec<PianoKey>,
}

impl Default for KeyboardLayout {
    fn default() -> Self {
        let white = WHITE_KEY_WIDTH as i32;
        let mut white_count = 0i32;
        let keys = (FIRST_NOTE..=LAST_NOTE)
            .map(|midi_note| {
                let is_black = is_black_key(midi_note);
                let x_position = if is_black {
                    (white_count - 1) * white + white / 2 + black_key_offset(midi_note)
                } else {
                    white_count += 1;
                    (white_count - 1) * white
                };
                PianoKey {
                    midi_note,
                    x_position,
                    is_black,
                    width: if is_black { BLACK_KEY_WIDTH } else { WHITE_KEY_WIDTH },
                }
            })
            .collect();
        Self { keys }
    }
}

impl KeyboardLayout {
    pub fn keys(&self) -> &[PianoKey] {
        &self.keys
    }

    pub fn key(&self, note: u8) -> Option<&PianoKey> {
        self.keys.get(note.checked_sub(FIRST_NOTE)? as usize)
    }
}
