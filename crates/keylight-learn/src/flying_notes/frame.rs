//! Frame computation
//!
//! Everything here is pure: the frame loop owns a [`NoteBuffer`] snapshot and
//! calls [`visible_notes`] once per tick.

use super::layout::{KeyboardLayout, PianoKey};
use super::settings::FlyingNotesSettings;
use crate::color::{ColorTable, Rgb};
use crate::error::SinkError;
use crate::timeline::{Hand, Timeline};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Notes kept per song; older ones are dropped first
pub const NOTE_BUFFER_CAPACITY: usize = 1000;

/// Duration given to a note whose release was never found
pub const PLACEHOLDER_DURATION: f64 = 1.0;

/// A note-on snapshotted from the timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferedNote {
    pub midi_note: u8,
    pub channel: u8,
    pub velocity: u8,
    /// Song seconds
    pub start_time: f64,
    pub duration: f64,
    pub hand: Hand,
}

#[derive(Debug, Clone, Default)]
pub struct NoteBuffer {
    notes: VecDeque<BufferedNote>,
}

impl NoteBuffer {
    /// Snapshot the presses of `timeline`
    pub fn from_timeline(timeline: &Timeline) -> Self {
        let mut notes: Vec<BufferedNote> = Vec::new();
        let mut open: HashMap<(u8, u8), usize> = HashMap::new();

        for event in timeline.events() {
            if event.is_press() {
                open.insert((event.channel, event.note), notes.len());
                notes.push(BufferedNote {
                    midi_note: event.note,
                    channel: event.channel,
                    velocity: event.velocity,
                    start_time: event.absolute_seconds,
                    duration: PLACEHOLDER_DURATION,
                    hand: event.hand(),
                });
            } else if event.is_release() {
                if let Some(index) = open.remove(&(event.channel, event.note)) {
                    let note = &mut notes[index];
                    let held = event.absolute_seconds - note.start_time;
                    if held > 0.0 {
                        note.duration = held;
                    }
                }
            }
        }

        let mut buffer = Self::default();
        for note in notes {
            buffer.push(note);
        }
        buffer
    }

    pub fn push(&mut self, note: BufferedNote) {
        if self.notes.len() == NOTE_BUFFER_CAPACITY {
            self.notes.pop_front();
        }
        self.notes.push_back(note);
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferedNote> {
        self.notes.iter()
    }
}

/// A note rectangle in screen space
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlyingNote {
    pub midi_note: u8,
    pub x_position: i32,
    pub y_position: f64,
    pub width: u32,
    pub height: u32,
    pub color: Rgb,
    pub hand: Hand,
    pub velocity: u8,
    pub is_black_key: bool,
}

/// Project the notes starting within `[current_time, current_time + lookahead]`
///
/// A note sits at the top of the fall distance when it enters the window and
/// reaches the keyboard edge at its start time. Notes outside the keyboard
/// layout are skipped.
pub fn visible_notes(
    buffer: &NoteBuffer,
    layout: &KeyboardLayout,
    colors: &ColorTable,
    settings: &FlyingNotesSettings,
    current_time: f64,
) -> Vec<FlyingNote> {
    let lookahead = settings.lookahead_seconds();
    let hit_line = settings.canvas_height as f64 - settings.keyboard_height as f64;
    let fall_distance = settings.fall_distance as f64;

    buffer
        .iter()
        .filter(|note| note.start_time >= current_time && note.start_time <= current_time + lookahead)
        .filter_map(|note| {
            let key = layout.key(note.midi_note)?;
            let time_until_hit = note.start_time - current_time;
            Some(FlyingNote {
                midi_note: note.midi_note,
                x_position: key.x_position,
                y_position: hit_line - time_until_hit / lookahead * fall_distance,
                width: key.width,
                height: settings.note_height,
                color: colors.color(note.hand, key.is_black, true),
                hand: note.hand,
                velocity: note.velocity,
                is_black_key: key.is_black,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameData<'a> {
    pub notes: Vec<FlyingNote>,
    pub piano_keys: &'a [PianoKey],
    pub settings: &'a FlyingNotesSettings,
}

/// Messages pushed to display subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastMessage<'a> {
    FrameUpdate {
        current_time: f64,
        data: FrameData<'a>,
    },
    Stop,
}

impl BroadcastMessage<'_> {
    pub fn encode(&self) -> Result<String, SinkError> {
        serde_json::to_string(self).map_err(|e| SinkError::Broadcast(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::TimedEvent;

    fn note_at(midi_note: u8, start_time: f64) -> BufferedNote {
        BufferedNote {
            midi_note,
            channel: 1,
            velocity: 80,
            start_time,
            duration: PLACEHOLDER_DURATION,
            hand: Hand::Right,
        }
    }

    #[test]
    fn test_window_selects_upcoming_notes() {
        let settings = FlyingNotesSettings {
            fall_distance: 200,
            ..FlyingNotesSettings::default()
        };
        let mut buffer = NoteBuffer::default();
        buffer.push(note_at(60, 4.9));
        buffer.push(note_at(60, 6.5));
        buffer.push(note_at(62, 8.0));
        buffer.push(note_at(10, 5.5));

        let colors = ColorTable::default();
        let notes = visible_notes(&buffer, &KeyboardLayout::default(), &colors, &settings, 5.0);
        assert_eq!(notes.len(), 1);
        let note = &notes[0];
        assert_eq!(note.midi_note, 60);
        assert_eq!(note.x_position, 460);
        assert_eq!(note.y_position, 370.0);
        assert_eq!(note.height, 20);
        assert_eq!(note.color, colors.color(Hand::Right, false, true));
    }

    #[test]
    fn test_note_at_hit_time_sits_on_keyboard() {
        let settings = FlyingNotesSettings::default();
        let mut buffer = NoteBuffer::default();
        buffer.push(note_at(61, 3.0));
        let notes = visible_notes(
            &buffer,
            &KeyboardLayout::default(),
            &ColorTable::default(),
            &settings,
            3.0,
        );
        assert_eq!(notes[0].y_position, 520.0);
        assert!(notes[0].is_black_key);
        assert_eq!(notes[0].width, 12);
    }

    #[test]
    fn test_buffer_refines_duration_from_release() {
        let timeline = Timeline::new(
            500_000,
            480,
            vec![
                TimedEvent::note_on(60, 1, 80, 0),
                TimedEvent::note_on(48, 2, 70, 0),
                TimedEvent::note_off(60, 1, 480),
                TimedEvent::meta(0),
            ],
        )
        .unwrap();
        let buffer = NoteBuffer::from_timeline(&timeline);
        let notes: Vec<_> = buffer.iter().copied().collect();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].duration, 0.5);
        assert_eq!(notes[1].duration, PLACEHOLDER_DURATION);
        assert_eq!(notes[1].hand, Hand::Left);
    }

    #[test]
    fn test_buffer_drops_oldest_on_overflow() {
        let events = (0..1005u32)
            .map(|i| TimedEvent::note_on(21 + (i % 88) as u8, 1, 80, 10))
            .collect();
        let timeline = Timeline::new(500_000, 480, events).unwrap();
        let buffer = NoteBuffer::from_timeline(&timeline);
        assert_eq!(buffer.len(), NOTE_BUFFER_CAPACITY);
        assert_eq!(buffer.iter().next().map(|n| n.midi_note), Some(26));
    }

    #[test]
    fn test_message_schema() {
        let layout = KeyboardLayout::default();
        let settings = FlyingNotesSettings::default();
        let mut buffer = NoteBuffer::default();
        buffer.push(note_at(60, 0.5));
        let frame = BroadcastMessage::FrameUpdate {
            current_time: 0.0,
            data: FrameData {
                notes: visible_notes(&buffer, &layout, &ColorTable::default(), &settings, 0.0),
                piano_keys: layout.keys(),
                settings: &settings,
            },
        };

        let json: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "frame_update");
        assert_eq!(json["current_time"], 0.0);
        assert_eq!(json["data"]["piano_keys"].as_array().map(Vec::len), Some(88));
        assert_eq!(json["data"]["settings"]["fall_distance"], 520);
        let note = &json["data"]["notes"][0];
        assert_eq!(note["midi_note"], 60);
        assert_eq!(note["hand"], "right");
        assert_eq!(note["color"], serde_json::json!([0, 0, 128]));
        assert_eq!(note["is_black_key"], false);

        assert_eq!(BroadcastMessage::Stop.encode().unwrap(), r#"{"type":"stop"}"#);
    }
}
