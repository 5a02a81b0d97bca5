//! Timeline model
//!
//! An immutable, time-ordered sequence of note and meta events for one song.
//! Each event carries its delta in ticks; absolute times in seconds are derived
//! once at construction from the song tempo and resolution.
//!
//! The MIDI file parser (track merging, tempo extraction, track → hand channel
//! assignment) lives outside this crate. It hands over an already flattened
//! event list, with right-hand notes on channel 1 and left-hand notes on channel 2.

use crate::error::{LearnError, Result};
use std::ops::Range;

/// Tempo assumed when a song carries no tempo event (120 BPM)
pub const DEFAULT_TEMPO_MICROS: u32 = 500_000;

/// Channel tag for right-hand notes
pub const RIGHT_HAND_CHANNEL: u8 = 1;
/// Channel tag for left-hand notes
pub const LEFT_HAND_CHANNEL: u8 = 2;

/// Which hand a note belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    /// Channel 1 is the right hand; everything else is colored as the left hand.
    pub fn from_channel(channel: u8) -> Self {
        if channel == RIGHT_HAND_CHANNEL {
            Hand::Right
        } else {
            Hand::Left
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NoteOn,
    NoteOff,
    /// Tempo, lyrics, markers... Only its delta time matters here.
    Meta,
}

/// One event of the song
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedEvent {
    pub kind: EventKind,
    pub note: u8,
    /// Hand assignment tag (see [`RIGHT_HAND_CHANNEL`], [`LEFT_HAND_CHANNEL`])
    pub channel: u8,
    pub velocity: u8,
    /// Ticks since the previous event
    pub delta_ticks: u32,
    /// Seconds since the start of the song, derived by [`Timeline::new`]
    pub absolute_seconds: f64,
}

impl TimedEvent {
    pub fn note_on(note: u8, channel: u8, velocity: u8, delta_ticks: u32) -> Self {
        Self {
            kind: EventKind::NoteOn,
            note: note.min(127),
            channel,
            velocity: velocity.min(127),
            delta_ticks,
            absolute_seconds: 0.0,
        }
    }

    pub fn note_off(note: u8, channel: u8, delta_ticks: u32) -> Self {
        Self {
            kind: EventKind::NoteOff,
            note: note.min(127),
            channel,
            velocity: 0,
            delta_ticks,
            absolute_seconds: 0.0,
        }
    }

    pub fn meta(delta_ticks: u32) -> Self {
        Self {
            kind: EventKind::Meta,
            note: 0,
            channel: 0,
            velocity: 0,
            delta_ticks,
            absolute_seconds: 0.0,
        }
    }

    pub fn is_meta(&self) -> bool {
        self.kind == EventKind::Meta
    }

    /// Note On or Note Off (including Note On with velocity 0)
    pub fn is_note(&self) -> bool {
        matches!(self.kind, EventKind::NoteOn | EventKind::NoteOff)
    }

    /// A key going down: Note On with velocity > 0
    pub fn is_press(&self) -> bool {
        self.kind == EventKind::NoteOn && self.velocity > 0
    }

    /// A key going up: Note Off, or Note On with velocity 0
    pub fn is_release(&self) -> bool {
        self.is_note() && !self.is_press()
    }

    pub fn hand(&self) -> Hand {
        Hand::from_channel(self.channel)
    }
}

/// Convert ticks to seconds for a given resolution and tempo (µs per beat)
pub fn ticks_to_seconds(ticks: u32, ticks_per_beat: u32, tempo_micros_per_beat: f64) -> f64 {
    if ticks_per_beat == 0 {
        return 0.0;
    }
    ticks as f64 * tempo_micros_per_beat / (ticks_per_beat as f64 * 1_000_000.0)
}

/// Immutable song timeline, shared read-only between the engine and renderer
#[derive(Debug, Clone)]
pub struct Timeline {
    tempo_micros_per_beat: u32,
    ticks_per_beat: u32,
    events: Vec<TimedEvent>,
    /// Absolute time of every non-meta event, in order
    note_times: Vec<f64>,
}

impl Timeline {
    /// Build a timeline, deriving absolute seconds for every event
    pub fn new(
        tempo_micros_per_beat: u32,
        ticks_per_beat: u32,
        mut events: Vec<TimedEvent>,
    ) -> Result<Self> {
        if ticks_per_beat == 0 {
            return Err(LearnError::MalformedTimeline(
                "ticks per beat is zero".to_string(),
            ));
        }
        if tempo_micros_per_beat == 0 {
            return Err(LearnError::MalformedTimeline("tempo is zero".to_string()));
        }

        let tempo = tempo_micros_per_beat as f64;
        let mut elapsed = 0.0;
        let mut note_times = Vec::with_capacity(events.len());
        for event in &mut events {
            elapsed += ticks_to_seconds(event.delta_ticks, ticks_per_beat, tempo);
            event.absolute_seconds = elapsed;
            if !event.is_meta() {
                note_times.push(elapsed);
            }
        }

        Ok(Self {
            tempo_micros_per_beat,
            ticks_per_beat,
            events,
            note_times,
        })
    }

    /// Reject timelines with nothing to practice
    pub fn ensure_playable(&self) -> Result<()> {
        if self.note_times.is_empty() {
            return Err(LearnError::MalformedTimeline(
                "song contains no note events".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tempo_micros_per_beat(&self) -> u32 {
        self.tempo_micros_per_beat
    }

    pub fn ticks_per_beat(&self) -> u32 {
        self.ticks_per_beat
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Absolute times of the non-meta events
    pub fn note_times(&self) -> &[f64] {
        &self.note_times
    }

    /// Time of the last event
    pub fn duration_seconds(&self) -> f64 {
        self.events.last().map_or(0.0, |e| e.absolute_seconds)
    }

    /// Delay before `event` at the scaled tempo
    ///
    /// `tempo_scale_pct` of 100 is the song tempo; 200 plays twice as fast.
    pub fn delay_seconds(&self, event: &TimedEvent, tempo_scale_pct: u32) -> f64 {
        let effective_tempo =
            self.tempo_micros_per_beat as f64 * 100.0 / tempo_scale_pct.max(1) as f64;
        ticks_to_seconds(event.delta_ticks, self.ticks_per_beat, effective_tempo)
    }

    /// Event index range covered by a loop given as percentages of the song
    pub fn slice_bounds(&self, start_pct: f64, end_pct: f64) -> Range<usize> {
        let len = self.events.len();
        let to_index = |pct: f64| ((pct.clamp(0.0, 100.0) * len as f64) / 100.0) as usize;
        let start = to_index(start_pct);
        let end = to_index(end_pct).max(start);
        start..end.min(len)
    }
}

/// Provider of timelines (cache or MIDI file parser)
pub trait TimelineSource {
    fn load(&self, song_id: &str) -> Result<Timeline>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale_song() -> Vec<TimedEvent> {
        vec![
            TimedEvent::meta(0),
            TimedEvent::note_on(60, 1, 100, 0),
            TimedEvent::note_off(60, 1, 480),
            TimedEvent::meta(120),
            TimedEvent::note_on(62, 2, 90, 0),
            TimedEvent::note_off(62, 2, 240),
        ]
    }

    #[test]
    fn test_absolute_seconds_accumulate() {
        let timeline = Timeline::new(500_000, 480, scale_song()).unwrap();
        let times: Vec<f64> = timeline.events().iter().map(|e| e.absolute_seconds).collect();
        assert_eq!(times, vec![0.0, 0.0, 0.5, 0.625, 0.625, 0.875]);
        assert_eq!(timeline.note_times(), &[0.0, 0.5, 0.625, 0.875]);
        assert_eq!(timeline.duration_seconds(), 0.875);
    }

    #[test]
    fn test_absolute_seconds_non_decreasing() {
        let events: Vec<TimedEvent> = (0..50u32)
            .map(|i| TimedEvent::note_on((40 + i % 40) as u8, 1, 80, (i * 37) % 200))
            .collect();
        let timeline = Timeline::new(432_000, 96, events).unwrap();
        let first = timeline.events().iter().find(|e| !e.is_meta()).unwrap();
        assert!(first.absolute_seconds >= 0.0);
        assert!(timeline
            .events()
            .windows(2)
            .all(|w| w[0].absolute_seconds <= w[1].absolute_seconds));
    }

    #[test]
    fn test_zero_ticks_per_beat_is_malformed() {
        assert!(matches!(
            Timeline::new(500_000, 0, scale_song()),
            Err(LearnError::MalformedTimeline(_))
        ));
    }

    #[test]
    fn test_zero_tempo_is_malformed() {
        assert!(matches!(
            Timeline::new(0, 480, scale_song()),
            Err(LearnError::MalformedTimeline(_))
        ));
    }

    #[test]
    fn test_empty_song_not_playable() {
        let timeline = Timeline::new(500_000, 480, vec![TimedEvent::meta(10)]).unwrap();
        assert!(matches!(
            timeline.ensure_playable(),
            Err(LearnError::MalformedTimeline(_))
        ));
        let timeline = Timeline::new(500_000, 480, scale_song()).unwrap();
        assert!(timeline.ensure_playable().is_ok());
    }

    #[test]
    fn test_delay_with_tempo_scale() {
        let timeline = Timeline::new(500_000, 480, scale_song()).unwrap();
        let event = &timeline.events()[2];
        assert_eq!(timeline.delay_seconds(event, 100), 0.5);
        assert_eq!(timeline.delay_seconds(event, 200), 0.25);
        assert_eq!(timeline.delay_seconds(event, 50), 1.0);
    }

    #[test]
    fn test_slice_bounds() {
        let timeline = Timeline::new(500_000, 480, scale_song()).unwrap();
        assert_eq!(timeline.slice_bounds(0.0, 100.0), 0..6);
        assert_eq!(timeline.slice_bounds(50.0, 100.0), 3..6);
        assert_eq!(timeline.slice_bounds(20.0, 70.0), 1..4);
        assert_eq!(timeline.slice_bounds(80.0, 10.0), 4..4);
    }

    #[test]
    fn test_velocity_zero_note_on_is_release() {
        let event = TimedEvent::note_on(60, 1, 0, 0);
        assert!(event.is_note());
        assert!(event.is_release());
        assert!(!event.is_press());
        assert_eq!(event.hand(), Hand::Right);
        assert_eq!(TimedEvent::note_on(60, 2, 10, 0).hand(), Hand::Left);
    }
}
