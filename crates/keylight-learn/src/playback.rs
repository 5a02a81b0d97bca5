//! Accompaniment playback sink
//!
//! Software notes (the hand the player is not practicing, or everything in
//! Listen mode) are sent here. Delivery is fire-and-forget.

use crate::error::SinkError;
use crate::timeline::TimedEvent;
use keylight_midi::{MidiPlaybackPort, NoteMessage};
use std::sync::Mutex;

/// Outbound note events
pub trait PlaybackSink: Send + Sync {
    fn send(&self, event: &TimedEvent) -> Result<(), SinkError>;

    /// Release anything still sounding (called when a run stops)
    fn silence(&self) {}
}

/// Convert a timeline note event into a playback message
pub fn note_message(event: &TimedEvent) -> NoteMessage {
    NoteMessage {
        channel: event.channel,
        note: event.note,
        velocity: if event.is_press() { event.velocity } else { 0 },
    }
}

impl PlaybackSink for MidiPlaybackPort {
    fn send(&self, event: &TimedEvent) -> Result<(), SinkError> {
        MidiPlaybackPort::send(self, note_message(event)).map_err(SinkError::from)
    }

    fn silence(&self) {
        MidiPlaybackPort::silence(self);
    }
}

/// Playback sink for setups without a synth port
pub struct NullPlayback;

impl PlaybackSink for NullPlayback {
    fn send(&self, event: &TimedEvent) -> Result<(), SinkError> {
        log::trace!("[Playback] Discarding note {} (no port)", event.note);
        Ok(())
    }
}

/// Records every delivered message
#[derive(Default)]
pub struct MemoryPlayback {
    sent: Mutex<Vec<NoteMessage>>,
}

impl MemoryPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<NoteMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl PlaybackSink for MemoryPlayback {
    fn send(&self, event: &TimedEvent) -> Result<(), SinkError> {
        self.sent
            .lock()
            .map_err(|_| SinkError::Playback("recorder lock poisoned".into()))?
            .push(note_message(event));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_message_release() {
        let on = TimedEvent::note_on(60, 2, 90, 0);
        let off = TimedEvent::note_on(60, 2, 0, 10);
        assert_eq!(
            note_message(&on),
            NoteMessage {
                channel: 2,
                note: 60,
                velocity: 90
            }
        );
        assert_eq!(note_message(&off).velocity, 0);
        assert_eq!(note_message(&TimedEvent::note_off(61, 1, 0)).velocity, 0);
    }

    #[test]
    fn test_memory_playback_records_in_order() {
        let playback = MemoryPlayback::new();
        playback.send(&TimedEvent::note_on(48, 2, 70, 0)).unwrap();
        playback.send(&TimedEvent::note_off(48, 2, 0)).unwrap();
        let notes: Vec<(u8, u8)> = playback.sent().iter().map(|m| (m.note, m.velocity)).collect();
        assert_eq!(notes, vec![(48, 70), (48, 0)]);
    }
}
