//! MIDI playback output
//!
//! Sends accompaniment notes ("software" notes the trainer plays itself) to a
//! synth or the piano's own sound engine. Messages are encoded with midly and
//! written fire-and-forget: a failed send is reported to the caller, who logs
//! it and moves on.

use crate::connection::{MidiConnection, MidiConnectionError};
use midir::MidiOutputConnection;
use midly::live::LiveEvent;
use midly::num::{u4, u7};
use midly::MidiMessage;
use std::collections::HashSet;
use std::sync::Mutex;

/// Error type for playback sends
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Failed to encode MIDI message: {0}")]
    Encode(String),

    #[error("Failed to send MIDI message: {0}")]
    Send(String),

    #[error("Playback port lock poisoned")]
    Poisoned,
}

/// A single note message headed for the playback port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NoteMessage {
    /// MIDI channel (0-15)
    pub channel: u8,
    /// Note number (0-127)
    pub note: u8,
    /// Velocity; 0 is sent as Note Off
    pub velocity: u8,
}

impl NoteMessage {
    /// Encode as raw MIDI bytes
    pub fn encode(&self) -> Result<Vec<u8>, PlaybackError> {
        let key = u7::from_int_lossy(self.note);
        let message = if self.velocity > 0 {
            MidiMessage::NoteOn {
                key,
                vel: u7::from_int_lossy(self.velocity),
            }
        } else {
            MidiMessage::NoteOff {
                key,
                vel: u7::from_int_lossy(0),
            }
        };
        let event = LiveEvent::Midi {
            channel: u4::from_int_lossy(self.channel),
            message,
        };

        let mut bytes = Vec::with_capacity(3);
        event
            .write_std(&mut bytes)
            .map_err(|e| PlaybackError::Encode(e.to_string()))?;
        Ok(bytes)
    }
}

/// midir-backed playback port
///
/// Tracks sounding notes so they can be released when the port is silenced
/// or dropped (no hanging notes after a loop restart or shutdown).
pub struct MidiPlaybackPort {
    connection: Mutex<PortState>,
}

struct PortState {
    connection: MidiOutputConnection,
    sounding: HashSet<(u8, u8)>,
}

impl MidiPlaybackPort {
    /// Connect to the first output port matching `port_match`
    pub fn connect(port_match: &str) -> Result<Self, MidiConnectionError> {
        let (midi_out, port) = MidiConnection::find_output_port(port_match)?;

        let connection = midi_out
            .connect(&port, "keylight-playback")
            .map_err(|e| MidiConnectionError::ConnectionError(e.to_string()))?;

        log::info!("MIDI: Playback port connected ('{}')", port_match);

        Ok(Self {
            connection: Mutex::new(PortState {
                connection,
                sounding: HashSet::new(),
            }),
        })
    }

    /// Send one note message
    pub fn send(&self, message: NoteMessage) -> Result<(), PlaybackError> {
        let bytes = message.encode()?;
        let mut state = self.connection.lock().map_err(|_| PlaybackError::Poisoned)?;

        log::trace!(
            "[MIDI OUT] ch={} note={} vel={}",
            message.channel,
            message.note,
            message.velocity
        );
        state
            .connection
            .send(&bytes)
            .map_err(|e| PlaybackError::Send(e.to_string()))?;

        if message.velocity > 0 {
            state.sounding.insert((message.channel, message.note));
        } else {
            state.sounding.remove(&(message.channel, message.note));
        }
        Ok(())
    }

    /// Release every note this port has started
    pub fn silence(&self) {
        let Ok(mut state) = self.connection.lock() else {
            return;
        };
        let sounding: Vec<(u8, u8)> = state.sounding.drain().collect();
        for (channel, note) in sounding {
            let off = NoteMessage {
                channel,
                note,
                velocity: 0,
            };
            match off.encode() {
                Ok(bytes) => {
                    if let Err(e) = state.connection.send(&bytes) {
                        log::warn!("MIDI output: Failed to release note {}: {}", note, e);
                    }
                }
                Err(e) => log::warn!("MIDI output: {}", e),
            }
        }
    }
}

impl Drop for MidiPlaybackPort {
    fn drop(&mut self) {
        self.silence();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_note_on() {
        let msg = NoteMessage {
            channel: 1,
            note: 60,
            velocity: 100,
        };
        assert_eq!(msg.encode().unwrap(), vec![0x91, 60, 100]);
    }

    #[test]
    fn test_encode_zero_velocity_as_note_off() {
        let msg = NoteMessage {
            channel: 2,
            note: 64,
            velocity: 0,
        };
        assert_eq!(msg.encode().unwrap(), vec![0x82, 64, 0]);
    }
}
