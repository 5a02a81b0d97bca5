//! Keyboard input handling
//!
//! Receives raw MIDI bytes from the midir callback, parses them with midly,
//! stamps them with their arrival time and pushes them into the input queue
//! drained by the practice engine.
//!
//! ```text
//! Keyboard → midir callback → InputSender ─┐
//! USB gadget / test harness → InputSender ─┼→ flume (bounded) → InputReceiver → practice engine
//! ```

use crate::connection::{MidiConnection, MidiConnectionError};
use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use midir::MidiInputConnection;
use midly::live::LiveEvent;
use midly::MidiMessage;
use std::time::{Duration, Instant};

/// Error type for input parsing and queueing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    /// Bytes that are not a valid MIDI message
    #[error("Unparseable MIDI input: {0}")]
    Unparseable(String),

    #[error("Input queue is full, event dropped")]
    QueueFull,

    #[error("Input queue consumer has gone away")]
    QueueClosed,
}

/// A key press or release, timestamped on arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    /// Note number (0-127)
    pub note: u8,
    /// Velocity (0 = release)
    pub velocity: u8,
    /// MIDI channel the keyboard sent on (0-15)
    pub channel: u8,
    /// When the event entered the queue
    pub arrival: Instant,
}

impl InputEvent {
    /// Create an event stamped with the current time
    pub fn now(note: u8, velocity: u8) -> Self {
        Self {
            note,
            velocity,
            channel: 0,
            arrival: Instant::now(),
        }
    }

    /// Parse raw MIDI bytes into a key event
    ///
    /// - Note On with velocity > 0: press
    /// - Note On with velocity 0, Note Off: release (velocity forced to 0)
    /// - Anything else (CC, pitch bend, clock, sysex): `Ok(None)`
    pub fn parse(data: &[u8]) -> Result<Option<Self>, InputError> {
        let event = LiveEvent::parse(data).map_err(|e| InputError::Unparseable(e.to_string()))?;

        let LiveEvent::Midi { channel, message } = event else {
            return Ok(None);
        };

        let (note, velocity) = match message {
            MidiMessage::NoteOn { key, vel } => (key.as_int(), vel.as_int()),
            MidiMessage::NoteOff { key, .. } => (key.as_int(), 0),
            _ => return Ok(None),
        };

        Ok(Some(Self {
            note,
            velocity,
            channel: channel.as_int(),
            arrival: Instant::now(),
        }))
    }

    /// Is this a key press (velocity > 0)?
    pub fn is_press(&self) -> bool {
        self.velocity > 0
    }
}

/// Create a bounded input queue
///
/// The sender side is cloneable (one per producer); the receiver side is
/// drained by exactly one practice run at a time.
pub fn input_queue(capacity: usize) -> (InputSender, InputReceiver) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    (InputSender { tx }, InputReceiver { rx })
}

/// Producer side of the input queue
#[derive(Debug, Clone)]
pub struct InputSender {
    tx: Sender<InputEvent>,
}

impl InputSender {
    /// Push an already-parsed event (non-blocking)
    pub fn send(&self, event: InputEvent) -> Result<(), InputError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => InputError::QueueFull,
            TrySendError::Disconnected(_) => InputError::QueueClosed,
        })
    }

    /// Parse raw bytes and push the resulting key event
    ///
    /// Returns `Ok(false)` when the message is valid MIDI but not a key event.
    pub fn send_raw(&self, data: &[u8]) -> Result<bool, InputError> {
        match InputEvent::parse(data)? {
            Some(event) => self.send(event).map(|_| true),
            None => Ok(false),
        }
    }
}

/// Consumer side of the input queue
///
/// Cloning is only meant for handing the queue to a fresh practice run after
/// the previous run has been joined; two runs never drain concurrently.
#[derive(Debug, Clone)]
pub struct InputReceiver {
    rx: Receiver<InputEvent>,
}

impl InputReceiver {
    /// Wait up to `timeout` for the next event
    ///
    /// With every producer gone this still waits out `timeout`, so a polling
    /// caller does not spin when the keyboard disconnects.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<InputEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(timeout);
                None
            }
        }
    }

    /// Take the next pending event without waiting
    pub fn try_recv(&self) -> Option<InputEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Drain all currently pending events
    pub fn drain(&self) -> impl Iterator<Item = InputEvent> + '_ {
        std::iter::from_fn(|| self.try_recv())
    }

    /// Discard everything pending, returning how many events were dropped
    pub fn clear(&self) -> usize {
        self.drain().count()
    }

    /// Number of events waiting
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// midir input handler
///
/// Owns the midir connection; every key event from the device ends up in the
/// input queue. Dropping the handler closes the port.
pub struct MidiInputHandler {
    /// The midir connection (kept alive for the duration)
    _connection: MidiInputConnection<InputSender>,
    port_match: String,
}

impl MidiInputHandler {
    /// Connect to the first input port matching `port_match`
    pub fn connect(port_match: &str, sender: InputSender) -> Result<Self, MidiConnectionError> {
        let (midi_in, port) = MidiConnection::find_input_port(port_match)?;

        let connection = midi_in
            .connect(&port, "keylight-input", Self::midi_callback, sender)
            .map_err(|e| MidiConnectionError::ConnectionError(e.to_string()))?;

        log::info!("MIDI: Input handler connected ('{}')", port_match);

        Ok(Self {
            _connection: connection,
            port_match: port_match.to_string(),
        })
    }

    /// Port pattern this handler was connected with
    pub fn port_match(&self) -> &str {
        &self.port_match
    }

    /// Called from the MIDI driver thread; must be fast and non-blocking.
    fn midi_callback(_timestamp: u64, data: &[u8], sender: &mut InputSender) {
        match sender.send_raw(data) {
            Ok(_) => {}
            Err(InputError::Unparseable(reason)) => {
                log::debug!("MIDI: Dropping unparseable input {:02x?}: {}", data, reason);
            }
            Err(InputError::QueueFull) => {
                log::warn!("MIDI: Input queue full, dropping key event");
            }
            Err(InputError::QueueClosed) => {
                log::trace!("MIDI: Input queue closed, ignoring key event");
            }
        }
    }
}
