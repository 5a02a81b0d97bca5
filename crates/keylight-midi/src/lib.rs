//! MIDI keyboard support for the keylight piano trainer
//!
//! This crate provides:
//! - MIDI port discovery via midir
//! - Raw MIDI parsing via midly
//! - The keyboard input queue consumed by the practice engine
//! - An accompaniment playback port
//! - Port configuration (YAML)
//!
//! # Architecture
//!
//! ```text
//! Keyboard → midir callback → InputSender → flume (bounded) → InputReceiver → practice engine
//! practice engine → NoteMessage → MidiPlaybackPort → synth
//! ```
//!
//! The midir callback runs on the driver thread and never blocks: a full
//! queue drops the event with a warning rather than stalling the driver.

mod config;
mod connection;
mod input;
mod output;

pub use config::{
    default_ports_config_path, load_ports_config, save_ports_config, MidiPortsConfig,
    DEFAULT_QUEUE_CAPACITY,
};
pub use connection::{MidiConnection, MidiConnectionError};
pub use input::{input_queue, InputError, InputEvent, InputReceiver, InputSender, MidiInputHandler};
pub use output::{MidiPlaybackPort, NoteMessage, PlaybackError};
