//! Practice engine for the keylight LED piano trainer
//!
//! This crate provides:
//! - The song timeline (tick → seconds, loop slicing)
//! - The practice engine: gates, accompaniment routing, mistakes, loop restarts
//! - Hand/key color policy and LED painting
//! - The flying-notes renderer and its subscriber hub
//! - A key/value settings store (YAML)
//!
//! # Architecture
//!
//! ```text
//! TimelineSource → Timeline ─┬→ PracticeEngine ──→ LedSink / PlaybackSink
//!                            │        ↑   └── PositionSync ──┐
//!                            │   InputReceiver                ↓
//!                            └→ FlyingNotesRenderer ──→ SubscriberHub → display clients
//! ```
//!
//! Both the engine and the renderer run on their own background thread and
//! are stopped through an atomic flag followed by a join.

pub mod color;
pub mod error;
pub mod flying_notes;
pub mod led;
pub mod playback;
pub mod practice;
pub mod settings;
pub mod timeline;

pub use color::{BrightnessLevels, ColorTable, LegacyPalette, Rgb};
pub use error::{LearnError, Result, SinkError};
pub use flying_notes::{
    FlyingNotesPatch, FlyingNotesRenderer, FlyingNotesSettings, PositionSync, SubscriberHub,
};
pub use led::{ChannelLedSink, KeyMapping, LedCommand, LedPainter, LedSink, MemoryLedSink};
pub use playback::{MemoryPlayback, NullPlayback, PlaybackSink};
pub use practice::{EngineControl, EngineState, PracticeEngine};
pub use settings::{
    HandsFilter, LearnSettings, MemorySettingsStore, MuteHand, PracticeMode, SettingsStore,
    YamlSettingsStore,
};
pub use timeline::{Hand, TimedEvent, Timeline, TimelineSource};
