//! Flying-notes renderer
//!
//! A fixed-rate frame loop on its own thread projects the upcoming notes of
//! the bound timeline into screen space and pushes JSON frames to display
//! subscribers. The loop owns its note snapshot and clock; the handle only
//! flips the shutdown flag and forwards position syncs over a channel.

mod broadcast;
mod frame;
mod layout;
mod settings;

pub use broadcast::{SubscriberHub, SubscriberId, SUBSCRIBER_QUEUE_CAPACITY};
pub use frame::{
    visible_notes, BroadcastMessage, BufferedNote, FlyingNote, FrameData, NoteBuffer,
    NOTE_BUFFER_CAPACITY, PLACEHOLDER_DURATION,
};
pub use layout::{KeyboardLayout, PianoKey};
pub use settings::{FlyingNotesPatch, FlyingNotesSettings};

use crate::color::ColorTable;
use crate::error::{LearnError, Result};
use crate::settings::SettingsStore;
use crate::timeline::Timeline;
use flume::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Position updates queued between two frames
const POSITION_QUEUE_CAPACITY: usize = 64;

/// Feeds the practice engine's song position into the renderer
#[derive(Debug, Clone)]
pub struct PositionSync {
    tx: Sender<f64>,
}

impl PositionSync {
    /// Re-anchor the renderer clock at `seconds` (song time)
    ///
    /// Never blocks; when frames lag behind, older positions are superseded anyway.
    pub fn sync_position(&self, seconds: f64) {
        if self.tx.try_send(seconds).is_err() {
            log::trace!("[FlyingNotes] Position queue full, dropping {:.3}s", seconds);
        }
    }
}

/// Song clock: wall time since the anchor, scaled by speed, plus an offset
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    anchor: Instant,
    offset: f64,
    speed: f64,
}

impl PlaybackClock {
    pub fn start(speed: f64) -> Self {
        Self {
            anchor: Instant::now(),
            offset: 0.0,
            speed,
        }
    }

    pub fn now(&self) -> f64 {
        self.offset + self.anchor.elapsed().as_secs_f64() * self.speed
    }

    /// Continue counting from `seconds`
    pub fn resync(&mut self, seconds: f64) {
        self.anchor = Instant::now();
        self.offset = seconds;
    }
}

/// State owned by the frame thread
struct FrameLoop {
    notes: NoteBuffer,
    layout: Arc<KeyboardLayout>,
    colors: ColorTable,
    settings: FlyingNotesSettings,
    hub: SubscriberHub,
    positions: Receiver<f64>,
    shutdown: Arc<AtomicBool>,
}

impl FrameLoop {
    fn run(self) {
        let interval = self.settings.frame_interval();
        let mut clock = PlaybackClock::start(self.settings.speed);

        while !self.shutdown.load(Ordering::Relaxed) {
            let frame_start = Instant::now();

            if let Some(position) = self.positions.try_iter().last() {
                clock.resync(position);
            }

            if self.hub.subscriber_count() > 0 {
                match self.render(clock.now()) {
                    Ok(message) => {
                        self.hub.broadcast(&message);
                    }
                    Err(e) => log::warn!("[FlyingNotes] Skipping frame: {}", e),
                }
            }

            thread::sleep(interval.saturating_sub(frame_start.elapsed()));
        }

        log::debug!("[FlyingNotes] Frame loop exiting");
    }

    fn render(&self, current_time: f64) -> Result<String> {
        let notes = visible_notes(
            &self.notes,
            &self.layout,
            &self.colors,
            &self.settings,
            current_time,
        );
        let message = BroadcastMessage::FrameUpdate {
            current_time,
            data: FrameData {
                notes,
                piano_keys: self.layout.keys(),
                settings: &self.settings,
            },
        };
        Ok(message.encode()?)
    }
}

/// Renderer handle
pub struct FlyingNotesRenderer {
    store: Arc<dyn SettingsStore>,
    settings: FlyingNotesSettings,
    colors: ColorTable,
    layout: Arc<KeyboardLayout>,
    timeline: Option<Arc<Timeline>>,
    hub: SubscriberHub,
    position_tx: Sender<f64>,
    position_rx: Receiver<f64>,
    shutdown: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl FlyingNotesRenderer {
    pub fn new(store: Arc<dyn SettingsStore>, colors: ColorTable) -> Self {
        let settings = FlyingNotesSettings::load(store.as_ref());
        let (position_tx, position_rx) = flume::bounded(POSITION_QUEUE_CAPACITY);
        Self {
            store,
            settings,
            colors,
            layout: Arc::new(KeyboardLayout::default()),
            timeline: None,
            hub: SubscriberHub::new(),
            position_tx,
            position_rx,
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Song to render from the next start
    pub fn bind_timeline(&mut self, timeline: Arc<Timeline>) {
        self.timeline = Some(timeline);
    }

    pub fn set_colors(&mut self, colors: ColorTable) {
        self.colors = colors;
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    pub fn hub(&self) -> &SubscriberHub {
        &self.hub
    }

    pub fn add_subscriber(&self) -> (SubscriberId, Receiver<String>) {
        self.hub.add_subscriber()
    }

    pub fn remove_subscriber(&self, id: SubscriberId) -> bool {
        self.hub.remove_subscriber(id)
    }

    /// Handle for the practice engine to drive the renderer clock
    pub fn position_sync(&self) -> PositionSync {
        PositionSync {
            tx: self.position_tx.clone(),
        }
    }

    /// Start the frame loop; a no-op when already running
    pub fn start(&mut self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }
        if !self.settings.enabled {
            return Err(LearnError::RendererDisabled);
        }

        let notes = self
            .timeline
            .as_deref()
            .map(NoteBuffer::from_timeline)
            .unwrap_or_default();
        log::info!("[FlyingNotes] Loaded {} notes", notes.len());

        // Positions reported while stopped refer to an old session
        let stale = self.position_rx.drain().count();
        if stale > 0 {
            log::debug!("[FlyingNotes] Dropped {} stale position updates", stale);
        }
        self.shutdown.store(false, Ordering::Relaxed);

        let frame_loop = FrameLoop {
            notes,
            layout: Arc::clone(&self.layout),
            colors: self.colors.clone(),
            settings: self.settings.clone(),
            hub: self.hub.clone(),
            positions: self.position_rx.clone(),
            shutdown: Arc::clone(&self.shutdown),
        };
        let handle = thread::Builder::new()
            .name("flying-notes".to_string())
            .spawn(move || frame_loop.run())
            .expect("Failed to spawn flying-notes thread");
        self.worker = Some(handle);

        log::info!(
            "[FlyingNotes] Animation started at {} Hz",
            self.settings.animation_smoothness
        );
        Ok(())
    }

    /// Stop the frame loop and tell subscribers; a no-op when not running
    pub fn stop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::Relaxed);
        if handle.join().is_err() {
            log::error!("[FlyingNotes] Frame thread panicked");
        }

        match BroadcastMessage::Stop.encode() {
            Ok(message) => {
                self.hub.broadcast(&message);
            }
            Err(e) => log::warn!("[FlyingNotes] Failed to encode stop message: {}", e),
        }
        log::info!("[FlyingNotes] Animation stopped");
    }

    /// Persist and apply a partial update, cycling the loop if it is running
    ///
    /// A failed write leaves the in-memory settings untouched.
    pub fn update_settings(&mut self, patch: &FlyingNotesPatch) -> Result<FlyingNotesSettings> {
        let next = patch.apply(&self.settings);
        patch.persist(self.store.as_ref())?;
        self.settings = next;

        if self.is_active() {
            self.stop();
            if self.settings.enabled {
                self.start()?;
            }
        }
        Ok(self.settings.clone())
    }

    pub fn get_settings(&self) -> FlyingNotesSettings {
        self.settings.clone()
    }

    /// Jump the renderer clock to `seconds`; ignored while stopped
    pub fn sync_position(&self, seconds: f64) {
        if self.is_active() {
            self.position_sync().sync_position(seconds);
        }
    }
}

impl Drop for FlyingNotesRenderer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{read_value, MemorySettingsStore};
    use crate::timeline::TimedEvent;
    use std::time::Duration;

    fn renderer(enabled: bool) -> (FlyingNotesRenderer, Arc<MemorySettingsStore>) {
        let store = Arc::new(
            MemorySettingsStore::new()
                .with("flying_notes/enabled", enabled as u8)
                .with("flying_notes/animation_smoothness", 100),
        );
        let mut renderer = FlyingNotesRenderer::new(store.clone(), ColorTable::default());
        let timeline = Timeline::new(
            500_000,
            480,
            vec![
                TimedEvent::note_on(60, 1, 80, 0),
                TimedEvent::note_on(64, 1, 80, 480),
            ],
        )
        .unwrap();
        renderer.bind_timeline(Arc::new(timeline));
        (renderer, store)
    }

    fn parse(message: &str) -> serde_json::Value {
        serde_json::from_str(message).unwrap()
    }

    #[test]
    fn test_disabled_renderer_refuses_to_start() {
        let (mut renderer, _store) = renderer(false);
        assert!(matches!(renderer.start(), Err(LearnError::RendererDisabled)));
        assert!(!renderer.is_active());
    }

    #[test]
    fn test_frames_reach_subscribers() {
        let (mut renderer, _store) = renderer(true);
        let (_id, rx) = renderer.add_subscriber();
        renderer.start().unwrap();
        assert!(renderer.is_active());

        let frame = parse(&rx.recv_timeout(Duration::from_secs(2)).unwrap());
        assert_eq!(frame["type"], "frame_update");
        assert_eq!(frame["data"]["piano_keys"].as_array().map(Vec::len), Some(88));
        let notes = frame["data"]["notes"].as_array().cloned().unwrap_or_default();
        assert!(notes.iter().any(|n| n["midi_note"] == 64));
        renderer.stop();
    }

    #[test]
    fn test_stop_sends_one_stop_message() {
        let (mut renderer, _store) = renderer(true);
        renderer.start().unwrap();
        let (_id, rx) = renderer.add_subscriber();
        renderer.stop();
        renderer.stop();
        assert!(!renderer.is_active());

        let messages: Vec<serde_json::Value> = rx.try_iter().map(|m| parse(&m)).collect();
        let stops = messages.iter().filter(|m| m["type"] == "stop").count();
        assert_eq!(stops, 1);
        assert_eq!(messages.last().map(|m| m["type"].clone()), Some("stop".into()));
    }

    #[test]
    fn test_position_sync_moves_clock() {
        let (mut renderer, _store) = renderer(true);
        let sync = renderer.position_sync();
        renderer.start().unwrap();
        sync.sync_position(100.0);

        let (_id, rx) = renderer.add_subscriber();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut synced = false;
        while Instant::now() < deadline && !synced {
            if let Ok(message) = rx.recv_timeout(Duration::from_millis(100)) {
                let frame = parse(&message);
                synced = frame["current_time"].as_f64().is_some_and(|t| t >= 100.0);
            }
        }
        assert!(synced);
        renderer.stop();
    }

    #[test]
    fn test_update_settings_persists_and_cycles() {
        let (mut renderer, store) = renderer(true);
        renderer.start().unwrap();

        let updated = renderer
            .update_settings(&FlyingNotesPatch {
                speed: Some(2.0),
                show_measures: Some(false),
                ..FlyingNotesPatch::default()
            })
            .unwrap();
        assert_eq!(updated.speed, 2.0);
        assert!(renderer.is_active());
        assert_eq!(read_value::<f64>(store.as_ref(), "flying_notes/speed"), Some(2.0));
        assert_eq!(read_value::<u8>(store.as_ref(), "flying_notes/show_measures"), Some(0));

        renderer
            .update_settings(&FlyingNotesPatch {
                enabled: Some(false),
                ..FlyingNotesPatch::default()
            })
            .unwrap();
        assert!(!renderer.is_active());
        assert!(!renderer.get_settings().enabled);
    }

    #[test]
    fn test_failed_write_keeps_settings() {
        struct ReadOnlyStore(MemorySettingsStore);

        impl SettingsStore for ReadOnlyStore {
            fn get(&self, key: &str) -> Option<serde_yaml::Value> {
                self.0.get(key)
            }

            fn set(&self, key: &str, _value: serde_yaml::Value) -> anyhow::Result<()> {
                anyhow::bail!("settings file is read-only ({})", key)
            }
        }

        let store = Arc::new(ReadOnlyStore(
            MemorySettingsStore::new().with("flying_notes/speed", 1.5),
        ));
        let mut renderer = FlyingNotesRenderer::new(store, ColorTable::default());
        let before = renderer.get_settings();

        let result = renderer.update_settings(&FlyingNotesPatch {
            speed: Some(3.0),
            ..FlyingNotesPatch::default()
        });
        assert!(matches!(result, Err(LearnError::Settings(_))));
        assert_eq!(renderer.get_settings(), before);
        assert_eq!(renderer.get_settings().speed, 1.5);
    }

    #[test]
    fn test_clock_resync() {
        let mut clock = PlaybackClock::start(2.0);
        clock.resync(10.0);
        let now = clock.now();
        assert!((10.0..10.5).contains(&now));
    }
}
