//! Practice engine
//!
//! Owns the settings snapshot, the bound timeline and the background run
//! thread. The run thread owns all per-run state ([`PracticeSession`]); the
//! handle talks to it only through atomic signals:
//!
//! ```text
//! PracticeEngine ──cancel/restart flags──→ practice thread ──→ LedSink / PlaybackSink
//!        ↑                                      │
//!        └──────── state, position ─────────────┘
//! keyboard → InputSender → flume → InputReceiver ──→ practice thread
//! ```
//!
//! Settings changes never mutate a running loop: loop bounds restart the run,
//! everything else applies on the next start or restart.

mod lookahead;
mod mistakes;
mod runner;
mod session;

pub use lookahead::predict_next_gate;
pub use session::{HintBuffers, HintedKey, PracticeSession, SoftwareRouting};

use crate::error::{LearnError, Result};
use crate::flying_notes::PositionSync;
use crate::led::{LedPainter, LedSink};
use crate::playback::PlaybackSink;
use crate::settings::{
    keys, write_value, HandsFilter, LearnSettings, MuteHand, PracticeMode, SettingsStore,
};
use crate::timeline::{Hand, Timeline, TimelineSource};
use keylight_midi::InputReceiver;
use runner::PracticeRun;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    /// No timeline bound
    Idle = 0,
    /// A timeline is being materialized
    Loading = 1,
    /// Timeline bound, not started
    Ready = 2,
    Running = 3,
    RestartingLoop = 4,
    Stopped = 5,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Loading,
            2 => EngineState::Ready,
            3 => EngineState::Running,
            4 => EngineState::RestartingLoop,
            5 => EngineState::Stopped,
            _ => EngineState::Idle,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, EngineState::Running | EngineState::RestartingLoop)
    }
}

/// Flags and progress shared between the engine handle and its run thread
#[derive(Debug)]
pub(crate) struct EngineSignals {
    state: AtomicU8,
    cancel: AtomicBool,
    restart: AtomicBool,
    current_index: AtomicUsize,
    /// f64 bits of the song position in seconds
    position: AtomicU64,
    mistakes: AtomicU32,
}

impl EngineSignals {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EngineState::Idle as u8),
            cancel: AtomicBool::new(false),
            restart: AtomicBool::new(false),
            current_index: AtomicUsize::new(0),
            position: AtomicU64::new(0f64.to_bits()),
            mistakes: AtomicU32::new(0),
        }
    }

    pub(crate) fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: EngineState) {
        let previous = self.state.swap(state as u8, Ordering::AcqRel);
        if previous != state as u8 {
            log::info!(
                "[Practice] {:?} -> {:?}",
                EngineState::from_u8(previous),
                state
            );
        }
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub(crate) fn request_restart(&self) {
        self.restart.store(true, Ordering::Release);
    }

    /// Consume a pending restart request
    pub(crate) fn take_restart(&self) -> bool {
        self.restart.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn set_position(&self, index: usize, seconds: f64) {
        self.current_index.store(index, Ordering::Relaxed);
        self.position.store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_mistakes(&self, count: u32) {
        self.mistakes.store(count, Ordering::Relaxed);
    }

    /// Fresh flags for a new run
    fn rearm(&self) {
        self.cancel.store(false, Ordering::Release);
        self.restart.store(false, Ordering::Release);
        self.set_position(0, 0.0);
        self.set_mistakes(0);
    }
}

/// Cloneable view of a running engine for other threads (UI, web handlers)
#[derive(Debug, Clone)]
pub struct EngineControl {
    signals: Arc<EngineSignals>,
}

impl EngineControl {
    pub fn state(&self) -> EngineState {
        self.signals.state()
    }

    /// Rewind the running loop to its start without stopping
    pub fn request_loop_restart(&self) {
        log::debug!("[Practice] Loop restart requested");
        self.signals.request_restart();
    }

    /// Event index last reached by the run
    pub fn current_index(&self) -> usize {
        self.signals.current_index.load(Ordering::Relaxed)
    }

    /// Song time (seconds) of the last processed note event
    pub fn position_seconds(&self) -> f64 {
        f64::from_bits(self.signals.position.load(Ordering::Relaxed))
    }

    pub fn mistake_count(&self) -> u32 {
        self.signals.mistakes.load(Ordering::Relaxed)
    }
}

/// Marks the engine stopped when the run thread exits, panics included
struct StoppedOnExit(Arc<EngineSignals>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.0.set_state(EngineState::Stopped);
    }
}

/// Practice engine handle
pub struct PracticeEngine {
    store: Arc<dyn SettingsStore>,
    settings: LearnSettings,
    timeline: Option<Arc<Timeline>>,
    input: InputReceiver,
    led: Arc<dyn LedSink>,
    playback: Arc<dyn PlaybackSink>,
    position_sync: Option<PositionSync>,
    signals: Arc<EngineSignals>,
    worker: Option<thread::JoinHandle<()>>,
}

impl PracticeEngine {
    /// Build an idle engine, reading settings from `store`
    pub fn new(
        store: Arc<dyn SettingsStore>,
        input: InputReceiver,
        led: Arc<dyn LedSink>,
        playback: Arc<dyn PlaybackSink>,
    ) -> Self {
        let settings = LearnSettings::load(store.as_ref());
        Self {
            store,
            settings,
            timeline: None,
            input,
            led,
            playback,
            position_sync: None,
            signals: Arc::new(EngineSignals::new()),
            worker: None,
        }
    }

    pub fn control(&self) -> EngineControl {
        EngineControl {
            signals: Arc::clone(&self.signals),
        }
    }

    pub fn state(&self) -> EngineState {
        self.signals.state()
    }

    pub fn settings(&self) -> &LearnSettings {
        &self.settings
    }

    pub fn timeline(&self) -> Option<&Arc<Timeline>> {
        self.timeline.as_ref()
    }

    /// Follow the run's song position with a renderer
    pub fn attach_position_sync(&mut self, sync: PositionSync) {
        self.position_sync = Some(sync);
    }

    /// Load a song through `source` and bind it
    ///
    /// A running session is stopped first. On failure the engine is left
    /// without a timeline.
    pub fn load_song(&mut self, source: &dyn TimelineSource, song_id: &str) -> Result<()> {
        self.stop()?;
        self.timeline = None;
        self.signals.set_state(EngineState::Loading);

        match source.load(song_id).and_then(|timeline| {
            timeline.ensure_playable()?;
            Ok(timeline)
        }) {
            Ok(timeline) => {
                log::info!(
                    "[Practice] Loaded '{}': {} events, {:.1}s",
                    song_id,
                    timeline.len(),
                    timeline.duration_seconds()
                );
                self.bind_timeline(Arc::new(timeline))
            }
            Err(e) => {
                log::warn!("[Practice] Failed to load '{}': {}", song_id, e);
                self.signals.set_state(EngineState::Idle);
                Err(e)
            }
        }
    }

    /// Bind an already loaded timeline, replacing the previous one
    pub fn bind_timeline(&mut self, timeline: Arc<Timeline>) -> Result<()> {
        timeline.ensure_playable()?;
        self.stop()?;
        self.timeline = Some(timeline);
        self.signals.set_state(EngineState::Ready);
        Ok(())
    }

    /// Start a run from the loop start
    ///
    /// From `Stopped` the bound timeline is re-armed first.
    pub fn start(&mut self) -> Result<()> {
        match self.state() {
            EngineState::Idle => return Err(LearnError::NoTimeline),
            state @ (EngineState::Loading | EngineState::Running | EngineState::RestartingLoop) => {
                return Err(LearnError::InvalidState(state))
            }
            EngineState::Stopped => {
                self.reap_worker();
                self.signals.set_state(EngineState::Ready);
            }
            EngineState::Ready => {}
        }

        let timeline = self.timeline.clone().ok_or(LearnError::NoTimeline)?;
        timeline.ensure_playable()?;

        let stale = self.input.clear();
        if stale > 0 {
            log::debug!("[Practice] Discarded {} stale key events", stale);
        }
        self.signals.rearm();

        let run = PracticeRun::new(
            PracticeSession::new(self.settings.clone(), timeline),
            self.input.clone(),
            LedPainter::new(Arc::clone(&self.led), self.settings.key_mapping),
            Arc::clone(&self.playback),
            Arc::clone(&self.signals),
            self.position_sync.clone(),
        );

        self.signals.set_state(EngineState::Running);
        let signals = Arc::clone(&self.signals);
        let handle = thread::Builder::new()
            .name("practice-run".to_string())
            .spawn(move || {
                let _stopped = StoppedOnExit(signals);
                run.run();
            })
            .expect("Failed to spawn practice thread");
        self.worker = Some(handle);
        Ok(())
    }

    /// Cancel the run and wait for its thread; a no-op when nothing runs
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        self.signals.request_cancel();
        log::debug!("[Practice] Waiting for run thread to stop...");
        if handle.join().is_err() {
            log::error!("[Practice] Run thread panicked");
        }
        self.signals.set_state(EngineState::Stopped);
        Ok(())
    }

    /// Cancel and relaunch with the current settings
    pub fn restart(&mut self) -> Result<()> {
        self.stop()?;
        self.start()
    }

    /// Block until the run ends on its own (slice end without looping, or failure)
    pub fn join(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("[Practice] Run thread panicked");
            }
        }
    }

    pub fn request_loop_restart(&self) {
        self.control().request_loop_restart();
    }

    fn reap_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    fn restart_if_running(&mut self) -> Result<()> {
        if self.state().is_running() {
            self.restart()?;
        }
        Ok(())
    }

    /// Persist `next` under `key`, then adopt it
    ///
    /// A failed write leaves the in-memory snapshot untouched.
    fn commit<T: serde::Serialize>(
        &mut self,
        key: &str,
        value: &T,
        next: LearnSettings,
    ) -> Result<()> {
        write_value(self.store.as_ref(), key, value)?;
        self.settings = next;
        Ok(())
    }

    fn staged(&self, edit: impl FnOnce(&mut LearnSettings)) -> LearnSettings {
        let mut next = self.settings.clone();
        edit(&mut next);
        next
    }

    pub fn set_practice_mode(&mut self, mode: PracticeMode) -> Result<()> {
        let next = self.staged(|s| s.practice_mode = mode);
        self.commit(keys::PRACTICE, &mode.index(), next)
    }

    pub fn set_hands_filter(&mut self, hands: HandsFilter) -> Result<()> {
        let next = self.staged(|s| s.hands_filter = hands);
        self.commit(keys::HANDS, &hands.index(), next)
    }

    pub fn set_mute_hand(&mut self, mute: MuteHand) -> Result<()> {
        let next = self.staged(|s| s.mute_hand = mute);
        self.commit(keys::MUTE_HAND, &mute.index(), next)
    }

    /// Set the loop start (clamped); restarts a running session
    pub fn set_loop_start(&mut self, pct: f64) -> Result<f64> {
        let mut value = 0.0;
        let next = self.staged(|s| value = s.set_loop_start(pct));
        self.commit(keys::START_POINT, &value, next)?;
        self.restart_if_running()?;
        Ok(value)
    }

    /// Set the loop end (clamped); restarts a running session
    pub fn set_loop_end(&mut self, pct: f64) -> Result<f64> {
        let mut value = 0.0;
        let next = self.staged(|s| value = s.set_loop_end(pct));
        self.commit(keys::END_POINT, &value, next)?;
        self.restart_if_running()?;
        Ok(value)
    }

    pub fn set_tempo_scale(&mut self, pct: u32) -> Result<u32> {
        let mut value = 0;
        let next = self.staged(|s| value = s.set_tempo_scale(pct));
        self.commit(keys::SET_TEMPO, &value, next)?;
        Ok(value)
    }

    pub fn set_mistake_threshold(&mut self, threshold: u32) -> Result<u32> {
        let mut value = 0;
        let next = self.staged(|s| value = s.set_mistake_threshold(threshold));
        self.commit(keys::NUMBER_OF_MISTAKES, &value, next)?;
        Ok(value)
    }

    pub fn set_show_wrong_notes(&mut self, show: bool) -> Result<()> {
        let next = self.staged(|s| s.show_wrong_notes = show);
        self.commit(keys::SHOW_WRONG_NOTES, &(show as u8), next)
    }

    pub fn set_show_future_notes(&mut self, show: bool) -> Result<()> {
        let next = self.staged(|s| s.show_future_notes = show);
        self.commit(keys::SHOW_FUTURE_NOTES, &(show as u8), next)
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) -> Result<()> {
        let next = self.staged(|s| s.loop_enabled = enabled);
        self.commit(keys::IS_LOOP_ACTIVE, &(enabled as u8), next)
    }

    /// Pick the palette color used for `hand` where the color table has no
    /// entry; the index is clamped to the palette. Applies from the next start.
    pub fn set_hand_color(&mut self, hand: Hand, index: usize) -> Result<usize> {
        let mut value = 0;
        let next = self.staged(|s| value = s.colors.set_legacy_index(hand, index));
        let key = match hand {
            Hand::Right => keys::HAND_COLOR_RIGHT,
            Hand::Left => keys::HAND_COLOR_LEFT,
        };
        self.commit(key, &value, next)?;
        Ok(value)
    }

    /// Re-read colors and brightness from the store
    pub fn reload_colors(&mut self) {
        self.settings.reload_colors(self.store.as_ref());
    }
}

impl Drop for PracticeEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
