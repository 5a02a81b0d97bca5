//! Practice loop body
//!
//! Runs on the engine's background thread. Each pass walks the loop slice
//! event by event: it waits on gates in Melody mode, paces the rest in real
//! time, lights keys and routes accompaniment to the playback sink.
//! Cancellation is polled at every loop head and after every bounded wait.

use super::lookahead::predict_next_gate;
use super::session::{PracticeSession, SoftwareRouting};
use super::{EngineSignals, EngineState};
use crate::error::{LearnError, Result};
use crate::flying_notes::PositionSync;
use crate::led::LedPainter;
use crate::playback::PlaybackSink;
use crate::settings::PracticeMode;
use crate::timeline::TimedEvent;
use keylight_midi::{InputEvent, InputReceiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep; bounds how stale a cancel request can get
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(20);

enum PassEnd {
    Completed,
    Restart,
}

enum GateOutcome {
    Satisfied,
    Restart,
}

pub(crate) struct PracticeRun {
    session: PracticeSession,
    input: InputReceiver,
    painter: LedPainter,
    playback: Arc<dyn PlaybackSink>,
    signals: Arc<EngineSignals>,
    position_sync: Option<PositionSync>,
}

impl PracticeRun {
    pub(crate) fn new(
        session: PracticeSession,
        input: InputReceiver,
        painter: LedPainter,
        playback: Arc<dyn PlaybackSink>,
        signals: Arc<EngineSignals>,
        position_sync: Option<PositionSync>,
    ) -> Self {
        Self {
            session,
            input,
            painter,
            playback,
            signals,
            position_sync,
        }
    }

    /// Run passes until the slice ends without looping, or cancel/failure
    pub(crate) fn run(mut self) {
        let slice = self.session.slice();
        log::info!(
            "[Practice] Run started: events {}..{}, mode {:?}, hands {:?}",
            slice.start,
            slice.end,
            self.session.settings().practice_mode,
            self.session.settings().hands_filter
        );

        loop {
            self.signals.set_state(EngineState::Running);
            match self.play_pass() {
                Ok(PassEnd::Completed) => {
                    if !self.session.settings().loop_enabled {
                        log::info!("[Practice] Reached loop end");
                        break;
                    }
                    log::debug!("[Practice] Loop pass complete, repeating");
                }
                Ok(PassEnd::Restart) => {
                    self.signals.set_state(EngineState::RestartingLoop);
                    log::debug!(
                        "[Practice] Restarting loop at event {}",
                        self.session.slice().start
                    );
                }
                Err(LearnError::LoopCancelled) => {
                    log::debug!("[Practice] Run cancelled");
                    break;
                }
                Err(e) => {
                    log::error!("[Practice] Run failed: {}", e);
                    break;
                }
            }
        }

        self.playback.silence();
        self.painter.clear_all();
    }

    fn play_pass(&mut self) -> Result<PassEnd> {
        self.signals.take_restart();
        self.session.restart_loop();
        self.lead_in()?;

        let timeline = Arc::clone(self.session.timeline());
        let end = self.session.slice().end;
        let mut time_prev = Instant::now();

        while self.session.current_index() < end {
            self.check_cancelled()?;

            let cursor = self.session.current_index();
            let event = *timeline.events().get(cursor).ok_or_else(|| {
                LearnError::MalformedTimeline(format!("event {} out of range", cursor))
            })?;
            let delay = timeline.delay_seconds(&event, self.session.settings().tempo_scale_pct);

            if !event.is_meta() {
                self.report_position(cursor, event.absolute_seconds);

                if self.session.closes_gate(&event, delay) {
                    if self.session.settings().practice_mode == PracticeMode::Melody {
                        if let GateOutcome::Restart = self.wait_for_gate(cursor, end, delay)? {
                            return Ok(PassEnd::Restart);
                        }
                    } else {
                        // Nobody waits outside Melody mode: the gate passes on time
                        let pending = self.session.finish_gate();
                        self.play_all(&pending);
                    }
                }
            }

            // Real-time pacing, minus the time spent on this iteration
            let pause = Duration::from_secs_f64(delay)
                .saturating_sub(time_prev.elapsed())
                .saturating_sub(self.session.settings().timing.epsilon());
            self.sleep_checked(pause)?;
            time_prev = Instant::now();

            if event.is_note() {
                self.light_event(&event);
                self.session.expect_press(&event);
                match self.session.route_software(&event) {
                    SoftwareRouting::PlayNow => self.play(&event),
                    SoftwareRouting::Deferred => {
                        log::trace!("[Practice] Deferring accompaniment note {}", event.note)
                    }
                    SoftwareRouting::NotSoftware => {}
                }
            }

            self.session.advance();

            let overdue = self.session.take_overdue_pending(Instant::now());
            if !overdue.is_empty() {
                log::debug!("[Practice] Flushing {} overdue accompaniment notes", overdue.len());
                self.play_all(&overdue);
            }

            if self.signals.take_restart() {
                return Ok(PassEnd::Restart);
            }
        }

        Ok(PassEnd::Completed)
    }

    /// Block progression until every expected key is held
    fn wait_for_gate(&mut self, cursor: usize, end: usize, delay: f64) -> Result<GateOutcome> {
        log::debug!(
            "[Practice] Waiting for {:?} at event {}",
            self.session.hands_to_press(),
            cursor
        );
        self.session
            .open_gate(Instant::now() + Duration::from_secs_f64(delay));
        self.show_upcoming(cursor, end);

        let poll = self.session.settings().timing.gate_poll();
        while !self.session.gate_satisfied() {
            self.check_cancelled()?;
            if self.signals.take_restart() {
                return Ok(GateOutcome::Restart);
            }

            let Some(first) = self.input.recv_timeout(poll) else {
                continue;
            };
            let batch: Vec<InputEvent> = std::iter::once(first).chain(self.input.drain()).collect();

            let wrong = self.session.apply_input(batch);
            if self.session.handle_wrong_notes(&self.painter, &wrong) {
                self.signals.request_restart();
            }
            self.signals.set_mistakes(self.session.mistake_count());

            // Wrong-note red may have covered an upcoming hint
            self.show_upcoming(cursor, end);
        }

        log::debug!("[Practice] Gate at event {} satisfied", cursor);
        let pending = self.session.finish_gate();
        self.play_all(&pending);
        self.painter.clear_all();
        Ok(GateOutcome::Satisfied)
    }

    /// Light the next gate's keys at upcoming brightness
    fn show_upcoming(&self, cursor: usize, end: usize) {
        let settings = self.session.settings();
        if !settings.show_future_notes || settings.practice_mode != PracticeMode::Melody {
            return;
        }

        let predicted = predict_next_gate(
            self.session.timeline().events(),
            cursor,
            end,
            self.session.hands_to_press(),
        );
        if predicted.is_empty() {
            return;
        }
        for event in &predicted {
            let color = settings.colors.note_color(
                event.hand(),
                event.note,
                true,
                settings.brightness.upcoming,
            );
            self.painter.paint_note(event.note, color);
        }
        self.painter.present();
    }

    /// Current-brightness key for a press, off for a release
    fn light_event(&mut self, event: &TimedEvent) {
        let color = {
            let settings = self.session.settings();
            let brightness = if event.is_press() {
                settings.brightness.current
            } else {
                0.0
            };
            settings
                .colors
                .note_color(event.hand(), event.note, false, brightness)
        };
        if let Some(position) = self.painter.paint_note(event.note, color) {
            self.session.record_hint(event, position);
        }
        self.painter.present();
    }

    fn play(&self, event: &TimedEvent) {
        if let Err(e) = self.playback.send(event) {
            log::warn!("[Practice] Playback of note {} failed: {}", event.note, e);
        }
    }

    fn play_all(&self, events: &[TimedEvent]) {
        for event in events {
            self.play(event);
        }
    }

    fn report_position(&self, cursor: usize, seconds: f64) {
        self.signals.set_position(cursor, seconds);
        if let Some(sync) = &self.position_sync {
            sync.sync_position(seconds);
        }
    }

    fn lead_in(&self) -> Result<()> {
        self.sleep_checked(self.session.settings().timing.lead_in())?;
        self.painter.clear_all();
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.signals.cancel_requested() {
            return Err(LearnError::LoopCancelled);
        }
        Ok(())
    }

    /// Sleep in bounded slices, bailing out on cancel
    fn sleep_checked(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check_cancelled()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(MAX_SLEEP_SLICE));
        }
    }
}
