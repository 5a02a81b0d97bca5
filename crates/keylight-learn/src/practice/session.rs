//! Per-run practice state
//!
//! A [`PracticeSession`] is owned by exactly one practice thread. It tracks the
//! event cursor, the current gate (`hands_to_press` / `notes_pressed`),
//! deferred accompaniment notes and the per-hand hint buffers. Cross-thread
//! control (cancel, loop restart) lives in the engine's atomic signals, not here.

use crate::settings::{HandsFilter, LearnSettings, MuteHand, PracticeMode};
use crate::timeline::{Hand, TimedEvent, Timeline, LEFT_HAND_CHANNEL, RIGHT_HAND_CHANNEL};
use keylight_midi::InputEvent;
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

/// An expected key currently lit on the strip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HintedKey {
    pub position: usize,
    pub note: u8,
}

/// Lit expected keys per hand, re-asserted after a wrong note
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HintBuffers {
    left: Vec<HintedKey>,
    right: Vec<HintedKey>,
}

impl HintBuffers {
    pub fn for_hand(&self, hand: Hand) -> &[HintedKey] {
        match hand {
            Hand::Left => &self.left,
            Hand::Right => &self.right,
        }
    }

    fn for_hand_mut(&mut self, hand: Hand) -> &mut Vec<HintedKey> {
        match hand {
            Hand::Left => &mut self.left,
            Hand::Right => &mut self.right,
        }
    }

    pub fn add(&mut self, hand: Hand, key: HintedKey) {
        self.for_hand_mut(hand).push(key);
    }

    /// Remove one entry at `position` (keys may be hinted twice)
    pub fn remove(&mut self, hand: Hand, position: usize) {
        let keys = self.for_hand_mut(hand);
        if let Some(i) = keys.iter().position(|k| k.position == position) {
            keys.remove(i);
        }
    }

    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty() && self.right.is_empty()
    }
}

/// What to do with a note event the player is not asked to press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftwareRouting {
    /// The player's own note (or a muted one)
    NotSoftware,
    PlayNow,
    /// Held until the current gate is satisfied
    Deferred,
}

/// Mutable state of one practice run
#[derive(Debug)]
pub struct PracticeSession {
    pub(crate) settings: LearnSettings,
    timeline: Arc<Timeline>,
    slice: Range<usize>,
    pub(crate) current_index: usize,
    pub(crate) hands_to_press: BTreeSet<u8>,
    pub(crate) notes_pressed: BTreeSet<u8>,
    pub(crate) pending_software_notes: Vec<TimedEvent>,
    pub(crate) hints: HintBuffers,
    pub(crate) mistake_count: u32,
    pub(crate) next_gate_deadline: Option<Instant>,
}

impl PracticeSession {
    pub fn new(settings: LearnSettings, timeline: Arc<Timeline>) -> Self {
        let slice = timeline.slice_bounds(settings.loop_start_pct, settings.loop_end_pct);
        Self {
            settings,
            timeline,
            current_index: slice.start,
            slice,
            hands_to_press: BTreeSet::new(),
            notes_pressed: BTreeSet::new(),
            pending_software_notes: Vec::new(),
            hints: HintBuffers::default(),
            mistake_count: 0,
            next_gate_deadline: None,
        }
    }

    pub fn settings(&self) -> &LearnSettings {
        &self.settings
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    /// Event index range of the practice loop
    pub fn slice(&self) -> Range<usize> {
        self.slice.clone()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn hands_to_press(&self) -> &BTreeSet<u8> {
        &self.hands_to_press
    }

    pub fn notes_pressed(&self) -> &BTreeSet<u8> {
        &self.notes_pressed
    }

    pub fn pending_software_notes(&self) -> &[TimedEvent] {
        &self.pending_software_notes
    }

    pub fn hints(&self) -> &HintBuffers {
        &self.hints
    }

    pub fn mistake_count(&self) -> u32 {
        self.mistake_count
    }

    /// Rewind to the loop start and drop all per-pass state
    ///
    /// The mistake counter survives: it is only reset when it trips.
    pub fn restart_loop(&mut self) {
        self.current_index = self.slice.start;
        self.hands_to_press.clear();
        self.notes_pressed.clear();
        self.pending_software_notes.clear();
        self.hints.clear();
        self.next_gate_deadline = None;
    }

    pub(crate) fn advance(&mut self) {
        self.current_index += 1;
    }

    /// Does `event` close an open gate?
    ///
    /// True for a note event with a non-zero delay while notes are waiting to
    /// be pressed. Chords (zero-delay events) keep accumulating.
    pub fn closes_gate(&self, event: &TimedEvent, delay_seconds: f64) -> bool {
        delay_seconds > 0.0 && event.is_note() && !self.hands_to_press.is_empty()
    }

    /// Start waiting on the current gate
    pub(crate) fn open_gate(&mut self, deadline: Instant) {
        self.notes_pressed.clear();
        self.next_gate_deadline = Some(deadline);
    }

    pub fn gate_satisfied(&self) -> bool {
        self.hands_to_press.is_subset(&self.notes_pressed)
    }

    /// Apply a batch of key events to the open gate, returning the wrong ones
    ///
    /// Expected presses count toward the gate, expected releases un-count.
    /// A wrong press forfeits every deferred accompaniment note.
    pub fn apply_input(&mut self, events: impl IntoIterator<Item = InputEvent>) -> Vec<InputEvent> {
        let mut wrong = Vec::new();
        for event in events {
            if !self.hands_to_press.contains(&event.note) {
                if event.is_press() && !self.pending_software_notes.is_empty() {
                    log::debug!(
                        "[Practice] Wrong note {} drops {} pending accompaniment notes",
                        event.note,
                        self.pending_software_notes.len()
                    );
                    self.pending_software_notes.clear();
                }
                wrong.push(event);
                continue;
            }

            if event.is_press() {
                self.notes_pressed.insert(event.note);
            } else {
                self.notes_pressed.remove(&event.note);
            }
        }
        wrong
    }

    /// Close the gate: clear it and hand back the deferred notes to play
    pub(crate) fn finish_gate(&mut self) -> Vec<TimedEvent> {
        self.hands_to_press.clear();
        self.notes_pressed.clear();
        self.hints.clear();
        std::mem::take(&mut self.pending_software_notes)
    }

    /// Register a press the player must make
    pub(crate) fn expect_press(&mut self, event: &TimedEvent) {
        if event.is_press() && self.settings.hands_filter.includes(event.channel) {
            self.hands_to_press.insert(event.note);
        }
    }

    /// Track a lit key for hands whose LED hinting is off
    pub(crate) fn record_hint(&mut self, event: &TimedEvent, position: usize) {
        let hand = match event.channel {
            RIGHT_HAND_CHANNEL => Hand::Right,
            LEFT_HAND_CHANNEL => Hand::Left,
            _ => return,
        };
        if self.settings.led_active(hand) {
            return;
        }
        if event.is_press() {
            self.hints.add(
                hand,
                HintedKey {
                    position,
                    note: event.note,
                },
            );
        } else {
            self.hints.remove(hand, position);
        }
    }

    /// Is `event` played by the trainer rather than the player?
    pub fn is_software(&self, event: &TimedEvent) -> bool {
        if self.settings.practice_mode == PracticeMode::Listen {
            return true;
        }
        match (self.settings.hands_filter, self.settings.mute_hand) {
            (HandsFilter::Right, mute) => mute != MuteHand::Left && event.channel == LEFT_HAND_CHANNEL,
            (HandsFilter::Left, mute) => mute != MuteHand::Right && event.channel == RIGHT_HAND_CHANNEL,
            (HandsFilter::Both, _) => false,
        }
    }

    /// Decide when a software note is played; deferred notes are stored here
    pub(crate) fn route_software(&mut self, event: &TimedEvent) -> SoftwareRouting {
        if !self.is_software(event) {
            return SoftwareRouting::NotSoftware;
        }
        if self.settings.practice_mode == PracticeMode::Listen || self.hands_to_press.is_empty() {
            return SoftwareRouting::PlayNow;
        }
        self.pending_software_notes.push(*event);
        SoftwareRouting::Deferred
    }

    /// Deferred notes whose gate deadline passed with nothing left to press
    pub(crate) fn take_overdue_pending(&mut self, now: Instant) -> Vec<TimedEvent> {
        let overdue = !self.pending_software_notes.is_empty()
            && self.hands_to_press.is_empty()
            && self.next_gate_deadline.is_some_and(|deadline| now >= deadline);
        if !overdue {
            return Vec::new();
        }
        self.next_gate_deadline = None;
        std::mem::take(&mut self.pending_software_notes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn timeline() -> Arc<Timeline> {
        let events = (0..10u8)
            .map(|i| TimedEvent::note_on(60 + i, 1, 80, 120))
            .collect();
        Arc::new(Timeline::new(500_000, 480, events).unwrap())
    }

    fn session_with(settings: LearnSettings) -> PracticeSession {
        PracticeSession::new(settings, timeline())
    }

    fn press(note: u8) -> InputEvent {
        InputEvent::now(note, 100)
    }

    fn release(note: u8) -> InputEvent {
        InputEvent::now(note, 0)
    }

    #[test]
    fn test_gate_resolves_in_any_order() {
        for order in [[60u8, 64], [64, 60]] {
            let mut session = session_with(LearnSettings::default());
            session.hands_to_press.extend([60, 64]);
            session.open_gate(Instant::now());

            assert!(session.apply_input([press(order[0])]).is_empty());
            assert!(!session.gate_satisfied());
            assert!(session.apply_input([press(order[1])]).is_empty());
            assert!(session.gate_satisfied());
        }
    }

    #[test]
    fn test_release_uncounts_expected_note() {
        let mut session = session_with(LearnSettings::default());
        session.hands_to_press.extend([60, 64]);
        session.apply_input([press(60), release(60), press(64)]);
        assert!(!session.gate_satisfied());
        session.apply_input([press(60)]);
        assert!(session.gate_satisfied());
    }

    #[test]
    fn test_wrong_note_does_not_satisfy_gate() {
        let mut session = session_with(LearnSettings::default());
        session.hands_to_press.insert(60);
        let wrong = session.apply_input([press(67)]);
        assert_eq!(wrong.len(), 1);
        assert_eq!(wrong[0].note, 67);
        assert!(!session.gate_satisfied());
    }

    #[test]
    fn test_software_routing() {
        let right_only = LearnSettings {
            hands_filter: HandsFilter::Right,
            ..LearnSettings::default()
        };
        let session = session_with(right_only.clone());
        assert!(session.is_software(&TimedEvent::note_on(48, 2, 80, 0)));
        assert!(!session.is_software(&TimedEvent::note_on(60, 1, 80, 0)));

        let muted = session_with(LearnSettings {
            mute_hand: MuteHand::Left,
            ..right_only
        });
        assert!(!muted.is_software(&TimedEvent::note_on(48, 2, 80, 0)));

        let left_only = session_with(LearnSettings {
            hands_filter: HandsFilter::Left,
            ..LearnSettings::default()
        });
        assert!(left_only.is_software(&TimedEvent::note_on(72, 1, 80, 0)));

        let both = session_with(LearnSettings::default());
        assert!(!both.is_software(&TimedEvent::note_on(48, 2, 80, 0)));

        let listen = session_with(LearnSettings {
            practice_mode: PracticeMode::Listen,
            ..LearnSettings::default()
        });
        assert!(listen.is_software(&TimedEvent::note_on(60, 1, 80, 0)));
    }

    #[test]
    fn test_software_note_deferred_then_forfeited_on_wrong_press() {
        let mut session = session_with(LearnSettings {
            hands_filter: HandsFilter::Right,
            ..LearnSettings::default()
        });
        let accompaniment = TimedEvent::note_on(48, 2, 80, 0);

        assert_eq!(session.route_software(&accompaniment), SoftwareRouting::PlayNow);
        assert!(session.pending_software_notes().is_empty());

        session.expect_press(&TimedEvent::note_on(60, 1, 80, 0));
        assert_eq!(session.route_software(&accompaniment), SoftwareRouting::Deferred);
        assert_eq!(session.pending_software_notes().len(), 1);

        // A wrong release keeps the pending notes, a wrong press forfeits them
        session.apply_input([release(61)]);
        assert_eq!(session.pending_software_notes().len(), 1);
        session.apply_input([press(61)]);
        assert!(session.pending_software_notes().is_empty());
    }

    #[test]
    fn test_finish_gate_returns_pending() {
        let mut session = session_with(LearnSettings {
            hands_filter: HandsFilter::Right,
            ..LearnSettings::default()
        });
        session.expect_press(&TimedEvent::note_on(60, 1, 80, 0));
        session.route_software(&TimedEvent::note_on(48, 2, 80, 0));
        session.apply_input([press(60)]);
        assert!(session.gate_satisfied());

        let pending = session.finish_gate();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].note, 48);
        assert!(session.hands_to_press().is_empty());
        assert!(session.pending_software_notes().is_empty());
    }

    #[test]
    fn test_expect_press_respects_hands_filter() {
        let mut session = session_with(LearnSettings {
            hands_filter: HandsFilter::Left,
            ..LearnSettings::default()
        });
        session.expect_press(&TimedEvent::note_on(60, 1, 80, 0));
        session.expect_press(&TimedEvent::note_on(48, 2, 80, 0));
        session.expect_press(&TimedEvent::note_on(50, 2, 0, 0));
        assert_eq!(session.hands_to_press().iter().copied().collect::<Vec<_>>(), vec![48]);
    }

    #[test]
    fn test_escape_valve_waits_for_deadline() {
        let mut session = session_with(LearnSettings::default());
        session.pending_software_notes.push(TimedEvent::note_on(48, 2, 80, 0));
        let now = Instant::now();

        assert!(session.take_overdue_pending(now).is_empty());

        session.next_gate_deadline = Some(now + Duration::from_secs(1));
        assert!(session.take_overdue_pending(now).is_empty());

        let flushed = session.take_overdue_pending(now + Duration::from_secs(2));
        assert_eq!(flushed.len(), 1);
        assert_eq!(session.next_gate_deadline, None);
    }

    #[test]
    fn test_hints_only_for_inactive_hands() {
        let mut session = session_with(LearnSettings {
            led_active_right: false,
            ..LearnSettings::default()
        });
        session.record_hint(&TimedEvent::note_on(60, 1, 80, 0), 78);
        session.record_hint(&TimedEvent::note_on(48, 2, 80, 0), 54);
        assert_eq!(
            session.hints().for_hand(Hand::Right),
            &[HintedKey {
                position: 78,
                note: 60
            }]
        );
        assert!(session.hints().for_hand(Hand::Left).is_empty());

        session.record_hint(&TimedEvent::note_off(60, 1, 0), 78);
        assert!(session.hints().is_empty());
    }

    #[test]
    fn test_restart_loop_resets_to_slice_start() {
        let mut session = session_with(LearnSettings {
            loop_start_pct: 30.0,
            loop_end_pct: 80.0,
            ..LearnSettings::default()
        });
        assert_eq!(session.slice(), 3..8);

        session.current_index = 6;
        session.hands_to_press.insert(65);
        session.notes_pressed.insert(65);
        session.pending_software_notes.push(TimedEvent::note_on(48, 2, 80, 0));
        session.hints.add(Hand::Left, HintedKey { position: 1, note: 22 });
        session.mistake_count = 2;

        session.restart_loop();
        assert_eq!(session.current_index(), 3);
        assert!(session.hands_to_press().is_empty());
        assert!(session.notes_pressed().is_empty());
        assert!(session.pending_software_notes().is_empty());
        assert!(session.hints().is_empty());
        assert_eq!(session.mistake_count(), 2);
    }
}
