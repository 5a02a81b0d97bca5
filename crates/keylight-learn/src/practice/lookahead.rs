//! Predictive lookahead: which keys make up the next gate

use crate::timeline::TimedEvent;
use std::collections::BTreeSet;

/// Collect the presses of the gate starting at `cursor`
///
/// Scans `events[cursor..end]` for note-on events not already expected, and
/// stops at the first later note boundary with a non-zero delay once at
/// least one candidate was found.
pub fn predict_next_gate(
    events: &[TimedEvent],
    cursor: usize,
    end: usize,
    hands_to_press: &BTreeSet<u8>,
) -> Vec<TimedEvent> {
    let end = end.min(events.len());
    let mut predicted = Vec::new();
    for event in events.get(cursor..end).unwrap_or_default() {
        if event.is_note() && event.delta_ticks > 0 && !predicted.is_empty() {
            break;
        }
        if event.is_press() && !hands_to_press.contains(&event.note) {
            predicted.push(*event);
        }
    }
    predicted
}
