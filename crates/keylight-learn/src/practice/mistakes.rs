//! Wrong-note handling
//!
//! A wrong press lights its key red and counts as a mistake; a wrong release
//! turns the key back off. Red may overwrite a hinted key, so hints for hands
//! whose LED hinting is off are re-painted at hint brightness afterwards.

use super::session::PracticeSession;
use crate::color::Rgb;
use crate::led::LedPainter;
use crate::timeline::Hand;
use keylight_midi::InputEvent;

impl PracticeSession {
    /// Show a batch of wrong notes; returns true when the mistake threshold trips
    ///
    /// Tripping resets the counter. The caller turns it into a loop restart.
    pub(crate) fn handle_wrong_notes(&mut self, painter: &LedPainter, wrong: &[InputEvent]) -> bool {
        if !self.settings.show_wrong_notes || wrong.is_empty() {
            return false;
        }

        for event in wrong {
            if !event.is_press() {
                painter.paint_note(event.note, Rgb::OFF);
                continue;
            }

            log::debug!("[Practice] Wrong note {}", event.note);
            painter.paint_note(event.note, Rgb::WRONG);
            self.mistake_count += 1;

            for hand in [Hand::Left, Hand::Right] {
                if self.settings.led_active(hand) {
                    continue;
                }
                for key in self.hints.for_hand(hand) {
                    let color = self.settings.colors.note_color(
                        hand,
                        key.note,
                        false,
                        self.settings.brightness.hint,
                    );
                    painter.paint_position(key.position, color);
                }
            }
        }
        painter.present();

        let threshold = self.settings.mistake_threshold;
        if threshold > 0 && self.mistake_count > threshold {
            log::debug!(
                "[Practice] {} mistakes (threshold {}), restarting loop",
                self.mistake_count,
                threshold
            );
            self.mistake_count = 0;
            return true;
        }
        false
    }
}
