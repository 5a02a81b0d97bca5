//! LED strip output
//!
//! The physical strip driver lives outside this crate; it is reached through
//! the [`LedSink`] trait. Writes are fire-and-forget: [`LedPainter`] logs a
//! failed write and moves on, it never retries or waits for the driver.
//!
//! ```text
//! practice engine → LedPainter → LedSink ─┬→ ChannelLedSink → flume → driver thread
//!                                         └→ MemoryLedSink (tests, previews)
//! ```

use crate::color::Rgb;
use crate::error::SinkError;
use flume::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Pixel output consumed by the practice engine
pub trait LedSink: Send + Sync {
    /// Stage a pixel color (not visible until [`present`](Self::present))
    fn set_pixel(&self, position: usize, color: Rgb) -> Result<(), SinkError>;

    /// Flush staged pixels to the strip
    fn present(&self) -> Result<(), SinkError>;

    /// Number of addressable pixels
    fn led_count(&self) -> usize;
}

/// Note → strip position mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyMapping {
    /// Note lit by the first LED (21 = A0)
    pub first_note: u8,
    /// LEDs between adjacent keys
    pub leds_per_key: u8,
    pub led_count: usize,
    /// Strip mounted right-to-left
    pub reverse: bool,
}

impl Default for KeyMapping {
    fn default() -> Self {
        Self {
            first_note: 21,
            leds_per_key: 2,
            led_count: 176,
            reverse: false,
        }
    }
}

impl KeyMapping {
    /// Strip position for `note`, or `None` if the note is off the strip
    pub fn position(&self, note: u8) -> Option<usize> {
        let offset = note.checked_sub(self.first_note)? as usize;
        let position = offset * self.leds_per_key.max(1) as usize;
        if position >= self.led_count {
            return None;
        }
        if self.reverse {
            Some(self.led_count - 1 - position)
        } else {
            Some(position)
        }
    }
}

/// Writes colors for notes, logging and skipping failed deliveries
#[derive(Clone)]
pub struct LedPainter {
    sink: Arc<dyn LedSink>,
    mapping: KeyMapping,
}

impl LedPainter {
    pub fn new(sink: Arc<dyn LedSink>, mapping: KeyMapping) -> Self {
        Self { sink, mapping }
    }

    pub fn mapping(&self) -> &KeyMapping {
        &self.mapping
    }

    /// Color the key for `note`; returns the strip position if the note is mapped
    pub fn paint_note(&self, note: u8, color: Rgb) -> Option<usize> {
        let Some(position) = self.mapping.position(note) else {
            log::trace!("[LED] Note {} is off the strip, skipping", note);
            return None;
        };
        self.paint_position(position, color);
        Some(position)
    }

    pub fn paint_position(&self, position: usize, color: Rgb) {
        if let Err(e) = self.sink.set_pixel(position, color) {
            log::warn!("[LED] Failed to set pixel {}: {}", position, e);
        }
    }

    pub fn present(&self) {
        if let Err(e) = self.sink.present() {
            log::warn!("[LED] Failed to present: {}", e);
        }
    }

    /// Turn off every pixel and present
    pub fn clear_all(&self) {
        for position in 0..self.sink.led_count() {
            self.paint_position(position, Rgb::OFF);
        }
        self.present();
    }
}

/// Command for an LED driver thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedCommand {
    SetPixel { position: usize, color: Rgb },
    Present,
}

/// LED sink that forwards commands to a driver thread over a bounded channel
///
/// Never blocks: a full channel drops the command and reports
/// [`SinkError::LedUnavailable`].
#[derive(Debug, Clone)]
pub struct ChannelLedSink {
    tx: Sender<LedCommand>,
    led_count: usize,
}

impl ChannelLedSink {
    /// Create the sink and the receiver the driver thread drains
    pub fn new(led_count: usize, capacity: usize) -> (Self, Receiver<LedCommand>) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        (Self { tx, led_count }, rx)
    }

    fn push(&self, command: LedCommand) -> Result<(), SinkError> {
        self.tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::LedUnavailable("command queue full".into()),
            TrySendError::Disconnected(_) => {
                SinkError::LedUnavailable("driver thread has exited".into())
            }
        })
    }
}

impl LedSink for ChannelLedSink {
    fn set_pixel(&self, position: usize, color: Rgb) -> Result<(), SinkError> {
        if position >= self.led_count {
            return Err(SinkError::PositionOutOfRange {
                position,
                led_count: self.led_count,
            });
        }
        self.push(LedCommand::SetPixel { position, color })
    }

    fn present(&self) -> Result<(), SinkError> {
        self.push(LedCommand::Present)
    }

    fn led_count(&self) -> usize {
        self.led_count
    }
}

/// In-memory strip with a staged and a presented frame
pub struct MemoryLedSink {
    state: Mutex<MemoryStrip>,
}

struct MemoryStrip {
    staged: Vec<Rgb>,
    shown: Vec<Rgb>,
    presents: usize,
}

impl MemoryLedSink {
    pub fn new(led_count: usize) -> Self {
        Self {
            state: Mutex::new(MemoryStrip {
                staged: vec![Rgb::OFF; led_count],
                shown: vec![Rgb::OFF; led_count],
                presents: 0,
            }),
        }
    }

    /// Pixels as of the last present
    pub fn shown(&self) -> Vec<Rgb> {
        self.state
            .lock()
            .map(|s| s.shown.clone())
            .unwrap_or_default()
    }

    /// Presented color at `position`
    pub fn pixel(&self, position: usize) -> Rgb {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.shown.get(position).copied())
            .unwrap_or(Rgb::OFF)
    }

    pub fn present_count(&self) -> usize {
        self.state.lock().map(|s| s.presents).unwrap_or(0)
    }
}

impl LedSink for MemoryLedSink {
    fn set_pixel(&self, position: usize, color: Rgb) -> Result<(), SinkError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| SinkError::LedUnavailable("strip lock poisoned".into()))?;
        let led_count = state.staged.len();
        let pixel = state
            .staged
            .get_mut(position)
            .ok_or(SinkError::PositionOutOfRange {
                position,
                led_count,
            })?;
        *pixel = color;
        Ok(())
    }

    fn present(&self) -> Result<(), SinkError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| SinkError::LedUnavailable("strip lock poisoned".into()))?;
        state.shown = state.staged.clone();
        state.presents += 1;
        Ok(())
    }

    fn led_count(&self) -> usize {
        self.state.lock().map(|s| s.staged.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        let mapping = KeyMapping::default();
        assert_eq!(mapping.position(21), Some(0));
        assert_eq!(mapping.position(60), Some(78));
        assert_eq!(mapping.position(108), Some(174));
        assert_eq!(mapping.position(20), None);
        assert_eq!(mapping.position(109), None);

        let reversed = KeyMapping {
            reverse: true,
            ..KeyMapping::default()
        };
        assert_eq!(reversed.position(21), Some(175));
        assert_eq!(reversed.position(108), Some(1));
    }

    #[test]
    fn test_painter_skips_unmapped_and_presents() {
        let sink = Arc::new(MemoryLedSink::new(176));
        let painter = LedPainter::new(sink.clone(), KeyMapping::default());

        assert_eq!(painter.paint_note(10, Rgb::WRONG), None);
        assert_eq!(painter.paint_note(21, Rgb::WRONG), Some(0));
        assert_eq!(sink.pixel(0), Rgb::OFF);
        painter.present();
        assert_eq!(sink.pixel(0), Rgb::WRONG);

        painter.clear_all();
        assert!(sink.shown().iter().all(|c| c.is_off()));
        assert_eq!(sink.present_count(), 2);
    }

    #[test]
    fn test_painter_survives_sink_errors() {
        // Mapping wider than the strip: writes past the end fail and are skipped
        let sink = Arc::new(MemoryLedSink::new(4));
        let painter = LedPainter::new(sink.clone(), KeyMapping::default());
        assert_eq!(painter.paint_note(60, Rgb::WRONG), Some(78));
        painter.present();
        assert!(sink.shown().iter().all(|c| c.is_off()));
    }

    #[test]
    fn test_channel_sink() {
        let (sink, rx) = ChannelLedSink::new(8, 2);
        sink.set_pixel(3, Rgb::WRONG).unwrap();
        sink.present().unwrap();
        assert!(matches!(
            sink.present(),
            Err(SinkError::LedUnavailable(_))
        ));
        assert_eq!(
            sink.set_pixel(8, Rgb::OFF),
            Err(SinkError::PositionOutOfRange {
                position: 8,
                led_count: 8
            })
        );

        let commands: Vec<LedCommand> = rx.drain().collect();
        assert_eq!(
            commands,
            vec![
                LedCommand::SetPixel {
                    position: 3,
                    color: Rgb::WRONG
                },
                LedCommand::Present
            ]
        );

        drop(rx);
        assert!(matches!(
            sink.present(),
            Err(SinkError::LedUnavailable(_))
        ));
    }
}
