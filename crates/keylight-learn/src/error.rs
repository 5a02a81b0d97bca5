//! Error types for the practice engine and renderer

use keylight_midi::InputError;

/// Errors surfaced by the practice engine, renderer and settings layer
#[derive(Debug, thiserror::Error)]
pub enum LearnError {
    /// Bad tempo/resolution or an empty song; fatal to session start, not retried
    #[error("Malformed timeline: {0}")]
    MalformedTimeline(String),

    /// An input event that could not be classified; dropped by the engine
    #[error("Input classification failed: {0}")]
    InputClassification(#[from] InputError),

    /// LED, playback or broadcast delivery failed; logged and skipped
    #[error("Sink delivery failed: {0}")]
    SinkDelivery(#[from] SinkError),

    /// The run was cancelled (stop or restart); expected control flow
    #[error("Practice loop cancelled")]
    LoopCancelled,

    #[error("No timeline loaded")]
    NoTimeline,

    #[error("Operation not allowed in state {0:?}")]
    InvalidState(crate::practice::EngineState),

    #[error("Flying notes are disabled in settings")]
    RendererDisabled,

    #[error("Settings error: {0}")]
    Settings(#[from] anyhow::Error),
}

/// A single failed delivery to an output sink
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("LED position {position} outside strip of {led_count} LEDs")]
    PositionOutOfRange { position: usize, led_count: usize },

    #[error("LED driver unavailable: {0}")]
    LedUnavailable(String),

    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("Broadcast failed: {0}")]
    Broadcast(String),
}

impl From<keylight_midi::PlaybackError> for SinkError {
    fn from(e: keylight_midi::PlaybackError) -> Self {
        SinkError::Playback(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LearnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_keep_category() {
        let e: LearnError = InputError::Unparseable("F0 7E".into()).into();
        assert!(matches!(e, LearnError::InputClassification(_)));

        let e: LearnError = SinkError::Broadcast("closed".into()).into();
        assert!(matches!(e, LearnError::SinkDelivery(SinkError::Broadcast(_))));
        assert_eq!(e.to_string(), "Sink delivery failed: Broadcast failed: closed");
    }
}
