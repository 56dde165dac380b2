use thiserror::Error;

use crate::events::Action;

pub type Result<T> = std::result::Result<T, SeqError>;

#[derive(Debug, Error)]
pub enum SeqError {
    #[error("'{action}' event has no '{name}' attribute")]
    UnknownParameter { action: Action, name: String },

    #[error("'{action}' takes {expected} parameters, got {got}")]
    Arity {
        action: Action,
        expected: usize,
        got: usize,
    },

    #[error("part '{part}': no note-off paired with note {pitch} at {position}")]
    PairingNotFound {
        part: String,
        pitch: u8,
        position: f64,
    },

    #[error("MIDI sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("part '{part}': failed to fire {event}")]
    Dispatch {
        part: String,
        event: String,
        #[source]
        source: Box<SeqError>,
    },

    #[error("no part with index {0}")]
    UnknownPart(usize),

    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse session config: {0}")]
    Config(#[from] ron::error::SpannedError),

    #[error("failed to write session config: {0}")]
    RonWrite(#[from] ron::Error),

    #[error(transparent)]
    MidiInit(#[from] midir::InitError),

    #[error("no MIDI output port available")]
    MidiPort,

    #[error("failed to connect MIDI output: {0}")]
    MidiConnect(String),
}

impl From<midir::SendError> for SeqError {
    fn from(err: midir::SendError) -> Self {
        SeqError::SinkUnavailable(err.to_string())
    }
}
