pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod midi;
pub mod timing;

pub use config::{PartConfig, SessionConfig};
pub use engine::{EngineCommand, EngineHandle, EngineUpdate, UPDATE_CAPACITY, spawn_engine};
pub use error::{Result, SeqError};
pub use events::{Action, EventId, TimedEvent};
pub use midi::{MidiOut, MidiSink};
pub use timing::{
    AdvanceStats, ClockState, ControlDescriptor, NoteDescriptor, Part, RemovedNote, Sequencer,
    SequencerClock,
};
