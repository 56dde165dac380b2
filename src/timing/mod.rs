mod clock;
mod part;
mod sequencer;

pub use clock::{ClockState, SequencerClock};
pub use part::{AdvanceStats, ControlDescriptor, NoteDescriptor, Part, RemovedNote};
pub use sequencer::Sequencer;
