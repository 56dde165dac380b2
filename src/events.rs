use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SeqError};
use crate::midi::{self, MidiSink};
use crate::timing::Part;

/// Stable identity of an event, unique for the lifetime of the process.
pub type EventId = u64;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_event_id() -> EventId {
    NEXT_EVENT_ID.fetch_add(1, AtomicOrdering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    NoteOn,
    NoteOff,
    ControlChange,
}

impl Action {
    /// Ordered parameter names for this action.
    pub const fn schema(self) -> &'static [&'static str] {
        match self {
            Action::NoteOn => &["note", "velocity", "length"],
            Action::NoteOff => &["note"],
            Action::ControlChange => &["controller", "value"],
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Action::NoteOn => "note_on",
            Action::NoteOff => "note_off",
            Action::ControlChange => "control_change",
        }
    }

    fn position_of(self, name: &str) -> Option<usize> {
        self.schema().iter().position(|n| *n == name)
    }

    /// Firing order among events due at the same instant: releases first so a
    /// note ending exactly where its retrigger starts does not cut the new note.
    pub(crate) const fn rank(self) -> u8 {
        match self {
            Action::NoteOff => 0,
            Action::ControlChange => 1,
            Action::NoteOn => 2,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A musical action scheduled at a position (in steps) on a part's loop.
///
/// The action kind is fixed at construction. Parameters are addressed by
/// name through [`Action::schema`] and may be changed in place.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    id: EventId,
    pub timestamp: f64,
    action: Action,
    params: Vec<f64>,
}

impl TimedEvent {
    pub fn new(timestamp: f64, action: Action, params: Vec<f64>) -> Result<Self> {
        let expected = action.schema().len();
        if params.len() != expected {
            return Err(SeqError::Arity {
                action,
                expected,
                got: params.len(),
            });
        }

        Ok(Self {
            id: next_event_id(),
            timestamp,
            action,
            params,
        })
    }

    pub fn note_on(timestamp: f64, note: u8, velocity: u8, length: f64) -> Self {
        Self {
            id: next_event_id(),
            timestamp,
            action: Action::NoteOn,
            params: vec![note as f64, velocity as f64, length],
        }
    }

    pub fn note_off(timestamp: f64, note: u8) -> Self {
        Self {
            id: next_event_id(),
            timestamp,
            action: Action::NoteOff,
            params: vec![note as f64],
        }
    }

    pub fn control_change(timestamp: f64, controller: u8, value: u8) -> Self {
        Self {
            id: next_event_id(),
            timestamp,
            action: Action::ControlChange,
            params: vec![controller as f64, value as f64],
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Result<f64> {
        let idx = self.param_index(name)?;
        Ok(self.params[idx])
    }

    pub fn set(&mut self, name: &str, value: f64) -> Result<()> {
        let idx = self.param_index(name)?;
        self.params[idx] = value;
        Ok(())
    }

    /// Pitch of a note event, `None` for control changes.
    pub fn note(&self) -> Option<u8> {
        match self.action {
            Action::NoteOn | Action::NoteOff => Some(midi::data_byte(self.params[0])),
            Action::ControlChange => None,
        }
    }

    /// Total order by timestamp.
    pub fn compare(&self, other: &Self) -> Ordering {
        self.timestamp.total_cmp(&other.timestamp)
    }

    /// Runs the action against `part`'s channel on `sink`.
    ///
    /// A `note_on` also schedules its matching `note_off` on `part`, replacing
    /// any pending release of the same pitch.
    pub fn fire(&self, part: &mut Part, sink: &mut dyn MidiSink) -> Result<()> {
        match self.action {
            Action::NoteOn => note_on(
                self,
                part,
                sink,
                self.get("note")?,
                self.get("velocity")?,
                self.get("length")?,
            ),
            Action::NoteOff => note_off(part, sink, self.get("note")?),
            Action::ControlChange => {
                control_change(part, sink, self.get("controller")?, self.get("value")?)
            }
        }
    }

    fn param_index(&self, name: &str) -> Result<usize> {
        self.action
            .position_of(name)
            .ok_or_else(|| SeqError::UnknownParameter {
                action: self.action,
                name: name.to_string(),
            })
    }
}

impl fmt::Display for TimedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} {:?}", self.action, self.timestamp, self.params)
    }
}

fn note_on(
    event: &TimedEvent,
    part: &mut Part,
    sink: &mut dyn MidiSink,
    note: f64,
    velocity: f64,
    length: f64,
) -> Result<()> {
    let note = midi::data_byte(note);
    sink.send_short(
        midi::status(midi::NOTE_ON, part.channel()),
        note,
        midi::data_byte(velocity),
    )?;
    part.follow_up(
        event.id,
        TimedEvent::note_off(event.timestamp + length, note),
    );
    Ok(())
}

fn note_off(part: &Part, sink: &mut dyn MidiSink, note: f64) -> Result<()> {
    sink.send_short(
        midi::status(midi::NOTE_ON, part.channel()),
        midi::data_byte(note),
        0,
    )
}

fn control_change(part: &Part, sink: &mut dyn MidiSink, controller: f64, value: f64) -> Result<()> {
    sink.send_short(
        midi::status(midi::CC, part.channel()),
        midi::data_byte(controller),
        midi::data_byte(value),
    )
}
