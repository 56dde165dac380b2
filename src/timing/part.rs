use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{Result, SeqError};
use crate::events::{Action, EventId, TimedEvent};
use crate::midi::{self, MidiSink};

const POSITION_EPSILON: f64 = 1e-9;

/// A note as handed over by an editing surface, in steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteDescriptor {
    pub pitch: u8,
    pub velocity: u8,
    pub position: f64,
    pub length: f64,
}

impl NoteDescriptor {
    pub fn new(pitch: u8, velocity: u8, position: f64, length: f64) -> Self {
        Self {
            pitch,
            velocity,
            position,
            length,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlDescriptor {
    pub controller: u8,
    pub value: u8,
    pub position: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemovedNote {
    pub note_on: TimedEvent,
    pub note_off: Option<TimedEvent>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvanceStats {
    pub fired: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
struct Due {
    offset: f64,
    rank: u8,
    id: EventId,
}

/// One instrument's pattern, looping every `length` steps.
///
/// `events` is kept sorted by timestamp after every mutation. Note-offs that
/// are scheduled but not yet reached wait in `pending` and move into `events`
/// when they fire. Each note-on keeps a non-owning reference to the note-off
/// that releases it, so removing a note takes its release along without any
/// index bookkeeping. A note removed while it sounds leaves its release
/// behind as an orphan that fires once and is then dropped.
#[derive(Debug, Clone)]
pub struct Part {
    pub name: String,
    channel: u8,
    length: u32,
    events: Vec<TimedEvent>,
    pending: Vec<TimedEvent>,
    releases: HashMap<EventId, EventId>,
    sounding: HashSet<EventId>,
    orphans: HashSet<EventId>,
    cursor: Option<f64>,
}

impl Part {
    pub fn new(name: impl Into<String>, channel: u8, length: u32) -> Self {
        assert!(length > 0, "Part length must be at least 1 step");

        Self {
            name: name.into(),
            channel,
            length,
            events: Vec::new(),
            pending: Vec::new(),
            releases: HashMap::new(),
            sounding: HashSet::new(),
            orphans: HashSet::new(),
            cursor: None,
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn set_channel(&mut self, channel: u8) {
        self.channel = channel;
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn pending(&self) -> &[TimedEvent] {
        &self.pending
    }

    pub fn events_of(&self, action: Action) -> impl Iterator<Item = &TimedEvent> {
        self.events.iter().filter(move |e| e.action() == action)
    }

    /// The note-off currently paired with `note_on`, pending or materialized.
    pub fn release_of(&self, note_on: EventId) -> Option<&TimedEvent> {
        let release = *self.releases.get(&note_on)?;
        self.find(release)
    }

    pub fn find(&self, id: EventId) -> Option<&TimedEvent> {
        self.events
            .iter()
            .chain(&self.pending)
            .find(|e| e.id() == id)
    }

    /// Step under the playhead, for rendering.
    pub fn current_step(&self, running_time: f64) -> usize {
        running_time.rem_euclid(self.length as f64).floor() as usize
    }

    /// Inserts `event` into `events`. A note-on added this way gets its
    /// release the first time it fires.
    pub fn append(&mut self, event: TimedEvent) -> EventId {
        let id = event.id();
        insert_sorted(&mut self.events, event);
        id
    }

    /// Adds a note-on per descriptor and queues its note-off. Positions are
    /// folded onto the loop. A pending note-off of the same pitch left by an
    /// earlier note is dropped, the new note's release replaces it.
    pub fn append_notes(&mut self, notes: &[NoteDescriptor]) -> Vec<EventId> {
        let len = self.length as f64;
        notes
            .iter()
            .map(|n| {
                let position = n.position.rem_euclid(len);
                let note_on = TimedEvent::note_on(position, n.pitch, n.velocity, n.length);
                let id = self.append(note_on);
                self.follow_up(id, TimedEvent::note_off(position + n.length, n.pitch));
                id
            })
            .collect()
    }

    pub fn append_controls(&mut self, controls: &[ControlDescriptor]) -> Vec<EventId> {
        let len = self.length as f64;
        controls
            .iter()
            .map(|c| {
                let position = c.position.rem_euclid(len);
                self.append(TimedEvent::control_change(position, c.controller, c.value))
            })
            .collect()
    }

    /// Queues `event` in `pending` as is. Unlike `append_notes` nothing of the
    /// same pitch is replaced.
    pub fn append_future(&mut self, event: TimedEvent) {
        insert_sorted(&mut self.pending, event);
    }

    /// Removes the note-on for `pitch` at `position` together with its
    /// note-off. Returns `None` when no such note-on exists.
    ///
    /// If the note is sounding, its note-off stays queued until it fires and
    /// the returned `note_off` is a copy of it.
    pub fn remove_note(&mut self, pitch: u8, position: f64) -> Option<RemovedNote> {
        let len = self.length as f64;
        let target = position.rem_euclid(len);
        let id = self
            .events
            .iter()
            .find(|e| {
                e.action() == Action::NoteOn
                    && e.note() == Some(pitch)
                    && (e.timestamp.rem_euclid(len) - target).abs() < POSITION_EPSILON
            })?
            .id();

        let removed = self.remove_pair(id)?;
        if removed.note_off.is_none() {
            let err = SeqError::PairingNotFound {
                part: self.name.clone(),
                pitch,
                position,
            };
            warn!("{err}, removed the note-on only");
        }
        Some(removed)
    }

    /// Deletes a single event by identity. Deleting a note-on deletes its
    /// release as well.
    pub fn delete(&mut self, id: EventId) -> Option<TimedEvent> {
        let action = self.find(id)?.action();
        match action {
            Action::NoteOn => self.remove_pair(id).map(|removed| removed.note_on),
            Action::NoteOff | Action::ControlChange => self.take(id),
        }
    }

    /// Applies `f` to the event with `id` and restores timestamp order.
    /// Returns `Ok(false)` when the event does not exist.
    pub fn edit<F>(&mut self, id: EventId, f: F) -> Result<bool>
    where
        F: FnOnce(&mut TimedEvent) -> Result<()>,
    {
        let Some(event) = self
            .events
            .iter_mut()
            .chain(self.pending.iter_mut())
            .find(|e| e.id() == id)
        else {
            return Ok(false);
        };

        let result = f(event);
        self.resort();
        result.map(|()| true)
    }

    /// Shifts every note event, pending releases included, by `semitones`.
    /// Orphaned releases keep their pitch so they still stop what sounds.
    pub fn transpose(&mut self, semitones: i32) -> Result<()> {
        for event in self.events.iter_mut().chain(self.pending.iter_mut()) {
            if event.action() == Action::ControlChange || self.orphans.contains(&event.id()) {
                continue;
            }
            let note = event.get("note")?;
            event.set("note", (note + semitones as f64).clamp(0.0, 127.0))?;
        }
        Ok(())
    }

    pub fn resort(&mut self) {
        self.events.sort_by(TimedEvent::compare);
        self.pending.sort_by(TimedEvent::compare);
    }

    /// Fires everything due between the previous call and `current_time`.
    ///
    /// Times are absolute running time and are folded onto the loop, so an
    /// event at step 2 is due on every pass. Pending events that fire move
    /// into `events`. A failing event is logged and skipped; the rest of the
    /// tick still runs.
    pub fn advance(&mut self, current_time: f64, sink: &mut dyn MidiSink) -> AdvanceStats {
        let mut stats = AdvanceStats::default();
        let len = self.length as f64;
        let (mut from, mut inclusive) = match self.cursor {
            Some(t) => (t, false),
            None => (0.0, true),
        };

        if current_time < from || (current_time == from && !inclusive) {
            return stats;
        }
        if current_time - from > len {
            warn!(
                part = %self.name,
                span = current_time - from,
                "tick spans more than one loop, skipping ahead"
            );
            from = current_time - len;
            inclusive = false;
        }
        let span = current_time - from;

        let mut queue: Vec<Due> = self
            .events
            .iter()
            .chain(&self.pending)
            .filter_map(|e| {
                let offset = self.offset(e.timestamp, from, inclusive);
                (offset <= span).then(|| Due {
                    offset,
                    rank: e.action().rank(),
                    id: e.id(),
                })
            })
            .collect();
        queue.sort_by(|a, b| a.offset.total_cmp(&b.offset).then(a.rank.cmp(&b.rank)));

        let mut next = 0;
        while let Some(due) = queue.get(next).copied() {
            next += 1;

            // Gone if an earlier note-on in this tick replaced it.
            let Some(event) = self.materialize(due.id) else {
                continue;
            };

            if let Err(source) = event.fire(self, sink) {
                stats.failed += 1;
                let cause = source.to_string();
                let err = SeqError::Dispatch {
                    part: self.name.clone(),
                    event: event.to_string(),
                    source: Box::new(source),
                };
                error!(%cause, "{err}, skipping");
                continue;
            }
            stats.fired += 1;
            debug!(part = %self.name, %event, "fired");
            self.track_sounding(&event);

            if let Some(release) = self.due_release(&event, due.offset, span) {
                let pos = next
                    + queue[next..]
                        .partition_point(|q| (q.offset, q.rank) <= (release.offset, release.rank));
                queue.insert(pos, release);
            }
        }

        self.cursor = Some(current_time);
        stats
    }

    /// Sends "all notes off" on this part's channel.
    pub fn silence(&self, sink: &mut dyn MidiSink) -> Result<()> {
        debug!(part = %self.name, channel = self.channel, "all notes off");
        sink.send_short(midi::status(midi::CC, self.channel), midi::ALL_NOTES_OFF, 0)
    }

    /// Forgets the playback position; the next `advance` starts at time zero.
    pub fn rewind(&mut self) {
        self.cursor = None;
    }

    /// Treats everything up to `time` as already played.
    pub fn seek(&mut self, time: f64) {
        self.cursor = Some(time);
    }

    /// Replaces the release of `note_on` with `release`, dropping any other
    /// pending note-off of the same pitch.
    pub(crate) fn follow_up(&mut self, note_on: EventId, mut release: TimedEvent) {
        let note = release.note();
        let stale: Vec<EventId> = self
            .pending
            .iter()
            .filter(|e| {
                e.action() == Action::NoteOff && e.note() == note && !self.orphans.contains(&e.id())
            })
            .map(|e| e.id())
            .collect();

        if let Some(previous) = self.releases.remove(&note_on) {
            self.take(previous);
        }
        for id in stale {
            self.take(id);
        }

        release.timestamp = release.timestamp.rem_euclid(self.length as f64);
        self.releases.insert(note_on, release.id());
        self.append_future(release);
    }

    fn offset(&self, timestamp: f64, from: f64, inclusive: bool) -> f64 {
        let len = self.length as f64;
        let offset = (timestamp - from).rem_euclid(len);
        // rem_euclid may round up to `len` for values just below zero
        let offset = if offset >= len { 0.0 } else { offset };
        if offset == 0.0 && !inclusive {
            len
        } else {
            offset
        }
    }

    fn due_release(&self, event: &TimedEvent, offset: f64, span: f64) -> Option<Due> {
        if event.action() != Action::NoteOn {
            return None;
        }
        let length = event.get("length").ok()?;
        let id = *self.releases.get(&event.id())?;
        let offset = offset + length.max(0.0);

        (offset <= span).then_some(Due {
            offset,
            rank: Action::NoteOff.rank(),
            id,
        })
    }

    fn materialize(&mut self, id: EventId) -> Option<TimedEvent> {
        if let Some(idx) = self.pending.iter().position(|e| e.id() == id) {
            let event = self.pending.remove(idx);
            if !self.orphans.remove(&id) {
                insert_sorted(&mut self.events, event.clone());
            }
            return Some(event);
        }
        self.events.iter().find(|e| e.id() == id).cloned()
    }

    fn track_sounding(&mut self, event: &TimedEvent) {
        match event.action() {
            Action::NoteOn => {
                self.sounding.insert(event.id());
            }
            Action::NoteOff => {
                let note = event.note();
                let events = &self.events;
                self.sounding.retain(|id| {
                    events
                        .iter()
                        .find(|e| e.id() == *id)
                        .is_some_and(|e| e.note() != note)
                });
            }
            Action::ControlChange => {}
        }
    }

    fn remove_pair(&mut self, note_on: EventId) -> Option<RemovedNote> {
        let sounding = self.sounding.contains(&note_on);
        let release = self.releases.remove(&note_on);
        let note_on = self.take(note_on)?;
        let note_off = match release {
            // Still owed to the synth; let it fire once on its own.
            Some(id) if sounding && self.pending.iter().any(|e| e.id() == id) => {
                self.orphans.insert(id);
                debug!(part = %self.name, %note_on, "removed while sounding, release kept");
                self.find(id).cloned()
            }
            Some(id) => self.take(id),
            None => None,
        };

        if note_off.is_some() {
            if let Some(pitch) = note_on.note() {
                self.rearm(pitch);
            }
        }

        Some(RemovedNote { note_on, note_off })
    }

    /// Gives a release back to the latest note-on of `pitch` when the one
    /// that superseded it was removed.
    fn rearm(&mut self, pitch: u8) {
        let note_ons = || {
            self.events
                .iter()
                .filter(move |e| e.action() == Action::NoteOn && e.note() == Some(pitch))
        };
        if note_ons().any(|e| self.releases.contains_key(&e.id())) {
            return;
        }
        let Some(latest) = note_ons().last() else {
            return;
        };

        let (id, timestamp) = (latest.id(), latest.timestamp);
        let length = latest.get("length").unwrap_or_default();
        self.follow_up(id, TimedEvent::note_off(timestamp + length, pitch));
    }

    /// Unlinks and removes an event from wherever it lives.
    fn take(&mut self, id: EventId) -> Option<TimedEvent> {
        let event = if let Some(idx) = self.events.iter().position(|e| e.id() == id) {
            self.events.remove(idx)
        } else {
            let idx = self.pending.iter().position(|e| e.id() == id)?;
            self.pending.remove(idx)
        };

        self.releases.remove(&id);
        self.releases.retain(|_, release| *release != id);
        self.sounding.remove(&id);
        self.orphans.remove(&id);
        Some(event)
    }
}

fn insert_sorted(events: &mut Vec<TimedEvent>, event: TimedEvent) {
    let idx = events.partition_point(|e| e.compare(&event) != Ordering::Greater);
    events.insert(idx, event);
}
