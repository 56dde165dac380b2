use std::collections::HashSet;

use tracing::{debug, error, info};

use super::{Part, SequencerClock};
use crate::config::SessionConfig;
use crate::error::{Result, SeqError};
use crate::midi::MidiSink;

/// Owns the clock, the parts and the MIDI sink, and drives playback one tick
/// at a time.
pub struct Sequencer<S> {
    clock: SequencerClock,
    parts: Vec<Part>,
    sink: S,
}

impl<S: MidiSink> Sequencer<S> {
    pub fn new(sink: S) -> Self {
        Self {
            clock: SequencerClock::new(),
            parts: Vec::new(),
            sink,
        }
    }

    /// Builds one part per configured part, after validating `config`.
    pub fn from_config(config: &SessionConfig, sink: S) -> Result<Self> {
        config.validate()?;

        let mut sequencer = Self::new(sink);
        for part in &config.parts {
            sequencer.add_part(Part::new(part.name.clone(), part.channel, part.length));
        }
        Ok(sequencer)
    }

    /// Adds a part and returns its index. A part added mid-song starts at the
    /// current position instead of replaying the loop up to it.
    pub fn add_part(&mut self, mut part: Part) -> usize {
        let now = self.clock.running_time();
        if now > 0.0 {
            part.seek(now);
        }
        debug!(part = %part.name, channel = part.channel(), length = part.length(), "added part");
        self.parts.push(part);
        self.parts.len() - 1
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn part(&self, index: usize) -> Result<&Part> {
        self.parts.get(index).ok_or(SeqError::UnknownPart(index))
    }

    pub fn part_mut(&mut self, index: usize) -> Result<&mut Part> {
        self.parts.get_mut(index).ok_or(SeqError::UnknownPart(index))
    }

    pub fn clock(&self) -> &SequencerClock {
        &self.clock
    }

    pub fn running_time(&self) -> f64 {
        self.clock.running_time()
    }

    pub fn is_running(&self) -> bool {
        self.clock.is_running()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn play(&mut self) {
        if self.clock.start() {
            info!(at = self.clock.running_time(), "playback started");
        }
    }

    pub fn pause(&mut self) {
        if self.clock.pause() {
            info!(at = self.clock.running_time(), "playback paused");
            self.silence_all();
        }
    }

    pub fn stop(&mut self) {
        if self.clock.stop() {
            info!("playback stopped");
            self.silence_all();
        }
        for part in &mut self.parts {
            part.rewind();
        }
    }

    /// Advances the clock by `elapsed` steps and fires whatever came due.
    /// Returns `true` when playback crossed into a new step.
    pub fn tick(&mut self, elapsed: f64) -> bool {
        let before = self.clock.running_time();
        let Some(now) = self.clock.advance(elapsed) else {
            return false;
        };

        for part in &mut self.parts {
            part.advance(now, &mut self.sink);
        }

        now.floor() > before.floor()
    }

    fn silence_all(&mut self) {
        let mut silenced = HashSet::new();
        for part in &self.parts {
            if !silenced.insert(part.channel()) {
                continue;
            }
            if let Err(err) = part.silence(&mut self.sink) {
                error!(part = %part.name, %err, "failed to silence channel");
            }
        }
    }
}
