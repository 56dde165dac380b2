use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::error::Result;
use crate::midi::MidiSink;
use crate::timing::{ControlDescriptor, NoteDescriptor, Sequencer};

#[derive(Debug, Clone)]
pub enum EngineCommand {
    Play,
    Pause,
    Stop,
    AppendNotes {
        part: usize,
        notes: Vec<NoteDescriptor>,
    },
    AppendControls {
        part: usize,
        controls: Vec<ControlDescriptor>,
    },
    RemoveNote {
        part: usize,
        pitch: u8,
        position: f64,
    },
    Transpose {
        part: usize,
        semitones: i32,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineUpdate {
    PlaybackState { playing: bool },
    Step { part: usize, step: usize },
    NoteRemoved { part: usize, paired: bool },
    Error { message: String },
}

/// Updates the engine can queue before it starts dropping them.
pub const UPDATE_CAPACITY: usize = 1024;

pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    /// Bounded at `UPDATE_CAPACITY`. Updates that do not fit are dropped, so
    /// drain it to see every step.
    pub update_rx: Receiver<EngineUpdate>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Asks the engine to stop and waits for its thread to exit.
    pub fn shutdown(mut self) {
        let _ = self.command_tx.send(EngineCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("engine thread panicked");
            }
        }
    }
}

/// Starts the playback thread. The thread owns the sequencer; everything
/// else talks to it through the returned handle. Fails without spawning when
/// `config` does not validate.
pub fn spawn_engine<S>(config: SessionConfig, sink: S) -> Result<EngineHandle>
where
    S: MidiSink + Send + 'static,
{
    let sequencer = Sequencer::from_config(&config, sink)?;
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::bounded(UPDATE_CAPACITY);

    let thread = std::thread::spawn(move || {
        engine_thread(sequencer, &config, command_rx, update_tx);
    });

    Ok(EngineHandle {
        command_tx,
        update_rx,
        thread: Some(thread),
    })
}

/// Queues `update` without ever blocking the playback thread.
fn notify(update_tx: &Sender<EngineUpdate>, update: EngineUpdate) {
    if let Err(TrySendError::Full(update)) = update_tx.try_send(update) {
        trace!(?update, "update queue full, dropping");
    }
}

fn engine_thread<S: MidiSink>(
    mut sequencer: Sequencer<S>,
    config: &SessionConfig,
    command_rx: Receiver<EngineCommand>,
    update_tx: Sender<EngineUpdate>,
) {
    let steps_per_second = config.steps_per_second();
    let tick_interval = Duration::from_secs_f64(1.0 / config.tick_rate_hz.max(1) as f64);
    let mut last_tick = Instant::now();

    info!(
        session = %config.name,
        parts = sequencer.parts().len(),
        steps_per_second,
        "engine running"
    );

    loop {
        match command_rx.recv_timeout(tick_interval) {
            Ok(EngineCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(command) => {
                if matches!(command, EngineCommand::Play) && !sequencer.is_running() {
                    last_tick = Instant::now();
                }
                handle_command(&mut sequencer, command, &update_tx);
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        if sequencer.is_running() {
            let now = Instant::now();
            let elapsed = now.duration_since(last_tick).as_secs_f64() * steps_per_second;
            last_tick = now;

            if sequencer.tick(elapsed) {
                let running_time = sequencer.running_time();
                for (part, p) in sequencer.parts().iter().enumerate() {
                    notify(
                        &update_tx,
                        EngineUpdate::Step {
                            part,
                            step: p.current_step(running_time),
                        },
                    );
                }
            }
        }
    }

    sequencer.stop();
    info!("engine stopped");
}

fn handle_command<S: MidiSink>(
    sequencer: &mut Sequencer<S>,
    command: EngineCommand,
    update_tx: &Sender<EngineUpdate>,
) {
    debug!(?command, "engine command");

    let result = match command {
        EngineCommand::Play => {
            sequencer.play();
            notify(update_tx, EngineUpdate::PlaybackState { playing: true });
            Ok(())
        }
        EngineCommand::Pause => {
            sequencer.pause();
            notify(update_tx, EngineUpdate::PlaybackState { playing: false });
            Ok(())
        }
        EngineCommand::Stop => {
            sequencer.stop();
            notify(update_tx, EngineUpdate::PlaybackState { playing: false });
            Ok(())
        }
        EngineCommand::AppendNotes { part, notes } => sequencer.part_mut(part).map(|p| {
            p.append_notes(&notes);
        }),
        EngineCommand::AppendControls { part, controls } => sequencer.part_mut(part).map(|p| {
            p.append_controls(&controls);
        }),
        EngineCommand::RemoveNote {
            part,
            pitch,
            position,
        } => sequencer.part_mut(part).map(|p| {
            if let Some(removed) = p.remove_note(pitch, position) {
                notify(
                    update_tx,
                    EngineUpdate::NoteRemoved {
                        part,
                        paired: removed.note_off.is_some(),
                    },
                );
            }
        }),
        EngineCommand::Transpose { part, semitones } => sequencer
            .part_mut(part)
            .and_then(|p| p.transpose(semitones)),
        EngineCommand::Shutdown => Ok(()),
    };

    if let Err(err) = result {
        warn!(%err, "engine command failed");
        notify(
            update_tx,
            EngineUpdate::Error {
                message: err.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::config::PartConfig;
    use crate::error::SeqError;
    use crate::midi::{self, testing::RecordingSink};

    fn config() -> SessionConfig {
        SessionConfig {
            bpm: 120.0,
            steps_per_beat: 4,
            tick_rate_hz: 500,
            parts: vec![PartConfig {
                name: "drums".into(),
                channel: 9,
                length: 16,
            }],
            ..SessionConfig::default()
        }
    }

    #[test]
    fn plays_and_silences_on_shutdown() {
        let sink = RecordingSink::new();
        let engine = spawn_engine(config(), sink.clone()).unwrap();

        engine
            .command_tx
            .send(EngineCommand::AppendNotes {
                part: 0,
                notes: vec![NoteDescriptor::new(36, 127, 0.0, 1.0)],
            })
            .unwrap();
        engine.command_tx.send(EngineCommand::Play).unwrap();
        thread::sleep(Duration::from_millis(100));
        engine.shutdown();

        let sent = sink.sent();
        assert_eq!(sent.first(), Some(&(0x99, 36, 127)));
        assert_eq!(sent.last(), Some(&(0xB9, midi::ALL_NOTES_OFF, 0)));
    }

    #[test]
    fn reports_playback_state_and_errors() {
        let engine = spawn_engine(config(), RecordingSink::new()).unwrap();

        engine.command_tx.send(EngineCommand::Play).unwrap();
        engine
            .command_tx
            .send(EngineCommand::Transpose {
                part: 4,
                semitones: 1,
            })
            .unwrap();
        engine.command_tx.send(EngineCommand::Stop).unwrap();

        let timeout = Duration::from_secs(1);
        let updates: Vec<_> = (0..3)
            .filter_map(|_| loop {
                match engine.update_rx.recv_timeout(timeout) {
                    Ok(EngineUpdate::Step { .. }) => continue,
                    Ok(update) => break Some(update),
                    Err(_) => break None,
                }
            })
            .collect();
        engine.shutdown();

        assert_eq!(updates[0], EngineUpdate::PlaybackState { playing: true });
        assert!(matches!(&updates[1], EngineUpdate::Error { message } if message.contains("4")));
        assert_eq!(updates[2], EngineUpdate::PlaybackState { playing: false });
    }

    #[test]
    fn remove_note_reports_pairing() {
        let engine = spawn_engine(config(), RecordingSink::new()).unwrap();

        engine
            .command_tx
            .send(EngineCommand::AppendNotes {
                part: 0,
                notes: vec![NoteDescriptor::new(38, 100, 4.0, 1.0)],
            })
            .unwrap();
        engine
            .command_tx
            .send(EngineCommand::RemoveNote {
                part: 0,
                pitch: 38,
                position: 4.0,
            })
            .unwrap();

        let update = engine
            .update_rx
            .recv_timeout(Duration::from_secs(1))
            .unwrap();
        engine.shutdown();

        assert_eq!(update, EngineUpdate::NoteRemoved { part: 0, paired: true });
    }

    #[test]
    fn invalid_config_is_rejected_before_spawning() {
        let mut config = config();
        config.parts[0].length = 0;

        let result = spawn_engine(config, RecordingSink::new());

        assert!(matches!(result, Err(SeqError::InvalidConfig(_))));
    }

    #[test]
    fn full_update_queue_drops_instead_of_blocking() {
        let (update_tx, update_rx) = crossbeam::channel::bounded(1);

        notify(&update_tx, EngineUpdate::Step { part: 0, step: 1 });
        notify(&update_tx, EngineUpdate::Step { part: 0, step: 2 });

        assert_eq!(update_rx.try_recv(), Ok(EngineUpdate::Step { part: 0, step: 1 }));
        assert!(update_rx.try_recv().is_err());
    }
}
