use std::io::BufRead;
use std::path::Path;
use std::str::{FromStr, SplitWhitespace};

use stepseq::{
    ControlDescriptor, EngineCommand, EngineUpdate, MidiOut, NoteDescriptor, SessionConfig,
    spawn_engine,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const HELP: &str = "\
commands:
  play | pause | stop
  add <part> <pitch> <velocity> <position> <length>
  cc <part> <controller> <value> <position>
  rm <part> <pitch> <position>
  transpose <part> <semitones>
  quit";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run() {
        error!(%err, "stepseq failed");
        std::process::exit(1);
    }
}

fn run() -> stepseq::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => SessionConfig::load(Path::new(&path))?,
        None => SessionConfig::default(),
    };

    let out = MidiOut::connect(config.midi_port.as_deref())?;
    info!(session = %config.name, port = out.port_name(), bpm = config.bpm, "session loaded");
    for (i, part) in config.parts.iter().enumerate() {
        println!(
            "  {i}: {} (channel {}, {} steps)",
            part.name,
            part.channel + 1,
            part.length
        );
    }
    println!("{HELP}");

    let engine = spawn_engine(config, out)?;

    let updates = engine.update_rx.clone();
    std::thread::spawn(move || {
        for update in updates.iter() {
            match update {
                EngineUpdate::Step { .. } => {}
                EngineUpdate::Error { message } => eprintln!("error: {message}"),
                other => println!("{other:?}"),
            }
        }
    });

    for line in std::io::stdin().lock().lines() {
        match parse_command(&line?) {
            Ok(Some(EngineCommand::Shutdown)) => break,
            Ok(Some(command)) => {
                if engine.command_tx.send(command).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(message) => eprintln!("{message}\n{HELP}"),
        }
    }

    engine.shutdown();
    Ok(())
}

fn parse_command(line: &str) -> Result<Option<EngineCommand>, String> {
    let mut args = line.split_whitespace();
    let Some(word) = args.next() else {
        return Ok(None);
    };

    let command = match word {
        "play" => EngineCommand::Play,
        "pause" => EngineCommand::Pause,
        "stop" => EngineCommand::Stop,
        "quit" | "exit" => EngineCommand::Shutdown,
        "add" => {
            let part = arg(&mut args, "part")?;
            let note = NoteDescriptor::new(
                arg(&mut args, "pitch")?,
                arg(&mut args, "velocity")?,
                arg(&mut args, "position")?,
                arg(&mut args, "length")?,
            );
            EngineCommand::AppendNotes {
                part,
                notes: vec![note],
            }
        }
        "cc" => {
            let part = arg(&mut args, "part")?;
            let control = ControlDescriptor {
                controller: arg(&mut args, "controller")?,
                value: arg(&mut args, "value")?,
                position: arg(&mut args, "position")?,
            };
            EngineCommand::AppendControls {
                part,
                controls: vec![control],
            }
        }
        "rm" => EngineCommand::RemoveNote {
            part: arg(&mut args, "part")?,
            pitch: arg(&mut args, "pitch")?,
            position: arg(&mut args, "position")?,
        },
        "transpose" => EngineCommand::Transpose {
            part: arg(&mut args, "part")?,
            semitones: arg(&mut args, "semitones")?,
        },
        other => return Err(format!("unknown command '{other}'")),
    };

    Ok(Some(command))
}

fn arg<T: FromStr>(args: &mut SplitWhitespace, name: &str) -> Result<T, String> {
    args.next()
        .ok_or(format!("missing {name}"))?
        .parse()
        .map_err(|_| format!("invalid {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transport() {
        assert!(matches!(parse_command("play"), Ok(Some(EngineCommand::Play))));
        assert!(matches!(parse_command("  stop "), Ok(Some(EngineCommand::Stop))));
        assert!(matches!(parse_command("quit"), Ok(Some(EngineCommand::Shutdown))));
        assert!(matches!(parse_command(""), Ok(None)));
    }

    #[test]
    fn parses_note_edits() {
        match parse_command("add 0 36 120 4 1.5") {
            Ok(Some(EngineCommand::AppendNotes { part, notes })) => {
                assert_eq!(part, 0);
                assert_eq!(notes, vec![NoteDescriptor::new(36, 120, 4.0, 1.5)]);
            }
            other => panic!("unexpected {other:?}"),
        }

        match parse_command("rm 1 38 2.5") {
            Ok(Some(EngineCommand::RemoveNote {
                part,
                pitch,
                position,
            })) => assert_eq!((part, pitch, position), (1, 38, 2.5)),
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            parse_command("transpose 0 -12"),
            Ok(Some(EngineCommand::Transpose { part: 0, semitones: -12 }))
        ));
    }

    #[test]
    fn reports_bad_input() {
        let err = parse_command("add 0 36").unwrap_err();
        assert!(err.contains("missing velocity"));

        let err = parse_command("cc 0 seventy 1 0").unwrap_err();
        assert!(err.contains("invalid controller"));

        let err = parse_command("dance").unwrap_err();
        assert!(err.contains("unknown command"));
    }
}
