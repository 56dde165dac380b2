mod output;

pub use output::MidiOut;

use crate::error::Result;

pub const NOTE_ON: u8 = 0x90;
pub const CC: u8 = 0xB0;

/// Channel mode controller that releases every sounding note.
pub const ALL_NOTES_OFF: u8 = 123;

pub const PP: u8 = 33;
pub const P: u8 = 49;
pub const MP: u8 = 64;
pub const MF: u8 = 80;
pub const F: u8 = 96;
pub const FF: u8 = 112;

const NOTE_NAMES: [&str; 12] = [
    "C-", "C#", "D-", "D#", "E-", "F-", "F#", "G-", "G#", "A-", "A#", "B-",
];

/// Fire-and-forget destination for three-byte channel messages.
pub trait MidiSink {
    fn send_short(&mut self, status: u8, data1: u8, data2: u8) -> Result<()>;
}

pub fn status(kind: u8, channel: u8) -> u8 {
    kind | (channel & 0x0F)
}

/// Converts a parameter value to a data byte. Values are not range checked,
/// only masked to 7 bits.
pub fn data_byte(value: f64) -> u8 {
    (value as i64 & 0x7F) as u8
}

pub fn note_to_string(note: u8) -> String {
    let octave = note as i32 / 12 - 1;
    format!("{}{}", NOTE_NAMES[note as usize % 12], octave)
}
