use midir::{MidiOutput, MidiOutputConnection};
use tracing::info;

use super::MidiSink;
use crate::error::{Result, SeqError};

/// Hardware or virtual MIDI output reached through `midir`.
pub struct MidiOut {
    conn: MidiOutputConnection,
    port_name: String,
}

impl MidiOut {
    /// Connects to the first output port whose name contains `port_hint`,
    /// falling back to the first available port.
    pub fn connect(port_hint: Option<&str>) -> Result<Self> {
        let midi_out = MidiOutput::new("stepseq")?;
        let ports = midi_out.ports();

        for port in &ports {
            info!(port = %midi_out.port_name(port).unwrap_or_default(), "found MIDI output");
        }

        let port = port_hint
            .and_then(|hint| {
                ports
                    .iter()
                    .find(|p| midi_out.port_name(p).unwrap_or_default().contains(hint))
            })
            .or_else(|| ports.first())
            .ok_or(SeqError::MidiPort)?;
        let port_name = midi_out.port_name(port).unwrap_or_default();

        let conn = midi_out
            .connect(port, "stepseq-out")
            .map_err(|e| SeqError::MidiConnect(e.to_string()))?;
        info!(port = %port_name, "connected MIDI output");

        Ok(Self { conn, port_name })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl MidiSink for MidiOut {
    fn send_short(&mut self, status: u8, data1: u8, data2: u8) -> Result<()> {
        self.conn.send(&[status, data1, data2])?;
        Ok(())
    }
}
