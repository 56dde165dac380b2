use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Result, SeqError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartConfig {
    pub name: String,
    pub channel: u8,
    /// Loop length in steps
    pub length: u32,
}

/// Playback setup for a session. Pattern contents are not stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub name: String,
    pub bpm: f64,
    pub steps_per_beat: u32,
    /// Scheduling passes per second
    pub tick_rate_hz: u32,
    /// Substring of the MIDI output port name to connect to
    pub midi_port: Option<String>,
    pub parts: Vec<PartConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "untitled".to_string(),
            bpm: 120.0,
            steps_per_beat: 4,
            tick_rate_hz: 250,
            midi_port: None,
            parts: vec![PartConfig {
                name: "drums".to_string(),
                channel: 9,
                length: 16,
            }],
        }
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let ron_string = fs::read_to_string(path)?;
        let config: SessionConfig = ron::from_str(&ron_string)?;
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(SeqError::InvalidConfig(format!("bpm must be positive, got {}", self.bpm)));
        }
        if self.steps_per_beat == 0 {
            return Err(SeqError::InvalidConfig("steps_per_beat must be positive".into()));
        }
        if self.tick_rate_hz == 0 {
            return Err(SeqError::InvalidConfig("tick_rate_hz must be positive".into()));
        }
        for part in &self.parts {
            if part.length == 0 {
                return Err(SeqError::InvalidConfig(format!(
                    "part '{}' has zero length",
                    part.name
                )));
            }
            if part.channel > 15 {
                return Err(SeqError::InvalidConfig(format!(
                    "part '{}' uses channel {}, expected 0-15",
                    part.name, part.channel
                )));
            }
        }
        Ok(())
    }

    pub fn steps_per_second(&self) -> f64 {
        self.bpm / 60.0 * self.steps_per_beat as f64
    }
}
