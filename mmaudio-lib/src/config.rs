//! Engine configuration loaded from JSON.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{GLOBMAN_INDEX_MAX, MM_SHMEM_SIZE, TUNNEL_HEADER_INTS};
use crate::error::{MediaError, Result};
use crate::output::OutputFormat;

/// Settings shared by every session, player and tunnel of one engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_sessions: usize,
    pub output_rate: u32,
    pub output_channels: u16,
    pub output_bits: u16,
    /// Frames rendered per mix period.
    pub block_samples: usize,
    /// DLS soundbank; the built-in General MIDI bank is used when absent.
    pub soundbank_path: Option<PathBuf>,
    pub voices: usize,
    pub realize_timeout_ms: u64,
    pub mix_lock_timeout_ms: u64,
    pub midi_event_lock_timeout_ms: u64,
    pub tunnel_segment_size: usize,
    /// Upper bound for a single player's content buffer.
    pub max_buffer_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sessions: GLOBMAN_INDEX_MAX,
            output_rate: 22_050,
            output_channels: 2,
            output_bits: 16,
            block_samples: 512,
            soundbank_path: None,
            voices: 32,
            realize_timeout_ms: 10_000,
            mix_lock_timeout_ms: 1_000,
            midi_event_lock_timeout_ms: 500,
            tunnel_segment_size: MM_SHMEM_SIZE,
            max_buffer_bytes: 16 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| MediaError::InvalidArgument(format!("engine config: {}", err)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| -> Result<()> { Err(MediaError::InvalidArgument(msg.to_string())) };
        if self.max_sessions == 0 {
            return invalid("max_sessions must be positive");
        }
        if self.output_rate == 0 {
            return invalid("output_rate must be positive");
        }
        if !matches!(self.output_channels, 1 | 2) {
            return invalid("output_channels must be 1 or 2");
        }
        if !matches!(self.output_bits, 8 | 16) {
            return invalid("output_bits must be 8 or 16");
        }
        if self.block_samples == 0 || self.voices == 0 {
            return invalid("block_samples and voices must be positive");
        }
        if self.tunnel_segment_size <= TUNNEL_HEADER_INTS * std::mem::size_of::<i32>() {
            return invalid("tunnel_segment_size leaves no room for data");
        }
        Ok(())
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat {
            sample_rate: self.output_rate,
            channels: self.output_channels,
            bits: self.output_bits,
            block_samples: self.block_samples,
        }
    }

    pub fn realize_timeout(&self) -> Duration {
        Duration::from_millis(self.realize_timeout_ms)
    }

    pub fn mix_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.mix_lock_timeout_ms)
    }

    pub fn midi_event_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.midi_event_lock_timeout_ms)
    }
}
