//! Producers of PCM for a tunnel.

use std::sync::Arc;

use crate::output::OutputFormat;
use crate::session::SessionMixer;

/// Something the tunnel producer can pull PCM from.
pub trait PcmSource: Send {
    fn format(&self) -> OutputFormat;

    /// Fill the front of `out` and return the bytes written. Zero means
    /// nothing is available right now.
    fn read_pcm(&mut self, out: &mut [u8]) -> usize;

    /// True once no more PCM will ever be produced.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Renders an application's mixer session straight into the tunnel.
pub struct SessionSource {
    mixer: Arc<SessionMixer>,
    format: OutputFormat,
    remaining: Option<u64>,
}

impl SessionSource {
    pub fn new(mixer: Arc<SessionMixer>, format: OutputFormat) -> Self {
        Self {
            mixer,
            format,
            remaining: None,
        }
    }

    /// Stop after `ms` milliseconds of output.
    pub fn limited_to_ms(mut self, ms: u64) -> Self {
        let bytes = self.format.pcm().packet_size() as u64 * ms / 1000;
        self.remaining = Some(self.format.align(bytes as usize) as u64);
        self
    }
}

impl PcmSource for SessionSource {
    fn format(&self) -> OutputFormat {
        self.format
    }

    fn read_pcm(&mut self, out: &mut [u8]) -> usize {
        let mut len = self.format.align(out.len().min(self.format.block_bytes()));
        if let Some(remaining) = self.remaining {
            len = len.min(remaining as usize);
        }
        if len == 0 {
            return 0;
        }
        let written = self.mixer.mix(&mut out[..len]);
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= written as u64;
        }
        written
    }

    fn is_finished(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// A fixed block of PCM, produced in order.
pub struct BytesSource {
    format: OutputFormat,
    data: Vec<u8>,
    position: usize,
}

impl BytesSource {
    /// A trailing partial frame is dropped.
    pub fn new(format: OutputFormat, mut data: Vec<u8>) -> Self {
        data.truncate(format.align(data.len()));
        Self {
            format,
            data,
            position: 0,
        }
    }
}

impl PcmSource for BytesSource {
    fn format(&self) -> OutputFormat {
        self.format
    }

    fn read_pcm(&mut self, out: &mut [u8]) -> usize {
        let n = self
            .format
            .align(out.len().min(self.data.len() - self.position));
        out[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        n
    }

    fn is_finished(&self) -> bool {
        self.position >= self.data.len()
    }
}
