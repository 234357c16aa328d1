//! PCM output channels.
//!
//! A session opens one channel on an [`AudioBackend`]. The channel's driver
//! thread pulls fixed-size blocks through the session's [`MixCallback`].

mod manual;
mod rodio_backend;

pub use manual::{ManualBackend, NullBackend};
pub use rodio_backend::RodioBackend;

use std::sync::Arc;

use crate::buffering::PcmFormat;
use crate::error::Result;

/// Pull callback filling one block of interleaved PCM bytes.
///
/// Returns the number of bytes written, which is always the block size.
pub type MixCallback = Arc<dyn Fn(&mut [u8]) -> usize + Send + Sync>;

/// Format of the mixed output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits: u16,
    /// Frames per mix period.
    pub block_samples: usize,
}

impl OutputFormat {
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * (self.bits as usize >> 3)
    }

    pub fn block_bytes(&self) -> usize {
        self.block_samples * self.frame_bytes()
    }

    pub fn pcm(&self) -> PcmFormat {
        PcmFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits: self.bits,
        }
    }

    /// Playback time of `bytes` of output, in milliseconds.
    pub fn sample_time_ms(&self, bytes: usize) -> u64 {
        let per_second = self.pcm().packet_size() as u64;
        if per_second == 0 {
            return 0;
        }
        bytes as u64 * 1000 / per_second
    }

    /// Round a byte count down to whole frames.
    pub fn align(&self, bytes: usize) -> usize {
        let frame = self.frame_bytes().max(1);
        bytes - bytes % frame
    }
}

/// An open hardware (or emulated) output channel.
pub trait PcmChannel: Send {
    /// Stop pulling from the callback and release the device.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Factory for output channels.
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open a channel pulling `callback` at the given format.
    ///
    /// Fails with `NoAudioDevice` when no output is available.
    fn open(&self, format: OutputFormat, callback: MixCallback) -> Result<Box<dyn PcmChannel>>;
}

/// Encode normalized samples into the output sample width.
///
/// 16-bit output is signed little endian, 8-bit output is unsigned.
pub fn encode_samples(samples: &[f32], bits: u16, out: &mut [u8]) {
    match bits {
        8 => {
            for (dst, sample) in out.iter_mut().zip(samples) {
                *dst = ((sample.clamp(-1.0, 1.0) * 127.0) as i32 + 128) as u8;
            }
        }
        _ => {
            for (dst, sample) in out.chunks_exact_mut(2).zip(samples) {
                let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                dst.copy_from_slice(&value.to_le_bytes());
            }
        }
    }
}

/// Decode output-width samples back into normalized floats.
pub fn decode_samples(bytes: &[u8], bits: u16, out: &mut Vec<f32>) {
    match bits {
        8 => out.extend(bytes.iter().map(|b| (*b as i32 - 128) as f32 / 128.0)),
        _ => out.extend(
            bytes
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(bits: u16) -> OutputFormat {
        OutputFormat {
            sample_rate: 8000,
            channels: 2,
            bits,
            block_samples: 256,
        }
    }

    #[test]
    fn sizes_follow_layout() {
        let f = format(16);
        assert_eq!(f.frame_bytes(), 4);
        assert_eq!(f.block_bytes(), 1024);
        assert_eq!(f.sample_time_ms(32_000), 1000);
        assert_eq!(f.align(1023), 1020);
    }

    #[test]
    fn sixteen_bit_encoding_is_signed_little_endian() {
        let mut out = [0u8; 6];
        encode_samples(&[0.0, 1.0, -1.0], 16, &mut out);
        assert_eq!(&out[0..2], &[0, 0]);
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([out[4], out[5]]), -i16::MAX);
    }

    #[test]
    fn eight_bit_encoding_is_unsigned() {
        let mut out = [0u8; 3];
        encode_samples(&[0.0, 1.0, -1.0], 8, &mut out);
        assert_eq!(out, [128, 255, 1]);

        let mut decoded = Vec::new();
        decode_samples(&out, 8, &mut decoded);
        assert_eq!(decoded[0], 0.0);
        assert!(decoded[1] > 0.99);
    }
}
