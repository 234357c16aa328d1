//! Sampled PCM streams mixed alongside the synthesizer voices.
//!
//! Players keep an `Arc<WaveStream>` and drive it through atomics, so the
//! mix thread never needs a player lock.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use log::warn;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::buffering::PcmFormat;
use crate::constants::DEFAULT_RATE;
use crate::error::{MediaError, Result};

/// Interleaved samples decoded from a WAV file.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPcm {
    pub format: PcmFormat,
    pub samples: Vec<f32>,
}

impl DecodedPcm {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }
}

/// Decode a complete WAV file held in memory.
pub fn decode_wav(data: Vec<u8>) -> Result<DecodedPcm> {
    let decode_err = |e: SymphoniaError| MediaError::Decode(format!("wav: {}", e));

    let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());
    let mut hint = Hint::new();
    hint.with_extension("wav");
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(decode_err)?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| MediaError::Decode("wav: no audio track".to_string()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| MediaError::Decode("wav: unknown sample rate".to_string()))?;
    let channels = params.channels.map(|c| c.count() as u16).unwrap_or(1);
    let bits = params.bits_per_sample.unwrap_or(16) as u16;

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(decode_err)?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_err(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => warn!("skipping bad wav packet: {}", e),
            Err(e) => return Err(decode_err(e)),
        }
    }

    Ok(DecodedPcm {
        format: PcmFormat {
            sample_rate,
            channels,
            bits,
        },
        samples,
    })
}

/// A decoded PCM stream registered with a synthesizer.
#[derive(Debug)]
pub struct WaveStream {
    player_id: i64,
    format: PcmFormat,
    samples: Vec<f32>,
    frames: usize,
    /// Fractional frame position, stored as `f64` bits.
    position: AtomicU64,
    playing: AtomicBool,
    eom: AtomicBool,
    volume: AtomicI32,
    muted: AtomicBool,
    rate: AtomicI32,
}

impl WaveStream {
    pub fn new(player_id: i64, pcm: DecodedPcm) -> Self {
        let frames = pcm.frames();
        Self {
            player_id,
            format: pcm.format,
            samples: pcm.samples,
            frames,
            position: AtomicU64::new(0f64.to_bits()),
            playing: AtomicBool::new(false),
            eom: AtomicBool::new(false),
            volume: AtomicI32::new(100),
            muted: AtomicBool::new(false),
            rate: AtomicI32::new(DEFAULT_RATE),
        }
    }

    pub fn player_id(&self) -> i64 {
        self.player_id
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    fn frame_bytes(&self) -> u64 {
        self.format.channels as u64 * (self.format.bits as u64 >> 3).max(1)
    }

    fn frame_position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Acquire))
    }

    /// Length of the stream in source bytes.
    pub fn stream_len(&self) -> u64 {
        self.frames as u64 * self.frame_bytes()
    }

    pub fn byte_position(&self) -> u64 {
        self.frame_position() as u64 * self.frame_bytes()
    }

    /// Seek to a byte offset, clamped to the stream. Returns the new offset.
    pub fn set_byte_position(&self, bytes: u64) -> u64 {
        let frame = (bytes / self.frame_bytes()).min(self.frames as u64);
        self.position
            .store((frame as f64).to_bits(), Ordering::Release);
        self.eom.store(false, Ordering::Release);
        frame * self.frame_bytes()
    }

    pub fn time_ms(&self) -> i64 {
        (self.byte_position() / self.format.bytes_per_ms().max(1)) as i64
    }

    pub fn duration_ms(&self) -> i64 {
        (self.stream_len() / self.format.bytes_per_ms().max(1)) as i64
    }

    pub fn start(&self) {
        self.eom.store(false, Ordering::Release);
        self.playing.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.playing.store(false, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn is_eom(&self) -> bool {
        self.eom.load(Ordering::Acquire)
    }

    pub fn volume(&self) -> i32 {
        self.volume.load(Ordering::Relaxed)
    }

    pub fn set_volume(&self, level: i32) -> i32 {
        let level = level.clamp(0, 100);
        self.volume.store(level, Ordering::Relaxed);
        level
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn rate(&self) -> i32 {
        self.rate.load(Ordering::Relaxed)
    }

    pub fn set_rate(&self, rate: i32) {
        self.rate.store(rate, Ordering::Relaxed);
    }

    /// Add this stream into interleaved output frames.
    ///
    /// Returns the media time in milliseconds when the end of the stream was
    /// reached during this call. The end is reported once per pass.
    pub fn mix_into(&self, out: &mut [f32], channels: usize, sample_rate: u32) -> Option<i64> {
        if !self.is_playing() {
            return None;
        }
        let src_channels = self.format.channels.max(1) as usize;
        let channels = channels.max(1);
        let step = self.format.sample_rate as f64 / sample_rate.max(1) as f64 * self.rate() as f64
            / DEFAULT_RATE as f64;
        let gain = if self.is_muted() {
            0.0
        } else {
            self.volume() as f32 / 100.0
        };

        let mut position = self.frame_position();
        let mut ended = false;
        for frame in out.chunks_exact_mut(channels) {
            let index = position as usize;
            if index >= self.frames {
                ended = true;
                break;
            }
            let source = &self.samples[index * src_channels..(index + 1) * src_channels];
            if channels == 1 && src_channels > 1 {
                frame[0] += source.iter().sum::<f32>() / src_channels as f32 * gain;
            } else {
                for (c, sample) in frame.iter_mut().enumerate() {
                    *sample += source[c.min(src_channels - 1)] * gain;
                }
            }
            position += step;
        }

        if ended || position as usize >= self.frames {
            self.position
                .store((self.frames as f64).to_bits(), Ordering::Release);
            self.playing.store(false, Ordering::Release);
            if !self.eom.swap(true, Ordering::AcqRel) {
                return Some(self.duration_ms());
            }
            return None;
        }
        self.position.store(position.to_bits(), Ordering::Release);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(frames: usize) -> WaveStream {
        WaveStream::new(
            7,
            DecodedPcm {
                format: PcmFormat {
                    sample_rate: 8000,
                    channels: 1,
                    bits: 16,
                },
                samples: vec![0.5; frames],
            },
        )
    }

    #[test]
    fn byte_positions_follow_the_source_format() {
        let wave = stream(8000);
        assert_eq!(wave.stream_len(), 16_000);
        assert_eq!(wave.duration_ms(), 1000);
        assert_eq!(wave.set_byte_position(3_001), 3_000);
        assert_eq!(wave.time_ms(), 187);
        assert_eq!(wave.set_byte_position(99_999), 16_000);
    }

    #[test]
    fn mixing_reports_end_of_media_once() {
        let wave = stream(100);
        wave.start();
        let mut out = vec![0.0; 2 * 64];
        assert_eq!(wave.mix_into(&mut out, 2, 8000), None);
        assert_eq!(out[0], 0.5);
        assert_eq!(out[1], 0.5);

        let mut out = vec![0.0; 2 * 64];
        assert_eq!(wave.mix_into(&mut out, 2, 8000), Some(12));
        assert!(!wave.is_playing());
        assert!(wave.is_eom());
        assert_eq!(out[2 * 40], 0.0);
        assert_eq!(wave.mix_into(&mut out, 2, 8000), None);
    }

    #[test]
    fn stopped_or_muted_streams_add_nothing() {
        let wave = stream(100);
        let mut out = vec![0.0; 16];
        wave.mix_into(&mut out, 1, 8000);
        assert!(out.iter().all(|s| *s == 0.0));

        wave.start();
        wave.set_muted(true);
        wave.mix_into(&mut out, 1, 8000);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(wave.byte_position(), 32);
    }

    #[test]
    fn decodes_wav_written_by_hound() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 11025,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..1100 {
                writer.write_sample((i % 100) as i16 * 100).unwrap();
            }
            writer.finalize().unwrap();
        }
        let pcm = decode_wav(cursor.into_inner()).unwrap();
        assert_eq!(pcm.format.sample_rate, 11025);
        assert_eq!(pcm.format.channels, 2);
        assert_eq!(pcm.frames(), 550);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            decode_wav(b"not a wav file at all".to_vec()),
            Err(MediaError::Decode(_))
        ));
    }
}
