//! In-memory media content used by tests and the demo command.

use std::io::Cursor;

use crate::error::{MediaError, Result};

/// Ticks per quarter note of generated MIDI files. With the default tempo
/// of 500000 us per quarter, one tick is one millisecond.
const PPQ: u16 = 500;

fn vlq(mut value: u32, out: &mut Vec<u8>) {
    let mut bytes = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        bytes.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    bytes.reverse();
    out.extend_from_slice(&bytes);
}

/// A format 0 MIDI file playing `keys` one after another on channel 0.
///
/// # Arguments
///
/// * `keys` - MIDI keys, each held for `note_ms`.
/// * `title` - Optional sequence name, reported as the `title` metadata.
/// * `sp_midi` - Prefix the track with the SP-MIDI MIP system exclusive.
pub fn midi_melody(keys: &[u8], note_ms: u32, title: Option<&str>, sp_midi: bool) -> Vec<u8> {
    let mut track = Vec::new();
    if sp_midi {
        track.extend_from_slice(&[0x00, 0xF0, 0x05, 0x7F, 0x7F, 0x0B, 0x01, 0xF7]);
    }
    if let Some(title) = title {
        track.extend_from_slice(&[0x00, 0xFF, 0x03]);
        vlq(title.len() as u32, &mut track);
        track.extend_from_slice(title.as_bytes());
    }
    track.extend_from_slice(&[0x00, 0xC0, 0x00]);
    for key in keys {
        track.extend_from_slice(&[0x00, 0x90, key & 0x7F, 0x64]);
        vlq(note_ms, &mut track);
        track.extend_from_slice(&[0x80, key & 0x7F, 0x40]);
    }
    track.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);

    let mut out = Vec::with_capacity(track.len() + 22);
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&PPQ.to_be_bytes());
    out.extend_from_slice(b"MTrk");
    out.extend_from_slice(&(track.len() as u32).to_be_bytes());
    out.extend_from_slice(&track);
    out
}

/// A tone sequence playing `keys` as quarter notes at 120 bpm.
pub fn tone_melody(keys: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFE, 1];
    for key in keys {
        // Resolution 64: a quarter note is 16 units.
        out.extend_from_slice(&[key & 0x7F, 16]);
    }
    out
}

/// A WAV file with a sine tone.
///
/// # Arguments
///
/// * `sample_rate` - Frames per second.
/// * `channels` - 1 or 2.
/// * `bits` - 8 or 16.
/// * `duration_ms` - Length of the tone.
pub fn sine_wav(sample_rate: u32, channels: u16, bits: u16, duration_ms: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: bits,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_err = |e: hound::Error| MediaError::Fail(format!("wav writer: {}", e));
    let frames = sample_rate as u64 * duration_ms as u64 / 1000;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_err)?;
        for frame in 0..frames {
            let phase = frame as f32 * 440.0 / sample_rate as f32;
            let value = (phase * std::f32::consts::TAU).sin() * 0.5;
            for _ in 0..channels {
                if bits == 8 {
                    writer.write_sample((value * 127.0) as i8).map_err(wav_err)?;
                } else {
                    writer
                        .write_sample((value * i16::MAX as f32) as i16)
                        .map_err(wav_err)?;
                }
            }
        }
        writer.finalize().map_err(wav_err)?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::detect_sp_midi;
    use crate::synth::{decode_wav, parse_smf, parse_tone_sequence};

    #[test]
    fn generated_midi_parses_with_one_ms_ticks() {
        let data = midi_melody(&[60, 62, 64], 250, Some("Scale"), false);
        let sequence = parse_smf(&data).unwrap();
        assert_eq!(sequence.duration_ms(), 750);
        assert_eq!(
            sequence.metadata,
            vec![("title".to_string(), "Scale".to_string())]
        );
        assert!(!detect_sp_midi(&data));
        assert!(detect_sp_midi(&midi_melody(&[60], 100, None, true)));
    }

    #[test]
    fn generated_tone_and_wav_content_is_valid() {
        assert_eq!(parse_tone_sequence(&tone_melody(&[60, 67])).unwrap().duration_ms(), 1000);
        let pcm = decode_wav(sine_wav(8000, 1, 8, 500).unwrap()).unwrap();
        assert_eq!(pcm.frames(), 4000);
        assert_eq!(pcm.format.bits, 8);
    }
}
