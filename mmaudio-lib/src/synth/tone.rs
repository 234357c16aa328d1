//! Tone sequence parser.
//!
//! Byte format: `VERSION 1`, optional `TEMPO t` (bpm = 4t) and
//! `RESOLUTION r`, block definitions, then events. Notes are
//! `key duration` pairs with durations in 1/r of a whole note.

use std::collections::HashMap;

use crate::constants::TONE_SEQUENCE_PROGRAM;
use crate::error::{MediaError, Result};

use super::sequence::{MidiMessage, Sequence, SequenceEvent, TimedEvent};

const VERSION: i8 = -2;
const TEMPO: i8 = -3;
const RESOLUTION: i8 = -4;
const BLOCK_START: i8 = -5;
const BLOCK_END: i8 = -6;
const PLAY_BLOCK: i8 = -7;
const SET_VOLUME: i8 = -8;
const REPEAT: i8 = -9;
const SILENCE: i8 = -1;

const DEFAULT_TEMPO_CODE: i32 = 30;
const DEFAULT_RESOLUTION: i32 = 64;
const MAX_BLOCK_DEPTH: usize = 16;
const CHANNEL: u8 = 0;
const VELOCITY: u8 = 127;

fn invalid(msg: &str) -> MediaError {
    MediaError::Decode(format!("tone sequence: {}", msg))
}

struct Timeline {
    events: Vec<TimedEvent>,
    now_us: u64,
    unit_us: u64,
}

impl Timeline {
    fn push(&mut self, at_us: u64, message: MidiMessage) {
        self.events.push(TimedEvent {
            at_us,
            event: SequenceEvent::Midi(message),
        });
    }

    fn note(&mut self, key: i8, duration: i8, repeat: u32) -> Result<()> {
        if duration <= 0 {
            return Err(invalid("duration must be positive"));
        }
        let length = duration as u64 * self.unit_us;
        for _ in 0..repeat {
            if key != SILENCE {
                let key = key as u8;
                self.push(
                    self.now_us,
                    MidiMessage::NoteOn {
                        channel: CHANNEL,
                        key,
                        velocity: VELOCITY,
                    },
                );
                self.push(self.now_us + length, MidiMessage::NoteOff { channel: CHANNEL, key });
            }
            self.now_us += length;
        }
        Ok(())
    }

    fn play(&mut self, body: &[i8], blocks: &HashMap<i8, Vec<i8>>, depth: usize) -> Result<()> {
        if depth > MAX_BLOCK_DEPTH {
            return Err(invalid("blocks nested too deeply"));
        }
        let mut i = 0;
        while i < body.len() {
            let code = body[i];
            let arg = *body.get(i + 1).ok_or_else(|| invalid("missing argument"))?;
            match code {
                PLAY_BLOCK => {
                    let block = blocks
                        .get(&arg)
                        .ok_or_else(|| invalid("play of undefined block"))?;
                    self.play(block, blocks, depth + 1)?;
                    i += 2;
                }
                SET_VOLUME => {
                    if !(0..=100).contains(&arg) {
                        return Err(invalid("volume out of range"));
                    }
                    self.push(
                        self.now_us,
                        MidiMessage::ControlChange {
                            channel: CHANNEL,
                            controller: 7,
                            value: (arg as i32 * 127 / 100) as u8,
                        },
                    );
                    i += 2;
                }
                REPEAT => {
                    if arg < 2 {
                        return Err(invalid("repeat multiplier below 2"));
                    }
                    let key = *body.get(i + 2).ok_or_else(|| invalid("missing repeated note"))?;
                    let duration = *body.get(i + 3).ok_or_else(|| invalid("missing duration"))?;
                    if key < SILENCE {
                        return Err(invalid("repeat must precede a note"));
                    }
                    self.note(key, duration, arg as u32)?;
                    i += 4;
                }
                key if key >= SILENCE => {
                    self.note(key, arg, 1)?;
                    i += 2;
                }
                BLOCK_START | BLOCK_END => return Err(invalid("block definition after events")),
                other => return Err(invalid(&format!("unknown event {}", other))),
            }
        }
        Ok(())
    }
}

/// Parse a tone sequence into a MIDI event sequence.
pub fn parse_tone_sequence(data: &[u8]) -> Result<Sequence> {
    let bytes: Vec<i8> = data.iter().map(|b| *b as i8).collect();
    if bytes.len() < 2 || bytes[0] != VERSION || bytes[1] != 1 {
        return Err(invalid("missing version 1 header"));
    }
    let mut i = 2;
    let mut tempo_code = DEFAULT_TEMPO_CODE;
    let mut resolution = DEFAULT_RESOLUTION;

    if bytes.get(i) == Some(&TEMPO) {
        tempo_code = *bytes.get(i + 1).ok_or_else(|| invalid("missing tempo"))? as i32;
        if !(5..=127).contains(&tempo_code) {
            return Err(invalid("tempo out of range"));
        }
        i += 2;
    }
    if bytes.get(i) == Some(&RESOLUTION) {
        resolution = *bytes.get(i + 1).ok_or_else(|| invalid("missing resolution"))? as i32;
        if resolution < 1 {
            return Err(invalid("resolution out of range"));
        }
        i += 2;
    }

    let mut blocks = HashMap::new();
    while bytes.get(i) == Some(&BLOCK_START) {
        let number = *bytes.get(i + 1).ok_or_else(|| invalid("missing block number"))?;
        if number < 0 {
            return Err(invalid("negative block number"));
        }
        let start = i + 2;
        let mut end = start;
        loop {
            match (bytes.get(end), bytes.get(end + 1)) {
                (Some(&BLOCK_END), Some(&n)) if n == number => break,
                (Some(_), Some(_)) => end += 2,
                _ => return Err(invalid("unterminated block")),
            }
        }
        blocks.insert(number, bytes[start..end].to_vec());
        i = end + 2;
    }

    let bpm = tempo_code as u64 * 4;
    // A whole note lasts four beats.
    let unit_us = 240_000_000 / (bpm * resolution as u64);
    let mut timeline = Timeline {
        events: vec![TimedEvent {
            at_us: 0,
            event: SequenceEvent::Midi(MidiMessage::ProgramChange {
                channel: CHANNEL,
                program: TONE_SEQUENCE_PROGRAM,
            }),
        }],
        now_us: 0,
        unit_us,
    };
    timeline.play(&bytes[i..], &blocks, 0)?;

    let mut events = timeline.events;
    events.sort_by_key(|event| event.at_us);
    Ok(Sequence {
        events,
        duration_us: timeline.now_us,
        tempo_mbpm: (bpm * 1000) as i32,
        metadata: Vec::new(),
    })
}

/// Encode a single note as a tone sequence at the default tempo.
pub fn single_note(key: u8, duration_ms: u32) -> Vec<u8> {
    let unit_ms = 240_000 / (DEFAULT_TEMPO_CODE as u32 * 4 * DEFAULT_RESOLUTION as u32);
    let units = (duration_ms / unit_ms.max(1)).clamp(1, 127) as u8;
    vec![VERSION as u8, 1, key.min(127), units]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(codes: &[i8]) -> Vec<u8> {
        codes.iter().map(|c| *c as u8).collect()
    }

    #[test]
    fn default_tempo_quarter_note_is_half_a_second() {
        // 120 bpm, resolution 64: a quarter note is 16 units.
        let sequence = parse_tone_sequence(&bytes(&[VERSION, 1, 60, 16])).unwrap();
        assert_eq!(sequence.duration_ms(), 500);
        assert_eq!(sequence.tempo_mbpm, 120_000);
        assert_eq!(sequence.events.len(), 3);
    }

    #[test]
    fn blocks_repeat_and_volume_expand() {
        let sequence = parse_tone_sequence(&bytes(&[
            VERSION, 1, TEMPO, 15, RESOLUTION, 4, //
            BLOCK_START, 0, 60, 1, SILENCE, 1, BLOCK_END, 0, //
            SET_VOLUME, 50, //
            PLAY_BLOCK, 0, //
            REPEAT, 3, 62, 1, //
        ]))
        .unwrap();
        // 60 bpm, quarter-note units: 1 + 1 + 3 beats.
        assert_eq!(sequence.duration_ms(), 5000);
        assert_eq!(sequence.tempo_mbpm, 60_000);
        let note_ons = sequence
            .events
            .iter()
            .filter(|e| matches!(e.event, SequenceEvent::Midi(MidiMessage::NoteOn { .. })))
            .count();
        assert_eq!(note_ons, 4);
        assert!(sequence.events.iter().any(|e| e.event
            == SequenceEvent::Midi(MidiMessage::ControlChange {
                channel: 0,
                controller: 7,
                value: 63
            })));
    }

    #[test]
    fn malformed_sequences_are_rejected() {
        assert!(parse_tone_sequence(&bytes(&[60, 16])).is_err());
        assert!(parse_tone_sequence(&bytes(&[VERSION, 1, PLAY_BLOCK, 3])).is_err());
        assert!(parse_tone_sequence(&bytes(&[VERSION, 1, BLOCK_START, 0, 60, 8])).is_err());
        assert!(parse_tone_sequence(&bytes(&[VERSION, 1, 60])).is_err());
        assert!(parse_tone_sequence(&bytes(&[VERSION, 1, TEMPO, 2, 60, 8])).is_err());
    }

    #[test]
    fn single_note_encodes_a_playable_sequence() {
        let sequence = parse_tone_sequence(&single_note(69, 1000)).unwrap();
        assert!(sequence.duration_ms() >= 900);
    }
}
