//! Standard MIDI File parser.
//!
//! Formats 0 and 1 are merged into one timeline in microseconds. RIFF RMID
//! wrappers are unwrapped first.

use crate::error::{MediaError, Result};

use super::sequence::{tempo_to_mbpm, MidiMessage, Sequence, SequenceEvent, TimedEvent};

const DEFAULT_US_PER_QUARTER: u32 = 500_000;

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(truncated());
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn peek(&self) -> Result<u8> {
        self.data.get(self.pos).copied().ok_or_else(truncated)
    }

    fn u16_be(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32_be(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Variable-length quantity, at most four bytes.
    fn vlq(&mut self) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..4 {
            let byte = self.u8()?;
            value = (value << 7) | (byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(MediaError::Decode("variable-length quantity too long".to_string()))
    }
}

fn truncated() -> MediaError {
    MediaError::Decode("truncated MIDI data".to_string())
}

enum RawKind {
    Midi(MidiMessage),
    Tempo(u32),
    End,
}

struct RawEvent {
    tick: u64,
    track: usize,
    order: usize,
    kind: RawKind,
}

/// Time base of the file.
enum Division {
    PerQuarter(u32),
    /// Fixed microseconds per tick.
    Smpte(f64),
}

/// Unwrap a RIFF RMID container, returning the embedded SMF.
fn unwrap_rmid(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"RMID" {
        return Ok(data);
    }
    let mut reader = Reader::new(&data[12..]);
    while reader.remaining() >= 8 {
        let id = reader.take(4)?;
        let len = u32::from_le_bytes(reader.take(4)?.try_into().map_err(|_| truncated())?) as usize;
        let body = reader.take(len.min(reader.remaining()))?;
        if id == b"data" {
            return Ok(body);
        }
        if len % 2 == 1 && reader.remaining() > 0 {
            reader.take(1)?;
        }
    }
    Err(MediaError::Decode("RMID file without data chunk".to_string()))
}

fn text_key(meta_type: u8, track: usize) -> Option<&'static str> {
    match meta_type {
        0x01 => Some("comment"),
        0x02 => Some("copyright"),
        0x03 if track == 0 => Some("title"),
        _ => None,
    }
}

fn parse_track(
    body: &[u8],
    track: usize,
    events: &mut Vec<RawEvent>,
    metadata: &mut Vec<(String, String)>,
) -> Result<()> {
    let mut reader = Reader::new(body);
    let mut tick = 0u64;
    let mut running_status: Option<u8> = None;

    while reader.remaining() > 0 {
        tick += reader.vlq()? as u64;
        let order = events.len();
        let status = match reader.peek()? {
            byte if byte & 0x80 != 0 => {
                reader.u8()?;
                byte
            }
            _ => running_status.ok_or_else(|| {
                MediaError::Decode("data byte without running status".to_string())
            })?,
        };

        match status {
            0xFF => {
                running_status = None;
                let meta_type = reader.u8()?;
                let len = reader.vlq()? as usize;
                let data = reader.take(len)?;
                match meta_type {
                    0x2F => {
                        events.push(RawEvent {
                            tick,
                            track,
                            order,
                            kind: RawKind::End,
                        });
                        return Ok(());
                    }
                    0x51 if data.len() == 3 => {
                        let tempo = u32::from_be_bytes([0, data[0], data[1], data[2]]);
                        events.push(RawEvent {
                            tick,
                            track,
                            order,
                            kind: RawKind::Tempo(tempo),
                        });
                    }
                    _ => {
                        if let Some(key) = text_key(meta_type, track) {
                            if !metadata.iter().any(|(k, _)| k == key) {
                                let value = String::from_utf8_lossy(data).trim().to_string();
                                if !value.is_empty() {
                                    metadata.push((key.to_string(), value));
                                }
                            }
                        }
                    }
                }
            }
            0xF0 | 0xF7 => {
                running_status = None;
                let len = reader.vlq()? as usize;
                reader.take(len)?;
            }
            0x80..=0xEF => {
                running_status = Some(status);
                let data1 = reader.u8()?;
                let data2 = if MidiMessage::data_len(status) == 2 {
                    reader.u8()?
                } else {
                    0
                };
                if let Some(message) = MidiMessage::from_bytes(status, data1, data2) {
                    events.push(RawEvent {
                        tick,
                        track,
                        order,
                        kind: RawKind::Midi(message),
                    });
                }
            }
            other => {
                return Err(MediaError::Decode(format!(
                    "unexpected status byte {:#04x}",
                    other
                )))
            }
        }
    }

    events.push(RawEvent {
        tick,
        track,
        order: events.len(),
        kind: RawKind::End,
    });
    Ok(())
}

/// Parse a Standard MIDI File into a merged, time-ordered sequence.
pub fn parse_smf(data: &[u8]) -> Result<Sequence> {
    let data = unwrap_rmid(data)?;
    let mut reader = Reader::new(data);
    if reader.take(4).map_err(|_| not_midi())? != b"MThd" {
        return Err(not_midi());
    }
    let header_len = reader.u32_be()? as usize;
    if header_len < 6 {
        return Err(MediaError::Decode("MIDI header too short".to_string()));
    }
    let header = reader.take(header_len)?;
    let format = u16::from_be_bytes([header[0], header[1]]);
    let track_count = u16::from_be_bytes([header[2], header[3]]) as usize;
    let raw_division = u16::from_be_bytes([header[4], header[5]]);
    if format > 2 {
        return Err(MediaError::Decode(format!("unknown MIDI format {}", format)));
    }

    let division = if raw_division & 0x8000 != 0 {
        let fps = -((raw_division >> 8) as u8 as i8) as f64;
        let ticks_per_frame = (raw_division & 0xFF) as f64;
        if fps <= 0.0 || ticks_per_frame <= 0.0 {
            return Err(MediaError::Decode("invalid SMPTE division".to_string()));
        }
        Division::Smpte(1_000_000.0 / (fps * ticks_per_frame))
    } else if raw_division == 0 {
        return Err(MediaError::Decode("zero ticks per quarter note".to_string()));
    } else {
        Division::PerQuarter(raw_division as u32)
    };

    let mut events = Vec::new();
    let mut metadata = Vec::new();
    let mut track = 0;
    while track < track_count && reader.remaining() >= 8 {
        let id = reader.take(4)?;
        let len = reader.u32_be()? as usize;
        let body = reader.take(len.min(reader.remaining()))?;
        if id != b"MTrk" {
            continue;
        }
        parse_track(body, track, &mut events, &mut metadata)?;
        track += 1;
    }
    if track == 0 {
        return Err(MediaError::Decode("MIDI file has no tracks".to_string()));
    }

    events.sort_by_key(|event| (event.tick, event.track, event.order));
    Ok(build_sequence(events, division, metadata))
}

fn not_midi() -> MediaError {
    MediaError::Decode("not a Standard MIDI File".to_string())
}

fn build_sequence(
    events: Vec<RawEvent>,
    division: Division,
    metadata: Vec<(String, String)>,
) -> Sequence {
    let mut us_per_quarter = DEFAULT_US_PER_QUARTER;
    let mut initial_tempo = None;
    let mut last_tick = 0u64;
    let mut last_us = 0f64;
    let mut timed = Vec::with_capacity(events.len());

    for event in &events {
        let delta = (event.tick - last_tick) as f64;
        last_us += match division {
            Division::PerQuarter(ppq) => delta * us_per_quarter as f64 / ppq as f64,
            Division::Smpte(us_per_tick) => delta * us_per_tick,
        };
        last_tick = event.tick;
        let at_us = last_us.round() as u64;

        match event.kind {
            RawKind::Midi(message) => timed.push(TimedEvent {
                at_us,
                event: SequenceEvent::Midi(message),
            }),
            RawKind::Tempo(tempo) => {
                if event.tick == 0 && initial_tempo.is_none() {
                    initial_tempo = Some(tempo);
                }
                us_per_quarter = tempo.max(1);
                timed.push(TimedEvent {
                    at_us,
                    event: SequenceEvent::Tempo(tempo),
                });
            }
            RawKind::End => {}
        }
    }

    Sequence {
        events: timed,
        duration_us: last_us.round() as u64,
        tempo_mbpm: tempo_to_mbpm(initial_tempo.unwrap_or(DEFAULT_US_PER_QUARTER)),
        metadata,
    }
}
