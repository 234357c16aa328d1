//! Timed MIDI event lists produced by the content parsers.

use crate::constants::DEFAULT_TEMPO;

/// A channel voice message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOff { channel: u8, key: u8 },
    NoteOn { channel: u8, key: u8, velocity: u8 },
    KeyPressure { channel: u8, key: u8, value: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, value: u8 },
    /// 14-bit bend, 8192 is centered.
    PitchBend { channel: u8, value: u16 },
}

impl MidiMessage {
    /// Decode a message from its status and data bytes.
    ///
    /// A note-on with zero velocity is a note-off. System messages are not
    /// channel messages and yield `None`.
    pub fn from_bytes(status: u8, data1: u8, data2: u8) -> Option<Self> {
        let channel = status & 0x0F;
        let (data1, data2) = (data1 & 0x7F, data2 & 0x7F);
        let message = match status & 0xF0 {
            0x80 => Self::NoteOff { channel, key: data1 },
            0x90 if data2 == 0 => Self::NoteOff { channel, key: data1 },
            0x90 => Self::NoteOn {
                channel,
                key: data1,
                velocity: data2,
            },
            0xA0 => Self::KeyPressure {
                channel,
                key: data1,
                value: data2,
            },
            0xB0 => Self::ControlChange {
                channel,
                controller: data1,
                value: data2,
            },
            0xC0 => Self::ProgramChange {
                channel,
                program: data1,
            },
            0xD0 => Self::ChannelPressure {
                channel,
                value: data1,
            },
            0xE0 => Self::PitchBend {
                channel,
                value: (data2 as u16) << 7 | data1 as u16,
            },
            _ => return None,
        };
        Some(message)
    }

    /// Number of data bytes following a channel status byte.
    pub fn data_len(status: u8) -> usize {
        match status & 0xF0 {
            0xC0 | 0xD0 => 1,
            _ => 2,
        }
    }

    pub fn channel(&self) -> u8 {
        match *self {
            Self::NoteOff { channel, .. }
            | Self::NoteOn { channel, .. }
            | Self::KeyPressure { channel, .. }
            | Self::ControlChange { channel, .. }
            | Self::ProgramChange { channel, .. }
            | Self::ChannelPressure { channel, .. }
            | Self::PitchBend { channel, .. } => channel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceEvent {
    Midi(MidiMessage),
    /// Microseconds per quarter note.
    Tempo(u32),
}

/// An event at an absolute time from the start of the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEvent {
    pub at_us: u64,
    pub event: SequenceEvent,
}

/// Parsed content ready for the sequencer.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    /// Sorted by time.
    pub events: Vec<TimedEvent>,
    pub duration_us: u64,
    /// Tempo at the start, in milli-beats per minute.
    pub tempo_mbpm: i32,
    pub metadata: Vec<(String, String)>,
}

impl Default for Sequence {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            duration_us: 0,
            tempo_mbpm: DEFAULT_TEMPO,
            metadata: Vec::new(),
        }
    }
}

impl Sequence {
    /// Content-less sequence used by interactive device players.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.duration_us / 1000) as i64
    }

    /// Index of the first event at or after `at_us`.
    pub fn seek_index(&self, at_us: u64) -> usize {
        self.events.partition_point(|event| event.at_us < at_us)
    }
}

/// Convert microseconds per quarter note into milli-beats per minute.
pub fn tempo_to_mbpm(us_per_quarter: u32) -> i32 {
    if us_per_quarter == 0 {
        return DEFAULT_TEMPO;
    }
    (60_000_000_000u64 / us_per_quarter as u64) as i32
}
