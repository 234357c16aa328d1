//! Per-player sequencer state inside a synthesizer.

use crate::constants::{DEFAULT_RATE, DEFAULT_TEMPO, MIDI_CHANNELS};

use super::sequence::{tempo_to_mbpm, MidiMessage, Sequence, SequenceEvent};
use super::soundbank::Soundbank;
use super::voice::{NoteSpec, TrackId, VoiceMix, VoicePool, Waveform};

/// Engine time units are 1/10 ms.
const US_PER_TICK: f64 = 100.0;
const PERCUSSION_CHANNEL: u8 = 9;

const CC_BANK_MSB: u8 = 0;
const CC_VOLUME: u8 = 7;
const CC_PAN: u8 = 10;
const CC_EXPRESSION: u8 = 11;
const CC_BANK_LSB: u8 = 32;
const CC_ALL_SOUND_OFF: u8 = 120;
const CC_RESET_CONTROLLERS: u8 = 121;
const CC_ALL_NOTES_OFF: u8 = 123;

/// Controller state of one MIDI channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelState {
    pub volume: u8,
    pub expression: u8,
    pub pan: u8,
    pub program: u8,
    pub bank: u16,
    pub pitch_bend: u16,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            volume: 100,
            expression: 127,
            pan: 64,
            program: 0,
            bank: 0,
            pitch_bend: 8192,
        }
    }
}

/// Sequencer attached to one player.
#[derive(Debug, Clone)]
pub struct SynthTrack {
    pub id: TrackId,
    pub player_id: i64,
    sequence: Option<Sequence>,
    next_event: usize,
    position_us: f64,
    playing: bool,
    volume: i32,
    muted: bool,
    rate: i32,
    sequence_tempo: i32,
    tempo_scale: f64,
    pitch: i32,
    channels: [ChannelState; MIDI_CHANNELS],
}

impl SynthTrack {
    pub fn new(id: TrackId, player_id: i64) -> Self {
        Self {
            id,
            player_id,
            sequence: None,
            next_event: 0,
            position_us: 0.0,
            playing: false,
            volume: 100,
            muted: false,
            rate: DEFAULT_RATE,
            sequence_tempo: DEFAULT_TEMPO,
            tempo_scale: 1.0,
            pitch: 0,
            channels: [ChannelState::default(); MIDI_CHANNELS],
        }
    }

    /// Attach content and rewind.
    pub fn load(&mut self, sequence: Sequence) {
        self.sequence_tempo = sequence.tempo_mbpm;
        self.sequence = Some(sequence);
        self.next_event = 0;
        self.position_us = 0.0;
        self.playing = false;
        self.channels = [ChannelState::default(); MIDI_CHANNELS];
    }

    pub fn unload(&mut self) {
        self.sequence = None;
        self.next_event = 0;
        self.position_us = 0.0;
        self.playing = false;
    }

    pub fn is_loaded(&self) -> bool {
        self.sequence.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing && self.sequence.is_some();
    }

    pub fn metadata(&self) -> &[(String, String)] {
        self.sequence
            .as_ref()
            .map(|sequence| sequence.metadata.as_slice())
            .unwrap_or(&[])
    }

    /// Position in engine ticks.
    pub fn position_ticks(&self) -> i64 {
        (self.position_us / US_PER_TICK) as i64
    }

    /// Duration in engine ticks, `None` without timed content.
    pub fn duration_ticks(&self) -> Option<i64> {
        self.sequence
            .as_ref()
            .filter(|sequence| !sequence.events.is_empty() || sequence.duration_us > 0)
            .map(|sequence| (sequence.duration_us as f64 / US_PER_TICK) as i64)
    }

    /// Move to `ticks`, clamped to the content, and return the new position.
    ///
    /// Controller and program changes before the target are replayed so the
    /// channels sound as they would have at that point.
    pub fn set_position_ticks(&mut self, ticks: i64, voices: &mut VoicePool) -> i64 {
        voices.release_all(self.id, None);
        let Some(sequence) = self.sequence.as_ref() else {
            return 0;
        };
        let target_us = (ticks.max(0) as f64 * US_PER_TICK).min(sequence.duration_us as f64);
        let index = sequence.seek_index(target_us as u64);

        let mut channels = [ChannelState::default(); MIDI_CHANNELS];
        let mut tempo = sequence.tempo_mbpm;
        for event in &sequence.events[..index] {
            match event.event {
                SequenceEvent::Midi(message) => apply_controller(&mut channels, message),
                SequenceEvent::Tempo(us_per_quarter) => tempo = tempo_to_mbpm(us_per_quarter),
            }
        }

        self.channels = channels;
        self.sequence_tempo = tempo;
        self.next_event = index;
        self.position_us = target_us;
        self.position_ticks()
    }

    /// Advance by `elapsed_us` of wall time, dispatching due events.
    ///
    /// Returns true exactly once, when the end of the content is passed.
    pub fn advance(&mut self, elapsed_us: f64, voices: &mut VoicePool, bank: &Soundbank) -> bool {
        if !self.playing || self.duration_ticks().is_none() {
            return false;
        }
        let speed = self.rate as f64 / DEFAULT_RATE as f64 * self.tempo_scale;
        self.position_us += elapsed_us * speed;

        let (duration_us, due) = match self.sequence.as_ref() {
            Some(sequence) => {
                let end = sequence.seek_index(self.position_us as u64 + 1);
                let due: Vec<SequenceEvent> = sequence.events[self.next_event..end.max(self.next_event)]
                    .iter()
                    .map(|event| event.event)
                    .collect();
                self.next_event = end.max(self.next_event);
                (sequence.duration_us as f64, due)
            }
            None => return false,
        };

        for event in due {
            match event {
                SequenceEvent::Midi(message) => self.apply(message, voices, bank),
                SequenceEvent::Tempo(us_per_quarter) => {
                    self.sequence_tempo = tempo_to_mbpm(us_per_quarter)
                }
            }
        }

        if self.position_us >= duration_us {
            self.position_us = duration_us;
            self.playing = false;
            voices.release_all(self.id, None);
            return true;
        }
        false
    }

    /// Apply a channel message immediately.
    pub fn apply(&mut self, message: MidiMessage, voices: &mut VoicePool, bank: &Soundbank) {
        match message {
            MidiMessage::NoteOn {
                channel,
                key,
                velocity,
            } => {
                let percussive = channel == PERCUSSION_CHANNEL;
                let waveform = if percussive {
                    Waveform::Noise
                } else {
                    bank.instrument(self.channels[channel as usize].program).waveform
                };
                voices.note_on(NoteSpec {
                    track: self.id,
                    channel,
                    key,
                    velocity,
                    waveform,
                    percussive,
                });
            }
            MidiMessage::NoteOff { channel, key } => voices.note_off(self.id, channel, key),
            MidiMessage::ControlChange {
                channel,
                controller: CC_ALL_SOUND_OFF | CC_ALL_NOTES_OFF,
                ..
            } => voices.release_all(self.id, Some(channel)),
            other => apply_controller(&mut self.channels, other),
        }
    }

    pub fn channel(&self, channel: u8) -> Option<&ChannelState> {
        self.channels.get(channel as usize)
    }

    /// Gain, pan and detune for voices on `channel`.
    pub fn voice_mix(&self, channel: u8) -> VoiceMix {
        let state = self.channels[(channel as usize) % MIDI_CHANNELS];
        let gain = if self.muted {
            0.0
        } else {
            self.volume as f32 / 100.0
                * state.volume as f32 / 127.0
                * state.expression as f32 / 127.0
        };
        let bend_cents = (state.pitch_bend as f32 - 8192.0) / 8192.0 * 200.0;
        VoiceMix {
            gain,
            pan: (state.pan as f32 - 64.0) / 64.0,
            cents: self.pitch as f32 / 10.0 + bend_cents,
        }
    }

    pub fn volume(&self) -> i32 {
        self.volume
    }

    pub fn set_volume(&mut self, level: i32) -> i32 {
        self.volume = level.clamp(0, 100);
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn rate(&self) -> i32 {
        self.rate
    }

    pub fn set_rate(&mut self, rate: i32) {
        self.rate = rate;
    }

    /// Effective tempo in milli-beats per minute.
    pub fn tempo(&self) -> i32 {
        (self.sequence_tempo as f64 * self.tempo_scale).round() as i32
    }

    pub fn set_tempo(&mut self, tempo: i32) -> i32 {
        self.tempo_scale = tempo as f64 / self.sequence_tempo.max(1) as f64;
        self.tempo()
    }

    pub fn pitch(&self) -> i32 {
        self.pitch
    }

    pub fn set_pitch(&mut self, pitch: i32) {
        self.pitch = pitch;
    }
}

/// Apply the non-note part of a message to the channel table.
fn apply_controller(channels: &mut [ChannelState; MIDI_CHANNELS], message: MidiMessage) {
    let channel = &mut channels[(message.channel() as usize) % MIDI_CHANNELS];
    match message {
        MidiMessage::ControlChange {
            controller, value, ..
        } => match controller {
            CC_BANK_MSB => channel.bank = (value as u16) << 7 | (channel.bank & 0x7F),
            CC_BANK_LSB => channel.bank = (channel.bank & !0x7F) | value as u16,
            CC_VOLUME => channel.volume = value,
            CC_PAN => channel.pan = value,
            CC_EXPRESSION => channel.expression = value,
            CC_RESET_CONTROLLERS => {
                channel.expression = 127;
                channel.pitch_bend = 8192;
            }
            _ => {}
        },
        MidiMessage::ProgramChange { program, .. } => channel.program = program,
        MidiMessage::PitchBend { value, .. } => channel.pitch_bend = value,
        _ => {}
    }
}
