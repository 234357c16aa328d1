//! Volume, rate, tempo, pitch, metadata, MIDI and tone controls.
//!
//! Every control checks the player's capability set first and reports
//! `Unsupported` for media types that lack it.

use std::sync::Arc;

use crate::constants::{
    DEFAULT_TEMPO, DRUM_BANK, MAX_METADATA_KEYS, MAX_PITCH, MAX_RATE, MAX_TEMPO, MIDI_CHANNELS,
    MIN_PITCH, MIN_RATE, MIN_TEMPO,
};
use crate::error::{MediaError, Result};
use crate::media::Control;
use crate::synth::{drum_key_name, parse_tone_sequence, MidiMessage, Soundbank, SynthTrack};

use super::{Player, PlayerState};

const DRUM_KIT_NAME: &str = "Standard Drum Kit";

fn midi_channel(channel: i32) -> Result<u8> {
    u8::try_from(channel)
        .ok()
        .filter(|c| (*c as usize) < MIDI_CHANNELS)
        .ok_or_else(|| MediaError::InvalidArgument(format!("MIDI channel {} out of range", channel)))
}

fn data_byte(value: i32, what: &str) -> Result<u8> {
    u8::try_from(value)
        .ok()
        .filter(|v| *v <= 127)
        .ok_or_else(|| MediaError::InvalidArgument(format!("{} {} out of range", what, value)))
}

impl Player {
    /// Apply `f` to this player's synth track, if it has one.
    fn update_track<R>(&self, f: impl FnOnce(&mut SynthTrack) -> R) -> Result<Option<R>> {
        let Some(track) = self.track else {
            return Ok(None);
        };
        let result = self
            .mixer()?
            .with_synth(|synth| synth.track_mut(track).map(f))?;
        Ok(Some(result))
    }

    fn read_track<R>(&self, f: impl FnOnce(&SynthTrack) -> R) -> Result<Option<R>> {
        let Some(track) = self.track else {
            return Ok(None);
        };
        let result = self.mixer()?.with_synth(|synth| synth.track(track).map(f))?;
        Ok(Some(result))
    }

    pub fn get_volume(&self) -> Result<i32> {
        self.ensure_open()?;
        self.require(Control::Volume, "get_volume")?;
        Ok(self.settings.volume)
    }

    /// Set the level, clamped to 0..=100, and return it.
    pub fn set_volume(&mut self, level: i32) -> Result<i32> {
        self.ensure_open()?;
        self.require(Control::Volume, "set_volume")?;
        let level = level.clamp(0, 100);
        self.settings.volume = level;
        if let Some(wave) = &self.wave {
            wave.set_volume(level);
        }
        self.update_track(|t| t.set_volume(level))?;
        Ok(level)
    }

    pub fn is_muted(&self) -> Result<bool> {
        self.ensure_open()?;
        self.require(Control::Volume, "is_muted")?;
        Ok(self.settings.muted)
    }

    pub fn set_mute(&mut self, muted: bool) -> Result<()> {
        self.ensure_open()?;
        self.require(Control::Volume, "set_mute")?;
        self.settings.muted = muted;
        if let Some(wave) = &self.wave {
            wave.set_muted(muted);
        }
        self.update_track(|t| t.set_muted(muted))?;
        Ok(())
    }

    pub fn min_rate(&self) -> Result<i32> {
        self.require(Control::Rate, "min_rate")?;
        Ok(MIN_RATE)
    }

    pub fn max_rate(&self) -> Result<i32> {
        self.require(Control::Rate, "max_rate")?;
        Ok(MAX_RATE)
    }

    pub fn get_rate(&self) -> Result<i32> {
        self.ensure_open()?;
        self.require(Control::Rate, "get_rate")?;
        Ok(self.settings.rate)
    }

    /// Set the playback rate in milli-percent and return the rate applied.
    pub fn set_rate(&mut self, rate: i32) -> Result<i32> {
        self.ensure_open()?;
        self.require(Control::Rate, "set_rate")?;
        let rate = rate.clamp(MIN_RATE, MAX_RATE);
        self.settings.rate = rate;
        if let Some(wave) = &self.wave {
            wave.set_rate(rate);
        }
        self.update_track(|t| t.set_rate(rate))?;
        Ok(rate)
    }

    /// Tempo in milli-beats per minute.
    pub fn get_tempo(&self) -> Result<i32> {
        self.ensure_open()?;
        self.require(Control::Tempo, "get_tempo")?;
        if self.loaded {
            if let Some(tempo) = self.read_track(SynthTrack::tempo)? {
                return Ok(tempo);
            }
        }
        Ok(self.settings.tempo.unwrap_or(DEFAULT_TEMPO))
    }

    pub fn set_tempo(&mut self, tempo: i32) -> Result<i32> {
        self.ensure_open()?;
        self.require(Control::Tempo, "set_tempo")?;
        let tempo = tempo.clamp(MIN_TEMPO, MAX_TEMPO);
        self.settings.tempo = Some(tempo);
        if self.loaded {
            if let Some(applied) = self.update_track(|t| t.set_tempo(tempo))? {
                return Ok(applied);
            }
        }
        Ok(tempo)
    }

    pub fn min_pitch(&self) -> Result<i32> {
        self.require(Control::Pitch, "min_pitch")?;
        Ok(MIN_PITCH)
    }

    pub fn max_pitch(&self) -> Result<i32> {
        self.require(Control::Pitch, "max_pitch")?;
        Ok(MAX_PITCH)
    }

    /// Transposition in milli-semitones.
    pub fn get_pitch(&self) -> Result<i32> {
        self.ensure_open()?;
        self.require(Control::Pitch, "get_pitch")?;
        Ok(self.settings.pitch)
    }

    pub fn set_pitch(&mut self, pitch: i32) -> Result<i32> {
        self.ensure_open()?;
        self.require(Control::Pitch, "set_pitch")?;
        let pitch = pitch.clamp(MIN_PITCH, MAX_PITCH);
        self.settings.pitch = pitch;
        self.update_track(|t| t.set_pitch(pitch))?;
        Ok(pitch)
    }

    pub fn metadata_key_count(&self) -> Result<usize> {
        self.ensure_open()?;
        self.require(Control::Metadata, "metadata_key_count")?;
        Ok(self.metadata.len().min(MAX_METADATA_KEYS))
    }

    /// Metadata key at `index`.
    ///
    /// Indexes past the key table (64 entries) fail outright; indexes past
    /// the keys of this content are invalid arguments.
    pub fn metadata_key(&self, index: i32) -> Result<String> {
        let count = self.metadata_key_count()?;
        let index = usize::try_from(index)
            .map_err(|_| MediaError::InvalidArgument(format!("metadata index {}", index)))?;
        if index >= MAX_METADATA_KEYS {
            return Err(MediaError::Fail(format!(
                "metadata index {} beyond key table",
                index
            )));
        }
        if index >= count {
            return Err(MediaError::InvalidArgument(format!(
                "metadata index {} of {} keys",
                index, count
            )));
        }
        Ok(self.metadata[index].0.clone())
    }

    pub fn metadata_value(&self, key: &str) -> Result<Option<String>> {
        self.metadata_key_count()?;
        Ok(self
            .metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone()))
    }

    fn send_midi(&self, messages: &[MidiMessage]) -> Result<()> {
        self.mixer()?.send_midi(self.track_id()?, messages)
    }

    /// Current CC7 volume of a channel, after applying queued events.
    pub fn get_channel_volume(&self, channel: i32) -> Result<i32> {
        self.ensure_open()?;
        self.require(Control::Midi, "get_channel_volume")?;
        let channel = midi_channel(channel)?;
        self.mixer()?.flush_delayed_midi()?;
        let volume = self.read_track(|t| t.channel(channel).map(|c| c.volume as i32))?;
        Ok(volume.flatten().unwrap_or(-1))
    }

    pub fn set_channel_volume(&self, channel: i32, volume: i32) -> Result<()> {
        self.ensure_open()?;
        self.require(Control::Midi, "set_channel_volume")?;
        let channel = midi_channel(channel)?;
        let value = data_byte(volume, "channel volume")?;
        self.send_midi(&[MidiMessage::ControlChange {
            channel,
            controller: 7,
            value,
        }])
    }

    /// Select a program. A bank of -1 keeps the channel's bank.
    pub fn set_program(&self, channel: i32, bank: i32, program: i32) -> Result<()> {
        self.ensure_open()?;
        self.require(Control::Midi, "set_program")?;
        let channel = midi_channel(channel)?;
        let program = data_byte(program, "program")?;
        let mut messages = Vec::with_capacity(3);
        if bank != -1 {
            if !(0..=0x3FFF).contains(&bank) {
                return Err(MediaError::InvalidArgument(format!("bank {} out of range", bank)));
            }
            messages.push(MidiMessage::ControlChange {
                channel,
                controller: 0,
                value: (bank >> 7) as u8,
            });
            messages.push(MidiMessage::ControlChange {
                channel,
                controller: 32,
                value: (bank & 0x7F) as u8,
            });
        }
        messages.push(MidiMessage::ProgramChange { channel, program });
        self.send_midi(&messages)
    }

    /// `(bank, program)` of a channel.
    pub fn get_program(&self, channel: i32) -> Result<(i32, i32)> {
        self.ensure_open()?;
        self.require(Control::Midi, "get_program")?;
        let channel = midi_channel(channel)?;
        self.mixer()?.flush_delayed_midi()?;
        let state = self
            .read_track(|t| t.channel(channel).copied())?
            .flatten()
            .unwrap_or_default();
        Ok((state.bank as i32, state.program as i32))
    }

    /// Send one channel message.
    pub fn short_midi_event(&self, status: i32, data1: i32, data2: i32) -> Result<()> {
        self.ensure_open()?;
        self.require(Control::Midi, "short_midi_event")?;
        let status = u8::try_from(status)
            .ok()
            .filter(|s| (0x80..0xF0).contains(s))
            .ok_or_else(|| MediaError::InvalidArgument(format!("MIDI status {:#x}", status)))?;
        let message = MidiMessage::from_bytes(
            status,
            data_byte(data1, "MIDI data")?,
            data_byte(data2, "MIDI data")?,
        )
        .ok_or_else(|| MediaError::InvalidArgument(format!("MIDI status {:#x}", status)))?;
        self.send_midi(&[message])
    }

    /// Send a run of raw MIDI bytes and return how many were consumed.
    ///
    /// Running status is honored. System exclusive and other system
    /// messages are skipped. A trailing incomplete message is left
    /// unconsumed.
    pub fn long_midi_event(&self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        self.require(Control::Midi, "long_midi_event")?;
        let mut messages = Vec::new();
        let mut running: Option<u8> = None;
        let mut i = 0;
        while i < data.len() {
            let byte = data[i];
            if byte == 0xF0 {
                running = None;
                i = match data[i..].iter().position(|b| *b == 0xF7) {
                    Some(end) => i + end + 1,
                    None => data.len(),
                };
                continue;
            }
            if byte >= 0xF0 {
                if byte < 0xF8 {
                    running = None;
                }
                i += 1;
                continue;
            }
            let (status, start) = if byte & 0x80 != 0 {
                (byte, i + 1)
            } else {
                match running {
                    Some(status) => (status, i),
                    None => {
                        i += 1;
                        continue;
                    }
                }
            };
            let len = MidiMessage::data_len(status);
            if start + len > data.len() {
                break;
            }
            let data2 = if len == 2 { data[start + 1] } else { 0 };
            if let Some(message) = MidiMessage::from_bytes(status, data[start], data2) {
                messages.push(message);
            }
            running = Some(status);
            i = start + len;
        }
        if !messages.is_empty() {
            self.send_midi(&messages)?;
        }
        Ok(i)
    }

    pub fn is_bank_query_supported(&self) -> Result<bool> {
        self.require(Control::Midi, "is_bank_query_supported")?;
        Ok(true)
    }

    fn soundbank(&self) -> Result<Arc<Soundbank>> {
        Ok(self.mixer()?.with_synth(|synth| synth.soundbank().clone()))
    }

    /// Installed banks. The engine has no custom banks.
    pub fn get_bank_list(&self, custom: bool) -> Result<Vec<i32>> {
        self.ensure_open()?;
        self.require(Control::Midi, "get_bank_list")?;
        Ok(if custom { Vec::new() } else { vec![0, DRUM_BANK] })
    }

    pub fn get_program_list(&self, bank: i32) -> Result<Vec<i32>> {
        self.ensure_open()?;
        self.require(Control::Midi, "get_program_list")?;
        match bank {
            0 => Ok((0..self.soundbank()?.program_count() as i32).collect()),
            DRUM_BANK => Ok(vec![0]),
            _ => Err(MediaError::InvalidArgument(format!("unknown bank {}", bank))),
        }
    }

    pub fn get_program_name(&self, bank: i32, program: i32) -> Result<String> {
        self.ensure_open()?;
        self.require(Control::Midi, "get_program_name")?;
        let program = data_byte(program, "program")?;
        match bank {
            DRUM_BANK if program == 0 => Ok(DRUM_KIT_NAME.to_string()),
            0 => self
                .soundbank()?
                .program_name(program)
                .map(str::to_string)
                .ok_or_else(|| MediaError::InvalidArgument(format!("no program {}", program))),
            _ => Err(MediaError::InvalidArgument(format!(
                "no program {} in bank {}",
                program, bank
            ))),
        }
    }

    /// Name of a percussion key; melodic banks have no key names.
    pub fn get_key_name(&self, bank: i32, program: i32, key: i32) -> Result<Option<String>> {
        self.ensure_open()?;
        self.require(Control::Midi, "get_key_name")?;
        data_byte(program, "program")?;
        let key = data_byte(key, "key")?;
        Ok(match bank {
            DRUM_BANK => drum_key_name(key).map(str::to_string),
            _ => None,
        })
    }

    /// Replace the tone sequence of a tone player that is not prefetched.
    pub fn set_tone_sequence(&mut self, sequence: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.require(Control::Tone, "set_tone_sequence")?;
        if matches!(self.state, PlayerState::Prefetched | PlayerState::Started) {
            return Err(MediaError::InvalidState(
                "tone sequence cannot change after prefetch".to_string(),
            ));
        }
        parse_tone_sequence(sequence)
            .map_err(|err| MediaError::InvalidArgument(err.to_string()))?;
        self.buffer.replace(sequence)?;
        self.eof = true;
        self.on_content_complete();
        Ok(())
    }
}
