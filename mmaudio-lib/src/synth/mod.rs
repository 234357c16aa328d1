//! Software synthesizer shared by every player of a mixer session.
//!
//! A [`Synth`] owns the voice pool, one [`SynthTrack`] per synthesized
//! player and the registered [`WaveStream`]s. The session's mix callback
//! calls [`Synth::render`] once per block.

mod sequence;
mod smf;
mod soundbank;
mod tone;
mod track;
mod voice;
mod wave;

pub use sequence::{tempo_to_mbpm, MidiMessage, Sequence, SequenceEvent, TimedEvent};
pub use smf::parse_smf;
pub use soundbank::{drum_key_name, Instrument, Soundbank};
pub use tone::{parse_tone_sequence, single_note};
pub use track::{ChannelState, SynthTrack};
pub use voice::{key_frequency, NoteSpec, TrackId, VoiceMix, VoicePool, Waveform};
pub use wave::{decode_wav, DecodedPcm, WaveStream};

use std::sync::Arc;

use log::debug;

use crate::error::{MediaError, Result};
use crate::output::{encode_samples, OutputFormat};

/// Something the mix pass noticed that a player must hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthEvent {
    EndOfMedia { player_id: i64, media_time_ms: i64 },
}

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    at_frame: u64,
    track: TrackId,
    message: MidiMessage,
}

/// Player id of the internal track used for single tone notes.
const TONE_TRACK_PLAYER: i64 = -1;

pub struct Synth {
    format: OutputFormat,
    soundbank: Arc<Soundbank>,
    voices: VoicePool,
    tracks: Vec<SynthTrack>,
    waves: Vec<Arc<WaveStream>>,
    pending: Vec<(TrackId, MidiMessage)>,
    scheduled: Vec<Scheduled>,
    next_track: TrackId,
    frames_rendered: u64,
    scratch: Vec<f32>,
}

impl Synth {
    pub fn new(format: OutputFormat, voices: usize, soundbank: Arc<Soundbank>) -> Self {
        Self {
            voices: VoicePool::new(voices, format.sample_rate),
            format,
            soundbank,
            tracks: Vec::new(),
            waves: Vec::new(),
            pending: Vec::new(),
            scheduled: Vec::new(),
            next_track: 1,
            frames_rendered: 0,
            scratch: Vec::new(),
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn soundbank(&self) -> &Arc<Soundbank> {
        &self.soundbank
    }

    pub fn active_voices(&self) -> usize {
        self.voices.active_count()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn wave_count(&self) -> usize {
        self.waves.len()
    }

    pub fn add_track(&mut self, player_id: i64) -> TrackId {
        let id = self.next_track;
        self.next_track += 1;
        self.tracks.push(SynthTrack::new(id, player_id));
        debug!("synth track {} added for player {}", id, player_id);
        id
    }

    pub fn remove_track(&mut self, id: TrackId) {
        self.voices.kill_track(id);
        self.tracks.retain(|t| t.id != id);
        self.pending.retain(|(track, _)| *track != id);
        self.scheduled.retain(|s| s.track != id);
    }

    pub fn track(&self, id: TrackId) -> Result<&SynthTrack> {
        self.tracks
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| MediaError::InvalidState(format!("no synth track {}", id)))
    }

    pub fn track_mut(&mut self, id: TrackId) -> Result<&mut SynthTrack> {
        self.tracks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| MediaError::InvalidState(format!("no synth track {}", id)))
    }

    pub fn load(&mut self, id: TrackId, sequence: Sequence) -> Result<()> {
        self.voices.kill_track(id);
        self.track_mut(id)?.load(sequence);
        Ok(())
    }

    pub fn set_playing(&mut self, id: TrackId, playing: bool) -> Result<()> {
        let Synth { tracks, voices, .. } = self;
        let track = find(tracks, id)?;
        track.set_playing(playing);
        if !playing {
            voices.release_all(id, None);
        }
        Ok(())
    }

    pub fn set_position_ticks(&mut self, id: TrackId, ticks: i64) -> Result<i64> {
        let Synth { tracks, voices, .. } = self;
        Ok(find(tracks, id)?.set_position_ticks(ticks, voices))
    }

    /// Queue a message for the next mix pass.
    pub fn queue_midi(&mut self, id: TrackId, message: MidiMessage) {
        self.pending.push((id, message));
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Apply every queued message now.
    pub fn flush_pending(&mut self) {
        let Synth {
            tracks,
            voices,
            soundbank,
            pending,
            ..
        } = self;
        for (id, message) in pending.drain(..) {
            if let Ok(track) = find(tracks, id) {
                track.apply(message, voices, soundbank);
            }
        }
    }

    pub fn apply_now(&mut self, id: TrackId, message: MidiMessage) -> Result<()> {
        let Synth {
            tracks,
            voices,
            soundbank,
            ..
        } = self;
        find(tracks, id)?.apply(message, voices, soundbank);
        Ok(())
    }

    /// Apply `message` once `delay_ms` of output has been rendered.
    pub fn schedule(&mut self, id: TrackId, message: MidiMessage, delay_ms: u32) {
        let frames = delay_ms as u64 * self.format.sample_rate as u64 / 1000;
        self.scheduled.push(Scheduled {
            at_frame: self.frames_rendered + frames,
            track: id,
            message,
        });
    }

    /// Internal track that plays single notes outside any player.
    pub fn tone_track(&mut self) -> TrackId {
        match self.tracks.iter().find(|t| t.player_id == TONE_TRACK_PLAYER) {
            Some(track) => track.id,
            None => self.add_track(TONE_TRACK_PLAYER),
        }
    }

    pub fn add_wave(&mut self, wave: Arc<WaveStream>) {
        self.waves.push(wave);
    }

    pub fn remove_wave(&mut self, player_id: i64) {
        self.waves.retain(|w| w.player_id() != player_id);
    }

    /// Render one block of interleaved output bytes.
    ///
    /// Queued messages are applied first, then due scheduled messages,
    /// then tracks advance, and finally voices and waves are summed.
    pub fn render(&mut self, out: &mut [u8]) -> Vec<SynthEvent> {
        let channels = self.format.channels.max(1) as usize;
        let frames = out.len() / self.format.frame_bytes().max(1);
        self.scratch.clear();
        self.scratch.resize(frames * channels, 0.0);

        self.flush_pending();

        let block_end = self.frames_rendered + frames as u64;
        let (due, later): (Vec<Scheduled>, Vec<Scheduled>) = self
            .scheduled
            .drain(..)
            .partition(|s| s.at_frame < block_end);
        self.scheduled = later;
        for scheduled in due {
            if let Err(err) = self.apply_now(scheduled.track, scheduled.message) {
                debug!("scheduled {:?} dropped: {}", scheduled.message, err);
            }
        }

        let Synth {
            tracks,
            voices,
            soundbank,
            waves,
            scratch,
            format,
            ..
        } = self;
        let elapsed_us = frames as f64 * 1_000_000.0 / format.sample_rate.max(1) as f64;
        let mut events = Vec::new();
        for track in tracks.iter_mut() {
            if track.advance(elapsed_us, voices, soundbank) {
                events.push(SynthEvent::EndOfMedia {
                    player_id: track.player_id,
                    media_time_ms: track.position_ticks() / crate::constants::ENGINE_TICKS_PER_MS,
                });
            }
        }

        let tracks = &*tracks;
        voices.render(scratch, channels, |id, channel| {
            tracks
                .iter()
                .find(|t| t.id == id)
                .map(|t| t.voice_mix(channel))
                .unwrap_or(VoiceMix {
                    gain: 0.0,
                    pan: 0.0,
                    cents: 0.0,
                })
        });

        for wave in waves.iter() {
            if let Some(media_time_ms) = wave.mix_into(scratch, channels, format.sample_rate) {
                events.push(SynthEvent::EndOfMedia {
                    player_id: wave.player_id(),
                    media_time_ms,
                });
            }
        }

        for sample in scratch.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        encode_samples(scratch, format.bits, out);
        self.frames_rendered = block_end;
        events
    }
}

fn find(tracks: &mut [SynthTrack], id: TrackId) -> Result<&mut SynthTrack> {
    tracks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| MediaError::InvalidState(format!("no synth track {}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> OutputFormat {
        OutputFormat {
            sample_rate: 8000,
            channels: 1,
            bits: 16,
            block_samples: 80,
        }
    }

    fn synth() -> Synth {
        Synth::new(format(), 8, Arc::new(Soundbank::builtin()))
    }

    fn block() -> Vec<u8> {
        vec![0u8; format().block_bytes()]
    }

    #[test]
    fn silent_synth_renders_zeroes() {
        let mut synth = synth();
        let mut out = vec![0xAAu8; 160];
        assert!(synth.render(&mut out).is_empty());
        assert!(out.iter().all(|b| *b == 0));
    }

    #[test]
    fn queued_midi_is_applied_on_the_next_block() {
        let mut synth = synth();
        let track = synth.add_track(3);
        synth.queue_midi(
            track,
            MidiMessage::NoteOn {
                channel: 0,
                key: 69,
                velocity: 127,
            },
        );
        assert!(synth.has_pending());
        assert_eq!(synth.active_voices(), 0);

        let mut out = block();
        synth.render(&mut out);
        assert!(!synth.has_pending());
        assert_eq!(synth.active_voices(), 1);
        assert!(out.iter().any(|b| *b != 0));
    }

    #[test]
    fn sequence_end_is_reported_with_media_time() {
        let mut synth = synth();
        let track = synth.add_track(42);
        synth
            .load(
                track,
                Sequence {
                    duration_us: 15_000,
                    events: vec![TimedEvent {
                        at_us: 0,
                        event: SequenceEvent::Midi(MidiMessage::ProgramChange {
                            channel: 0,
                            program: 1,
                        }),
                    }],
                    ..Sequence::default()
                },
            )
            .unwrap();
        synth.set_playing(track, true).unwrap();

        // 80 frames at 8 kHz is 10 ms per block.
        let mut out = block();
        assert!(synth.render(&mut out).is_empty());
        assert_eq!(
            synth.render(&mut out),
            vec![SynthEvent::EndOfMedia {
                player_id: 42,
                media_time_ms: 15
            }]
        );
        assert!(synth.render(&mut out).is_empty());
    }

    #[test]
    fn scheduled_note_off_releases_the_tone_track() {
        let mut synth = synth();
        let track = synth.tone_track();
        assert_eq!(synth.tone_track(), track);
        synth
            .apply_now(
                track,
                MidiMessage::NoteOn {
                    channel: 5,
                    key: 60,
                    velocity: 100,
                },
            )
            .unwrap();
        synth.schedule(track, MidiMessage::NoteOff { channel: 5, key: 60 }, 20);

        let mut out = block();
        for _ in 0..2 {
            synth.render(&mut out);
        }
        assert_eq!(synth.active_voices(), 1);
        // Release takes 40 ms after the note-off lands in the third block.
        for _ in 0..8 {
            synth.render(&mut out);
        }
        assert_eq!(synth.active_voices(), 0);
    }

    #[test]
    fn waves_are_mixed_and_removed_by_player() {
        let mut synth = synth();
        let wave = Arc::new(WaveStream::new(
            9,
            DecodedPcm {
                format: format().pcm(),
                samples: vec![0.25; 800],
            },
        ));
        wave.start();
        synth.add_wave(wave.clone());
        let mut out = block();
        synth.render(&mut out);
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), (0.25 * i16::MAX as f32) as i16);
        assert_eq!(wave.time_ms(), 10);

        synth.remove_wave(9);
        assert_eq!(synth.wave_count(), 0);
    }

    #[test]
    fn removed_tracks_reject_operations() {
        let mut synth = synth();
        let track = synth.add_track(1);
        synth.remove_track(track);
        assert!(matches!(
            synth.set_playing(track, true),
            Err(MediaError::InvalidState(_))
        ));
    }

    #[test]
    fn scheduled_message_for_a_missing_track_is_skipped() {
        let mut synth = synth();
        let track = synth.tone_track();
        synth
            .apply_now(
                track,
                MidiMessage::NoteOn {
                    channel: 0,
                    key: 64,
                    velocity: 100,
                },
            )
            .unwrap();
        synth.schedule(track + 100, MidiMessage::NoteOff { channel: 0, key: 64 }, 0);
        synth.schedule(track, MidiMessage::NoteOff { channel: 0, key: 64 }, 0);

        let mut out = block();
        for _ in 0..6 {
            synth.render(&mut out);
        }
        assert_eq!(synth.active_voices(), 0);
    }
}
