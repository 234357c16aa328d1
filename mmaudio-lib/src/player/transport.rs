//! Prefetch, transport and media time operations for `Player`.

use std::sync::Arc;

use log::{debug, info};

use crate::constants::ENGINE_TICKS_PER_MS;
use crate::error::{MediaError, Result};
use crate::events::{MediaEvent, Status};
use crate::media::MediaType;
use crate::synth::{decode_wav, parse_smf, parse_tone_sequence, Sequence, WaveStream};

use super::{Player, PlayerState};

impl Player {
    /// Transport calls are no-ops on a session without an output device.
    fn ensure_device(&self) -> Result<()> {
        if self.device_status == Status::NoAudioDevice {
            return Err(MediaError::NoAudioDevice);
        }
        Ok(())
    }

    /// Parse or decode the buffered content and attach it to the mixer.
    ///
    /// Moves a realized player to `Prefetched`; an unrealized one is
    /// realized first.
    pub fn acquire_device(&mut self) -> Result<()> {
        self.ensure_open()?;
        match self.state {
            PlayerState::Unrealized => self.realize()?,
            PlayerState::Realized => {}
            _ => return Ok(()),
        }
        match self.media_type {
            MediaType::Amr => {
                return Err(MediaError::Unsupported {
                    op: "acquire_device",
                    media: self.media_type,
                })
            }
            MediaType::Pcm => self.load_wave()?,
            _ => self.load_sequence()?,
        }
        self.loaded = true;
        self.state = PlayerState::Prefetched;
        debug!("player {} prefetched", self.player_id);
        Ok(())
    }

    fn load_sequence(&mut self) -> Result<()> {
        let content = self.buffer.as_slice();
        let sequence = match self.media_type {
            MediaType::DeviceMidi => Sequence::empty(),
            MediaType::DeviceTone if content.is_empty() => Sequence::empty(),
            MediaType::Tone | MediaType::DeviceTone => parse_tone_sequence(content)?,
            _ => parse_smf(content)?,
        };
        self.metadata = sequence.metadata.clone();

        let track = self.track_id()?;
        let settings = self.settings;
        let saved = self.saved_position;
        self.mixer()?.with_synth(|synth| -> Result<()> {
            synth.load(track, sequence)?;
            let state = synth.track_mut(track)?;
            state.set_volume(settings.volume);
            state.set_muted(settings.muted);
            state.set_rate(settings.rate);
            state.set_pitch(settings.pitch);
            if let Some(tempo) = settings.tempo {
                state.set_tempo(tempo);
            }
            if let Some(ms) = saved {
                synth.set_position_ticks(track, ms * ENGINE_TICKS_PER_MS)?;
            }
            Ok(())
        })
    }

    fn load_wave(&mut self) -> Result<()> {
        let pcm = decode_wav(self.buffer.as_slice().to_vec())?;
        let wave = Arc::new(WaveStream::new(self.player_id, pcm));
        wave.set_volume(self.settings.volume);
        wave.set_muted(self.settings.muted);
        wave.set_rate(self.settings.rate);
        if let Some(ms) = self.saved_position {
            wave.set_byte_position(ms as u64 * wave.format().bytes_per_ms());
        }
        debug!(
            "player {} decoded {} ms of {:?}",
            self.player_id,
            wave.duration_ms(),
            wave.format()
        );
        let mixer = self.mixer()?.clone();
        mixer.with_synth(|synth| synth.add_wave(wave.clone()));
        self.wave = Some(wave);
        Ok(())
    }

    /// Detach the content from the mixer, remembering the position.
    pub fn release_device(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !matches!(self.state, PlayerState::Prefetched | PlayerState::Started) {
            return Ok(());
        }
        let position = self.get_time()?;
        self.saved_position = (position >= 0).then_some(position);

        if let Some(wave) = self.wave.take() {
            wave.stop();
            self.mixer()?
                .with_synth(|synth| synth.remove_wave(wave.player_id()));
        }
        if let Some(track) = self.track {
            self.mixer()?.with_synth(|synth| -> Result<()> {
                synth.set_playing(track, false)?;
                synth.track_mut(track)?.unload();
                Ok(())
            })?;
        }
        self.loaded = false;
        self.state = PlayerState::Realized;
        Ok(())
    }

    fn set_transport(&self, playing: bool) -> Result<()> {
        if let Some(wave) = &self.wave {
            if playing {
                wave.start();
            } else {
                wave.stop();
            }
        }
        if let Some(track) = self.track {
            self.mixer()?
                .with_synth(|synth| synth.set_playing(track, playing))?;
        }
        Ok(())
    }

    /// Whether attached content played through to its end.
    fn content_ended(&self) -> bool {
        if !self.loaded {
            return false;
        }
        if let Some(wave) = &self.wave {
            return wave.is_eom();
        }
        match (self.track, self.mixer.as_ref()) {
            (Some(track), Some(mixer)) => mixer.with_synth(|synth| {
                synth.track(track).map_or(false, |t| {
                    !t.is_playing()
                        && t.duration_ticks()
                            .map_or(false, |duration| t.position_ticks() >= duration)
                })
            }),
            _ => false,
        }
    }

    /// A started player whose content ended is back to `Prefetched`.
    pub(crate) fn sync_end_of_media(&mut self) {
        if self.state == PlayerState::Started && self.content_ended() {
            debug!("player {} reached end of media", self.player_id);
            self.state = PlayerState::Prefetched;
        }
    }

    /// Start playback, prefetching first when needed.
    ///
    /// Content that already played to its end restarts from the beginning.
    pub fn start(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.ensure_device()?;
        self.sync_end_of_media();
        if self.state == PlayerState::Started {
            return Ok(());
        }
        self.acquire_device()?;
        if self.content_ended() {
            self.seek(0)?;
        }
        let duration = self.get_duration()?;
        if duration >= 0 {
            self.notify(MediaEvent::DurationUpdated, duration);
        }
        self.set_transport(true)?;
        self.state = PlayerState::Started;
        info!("player {} started", self.player_id);
        Ok(())
    }

    /// Stop playback, keeping the position. Valid in every state.
    pub fn stop(&mut self) -> Result<()> {
        self.halt(MediaEvent::StopFinished)
    }

    pub fn pause(&mut self) -> Result<()> {
        self.halt(MediaEvent::PauseFinished)
    }

    fn halt(&mut self, event: MediaEvent) -> Result<()> {
        if self.state == PlayerState::Closed {
            return Ok(());
        }
        self.ensure_device()?;
        self.sync_end_of_media();
        if self.state == PlayerState::Started {
            self.set_transport(false)?;
            self.state = PlayerState::Prefetched;
            debug!("player {} halted ({:?})", self.player_id, event);
        }
        let time = self.get_time()?;
        self.notify(event, time);
        Ok(())
    }

    /// Continue a paused player.
    pub fn resume(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.ensure_device()?;
        self.sync_end_of_media();
        match self.state {
            PlayerState::Started => Ok(()),
            PlayerState::Prefetched => {
                self.set_transport(true)?;
                self.state = PlayerState::Started;
                Ok(())
            }
            state => Err(MediaError::InvalidState(format!(
                "cannot resume a {:?} player",
                state
            ))),
        }
    }

    /// Media time in milliseconds, -1 when unknown.
    ///
    /// Synthesized content is positioned in engine ticks of 1/10 ms.
    pub fn get_time(&self) -> Result<i64> {
        self.ensure_open()?;
        if !self.loaded {
            return Ok(self.saved_position.unwrap_or(-1));
        }
        if let Some(wave) = &self.wave {
            return Ok(wave.time_ms());
        }
        let track = self.track_id()?;
        let ticks = self
            .mixer()?
            .with_synth(|synth| synth.track(track).map(|t| t.position_ticks()))?;
        Ok(ticks / ENGINE_TICKS_PER_MS)
    }

    /// Seek to `ms` and return the media time actually reached.
    pub fn set_time(&mut self, ms: i64) -> Result<i64> {
        self.ensure_open()?;
        if self.state == PlayerState::Unrealized {
            return Err(MediaError::InvalidState(
                "cannot set the media time of an unrealized player".to_string(),
            ));
        }
        let reached = self.seek(ms.max(0))?;
        self.notify(MediaEvent::SetMediaTimeFinished, reached);
        Ok(reached)
    }

    fn seek(&mut self, ms: i64) -> Result<i64> {
        let reached = if !self.loaded {
            self.saved_position = Some(ms);
            ms
        } else if let Some(wave) = &self.wave {
            let per_ms = wave.format().bytes_per_ms().max(1);
            (wave.set_byte_position(ms as u64 * per_ms) / per_ms) as i64
        } else {
            let track = self.track_id()?;
            let ticks = self
                .mixer()?
                .with_synth(|synth| synth.set_position_ticks(track, ms * ENGINE_TICKS_PER_MS))?;
            ticks / ENGINE_TICKS_PER_MS
        };
        Ok(reached)
    }

    /// Duration in milliseconds, -1 when unknown.
    pub fn get_duration(&self) -> Result<i64> {
        self.ensure_open()?;
        if !self.loaded {
            return Ok(-1);
        }
        if let Some(wave) = &self.wave {
            return Ok(wave.duration_ms());
        }
        let track = self.track_id()?;
        let ticks = self
            .mixer()?
            .with_synth(|synth| synth.track(track).map(|t| t.duration_ticks()))?;
        Ok(ticks.map_or(-1, |ticks| ticks / ENGINE_TICKS_PER_MS))
    }
}
