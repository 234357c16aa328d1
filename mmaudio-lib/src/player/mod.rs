//! Player lifecycle for one piece of media.
//!
//! A player moves through `Unrealized -> Realized -> Prefetched -> Started`
//! and ends in `Closed`. Synthesized types own a track on their session's
//! synthesizer, sampled types own a wave stream once prefetched.
//!
//! Operations never emit notifications themselves: they queue them and the
//! owner drains the queue with [`Player::take_notifications`] after
//! releasing the player lock.

mod controls;
mod realize;
mod transport;

pub use realize::RealizeTicket;

use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;

use crate::buffering::{
    detect_sp_midi, java_buffer_size, wav_format, BufferingMonitor, BufferingState, DataReport,
    StreamBuffer,
};
use crate::constants::{DEFAULT_PACKET_SIZE, DEFAULT_RATE, SPMIDI_SEARCH_LIMIT};
use crate::error::{MediaError, Result};
use crate::events::{MediaEvent, Notification, Status};
use crate::media::{Capabilities, Control, MediaType};
use crate::session::{SessionHandle, SessionMixer, SessionPool};
use crate::synth::{TrackId, WaveStream};

use realize::RealizeSignal;

/// Lifecycle state of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlayerState {
    Unrealized,
    Realized,
    Prefetched,
    Started,
    Closed,
}

/// Control values remembered while no content is attached.
#[derive(Debug, Clone, Copy)]
struct Settings {
    volume: i32,
    muted: bool,
    rate: i32,
    /// `None` keeps the tempo of the content.
    tempo: Option<i32>,
    pitch: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volume: 100,
            muted: false,
            rate: DEFAULT_RATE,
            tempo: None,
            pitch: 0,
        }
    }
}

pub struct Player {
    app_id: i32,
    player_id: i64,
    media_type: MediaType,
    capabilities: Capabilities,
    state: PlayerState,
    pool: Arc<SessionPool>,
    session: Option<SessionHandle>,
    mixer: Option<Arc<SessionMixer>>,
    device_status: Status,
    buffer: StreamBuffer,
    stream_length: Option<u64>,
    need_process_header: bool,
    eof: bool,
    monitor: Option<BufferingMonitor>,
    track: Option<TrackId>,
    wave: Option<Arc<WaveStream>>,
    loaded: bool,
    saved_position: Option<i64>,
    settings: Settings,
    metadata: Vec<(String, String)>,
    realize: Arc<RealizeSignal>,
    outbox: Vec<Notification>,
}

impl Player {
    /// Create a player and attach it to its application's session.
    ///
    /// A session without an output device still yields a player; its
    /// [`device_status`](Self::device_status) is `NoAudioDevice` and the
    /// transport operations report that code. Any other failure releases
    /// everything acquired so far.
    pub fn create(
        pool: Arc<SessionPool>,
        app_id: i32,
        player_id: i64,
        media_type: MediaType,
        declared_length: Option<u64>,
    ) -> Result<Self> {
        let attachment = pool.acquire(app_id)?;
        let (initial, _) = java_buffer_size(declared_length, media_type.is_device());
        let buffer = match StreamBuffer::allocate(initial, pool.config().max_buffer_bytes) {
            Ok(buffer) => buffer,
            Err(err) => {
                pool.release(attachment.handle)?;
                return Err(err);
            }
        };

        let track = if media_type.is_synthesized() {
            Some(attachment.mixer.with_synth(|synth| synth.add_track(player_id)))
        } else {
            None
        };

        let mut player = Self {
            app_id,
            player_id,
            media_type,
            capabilities: media_type.capabilities(),
            state: PlayerState::Unrealized,
            pool,
            session: Some(attachment.handle),
            mixer: Some(attachment.mixer),
            device_status: attachment.status,
            buffer,
            stream_length: declared_length.filter(|len| *len > 0),
            need_process_header: media_type == MediaType::Midi,
            eof: false,
            monitor: None,
            track,
            wave: None,
            loaded: false,
            saved_position: None,
            settings: Settings::default(),
            metadata: Vec::new(),
            realize: Arc::new(RealizeSignal::default()),
            outbox: Vec::new(),
        };
        if let Some(length) = player.stream_length.filter(|_| !media_type.is_device()) {
            player.notify(MediaEvent::DataRequest, length as i64);
        }
        info!(
            "player {} of app {} created as {} ({:?})",
            player_id, app_id, media_type, player.device_status
        );
        Ok(player)
    }

    pub fn app_id(&self) -> i32 {
        self.app_id
    }

    pub fn player_id(&self) -> i64 {
        self.player_id
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// `Ok`, or `NoAudioDevice` when the session has no output channel.
    pub fn device_status(&self) -> Status {
        self.device_status
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stream_length(&self) -> Option<u64> {
        self.stream_length
    }

    /// Continuation that completes once the content is fully buffered.
    pub fn realize_ticket(&self) -> RealizeTicket {
        RealizeTicket::new(self.realize.clone(), self.pool.config().realize_timeout())
    }

    /// Queued notifications, oldest first.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.outbox)
    }

    fn notify(&mut self, event: MediaEvent, payload: i64) {
        self.outbox
            .push(Notification::new(self.app_id, self.player_id, event, payload));
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == PlayerState::Closed {
            return Err(MediaError::InvalidState(format!(
                "player {} is closed",
                self.player_id
            )));
        }
        Ok(())
    }

    fn require(&self, control: Control, op: &'static str) -> Result<()> {
        if self.capabilities.supports(control) {
            Ok(())
        } else {
            Err(MediaError::Unsupported {
                op,
                media: self.media_type,
            })
        }
    }

    fn mixer(&self) -> Result<&Arc<SessionMixer>> {
        self.mixer
            .as_ref()
            .ok_or_else(|| MediaError::InvalidState("player has no session".to_string()))
    }

    fn track_id(&self) -> Result<TrackId> {
        self.track
            .ok_or_else(|| MediaError::InvalidState("player has no synth track".to_string()))
    }

    fn content_complete(&self) -> bool {
        self.eof
            || self
                .stream_length
                .map_or(false, |len| self.buffer.len() as u64 >= len)
    }

    /// Initial buffer size and download request size.
    pub fn java_buffer_size(&self) -> (usize, usize) {
        java_buffer_size(self.stream_length, self.media_type.is_device())
    }

    /// Accept downloaded content. `None` marks the end of the stream.
    pub fn submit_data(&mut self, bytes: Option<&[u8]>) -> Result<DataReport> {
        self.ensure_open()?;
        let Some(bytes) = bytes else {
            self.eof = true;
            self.process_header();
            self.on_content_complete();
            return Ok(DataReport::finished(self.buffering_state()));
        };

        let consumed = self.buffer.append(bytes)?;
        if self.need_process_header && self.buffer.len() >= SPMIDI_SEARCH_LIMIT {
            self.process_header();
        }
        if self.monitor.is_none() && self.media_type == MediaType::Pcm {
            self.monitor = wav_format(self.buffer.as_slice()).map(BufferingMonitor::new);
        }
        let buffered = self.buffer.len();
        let buffering = match self.monitor.as_mut() {
            Some(monitor) => monitor.update(buffered),
            None => BufferingState::Buffering,
        };

        let complete = self.content_complete();
        if complete {
            self.on_content_complete();
        }
        Ok(DataReport {
            consumed,
            need_more_data: !complete,
            min_next_chunk: if complete { 0 } else { DEFAULT_PACKET_SIZE },
            buffering,
        })
    }

    fn buffering_state(&self) -> BufferingState {
        self.monitor
            .as_ref()
            .map(BufferingMonitor::state)
            .unwrap_or_default()
    }

    /// Look for the SP-MIDI signature once.
    fn process_header(&mut self) {
        if !self.need_process_header {
            return;
        }
        self.need_process_header = false;
        if self.media_type == MediaType::Midi && detect_sp_midi(self.buffer.as_slice()) {
            debug!("player {} upgraded to SP-MIDI", self.player_id);
            self.media_type = MediaType::SpMidi;
        }
    }

    fn on_content_complete(&mut self) {
        if self.state == PlayerState::Unrealized {
            self.state = PlayerState::Realized;
            debug!(
                "player {} realized with {} bytes",
                self.player_id,
                self.buffer.len()
            );
        }
        self.realize.signal(true);
    }

    /// Move an unrealized player to `Realized`.
    ///
    /// Device players need no content. Other players realize once their
    /// content is complete.
    pub fn realize(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state != PlayerState::Unrealized {
            return Ok(());
        }
        if !self.media_type.is_device() && !self.content_complete() {
            return Err(MediaError::InvalidState(format!(
                "player {} has incomplete content ({} bytes)",
                self.player_id,
                self.buffer.len()
            )));
        }
        self.state = PlayerState::Realized;
        self.realize.signal(true);
        Ok(())
    }

    /// Free the content buffer and any decoded stream.
    pub fn clear_buffer(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.buffer.clear();
        if let Some(wave) = self.wave.take() {
            wave.stop();
            self.with_mixer(|mixer| mixer.with_synth(|synth| synth.remove_wave(wave.player_id())));
            self.loaded = false;
            if matches!(self.state, PlayerState::Prefetched | PlayerState::Started) {
                self.state = PlayerState::Realized;
            }
        }
        Ok(())
    }

    fn with_mixer(&self, f: impl FnOnce(&SessionMixer)) {
        if let Some(mixer) = self.mixer.as_ref() {
            f(mixer);
        }
    }

    /// Release everything the player owns. A closed player ignores this.
    ///
    /// Returns whether this call closed the player.
    pub fn destroy(&mut self) -> bool {
        if self.state == PlayerState::Closed {
            return false;
        }
        if let Some(wave) = self.wave.take() {
            wave.stop();
            self.with_mixer(|mixer| mixer.with_synth(|synth| synth.remove_wave(wave.player_id())));
        }
        if let Some(track) = self.track.take() {
            self.with_mixer(|mixer| mixer.with_synth(|synth| synth.remove_track(track)));
        }
        self.buffer.clear();
        self.mixer = None;
        if let Some(handle) = self.session.take() {
            if let Err(err) = self.pool.release(handle) {
                warn!("player {} session release failed: {}", self.player_id, err);
            }
        }
        self.state = PlayerState::Closed;
        self.loaded = false;
        self.realize.signal(false);
        self.notify(MediaEvent::DestroyFinished, 0);
        info!("player {} of app {} destroyed", self.player_id, self.app_id);
        true
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if self.state != PlayerState::Closed {
            self.destroy();
        }
    }
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::events::EventSink;
    use crate::output::{ManualBackend, NullBackend};
    use crate::test_data::{midi_melody, sine_wav, tone_melody};

    pub(crate) fn pool() -> (Arc<SessionPool>, ManualBackend) {
        pool_with_events(EventSink::default())
    }

    /// 8 kHz mono output with 10 ms mix periods.
    pub(crate) fn pool_with_events(events: EventSink) -> (Arc<SessionPool>, ManualBackend) {
        let backend = ManualBackend::new();
        let config = EngineConfig {
            output_rate: 8000,
            output_channels: 1,
            block_samples: 80,
            realize_timeout_ms: 200,
            ..EngineConfig::default()
        };
        let pool = SessionPool::new(config, Arc::new(backend.clone()), events);
        (Arc::new(pool), backend)
    }

    /// A player whose content has been fully submitted.
    pub(crate) fn loaded(pool: &Arc<SessionPool>, media_type: MediaType, content: &[u8]) -> Player {
        let mut player = Player::create(pool.clone(), 1, 10, media_type, None).unwrap();
        player.submit_data(Some(content)).unwrap();
        player.submit_data(None).unwrap();
        player
    }

    fn events(player: &mut Player) -> Vec<MediaEvent> {
        player
            .take_notifications()
            .into_iter()
            .map(|n| n.event)
            .collect()
    }

    #[test]
    fn declared_length_realizes_when_reached() {
        let (pool, _backend) = pool();
        let content = tone_melody(&[60, 62, 64, 65]);
        let mut player =
            Player::create(pool, 1, 10, MediaType::Tone, Some(content.len() as u64)).unwrap();
        let notes = player.take_notifications();
        assert_eq!(notes[0].event, MediaEvent::DataRequest);
        assert_eq!(notes[0].payload, content.len() as i64);

        let ticket = player.realize_ticket();
        let report = player.submit_data(Some(&content[..4])).unwrap();
        assert_eq!(report.consumed, 4);
        assert!(report.need_more_data);
        assert_eq!(report.min_next_chunk, DEFAULT_PACKET_SIZE);
        assert_eq!(player.state(), PlayerState::Unrealized);
        assert!(!ticket.is_realized());

        let report = player.submit_data(Some(&content[4..])).unwrap();
        assert!(!report.need_more_data);
        assert_eq!(report.min_next_chunk, 0);
        assert_eq!(player.state(), PlayerState::Realized);
        assert!(ticket.wait().is_ok());
    }

    #[test]
    fn end_of_stream_reports_no_more_data() {
        let (pool, _backend) = pool();
        let mut player = Player::create(pool, 1, 10, MediaType::Midi, None).unwrap();
        player
            .submit_data(Some(&midi_melody(&[60], 100, None, false)))
            .unwrap();
        let report = player.submit_data(None).unwrap();
        assert_eq!(report.consumed, 0);
        assert!(!report.need_more_data);
        assert_eq!(report.min_next_chunk, 0);
        assert_eq!(player.state(), PlayerState::Realized);
        assert_eq!(player.media_type(), MediaType::Midi);
    }

    #[test]
    fn sp_midi_header_upgrades_exactly_once() {
        let (pool, _backend) = pool();
        let keys: Vec<u8> = (0..100).map(|i| 40 + (i % 40) as u8).collect();
        let content = midi_melody(&keys, 50, None, true);
        assert!(content.len() > SPMIDI_SEARCH_LIMIT);

        let mut player = Player::create(pool, 1, 10, MediaType::Midi, None).unwrap();
        player.submit_data(Some(&content[..100])).unwrap();
        assert_eq!(player.media_type(), MediaType::Midi);
        player.submit_data(Some(&content[100..])).unwrap();
        assert_eq!(player.media_type(), MediaType::SpMidi);
        assert!(!player.need_process_header);

        player.submit_data(None).unwrap();
        assert_eq!(player.media_type(), MediaType::SpMidi);
        assert_eq!(player.capabilities(), MediaType::Midi.capabilities());
    }

    #[test]
    fn short_sp_midi_file_is_sniffed_at_end_of_stream() {
        let (pool, _backend) = pool();
        let player = loaded(&pool, MediaType::Midi, &midi_melody(&[60], 100, None, true));
        assert_eq!(player.media_type(), MediaType::SpMidi);
    }

    #[test]
    fn pcm_buffering_follows_the_stream_format() {
        let (pool, _backend) = pool();
        let content = sine_wav(8000, 1, 8, 10_000).unwrap();
        let mut player = Player::create(pool, 1, 10, MediaType::Pcm, None).unwrap();

        let report = player.submit_data(Some(&content[..23_999])).unwrap();
        assert_eq!(report.buffering, BufferingState::Buffering);
        let report = player.submit_data(Some(&content[23_999..24_000])).unwrap();
        assert_eq!(report.buffering, BufferingState::Ready);
        let report = player.submit_data(Some(&content[24_000..79_999])).unwrap();
        assert_eq!(report.buffering, BufferingState::Ready);
        let report = player.submit_data(Some(&content[79_999..])).unwrap();
        assert_eq!(report.buffering, BufferingState::Overfull);
    }

    #[test]
    fn buffer_sizes_depend_on_declared_length() {
        let (pool, _backend) = pool();
        let unknown = Player::create(pool.clone(), 1, 10, MediaType::Pcm, None).unwrap();
        assert_eq!(unknown.java_buffer_size(), (100 * 1024, 4096));
        let known = Player::create(pool.clone(), 1, 11, MediaType::Pcm, Some(5000)).unwrap();
        assert_eq!(known.java_buffer_size(), (5000, 5000));
        let device = Player::create(pool, 1, 12, MediaType::DeviceTone, None).unwrap();
        assert_eq!(device.java_buffer_size(), (0, 0));
    }

    #[test]
    fn realize_requires_complete_content_except_for_devices() {
        let (pool, _backend) = pool();
        let mut content = Player::create(pool.clone(), 1, 10, MediaType::Tone, None).unwrap();
        assert!(matches!(content.realize(), Err(MediaError::InvalidState(_))));

        let mut device = Player::create(pool, 1, 11, MediaType::DeviceMidi, None).unwrap();
        device.realize().unwrap();
        assert_eq!(device.state(), PlayerState::Realized);
    }

    #[test]
    fn destroy_releases_everything_once() {
        let (pool, backend) = pool();
        assert_eq!(pool.ref_count(1), None);
        let mut player = loaded(&pool, MediaType::Tone, &tone_melody(&[60]));
        player.start().unwrap();
        assert_eq!(pool.ref_count(1), Some(1));

        assert!(player.destroy());
        assert_eq!(player.state(), PlayerState::Closed);
        assert!(!player.destroy());
        assert_eq!(
            events(&mut player)
                .iter()
                .filter(|e| **e == MediaEvent::DestroyFinished)
                .count(),
            1
        );
        assert_eq!(pool.ref_count(1), None);
        assert_eq!(backend.open_channels(), 0);
        assert!(matches!(player.start(), Err(MediaError::InvalidState(_))));
        assert!(player.stop().is_ok());
    }

    #[test]
    fn dropping_an_open_player_releases_its_session() {
        let (pool, _backend) = pool();
        {
            let _player = Player::create(pool.clone(), 3, 1, MediaType::Pcm, None).unwrap();
            assert_eq!(pool.ref_count(3), Some(1));
        }
        assert_eq!(pool.ref_count(3), None);
    }

    #[test]
    fn failed_creation_leaves_no_session_reference() {
        let (pool, _backend) = pool();
        let config = EngineConfig {
            max_buffer_bytes: 1024,
            ..pool.config().clone()
        };
        let small = Arc::new(SessionPool::new(
            config,
            Arc::new(ManualBackend::new()),
            EventSink::default(),
        ));
        assert!(matches!(
            Player::create(small.clone(), 1, 1, MediaType::Pcm, None),
            Err(MediaError::OutOfMemory(_))
        ));
        assert_eq!(small.live_sessions(), 0);
    }

    #[test]
    fn missing_device_degrades_transport_calls() {
        let pool = Arc::new(SessionPool::new(
            EngineConfig::default(),
            Arc::new(NullBackend),
            EventSink::default(),
        ));
        let mut player = Player::create(pool, 1, 10, MediaType::DeviceTone, None).unwrap();
        assert_eq!(player.device_status(), Status::NoAudioDevice);
        assert!(matches!(player.start(), Err(MediaError::NoAudioDevice)));
        assert!(matches!(player.stop(), Err(MediaError::NoAudioDevice)));
        assert_eq!(player.state(), PlayerState::Unrealized);
        assert_eq!(player.set_volume(40).unwrap(), 40);
    }

    #[test]
    fn clear_buffer_drops_content_and_decoded_stream() {
        let (pool, _backend) = pool();
        let mut player = loaded(&pool, MediaType::Pcm, &sine_wav(8000, 1, 16, 200).unwrap());
        player.acquire_device().unwrap();
        assert!(player.wave.is_some());
        player.clear_buffer().unwrap();
        assert_eq!(player.buffered(), 0);
        assert!(player.wave.is_none());
        assert_eq!(player.state(), PlayerState::Realized);
        assert_eq!(player.mixer.as_ref().unwrap().with_synth(|s| s.wave_count()), 0);
    }
}
