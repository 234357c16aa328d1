//! Public entry point tying the session pool and players together.
//!
//! Every player lives behind its own mutex. Operations lock one player,
//! collect its queued notifications, unlock and only then dispatch them to
//! the listener, so listeners are free to call back into the manager.
//! End-of-media events raised by the audio callback reach the listener from
//! the event dispatcher thread instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info};
use serde::Serialize;

use crate::buffering::DataReport;
use crate::config::EngineConfig;
use crate::error::{MediaError, Result};
use crate::events::{EventListener, EventSink, Status};
use crate::media::MediaType;
use crate::output::AudioBackend;
use crate::player::{Player, PlayerState, RealizeTicket};
use crate::session::SessionPool;

/// Opaque reference to a player created by [`MediaManager::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PlayerHandle(u64);

impl PlayerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Outcome of [`MediaManager::create`].
pub struct Creation {
    pub handle: PlayerHandle,
    /// `NoAudioDevice` when the player runs without an output channel.
    pub status: Status,
    /// Present when a content length was declared. Completes once that many
    /// bytes have been submitted.
    pub realize: Option<RealizeTicket>,
}

/// A control operation on one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOp {
    Realize,
    AcquireDevice,
    ReleaseDevice,
    Start,
    Stop,
    Pause,
    Resume,
    GetState,
    GetTime,
    SetTime(i64),
    GetDuration,
    ClearBuffer,

    GetVolume,
    SetVolume(i32),
    IsMuted,
    SetMute(bool),

    GetMinRate,
    GetMaxRate,
    GetRate,
    SetRate(i32),
    GetTempo,
    SetTempo(i32),
    GetMinPitch,
    GetMaxPitch,
    GetPitch,
    SetPitch(i32),

    MetadataKeyCount,
    MetadataKey(i32),
    MetadataValue(String),

    GetChannelVolume(i32),
    SetChannelVolume { channel: i32, volume: i32 },
    SetProgram { channel: i32, bank: i32, program: i32 },
    GetProgram(i32),
    ShortMidiEvent { status: i32, data1: i32, data2: i32 },
    LongMidiEvent(Vec<u8>),
    IsBankQuerySupported,
    GetBankList { custom: bool },
    GetProgramList(i32),
    GetProgramName { bank: i32, program: i32 },
    GetKeyName { bank: i32, program: i32, key: i32 },

    SetToneSequence(Vec<u8>),
}

/// Result of a [`ControlOp`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ControlValue {
    Done,
    Int(i64),
    Bool(bool),
    Text(String),
    MaybeText(Option<String>),
    List(Vec<i32>),
    Program { bank: i32, program: i32 },
    State(PlayerState),
}

impl ControlValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }
}

/// Owns every player of one engine instance.
pub struct MediaManager {
    pool: Arc<SessionPool>,
    players: Mutex<HashMap<PlayerHandle, Arc<Mutex<Player>>>>,
    next_handle: AtomicU64,
    events: EventSink,
}

impl MediaManager {
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn AudioBackend>,
        listener: Option<EventListener>,
    ) -> Result<Self> {
        config.validate()?;
        let events = EventSink::new(listener);
        info!(
            "media manager on '{}' backend, {} Hz x{} {}-bit",
            backend.name(),
            config.output_rate,
            config.output_channels,
            config.output_bits
        );
        Ok(Self {
            pool: Arc::new(SessionPool::new(config, backend, events.clone())),
            players: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            events,
        })
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn player_count(&self) -> usize {
        self.players.lock().unwrap().len()
    }

    /// Create a player.
    ///
    /// The media type comes from `hint` when given, otherwise from `uri`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when neither resolves a type, `ConnectionNotFound`
    /// for unknown locators, and any session pool or allocation failure.
    pub fn create(
        &self,
        app_id: i32,
        player_id: i64,
        hint: Option<MediaType>,
        uri: Option<&str>,
        declared_length: Option<u64>,
    ) -> Result<Creation> {
        let resolved = match (hint, uri) {
            (Some(media_type), _) => Some(media_type),
            (None, Some(uri)) => MediaType::from_uri(uri)?,
            (None, None) => None,
        };
        let media_type = resolved.ok_or_else(|| {
            MediaError::InvalidArgument(format!(
                "cannot determine the media type of {}",
                uri.unwrap_or("<no locator>")
            ))
        })?;

        let mut player = Player::create(
            self.pool.clone(),
            app_id,
            player_id,
            media_type,
            declared_length,
        )?;
        let status = player.device_status();
        let realize = player
            .stream_length()
            .filter(|_| !media_type.is_device())
            .map(|_| player.realize_ticket());
        let notifications = player.take_notifications();

        let handle = PlayerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.players
            .lock()
            .unwrap()
            .insert(handle, Arc::new(Mutex::new(player)));
        debug!("player {} of app {} is handle {}", player_id, app_id, handle.0);
        self.events.emit_all(notifications);
        Ok(Creation {
            handle,
            status,
            realize,
        })
    }

    fn player(&self, handle: PlayerHandle) -> Result<Arc<Mutex<Player>>> {
        self.players
            .lock()
            .unwrap()
            .get(&handle)
            .cloned()
            .ok_or_else(|| MediaError::InvalidArgument(format!("unknown player handle {}", handle.0)))
    }

    /// Run `f` on a player and dispatch what it queued once unlocked.
    fn with_player<R>(&self, handle: PlayerHandle, f: impl FnOnce(&mut Player) -> Result<R>) -> Result<R> {
        let player = self.player(handle)?;
        let (result, notifications) = {
            let mut player = player.lock().unwrap();
            player.sync_end_of_media();
            let result = f(&mut player);
            (result, player.take_notifications())
        };
        self.events.emit_all(notifications);
        result
    }

    /// Feed downloaded content. `None` marks the end of the stream.
    pub fn submit_data(&self, handle: PlayerHandle, bytes: Option<&[u8]>) -> Result<DataReport> {
        self.with_player(handle, |player| player.submit_data(bytes))
    }

    /// Initial buffer size and request size for the player's content.
    pub fn buffer_size(&self, handle: PlayerHandle) -> Result<(usize, usize)> {
        self.with_player(handle, |player| Ok(player.java_buffer_size()))
    }

    pub fn state(&self, handle: PlayerHandle) -> Result<PlayerState> {
        self.with_player(handle, |player| Ok(player.state()))
    }

    pub fn media_type(&self, handle: PlayerHandle) -> Result<MediaType> {
        self.with_player(handle, |player| Ok(player.media_type()))
    }

    /// Play a single note on the application's session.
    pub fn play_tone(&self, app_id: i32, note: i32, duration_ms: u32, volume: i32) -> Result<Status> {
        self.pool.play_tone_note(app_id, note, duration_ms, volume)
    }

    pub fn control(&self, handle: PlayerHandle, op: ControlOp) -> Result<ControlValue> {
        self.with_player(handle, |player| dispatch(player, op))
    }

    /// Destroy a player. Unknown or already destroyed handles are ignored.
    pub fn destroy(&self, handle: PlayerHandle) -> Result<()> {
        let removed = self.players.lock().unwrap().remove(&handle);
        let Some(player) = removed else {
            debug!("destroy of unknown handle {} ignored", handle.0);
            return Ok(());
        };
        let notifications = {
            let mut player = player.lock().unwrap();
            player.destroy();
            player.take_notifications()
        };
        self.events.emit_all(notifications);
        Ok(())
    }

    /// Destroy every player of an application.
    pub fn destroy_app(&self, app_id: i32) -> Result<usize> {
        let handles: Vec<PlayerHandle> = self
            .players
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, player)| player.lock().unwrap().app_id() == app_id)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in &handles {
            self.destroy(*handle)?;
        }
        Ok(handles.len())
    }
}

impl Drop for MediaManager {
    fn drop(&mut self) {
        let handles: Vec<PlayerHandle> = self.players.lock().unwrap().keys().copied().collect();
        for handle in handles {
            let _ = self.destroy(handle);
        }
    }
}

fn int(value: impl Into<i64>) -> Result<ControlValue> {
    Ok(ControlValue::Int(value.into()))
}

fn dispatch(player: &mut Player, op: ControlOp) -> Result<ControlValue> {
    use ControlOp::*;

    match op {
        Realize => player.realize().map(|_| ControlValue::Done),
        AcquireDevice => player.acquire_device().map(|_| ControlValue::Done),
        ReleaseDevice => player.release_device().map(|_| ControlValue::Done),
        Start => player.start().map(|_| ControlValue::Done),
        Stop => player.stop().map(|_| ControlValue::Done),
        Pause => player.pause().map(|_| ControlValue::Done),
        Resume => player.resume().map(|_| ControlValue::Done),
        GetState => Ok(ControlValue::State(player.state())),
        GetTime => int(player.get_time()?),
        SetTime(ms) => int(player.set_time(ms)?),
        GetDuration => int(player.get_duration()?),
        ClearBuffer => player.clear_buffer().map(|_| ControlValue::Done),

        GetVolume => int(player.get_volume()?),
        SetVolume(level) => int(player.set_volume(level)?),
        IsMuted => Ok(ControlValue::Bool(player.is_muted()?)),
        SetMute(muted) => player.set_mute(muted).map(|_| ControlValue::Done),

        GetMinRate => int(player.min_rate()?),
        GetMaxRate => int(player.max_rate()?),
        GetRate => int(player.get_rate()?),
        SetRate(rate) => int(player.set_rate(rate)?),
        GetTempo => int(player.get_tempo()?),
        SetTempo(tempo) => int(player.set_tempo(tempo)?),
        GetMinPitch => int(player.min_pitch()?),
        GetMaxPitch => int(player.max_pitch()?),
        GetPitch => int(player.get_pitch()?),
        SetPitch(pitch) => int(player.set_pitch(pitch)?),

        MetadataKeyCount => int(player.metadata_key_count()? as i64),
        MetadataKey(index) => Ok(ControlValue::Text(player.metadata_key(index)?)),
        MetadataValue(key) => Ok(ControlValue::MaybeText(player.metadata_value(&key)?)),

        GetChannelVolume(channel) => int(player.get_channel_volume(channel)?),
        SetChannelVolume { channel, volume } => player
            .set_channel_volume(channel, volume)
            .map(|_| ControlValue::Done),
        SetProgram {
            channel,
            bank,
            program,
        } => player
            .set_program(channel, bank, program)
            .map(|_| ControlValue::Done),
        GetProgram(channel) => {
            let (bank, program) = player.get_program(channel)?;
            Ok(ControlValue::Program { bank, program })
        }
        ShortMidiEvent {
            status,
            data1,
            data2,
        } => player
            .short_midi_event(status, data1, data2)
            .map(|_| ControlValue::Done),
        LongMidiEvent(data) => int(player.long_midi_event(&data)? as i64),
        IsBankQuerySupported => Ok(ControlValue::Bool(player.is_bank_query_supported()?)),
        GetBankList { custom } => Ok(ControlValue::List(player.get_bank_list(custom)?)),
        GetProgramList(bank) => Ok(ControlValue::List(player.get_program_list(bank)?)),
        GetProgramName { bank, program } => {
            Ok(ControlValue::Text(player.get_program_name(bank, program)?))
        }
        GetKeyName { bank, program, key } => Ok(ControlValue::MaybeText(
            player.get_key_name(bank, program, key)?,
        )),

        SetToneSequence(sequence) => player
            .set_tone_sequence(&sequence)
            .map(|_| ControlValue::Done),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::events::{MediaEvent, Notification, Recorder};
    use crate::output::ManualBackend;
    use crate::test_data::{midi_melody, tone_melody};

    const WAIT: Duration = Duration::from_secs(2);

    fn manager(recorder: &Recorder) -> (MediaManager, ManualBackend) {
        let backend = ManualBackend::new();
        let config = EngineConfig {
            output_rate: 8000,
            output_channels: 1,
            block_samples: 80,
            realize_timeout_ms: 100,
            ..EngineConfig::default()
        };
        let manager =
            MediaManager::new(config, Arc::new(backend.clone()), Some(recorder.listener())).unwrap();
        (manager, backend)
    }

    #[test]
    fn media_type_resolution() {
        let recorder = Recorder::new();
        let (manager, _backend) = manager(&recorder);

        let tone = manager.create(1, 1, None, Some("device://tone"), None).unwrap();
        assert_eq!(manager.media_type(tone.handle).unwrap(), MediaType::DeviceTone);
        assert!(tone.realize.is_none());

        let hinted = manager
            .create(1, 2, Some(MediaType::Pcm), Some("http://host/a.mid"), None)
            .unwrap();
        assert_eq!(manager.media_type(hinted.handle).unwrap(), MediaType::Pcm);

        assert!(matches!(
            manager.create(1, 3, None, None, None),
            Err(MediaError::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.create(1, 4, None, Some("rtsp://host/stream"), None),
            Err(MediaError::ConnectionNotFound(_))
        ));
        assert_eq!(manager.player_count(), 2);
    }

    #[test]
    fn declared_length_hands_out_a_realize_ticket() {
        let recorder = Recorder::new();
        let (manager, _backend) = manager(&recorder);
        let content = midi_melody(&[60, 62], 100, None, false);
        let creation = manager
            .create(1, 5, None, Some("file:///song.mid"), Some(content.len() as u64))
            .unwrap();
        assert_eq!(recorder.count(5, MediaEvent::DataRequest), 1);
        let ticket = creation.realize.unwrap();

        let report = manager.submit_data(creation.handle, Some(&content)).unwrap();
        assert!(!report.need_more_data);
        assert!(ticket.wait().is_ok());
        assert_eq!(manager.state(creation.handle).unwrap(), PlayerState::Realized);
    }

    #[test]
    fn realize_ticket_times_out_without_data() {
        let recorder = Recorder::new();
        let (manager, _backend) = manager(&recorder);
        let creation = manager.create(1, 5, Some(MediaType::Midi), None, Some(1000)).unwrap();
        assert!(matches!(creation.realize.unwrap().wait(), Err(MediaError::Fail(_))));
    }

    #[test]
    fn controls_dispatch_and_notify_after_unlock() {
        let recorder = Recorder::new();
        let (manager, backend) = manager(&recorder);
        let creation = manager.create(2, 9, Some(MediaType::Tone), None, None).unwrap();
        let handle = creation.handle;
        manager.submit_data(handle, Some(&tone_melody(&[60, 64]))).unwrap();
        manager.submit_data(handle, None).unwrap();

        assert_eq!(manager.control(handle, ControlOp::Start).unwrap(), ControlValue::Done);
        assert_eq!(recorder.count(9, MediaEvent::DurationUpdated), 1);
        backend.pump(20);
        let time = manager.control(handle, ControlOp::GetTime).unwrap().as_int().unwrap();
        assert!((190..=210).contains(&time), "time {}", time);
        assert_eq!(
            manager.control(handle, ControlOp::SetVolume(150)).unwrap(),
            ControlValue::Int(100)
        );
        assert!(matches!(
            manager.control(handle, ControlOp::GetChannelVolume(0)),
            Err(MediaError::Unsupported { .. })
        ));
        manager.control(handle, ControlOp::Pause).unwrap();
        assert_eq!(recorder.count(9, MediaEvent::PauseFinished), 1);
        assert_eq!(
            manager.control(handle, ControlOp::GetState).unwrap(),
            ControlValue::State(PlayerState::Prefetched)
        );
    }

    #[test]
    fn end_of_media_is_observed_by_the_next_operation() {
        let recorder = Recorder::new();
        let (manager, backend) = manager(&recorder);
        let handle = manager.create(2, 9, Some(MediaType::Tone), None, None).unwrap().handle;
        manager.submit_data(handle, Some(&tone_melody(&[60]))).unwrap();
        manager.submit_data(handle, None).unwrap();
        manager.control(handle, ControlOp::Start).unwrap();
        backend.pump(60);

        assert_eq!(recorder.wait_for(9, MediaEvent::EndOfMedia, 1, WAIT), 1);
        assert_eq!(manager.state(handle).unwrap(), PlayerState::Prefetched);
    }

    #[test]
    fn destroy_is_idempotent_and_frees_the_session() {
        let recorder = Recorder::new();
        let (manager, backend) = manager(&recorder);
        let handle = manager.create(3, 1, Some(MediaType::DeviceMidi), None, None).unwrap().handle;
        assert_eq!(manager.pool().live_sessions(), 1);

        manager.destroy(handle).unwrap();
        manager.destroy(handle).unwrap();
        assert_eq!(recorder.count(1, MediaEvent::DestroyFinished), 1);
        assert_eq!(manager.pool().live_sessions(), 0);
        assert_eq!(backend.open_channels(), 0);
        assert!(matches!(
            manager.control(handle, ControlOp::Start),
            Err(MediaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn listener_may_call_back_into_the_manager() {
        let manager_slot: Arc<Mutex<Option<Arc<MediaManager>>>> = Arc::new(Mutex::new(None));
        let observed = Arc::new(Mutex::new(Vec::new()));
        let listener: EventListener = {
            let slot = manager_slot.clone();
            let observed = observed.clone();
            Arc::new(move |notification| {
                if notification.event == MediaEvent::StopFinished {
                    let manager = slot.lock().unwrap().clone();
                    if let Some(manager) = manager {
                        observed.lock().unwrap().push(manager.player_count());
                    }
                }
            })
        };
        let manager = Arc::new(
            MediaManager::new(
                EngineConfig::default(),
                Arc::new(ManualBackend::new()),
                Some(listener),
            )
            .unwrap(),
        );
        *manager_slot.lock().unwrap() = Some(manager.clone());

        let handle = manager.create(1, 1, Some(MediaType::DeviceTone), None, None).unwrap().handle;
        manager.control(handle, ControlOp::Stop).unwrap();
        assert_eq!(*observed.lock().unwrap(), vec![1]);
        manager.destroy(handle).unwrap();
        *manager_slot.lock().unwrap() = None;
    }

    #[test]
    fn listener_may_destroy_its_player_at_end_of_media() {
        let target: Arc<Mutex<Option<(Arc<MediaManager>, PlayerHandle)>>> =
            Arc::new(Mutex::new(None));
        let delivered_on = Arc::new(Mutex::new(None));
        let recorder = Recorder::new();
        let listener: EventListener = {
            let target = target.clone();
            let delivered_on = delivered_on.clone();
            let record = recorder.listener();
            Arc::new(move |notification: Notification| {
                if notification.event == MediaEvent::EndOfMedia {
                    *delivered_on.lock().unwrap() = Some(std::thread::current().id());
                    let found = target.lock().unwrap().take();
                    if let Some((manager, handle)) = found {
                        manager.destroy(handle).unwrap();
                    }
                }
                record(notification);
            })
        };
        let backend = ManualBackend::new();
        let config = EngineConfig {
            output_rate: 8000,
            output_channels: 1,
            block_samples: 80,
            ..EngineConfig::default()
        };
        let manager = Arc::new(
            MediaManager::new(config, Arc::new(backend.clone()), Some(listener)).unwrap(),
        );
        let handle = manager.create(2, 9, Some(MediaType::Tone), None, None).unwrap().handle;
        manager.submit_data(handle, Some(&tone_melody(&[60]))).unwrap();
        manager.submit_data(handle, None).unwrap();
        manager.control(handle, ControlOp::Start).unwrap();
        *target.lock().unwrap() = Some((manager.clone(), handle));

        backend.pump(60);
        assert_eq!(recorder.wait_for(9, MediaEvent::EndOfMedia, 1, WAIT), 1);
        assert_eq!(recorder.count(9, MediaEvent::DestroyFinished), 1);
        assert_ne!(*delivered_on.lock().unwrap(), Some(std::thread::current().id()));
        assert_eq!(manager.player_count(), 0);
        assert_eq!(manager.pool().live_sessions(), 0);
        assert_eq!(backend.open_channels(), 0);
    }

    #[test]
    fn destroy_app_removes_only_that_application() {
        let recorder = Recorder::new();
        let (manager, _backend) = manager(&recorder);
        manager.create(1, 1, Some(MediaType::DeviceTone), None, None).unwrap();
        manager.create(1, 2, Some(MediaType::DeviceMidi), None, None).unwrap();
        manager.create(2, 3, Some(MediaType::DeviceMidi), None, None).unwrap();
        assert_eq!(manager.destroy_app(1).unwrap(), 2);
        assert_eq!(manager.player_count(), 1);
        assert_eq!(manager.pool().ref_count(1), None);
        assert_eq!(manager.pool().ref_count(2), Some(1));
    }

    #[test]
    fn tone_notes_share_the_application_session() {
        let recorder = Recorder::new();
        let (manager, _backend) = manager(&recorder);
        assert_eq!(manager.play_tone(4, 69, 50, 80).unwrap(), Status::Ok);
        assert!(manager.play_tone(4, 200, 50, 80).is_err());
    }
}
