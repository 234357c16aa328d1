//! Reference counted mixer sessions, one per application.
//!
//! The pool is a fixed array of slots. Each slot carries a generation
//! counter that is bumped when its session is torn down, so a
//! [`SessionHandle`] kept past its session's lifetime is detected instead
//! of silently addressing whatever session reused the slot.
//!
//! Output devices are opened with the pool unlocked. The slot is reserved
//! for the opening application first; other callers for that application
//! wait for the outcome.

mod mixer;

pub use mixer::SessionMixer;

use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::constants::{TONE_NOTE_CHANNEL, TONE_NOTE_PROGRAM};
use crate::error::{MediaError, Result};
use crate::events::{EventSink, Status};
use crate::output::{AudioBackend, MixCallback, PcmChannel};
use crate::synth::{MidiMessage, Soundbank, Synth};

/// Address of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    index: usize,
    generation: u64,
}

impl SessionHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Result of a successful [`SessionPool::acquire`].
#[derive(Clone)]
pub struct Attachment {
    pub handle: SessionHandle,
    /// `NoAudioDevice` when the session has no output channel.
    pub status: Status,
    pub mixer: Arc<SessionMixer>,
}

struct MixerSession {
    app_id: i32,
    ref_count: usize,
    mixer: Arc<SessionMixer>,
    channel: Option<Box<dyn PcmChannel>>,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    session: Option<MixerSession>,
    /// Application whose session is being opened into this slot.
    opening: Option<i32>,
}

impl Slot {
    fn is_free(&self) -> bool {
        self.session.is_none() && self.opening.is_none()
    }
}

/// Pool of mixer sessions keyed by application id.
pub struct SessionPool {
    config: EngineConfig,
    backend: Arc<dyn AudioBackend>,
    slots: Mutex<Vec<Slot>>,
    opened: Condvar,
    soundbank: OnceLock<std::result::Result<Arc<Soundbank>, String>>,
    events: EventSink,
}

impl SessionPool {
    pub fn new(config: EngineConfig, backend: Arc<dyn AudioBackend>, events: EventSink) -> Self {
        let slots = (0..config.max_sessions).map(|_| Slot::default()).collect();
        Self {
            config,
            backend,
            slots: Mutex::new(slots),
            opened: Condvar::new(),
            soundbank: OnceLock::new(),
            events,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The pool's soundbank, loaded on first use.
    ///
    /// A failed load is remembered and reported on every later call.
    fn soundbank(&self) -> Result<Arc<Soundbank>> {
        let loaded = self.soundbank.get_or_init(|| {
            let bank = match &self.config.soundbank_path {
                Some(path) => Soundbank::load(path),
                None => Ok(Soundbank::builtin()),
            };
            match bank {
                Ok(bank) => {
                    info!(
                        "soundbank '{}' loaded with {} programs",
                        bank.name,
                        bank.program_count()
                    );
                    Ok(Arc::new(bank))
                }
                Err(err) => {
                    error!("soundbank load failed: {}", err);
                    Err(err.to_string())
                }
            }
        });
        loaded.clone().map_err(MediaError::Soundbank)
    }

    /// Attach to the session of `app_id`, creating it when needed.
    ///
    /// A missing output device is not an error: the session is created
    /// without a channel and the attachment's status is `NoAudioDevice`.
    pub fn acquire(&self, app_id: i32) -> Result<Attachment> {
        let mut slots = self.slots.lock().unwrap();
        let index = loop {
            if let Some(attachment) = attach_existing(&mut slots, app_id) {
                return Ok(attachment);
            }
            if slots.iter().any(|slot| slot.opening == Some(app_id)) {
                slots = self.opened.wait(slots).unwrap();
                continue;
            }
            let index = slots.iter().position(Slot::is_free).ok_or_else(|| {
                warn!("session pool full, app {} rejected", app_id);
                MediaError::Fail(format!(
                    "all {} mixer sessions are in use",
                    self.config.max_sessions
                ))
            })?;
            slots[index].opening = Some(app_id);
            break index;
        };
        drop(slots);

        let created = self.create_session(app_id);

        let mut slots = self.slots.lock().unwrap();
        let slot = &mut slots[index];
        slot.opening = None;
        let result = created.map(|session| {
            let attachment = Attachment {
                handle: SessionHandle {
                    index,
                    generation: slot.generation,
                },
                status: channel_status(&session.channel),
                mixer: session.mixer.clone(),
            };
            slot.session = Some(session);
            info!("session {} created for app {}", index, app_id);
            attachment
        });
        drop(slots);
        self.opened.notify_all();
        result
    }

    fn create_session(&self, app_id: i32) -> Result<MixerSession> {
        let soundbank = self.soundbank()?;
        let format = self.config.output_format();
        let mixer = Arc::new(SessionMixer::new(
            app_id,
            Synth::new(format, self.config.voices, soundbank),
            self.config.mix_lock_timeout(),
            self.config.midi_event_lock_timeout(),
            self.events.clone(),
        ));

        let weak: Weak<SessionMixer> = Arc::downgrade(&mixer);
        let callback: MixCallback = Arc::new(move |out: &mut [u8]| match weak.upgrade() {
            Some(mixer) => mixer.mix(out),
            None => {
                out.fill(0);
                out.len()
            }
        });
        let channel = match self.backend.open(format, callback) {
            Ok(channel) => Some(channel),
            Err(MediaError::NoAudioDevice) => {
                warn!(
                    "no audio device on backend '{}', app {} runs silent",
                    self.backend.name(),
                    app_id
                );
                None
            }
            Err(err) => return Err(err),
        };

        Ok(MixerSession {
            app_id,
            ref_count: 1,
            mixer,
            channel,
        })
    }

    /// Drop one reference. The last one tears the session down.
    pub fn release(&self, handle: SessionHandle) -> Result<()> {
        let torn_down = {
            let mut slots = self.slots.lock().unwrap();
            let slot = slots
                .get_mut(handle.index)
                .filter(|slot| slot.generation == handle.generation && slot.session.is_some())
                .ok_or_else(|| {
                    warn!("release of stale session handle {:?}", handle);
                    MediaError::InvalidArgument("stale session handle".to_string())
                })?;
            let session = slot.session.as_mut().ok_or_else(|| {
                MediaError::InvalidArgument("stale session handle".to_string())
            })?;
            session.ref_count -= 1;
            debug!(
                "session {} of app {} released, refs={}",
                handle.index, session.app_id, session.ref_count
            );
            if session.ref_count == 0 {
                slot.generation += 1;
                slot.session.take()
            } else {
                None
            }
        };

        // The channel's driver may be inside the mix callback; close it
        // without holding the slot lock.
        if let Some(mut session) = torn_down {
            if let Some(channel) = session.channel.as_mut() {
                channel.close();
            }
            info!(
                "session {} of app {} destroyed",
                handle.index, session.app_id
            );
        }
        Ok(())
    }

    /// Mixer of a live session.
    pub fn mixer(&self, handle: SessionHandle) -> Result<Arc<SessionMixer>> {
        let slots = self.slots.lock().unwrap();
        slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.session.as_ref())
            .map(|session| session.mixer.clone())
            .ok_or_else(|| MediaError::InvalidArgument("stale session handle".to_string()))
    }

    /// Pull one block from a session. Stale handles produce silence.
    pub fn mix(&self, handle: SessionHandle, out: &mut [u8]) -> usize {
        match self.mixer(handle) {
            Ok(mixer) => mixer.mix(out),
            Err(_) => {
                out.fill(0);
                out.len()
            }
        }
    }

    /// Play one note on the application's session.
    ///
    /// The session is held until the note has finished sounding.
    ///
    /// # Arguments
    ///
    /// * `note` - MIDI key, 0..=127.
    /// * `duration_ms` - How long the key is held.
    /// * `volume` - 0..=100; out of range values are clamped.
    pub fn play_tone_note(
        self: &Arc<Self>,
        app_id: i32,
        note: i32,
        duration_ms: u32,
        volume: i32,
    ) -> Result<Status> {
        let key = u8::try_from(note)
            .ok()
            .filter(|key| *key <= 127)
            .ok_or_else(|| MediaError::InvalidArgument(format!("note {} out of range", note)))?;
        let velocity = (volume.clamp(0, 100) * 127 / 100) as u8;

        let attachment = self.acquire(app_id)?;
        let played = attachment.mixer.try_with_synth(self.config.midi_event_lock_timeout(), |synth| {
            let track = synth.tone_track();
            let channel = TONE_NOTE_CHANNEL;
            synth.apply_now(
                track,
                MidiMessage::ProgramChange {
                    channel,
                    program: TONE_NOTE_PROGRAM,
                },
            )?;
            synth.apply_now(
                track,
                MidiMessage::NoteOn {
                    channel,
                    key,
                    velocity,
                },
            )?;
            synth.schedule(track, MidiMessage::NoteOff { channel, key }, duration_ms);
            Ok::<(), MediaError>(())
        });
        if let Err(err) = played.and_then(|inner| inner) {
            self.release(attachment.handle)?;
            return Err(err);
        }

        let pool = Arc::clone(self);
        let handle = attachment.handle;
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(duration_ms as u64));
            if let Err(err) = pool.release(handle) {
                warn!("tone note release failed: {}", err);
            }
        });
        Ok(attachment.status)
    }

    /// Number of sessions currently alive.
    pub fn live_sessions(&self) -> usize {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .filter(|slot| slot.session.is_some())
            .count()
    }

    /// References held on the session of `app_id`, if it exists.
    pub fn ref_count(&self, app_id: i32) -> Option<usize> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .filter_map(|slot| slot.session.as_ref())
            .find(|session| session.app_id == app_id)
            .map(|session| session.ref_count)
    }
}

fn attach_existing(slots: &mut [Slot], app_id: i32) -> Option<Attachment> {
    for (index, slot) in slots.iter_mut().enumerate() {
        if let Some(session) = slot.session.as_mut().filter(|s| s.app_id == app_id) {
            session.ref_count += 1;
            debug!(
                "session {} of app {} attached, refs={}",
                index, app_id, session.ref_count
            );
            return Some(Attachment {
                handle: SessionHandle {
                    index,
                    generation: slot.generation,
                },
                status: channel_status(&session.channel),
                mixer: session.mixer.clone(),
            });
        }
    }
    None
}

fn channel_status(channel: &Option<Box<dyn PcmChannel>>) -> Status {
    if channel.is_some() {
        Status::Ok
    } else {
        Status::NoAudioDevice
    }
}
