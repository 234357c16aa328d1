//! The per-session mixer and its pull callback.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use log::{trace, warn};
use parking_lot::Mutex;

use crate::error::{MediaError, Result};
use crate::events::{EventSink, MediaEvent, Notification};
use crate::synth::{MidiMessage, Synth, SynthEvent, TrackId};

/// One session's synthesizer behind the mix lock.
///
/// The audio driver thread calls [`SessionMixer::mix`]; player operations
/// use [`SessionMixer::with_synth`]. Nothing in here ever takes a player lock.
pub struct SessionMixer {
    app_id: i32,
    synth: Mutex<Synth>,
    delayed_midi: AtomicBool,
    lock_timeout: Duration,
    midi_timeout: Duration,
    skipped: AtomicU64,
    events: EventSink,
}

impl SessionMixer {
    pub fn new(
        app_id: i32,
        synth: Synth,
        lock_timeout: Duration,
        midi_timeout: Duration,
        events: EventSink,
    ) -> Self {
        Self {
            app_id,
            synth: Mutex::new(synth),
            delayed_midi: AtomicBool::new(false),
            lock_timeout,
            midi_timeout,
            skipped: AtomicU64::new(0),
            events,
        }
    }

    pub fn app_id(&self) -> i32 {
        self.app_id
    }

    /// Fill one block of output.
    ///
    /// If the mix lock cannot be taken within the timeout the block is
    /// silence. Never fails and always reports the full block as written.
    /// End-of-media events are queued; listeners never run on this thread.
    pub fn mix(&self, out: &mut [u8]) -> usize {
        let events = match self.synth.try_lock_for(self.lock_timeout) {
            Some(mut synth) => {
                let events = synth.render(out);
                self.delayed_midi.store(false, Ordering::Release);
                events
            }
            None => {
                out.fill(0);
                let skipped = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "mix lock busy for app {}, {} periods skipped",
                    self.app_id, skipped
                );
                return out.len();
            }
        };

        for event in events {
            match event {
                SynthEvent::EndOfMedia {
                    player_id,
                    media_time_ms,
                } if player_id >= 0 => {
                    trace!("end of media for player {}", player_id);
                    self.events.post(Notification::new(
                        self.app_id,
                        player_id,
                        MediaEvent::EndOfMedia,
                        media_time_ms,
                    ));
                }
                _ => {}
            }
        }
        out.len()
    }

    /// Mix periods replaced by silence because the lock was busy.
    pub fn skipped_periods(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Run `f` with the synthesizer locked.
    pub fn with_synth<R>(&self, f: impl FnOnce(&mut Synth) -> R) -> R {
        let mut synth = self.synth.lock();
        f(&mut synth)
    }

    /// Like [`with_synth`](Self::with_synth) but gives up after `timeout`.
    pub fn try_with_synth<R>(
        &self,
        timeout: Duration,
        f: impl FnOnce(&mut Synth) -> R,
    ) -> Result<R> {
        match self.synth.try_lock_for(timeout) {
            Some(mut synth) => Ok(f(&mut synth)),
            None => Err(MediaError::Fail(format!(
                "synth of app {} busy for {:?}",
                self.app_id, timeout
            ))),
        }
    }

    /// Queue realtime MIDI messages for the next mix period.
    ///
    /// Fails when the mix lock stays busy past the MIDI event timeout.
    pub fn send_midi(&self, track: TrackId, messages: &[MidiMessage]) -> Result<()> {
        self.try_with_synth(self.midi_timeout, |synth| {
            for message in messages {
                synth.queue_midi(track, *message);
            }
            self.delayed_midi.store(true, Ordering::Release);
        })
    }

    pub fn has_delayed_midi(&self) -> bool {
        self.delayed_midi.load(Ordering::Acquire)
    }

    /// Apply queued MIDI now instead of waiting for the next period.
    ///
    /// Channel state reads call this so they observe their own writes even
    /// when no output device is pulling.
    pub fn flush_delayed_midi(&self) -> Result<()> {
        if !self.has_delayed_midi() {
            return Ok(());
        }
        self.try_with_synth(self.midi_timeout, |synth| {
            synth.flush_pending();
            self.delayed_midi.store(false, Ordering::Release);
        })
    }
}
