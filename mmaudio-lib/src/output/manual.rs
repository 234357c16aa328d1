//! Headless backends: one driven by the caller, one with no device at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::error::{MediaError, Result};

use super::{AudioBackend, MixCallback, OutputFormat, PcmChannel};

struct ManualSlot {
    format: OutputFormat,
    callback: MixCallback,
    open: Arc<AtomicBool>,
}

/// Backend whose channels are pulled explicitly with [`ManualBackend::pull`].
///
/// Used for offline rendering and for driving the mixer deterministically.
#[derive(Clone, Default)]
pub struct ManualBackend {
    slots: Arc<Mutex<Vec<ManualSlot>>>,
}

impl ManualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels that are still open.
    pub fn open_channels(&self) -> usize {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .filter(|slot| slot.open.load(Ordering::Relaxed))
            .count()
    }

    /// Pull one mix period from the channel in slot `index`.
    ///
    /// Slots are numbered in opening order and a closed channel's slot is
    /// handed to the next channel opened. Returns `None` when the slot is
    /// empty or its channel was closed.
    pub fn pull(&self, index: usize) -> Option<Vec<u8>> {
        let (format, callback) = {
            let slots = self.slots.lock().unwrap();
            let slot = slots.get(index)?;
            if !slot.open.load(Ordering::Relaxed) {
                return None;
            }
            (slot.format, slot.callback.clone())
        };
        let mut block = vec![0u8; format.block_bytes()];
        let written = callback(&mut block);
        block.truncate(written);
        Some(block)
    }

    /// Pull `periods` mix periods from every open channel.
    pub fn pump(&self, periods: usize) {
        let callbacks: Vec<(OutputFormat, MixCallback)> = self
            .slots
            .lock()
            .unwrap()
            .iter()
            .filter(|slot| slot.open.load(Ordering::Relaxed))
            .map(|slot| (slot.format, slot.callback.clone()))
            .collect();
        for (format, callback) in callbacks {
            let mut block = vec![0u8; format.block_bytes()];
            for _ in 0..periods {
                callback(&mut block);
            }
        }
    }
}

impl AudioBackend for ManualBackend {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn open(&self, format: OutputFormat, callback: MixCallback) -> Result<Box<dyn PcmChannel>> {
        let open = Arc::new(AtomicBool::new(true));
        let slot = ManualSlot {
            format,
            callback,
            open: open.clone(),
        };
        let mut slots = self.slots.lock().unwrap();
        let index = match slots
            .iter()
            .position(|slot| !slot.open.load(Ordering::Relaxed))
        {
            Some(index) => {
                slots[index] = slot;
                index
            }
            None => {
                slots.push(slot);
                slots.len() - 1
            }
        };
        debug!("manual output channel {} opened", index);
        Ok(Box::new(ManualChannel { open }))
    }
}

struct ManualChannel {
    open: Arc<AtomicBool>,
}

impl PcmChannel for ManualChannel {
    fn close(&mut self) {
        self.open.store(false, Ordering::Relaxed);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

/// Backend for hosts without audio output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

impl AudioBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn open(&self, _format: OutputFormat, _callback: MixCallback) -> Result<Box<dyn PcmChannel>> {
        Err(MediaError::NoAudioDevice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn format() -> OutputFormat {
        OutputFormat {
            sample_rate: 8000,
            channels: 1,
            bits: 8,
            block_samples: 16,
        }
    }

    #[test]
    fn manual_channels_pull_until_closed() {
        let backend = ManualBackend::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let callback: MixCallback = Arc::new(move |out: &mut [u8]| {
            counter.fetch_add(1, Ordering::Relaxed);
            out.fill(7);
            out.len()
        });

        let mut channel = backend.open(format(), callback).unwrap();
        assert_eq!(backend.open_channels(), 1);
        assert_eq!(backend.pull(0), Some(vec![7u8; 16]));
        backend.pump(3);
        assert_eq!(calls.load(Ordering::Relaxed), 4);

        channel.close();
        assert!(!channel.is_open());
        assert_eq!(backend.pull(0), None);
        assert_eq!(backend.open_channels(), 0);
    }

    #[test]
    fn closed_slots_are_reused() {
        let backend = ManualBackend::new();
        let filler = |value: u8| -> MixCallback {
            Arc::new(move |out: &mut [u8]| {
                out.fill(value);
                out.len()
            })
        };

        for value in 1..=5u8 {
            let mut channel = backend.open(format(), filler(value)).unwrap();
            assert_eq!(backend.pull(0), Some(vec![value; 16]));
            channel.close();
        }
        assert_eq!(backend.slots.lock().unwrap().len(), 1);

        let _first = backend.open(format(), filler(8)).unwrap();
        let _second = backend.open(format(), filler(9)).unwrap();
        assert_eq!(backend.pull(1), Some(vec![9u8; 16]));
        assert_eq!(backend.slots.lock().unwrap().len(), 2);
    }

    #[test]
    fn null_backend_reports_missing_device() {
        let callback: MixCallback = Arc::new(|out: &mut [u8]| out.len());
        assert!(matches!(
            NullBackend.open(format(), callback),
            Err(MediaError::NoAudioDevice)
        ));
    }
}
