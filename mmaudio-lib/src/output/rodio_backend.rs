//! Output channel on the default system device via rodio.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dasp_ring_buffer::Bounded;
use log::{error, info, warn};
use rodio::source::SeekError;
use rodio::{OutputStream, OutputStreamBuilder, Source};

use crate::error::{MediaError, Result};

use super::{decode_samples, AudioBackend, MixCallback, OutputFormat, PcmChannel};

const OUTPUT_STREAM_OPEN_RETRIES: usize = 5;
const OUTPUT_STREAM_OPEN_RETRY_MS: u64 = 100;
const CLOSE_POLL_MS: u64 = 20;

/// Backend opening the default output device.
#[derive(Debug, Clone)]
pub struct RodioBackend {
    retries: usize,
    retry_ms: u64,
}

impl Default for RodioBackend {
    fn default() -> Self {
        Self {
            retries: OUTPUT_STREAM_OPEN_RETRIES,
            retry_ms: OUTPUT_STREAM_OPEN_RETRY_MS,
        }
    }
}

impl RodioBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn open_output_stream_with_retry(retries: usize, retry_ms: u64) -> std::result::Result<OutputStream, String> {
    let retries = retries.max(1);
    for attempt in 1..=retries {
        match OutputStreamBuilder::open_default_stream() {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                if attempt == retries {
                    return Err(format!(
                        "failed to open default output stream after {} attempts: {}",
                        retries, err
                    ));
                }
                warn!(
                    "open_default_stream attempt {}/{} failed: {}",
                    attempt, retries, err
                );
                thread::sleep(Duration::from_millis(retry_ms));
            }
        }
    }
    Err("no output stream attempts were made".to_string())
}

impl AudioBackend for RodioBackend {
    fn name(&self) -> &'static str {
        "rodio"
    }

    fn open(&self, format: OutputFormat, callback: MixCallback) -> Result<Box<dyn PcmChannel>> {
        let closed = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();
        let retries = self.retries;
        let retry_ms = self.retry_ms;
        let thread_closed = closed.clone();

        // The stream is not Send on every platform, so it lives on its own thread.
        let handle = thread::spawn(move || {
            let stream = match open_output_stream_with_retry(retries, retry_ms) {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            stream
                .mixer()
                .add(MixSource::new(format, callback, thread_closed.clone()));
            let _ = ready_tx.send(Ok(()));

            while !thread_closed.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(CLOSE_POLL_MS));
            }
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(
                    "opened output channel {} Hz, {} ch, {} bit",
                    format.sample_rate, format.channels, format.bits
                );
                Ok(Box::new(RodioChannel {
                    closed,
                    handle: Some(handle),
                }))
            }
            Ok(Err(err)) => {
                error!("{}", err);
                let _ = handle.join();
                Err(MediaError::NoAudioDevice)
            }
            Err(_) => {
                error!("output thread exited before reporting readiness");
                Err(MediaError::NoAudioDevice)
            }
        }
    }
}

struct RodioChannel {
    closed: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PcmChannel for RodioChannel {
    fn close(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("output thread panicked during join");
            }
        }
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Relaxed)
    }
}

impl Drop for RodioChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Source pulling mixed blocks from a session callback.
struct MixSource {
    format: OutputFormat,
    callback: MixCallback,
    closed: Arc<AtomicBool>,
    block: Vec<u8>,
    decoded: Vec<f32>,
    staging: Bounded<Vec<f32>>,
}

impl MixSource {
    fn new(format: OutputFormat, callback: MixCallback, closed: Arc<AtomicBool>) -> Self {
        let block_bytes = format.block_bytes();
        let block_samples = format.block_samples * format.channels as usize;
        Self {
            format,
            callback,
            closed,
            block: vec![0; block_bytes],
            decoded: Vec::with_capacity(block_samples),
            staging: Bounded::from(vec![0.0; block_samples]),
        }
    }

    fn refill(&mut self) {
        (self.callback)(&mut self.block);
        self.decoded.clear();
        decode_samples(&self.block, self.format.bits, &mut self.decoded);
        for sample in self.decoded.drain(..) {
            self.staging.push(sample);
        }
    }
}

impl Iterator for MixSource {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed.load(Ordering::Relaxed) {
            return None;
        }
        if self.staging.is_empty() {
            self.refill();
        }
        self.staging.pop()
    }
}

impl Source for MixSource {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.format.channels
    }

    fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }

    fn try_seek(&mut self, _pos: Duration) -> std::result::Result<(), SeekError> {
        Err(SeekError::NotSupported {
            underlying_source: "MixSource",
        })
    }
}
