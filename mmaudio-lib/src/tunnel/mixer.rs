//! Consumer that averages the tunnels of every active isolate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::constants::MAX_SUPPORTED_ISOLATES;
use crate::error::{MediaError, Result};
use crate::output::OutputFormat;

use super::registry::{TunnelRegistry, TunnelSegment};

/// Destination of mixed blocks.
pub trait PcmSink: Send {
    /// Play one block and return how long it takes to play out.
    fn play(&mut self, block: &[u8]) -> Duration;
}

impl<F> PcmSink for F
where
    F: FnMut(&[u8]) -> Duration + Send,
{
    fn play(&mut self, block: &[u8]) -> Duration {
        self(block)
    }
}

struct AttachedTunnel {
    isolate_id: i32,
    segment: Arc<TunnelSegment>,
    active: bool,
}

/// Mixes up to [`MAX_SUPPORTED_ISOLATES`] tunnels into one stream.
pub struct TunnelMixer {
    registry: Arc<TunnelRegistry>,
    format: OutputFormat,
    tunnels: Mutex<Vec<AttachedTunnel>>,
}

impl TunnelMixer {
    pub fn new(registry: Arc<TunnelRegistry>, format: OutputFormat) -> Self {
        Self {
            registry,
            format,
            tunnels: Mutex::new(Vec::new()),
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Attach the segment of `isolate_id`, inactive. Reopening an attached
    /// isolate refreshes its segment.
    pub fn open_tunnel(&self, isolate_id: i32) -> Result<()> {
        let segment = self.registry.open(isolate_id)?;
        let mut tunnels = self.tunnels.lock().unwrap();
        if let Some(existing) = tunnels.iter_mut().find(|t| t.isolate_id == isolate_id) {
            existing.segment = segment;
            existing.active = false;
            return Ok(());
        }
        if tunnels.len() >= MAX_SUPPORTED_ISOLATES {
            warn!("tunnel mixer full, isolate {} rejected", isolate_id);
            return Err(MediaError::Fail(format!(
                "at most {} tunnels can be mixed",
                MAX_SUPPORTED_ISOLATES
            )));
        }
        tunnels.push(AttachedTunnel {
            isolate_id,
            segment,
            active: false,
        });
        debug!("tunnel of isolate {} attached", isolate_id);
        Ok(())
    }

    pub fn close_tunnel(&self, isolate_id: i32) -> Result<()> {
        let mut tunnels = self.tunnels.lock().unwrap();
        let index = position(&tunnels, isolate_id)?;
        tunnels.remove(index);
        debug!("tunnel of isolate {} detached", isolate_id);
        Ok(())
    }

    pub fn mixer_start(&self, isolate_id: i32) -> Result<()> {
        self.set_active(isolate_id, true)
    }

    pub fn mixer_stop(&self, isolate_id: i32) -> Result<()> {
        self.set_active(isolate_id, false)
    }

    fn set_active(&self, isolate_id: i32, active: bool) -> Result<()> {
        let mut tunnels = self.tunnels.lock().unwrap();
        let index = position(&tunnels, isolate_id)?;
        tunnels[index].active = active;
        Ok(())
    }

    pub fn tunnel_count(&self) -> usize {
        self.tunnels.lock().unwrap().len()
    }

    pub fn active_count(&self) -> usize {
        self.tunnels.lock().unwrap().iter().filter(|t| t.active).count()
    }

    /// Mix one block from every active tunnel with pending data.
    ///
    /// The block length is the smallest pending amount among those
    /// tunnels, and each output sample is the sum over the `n` tunnels
    /// divided once by `n`. 8-bit PCM is unsigned and centred at 128, so
    /// the raw bytes are averaged as they are and silence stays at 128.
    /// Returns an empty block when nothing is pending.
    pub fn mix_once(&self) -> Vec<u8> {
        let tunnels = self.tunnels.lock().unwrap();
        let pending: Vec<&AttachedTunnel> = tunnels
            .iter()
            .filter(|t| t.active && !t.segment.lock().is_empty())
            .collect();
        if pending.is_empty() {
            return Vec::new();
        }

        let shortest = pending
            .iter()
            .map(|t| t.segment.lock().play_size())
            .min()
            .unwrap_or(0);
        let len = self.format.align(shortest.min(self.registry.segment_size()));
        if len == 0 {
            return Vec::new();
        }

        let count = pending.len() as i32;
        let mut scratch = vec![0u8; len];
        let mut block = vec![0u8; len];
        if self.format.bits == 8 {
            let mut acc = vec![0i32; len];
            for tunnel in &pending {
                tunnel.segment.read(&mut scratch);
                for (sum, byte) in acc.iter_mut().zip(&scratch) {
                    *sum += *byte as i32;
                }
            }
            for (out, sum) in block.iter_mut().zip(&acc) {
                *out = (*sum / count).clamp(0, u8::MAX as i32) as u8;
            }
        } else {
            let mut acc = vec![0i32; len / 2];
            for tunnel in &pending {
                tunnel.segment.read(&mut scratch);
                for (sum, pair) in acc.iter_mut().zip(scratch.chunks_exact(2)) {
                    *sum += i16::from_le_bytes([pair[0], pair[1]]) as i32;
                }
            }
            for (out, sum) in block.chunks_exact_mut(2).zip(&acc) {
                let sample = (*sum / count).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                out.copy_from_slice(&sample.to_le_bytes());
            }
        }
        block
    }

    /// Run [`mix_once`](Self::mix_once) in a loop on a background thread,
    /// handing every block to `sink`.
    pub fn spawn(self: &Arc<Self>, mut sink: impl PcmSink + 'static) -> MixerThread {
        let mixer = Arc::clone(self);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || {
            info!("tunnel mixer thread started");
            while !flag.load(Ordering::Relaxed) {
                let block = mixer.mix_once();
                if block.is_empty() {
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
                let wait = sink.play(&block);
                if !wait.is_zero() {
                    thread::sleep(wait / 2);
                }
            }
            info!("tunnel mixer thread stopped");
        });
        MixerThread {
            stop,
            handle: Some(handle),
        }
    }
}

fn position(tunnels: &[AttachedTunnel], isolate_id: i32) -> Result<usize> {
    tunnels
        .iter()
        .position(|t| t.isolate_id == isolate_id)
        .ok_or_else(|| MediaError::InvalidArgument(format!("no tunnel for isolate {}", isolate_id)))
}

/// Handle of a running mixer thread. Dropping it stops the thread.
pub struct MixerThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MixerThread {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("tunnel mixer thread panicked");
            }
        }
    }
}

impl Drop for MixerThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
