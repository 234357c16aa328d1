//! Audio tunnel between an isolate's producer and the tunnel mixer.
//!
//! Each isolate owns one named segment holding a [`TunnelRing`]. The
//! producer ([`play_back`]) renders PCM into the ring's free space; the
//! consumer ([`TunnelMixer`]) drains the rings of every active isolate and
//! averages them into one output block. Every pointer update happens under
//! the segment lock. The lock is never held while the source renders or
//! while the producer sleeps.

mod mixer;
mod registry;
mod ring;
mod source;

pub use mixer::{MixerThread, PcmSink, TunnelMixer};
pub use registry::{segment_name, TunnelRegistry, TunnelSegment};
pub use ring::TunnelRing;
pub use source::{BytesSource, PcmSource, SessionSource};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, trace};

use crate::error::{MediaError, Result};

/// Lifecycle of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Uninitialized,
    Created,
    Destroyed,
}

/// The producing end of one isolate's tunnel.
pub struct AudioTunnel {
    isolate_id: i32,
    registry: Arc<TunnelRegistry>,
    state: TunnelState,
    segment: Option<Arc<TunnelSegment>>,
}

impl AudioTunnel {
    pub fn new(registry: Arc<TunnelRegistry>, isolate_id: i32) -> Self {
        Self {
            isolate_id,
            registry,
            state: TunnelState::Uninitialized,
            segment: None,
        }
    }

    /// Allocate the isolate's segment. Creating twice is a no-op.
    pub fn create(&mut self) -> Result<()> {
        match self.state {
            TunnelState::Created => return Ok(()),
            TunnelState::Destroyed => {
                return Err(MediaError::InvalidState(format!(
                    "tunnel of isolate {} was destroyed",
                    self.isolate_id
                )))
            }
            TunnelState::Uninitialized => {}
        }
        self.segment = Some(self.registry.create(self.isolate_id)?);
        self.state = TunnelState::Created;
        info!("audio tunnel {} created", segment_name(self.isolate_id));
        Ok(())
    }

    pub fn isolate_id(&self) -> i32 {
        self.isolate_id
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn segment(&self) -> Result<Arc<TunnelSegment>> {
        self.segment.clone().ok_or_else(|| {
            MediaError::InvalidState(format!(
                "tunnel of isolate {} is {:?}",
                self.isolate_id, self.state
            ))
        })
    }

    /// Run the producer loop on this thread. See [`play_back`].
    pub fn play_back(&self, source: &mut dyn PcmSource, stop: &AtomicBool) -> Result<u64> {
        let segment = self.segment()?;
        Ok(play_back(&segment, source, stop))
    }

    /// Run the producer loop on its own thread.
    pub fn spawn_producer(
        &self,
        mut source: Box<dyn PcmSource>,
        stop: Arc<AtomicBool>,
    ) -> Result<JoinHandle<u64>> {
        let segment = self.segment()?;
        Ok(thread::spawn(move || {
            play_back(&segment, source.as_mut(), &stop)
        }))
    }

    /// Release the segment. Returns whether this call destroyed the tunnel.
    pub fn destroy(&mut self) -> bool {
        if self.state != TunnelState::Created {
            self.state = TunnelState::Destroyed;
            return false;
        }
        self.segment = None;
        self.registry.remove(self.isolate_id);
        self.state = TunnelState::Destroyed;
        info!("audio tunnel {} destroyed", segment_name(self.isolate_id));
        true
    }
}

impl Drop for AudioTunnel {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Producer loop: keep the ring filled from `source` until `stop` is set
/// or the source is finished and fully consumed.
///
/// Each pass sizes a render from the longest contiguous free run, renders
/// into a scratch buffer with the segment unlocked, then locks again to copy
/// what still fits. Rendered bytes that did not fit are kept for the next
/// pass. When nothing could be committed while data is pending, the
/// producer waits for roughly half the pending playback time, or until the
/// consumer drains something.
///
/// Returns the number of bytes committed to the ring.
pub fn play_back(segment: &TunnelSegment, source: &mut dyn PcmSource, stop: &AtomicBool) -> u64 {
    let format = source.format();
    let mut total = 0u64;
    let mut scratch: Vec<u8> = Vec::new();
    loop {
        if stop.load(Ordering::Relaxed) {
            debug!("producer for {} stopped", segment.name());
            break;
        }

        if scratch.is_empty() {
            let run = format.align(segment.lock().contiguous_free());
            if run > 0 {
                scratch.resize(run, 0);
                let rendered = source.read_pcm(&mut scratch).min(run);
                scratch.truncate(rendered);
            }
        }

        let mut ring = segment.lock();
        let fit = format.align(scratch.len().min(ring.free()));
        let committed = if fit > 0 { ring.write(&scratch[..fit]) } else { 0 };
        if committed > 0 {
            scratch.drain(..committed);
            total += committed as u64;
            trace!("{}: +{} bytes, {} pending", segment.name(), committed, ring.play_size());
            drop(ring);
            thread::yield_now();
            continue;
        }

        let pending = ring.play_size();
        if source.is_finished() && scratch.is_empty() && pending == 0 {
            debug!("producer for {} drained after {} bytes", segment.name(), total);
            break;
        }
        if pending > 0 {
            let wait = format.sample_time_ms(pending / 2).max(1);
            segment.wait_drained(&mut ring, Duration::from_millis(wait));
        } else {
            drop(ring);
            thread::sleep(Duration::from_millis(1));
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::output::OutputFormat;

    fn format() -> OutputFormat {
        OutputFormat {
            sample_rate: 8000,
            channels: 1,
            bits: 16,
            block_samples: 80,
        }
    }

    #[test]
    fn tunnel_lifecycle_is_idempotent() {
        let registry = Arc::new(TunnelRegistry::new(256).unwrap());
        let mut tunnel = AudioTunnel::new(registry.clone(), 5);
        assert_eq!(tunnel.state(), TunnelState::Uninitialized);
        assert!(tunnel.segment().is_err());

        tunnel.create().unwrap();
        tunnel.create().unwrap();
        assert_eq!(tunnel.state(), TunnelState::Created);
        assert_eq!(tunnel.segment().unwrap().name(), "MMAPI_AUDIO_0005");
        assert_eq!(registry.len(), 1);

        assert!(tunnel.destroy());
        assert!(!tunnel.destroy());
        assert_eq!(tunnel.state(), TunnelState::Destroyed);
        assert!(registry.is_empty());
        assert!(tunnel.create().is_err());
    }

    #[test]
    fn dropping_a_tunnel_unlinks_its_segment() {
        let registry = Arc::new(TunnelRegistry::new(256).unwrap());
        {
            let mut tunnel = AudioTunnel::new(registry.clone(), 9);
            tunnel.create().unwrap();
        }
        assert!(registry.open(9).is_err());
        AudioTunnel::new(registry.clone(), 9).create().unwrap();
    }

    #[test]
    fn producer_fills_then_waits_for_the_consumer() {
        let registry = Arc::new(TunnelRegistry::new(112).unwrap());
        let mut tunnel = AudioTunnel::new(registry, 1);
        tunnel.create().unwrap();
        let segment = tunnel.segment().unwrap();

        let data: Vec<u8> = (0..400u32).map(|i| (i % 251) as u8).collect();
        let stop = Arc::new(AtomicBool::new(false));
        let producer = tunnel
            .spawn_producer(Box::new(BytesSource::new(format(), data.clone())), stop)
            .unwrap();

        let mut received = Vec::new();
        let mut chunk = [0u8; 30];
        while received.len() < data.len() {
            let n = segment.read(&mut chunk);
            assert!(segment.lock().play_size() <= 100);
            received.extend_from_slice(&chunk[..n]);
            if n == 0 {
                thread::sleep(Duration::from_millis(1));
            }
        }
        assert_eq!(producer.join().unwrap(), 400);
        assert_eq!(received, data);
    }

    #[test]
    fn stop_flag_ends_a_blocked_producer() {
        let registry = Arc::new(TunnelRegistry::new(64).unwrap());
        let mut tunnel = AudioTunnel::new(registry, 2);
        tunnel.create().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let producer = tunnel
            .spawn_producer(
                Box::new(BytesSource::new(format(), vec![1u8; 1000])),
                stop.clone(),
            )
            .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(tunnel.segment().unwrap().lock().play_size(), 52);
        stop.store(true, Ordering::Relaxed);
        assert_eq!(producer.join().unwrap(), 52);
    }

    /// Hands out one chunk, then blocks inside `read_pcm` until released.
    struct GatedSource {
        first: Option<Vec<u8>>,
        entered: mpsc::Sender<()>,
        gate: mpsc::Receiver<()>,
        done: bool,
    }

    impl PcmSource for GatedSource {
        fn format(&self) -> OutputFormat {
            format()
        }

        fn read_pcm(&mut self, out: &mut [u8]) -> usize {
            if let Some(first) = self.first.take() {
                out[..first.len()].copy_from_slice(&first);
                return first.len();
            }
            self.entered.send(()).unwrap();
            self.gate.recv().unwrap();
            self.done = true;
            0
        }

        fn is_finished(&self) -> bool {
            self.done
        }
    }

    #[test]
    fn consumer_reads_while_the_source_renders() {
        let registry = Arc::new(TunnelRegistry::new(112).unwrap());
        let segment = registry.create(4).unwrap();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let producer = {
            let segment = segment.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut source = GatedSource {
                    first: Some(vec![3u8; 8]),
                    entered: entered_tx,
                    gate: gate_rx,
                    done: false,
                };
                play_back(&segment, &mut source, &stop)
            })
        };
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let (read_tx, read_rx) = mpsc::channel();
        let reader = {
            let segment = segment.clone();
            thread::spawn(move || {
                let mut out = [0u8; 16];
                let n = segment.read(&mut out);
                read_tx.send(out[..n].to_vec()).unwrap();
            })
        };
        let read = read_rx.recv_timeout(Duration::from_secs(1));
        gate_tx.send(()).unwrap();

        assert_eq!(read.unwrap(), vec![3u8; 8]);
        reader.join().unwrap();
        assert_eq!(producer.join().unwrap(), 8);
    }

    /// Two producers take turns on one segment while a consumer drains it.
    #[test]
    fn concurrent_producers_keep_the_fill_count_consistent() {
        let registry = Arc::new(TunnelRegistry::new(76).unwrap());
        let segment = registry.create(3).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let producers: Vec<_> = (0..2)
            .map(|_| {
                let segment = segment.clone();
                let stop = stop.clone();
                thread::spawn(move || {
                    let mut source = BytesSource::new(format(), vec![7u8; 20_000]);
                    play_back(&segment, &mut source, &stop)
                })
            })
            .collect();

        let mut consumed = 0usize;
        let mut chunk = [0u8; 24];
        while consumed < 40_000 {
            let n = segment.read(&mut chunk);
            {
                let ring = segment.lock();
                assert!(ring.play_size() <= ring.capacity());
                if ring.play_size() == 0 {
                    assert_eq!((ring.read_ptr(), ring.write_ptr()), (0, 0));
                }
            }
            assert!(chunk[..n].iter().all(|b| *b == 7));
            consumed += n;
            if n == 0 {
                thread::yield_now();
            }
        }
        stop.store(true, Ordering::Relaxed);
        let produced: u64 = producers.into_iter().map(|p| p.join().unwrap()).sum();
        assert_eq!(produced, 40_000);
        assert!(segment.lock().is_empty());
    }
}
