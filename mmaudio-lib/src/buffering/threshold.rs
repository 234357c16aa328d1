//! Buffering level tracking with start/stop hysteresis.

/// Ready once this many PCM packets are buffered.
const READY_PACKETS: usize = 3;
/// Overfull once this many PCM packets are buffered.
const OVERFULL_PACKETS: usize = 10;
/// A ready buffer only falls back to buffering below this many packets.
const UNDERRUN_PACKETS: usize = 1;

/// Sample layout of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits: u16,
}

impl PcmFormat {
    /// Bytes of one second of audio.
    pub fn packet_size(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * (self.bits as usize >> 3)
    }

    pub fn bytes_per_ms(&self) -> u64 {
        self.packet_size() as u64 / 1000
    }
}

/// Buffer fill classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferingState {
    #[default]
    Empty,
    Buffering,
    Ready,
    Overfull,
}

/// Tracks the buffering state of one PCM stream.
///
/// Rising edges use the ready (3 packets) and overfull (10 packets) marks,
/// both inclusive. Once ready, the state only falls back to `Buffering` when
/// less than one packet remains, so playback does not flap around the ready
/// mark while the consumer drains.
#[derive(Debug, Clone)]
pub struct BufferingMonitor {
    packet_size: usize,
    state: BufferingState,
}

impl BufferingMonitor {
    pub fn new(format: PcmFormat) -> Self {
        Self {
            packet_size: format.packet_size().max(1),
            state: BufferingState::Empty,
        }
    }

    pub fn state(&self) -> BufferingState {
        self.state
    }

    pub fn ready_mark(&self) -> usize {
        READY_PACKETS * self.packet_size
    }

    pub fn overfull_mark(&self) -> usize {
        OVERFULL_PACKETS * self.packet_size
    }

    /// Feed the current buffered byte count and return the new state.
    pub fn update(&mut self, buffered: usize) -> BufferingState {
        let was_ready = matches!(self.state, BufferingState::Ready | BufferingState::Overfull);
        self.state = if buffered == 0 {
            BufferingState::Empty
        } else if buffered >= self.overfull_mark() {
            BufferingState::Overfull
        } else if buffered >= self.ready_mark() {
            BufferingState::Ready
        } else if was_ready && buffered >= UNDERRUN_PACKETS * self.packet_size {
            BufferingState::Ready
        } else {
            BufferingState::Buffering
        };
        self.state
    }

    /// True while the producer should stop fetching.
    pub fn should_throttle(&self) -> bool {
        self.state == BufferingState::Overfull
    }
}
