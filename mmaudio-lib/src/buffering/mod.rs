//! Growable content buffer and download backpressure.
//!
//! A [`StreamBuffer`] accumulates downloaded bytes for one player. It grows
//! geometrically and tells the caller how much data to request next.

mod header;
mod threshold;

pub use header::{detect_sp_midi, wav_format};
pub use threshold::{BufferingMonitor, BufferingState, PcmFormat};

use log::debug;

use crate::constants::{DEFAULT_BUFFER_SIZE, DEFAULT_PACKET_SIZE};
use crate::error::{MediaError, Result};

/// Outcome of one `submit_data` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataReport {
    pub consumed: usize,
    pub need_more_data: bool,
    /// Smallest chunk worth requesting next, zero once the stream ended.
    pub min_next_chunk: usize,
    pub buffering: BufferingState,
}

impl DataReport {
    /// Report returned once the end of the stream has been seen.
    pub fn finished(buffering: BufferingState) -> Self {
        Self {
            consumed: 0,
            need_more_data: false,
            min_next_chunk: 0,
            buffering,
        }
    }
}

/// Initial buffer size and request size for a content length.
///
/// Device players take no content: `(declared, 0)`. Unknown lengths start at
/// the default buffer size and ask for packets; known lengths are fetched in
/// one request.
pub fn java_buffer_size(declared: Option<u64>, device: bool) -> (usize, usize) {
    match declared {
        _ if device => (declared.unwrap_or(0) as usize, 0),
        Some(len) if len > 0 => (len as usize, len as usize),
        _ => (DEFAULT_BUFFER_SIZE, DEFAULT_PACKET_SIZE),
    }
}

/// Owned content buffer with explicit capacity bookkeeping.
#[derive(Debug)]
pub struct StreamBuffer {
    data: Vec<u8>,
    capacity: usize,
    position: usize,
    limit: usize,
}

impl StreamBuffer {
    /// Allocate the first block of a buffer.
    ///
    /// # Arguments
    ///
    /// * `initial` - Capacity reserved up front, usually the declared length.
    /// * `limit` - Budget the buffer may never grow beyond.
    pub fn allocate(initial: usize, limit: usize) -> Result<Self> {
        let mut buffer = Self {
            data: Vec::new(),
            capacity: 0,
            position: 0,
            limit,
        };
        buffer.reserve_exact(initial.max(DEFAULT_PACKET_SIZE))?;
        Ok(buffer)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Next write offset.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Make room for `additional` bytes.
    ///
    /// When less than one packet of free space would remain the capacity is
    /// doubled (at least one packet) until the request fits. A failed grow
    /// leaves the buffered bytes untouched.
    pub fn ensure_capacity(&mut self, additional: usize) -> Result<()> {
        let needed = self
            .position
            .checked_add(additional)
            .ok_or_else(|| MediaError::OutOfMemory("buffer size overflow".to_string()))?;
        let free = self.capacity - self.position;
        if free >= DEFAULT_PACKET_SIZE && self.capacity >= needed {
            return Ok(());
        }

        let mut new_capacity = (self.capacity * 2).max(DEFAULT_PACKET_SIZE);
        while new_capacity < needed || new_capacity - self.position < DEFAULT_PACKET_SIZE {
            new_capacity = new_capacity
                .checked_mul(2)
                .ok_or_else(|| MediaError::OutOfMemory("buffer size overflow".to_string()))?;
        }
        if new_capacity > self.limit && needed <= self.limit {
            new_capacity = self.limit;
        }
        self.reserve_exact(new_capacity)
    }

    fn reserve_exact(&mut self, capacity: usize) -> Result<()> {
        if capacity > self.limit {
            return Err(MediaError::OutOfMemory(format!(
                "buffer of {} bytes exceeds budget of {} bytes",
                capacity, self.limit
            )));
        }
        self.data
            .try_reserve_exact(capacity - self.data.len())
            .map_err(|err| MediaError::OutOfMemory(err.to_string()))?;
        debug!("stream buffer capacity {} -> {}", self.capacity, capacity);
        self.capacity = capacity;
        Ok(())
    }

    /// Append a chunk, growing as needed.
    pub fn append(&mut self, bytes: &[u8]) -> Result<usize> {
        self.ensure_capacity(bytes.len())?;
        self.data.extend_from_slice(bytes);
        self.position += bytes.len();
        Ok(bytes.len())
    }

    /// Replace the content wholesale.
    pub fn replace(&mut self, bytes: &[u8]) -> Result<()> {
        let mut fresh = Self::allocate(bytes.len(), self.limit)?;
        fresh.append(bytes)?;
        *self = fresh;
        Ok(())
    }

    /// Free the buffered bytes and their storage.
    pub fn clear(&mut self) {
        self.data = Vec::new();
        self.capacity = 0;
        self.position = 0;
    }
}
