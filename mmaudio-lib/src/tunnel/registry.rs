//! Named tunnel segments, looked up by isolate id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use parking_lot::{Condvar, MutexGuard};

use crate::constants::TUNNEL_HEADER_INTS;
use crate::error::{MediaError, Result};

use super::ring::TunnelRing;

/// Name of the segment serving `isolate_id`.
pub fn segment_name(isolate_id: i32) -> String {
    format!("MMAPI_AUDIO_{:04x}", isolate_id)
}

/// One named segment: a ring behind its lock, plus the condition the
/// producer waits on for free space.
#[derive(Debug)]
pub struct TunnelSegment {
    name: String,
    size: usize,
    ring: parking_lot::Mutex<TunnelRing>,
    drained: Condvar,
}

impl TunnelSegment {
    fn new(name: String, size: usize) -> Self {
        let capacity = size - TUNNEL_HEADER_INTS * std::mem::size_of::<i32>();
        Self {
            name,
            size,
            ring: parking_lot::Mutex::new(TunnelRing::new(capacity)),
            drained: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Segment size, header included.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    pub fn lock(&self) -> MutexGuard<'_, TunnelRing> {
        self.ring.lock()
    }

    /// Consumer side: read under the lock and wake the producer.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let read = self.lock().read(out);
        if read > 0 {
            self.drained.notify_all();
        }
        read
    }

    /// Block until the consumer reads something or `timeout` passes.
    ///
    /// The segment lock is released while waiting.
    pub fn wait_drained(&self, ring: &mut MutexGuard<'_, TunnelRing>, timeout: Duration) {
        self.drained.wait_for(ring, timeout);
    }

    /// Wake a producer blocked in [`wait_drained`](Self::wait_drained).
    pub fn wake(&self) {
        self.drained.notify_all();
    }
}

/// Registry of live segments, keyed by name.
#[derive(Debug)]
pub struct TunnelRegistry {
    segment_size: usize,
    segments: Mutex<HashMap<String, Arc<TunnelSegment>>>,
}

impl TunnelRegistry {
    /// # Errors
    ///
    /// `InvalidArgument` when `segment_size` leaves no room after the header.
    pub fn new(segment_size: usize) -> Result<Self> {
        if segment_size <= TUNNEL_HEADER_INTS * std::mem::size_of::<i32>() {
            return Err(MediaError::InvalidArgument(format!(
                "tunnel segment of {} bytes has no data region",
                segment_size
            )));
        }
        Ok(Self {
            segment_size,
            segments: Mutex::new(HashMap::new()),
        })
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Create the segment of `isolate_id`. Fails if it already exists.
    pub fn create(&self, isolate_id: i32) -> Result<Arc<TunnelSegment>> {
        let name = segment_name(isolate_id);
        let mut segments = self.segments.lock().unwrap();
        if segments.contains_key(&name) {
            return Err(MediaError::Fail(format!("segment {} already exists", name)));
        }
        let segment = Arc::new(TunnelSegment::new(name.clone(), self.segment_size));
        segments.insert(name.clone(), segment.clone());
        debug!("tunnel segment {} created ({} bytes)", name, self.segment_size);
        Ok(segment)
    }

    /// Open an existing segment.
    pub fn open(&self, isolate_id: i32) -> Result<Arc<TunnelSegment>> {
        let name = segment_name(isolate_id);
        self.segments
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .ok_or(MediaError::ConnectionNotFound(name))
    }

    /// Unlink a segment. Holders of the `Arc` keep a valid, orphaned ring.
    pub fn remove(&self, isolate_id: i32) -> bool {
        let name = segment_name(isolate_id);
        let removed = self.segments.lock().unwrap().remove(&name);
        if let Some(segment) = &removed {
            segment.wake();
            debug!("tunnel segment {} removed", name);
        }
        removed.is_some()
    }

    pub fn len(&self) -> usize {
        self.segments.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_use_four_hex_digits() {
        assert_eq!(segment_name(1), "MMAPI_AUDIO_0001");
        assert_eq!(segment_name(0xabc), "MMAPI_AUDIO_0abc");
        assert_eq!(segment_name(0x12345), "MMAPI_AUDIO_12345");
    }

    #[test]
    fn capacity_excludes_the_header() {
        let registry = TunnelRegistry::new(1024).unwrap();
        let segment = registry.create(7).unwrap();
        assert_eq!(segment.size(), 1024);
        assert_eq!(segment.capacity(), 1012);
        assert!(TunnelRegistry::new(12).is_err());
    }

    #[test]
    fn create_open_remove() {
        let registry = TunnelRegistry::new(256).unwrap();
        assert!(matches!(registry.open(3), Err(MediaError::ConnectionNotFound(_))));
        let created = registry.create(3).unwrap();
        assert!(registry.create(3).is_err());
        let opened = registry.open(3).unwrap();
        assert!(Arc::ptr_eq(&created, &opened));

        assert!(registry.remove(3));
        assert!(!registry.remove(3));
        assert!(registry.is_empty());
    }
}
