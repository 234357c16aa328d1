//! Byte ring shared by one producer and one consumer.

/// Fixed-size ring with explicit write pointer, read pointer and fill count.
///
/// `0 <= play_size <= capacity` always holds. Both pointers wrap at
/// `capacity` and are reset to 0 only once the ring is empty, so an idle
/// producer always gets the longest possible contiguous run.
#[derive(Debug)]
pub struct TunnelRing {
    data: Box<[u8]>,
    write_ptr: usize,
    read_ptr: usize,
    play_size: usize,
}

impl TunnelRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            write_ptr: 0,
            read_ptr: 0,
            play_size: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn write_ptr(&self) -> usize {
        self.write_ptr
    }

    pub fn read_ptr(&self) -> usize {
        self.read_ptr
    }

    /// Bytes written and not yet read.
    pub fn play_size(&self) -> usize {
        self.play_size
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.play_size
    }

    pub fn is_empty(&self) -> bool {
        self.play_size == 0
    }

    /// Longest run that can be written at `write_ptr` without wrapping.
    pub fn contiguous_free(&self) -> usize {
        if self.play_size == self.capacity() {
            return 0;
        }
        if self.write_ptr >= self.read_ptr {
            self.capacity() - self.write_ptr
        } else {
            self.read_ptr - self.write_ptr
        }
    }

    /// Let `fill` write into the contiguous free run and commit what it
    /// reports as written.
    ///
    /// Returns the number of bytes committed, capped at the run length.
    pub fn write_with(&mut self, max: usize, fill: impl FnOnce(&mut [u8]) -> usize) -> usize {
        let run = self.contiguous_free().min(max);
        if run == 0 {
            return 0;
        }
        let start = self.write_ptr;
        let written = fill(&mut self.data[start..start + run]).min(run);
        self.commit(written);
        written
    }

    fn commit(&mut self, written: usize) {
        self.write_ptr += written;
        if self.write_ptr >= self.capacity() {
            self.write_ptr = 0;
        }
        self.play_size += written;
    }

    /// Copy as much of `bytes` as fits, wrapping once if needed.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let mut done = 0;
        while done < bytes.len() {
            let chunk = &bytes[done..];
            let written = self.write_with(chunk.len(), |run| {
                let n = run.len();
                run.copy_from_slice(&chunk[..n]);
                n
            });
            if written == 0 {
                break;
            }
            done += written;
        }
        done
    }

    /// Move up to `out.len()` bytes out of the ring.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let wanted = out.len().min(self.play_size);
        let mut done = 0;
        while done < wanted {
            let run = (self.capacity() - self.read_ptr).min(wanted - done);
            out[done..done + run].copy_from_slice(&self.data[self.read_ptr..self.read_ptr + run]);
            self.read_ptr += run;
            if self.read_ptr >= self.capacity() {
                self.read_ptr = 0;
            }
            done += run;
        }
        self.play_size -= done;
        if self.play_size == 0 {
            self.write_ptr = 0;
            self.read_ptr = 0;
        }
        done
    }
}
