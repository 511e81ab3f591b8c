//! FIFO (named pipe) objects
//!
//! A FIFO node holds an `Arc<Fifo>`. Opening the node hands out a
//! [`FifoEnd`] that counts as a reader, a writer or both; dropping the end
//! releases it. Reads and writes never block: an empty pipe reads 0 bytes
//! and a full pipe accepts 0 bytes, the caller retries.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use spin::Mutex;

use crate::file::{OpenFlags, PollEvents};
use crate::{ImfsError, ImfsResult};

/// Default pipe buffer size (64KB)
pub const PIPE_BUF_SIZE: usize = 65536;

/// Pipe buffer and end counts
struct PipeState {
    data: VecDeque<u8>,
    capacity: usize,
    readers: usize,
    writers: usize,
}

impl PipeState {
    fn available_space(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }
}

/// Pipe object shared by every open end of a FIFO node
pub struct Fifo {
    state: Mutex<PipeState>,
}

impl Fifo {
    /// Create a new FIFO with default capacity
    pub fn new() -> Self {
        Self::with_capacity(PIPE_BUF_SIZE)
    }

    /// Create a FIFO with a specific buffer capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Fifo {
            state: Mutex::new(PipeState {
                data: VecDeque::new(),
                capacity,
                readers: 0,
                writers: 0,
            }),
        }
    }

    /// Open an end with the access given by `flags`
    pub fn open(self: &Arc<Self>, flags: OpenFlags) -> ImfsResult<FifoEnd> {
        if !flags.read && !flags.write {
            return Err(ImfsError::InvalidArgument);
        }
        let mut state = self.state.lock();
        if flags.read {
            state.readers += 1;
        }
        if flags.write {
            state.writers += 1;
        }
        Ok(FifoEnd {
            fifo: Arc::clone(self),
            read: flags.read,
            write: flags.write,
        })
    }

    /// Bytes waiting to be read
    pub fn available_data(&self) -> usize {
        self.state.lock().data.len()
    }

    /// Open reader and writer counts
    pub fn ends(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.readers, state.writers)
    }
}

impl Default for Fifo {
    fn default() -> Self {
        Self::new()
    }
}

/// One open end of a FIFO
pub struct FifoEnd {
    fifo: Arc<Fifo>,
    read: bool,
    write: bool,
}

impl FifoEnd {
    /// Read available data; 0 when empty
    pub fn read(&self, buf: &mut [u8]) -> ImfsResult<usize> {
        if !self.read {
            return Err(ImfsError::BadHandle);
        }
        let mut state = self.fifo.state.lock();
        let count = buf.len().min(state.data.len());
        for (slot, byte) in buf.iter_mut().zip(state.data.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    /// Write as much as fits; fails when no reader is open
    pub fn write(&self, buf: &[u8]) -> ImfsResult<usize> {
        if !self.write {
            return Err(ImfsError::BadHandle);
        }
        let mut state = self.fifo.state.lock();
        if state.readers == 0 {
            // Broken pipe
            return Err(ImfsError::IoError);
        }
        let count = buf.len().min(state.available_space());
        state.data.extend(&buf[..count]);
        Ok(count)
    }

    pub fn poll(&self) -> PollEvents {
        let state = self.fifo.state.lock();
        PollEvents {
            readable: self.read && (!state.data.is_empty() || state.writers == 0),
            writable: self.write && state.available_space() > 0,
        }
    }
}

impl Drop for FifoEnd {
    fn drop(&mut self) {
        let mut state = self.fifo.state.lock();
        if self.read {
            state.readers -= 1;
        }
        if self.write {
            state.writers -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let fifo = Arc::new(Fifo::new());
        let reader = fifo.open(OpenFlags::READ).unwrap();
        let writer = fifo.open(OpenFlags::APPEND).unwrap();
        assert_eq!(fifo.ends(), (1, 1));

        assert_eq!(writer.write(b"hello").unwrap(), 5);
        assert_eq!(fifo.available_data(), 5);

        let mut buf = [0u8; 3];
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_capacity_limit() {
        let fifo = Arc::new(Fifo::with_capacity(4));
        let _reader = fifo.open(OpenFlags::READ).unwrap();
        let writer = fifo.open(OpenFlags::APPEND).unwrap();
        assert_eq!(writer.write(b"abcdef").unwrap(), 4);
        assert_eq!(writer.write(b"g").unwrap(), 0);
        assert!(!writer.poll().writable);
    }

    #[test]
    fn test_broken_pipe_and_end_counts() {
        let fifo = Arc::new(Fifo::new());
        let writer = fifo.open(OpenFlags::APPEND).unwrap();
        assert_eq!(writer.write(b"x"), Err(ImfsError::IoError));

        {
            let reader = fifo.open(OpenFlags::READ).unwrap();
            assert_eq!(reader.write(b"x"), Err(ImfsError::BadHandle));
            assert_eq!(fifo.ends(), (1, 1));
        }
        assert_eq!(fifo.ends(), (0, 1));
        drop(writer);
        assert_eq!(fifo.ends(), (0, 0));
    }
}
