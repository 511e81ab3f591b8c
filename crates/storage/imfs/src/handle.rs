//! Open file handles
//!
//! A handle pins its node with a reference until it is closed or dropped.
//! Regular I/O goes through the node's operation table under the instance
//! lock; device and FIFO I/O run without any filesystem lock held.

use alloc::sync::Arc;

use crate::device::DeviceDriver;
use crate::file::{FileStat, OpenFlags, PollEvents, SeekFrom};
use crate::imfs::ImfsInner;
use crate::lifecycle;
use crate::node::{NodeId, NodeType};
use crate::ops::{ops_for, IoChannel, NodeOps};
use crate::pipe::FifoEnd;
use crate::vfs::{Location, Vfs};
use crate::{ImfsError, ImfsResult};

enum Endpoint {
    Local,
    Driver { driver: Arc<dyn DeviceDriver>, minor: u32 },
    Fifo(FifoEnd),
}

/// An open file
pub struct FileHandle {
    location: Location,
    flags: OpenFlags,
    position: u64,
    endpoint: Endpoint,
    closed: bool,
}

impl FileHandle {
    /// Open the node at `location`
    ///
    /// Access has already been checked by path evaluation.
    pub(crate) fn open(vfs: &Vfs, location: Location, flags: OpenFlags) -> ImfsResult<Self> {
        let channel = {
            let mut inner = location.fs.lock();
            inner.check_active()?;
            if flags.write {
                inner.check_writable()?;
            }
            let node_type = inner.node(location.node)?.node_type();
            let channel = ops_for(node_type).open(&mut inner, location.node, flags)?;
            lifecycle::open_ref(&mut inner, location.node)?;
            channel
        };

        // From here on, dropping the handle releases the reference
        let mut handle = FileHandle {
            location,
            flags,
            position: 0,
            endpoint: Endpoint::Local,
            closed: false,
        };
        handle.endpoint = match channel {
            IoChannel::Local => Endpoint::Local,
            IoChannel::Device(device) => {
                let driver = vfs.drivers().get(device.major)?;
                driver.open(device.minor, flags)?;
                Endpoint::Driver {
                    driver,
                    minor: device.minor,
                }
            }
            IoChannel::Driver { driver, minor } => {
                driver.open(minor, flags)?;
                Endpoint::Driver { driver, minor }
            }
            IoChannel::Fifo(fifo) => Endpoint::Fifo(fifo.open(flags)?),
        };
        debug_imfs!("handle: opened {:?}", handle.location);
        Ok(handle)
    }

    /// Run `f` with the node's operation table under the instance lock
    fn with_ops<R>(
        &self,
        f: impl FnOnce(&'static dyn NodeOps, &mut ImfsInner, NodeId) -> ImfsResult<R>,
    ) -> ImfsResult<R> {
        if self.closed {
            return Err(ImfsError::BadHandle);
        }
        let mut inner = self.location.fs.lock();
        let node_type = inner.node(self.location.node)?.node_type();
        f(ops_for(node_type), &mut *inner, self.location.node)
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Current file position
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn node_type(&self) -> ImfsResult<NodeType> {
        self.with_ops(|_, fs, id| Ok(fs.node(id)?.node_type()))
    }

    /// Read at the current position
    pub fn read(&mut self, buf: &mut [u8]) -> ImfsResult<usize> {
        if !self.flags.read {
            return Err(ImfsError::BadHandle);
        }
        let position = self.position;
        let count = match &self.endpoint {
            Endpoint::Local => self.with_ops(|ops, fs, id| ops.read(fs, id, position, buf))?,
            Endpoint::Driver { driver, minor } => driver.read(*minor, position, buf)?,
            Endpoint::Fifo(end) => return end.read(buf),
        };
        self.position += count as u64;
        Ok(count)
    }

    /// Write at the current position, or at the end in append mode
    pub fn write(&mut self, data: &[u8]) -> ImfsResult<usize> {
        if !self.flags.write {
            return Err(ImfsError::BadHandle);
        }
        let append = self.flags.append;
        let mut position = self.position;
        let count = match &self.endpoint {
            Endpoint::Local => self.with_ops(|ops, fs, id| {
                if append {
                    position = ops.stat(fs, id)?.size;
                }
                ops.write(fs, id, position, data)
            })?,
            Endpoint::Driver { driver, minor } => driver.write(*minor, position, data)?,
            Endpoint::Fifo(end) => return end.write(data),
        };
        self.position = position + count as u64;
        Ok(count)
    }

    /// Scatter read at the current position
    pub fn readv(&mut self, bufs: &mut [&mut [u8]]) -> ImfsResult<usize> {
        if !self.flags.read {
            return Err(ImfsError::BadHandle);
        }
        if !matches!(self.endpoint, Endpoint::Local) {
            let mut total = 0;
            for buf in bufs.iter_mut() {
                let count = self.read(buf)?;
                total += count;
                if count < buf.len() {
                    break;
                }
            }
            return Ok(total);
        }
        let position = self.position;
        let count = self.with_ops(|ops, fs, id| ops.readv(fs, id, position, bufs))?;
        self.position += count as u64;
        Ok(count)
    }

    /// Gather write at the current position
    pub fn writev(&mut self, bufs: &[&[u8]]) -> ImfsResult<usize> {
        if !self.flags.write {
            return Err(ImfsError::BadHandle);
        }
        if self.flags.append || !matches!(self.endpoint, Endpoint::Local) {
            let mut total = 0;
            for buf in bufs {
                let count = self.write(buf)?;
                total += count;
                if count < buf.len() {
                    break;
                }
            }
            return Ok(total);
        }
        let position = self.position;
        let count = self.with_ops(|ops, fs, id| ops.writev(fs, id, position, bufs))?;
        self.position += count as u64;
        Ok(count)
    }

    /// Move the file position
    ///
    /// Directories only accept absolute positions, rounded down to a record
    /// boundary.
    pub fn seek(&mut self, offset: i64, whence: SeekFrom) -> ImfsResult<u64> {
        if matches!(self.endpoint, Endpoint::Fifo(_)) {
            return Err(ImfsError::NotSupported);
        }
        let current = self.position;
        let position = self.with_ops(|ops, fs, id| {
            let base = match whence {
                SeekFrom::Start => 0,
                SeekFrom::Current => current,
                SeekFrom::End => ops.stat(fs, id)?.size,
            };
            let target = i64::try_from(base)
                .ok()
                .and_then(|base| base.checked_add(offset))
                .ok_or(ImfsError::InvalidArgument)?;
            let target = u64::try_from(target).map_err(|_| ImfsError::InvalidArgument)?;
            ops.seek(fs, id, whence, target)
        })?;
        self.position = position;
        Ok(position)
    }

    pub fn stat(&self) -> ImfsResult<FileStat> {
        self.with_ops(|ops, fs, id| ops.stat(fs, id))
    }

    /// Set the file size
    pub fn truncate(&mut self, length: i64) -> ImfsResult<()> {
        if !self.flags.write {
            return Err(ImfsError::BadHandle);
        }
        let size = u64::try_from(length).map_err(|_| ImfsError::InvalidArgument)?;
        self.with_ops(|ops, fs, id| ops.truncate(fs, id, size))
    }

    pub fn ioctl(&mut self, request: u32, arg: usize) -> ImfsResult<i32> {
        match &self.endpoint {
            Endpoint::Driver { driver, minor } => driver.ioctl(*minor, request, arg),
            Endpoint::Fifo(_) => Err(ImfsError::NotSupported),
            Endpoint::Local => self.with_ops(|ops, fs, id| ops.ioctl(fs, id, request, arg)),
        }
    }

    pub fn fcntl(&mut self, cmd: u32, arg: usize) -> ImfsResult<i32> {
        self.with_ops(|ops, fs, id| ops.fcntl(fs, id, cmd, arg))
    }

    pub fn sync(&mut self) -> ImfsResult<()> {
        self.with_ops(|ops, fs, id| ops.sync(fs, id))
    }

    pub fn datasync(&mut self) -> ImfsResult<()> {
        self.with_ops(|ops, fs, id| ops.datasync(fs, id))
    }

    /// Readiness for I/O
    pub fn poll(&self) -> ImfsResult<PollEvents> {
        match &self.endpoint {
            Endpoint::Driver { driver, minor } => Ok(driver.poll(*minor)),
            Endpoint::Fifo(end) => Ok(end.poll()),
            Endpoint::Local => self.with_ops(|ops, fs, id| Ok(ops.poll(fs, id))),
        }
    }

    /// Read whole directory records from the current position
    ///
    /// Returns 0 at the end of the directory.
    pub fn read_dir(&mut self, buf: &mut [u8]) -> ImfsResult<usize> {
        if self.node_type()? != NodeType::Directory {
            return Err(ImfsError::NotADirectory);
        }
        self.read(buf)
    }

    /// Close the handle, reporting errors from the driver or node
    pub fn close(mut self) -> ImfsResult<()> {
        self.release()
    }

    fn release(&mut self) -> ImfsResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Drivers and pipe ends are released without the instance lock
        let endpoint = core::mem::replace(&mut self.endpoint, Endpoint::Local);
        let endpoint_result = match endpoint {
            Endpoint::Driver { driver, minor } => driver.close(minor),
            Endpoint::Fifo(end) => {
                drop(end);
                Ok(())
            }
            Endpoint::Local => Ok(()),
        };

        let id = self.location.node;
        let mut inner = self.location.fs.lock();
        let close_result = match inner.node(id).map(|node| node.node_type()) {
            Ok(node_type) => ops_for(node_type).close(&mut inner, id),
            Err(e) => Err(e),
        };
        lifecycle::close_ref(&mut inner, id);
        debug_imfs!("handle: closed {:?}", self.location);
        endpoint_result.and(close_result)
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("imfs: error closing {:?}: {}", self.location, e);
        }
    }
}
