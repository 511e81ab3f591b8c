//! Node operation tables
//!
//! Every node type has one static [`NodeOps`] implementation, picked by
//! [`ops_for`]. Operations run with the instance lock held and receive the
//! locked [`ImfsInner`]. Devices, FIFOs and generic nodes do their I/O
//! elsewhere: their `open` returns an [`IoChannel`] that the handle uses
//! after the lock is released.

use alloc::sync::Arc;

use crate::device::DeviceDriver;
use crate::directory::{self, RECORD_SIZE};
use crate::file::{FileStat, OpenFlags, PollEvents, SeekFrom};
use crate::imfs::ImfsInner;
use crate::lifecycle;
use crate::memfile::{BlockPool, MemFile};
use crate::node::{Device, NodeId, NodeKind, NodeType};
use crate::pipe::Fifo;
use crate::{ImfsError, ImfsResult};

/// Where I/O on an open node goes
pub enum IoChannel {
    /// Handled by the node's operation table under the instance lock
    Local,
    /// Routed to the driver registered for the device's major number
    Device(Device),
    /// Routed to a driver the node carries itself
    Driver { driver: Arc<dyn DeviceDriver>, minor: u32 },
    /// Routed to a pipe
    Fifo(Arc<Fifo>),
}

/// Per-type node operations
///
/// Defaults describe a node that supports nothing beyond open, stat and
/// removal.
pub trait NodeOps: Sync {
    fn open(&self, _fs: &mut ImfsInner, _id: NodeId, _flags: OpenFlags) -> ImfsResult<IoChannel> {
        Ok(IoChannel::Local)
    }

    fn close(&self, _fs: &mut ImfsInner, _id: NodeId) -> ImfsResult<()> {
        Ok(())
    }

    fn read(&self, _fs: &mut ImfsInner, _id: NodeId, _offset: u64, _buf: &mut [u8]) -> ImfsResult<usize> {
        Err(ImfsError::NotSupported)
    }

    fn write(&self, _fs: &mut ImfsInner, _id: NodeId, _offset: u64, _data: &[u8]) -> ImfsResult<usize> {
        Err(ImfsError::NotSupported)
    }

    fn ioctl(&self, _fs: &mut ImfsInner, _id: NodeId, _request: u32, _arg: usize) -> ImfsResult<i32> {
        Err(ImfsError::NotSupported)
    }

    /// Validate a new position for a handle
    fn seek(&self, _fs: &ImfsInner, _id: NodeId, _whence: SeekFrom, position: u64) -> ImfsResult<u64> {
        Ok(position)
    }

    fn stat(&self, fs: &ImfsInner, id: NodeId) -> ImfsResult<FileStat> {
        base_stat(fs, id, 0)
    }

    fn chmod(&self, fs: &mut ImfsInner, id: NodeId, mode: u32) -> ImfsResult<()> {
        fs.check_writable()?;
        let now = fs.now();
        let node = fs.node_mut(id)?;
        node.mode = mode & 0o7777;
        node.touch_ctime(now);
        Ok(())
    }

    fn truncate(&self, _fs: &mut ImfsInner, _id: NodeId, _size: u64) -> ImfsResult<()> {
        Err(ImfsError::NotSupported)
    }

    fn sync(&self, _fs: &mut ImfsInner, _id: NodeId) -> ImfsResult<()> {
        Ok(())
    }

    fn datasync(&self, _fs: &mut ImfsInner, _id: NodeId) -> ImfsResult<()> {
        Ok(())
    }

    fn fcntl(&self, _fs: &mut ImfsInner, _id: NodeId, _cmd: u32, _arg: usize) -> ImfsResult<i32> {
        Ok(0)
    }

    /// Remove the node from its directory and drop the name
    fn remove(&self, fs: &mut ImfsInner, id: NodeId) -> ImfsResult<()> {
        fs.check_writable()?;
        lifecycle::unlink(fs, id)
    }

    fn poll(&self, _fs: &ImfsInner, _id: NodeId) -> PollEvents {
        PollEvents::READY
    }

    /// Scatter read; stops at the first short transfer
    fn readv(&self, fs: &mut ImfsInner, id: NodeId, offset: u64, bufs: &mut [&mut [u8]]) -> ImfsResult<usize> {
        let mut total = 0;
        for buf in bufs.iter_mut() {
            let n = self.read(fs, id, offset + total as u64, buf)?;
            total += n;
            if n < buf.len() {
                break;
            }
        }
        Ok(total)
    }

    /// Gather write; stops at the first short transfer
    fn writev(&self, fs: &mut ImfsInner, id: NodeId, offset: u64, bufs: &[&[u8]]) -> ImfsResult<usize> {
        let mut total = 0;
        for buf in bufs {
            let n = self.write(fs, id, offset + total as u64, buf)?;
            total += n;
            if n < buf.len() {
                break;
            }
        }
        Ok(total)
    }
}

/// Status record common to every node type
fn base_stat(fs: &ImfsInner, id: NodeId, size: u64) -> ImfsResult<FileStat> {
    let node = fs.node(id)?;
    let rdev = match &node.kind {
        NodeKind::Device(dev) => dev.rdev(),
        _ => 0,
    };
    Ok(FileStat {
        file_type: node.file_type(),
        size,
        nlink: node.nlink as u32,
        inode: node.ino,
        dev: fs.dev(),
        rdev,
        mode: node.full_mode(),
        uid: node.uid,
        gid: node.gid,
        blksize: fs.pool().block_size() as u32,
        atime: node.atime,
        mtime: node.mtime,
        ctime: node.ctime,
    })
}

/// Split borrow of a memory file and the pool backing it
fn memfile_mut(fs: &mut ImfsInner, id: NodeId) -> ImfsResult<(&mut MemFile, &mut BlockPool)> {
    let ImfsInner { nodes, pool, .. } = fs;
    match &mut nodes.get_mut(id)?.kind {
        NodeKind::MemFile(file) => Ok((file, pool)),
        _ => Err(ImfsError::NotSupported),
    }
}

pub struct DirectoryOps;

impl NodeOps for DirectoryOps {
    fn open(&self, _fs: &mut ImfsInner, _id: NodeId, flags: OpenFlags) -> ImfsResult<IoChannel> {
        if flags.write {
            return Err(ImfsError::IsADirectory);
        }
        Ok(IoChannel::Local)
    }

    /// Directory stream read, whole records only
    fn read(&self, fs: &mut ImfsInner, id: NodeId, offset: u64, buf: &mut [u8]) -> ImfsResult<usize> {
        let n = directory::read_stream(&fs.nodes, id, offset, buf)?;
        let now = fs.now();
        fs.node_mut(id)?.atime = now;
        Ok(n)
    }

    fn write(&self, _fs: &mut ImfsInner, _id: NodeId, _offset: u64, _data: &[u8]) -> ImfsResult<usize> {
        Err(ImfsError::IsADirectory)
    }

    fn seek(&self, _fs: &ImfsInner, _id: NodeId, whence: SeekFrom, position: u64) -> ImfsResult<u64> {
        match whence {
            SeekFrom::Start => Ok(directory::seek_position(position)),
            _ => Err(ImfsError::InvalidArgument),
        }
    }

    fn stat(&self, fs: &ImfsInner, id: NodeId) -> ImfsResult<FileStat> {
        let entries = directory::entry_count(&fs.nodes, id)?;
        base_stat(fs, id, (entries * RECORD_SIZE) as u64)
    }

    fn truncate(&self, _fs: &mut ImfsInner, _id: NodeId, _size: u64) -> ImfsResult<()> {
        Err(ImfsError::IsADirectory)
    }

    fn remove(&self, fs: &mut ImfsInner, id: NodeId) -> ImfsResult<()> {
        fs.check_writable()?;
        directory::check_removable(&fs.nodes, id, fs.root())?;
        lifecycle::unlink(fs, id)
    }
}

pub struct DeviceOps;

impl NodeOps for DeviceOps {
    fn open(&self, fs: &mut ImfsInner, id: NodeId, _flags: OpenFlags) -> ImfsResult<IoChannel> {
        match fs.node(id)?.kind {
            NodeKind::Device(dev) => Ok(IoChannel::Device(dev)),
            _ => Err(ImfsError::IoError),
        }
    }
}

/// Hard and symbolic links
///
/// Path evaluation normally dereferences links, so these only see
/// operations addressed to the link node itself.
pub struct LinkOps;

impl NodeOps for LinkOps {
    fn open(&self, _fs: &mut ImfsInner, _id: NodeId, _flags: OpenFlags) -> ImfsResult<IoChannel> {
        Err(ImfsError::NotSupported)
    }

    fn stat(&self, fs: &ImfsInner, id: NodeId) -> ImfsResult<FileStat> {
        match &fs.node(id)?.kind {
            // A hard link reports its target
            NodeKind::HardLink(target) => {
                let target = *target;
                ops_for(fs.node(target)?.node_type()).stat(fs, target)
            }
            NodeKind::SymLink(path) => base_stat(fs, id, path.len() as u64),
            _ => Err(ImfsError::IoError),
        }
    }
}

pub struct MemFileOps;

impl NodeOps for MemFileOps {
    fn open(&self, fs: &mut ImfsInner, id: NodeId, flags: OpenFlags) -> ImfsResult<IoChannel> {
        if flags.write && flags.truncate {
            self.truncate(fs, id, 0)?;
        }
        Ok(IoChannel::Local)
    }

    fn read(&self, fs: &mut ImfsInner, id: NodeId, offset: u64, buf: &mut [u8]) -> ImfsResult<usize> {
        let now = fs.now();
        let n = match &fs.node(id)?.kind {
            NodeKind::MemFile(file) => file.read(&fs.pool, offset, buf)?,
            _ => return Err(ImfsError::NotSupported),
        };
        fs.node_mut(id)?.atime = now;
        Ok(n)
    }

    fn write(&self, fs: &mut ImfsInner, id: NodeId, offset: u64, data: &[u8]) -> ImfsResult<usize> {
        fs.check_writable()?;
        let now = fs.now();
        let (file, pool) = memfile_mut(fs, id)?;
        let n = file.write(pool, offset, data)?;
        fs.node_mut(id)?.touch_mtime(now);
        Ok(n)
    }

    fn stat(&self, fs: &ImfsInner, id: NodeId) -> ImfsResult<FileStat> {
        match &fs.node(id)?.kind {
            NodeKind::MemFile(file) => base_stat(fs, id, file.size()),
            _ => Err(ImfsError::IoError),
        }
    }

    fn truncate(&self, fs: &mut ImfsInner, id: NodeId, size: u64) -> ImfsResult<()> {
        fs.check_writable()?;
        let now = fs.now();
        let (file, pool) = memfile_mut(fs, id)?;
        file.truncate(pool, size)?;
        fs.node_mut(id)?.touch_mtime(now);
        Ok(())
    }
}

pub struct LinearFileOps;

impl NodeOps for LinearFileOps {
    /// Opening for write turns the node into a memory file
    fn open(&self, fs: &mut ImfsInner, id: NodeId, flags: OpenFlags) -> ImfsResult<IoChannel> {
        if !flags.write {
            return Ok(IoChannel::Local);
        }
        fs.check_writable()?;
        let ImfsInner { nodes, pool, .. } = &mut *fs;
        let node = nodes.get_mut(id)?;
        let promoted = match &node.kind {
            NodeKind::LinearFile(linear) => linear.promote(pool)?,
            _ => return Err(ImfsError::IoError),
        };
        node.kind = NodeKind::MemFile(promoted);
        log::info!("imfs: linear file '{}' promoted to memory file", node.name);
        MemFileOps.open(fs, id, flags)
    }

    fn read(&self, fs: &mut ImfsInner, id: NodeId, offset: u64, buf: &mut [u8]) -> ImfsResult<usize> {
        let now = fs.now();
        let node = fs.node_mut(id)?;
        let n = match &node.kind {
            NodeKind::LinearFile(linear) => linear.read(offset, buf),
            _ => return Err(ImfsError::NotSupported),
        };
        node.atime = now;
        Ok(n)
    }

    fn stat(&self, fs: &ImfsInner, id: NodeId) -> ImfsResult<FileStat> {
        match &fs.node(id)?.kind {
            NodeKind::LinearFile(linear) => base_stat(fs, id, linear.size()),
            _ => Err(ImfsError::IoError),
        }
    }
}

pub struct FifoOps;

impl NodeOps for FifoOps {
    fn open(&self, fs: &mut ImfsInner, id: NodeId, _flags: OpenFlags) -> ImfsResult<IoChannel> {
        match &fs.node(id)?.kind {
            NodeKind::Fifo(fifo) => Ok(IoChannel::Fifo(Arc::clone(fifo))),
            _ => Err(ImfsError::IoError),
        }
    }

    fn seek(&self, _fs: &ImfsInner, _id: NodeId, _whence: SeekFrom, _position: u64) -> ImfsResult<u64> {
        Err(ImfsError::NotSupported)
    }
}

pub struct GenericOps;

impl NodeOps for GenericOps {
    fn open(&self, fs: &mut ImfsInner, id: NodeId, _flags: OpenFlags) -> ImfsResult<IoChannel> {
        match &fs.node(id)?.kind {
            NodeKind::Generic(driver) => Ok(IoChannel::Driver {
                driver: Arc::clone(driver),
                minor: 0,
            }),
            _ => Err(ImfsError::IoError),
        }
    }
}

static DIRECTORY_OPS: DirectoryOps = DirectoryOps;
static DEVICE_OPS: DeviceOps = DeviceOps;
static LINK_OPS: LinkOps = LinkOps;
static MEMFILE_OPS: MemFileOps = MemFileOps;
static LINEAR_FILE_OPS: LinearFileOps = LinearFileOps;
static FIFO_OPS: FifoOps = FifoOps;
static GENERIC_OPS: GenericOps = GenericOps;

/// Operation table for a node type
pub fn ops_for(node_type: NodeType) -> &'static dyn NodeOps {
    match node_type {
        NodeType::Directory => &DIRECTORY_OPS,
        NodeType::Device => &DEVICE_OPS,
        NodeType::HardLink | NodeType::SymLink => &LINK_OPS,
        NodeType::MemFile => &MEMFILE_OPS,
        NodeType::LinearFile => &LINEAR_FILE_OPS,
        NodeType::Fifo => &FIFO_OPS,
        NodeType::Generic => &GENERIC_OPS,
    }
}
