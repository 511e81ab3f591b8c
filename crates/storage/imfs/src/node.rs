//! Node store
//!
//! Every filesystem instance owns its nodes in a [`NodeArena`]. Parent to
//! child ownership is expressed through [`NodeId`] lists inside directory
//! payloads; the child's `parent` field is a plain index and never owns.
//! Ids carry a generation so a handle or current directory that outlives its
//! node resolves to `NotFound` instead of a recycled slot.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::device::DeviceDriver;
use crate::file::FileType;
use crate::linfile::LinearFile;
use crate::memfile::MemFile;
use crate::mount::MountId;
use crate::permissions::{S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFREG};
use crate::pipe::Fifo;
use crate::{ImfsError, ImfsResult};

/// Arena index of a node, valid only within its owning instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Slot index (stable while the node lives)
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Node type tag, one per operation table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Directory,
    Device,
    HardLink,
    SymLink,
    MemFile,
    LinearFile,
    Fifo,
    Generic,
}

/// Character or block device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Char,
    Block,
}

/// Device node payload: routing keys to an external driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    pub kind: DeviceKind,
    pub major: u32,
    pub minor: u32,
}

impl Device {
    /// Encoded device number as reported in `rdev`
    pub fn rdev(&self) -> u64 {
        ((self.major as u64) << 8) | (self.minor as u64 & 0xff)
    }
}

/// Directory payload
#[derive(Debug, Default)]
pub struct Directory {
    /// Children in insertion order
    pub children: Vec<NodeId>,
    /// Mount entry of a filesystem mounted on this directory
    pub mounted: Option<MountId>,
}

/// Type-specific node payload
pub enum NodeKind {
    Directory(Directory),
    Device(Device),
    HardLink(NodeId),
    SymLink(String),
    MemFile(MemFile),
    LinearFile(LinearFile),
    Fifo(Arc<Fifo>),
    Generic(Arc<dyn DeviceDriver>),
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Directory(_) => NodeType::Directory,
            NodeKind::Device(_) => NodeType::Device,
            NodeKind::HardLink(_) => NodeType::HardLink,
            NodeKind::SymLink(_) => NodeType::SymLink,
            NodeKind::MemFile(_) => NodeType::MemFile,
            NodeKind::LinearFile(_) => NodeType::LinearFile,
            NodeKind::Fifo(_) => NodeType::Fifo,
            NodeKind::Generic(_) => NodeType::Generic,
        }
    }
}

/// A single namespace entry
pub struct Node {
    /// Entry name, unique within the parent
    pub name: String,
    /// Permission bits (file type lives in `kind`)
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Names (and hard links) referring to this node
    pub nlink: u16,
    /// Open handles referring to this node
    pub refs: u32,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    /// Inode number, unique within the instance
    pub ino: u64,
    /// Containing directory; `None` for an instance root or a detached node
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
}

impl Node {
    /// Create a detached node with one link and no references
    pub fn new(name: String, mode: u32, uid: u32, gid: u32, ino: u64, now: u64, kind: NodeKind) -> Self {
        Node {
            name,
            mode: mode & 0o7777,
            uid,
            gid,
            nlink: 1,
            refs: 0,
            atime: now,
            mtime: now,
            ctime: now,
            ino,
            parent: None,
            kind,
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    /// Directory payload, or `NotADirectory`
    pub fn directory(&self) -> ImfsResult<&Directory> {
        match &self.kind {
            NodeKind::Directory(dir) => Ok(dir),
            _ => Err(ImfsError::NotADirectory),
        }
    }

    /// Mutable directory payload, or `NotADirectory`
    pub fn directory_mut(&mut self) -> ImfsResult<&mut Directory> {
        match &mut self.kind {
            NodeKind::Directory(dir) => Ok(dir),
            _ => Err(ImfsError::NotADirectory),
        }
    }

    /// Mount entry of a filesystem mounted on this node
    pub fn mounted(&self) -> Option<MountId> {
        match &self.kind {
            NodeKind::Directory(dir) => dir.mounted,
            _ => None,
        }
    }

    pub fn file_type(&self) -> FileType {
        match &self.kind {
            NodeKind::Directory(_) => FileType::Directory,
            NodeKind::Device(dev) => match dev.kind {
                DeviceKind::Char => FileType::CharDevice,
                DeviceKind::Block => FileType::BlockDevice,
            },
            NodeKind::HardLink(_) | NodeKind::MemFile(_) | NodeKind::LinearFile(_) => FileType::Regular,
            NodeKind::SymLink(_) => FileType::Symlink,
            NodeKind::Fifo(_) => FileType::Fifo,
            NodeKind::Generic(_) => FileType::CharDevice,
        }
    }

    /// Mode including the file type bits
    pub fn full_mode(&self) -> u32 {
        let type_bits = match self.file_type() {
            FileType::Directory => S_IFDIR,
            FileType::Symlink => S_IFLNK,
            FileType::CharDevice => S_IFCHR,
            FileType::BlockDevice => S_IFBLK,
            FileType::Fifo => S_IFIFO,
            FileType::Regular => S_IFREG,
        };
        type_bits | self.mode
    }

    /// Update status-change time
    pub fn touch_ctime(&mut self, now: u64) {
        self.ctime = now;
    }

    /// Update modification and status-change time
    pub fn touch_mtime(&mut self, now: u64) {
        self.mtime = now;
        self.ctime = now;
    }
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Owning storage for all nodes of one instance
#[derive(Default)]
pub struct NodeArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl NodeArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a node, returning its id
    pub fn insert(&mut self, node: Node) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId { index, generation: 0 }
    }

    /// Look up a live node
    pub fn get(&self, id: NodeId) -> ImfsResult<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(ImfsError::NotFound)
    }

    /// Look up a live node mutably
    pub fn get_mut(&mut self, id: NodeId) -> ImfsResult<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(ImfsError::NotFound)
    }

    /// Check whether an id still names a live node
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_ok()
    }

    /// Take a node out of the arena, invalidating its id
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(node)
    }

    /// Take every remaining node out, invalidating all ids
    pub fn drain(&mut self) -> Vec<Node> {
        let mut drained = Vec::with_capacity(self.live);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(node) = slot.node.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                drained.push(node);
            }
        }
        self.live = 0;
        drained
    }

    /// Live nodes in slot order
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.slots.iter().filter_map(|slot| slot.node.as_ref())
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(name: &str) -> Node {
        Node::new(String::from(name), 0o755, 0, 0, 1, 0, NodeKind::Directory(Directory::default()))
    }

    #[test]
    fn test_arena_insert_get() {
        let mut arena = NodeArena::new();
        let a = arena.insert(dir("a"));
        let b = arena.insert(dir("b"));
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a).unwrap().name, "a");
        assert_eq!(arena.get(b).unwrap().name, "b");
    }

    #[test]
    fn test_stale_id_after_reuse() {
        let mut arena = NodeArena::new();
        let a = arena.insert(dir("a"));
        assert!(arena.remove(a).is_some());
        let b = arena.insert(dir("b"));

        // Same slot, new generation
        assert_eq!(a.index(), b.index());
        assert_eq!(arena.get(a).err(), Some(ImfsError::NotFound));
        assert!(arena.remove(a).is_none());
        assert_eq!(arena.get(b).unwrap().name, "b");
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_full_mode() {
        let node = dir("d");
        assert_eq!(node.full_mode(), S_IFDIR | 0o755);
        let link = Node::new(String::from("l"), 0o777, 0, 0, 2, 0, NodeKind::SymLink(String::from("/x")));
        assert_eq!(link.full_mode() & crate::permissions::S_IFMT, S_IFLNK);
        assert_eq!(link.node_type(), NodeType::SymLink);
        assert_eq!(link.directory().err(), Some(ImfsError::NotADirectory));
    }

    #[test]
    fn test_device_rdev() {
        let dev = Device { kind: DeviceKind::Char, major: 4, minor: 1 };
        assert_eq!(dev.rdev(), (4 << 8) | 1);
    }
}
