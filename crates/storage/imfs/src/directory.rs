//! Directory engine
//!
//! Children are kept in insertion order, which is also the enumeration
//! order of the directory stream. Reading a directory produces fixed-size
//! little-endian records:
//!
//! ```text
//! offset  size  field
//!      0     8  ino      inode number
//!      8     8  off      stream offset of the next record
//!     16     2  reclen   RECORD_SIZE
//!     18     2  namlen   name length
//!     20    33  name     NUL terminated, NAME_MAX + 1
//!     53     3  padding
//! ```

use alloc::string::String;

use crate::node::{NodeArena, NodeId};
use crate::{ImfsError, ImfsResult, NAME_MAX};

/// Size of one directory stream record
pub const RECORD_SIZE: usize = 56;

const INO_OFFSET: usize = 0;
const OFF_OFFSET: usize = 8;
const RECLEN_OFFSET: usize = 16;
const NAMLEN_OFFSET: usize = 18;
const NAME_OFFSET: usize = 20;

/// Decoded directory stream record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryRecord {
    pub ino: u64,
    /// Stream offset to restart reading after this record
    pub off: i64,
    pub reclen: u16,
    pub name: String,
}

impl DirEntryRecord {
    /// Serialize into the first `RECORD_SIZE` bytes of `out`
    fn encode(&self, out: &mut [u8]) {
        let record = &mut out[..RECORD_SIZE];
        record.fill(0);
        let name = &self.name.as_bytes()[..self.name.len().min(NAME_MAX)];
        record[INO_OFFSET..INO_OFFSET + 8].copy_from_slice(&self.ino.to_le_bytes());
        record[OFF_OFFSET..OFF_OFFSET + 8].copy_from_slice(&self.off.to_le_bytes());
        record[RECLEN_OFFSET..RECLEN_OFFSET + 2].copy_from_slice(&self.reclen.to_le_bytes());
        record[NAMLEN_OFFSET..NAMLEN_OFFSET + 2].copy_from_slice(&(name.len() as u16).to_le_bytes());
        record[NAME_OFFSET..NAME_OFFSET + name.len()].copy_from_slice(name);
    }

    /// Decode one record from the start of `bytes`
    pub fn parse(bytes: &[u8]) -> ImfsResult<Self> {
        if bytes.len() < RECORD_SIZE {
            return Err(ImfsError::InvalidArgument);
        }
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let mut word = [0u8; 8];

        word.copy_from_slice(&bytes[INO_OFFSET..INO_OFFSET + 8]);
        let ino = u64::from_le_bytes(word);
        word.copy_from_slice(&bytes[OFF_OFFSET..OFF_OFFSET + 8]);
        let off = i64::from_le_bytes(word);
        let reclen = u16_at(RECLEN_OFFSET);
        let namlen = u16_at(NAMLEN_OFFSET) as usize;
        if namlen > NAME_MAX {
            return Err(ImfsError::InvalidArgument);
        }
        let name = core::str::from_utf8(&bytes[NAME_OFFSET..NAME_OFFSET + namlen])
            .map_err(|_| ImfsError::InvalidArgument)?;

        Ok(DirEntryRecord {
            ino,
            off,
            reclen,
            name: String::from(name),
        })
    }
}

/// Append `child` to `dir` and point its parent back at `dir`
pub fn insert(nodes: &mut NodeArena, dir: NodeId, child: NodeId) -> ImfsResult<()> {
    let name = nodes.get(child)?.name.clone();
    if lookup(nodes, dir, &name)?.is_some() {
        return Err(ImfsError::AlreadyExists);
    }
    nodes.get_mut(dir)?.directory_mut()?.children.push(child);
    nodes.get_mut(child)?.parent = Some(dir);
    Ok(())
}

/// Detach `child` from `dir`; the node itself stays in the arena
pub fn remove(nodes: &mut NodeArena, dir: NodeId, child: NodeId) -> ImfsResult<()> {
    let children = &mut nodes.get_mut(dir)?.directory_mut()?.children;
    let position = children
        .iter()
        .position(|&id| id == child)
        .ok_or(ImfsError::NotFound)?;
    children.remove(position);
    nodes.get_mut(child)?.parent = None;
    Ok(())
}

/// Find a child by exact name
///
/// `"."` is the directory itself and `".."` its parent (itself at an
/// instance root).
pub fn lookup(nodes: &NodeArena, dir: NodeId, name: &str) -> ImfsResult<Option<NodeId>> {
    let node = nodes.get(dir)?;
    let directory = node.directory()?;
    match name {
        "." => Ok(Some(dir)),
        ".." => Ok(Some(node.parent.unwrap_or(dir))),
        _ => Ok(directory
            .children
            .iter()
            .copied()
            .find(|&child| nodes.get(child).map(|c| c.name == name).unwrap_or(false))),
    }
}

/// Number of records in the directory stream
pub fn entry_count(nodes: &NodeArena, dir: NodeId) -> ImfsResult<usize> {
    Ok(nodes.get(dir)?.directory()?.children.len())
}

/// Fill `buf` with whole records starting at stream offset `offset`
///
/// Returns the number of bytes produced; 0 at the end of the stream.
pub fn read_stream(nodes: &NodeArena, dir: NodeId, offset: u64, buf: &mut [u8]) -> ImfsResult<usize> {
    if buf.len() < RECORD_SIZE {
        return Err(ImfsError::InvalidArgument);
    }
    let children = &nodes.get(dir)?.directory()?.children;
    let first = (offset / RECORD_SIZE as u64) as usize;
    let fit = buf.len() / RECORD_SIZE;
    let last = children.len().min(first.saturating_add(fit));
    if first >= last {
        return Ok(0);
    }

    for (slot, index) in (first..last).enumerate() {
        let child = nodes.get(children[index])?;
        let record = DirEntryRecord {
            ino: child.ino,
            off: ((index + 1) * RECORD_SIZE) as i64,
            reclen: RECORD_SIZE as u16,
            name: child.name.clone(),
        };
        record.encode(&mut buf[slot * RECORD_SIZE..]);
    }
    Ok((last - first) * RECORD_SIZE)
}

/// Round a stream offset down to a record boundary
pub fn seek_position(offset: u64) -> u64 {
    offset - offset % RECORD_SIZE as u64
}

/// Check that a directory may be removed
///
/// Fails with `Busy` for an instance root or a directory something is
/// mounted on, and otherwise with `DirectoryNotEmpty` while it has children.
pub fn check_removable(nodes: &NodeArena, dir: NodeId, root: NodeId) -> ImfsResult<()> {
    let node = nodes.get(dir)?;
    let directory = node.directory()?;
    if dir == root || directory.mounted.is_some() {
        return Err(ImfsError::Busy);
    }
    if !directory.children.is_empty() {
        return Err(ImfsError::DirectoryNotEmpty);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::MountId;
    use crate::node::{Directory, Node, NodeKind};
    use alloc::format;
    use alloc::vec;
    use alloc::vec::Vec;

    fn new_dir(nodes: &mut NodeArena, name: &str) -> NodeId {
        nodes.insert(Node::new(
            String::from(name),
            0o755,
            0,
            0,
            nodes.len() as u64 + 1,
            0,
            NodeKind::Directory(Directory::default()),
        ))
    }

    fn tree(children: usize) -> (NodeArena, NodeId) {
        let mut nodes = NodeArena::new();
        let root = new_dir(&mut nodes, "");
        for i in 0..children {
            let child = new_dir(&mut nodes, &format!("entry{}", i));
            insert(&mut nodes, root, child).unwrap();
        }
        (nodes, root)
    }

    #[test]
    fn test_insert_lookup_remove() {
        let mut nodes = NodeArena::new();
        let root = new_dir(&mut nodes, "");
        let a = new_dir(&mut nodes, "a");
        insert(&mut nodes, root, a).unwrap();

        assert_eq!(lookup(&nodes, root, "a").unwrap(), Some(a));
        assert_eq!(lookup(&nodes, root, "b").unwrap(), None);
        assert_eq!(lookup(&nodes, a, "..").unwrap(), Some(root));
        assert_eq!(lookup(&nodes, root, "..").unwrap(), Some(root));
        assert_eq!(lookup(&nodes, a, ".").unwrap(), Some(a));

        let dup = new_dir(&mut nodes, "a");
        assert_eq!(insert(&mut nodes, root, dup), Err(ImfsError::AlreadyExists));

        remove(&mut nodes, root, a).unwrap();
        assert_eq!(lookup(&nodes, root, "a").unwrap(), None);
        assert_eq!(nodes.get(a).unwrap().parent, None);
        assert_eq!(remove(&mut nodes, root, a), Err(ImfsError::NotFound));
    }

    #[test]
    fn test_record_layout() {
        let (nodes, root) = tree(1);
        let mut buf = [0xffu8; RECORD_SIZE];
        assert_eq!(read_stream(&nodes, root, 0, &mut buf).unwrap(), RECORD_SIZE);

        assert_eq!(u64::from_le_bytes(buf[0..8].try_into().unwrap()), 2);
        assert_eq!(i64::from_le_bytes(buf[8..16].try_into().unwrap()), RECORD_SIZE as i64);
        assert_eq!(u16::from_le_bytes([buf[16], buf[17]]), RECORD_SIZE as u16);
        assert_eq!(u16::from_le_bytes([buf[18], buf[19]]), 6);
        assert_eq!(&buf[20..26], b"entry0");
        assert!(buf[26..].iter().all(|&b| b == 0));

        let record = DirEntryRecord::parse(&buf).unwrap();
        assert_eq!(record.name, "entry0");
        assert_eq!(record.ino, 2);
    }

    #[test]
    fn test_chunked_reads_yield_every_entry_once() {
        let (nodes, root) = tree(7);
        for chunk in [RECORD_SIZE, RECORD_SIZE + 1, 2 * RECORD_SIZE + 30, 10 * RECORD_SIZE] {
            let mut names = Vec::new();
            let mut offset = 0u64;
            let mut buf = vec![0u8; chunk];
            loop {
                let n = read_stream(&nodes, root, offset, &mut buf).unwrap();
                if n == 0 {
                    break;
                }
                assert_eq!(n % RECORD_SIZE, 0);
                for record in buf[..n].chunks(RECORD_SIZE) {
                    names.push(DirEntryRecord::parse(record).unwrap().name);
                }
                offset += n as u64;
            }
            let expected: Vec<String> = (0..7).map(|i| format!("entry{}", i)).collect();
            assert_eq!(names, expected, "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_buffer_smaller_than_record() {
        let (nodes, root) = tree(1);
        let mut buf = [0u8; RECORD_SIZE - 1];
        assert_eq!(read_stream(&nodes, root, 0, &mut buf), Err(ImfsError::InvalidArgument));
    }

    #[test]
    fn test_seek_position_rounds_down() {
        assert_eq!(seek_position(0), 0);
        assert_eq!(seek_position(RECORD_SIZE as u64 + 3), RECORD_SIZE as u64);
    }

    #[test]
    fn test_check_removable() {
        let (mut nodes, root) = tree(1);
        assert_eq!(check_removable(&nodes, root, root), Err(ImfsError::Busy));

        let child = lookup(&nodes, root, "entry0").unwrap().unwrap();
        assert!(check_removable(&nodes, child, root).is_ok());

        nodes.get_mut(child).unwrap().directory_mut().unwrap().mounted = Some(MountId::new(2));
        assert_eq!(check_removable(&nodes, child, root), Err(ImfsError::Busy));

        let grandchild = new_dir(&mut nodes, "x");
        insert(&mut nodes, child, grandchild).unwrap();
        assert_eq!(check_removable(&nodes, child, root), Err(ImfsError::Busy));
        nodes.get_mut(child).unwrap().directory_mut().unwrap().mounted = None;
        assert_eq!(check_removable(&nodes, child, root), Err(ImfsError::DirectoryNotEmpty));

        let empty_root = new_dir(&mut nodes, "");
        assert_eq!(check_removable(&nodes, empty_root, empty_root), Err(ImfsError::Busy));
    }
}
