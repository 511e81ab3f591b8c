//! Mount table management
//!
//! An ordered list of entries, each binding a mounted [`Imfs`] instance to
//! the directory it is mounted on. The entry without a mount point is the
//! root instance. Mount-point directories refer back to their entry by
//! [`MountId`]; the table itself owns the instances.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::config::MountOptions;
use crate::imfs::Imfs;
use crate::vfs::Location;
use crate::{ImfsError, ImfsResult};

/// Identifier of a mount table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MountId(u32);

impl MountId {
    pub const fn new(id: u32) -> Self {
        MountId(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// What a filesystem initializer gets to build its instance
#[derive(Debug, Clone)]
pub struct MountContext {
    /// Entry the new instance will be registered under
    pub id: MountId,
    pub options: MountOptions,
    /// Device name given to mount, if any
    pub device: Option<String>,
}

impl MountContext {
    pub fn new(id: MountId, options: MountOptions, device: Option<&str>) -> Self {
        MountContext {
            id,
            options,
            device: device.map(String::from),
        }
    }
}

/// A mountable filesystem type
pub trait FilesystemType: Send + Sync {
    /// Type name shown in mount listings
    fn name(&self) -> &'static str;

    /// Build a new instance with its root directory
    ///
    /// Fails with `NoMemory` or `NotSupported`.
    fn initialize(&self, ctx: &MountContext) -> ImfsResult<Arc<Imfs>>;
}

/// A mounted instance
pub struct MountEntry {
    pub id: MountId,
    pub fs: Arc<Imfs>,
    /// Directory in the hosting instance; `None` for the root instance
    pub mount_point: Option<Location>,
    pub fs_type: &'static str,
    pub options: MountOptions,
    pub device: Option<String>,
}

/// Summary of a mount entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub id: MountId,
    pub fs_type: &'static str,
    pub options: MountOptions,
    pub device: Option<String>,
    /// Entry of the hosting instance; `None` for the root instance
    pub parent: Option<MountId>,
}

struct MountList {
    entries: Vec<MountEntry>,
    next_id: u32,
}

/// Mount table of one [`Vfs`](crate::Vfs)
pub struct MountTable {
    inner: Mutex<MountList>,
}

impl MountTable {
    /// Create an empty mount table
    pub fn new() -> Self {
        MountTable {
            inner: Mutex::new(MountList {
                entries: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Reserve an id for an instance about to be initialized
    pub fn allocate_id(&self) -> MountId {
        let mut list = self.inner.lock();
        let id = MountId(list.next_id);
        list.next_id += 1;
        id
    }

    /// Append an entry
    ///
    /// Only one entry may lack a mount point.
    pub fn insert(&self, entry: MountEntry) -> ImfsResult<()> {
        let mut list = self.inner.lock();
        if entry.mount_point.is_none() && list.entries.iter().any(|e| e.mount_point.is_none()) {
            return Err(ImfsError::Busy);
        }
        list.entries.push(entry);
        Ok(())
    }

    /// Remove an entry, handing back its instance
    pub fn remove(&self, id: MountId) -> Option<MountEntry> {
        let mut list = self.inner.lock();
        let position = list.entries.iter().position(|e| e.id == id)?;
        Some(list.entries.remove(position))
    }

    /// Root of the root instance
    pub fn root(&self) -> Option<Location> {
        let list = self.inner.lock();
        list.entries
            .iter()
            .find(|e| e.mount_point.is_none())
            .map(|e| Location::root_of(&e.fs))
    }

    pub fn has_root(&self) -> bool {
        self.inner.lock().entries.iter().any(|e| e.mount_point.is_none())
    }

    /// Root of a mounted instance
    pub fn root_of(&self, id: MountId) -> ImfsResult<Location> {
        let list = self.inner.lock();
        list.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| Location::root_of(&e.fs))
            .ok_or(ImfsError::NotMounted)
    }

    /// Directory an instance is mounted on; `None` for the root instance
    pub fn mount_point_of(&self, id: MountId) -> Option<Location> {
        let list = self.inner.lock();
        list.entries
            .iter()
            .find(|e| e.id == id)
            .and_then(|e| e.mount_point.clone())
    }

    /// Check if the entry exists and is the root instance
    pub fn is_root_instance(&self, id: MountId) -> bool {
        let list = self.inner.lock();
        list.entries.iter().any(|e| e.id == id && e.mount_point.is_none())
    }

    /// Entry mounted on `location`, by linear scan
    pub fn find_mount_for(&self, location: &Location) -> Option<MountId> {
        let list = self.inner.lock();
        list.entries
            .iter()
            .find(|e| e.mount_point.as_ref() == Some(location))
            .map(|e| e.id)
    }

    /// Check if any instance is mounted somewhere inside instance `id`
    pub fn has_nested(&self, id: MountId) -> bool {
        let list = self.inner.lock();
        list.entries
            .iter()
            .filter_map(|e| e.mount_point.as_ref())
            .any(|mp| mp.fs.mount_id() == id)
    }

    /// Snapshot of every entry in mount order
    pub fn list(&self) -> Vec<MountInfo> {
        let list = self.inner.lock();
        list.entries
            .iter()
            .map(|e| MountInfo {
                id: e.id,
                fs_type: e.fs_type,
                options: e.options,
                device: e.device.clone(),
                parent: e.mount_point.as_ref().map(|mp| mp.fs.mount_id()),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imfs::ImfsType;

    fn entry(table: &MountTable, mount_point: Option<Location>) -> (MountId, Arc<Imfs>) {
        let id = table.allocate_id();
        let ctx = MountContext::new(id, MountOptions::ReadWrite, Some("ram0"));
        let fs = ImfsType::default().initialize(&ctx).unwrap();
        table
            .insert(MountEntry {
                id,
                fs: fs.clone(),
                mount_point,
                fs_type: "imfs",
                options: MountOptions::ReadWrite,
                device: ctx.device.clone(),
            })
            .unwrap();
        (id, fs)
    }

    #[test]
    fn test_root_and_nested_entries() {
        let table = MountTable::new();
        assert!(table.root().is_none());

        let (root_id, root_fs) = entry(&table, None);
        let root = table.root().unwrap();
        assert_eq!(root, Location::root_of(&root_fs));
        assert!(table.is_root_instance(root_id));

        let (child_id, _) = entry(&table, Some(root.clone()));
        assert_eq!(table.find_mount_for(&root), Some(child_id));
        assert_eq!(table.mount_point_of(child_id), Some(root));
        assert!(table.has_nested(root_id));
        assert!(!table.has_nested(child_id));

        let listing = table.list();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[1].parent, Some(root_id));
        assert_eq!(listing[1].device.as_deref(), Some("ram0"));

        assert!(table.remove(child_id).is_some());
        assert!(!table.has_nested(root_id));
        assert_eq!(table.root_of(child_id).err(), Some(ImfsError::NotMounted));
    }

    #[test]
    fn test_single_root_instance() {
        let table = MountTable::new();
        entry(&table, None);
        let id = table.allocate_id();
        let ctx = MountContext::new(id, MountOptions::ReadWrite, None);
        let fs = ImfsType::default().initialize(&ctx).unwrap();
        let second = table.insert(MountEntry {
            id,
            fs,
            mount_point: None,
            fs_type: "imfs",
            options: MountOptions::ReadWrite,
            device: None,
        });
        assert_eq!(second, Err(ImfsError::Busy));
        assert_eq!(table.len(), 1);
    }
}
