//! Filesystem context and namespace operations
//!
//! [`Vfs`] owns the mount table and the driver registry. Every operation
//! takes the caller's [`Context`]; nothing here is global.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::config::MountOptions;
use crate::device::{DeviceDriver, DeviceRegistry};
use crate::directory::{self, DirEntryRecord, RECORD_SIZE};
use crate::eval::{self, EvalOptions, Resolved};
use crate::file::{FileStat, FsStats, OpenFlags};
use crate::handle::FileHandle;
use crate::imfs::Imfs;
use crate::linfile::LinearFile;
use crate::memfile::MemFile;
use crate::mount::{FilesystemType, MountContext, MountEntry, MountId, MountTable};
use crate::node::{Device, DeviceKind, Directory, NodeId, NodeKind};
use crate::ops::ops_for;
use crate::permissions::{
    can_change_attributes, check_permission, mode_file_type, AccessMode, Credentials, S_IFBLK, S_IFCHR,
    S_IFDIR, S_IFIFO, S_IFREG,
};
use crate::pipe::Fifo;
use crate::{lifecycle, path, ImfsError, ImfsResult, LINK_MAX};

/// A node together with the instance that owns it
#[derive(Clone)]
pub struct Location {
    pub fs: Arc<Imfs>,
    pub node: NodeId,
}

impl Location {
    pub fn new(fs: Arc<Imfs>, node: NodeId) -> Self {
        Location { fs, node }
    }

    /// Root directory of an instance
    pub fn root_of(fs: &Arc<Imfs>) -> Self {
        Location {
            fs: Arc::clone(fs),
            node: fs.root(),
        }
    }

    pub fn is_instance_root(&self) -> bool {
        self.node == self.fs.root()
    }

    pub fn same_instance(&self, other: &Location) -> bool {
        Arc::ptr_eq(&self.fs, &other.fs)
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        self.same_instance(other) && self.node == other.node
    }
}

impl Eq for Location {}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Location")
            .field("mount", &self.fs.mount_id())
            .field("node", &self.node)
            .finish()
    }
}

/// Per-caller state: identity and current directory
#[derive(Debug, Clone)]
pub struct Context {
    pub creds: Credentials,
    pub cwd: Location,
}

/// Mount table, driver registry and the operations on them
pub struct Vfs {
    mounts: MountTable,
    drivers: DeviceRegistry,
}

fn access_for(flags: OpenFlags) -> AccessMode {
    match (flags.read, flags.write) {
        (true, true) => AccessMode::ReadWrite,
        (false, true) => AccessMode::Write,
        (true, false) => AccessMode::Read,
        (false, false) => AccessMode::Exists,
    }
}

impl Vfs {
    /// Create a VFS with nothing mounted
    pub fn new() -> Self {
        Vfs {
            mounts: MountTable::new(),
            drivers: DeviceRegistry::new(),
        }
    }

    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    pub fn drivers(&self) -> &DeviceRegistry {
        &self.drivers
    }

    /// Root directory of the root instance
    pub fn root(&self) -> ImfsResult<Location> {
        self.mounts.root().ok_or(ImfsError::NotMounted)
    }

    /// Context for `creds` starting in the root directory
    pub fn context(&self, creds: Credentials) -> ImfsResult<Context> {
        Ok(Context {
            creds,
            cwd: self.root()?,
        })
    }

    // ========== Mounts ==========

    /// Mount the root instance
    pub fn mount_root(&self, fs_type: &dyn FilesystemType, options: &str) -> ImfsResult<MountId> {
        let options = MountOptions::parse(options)?;
        if self.mounts.has_root() {
            return Err(ImfsError::Busy);
        }
        let id = self.mounts.allocate_id();
        let fs = fs_type.initialize(&MountContext::new(id, options, None))?;
        self.mounts.insert(MountEntry {
            id,
            fs,
            mount_point: None,
            fs_type: fs_type.name(),
            options,
            device: None,
        })?;
        log::info!("imfs: mounted {} as root (mount {})", fs_type.name(), id.as_u32());
        Ok(id)
    }

    /// Mount a new instance of `fs_type` on the directory `target`
    pub fn mount(
        &self,
        ctx: &Context,
        fs_type: &dyn FilesystemType,
        options: &str,
        device: Option<&str>,
        target: &str,
    ) -> ImfsResult<MountId> {
        let options = MountOptions::parse(options)?;
        let mount_point = self.locate(ctx, target, EvalOptions::default())?;
        // Resolving through an existing mount lands on that instance's root
        if mount_point.is_instance_root() {
            return Err(ImfsError::Busy);
        }
        {
            let inner = mount_point.fs.lock();
            let node = inner.node(mount_point.node)?;
            if !node.is_directory() {
                return Err(ImfsError::NotADirectory);
            }
            check_permission(&ctx.creds, node, AccessMode::WriteExecute)?;
            if node.mounted().is_some() {
                return Err(ImfsError::Busy);
            }
        }

        let id = self.mounts.allocate_id();
        let fs = fs_type.initialize(&MountContext::new(id, options, device))?;
        {
            let mut inner = mount_point.fs.lock();
            inner.check_active()?;
            let dir = inner.node_mut(mount_point.node)?.directory_mut()?;
            if dir.mounted.is_some() {
                return Err(ImfsError::Busy);
            }
            dir.mounted = Some(id);
        }

        let host = mount_point.fs.mount_id();
        let entry = MountEntry {
            id,
            fs,
            mount_point: Some(mount_point.clone()),
            fs_type: fs_type.name(),
            options,
            device: device.map(String::from),
        };
        if let Err(e) = self.mounts.insert(entry) {
            self.clear_mount_point(&mount_point);
            return Err(e);
        }
        log::info!(
            "imfs: mounted {} at '{}' (mount {} on mount {})",
            fs_type.name(),
            target,
            id.as_u32(),
            host.as_u32()
        );
        Ok(id)
    }

    /// Unmount the instance whose root `target` resolves to
    pub fn unmount(&self, ctx: &Context, target: &str) -> ImfsResult<()> {
        let location = self.locate(ctx, target, EvalOptions::default())?;
        if !location.is_instance_root() {
            return Err(ImfsError::NotMounted);
        }
        let id = location.fs.mount_id();
        let Some(mount_point) = self.mounts.mount_point_of(id) else {
            return Err(if self.mounts.is_root_instance(id) {
                ImfsError::Busy
            } else {
                ImfsError::NotMounted
            });
        };

        if ctx.cwd.same_instance(&location) {
            return Err(ImfsError::Busy);
        }
        if self.mounts.has_nested(id) {
            return Err(ImfsError::Busy);
        }

        // Open handles and mounts inside are re-checked under the instance lock
        location.fs.teardown()?;
        self.mounts.remove(id);
        self.clear_mount_point(&mount_point);
        log::info!("imfs: unmounted '{}' (mount {})", target, id.as_u32());
        Ok(())
    }

    fn clear_mount_point(&self, mount_point: &Location) {
        let mut inner = mount_point.fs.lock();
        if let Ok(dir) = inner.node_mut(mount_point.node).and_then(|node| node.directory_mut()) {
            dir.mounted = None;
        }
    }

    /// Mount entry whose mount point is `location`
    pub fn find_mount_for(&self, location: &Location) -> Option<MountId> {
        self.mounts.find_mount_for(location)
    }

    /// Register the driver serving device nodes with this major number
    pub fn register_driver(&self, major: u32, driver: Arc<dyn DeviceDriver>) {
        self.drivers.register(major, driver);
    }

    /// Drop the driver for `major`; its device nodes then open as `NoDevice`
    pub fn unregister_driver(&self, major: u32) -> Option<Arc<dyn DeviceDriver>> {
        self.drivers.unregister(major)
    }

    // ========== Resolution ==========

    /// Evaluate a path
    pub fn resolve(&self, ctx: &Context, path: &str, options: EvalOptions) -> ImfsResult<Resolved> {
        eval::evaluate(self, ctx, path, options)
    }

    fn locate(&self, ctx: &Context, path: &str, options: EvalOptions) -> ImfsResult<Location> {
        self.resolve(ctx, path, options)?.found()
    }

    /// Create a node at `path`, which must not exist yet
    fn create_at(&self, ctx: &Context, path: &str, mode: u32, kind: NodeKind) -> ImfsResult<Location> {
        match self.resolve(ctx, path, EvalOptions::create())? {
            Resolved::Found(_) => Err(ImfsError::AlreadyExists),
            Resolved::Missing { parent, name } => {
                let id = parent.fs.lock().create_node(parent.node, &name, mode, &ctx.creds, kind)?;
                Ok(Location::new(parent.fs, id))
            }
        }
    }

    // ========== Node creation ==========

    pub fn mkdir(&self, ctx: &Context, path: &str, mode: u32) -> ImfsResult<()> {
        self.create_at(ctx, path, mode, NodeKind::Directory(Directory::default()))?;
        Ok(())
    }

    /// Create an empty memory file
    pub fn create(&self, ctx: &Context, path: &str, mode: u32) -> ImfsResult<()> {
        self.create_at(ctx, path, mode, NodeKind::MemFile(MemFile::new()))?;
        Ok(())
    }

    /// Create a node of the type in `mode`'s file type bits
    ///
    /// Device nodes take their major/minor numbers from `rdev`
    /// (`major << 8 | minor`).
    pub fn mknod(&self, ctx: &Context, path: &str, mode: u32, rdev: u64) -> ImfsResult<()> {
        let device = |kind| Device {
            kind,
            major: (rdev >> 8) as u32,
            minor: (rdev & 0xff) as u32,
        };
        let kind = match mode_file_type(mode) {
            S_IFDIR => NodeKind::Directory(Directory::default()),
            0 | S_IFREG => NodeKind::MemFile(MemFile::new()),
            S_IFCHR => NodeKind::Device(device(DeviceKind::Char)),
            S_IFBLK => NodeKind::Device(device(DeviceKind::Block)),
            S_IFIFO => NodeKind::Fifo(Arc::new(Fifo::new())),
            _ => return Err(ImfsError::InvalidArgument),
        };
        self.create_at(ctx, path, mode, kind)?;
        Ok(())
    }

    /// Create a read-only file backed by `image` in place
    pub fn make_linear_file(&self, ctx: &Context, path: &str, mode: u32, image: &'static [u8]) -> ImfsResult<()> {
        self.create_at(ctx, path, mode, NodeKind::LinearFile(LinearFile::new(image)))?;
        Ok(())
    }

    /// Create a node whose operations are provided by `driver`
    pub fn make_generic_node(
        &self,
        ctx: &Context,
        path: &str,
        mode: u32,
        driver: Arc<dyn DeviceDriver>,
    ) -> ImfsResult<()> {
        self.create_at(ctx, path, mode, NodeKind::Generic(driver))?;
        Ok(())
    }

    /// Create a symbolic link at `path` pointing to `target`
    pub fn symlink(&self, ctx: &Context, target: &str, path: &str) -> ImfsResult<()> {
        if target.is_empty() {
            return Err(ImfsError::NotFound);
        }
        self.create_at(ctx, path, 0o777, NodeKind::SymLink(String::from(target)))?;
        Ok(())
    }

    pub fn readlink(&self, ctx: &Context, path: &str) -> ImfsResult<String> {
        let location = self.locate(ctx, path, EvalOptions::no_follow())?;
        let inner = location.fs.lock();
        match &inner.node(location.node)?.kind {
            NodeKind::SymLink(target) => Ok(target.clone()),
            _ => Err(ImfsError::InvalidArgument),
        }
    }

    /// Create a hard link `new_path` to `existing`
    pub fn link(&self, ctx: &Context, existing: &str, new_path: &str) -> ImfsResult<()> {
        let target = self.locate(ctx, existing, EvalOptions::default())?;
        let (parent, name) = match self.resolve(ctx, new_path, EvalOptions::create())? {
            Resolved::Found(_) => return Err(ImfsError::AlreadyExists),
            Resolved::Missing { parent, name } => (parent, name),
        };
        if !parent.same_instance(&target) {
            return Err(ImfsError::CrossDevice);
        }

        let mut inner = target.fs.lock();
        let node = inner.node(target.node)?;
        if node.is_directory() {
            return Err(ImfsError::NotPermitted);
        }
        if node.nlink >= LINK_MAX {
            return Err(ImfsError::TooManyLinks);
        }
        let mode = node.mode;
        inner.create_node(parent.node, &name, mode, &ctx.creds, NodeKind::HardLink(target.node))?;
        lifecycle::add_link(&mut inner, target.node)
    }

    // ========== Removal ==========

    /// Remove a non-directory name
    pub fn unlink(&self, ctx: &Context, path: &str) -> ImfsResult<()> {
        let location = self.locate(ctx, path, EvalOptions::no_follow())?;
        let mut inner = location.fs.lock();
        let node = inner.node(location.node)?;
        if node.is_directory() {
            return Err(ImfsError::IsADirectory);
        }
        let node_type = node.node_type();
        let parent = node.parent.ok_or(ImfsError::Busy)?;
        check_permission(&ctx.creds, inner.node(parent)?, AccessMode::WriteExecute)?;
        ops_for(node_type).remove(&mut inner, location.node)
    }

    /// Remove an empty directory
    pub fn rmdir(&self, ctx: &Context, path: &str) -> ImfsResult<()> {
        let location = self.locate(ctx, path, EvalOptions::no_follow())?;
        let mut inner = location.fs.lock();
        let node = inner.node(location.node)?;
        if !node.is_directory() {
            return Err(ImfsError::NotADirectory);
        }
        let node_type = node.node_type();
        let Some(parent) = node.parent else {
            // Instance roots (including mounted ones) stay
            return Err(ImfsError::Busy);
        };
        check_permission(&ctx.creds, inner.node(parent)?, AccessMode::WriteExecute)?;
        ops_for(node_type).remove(&mut inner, location.node)
    }

    /// Move `old_path` to `new_path` inside one instance
    pub fn rename(&self, ctx: &Context, old_path: &str, new_path: &str) -> ImfsResult<()> {
        let source = self.locate(ctx, old_path, EvalOptions::no_follow())?;
        let (new_parent, new_name) = match self.resolve(ctx, new_path, EvalOptions::create())? {
            Resolved::Found(_) => return Err(ImfsError::AlreadyExists),
            Resolved::Missing { parent, name } => (parent, name),
        };
        if !new_parent.same_instance(&source) {
            return Err(ImfsError::CrossDevice);
        }

        let mut inner = source.fs.lock();
        inner.check_writable()?;
        path::check_name(&new_name)?;
        let node = inner.node(source.node)?;
        if node.mounted().is_some() {
            return Err(ImfsError::Busy);
        }
        let old_parent = node.parent.ok_or(ImfsError::Busy)?;
        let moving_directory = node.is_directory();
        check_permission(&ctx.creds, inner.node(old_parent)?, AccessMode::WriteExecute)?;

        if moving_directory {
            // A directory cannot move below itself
            let mut cursor = Some(new_parent.node);
            while let Some(id) = cursor {
                if id == source.node {
                    return Err(ImfsError::InvalidArgument);
                }
                cursor = inner.node(id)?.parent;
            }
        }

        let now = inner.now();
        let old_name = core::mem::replace(&mut inner.node_mut(source.node)?.name, new_name);
        directory::remove(&mut inner.nodes, old_parent, source.node)?;
        if let Err(e) = directory::insert(&mut inner.nodes, new_parent.node, source.node) {
            inner.node_mut(source.node)?.name = old_name;
            directory::insert(&mut inner.nodes, old_parent, source.node)?;
            return Err(e);
        }
        inner.node_mut(source.node)?.touch_ctime(now);
        inner.node_mut(old_parent)?.touch_mtime(now);
        inner.node_mut(new_parent.node)?.touch_mtime(now);
        Ok(())
    }

    // ========== Attributes ==========

    pub fn stat(&self, ctx: &Context, path: &str) -> ImfsResult<FileStat> {
        let location = self.locate(ctx, path, EvalOptions::default())?;
        Self::stat_location(&location)
    }

    /// Like `stat`, but reports a symbolic link itself
    pub fn lstat(&self, ctx: &Context, path: &str) -> ImfsResult<FileStat> {
        let location = self.locate(ctx, path, EvalOptions::no_follow())?;
        Self::stat_location(&location)
    }

    fn stat_location(location: &Location) -> ImfsResult<FileStat> {
        let inner = location.fs.lock();
        let node_type = inner.node(location.node)?.node_type();
        ops_for(node_type).stat(&inner, location.node)
    }

    /// Change permission bits; owner or uid 0 only
    pub fn chmod(&self, ctx: &Context, path: &str, mode: u32) -> ImfsResult<()> {
        let location = self.locate(ctx, path, EvalOptions::default())?;
        let mut inner = location.fs.lock();
        let node = inner.node(location.node)?;
        if !can_change_attributes(&ctx.creds, node) {
            return Err(ImfsError::NotPermitted);
        }
        let node_type = node.node_type();
        ops_for(node_type).chmod(&mut inner, location.node, mode)
    }

    /// Change ownership; owner or uid 0 only
    pub fn chown(&self, ctx: &Context, path: &str, uid: u32, gid: u32) -> ImfsResult<()> {
        let location = self.locate(ctx, path, EvalOptions::default())?;
        let mut inner = location.fs.lock();
        inner.check_writable()?;
        let now = inner.now();
        let node = inner.node_mut(location.node)?;
        if !can_change_attributes(&ctx.creds, node) {
            return Err(ImfsError::NotPermitted);
        }
        node.uid = uid;
        node.gid = gid;
        node.touch_ctime(now);
        Ok(())
    }

    /// Set access and modification times; owner or uid 0 only
    pub fn utime(&self, ctx: &Context, path: &str, atime: u64, mtime: u64) -> ImfsResult<()> {
        let location = self.locate(ctx, path, EvalOptions::default())?;
        let mut inner = location.fs.lock();
        inner.check_writable()?;
        let now = inner.now();
        let node = inner.node_mut(location.node)?;
        if !can_change_attributes(&ctx.creds, node) {
            return Err(ImfsError::NotPermitted);
        }
        node.atime = atime;
        node.mtime = mtime;
        node.touch_ctime(now);
        Ok(())
    }

    pub fn truncate(&self, ctx: &Context, path: &str, length: i64) -> ImfsResult<()> {
        let size = u64::try_from(length).map_err(|_| ImfsError::InvalidArgument)?;
        let location = self.locate(ctx, path, EvalOptions::follow(AccessMode::Write))?;
        let mut inner = location.fs.lock();
        let node_type = inner.node(location.node)?.node_type();
        ops_for(node_type).truncate(&mut inner, location.node, size)
    }

    /// Check `access` on the node `path` names
    pub fn access(&self, ctx: &Context, path: &str, access: AccessMode) -> ImfsResult<()> {
        self.locate(ctx, path, EvalOptions::follow(access)).map(|_| ())
    }

    /// Context with the current directory moved to `path`
    pub fn chdir(&self, ctx: &Context, path: &str) -> ImfsResult<Context> {
        let location = self.locate(ctx, path, EvalOptions::default())?;
        {
            let inner = location.fs.lock();
            let node = inner.node(location.node)?;
            if !node.is_directory() {
                return Err(ImfsError::NotADirectory);
            }
            check_permission(&ctx.creds, node, AccessMode::Execute)?;
        }
        Ok(Context {
            creds: ctx.creds,
            cwd: location,
        })
    }

    /// Statistics of the instance holding `path`
    pub fn statvfs(&self, ctx: &Context, path: &str) -> ImfsResult<FsStats> {
        let location = self.locate(ctx, path, EvalOptions::default())?;
        Ok(location.fs.stats())
    }

    // ========== File I/O ==========

    /// Open (and with `flags.create`, create) a file
    pub fn open(&self, ctx: &Context, path: &str, flags: OpenFlags, mode: u32) -> ImfsResult<FileHandle> {
        let options = EvalOptions {
            follow_final: true,
            create: flags.create,
            access: access_for(flags),
        };
        let location = match self.resolve(ctx, path, options)? {
            Resolved::Found(location) => {
                if flags.create && flags.exclusive {
                    return Err(ImfsError::AlreadyExists);
                }
                location
            }
            Resolved::Missing { parent, name } => {
                let kind = NodeKind::MemFile(MemFile::new());
                let id = parent.fs.lock().create_node(parent.node, &name, mode, &ctx.creds, kind)?;
                Location::new(parent.fs, id)
            }
        };
        FileHandle::open(self, location, flags)
    }

    /// Read a whole file
    pub fn read_file(&self, ctx: &Context, path: &str) -> ImfsResult<Vec<u8>> {
        let mut handle = self.open(ctx, path, OpenFlags::READ, 0)?;
        let size = handle.stat()?.size as usize;
        let mut data = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            let n = handle.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data.truncate(filled);
        handle.close()?;
        Ok(data)
    }

    /// Replace a file's contents, creating it if needed
    pub fn write_file(&self, ctx: &Context, path: &str, data: &[u8]) -> ImfsResult<()> {
        let mut handle = self.open(ctx, path, OpenFlags::WRITE, 0o644)?;
        let mut written = 0;
        while written < data.len() {
            let n = handle.write(&data[written..])?;
            if n == 0 {
                return Err(ImfsError::NoSpace);
            }
            written += n;
        }
        handle.close()
    }

    /// Read every entry of a directory
    pub fn read_dir(&self, ctx: &Context, path: &str) -> ImfsResult<Vec<DirEntryRecord>> {
        let mut handle = self.open(ctx, path, OpenFlags::READ, 0)?;
        let mut entries = Vec::new();
        let mut buf = vec![0u8; 8 * RECORD_SIZE];
        loop {
            let n = handle.read_dir(&mut buf)?;
            if n == 0 {
                break;
            }
            for record in buf[..n].chunks(RECORD_SIZE) {
                entries.push(DirEntryRecord::parse(record)?);
            }
        }
        handle.close()?;
        Ok(entries)
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}
