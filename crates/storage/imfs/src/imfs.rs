//! Filesystem instances
//!
//! One [`Imfs`] per mount. All of its nodes, its block pool and its
//! counters sit behind a single spin lock; nothing in here ever takes the
//! mount table lock or calls a driver while holding it.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use spin::{Mutex, MutexGuard};

use crate::config::ImfsConfig;
use crate::file::FsStats;
use crate::memfile::BlockPool;
use crate::mount::{FilesystemType, MountContext, MountId};
use crate::node::{Directory, Node, NodeArena, NodeId, NodeKind};
use crate::permissions::Credentials;
use crate::{directory, lifecycle, path};
use crate::{ImfsError, ImfsResult, NAME_MAX};

/// Mode of a freshly created instance root
const ROOT_MODE: u32 = 0o755;

/// State of one instance, reached through [`Imfs::lock`]
pub struct ImfsInner {
    pub(crate) nodes: NodeArena,
    pub(crate) pool: BlockPool,
    pub(crate) root: NodeId,
    pub(crate) config: ImfsConfig,
    pub(crate) read_only: bool,
    /// Device number reported in `stat.dev`
    pub(crate) dev: u64,
    /// Open file handles anywhere in the instance
    pub(crate) open_handles: usize,
    /// Set once unmount has committed to tearing the instance down
    pub(crate) unmounting: bool,
    next_ino: u64,
}

impl ImfsInner {
    /// Current timestamp from the configured clock
    pub fn now(&self) -> u64 {
        (self.config.clock)()
    }

    pub fn node(&self, id: NodeId) -> ImfsResult<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> ImfsResult<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn config(&self) -> &ImfsConfig {
        &self.config
    }

    pub fn pool(&self) -> &BlockPool {
        &self.pool
    }

    /// Fail with `Busy` once the instance is being unmounted
    pub fn check_active(&self) -> ImfsResult<()> {
        if self.unmounting {
            Err(ImfsError::Busy)
        } else {
            Ok(())
        }
    }

    /// Fail with `ReadOnly` on a read-only mount
    pub fn check_writable(&self) -> ImfsResult<()> {
        if self.read_only {
            Err(ImfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Create a node named `name` inside the directory `parent`
    ///
    /// The umask is applied to `mode`; ownership comes from the effective
    /// ids of `creds`.
    pub fn create_node(
        &mut self,
        parent: NodeId,
        name: &str,
        mode: u32,
        creds: &Credentials,
        kind: NodeKind,
    ) -> ImfsResult<NodeId> {
        self.check_active()?;
        self.check_writable()?;
        path::check_name(name)?;
        if matches!(kind, NodeKind::MemFile(_)) && !self.config.supports_memfile {
            return Err(ImfsError::NotSupported);
        }
        if directory::lookup(&self.nodes, parent, name)?.is_some() {
            return Err(ImfsError::AlreadyExists);
        }

        let now = self.now();
        let ino = self.next_ino;
        self.next_ino += 1;
        let mode = mode & !self.config.umask;
        let node = Node::new(String::from(name), mode, creds.euid, creds.egid, ino, now, kind);
        let id = self.nodes.insert(node);
        if let Err(e) = directory::insert(&mut self.nodes, parent, id) {
            self.nodes.remove(id);
            return Err(e);
        }
        self.node_mut(parent)?.touch_mtime(now);

        debug_imfs!("imfs: created '{}' ino {} under {:?}", name, ino, parent);
        Ok(id)
    }
}

/// A mounted in-memory filesystem instance
pub struct Imfs {
    mount_id: MountId,
    root: NodeId,
    state: Mutex<ImfsInner>,
}

impl Imfs {
    /// Build an instance with an empty root directory
    pub fn new(ctx: &MountContext, config: ImfsConfig) -> ImfsResult<Arc<Self>> {
        let config = config.validated();
        let mut nodes = NodeArena::new();
        let now = (config.clock)();
        let root_node = Node::new(
            String::new(),
            ROOT_MODE,
            0,
            0,
            1,
            now,
            NodeKind::Directory(Directory::default()),
        );
        let root = nodes.insert(root_node);

        Ok(Arc::new(Imfs {
            mount_id: ctx.id,
            root,
            state: Mutex::new(ImfsInner {
                nodes,
                pool: BlockPool::new(config.block_size, config.max_blocks),
                root,
                config,
                read_only: ctx.options.is_read_only(),
                dev: ctx.id.as_u32() as u64,
                open_handles: 0,
                unmounting: false,
                next_ino: 2,
            }),
        }))
    }

    /// Mount entry this instance was created for
    pub fn mount_id(&self) -> MountId {
        self.mount_id
    }

    /// Device number reported in `stat.dev`
    pub fn dev(&self) -> u64 {
        self.mount_id.as_u32() as u64
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Acquire the instance lock
    pub fn lock(&self) -> MutexGuard<'_, ImfsInner> {
        self.state.lock()
    }

    pub fn is_read_only(&self) -> bool {
        self.state.lock().read_only
    }

    pub fn open_handles(&self) -> usize {
        self.state.lock().open_handles
    }

    /// Blocks and block tables currently allocated by memory files
    pub fn blocks_allocated(&self) -> usize {
        self.state.lock().pool.allocated()
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    pub fn stats(&self) -> FsStats {
        let inner = self.state.lock();
        FsStats {
            block_size: inner.pool.block_size() as u32,
            blocks_allocated: inner.pool.allocated() as u64,
            blocks_limit: inner.config.max_blocks.map(|limit| limit as u64),
            nodes: inner.nodes.len() as u64,
            max_file_size: inner.pool.max_file_size(),
            max_name_len: NAME_MAX as u32,
            read_only: inner.read_only,
        }
    }

    /// Destroy every node, children before parents
    ///
    /// Fails with `Busy` while a handle is open, while a directory of the
    /// instance carries a mount, or when another unmount got here first.
    /// The checks and the teardown share one lock acquisition, and the
    /// instance refuses new handles, nodes and mounts from then on.
    pub(crate) fn teardown(&self) -> ImfsResult<()> {
        let mut inner = self.state.lock();
        inner.check_active()?;
        if inner.open_handles > 0 {
            log::warn!(
                "imfs: teardown of instance {} refused, {} handles open",
                self.mount_id.as_u32(),
                inner.open_handles
            );
            return Err(ImfsError::Busy);
        }
        if inner.nodes.iter().any(|node| node.mounted().is_some()) {
            return Err(ImfsError::Busy);
        }
        inner.unmounting = true;

        let mut stack = vec![(inner.root, false)];
        let mut destroyed = 0usize;

        while let Some((id, visited)) = stack.pop() {
            if !visited {
                stack.push((id, true));
                if let Ok(dir) = inner.nodes.get(id).and_then(|node| node.directory()) {
                    stack.extend(dir.children.iter().rev().map(|&child| (child, false)));
                }
                continue;
            }
            if lifecycle::destroy(&mut inner, id) {
                destroyed += 1;
            }
        }

        // Unlinked nodes still held by hard links
        let ImfsInner { nodes, pool, .. } = &mut *inner;
        for mut node in nodes.drain() {
            lifecycle::release_storage(pool, &mut node);
            destroyed += 1;
        }

        log::info!(
            "imfs: instance {} torn down ({} nodes, {} blocks still allocated)",
            self.mount_id.as_u32(),
            destroyed,
            inner.pool.allocated()
        );
        Ok(())
    }
}

/// Filesystem type that creates IMFS instances with a fixed configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct ImfsType {
    config: ImfsConfig,
}

impl ImfsType {
    pub fn new(config: ImfsConfig) -> Self {
        ImfsType { config }
    }

    /// Instances without memory files
    pub fn mini() -> Self {
        ImfsType {
            config: ImfsConfig::mini(),
        }
    }

    pub fn config(&self) -> &ImfsConfig {
        &self.config
    }
}

impl FilesystemType for ImfsType {
    fn name(&self) -> &'static str {
        if self.config.supports_memfile {
            "imfs"
        } else {
            "miniimfs"
        }
    }

    fn initialize(&self, ctx: &MountContext) -> ImfsResult<Arc<Imfs>> {
        Imfs::new(ctx, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountOptions;
    use crate::memfile::MemFile;

    fn instance(options: MountOptions) -> Arc<Imfs> {
        let ctx = MountContext::new(MountId::new(3), options, None);
        ImfsType::default().initialize(&ctx).unwrap()
    }

    #[test]
    fn test_new_instance_has_root() {
        let fs = instance(MountOptions::ReadWrite);
        assert_eq!(fs.dev(), 3);
        assert_eq!(fs.node_count(), 1);
        let inner = fs.lock();
        let root = inner.node(fs.root()).unwrap();
        assert!(root.is_directory());
        assert_eq!(root.parent, None);
        assert_eq!(root.mode, ROOT_MODE);
    }

    #[test]
    fn test_create_node_applies_umask_and_owner() {
        let fs = instance(MountOptions::ReadWrite);
        let mut inner = fs.lock();
        let creds = Credentials::new(100, 200);
        let id = inner
            .create_node(fs.root(), "f", 0o666, &creds, NodeKind::MemFile(MemFile::new()))
            .unwrap();
        let node = inner.node(id).unwrap();
        assert_eq!(node.mode, 0o644);
        assert_eq!((node.uid, node.gid), (100, 200));
        assert_eq!(node.parent, Some(fs.root()));

        let dup = inner.create_node(fs.root(), "f", 0o666, &creds, NodeKind::MemFile(MemFile::new()));
        assert_eq!(dup.err(), Some(ImfsError::AlreadyExists));
    }

    #[test]
    fn test_new_normalizes_literal_config() {
        let ctx = MountContext::new(MountId::new(4), MountOptions::ReadWrite, None);
        let config = ImfsConfig {
            block_size: 100,
            umask: 0o7022,
            ..ImfsConfig::default()
        };
        let fs = Imfs::new(&ctx, config).unwrap();
        assert_eq!(fs.stats().block_size as usize, crate::DEFAULT_BLOCK_SIZE);
        assert_eq!(fs.lock().config().umask, 0o022);
        assert_eq!(fs.lock().pool().block_size(), crate::DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_create_node_on_read_only_instance() {
        let fs = instance(MountOptions::ReadOnly);
        assert!(fs.is_read_only());
        let mut inner = fs.lock();
        let result = inner.create_node(
            fs.root(),
            "d",
            0o755,
            &Credentials::root(),
            NodeKind::Directory(Directory::default()),
        );
        assert_eq!(result.err(), Some(ImfsError::ReadOnly));
    }

    #[test]
    fn test_teardown_releases_everything() {
        let fs = instance(MountOptions::ReadWrite);
        {
            let mut inner = fs.lock();
            let root = fs.root();
            let creds = Credentials::root();
            let dir = inner
                .create_node(root, "d", 0o755, &creds, NodeKind::Directory(Directory::default()))
                .unwrap();
            let file = inner
                .create_node(dir, "f", 0o644, &creds, NodeKind::MemFile(MemFile::new()))
                .unwrap();
            let ImfsInner { nodes, pool, .. } = &mut *inner;
            if let NodeKind::MemFile(mem) = &mut nodes.get_mut(file).unwrap().kind {
                mem.write(pool, 0, &[1u8; 1000]).unwrap();
            }
        }
        assert!(fs.blocks_allocated() > 0);

        fs.teardown().unwrap();
        assert_eq!(fs.blocks_allocated(), 0);
        assert_eq!(fs.node_count(), 0);
        assert_eq!(fs.teardown(), Err(ImfsError::Busy));
    }

    #[test]
    fn test_teardown_refused_while_in_use() {
        let fs = instance(MountOptions::ReadWrite);
        let root = fs.root();
        let dir = {
            let mut inner = fs.lock();
            let creds = Credentials::root();
            let dir = inner
                .create_node(root, "d", 0o755, &creds, NodeKind::Directory(Directory::default()))
                .unwrap();
            lifecycle::open_ref(&mut inner, dir).unwrap();
            dir
        };
        assert_eq!(fs.teardown(), Err(ImfsError::Busy));
        lifecycle::close_ref(&mut fs.lock(), dir);

        fs.lock().node_mut(dir).unwrap().directory_mut().unwrap().mounted = Some(MountId::new(9));
        assert_eq!(fs.teardown(), Err(ImfsError::Busy));
        fs.lock().node_mut(dir).unwrap().directory_mut().unwrap().mounted = None;

        // Refusals leave the instance usable
        assert!(fs.lock().check_active().is_ok());
        fs.teardown().unwrap();

        let mut inner = fs.lock();
        let kind = NodeKind::Directory(Directory::default());
        let late = inner.create_node(root, "late", 0o755, &Credentials::root(), kind);
        assert_eq!(late.err(), Some(ImfsError::Busy));
    }
}
