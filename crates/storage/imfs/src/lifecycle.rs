//! Node lifecycle
//!
//! Every change to a node's link count or reference count goes through
//! this module, and [`maybe_destroy`] is the only place that decides a node
//! is gone: both counts must be zero.

use crate::imfs::ImfsInner;
use crate::memfile::BlockPool;
use crate::node::{Node, NodeId, NodeKind};
use crate::{directory, ImfsError, ImfsResult, LINK_MAX};

/// Add a name (hard link) to a node
pub fn add_link(fs: &mut ImfsInner, id: NodeId) -> ImfsResult<()> {
    let now = fs.now();
    let node = fs.node_mut(id)?;
    if node.nlink >= LINK_MAX {
        return Err(ImfsError::TooManyLinks);
    }
    node.nlink += 1;
    node.touch_ctime(now);
    Ok(())
}

/// Drop one name of a node, destroying it when nothing else holds it
pub fn drop_link(fs: &mut ImfsInner, id: NodeId) -> ImfsResult<()> {
    let now = fs.now();
    let node = fs.node_mut(id)?;
    node.nlink = node.nlink.saturating_sub(1);
    node.touch_ctime(now);
    maybe_destroy(fs, id);
    Ok(())
}

/// Detach a node from its directory and drop the name
///
/// Removing a hard-link node also gives back the link it held on its
/// target.
pub fn unlink(fs: &mut ImfsInner, id: NodeId) -> ImfsResult<()> {
    let now = fs.now();
    let node = fs.node(id)?;
    let target = match node.kind {
        NodeKind::HardLink(target) => Some(target),
        _ => None,
    };
    if let Some(parent) = node.parent {
        directory::remove(&mut fs.nodes, parent, id)?;
        fs.node_mut(parent)?.touch_mtime(now);
    }

    debug_imfs!("lifecycle: unlink {:?}", id);
    drop_link(fs, id)?;
    if let Some(target) = target {
        // The target may already be gone if the instance is being torn down
        if fs.nodes.contains(target) {
            drop_link(fs, target)?;
        }
    }
    Ok(())
}

/// Take a reference for an open handle
pub fn open_ref(fs: &mut ImfsInner, id: NodeId) -> ImfsResult<()> {
    fs.node_mut(id)?.refs += 1;
    fs.open_handles += 1;
    Ok(())
}

/// Release a handle's reference, destroying an unlinked node
pub fn close_ref(fs: &mut ImfsInner, id: NodeId) {
    fs.open_handles = fs.open_handles.saturating_sub(1);
    if let Ok(node) = fs.node_mut(id) {
        node.refs = node.refs.saturating_sub(1);
        maybe_destroy(fs, id);
    }
}

/// Destroy the node if it has neither names nor open handles
pub fn maybe_destroy(fs: &mut ImfsInner, id: NodeId) -> bool {
    match fs.node(id) {
        Ok(node) if node.nlink == 0 && node.refs == 0 => destroy(fs, id),
        _ => false,
    }
}

/// Remove a node from the arena and free its storage unconditionally
pub fn destroy(fs: &mut ImfsInner, id: NodeId) -> bool {
    match fs.nodes.remove(id) {
        Some(mut node) => {
            release_storage(&mut fs.pool, &mut node);
            debug_imfs!("lifecycle: destroyed '{}' ino {}", node.name, node.ino);
            true
        }
        None => false,
    }
}

/// Return a destroyed node's blocks to the pool
pub fn release_storage(pool: &mut BlockPool, node: &mut Node) {
    if let NodeKind::MemFile(file) = &mut node.kind {
        file.release(pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountOptions;
    use crate::imfs::{Imfs, ImfsType};
    use crate::memfile::MemFile;
    use crate::mount::{FilesystemType, MountContext, MountId};
    use crate::permissions::Credentials;
    use alloc::sync::Arc;

    fn instance() -> Arc<Imfs> {
        let ctx = MountContext::new(MountId::new(1), MountOptions::ReadWrite, None);
        ImfsType::default().initialize(&ctx).unwrap()
    }

    fn file_with_data(fs: &mut ImfsInner, name: &str) -> NodeId {
        let root = fs.root();
        let id = fs
            .create_node(root, name, 0o644, &Credentials::root(), NodeKind::MemFile(MemFile::new()))
            .unwrap();
        let ImfsInner { nodes, pool, .. } = &mut *fs;
        if let NodeKind::MemFile(mem) = &mut nodes.get_mut(id).unwrap().kind {
            mem.write(pool, 0, &[9u8; 500]).unwrap();
        }
        id
    }

    #[test]
    fn test_unlink_destroys_when_unreferenced() {
        let fs = instance();
        let mut inner = fs.lock();
        let id = file_with_data(&mut inner, "f");
        assert!(inner.pool().allocated() > 0);

        unlink(&mut inner, id).unwrap();
        assert!(!inner.nodes.contains(id));
        assert_eq!(inner.pool().allocated(), 0);
    }

    #[test]
    fn test_open_reference_delays_destruction() {
        let fs = instance();
        let mut inner = fs.lock();
        let id = file_with_data(&mut inner, "f");

        open_ref(&mut inner, id).unwrap();
        unlink(&mut inner, id).unwrap();
        assert!(inner.nodes.contains(id));
        assert_eq!(inner.open_handles, 1);

        close_ref(&mut inner, id);
        assert!(!inner.nodes.contains(id));
        assert_eq!(inner.open_handles, 0);
        assert_eq!(inner.pool().allocated(), 0);
    }

    #[test]
    fn test_hard_link_counts() {
        let fs = instance();
        let mut inner = fs.lock();
        let target = file_with_data(&mut inner, "f");
        let root = inner.root();

        let link = inner
            .create_node(root, "l", 0o644, &Credentials::root(), NodeKind::HardLink(target))
            .unwrap();
        add_link(&mut inner, target).unwrap();
        assert_eq!(inner.node(target).unwrap().nlink, 2);

        // Dropping the original name keeps the data alive through the link
        unlink(&mut inner, target).unwrap();
        assert!(inner.nodes.contains(target));
        assert_eq!(inner.node(target).unwrap().nlink, 1);

        unlink(&mut inner, link).unwrap();
        assert!(!inner.nodes.contains(target));
        assert!(!inner.nodes.contains(link));
        assert_eq!(inner.pool().allocated(), 0);
    }

    #[test]
    fn test_link_max() {
        let fs = instance();
        let mut inner = fs.lock();
        let id = file_with_data(&mut inner, "f");
        for _ in 1..LINK_MAX {
            add_link(&mut inner, id).unwrap();
        }
        assert_eq!(add_link(&mut inner, id), Err(ImfsError::TooManyLinks));
    }
}
