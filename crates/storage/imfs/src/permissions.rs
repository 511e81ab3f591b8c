//! IMFS permission checking
//!
//! Unix-style owner/group/other permission classification. The caller's
//! identity travels in [`Credentials`]; there is no process-global identity.

use crate::node::Node;
use crate::{ImfsError, ImfsResult};

// Permission bit constants (Unix-style)

/// Owner read permission
pub const S_IRUSR: u32 = 0o400;
/// Owner write permission
pub const S_IWUSR: u32 = 0o200;
/// Owner execute permission
pub const S_IXUSR: u32 = 0o100;
/// Group read permission
pub const S_IRGRP: u32 = 0o040;
/// Group write permission
pub const S_IWGRP: u32 = 0o020;
/// Group execute permission
pub const S_IXGRP: u32 = 0o010;
/// Other read permission
pub const S_IROTH: u32 = 0o004;
/// Other write permission
pub const S_IWOTH: u32 = 0o002;
/// Other execute permission
pub const S_IXOTH: u32 = 0o001;

/// File type mask (upper bits of mode)
pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

/// Maximum number of supplementary groups
pub const NGROUPS_MAX: usize = 16;

/// Access mode for permission checking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read access (R_OK)
    Read,
    /// Write access (W_OK)
    Write,
    /// Execute or directory search access (X_OK)
    Execute,
    /// Read and write access
    ReadWrite,
    /// Write and search access (creating or removing directory entries)
    WriteExecute,
    /// Existence check only (F_OK)
    Exists,
}

impl AccessMode {
    /// Requested permission bits in "other" position (rwx = 4/2/1)
    pub fn bits(&self) -> u32 {
        match self {
            AccessMode::Read => 0o4,
            AccessMode::Write => 0o2,
            AccessMode::Execute => 0o1,
            AccessMode::ReadWrite => 0o6,
            AccessMode::WriteExecute => 0o3,
            AccessMode::Exists => 0o0,
        }
    }
}

/// Caller credentials for permission checking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    /// Real user ID
    pub uid: u32,
    /// Real group ID
    pub gid: u32,
    /// Effective user ID
    pub euid: u32,
    /// Effective group ID
    pub egid: u32,
    /// Supplementary groups
    pub groups: [u32; NGROUPS_MAX],
    /// Number of supplementary groups
    pub ngroups: usize,
}

impl Credentials {
    /// Create root credentials
    pub const fn root() -> Self {
        Credentials {
            uid: 0,
            gid: 0,
            euid: 0,
            egid: 0,
            groups: [0; NGROUPS_MAX],
            ngroups: 0,
        }
    }

    /// Create credentials for a specific user
    pub const fn new(uid: u32, gid: u32) -> Self {
        Credentials {
            uid,
            gid,
            euid: uid,
            egid: gid,
            groups: [0; NGROUPS_MAX],
            ngroups: 0,
        }
    }

    /// Check if this is root (effective uid = 0)
    pub fn is_root(&self) -> bool {
        self.euid == 0
    }

    /// Check if credentials are in a specific group
    pub fn in_group(&self, gid: u32) -> bool {
        self.egid == gid || self.groups[..self.ngroups].contains(&gid)
    }

    /// Add a supplementary group
    pub fn add_group(&mut self, gid: u32) -> bool {
        if self.in_group(gid) {
            return true;
        }
        if self.ngroups >= NGROUPS_MAX {
            return false;
        }
        self.groups[self.ngroups] = gid;
        self.ngroups += 1;
        true
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::root()
    }
}

/// Check if credentials allow the requested access to a node
///
/// The caller is classified as owner, group member or other; the bits of
/// that class must cover every requested bit. Uid 0 gets no bypass.
pub fn check_permission(creds: &Credentials, node: &Node, access: AccessMode) -> ImfsResult<()> {
    let required = access.bits();
    if required == 0 {
        return Ok(());
    }

    let perm_bits = if creds.euid == node.uid {
        (node.mode >> 6) & 0o7
    } else if creds.in_group(node.gid) {
        (node.mode >> 3) & 0o7
    } else {
        node.mode & 0o7
    };

    if (perm_bits & required) == required {
        Ok(())
    } else {
        Err(ImfsError::PermissionDenied)
    }
}

/// Whether `creds` may change a node's mode, ownership or times
///
/// The owner and uid 0 may; this is the one place uid 0 is special.
pub fn can_change_attributes(creds: &Credentials, node: &Node) -> bool {
    creds.is_root() || creds.euid == node.uid
}

/// Extract file type from mode
pub fn mode_file_type(mode: u32) -> u32 {
    mode & S_IFMT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeKind};
    use alloc::string::String;

    fn make_node(mode: u32, uid: u32, gid: u32) -> Node {
        Node::new(String::from("f"), mode, uid, gid, 7, 0, NodeKind::SymLink(String::new()))
    }

    #[test]
    fn test_owner_access() {
        let creds = Credentials::new(1000, 1000);
        let node = make_node(0o700, 1000, 2000);

        assert!(check_permission(&creds, &node, AccessMode::Read).is_ok());
        assert!(check_permission(&creds, &node, AccessMode::Write).is_ok());
        assert!(check_permission(&creds, &node, AccessMode::Execute).is_ok());
        assert!(check_permission(&creds, &node, AccessMode::WriteExecute).is_ok());
    }

    #[test]
    fn test_group_access() {
        let creds = Credentials::new(2000, 1000);
        let node = make_node(0o050, 1000, 1000);

        assert!(check_permission(&creds, &node, AccessMode::Read).is_ok());
        assert!(check_permission(&creds, &node, AccessMode::Execute).is_ok());
        assert_eq!(
            check_permission(&creds, &node, AccessMode::Write),
            Err(ImfsError::PermissionDenied)
        );
    }

    #[test]
    fn test_supplementary_group() {
        let mut creds = Credentials::new(2000, 2000);
        let node = make_node(0o060, 1000, 3000);
        assert!(check_permission(&creds, &node, AccessMode::ReadWrite).is_err());

        assert!(creds.add_group(3000));
        assert!(check_permission(&creds, &node, AccessMode::ReadWrite).is_ok());
    }

    #[test]
    fn test_other_access() {
        let creds = Credentials::new(2000, 2000);
        let node = make_node(0o004, 1000, 1000);

        assert!(check_permission(&creds, &node, AccessMode::Read).is_ok());
        assert!(check_permission(&creds, &node, AccessMode::ReadWrite).is_err());
    }

    #[test]
    fn test_owner_class_is_not_widened() {
        // Owner bits apply to the owner even when "other" would allow more
        let creds = Credentials::new(1000, 1000);
        let node = make_node(0o007, 1000, 1000);
        assert!(check_permission(&creds, &node, AccessMode::Read).is_err());
    }

    #[test]
    fn test_root_has_no_bypass() {
        let creds = Credentials::root();
        let node = make_node(0o700, 1000, 1000);
        assert!(check_permission(&creds, &node, AccessMode::Read).is_err());
        assert!(check_permission(&creds, &node, AccessMode::Exists).is_ok());
        assert!(can_change_attributes(&creds, &node));
    }

    #[test]
    fn test_attribute_changes_need_owner_or_root() {
        let node = make_node(0o777, 1000, 1000);
        assert!(can_change_attributes(&Credentials::new(1000, 50), &node));
        assert!(!can_change_attributes(&Credentials::new(2000, 1000), &node));

        let mut effective_root = Credentials::new(1000, 1000);
        effective_root.euid = 0;
        assert!(can_change_attributes(&effective_root, &node));
    }
}
