//! File types, open flags and status records

/// File type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file (memory or linear)
    Regular,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Block device
    BlockDevice,
    /// Character device (also generic nodes)
    CharDevice,
    /// Named pipe (FIFO)
    Fifo,
}

/// File open flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    /// Read access
    pub read: bool,
    /// Write access
    pub write: bool,
    /// Every write goes to the end of the file
    pub append: bool,
    /// Create if not exists
    pub create: bool,
    /// Truncate on open
    pub truncate: bool,
    /// Fail if exists (with create)
    pub exclusive: bool,
}

impl OpenFlags {
    /// Read-only mode
    pub const READ: OpenFlags = OpenFlags {
        read: true,
        write: false,
        append: false,
        create: false,
        truncate: false,
        exclusive: false,
    };

    /// Write-only mode (create/truncate)
    pub const WRITE: OpenFlags = OpenFlags {
        read: false,
        write: true,
        append: false,
        create: true,
        truncate: true,
        exclusive: false,
    };

    /// Read-write mode
    pub const READ_WRITE: OpenFlags = OpenFlags {
        read: true,
        write: true,
        append: false,
        create: false,
        truncate: false,
        exclusive: false,
    };

    /// Append mode
    pub const APPEND: OpenFlags = OpenFlags {
        read: false,
        write: true,
        append: true,
        create: true,
        truncate: false,
        exclusive: false,
    };

    /// Create new file (fail if exists)
    pub const CREATE_NEW: OpenFlags = OpenFlags {
        read: true,
        write: true,
        append: false,
        create: true,
        truncate: false,
        exclusive: true,
    };
}

/// Seek origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    /// From start of file
    Start,
    /// From current position
    Current,
    /// From end of file
    End,
}

/// Readiness reported by `poll`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollEvents {
    pub readable: bool,
    pub writable: bool,
}

impl PollEvents {
    /// Always readable and writable (regular files, directories)
    pub const READY: PollEvents = PollEvents {
        readable: true,
        writable: true,
    };
}

/// File statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// File type
    pub file_type: FileType,
    /// File size in bytes
    pub size: u64,
    /// Number of hard links
    pub nlink: u32,
    /// Inode number
    pub inode: u64,
    /// Instance id of the owning filesystem
    pub dev: u64,
    /// Device number for device nodes
    pub rdev: u64,
    /// File type and permission bits
    pub mode: u32,
    /// Owner user ID
    pub uid: u32,
    /// Owner group ID
    pub gid: u32,
    /// Block size for I/O
    pub blksize: u32,
    /// Access time
    pub atime: u64,
    /// Modification time
    pub mtime: u64,
    /// Status change time
    pub ctime: u64,
}

/// Filesystem statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    /// Memory-file block size
    pub block_size: u32,
    /// Blocks and tables currently allocated
    pub blocks_allocated: u64,
    /// Block budget (`None` when unbounded)
    pub blocks_limit: Option<u64>,
    /// Live nodes
    pub nodes: u64,
    /// Largest representable file
    pub max_file_size: u64,
    /// Maximum filename length
    pub max_name_len: u32,
    /// Mounted read-only
    pub read_only: bool,
}
