//! IMFS error types

use core::fmt;

/// IMFS result type
pub type ImfsResult<T> = Result<T, ImfsError>;

/// IMFS error kinds
///
/// Every boundary-crossing operation returns one of these. Partial
/// transfers (short reads, truncated directory listings) are reported as
/// successful byte counts, never as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImfsError {
    /// Missing path component
    NotFound,
    /// A directory was required
    NotADirectory,
    /// A non-directory was required
    IsADirectory,
    /// Component exceeds NAME_MAX or holds a disallowed byte
    NameTooLong,
    /// Link dereference bound exceeded (ELOOP)
    TooManyLinkLevels,
    /// Permission bits insufficient
    PermissionDenied,
    /// Operation restricted to the owner or a privileged caller
    NotPermitted,
    /// Open handles, live mount, instance root or current directory in the way
    Busy,
    /// Directory removal with children present
    DirectoryNotEmpty,
    /// Block allocation failed
    NoSpace,
    /// Hard-link count at LINK_MAX
    TooManyLinks,
    /// Size beyond the triply-indirect maximum
    FileTooLarge,
    /// Operation absent from the node's operation table
    NotSupported,
    /// Name already present in the directory
    AlreadyExists,
    /// Invalid argument
    InvalidArgument,
    /// Mutation on a read-only mount
    ReadOnly,
    /// Link or rename across filesystem instances
    CrossDevice,
    /// Path is not the root of a mounted instance
    NotMounted,
    /// No driver registered for a device node
    NoDevice,
    /// Filesystem initializer could not allocate its state
    NoMemory,
    /// Operation on a handle that does not allow it
    BadHandle,
    /// Internal inconsistency or collaborator failure
    IoError,
}

impl ImfsError {
    /// Convert to errno-style error code
    pub fn to_errno(&self) -> i32 {
        match self {
            ImfsError::NotPermitted => -1,       // EPERM
            ImfsError::NotFound => -2,           // ENOENT
            ImfsError::IoError => -5,            // EIO
            ImfsError::NoDevice => -6,           // ENXIO
            ImfsError::BadHandle => -9,          // EBADF
            ImfsError::NoMemory => -12,          // ENOMEM
            ImfsError::PermissionDenied => -13,  // EACCES
            ImfsError::Busy => -16,              // EBUSY
            ImfsError::AlreadyExists => -17,     // EEXIST
            ImfsError::CrossDevice => -18,       // EXDEV
            ImfsError::NotADirectory => -20,     // ENOTDIR
            ImfsError::IsADirectory => -21,      // EISDIR
            ImfsError::InvalidArgument => -22,   // EINVAL
            ImfsError::NotMounted => -22,
            ImfsError::FileTooLarge => -27,      // EFBIG
            ImfsError::NoSpace => -28,           // ENOSPC
            ImfsError::ReadOnly => -30,          // EROFS
            ImfsError::TooManyLinks => -31,      // EMLINK
            ImfsError::NameTooLong => -36,       // ENAMETOOLONG
            ImfsError::DirectoryNotEmpty => -39, // ENOTEMPTY
            ImfsError::TooManyLinkLevels => -40, // ELOOP
            ImfsError::NotSupported => -95,      // ENOTSUP
        }
    }

    fn message(&self) -> &'static str {
        match self {
            ImfsError::NotFound => "no such file or directory",
            ImfsError::NotADirectory => "not a directory",
            ImfsError::IsADirectory => "is a directory",
            ImfsError::NameTooLong => "file name too long",
            ImfsError::TooManyLinkLevels => "too many levels of symbolic links",
            ImfsError::PermissionDenied => "permission denied",
            ImfsError::NotPermitted => "operation not permitted",
            ImfsError::Busy => "resource busy",
            ImfsError::DirectoryNotEmpty => "directory not empty",
            ImfsError::NoSpace => "no space left on device",
            ImfsError::TooManyLinks => "too many links",
            ImfsError::FileTooLarge => "file too large",
            ImfsError::NotSupported => "operation not supported",
            ImfsError::AlreadyExists => "file exists",
            ImfsError::InvalidArgument => "invalid argument",
            ImfsError::ReadOnly => "read-only file system",
            ImfsError::CrossDevice => "cross-device link",
            ImfsError::NotMounted => "not a mount point",
            ImfsError::NoDevice => "no such device",
            ImfsError::NoMemory => "out of memory",
            ImfsError::BadHandle => "bad file handle",
            ImfsError::IoError => "i/o error",
        }
    }
}

impl fmt::Display for ImfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(ImfsError::NotFound.to_errno(), -2);
        assert_eq!(ImfsError::Busy.to_errno(), -16);
        assert_eq!(ImfsError::TooManyLinkLevels.to_errno(), -40);
        assert_eq!(ImfsError::FileTooLarge.to_errno(), -27);
    }

    #[test]
    fn test_display() {
        assert_eq!(ImfsError::DirectoryNotEmpty.to_string(), "directory not empty");
        assert_eq!(ImfsError::NoSpace.to_string(), "no space left on device");
    }
}
