//! IMFS configuration
//!
//! Per-instance settings handed to [`ImfsType`](crate::ImfsType) at mount time,
//! and the mount option string parser.

use crate::{ImfsError, ImfsResult, DEFAULT_BLOCK_SIZE};

/// Smallest accepted memory-file block size
pub const MIN_BLOCK_SIZE: usize = 16;

/// Largest accepted memory-file block size
pub const MAX_BLOCK_SIZE: usize = 512;

/// Default creation mask applied to new node permissions
pub const DEFAULT_UMASK: u32 = 0o022;

fn zero_clock() -> u64 {
    0
}

/// Instance configuration
#[derive(Debug, Clone, Copy)]
pub struct ImfsConfig {
    /// Bytes per memory-file block (power of two in 16..=512)
    pub block_size: usize,
    /// Bits cleared from the mode of every created node
    pub umask: u32,
    /// Cap on allocated blocks (data blocks and tables); `None` is unbounded
    pub max_blocks: Option<usize>,
    /// Timestamp source (seconds)
    pub clock: fn() -> u64,
    /// Whether regular memory files can be created
    pub supports_memfile: bool,
}

impl ImfsConfig {
    /// Configuration with the given block size
    ///
    /// Sizes that are not a power of two in 16..=512 fall back to
    /// [`DEFAULT_BLOCK_SIZE`].
    pub fn with_block_size(block_size: usize) -> Self {
        ImfsConfig {
            block_size: validate_block_size(block_size),
            ..Self::default()
        }
    }

    /// Fields normalized the way the builder methods would set them
    pub fn validated(mut self) -> Self {
        self.block_size = validate_block_size(self.block_size);
        self.umask &= 0o777;
        self
    }

    /// Set the block budget
    pub fn max_blocks(mut self, limit: usize) -> Self {
        self.max_blocks = Some(limit);
        self
    }

    /// Set the creation mask
    pub fn umask(mut self, umask: u32) -> Self {
        self.umask = umask & 0o777;
        self
    }

    /// Set the timestamp source
    pub fn clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    /// Configuration without memory files (directories, links, devices only)
    pub fn mini() -> Self {
        ImfsConfig {
            supports_memfile: false,
            ..Self::default()
        }
    }
}

impl Default for ImfsConfig {
    fn default() -> Self {
        ImfsConfig {
            block_size: DEFAULT_BLOCK_SIZE,
            umask: DEFAULT_UMASK,
            max_blocks: None,
            clock: zero_clock,
            supports_memfile: true,
        }
    }
}

/// Accept a requested block size or fall back to the default
pub fn validate_block_size(requested: usize) -> usize {
    let mut candidate = MIN_BLOCK_SIZE;
    while candidate <= MAX_BLOCK_SIZE {
        if candidate == requested {
            return requested;
        }
        if candidate > requested {
            break;
        }
        candidate <<= 1;
    }
    DEFAULT_BLOCK_SIZE
}

/// Mount access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MountOptions {
    /// Read-write (default)
    #[default]
    ReadWrite,
    /// Read-only: every mutation fails with `ReadOnly`
    ReadOnly,
}

impl MountOptions {
    /// Parse a mount option string
    ///
    /// Recognizes `"rw"`, `"ro"` and the empty string (read-write). Anything
    /// else is a configuration error.
    pub fn parse(options: &str) -> ImfsResult<Self> {
        match options.trim() {
            "" | "rw" => Ok(MountOptions::ReadWrite),
            "ro" => Ok(MountOptions::ReadOnly),
            _ => Err(ImfsError::InvalidArgument),
        }
    }

    /// Check if this is a read-only mount
    pub fn is_read_only(&self) -> bool {
        *self == MountOptions::ReadOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size_validation() {
        assert_eq!(validate_block_size(16), 16);
        assert_eq!(validate_block_size(64), 64);
        assert_eq!(validate_block_size(512), 512);
        assert_eq!(validate_block_size(100), DEFAULT_BLOCK_SIZE);
        assert_eq!(validate_block_size(8), DEFAULT_BLOCK_SIZE);
        assert_eq!(validate_block_size(1024), DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_mount_options() {
        assert_eq!(MountOptions::parse("").unwrap(), MountOptions::ReadWrite);
        assert_eq!(MountOptions::parse("rw").unwrap(), MountOptions::ReadWrite);
        assert!(MountOptions::parse("ro").unwrap().is_read_only());
        assert_eq!(MountOptions::parse("noatime"), Err(ImfsError::InvalidArgument));
    }

    #[test]
    fn test_builder() {
        let config = ImfsConfig::with_block_size(256).max_blocks(10).umask(0o077);
        assert_eq!(config.block_size, 256);
        assert_eq!(config.max_blocks, Some(10));
        assert_eq!(config.umask, 0o077);
        assert!(config.supports_memfile);
        assert!(!ImfsConfig::mini().supports_memfile);
    }
}
