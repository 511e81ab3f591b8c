//! WATOS In-Memory File System (IMFS)
//!
//! A volatile hierarchical namespace of directories, memory files, linear
//! files, device nodes, hard and symbolic links and FIFOs. Any directory can
//! host another IMFS instance mounted on it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │           Callers (Context)          │
//! └──────────────────┬───────────────────┘
//!                    │ open/mkdir/mount/...
//! ┌──────────────────▼───────────────────┐
//! │                 Vfs                  │
//! │  - Path evaluator (eval)             │
//! │  - Mount table                       │
//! │  - Driver registry                   │
//! └──────────────────┬───────────────────┘
//!                    │ NodeOps (one table per node type)
//! ┌─────────┬────────┴────────┬──────────┐
//! │Directory│ Memfile/Linear  │ Dev/FIFO │
//! └─────────┴─────────────────┴──────────┘
//!   Imfs instance: NodeArena + BlockPool under one spin::Mutex
//! ```
//!
//! There is no global state: every operation takes the [`Vfs`] and the
//! caller's [`Context`] (credentials and current directory).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
mod debug;

pub mod config;
pub mod device;
pub mod directory;
pub mod error;
pub mod eval;
pub mod file;
pub mod handle;
pub mod imfs;
pub mod lifecycle;
pub mod linfile;
pub mod memfile;
pub mod mount;
pub mod node;
pub mod ops;
pub mod path;
pub mod permissions;
pub mod pipe;
pub mod tar;
pub mod vfs;


pub use config::{ImfsConfig, MountOptions};
pub use device::{DeviceDriver, DeviceRegistry};
pub use directory::{DirEntryRecord, RECORD_SIZE};
pub use error::{ImfsError, ImfsResult};
pub use eval::{EvalOptions, Resolved};
pub use file::{FileStat, FileType, FsStats, OpenFlags, PollEvents, SeekFrom};
pub use handle::FileHandle;
pub use imfs::{Imfs, ImfsType};
pub use mount::{FilesystemType, MountContext, MountId, MountInfo, MountTable};
pub use node::{DeviceKind, NodeId, NodeType};
pub use permissions::{AccessMode, Credentials};
pub use pipe::{Fifo, PIPE_BUF_SIZE};
pub use vfs::{Context, Location, Vfs};

/// Maximum length of a single path component
pub const NAME_MAX: usize = 32;

/// Maximum hard-link count of a node
pub const LINK_MAX: u16 = 8;

/// Link dereferences allowed in one path evaluation
pub const MAX_LINK_DEPTH: usize = 5;

/// Block size used when none (or an invalid one) is configured
pub const DEFAULT_BLOCK_SIZE: usize = 128;

/// Bytes per entry in a block-pointer table
pub const BLOCK_POINTER_WIDTH: usize = 4;
