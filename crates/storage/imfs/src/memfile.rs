//! Block storage engine for memory files
//!
//! File data lives in fixed-size blocks reached through up to three levels
//! of block-pointer tables, classic UNIX inode style:
//!
//! ```text
//!   indirect ──► [S block pointers]                     blocks [0, S)
//!   doubly   ──► [S tables] ──► [S block pointers]       blocks [S, S + S²)
//!   triply   ──► [S tables] ──► [S tables] ──► [S ...]   blocks [S + S², S + S² + S³)
//! ```
//!
//! `S` is `block_size / BLOCK_POINTER_WIDTH`. Tables and blocks are
//! allocated lazily the first time a block in their range is touched.
//!
//! Two behaviours are deliberate:
//!
//! - A multi-block extend that runs out of space keeps the blocks it already
//!   allocated. The file size is left unchanged, so the extra blocks are
//!   simply owned by the file until it grows into them or is destroyed.
//! - Shrinking a file only lowers its size. Blocks past the new end stay
//!   allocated and are zeroed again if the file grows back over them.

use alloc::boxed::Box;
use alloc::vec;

use crate::{ImfsError, ImfsResult, BLOCK_POINTER_WIDTH};

/// One data block
pub type Block = Box<[u8]>;

/// A block-pointer table: `S` optional entries
pub struct BlockTable<T> {
    entries: Box<[Option<T>]>,
}

impl<T> BlockTable<T> {
    fn new(len: usize) -> Self {
        BlockTable {
            entries: (0..len).map(|_| None).collect(),
        }
    }
}

/// Something owned by a block table that must be returned to the pool
trait Releasable {
    fn release(self, pool: &mut BlockPool);
}

impl Releasable for Block {
    fn release(self, pool: &mut BlockPool) {
        pool.free(1);
    }
}

impl<T: Releasable> Releasable for BlockTable<T> {
    fn release(self, pool: &mut BlockPool) {
        for entry in self.entries.into_vec().into_iter().flatten() {
            entry.release(pool);
        }
        pool.free(1);
    }
}

/// Block allocator and accounting for one instance
#[derive(Debug)]
pub struct BlockPool {
    block_size: usize,
    allocated: usize,
    limit: Option<usize>,
}

impl BlockPool {
    /// Create a pool handing out `block_size` byte blocks
    pub fn new(block_size: usize, limit: Option<usize>) -> Self {
        BlockPool {
            block_size,
            allocated: 0,
            limit,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Entries per block-pointer table
    pub fn pointers_per_block(&self) -> usize {
        self.block_size / BLOCK_POINTER_WIDTH
    }

    /// Blocks and tables currently allocated
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Largest file size representable through the three table levels
    pub fn max_file_size(&self) -> u64 {
        let s = self.pointers_per_block() as u64;
        (s + s * s + s * s * s) * self.block_size as u64
    }

    fn reserve(&mut self) -> ImfsResult<()> {
        if let Some(limit) = self.limit {
            if self.allocated >= limit {
                log::warn!("imfs: block budget of {} exhausted", limit);
                return Err(ImfsError::NoSpace);
            }
        }
        self.allocated += 1;
        Ok(())
    }

    fn alloc_block(&mut self) -> ImfsResult<Block> {
        self.reserve()?;
        Ok(vec![0u8; self.block_size].into_boxed_slice())
    }

    fn alloc_table<T>(&mut self) -> ImfsResult<BlockTable<T>> {
        self.reserve()?;
        Ok(BlockTable::new(self.pointers_per_block()))
    }

    fn free(&mut self, count: usize) {
        self.allocated = self.allocated.saturating_sub(count);
    }
}

/// Position of a block inside the table hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockPath {
    Indirect(usize),
    Doubly(usize, usize),
    Triply(usize, usize, usize),
}

fn locate(s: u64, block: u64) -> ImfsResult<BlockPath> {
    if block < s {
        return Ok(BlockPath::Indirect(block as usize));
    }
    let block = block - s;
    if block < s * s {
        return Ok(BlockPath::Doubly((block / s) as usize, (block % s) as usize));
    }
    let block = block - s * s;
    if block < s * s * s {
        return Ok(BlockPath::Triply(
            (block / (s * s)) as usize,
            ((block / s) % s) as usize,
            (block % s) as usize,
        ));
    }
    Err(ImfsError::FileTooLarge)
}

/// Return the slot's content, creating it first when allowed
fn descend<'a, T>(
    slot: &'a mut Option<T>,
    allocate: bool,
    make: impl FnOnce() -> ImfsResult<T>,
) -> ImfsResult<Option<&'a mut T>> {
    if slot.is_none() {
        if !allocate {
            return Ok(None);
        }
        *slot = Some(make()?);
    }
    Ok(slot.as_mut())
}

/// Memory file payload
#[derive(Default)]
pub struct MemFile {
    size: u64,
    indirect: Option<BlockTable<Block>>,
    doubly: Option<BlockTable<BlockTable<Block>>>,
    triply: Option<BlockTable<BlockTable<BlockTable<Block>>>>,
}

impl MemFile {
    /// Create an empty file with no tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Current size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Check whether any block table has been allocated
    pub fn has_tables(&self) -> bool {
        self.indirect.is_some() || self.doubly.is_some() || self.triply.is_some()
    }

    /// Locate a block, allocating missing tables and the block when asked
    ///
    /// Returns `Ok(None)` when `allocate` is false and the block is absent.
    pub fn get_block(
        &mut self,
        pool: &mut BlockPool,
        block: u64,
        allocate: bool,
    ) -> ImfsResult<Option<&mut [u8]>> {
        let path = locate(pool.pointers_per_block() as u64, block)?;
        let leaf = match path {
            BlockPath::Indirect(i) => {
                let Some(table) = descend(&mut self.indirect, allocate, || pool.alloc_table())? else {
                    return Ok(None);
                };
                descend(&mut table.entries[i], allocate, || pool.alloc_block())?
            }
            BlockPath::Doubly(i, j) => {
                let Some(top) = descend(&mut self.doubly, allocate, || pool.alloc_table())? else {
                    return Ok(None);
                };
                let Some(table) = descend(&mut top.entries[i], allocate, || pool.alloc_table())? else {
                    return Ok(None);
                };
                descend(&mut table.entries[j], allocate, || pool.alloc_block())?
            }
            BlockPath::Triply(i, j, k) => {
                let Some(top) = descend(&mut self.triply, allocate, || pool.alloc_table())? else {
                    return Ok(None);
                };
                let Some(mid) = descend(&mut top.entries[i], allocate, || pool.alloc_table())? else {
                    return Ok(None);
                };
                let Some(table) = descend(&mut mid.entries[j], allocate, || pool.alloc_table())? else {
                    return Ok(None);
                };
                descend(&mut table.entries[k], allocate, || pool.alloc_block())?
            }
        };
        Ok(leaf.map(|block| &mut **block))
    }

    /// Locate an existing block without allocating
    fn find_block(&self, pointers_per_block: usize, block: u64) -> ImfsResult<Option<&[u8]>> {
        let leaf = match locate(pointers_per_block as u64, block)? {
            BlockPath::Indirect(i) => self.indirect.as_ref().and_then(|t| t.entries[i].as_ref()),
            BlockPath::Doubly(i, j) => self
                .doubly
                .as_ref()
                .and_then(|t| t.entries[i].as_ref())
                .and_then(|t| t.entries[j].as_ref()),
            BlockPath::Triply(i, j, k) => self
                .triply
                .as_ref()
                .and_then(|t| t.entries[i].as_ref())
                .and_then(|t| t.entries[j].as_ref())
                .and_then(|t| t.entries[k].as_ref()),
        };
        Ok(leaf.map(|block| &**block))
    }

    /// Grow the file to `new_size`, allocating every block up to it
    ///
    /// With `zero_fill`, bytes between the old end and the new end are
    /// cleared, including any left over in blocks retained by a shrink.
    pub fn extend(&mut self, pool: &mut BlockPool, new_size: u64, zero_fill: bool) -> ImfsResult<()> {
        if new_size > pool.max_file_size() {
            return Err(ImfsError::FileTooLarge);
        }
        if new_size <= self.size {
            return Ok(());
        }

        let block_size = pool.block_size() as u64;
        let first = self.size / block_size;
        let last = (new_size - 1) / block_size;
        let mut offset = (self.size % block_size) as usize;

        crate::debug_imfs!("memfile: extend {} -> {} (blocks {}..={})", self.size, new_size, first, last);

        for block in first..=last {
            // Partial failure keeps what was allocated; size stays unchanged.
            let data = self.get_block(pool, block, true)?.ok_or(ImfsError::IoError)?;
            if zero_fill {
                data[offset..].fill(0);
            }
            offset = 0;
        }

        self.size = new_size;
        Ok(())
    }

    /// Copy up to `buf.len()` bytes from `offset`, clipped to the file size
    pub fn read(&self, pool: &BlockPool, offset: u64, buf: &mut [u8]) -> ImfsResult<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let len = (buf.len() as u64).min(self.size - offset) as usize;
        let block_size = pool.block_size();
        let per_table = pool.pointers_per_block();

        // Partial first block, whole middle blocks, partial last block
        let mut block = offset / block_size as u64;
        let mut in_block = (offset % block_size as u64) as usize;
        let mut copied = 0;
        while copied < len {
            let chunk = (block_size - in_block).min(len - copied);
            let data = self.find_block(per_table, block)?.ok_or(ImfsError::IoError)?;
            buf[copied..copied + chunk].copy_from_slice(&data[in_block..in_block + chunk]);
            copied += chunk;
            block += 1;
            in_block = 0;
        }
        Ok(copied)
    }

    /// Write `data` at `offset`, growing the file as needed
    pub fn write(&mut self, pool: &mut BlockPool, offset: u64, data: &[u8]) -> ImfsResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(ImfsError::FileTooLarge)?;
        if end > self.size {
            // A write that starts past the end leaves a hole that must read as zeros
            let zero_fill = offset > self.size;
            self.extend(pool, end, zero_fill)?;
        }

        let block_size = pool.block_size();
        let mut block = offset / block_size as u64;
        let mut in_block = (offset % block_size as u64) as usize;
        let mut copied = 0;
        while copied < data.len() {
            let chunk = (block_size - in_block).min(data.len() - copied);
            let target = self.get_block(pool, block, true)?.ok_or(ImfsError::IoError)?;
            target[in_block..in_block + chunk].copy_from_slice(&data[copied..copied + chunk]);
            copied += chunk;
            block += 1;
            in_block = 0;
        }
        Ok(copied)
    }

    /// Set the file size
    ///
    /// Growing zero-fills; shrinking keeps the blocks past the new end.
    pub fn truncate(&mut self, pool: &mut BlockPool, new_size: u64) -> ImfsResult<()> {
        if new_size > self.size {
            self.extend(pool, new_size, true)
        } else {
            self.size = new_size;
            Ok(())
        }
    }

    /// Free every block and table, depth first
    pub fn release(&mut self, pool: &mut BlockPool) {
        if let Some(table) = self.indirect.take() {
            table.release(pool);
        }
        if let Some(table) = self.doubly.take() {
            table.release(pool);
        }
        if let Some(table) = self.triply.take() {
            table.release(pool);
        }
        self.size = 0;
    }
}
