//! Linear files
//!
//! A linear file references a contiguous read-only image (typically a file
//! inside an archive linked into the system image) without copying it. The
//! first open for writing copies the image into a memory file.

use crate::memfile::{BlockPool, MemFile};
use crate::ImfsResult;

/// Linear file payload
#[derive(Debug, Clone, Copy)]
pub struct LinearFile {
    data: &'static [u8],
}

impl LinearFile {
    /// Wrap a memory image
    pub fn new(data: &'static [u8]) -> Self {
        LinearFile { data }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Copy from the image, clipped to its size
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> usize {
        if offset >= self.size() {
            return 0;
        }
        let start = offset as usize;
        let count = buf.len().min(self.data.len() - start);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        count
    }

    /// Copy the image into a new memory file
    ///
    /// On failure the blocks allocated so far are returned to the pool and
    /// the linear file stays as it was.
    pub fn promote(&self, pool: &mut BlockPool) -> ImfsResult<MemFile> {
        let mut file = MemFile::new();
        if let Err(e) = file.write(pool, 0, self.data) {
            file.release(pool);
            return Err(e);
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImfsError;

    static IMAGE: &[u8] = b"linear file image contents";

    #[test]
    fn test_read_clipped() {
        let file = LinearFile::new(IMAGE);
        let mut buf = [0u8; 64];
        assert_eq!(file.read(0, &mut buf), IMAGE.len());
        assert_eq!(&buf[..IMAGE.len()], IMAGE);

        let mut small = [0u8; 4];
        assert_eq!(file.read(7, &mut small), 4);
        assert_eq!(&small, b"file");
        assert_eq!(file.read(1000, &mut small), 0);
    }

    #[test]
    fn test_promote_copies_image() {
        let mut pool = BlockPool::new(16, None);
        let memfile = LinearFile::new(IMAGE).promote(&mut pool).unwrap();
        assert_eq!(memfile.size(), IMAGE.len() as u64);

        let mut buf = [0u8; 64];
        let n = memfile.read(&pool, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], IMAGE);
    }

    #[test]
    fn test_promote_failure_releases_blocks() {
        let mut pool = BlockPool::new(16, Some(1));
        assert_eq!(LinearFile::new(IMAGE).promote(&mut pool).err(), Some(ImfsError::NoSpace));
        assert_eq!(pool.allocated(), 0);
    }
}
