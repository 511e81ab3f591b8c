//! Boot image loading
//!
//! Populates a directory tree from a ustar archive linked into the image.
//! Regular files become linear files that read straight out of the archive;
//! they are only copied into blocks if someone opens them for writing.

use alloc::format;
use alloc::string::String;

use crate::vfs::{Context, Vfs};
use crate::{ImfsError, ImfsResult};

const BLOCK_SIZE: usize = 512;

const NAME: (usize, usize) = (0, 100);
const MODE: (usize, usize) = (100, 108);
const SIZE: (usize, usize) = (124, 136);
const CHECKSUM: (usize, usize) = (148, 156);
const TYPEFLAG: usize = 156;
const LINKNAME: (usize, usize) = (157, 257);
const MAGIC: (usize, usize) = (257, 262);
const PREFIX: (usize, usize) = (345, 500);

fn field(header: &[u8], (start, end): (usize, usize)) -> &[u8] {
    &header[start..end]
}

/// Parse a NUL or space terminated octal number
fn octal(bytes: &[u8]) -> ImfsResult<u64> {
    let mut value: u64 = 0;
    for &b in bytes.iter().skip_while(|&&b| b == b' ') {
        match b {
            b'0'..=b'7' => {
                value = value
                    .checked_mul(8)
                    .and_then(|v| v.checked_add((b - b'0') as u64))
                    .ok_or(ImfsError::InvalidArgument)?;
            }
            0 | b' ' => break,
            _ => return Err(ImfsError::InvalidArgument),
        }
    }
    Ok(value)
}

fn text(bytes: &[u8]) -> ImfsResult<&str> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    core::str::from_utf8(&bytes[..end]).map_err(|_| ImfsError::InvalidArgument)
}

/// Header checksum with the checksum field counted as spaces
fn checksum(header: &[u8]) -> u64 {
    header
        .iter()
        .enumerate()
        .map(|(i, &b)| {
            if (CHECKSUM.0..CHECKSUM.1).contains(&i) {
                b' ' as u64
            } else {
                b as u64
            }
        })
        .sum()
}

fn join(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

/// Archive member name, without `./` prefixes or trailing slashes
fn member_name(header: &[u8]) -> ImfsResult<String> {
    let name = text(field(header, NAME))?;
    let prefix = text(field(header, PREFIX))?;
    let full = if prefix.is_empty() {
        String::from(name)
    } else {
        format!("{}/{}", prefix, name)
    };
    let mut trimmed = full.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    Ok(String::from(trimmed.trim_matches('/')))
}

/// Load `image` below the directory `mount_path`
///
/// Returns the number of nodes created. Directories that already exist are
/// reused.
pub fn load(vfs: &Vfs, ctx: &Context, mount_path: &str, image: &'static [u8]) -> ImfsResult<usize> {
    let mut offset = 0;
    let mut created = 0;

    while offset + BLOCK_SIZE <= image.len() {
        let header = &image[offset..offset + BLOCK_SIZE];
        if header.iter().all(|&b| b == 0) {
            break;
        }
        if !field(header, MAGIC).starts_with(b"ustar") {
            log::error!("tar: bad magic at offset {}", offset);
            return Err(ImfsError::InvalidArgument);
        }
        if octal(field(header, CHECKSUM))? != checksum(header) {
            log::error!("tar: checksum mismatch at offset {}", offset);
            return Err(ImfsError::InvalidArgument);
        }

        let name = member_name(header)?;
        let mode = octal(field(header, MODE))? as u32 & 0o7777;
        let size = octal(field(header, SIZE))? as usize;
        let data_start = offset + BLOCK_SIZE;
        let data_end = data_start.checked_add(size).ok_or(ImfsError::InvalidArgument)?;
        if data_end > image.len() {
            return Err(ImfsError::InvalidArgument);
        }
        offset = data_start + size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;

        if name.is_empty() {
            continue;
        }
        let path = join(mount_path, &name);
        match header[TYPEFLAG] {
            b'0' | 0 => {
                vfs.make_linear_file(ctx, &path, mode, &image[data_start..data_end])?;
            }
            b'5' => match vfs.mkdir(ctx, &path, mode) {
                Ok(()) => {}
                Err(ImfsError::AlreadyExists) => continue,
                Err(e) => return Err(e),
            },
            b'2' => {
                let target = text(field(header, LINKNAME))?;
                vfs.symlink(ctx, target, &path)?;
            }
            b'1' => {
                let target = join(mount_path, text(field(header, LINKNAME))?);
                vfs.link(ctx, &target, &path)?;
            }
            other => {
                log::warn!("tar: skipping '{}' with type {:?}", name, other as char);
                continue;
            }
        }
        debug_imfs!("tar: loaded '{}'", path);
        created += 1;
    }

    log::info!("tar: {} nodes loaded under '{}'", created, mount_path);
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::OpenFlags;
    use crate::imfs::ImfsType;
    use crate::node::NodeType;
    use crate::permissions::Credentials;
    use alloc::vec::Vec;

    fn header(name: &str, typeflag: u8, mode: u32, size: usize, linkname: &str) -> [u8; BLOCK_SIZE] {
        let mut h = [0u8; BLOCK_SIZE];
        h[..name.len()].copy_from_slice(name.as_bytes());
        let mode = format!("{:07o}\0", mode);
        h[MODE.0..MODE.1].copy_from_slice(mode.as_bytes());
        let size = format!("{:011o}\0", size);
        h[SIZE.0..SIZE.1].copy_from_slice(size.as_bytes());
        h[TYPEFLAG] = typeflag;
        h[LINKNAME.0..LINKNAME.0 + linkname.len()].copy_from_slice(linkname.as_bytes());
        h[MAGIC.0..MAGIC.0 + 6].copy_from_slice(b"ustar\0");
        let sum = format!("{:06o}\0 ", checksum(&h));
        h[CHECKSUM.0..CHECKSUM.1].copy_from_slice(sum.as_bytes());
        h
    }

    fn archive(members: &[(&str, u8, &str, &str)]) -> &'static [u8] {
        let mut out = Vec::new();
        for (name, typeflag, data, linkname) in members {
            out.extend_from_slice(&header(name, *typeflag, 0o644, data.len(), linkname));
            out.extend_from_slice(data.as_bytes());
            let pad = (BLOCK_SIZE - data.len() % BLOCK_SIZE) % BLOCK_SIZE;
            out.resize(out.len() + pad, 0);
        }
        out.resize(out.len() + 2 * BLOCK_SIZE, 0);
        out.leak()
    }

    #[test]
    fn test_octal_fields() {
        assert_eq!(octal(b"0000644\0").unwrap(), 0o644);
        assert_eq!(octal(b"  17 ").unwrap(), 0o17);
        assert_eq!(octal(b"\0\0").unwrap(), 0);
        assert_eq!(octal(b"0009"), Err(ImfsError::InvalidArgument));
    }

    #[test]
    fn test_load_tree() {
        let vfs = Vfs::new();
        vfs.mount_root(&ImfsType::default(), "").unwrap();
        let ctx = vfs.context(Credentials::root()).unwrap();
        vfs.mkdir(&ctx, "/boot", 0o755).unwrap();

        let image = archive(&[
            ("./etc/", b'5', "", ""),
            ("./etc/motd", b'0', "welcome\n", ""),
            ("./etc/issue", b'2', "", "motd"),
            ("./etc/motd2", b'1', "", "etc/motd"),
        ]);
        assert_eq!(load(&vfs, &ctx, "/boot", image).unwrap(), 4);

        assert_eq!(vfs.read_file(&ctx, "/boot/etc/motd").unwrap(), b"welcome\n");
        assert_eq!(vfs.read_file(&ctx, "/boot/etc/issue").unwrap(), b"welcome\n");
        assert_eq!(vfs.read_file(&ctx, "/boot/etc/motd2").unwrap(), b"welcome\n");
        assert_eq!(vfs.readlink(&ctx, "/boot/etc/issue").unwrap(), "motd");

        let handle = vfs.open(&ctx, "/boot/etc/motd", OpenFlags::READ, 0).unwrap();
        assert_eq!(handle.node_type().unwrap(), NodeType::LinearFile);
    }

    #[test]
    fn test_corrupt_checksum() {
        let vfs = Vfs::new();
        vfs.mount_root(&ImfsType::default(), "").unwrap();
        let ctx = vfs.context(Credentials::root()).unwrap();

        let mut raw = archive(&[("f", b'0', "abc", "")]).to_vec();
        raw[0] = b'g';
        let image: &'static [u8] = raw.leak();
        assert_eq!(load(&vfs, &ctx, "/", image), Err(ImfsError::InvalidArgument));
    }
}
