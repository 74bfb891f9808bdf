//! On-disk directory entry records.
//!
//! A directory's data is a packed array of 16-byte records: a little-endian
//! inode number followed by a NUL-padded name. Inode number 0 marks a free slot.

use crate::config::DIRSIZ;
use crate::error::{FsError, Result};

pub const DIRENT_SIZE: usize = 2 + DIRSIZ;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inum: u16,
    name: [u8; DIRSIZ],
}

impl DirEntry {
    pub fn new(name: &str, inum: u16) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.len() > DIRSIZ {
            return Err(FsError::NameTooLong(name.to_string()));
        }
        if bytes.contains(&0) {
            return Err(FsError::InvalidArgument(format!("{:?}: NUL in name", name)));
        }
        let mut buf = [0u8; DIRSIZ];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { inum, name: buf })
    }

    pub fn empty() -> Self {
        Self {
            inum: 0,
            name: [0; DIRSIZ],
        }
    }

    pub fn is_free(&self) -> bool {
        self.inum == 0
    }

    pub fn name(&self) -> String {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(DIRSIZ);
        String::from_utf8_lossy(&self.name[..len]).into_owned()
    }

    pub fn name_is(&self, name: &str) -> bool {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(DIRSIZ);
        &self.name[..len] == name.as_bytes()
    }

    pub fn encode(&self) -> [u8; DIRENT_SIZE] {
        let mut out = [0u8; DIRENT_SIZE];
        out[..2].copy_from_slice(&self.inum.to_le_bytes());
        out[2..].copy_from_slice(&self.name);
        out
    }

    /// Decode one record. `raw` must hold at least `DIRENT_SIZE` bytes.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() < DIRENT_SIZE {
            return None;
        }
        let inum = u16::from_le_bytes([raw[0], raw[1]]);
        let mut name = [0u8; DIRSIZ];
        name.copy_from_slice(&raw[2..DIRENT_SIZE]);
        Some(Self { inum, name })
    }
}

/// Iterate `(byte offset, entry)` over a directory's data.
pub fn entries(data: &[u8]) -> impl Iterator<Item = (usize, DirEntry)> + '_ {
    data.chunks_exact(DIRENT_SIZE)
        .enumerate()
        .filter_map(|(i, raw)| DirEntry::decode(raw).map(|de| (i * DIRENT_SIZE, de)))
}
