use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::dirent::{self, DirEntry};
use super::log::Transaction;
use super::perm::Mode;
use crate::config::MAXFILE;
use crate::error::{FsError, Result};

/// Device number of the only disk.
pub const ROOT_DEV: u32 = 1;

/// Inode number of the root directory.
pub const ROOT_INO: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InodeKind {
    Dir = 1,
    File = 2,
    Device = 3,
    Symlink = 4,
}

impl InodeKind {
    /// Numeric type as reported by `ls`.
    pub fn number(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for InodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InodeKind::Dir => "dir",
            InodeKind::File => "file",
            InodeKind::Device => "device",
            InodeKind::Symlink => "symlink",
        };
        f.write_str(name)
    }
}

/// The persistent part of an inode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInode {
    pub kind: InodeKind,
    pub mode: Mode,
    pub nlink: u16,
    #[serde(default)]
    pub major: i16,
    #[serde(default)]
    pub minor: i16,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl DiskInode {
    fn new(kind: InodeKind) -> Self {
        Self {
            kind,
            mode: Mode::empty(),
            nlink: 0,
            major: 0,
            minor: 0,
            data: Vec::new(),
        }
    }
}

pub struct Inode {
    dev: u32,
    inum: u32,
    disk: Mutex<DiskInode>,
}

impl Inode {
    fn new(dev: u32, inum: u32, disk: DiskInode) -> Self {
        Self {
            dev,
            inum,
            disk: Mutex::new(disk),
        }
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn inum(&self) -> u32 {
        self.inum
    }

    /// Acquire the inode's sleep lock. Released when the guard drops.
    pub fn lock(&self) -> InodeGuard<'_> {
        InodeGuard {
            inode: self,
            disk: self.disk.lock(),
        }
    }

    pub fn kind(&self) -> InodeKind {
        self.disk.lock().kind
    }

    pub(crate) fn restore(&self, image: DiskInode) {
        *self.disk.lock() = image;
    }

    pub(crate) fn image(&self) -> DiskInode {
        self.disk.lock().clone()
    }
}

/// A locked inode. Every mutation takes the enclosing transaction so the
/// previous image can be restored if the call fails.
pub struct InodeGuard<'a> {
    inode: &'a Inode,
    disk: MutexGuard<'a, DiskInode>,
}

impl InodeGuard<'_> {
    pub fn inum(&self) -> u32 {
        self.inode.inum
    }

    pub fn kind(&self) -> InodeKind {
        self.disk.kind
    }

    pub fn mode(&self) -> Mode {
        self.disk.mode
    }

    pub fn nlink(&self) -> u16 {
        self.disk.nlink
    }

    pub fn major(&self) -> i16 {
        self.disk.major
    }

    pub fn minor(&self) -> i16 {
        self.disk.minor
    }

    pub fn size(&self) -> u64 {
        self.disk.data.len() as u64
    }

    pub fn data(&self) -> &[u8] {
        &self.disk.data
    }

    fn touch(&mut self, tx: &Transaction<'_>) -> &mut DiskInode {
        tx.record(self.inode.inum, &self.disk);
        &mut self.disk
    }

    pub(crate) fn init(&mut self, tx: &Transaction<'_>, mode: Mode, major: i16, minor: i16) {
        let disk = self.touch(tx);
        disk.mode = mode;
        disk.major = major;
        disk.minor = minor;
        disk.nlink = 1;
    }

    pub fn set_mode(&mut self, tx: &Transaction<'_>, mode: Mode) {
        self.touch(tx).mode = mode;
    }

    pub fn link(&mut self, tx: &Transaction<'_>) -> Result<()> {
        let disk = self.touch(tx);
        disk.nlink = disk
            .nlink
            .checked_add(1)
            .ok_or(FsError::Exhausted("link count"))?;
        Ok(())
    }

    pub fn unlink(&mut self, tx: &Transaction<'_>) {
        let inum = self.inode.inum;
        let disk = self.touch(tx);
        match disk.nlink.checked_sub(1) {
            Some(n) => disk.nlink = n,
            None => panic!("inode {}: link count underflow", inum),
        }
    }

    /// Copy bytes starting at `off` into `buf`. Returns the count copied.
    pub fn read_at(&self, off: u64, buf: &mut [u8]) -> usize {
        let data = &self.disk.data;
        let Ok(off) = usize::try_from(off) else {
            return 0;
        };
        if off >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - off);
        buf[..n].copy_from_slice(&data[off..off + n]);
        n
    }

    pub fn write_at(&mut self, tx: &Transaction<'_>, off: u64, src: &[u8]) -> Result<usize> {
        let off = usize::try_from(off).map_err(|_| FsError::FileTooLarge)?;
        if off > self.disk.data.len() {
            return Err(FsError::InvalidArgument(format!(
                "write at {} past end of inode {}",
                off, self.inode.inum
            )));
        }
        let end = off.checked_add(src.len()).ok_or(FsError::FileTooLarge)?;
        if end > MAXFILE {
            return Err(FsError::FileTooLarge);
        }
        let disk = self.touch(tx);
        if end > disk.data.len() {
            disk.data.resize(end, 0);
        }
        disk.data[off..end].copy_from_slice(src);
        Ok(src.len())
    }

    pub fn truncate(&mut self, tx: &Transaction<'_>) {
        self.touch(tx).data.clear();
    }

    /// Find a live entry by name. Returns its byte offset and the entry.
    pub fn dirlookup(&self, name: &str) -> Option<(usize, DirEntry)> {
        dirent::entries(&self.disk.data).find(|(_, de)| !de.is_free() && de.name_is(name))
    }

    /// True when no live entry exists past "." and "..".
    pub fn is_dir_empty(&self) -> bool {
        dirent::entries(&self.disk.data)
            .skip(2)
            .all(|(_, de)| de.is_free())
    }

    /// Write a new entry into the first free slot, or append one.
    pub fn dirlink(&mut self, tx: &Transaction<'_>, name: &str, inum: u32) -> Result<()> {
        if self.dirlookup(name).is_some() {
            return Err(FsError::Exists(name.to_string()));
        }
        let inum = u16::try_from(inum)
            .map_err(|_| FsError::InvalidArgument(format!("inode number {} out of range", inum)))?;
        let de = DirEntry::new(name, inum)?;
        let off = dirent::entries(&self.disk.data)
            .find(|(_, slot)| slot.is_free())
            .map(|(off, _)| off)
            .unwrap_or(self.disk.data.len());
        self.write_at(tx, off as u64, &de.encode())?;
        Ok(())
    }

    /// Zero the entry at `off`.
    pub fn dirclear(&mut self, tx: &Transaction<'_>, off: usize) {
        let inum = self.inode.inum;
        if let Err(e) = self.write_at(tx, off as u64, &DirEntry::empty().encode()) {
            panic!("inode {}: clearing entry at offset {}: {}", inum, off, e);
        }
    }
}

/// Reference-counted inode table for one device. Only allocated inodes are
/// present; an inode number missing from the table is free.
pub struct InodeStore {
    dev: u32,
    ninodes: u32,
    table: DashMap<u32, Arc<Inode>>,
}

impl InodeStore {
    /// A fresh device holding only the root directory.
    pub fn format(ninodes: u32) -> Self {
        let store = Self {
            dev: ROOT_DEV,
            ninodes,
            table: DashMap::new(),
        };
        let mut data = Vec::new();
        for name in [".", ".."] {
            let de = DirEntry::new(name, ROOT_INO as u16).expect("dot names fit");
            data.extend_from_slice(&de.encode());
        }
        let root = DiskInode {
            kind: InodeKind::Dir,
            mode: Mode::all(),
            nlink: 1,
            major: 0,
            minor: 0,
            data,
        };
        store.insert(Arc::new(Inode::new(ROOT_DEV, ROOT_INO, root)));
        store
    }

    /// Rebuild a device from persisted inodes.
    pub fn from_images(
        ninodes: u32,
        images: impl IntoIterator<Item = (u32, DiskInode)>,
    ) -> Result<Self> {
        let store = Self {
            dev: ROOT_DEV,
            ninodes,
            table: DashMap::new(),
        };
        for (inum, disk) in images {
            if inum == 0 || inum >= ninodes {
                return Err(FsError::Config(format!(
                    "inode number {} outside 1..{}",
                    inum, ninodes
                )));
            }
            if store.table.contains_key(&inum) {
                return Err(FsError::Config(format!("inode {} listed twice", inum)));
            }
            store.insert(Arc::new(Inode::new(ROOT_DEV, inum, disk)));
        }
        match store.get(ROOT_INO) {
            Some(root) if root.kind() == InodeKind::Dir => Ok(store),
            _ => Err(FsError::Config("root directory missing".to_string())),
        }
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn ninodes(&self) -> u32 {
        self.ninodes
    }

    pub fn get(&self, inum: u32) -> Option<Arc<Inode>> {
        self.table.get(&inum).map(|r| Arc::clone(r.value()))
    }

    pub fn root(&self) -> Arc<Inode> {
        self.get(ROOT_INO).expect("root inode is never freed")
    }

    /// Number of allocated inodes.
    pub fn allocated(&self) -> usize {
        self.table.len()
    }

    /// Allocate an unused inode of the given kind. Its mode and link count
    /// start at zero; the caller initializes them.
    pub fn alloc(&self, tx: &Transaction<'_>, kind: InodeKind) -> Result<Arc<Inode>> {
        let inum = (ROOT_INO + 1..self.ninodes)
            .find(|inum| !self.table.contains_key(inum))
            .ok_or(FsError::Exhausted("inode"))?;
        let inode = Arc::new(Inode::new(self.dev, inum, DiskInode::new(kind)));
        self.insert(Arc::clone(&inode));
        tx.record_alloc(inum);
        debug!("alloc inode {} ({:?})", inum, kind);
        Ok(inode)
    }

    /// Free `inode` if it has no links and nobody else holds a reference.
    /// Returns true if it was freed.
    pub fn reclaim_if_orphaned(&self, tx: &Transaction<'_>, inode: Arc<Inode>) -> bool {
        if inode.lock().nlink() > 0 {
            return false;
        }
        // One reference is the table's, one is ours.
        if Arc::strong_count(&inode) > 2 {
            return false;
        }
        match self.table.remove(&inode.inum) {
            Some((inum, freed)) => {
                debug!("reclaim inode {}", inum);
                tx.record_free(freed);
                true
            }
            None => false,
        }
    }

    pub(crate) fn insert(&self, inode: Arc<Inode>) {
        self.table.insert(inode.inum, inode);
    }

    pub(crate) fn remove(&self, inum: u32) {
        self.table.remove(&inum);
    }

    /// Snapshot of every allocated inode, ordered by number.
    pub fn images(&self) -> Vec<(u32, DiskInode)> {
        let mut images: Vec<(u32, DiskInode)> = self
            .table
            .iter()
            .map(|e| (*e.key(), e.value().image()))
            .collect();
        images.sort_by_key(|(inum, _)| *inum);
        images
    }
}
