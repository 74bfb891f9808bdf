//! The open pipeline: create, metadata-only, and follow modes, then the
//! permission gate and handle allocation, all inside one transaction.

use std::sync::Arc;

use bitflags::bitflags;
use tracing::debug;

use super::handles::{Fd, FileKind, Process};
use super::inodes::{Inode, InodeKind};
use super::path::check_path;
use super::perm::{self, Access, Mode};
use super::FileSystem;
use crate::error::{FsError, Result};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenMode: u32 {
        const WRONLY = 0x001;
        const RDWR = 0x002;
        /// Create a regular file if the name is absent.
        const CREATE = 0x200;
        /// Empty a regular file on open.
        const TRUNC = 0x400;
        /// Open the named object itself: no terminal symlink expansion, no
        /// permission gate, no data access (except reading a symlink's target).
        const NOACCESS = 0x800;
    }
}

impl OpenMode {
    pub const RDONLY: OpenMode = OpenMode::empty();
}

impl FileSystem {
    pub fn open(&self, proc: &mut Process, path: &str, omode: OpenMode) -> Result<Fd> {
        debug!("open(pid={}, path={:?}, mode={:?})", proc.pid(), path, omode);
        check_path(path)?;
        let metadata_only = omode.contains(OpenMode::NOACCESS);
        let access = Access::from_open_mode(omode);

        let tx = self.begin();
        let ip = if omode.contains(OpenMode::CREATE) {
            self.create(&tx, proc, path, InodeKind::File, 0, 0, Mode::all())?
        } else if metadata_only {
            self.lookup_nofollow(proc, path)?
        } else {
            self.lookup_follow(proc, path)?
        };

        let (kind, readable, writable) = {
            let mut guard = ip.lock();
            if !metadata_only {
                let gate = Access {
                    read: access.read,
                    write: access.write || omode.contains(OpenMode::TRUNC),
                };
                perm::check(path, guard.kind(), guard.mode(), gate)?;
            }

            let kind = match guard.kind() {
                InodeKind::Device => {
                    let major = guard.major();
                    if !(0..self.config.ndev).contains(&major) {
                        return Err(FsError::NoDevice(major));
                    }
                    FileKind::Device { major }
                }
                _ => FileKind::Inode,
            };

            let (readable, writable) = if metadata_only {
                (guard.kind() == InodeKind::Symlink, false)
            } else {
                (access.read, access.write)
            };

            if omode.contains(OpenMode::TRUNC) && !metadata_only && guard.kind() == InodeKind::File
            {
                guard.truncate(&tx);
            }
            (kind, readable, writable)
        };

        let file = self.files.alloc(ip, kind, readable, writable)?;
        let fd = match proc.fdalloc(Arc::clone(&file)) {
            Ok(fd) => fd,
            Err(e) => {
                self.files.remove(file.id());
                return Err(e);
            }
        };
        tx.commit();
        Ok(fd)
    }

    /// Resolve `path` to the object it names without expanding a final
    /// symlink. A symlink parent is expanded once.
    pub(crate) fn lookup_nofollow(&self, proc: &Process, path: &str) -> Result<Arc<Inode>> {
        let mut resolver = self.resolver(proc);
        // "/" has no final name to look up.
        if path.starts_with('/') && path.split('/').all(str::is_empty) {
            return resolver.namei(path);
        }
        let (dp, name) = resolver.parent_dir(path)?;
        let inum = {
            let dir = dp.lock();
            match dir.dirlookup(&name) {
                Some((_, de)) => u32::from(de.inum),
                None => return Err(FsError::NotFound(path.to_string())),
            }
        };
        self.store
            .get(inum)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    /// Resolve `path` and keep expanding while the result is a symlink.
    pub(crate) fn lookup_follow(&self, proc: &Process, path: &str) -> Result<Arc<Inode>> {
        let mut resolver = self.resolver(proc);
        let mut ip = resolver.namei(path)?;
        while ip.kind() == InodeKind::Symlink {
            ip = resolver.expand(&ip)?;
        }
        Ok(ip)
    }
}
