//! Namespace mutations. Each public call runs in its own transaction; a
//! recoverable failure drops the transaction and every change is undone.

use std::sync::Arc;

use tracing::debug;

use super::handles::Process;
use super::inodes::{Inode, InodeKind};
use super::log::Transaction;
use super::path::check_path;
use super::perm::Mode;
use super::FileSystem;
use crate::config::MAXPATH;
use crate::error::{FsError, Result};

impl FileSystem {
    /// Create `path` as a new object of `kind`, or hand back an existing
    /// regular file or device when a regular file is wanted.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create(
        &self,
        tx: &Transaction<'_>,
        proc: &Process,
        path: &str,
        kind: InodeKind,
        major: i16,
        minor: i16,
        mode: Mode,
    ) -> Result<Arc<Inode>> {
        let mut resolver = self.resolver(proc);
        let (dp, name) = resolver.parent_dir(path)?;

        let mut dir = dp.lock();
        // An unlinked directory can still be a working directory; nothing
        // new may be attached under it.
        if dir.nlink() == 0 {
            return Err(FsError::NotFound(path.to_string()));
        }
        if let Some((_, de)) = dir.dirlookup(&name) {
            drop(dir);
            let ip = self
                .store
                .get(u32::from(de.inum))
                .ok_or_else(|| FsError::NotFound(path.to_string()))?;
            let existing = ip.kind();
            if kind == InodeKind::File && matches!(existing, InodeKind::File | InodeKind::Device) {
                return Ok(ip);
            }
            return Err(FsError::Exists(path.to_string()));
        }

        let ip = self.store.alloc(tx, kind)?;
        {
            let mut child = ip.lock();
            child.init(tx, mode, major, minor);
            if kind == InodeKind::Dir {
                // ".." counts against the parent; "." does not count against
                // the new directory.
                if let Err(e) = dir.link(tx) {
                    panic!("create {}: parent link count: {}", path, e);
                }
                if let Err(e) = child
                    .dirlink(tx, ".", ip.inum())
                    .and_then(|()| child.dirlink(tx, "..", dp.inum()))
                {
                    panic!("create {}: dot entries: {}", path, e);
                }
            }
        }
        if let Err(e) = dir.dirlink(tx, &name, ip.inum()) {
            panic!("create {}: linking into parent: {}", path, e);
        }
        debug!("created {} as inode {} ({:?})", path, ip.inum(), kind);
        Ok(ip)
    }

    pub fn mkdir(&self, proc: &mut Process, path: &str) -> Result<()> {
        debug!("mkdir(pid={}, path={:?})", proc.pid(), path);
        let tx = self.begin();
        self.create(&tx, proc, path, InodeKind::Dir, 0, 0, Mode::all())?;
        tx.commit();
        Ok(())
    }

    pub fn mknod(&self, proc: &mut Process, path: &str, major: i16, minor: i16) -> Result<()> {
        debug!("mknod(pid={}, path={:?}, major={}, minor={})", proc.pid(), path, major, minor);
        let tx = self.begin();
        self.create(&tx, proc, path, InodeKind::Device, major, minor, Mode::all())?;
        tx.commit();
        Ok(())
    }

    /// Create `new` as another name for the object `old` names.
    pub fn link(&self, proc: &mut Process, old: &str, new: &str) -> Result<()> {
        debug!("link(pid={}, old={:?}, new={:?})", proc.pid(), old, new);
        check_path(new)?;
        let tx = self.begin();
        let ip = self.resolver(proc).namei(old)?;
        {
            let mut target = ip.lock();
            if target.kind() == InodeKind::Dir {
                return Err(FsError::IsDirectory(old.to_string()));
            }
            target.link(&tx)?;
        }

        // Dropping `tx` on failure undoes the speculative increment above.
        let (dp, name) = self.resolver(proc).parent_dir(new)?;
        let mut dir = dp.lock();
        if dir.nlink() == 0 {
            return Err(FsError::NotFound(new.to_string()));
        }
        if dp.dev() != ip.dev() {
            return Err(FsError::CrossDevice(new.to_string()));
        }
        dir.dirlink(&tx, &name, ip.inum())?;
        drop(dir);
        tx.commit();
        Ok(())
    }

    pub fn unlink(&self, proc: &mut Process, path: &str) -> Result<()> {
        debug!("unlink(pid={}, path={:?})", proc.pid(), path);
        let tx = self.begin();
        let (dp, name) = self.resolver(proc).parent_dir(path)?;
        if name == "." || name == ".." {
            return Err(FsError::InvalidArgument(format!("cannot unlink {}", path)));
        }

        let ip = {
            let mut dir = dp.lock();
            let (off, de) = dir
                .dirlookup(&name)
                .ok_or_else(|| FsError::NotFound(path.to_string()))?;
            let ip = self
                .store
                .get(u32::from(de.inum))
                .ok_or_else(|| FsError::NotFound(path.to_string()))?;

            let mut target = ip.lock();
            if target.nlink() < 1 {
                panic!("unlink {}: inode {} has no links", path, ip.inum());
            }
            if target.kind() == InodeKind::Dir && !target.is_dir_empty() {
                return Err(FsError::NotEmpty(path.to_string()));
            }

            dir.dirclear(&tx, off);
            if target.kind() == InodeKind::Dir {
                dir.unlink(&tx);
            }
            target.unlink(&tx);
            drop(target);
            ip
        };
        self.store.reclaim_if_orphaned(&tx, ip);
        tx.commit();
        Ok(())
    }

    /// Create a symlink at `path` whose data is the literal `target`.
    pub fn symlink(&self, proc: &mut Process, target: &str, path: &str) -> Result<()> {
        debug!("symlink(pid={}, target={:?}, path={:?})", proc.pid(), target, path);
        if target.len() >= MAXPATH {
            return Err(FsError::NameTooLong(target.to_string()));
        }
        let tx = self.begin();
        let ip = self.create(&tx, proc, path, InodeKind::Symlink, 0, 0, Mode::all())?;
        ip.lock().write_at(&tx, 0, target.as_bytes())?;
        tx.commit();
        Ok(())
    }

    /// Set the absolute mode of the object `path` names. A final symlink is
    /// not followed and no permission bit is consulted.
    pub fn chmod(&self, proc: &mut Process, mode: Mode, path: &str) -> Result<()> {
        debug!("chmod(pid={}, mode={:?}, path={:?})", proc.pid(), mode, path);
        let tx = self.begin();
        let ip = self.lookup_nofollow(proc, path)?;
        ip.lock().set_mode(&tx, mode);
        tx.commit();
        Ok(())
    }

    pub fn chdir(&self, proc: &mut Process, path: &str) -> Result<()> {
        debug!("chdir(pid={}, path={:?})", proc.pid(), path);
        let tx = self.begin();
        let ip = self.lookup_follow(proc, path)?;
        if ip.kind() != InodeKind::Dir {
            return Err(FsError::NotDirectory(path.to_string()));
        }
        let old = std::mem::replace(&mut proc.cwd, ip);
        self.store.reclaim_if_orphaned(&tx, old);
        tx.commit();
        Ok(())
    }
}
