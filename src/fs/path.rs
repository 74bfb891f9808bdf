//! Path resolution.
//!
//! Walks slash-separated names from the root or the working directory.
//! Symlinks met in the middle of a walk are expanded against a per-operation
//! budget; the object a walk ends on is returned as-is and the caller decides
//! whether to follow it.

use std::sync::Arc;

use tracing::{debug, warn};

use super::inodes::{Inode, InodeKind, InodeStore};
use super::perm::Mode;
use crate::config::{DIRSIZ, MAXPATH};
use crate::error::{FsError, Result};

/// Reject empty and overlong paths before touching the namespace.
pub fn check_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(FsError::InvalidArgument("empty path".to_string()));
    }
    if path.len() >= MAXPATH {
        return Err(FsError::NameTooLong(path.to_string()));
    }
    Ok(())
}

fn components(path: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    if let Some(long) = parts.iter().find(|c| c.len() > DIRSIZ) {
        return Err(FsError::NameTooLong(long.to_string()));
    }
    if parts.iter().any(|c| c.contains('\0')) {
        return Err(FsError::InvalidArgument(format!("{:?}: NUL in name", path)));
    }
    Ok(parts)
}

pub struct Resolver<'a> {
    store: &'a InodeStore,
    cwd: Arc<Inode>,
    budget: usize,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a InodeStore, cwd: Arc<Inode>, max_symlink_depth: usize) -> Self {
        Self {
            store,
            cwd,
            budget: max_symlink_depth,
        }
    }

    /// Resolve every component. The final object is not followed.
    pub fn namei(&mut self, path: &str) -> Result<Arc<Inode>> {
        check_path(path)?;
        let parts = components(path)?;
        let mut ip = self.start(path);
        for name in parts {
            ip = self.step(ip, name, path)?;
        }
        Ok(ip)
    }

    /// Resolve all but the last component. Returns the parent, unexpanded and
    /// unchecked, with the last name.
    pub fn nameiparent(&mut self, path: &str) -> Result<(Arc<Inode>, String)> {
        check_path(path)?;
        let parts = components(path)?;
        let Some((last, prefix)) = parts.split_last() else {
            return Err(FsError::InvalidArgument(format!("{} has no final component", path)));
        };
        let mut ip = self.start(path);
        for name in prefix {
            ip = self.step(ip, name, path)?;
        }
        Ok((ip, last.to_string()))
    }

    /// Replace a symlink with the object its target names. Each call spends
    /// one unit of the budget.
    pub fn expand(&mut self, link: &Arc<Inode>) -> Result<Arc<Inode>> {
        if self.budget == 0 {
            return Err(FsError::SymlinkLoop(format!("inode {}", link.inum())));
        }
        self.budget -= 1;
        let target = read_link(link)?;
        debug!("expand symlink {} -> {}", link.inum(), target);
        self.namei(&target)
    }

    /// A parent returned by `nameiparent` that is itself a symlink is expanded
    /// exactly once. The result must be a directory.
    pub fn expand_parent(&mut self, dp: Arc<Inode>, path: &str) -> Result<Arc<Inode>> {
        let dp = if dp.kind() == InodeKind::Symlink {
            self.expand(&dp)?
        } else {
            dp
        };
        if dp.kind() != InodeKind::Dir {
            return Err(FsError::NotDirectory(path.to_string()));
        }
        Ok(dp)
    }

    /// `nameiparent` followed by `expand_parent`: the directory a new or
    /// existing leaf lives in.
    pub fn parent_dir(&mut self, path: &str) -> Result<(Arc<Inode>, String)> {
        let (dp, name) = self.nameiparent(path)?;
        let dp = self.expand_parent(dp, path)?;
        Ok((dp, name))
    }

    fn start(&self, path: &str) -> Arc<Inode> {
        if path.starts_with('/') {
            self.store.root()
        } else {
            Arc::clone(&self.cwd)
        }
    }

    /// Enter directory `ip` and look `name` up in it.
    fn step(&mut self, mut ip: Arc<Inode>, name: &str, path: &str) -> Result<Arc<Inode>> {
        while ip.kind() == InodeKind::Symlink {
            ip = self.expand(&ip)?;
        }
        let inum = {
            let dir = ip.lock();
            if dir.kind() != InodeKind::Dir {
                return Err(FsError::NotDirectory(path.to_string()));
            }
            if !dir.mode().contains(Mode::READ) {
                return Err(FsError::PermissionDenied(path.to_string()));
            }
            match dir.dirlookup(name) {
                Some((_, de)) => u32::from(de.inum),
                None => return Err(FsError::NotFound(path.to_string())),
            }
        };
        self.store.get(inum).ok_or_else(|| {
            warn!("entry {:?} in inode {} names free inode {}", name, ip.inum(), inum);
            FsError::NotFound(path.to_string())
        })
    }
}

/// The target path stored in a symlink.
pub fn read_link(link: &Inode) -> Result<String> {
    let guard = link.lock();
    if guard.kind() != InodeKind::Symlink {
        return Err(FsError::InvalidArgument(format!(
            "inode {} is not a symlink",
            link.inum()
        )));
    }
    String::from_utf8(guard.data().to_vec())
        .map_err(|_| FsError::InvalidArgument(format!("symlink {} is not UTF-8", link.inum())))
}
