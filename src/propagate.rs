//! Recursive permission changes built only from public calls: metadata-only
//! opens, fstat, directory reads and absolute chmod.
//!
//! Revoking READ from a directory is applied after its children so the walk
//! can still list it. Any other change is applied first. A directory that is
//! unreadable when it must be listed gets READ temporarily, and that grant is
//! always taken back before the walk leaves it.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::{FsError, Result};
use crate::fs::dirent::{DirEntry, DIRENT_SIZE};
use crate::fs::handles::Process;
use crate::fs::{FileSystem, InodeKind, Mode, OpenMode, PermDelta, Stat};

/// A node the walk could not update.
#[derive(Debug)]
pub struct Failure {
    pub path: String,
    pub error: FsError,
}

/// Outcome of a walk that got past the root. `root` is set when the root
/// itself could not be finished after some of its children already failed.
#[derive(Debug, Default)]
pub struct Report {
    pub failures: Vec<Failure>,
    pub root: Option<FsError>,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.root.is_none()
    }
}

struct Propagator<'a> {
    fs: &'a FileSystem,
    proc: &'a mut Process,
    delta: PermDelta,
    visited: HashSet<(u32, u32)>,
    report: Report,
}

fn join(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

/// Apply `delta` to `root` and everything below it.
///
/// A root failure is returned as `Err` unless descendants have already been
/// recorded as failed, in which case it lands in `Report::root` next to them.
pub fn propagate(
    fs: &FileSystem,
    proc: &mut Process,
    delta: PermDelta,
    root: &str,
) -> Result<Report> {
    let mut walk = Propagator::new(fs, proc, delta);
    let (resolved, st) = walk.resolve(root)?;
    if let Err(e) = walk.visit(resolved, root.to_string(), st) {
        if walk.report.failures.is_empty() {
            return Err(e);
        }
        warn!("chmod {} failed on {}: {}", delta, root, e);
        walk.report.root = Some(e);
    }
    Ok(walk.report)
}

/// Apply `delta` to the object `path` names, following symlinks.
pub fn chmod_path(fs: &FileSystem, proc: &mut Process, delta: PermDelta, path: &str) -> Result<()> {
    let mut walk = Propagator::new(fs, proc, delta);
    let (resolved, _) = walk.resolve(path)?;
    walk.apply(&resolved)?;
    Ok(())
}

/// Follow `path` through any symlinks using metadata-only opens. Returns the
/// path of the final object and its metadata.
pub fn resolve(fs: &FileSystem, proc: &mut Process, path: &str) -> Result<(String, Stat)> {
    Propagator::new(fs, proc, PermDelta::grant(Mode::empty())).resolve(path)
}

/// Like [`resolve`], but records every path met on the way, `path` first.
/// On failure `hops` ends with the path that could not be followed.
pub fn trace(
    fs: &FileSystem,
    proc: &mut Process,
    path: &str,
    hops: &mut Vec<String>,
) -> Result<Stat> {
    Propagator::new(fs, proc, PermDelta::grant(Mode::empty()))
        .follow(path, hops)
        .map(|(_, st)| st)
}

impl<'a> Propagator<'a> {
    fn new(fs: &'a FileSystem, proc: &'a mut Process, delta: PermDelta) -> Self {
        Self {
            fs,
            proc,
            delta,
            visited: HashSet::new(),
            report: Report::default(),
        }
    }

    fn stat(&mut self, path: &str) -> Result<Stat> {
        let fd = self.fs.open(self.proc, path, OpenMode::NOACCESS)?;
        let st = self.fs.fstat(self.proc, fd);
        self.fs.close(self.proc, fd)?;
        st
    }

    fn read_target(&mut self, path: &str) -> Result<String> {
        let fd = self.fs.open(self.proc, path, OpenMode::NOACCESS)?;
        let mut buf = vec![0u8; crate::config::MAXPATH];
        let n = self.fs.read(self.proc, fd, &mut buf);
        self.fs.close(self.proc, fd)?;
        let n = n?;
        buf.truncate(n);
        String::from_utf8(buf)
            .map_err(|_| FsError::InvalidArgument(format!("{}: symlink target is not UTF-8", path)))
    }

    /// Follow a chain of symlinks to the path of a non-symlink object.
    fn resolve(&mut self, path: &str) -> Result<(String, Stat)> {
        self.follow(path, &mut Vec::new())
    }

    fn follow(&mut self, path: &str, hops: &mut Vec<String>) -> Result<(String, Stat)> {
        let mut current = path.to_string();
        for _ in 0..=self.fs.config().max_symlink_depth {
            hops.push(current.clone());
            let st = self.stat(&current)?;
            if st.kind != InodeKind::Symlink {
                return Ok((current, st));
            }
            let target = self.read_target(&current)?;
            if target.is_empty() {
                return Err(FsError::NotFound(format!("{}: empty symlink", current)));
            }
            debug!("propagate: {} -> {}", current, target);
            current = target;
        }
        Err(FsError::SymlinkLoop(path.to_string()))
    }

    /// Set the object's mode to the delta applied to its current mode.
    fn apply(&mut self, path: &str) -> Result<Mode> {
        let st = self.stat(path)?;
        let mode = self.delta.apply(st.mode);
        self.fs.chmod(self.proc, mode, path)?;
        Ok(mode)
    }

    /// Names in a directory, excluding "." and ".." and free slots.
    fn list(&mut self, path: &str) -> Result<Vec<String>> {
        let fd = self.fs.open(self.proc, path, OpenMode::RDONLY)?;
        let mut names = Vec::new();
        let mut raw = [0u8; DIRENT_SIZE];
        let result = loop {
            match self.fs.read(self.proc, fd, &mut raw) {
                Ok(n) if n == DIRENT_SIZE => {
                    if let Some(de) = DirEntry::decode(&raw) {
                        if !de.is_free() && !de.name_is(".") && !de.name_is("..") {
                            names.push(de.name());
                        }
                    }
                }
                Ok(_) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.fs.close(self.proc, fd)?;
        result.map(|()| names)
    }

    fn record(&mut self, path: String, error: FsError) {
        warn!("chmod {} failed on {}: {}", self.delta, path, error);
        self.report.failures.push(Failure { path, error });
    }

    fn visit(&mut self, resolved: String, shown: String, st: Stat) -> Result<()> {
        if !self.visited.insert((st.dev, st.ino)) {
            debug!("propagate: {} already visited", shown);
            return Ok(());
        }
        debug!("propagate: visit {} ({:?})", shown, st.kind);

        if st.kind != InodeKind::Dir {
            self.apply(&resolved)?;
            return Ok(());
        }

        let post_order = self.delta.revokes(Mode::READ);
        if post_order && !st.mode.contains(Mode::READ) {
            return Err(FsError::PermissionDenied(shown));
        }

        let mut mode = st.mode;
        if !post_order {
            mode = self.apply(&resolved)?;
        }

        let granted = !mode.contains(Mode::READ);
        if granted {
            debug!("propagate: temporary read on {}", shown);
            self.fs.chmod(self.proc, mode | Mode::READ, &resolved)?;
        }

        let listed = self.list(&resolved);
        if let Ok(names) = &listed {
            for name in names {
                let child = join(&resolved, name);
                let child_shown = join(&shown, name);
                let outcome = self
                    .resolve(&child)
                    .and_then(|(path, st)| self.visit(path, child_shown.clone(), st));
                if let Err(e) = outcome {
                    self.record(child_shown, e);
                }
            }
        }

        if granted {
            if let Err(e) = self.fs.chmod(self.proc, mode, &resolved) {
                self.record(shown.clone(), e);
            }
        }
        listed?;

        if post_order {
            self.apply(&resolved)?;
        }
        Ok(())
    }
}
