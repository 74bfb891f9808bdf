//! Descriptor-level I/O: read, write, fstat, close.

use std::sync::Arc;

use tracing::debug;

use super::handles::{Fd, FileKind, Process};
use super::inodes::InodeKind;
use super::perm::Mode;
use super::FileSystem;
use crate::error::{FsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub dev: u32,
    pub ino: u32,
    pub kind: InodeKind,
    pub nlink: u16,
    pub size: u64,
    pub mode: Mode,
    pub major: i16,
}

impl FileSystem {
    pub fn fstat(&self, proc: &Process, fd: Fd) -> Result<Stat> {
        let file = proc.file(fd)?;
        let ip = file.inode();
        let guard = ip.lock();
        Ok(Stat {
            dev: ip.dev(),
            ino: ip.inum(),
            kind: guard.kind(),
            nlink: guard.nlink(),
            size: guard.size(),
            mode: guard.mode(),
            major: guard.major(),
        })
    }

    /// Read from the handle's offset and advance it.
    pub fn read(&self, proc: &Process, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let file = proc.file(fd)?;
        if !file.readable() {
            return Err(FsError::PermissionDenied(format!("fd {} not open for reading", fd)));
        }
        if let FileKind::Device { major } = file.kind() {
            return Err(FsError::NoDevice(major));
        }
        let mut offset = file.offset().lock();
        let n = file.inode().lock().read_at(*offset, buf);
        *offset += n as u64;
        Ok(n)
    }

    /// Write at the handle's offset inside a transaction and advance it.
    pub fn write(&self, proc: &Process, fd: Fd, buf: &[u8]) -> Result<usize> {
        let file = proc.file(fd)?;
        if !file.writable() {
            return Err(FsError::PermissionDenied(format!("fd {} not open for writing", fd)));
        }
        if let FileKind::Device { major } = file.kind() {
            return Err(FsError::NoDevice(major));
        }
        let tx = self.begin();
        let mut offset = file.offset().lock();
        let n = file.inode().lock().write_at(&tx, *offset, buf)?;
        *offset += n as u64;
        drop(offset);
        tx.commit();
        Ok(n)
    }

    pub fn close(&self, proc: &mut Process, fd: Fd) -> Result<()> {
        let file = proc.take(fd)?;
        debug!("close(pid={}, fd={}, file={})", proc.pid(), fd, file.id());
        // The file table holds the other reference.
        if Arc::strong_count(&file) > 2 {
            return Ok(());
        }
        self.files.remove(file.id());
        let ip = Arc::clone(file.inode());
        drop(file);

        let tx = self.begin();
        self.store.reclaim_if_orphaned(&tx, ip);
        tx.commit();
        Ok(())
    }

    /// Close every descriptor the process holds.
    pub fn exit(&self, proc: &mut Process) -> Result<()> {
        for fd in proc.open_fds() {
            self.close(proc, fd)?;
        }
        Ok(())
    }
}
