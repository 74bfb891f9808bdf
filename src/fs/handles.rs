use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::inodes::Inode;
use crate::error::{FsError, Result};

/// Process-local file descriptor.
pub type Fd = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Inode,
    Device { major: i16 },
}

/// An open file. Readable/writable are fixed when the file is opened.
pub struct OpenFile {
    id: u64,
    kind: FileKind,
    inode: Arc<Inode>,
    readable: bool,
    writable: bool,
    offset: Mutex<u64>,
}

impl OpenFile {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    pub fn readable(&self) -> bool {
        self.readable
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn offset(&self) -> &Mutex<u64> {
        &self.offset
    }
}

/// System-wide open-file table.
pub struct FileTable {
    files: DashMap<u64, Arc<OpenFile>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl FileTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            files: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity,
        }
    }

    pub fn alloc(
        &self,
        inode: Arc<Inode>,
        kind: FileKind,
        readable: bool,
        writable: bool,
    ) -> Result<Arc<OpenFile>> {
        if self.files.len() >= self.capacity {
            return Err(FsError::Exhausted("file table slot"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let file = Arc::new(OpenFile {
            id,
            kind,
            inode,
            readable,
            writable,
            offset: Mutex::new(0),
        });
        self.files.insert(id, Arc::clone(&file));
        Ok(file)
    }

    pub fn remove(&self, id: u64) -> Option<Arc<OpenFile>> {
        self.files.remove(&id).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

static NEXT_PID: AtomicU32 = AtomicU32::new(1);

/// The execution context every call runs in: working directory and
/// descriptor table.
pub struct Process {
    pid: u32,
    pub(crate) cwd: Arc<Inode>,
    ofile: Vec<Option<Arc<OpenFile>>>,
}

impl Process {
    pub(crate) fn new(cwd: Arc<Inode>, nofile: usize) -> Self {
        Self {
            pid: NEXT_PID.fetch_add(1, Ordering::Relaxed),
            cwd,
            ofile: vec![None; nofile],
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Inode number of the working directory.
    pub fn cwd_inum(&self) -> u32 {
        self.cwd.inum()
    }

    /// Install `file` in the lowest free descriptor.
    pub(crate) fn fdalloc(&mut self, file: Arc<OpenFile>) -> Result<Fd> {
        let fd = self
            .ofile
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::Exhausted("file descriptor"))?;
        self.ofile[fd] = Some(file);
        Ok(fd)
    }

    pub(crate) fn file(&self, fd: Fd) -> Result<&Arc<OpenFile>> {
        self.ofile
            .get(fd)
            .and_then(Option::as_ref)
            .ok_or(FsError::BadDescriptor(fd))
    }

    pub(crate) fn take(&mut self, fd: Fd) -> Result<Arc<OpenFile>> {
        self.ofile
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(FsError::BadDescriptor(fd))
    }

    pub(crate) fn open_fds(&self) -> Vec<Fd> {
        self.ofile
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_some())
            .map(|(fd, _)| fd)
            .collect()
    }
}
