//! Transactions over metadata writes.
//!
//! A [`Transaction`] holds the journal gate for its whole lifetime, so calls
//! that mutate the namespace never interleave. The first time a transaction
//! touches an inode it keeps that inode's previous image. `commit` keeps the
//! writes; dropping an uncommitted transaction puts every image back.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use super::inodes::{DiskInode, Inode, InodeStore};

pub struct Journal {
    gate: Mutex<()>,
    commits: AtomicU64,
    aborts: AtomicU64,
}

impl Journal {
    pub fn new() -> Self {
        Self {
            gate: Mutex::new(()),
            commits: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
        }
    }

    /// Start a transaction, blocking while another one is open.
    pub fn begin<'a>(&'a self, store: &'a InodeStore) -> Transaction<'a> {
        let gate = self.gate.lock();
        Transaction {
            journal: self,
            store,
            undo: RefCell::new(Vec::new()),
            touched: RefCell::new(HashSet::new()),
            committed: false,
            _gate: gate,
        }
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn aborts(&self) -> u64 {
        self.aborts.load(Ordering::Relaxed)
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

enum Undo {
    Restore { inum: u32, image: DiskInode },
    Allocated { inum: u32 },
    Freed { inode: Arc<Inode> },
}

pub struct Transaction<'a> {
    journal: &'a Journal,
    store: &'a InodeStore,
    undo: RefCell<Vec<Undo>>,
    touched: RefCell<HashSet<u32>>,
    committed: bool,
    _gate: MutexGuard<'a, ()>,
}

impl Transaction<'_> {
    pub(crate) fn record(&self, inum: u32, image: &DiskInode) {
        if self.touched.borrow_mut().insert(inum) {
            self.undo.borrow_mut().push(Undo::Restore {
                inum,
                image: image.clone(),
            });
        }
    }

    pub(crate) fn record_alloc(&self, inum: u32) {
        self.touched.borrow_mut().insert(inum);
        self.undo.borrow_mut().push(Undo::Allocated { inum });
    }

    pub(crate) fn record_free(&self, inode: Arc<Inode>) {
        self.undo.borrow_mut().push(Undo::Freed { inode });
    }

    pub fn commit(mut self) {
        self.committed = true;
        self.journal.commits.fetch_add(1, Ordering::Relaxed);
        debug!("commit: {} inode(s) written", self.touched.borrow().len());
    }

    fn rollback(&mut self) {
        let undo = std::mem::take(self.undo.get_mut());
        if undo.is_empty() {
            return;
        }
        debug!("rollback: {} change(s)", undo.len());
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::Restore { inum, image } => {
                    if let Some(inode) = self.store.get(inum) {
                        inode.restore(image);
                    }
                }
                Undo::Allocated { inum } => self.store.remove(inum),
                Undo::Freed { inode } => self.store.insert(inode),
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.rollback();
            self.journal.aborts.fetch_add(1, Ordering::Relaxed);
        }
    }
}
