pub mod dirent;
pub mod handles;
pub mod inodes;
pub mod io;
pub mod log;
pub mod namespace;
pub mod open;
pub mod path;
pub mod perm;

use tracing::info;

use self::handles::{FileTable, Process};
use self::inodes::InodeStore;
use self::log::{Journal, Transaction};
use self::path::Resolver;
use crate::config::FsConfig;
use crate::error::Result;
use crate::image::{Image, ImageInode};

pub use self::handles::Fd;
pub use self::inodes::InodeKind;
pub use self::io::Stat;
pub use self::open::OpenMode;
pub use self::perm::{Mode, PermDelta};

/// One mounted device plus the kernel state shared by every process.
pub struct FileSystem {
    config: FsConfig,
    store: InodeStore,
    journal: Journal,
    files: FileTable,
}

impl FileSystem {
    /// Format a new device holding only the root directory.
    pub fn new(config: FsConfig) -> Self {
        info!("formatting device with {} inodes", config.ninodes);
        Self {
            store: InodeStore::format(config.ninodes),
            journal: Journal::new(),
            files: FileTable::new(config.nfile),
            config,
        }
    }

    /// Mount a device from a persisted image. The image decides the inode count.
    pub fn from_image(image: &Image, mut config: FsConfig) -> Result<Self> {
        config.ninodes = image.ninodes;
        let store = InodeStore::from_images(
            image.ninodes,
            image.inodes.iter().map(|i| (i.inum, i.disk.clone())),
        )?;
        info!(
            "mounted image: {} of {} inodes in use",
            store.allocated(),
            image.ninodes
        );
        Ok(Self {
            store,
            journal: Journal::new(),
            files: FileTable::new(config.nfile),
            config,
        })
    }

    pub fn to_image(&self) -> Image {
        Image {
            version: Image::VERSION,
            ninodes: self.store.ninodes(),
            inodes: self
                .store
                .images()
                .into_iter()
                .map(|(inum, disk)| ImageInode { inum, disk })
                .collect(),
        }
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn store(&self) -> &InodeStore {
        &self.store
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Number of entries in the system-wide open-file table.
    pub fn open_files(&self) -> usize {
        self.files.len()
    }

    /// A new process whose working directory is the root.
    pub fn spawn(&self) -> Process {
        Process::new(self.store.root(), self.config.nofile)
    }

    fn begin(&self) -> Transaction<'_> {
        self.journal.begin(&self.store)
    }

    fn resolver(&self, proc: &Process) -> Resolver<'_> {
        Resolver::new(
            &self.store,
            proc.cwd.clone(),
            self.config.max_symlink_depth,
        )
    }
}
