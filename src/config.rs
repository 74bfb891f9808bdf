use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Longest path accepted by any call, terminator included.
pub const MAXPATH: usize = 128;

/// Longest directory entry name.
pub const DIRSIZ: usize = 14;

/// Largest file the store will hold: 12 direct blocks plus one indirect block of
/// 256 block numbers, 1 KiB each.
pub const MAXFILE: usize = (12 + 256) * 1024;

#[derive(Parser, Debug)]
#[command(name = "permfs", about = "File-system image tool with symlinks and read/write permissions")]
pub struct Cli {
    /// Path to the file-system image
    #[arg(long, default_value = "permfs.json")]
    pub image: PathBuf,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Symlink expansions allowed per operation
    #[arg(long, default_value_t = 10)]
    pub max_symlink_depth: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a fresh image containing only the root directory
    Mkfs {
        /// Number of inodes in the image
        #[arg(long, default_value_t = 200)]
        ninodes: u32,
    },
    /// Create a directory
    Mkdir { path: String },
    /// Create a device node
    Mknod {
        path: String,
        major: i16,
        minor: i16,
    },
    /// Create or truncate a file and write text into it
    Write { path: String, text: String },
    /// Print a file's contents
    Cat { path: String },
    /// Create a hard link, or a symbolic link with -s
    Ln {
        #[arg(short = 's')]
        symbolic: bool,
        target: String,
        path: String,
    },
    /// Remove a directory entry
    Rm { path: String },
    /// List directories
    Ls { paths: Vec<String> },
    /// Show an object's metadata
    Stat {
        /// Describe a symlink itself rather than its target
        #[arg(long)]
        no_follow: bool,
        path: String,
    },
    /// Print the chain of symlinks a path goes through
    Trace { path: String },
    /// Grant or revoke read/write permission
    Chmod {
        /// Apply to the whole subtree
        #[arg(short = 'R')]
        recursive: bool,
        /// Permission delta: (+|-)[r][w]
        #[arg(allow_hyphen_values = true)]
        mode: String,
        path: String,
    },
}

#[derive(Debug, Clone)]
pub struct FsConfig {
    /// Inode numbers available on the device (inode 0 is never used).
    pub ninodes: u32,
    /// System-wide open-file table size.
    pub nfile: usize,
    /// Per-process descriptor table size.
    pub nofile: usize,
    /// Device majors accepted by open.
    pub ndev: i16,
    /// Symlink expansions allowed per operation.
    pub max_symlink_depth: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            ninodes: 200,
            nfile: 100,
            nofile: 16,
            ndev: 10,
            max_symlink_depth: 10,
        }
    }
}

impl FsConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            max_symlink_depth: cli.max_symlink_depth,
            ..Self::default()
        }
    }
}
