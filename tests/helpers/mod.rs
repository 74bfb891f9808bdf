#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use permfs::config::FsConfig;
use permfs::error::Result;
use permfs::fs::handles::Process;
use permfs::fs::{FileSystem, Mode, OpenMode, Stat};

/// A formatted file system plus one process whose cwd is the root.
pub struct Fixture {
    pub fs: FileSystem,
    pub proc: Process,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(FsConfig::default())
    }

    pub fn with_config(config: FsConfig) -> Self {
        let fs = FileSystem::new(config);
        let proc = fs.spawn();
        Self { fs, proc }
    }

    pub fn mkdir(&mut self, path: &str) {
        self.fs.mkdir(&mut self.proc, path).expect("mkdir failed");
    }

    pub fn symlink(&mut self, target: &str, path: &str) {
        self.fs
            .symlink(&mut self.proc, target, path)
            .expect("symlink failed");
    }

    /// Create or truncate `path` and write `text` into it.
    pub fn write_file(&mut self, path: &str, text: &str) {
        let fd = self
            .fs
            .open(
                &mut self.proc,
                path,
                OpenMode::CREATE | OpenMode::WRONLY | OpenMode::TRUNC,
            )
            .expect("open for write failed");
        self.fs
            .write(&self.proc, fd, text.as_bytes())
            .expect("write failed");
        self.fs.close(&mut self.proc, fd).unwrap();
    }

    /// Read a whole file through a following, read-only open.
    pub fn read_file(&mut self, path: &str) -> Result<String> {
        self.read_with(path, OpenMode::RDONLY)
    }

    pub fn read_with(&mut self, path: &str, omode: OpenMode) -> Result<String> {
        let fd = self.fs.open(&mut self.proc, path, omode)?;
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        let result = loop {
            match self.fs.read(&self.proc, fd, &mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) => break Err(e),
            }
        };
        self.fs.close(&mut self.proc, fd).unwrap();
        result.map(|()| String::from_utf8(out).unwrap())
    }

    /// Metadata of the named object itself (no terminal symlink expansion).
    pub fn stat(&mut self, path: &str) -> Stat {
        let fd = self
            .fs
            .open(&mut self.proc, path, OpenMode::NOACCESS)
            .expect("metadata-only open failed");
        let st = self.fs.fstat(&self.proc, fd).unwrap();
        self.fs.close(&mut self.proc, fd).unwrap();
        st
    }

    pub fn mode(&mut self, path: &str) -> Mode {
        self.stat(path).mode
    }

    pub fn set_mode(&mut self, path: &str, mode: Mode) {
        self.fs
            .chmod(&mut self.proc, mode, path)
            .expect("chmod failed");
    }

    /// Names in a directory, in slot order, excluding "." and "..".
    pub fn list(&mut self, path: &str) -> Vec<String> {
        let dp = self.stat(path);
        assert_eq!(dp.kind, permfs::fs::InodeKind::Dir, "{} is not a directory", path);
        let inode = self.fs.store().get(dp.ino).unwrap();
        let guard = inode.lock();
        let names = permfs::fs::dirent::entries(guard.data())
            .filter(|(_, de)| !de.is_free() && !de.name_is(".") && !de.name_is(".."))
            .map(|(_, de)| de.name())
            .collect();
        names
    }
}

/// Path to the compiled permfs binary.
pub fn permfs_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_permfs"))
}

/// Run permfs against `image` with the given arguments.
pub fn permfs(image: &Path, args: &[&str]) -> Output {
    Command::new(permfs_binary())
        .arg("--image")
        .arg(image)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run permfs")
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
