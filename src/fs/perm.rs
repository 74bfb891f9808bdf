//! Two-bit permission model.
//!
//! Every inode carries a [`Mode`]: READ gates reading and directory traversal,
//! WRITE gates modification. Directories are never opened for writing.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::inodes::InodeKind;
use super::open::OpenMode;
use crate::error::{FsError, Result};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Mode: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

impl Mode {
    /// `rw`, `r-`, `-w` or `--`.
    pub fn symbolic(self) -> String {
        let r = if self.contains(Mode::READ) { 'r' } else { '-' };
        let w = if self.contains(Mode::WRITE) { 'w' } else { '-' };
        format!("{}{}", r, w)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Grant,
    Revoke,
}

/// A relative permission change, e.g. `+r` or `-rw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermDelta {
    pub direction: Direction,
    pub bits: Mode,
}

impl PermDelta {
    pub fn grant(bits: Mode) -> Self {
        Self {
            direction: Direction::Grant,
            bits,
        }
    }

    pub fn revoke(bits: Mode) -> Self {
        Self {
            direction: Direction::Revoke,
            bits,
        }
    }

    pub fn apply(&self, mode: Mode) -> Mode {
        match self.direction {
            Direction::Grant => mode | self.bits,
            Direction::Revoke => mode & !self.bits,
        }
    }

    pub fn grants(&self, bits: Mode) -> bool {
        self.direction == Direction::Grant && self.bits.intersects(bits)
    }

    pub fn revokes(&self, bits: Mode) -> bool {
        self.direction == Direction::Revoke && self.bits.intersects(bits)
    }
}

impl FromStr for PermDelta {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || FsError::InvalidArgument(format!("bad permission delta {:?}", s));
        let mut chars = s.chars();
        let direction = match chars.next() {
            Some('+') => Direction::Grant,
            Some('-') => Direction::Revoke,
            _ => return Err(invalid()),
        };
        let mut bits = Mode::empty();
        for c in chars {
            match c {
                'r' => bits |= Mode::READ,
                'w' => bits |= Mode::WRITE,
                _ => return Err(invalid()),
            }
        }
        if bits.is_empty() {
            return Err(invalid());
        }
        Ok(Self { direction, bits })
    }
}

impl fmt::Display for PermDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.direction {
            Direction::Grant => '+',
            Direction::Revoke => '-',
        };
        write!(f, "{}", sign)?;
        if self.bits.contains(Mode::READ) {
            write!(f, "r")?;
        }
        if self.bits.contains(Mode::WRITE) {
            write!(f, "w")?;
        }
        Ok(())
    }
}

/// What an open call asks to do with the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub read: bool,
    pub write: bool,
}

impl Access {
    pub fn from_open_mode(omode: OpenMode) -> Self {
        Self {
            read: !omode.contains(OpenMode::WRONLY),
            write: omode.intersects(OpenMode::WRONLY | OpenMode::RDWR),
        }
    }
}

/// The open-time permission gate.
pub fn check(path: &str, kind: InodeKind, mode: Mode, access: Access) -> Result<()> {
    if access.read && !mode.contains(Mode::READ) {
        return Err(FsError::PermissionDenied(path.to_string()));
    }
    if access.write && !mode.contains(Mode::WRITE) {
        return Err(FsError::PermissionDenied(path.to_string()));
    }
    if access.write && kind == InodeKind::Dir {
        return Err(FsError::IsDirectory(path.to_string()));
    }
    Ok(())
}
