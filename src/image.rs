//! JSON image of a device: every allocated inode with its raw data.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{FsError, Result};
use crate::fs::inodes::DiskInode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub version: u32,
    pub ninodes: u32,
    pub inodes: Vec<ImageInode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInode {
    pub inum: u32,
    #[serde(flatten)]
    pub disk: DiskInode,
}

impl Image {
    pub const VERSION: u32 = 1;

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let image: Image = serde_json::from_str(&raw)?;
        if image.version != Self::VERSION {
            return Err(FsError::Config(format!(
                "{}: image version {} (expected {})",
                path.display(),
                image.version,
                Self::VERSION
            )));
        }
        debug!("loaded {} inode(s) from {}", image.inodes.len(), path.display());
        Ok(image)
    }

    /// Write the image next to `path` and rename it into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, path)?;
        info!("saved {} inode(s) to {}", self.inodes.len(), path.display());
        Ok(())
    }
}
