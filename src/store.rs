//! Backup store root layout.
//!
//! ```text
//! <backup-root>/backupstore/volumes/<s1>/<s2>/<volume>/backups/*.cfg
//!                                                     /blocks/<c0c1>/<c2c3>/<checksum>.blk
//! ```
//!
//! The two shard levels above a volume are treated as opaque: volumes are
//! found by name, whatever shard they sit in.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{RestoreError, Result};

pub const STORE_DIR:   &str = "backupstore";
pub const VOLUMES_DIR: &str = "volumes";

#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    /// Validate `backup_root` and open the store beneath it.
    pub fn open(backup_root: &Path) -> Result<Self> {
        let root = backup_root.join(STORE_DIR);
        if !root.is_dir() {
            return Err(RestoreError::Config(format!(
                "backup root {} does not contain {STORE_DIR}", backup_root.display())));
        }
        if !root.join(VOLUMES_DIR).is_dir() {
            return Err(RestoreError::Config(format!(
                "backup store {} has no {VOLUMES_DIR} directory", root.display())));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path { &self.root }

    /// Directory of the volume named `target`.  The first match in sorted
    /// shard order wins.
    pub fn find_volume(&self, target: &str) -> Result<PathBuf> {
        if target.is_empty() || target.contains(['/', '\\']) || target == "." || target == ".." {
            return Err(RestoreError::Config(format!("invalid volume name {target:?}")));
        }

        let volumes = self.root.join(VOLUMES_DIR);
        for outer in sorted_dirs(&volumes)? {
            for inner in sorted_dirs(&outer)? {
                let candidate = inner.join(target);
                if candidate.is_dir() {
                    debug!("volume {target} found at {}", candidate.display());
                    return Ok(candidate);
                }
            }
        }
        Err(RestoreError::Config(format!("could not find backups for volume {target}")))
    }

    /// Every volume in the store, as `(name, directory)`, sorted by name.
    pub fn volumes(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut out = Vec::new();
        for outer in sorted_dirs(&self.root.join(VOLUMES_DIR))? {
            for inner in sorted_dirs(&outer)? {
                for vol in sorted_dirs(&inner)? {
                    if let Some(name) = vol.file_name().and_then(|n| n.to_str()) {
                        out.push((name.to_owned(), vol.clone()));
                    }
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

fn sorted_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| RestoreError::io(dir, e))? {
        let path = entry.map_err(|e| RestoreError::io(dir, e))?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}
