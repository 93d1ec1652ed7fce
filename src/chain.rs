//! Chain resolution: every manifest of one volume, oldest first.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::{RestoreError, Result};
use crate::manifest::{self, Backup, MANIFEST_EXT};

pub const BACKUPS_DIR: &str = "backups";

/// A volume's restorable history.
#[derive(Debug, Clone)]
pub struct VolumeBackupChain {
    pub name:    String,
    /// Volume directory; the block store is scoped to it.
    pub path:    PathBuf,
    /// Ascending by `(timestamp, identifier)`.  Never empty.
    pub backups: Vec<Backup>,
}

impl VolumeBackupChain {
    /// Build a chain from backups in any order.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, mut backups: Vec<Backup>) -> Result<Self> {
        let path = path.into();
        if backups.is_empty() {
            return Err(RestoreError::NoBackupsFound { path: path.join(BACKUPS_DIR) });
        }
        sort_chain(&mut backups);
        Ok(Self { name: name.into(), path, backups })
    }

    /// The newest backup; its size is the size of the restored image.
    pub fn latest(&self) -> &Backup {
        // `new` rejects empty chains and nothing removes the last element.
        &self.backups[self.backups.len() - 1]
    }

    pub fn image_size(&self) -> u64 {
        self.latest().size
    }

    pub fn total_blocks(&self) -> usize {
        self.backups.iter().map(|b| b.blocks.len()).sum()
    }

    /// Drop every backup newer than `identifier`, turning the chain into the
    /// history of that point in time.
    pub fn truncate_at(&mut self, identifier: &str) -> Result<()> {
        let pos = self.backups
            .iter()
            .position(|b| b.identifier == identifier || b.name.as_deref() == Some(identifier))
            .ok_or_else(|| RestoreError::Config(format!(
                "backup {identifier} not found in volume {}", self.name)))?;
        self.backups.truncate(pos + 1);
        Ok(())
    }
}

/// Replay order.  Equal timestamps fall back to the identifier so the order
/// never depends on directory enumeration.
pub fn sort_chain(backups: &mut [Backup]) {
    backups.sort_by(|a, b| {
        a.timestamp.cmp(&b.timestamp).then_with(|| a.identifier.cmp(&b.identifier))
    });
}

/// Load every `backups/*.cfg` under `volume_dir`.
pub fn resolve(volume_dir: &Path) -> Result<VolumeBackupChain> {
    let backups_dir = volume_dir.join(BACKUPS_DIR);
    let entries = match fs::read_dir(&backups_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RestoreError::NoBackupsFound { path: backups_dir });
        }
        Err(e) => return Err(RestoreError::io(&backups_dir, e)),
    };

    let mut backups = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| RestoreError::io(&backups_dir, e))?.path();
        if !path.is_file() || path.extension().and_then(|x| x.to_str()) != Some(MANIFEST_EXT) {
            continue;
        }
        let backup = manifest::read(&path)?;
        debug!("manifest {}: {} block(s), size {}, {}",
            backup.identifier, backup.blocks.len(), backup.size, backup.compression);
        backups.push(backup);
    }

    let name = volume_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let chain = VolumeBackupChain::new(name, volume_dir, backups)?;
    info!("volume {}: {} backup(s), image size {} B",
        chain.name, chain.backups.len(), chain.image_size());
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn backup(id: &str, secs: i64) -> Backup {
        Backup {
            identifier:    id.to_owned(),
            name:          None,
            timestamp:     Utc.timestamp_opt(secs, 0).unwrap(),
            size:          secs as u64,
            compression:   CodecId::None,
            blocks:        Vec::new(),
            manifest_path: PathBuf::from(format!("{id}.cfg")),
        }
    }

    fn ids(chain: &VolumeBackupChain) -> Vec<&str> {
        chain.backups.iter().map(|b| b.identifier.as_str()).collect()
    }

    #[test]
    fn orders_by_timestamp_then_identifier() {
        let chain = VolumeBackupChain::new("v", "/v", vec![
            backup("c", 20), backup("b", 10), backup("a", 20), backup("d", 5),
        ]).unwrap();
        assert_eq!(ids(&chain), ["d", "b", "a", "c"]);
        assert_eq!(chain.image_size(), 20);
    }

    #[test]
    fn empty_chain_is_rejected() {
        let err = VolumeBackupChain::new("v", "/v", Vec::new()).unwrap_err();
        assert!(matches!(err, RestoreError::NoBackupsFound { .. }));
    }

    #[test]
    fn truncate_at_keeps_history_up_to_target() {
        let mut chain = VolumeBackupChain::new("v", "/v", vec![
            backup("a", 1), backup("b", 2), backup("c", 3),
        ]).unwrap();
        chain.truncate_at("b").unwrap();
        assert_eq!(ids(&chain), ["a", "b"]);
        assert!(matches!(chain.truncate_at("zz").unwrap_err(), RestoreError::Config(_)));
    }

    #[test]
    fn resolve_reads_only_manifests() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("vol1").join(BACKUPS_DIR);
        fs::create_dir_all(&dir).unwrap();
        let body = |t: &str| format!(r#"{{"CreatedTime": "{t}", "Size": 4,
            "CompressionMethod": "none", "Blocks": []}}"#);
        fs::write(dir.join("backup_new.cfg"), body("2024-01-02T00:00:00Z")).unwrap();
        fs::write(dir.join("backup_old.cfg"), body("2024-01-01T00:00:00Z")).unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let chain = resolve(&tmp.path().join("vol1")).unwrap();
        assert_eq!(chain.name, "vol1");
        assert_eq!(ids(&chain), ["backup_old", "backup_new"]);
    }

    #[test]
    fn resolve_without_manifests_reports_no_backups() {
        let tmp = TempDir::new().unwrap();
        let err = resolve(tmp.path()).unwrap_err();
        assert!(matches!(err, RestoreError::NoBackupsFound { .. }));

        fs::create_dir_all(tmp.path().join(BACKUPS_DIR)).unwrap();
        let err = resolve(tmp.path()).unwrap_err();
        assert!(matches!(err, RestoreError::NoBackupsFound { .. }));
    }
}
