//! High-level restore API — the primary embedding surface.
//!
//! ```no_run
//! use volrestore::restore::{self, RestoreOptions};
//!
//! let opts = RestoreOptions::new("/mnt/nfs", "pvc-0c7e", "/tmp/pvc-0c7e.img");
//! let report = restore::run(&opts)?;
//! println!("{} B, blake3 {}", report.image_size, report.digest);
//! # Ok::<(), volrestore::RestoreError>(())
//! ```

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::block::{BlockLocator, IndexedLocator, ShardedLocator};
use crate::chain::{self, VolumeBackupChain};
use crate::compositor::{Composite, CompositeStats, Compositor};
use crate::error::{RestoreError, Result};
use crate::store::BackupStore;

/// Granularity of hole detection when writing sparse images.
pub const SPARSE_CHUNK: usize = 4096;

// ── Options ───────────────────────────────────────────────────────────────────

/// How block payloads are looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocatorKind {
    /// Canonical shard path, scan on miss.
    #[default]
    Sharded,
    /// Walk the block area once, then look up in memory.
    Indexed,
}

impl LocatorKind {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sharded" => Some(LocatorKind::Sharded),
            "indexed" => Some(LocatorKind::Indexed),
            _         => None,
        }
    }

    fn build(self, volume_dir: &Path) -> Result<Box<dyn BlockLocator>> {
        Ok(match self {
            LocatorKind::Sharded => Box::new(ShardedLocator::new(volume_dir)),
            LocatorKind::Indexed => Box::new(IndexedLocator::build(volume_dir)?),
        })
    }
}

/// Configuration for [`run`].
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Directory holding `backupstore/`.
    pub backup_root: PathBuf,
    /// Volume name.
    pub target:      String,
    /// Destination image.  Must not exist; its parent must.
    pub outfile:     PathBuf,
    /// Restore this backup's point in time instead of the newest one.
    pub backup:      Option<String>,
    /// Leave all-zero regions as filesystem holes.
    pub sparse:      bool,
    pub locator:     LocatorKind,
}

impl RestoreOptions {
    pub fn new(
        backup_root: impl Into<PathBuf>,
        target:      impl Into<String>,
        outfile:     impl Into<PathBuf>,
    ) -> Self {
        Self {
            backup_root: backup_root.into(),
            target:      target.into(),
            outfile:     outfile.into(),
            backup:      None,
            sparse:      true,
            locator:     LocatorKind::default(),
        }
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub volume:     String,
    /// Identifiers of the replayed backups, oldest first.
    pub backups:    Vec<String>,
    pub image_size: u64,
    pub stats:      CompositeStats,
    /// BLAKE3 of the image, hex.
    pub digest:     String,
    /// `None` for verification runs.
    pub outfile:    Option<PathBuf>,
}

impl RestoreReport {
    fn new(chain: &VolumeBackupChain, composite: &Composite, outfile: Option<PathBuf>) -> Self {
        Self {
            volume:     chain.name.clone(),
            backups:    chain.backups.iter().map(|b| b.identifier.clone()).collect(),
            image_size: chain.image_size(),
            stats:      composite.stats,
            digest:     composite.digest_hex(),
            outfile,
        }
    }
}

// ── Entry points ─────────────────────────────────────────────────────────────

/// Rebuild the image of `opts.target` and write it to `opts.outfile`.
///
/// Every precondition is checked before anything is created.  On failure no
/// file exists at `opts.outfile`.
pub fn run(opts: &RestoreOptions) -> Result<RestoreReport> {
    let store = BackupStore::open(&opts.backup_root)?;
    check_outfile(&opts.outfile)?;

    let chain = load_chain(&store, &opts.target, opts.backup.as_deref())?;
    let compositor = Compositor::new(opts.locator.build(&chain.path)?);
    let composite = compositor.composite(&chain)?;

    persist(&composite.image, &opts.outfile, opts.sparse)?;
    info!("restored {} ({} B) to {}", chain.name, composite.image.len(), opts.outfile.display());
    Ok(RestoreReport::new(&chain, &composite, Some(opts.outfile.clone())))
}

/// Composite without writing anything: proves every block of the chain is
/// present, decodable and in bounds.
pub fn verify(
    backup_root: &Path,
    target:      &str,
    backup:      Option<&str>,
    locator:     LocatorKind,
) -> Result<RestoreReport> {
    let store = BackupStore::open(backup_root)?;
    let chain = load_chain(&store, target, backup)?;
    let composite = Compositor::new(locator.build(&chain.path)?).composite(&chain)?;
    Ok(RestoreReport::new(&chain, &composite, None))
}

/// Resolve the chain of `target`, cut at `backup` when given.
pub fn load_chain(store: &BackupStore, target: &str, backup: Option<&str>) -> Result<VolumeBackupChain> {
    let volume_dir = store.find_volume(target)?;
    let mut chain = chain::resolve(&volume_dir)?;
    if let Some(id) = backup {
        chain.truncate_at(id)?;
        info!("restoring point in time of {id}: {} backup(s) in chain", chain.backups.len());
    }
    Ok(chain)
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn check_outfile(outfile: &Path) -> Result<()> {
    let parent = parent_dir(outfile);
    if !parent.is_dir() {
        return Err(RestoreError::Config(format!(
            "output directory {} does not exist", parent.display())));
    }
    if outfile.exists() {
        return Err(RestoreError::Config(format!(
            "output file {} already exists", outfile.display())));
    }
    Ok(())
}

/// Write `image` next to `outfile`, then move it into place.  The rename
/// refuses to replace a file that appeared since validation.
fn persist(image: &[u8], outfile: &Path, sparse: bool) -> Result<()> {
    let dir = parent_dir(outfile);
    let mut tmp = tempfile::Builder::new()
        .prefix(".volrestore-")
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(|e| RestoreError::io(dir, e))?;

    write_image(tmp.as_file_mut(), image, sparse).map_err(|e| RestoreError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| RestoreError::io(tmp.path(), e))?;

    tmp.persist_noclobber(outfile).map_err(|e| {
        warn!("discarding partial image {}", e.file.path().display());
        RestoreError::io(outfile, e.error)
    })?;
    Ok(())
}

fn write_image(file: &mut File, image: &[u8], sparse: bool) -> io::Result<()> {
    if !sparse {
        return file.write_all(image);
    }
    file.set_len(image.len() as u64)?;
    for (i, chunk) in image.chunks(SPARSE_CHUNK).enumerate() {
        if chunk.iter().all(|&b| b == 0) {
            continue;
        }
        file.seek(SeekFrom::Start((i * SPARSE_CHUNK) as u64))?;
        file.write_all(chunk)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn sparse_and_dense_writes_match() {
        let tmp = TempDir::new().unwrap();
        let mut image = vec![0u8; SPARSE_CHUNK * 3 + 17];
        image[SPARSE_CHUNK + 5] = 0xAB;
        image[SPARSE_CHUNK * 3 + 16] = 0xCD;

        let dense = tmp.path().join("dense.img");
        let sparse = tmp.path().join("sparse.img");
        persist(&image, &dense, false).unwrap();
        persist(&image, &sparse, true).unwrap();
        assert_eq!(fs::read(&dense).unwrap(), image);
        assert_eq!(fs::read(&sparse).unwrap(), image);
    }

    #[test]
    fn all_zero_image_keeps_its_length() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("zero.img");
        persist(&[0u8; 10_000], &out, true).unwrap();
        assert_eq!(fs::metadata(&out).unwrap().len(), 10_000);
    }

    #[test]
    fn persist_never_replaces_an_existing_file() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("taken.img");
        fs::write(&out, b"previous restore").unwrap();
        assert!(matches!(persist(b"new", &out, false).unwrap_err(), RestoreError::Io { .. }));
        assert_eq!(fs::read(&out).unwrap(), b"previous restore");
        let leftovers = fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(leftovers, 1, "temp file must be cleaned up");
    }

    #[test]
    fn outfile_checks() {
        let tmp = TempDir::new().unwrap();
        assert!(check_outfile(&tmp.path().join("new.img")).is_ok());
        assert!(matches!(check_outfile(&tmp.path().join("nodir/new.img")).unwrap_err(),
            RestoreError::Config(_)));
        let existing = tmp.path().join("old.img");
        fs::write(&existing, b"").unwrap();
        assert!(matches!(check_outfile(&existing).unwrap_err(), RestoreError::Config(_)));
        assert_eq!(parent_dir(Path::new("bare.img")), Path::new("."));
    }

    #[test]
    fn locator_names() {
        assert_eq!(LocatorKind::from_name("Indexed"), Some(LocatorKind::Indexed));
        assert_eq!(LocatorKind::from_name("sharded"), Some(LocatorKind::Sharded));
        assert_eq!(LocatorKind::from_name("glob"), None);
    }
}
