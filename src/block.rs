//! Block references and content-addressed payload lookup.
//!
//! Payloads live under a volume's block area, sharded two levels deep by
//! checksum prefix:
//!
//! ```text
//! <volume>/blocks/<c[0..2]>/<c[2..4]>/<checksum>.blk
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{RestoreError, Result};

pub const BLOCKS_DIR: &str = "blocks";
pub const BLOCK_EXT:  &str = "blk";

/// One (offset, checksum) reference from a manifest.  Holds no payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Block {
    pub offset:   u64,
    pub checksum: String,
}

impl Block {
    pub fn new(offset: u64, checksum: impl Into<String>) -> Self {
        Self { offset, checksum: checksum.into() }
    }
}

/// Content-addressed lookup of a block payload within one volume's store.
///
/// `None` is an expected answer for an incomplete store; callers decide how
/// to report it.
pub trait BlockLocator: Send + Sync {
    fn locate(&self, checksum: &str) -> Option<PathBuf>;
}

/// Checksums are used as file names, so anything that could escape the
/// shard directories never resolves.
fn is_valid_checksum(checksum: &str) -> bool {
    !checksum.is_empty() && checksum.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Canonical payload path for `checksum`, or `None` when the checksum is too
/// short to shard or not a plain identifier.
pub fn shard_path(volume_dir: &Path, checksum: &str) -> Option<PathBuf> {
    if !is_valid_checksum(checksum) || checksum.len() < 4 {
        return None;
    }
    Some(volume_dir
        .join(BLOCKS_DIR)
        .join(&checksum[0..2])
        .join(&checksum[2..4])
        .join(format!("{checksum}.{BLOCK_EXT}")))
}

/// Sorted subdirectories of `dir`.  Unreadable directories are logged and
/// treated as empty.
fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(e)  => e,
        Err(e) => {
            if dir.exists() {
                warn!("cannot read {}: {e}", dir.display());
            }
            return Vec::new();
        }
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

// ── ShardedLocator ───────────────────────────────────────────────────────────

/// Looks up the canonical shard path first, then scans every shard pair for
/// stores written with a different prefix scheme.
pub struct ShardedLocator {
    volume_dir: PathBuf,
}

impl ShardedLocator {
    pub fn new(volume_dir: impl Into<PathBuf>) -> Self {
        Self { volume_dir: volume_dir.into() }
    }
}

impl BlockLocator for ShardedLocator {
    fn locate(&self, checksum: &str) -> Option<PathBuf> {
        if !is_valid_checksum(checksum) {
            return None;
        }
        if let Some(path) = shard_path(&self.volume_dir, checksum) {
            if path.is_file() {
                return Some(path);
            }
        }

        let file_name = format!("{checksum}.{BLOCK_EXT}");
        for outer in sorted_subdirs(&self.volume_dir.join(BLOCKS_DIR)) {
            for inner in sorted_subdirs(&outer) {
                let candidate = inner.join(&file_name);
                if candidate.is_file() {
                    debug!("block {checksum} found outside its canonical shard");
                    return Some(candidate);
                }
            }
        }
        None
    }
}

// ── IndexedLocator ───────────────────────────────────────────────────────────

/// Precomputed checksum → path map, built with a single walk of the block
/// area.  Trades an up-front scan for O(1) lookups.
#[derive(Debug, Default)]
pub struct IndexedLocator {
    index: HashMap<String, PathBuf>,
}

impl IndexedLocator {
    pub fn build(volume_dir: &Path) -> Result<Self> {
        let blocks_dir = volume_dir.join(BLOCKS_DIR);
        let mut index = HashMap::new();

        for outer in sorted_subdirs(&blocks_dir) {
            for inner in sorted_subdirs(&outer) {
                let entries = fs::read_dir(&inner).map_err(|e| RestoreError::io(&inner, e))?;
                let mut files: Vec<PathBuf> = entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_file()
                        && p.extension().and_then(|x| x.to_str()) == Some(BLOCK_EXT))
                    .collect();
                files.sort();
                for path in files {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        // First match in sorted order wins, same as ShardedLocator.
                        index.entry(stem.to_owned()).or_insert_with(|| path.clone());
                    }
                }
            }
        }

        debug!("indexed {} block(s) under {}", index.len(), blocks_dir.display());
        Ok(Self { index })
    }

    pub fn len(&self) -> usize { self.index.len() }

    pub fn is_empty(&self) -> bool { self.index.is_empty() }
}

impl BlockLocator for IndexedLocator {
    fn locate(&self, checksum: &str) -> Option<PathBuf> {
        if !is_valid_checksum(checksum) {
            return None;
        }
        self.index.get(checksum).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn put(dir: &Path, rel: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn shard_path_uses_two_prefix_levels() {
        let p = shard_path(Path::new("/vol"), "abcdef").unwrap();
        assert_eq!(p, Path::new("/vol/blocks/ab/cd/abcdef.blk"));
        assert!(shard_path(Path::new("/vol"), "abc").is_none());
        assert!(shard_path(Path::new("/vol"), "../../etc").is_none());
    }

    #[test]
    fn sharded_locator_finds_canonical_and_misplaced_blocks() {
        let tmp = TempDir::new().unwrap();
        let canonical = put(tmp.path(), "blocks/aa/bb/aabbcc.blk");
        let misplaced = put(tmp.path(), "blocks/00/11/ffeedd.blk");

        let loc = ShardedLocator::new(tmp.path());
        assert_eq!(loc.locate("aabbcc"), Some(canonical));
        assert_eq!(loc.locate("ffeedd"), Some(misplaced));
        assert_eq!(loc.locate("123456"), None);
        assert_eq!(loc.locate(""), None);
        assert_eq!(loc.locate("aa/bb"), None);
    }

    #[test]
    fn locators_agree_on_first_match() {
        let tmp = TempDir::new().unwrap();
        let first = put(tmp.path(), "blocks/01/00/dup1.blk");
        put(tmp.path(), "blocks/02/00/dup1.blk");

        let sharded = ShardedLocator::new(tmp.path());
        let indexed = IndexedLocator::build(tmp.path()).unwrap();
        assert_eq!(sharded.locate("dup1"), Some(first.clone()));
        assert_eq!(indexed.locate("dup1"), Some(first));
    }

    #[test]
    fn indexed_locator_ignores_foreign_files() {
        let tmp = TempDir::new().unwrap();
        put(tmp.path(), "blocks/aa/bb/aabb01.blk");
        put(tmp.path(), "blocks/aa/bb/aabb02.tmp");

        let idx = IndexedLocator::build(tmp.path()).unwrap();
        assert_eq!(idx.len(), 1);
        assert!(idx.locate("aabb01").is_some());
        assert!(idx.locate("aabb02").is_none());
    }

    #[test]
    fn missing_block_area_is_empty_not_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(IndexedLocator::build(tmp.path()).unwrap().is_empty());
        assert!(ShardedLocator::new(tmp.path()).locate("aabbcc").is_none());
    }
}
