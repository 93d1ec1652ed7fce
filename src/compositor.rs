//! Image compositing — replays a backup chain into one volume image.
//!
//! # Algorithm
//!
//! 1. Allocate a zero-filled buffer of `chain.latest().size` bytes.
//! 2. For every backup, oldest first, resolve each block, decompress it with
//!    the backup's codec and copy it to its offset, overwriting whatever an
//!    older backup left there.
//!
//! Every byte of the result therefore holds the value from the newest backup
//! that wrote it, or zero if none did.  This holds for arbitrarily
//! overlapping backups and for volumes that grew over the chain, since
//! offsets are absolute.
//!
//! # Failure
//!
//! A missing block, a corrupt payload or a block that would land past the
//! end of the image aborts the whole composite.  There is no partial result.
//!
//! # Parallelism
//!
//! With the `parallel` feature, locate + decompress for the blocks of one
//! backup run on the rayon pool.  Writes are applied on the calling thread
//! after the whole backup has been fetched, so backup N is fully applied
//! before any block of backup N+1 touches the buffer.  When several blocks
//! fail, the one earliest in the manifest is reported, as without the
//! feature.

use std::fs;

use log::{debug, info};

use crate::block::{Block, BlockLocator};
use crate::chain::VolumeBackupChain;
use crate::codec::get_codec;
use crate::error::{RestoreError, Result};
use crate::manifest::Backup;

/// Counters reported after a successful composite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositeStats {
    pub backups_replayed: usize,
    pub blocks_written:   usize,
    /// Decompressed bytes copied into the image, overwrites included.
    pub bytes_written:    u64,
}

/// A fully composited image.
#[derive(Debug)]
pub struct Composite {
    pub image: Vec<u8>,
    pub stats: CompositeStats,
}

impl Composite {
    /// BLAKE3 of the image, hex encoded.
    pub fn digest_hex(&self) -> String {
        hex::encode(blake3::hash(&self.image).as_bytes())
    }
}

pub struct Compositor {
    locator: Box<dyn BlockLocator>,
}

impl Compositor {
    pub fn new(locator: Box<dyn BlockLocator>) -> Self {
        Self { locator }
    }

    pub fn composite(&self, chain: &VolumeBackupChain) -> Result<Composite> {
        let size = chain.image_size();
        let mut image = allocate_image(size).map_err(|reason| RestoreError::Config(format!(
            "cannot allocate a {size} B image for backup {}: {reason}",
            chain.latest().identifier)))?;
        let mut stats = CompositeStats::default();

        for backup in &chain.backups {
            debug!("replaying {} ({} block(s), {}, taken {})",
                backup.identifier, backup.blocks.len(), backup.compression, backup.timestamp);
            self.replay(backup, &mut image, &mut stats)?;
            stats.backups_replayed += 1;
        }

        info!("composited {} backup(s): {} block(s), {} B written into a {} B image",
            stats.backups_replayed, stats.blocks_written, stats.bytes_written, size);
        Ok(Composite { image, stats })
    }

    #[cfg(not(feature = "parallel"))]
    fn replay(&self, backup: &Backup, image: &mut [u8], stats: &mut CompositeStats) -> Result<()> {
        self.replay_serial(backup, image, stats)
    }

    #[cfg(feature = "parallel")]
    fn replay(&self, backup: &Backup, image: &mut [u8], stats: &mut CompositeStats) -> Result<()> {
        self.replay_parallel(backup, image, stats)
    }

    #[cfg_attr(feature = "parallel", allow(dead_code))]
    fn replay_serial(&self, backup: &Backup, image: &mut [u8], stats: &mut CompositeStats) -> Result<()> {
        for block in &backup.blocks {
            let payload = self.fetch(backup, block)?;
            apply(image, backup, block, &payload, stats)?;
        }
        Ok(())
    }

    /// Fetches every block of `backup` on the rayon pool, then applies them
    /// in manifest order.  The error reported is the one of the earliest
    /// failing block, as on the serial path.
    #[cfg(feature = "parallel")]
    fn replay_parallel(&self, backup: &Backup, image: &mut [u8], stats: &mut CompositeStats) -> Result<()> {
        use rayon::prelude::*;

        let fetched: Vec<Result<Vec<u8>>> = backup.blocks
            .par_iter()
            .map(|block| self.fetch(backup, block))
            .collect();

        for (block, payload) in backup.blocks.iter().zip(fetched) {
            apply(image, backup, block, &payload?, stats)?;
        }
        Ok(())
    }

    /// Locate, read and decompress one block.
    fn fetch(&self, backup: &Backup, block: &Block) -> Result<Vec<u8>> {
        let path = self.locator.locate(&block.checksum).ok_or_else(|| RestoreError::MissingBlock {
            checksum: block.checksum.clone(),
            backup:   backup.identifier.clone(),
        })?;
        let compressed = fs::read(&path).map_err(|e| RestoreError::io(&path, e))?;
        get_codec(backup.compression)
            .decompress(&compressed)
            .map_err(|source| RestoreError::Decompression {
                checksum: block.checksum.clone(),
                backup:   backup.identifier.clone(),
                source,
            })
    }
}

/// Zero-filled buffer of `size` bytes, or the reason it cannot exist.
fn allocate_image(size: u64) -> std::result::Result<Vec<u8>, String> {
    let len = usize::try_from(size).map_err(|_| "exceeds the address space".to_owned())?;
    let mut image = Vec::new();
    image.try_reserve_exact(len).map_err(|e| e.to_string())?;
    image.resize(len, 0);
    Ok(image)
}

/// Copy `payload` over `image[offset..]`.
fn apply(
    image:   &mut [u8],
    backup:  &Backup,
    block:   &Block,
    payload: &[u8],
    stats:   &mut CompositeStats,
) -> Result<()> {
    let len = payload.len() as u64;
    let size = image.len() as u64;
    let end = block.offset.checked_add(len).filter(|&end| end <= size);
    let Some(end) = end else {
        return Err(RestoreError::BufferOverrun {
            checksum: block.checksum.clone(),
            backup:   backup.identifier.clone(),
            offset:   block.offset,
            len,
            size,
        });
    };

    // Both bounds are <= image.len(), which is a usize.
    image[block.offset as usize..end as usize].copy_from_slice(payload);
    stats.blocks_written += 1;
    stats.bytes_written += len;
    Ok(())
}
