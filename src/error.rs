use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::codec::CodecError;

/// Every way a restore can fail.
///
/// None of these are retried: each one is a configuration or data-integrity
/// problem that the same inputs would reproduce.
#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No backups found in {}", .path.display())]
    NoBackupsFound { path: PathBuf },

    #[error("Malformed manifest {}: {reason}", .path.display())]
    MalformedManifest { path: PathBuf, reason: String },

    #[error("Block {checksum} referenced by backup {backup} is missing from the store")]
    MissingBlock { checksum: String, backup: String },

    #[error("Block {checksum} in backup {backup} failed to decompress: {source}")]
    Decompression {
        checksum: String,
        backup:   String,
        #[source]
        source:   CodecError,
    },

    #[error("Block {checksum} in backup {backup} overruns the image: \
             offset {offset} + {len} bytes > size {size}")]
    BufferOverrun {
        checksum: String,
        backup:   String,
        offset:   u64,
        len:      u64,
        size:     u64,
    },

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RestoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RestoreError::Io { path: path.into(), source }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RestoreError::MalformedManifest { path: path.into(), reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, RestoreError>;
