//! Backup manifest (`*.cfg`) parsing.
//!
//! A manifest is a JSON object.  Only the fields below are interpreted;
//! anything else (volume name, labels, block counts) is ignored.
//!
//! | Field               | Shape                                             |
//! |---------------------|---------------------------------------------------|
//! | `Name`              | string, optional                                  |
//! | `CreatedTime`       | RFC 3339 timestamp (offset optional, UTC assumed) |
//! | `Size`              | non-negative integer, or a decimal string of one  |
//! | `CompressionMethod` | codec tag (see [`CodecId::from_name`])            |
//! | `Blocks`            | array of `{ "Offset": int, "BlockChecksum": str }` |
//!
//! Values are never coerced: `-1`, `4096.0`, `"+8"` and `"4k"` are all
//! rejected, and `Offset` must be a JSON number.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::block::Block;
use crate::codec::CodecId;
use crate::error::{RestoreError, Result};

pub const MANIFEST_EXT: &str = "cfg";

/// One snapshot's manifest.  Read-only after construction.
#[derive(Debug, Clone)]
pub struct Backup {
    /// File stem of the manifest; unique within a volume.
    pub identifier:    String,
    pub name:          Option<String>,
    pub timestamp:     DateTime<Utc>,
    /// Logical volume size when this backup was taken.
    pub size:          u64,
    pub compression:   CodecId,
    pub blocks:        Vec<Block>,
    pub manifest_path: PathBuf,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawManifest {
    #[serde(default)]
    name:               Option<String>,
    #[serde(default)]
    created_time:       Option<Value>,
    #[serde(default)]
    size:               Option<Value>,
    #[serde(default)]
    compression_method: Option<Value>,
    #[serde(default)]
    blocks:             Option<Vec<RawBlock>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawBlock {
    #[serde(default)]
    offset:         Option<Value>,
    #[serde(default)]
    block_checksum: Option<Value>,
}

/// Read and validate the manifest at `path`.
pub fn read(path: &Path) -> Result<Backup> {
    let bytes = fs::read(path).map_err(|e| RestoreError::io(path, e))?;
    parse(path, &bytes)
}

/// Validate manifest `bytes`; `path` supplies the identifier and error context.
pub fn parse(path: &Path, bytes: &[u8]) -> Result<Backup> {
    let raw: RawManifest = serde_json::from_slice(bytes)
        .map_err(|e| RestoreError::malformed(path, e.to_string()))?;

    let identifier = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_owned)
        .ok_or_else(|| RestoreError::malformed(path, "manifest file name is not valid UTF-8"))?;

    let created = raw.created_time
        .ok_or_else(|| RestoreError::malformed(path, "missing field CreatedTime"))?;
    let created = created.as_str()
        .ok_or_else(|| RestoreError::malformed(path, "CreatedTime must be a string"))?;
    let timestamp = parse_timestamp(created)
        .ok_or_else(|| RestoreError::malformed(path, format!("invalid CreatedTime {created:?}")))?;

    let size = raw.size
        .ok_or_else(|| RestoreError::malformed(path, "missing field Size"))?;
    let size = non_negative_int(&size, true)
        .map_err(|e| RestoreError::malformed(path, format!("Size {e}")))?;

    let method = raw.compression_method
        .ok_or_else(|| RestoreError::malformed(path, "missing field CompressionMethod"))?;
    let method = method.as_str()
        .ok_or_else(|| RestoreError::malformed(path, "CompressionMethod must be a string"))?;
    let compression = CodecId::from_name(method)
        .ok_or_else(|| RestoreError::malformed(path, format!("unknown compression method {method:?}")))?;

    let raw_blocks = raw.blocks
        .ok_or_else(|| RestoreError::malformed(path, "missing field Blocks"))?;
    let mut blocks = Vec::with_capacity(raw_blocks.len());
    for (i, rb) in raw_blocks.into_iter().enumerate() {
        let offset = rb.offset
            .ok_or_else(|| RestoreError::malformed(path, format!("block {i}: missing Offset")))?;
        let offset = non_negative_int(&offset, false)
            .map_err(|e| RestoreError::malformed(path, format!("block {i}: Offset {e}")))?;
        let checksum = match rb.block_checksum {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(_) => return Err(RestoreError::malformed(
                path, format!("block {i}: BlockChecksum must be a non-empty string"))),
            None => return Err(RestoreError::malformed(
                path, format!("block {i}: missing BlockChecksum"))),
        };
        blocks.push(Block { offset, checksum });
    }

    Ok(Backup {
        identifier,
        name: raw.name,
        timestamp,
        size,
        compression,
        blocks,
        manifest_path: path.to_owned(),
    })
}

/// RFC 3339, or an offset-less ISO-8601 datetime taken as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|n| n.and_utc())
}

/// `allow_string` admits a plain run of ASCII digits in a JSON string.
fn non_negative_int(v: &Value, allow_string: bool) -> std::result::Result<u64, String> {
    match v {
        Value::Number(n) => n.as_u64()
            .ok_or_else(|| format!("must be a non-negative integer, got {n}")),
        Value::String(s) if allow_string => {
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(format!("must be a non-negative integer, got {s:?}"));
            }
            s.parse::<u64>().map_err(|_| format!("does not fit in 64 bits, got {s:?}"))
        }
        other => Err(format!("must be a non-negative integer, got {other}")),
    }
}
