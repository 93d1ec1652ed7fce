//! Codec registry for block payloads.
//!
//! # Identity rules
//! Every backup manifest names exactly one compression method in its
//! `CompressionMethod` field, and that method applies to every block the
//! manifest references.  The tag is matched case-insensitively against the
//! names below; a tag this build does not know is a manifest error, never a
//! silent fallback to another codec.
//!
//! # Frame formats
//! - `lz4`  — LZ4 *frame* format (magic `04 22 4D 18`), not the raw block
//!   format with a prepended size.
//! - `gzip` — RFC 1952 gzip member.
//! - `zstd` — a single Zstandard frame.
//! - `none` — payload stored verbatim.

use std::io::{self, Read, Write};
use thiserror::Error;

// ── CodecId enum ─────────────────────────────────────────────────────────────

/// Runtime codec discriminant, parsed from a manifest's compression tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    None,
    Lz4,
    Gzip,
    Zstd,
}

impl CodecId {
    /// Canonical tag, as written by the backup engine.
    pub fn name(self) -> &'static str {
        match self {
            CodecId::None => "none",
            CodecId::Lz4  => "lz4",
            CodecId::Gzip => "gzip",
            CodecId::Zstd => "zstd",
        }
    }

    /// Parse a manifest or CLI tag.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(CodecId::None),
            "lz4"  => Some(CodecId::Lz4),
            "gzip" => Some(CodecId::Gzip),
            "zstd" => Some(CodecId::Zstd),
            _      => None,
        }
    }
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

/// A pluggable block codec.
///
/// Restores only ever call `decompress`; `compress` exists so stores can be
/// produced for tests and benchmarks with the exact framing a backup engine
/// writes.
pub trait Codec: Send + Sync {
    fn codec_id(&self) -> CodecId;
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn codec_id(&self) -> CodecId { CodecId::None }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8])        -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

pub struct Lz4Codec;
impl Codec for Lz4Codec {
    fn codec_id(&self) -> CodecId { CodecId::Lz4 }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        let mut enc = lz4_flex::frame::FrameEncoder::new(Vec::new());
        enc.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lz4_flex::frame::FrameDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

pub struct GzipCodec;
impl Codec for GzipCodec {
    fn codec_id(&self) -> CodecId { CodecId::Gzip }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        let level = flate2::Compression::new(level.clamp(0, 9) as u32);
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), level);
        enc.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn codec_id(&self) -> CodecId { CodecId::Zstd }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        zstd::encode_all(data, level).map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::decode_all(data).map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a CodecId to a built-in codec.
pub fn get_codec(id: CodecId) -> Box<dyn Codec> {
    match id {
        CodecId::None => Box::new(NoneCodec),
        CodecId::Lz4  => Box::new(Lz4Codec),
        CodecId::Gzip => Box::new(GzipCodec),
        CodecId::Zstd => Box::new(ZstdCodec),
    }
}
