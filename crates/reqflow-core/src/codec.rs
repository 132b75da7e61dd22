//! Payload codec for journal rows and raw bodies.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use reqflow_types::error::ErrorKind;
use reqflow_types::execution::CompressionKind;

/// Gzip magic bytes.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    Compress(std::io::Error),

    #[error("decompression failed: {0}")]
    Decompress(std::io::Error),

    #[error("payload tagged gzip is not gzip data")]
    NotGzip,
}

impl CodecError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(CodecError::Compress)?;
    encoder.finish().map_err(CodecError::Compress)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    if !data.starts_with(&GZIP_MAGIC) {
        return Err(CodecError::NotGzip);
    }
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(CodecError::Decompress)?;
    Ok(out)
}

/// Encode `data` with gzip when it is larger than `threshold` bytes.
pub fn encode(data: Vec<u8>, threshold: usize) -> Result<(Vec<u8>, CompressionKind), CodecError> {
    if data.len() > threshold {
        Ok((compress(&data)?, CompressionKind::Gzip))
    } else {
        Ok((data, CompressionKind::None))
    }
}

/// Decode bytes according to their tag.
pub fn decode(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>, CodecError> {
    match kind {
        CompressionKind::None => Ok(data.to_vec()),
        CompressionKind::Gzip if data.is_empty() => Ok(Vec::new()),
        CompressionKind::Gzip => decompress(data),
    }
}
