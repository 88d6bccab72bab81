//! Compression stage of the backup codec

use crate::{BackupError, Result};
use serde::{Deserialize, Serialize};

/// Supported compression types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompressionType {
    /// No compression
    None,
    /// Gzip compression
    Gzip,
    /// Zstandard compression (recommended)
    #[default]
    Zstd,
    /// LZ4 compression (fast)
    Lz4,
}

impl CompressionType {
    /// File extension appended to backup files
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => "gz",
            Self::Zstd => "zst",
            Self::Lz4 => "lz4",
        }
    }

    /// Parse a configuration value such as `"zstd"`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Some(Self::None),
            "gzip" | "gz" => Some(Self::Gzip),
            "zstd" | "zst" => Some(Self::Zstd),
            "lz4" => Some(Self::Lz4),
            _ => None,
        }
    }
}

/// Compress data using the specified compression type
pub fn compress(data: &[u8], compression: CompressionType) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Gzip => compress_gzip(data),
        CompressionType::Zstd => compress_zstd(data),
        CompressionType::Lz4 => compress_lz4(data),
    }
}

/// Decompress data using the specified compression type
pub fn decompress(data: &[u8], compression: CompressionType) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Gzip => decompress_gzip(data),
        CompressionType::Zstd => decompress_zstd(data),
        CompressionType::Lz4 => decompress_lz4(data),
    }
}

fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| BackupError::Compression(format!("Gzip compression failed: {}", e)))?;

    encoder
        .finish()
        .map_err(|e| BackupError::Compression(format!("Gzip finalization failed: {}", e)))
}

fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::read::GzDecoder;
    use std::io::Read;

    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();

    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| BackupError::Compression(format!("Gzip decompression failed: {}", e)))?;

    Ok(decompressed)
}

fn compress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::encode_all(data, 3)
        .map_err(|e| BackupError::Compression(format!("Zstd compression failed: {}", e)))
}

fn decompress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(data)
        .map_err(|e| BackupError::Compression(format!("Zstd decompression failed: {}", e)))
}

/// LZ4 block format with the uncompressed length prepended as a little-endian u64
fn compress_lz4(data: &[u8]) -> Result<Vec<u8>> {
    let compressed = lz4::block::compress(data, None, false)
        .map_err(|e| BackupError::Compression(format!("LZ4 compression failed: {}", e)))?;

    let mut result = Vec::with_capacity(8 + compressed.len());
    result.extend_from_slice(&(data.len() as u64).to_le_bytes());
    result.extend_from_slice(&compressed);

    Ok(result)
}

fn decompress_lz4(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 8 {
        return Err(BackupError::Compression("LZ4 data too short".to_string()));
    }

    let (header, compressed_data) = data.split_at(8);
    let mut size_bytes = [0u8; 8];
    size_bytes.copy_from_slice(header);
    let uncompressed_size = u64::from_le_bytes(size_bytes);

    // lz4 block API takes an i32 size
    if uncompressed_size > i32::MAX as u64 {
        return Err(BackupError::Compression("LZ4 uncompressed size too large".to_string()));
    }

    lz4::block::decompress(compressed_data, Some(uncompressed_size as i32))
        .map_err(|e| BackupError::Compression(format!("LZ4 decompression failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_roundtrip() {
        let test_data = b"INSERT INTO users VALUES (1, 'alice'); INSERT INTO users VALUES (2, 'bob'); \
                          INSERT INTO users VALUES (1, 'alice'); INSERT INTO users VALUES (2, 'bob'); \
                          INSERT INTO users VALUES (1, 'alice'); INSERT INTO users VALUES (2, 'bob');";

        for compression_type in [
            CompressionType::None,
            CompressionType::Gzip,
            CompressionType::Zstd,
            CompressionType::Lz4,
        ] {
            let compressed = compress(test_data, compression_type).unwrap();
            let decompressed = decompress(&compressed, compression_type).unwrap();

            assert_eq!(test_data.to_vec(), decompressed,
                       "Compression roundtrip failed for {:?}", compression_type);

            if compression_type != CompressionType::None {
                assert!(compressed.len() < test_data.len(),
                        "Compression didn't reduce size for {:?}", compression_type);
            }
        }
    }

    #[test]
    fn test_empty_input_roundtrip() {
        for compression_type in [CompressionType::Gzip, CompressionType::Zstd] {
            let compressed = compress(b"", compression_type).unwrap();
            assert!(decompress(&compressed, compression_type).unwrap().is_empty());
        }
    }

    #[test]
    fn test_truncated_lz4_is_rejected() {
        assert!(matches!(
            decompress(&[1, 2, 3], CompressionType::Lz4),
            Err(BackupError::Compression(_))
        ));
    }

    #[test]
    fn test_parse() {
        assert_eq!(CompressionType::parse("ZSTD"), Some(CompressionType::Zstd));
        assert_eq!(CompressionType::parse("gz"), Some(CompressionType::Gzip));
        assert_eq!(CompressionType::parse("brotli"), None);
    }
}
