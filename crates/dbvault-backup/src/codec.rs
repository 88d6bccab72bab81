//! Byte pipeline applied to database dumps.
//!
//! Encoding is always compress then encrypt; decoding is the exact inverse,
//! decrypt then decompress. Checksums are taken over the encoded bytes.

use crate::{
    compression::{self, CompressionType},
    encryption::{self, EncryptionConfig},
    metadata::{BackupMetadata, EncryptionInfo},
    BackupError, Result,
};
use sha2::{Digest, Sha256};

/// Compression + encryption pipeline for one backup
#[derive(Debug, Clone)]
pub struct Codec {
    compression: CompressionType,
    encryption: Option<EncryptionConfig>,
}

impl Codec {
    pub fn new(compression: CompressionType, encryption: Option<EncryptionConfig>) -> Self {
        Self {
            compression,
            encryption,
        }
    }

    /// Rebuild the codec a backup was written with.
    ///
    /// The compression type comes from the metadata; the key comes from the
    /// configured encryption and must carry the recorded key id.
    pub fn for_backup(metadata: &BackupMetadata, configured: Option<&EncryptionConfig>) -> Result<Self> {
        let encryption = match &metadata.encryption {
            None => None,
            Some(info) => {
                let config = configured.ok_or_else(|| {
                    BackupError::Encryption(format!(
                        "Backup {} is encrypted with key {} but no encryption key is configured",
                        metadata.id, info.key_id
                    ))
                })?;
                if config.key_id != info.key_id || config.encryption_type != info.algorithm {
                    return Err(BackupError::Encryption(format!(
                        "Backup {} needs key {} ({}), configured key is {} ({})",
                        metadata.id, info.key_id, info.algorithm, config.key_id, config.encryption_type
                    )));
                }
                Some(config.clone())
            }
        };

        Ok(Self::new(metadata.compression, encryption))
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    /// Descriptor persisted in backup metadata
    pub fn encryption_info(&self) -> Option<EncryptionInfo> {
        self.encryption.as_ref().map(|config| EncryptionInfo {
            algorithm: config.encryption_type,
            key_id: config.key_id.clone(),
        })
    }

    /// File name suffix such as `.zst.enc`
    pub fn file_suffix(&self) -> String {
        let mut suffix = String::new();
        let ext = self.compression.extension();
        if !ext.is_empty() {
            suffix.push('.');
            suffix.push_str(ext);
        }
        if let Some(config) = &self.encryption {
            suffix.push('.');
            suffix.push_str(config.encryption_type.extension());
        }
        suffix
    }

    /// Raw dump bytes to storage bytes
    pub fn encode(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let compressed = compression::compress(raw, self.compression)?;
        match &self.encryption {
            Some(config) => encryption::encrypt(&compressed, config),
            None => Ok(compressed),
        }
    }

    /// Storage bytes back to raw dump bytes
    pub fn decode(&self, stored: &[u8]) -> Result<Vec<u8>> {
        let decrypted = match &self.encryption {
            Some(config) => encryption::decrypt(stored, config)?,
            None => stored.to_vec(),
        };
        compression::decompress(&decrypted, self.compression)
    }
}

/// Hex-encoded SHA-256 of the given bytes
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::EncryptionType;

    fn key() -> EncryptionConfig {
        EncryptionConfig::new(EncryptionType::Aes256Gcm, "primary", &[3u8; 32]).unwrap()
    }

    #[test]
    fn test_pipeline_roundtrip() {
        let raw = b"{\"users\":[{\"id\":1},{\"id\":2}],\"orders\":[]}".repeat(20);

        for compression_type in [CompressionType::None, CompressionType::Gzip, CompressionType::Zstd, CompressionType::Lz4] {
            for encryption in [None, Some(key())] {
                let codec = Codec::new(compression_type, encryption);
                let stored = codec.encode(&raw).unwrap();
                assert_eq!(codec.decode(&stored).unwrap(), raw);
            }
        }
    }

    #[test]
    fn test_encode_order_is_compress_then_encrypt() {
        let raw = b"abcabcabcabcabcabcabcabcabcabc".repeat(10);
        let codec = Codec::new(CompressionType::Zstd, Some(key()));

        let stored = codec.encode(&raw).unwrap();
        let decrypted = encryption::decrypt(&stored, &key()).unwrap();
        assert_eq!(compression::decompress(&decrypted, CompressionType::Zstd).unwrap(), raw);
    }

    #[test]
    fn test_checksum_detects_single_byte_flip() {
        let mut data = b"storage level bytes".to_vec();
        let original = checksum(&data);
        assert_eq!(original.len(), 64);
        assert_eq!(original, checksum(&data));

        data[4] ^= 0xff;
        assert_ne!(original, checksum(&data));
    }

    #[test]
    fn test_file_suffix() {
        assert_eq!(Codec::new(CompressionType::Zstd, Some(key())).file_suffix(), ".zst.enc");
        assert_eq!(Codec::new(CompressionType::None, None).file_suffix(), "");
    }
}
