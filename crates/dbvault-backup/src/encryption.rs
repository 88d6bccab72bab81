//! Backup encryption support
//!
//! Ciphertext layout: nonce (12 bytes) || AEAD ciphertext+tag.
//! Key bytes never leave this module's config type; backup metadata only records
//! the algorithm and key id.

use crate::{BackupError, Result};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use serde::{Deserialize, Serialize};
use std::fmt;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Supported encryption types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionType {
    /// AES-256-GCM (recommended)
    #[default]
    Aes256Gcm,
    /// ChaCha20-Poly1305
    ChaCha20Poly1305,
}

impl EncryptionType {
    pub fn key_size(&self) -> usize {
        KEY_SIZE
    }

    pub fn nonce_size(&self) -> usize {
        NONCE_SIZE
    }

    pub fn tag_size(&self) -> usize {
        TAG_SIZE
    }

    pub fn extension(&self) -> &'static str {
        "enc"
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aes256Gcm => write!(f, "AES-256-GCM"),
            Self::ChaCha20Poly1305 => write!(f, "ChaCha20-Poly1305"),
        }
    }
}

/// Key derivation function algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KdfAlgorithm {
    /// PBKDF2 with SHA-256
    Pbkdf2Sha256,
    /// Argon2id
    Argon2id,
}

/// Key derivation function parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: KdfAlgorithm,
    pub salt: Vec<u8>,
    /// Iterations (PBKDF2)
    pub iterations: u32,
    /// Memory cost in KiB (Argon2)
    pub memory_cost: u32,
    /// Time cost (Argon2)
    pub time_cost: u32,
    /// Parallelism (Argon2)
    pub parallelism: u32,
}

impl KdfParams {
    pub fn pbkdf2(salt: impl Into<Vec<u8>>) -> Self {
        Self {
            algorithm: KdfAlgorithm::Pbkdf2Sha256,
            salt: salt.into(),
            iterations: 600_000,
            memory_cost: 0,
            time_cost: 0,
            parallelism: 0,
        }
    }

    pub fn argon2id(salt: impl Into<Vec<u8>>) -> Self {
        Self {
            algorithm: KdfAlgorithm::Argon2id,
            salt: salt.into(),
            iterations: 0,
            memory_cost: 19 * 1024,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

/// Encryption configuration holding resolved key material
#[derive(Clone)]
pub struct EncryptionConfig {
    pub encryption_type: EncryptionType,
    /// Key ID recorded in backup metadata
    pub key_id: String,
    key: [u8; KEY_SIZE],
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("encryption_type", &self.encryption_type)
            .field("key_id", &self.key_id)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl EncryptionConfig {
    /// Create from raw key bytes. Key must be exactly 32 bytes.
    pub fn new(encryption_type: EncryptionType, key_id: impl Into<String>, key: &[u8]) -> Result<Self> {
        if key.len() != encryption_type.key_size() {
            return Err(BackupError::Encryption(format!(
                "Invalid key length: expected {} bytes, got {}",
                encryption_type.key_size(),
                key.len()
            )));
        }
        let mut key_array = [0u8; KEY_SIZE];
        key_array.copy_from_slice(key);
        Ok(Self {
            encryption_type,
            key_id: key_id.into(),
            key: key_array,
        })
    }

    /// Derive the key from a passphrase
    pub fn from_passphrase(
        encryption_type: EncryptionType,
        key_id: impl Into<String>,
        passphrase: &str,
        kdf: &KdfParams,
    ) -> Result<Self> {
        let key = match kdf.algorithm {
            KdfAlgorithm::Pbkdf2Sha256 => {
                utils::derive_key_pbkdf2(passphrase.as_bytes(), &kdf.salt, kdf.iterations, KEY_SIZE)?
            }
            KdfAlgorithm::Argon2id => utils::derive_key_argon2(
                passphrase.as_bytes(),
                &kdf.salt,
                kdf.time_cost,
                kdf.memory_cost,
                kdf.parallelism,
                KEY_SIZE,
            )?,
        };
        Self::new(encryption_type, key_id, &key)
    }
}

/// Encrypt data using the specified configuration
pub fn encrypt(data: &[u8], config: &EncryptionConfig) -> Result<Vec<u8>> {
    let nonce_bytes = utils::generate_nonce(config.encryption_type.nonce_size());

    let ciphertext = match config.encryption_type {
        EncryptionType::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(&config.key)
                .map_err(|e| BackupError::Encryption(e.to_string()))?;
            cipher.encrypt(aes_gcm::Nonce::from_slice(&nonce_bytes), data)
        }
        EncryptionType::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(&config.key)
                .map_err(|e| BackupError::Encryption(e.to_string()))?;
            cipher.encrypt(chacha20poly1305::Nonce::from_slice(&nonce_bytes), data)
        }
    }
    .map_err(|_| BackupError::Encryption(format!("{} encryption failed", config.encryption_type)))?;

    let mut result = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt data produced by [`encrypt`]
pub fn decrypt(encrypted_data: &[u8], config: &EncryptionConfig) -> Result<Vec<u8>> {
    let nonce_size = config.encryption_type.nonce_size();
    if encrypted_data.len() < nonce_size + config.encryption_type.tag_size() {
        return Err(BackupError::Encryption("Ciphertext too short".to_string()));
    }

    let (nonce_bytes, ciphertext) = encrypted_data.split_at(nonce_size);

    let plaintext = match config.encryption_type {
        EncryptionType::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(&config.key)
                .map_err(|e| BackupError::Encryption(e.to_string()))?;
            cipher.decrypt(aes_gcm::Nonce::from_slice(nonce_bytes), ciphertext)
        }
        EncryptionType::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(&config.key)
                .map_err(|e| BackupError::Encryption(e.to_string()))?;
            cipher.decrypt(chacha20poly1305::Nonce::from_slice(nonce_bytes), ciphertext)
        }
    };

    plaintext.map_err(|_| {
        BackupError::Encryption(format!(
            "{} decryption failed: wrong key or corrupted data",
            config.encryption_type
        ))
    })
}

/// Encryption utilities
pub mod utils {
    use super::*;
    use rand::RngCore;

    /// Generate a random nonce
    pub fn generate_nonce(size: usize) -> Vec<u8> {
        let mut nonce = vec![0u8; size];
        rand::thread_rng().fill_bytes(&mut nonce);
        nonce
    }

    /// Generate a random salt for KDF
    pub fn generate_salt(size: usize) -> Vec<u8> {
        let mut salt = vec![0u8; size];
        rand::thread_rng().fill_bytes(&mut salt);
        salt
    }

    /// Derive key from password using PBKDF2
    pub fn derive_key_pbkdf2(
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        key_size: usize,
    ) -> Result<Vec<u8>> {
        use pbkdf2::pbkdf2_hmac;
        use sha2::Sha256;

        if iterations == 0 {
            return Err(BackupError::Encryption("PBKDF2 iterations must be non-zero".to_string()));
        }

        let mut key = vec![0u8; key_size];
        pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut key);
        Ok(key)
    }

    /// Derive key from password using Argon2id
    pub fn derive_key_argon2(
        password: &[u8],
        salt: &[u8],
        time_cost: u32,
        memory_cost: u32,
        parallelism: u32,
        key_size: usize,
    ) -> Result<Vec<u8>> {
        use argon2::{Argon2, Params, Version};

        let params = Params::new(memory_cost, time_cost, parallelism, Some(key_size))
            .map_err(|e| BackupError::Encryption(format!("Invalid Argon2 params: {}", e)))?;

        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

        let mut key = vec![0u8; key_size];
        argon2
            .hash_password_into(password, salt, &mut key)
            .map_err(|e| BackupError::Encryption(format!("Argon2 error: {}", e)))?;

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(encryption_type: EncryptionType) -> EncryptionConfig {
        EncryptionConfig::new(encryption_type, "test-key", &[7u8; 32]).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        for encryption_type in [EncryptionType::Aes256Gcm, EncryptionType::ChaCha20Poly1305] {
            let config = test_config(encryption_type);
            let plaintext = b"CREATE TABLE orders (id INTEGER PRIMARY KEY);";

            let encrypted = encrypt(plaintext, &config).unwrap();
            assert_ne!(&encrypted[NONCE_SIZE..], plaintext.as_slice());
            assert_eq!(encrypted.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);

            let decrypted = decrypt(&encrypted, &config).unwrap();
            assert_eq!(plaintext.to_vec(), decrypted);
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let config = test_config(EncryptionType::Aes256Gcm);
        let other = EncryptionConfig::new(EncryptionType::Aes256Gcm, "other", &[9u8; 32]).unwrap();

        let encrypted = encrypt(b"secret", &config).unwrap();
        assert!(decrypt(&encrypted, &other).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let config = test_config(EncryptionType::ChaCha20Poly1305);
        let mut encrypted = encrypt(b"payload bytes", &config).unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;

        assert!(matches!(decrypt(&encrypted, &config), Err(BackupError::Encryption(_))));
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(EncryptionConfig::new(EncryptionType::Aes256Gcm, "short", &[1u8; 16]).is_err());
    }

    #[test]
    fn test_passphrase_derivation_is_deterministic() {
        let mut kdf = KdfParams::pbkdf2(b"static-salt".to_vec());
        kdf.iterations = 1_000;

        let a = EncryptionConfig::from_passphrase(EncryptionType::Aes256Gcm, "k", "hunter2", &kdf).unwrap();
        let b = EncryptionConfig::from_passphrase(EncryptionType::Aes256Gcm, "k", "hunter2", &kdf).unwrap();

        let encrypted = encrypt(b"data", &a).unwrap();
        assert_eq!(decrypt(&encrypted, &b).unwrap(), b"data".to_vec());
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", test_config(EncryptionType::Aes256Gcm));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_nonce_generation() {
        let nonce1 = utils::generate_nonce(12);
        let nonce2 = utils::generate_nonce(12);

        assert_eq!(nonce1.len(), 12);
        assert_ne!(nonce1, nonce2);
    }
}
