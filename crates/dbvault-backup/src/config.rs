//! Backup, recovery and scheduling configuration
//!
//! Every struct has a `Default` and a `from_env()` constructor. Environment
//! variables override individual fields; unset or unparsable values fall back to
//! the defaults.
//!
//! ```bash
//! DBVAULT_BACKUP_DIR=/var/lib/dbvault/backups
//! DBVAULT_COMPRESSION=zstd            # none | gzip | zstd | lz4
//! DBVAULT_CLOUD_ENABLED=true
//! DBVAULT_RETENTION_DAILY=7
//! DBVAULT_RETENTION_WEEKLY=4
//! DBVAULT_RETENTION_MONTHLY=12
//! DBVAULT_ENCRYPTION_PASSPHRASE=...   # enables AES-256-GCM
//! DBVAULT_ENCRYPTION_SALT=<hex>
//! DBVAULT_ENCRYPTION_KEY_ID=primary
//!
//! DBVAULT_RECOVERY_TARGET=primary
//! DBVAULT_RECOVERY_AUTO_ROLLBACK=true
//! DBVAULT_RECOVERY_CHECK_TIMEOUT_SECS=60
//! DBVAULT_RECOVERY_APPLY_TIMEOUT_SECS=1800
//!
//! DBVAULT_SCHEDULE_ENABLED=true
//! DBVAULT_SCHEDULE_HOUR=2
//! ```

use crate::{
    compression::CompressionType,
    encryption::{EncryptionConfig, EncryptionType, KdfParams},
    metadata::BackupCadence,
    BackupError, Result,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Retained backup counts per cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub daily: usize,
    pub weekly: usize,
    pub monthly: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily: 7,
            weekly: 4,
            monthly: 12,
        }
    }
}

impl RetentionPolicy {
    pub fn keep_for(&self, cadence: BackupCadence) -> usize {
        match cadence {
            BackupCadence::Daily => self.daily,
            BackupCadence::Weekly => self.weekly,
            BackupCadence::Monthly => self.monthly,
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            daily: env_parse("DBVAULT_RETENTION_DAILY", defaults.daily),
            weekly: env_parse("DBVAULT_RETENTION_WEEKLY", defaults.weekly),
            monthly: env_parse("DBVAULT_RETENTION_MONTHLY", defaults.monthly),
        }
    }
}

/// Scheduler triggers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Master switch for all scheduled backups
    pub enabled: bool,
    pub daily: bool,
    pub weekly: bool,
    pub monthly: bool,
    /// Hour of day (UTC) each run is anchored to
    pub hour: u32,
    /// Interval between retention cleanup runs
    pub cleanup_interval_secs: u64,
    /// Delay before re-running a failed scheduled backup
    pub retry_delay_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            daily: true,
            weekly: true,
            monthly: true,
            hour: 2,
            cleanup_interval_secs: 3600,
            retry_delay_secs: 300,
        }
    }
}

impl ScheduleConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_parse("DBVAULT_SCHEDULE_ENABLED", defaults.enabled),
            daily: env_parse("DBVAULT_SCHEDULE_DAILY", defaults.daily),
            weekly: env_parse("DBVAULT_SCHEDULE_WEEKLY", defaults.weekly),
            monthly: env_parse("DBVAULT_SCHEDULE_MONTHLY", defaults.monthly),
            hour: env_parse("DBVAULT_SCHEDULE_HOUR", defaults.hour).min(23),
            cleanup_interval_secs: env_parse(
                "DBVAULT_SCHEDULE_CLEANUP_INTERVAL_SECS",
                defaults.cleanup_interval_secs,
            ),
            retry_delay_secs: env_parse("DBVAULT_SCHEDULE_RETRY_DELAY_SECS", defaults.retry_delay_secs),
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs.max(1))
    }
}

/// Backup manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Root directory for backup payloads and metadata
    pub backup_dir: PathBuf,
    /// Compression applied to new backups
    pub compression: CompressionType,
    /// Encryption key for new backups. Never serialized.
    #[serde(skip)]
    pub encryption: Option<EncryptionConfig>,
    /// Upload completed payloads to the configured cloud store
    pub cloud_enabled: bool,
    pub retention: RetentionPolicy,
    /// Cadence recorded on manually requested backups
    pub default_cadence: BackupCadence,
    /// Upper bound for `Database::apply` during restore
    pub apply_timeout_secs: u64,
    pub schedule: ScheduleConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("./backups"),
            compression: CompressionType::Zstd,
            encryption: None,
            cloud_enabled: false,
            retention: RetentionPolicy::default(),
            default_cadence: BackupCadence::Daily,
            apply_timeout_secs: 1800,
            schedule: ScheduleConfig::default(),
        }
    }
}

impl BackupConfig {
    /// Load from environment variables.
    ///
    /// Fails only when a passphrase is configured but the key cannot be derived.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let compression = std::env::var("DBVAULT_COMPRESSION")
            .ok()
            .and_then(|s| CompressionType::parse(&s))
            .unwrap_or(defaults.compression);

        let encryption = match std::env::var("DBVAULT_ENCRYPTION_PASSPHRASE") {
            Ok(passphrase) if !passphrase.is_empty() => {
                let salt = std::env::var("DBVAULT_ENCRYPTION_SALT").map_err(|_| {
                    BackupError::Precondition(
                        "DBVAULT_ENCRYPTION_SALT is required with DBVAULT_ENCRYPTION_PASSPHRASE".to_string(),
                    )
                })?;
                let salt = hex::decode(salt.trim()).map_err(|e| {
                    BackupError::Precondition(format!("DBVAULT_ENCRYPTION_SALT is not hex: {}", e))
                })?;
                let key_id = std::env::var("DBVAULT_ENCRYPTION_KEY_ID").unwrap_or_else(|_| "default".to_string());
                Some(EncryptionConfig::from_passphrase(
                    EncryptionType::Aes256Gcm,
                    key_id,
                    &passphrase,
                    &KdfParams::pbkdf2(salt),
                )?)
            }
            _ => None,
        };

        Ok(Self {
            backup_dir: std::env::var("DBVAULT_BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.backup_dir),
            compression,
            encryption,
            cloud_enabled: env_parse("DBVAULT_CLOUD_ENABLED", defaults.cloud_enabled),
            retention: RetentionPolicy::from_env(),
            default_cadence: defaults.default_cadence,
            apply_timeout_secs: env_parse("DBVAULT_BACKUP_APPLY_TIMEOUT_SECS", defaults.apply_timeout_secs),
            schedule: ScheduleConfig::from_env(),
        })
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }
}

/// Recovery orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Target used when a plan request names none
    pub default_target_database: String,
    /// Run the pre/post-restore check batches
    pub verification_enabled: bool,
    /// Capture a rollback point before mutating the target
    pub rollback_enabled: bool,
    /// Roll back automatically when execution fails
    pub auto_rollback: bool,
    /// Timeout for each individual check
    pub check_timeout_secs: u64,
    /// Timeout for each restore attempt
    pub apply_timeout_secs: u64,
    /// Restore attempts after the first one
    pub default_max_retries: u32,
    /// Linear backoff step between restore attempts
    pub retry_backoff_ms: u64,
    /// Minimum free space on the backup volume
    pub min_free_disk_bytes: u64,
    pub max_memory_percent: f32,
    pub max_cpu_percent: f32,
    /// Above this many connections validation emits a warning
    pub max_active_connections: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            default_target_database: "primary".to_string(),
            verification_enabled: true,
            rollback_enabled: true,
            auto_rollback: true,
            check_timeout_secs: 60,
            apply_timeout_secs: 1800,
            default_max_retries: 0,
            retry_backoff_ms: 1000,
            min_free_disk_bytes: 1024 * 1024 * 1024,
            max_memory_percent: 90.0,
            max_cpu_percent: 95.0,
            max_active_connections: 50,
        }
    }
}

impl RecoveryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_target_database: std::env::var("DBVAULT_RECOVERY_TARGET")
                .unwrap_or(defaults.default_target_database),
            verification_enabled: env_parse("DBVAULT_RECOVERY_VERIFICATION", defaults.verification_enabled),
            rollback_enabled: env_parse("DBVAULT_RECOVERY_ROLLBACK", defaults.rollback_enabled),
            auto_rollback: env_parse("DBVAULT_RECOVERY_AUTO_ROLLBACK", defaults.auto_rollback),
            check_timeout_secs: env_parse("DBVAULT_RECOVERY_CHECK_TIMEOUT_SECS", defaults.check_timeout_secs),
            apply_timeout_secs: env_parse("DBVAULT_RECOVERY_APPLY_TIMEOUT_SECS", defaults.apply_timeout_secs),
            default_max_retries: env_parse("DBVAULT_RECOVERY_MAX_RETRIES", defaults.default_max_retries),
            retry_backoff_ms: env_parse("DBVAULT_RECOVERY_RETRY_BACKOFF_MS", defaults.retry_backoff_ms),
            min_free_disk_bytes: env_parse("DBVAULT_RECOVERY_MIN_FREE_DISK_BYTES", defaults.min_free_disk_bytes),
            max_memory_percent: env_parse("DBVAULT_RECOVERY_MAX_MEMORY_PERCENT", defaults.max_memory_percent),
            max_cpu_percent: env_parse("DBVAULT_RECOVERY_MAX_CPU_PERCENT", defaults.max_cpu_percent),
            max_active_connections: env_parse(
                "DBVAULT_RECOVERY_MAX_ACTIVE_CONNECTIONS",
                defaults.max_active_connections,
            ),
        }
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let backup = BackupConfig::default();
        assert_eq!(backup.compression, CompressionType::Zstd);
        assert_eq!(backup.retention, RetentionPolicy { daily: 7, weekly: 4, monthly: 12 });
        assert!(backup.encryption.is_none());
        assert!(!backup.schedule.enabled);

        let recovery = RecoveryConfig::default();
        assert!(recovery.verification_enabled && recovery.rollback_enabled && recovery.auto_rollback);
        assert_eq!(recovery.check_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let config: RecoveryConfig =
            serde_json::from_str(r#"{"auto_rollback": false, "default_max_retries": 3}"#).unwrap();
        assert!(!config.auto_rollback);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.default_target_database, "primary");

        let backup: BackupConfig = serde_json::from_str(r#"{"retention": {"daily": 2}}"#).unwrap();
        assert_eq!(backup.retention.daily, 2);
        assert_eq!(backup.retention.weekly, 4);
    }

    #[test]
    fn test_keep_for_cadence() {
        let policy = RetentionPolicy { daily: 1, weekly: 2, monthly: 3 };
        assert_eq!(policy.keep_for(BackupCadence::Daily), 1);
        assert_eq!(policy.keep_for(BackupCadence::Weekly), 2);
        assert_eq!(policy.keep_for(BackupCadence::Monthly), 3);
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("DBVAULT_TEST_ENV_PARSE", "not-a-number");
        assert_eq!(env_parse("DBVAULT_TEST_ENV_PARSE", 5u64), 5);
        std::env::set_var("DBVAULT_TEST_ENV_PARSE", " 12 ");
        assert_eq!(env_parse("DBVAULT_TEST_ENV_PARSE", 5u64), 12);
        std::env::remove_var("DBVAULT_TEST_ENV_PARSE");
        assert_eq!(env_parse("DBVAULT_TEST_ENV_PARSE", 5u64), 5);
    }
}
