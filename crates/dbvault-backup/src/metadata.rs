//! Backup metadata structures

use crate::{
    compression::CompressionType, encryption::EncryptionType, store::Document, BackupError, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Backup metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Unique backup identifier
    pub id: String,
    /// Timestamp when backup was started
    pub timestamp: DateTime<Utc>,
    /// Type of backup
    pub backup_type: BackupType,
    /// Lifecycle status
    pub status: BackupStatus,
    /// Requested priority
    pub priority: BackupPriority,
    /// Retention cadence; `None` for rollback snapshots, which retention ignores
    pub cadence: Option<BackupCadence>,
    /// Size of the stored (encoded) bytes
    pub size: u64,
    /// Size of the raw dump before compression and encryption
    pub original_size: u64,
    /// SHA-256 of the stored bytes, set only once completed
    pub checksum: Option<String>,
    /// Time taken to create the backup, in milliseconds
    pub duration_ms: u64,
    /// Tables included in this backup
    pub tables: Vec<String>,
    /// Row counts captured at backup time
    #[serde(default)]
    pub row_counts: BTreeMap<String, u64>,
    /// Where the stored bytes live
    pub location: BackupLocation,
    /// Compression applied before encryption
    pub compression: CompressionType,
    /// Encryption descriptor (no key material)
    pub encryption: Option<EncryptionInfo>,
    /// Parent backup for incremental backups
    pub parent_backup_id: Option<String>,
    /// Last verification time
    pub verified_at: Option<DateTime<Utc>>,
    /// Result of the last verification
    pub verified: Option<bool>,
    /// Error captured on failure
    pub error: Option<String>,
}

impl Document for BackupMetadata {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Type of backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    /// Full backup containing all tables
    Full,
    /// Incremental backup containing tables changed since the previous backup
    Incremental,
    /// Differential backup containing changes since the last full backup
    Differential,
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Incremental => write!(f, "incremental"),
            Self::Differential => write!(f, "differential"),
        }
    }
}

/// Backup lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl BackupStatus {
    /// pending → in_progress → {completed, failed}
    pub fn can_transition_to(self, next: BackupStatus) -> bool {
        matches!(
            (self, next),
            (BackupStatus::Pending, BackupStatus::InProgress)
                | (BackupStatus::InProgress, BackupStatus::Completed)
                | (BackupStatus::InProgress, BackupStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BackupStatus::Completed | BackupStatus::Failed)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Requested backup priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackupPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Retention cadence a backup is counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackupCadence {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl fmt::Display for BackupCadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
            Self::Monthly => write!(f, "monthly"),
        }
    }
}

/// Storage location of a backup. `local` is always set before `cloud`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupLocation {
    /// Path relative to the storage gateway root
    pub local: Option<String>,
    /// Cloud object reference
    pub cloud: Option<String>,
}

/// Encryption descriptor persisted with a backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionInfo {
    pub algorithm: EncryptionType,
    pub key_id: String,
}

impl BackupMetadata {
    /// Fresh pending record created before any I/O happens
    pub fn pending(
        id: impl Into<String>,
        backup_type: BackupType,
        priority: BackupPriority,
        cadence: Option<BackupCadence>,
        compression: CompressionType,
        encryption: Option<EncryptionInfo>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            backup_type,
            status: BackupStatus::Pending,
            priority,
            cadence,
            size: 0,
            original_size: 0,
            checksum: None,
            duration_ms: 0,
            tables: Vec::new(),
            row_counts: BTreeMap::new(),
            location: BackupLocation::default(),
            compression,
            encryption,
            parent_backup_id: None,
            verified_at: None,
            verified: None,
            error: None,
        }
    }

    /// Advance the status, rejecting backward or skipping transitions
    pub fn transition(&mut self, next: BackupStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(BackupError::Precondition(format!(
                "Backup {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Mark completed together with the checksum of the stored bytes
    pub fn complete(&mut self, checksum: String) -> Result<()> {
        self.transition(BackupStatus::Completed)?;
        self.checksum = Some(checksum);
        self.error = None;
        Ok(())
    }

    /// Mark failed with the captured error
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(BackupStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.status == BackupStatus::Completed
    }

    /// Rollback snapshots carry no cadence
    pub fn is_rollback_snapshot(&self) -> bool {
        self.cadence.is_none()
    }
}

/// Aggregate backup statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupStats {
    /// Number of backup records
    pub total_backups: usize,
    pub completed_backups: usize,
    pub failed_backups: usize,
    /// Total stored size of completed backups
    pub total_size: u64,
    /// completed / total, 0.0 when there are no backups
    pub success_rate: f64,
    /// Average duration of completed backups in milliseconds
    pub average_duration_ms: u64,
    pub last_backup_time: Option<DateTime<Utc>>,
    pub last_backup_size: Option<u64>,
    /// Next scheduled run, when scheduling is enabled
    pub next_scheduled_backup: Option<DateTime<Utc>>,
}

impl BackupStats {
    /// Calculate stats from a set of backup records
    pub fn from_backups(backups: &[BackupMetadata], next_scheduled_backup: Option<DateTime<Utc>>) -> Self {
        let completed: Vec<&BackupMetadata> = backups.iter().filter(|b| b.is_completed()).collect();
        let failed = backups
            .iter()
            .filter(|b| b.status == BackupStatus::Failed)
            .count();

        let total_size = completed.iter().map(|b| b.size).sum();
        let success_rate = if backups.is_empty() {
            0.0
        } else {
            completed.len() as f64 / backups.len() as f64
        };
        let average_duration_ms = if completed.is_empty() {
            0
        } else {
            completed.iter().map(|b| b.duration_ms).sum::<u64>() / completed.len() as u64
        };

        let latest = backups.iter().max_by_key(|b| b.timestamp);

        Self {
            total_backups: backups.len(),
            completed_backups: completed.len(),
            failed_backups: failed,
            total_size,
            success_rate,
            average_duration_ms,
            last_backup_time: latest.map(|b| b.timestamp),
            last_backup_size: latest.map(|b| b.size),
            next_scheduled_backup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(id: &str) -> BackupMetadata {
        BackupMetadata::pending(
            id,
            BackupType::Full,
            BackupPriority::Normal,
            Some(BackupCadence::Daily),
            CompressionType::Zstd,
            None,
        )
    }

    #[test]
    fn test_status_only_moves_forward() {
        let mut meta = pending("b1");
        assert!(meta.checksum.is_none());

        meta.transition(BackupStatus::InProgress).unwrap();
        meta.complete("abc".to_string()).unwrap();
        assert_eq!(meta.checksum.as_deref(), Some("abc"));

        assert!(meta.transition(BackupStatus::Pending).is_err());
        assert!(meta.transition(BackupStatus::InProgress).is_err());
        assert!(meta.fail("late").is_err());
        assert_eq!(meta.status, BackupStatus::Completed);
    }

    #[test]
    fn test_pending_cannot_finish_directly() {
        let mut meta = pending("b2");
        assert!(meta.complete("abc".to_string()).is_err());
        assert!(meta.checksum.is_none());
        assert!(meta.fail("dump failed").is_err());
        assert_eq!(meta.status, BackupStatus::Pending);
        assert!(meta.error.is_none());

        meta.transition(BackupStatus::InProgress).unwrap();
        meta.fail("dump failed").unwrap();
        assert_eq!(meta.status, BackupStatus::Failed);
        assert_eq!(meta.error.as_deref(), Some("dump failed"));
    }

    #[test]
    fn test_stats_from_backups() {
        let mut a = pending("a");
        a.transition(BackupStatus::InProgress).unwrap();
        a.size = 100;
        a.duration_ms = 10;
        a.complete("x".into()).unwrap();

        let mut b = pending("b");
        b.timestamp = a.timestamp + chrono::Duration::seconds(5);
        b.transition(BackupStatus::InProgress).unwrap();
        b.size = 300;
        b.duration_ms = 30;
        b.complete("y".into()).unwrap();

        let mut c = pending("c");
        c.timestamp = a.timestamp - chrono::Duration::seconds(5);
        c.transition(BackupStatus::InProgress).unwrap();
        c.fail("boom").unwrap();

        let stats = BackupStats::from_backups(&[a, b.clone(), c], None);
        assert_eq!(stats.total_backups, 3);
        assert_eq!(stats.completed_backups, 2);
        assert_eq!(stats.failed_backups, 1);
        assert_eq!(stats.total_size, 400);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.average_duration_ms, 20);
        assert_eq!(stats.last_backup_time, Some(b.timestamp));
        assert_eq!(stats.last_backup_size, Some(300));
    }

    #[test]
    fn test_empty_stats() {
        let stats = BackupStats::from_backups(&[], None);
        assert_eq!(stats.success_rate, 0.0);
        assert!(stats.last_backup_time.is_none());
    }
}
