//! Backup and recovery engine for dbvault
//!
//! This crate provides:
//! - Full and incremental backups, compressed and encrypted, with storage-level checksums
//! - Backup verification and retention-driven cleanup
//! - Calendar-anchored backup scheduling
//! - Checked recovery plans with single-flight execution and automatic rollback

pub mod checks;
pub mod codec;
pub mod compression;
pub mod config;
pub mod database;
pub mod encryption;
pub mod manager;
pub mod metadata;
pub mod notifier;
pub mod orchestrator;
pub mod plan;
pub mod probe;
pub mod retention;
pub mod scheduler;
pub mod storage;
pub mod store;

pub use checks::{
    CheckContext, CheckKind, CheckOutcome, CheckRegistry, CheckRunner, CheckStatus, RecoveryCheck,
    RecoveryCheckHandler,
};
pub use codec::Codec;
pub use compression::CompressionType;
pub use config::{BackupConfig, RecoveryConfig, RetentionPolicy, ScheduleConfig};
pub use database::Database;
pub use encryption::{EncryptionConfig, EncryptionType};
pub use manager::{BackupManager, RestoreOptions};
pub use metadata::{BackupCadence, BackupMetadata, BackupPriority, BackupStats, BackupStatus, BackupType};
pub use notifier::{Notifier, TracingNotifier};
pub use orchestrator::{CreatePlanRequest, ExecuteOptions, RecoveryOrchestrator};
pub use plan::{PlanStatus, RecoveryPlan, RecoveryStats, RecoveryStrategy, RollbackPoint, ValidationResult};
pub use probe::{SysinfoProbe, SystemProbe};
pub use retention::RetentionReport;
pub use scheduler::BackupScheduler;
pub use storage::{CloudStore, DirectoryCloudStore, StorageGateway};
pub use store::DocumentStore;

use thiserror::Error;

/// Backup error types
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Recovery conflict: {0}")]
    Conflict(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Check {check_id} failed: {message}")]
    CheckFailed { check_id: String, message: String },

    #[error("Maintenance script failed: {0}")]
    MaintenanceScript(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BackupError>;

impl BackupError {
    /// Machine-readable error code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            BackupError::NotFound(_) => "NOT_FOUND",
            BackupError::Precondition(_) => "PRECONDITION_FAILED",
            BackupError::Conflict(_) => "RECOVERY_CONFLICT",
            BackupError::Integrity(_) => "INTEGRITY_ERROR",
            BackupError::Storage(_) => "IO_ERROR",
            BackupError::CheckFailed { .. } => "CHECK_FAILED",
            BackupError::MaintenanceScript(_) => "MAINTENANCE_SCRIPT_FAILED",
            BackupError::Database(_) => "DATABASE_ERROR",
            BackupError::Compression(_) => "COMPRESSION_ERROR",
            BackupError::Encryption(_) => "ENCRYPTION_ERROR",
            BackupError::Serialization(_) => "SERIALIZATION_ERROR",
            BackupError::Timeout { .. } => "TIMEOUT",
            BackupError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP-equivalent status for route handlers sitting above this crate
    pub fn status_code(&self) -> u16 {
        match self {
            BackupError::NotFound(_) => 404,
            BackupError::Precondition(_) | BackupError::CheckFailed { .. } => 400,
            BackupError::Conflict(_) => 409,
            _ => 500,
        }
    }
}

impl From<std::io::Error> for BackupError {
    fn from(e: std::io::Error) -> Self {
        BackupError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(e: serde_json::Error) -> Self {
        BackupError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_map_to_status() {
        assert_eq!(BackupError::NotFound("b1".into()).status_code(), 404);
        assert_eq!(BackupError::Precondition("x".into()).status_code(), 400);
        assert_eq!(BackupError::Conflict("x".into()).status_code(), 409);
        assert_eq!(BackupError::Integrity("x".into()).status_code(), 500);
        assert_eq!(BackupError::Storage("x".into()).code(), "IO_ERROR");

        let err = BackupError::CheckFailed {
            check_id: "disk-space".into(),
            message: "low".into(),
        };
        assert_eq!(err.code(), "CHECK_FAILED");
        assert_eq!(err.to_string(), "Check disk-space failed: low");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: BackupError = io.into();
        assert!(matches!(err, BackupError::Storage(_)));
    }
}
