//! The operational database being protected

use crate::{BackupError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Database collaborator used for dumps, restores and post-restore checks.
///
/// The dump format is opaque to this crate: whatever `dump` produces,
/// `apply` must accept.
#[async_trait]
pub trait Database: Send + Sync {
    /// Dump the given tables, or every table when `None`
    async fn dump(&self, tables: Option<&[String]>) -> Result<Vec<u8>>;

    /// Replace database content with a dump
    async fn apply(&self, content: &[u8]) -> Result<()>;

    /// Restore only `tables` out of a dump
    async fn apply_tables(&self, content: &[u8], tables: &[String]) -> Result<()> {
        let _ = (content, tables);
        Err(BackupError::Database(
            "Partial restore is not supported by this database".to_string(),
        ))
    }

    async fn query_table_names(&self) -> Result<Vec<String>>;

    /// Tables changed since `since`; every table when `None`
    async fn query_changed_tables(&self, since: Option<DateTime<Utc>>) -> Result<Vec<String>>;

    async fn run_maintenance_script(&self, script: &str) -> Result<()>;

    async fn health_check(&self) -> bool;

    async fn count_rows(&self, table: &str) -> Result<u64>;

    /// Problems reported by the engine's own consistency check
    async fn integrity_check(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn foreign_key_violations(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn active_connections(&self) -> Result<u64> {
        Ok(0)
    }
}
