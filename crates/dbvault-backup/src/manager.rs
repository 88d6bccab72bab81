//! Backup manager implementation

use crate::{
    codec::{self, Codec},
    config::BackupConfig,
    database::Database,
    metadata::{BackupCadence, BackupMetadata, BackupPriority, BackupStats, BackupStatus, BackupType},
    notifier::{self, Notifier},
    retention::{self, RetentionReport},
    scheduler,
    storage::{CloudStore, StorageGateway},
    store::DocumentStore,
    BackupError, Result,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Options for [`BackupManager::restore_database`]
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Restore even if the backup is not marked completed
    pub force: bool,
    pub pre_restore_script: Option<String>,
    pub post_restore_script: Option<String>,
    /// Restore only these tables
    pub tables: Option<Vec<String>>,
    /// Overrides the configured apply timeout
    pub apply_timeout: Option<Duration>,
}

/// Backup manager for coordinating backup operations
pub struct BackupManager {
    config: BackupConfig,
    database: Arc<dyn Database>,
    storage: StorageGateway,
    store: DocumentStore<BackupMetadata>,
    notifier: Arc<dyn Notifier>,
    /// Held by retention cleanup and by recovery execution
    maintenance: Arc<Mutex<()>>,
}

impl BackupManager {
    /// Create a new backup manager.
    ///
    /// Payloads go to `<backup_dir>/data`, metadata to `<backup_dir>/metadata/backups`.
    pub async fn new(
        config: BackupConfig,
        database: Arc<dyn Database>,
        cloud: Option<Arc<dyn CloudStore>>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        if config.cloud_enabled && cloud.is_none() {
            return Err(BackupError::Precondition(
                "Cloud upload is enabled but no cloud store was provided".to_string(),
            ));
        }

        let storage = StorageGateway::new(config.backup_dir.join("data"), cloud).await?;
        let store = DocumentStore::open(config.backup_dir.join("metadata"), "backups").await?;

        info!(
            "Backup manager ready at {:?} (compression: {:?}, encrypted: {}, cloud: {})",
            config.backup_dir,
            config.compression,
            config.encryption.is_some(),
            config.cloud_enabled
        );

        Ok(Self {
            config,
            database,
            storage,
            store,
            notifier,
            maintenance: Arc::new(Mutex::new(())),
        })
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn database(&self) -> Arc<dyn Database> {
        self.database.clone()
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    pub fn storage(&self) -> &StorageGateway {
        &self.storage
    }

    /// Lock shared by retention cleanup, scheduled backups and recovery execution.
    /// Rollback snapshots are taken by the lock holder and do not take it again.
    pub fn maintenance_lock(&self) -> Arc<Mutex<()>> {
        self.maintenance.clone()
    }

    /// Create a full backup of every table
    pub async fn create_full_backup(&self, priority: BackupPriority) -> Result<BackupMetadata> {
        self.create_manual_backup(BackupType::Full, priority).await
    }

    /// Create a backup of the tables changed since the most recent completed backup
    pub async fn create_incremental_backup(&self, priority: BackupPriority) -> Result<BackupMetadata> {
        self.create_manual_backup(BackupType::Incremental, priority).await
    }

    /// Create a backup of the tables changed since the most recent completed full backup
    pub async fn create_differential_backup(&self, priority: BackupPriority) -> Result<BackupMetadata> {
        self.create_manual_backup(BackupType::Differential, priority).await
    }

    async fn create_manual_backup(&self, backup_type: BackupType, priority: BackupPriority) -> Result<BackupMetadata> {
        let metadata = self
            .create_backup(backup_type, priority, Some(self.config.default_cadence))
            .await?;
        self.try_cleanup_after_backup().await;
        Ok(metadata)
    }

    /// Full backup counted against the given retention cadence.
    ///
    /// Holds the maintenance lock for the dump and the cleanup that follows, so
    /// a scheduled run waits for any recovery in progress to finish first.
    pub async fn create_scheduled_backup(&self, cadence: BackupCadence) -> Result<BackupMetadata> {
        let _guard = self.maintenance.lock().await;
        let metadata = self
            .create_backup(BackupType::Full, BackupPriority::Normal, Some(cadence))
            .await?;
        if let Err(e) = self.cleanup_locked().await {
            warn!("Retention cleanup after scheduled {} backup failed: {}", cadence, e);
        }
        Ok(metadata)
    }

    /// Full backup of the current database state, excluded from retention
    pub async fn create_rollback_snapshot(&self, target_database: &str) -> Result<BackupMetadata> {
        info!("Capturing rollback snapshot of {}", target_database);
        self.create_backup(BackupType::Full, BackupPriority::Critical, None)
            .await
    }

    fn generate_id(backup_type: BackupType, cadence: Option<BackupCadence>) -> String {
        let prefix = match cadence {
            Some(_) => format!("backup-{}", backup_type),
            None => "rollback".to_string(),
        };
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}",
            prefix,
            Utc::now().format("%Y%m%dT%H%M%S"),
            &suffix[..8]
        )
    }

    async fn create_backup(
        &self,
        backup_type: BackupType,
        priority: BackupPriority,
        cadence: Option<BackupCadence>,
    ) -> Result<BackupMetadata> {
        let codec = Codec::new(self.config.compression, self.config.encryption.clone());
        let mut metadata = BackupMetadata::pending(
            Self::generate_id(backup_type, cadence),
            backup_type,
            priority,
            cadence,
            codec.compression(),
            codec.encryption_info(),
        );
        self.store.put(&metadata).await?;

        info!("Starting {} backup: {}", backup_type, metadata.id);
        let started = Instant::now();

        if let Err(e) = self.run_backup(&mut metadata, &codec, started).await {
            error!("Backup {} failed: {}", metadata.id, e);
            self.record_failure(&mut metadata, &e, started).await;
            notifier::notify(
                self.notifier.as_ref(),
                "backup.failed",
                json!({ "backup_id": metadata.id, "type": backup_type, "error": e.to_string() }),
            )
            .await;
            return Err(e);
        }

        info!(
            "{} backup completed: {} ({} tables, {} bytes stored, {} raw) in {}ms",
            backup_type,
            metadata.id,
            metadata.tables.len(),
            metadata.size,
            metadata.original_size,
            metadata.duration_ms
        );

        notifier::notify(
            self.notifier.as_ref(),
            "backup.completed",
            json!({
                "backup_id": metadata.id,
                "type": backup_type,
                "size": metadata.size,
                "checksum": metadata.checksum,
                "tables": metadata.tables,
            }),
        )
        .await;

        Ok(metadata)
    }

    async fn run_backup(&self, metadata: &mut BackupMetadata, codec: &Codec, started: Instant) -> Result<()> {
        metadata.transition(BackupStatus::InProgress)?;
        self.store.put(metadata).await?;

        let (tables, dump) = match metadata.backup_type {
            BackupType::Full => {
                let tables = self.database.query_table_names().await?;
                let dump = self.database.dump(None).await?;
                (tables, dump)
            }
            BackupType::Incremental | BackupType::Differential => {
                let parent = self.find_parent(metadata.backup_type).await?;
                let since = parent.as_ref().map(|p| p.timestamp);
                let changed = self.database.query_changed_tables(since).await?;
                debug!(
                    "Backup {}: {} changed tables since {:?}",
                    metadata.id,
                    changed.len(),
                    since
                );
                metadata.parent_backup_id = parent.map(|p| p.id);
                let dump = self.database.dump(Some(&changed)).await?;
                (changed, dump)
            }
        };

        let mut row_counts = BTreeMap::new();
        for table in &tables {
            row_counts.insert(table.clone(), self.database.count_rows(table).await?);
        }

        let stored = codec.encode(&dump)?;
        let path = format!("{}.dump{}", metadata.id, codec.file_suffix());
        self.storage.write_local(&path, &stored).await?;

        metadata.tables = tables;
        metadata.row_counts = row_counts;
        metadata.original_size = dump.len() as u64;
        metadata.size = stored.len() as u64;
        metadata.location.local = Some(path);
        self.store.put(metadata).await?;

        let checksum = codec::checksum(&stored);

        if self.config.cloud_enabled {
            let reference = self.storage.upload_cloud(&metadata.id, &stored).await?;
            metadata.location.cloud = Some(reference);
        }

        metadata.duration_ms = started.elapsed().as_millis() as u64;
        metadata.complete(checksum)?;
        self.store.put(metadata).await?;

        Ok(())
    }

    /// Best effort: drop partial payloads and persist the failed state
    async fn record_failure(&self, metadata: &mut BackupMetadata, cause: &BackupError, started: Instant) {
        if let Some(path) = metadata.location.local.take() {
            if let Err(e) = self.storage.delete(&path).await {
                warn!("Failed to remove partial payload {}: {}", path, e);
            }
        }
        if let Some(reference) = metadata.location.cloud.take() {
            if let Err(e) = self.storage.delete_cloud(&reference, &metadata.id).await {
                warn!("Failed to remove cloud object {}: {}", reference, e);
            }
        }

        metadata.duration_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = metadata.fail(cause.to_string()) {
            warn!("Backup {} could not be marked failed: {}", metadata.id, e);
        }
        if let Err(e) = self.store.put(metadata).await {
            error!("Failed to persist failed state of backup {}: {}", metadata.id, e);
        }
    }

    /// Parent for incremental (latest completed) or differential (latest completed full)
    async fn find_parent(&self, backup_type: BackupType) -> Result<Option<BackupMetadata>> {
        let backups = self.list_backups().await?;
        Ok(backups.into_iter().find(|b| {
            b.is_completed()
                && !b.is_rollback_snapshot()
                && (backup_type == BackupType::Incremental || b.backup_type == BackupType::Full)
        }))
    }

    /// Load and decode a backup, then apply it to the database.
    ///
    /// Rollback on failure is the caller's concern.
    pub async fn restore_database(&self, backup_id: &str, options: RestoreOptions) -> Result<()> {
        let metadata = self.store.load(backup_id).await?;

        if !metadata.is_completed() {
            if !options.force {
                return Err(BackupError::Precondition(format!(
                    "Backup {} is {} and cannot be restored",
                    backup_id, metadata.status
                )));
            }
            warn!("Forcing restore of backup {} in status {}", backup_id, metadata.status);
        }

        info!("Restoring database from backup {}", backup_id);

        let stored = self.fetch_stored_bytes(&metadata).await?;
        let content = Codec::for_backup(&metadata, self.config.encryption.as_ref())?.decode(&stored)?;

        if let Some(script) = &options.pre_restore_script {
            self.database
                .run_maintenance_script(script)
                .await
                .map_err(|e| BackupError::MaintenanceScript(format!("pre-restore script: {}", e)))?;
        }

        let apply = async {
            match &options.tables {
                Some(tables) => self.database.apply_tables(&content, tables).await,
                None => self.database.apply(&content).await,
            }
        };
        let apply_timeout = options.apply_timeout.unwrap_or_else(|| self.config.apply_timeout());
        match tokio::time::timeout(apply_timeout, apply).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BackupError::Timeout {
                    operation: format!("apply backup {}", backup_id),
                })
            }
        }

        if let Some(script) = &options.post_restore_script {
            self.database
                .run_maintenance_script(script)
                .await
                .map_err(|e| BackupError::MaintenanceScript(format!("post-restore script: {}", e)))?;
        }

        info!("Database restored from backup {} ({} bytes)", backup_id, content.len());
        Ok(())
    }

    async fn fetch_stored_bytes(&self, metadata: &BackupMetadata) -> Result<Vec<u8>> {
        let local_error = match &metadata.location.local {
            Some(path) => match self.storage.read_local(path).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => Some(e),
            },
            None => None,
        };

        match (&metadata.location.cloud, local_error) {
            (Some(reference), local_error) => {
                if let Some(e) = local_error {
                    warn!("Local copy of {} unavailable ({}), falling back to cloud", metadata.id, e);
                }
                self.storage.download_cloud(reference, &metadata.id).await
            }
            (None, Some(e)) => Err(e),
            (None, None) => Err(BackupError::Storage(format!(
                "Backup {} has no stored payload",
                metadata.id
            ))),
        }
    }

    /// Checksum and decode check. Errors with `Integrity` on a checksum mismatch.
    pub async fn verify_integrity(&self, backup_id: &str) -> Result<()> {
        let metadata = self.store.load(backup_id).await?;
        let expected = match (&metadata.status, &metadata.checksum) {
            (BackupStatus::Completed, Some(checksum)) => checksum.clone(),
            _ => {
                return Err(BackupError::Precondition(format!(
                    "Backup {} is {} and has no checksum",
                    backup_id, metadata.status
                )))
            }
        };

        let stored = self.fetch_stored_bytes(&metadata).await?;
        let actual = codec::checksum(&stored);
        if actual != expected {
            return Err(BackupError::Integrity(format!(
                "Checksum mismatch for backup {}: expected {}, got {}",
                backup_id, expected, actual
            )));
        }

        Codec::for_backup(&metadata, self.config.encryption.as_ref())?.decode(&stored)?;
        Ok(())
    }

    /// Verify a backup. Never fails: any problem yields `false` and is logged.
    pub async fn verify_backup(&self, backup_id: &str) -> bool {
        let verified = match self.verify_integrity(backup_id).await {
            Ok(()) => {
                info!("Backup {} verified", backup_id);
                true
            }
            Err(e) => {
                warn!("Backup {} failed verification: {}", backup_id, e);
                false
            }
        };

        let recorded = self
            .store
            .update(backup_id, |metadata| {
                metadata.verified = Some(verified);
                metadata.verified_at = Some(Utc::now());
                Ok(())
            })
            .await;
        if let Err(e) = recorded {
            debug!("Could not record verification of {}: {}", backup_id, e);
        }

        verified
    }

    pub async fn get_backup_metadata(&self, backup_id: &str) -> Result<BackupMetadata> {
        self.store.load(backup_id).await
    }

    /// All backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<BackupMetadata>> {
        let mut backups = self.store.list().await?;
        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(backups)
    }

    /// Remove the local payload, the cloud object and the metadata record
    pub async fn delete_backup(&self, backup_id: &str) -> Result<()> {
        let metadata = self.store.load(backup_id).await?;

        if let Some(path) = &metadata.location.local {
            if !self.storage.delete(path).await? {
                debug!("Local payload {} was already gone", path);
            }
        }
        if let Some(reference) = &metadata.location.cloud {
            self.storage.delete_cloud(reference, backup_id).await?;
        }
        self.store.delete(backup_id).await?;

        info!("Deleted backup {}", backup_id);
        notifier::notify(
            self.notifier.as_ref(),
            "backup.deleted",
            json!({ "backup_id": backup_id }),
        )
        .await;
        Ok(())
    }

    pub async fn get_backup_stats(&self) -> Result<BackupStats> {
        let backups = self.list_backups().await?;
        Ok(BackupStats::from_backups(&backups, self.next_scheduled_backup(Utc::now())))
    }

    pub fn next_scheduled_backup(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        scheduler::next_scheduled_run(&self.config.schedule, now)
    }

    /// Apply the retention policy, waiting for any running recovery to finish
    pub async fn cleanup_old_backups(&self) -> Result<RetentionReport> {
        let _guard = self.maintenance.lock().await;
        self.cleanup_locked().await
    }

    async fn try_cleanup_after_backup(&self) {
        let _guard = match self.maintenance.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Skipping retention cleanup while maintenance is in progress");
                return;
            }
        };
        if let Err(e) = self.cleanup_locked().await {
            warn!("Retention cleanup failed: {}", e);
        }
    }

    async fn cleanup_locked(&self) -> Result<RetentionReport> {
        let backups = self.list_backups().await?;
        let plan = retention::plan_retention(&backups, &self.config.retention);

        let mut report = RetentionReport {
            kept: plan.keep.len(),
            ..Default::default()
        };

        for backup_id in plan.delete {
            debug!("Deleting backup per retention policy: {}", backup_id);
            match self.delete_backup(&backup_id).await {
                Ok(()) => report.deleted.push(backup_id),
                Err(e) => {
                    warn!("Retention could not delete {}: {}", backup_id, e);
                    report.failed.push((backup_id, e.to_string()));
                }
            }
        }

        if !report.deleted.is_empty() {
            info!("Deleted {} backups per retention policy", report.deleted.len());
        }
        Ok(report)
    }
}
