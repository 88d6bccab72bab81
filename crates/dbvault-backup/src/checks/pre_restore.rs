//! Safety gates run before a restore touches the target

use super::{CheckContext, CheckKind, CheckOutcome, RecoveryCheckHandler};
use crate::{BackupError, Result};
use async_trait::async_trait;
use tracing::warn;

/// The plan's backup exists and is completed
pub struct BackupExistsCheck;

#[async_trait]
impl RecoveryCheckHandler for BackupExistsCheck {
    fn id(&self) -> &'static str {
        "backup-exists"
    }

    fn name(&self) -> &'static str {
        "Backup exists"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::PreRestore
    }

    async fn execute(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
        match ctx.manager.get_backup_metadata(&ctx.plan.backup_id).await {
            Ok(backup) if backup.is_completed() => Ok(CheckOutcome::pass(format!(
                "Backup {} completed at {}",
                backup.id, backup.timestamp
            ))),
            Ok(backup) => Ok(CheckOutcome::fail(format!(
                "Backup {} is {}",
                backup.id, backup.status
            ))),
            Err(BackupError::NotFound(_)) => Ok(CheckOutcome::fail(format!(
                "Backup {} does not exist",
                ctx.plan.backup_id
            ))),
            Err(e) => Err(e),
        }
    }
}

/// Stored bytes still match the recorded checksum and decode.
///
/// For forced plans a checksum mismatch is recorded as an override instead of
/// failing; decode problems surface later during the restore itself.
pub struct BackupIntegrityCheck;

#[async_trait]
impl RecoveryCheckHandler for BackupIntegrityCheck {
    fn id(&self) -> &'static str {
        "backup-integrity"
    }

    fn name(&self) -> &'static str {
        "Backup integrity"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::PreRestore
    }

    async fn execute(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
        match ctx.manager.verify_integrity(&ctx.plan.backup_id).await {
            Ok(()) => Ok(CheckOutcome::pass("Checksum matches and payload decodes")),
            Err(BackupError::Integrity(message)) if ctx.plan.forced => {
                warn!(
                    "Plan {} is forced; proceeding despite integrity failure: {}",
                    ctx.plan.id, message
                );
                Ok(CheckOutcome::pass(format!("Overridden by force: {}", message)))
            }
            Err(e) => Ok(CheckOutcome::fail(e.to_string())),
        }
    }
}

/// The target database answers a health check
pub struct DbConnectivityCheck;

#[async_trait]
impl RecoveryCheckHandler for DbConnectivityCheck {
    fn id(&self) -> &'static str {
        "db-connectivity"
    }

    fn name(&self) -> &'static str {
        "Database connectivity"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::PreRestore
    }

    async fn execute(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
        if ctx.database.health_check().await {
            Ok(CheckOutcome::pass(format!("{} is reachable", ctx.plan.target_database)))
        } else {
            Ok(CheckOutcome::fail(format!("{} is unreachable", ctx.plan.target_database)))
        }
    }
}

/// Enough free space for the configured floor and the raw backup size
pub struct DiskSpaceCheck;

#[async_trait]
impl RecoveryCheckHandler for DiskSpaceCheck {
    fn id(&self) -> &'static str {
        "disk-space"
    }

    fn name(&self) -> &'static str {
        "Disk space"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::PreRestore
    }

    async fn execute(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
        let backup = ctx.manager.get_backup_metadata(&ctx.plan.backup_id).await?;
        let required = ctx.config.min_free_disk_bytes.max(backup.original_size);
        let available = ctx
            .probe
            .available_disk_space(ctx.manager.storage().root())
            .await?;

        if available >= required {
            Ok(CheckOutcome::pass(format!(
                "{} bytes available, {} required",
                available, required
            )))
        } else {
            Ok(CheckOutcome::fail(format!(
                "Only {} bytes available, {} required",
                available, required
            )))
        }
    }
}

/// Memory and CPU are below their thresholds
pub struct SystemResourcesCheck;

#[async_trait]
impl RecoveryCheckHandler for SystemResourcesCheck {
    fn id(&self) -> &'static str {
        "system-resources"
    }

    fn name(&self) -> &'static str {
        "System resources"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::PreRestore
    }

    async fn execute(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
        let memory = ctx.probe.memory_usage_percent().await?;
        let cpu = ctx.probe.cpu_usage_percent().await?;

        let mut problems = Vec::new();
        if memory > ctx.config.max_memory_percent {
            problems.push(format!(
                "memory at {:.1}% (limit {:.1}%)",
                memory, ctx.config.max_memory_percent
            ));
        }
        if cpu > ctx.config.max_cpu_percent {
            problems.push(format!("cpu at {:.1}% (limit {:.1}%)", cpu, ctx.config.max_cpu_percent));
        }

        if problems.is_empty() {
            Ok(CheckOutcome::pass(format!("memory {:.1}%, cpu {:.1}%", memory, cpu)))
        } else {
            Ok(CheckOutcome::fail(problems.join(", ")))
        }
    }
}
