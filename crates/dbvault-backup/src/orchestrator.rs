//! Recovery orchestration
//!
//! A plan executes at most once, in these steps:
//!
//! 1. initialize
//! 2. pre-restore checks (fail-fast, when verification is enabled)
//! 3. rollback point (when rollback is enabled; skipped for dry runs)
//! 4. restore (progress only for dry runs)
//! 5. post-restore checks (never fatal, when verification is enabled)
//! 6. finalize
//!
//! The plan is persisted after every step. Only one plan executes at a time
//! per orchestrator; a second caller is rejected with `Conflict` unless it
//! passes `force`, in which case it waits for the running plan to finish.

use crate::{
    checks::{CheckContext, CheckKind, CheckRegistry, CheckRunner},
    config::RecoveryConfig,
    manager::{BackupManager, RestoreOptions},
    notifier,
    plan::{PlanStatus, Progress, RecoveryPlan, RecoveryStats, RecoveryStrategy, RollbackPoint, ValidationResult},
    probe::{SysinfoProbe, SystemProbe},
    store::DocumentStore,
    BackupError, Result,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Request for [`RecoveryOrchestrator::create_recovery_plan`]
#[derive(Debug, Clone, Default)]
pub struct CreatePlanRequest {
    pub backup_id: String,
    /// Defaults to the configured target
    pub target_database: Option<String>,
    pub strategy: Option<RecoveryStrategy>,
    /// Required for partial recoveries, ignored otherwise
    pub tables: Option<Vec<String>>,
    /// Skip backup verification at creation time
    pub force: bool,
}

/// Options for [`RecoveryOrchestrator::execute_recovery_plan`]
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Run every step except the mutation
    pub dry_run: bool,
    /// Wait for a running recovery instead of failing with a conflict
    pub force: bool,
    /// Restore retries; defaults to the configured value
    pub max_retries: Option<u32>,
    pub pre_restore_script: Option<String>,
    pub post_restore_script: Option<String>,
}

/// Builds and executes recovery plans
pub struct RecoveryOrchestrator {
    config: RecoveryConfig,
    manager: Arc<BackupManager>,
    plans: DocumentStore<RecoveryPlan>,
    runner: CheckRunner,
    probe: Arc<dyn SystemProbe>,
    /// Single-flight execution lock
    execution: Arc<Mutex<()>>,
}

impl RecoveryOrchestrator {
    /// Plans are stored next to backup metadata
    pub async fn new(
        config: RecoveryConfig,
        manager: Arc<BackupManager>,
        probe: Arc<dyn SystemProbe>,
        registry: CheckRegistry,
    ) -> Result<Self> {
        let plans =
            DocumentStore::open(manager.config().backup_dir.join("metadata"), "recovery_plans").await?;
        let runner = CheckRunner::new(Arc::new(registry), config.check_timeout());

        Ok(Self {
            config,
            manager,
            plans,
            runner,
            probe,
            execution: Arc::new(Mutex::new(())),
        })
    }

    /// Default checks and a sysinfo probe
    pub async fn with_defaults(config: RecoveryConfig, manager: Arc<BackupManager>) -> Result<Self> {
        let probe = SysinfoProbe::new().await?;
        Self::new(config, manager, Arc::new(probe), CheckRegistry::with_defaults()).await
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Whether a plan is executing right now
    pub fn is_recovery_in_progress(&self) -> bool {
        self.execution.try_lock().is_err()
    }

    pub async fn create_recovery_plan(&self, request: CreatePlanRequest) -> Result<RecoveryPlan> {
        let backup = self.manager.get_backup_metadata(&request.backup_id).await?;
        if !backup.is_completed() {
            return Err(BackupError::Precondition(format!(
                "Backup {} is {}; only completed backups can be restored",
                backup.id, backup.status
            )));
        }

        if request.force {
            warn!("Creating forced recovery plan for backup {} without verification", backup.id);
        } else if !self.manager.verify_backup(&backup.id).await {
            return Err(BackupError::Integrity(format!(
                "Backup {} failed verification",
                backup.id
            )));
        }

        let strategy = request.strategy.unwrap_or_default();
        let tables = match strategy {
            RecoveryStrategy::Partial => {
                let tables = request.tables.filter(|t| !t.is_empty()).ok_or_else(|| {
                    BackupError::Precondition("A partial recovery must name at least one table".to_string())
                })?;
                let unknown: Vec<&str> = tables
                    .iter()
                    .filter(|t| !backup.tables.contains(t))
                    .map(String::as_str)
                    .collect();
                if !unknown.is_empty() {
                    return Err(BackupError::Precondition(format!(
                        "Tables not in backup {}: {}",
                        backup.id,
                        unknown.join(", ")
                    )));
                }
                tables
            }
            RecoveryStrategy::Full | RecoveryStrategy::PointInTime => backup.tables.clone(),
        };

        let registry = self.runner.registry();
        let plan = RecoveryPlan {
            id: format!("recovery-{}", Uuid::new_v4()),
            backup_id: backup.id.clone(),
            target_database: request
                .target_database
                .unwrap_or_else(|| self.config.default_target_database.clone()),
            strategy,
            status: PlanStatus::Pending,
            tables,
            pre_restore_checks: registry.catalog(CheckKind::PreRestore),
            post_restore_checks: registry.catalog(CheckKind::PostRestore),
            rollback_point: None,
            progress: Progress::new(self.config.verification_enabled, self.config.rollback_enabled),
            forced: request.force,
            dry_run: false,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            actual_duration_ms: None,
            error: None,
            rollback_error: None,
        };
        self.plans.put(&plan).await?;

        info!(
            "Created recovery plan {} for backup {} ({:?}, {} tables, {} steps)",
            plan.id,
            plan.backup_id,
            plan.strategy,
            plan.tables.len(),
            plan.progress.total_steps
        );
        notifier::notify(
            self.manager.notifier().as_ref(),
            "recovery.plan_created",
            json!({ "plan_id": plan.id, "backup_id": plan.backup_id, "forced": plan.forced }),
        )
        .await;

        Ok(plan)
    }

    /// Take the single-flight lock, then the maintenance lock
    async fn acquire(&self, force: bool, purpose: &str) -> Result<(OwnedMutexGuard<()>, OwnedMutexGuard<()>)> {
        let flight = match self.execution.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) if force => {
                warn!("Another recovery is running; forced {} waits for it", purpose);
                self.execution.clone().lock_owned().await
            }
            Err(_) => {
                return Err(BackupError::Conflict(format!(
                    "Another recovery is in progress; {} rejected",
                    purpose
                )))
            }
        };
        let maintenance = self.manager.maintenance_lock().lock_owned().await;
        Ok((flight, maintenance))
    }

    pub async fn execute_recovery_plan(&self, plan_id: &str, options: ExecuteOptions) -> Result<RecoveryPlan> {
        let _locks = self.acquire(options.force, &format!("execution of {}", plan_id)).await?;

        let mut plan = self.plans.load(plan_id).await?;
        if plan.status != PlanStatus::Pending {
            return Err(BackupError::Precondition(format!(
                "Recovery plan {} is {}; create a new plan to retry",
                plan.id, plan.status
            )));
        }

        plan.transition(PlanStatus::InProgress)?;
        plan.start_time = Some(Utc::now());
        plan.dry_run = options.dry_run;
        plan.progress.start("initialize");
        self.plans.put(&plan).await?;

        info!(
            "Executing recovery plan {} (backup {}, dry run: {})",
            plan.id, plan.backup_id, options.dry_run
        );
        notifier::notify(
            self.manager.notifier().as_ref(),
            "recovery.started",
            json!({ "plan_id": plan.id, "backup_id": plan.backup_id, "dry_run": options.dry_run }),
        )
        .await;

        let outcome = match self.run_plan(&mut plan, &options).await {
            Ok(()) => self.mark_completed(&mut plan).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                info!(
                    "Recovery plan {} completed in {}ms",
                    plan.id,
                    plan.actual_duration_ms.unwrap_or_default()
                );
                notifier::notify(
                    self.manager.notifier().as_ref(),
                    "recovery.completed",
                    json!({
                        "plan_id": plan.id,
                        "backup_id": plan.backup_id,
                        "duration_ms": plan.actual_duration_ms,
                    }),
                )
                .await;
                Ok(plan)
            }
            Err(e) => {
                self.handle_failure(&mut plan, &e).await;
                Err(e)
            }
        }
    }

    async fn run_plan(&self, plan: &mut RecoveryPlan, options: &ExecuteOptions) -> Result<()> {
        let database = self.manager.database();

        let backup = self.manager.get_backup_metadata(&plan.backup_id).await?;
        if !backup.is_completed() {
            return Err(BackupError::Precondition(format!(
                "Backup {} is {}",
                backup.id, backup.status
            )));
        }
        self.complete_step(plan, "initialize").await?;

        if self.config.verification_enabled {
            plan.progress.start("pre_restore_checks");
            let mut checks = std::mem::take(&mut plan.pre_restore_checks);
            let outcome = {
                let ctx = CheckContext {
                    plan: &*plan,
                    manager: &self.manager,
                    database: database.as_ref(),
                    probe: self.probe.as_ref(),
                    config: &self.config,
                };
                self.runner.run_pre_restore(&mut checks, &ctx).await
            };
            plan.pre_restore_checks = checks;
            outcome?;
            self.complete_step(plan, "pre_restore_checks").await?;
        }

        if self.config.rollback_enabled {
            plan.progress.start("rollback_point");
            if options.dry_run {
                debug!("Dry run: no rollback point for plan {}", plan.id);
            } else {
                let snapshot = self.manager.create_rollback_snapshot(&plan.target_database).await?;
                info!("Rollback point {} captured for plan {}", snapshot.id, plan.id);
                plan.rollback_point = Some(RollbackPoint {
                    backup_id: snapshot.id,
                    created_at: snapshot.timestamp,
                });
            }
            self.complete_step(plan, "rollback_point").await?;
        }

        plan.progress.start("restore");
        if options.dry_run {
            info!("Dry run: skipping restore of backup {} into {}", plan.backup_id, plan.target_database);
        } else {
            self.restore_with_retries(plan, options).await?;
        }
        self.complete_step(plan, "restore").await?;

        if self.config.verification_enabled {
            plan.progress.start("post_restore_checks");
            let mut checks = std::mem::take(&mut plan.post_restore_checks);
            let failed = {
                let ctx = CheckContext {
                    plan: &*plan,
                    manager: &self.manager,
                    database: database.as_ref(),
                    probe: self.probe.as_ref(),
                    config: &self.config,
                };
                self.runner.run_post_restore(&mut checks, &ctx).await
            };
            plan.post_restore_checks = checks;
            if failed > 0 {
                warn!("Plan {} restored with {} failed post-restore checks", plan.id, failed);
            }
            self.complete_step(plan, "post_restore_checks").await?;
        }

        plan.progress.start("finalize");
        plan.progress.advance("finalize");
        Ok(())
    }

    /// The in-memory plan only changes once the completed state is stored
    async fn mark_completed(&self, plan: &mut RecoveryPlan) -> Result<()> {
        let mut completed = plan.clone();
        completed.transition(PlanStatus::Completed)?;
        let now = Utc::now();
        completed.end_time = Some(now);
        completed.actual_duration_ms = completed.elapsed_ms(now);
        self.plans.put(&completed).await?;
        *plan = completed;
        Ok(())
    }

    async fn complete_step(&self, plan: &mut RecoveryPlan, step: &str) -> Result<()> {
        plan.progress.advance(step);
        debug!(
            "Plan {}: {} done ({}%)",
            plan.id, step, plan.progress.percentage
        );
        self.plans.put(plan).await
    }

    async fn restore_with_retries(&self, plan: &RecoveryPlan, options: &ExecuteOptions) -> Result<()> {
        let max_retries = options.max_retries.unwrap_or(self.config.default_max_retries);
        let restore_options = RestoreOptions {
            force: plan.forced,
            pre_restore_script: options.pre_restore_script.clone(),
            post_restore_script: options.post_restore_script.clone(),
            tables: (plan.strategy == RecoveryStrategy::Partial).then(|| plan.tables.clone()),
            apply_timeout: Some(self.config.apply_timeout()),
        };

        let mut attempt = 0;
        loop {
            match self
                .manager
                .restore_database(&plan.backup_id, restore_options.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max_retries && is_retryable(&e) => {
                    attempt += 1;
                    let backoff = self.config.retry_backoff() * attempt;
                    warn!(
                        "Restore attempt {} for plan {} failed: {}; retrying in {:?}",
                        attempt, plan.id, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Persist the failure, then attempt auto-rollback. The caller still returns the original error.
    async fn handle_failure(&self, plan: &mut RecoveryPlan, cause: &BackupError) {
        error!("Recovery plan {} failed: {}", plan.id, cause);

        if let Err(e) = plan.transition(PlanStatus::Failed) {
            error!("Plan {} could not be marked failed: {}", plan.id, e);
        }
        let now = Utc::now();
        plan.error = Some(cause.to_string());
        plan.end_time = Some(now);
        plan.actual_duration_ms = plan.elapsed_ms(now);
        if let Err(e) = self.plans.put(plan).await {
            error!("Failed to persist failed state of plan {}: {}", plan.id, e);
        }

        notifier::notify(
            self.manager.notifier().as_ref(),
            "recovery.failed",
            json!({ "plan_id": plan.id, "error": cause.to_string() }),
        )
        .await;

        if self.config.auto_rollback && plan.rollback_point.is_some() {
            info!("Auto-rolling back plan {}", plan.id);
            if let Err(e) = self.rollback_locked(plan).await {
                error!("Rollback of plan {} failed: {}", plan.id, e);
                plan.rollback_error = Some(e.to_string());
                if let Err(e) = self.plans.put(plan).await {
                    error!("Failed to persist rollback error of plan {}: {}", plan.id, e);
                }
            }
        }
    }

    /// Restore the target to a failed plan's rollback point
    pub async fn rollback_recovery(&self, plan_id: &str) -> Result<RecoveryPlan> {
        let _locks = self.acquire(false, &format!("rollback of {}", plan_id)).await?;
        let mut plan = self.plans.load(plan_id).await?;
        self.rollback_locked(&mut plan).await?;
        Ok(plan)
    }

    async fn rollback_locked(&self, plan: &mut RecoveryPlan) -> Result<()> {
        if plan.status != PlanStatus::Failed {
            return Err(BackupError::Precondition(format!(
                "Recovery plan {} is {}; only failed plans can be rolled back",
                plan.id, plan.status
            )));
        }
        let point = plan.rollback_point.clone().ok_or_else(|| {
            BackupError::Precondition(format!("Recovery plan {} has no rollback point", plan.id))
        })?;

        info!(
            "Rolling back {} to snapshot {} taken at {}",
            plan.target_database, point.backup_id, point.created_at
        );

        self.manager
            .restore_database(
                &point.backup_id,
                RestoreOptions {
                    apply_timeout: Some(self.config.apply_timeout()),
                    ..Default::default()
                },
            )
            .await?;

        plan.transition(PlanStatus::RolledBack)?;
        let now = Utc::now();
        plan.end_time = Some(now);
        plan.actual_duration_ms = plan.elapsed_ms(now);
        plan.rollback_error = None;
        self.plans.put(plan).await?;

        info!("Recovery plan {} rolled back", plan.id);
        notifier::notify(
            self.manager.notifier().as_ref(),
            "recovery.rolled_back",
            json!({ "plan_id": plan.id, "rollback_backup_id": point.backup_id }),
        )
        .await;
        Ok(())
    }

    /// Non-mutating readiness report
    pub async fn validate_recovery_plan(&self, plan_id: &str) -> Result<ValidationResult> {
        let plan = self.plans.load(plan_id).await?;
        let database = self.manager.database();
        let mut result = ValidationResult::default();

        if plan.status != PlanStatus::Pending {
            result
                .issues
                .push(format!("Plan is {} and cannot be executed", plan.status));
        }

        match self.manager.get_backup_metadata(&plan.backup_id).await {
            Ok(backup) if !backup.is_completed() => result
                .issues
                .push(format!("Backup {} is {}", backup.id, backup.status)),
            Ok(backup) => {
                if let Err(e) = self.manager.verify_integrity(&backup.id).await {
                    let finding = format!("Backup {} failed verification: {}", backup.id, e);
                    if plan.forced {
                        result.warnings.push(finding);
                    } else {
                        result.issues.push(finding);
                    }
                }
                let missing: Vec<&str> = plan
                    .tables
                    .iter()
                    .filter(|t| !backup.tables.contains(t))
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    result
                        .issues
                        .push(format!("Tables not in backup: {}", missing.join(", ")));
                }
            }
            Err(BackupError::NotFound(_)) => result
                .issues
                .push(format!("Backup {} does not exist", plan.backup_id)),
            Err(e) => result.issues.push(format!("Backup lookup failed: {}", e)),
        }

        let (healthy, connections, disk) = futures::join!(
            database.health_check(),
            database.active_connections(),
            self.probe.available_disk_space(self.manager.storage().root()),
        );

        if !healthy {
            result
                .issues
                .push(format!("Database {} is unreachable", plan.target_database));
        }

        match connections {
            Ok(count) if count > self.config.max_active_connections => result.warnings.push(format!(
                "{} active connections (threshold {})",
                count, self.config.max_active_connections
            )),
            Ok(_) => {}
            Err(e) => result
                .warnings
                .push(format!("Could not count active connections: {}", e)),
        }

        match disk {
            Ok(available) if available < self.config.min_free_disk_bytes => result.warnings.push(format!(
                "Low disk space: {} bytes available, {} recommended",
                available, self.config.min_free_disk_bytes
            )),
            Ok(_) => {}
            Err(e) => result.warnings.push(format!("Could not read disk space: {}", e)),
        }

        result.valid = result.issues.is_empty();
        Ok(result)
    }

    pub async fn get_recovery_plan(&self, plan_id: &str) -> Result<RecoveryPlan> {
        self.plans.load(plan_id).await
    }

    /// All plans, newest first
    pub async fn list_recovery_plans(&self) -> Result<Vec<RecoveryPlan>> {
        let mut plans = self.plans.list().await?;
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(plans)
    }

    /// Delete a plan and its rollback snapshot. Refused while the plan runs.
    pub async fn delete_recovery_plan(&self, plan_id: &str) -> Result<()> {
        let plan = self.plans.load(plan_id).await?;
        if plan.status == PlanStatus::InProgress {
            return Err(BackupError::Precondition(format!(
                "Recovery plan {} is in progress and cannot be deleted",
                plan.id
            )));
        }

        if let Some(point) = &plan.rollback_point {
            match self.manager.delete_backup(&point.backup_id).await {
                Ok(()) | Err(BackupError::NotFound(_)) => {}
                Err(e) => warn!(
                    "Could not delete rollback snapshot {} of plan {}: {}",
                    point.backup_id, plan.id, e
                ),
            }
        }

        self.plans.delete(plan_id).await?;
        info!("Deleted recovery plan {}", plan_id);
        Ok(())
    }

    pub async fn get_recovery_stats(&self) -> Result<RecoveryStats> {
        let plans = self.plans.list().await?;
        Ok(RecoveryStats::from_plans(&plans))
    }
}

/// Failures worth another restore attempt
fn is_retryable(error: &BackupError) -> bool {
    matches!(
        error,
        BackupError::Storage(_) | BackupError::Database(_) | BackupError::Timeout { .. }
    )
}
