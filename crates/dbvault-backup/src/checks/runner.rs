//! Runs a batch of check records against their registered handlers

use super::{CheckContext, CheckOutcome, CheckRegistry, CheckStatus, RecoveryCheck};
use crate::{BackupError, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct CheckRunner {
    registry: Arc<CheckRegistry>,
    timeout: Duration,
}

impl CheckRunner {
    pub fn new(registry: Arc<CheckRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    /// Run a single record, updating its status, result, error and timestamp.
    /// Returns the failure message when the check did not pass.
    async fn run_one(&self, check: &mut RecoveryCheck, ctx: &CheckContext<'_>) -> Option<String> {
        check.status = CheckStatus::Running;
        check.timestamp = Some(Utc::now());
        debug!("Running check {} for plan {}", check.id, ctx.plan.id);

        let outcome = match self.registry.get(&check.id) {
            None => Err(BackupError::Internal(format!("No handler registered for check {}", check.id))),
            Some(handler) => match tokio::time::timeout(self.timeout, handler.execute(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(BackupError::Timeout {
                    operation: format!("check {}", check.id),
                }),
            },
        };

        check.timestamp = Some(Utc::now());
        match outcome {
            Ok(CheckOutcome { passed: true, message }) => {
                check.status = CheckStatus::Passed;
                check.result = Some(message);
                check.error = None;
                None
            }
            Ok(CheckOutcome { passed: false, message }) => {
                check.status = CheckStatus::Failed;
                check.error = Some(message.clone());
                Some(message)
            }
            Err(e) => {
                let message = e.to_string();
                check.status = CheckStatus::Failed;
                check.error = Some(message.clone());
                Some(message)
            }
        }
    }

    /// Run pre-restore checks in order, stopping at the first failure
    pub async fn run_pre_restore(&self, checks: &mut [RecoveryCheck], ctx: &CheckContext<'_>) -> Result<()> {
        for check in checks.iter_mut() {
            if let Some(message) = self.run_one(check, ctx).await {
                warn!("Pre-restore check {} failed for plan {}: {}", check.id, ctx.plan.id, message);
                return Err(BackupError::CheckFailed {
                    check_id: check.id.clone(),
                    message,
                });
            }
        }
        info!("All {} pre-restore checks passed for plan {}", checks.len(), ctx.plan.id);
        Ok(())
    }

    /// Run every post-restore check. Failures are recorded and logged, never returned.
    /// Returns the number of failed checks.
    pub async fn run_post_restore(&self, checks: &mut [RecoveryCheck], ctx: &CheckContext<'_>) -> usize {
        let mut failed = 0;
        for check in checks.iter_mut() {
            if let Some(message) = self.run_one(check, ctx).await {
                warn!("Post-restore check {} failed for plan {}: {}", check.id, ctx.plan.id, message);
                failed += 1;
            }
        }
        if failed == 0 {
            info!("All {} post-restore checks passed for plan {}", checks.len(), ctx.plan.id);
        }
        failed
    }
}
