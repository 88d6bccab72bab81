//! Recovery plan structures

use crate::{checks::RecoveryCheck, store::Document, BackupError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Restore every table in the backup
    #[default]
    Full,
    /// Restore a subset of the backup's tables
    Partial,
    /// Restore the backup closest to a point in time; applied as a full restore of that backup
    PointInTime,
}

/// Recovery plan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl PlanStatus {
    /// pending → in_progress → {completed, failed}; failed → rolled_back.
    pub fn can_transition_to(self, next: PlanStatus) -> bool {
        matches!(
            (self, next),
            (PlanStatus::Pending, PlanStatus::InProgress)
                | (PlanStatus::InProgress, PlanStatus::Completed)
                | (PlanStatus::InProgress, PlanStatus::Failed)
                | (PlanStatus::Failed, PlanStatus::RolledBack)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PlanStatus::Completed | PlanStatus::Failed | PlanStatus::RolledBack)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Execution progress
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    pub total_steps: u32,
    pub completed_steps: u32,
    pub current_step: Option<String>,
    /// `round(completed_steps / total_steps * 100)`, never decreasing
    pub percentage: u8,
}

impl Progress {
    /// initialize/execute/finalize, plus both check batches and the rollback point when enabled
    pub fn new(verification_enabled: bool, rollback_enabled: bool) -> Self {
        let mut total_steps = 3;
        if verification_enabled {
            total_steps += 2;
        }
        if rollback_enabled {
            total_steps += 1;
        }
        Self {
            total_steps,
            ..Default::default()
        }
    }

    pub fn start(&mut self, step: &str) {
        self.current_step = Some(step.to_string());
    }

    /// Record `step` as done
    pub fn advance(&mut self, step: &str) {
        self.completed_steps = (self.completed_steps + 1).min(self.total_steps);
        self.current_step = Some(step.to_string());

        let percentage = if self.total_steps == 0 {
            100
        } else {
            (self.completed_steps as f64 / self.total_steps as f64 * 100.0).round() as u8
        };
        self.percentage = self.percentage.max(percentage);
    }
}

/// Snapshot of the target captured before a restore mutates it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackPoint {
    /// Rollback snapshot backup id
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
}

/// A checked restore of one backup into one target database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub id: String,
    pub backup_id: String,
    pub target_database: String,
    pub strategy: RecoveryStrategy,
    pub status: PlanStatus,
    /// Tables this plan restores
    pub tables: Vec<String>,
    pub pre_restore_checks: Vec<RecoveryCheck>,
    pub post_restore_checks: Vec<RecoveryCheck>,
    pub rollback_point: Option<RollbackPoint>,
    pub progress: Progress,
    /// Created with `force`, bypassing backup verification
    #[serde(default)]
    pub forced: bool,
    #[serde(default)]
    pub dry_run: bool,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub actual_duration_ms: Option<u64>,
    pub error: Option<String>,
    /// Failure of an attempted rollback, kept apart from `error`
    pub rollback_error: Option<String>,
}

impl Document for RecoveryPlan {
    fn id(&self) -> &str {
        &self.id
    }
}

impl RecoveryPlan {
    pub fn transition(&mut self, next: PlanStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(BackupError::Precondition(format!(
                "Recovery plan {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Milliseconds since `start_time`
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> Option<u64> {
        self.start_time
            .map(|start| (now - start).num_milliseconds().max(0) as u64)
    }
}

/// Result of [`crate::RecoveryOrchestrator::validate_recovery_plan`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    /// Problems that make execution unsafe
    pub issues: Vec<String>,
    /// Advisory findings
    pub warnings: Vec<String>,
}

/// Aggregate recovery statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryStats {
    pub total_plans: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub rolled_back: usize,
    /// completed / finished plans, 0.0 when none finished
    pub success_rate: f64,
    pub average_duration_ms: u64,
    pub last_recovery_time: Option<DateTime<Utc>>,
}

impl RecoveryStats {
    pub fn from_plans(plans: &[RecoveryPlan]) -> Self {
        let count = |status: PlanStatus| plans.iter().filter(|p| p.status == status).count();

        let mut stats = Self {
            total_plans: plans.len(),
            pending: count(PlanStatus::Pending),
            in_progress: count(PlanStatus::InProgress),
            completed: count(PlanStatus::Completed),
            failed: count(PlanStatus::Failed),
            rolled_back: count(PlanStatus::RolledBack),
            ..Default::default()
        };

        let finished = stats.completed + stats.failed + stats.rolled_back;
        if finished > 0 {
            stats.success_rate = stats.completed as f64 / finished as f64;
        }

        let durations: Vec<u64> = plans
            .iter()
            .filter(|p| p.status == PlanStatus::Completed)
            .filter_map(|p| p.actual_duration_ms)
            .collect();
        if !durations.is_empty() {
            stats.average_duration_ms = durations.iter().sum::<u64>() / durations.len() as u64;
        }

        stats.last_recovery_time = plans.iter().filter_map(|p| p.start_time).max();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_steps() {
        assert_eq!(Progress::new(true, true).total_steps, 6);
        assert_eq!(Progress::new(true, false).total_steps, 5);
        assert_eq!(Progress::new(false, true).total_steps, 4);
        assert_eq!(Progress::new(false, false).total_steps, 3);
    }

    #[test]
    fn test_progress_is_monotonic_and_capped() {
        let mut progress = Progress::new(true, true);
        let mut last = 0;
        for step in ["initialize", "pre", "rollback", "restore", "post", "finalize", "extra"] {
            progress.advance(step);
            assert!(progress.percentage >= last);
            last = progress.percentage;
        }
        assert_eq!(progress.completed_steps, 6);
        assert_eq!(progress.percentage, 100);

        let mut progress = Progress::new(false, false);
        progress.advance("initialize");
        assert_eq!(progress.percentage, 33);
        progress.advance("restore");
        assert_eq!(progress.percentage, 67);
    }

    #[test]
    fn test_plan_status_transitions() {
        use PlanStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Failed));
        assert!(Failed.can_transition_to(RolledBack));

        assert!(!Completed.can_transition_to(RolledBack));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!RolledBack.can_transition_to(InProgress));
        assert!(!Pending.can_transition_to(Completed));
    }
}
