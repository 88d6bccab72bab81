//! Retention planning
//!
//! Completed backups are grouped by type and cadence; within each group the
//! newest `N` (per the cadence's count) are kept and the rest are deleted.
//! Rollback snapshots carry no cadence and are never selected. Planning is a
//! pure function of the current records, so running cleanup twice deletes
//! nothing the second time.

use crate::config::RetentionPolicy;
use crate::metadata::{BackupCadence, BackupMetadata, BackupType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which backups a cleanup pass keeps and deletes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    pub keep: Vec<String>,
    pub delete: Vec<String>,
}

/// Outcome of a cleanup pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionReport {
    pub kept: usize,
    pub deleted: Vec<String>,
    /// Backups selected for deletion whose removal failed, with the error
    pub failed: Vec<(String, String)>,
}

pub fn plan_retention(backups: &[BackupMetadata], policy: &RetentionPolicy) -> RetentionPlan {
    let mut groups: BTreeMap<(BackupType, BackupCadence), Vec<&BackupMetadata>> = BTreeMap::new();

    for backup in backups.iter().filter(|b| b.is_completed()) {
        if let Some(cadence) = backup.cadence {
            groups.entry((backup.backup_type, cadence)).or_default().push(backup);
        }
    }

    let mut plan = RetentionPlan::default();
    for ((_, cadence), mut group) in groups {
        // Newest first; id breaks timestamp ties so the plan is deterministic
        group.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));

        let keep = policy.keep_for(cadence);
        for (index, backup) in group.into_iter().enumerate() {
            if index < keep {
                plan.keep.push(backup.id.clone());
            } else {
                plan.delete.push(backup.id.clone());
            }
        }
    }

    plan
}
