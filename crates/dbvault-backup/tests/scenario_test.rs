//! End-to-end: backup, corruption, forced recovery and scheduling

mod common;

use common::*;
use chrono::Utc;
use dbvault_backup::{
    scheduler::next_run, BackupCadence, BackupError, BackupPriority, BackupScheduler, BackupStatus, CheckStatus,
    CreatePlanRequest, ExecuteOptions, PlanStatus, ScheduleConfig,
};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn test_corrupted_backup_requires_force_and_rolls_back() {
    let h = Harness::new().await;
    let before = h.db.snapshot();

    let backup = h.manager.create_full_backup(BackupPriority::Normal).await.unwrap();
    assert_eq!(backup.status, BackupStatus::Completed);
    assert_eq!(backup.tables.len(), 3);
    assert!(backup.checksum.is_some());
    assert!(backup.size > 0);

    assert!(h.manager.verify_backup(&backup.id).await);

    h.corrupt(&backup.id).await;
    assert!(!h.manager.verify_backup(&backup.id).await);

    let orchestrator = h.orchestrator(recovery_config()).await;
    let err = orchestrator
        .create_recovery_plan(CreatePlanRequest {
            backup_id: backup.id.clone(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Integrity(_)));
    assert_eq!(err.code(), "INTEGRITY_ERROR");
    assert!(orchestrator.list_recovery_plans().await.unwrap().is_empty());

    let plan = orchestrator
        .create_recovery_plan(CreatePlanRequest {
            backup_id: backup.id.clone(),
            force: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(plan.status, PlanStatus::Pending);
    assert!(plan.forced);

    let validation = orchestrator.validate_recovery_plan(&plan.id).await.unwrap();
    assert!(validation.valid);
    assert_eq!(validation.warnings.len(), 1);

    // The integrity gate is overridden, but the payload cannot be decoded
    let err = orchestrator
        .execute_recovery_plan(&plan.id, ExecuteOptions::default())
        .await
        .unwrap_err();
    assert!(!matches!(err, BackupError::CheckFailed { .. }));

    let stored = orchestrator.get_recovery_plan(&plan.id).await.unwrap();
    let integrity = stored
        .pre_restore_checks
        .iter()
        .find(|c| c.id == "backup-integrity")
        .unwrap();
    assert_eq!(integrity.status, CheckStatus::Passed);
    assert!(integrity.result.as_deref().unwrap().starts_with("Overridden by force"));

    assert_eq!(stored.status, PlanStatus::RolledBack);
    assert!(stored.error.is_some());
    assert!(stored.rollback_point.is_some());
    assert_eq!(h.db.snapshot(), before);

    let names = h.notifier.names();
    for event in ["recovery.plan_created", "recovery.failed", "recovery.rolled_back"] {
        assert!(names.contains(&event.to_string()), "missing {}", event);
    }
}

#[tokio::test]
async fn test_scheduler_lifecycle() {
    let h = Harness::with_config(|config| config.schedule.enabled = true).await;
    let scheduler = BackupScheduler::new(h.manager.clone(), h.manager.config().schedule.clone());

    assert!(!scheduler.is_running().await);
    scheduler.start().await.unwrap();
    assert!(scheduler.is_running().await);
    assert!(scheduler.start().await.is_err());

    scheduler.stop().await.unwrap();
    assert!(!scheduler.is_running().await);
    assert!(scheduler.stop().await.is_err());

    // Scheduled backups carry their cadence and are subject to retention
    let daily = h
        .manager
        .create_scheduled_backup(BackupCadence::Daily)
        .await
        .unwrap();
    assert_eq!(daily.cadence, Some(BackupCadence::Daily));
}

#[tokio::test]
async fn test_scheduled_backup_waits_for_running_recovery() {
    let h = Harness::new().await;
    let backup = h.manager.create_full_backup(BackupPriority::Normal).await.unwrap();
    let orchestrator = h.orchestrator(recovery_config()).await;
    let plan = orchestrator
        .create_recovery_plan(CreatePlanRequest {
            backup_id: backup.id.clone(),
            ..Default::default()
        })
        .await
        .unwrap();

    // Damage the recovery repairs, with a slow apply
    h.db.set_table("users", vec![]);
    h.db.apply_delay_ms.store(300, Ordering::SeqCst);

    let (recovered, scheduled) = tokio::join!(
        orchestrator.execute_recovery_plan(&plan.id, ExecuteOptions::default()),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(orchestrator.is_recovery_in_progress());
            h.manager.create_scheduled_backup(BackupCadence::Daily).await
        }
    );
    let recovered = recovered.unwrap();
    let scheduled = scheduled.unwrap();

    assert_eq!(scheduled.status, BackupStatus::Completed);
    // Dumped after the restore finished, not mid-apply
    assert!(scheduled.timestamp >= recovered.end_time.unwrap());
    assert_eq!(scheduled.row_counts.get("users"), Some(&3));
}

async fn daily_backups(h: &Harness, status: BackupStatus) -> usize {
    h.manager
        .list_backups()
        .await
        .unwrap()
        .into_iter()
        .filter(|b| b.cadence == Some(BackupCadence::Daily) && b.status == status)
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_backup_retries_after_failure() {
    let h = Harness::with_config(|config| {
        config.schedule = ScheduleConfig {
            enabled: true,
            weekly: false,
            monthly: false,
            retry_delay_secs: 60,
            ..Default::default()
        };
    })
    .await;
    let schedule = h.manager.config().schedule.clone();
    h.db.fail_dump.store(true, Ordering::SeqCst);

    let scheduler = BackupScheduler::new(h.manager.clone(), schedule.clone());
    scheduler.start().await.unwrap();

    let now = Utc::now();
    let slot = next_run(BackupCadence::Daily, now, schedule.hour).unwrap();
    tokio::time::sleep((slot - now).to_std().unwrap() + Duration::from_secs(1)).await;

    let mut failed = 0;
    for _ in 0..10 {
        failed = daily_backups(&h, BackupStatus::Failed).await;
        if failed >= 2 {
            break;
        }
        tokio::time::sleep(schedule.retry_delay()).await;
    }
    assert!(failed >= 2, "only {} attempts", failed);
    assert_eq!(daily_backups(&h, BackupStatus::Completed).await, 0);

    h.db.fail_dump.store(false, Ordering::SeqCst);
    let mut completed = 0;
    for _ in 0..10 {
        tokio::time::sleep(schedule.retry_delay()).await;
        completed = daily_backups(&h, BackupStatus::Completed).await;
        if completed > 0 {
            break;
        }
    }
    assert_eq!(completed, 1);

    scheduler.stop().await.unwrap();
}
