//! Backup scheduling
//!
//! Runs are anchored to calendar boundaries at a configured UTC hour: every
//! day, every Monday, and the first of every month. Each cadence runs on its own
//! task and always re-arms: a failed run is retried after `retry_delay`, then
//! the loop goes back to waiting for the next boundary.

use crate::{config::ScheduleConfig, manager::BackupManager, metadata::BackupCadence, BackupError, Result};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info};

fn at_hour(date: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
    date.and_hms_opt(hour.min(23), 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// First `hour:00` strictly after `now`
pub fn next_daily(now: DateTime<Utc>, hour: u32) -> Option<DateTime<Utc>> {
    let today = now.date_naive();
    let candidate = at_hour(today, hour)?;
    if candidate > now {
        return Some(candidate);
    }
    at_hour(today.checked_add_signed(ChronoDuration::days(1))?, hour)
}

/// First Monday `hour:00` strictly after `now`
pub fn next_weekly(now: DateTime<Utc>, hour: u32) -> Option<DateTime<Utc>> {
    let today = now.date_naive();
    let monday = today.checked_sub_signed(ChronoDuration::days(
        today.weekday().num_days_from_monday() as i64,
    ))?;
    let candidate = at_hour(monday, hour)?;
    if candidate > now {
        return Some(candidate);
    }
    at_hour(monday.checked_add_signed(ChronoDuration::days(7))?, hour)
}

/// First day-of-month `hour:00` strictly after `now`
pub fn next_monthly(now: DateTime<Utc>, hour: u32) -> Option<DateTime<Utc>> {
    let today = now.date_naive();
    let first = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)?;
    let candidate = at_hour(first, hour)?;
    if candidate > now {
        return Some(candidate);
    }
    let next_first = if today.month() == 12 {
        NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)?
    };
    at_hour(next_first, hour)
}

pub fn next_run(cadence: BackupCadence, now: DateTime<Utc>, hour: u32) -> Option<DateTime<Utc>> {
    match cadence {
        BackupCadence::Daily => next_daily(now, hour),
        BackupCadence::Weekly => next_weekly(now, hour),
        BackupCadence::Monthly => next_monthly(now, hour),
    }
}

fn enabled_cadences(config: &ScheduleConfig) -> Vec<BackupCadence> {
    [
        (config.daily, BackupCadence::Daily),
        (config.weekly, BackupCadence::Weekly),
        (config.monthly, BackupCadence::Monthly),
    ]
    .into_iter()
    .filter_map(|(enabled, cadence)| enabled.then_some(cadence))
    .collect()
}

/// Earliest upcoming run across enabled cadences, `None` when scheduling is off
pub fn next_scheduled_run(config: &ScheduleConfig, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !config.enabled {
        return None;
    }
    enabled_cadences(config)
        .into_iter()
        .filter_map(|cadence| next_run(cadence, now, config.hour))
        .min()
}

/// Drives scheduled backups and periodic retention cleanup
pub struct BackupScheduler {
    manager: Arc<BackupManager>,
    config: ScheduleConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BackupScheduler {
    pub fn new(manager: Arc<BackupManager>, config: ScheduleConfig) -> Self {
        Self {
            manager,
            config,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn is_running(&self) -> bool {
        !self.tasks.lock().await.is_empty()
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Err(BackupError::Internal("Scheduler already running".to_string()));
        }
        if !self.config.enabled {
            info!("Backup scheduling is disabled");
            return Ok(());
        }

        for cadence in enabled_cadences(&self.config) {
            let manager = self.manager.clone();
            let config = self.config.clone();
            tasks.push(tokio::spawn(run_cadence_loop(manager, config, cadence)));
        }

        let manager = self.manager.clone();
        let cleanup_interval = self.config.cleanup_interval();
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(cleanup_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match manager.cleanup_old_backups().await {
                    Ok(report) => debug!(
                        "Scheduled cleanup: kept {}, deleted {}",
                        report.kept,
                        report.deleted.len()
                    ),
                    Err(e) => error!("Scheduled cleanup failed: {}", e),
                }
            }
        }));

        info!("Backup scheduler started with {} tasks", tasks.len());
        Ok(())
    }

    /// Stop the scheduler
    pub async fn stop(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_empty() {
            return Err(BackupError::Internal("Scheduler not running".to_string()));
        }
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("Backup scheduler stopped");
        Ok(())
    }
}

async fn run_cadence_loop(manager: Arc<BackupManager>, config: ScheduleConfig, cadence: BackupCadence) {
    loop {
        let now = Utc::now();
        let Some(next) = next_run(cadence, now, config.hour) else {
            error!("Could not compute next {} run after {}", cadence, now);
            sleep(config.retry_delay()).await;
            continue;
        };

        debug!("Next {} backup at {}", cadence, next);
        sleep((next - now).to_std().unwrap_or_default()).await;

        // Retries stop once the following slot is due
        let following = next_run(cadence, next, config.hour);
        while let Err(e) = manager.create_scheduled_backup(cadence).await {
            error!(
                "Scheduled {} backup failed: {}; retrying in {:?}",
                cadence,
                e,
                config.retry_delay()
            );
            sleep(config.retry_delay()).await;
            if following.map_or(false, |f| Utc::now() >= f) {
                break;
            }
        }
    }
}
