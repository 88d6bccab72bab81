//! Recovery checks
//!
//! Checks are capability objects registered by id in a [`CheckRegistry`]. A
//! recovery plan carries a [`RecoveryCheck`] record per catalog entry, and the
//! [`CheckRunner`] resolves each record to its handler at execution time.

mod post_restore;
mod pre_restore;
mod runner;

pub use post_restore::{
    ApplicationConnectivityCheck, DataIntegrityCheck, ForeignKeyCheck, RowCountCheck, TableCountCheck,
};
pub use pre_restore::{
    BackupExistsCheck, BackupIntegrityCheck, DbConnectivityCheck, DiskSpaceCheck, SystemResourcesCheck,
};
pub use runner::CheckRunner;

use crate::{
    config::RecoveryConfig, database::Database, manager::BackupManager, plan::RecoveryPlan,
    probe::SystemProbe, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// When a check runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Safety gate before any mutation; a failure aborts the plan
    PreRestore,
    /// Observability after the restore; failures are recorded only
    PostRestore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pending,
    Running,
    Passed,
    Failed,
}

/// Check record stored on a recovery plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryCheck {
    pub id: String,
    pub name: String,
    pub kind: CheckKind,
    pub status: CheckStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl RecoveryCheck {
    pub fn pending(id: &str, name: &str, kind: CheckKind) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            status: CheckStatus::Pending,
            result: None,
            error: None,
            timestamp: None,
        }
    }
}

/// What a handler found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub passed: bool,
    pub message: String,
}

impl CheckOutcome {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }
}

/// Everything a check may look at
pub struct CheckContext<'a> {
    pub plan: &'a RecoveryPlan,
    pub manager: &'a BackupManager,
    pub database: &'a dyn Database,
    pub probe: &'a dyn SystemProbe,
    pub config: &'a RecoveryConfig,
}

#[async_trait]
pub trait RecoveryCheckHandler: Send + Sync {
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn kind(&self) -> CheckKind;

    /// `Ok` with a failed outcome for a negative finding, `Err` when the check could not run
    async fn execute(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome>;
}

/// Ordered set of check handlers keyed by id
#[derive(Clone, Default)]
pub struct CheckRegistry {
    handlers: Vec<Arc<dyn RecoveryCheckHandler>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five pre-restore and five post-restore checks
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BackupExistsCheck));
        registry.register(Arc::new(BackupIntegrityCheck));
        registry.register(Arc::new(DbConnectivityCheck));
        registry.register(Arc::new(DiskSpaceCheck));
        registry.register(Arc::new(SystemResourcesCheck));
        registry.register(Arc::new(TableCountCheck));
        registry.register(Arc::new(RowCountCheck));
        registry.register(Arc::new(DataIntegrityCheck));
        registry.register(Arc::new(ForeignKeyCheck));
        registry.register(Arc::new(ApplicationConnectivityCheck));
        registry
    }

    /// Add a handler, replacing any handler with the same id in place
    pub fn register(&mut self, handler: Arc<dyn RecoveryCheckHandler>) {
        match self.handlers.iter().position(|h| h.id() == handler.id()) {
            Some(index) => self.handlers[index] = handler,
            None => self.handlers.push(handler),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn RecoveryCheckHandler>> {
        self.handlers.iter().find(|h| h.id() == id).cloned()
    }

    /// Fresh pending records for every check of `kind`, in registration order
    pub fn catalog(&self, kind: CheckKind) -> Vec<RecoveryCheck> {
        self.handlers
            .iter()
            .filter(|h| h.kind() == kind)
            .map(|h| RecoveryCheck::pending(h.id(), h.name(), kind))
            .collect()
    }
}
