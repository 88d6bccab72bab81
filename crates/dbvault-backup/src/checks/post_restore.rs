//! Observations made after a restore has been applied

use super::{CheckContext, CheckKind, CheckOutcome, RecoveryCheckHandler};
use crate::Result;
use async_trait::async_trait;

/// Every restored table is present
pub struct TableCountCheck;

#[async_trait]
impl RecoveryCheckHandler for TableCountCheck {
    fn id(&self) -> &'static str {
        "table-count"
    }

    fn name(&self) -> &'static str {
        "Table count"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::PostRestore
    }

    async fn execute(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
        let present = ctx.database.query_table_names().await?;
        let missing: Vec<&str> = ctx
            .plan
            .tables
            .iter()
            .filter(|t| !present.contains(t))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(CheckOutcome::pass(format!(
                "{} of {} expected tables present",
                ctx.plan.tables.len(),
                ctx.plan.tables.len()
            )))
        } else {
            Ok(CheckOutcome::fail(format!("Missing tables: {}", missing.join(", "))))
        }
    }
}

/// Restored row counts match those captured at backup time
pub struct RowCountCheck;

#[async_trait]
impl RecoveryCheckHandler for RowCountCheck {
    fn id(&self) -> &'static str {
        "row-count"
    }

    fn name(&self) -> &'static str {
        "Row count"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::PostRestore
    }

    async fn execute(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
        let backup = ctx.manager.get_backup_metadata(&ctx.plan.backup_id).await?;

        let mut mismatches = Vec::new();
        let mut compared = 0;
        for table in &ctx.plan.tables {
            let Some(&expected) = backup.row_counts.get(table) else {
                continue;
            };
            let actual = ctx.database.count_rows(table).await?;
            compared += 1;
            if actual != expected {
                mismatches.push(format!("{} has {} rows, expected {}", table, actual, expected));
            }
        }

        if mismatches.is_empty() {
            Ok(CheckOutcome::pass(format!("Row counts match for {} tables", compared)))
        } else {
            Ok(CheckOutcome::fail(mismatches.join("; ")))
        }
    }
}

/// The engine's own consistency check reports nothing
pub struct DataIntegrityCheck;

#[async_trait]
impl RecoveryCheckHandler for DataIntegrityCheck {
    fn id(&self) -> &'static str {
        "data-integrity"
    }

    fn name(&self) -> &'static str {
        "Data integrity"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::PostRestore
    }

    async fn execute(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
        let problems = ctx.database.integrity_check().await?;
        if problems.is_empty() {
            Ok(CheckOutcome::pass("Integrity check clean"))
        } else {
            Ok(CheckOutcome::fail(problems.join("; ")))
        }
    }
}

pub struct ForeignKeyCheck;

#[async_trait]
impl RecoveryCheckHandler for ForeignKeyCheck {
    fn id(&self) -> &'static str {
        "foreign-keys"
    }

    fn name(&self) -> &'static str {
        "Foreign keys"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::PostRestore
    }

    async fn execute(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
        let violations = ctx.database.foreign_key_violations().await?;
        if violations.is_empty() {
            Ok(CheckOutcome::pass("No foreign key violations"))
        } else {
            Ok(CheckOutcome::fail(format!(
                "{} foreign key violations: {}",
                violations.len(),
                violations.join("; ")
            )))
        }
    }
}

/// The database serves requests again after the restore
pub struct ApplicationConnectivityCheck;

#[async_trait]
impl RecoveryCheckHandler for ApplicationConnectivityCheck {
    fn id(&self) -> &'static str {
        "application-connectivity"
    }

    fn name(&self) -> &'static str {
        "Application connectivity"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::PostRestore
    }

    async fn execute(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
        if ctx.database.health_check().await {
            Ok(CheckOutcome::pass("Database accepts connections"))
        } else {
            Ok(CheckOutcome::fail("Database does not accept connections"))
        }
    }
}
