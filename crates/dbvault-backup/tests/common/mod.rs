//! Shared test doubles for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dbvault_backup::{
    BackupConfig, BackupError, BackupManager, CheckRegistry, CloudStore, CompressionType, Database,
    Notifier, RecoveryConfig, RecoveryOrchestrator, Result, SystemProbe,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dbvault_backup=debug")
        .with_test_writer()
        .try_init();
}

type Tables = BTreeMap<String, Vec<Value>>;

/// In-memory database: tables of JSON rows, dumped as a JSON object
pub struct MemoryDatabase {
    tables: Mutex<Tables>,
    modified: Mutex<HashMap<String, DateTime<Utc>>>,
    pub healthy: AtomicBool,
    /// Make `apply` wipe every table and then fail
    pub fail_apply: AtomicBool,
    /// Number of `apply` failures still to inject; decremented per call
    pub transient_apply_failures: AtomicUsize,
    pub fail_dump: AtomicBool,
    pub apply_delay_ms: AtomicU64,
    pub apply_calls: AtomicUsize,
    pub active: AtomicU64,
    pub integrity_problems: Mutex<Vec<String>>,
    pub scripts: Mutex<Vec<String>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::new()),
            modified: Mutex::new(HashMap::new()),
            healthy: AtomicBool::new(true),
            fail_apply: AtomicBool::new(false),
            transient_apply_failures: AtomicUsize::new(0),
            fail_dump: AtomicBool::new(false),
            apply_delay_ms: AtomicU64::new(0),
            apply_calls: AtomicUsize::new(0),
            active: AtomicU64::new(0),
            integrity_problems: Mutex::new(Vec::new()),
            scripts: Mutex::new(Vec::new()),
        }
    }

    /// users (3 rows), orders (2 rows), products (4 rows)
    pub fn seeded() -> Self {
        let db = Self::new();
        db.set_table("users", (1..=3).map(|i| json!({ "id": i, "name": format!("user{}", i) })).collect());
        db.set_table("orders", (1..=2).map(|i| json!({ "id": i, "user_id": i })).collect());
        db.set_table("products", (1..=4).map(|i| json!({ "id": i, "sku": format!("sku-{}", i) })).collect());
        db
    }

    pub fn set_table(&self, name: &str, rows: Vec<Value>) {
        self.tables.lock().unwrap().insert(name.to_string(), rows);
        self.modified.lock().unwrap().insert(name.to_string(), Utc::now());
    }

    pub fn insert_row(&self, table: &str, row: Value) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row);
        self.modified.lock().unwrap().insert(table.to_string(), Utc::now());
    }

    pub fn snapshot(&self) -> Tables {
        self.tables.lock().unwrap().clone()
    }

    pub fn rows(&self, table: &str) -> usize {
        self.tables.lock().unwrap().get(table).map_or(0, Vec::len)
    }

    pub fn apply_count(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    fn merge(&self, dump: Tables, only: Option<&[String]>) {
        let mut tables = self.tables.lock().unwrap();
        let mut modified = self.modified.lock().unwrap();
        for (name, rows) in dump {
            if only.map_or(true, |only| only.contains(&name)) {
                modified.insert(name.clone(), Utc::now());
                tables.insert(name, rows);
            }
        }
    }

    async fn apply_inner(&self, content: &[u8], only: Option<&[String]>) -> Result<()> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.apply_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.fail_apply.load(Ordering::SeqCst) {
            for rows in self.tables.lock().unwrap().values_mut() {
                rows.clear();
            }
            return Err(BackupError::Database("apply failed midway".to_string()));
        }

        let transient = self.transient_apply_failures.load(Ordering::SeqCst);
        if transient > 0 {
            self.transient_apply_failures.store(transient - 1, Ordering::SeqCst);
            return Err(BackupError::Database("connection reset".to_string()));
        }

        let dump: Tables = serde_json::from_slice(content)
            .map_err(|e| BackupError::Database(format!("bad dump: {}", e)))?;
        self.merge(dump, only);
        Ok(())
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn dump(&self, tables: Option<&[String]>) -> Result<Vec<u8>> {
        if self.fail_dump.load(Ordering::SeqCst) {
            return Err(BackupError::Database("dump failed".to_string()));
        }
        let all = self.tables.lock().unwrap().clone();
        let selected: Tables = match tables {
            Some(names) => all.into_iter().filter(|(name, _)| names.contains(name)).collect(),
            None => all,
        };
        Ok(serde_json::to_vec(&selected)?)
    }

    async fn apply(&self, content: &[u8]) -> Result<()> {
        self.apply_inner(content, None).await
    }

    async fn apply_tables(&self, content: &[u8], tables: &[String]) -> Result<()> {
        self.apply_inner(content, Some(tables)).await
    }

    async fn query_table_names(&self) -> Result<Vec<String>> {
        Ok(self.tables.lock().unwrap().keys().cloned().collect())
    }

    async fn query_changed_tables(&self, since: Option<DateTime<Utc>>) -> Result<Vec<String>> {
        let modified = self.modified.lock().unwrap();
        let mut changed: Vec<String> = modified
            .iter()
            .filter(|(_, at)| since.map_or(true, |since| **at > since))
            .map(|(name, _)| name.clone())
            .collect();
        changed.sort();
        Ok(changed)
    }

    async fn run_maintenance_script(&self, script: &str) -> Result<()> {
        if script.contains("FAIL") {
            return Err(BackupError::Database(format!("script error in {:?}", script)));
        }
        self.scripts.lock().unwrap().push(script.to_string());
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|rows| rows.len() as u64)
            .ok_or_else(|| BackupError::Database(format!("no such table {}", table)))
    }

    async fn integrity_check(&self) -> Result<Vec<String>> {
        Ok(self.integrity_problems.lock().unwrap().clone())
    }

    async fn active_connections(&self) -> Result<u64> {
        Ok(self.active.load(Ordering::SeqCst))
    }
}

/// Cloud store keeping objects in memory
#[derive(Default)]
pub struct MemoryCloudStore {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl CloudStore for MemoryCloudStore {
    async fn upload(&self, id: &str, data: &[u8]) -> Result<String> {
        let reference = format!("mem://{}", id);
        self.objects.lock().unwrap().insert(reference.clone(), data.to_vec());
        Ok(reference)
    }

    async fn download(&self, reference: &str, _id: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| BackupError::Storage(format!("{} not found", reference)))
    }

    async fn delete(&self, reference: &str, _id: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(reference);
        Ok(())
    }
}

/// Notifier that records every event
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<(String, Value)>>,
    /// Empty directory removed when `recovery.failed` arrives
    pub clear_on_recovery_failed: Mutex<Option<PathBuf>>,
}

impl RecordingNotifier {
    pub fn names(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, event: &str, payload: Value) -> Result<()> {
        self.events.lock().unwrap().push((event.to_string(), payload));
        if event == "recovery.failed" {
            if let Some(dir) = self.clear_on_recovery_failed.lock().unwrap().take() {
                std::fs::remove_dir(dir)?;
            }
        }
        Ok(())
    }
}

/// Probe with fixed readings
pub struct FixedProbe {
    pub disk: u64,
    pub memory: f32,
    pub cpu: f32,
}

impl Default for FixedProbe {
    fn default() -> Self {
        Self {
            disk: 100 * 1024 * 1024 * 1024,
            memory: 40.0,
            cpu: 10.0,
        }
    }
}

#[async_trait]
impl SystemProbe for FixedProbe {
    async fn available_disk_space(&self, _path: &Path) -> Result<u64> {
        Ok(self.disk)
    }

    async fn memory_usage_percent(&self) -> Result<f32> {
        Ok(self.memory)
    }

    async fn cpu_usage_percent(&self) -> Result<f32> {
        Ok(self.cpu)
    }
}

pub fn backup_config(dir: &Path) -> BackupConfig {
    BackupConfig {
        backup_dir: dir.join("vault"),
        compression: CompressionType::Zstd,
        ..Default::default()
    }
}

pub fn recovery_config() -> RecoveryConfig {
    RecoveryConfig {
        min_free_disk_bytes: 1024,
        retry_backoff_ms: 5,
        check_timeout_secs: 5,
        apply_timeout_secs: 5,
        ..Default::default()
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub db: Arc<MemoryDatabase>,
    pub notifier: Arc<RecordingNotifier>,
    pub manager: Arc<BackupManager>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut BackupConfig)) -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let mut config = backup_config(dir.path());
        customize(&mut config);

        let db = Arc::new(MemoryDatabase::seeded());
        let notifier = Arc::new(RecordingNotifier::default());
        let cloud: Option<Arc<dyn CloudStore>> = if config.cloud_enabled {
            Some(Arc::new(MemoryCloudStore::default()))
        } else {
            None
        };
        let manager = BackupManager::new(config, db.clone(), cloud, notifier.clone())
            .await
            .unwrap();

        Self {
            dir,
            db,
            notifier,
            manager: Arc::new(manager),
        }
    }

    pub async fn orchestrator(&self, config: RecoveryConfig) -> RecoveryOrchestrator {
        self.orchestrator_with(config, FixedProbe::default(), CheckRegistry::with_defaults())
            .await
    }

    pub async fn orchestrator_with(
        &self,
        config: RecoveryConfig,
        probe: FixedProbe,
        registry: CheckRegistry,
    ) -> RecoveryOrchestrator {
        RecoveryOrchestrator::new(config, self.manager.clone(), Arc::new(probe), registry)
            .await
            .unwrap()
    }

    /// Absolute path of a backup's local payload
    pub async fn payload_path(&self, backup_id: &str) -> PathBuf {
        let metadata = self.manager.get_backup_metadata(backup_id).await.unwrap();
        self.manager
            .storage()
            .root()
            .join(metadata.location.local.unwrap())
    }

    /// Flip one byte of the stored payload
    pub async fn corrupt(&self, backup_id: &str) {
        let path = self.payload_path(backup_id).await;
        let mut bytes = std::fs::read(&path).unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();
    }
}
