//! Host resource probes used by the disk-space and system-resources checks

use crate::{BackupError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use sysinfo::{CpuExt, DiskExt, System, SystemExt};
use tokio::sync::Mutex;

#[async_trait]
pub trait SystemProbe: Send + Sync {
    /// Free bytes on the volume holding `path`
    async fn available_disk_space(&self, path: &Path) -> Result<u64>;

    async fn memory_usage_percent(&self) -> Result<f32>;

    async fn cpu_usage_percent(&self) -> Result<f32>;
}

/// Probe backed by `sysinfo`
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    /// Loads the initial snapshot on the blocking pool
    pub async fn new() -> Result<Self> {
        let system = tokio::task::spawn_blocking(|| {
            let mut system = System::new_all();
            system.refresh_all();
            system
        })
        .await
        .map_err(|e| BackupError::Internal(format!("sysinfo initialization failed: {}", e)))?;

        Ok(Self {
            system: Mutex::new(system),
        })
    }
}

#[async_trait]
impl SystemProbe for SysinfoProbe {
    async fn available_disk_space(&self, path: &Path) -> Result<u64> {
        let resolved = tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| PathBuf::from(path));

        let mut system = self.system.lock().await;
        system.refresh_disks_list();
        system.refresh_disks();

        // Longest mount point that prefixes the path wins
        system
            .disks()
            .iter()
            .filter(|disk| resolved.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
            .ok_or_else(|| {
                BackupError::Storage(format!("No mounted volume holds {}", resolved.display()))
            })
    }

    async fn memory_usage_percent(&self) -> Result<f32> {
        let mut system = self.system.lock().await;
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return Ok(0.0);
        }
        Ok(system.used_memory() as f32 / total as f32 * 100.0)
    }

    async fn cpu_usage_percent(&self) -> Result<f32> {
        let mut system = self.system.lock().await;
        system.refresh_cpu();
        Ok(system.global_cpu_info().cpu_usage())
    }
}
