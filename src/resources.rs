//! Resource sampler: best-effort OS telemetry.
//!
//! Reads CPU, memory and data-directory disk usage on a fixed tick. A failed
//! sample returns the last cached one instead of propagating an error;
//! telemetry must never destabilize the rest of the system.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sysinfo::{Disks, System};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ResourcesConfig;
use crate::types::ResourceUsage;

const BYTES_PER_MB: u64 = 1024 * 1024;
const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

pub struct ResourceSampler {
    data_dir: PathBuf,
    interval_secs: u64,
    system: Mutex<System>,
    cached: Mutex<ResourceUsage>,
}

impl ResourceSampler {
    pub fn new(data_dir: PathBuf, config: &ResourcesConfig) -> Self {
        Self {
            data_dir,
            interval_secs: config.interval_secs,
            system: Mutex::new(System::new()),
            cached: Mutex::new(ResourceUsage::default()),
        }
    }

    /// Run the sampling loop until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("resource sampler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.sample();
                }
            }
        }
    }

    /// Latest sample; falls back to the cached value when sampling fails
    pub fn latest(&self) -> ResourceUsage {
        self.cached.lock().clone()
    }

    /// Take one sample and update the cache
    pub fn sample(&self) {
        let (cpu_percent, memory_mb, memory_total_mb) = {
            let mut system = self.system.lock();
            system.refresh_memory();
            system.refresh_cpu_usage();
            (
                system.global_cpu_usage().clamp(0.0, 100.0),
                system.used_memory() / BYTES_PER_MB,
                system.total_memory() / BYTES_PER_MB,
            )
        };

        let mut usage = ResourceUsage {
            cpu_percent,
            memory_mb,
            memory_total_mb,
            ..self.cached.lock().clone()
        };

        if let Some((total, available)) = disk_space_for(&self.data_dir) {
            usage.disk_total_gb = (total / BYTES_PER_GB) as f32;
            usage.disk_used_gb = ((total - available) / BYTES_PER_GB) as f32;
        }

        *self.cached.lock() = usage;
    }
}

/// Total and available bytes of the disk holding `path`, matching the
/// longest mount point prefix.
fn disk_space_for(path: &Path) -> Option<(u64, u64)> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| (disk.total_space(), disk.available_space()))
}

/// Total system memory in whole gigabytes
pub fn total_memory_gb() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    system.total_memory() / BYTES_PER_GB
}

/// Available space in whole gigabytes on the disk holding `path`
pub fn available_disk_gb(path: &Path) -> u64 {
    disk_space_for(path)
        .map(|(_, available)| available / BYTES_PER_GB)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourcesConfig;

    #[test]
    fn test_sample_populates_cache() {
        let sampler = ResourceSampler::new(
            std::env::temp_dir(),
            &ResourcesConfig { interval_secs: 10 },
        );
        sampler.sample();
        let usage = sampler.latest();
        assert!(usage.memory_total_mb > 0);
        assert!(usage.memory_mb <= usage.memory_total_mb);
        assert!(usage.cpu_percent >= 0.0 && usage.cpu_percent <= 100.0);
    }

    #[test]
    fn test_latest_before_sampling_is_default() {
        let sampler = ResourceSampler::new(
            std::env::temp_dir(),
            &ResourcesConfig { interval_secs: 10 },
        );
        let usage = sampler.latest();
        assert_eq!(usage.memory_total_mb, 0);
    }
}
