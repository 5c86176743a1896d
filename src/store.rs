//! Durable state store for initialization, uptime and download progress.
//!
//! Two single-writer JSON files live under the data directory: the node state
//! record and the download resume record. Every mutation is flushed durably
//! (write to a temp file, fsync, atomic rename) before the call returns, so
//! at most the in-flight mutation is lost on abrupt termination. Both files
//! are independently readable while the process is not running.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, NodeResult};

const STATE_FILE: &str = "node_state.json";
const DOWNLOAD_FILE: &str = "download_state.json";

/// Durable record of initialization, uptime and last chain position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentState {
    pub initialized: bool,
    pub first_launch_timestamp: Option<DateTime<Utc>>,
    pub last_run_timestamp: Option<DateTime<Utc>>,
    pub cumulative_uptime_seconds: u64,
    pub last_known_block: u64,
}

impl Default for PersistentState {
    fn default() -> Self {
        Self {
            initialized: false,
            first_launch_timestamp: None,
            last_run_timestamp: None,
            cumulative_uptime_seconds: 0,
            last_known_block: 0,
        }
    }
}

/// Resume record for an in-flight snapshot download. Created when a download
/// starts, updated incrementally, cleared only after verified extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadState {
    pub url: String,
    pub destination_path: PathBuf,
    pub total_bytes: u64,
    pub bytes_downloaded: u64,
    /// Distinguishes a partial file from a verified complete one
    pub verified: bool,
}

/// Single-writer store over the persistent state files
pub struct StateStore {
    dir: PathBuf,
    state: Mutex<PersistentState>,
}

impl StateStore {
    /// Open the store under `dir`, loading existing state if present
    pub fn open(dir: impl Into<PathBuf>) -> NodeResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let state_path = dir.join(STATE_FILE);
        let state = if state_path.exists() {
            let content = fs::read_to_string(&state_path)?;
            serde_json::from_str(&content).map_err(|e| NodeError::State {
                message: format!("malformed state file {}: {e}", state_path.display()),
            })?
        } else {
            PersistentState::default()
        };

        Ok(Self {
            dir,
            state: Mutex::new(state),
        })
    }

    /// Snapshot of the current persistent state
    pub fn get(&self) -> PersistentState {
        self.state.lock().clone()
    }

    /// Mark setup complete; records the first launch timestamp once
    pub fn mark_initialized(&self) -> NodeResult<()> {
        self.update(|state| {
            state.initialized = true;
            if state.first_launch_timestamp.is_none() {
                state.first_launch_timestamp = Some(Utc::now());
            }
        })
    }

    pub fn set_last_known_block(&self, block: u64) -> NodeResult<()> {
        self.update(|state| state.last_known_block = block)
    }

    pub fn add_uptime(&self, seconds: u64) -> NodeResult<()> {
        self.update(|state| {
            state.cumulative_uptime_seconds += seconds;
        })
    }

    pub fn touch_last_run(&self) -> NodeResult<()> {
        self.update(|state| state.last_run_timestamp = Some(Utc::now()))
    }

    /// Apply a mutation and flush it durably before returning
    fn update(&self, mutate: impl FnOnce(&mut PersistentState)) -> NodeResult<()> {
        let mut state = self.state.lock();
        mutate(&mut state);
        write_json_durable(&self.dir.join(STATE_FILE), &*state)
    }

    /// Read the download resume record from disk, if one exists.
    /// Read fresh each call so it survives process restarts.
    pub fn download_state(&self) -> Option<DownloadState> {
        let path = self.dir.join(DOWNLOAD_FILE);
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Durably persist the download resume record
    pub fn save_download_state(&self, download: &DownloadState) -> NodeResult<()> {
        write_json_durable(&self.dir.join(DOWNLOAD_FILE), download)
    }

    /// Remove the download resume record
    pub fn clear_download_state(&self) -> NodeResult<()> {
        let path = self.dir.join(DOWNLOAD_FILE);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Write `value` as pretty JSON via temp file + fsync + atomic rename
fn write_json_durable<T: Serialize>(path: &Path, value: &T) -> NodeResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_visible_after_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let store = StateStore::open(dir.path()).unwrap();
        store.mark_initialized().unwrap();
        store.set_last_known_block(42_000).unwrap();
        store.add_uptime(3600).unwrap();
        drop(store);

        // Simulated process restart
        let store = StateStore::open(dir.path()).unwrap();
        let state = store.get();
        assert!(state.initialized);
        assert_eq!(state.last_known_block, 42_000);
        assert_eq!(state.cumulative_uptime_seconds, 3600);
        assert!(state.first_launch_timestamp.is_some());
    }

    #[test]
    fn test_defaults_when_no_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let state = store.get();
        assert!(!state.initialized);
        assert_eq!(state.last_known_block, 0);
        assert_eq!(state.cumulative_uptime_seconds, 0);
    }

    #[test]
    fn test_first_launch_timestamp_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        store.mark_initialized().unwrap();
        let first = store.get().first_launch_timestamp.unwrap();
        store.mark_initialized().unwrap();
        assert_eq!(store.get().first_launch_timestamp.unwrap(), first);
    }

    #[test]
    fn test_download_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        let store = StateStore::open(dir.path()).unwrap();
        store
            .save_download_state(&DownloadState {
                url: "https://snapshots.example.com/latest.tar.gz".into(),
                destination_path: dir.path().join("latest.tar.gz"),
                total_bytes: 1000,
                bytes_downloaded: 400,
                verified: false,
            })
            .unwrap();
        drop(store);

        let store = StateStore::open(dir.path()).unwrap();
        let download = store.download_state().unwrap();
        assert_eq!(download.bytes_downloaded, 400);
        assert_eq!(download.total_bytes, 1000);
        assert!(!download.verified);

        store.clear_download_state().unwrap();
        assert!(store.download_state().is_none());
    }
}
