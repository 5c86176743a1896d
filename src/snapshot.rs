//! Snapshot acquirer: resumable download, verification and extraction of the
//! node data archive.
//!
//! Download progress is persisted through the state store so a process
//! restart resumes with a byte-range request instead of re-fetching.
//! Interruption fails `Retryable`; the caller re-invokes `acquire` with the
//! same URL to resume. Verification (size, and checksum when provided) gates
//! extraction; a mismatch discards the partial file and fails `Corrupt`.
//! Extraction is guarded by an incomplete marker so a directory left
//! mid-extraction is redone on retry instead of assumed complete.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::SnapshotConfig;
use crate::error::{NodeError, NodeResult};
use crate::events::EventHub;
use crate::store::{DownloadState, StateStore};

const EXTRACT_MARKER: &str = ".extract-incomplete";

pub struct SnapshotAcquirer {
    client: reqwest::Client,
    store: Arc<StateStore>,
    events: Arc<EventHub>,
    progress_tx: broadcast::Sender<f32>,
    data_dir: PathBuf,
    download_dir: PathBuf,
    config: SnapshotConfig,
}

impl SnapshotAcquirer {
    pub fn new(
        data_dir: PathBuf,
        download_dir: PathBuf,
        store: Arc<StateStore>,
        events: Arc<EventHub>,
        config: SnapshotConfig,
    ) -> NodeResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NodeError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        let (progress_tx, _) = broadcast::channel(64);

        Ok(Self {
            client,
            store,
            events,
            progress_tx,
            data_dir,
            download_dir,
            config,
        })
    }

    /// Subscribe to throttled download progress percentages
    pub fn subscribe_progress(&self) -> broadcast::Receiver<f32> {
        self.progress_tx.subscribe()
    }

    /// Acquire the snapshot at `url`: download (resuming any matching
    /// partial file), verify, then extract into the data directory.
    pub async fn acquire(&self, url: &str, cancel: &CancellationToken) -> NodeResult<()> {
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let destination = self.download_dir.join(archive_name(url));

        let existing = self.store.download_state();

        // A verified archive that was interrupted mid-extraction only needs
        // the extraction redone.
        if let Some(state) = existing.as_ref() {
            if state.url == url && state.verified && destination.exists() {
                self.events
                    .info("Verified snapshot present, redoing extraction", None);
                return self.extract_and_finish(&destination).await;
            }
        }

        let resume_from = resume_offset(existing.as_ref(), url, &destination).await;
        if resume_from == 0 && destination.exists() {
            // Stale partial from a different URL or with a size mismatch
            tokio::fs::remove_file(&destination).await?;
        }
        if resume_from > 0 {
            self.events.info(
                "Resuming snapshot download",
                Some(format!("{resume_from} bytes already on disk")),
            );
        }

        let total = self
            .download(url, &destination, resume_from, existing, cancel)
            .await?;

        self.verify(url, &destination, total).await?;
        self.extract_and_finish(&destination).await
    }

    /// Stream the body into the destination file, persisting progress at a
    /// throttled cadence. Returns the final byte count on disk.
    async fn download(
        &self,
        url: &str,
        destination: &Path,
        resume_from: u64,
        existing: Option<DownloadState>,
        cancel: &CancellationToken,
    ) -> NodeResult<u64> {
        let mut request = self.client.get(url);
        if resume_from > 0 {
            request = request.header("Range", format!("bytes={resume_from}-"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                NodeError::Timeout {
                    operation: "snapshot download".to_string(),
                    seconds: 30,
                }
            } else {
                NodeError::NetworkTransient {
                    message: e.to_string(),
                }
            }
        })?;

        let mut resume_from = resume_from;
        if resume_from > 0 && response.status() != reqwest::StatusCode::PARTIAL_CONTENT {
            tracing::warn!("server ignored range request, restarting download from scratch");
            self.events
                .warn("Server does not support resume, starting fresh", None);
            tokio::fs::remove_file(destination).await.ok();
            resume_from = 0;
        }
        if !response.status().is_success() {
            return Err(NodeError::NetworkTransient {
                message: format!("snapshot server returned {}", response.status()),
            });
        }

        let total_bytes = response
            .content_length()
            .map(|len| len + resume_from)
            .or(existing.map(|s| s.total_bytes).filter(|t| *t > 0))
            .unwrap_or(0);

        let mut state = DownloadState {
            url: url.to_string(),
            destination_path: destination.to_path_buf(),
            total_bytes,
            bytes_downloaded: resume_from,
            verified: false,
        };
        self.store.save_download_state(&state)?;

        let mut file = if resume_from > 0 {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(destination)
                .await?
        } else {
            tokio::fs::File::create(destination).await?
        };

        let mut downloaded = resume_from;
        let mut stream = response.bytes_stream();
        let mut last_emit = tokio::time::Instant::now();
        let emit_every = Duration::from_secs(self.config.progress_interval_secs);

        loop {
            let next = tokio::select! {
                chunk = stream.next() => chunk,
                _ = cancel.cancelled() => {
                    self.checkpoint(&mut file, &mut state, downloaded).await;
                    return Err(NodeError::Retryable {
                        bytes_downloaded: downloaded,
                        message: "download cancelled".to_string(),
                    });
                }
            };
            let Some(next) = next else {
                break;
            };
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.checkpoint(&mut file, &mut state, downloaded).await;
                    self.events.warn(
                        "Snapshot download interrupted, will resume on retry",
                        Some(err.to_string()),
                    );
                    return Err(NodeError::Retryable {
                        bytes_downloaded: downloaded,
                        message: err.to_string(),
                    });
                }
            };

            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            // Throttled: progress notifications and resume checkpoints are
            // not emitted per chunk
            if last_emit.elapsed() >= emit_every {
                self.checkpoint(&mut file, &mut state, downloaded).await;
                let pct = percentage(downloaded, total_bytes);
                let _ = self.progress_tx.send(pct);
                self.events.debug(
                    "Download progress",
                    Some(format!("{downloaded} of {total_bytes} bytes ({pct:.1}%)")),
                );
                last_emit = tokio::time::Instant::now();
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        state.bytes_downloaded = downloaded;
        self.store.save_download_state(&state)?;

        Ok(downloaded)
    }

    /// Verify final size and, when configured, the SHA-256 checksum. Promote
    /// the download record to verified only after both pass.
    async fn verify(&self, url: &str, destination: &Path, actual_bytes: u64) -> NodeResult<()> {
        let expected_total = self
            .store
            .download_state()
            .map(|s| s.total_bytes)
            .unwrap_or(0);

        if expected_total > 0 && actual_bytes != expected_total {
            self.discard(destination).await;
            return Err(NodeError::Corrupt {
                reason: format!(
                    "size mismatch: expected {expected_total} bytes, got {actual_bytes}"
                ),
            });
        }

        if let Some(expected) = self.config.expected_sha256.as_deref() {
            let digest = sha256_of_file(destination).await?;
            if !digest.eq_ignore_ascii_case(expected) {
                self.discard(destination).await;
                return Err(NodeError::Corrupt {
                    reason: format!("checksum mismatch: expected {expected}, got {digest}"),
                });
            }
        }

        self.store.save_download_state(&DownloadState {
            url: url.to_string(),
            destination_path: destination.to_path_buf(),
            total_bytes: actual_bytes,
            bytes_downloaded: actual_bytes,
            verified: true,
        })?;
        self.events.info("Snapshot download verified", None);
        Ok(())
    }

    /// Extract the verified archive into the data directory, then clean up
    /// the archive and resume record.
    async fn extract_and_finish(&self, archive: &Path) -> NodeResult<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let marker = self.data_dir.join(EXTRACT_MARKER);
        tokio::fs::write(&marker, b"").await?;

        self.events.info("Extracting snapshot", None);
        let deadline = Duration::from_secs(self.config.extract_timeout_secs);
        let output = timeout(
            deadline,
            Command::new("tar")
                .arg("-xzf")
                .arg(archive)
                .arg("-C")
                .arg(&self.data_dir)
                .output(),
        )
        .await
        .map_err(|_| NodeError::Timeout {
            operation: "snapshot extraction".to_string(),
            seconds: deadline.as_secs(),
        })??;

        if !output.status.success() {
            // Marker stays in place so a retry redoes the extraction
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            self.events
                .error("Snapshot extraction failed", Some(stderr.clone()));
            return Err(NodeError::Corrupt {
                reason: format!("extraction failed: {stderr}"),
            });
        }

        tokio::fs::remove_file(&marker).await?;
        tokio::fs::remove_file(archive).await.ok();
        self.store.clear_download_state()?;

        let _ = self.progress_tx.send(100.0);
        self.events.info("Snapshot extracted", None);
        Ok(())
    }

    /// Persist partial progress durably before surfacing an interruption
    async fn checkpoint(&self, file: &mut tokio::fs::File, state: &mut DownloadState, bytes: u64) {
        if let Err(err) = file.flush().await {
            tracing::warn!(error = %err, "failed to flush partial download");
        }
        if let Err(err) = file.sync_all().await {
            tracing::warn!(error = %err, "failed to sync partial download");
        }
        state.bytes_downloaded = bytes;
        if let Err(err) = self.store.save_download_state(state) {
            tracing::warn!(error = %err, "failed to persist download progress");
        }
    }

    async fn discard(&self, destination: &Path) {
        tokio::fs::remove_file(destination).await.ok();
        if let Err(err) = self.store.clear_download_state() {
            tracing::warn!(error = %err, "failed to clear download record");
        }
    }
}

/// Byte offset to resume from: only when the record matches the URL and the
/// partial file's size matches the recorded progress exactly.
async fn resume_offset(state: Option<&DownloadState>, url: &str, destination: &Path) -> u64 {
    let Some(state) = state else {
        return 0;
    };
    if state.url != url || state.verified || state.bytes_downloaded == 0 {
        return 0;
    }
    match tokio::fs::metadata(destination).await {
        Ok(meta) if meta.len() == state.bytes_downloaded => state.bytes_downloaded,
        _ => 0,
    }
}

fn archive_name(url: &str) -> String {
    url.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("snapshot.tar.gz")
        .to_string()
}

fn percentage(downloaded: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    ((downloaded as f64 / total as f64) * 100.0).clamp(0.0, 100.0) as f32
}

/// Hex SHA-256 of a file, streamed in bounded chunks
async fn sha256_of_file(path: &Path) -> NodeResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_name_from_url() {
        assert_eq!(
            archive_name("https://snapshots.example.com/backup_2026-08-01.tar.gz"),
            "backup_2026-08-01.tar.gz"
        );
        assert_eq!(archive_name("https://snapshots.example.com/"), "snapshot.tar.gz");
    }

    #[test]
    fn test_percentage_bounds() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(500, 1000), 50.0);
        assert_eq!(percentage(2000, 1000), 100.0);
    }

    #[tokio::test]
    async fn test_resume_offset_requires_matching_size() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("snap.tar.gz");
        tokio::fs::write(&dest, vec![0u8; 400]).await.unwrap();

        let state = DownloadState {
            url: "https://example.com/snap.tar.gz".into(),
            destination_path: dest.clone(),
            total_bytes: 1000,
            bytes_downloaded: 400,
            verified: false,
        };

        assert_eq!(
            resume_offset(Some(&state), "https://example.com/snap.tar.gz", &dest).await,
            400
        );
        // Different URL starts fresh
        assert_eq!(
            resume_offset(Some(&state), "https://example.com/other.tar.gz", &dest).await,
            0
        );
        // On-disk size disagreeing with the record starts fresh
        tokio::fs::write(&dest, vec![0u8; 399]).await.unwrap();
        assert_eq!(
            resume_offset(Some(&state), "https://example.com/snap.tar.gz", &dest).await,
            0
        );
    }

    #[tokio::test]
    async fn test_sha256_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        tokio::fs::write(&path, b"abc").await.unwrap();
        assert_eq!(
            sha256_of_file(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
