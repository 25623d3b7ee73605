//! Cleanup supervisor (Component H, §4.8).
//!
//! A background task that walks the cache root and deletes segments/
//! playlists whose atime has aged past the configured TTL, then removes
//! directories left empty. Grounded on `hls-vod-server`'s `main.rs`
//! periodic `tokio::time::interval` sweep (there driven every 60s calling
//! `cleanup_expired_streams`), retimed here to the spec's 30s-then-hourly
//! cadence and retargeted at on-disk TTL sweeping instead of in-memory
//! stream eviction.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::sleep;

const FIRST_SWEEP_DELAY: Duration = Duration::from_secs(30);
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    pub files_deleted: u64,
    pub bytes_freed: u64,
    pub dirs_removed: u64,
}

pub struct CleanupSupervisor {
    cache_root: std::path::PathBuf,
    ttl: Duration,
    stopped: Arc<AtomicBool>,
}

impl CleanupSupervisor {
    pub fn new(cache_root: std::path::PathBuf, ttl_hours: u64) -> Self {
        Self {
            cache_root,
            ttl: Duration::from_secs(ttl_hours * 3600),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawns the supervisor loop: first sweep 30s after start, then
    /// hourly. Returns a handle whose `stop()` cancels the timer (an
    /// in-progress sweep still completes).
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            sleep(FIRST_SWEEP_DELAY).await;
            loop {
                if self.stopped.load(Ordering::SeqCst) {
                    break;
                }
                let stats = self.sweep_once().await;
                tracing::info!(
                    deleted = stats.files_deleted,
                    bytes_freed = stats.bytes_freed,
                    dirs_removed = stats.dirs_removed,
                    "cleanup sweep complete"
                );
                if self.stopped.load(Ordering::SeqCst) {
                    break;
                }
                sleep(SWEEP_INTERVAL).await;
            }
        })
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub async fn sweep_once(&self) -> SweepStats {
        let root = self.cache_root.clone();
        let ttl = self.ttl;
        tokio::task::spawn_blocking(move || sweep_dir(&root, ttl))
            .await
            .unwrap_or_default()
    }
}

fn sweep_dir(dir: &Path, ttl: Duration) -> SweepStats {
    let mut stats = SweepStats::default();
    sweep_recursive(dir, ttl, &mut stats);
    stats
}

/// Returns true if, after processing, `dir` is empty (so the caller can
/// remove it too).
fn sweep_recursive(dir: &Path, ttl: Duration, stats: &mut SweepStats) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    let mut remaining = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let became_empty = sweep_recursive(&path, ttl, stats);
            if became_empty {
                if std::fs::remove_dir(&path).is_ok() {
                    stats.dirs_removed += 1;
                } else {
                    remaining += 1;
                }
            } else {
                remaining += 1;
            }
            continue;
        }

        let is_target = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("ts") | Some("m3u8")
        );
        if !is_target {
            remaining += 1;
            continue;
        }

        let Ok(meta) = entry.metadata() else {
            remaining += 1;
            continue;
        };
        let accessed = meta.accessed().unwrap_or(SystemTime::now());
        let age = SystemTime::now().duration_since(accessed).unwrap_or(Duration::ZERO);
        if age > ttl {
            let len = meta.len();
            if std::fs::remove_file(&path).is_ok() {
                stats.files_deleted += 1;
                stats.bytes_freed += len;
                continue;
            }
        }
        remaining += 1;
    }
    remaining == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::time::Duration as StdDuration;

    #[test]
    fn sweep_removes_aged_segments_and_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let media_dir = dir.path().join("m").join("adefault").join("720p");
        std::fs::create_dir_all(&media_dir).unwrap();
        let old_file = media_dir.join("0.ts");
        std::fs::write(&old_file, b"segment").unwrap();

        let old_time = FileTime::from_system_time(SystemTime::now() - StdDuration::from_secs(25 * 3600));
        filetime::set_file_atime(&old_file, old_time).unwrap();

        let stats = sweep_dir(dir.path(), Duration::from_secs(24 * 3600));
        assert_eq!(stats.files_deleted, 1);
        assert!(!old_file.exists());
        assert!(!media_dir.exists(), "empty parent directories should be removed");
    }

    #[test]
    fn sweep_keeps_fresh_segments() {
        let dir = tempfile::tempdir().unwrap();
        let media_dir = dir.path().join("m").join("adefault").join("720p");
        std::fs::create_dir_all(&media_dir).unwrap();
        let fresh_file = media_dir.join("0.ts");
        std::fs::write(&fresh_file, b"segment").unwrap();

        let stats = sweep_dir(dir.path(), Duration::from_secs(24 * 3600));
        assert_eq!(stats.files_deleted, 0);
        assert!(fresh_file.exists());
    }
}
