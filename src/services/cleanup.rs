use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::task::JoinHandle;

use crate::config::Config;

struct CachedFile {
    path: PathBuf,
    modified: SystemTime,
    len: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub evicted: usize,
}

/// Keeps the download directory under an age and size budget.
pub struct DiskCleanup {
    dir: PathBuf,
    max_age: Duration,
    max_total_bytes: u64,
    interval: Duration,
}

impl DiskCleanup {
    pub fn new(
        dir: impl Into<PathBuf>,
        max_age: Duration,
        max_total_bytes: u64,
        interval: Duration,
    ) -> Self {
        Self {
            dir: dir.into(),
            max_age,
            max_total_bytes,
            interval,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.download_dir,
            config.max_file_age,
            config.max_download_bytes,
            config.cleanup_interval,
        )
    }

    /// Sweeps now and then once per interval, for the life of the process.
    pub fn spawn(self) -> JoinHandle<()> {
        tracing::info!(
            "Disk cleanup watching {} every {:?}",
            self.dir.display(),
            self.interval
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep(SystemTime::now()).await;
            }
        })
    }

    pub async fn sweep(&self, now: SystemTime) -> SweepReport {
        let expired = self.remove_expired(now).await;
        let evicted = self.enforce_budget().await;
        if expired + evicted > 0 {
            tracing::info!(
                "Disk cleanup removed {expired} expired and {evicted} oversize files from {}",
                self.dir.display()
            );
        }
        SweepReport { expired, evicted }
    }

    async fn remove_expired(&self, now: SystemTime) -> usize {
        let mut removed = 0;
        for file in self.files().await {
            let age = now.duration_since(file.modified).unwrap_or_default();
            if age > self.max_age && remove(&file).await {
                removed += 1;
            }
        }
        removed
    }

    /// Deletes oldest first until the directory fits the budget.
    async fn enforce_budget(&self) -> usize {
        let mut files = self.files().await;
        let mut total: u64 = files.iter().map(|f| f.len).sum();
        if total <= self.max_total_bytes {
            return 0;
        }

        files.sort_by_key(|f| f.modified);
        let mut removed = 0;
        for file in files {
            if total <= self.max_total_bytes {
                break;
            }
            if remove(&file).await {
                total = total.saturating_sub(file.len);
                removed += 1;
            }
        }
        if total > self.max_total_bytes {
            tracing::warn!(
                "{} still holds {total} bytes after cleanup",
                self.dir.display()
            );
        }
        removed
    }

    async fn files(&self) -> Vec<CachedFile> {
        match self.scan().await {
            Ok(files) => files,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::error!("Could not scan {}: {e}", self.dir.display());
                Vec::new()
            }
        }
    }

    async fn scan(&self) -> io::Result<Vec<CachedFile>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("Skipping {}: {e}", entry.path().display());
                    continue;
                }
            };
            files.push(CachedFile {
                path: entry.path(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                len: metadata.len(),
            });
        }
        Ok(files)
    }
}

async fn remove(file: &CachedFile) -> bool {
    match fs::remove_file(&file.path).await {
        Ok(()) => {
            tracing::debug!("Deleted {}", file.path.display());
            true
        }
        Err(e) => {
            tracing::warn!("Failed to delete {}: {e}", file.path.display());
            false
        }
    }
}
