use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::playlist::MemoryPlaylist;
use crate::services::error::MusicError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeAction {
    CreatePlaylist,
    AddTrack,
    RemoveTrack,
}

#[derive(Serialize)]
struct ChangeLogEntry<'a> {
    timestamp: String,
    user: &'a str,
    action: ChangeAction,
    details: serde_json::Value,
}

/// The shared playlist file plus its append-only change log.
///
/// All access goes through one async mutex so concurrent commands never
/// interleave a read-modify-write.
pub struct PlaylistStore {
    path: PathBuf,
    log_path: PathBuf,
    lock: Mutex<()>,
}

impl PlaylistStore {
    pub fn new(path: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            log_path: log_path.into(),
            lock: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> Result<Vec<MemoryPlaylist>, MusicError> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    /// Applies `change` to the stored playlists and persists the result.
    ///
    /// Nothing is written when `change` fails.
    pub async fn update<R>(
        &self,
        change: impl FnOnce(&mut Vec<MemoryPlaylist>) -> Result<R, MusicError>,
    ) -> Result<R, MusicError> {
        let _guard = self.lock.lock().await;
        let mut playlists = self.read().await?;
        let result = change(&mut playlists)?;
        self.write(&playlists).await?;
        Ok(result)
    }

    pub async fn log_change(
        &self,
        user: &str,
        action: ChangeAction,
        details: serde_json::Value,
    ) -> Result<(), MusicError> {
        let entry = ChangeLogEntry {
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            user,
            action,
            details,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        ensure_parent(&self.log_path).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read(&self) -> Result<Vec<MemoryPlaylist>, MusicError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(Vec::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!("Creating playlist file {}", self.path.display());
                self.write(&[]).await?;
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes a sibling temp file and renames it over the store.
    async fn write(&self, playlists: &[MemoryPlaylist]) -> Result<(), MusicError> {
        ensure_parent(&self.path).await?;

        let mut buf = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        playlists.serialize(&mut serializer)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, &buf).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

async fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}
