use std::sync::Arc;

use serde_json::json;

use crate::domain::playlist::{MemoryPlaylist, PlaylistEntry};
use crate::infrastructure::playlist_store::{ChangeAction, PlaylistStore};
use crate::services::error::MusicError;
use crate::services::music_service::{MediaResolver, MusicService};
use crate::services::report::fit_message;

/// Playlists longer than this are summarised in the overview.
const MAX_LISTED_SONGS: usize = 15;

/// Saved playlists shared by everyone using the bot.
///
/// Users address playlists and items by one-based ids.
pub struct MemoryPlaylistService {
    store: PlaylistStore,
    resolver: Arc<dyn MediaResolver>,
}

fn find(playlists: &[MemoryPlaylist], user_id: usize) -> Result<&MemoryPlaylist, MusicError> {
    user_id
        .checked_sub(1)
        .and_then(|id| playlists.iter().find(|p| p.id == id))
        .ok_or(MusicError::PlaylistNotFound(user_id))
}

fn find_mut(
    playlists: &mut [MemoryPlaylist],
    user_id: usize,
) -> Result<&mut MemoryPlaylist, MusicError> {
    user_id
        .checked_sub(1)
        .and_then(|id| playlists.iter_mut().find(|p| p.id == id))
        .ok_or(MusicError::PlaylistNotFound(user_id))
}

impl MemoryPlaylistService {
    pub fn new(store: PlaylistStore, resolver: Arc<dyn MediaResolver>) -> Self {
        Self { store, resolver }
    }

    pub async fn create_playlist(&self, user: &str, name: &str) -> Result<String, MusicError> {
        let id = self
            .store
            .update(|playlists| {
                let id = playlists.iter().map(|p| p.id + 1).max().unwrap_or(0);
                playlists.push(MemoryPlaylist::new(id, name));
                Ok(id)
            })
            .await?;

        tracing::info!("{user} created playlist '{name}' ({})", id + 1);
        self.log(
            user,
            ChangeAction::CreatePlaylist,
            json!({ "playlist_id": id + 1, "title": name }),
        )
        .await;
        Ok(format!("Playlist '{name}' created with ID {}!", id + 1))
    }

    pub async fn add_to_playlist(
        &self,
        user: &str,
        playlist_id: usize,
        url: &str,
    ) -> Result<String, MusicError> {
        find(&self.store.load().await?, playlist_id)?;

        let title = self.fetch_title(url).await;
        let playlist_title = self
            .store
            .update(|playlists| {
                let playlist = find_mut(playlists, playlist_id)?;
                playlist.push_entry(url, title.as_str());
                Ok(playlist.title.clone())
            })
            .await?;

        self.log(
            user,
            ChangeAction::AddTrack,
            json!({ "playlist_id": playlist_id, "title": title, "url": url }),
        )
        .await;
        Ok(format!("Added '{title}' to playlist '{playlist_title}'"))
    }

    pub async fn remove_from_playlist(
        &self,
        user: &str,
        playlist_id: usize,
        track_id: usize,
    ) -> Result<String, MusicError> {
        let (removed, playlist_title) = self
            .store
            .update(|playlists| {
                let playlist = find_mut(playlists, playlist_id)?;
                let removed = track_id
                    .checked_sub(1)
                    .and_then(|id| playlist.remove_entry(id))
                    .ok_or_else(|| MusicError::PlaylistItemNotFound {
                        playlist: playlist.title.clone(),
                        track_id,
                    })?;
                Ok((removed, playlist.title.clone()))
            })
            .await?;

        self.log(
            user,
            ChangeAction::RemoveTrack,
            json!({ "playlist_id": playlist_id, "removed_title": removed.title }),
        )
        .await;
        Ok(format!(
            "Removed '{}' from playlist '{playlist_title}'",
            removed.title
        ))
    }

    pub async fn show_playlists(&self) -> Result<String, MusicError> {
        let playlists = self.store.load().await?;
        if playlists.is_empty() {
            return Ok("No playlists found.".to_string());
        }

        let separator = "-".repeat(40);
        let mut lines = Vec::new();
        for playlist in &playlists {
            if playlist.data.len() > MAX_LISTED_SONGS {
                lines.push(format!(
                    "{}. {} (over {MAX_LISTED_SONGS} songs)",
                    playlist.id + 1,
                    playlist.title
                ));
            } else {
                lines.push(format!("{}. {}", playlist.id + 1, playlist.title));
                lines.extend(
                    playlist
                        .data
                        .iter()
                        .map(|item| format!("    {}. {}", item.id + 1, item.title)),
                );
            }
            lines.push(separator.clone());
        }

        Ok(fit_message(format!("Playlists:\n{}", lines.join("\n")), || {
            let names = playlists
                .iter()
                .map(|p| format!("{}. {} ({} songs)", p.id + 1, p.title, p.data.len()))
                .collect::<Vec<_>>()
                .join("\n");
            fit_message(format!("Playlists:\n{names}"), || {
                format!("Playlists: {} saved (too many to list)", playlists.len())
            })
        }))
    }

    pub async fn show_playlist_content(&self, playlist_id: usize) -> Result<String, MusicError> {
        let playlists = self.store.load().await?;
        let playlist = find(&playlists, playlist_id)?;
        if playlist.data.is_empty() {
            return Ok(format!("Playlist '{}' is empty.", playlist.title));
        }

        let listing = playlist
            .data
            .iter()
            .map(|item| format!("{}. {} ({})", item.id + 1, item.title, item.url))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(fit_message(
            format!("Playlist '{}':\n{listing}", playlist.title),
            || {
                format!(
                    "Playlist '{}': {} songs (too many to list)",
                    playlist.title,
                    playlist.data.len()
                )
            },
        ))
    }

    /// Entries of a saved playlist, in order, ready to be queued.
    pub async fn entries(&self, playlist_id: usize) -> Result<Vec<PlaylistEntry>, MusicError> {
        let playlists = self.store.load().await?;
        let playlist = find(&playlists, playlist_id)?;
        if playlist.data.is_empty() {
            return Err(MusicError::PlaylistEmpty(playlist.title.clone()));
        }
        Ok(playlist.data.clone())
    }

    async fn fetch_title(&self, url: &str) -> String {
        if MusicService::is_list_url(url) {
            self.resolver
                .resolve_playlist_title(url)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!("Could not fetch playlist title for {url}: {e}");
                    "Unknown playlist".to_string()
                })
        } else {
            self.resolver.resolve_title(url).await.unwrap_or_else(|e| {
                tracing::warn!("Could not fetch title for {url}: {e}");
                "Unknown".to_string()
            })
        }
    }

    async fn log(&self, user: &str, action: ChangeAction, details: serde_json::Value) {
        if let Err(e) = self.store.log_change(user, action, details).await {
            tracing::error!("Failed to record playlist change: {e}");
        }
    }
}
