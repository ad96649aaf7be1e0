use async_trait::async_trait;
use futures::stream::BoxStream;
use regex::Regex;
use std::sync::LazyLock;

use crate::domain::track::{PlayableTrack, Track};
use crate::services::error::ResolveError;

static YOUTUBE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:youtube\.com/(?:watch|playlist|shorts/)|youtu\.be/|music\.youtube\.com/)")
        .unwrap()
});

/// Turns user supplied URLs into tracks and playable streams.
///
/// Calls may take several seconds (network plus process startup), so they
/// must never be made while holding a lock another guild could need.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Locates an audio stream for a single video.
    async fn resolve_single(&self, url: &str) -> Result<PlayableTrack, ResolveError>;

    async fn resolve_title(&self, url: &str) -> Result<String, ResolveError>;

    async fn resolve_playlist_title(&self, url: &str) -> Result<String, ResolveError>;

    /// Streams the entries of a list URL as they are discovered.
    ///
    /// Dropping the stream cancels the underlying work. Malformed entries are
    /// skipped; an extractor failure is yielded at most once, as the last item.
    fn stream_list(&self, url: &str) -> BoxStream<'static, Result<Track, ResolveError>>;
}

pub struct MusicService;

impl MusicService {
    pub fn is_youtube_url(query: &str) -> bool {
        YOUTUBE_URL_RE.is_match(query)
    }

    /// Any URL carrying a `list=` parameter is treated as a list.
    pub fn is_list_url(url: &str) -> bool {
        url.contains("list=")
    }
}
