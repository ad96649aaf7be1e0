/// Failures while turning a URL into tracks or an audio stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("no playable audio format")]
    NoPlayableFormat,
    #[error("extractor failed: {0}")]
    ExtractorCrash(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MusicError {
    #[error("You need to be in a voice channel to play music.")]
    NotInVoiceChannel,
    #[error("Only YouTube links are supported.")]
    UnsupportedUrl,
    #[error("This command must be used in a server")]
    NotInGuild,
    #[error("Queue is empty.")]
    EmptyQueue,
    #[error("Not connected to a voice channel")]
    NotConnected,
    #[error("Already playing a track")]
    AlreadyPlaying,
    #[error("Failed to join voice channel: {0}")]
    ConnectFailure(String),
    #[error("Playlist with ID {0} not found.")]
    PlaylistNotFound(usize),
    #[error("Playlist '{0}' is empty.")]
    PlaylistEmpty(String),
    #[error("Item with ID {track_id} not found in playlist '{playlist}'")]
    PlaylistItemNotFound { playlist: String, track_id: usize },
    #[error("Could not resolve media: {0}")]
    Resolve(#[from] ResolveError),
    #[error("Playlist storage failed: {0}")]
    Persistence(String),
}

impl From<std::io::Error> for MusicError {
    fn from(e: std::io::Error) -> Self {
        MusicError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for MusicError {
    fn from(e: serde_json::Error) -> Self {
        MusicError::Persistence(e.to_string())
    }
}
