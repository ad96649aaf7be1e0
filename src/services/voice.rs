use std::sync::Arc;

use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, GuildId};
use tokio::sync::mpsc;

use crate::domain::track::PlayableTrack;
use crate::services::error::MusicError;

/// Everything that moves a guild's playback loop forward.
#[derive(Debug)]
pub enum PlayerEvent {
    /// Something was queued; start playing if idle.
    Advance,
    /// The track started under `play_id` is over.
    TrackEnded { play_id: u64, error: Option<String> },
    /// The voice transport dropped and could not be recovered.
    ConnectionLost { reason: String },
}

/// Sending half of a guild player's event queue.
#[derive(Clone)]
pub struct PlayerEvents {
    tx: mpsc::UnboundedSender<PlayerEvent>,
}

impl PlayerEvents {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn advance(&self) {
        let _ = self.tx.send(PlayerEvent::Advance);
    }

    pub fn connection_lost(&self, reason: impl Into<String>) {
        let _ = self.tx.send(PlayerEvent::ConnectionLost {
            reason: reason.into(),
        });
    }

    pub fn finish_signal(&self, play_id: u64) -> FinishSignal {
        FinishSignal {
            events: self.clone(),
            play_id,
            fired: false,
        }
    }
}

/// Fires `TrackEnded` for one play exactly once.
///
/// If it is dropped unfired (the driver discarded the track without an end
/// event) it still fires, carrying an error.
pub struct FinishSignal {
    events: PlayerEvents,
    play_id: u64,
    fired: bool,
}

impl FinishSignal {
    pub fn finish(mut self, error: Option<String>) {
        self.fire(error);
    }

    fn fire(&mut self, error: Option<String>) {
        if self.fired {
            return;
        }
        self.fired = true;
        let _ = self.events.tx.send(PlayerEvent::TrackEnded {
            play_id: self.play_id,
            error,
        });
    }
}

impl Drop for FinishSignal {
    fn drop(&mut self) {
        self.fire(Some("playback was interrupted".to_string()));
    }
}

/// One guild's connection to a voice channel.
///
/// Starts disconnected. `play` hands over a [`FinishSignal`] which the
/// session fires when the stream ends, is stopped, or errors.
#[async_trait]
pub trait VoiceSession: Send + Sync {
    async fn connect(&self, channel_id: ChannelId) -> Result<(), MusicError>;

    async fn move_to(&self, channel_id: ChannelId) -> Result<(), MusicError>;

    async fn disconnect(&self);

    fn channel(&self) -> Option<ChannelId>;

    fn is_connected(&self) -> bool {
        self.channel().is_some()
    }

    async fn is_playing(&self) -> bool;

    /// Fails with [`MusicError::AlreadyPlaying`] if a track is still running.
    async fn play(&self, track: &PlayableTrack, on_finish: FinishSignal)
        -> Result<(), MusicError>;

    /// Halts the current track; its finish signal fires without an error.
    async fn stop(&self);
}

/// Creates the voice session for a guild.
pub trait VoiceConnector: Send + Sync {
    fn session(&self, guild_id: GuildId, events: PlayerEvents) -> Arc<dyn VoiceSession>;
}
