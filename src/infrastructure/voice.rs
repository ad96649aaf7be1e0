use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, GuildId};
use songbird::Songbird;
use songbird::events::{CoreEvent, Event, EventContext, EventHandler, TrackEvent};
use songbird::tracks::{PlayMode, TrackHandle};
use tokio::sync::Mutex;

use crate::domain::track::PlayableTrack;
use crate::infrastructure::audio::AudioSource;
use crate::services::error::MusicError;
use crate::services::voice::{FinishSignal, PlayerEvents, VoiceConnector, VoiceSession};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Hands out songbird-backed sessions.
pub struct SongbirdConnector {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    connect_attempts: u32,
}

impl SongbirdConnector {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client, connect_attempts: u32) -> Self {
        Self {
            manager,
            http,
            connect_attempts: connect_attempts.max(1),
        }
    }
}

impl VoiceConnector for SongbirdConnector {
    fn session(&self, guild_id: GuildId, events: PlayerEvents) -> Arc<dyn VoiceSession> {
        Arc::new(SongbirdSession {
            manager: self.manager.clone(),
            http: self.http.clone(),
            guild_id,
            events,
            connect_attempts: self.connect_attempts,
            channel: AtomicU64::new(0),
            current: Mutex::new(None),
        })
    }
}

pub struct SongbirdSession {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    guild_id: GuildId,
    events: PlayerEvents,
    connect_attempts: u32,
    /// Raw id of the joined channel, 0 while disconnected.
    channel: AtomicU64,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdSession {
    async fn join(&self, channel_id: ChannelId) -> Result<(), MusicError> {
        let manager = self.manager.clone();
        let guild_id = self.guild_id;
        let call = retry_with_backoff(self.connect_attempts, INITIAL_BACKOFF, move || {
            let manager = manager.clone();
            async move { manager.join(guild_id, channel_id).await }
        })
        .await
        .map_err(|e| {
            tracing::error!("Guild {guild_id}: could not join {channel_id}: {e}");
            MusicError::ConnectFailure(e.to_string())
        })?;

        let mut call = call.lock().await;
        call.remove_all_global_events();
        call.add_global_event(
            Event::Core(CoreEvent::DriverDisconnect),
            DisconnectNotifier {
                events: self.events.clone(),
            },
        );
        self.channel.store(channel_id.get(), Ordering::SeqCst);
        tracing::info!("Guild {guild_id}: joined voice channel {channel_id}");
        Ok(())
    }
}

/// Runs `op` up to `attempts` times, sleeping `backoff` after the first
/// failure and doubling it after each one after that.
async fn retry_with_backoff<T, E, F, Fut>(
    attempts: u32,
    mut backoff: Duration,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!("Attempt {attempt}/{attempts} failed: {e}, retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[async_trait]
impl VoiceSession for SongbirdSession {
    async fn connect(&self, channel_id: ChannelId) -> Result<(), MusicError> {
        self.join(channel_id).await
    }

    async fn move_to(&self, channel_id: ChannelId) -> Result<(), MusicError> {
        if !self.is_connected() {
            return Err(MusicError::NotConnected);
        }
        self.join(channel_id).await
    }

    async fn disconnect(&self) {
        self.stop().await;
        self.channel.store(0, Ordering::SeqCst);
        if let Err(e) = self.manager.remove(self.guild_id).await {
            tracing::debug!("Guild {}: leave: {e}", self.guild_id);
        }
    }

    fn channel(&self) -> Option<ChannelId> {
        match self.channel.load(Ordering::SeqCst) {
            0 => None,
            id => Some(ChannelId::new(id)),
        }
    }

    async fn is_playing(&self) -> bool {
        match self.current.lock().await.as_ref() {
            Some(handle) => is_running(handle).await,
            None => false,
        }
    }

    async fn play(
        &self,
        track: &PlayableTrack,
        on_finish: FinishSignal,
    ) -> Result<(), MusicError> {
        let call = self.manager.get(self.guild_id).ok_or(MusicError::NotConnected)?;
        let mut current = self.current.lock().await;
        if let Some(handle) = current.as_ref() {
            if is_running(handle).await {
                return Err(MusicError::AlreadyPlaying);
            }
        }

        let input = AudioSource::from_stream(self.http.clone(), &track.stream_url);
        let handle = call.lock().await.play_input(input);

        let notifier = TrackEndNotifier {
            signal: Arc::new(Mutex::new(Some(on_finish))),
        };
        for event in [TrackEvent::End, TrackEvent::Error] {
            if let Err(e) = handle.add_event(Event::Track(event), notifier.clone()) {
                tracing::warn!("Guild {}: could not watch '{}': {e}", self.guild_id, track.title);
            }
        }
        *current = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        if let Some(handle) = self.current.lock().await.take() {
            let _ = handle.stop();
        }
    }
}

async fn is_running(handle: &TrackHandle) -> bool {
    match handle.get_info().await {
        Ok(state) => matches!(state.playing, PlayMode::Play | PlayMode::Pause),
        Err(_) => false,
    }
}

/// Fires the finish signal on whichever of end or error comes first.
///
/// If the driver drops the track before either, the signal's own drop
/// reports the interruption.
#[derive(Clone)]
struct TrackEndNotifier {
    signal: Arc<Mutex<Option<FinishSignal>>>,
}

#[async_trait]
impl EventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(format!("{e:?}")),
                _ => None,
            }),
            _ => None,
        };
        if let Some(signal) = self.signal.lock().await.take() {
            signal.finish(error);
        }
        None
    }
}

struct DisconnectNotifier {
    events: PlayerEvents,
}

#[async_trait]
impl EventHandler for DisconnectNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::DriverDisconnect(data) = ctx {
            if let Some(reason) = &data.reason {
                self.events.connection_lost(format!("{reason:?}"));
            }
        }
        None
    }
}
