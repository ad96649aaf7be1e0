//! In-memory stand-ins for yt-dlp, the voice driver and Discord channels.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use poise::serenity_prelude::{ChannelId, GuildId};
use tokio::sync::{Notify, mpsc};

use crate::domain::track::{PlayableTrack, Track};
use crate::services::error::{MusicError, ResolveError};
use crate::services::music_service::MediaResolver;
use crate::services::report::Reporter;
use crate::services::voice::{FinishSignal, PlayerEvents, VoiceConnector, VoiceSession};

pub fn track(n: &str) -> Track {
    Track::new(format!("https://youtu.be/{n}"), format!("Song {n}"))
}

/// Polls `check` until it holds, failing the test after two seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

type ListFeed = mpsc::UnboundedReceiver<Result<Track, ResolveError>>;

#[derive(Default)]
pub struct FakeResolver {
    titles: Mutex<HashMap<String, String>>,
    unplayable: Mutex<HashSet<String>>,
    lists: Mutex<HashMap<String, ListFeed>>,
    title_gates: Mutex<HashMap<String, Arc<Notify>>>,
    stream_gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl FakeResolver {
    pub fn add_title(&self, url: &str, title: &str) {
        self.titles
            .lock()
            .unwrap()
            .insert(url.to_string(), title.to_string());
    }

    pub fn mark_unplayable(&self, url: &str) {
        self.unplayable.lock().unwrap().insert(url.to_string());
    }

    /// Entries sent on the returned channel come out of `stream_list(url)`.
    pub fn feed_list(&self, url: &str) -> mpsc::UnboundedSender<Result<Track, ResolveError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lists.lock().unwrap().insert(url.to_string(), rx);
        tx
    }

    /// The next `resolve_title(url)` waits until the returned gate is notified.
    pub fn hold_title(&self, url: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.title_gates
            .lock()
            .unwrap()
            .insert(url.to_string(), gate.clone());
        gate
    }

    /// The next `resolve_single(url)` waits until the returned gate is notified.
    pub fn hold_stream(&self, url: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.stream_gates
            .lock()
            .unwrap()
            .insert(url.to_string(), gate.clone());
        gate
    }

    fn title(&self, url: &str) -> Option<String> {
        self.titles.lock().unwrap().get(url).cloned()
    }
}

#[async_trait]
impl MediaResolver for FakeResolver {
    async fn resolve_single(&self, url: &str) -> Result<PlayableTrack, ResolveError> {
        let gate = self.stream_gates.lock().unwrap().remove(url);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.unplayable.lock().unwrap().contains(url) {
            return Err(ResolveError::NoPlayableFormat);
        }
        Ok(PlayableTrack {
            title: self.title(url).unwrap_or_else(|| {
                format!("Song {}", url.trim_start_matches("https://youtu.be/"))
            }),
            stream_url: format!("{url}#audio"),
        })
    }

    async fn resolve_title(&self, url: &str) -> Result<String, ResolveError> {
        let gate = self.title_gates.lock().unwrap().remove(url);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.title(url)
            .ok_or_else(|| ResolveError::Network(format!("no such video: {url}")))
    }

    async fn resolve_playlist_title(&self, url: &str) -> Result<String, ResolveError> {
        self.title(url)
            .ok_or_else(|| ResolveError::ExtractorCrash(format!("no such list: {url}")))
    }

    fn stream_list(&self, url: &str) -> BoxStream<'static, Result<Track, ResolveError>> {
        match self.lists.lock().unwrap().remove(url) {
            Some(rx) => futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|entry| (entry, rx))
            })
            .boxed(),
            None => futures::stream::empty().boxed(),
        }
    }
}

#[derive(Default)]
pub struct FakeConnector {
    sessions: Mutex<HashMap<GuildId, Arc<FakeSession>>>,
}

impl FakeConnector {
    pub fn session_for(&self, guild_id: GuildId) -> Arc<FakeSession> {
        self.sessions
            .lock()
            .unwrap()
            .get(&guild_id)
            .cloned()
            .expect("no session created for guild")
    }
}

impl VoiceConnector for FakeConnector {
    fn session(&self, guild_id: GuildId, events: PlayerEvents) -> Arc<dyn VoiceSession> {
        let session = Arc::new(FakeSession::new(events));
        self.sessions
            .lock()
            .unwrap()
            .insert(guild_id, session.clone());
        session
    }
}

pub struct FakeSession {
    events: PlayerEvents,
    channel: Mutex<Option<ChannelId>>,
    current: Mutex<Option<(String, FinishSignal)>>,
    played: Mutex<Vec<String>>,
}

impl FakeSession {
    fn new(events: PlayerEvents) -> Self {
        Self {
            events,
            channel: Mutex::new(None),
            current: Mutex::new(None),
            played: Mutex::new(Vec::new()),
        }
    }

    /// Ends the current track as if the stream ran out.
    pub fn finish_current(&self) {
        let current = self.current.lock().unwrap().take();
        if let Some((_, signal)) = current {
            signal.finish(None);
        }
    }

    pub fn lose_connection(&self, reason: &str) {
        self.events.connection_lost(reason);
    }

    pub fn now_playing(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .map(|(title, _)| title.clone())
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl VoiceSession for FakeSession {
    async fn connect(&self, channel_id: ChannelId) -> Result<(), MusicError> {
        *self.channel.lock().unwrap() = Some(channel_id);
        Ok(())
    }

    async fn move_to(&self, channel_id: ChannelId) -> Result<(), MusicError> {
        let mut channel = self.channel.lock().unwrap();
        if channel.is_none() {
            return Err(MusicError::NotConnected);
        }
        *channel = Some(channel_id);
        Ok(())
    }

    async fn disconnect(&self) {
        self.finish_current();
        *self.channel.lock().unwrap() = None;
    }

    fn channel(&self) -> Option<ChannelId> {
        *self.channel.lock().unwrap()
    }

    async fn is_playing(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }

    async fn play(
        &self,
        track: &PlayableTrack,
        on_finish: FinishSignal,
    ) -> Result<(), MusicError> {
        let mut current = self.current.lock().unwrap();
        if current.is_some() {
            return Err(MusicError::AlreadyPlaying);
        }
        *current = Some((track.title.clone(), on_finish));
        self.played.lock().unwrap().push(track.title.clone());
        Ok(())
    }

    async fn stop(&self) {
        self.finish_current();
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    messages: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn say(&self, text: String) {
        self.messages.lock().unwrap().push(text);
    }
}
