use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use poise::serenity_prelude::{ChannelId, GuildId};
use tokio::sync::{Mutex, Notify, RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::domain::playlist::PlaylistEntry;
use crate::domain::queue::MusicQueue;
use crate::domain::track::Track;
use crate::services::error::MusicError;
use crate::services::music_service::{MediaResolver, MusicService};
use crate::services::report::{Reporter, fit_message};
use crate::services::voice::{PlayerEvent, PlayerEvents, VoiceConnector, VoiceSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    /// No voice connection.
    Idle,
    /// A list is still being resolved into the queue.
    Gathering,
    Playing,
    /// Connected with nothing left to play.
    Draining,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued { track: Track, position: usize },
    Gathering,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipOutcome {
    Skipped(Track),
    /// The skipped track was the last one.
    NoMoreSongs(Track),
    NothingPlaying,
}

/// One unit of work for a background gather.
#[derive(Debug, Clone)]
enum GatherItem {
    Track(Track),
    List(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Resolving,
    Playing,
}

struct Current {
    track: Track,
    play_id: u64,
    phase: Phase,
}

#[derive(Default)]
struct PlayerState {
    current: Option<Current>,
    next_play_id: u64,
    gather: Option<JoinHandle<()>>,
}

impl PlayerState {
    fn gathering(&self) -> bool {
        self.gather.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn cancel_gather(&mut self) {
        if let Some(handle) = self.gather.take() {
            handle.abort();
        }
    }
}

/// Queue, voice session and playback loop of a single guild.
///
/// Only the player's own event task pops from the queue, so there is never
/// more than one playback loop per guild.
pub struct GuildPlayer {
    guild_id: GuildId,
    queue: Mutex<MusicQueue>,
    state: Mutex<PlayerState>,
    session: Arc<dyn VoiceSession>,
    resolver: Arc<dyn MediaResolver>,
    events: PlayerEvents,
    reporter: RwLock<Option<Arc<dyn Reporter>>>,
    /// Serializes enqueues so submission order is queue order.
    enqueue_lock: Mutex<()>,
    gather_epoch: AtomicU64,
    /// Bumped by every leave; enqueues that started before it are dropped.
    generation: AtomicU64,
    /// Wakes a play loop that is waiting on resolution of a dropped track.
    interrupt: Notify,
}

impl GuildPlayer {
    fn spawn(
        guild_id: GuildId,
        resolver: Arc<dyn MediaResolver>,
        connector: &dyn VoiceConnector,
    ) -> Arc<Self> {
        let (events, rx) = PlayerEvents::channel();
        let player = Arc::new(Self {
            guild_id,
            queue: Mutex::new(MusicQueue::default()),
            state: Mutex::new(PlayerState::default()),
            session: connector.session(guild_id, events.clone()),
            resolver,
            events,
            reporter: RwLock::new(None),
            enqueue_lock: Mutex::new(()),
            gather_epoch: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            interrupt: Notify::new(),
        });
        tokio::spawn(player.clone().run(rx));
        player
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<PlayerEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                PlayerEvent::Advance => {}
                PlayerEvent::TrackEnded { play_id, error } => {
                    if !self.track_ended(play_id, error).await {
                        continue;
                    }
                }
                PlayerEvent::ConnectionLost { reason } => {
                    self.connection_lost(reason).await;
                    continue;
                }
            }
            self.play_next().await;
        }
    }

    /// Returns false for stale notifications from earlier plays.
    async fn track_ended(&self, play_id: u64, error: Option<String>) -> bool {
        let mut state = self.state.lock().await;
        let Some(current) = state.current.take_if(|current| current.play_id == play_id) else {
            return false;
        };
        if let Some(error) = error {
            tracing::warn!(
                "Guild {}: '{}' ended with error: {error}",
                self.guild_id,
                current.track
            );
        }
        true
    }

    /// Pops and plays until something is playing or the queue runs dry.
    async fn play_next(&self) {
        loop {
            let interrupted = self.interrupt.notified();
            tokio::pin!(interrupted);
            let (track, play_id) = {
                let mut state = self.state.lock().await;
                if state.current.is_some() || !self.session.is_connected() {
                    return;
                }
                let Some(track) = self.queue.lock().await.pop() else {
                    tracing::debug!("Guild {}: queue drained", self.guild_id);
                    return;
                };
                let play_id = state.next_play_id;
                state.next_play_id += 1;
                state.current = Some(Current {
                    track: track.clone(),
                    play_id,
                    phase: Phase::Resolving,
                });
                interrupted.as_mut().enable();
                (track, play_id)
            };

            let resolved = tokio::select! {
                resolved = self.resolver.resolve_single(&track.source_url) => Some(resolved),
                _ = &mut interrupted => None,
            };

            let mut state = self.state.lock().await;
            let still_wanted = state
                .current
                .as_ref()
                .is_some_and(|current| current.play_id == play_id);
            let Some(resolved) = resolved.filter(|_| still_wanted) else {
                if still_wanted {
                    state.current = None;
                }
                tracing::debug!("Guild {}: dropped '{track}' after skip", self.guild_id);
                continue;
            };

            let playable = match resolved {
                Ok(playable) => playable,
                Err(e) => {
                    state.current = None;
                    drop(state);
                    tracing::warn!("Guild {}: failed to resolve '{track}': {e}", self.guild_id);
                    self.report(format!(
                        "Unable to play '{}': {e}. This song will be skipped.",
                        track.title
                    ))
                    .await;
                    continue;
                }
            };

            let signal = self.events.finish_signal(play_id);
            match self.session.play(&playable, signal).await {
                Ok(()) => {
                    if let Some(current) = state.current.as_mut() {
                        current.phase = Phase::Playing;
                    }
                    drop(state);
                    tracing::info!("Guild {}: now playing '{}'", self.guild_id, track.title);
                    self.report(format!("Now playing: {}", track.title)).await;
                    return;
                }
                Err(e) => {
                    state.current = None;
                    drop(state);
                    tracing::warn!("Guild {}: failed to play '{track}': {e}", self.guild_id);
                    self.report(format!(
                        "Unable to play '{}': {e}. This song will be skipped.",
                        track.title
                    ))
                    .await;
                }
            }
        }
    }

    async fn connection_lost(&self, reason: String) {
        tracing::warn!("Guild {}: voice connection lost: {reason}", self.guild_id);
        if self.leave().await {
            self.report(format!("Lost connection to the voice channel ({reason}).")).await;
        }
    }

    async fn report(&self, text: String) {
        let reporter = self.reporter.read().await.clone();
        if let Some(reporter) = reporter {
            reporter.say(text).await;
        }
    }

    async fn set_reporter(&self, reporter: Arc<dyn Reporter>) {
        *self.reporter.write().await = Some(reporter);
    }

    async fn ensure_connected(&self, channel_id: ChannelId) -> Result<(), MusicError> {
        match self.session.channel() {
            None => self.session.connect(channel_id).await,
            Some(current) if current != channel_id => self.session.move_to(channel_id).await,
            Some(_) => Ok(()),
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Fails if the guild was left after `generation` was taken.
    async fn push(&self, generation: u64, track: Track) -> Result<usize, MusicError> {
        let position = {
            let mut queue = self.queue.lock().await;
            if self.generation() != generation {
                return Err(MusicError::NotConnected);
            }
            queue.push(track);
            queue.len()
        };
        self.events.advance();
        Ok(position)
    }

    /// Pushes on behalf of gather `epoch`; false once that gather is superseded.
    async fn push_gathered(&self, epoch: u64, track: Track) -> bool {
        {
            let mut queue = self.queue.lock().await;
            if self.gather_epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            queue.push(track);
        }
        self.events.advance();
        true
    }

    /// Cancels any running gather and starts a new one.
    async fn start_gather(
        self: &Arc<Self>,
        generation: u64,
        items: Vec<GatherItem>,
    ) -> Result<(), MusicError> {
        let mut state = self.state.lock().await;
        if self.generation() != generation {
            return Err(MusicError::NotConnected);
        }
        if state.gathering() {
            tracing::info!("Guild {}: replacing running playlist gather", self.guild_id);
        }
        state.cancel_gather();
        let epoch = self.gather_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        state.gather = Some(tokio::spawn(self.clone().gather(epoch, items)));
        Ok(())
    }

    async fn gather(self: Arc<Self>, epoch: u64, items: Vec<GatherItem>) {
        for item in items {
            match item {
                GatherItem::Track(track) => {
                    if !self.push_gathered(epoch, track).await {
                        return;
                    }
                }
                GatherItem::List(url) => {
                    let mut entries = self.resolver.stream_list(&url);
                    while let Some(entry) = entries.next().await {
                        match entry {
                            Ok(track) => {
                                tracing::debug!("Guild {}: gathered '{track}'", self.guild_id);
                                if !self.push_gathered(epoch, track).await {
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::error!("Guild {}: gathering {url} failed: {e}", self.guild_id);
                                self.report(format!("Could not gather playlist: {e}")).await;
                                return;
                            }
                        }
                    }
                }
            }
        }

        let len = self.queue.lock().await.len();
        tracing::info!("Guild {}: playlist gathered, {len} queued", self.guild_id);
        self.report(format!("**Playlist gathered**, current queue length: {len}"))
            .await;
    }

    async fn skip(&self) -> SkipOutcome {
        let mut state = self.state.lock().await;
        let Some(current) = state.current.as_ref() else {
            return SkipOutcome::NothingPlaying;
        };
        let skipped = current.track.clone();
        let phase = current.phase;
        match phase {
            Phase::Playing => self.session.stop().await,
            Phase::Resolving => {
                state.current = None;
                self.interrupt.notify_waiters();
            }
        }
        if self.queue.lock().await.is_empty() {
            SkipOutcome::NoMoreSongs(skipped)
        } else {
            SkipOutcome::Skipped(skipped)
        }
    }

    async fn skip_all(&self) {
        let mut state = self.state.lock().await;
        self.stop_gather(&mut state);
        self.queue.lock().await.clear();
        match state.current.as_ref().map(|current| current.phase) {
            Some(Phase::Playing) => self.session.stop().await,
            Some(Phase::Resolving) => {
                state.current = None;
                self.interrupt.notify_waiters();
            }
            None => {}
        }
    }

    /// Aborts the running gather and voids any push it still has in flight.
    fn stop_gather(&self, state: &mut PlayerState) {
        state.cancel_gather();
        self.gather_epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns whether there was a connection to tear down.
    async fn leave(&self) -> bool {
        let mut state = self.state.lock().await;
        self.leave_locked(&mut state).await
    }

    async fn leave_locked(&self, state: &mut PlayerState) -> bool {
        self.stop_gather(state);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.queue.lock().await.clear();
        state.current = None;
        self.interrupt.notify_waiters();

        if !self.session.is_connected() {
            return false;
        }
        self.session.stop().await;
        self.session.disconnect().await;
        tracing::info!("Guild {}: left voice channel", self.guild_id);
        true
    }

    async fn leave_if_idle(&self) -> bool {
        let mut state = self.state.lock().await;
        if !self.session.is_connected()
            || state.current.is_some()
            || state.gathering()
            || self.session.is_playing().await
        {
            return false;
        }
        self.leave_locked(&mut state).await
    }

    async fn status(&self) -> PlayerStatus {
        let state = self.state.lock().await;
        if !self.session.is_connected() {
            PlayerStatus::Idle
        } else if state.current.is_some() {
            PlayerStatus::Playing
        } else if state.gathering() {
            PlayerStatus::Gathering
        } else {
            PlayerStatus::Draining
        }
    }
}

/// Registry of guild players; the entry point for every playback command.
pub struct PlaybackController {
    resolver: Arc<dyn MediaResolver>,
    connector: Arc<dyn VoiceConnector>,
    players: RwLock<HashMap<GuildId, Arc<GuildPlayer>>>,
}

impl PlaybackController {
    pub fn new(resolver: Arc<dyn MediaResolver>, connector: Arc<dyn VoiceConnector>) -> Self {
        Self {
            resolver,
            connector,
            players: RwLock::new(HashMap::new()),
        }
    }

    async fn player(&self, guild_id: GuildId) -> Arc<GuildPlayer> {
        if let Some(player) = self.players.read().await.get(&guild_id) {
            return player.clone();
        }
        let mut players = self.players.write().await;
        players
            .entry(guild_id)
            .or_insert_with(|| {
                GuildPlayer::spawn(guild_id, self.resolver.clone(), self.connector.as_ref())
            })
            .clone()
    }

    async fn existing(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        self.players.read().await.get(&guild_id).cloned()
    }

    /// Queues `url` for the guild, joining `voice_channel` first.
    ///
    /// List URLs are gathered in the background, replacing any gather that is
    /// still running for this guild.
    pub async fn enqueue(
        &self,
        guild_id: GuildId,
        voice_channel: Option<ChannelId>,
        url: &str,
        reporter: Arc<dyn Reporter>,
    ) -> Result<EnqueueOutcome, MusicError> {
        let channel_id = voice_channel.ok_or(MusicError::NotInVoiceChannel)?;
        let player = self.player(guild_id).await;
        let _order = player.enqueue_lock.lock().await;
        let generation = player.generation();
        player.set_reporter(reporter).await;
        player.ensure_connected(channel_id).await?;

        if MusicService::is_list_url(url) {
            tracing::info!("Guild {guild_id}: gathering playlist {url}");
            player
                .start_gather(generation, vec![GatherItem::List(url.to_string())])
                .await?;
            return Ok(EnqueueOutcome::Gathering);
        }

        let title = self.resolver.resolve_title(url).await?;
        let track = Track::new(url, title);
        let position = player.push(generation, track.clone()).await?;
        tracing::info!("Guild {guild_id}: queued '{track}' at {position}");
        Ok(EnqueueOutcome::Queued { track, position })
    }

    /// Queues every entry of a saved playlist, in order, as one gather.
    pub async fn enqueue_entries(
        &self,
        guild_id: GuildId,
        voice_channel: Option<ChannelId>,
        entries: Vec<PlaylistEntry>,
        reporter: Arc<dyn Reporter>,
    ) -> Result<EnqueueOutcome, MusicError> {
        let channel_id = voice_channel.ok_or(MusicError::NotInVoiceChannel)?;
        let player = self.player(guild_id).await;
        let _order = player.enqueue_lock.lock().await;
        let generation = player.generation();
        player.set_reporter(reporter).await;
        player.ensure_connected(channel_id).await?;

        let items = entries
            .into_iter()
            .map(|entry| {
                if MusicService::is_list_url(&entry.url) {
                    GatherItem::List(entry.url)
                } else {
                    GatherItem::Track(Track::new(entry.url, entry.title))
                }
            })
            .collect();
        player.start_gather(generation, items).await?;
        Ok(EnqueueOutcome::Gathering)
    }

    pub async fn skip(&self, guild_id: GuildId) -> SkipOutcome {
        match self.existing(guild_id).await {
            Some(player) => player.skip().await,
            None => SkipOutcome::NothingPlaying,
        }
    }

    pub async fn skip_all(&self, guild_id: GuildId) {
        if let Some(player) = self.existing(guild_id).await {
            player.skip_all().await;
        }
    }

    /// Returns how many tracks were removed.
    pub async fn clear_queue(&self, guild_id: GuildId) -> usize {
        let Some(player) = self.existing(guild_id).await else {
            return 0;
        };
        let mut queue = player.queue.lock().await;
        let removed = queue.len();
        queue.clear();
        removed
    }

    /// Shuffles the pending tracks and returns how many there are.
    pub async fn mix(&self, guild_id: GuildId) -> usize {
        let Some(player) = self.existing(guild_id).await else {
            return 0;
        };
        let mut queue = player.queue.lock().await;
        queue.shuffle();
        queue.len()
    }

    pub async fn queue(&self, guild_id: GuildId) -> Vec<Track> {
        match self.existing(guild_id).await {
            Some(player) => player.queue.lock().await.list().iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Renders the pending tracks, falling back to a count when too long.
    pub async fn show_queue(&self, guild_id: GuildId) -> String {
        let tracks = self.queue(guild_id).await;
        if tracks.is_empty() {
            return MusicError::EmptyQueue.to_string();
        }
        let listing = tracks
            .iter()
            .enumerate()
            .map(|(i, track)| format!("{}. {}", i + 1, track.title))
            .collect::<Vec<_>>()
            .join("\n");
        fit_message(format!("Current queue:\n{listing}"), || {
            format!("Current queue: {} songs (too many to list)", tracks.len())
        })
    }

    pub async fn status(&self, guild_id: GuildId) -> PlayerStatus {
        match self.existing(guild_id).await {
            Some(player) => player.status().await,
            None => PlayerStatus::Idle,
        }
    }

    /// Cancels gathering, clears the queue and disconnects. Safe to repeat.
    pub async fn leave(&self, guild_id: GuildId) -> bool {
        match self.existing(guild_id).await {
            Some(player) => player.leave().await,
            None => false,
        }
    }

    /// Disconnects every guild that is connected but has nothing going on.
    pub async fn disconnect_idle(&self) -> Vec<GuildId> {
        let players: Vec<_> = self.players.read().await.values().cloned().collect();
        let mut disconnected = Vec::new();
        for player in players {
            if player.leave_if_idle().await {
                tracing::debug!("Guild {}: disconnected due to inactivity", player.guild_id);
                player.report("Disconnected due to inactivity.".to_string()).await;
                disconnected.push(player.guild_id);
            }
        }
        disconnected
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::services::testing::{
        FakeConnector, FakeResolver, RecordingReporter, eventually, track,
    };

    const GUILD: GuildId = GuildId::new(1);
    const VOICE: Option<ChannelId> = Some(ChannelId::new(10));

    struct Harness {
        controller: PlaybackController,
        resolver: Arc<FakeResolver>,
        connector: Arc<FakeConnector>,
        reporter: Arc<RecordingReporter>,
    }

    impl Harness {
        fn new() -> Self {
            let resolver = Arc::new(FakeResolver::default());
            let connector = Arc::new(FakeConnector::default());
            Self {
                controller: PlaybackController::new(resolver.clone(), connector.clone()),
                resolver,
                connector,
                reporter: Arc::new(RecordingReporter::default()),
            }
        }

        async fn enqueue(&self, url: &str) -> EnqueueOutcome {
            self.controller
                .enqueue(GUILD, VOICE, url, self.reporter.clone())
                .await
                .unwrap()
        }

        async fn wait_playing(&self, title: &str) {
            let session = self.connector.session_for(GUILD);
            eventually(|| {
                let session = session.clone();
                let title = title.to_string();
                async move { session.now_playing().as_deref() == Some(title.as_str()) }
            })
            .await;
        }

        async fn titles(&self) -> Vec<String> {
            self.controller
                .queue(GUILD)
                .await
                .into_iter()
                .map(|t| t.title)
                .collect()
        }
    }

    #[tokio::test]
    async fn requires_voice_channel() {
        let h = Harness::new();

        let result = h
            .controller
            .enqueue(GUILD, None, "https://youtu.be/a", h.reporter.clone())
            .await;

        assert!(matches!(result, Err(MusicError::NotInVoiceChannel)));
        assert_eq!(h.controller.status(GUILD).await, PlayerStatus::Idle);
    }

    #[tokio::test]
    async fn next_track_starts_when_current_finishes() {
        let h = Harness::new();
        h.resolver.add_title("https://youtu.be/a", "Song A");
        h.resolver.add_title("https://youtu.be/b", "Song B");

        h.enqueue("https://youtu.be/a").await;
        h.wait_playing("Song A").await;
        h.enqueue("https://youtu.be/b").await;

        assert_eq!(h.controller.show_queue(GUILD).await, "Current queue:\n1. Song B");
        assert_eq!(h.controller.status(GUILD).await, PlayerStatus::Playing);

        h.connector.session_for(GUILD).finish_current();
        h.wait_playing("Song B").await;
        assert!(h.titles().await.is_empty());
        assert!(h.reporter.contains("Now playing: Song B"));
    }

    #[tokio::test]
    async fn queue_keeps_submission_order() {
        let h = Harness::new();
        for n in 0..6 {
            h.resolver.add_title(&format!("https://youtu.be/{n}"), &format!("Song {n}"));
        }

        for n in 0..6 {
            h.enqueue(&format!("https://youtu.be/{n}")).await;
        }
        h.wait_playing("Song 0").await;

        assert_eq!(
            h.titles().await,
            vec!["Song 1", "Song 2", "Song 3", "Song 4", "Song 5"]
        );
    }

    #[tokio::test]
    async fn skip_moves_to_next_head_once() {
        let h = Harness::new();
        for n in ["a", "b", "c"] {
            h.resolver.add_title(&format!("https://youtu.be/{n}"), &format!("Song {n}"));
            h.enqueue(&format!("https://youtu.be/{n}")).await;
        }
        h.wait_playing("Song a").await;

        let outcome = h.controller.skip(GUILD).await;

        assert_eq!(outcome, SkipOutcome::Skipped(track("a")));
        h.wait_playing("Song b").await;
        assert_eq!(h.titles().await, vec!["Song c"]);
        let session = h.connector.session_for(GUILD);
        assert_eq!(session.played(), vec!["Song a", "Song b"]);
    }

    #[tokio::test]
    async fn skip_last_track_drains() {
        let h = Harness::new();
        h.resolver.add_title("https://youtu.be/a", "Song a");
        h.enqueue("https://youtu.be/a").await;
        h.wait_playing("Song a").await;

        let outcome = h.controller.skip(GUILD).await;

        assert_eq!(outcome, SkipOutcome::NoMoreSongs(track("a")));
        let controller = &h.controller;
        eventually(move || async move { controller.status(GUILD).await == PlayerStatus::Draining }).await;
        assert!(h.connector.session_for(GUILD).is_connected());
    }

    #[tokio::test]
    async fn skip_without_player_is_nothing_playing() {
        let h = Harness::new();
        assert_eq!(h.controller.skip(GUILD).await, SkipOutcome::NothingPlaying);
    }

    #[tokio::test]
    async fn skip_all_stops_and_clears() {
        let h = Harness::new();
        for n in ["a", "b", "c"] {
            h.resolver.add_title(&format!("https://youtu.be/{n}"), &format!("Song {n}"));
            h.enqueue(&format!("https://youtu.be/{n}")).await;
        }
        h.wait_playing("Song a").await;

        h.controller.skip_all(GUILD).await;

        let controller = &h.controller;
        eventually(move || async move { controller.status(GUILD).await == PlayerStatus::Draining }).await;
        assert!(h.titles().await.is_empty());
        assert_eq!(h.connector.session_for(GUILD).played(), vec!["Song a"]);

        h.enqueue("https://youtu.be/b").await;
        h.wait_playing("Song b").await;
    }

    #[tokio::test]
    async fn skip_all_cancels_running_gather() {
        let h = Harness::new();
        let url = "https://www.youtube.com/playlist?list=PL1";
        let feed = h.resolver.feed_list(url);
        h.enqueue(url).await;
        feed.send(Ok(track("1"))).unwrap();
        feed.send(Ok(track("2"))).unwrap();
        h.wait_playing("Song 1").await;

        h.controller.skip_all(GUILD).await;

        eventually(|| {
            let feed = feed.clone();
            async move { feed.is_closed() }
        })
        .await;
        assert!(feed.send(Ok(track("3"))).is_err());
        let controller = &h.controller;
        eventually(move || async move { controller.status(GUILD).await == PlayerStatus::Draining }).await;
        let session = h.connector.session_for(GUILD);
        assert!(session.now_playing().is_none());
        assert_eq!(session.played(), vec!["Song 1"]);
        assert!(h.titles().await.is_empty());
    }

    #[tokio::test]
    async fn leave_during_title_lookup_drops_the_track() {
        let h = Harness::new();
        h.resolver.add_title("https://youtu.be/x", "Song x");
        h.resolver.add_title("https://youtu.be/y", "Song y");
        let gate = h.resolver.hold_title("https://youtu.be/x");
        let controller = &h.controller;

        let enqueue = controller.enqueue(GUILD, VOICE, "https://youtu.be/x", h.reporter.clone());
        let leave = async move {
            eventually(move || async move { controller.status(GUILD).await == PlayerStatus::Draining })
                .await;
            let left = controller.leave(GUILD).await;
            gate.notify_one();
            left
        };
        let (result, left) = tokio::join!(enqueue, leave);

        assert!(left);
        assert!(matches!(result, Err(MusicError::NotConnected)));
        assert!(h.titles().await.is_empty());
        assert_eq!(h.controller.status(GUILD).await, PlayerStatus::Idle);

        h.enqueue("https://youtu.be/y").await;
        h.wait_playing("Song y").await;
        assert_eq!(h.connector.session_for(GUILD).played(), vec!["Song y"]);
    }

    #[tokio::test]
    async fn skip_while_resolving_plays_next_once() {
        let h = Harness::new();
        h.resolver.add_title("https://youtu.be/a", "Song a");
        h.resolver.add_title("https://youtu.be/b", "Song b");
        let gate = h.resolver.hold_stream("https://youtu.be/a");
        h.enqueue("https://youtu.be/a").await;
        h.enqueue("https://youtu.be/b").await;
        let controller = &h.controller;
        eventually(move || async move { controller.status(GUILD).await == PlayerStatus::Playing }).await;
        let session = h.connector.session_for(GUILD);
        assert!(session.now_playing().is_none());

        assert_eq!(h.controller.skip(GUILD).await, SkipOutcome::Skipped(track("a")));

        h.wait_playing("Song b").await;
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.played(), vec!["Song b"]);
        assert!(h.titles().await.is_empty());
    }

    #[tokio::test]
    async fn skip_all_while_resolving_plays_nothing() {
        let h = Harness::new();
        h.resolver.add_title("https://youtu.be/a", "Song a");
        h.resolver.add_title("https://youtu.be/b", "Song b");
        let _gate = h.resolver.hold_stream("https://youtu.be/a");
        h.enqueue("https://youtu.be/a").await;
        h.enqueue("https://youtu.be/b").await;
        let controller = &h.controller;
        eventually(move || async move { controller.status(GUILD).await == PlayerStatus::Playing }).await;

        h.controller.skip_all(GUILD).await;

        eventually(move || async move { controller.status(GUILD).await == PlayerStatus::Draining }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.connector.session_for(GUILD).played().is_empty());
        assert!(h.titles().await.is_empty());
    }

    #[tokio::test]
    async fn slow_resolution_does_not_block_other_guilds() {
        const OTHER: GuildId = GuildId::new(2);
        let h = Harness::new();
        h.resolver.add_title("https://youtu.be/a", "Song a");
        h.resolver.add_title("https://youtu.be/b", "Song b");
        let gate = h.resolver.hold_stream("https://youtu.be/a");
        h.enqueue("https://youtu.be/a").await;
        let controller = &h.controller;
        eventually(move || async move { controller.status(GUILD).await == PlayerStatus::Playing }).await;

        h.controller
            .enqueue(OTHER, Some(ChannelId::new(20)), "https://youtu.be/b", h.reporter.clone())
            .await
            .unwrap();

        let other = h.connector.session_for(OTHER);
        let other_ref = &*other;
        eventually(move || async move { other_ref.now_playing().as_deref() == Some("Song b") }).await;
        assert!(h.connector.session_for(GUILD).now_playing().is_none());

        gate.notify_one();
        h.wait_playing("Song a").await;
    }

    #[tokio::test]
    async fn unplayable_track_is_skipped_with_one_message() {
        let h = Harness::new();
        h.resolver.add_title("https://youtu.be/bad", "Broken");
        h.resolver.mark_unplayable("https://youtu.be/bad");
        h.resolver.add_title("https://youtu.be/b", "Song B");

        h.enqueue("https://youtu.be/bad").await;
        h.enqueue("https://youtu.be/b").await;

        h.wait_playing("Song B").await;
        let failures = h
            .reporter
            .messages()
            .into_iter()
            .filter(|m| m.starts_with("Unable to play"))
            .collect::<Vec<_>>();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("Broken"));
        assert_eq!(h.connector.session_for(GUILD).played(), vec!["Song B"]);
    }

    #[tokio::test]
    async fn list_playback_starts_with_first_entry() {
        let h = Harness::new();
        let url = "https://www.youtube.com/playlist?list=PL1";
        let feed = h.resolver.feed_list(url);

        assert_eq!(h.enqueue(url).await, EnqueueOutcome::Gathering);
        feed.send(Ok(track("1"))).unwrap();
        h.wait_playing("Song 1").await;
        assert_eq!(h.controller.status(GUILD).await, PlayerStatus::Playing);

        feed.send(Ok(track("2"))).unwrap();
        feed.send(Ok(track("3"))).unwrap();
        drop(feed);

        let reporter = h.reporter.clone();
        eventually(|| {
            let reporter = reporter.clone();
            async move { reporter.contains("**Playlist gathered**, current queue length: 2") }
        })
        .await;
        assert_eq!(h.titles().await, vec!["Song 2", "Song 3"]);
    }

    #[tokio::test]
    async fn new_gather_replaces_running_one() {
        let h = Harness::new();
        let first_url = "https://www.youtube.com/playlist?list=PL1";
        let second_url = "https://www.youtube.com/playlist?list=PL2";
        let first = h.resolver.feed_list(first_url);
        let second = h.resolver.feed_list(second_url);

        h.enqueue(first_url).await;
        first.send(Ok(track("1"))).unwrap();
        h.wait_playing("Song 1").await;

        h.enqueue(second_url).await;
        eventually(|| {
            let first = first.clone();
            async move { first.is_closed() }
        })
        .await;
        assert!(first.send(Ok(track("stale"))).is_err());

        second.send(Ok(track("2"))).unwrap();
        let controller = &h.controller;
        eventually(move || async move { controller.queue(GUILD).await.len() == 1 }).await;
        assert_eq!(h.titles().await, vec!["Song 2"]);
    }

    #[tokio::test]
    async fn extractor_crash_is_reported_once() {
        let h = Harness::new();
        let url = "https://www.youtube.com/playlist?list=PLX";
        let feed = h.resolver.feed_list(url);

        h.enqueue(url).await;
        feed.send(Ok(track("1"))).unwrap();
        feed.send(Err(crate::services::error::ResolveError::ExtractorCrash(
            "exit status 1".into(),
        )))
        .unwrap();

        let reporter = h.reporter.clone();
        eventually(|| {
            let reporter = reporter.clone();
            async move { reporter.contains("Could not gather playlist") }
        })
        .await;
        h.wait_playing("Song 1").await;
        assert!(!h.reporter.contains("Playlist gathered"));
    }

    #[tokio::test]
    async fn mix_keeps_tracks_and_current() {
        let h = Harness::new();
        for n in 0..8 {
            h.resolver.add_title(&format!("https://youtu.be/{n}"), &format!("Song {n}"));
            h.enqueue(&format!("https://youtu.be/{n}")).await;
        }
        h.wait_playing("Song 0").await;

        assert_eq!(h.controller.mix(GUILD).await, 7);

        let mut titles = h.titles().await;
        titles.sort();
        assert_eq!(titles, (1..8).map(|n| format!("Song {n}")).collect::<Vec<_>>());
        assert_eq!(h.connector.session_for(GUILD).now_playing().as_deref(), Some("Song 0"));
    }

    #[tokio::test]
    async fn clear_queue_leaves_current_track() {
        let h = Harness::new();
        for n in ["a", "b"] {
            h.resolver.add_title(&format!("https://youtu.be/{n}"), &format!("Song {n}"));
            h.enqueue(&format!("https://youtu.be/{n}")).await;
        }
        h.wait_playing("Song a").await;

        assert_eq!(h.controller.clear_queue(GUILD).await, 1);

        assert_eq!(h.controller.show_queue(GUILD).await, "Queue is empty.");
        assert_eq!(h.connector.session_for(GUILD).now_playing().as_deref(), Some("Song a"));
        assert_eq!(h.controller.clear_queue(GUILD).await, 0);
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let h = Harness::new();
        h.resolver.add_title("https://youtu.be/a", "Song a");
        h.resolver.add_title("https://youtu.be/b", "Song b");
        h.enqueue("https://youtu.be/a").await;
        h.enqueue("https://youtu.be/b").await;
        h.wait_playing("Song a").await;

        assert!(h.controller.leave(GUILD).await);
        assert!(!h.controller.leave(GUILD).await);

        assert_eq!(h.controller.status(GUILD).await, PlayerStatus::Idle);
        assert!(h.titles().await.is_empty());
        let session = h.connector.session_for(GUILD);
        assert!(!session.is_connected());
        assert_eq!(session.played(), vec!["Song a"]);
    }

    #[tokio::test]
    async fn leave_cancels_gather() {
        let h = Harness::new();
        let url = "https://www.youtube.com/playlist?list=PL1";
        let feed = h.resolver.feed_list(url);
        h.enqueue(url).await;
        assert_eq!(h.controller.status(GUILD).await, PlayerStatus::Gathering);

        h.controller.leave(GUILD).await;

        eventually(|| {
            let feed = feed.clone();
            async move { feed.is_closed() }
        })
        .await;
        assert_eq!(h.controller.status(GUILD).await, PlayerStatus::Idle);
    }

    #[tokio::test]
    async fn long_queue_degrades_to_count() {
        let h = Harness::new();
        h.resolver.add_title("https://youtu.be/first", "First");
        h.enqueue("https://youtu.be/first").await;
        h.wait_playing("First").await;

        let entries = (0..300)
            .map(|n| PlaylistEntry {
                id: n,
                url: format!("https://youtu.be/{n}"),
                title: format!("A rather long song title number {n}"),
            })
            .collect();
        h.controller
            .enqueue_entries(GUILD, VOICE, entries, h.reporter.clone())
            .await
            .unwrap();
        let controller = &h.controller;
        eventually(move || async move { controller.queue(GUILD).await.len() == 300 }).await;

        let rendered = h.controller.show_queue(GUILD).await;
        assert_eq!(rendered, "Current queue: 300 songs (too many to list)");
    }

    #[tokio::test]
    async fn lost_connection_tears_down() {
        let h = Harness::new();
        h.resolver.add_title("https://youtu.be/a", "Song a");
        h.enqueue("https://youtu.be/a").await;
        h.wait_playing("Song a").await;

        h.connector.session_for(GUILD).lose_connection("voice server gone");

        let controller = &h.controller;
        eventually(move || async move { controller.status(GUILD).await == PlayerStatus::Idle }).await;
        assert!(h.reporter.contains("Lost connection to the voice channel"));
    }

    #[tokio::test]
    async fn idle_sessions_are_disconnected() {
        let h = Harness::new();
        h.resolver.add_title("https://youtu.be/a", "Song a");
        h.enqueue("https://youtu.be/a").await;
        h.wait_playing("Song a").await;

        assert!(h.controller.disconnect_idle().await.is_empty());

        h.connector.session_for(GUILD).finish_current();
        let controller = &h.controller;
        eventually(move || async move { controller.status(GUILD).await == PlayerStatus::Draining }).await;

        assert_eq!(h.controller.disconnect_idle().await, vec![GUILD]);
        assert_eq!(h.controller.status(GUILD).await, PlayerStatus::Idle);
        assert!(h.reporter.contains("Disconnected due to inactivity."));
    }
}
