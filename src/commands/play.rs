use crate::commands::{author_voice_channel, channel_reporter, respond_later};
use crate::services::error::MusicError;
use crate::services::music_service::MusicService;
use crate::services::playback::EnqueueOutcome;
use crate::{Context, Error};

fn enqueue_reply(outcome: EnqueueOutcome) -> String {
    match outcome {
        EnqueueOutcome::Queued { track, position } => {
            format!("Added to queue ({position}): {}", track.title)
        }
        EnqueueOutcome::Gathering => "Gathering playlist...".to_string(),
    }
}

/// Play a song or playlist from YouTube
#[poise::command(prefix_command, slash_command, guild_only, rename = "p")]
pub async fn play(
    ctx: Context<'_>,
    #[description = "YouTube video or playlist URL"] url: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or(MusicError::NotInGuild)?;
    if !MusicService::is_youtube_url(&url) {
        return Err(MusicError::UnsupportedUrl.into());
    }
    let voice_channel = author_voice_channel(ctx);
    let controller = ctx.data().controller.clone();
    let reporter = channel_reporter(ctx);
    tracing::info!("{} requested {url} in guild {guild_id}", ctx.author().name);

    respond_later(ctx, async move {
        controller
            .enqueue(guild_id, voice_channel, &url, reporter)
            .await
            .map(enqueue_reply)
    })
    .await
}

/// Play from a memory playlist
#[poise::command(prefix_command, slash_command, guild_only, rename = "pl")]
pub async fn play_playlist(
    ctx: Context<'_>,
    #[description = "Playlist ID"] playlist_id: u32,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or(MusicError::NotInGuild)?;
    let voice_channel = author_voice_channel(ctx);
    let controller = ctx.data().controller.clone();
    let playlists = ctx.data().playlists.clone();
    let reporter = channel_reporter(ctx);
    tracing::info!(
        "{} requested memory playlist {playlist_id} in guild {guild_id}",
        ctx.author().name
    );

    respond_later(ctx, async move {
        let entries = playlists.entries(playlist_id as usize).await?;
        controller
            .enqueue_entries(guild_id, voice_channel, entries, reporter)
            .await
            .map(enqueue_reply)
    })
    .await
}
