use crate::commands::respond_later;
use crate::services::error::MusicError;
use crate::services::playback::SkipOutcome;
use crate::{Context, Error};

/// Skip the currently playing song
#[poise::command(prefix_command, slash_command, guild_only, rename = "s")]
pub async fn skip(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or(MusicError::NotInGuild)?;
    let controller = ctx.data().controller.clone();

    respond_later(ctx, async move {
        match controller.skip(guild_id).await {
            SkipOutcome::Skipped(track) => Ok(format!("Skipped: {}", track.title)),
            SkipOutcome::NoMoreSongs(_) => Ok("No more songs in the queue.".to_string()),
            SkipOutcome::NothingPlaying => Err(MusicError::EmptyQueue),
        }
    })
    .await
}

/// Skip all
#[poise::command(prefix_command, slash_command, guild_only, rename = "sa")]
pub async fn skip_all(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or(MusicError::NotInGuild)?;
    let controller = ctx.data().controller.clone();

    respond_later(ctx, async move {
        controller.skip_all(guild_id).await;
        Ok("Queue cleared".to_string())
    })
    .await
}
