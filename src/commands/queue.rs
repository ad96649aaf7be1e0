use crate::commands::respond_later;
use crate::services::error::MusicError;
use crate::services::playback::PlayerStatus;
use crate::services::report::fit_message;
use crate::{Context, Error};

/// Show the current music queue
#[poise::command(prefix_command, slash_command, guild_only, rename = "q")]
pub async fn show_queue(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or(MusicError::NotInGuild)?;
    let controller = ctx.data().controller.clone();

    respond_later(ctx, async move {
        let listing = controller.show_queue(guild_id).await;
        if controller.status(guild_id).await != PlayerStatus::Gathering {
            return Ok(listing);
        }
        Ok(fit_message(
            format!("{listing}\nStill gathering the playlist..."),
            || listing.clone(),
        ))
    })
    .await
}

/// Clear the queue without stopping the current song
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn clear(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or(MusicError::NotInGuild)?;
    let controller = ctx.data().controller.clone();

    respond_later(ctx, async move {
        match controller.clear_queue(guild_id).await {
            0 => Err(MusicError::EmptyQueue),
            _ => Ok("Queue cleared".to_string()),
        }
    })
    .await
}

/// Shuffle the queue
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn mix(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or(MusicError::NotInGuild)?;
    let controller = ctx.data().controller.clone();

    respond_later(ctx, async move {
        match controller.mix(guild_id).await {
            0 => Err(MusicError::EmptyQueue),
            _ => Ok("Queue shuffled.".to_string()),
        }
    })
    .await
}
