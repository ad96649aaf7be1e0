use crate::commands::respond_later;
use crate::services::error::MusicError;
use crate::{Context, Error};

/// Leave the voice channel and drop the queue
#[poise::command(prefix_command, slash_command, guild_only, rename = "l")]
pub async fn leave(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or(MusicError::NotInGuild)?;
    let controller = ctx.data().controller.clone();
    tracing::info!("{} asked to leave guild {guild_id}", ctx.author().name);

    respond_later(ctx, async move {
        if controller.leave(guild_id).await {
            Ok("Left the voice channel.".to_string())
        } else {
            Err(MusicError::NotConnected)
        }
    })
    .await
}
