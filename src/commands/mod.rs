pub mod leave;
pub mod play;
pub mod playlist;
pub mod queue;
pub mod skip;

use std::future::Future;
use std::sync::Arc;

use poise::serenity_prelude::ChannelId;

use crate::infrastructure::discord::ChannelReporter;
use crate::services::error::MusicError;
use crate::services::report::Reporter;
use crate::{Context, Error};

/// The voice channel the invoking user is sitting in, if any.
pub fn author_voice_channel(ctx: Context<'_>) -> Option<ChannelId> {
    let guild = ctx.guild()?;
    let channel = guild
        .voice_states
        .get(&ctx.author().id)
        .and_then(|vs| vs.channel_id);
    channel
}

pub fn channel_reporter(ctx: Context<'_>) -> Arc<dyn Reporter> {
    Arc::new(ChannelReporter::new(
        ctx.serenity_context().http.clone(),
        ctx.channel_id(),
    ))
}

/// Runs `work` on its own task and posts the outcome to the invoking channel.
///
/// Command handlers return right away so one slow request never holds up
/// another user's command.
pub async fn respond_later<F>(ctx: Context<'_>, work: F) -> Result<(), Error>
where
    F: Future<Output = Result<String, MusicError>> + Send + 'static,
{
    let reporter = channel_reporter(ctx);
    let command = ctx.command().qualified_name.clone();
    tokio::spawn(async move {
        let reply = match work.await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("{command} failed: {e}");
                e.to_string()
            }
        };
        if !reply.is_empty() {
            reporter.say(reply).await;
        }
    });

    if let poise::Context::Application(_) = ctx {
        ctx.say("On it.").await?;
    }
    Ok(())
}
