mod commands;
mod config;
mod domain;
mod infrastructure;
mod log;
mod services;

use std::sync::Arc;

use poise::serenity_prelude as serenity;
use songbird::SerenityInit;
use songbird::driver::retry::{ExponentialBackoff, Retry, Strategy};

use config::Config;
use infrastructure::inactivity::spawn_inactivity_monitor;
use infrastructure::playlist_store::PlaylistStore;
use infrastructure::voice::SongbirdConnector;
use infrastructure::youtube::YtDlpResolver;
use services::cleanup::DiskCleanup;
use services::playback::PlaybackController;
use services::playlist_service::MemoryPlaylistService;

/// Voice driver reconnects before a connection counts as lost.
const DRIVER_RETRY_LIMIT: usize = 5;

pub struct Data {
    pub controller: Arc<PlaybackController>,
    pub playlists: Arc<MemoryPlaylistService>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let _log_guard = log::install_tracing(&config);

    let http_client = reqwest::Client::new();
    let songbird_config = songbird::Config::default().driver_retry(Retry {
        strategy: Strategy::Backoff(ExponentialBackoff::default()),
        retry_limit: Some(DRIVER_RETRY_LIMIT),
    });
    let manager = songbird::Songbird::serenity_from_config(songbird_config);

    let resolver = Arc::new(YtDlpResolver::new(
        config.ytdlp_path.clone(),
        config.extractor_timeout,
    ));
    let connector = Arc::new(SongbirdConnector::new(
        manager.clone(),
        http_client,
        config.connect_attempts,
    ));
    let controller = Arc::new(PlaybackController::new(resolver.clone(), connector));
    let playlists = Arc::new(MemoryPlaylistService::new(
        PlaylistStore::new(&config.playlist_file, &config.playlist_log_file),
        resolver,
    ));

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::GUILD_VOICE_STATES
        | serenity::GatewayIntents::MESSAGE_CONTENT;
    let token = config.discord_token.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                commands::play::play(),
                commands::play::play_playlist(),
                commands::playlist::create_playlist(),
                commands::playlist::add_to_playlist(),
                commands::playlist::show_playlists(),
                commands::playlist::show_playlist_content(),
                commands::playlist::remove_from_playlist(),
                commands::skip::skip(),
                commands::skip::skip_all(),
                commands::queue::mix(),
                commands::queue::show_queue(),
                commands::queue::clear(),
                commands::leave::leave(),
            ],
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(config.command_prefix.clone()),
                ..Default::default()
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            let msg = error.to_string();
                            tracing::warn!("Command error: {msg}");
                            let _ = ctx.say(format!("❌ {msg}")).await;
                        }
                        other => {
                            if let Err(e) = poise::builtins::on_error(other).await {
                                tracing::error!("Error handling error: {e}");
                            }
                        }
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!("Logged in as {} ({})", ready.user.name, ready.user.id);

                spawn_inactivity_monitor(controller.clone(), config.inactivity_interval);
                DiskCleanup::from_config(&config).spawn();

                Ok(Data {
                    controller,
                    playlists,
                })
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .register_songbird_with(manager)
        .await?;

    client.start().await?;
    Ok(())
}
