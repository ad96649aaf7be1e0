use crate::commands::respond_later;
use crate::{Context, Error};

/// Create a new empty playlist
#[poise::command(prefix_command, slash_command, rename = "pl-c")]
pub async fn create_playlist(
    ctx: Context<'_>,
    #[description = "Playlist name"] name: String,
) -> Result<(), Error> {
    let playlists = ctx.data().playlists.clone();
    let user = ctx.author().name.clone();

    respond_later(ctx, async move { playlists.create_playlist(&user, &name).await }).await
}

/// Add a url to a playlist
#[poise::command(prefix_command, slash_command, rename = "pl-a")]
pub async fn add_to_playlist(
    ctx: Context<'_>,
    #[description = "Playlist ID"] playlist_id: u32,
    #[description = "YouTube video or playlist URL"] url: String,
) -> Result<(), Error> {
    let playlists = ctx.data().playlists.clone();
    let user = ctx.author().name.clone();

    respond_later(ctx, async move {
        playlists.add_to_playlist(&user, playlist_id as usize, &url).await
    })
    .await
}

/// Show all playlists
#[poise::command(prefix_command, slash_command, rename = "pl-l")]
pub async fn show_playlists(ctx: Context<'_>) -> Result<(), Error> {
    let playlists = ctx.data().playlists.clone();

    respond_later(ctx, async move { playlists.show_playlists().await }).await
}

/// Show the songs of one playlist
#[poise::command(prefix_command, slash_command, rename = "pl-s")]
pub async fn show_playlist_content(
    ctx: Context<'_>,
    #[description = "Playlist ID"] playlist_id: u32,
) -> Result<(), Error> {
    let playlists = ctx.data().playlists.clone();

    respond_later(ctx, async move {
        playlists.show_playlist_content(playlist_id as usize).await
    })
    .await
}

/// Remove a url from a playlist
#[poise::command(prefix_command, slash_command, rename = "pl-r")]
pub async fn remove_from_playlist(
    ctx: Context<'_>,
    #[description = "Playlist ID"] playlist_id: u32,
    #[description = "Item ID within the playlist"] track_id: u32,
) -> Result<(), Error> {
    let playlists = ctx.data().playlists.clone();
    let user = ctx.author().name.clone();

    respond_later(ctx, async move {
        playlists
            .remove_from_playlist(&user, playlist_id as usize, track_id as usize)
            .await
    })
    .await
}
