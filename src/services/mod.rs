pub mod cleanup;
pub mod error;
pub mod music_service;
pub mod playback;
pub mod playlist_service;
pub mod report;
pub mod voice;

#[cfg(test)]
pub mod testing;
