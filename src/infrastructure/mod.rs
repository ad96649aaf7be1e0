pub mod audio;
pub mod discord;
pub mod inactivity;
pub mod playlist_store;
pub mod voice;
pub mod youtube;
