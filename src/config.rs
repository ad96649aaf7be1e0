use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub command_prefix: String,
    pub ytdlp_path: String,
    pub extractor_timeout: Duration,
    pub playlist_file: PathBuf,
    pub playlist_log_file: PathBuf,
    pub download_dir: PathBuf,
    pub max_file_age: Duration,
    pub max_download_bytes: u64,
    pub cleanup_interval: Duration,
    pub inactivity_interval: Duration,
    pub connect_attempts: u32,
    pub log_dir: PathBuf,
    pub log_file: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());
        let num = |name: &'static str, default: u64| parse_or(&lookup, name, default);

        Ok(Self {
            discord_token: lookup("DISCORD_TOKEN")
                .filter(|token| !token.trim().is_empty())
                .ok_or(ConfigError::Missing("DISCORD_TOKEN"))?,
            command_prefix: var("COMMAND_PREFIX", "!"),
            ytdlp_path: var("YTDLP_PATH", "yt-dlp"),
            extractor_timeout: Duration::from_secs(num("EXTRACTOR_TIMEOUT_SECS", 60)?),
            playlist_file: var("PLAYLIST_FILE", "static/playlists.json").into(),
            playlist_log_file: var("PLAYLIST_LOG_FILE", "static/playlists_changes.jsonl").into(),
            download_dir: var("DOWNLOAD_DIR", "downloads").into(),
            max_file_age: Duration::from_secs(num("MAX_FILE_AGE_HOURS", 10)? * 3600),
            max_download_bytes: num("MAX_DOWNLOAD_MB", 400)? * 1024 * 1024,
            cleanup_interval: Duration::from_secs(num("CLEANUP_INTERVAL_SECS", 3600)?),
            inactivity_interval: Duration::from_secs(num("INACTIVITY_INTERVAL_SECS", 300)?),
            connect_attempts: parse_or(&lookup, "CONNECT_ATTEMPTS", 3)?,
            log_dir: var("LOG_DIR", "logs").into(),
            log_file: var("LOG_FILE", "discord_bot.log"),
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
