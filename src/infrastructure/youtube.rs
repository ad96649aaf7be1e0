use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use regex::Regex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

use crate::domain::track::{PlayableTrack, Track};
use crate::services::error::ResolveError;
use crate::services::music_service::MediaResolver;

static NETWORK_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(unable to download|http error|timed out|connection|network is unreachable|temporary failure|name resolution)")
        .unwrap()
});

#[derive(Deserialize)]
struct VideoInfo {
    title: Option<String>,
    #[serde(default)]
    formats: Vec<Format>,
}

#[derive(Deserialize)]
struct ListInfo {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Format {
    url: Option<String>,
    acodec: Option<String>,
    vcodec: Option<String>,
    protocol: Option<String>,
    abr: Option<f64>,
}

impl Format {
    fn has_audio(&self) -> bool {
        self.url.is_some() && self.acodec.as_deref().is_some_and(|c| c != "none")
    }

    fn audio_only(&self) -> bool {
        self.vcodec.as_deref().is_none_or(|c| c == "none")
    }

    fn direct_http(&self) -> bool {
        self.protocol
            .as_deref()
            .is_none_or(|p| p == "https" || p == "http")
    }

    /// Opus is decoded natively by the voice driver, AAC through symphonia.
    fn codec_rank(&self) -> u8 {
        match self.acodec.as_deref() {
            Some(c) if c.starts_with("opus") => 2,
            Some(c) if c.starts_with("mp4a") || c.starts_with("aac") => 1,
            _ => 0,
        }
    }
}

fn select_audio_format(formats: &[Format]) -> Option<&Format> {
    formats.iter().filter(|f| f.has_audio()).max_by(|a, b| {
        (a.direct_http(), a.codec_rank(), a.audio_only())
            .cmp(&(b.direct_http(), b.codec_rank(), b.audio_only()))
            .then_with(|| a.abr.unwrap_or(0.0).total_cmp(&b.abr.unwrap_or(0.0)))
    })
}

fn classify_failure(stderr: &str, status: std::process::ExitStatus) -> ResolveError {
    let message = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| format!("yt-dlp exited with {status}"));
    if NETWORK_ERROR_RE.is_match(stderr) {
        ResolveError::Network(message)
    } else {
        ResolveError::ExtractorCrash(message)
    }
}

/// Pairs a `--print title` line with its `--print webpage_url` line.
fn parse_entry(title: &str, url: &str) -> Option<Track> {
    let title = title.trim();
    let url = url.trim();
    if title.is_empty() || !url.starts_with("http") {
        return None;
    }
    Some(Track::new(url, title))
}

/// Resolves media by shelling out to yt-dlp.
pub struct YtDlpResolver {
    program: String,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.arg("--no-warnings").kill_on_drop(true);
        command
    }

    async fn output(&self, args: &[&str]) -> Result<String, ResolveError> {
        let child = self
            .command()
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ResolveError::ExtractorCrash(format!("failed to start {}: {e}", self.program)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ResolveError::ExtractorCrash("timed out".to_string()))?
            .map_err(|e| ResolveError::ExtractorCrash(e.to_string()))?;

        if !output.status.success() {
            return Err(classify_failure(
                &String::from_utf8_lossy(&output.stderr),
                output.status,
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            return Err(ResolveError::ExtractorCrash("no output".to_string()));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve_single(&self, url: &str) -> Result<PlayableTrack, ResolveError> {
        let json = self
            .output(&["--dump-single-json", "--no-playlist", url])
            .await?;
        let info: VideoInfo = serde_json::from_str(&json)
            .map_err(|e| ResolveError::ExtractorCrash(format!("unreadable metadata: {e}")))?;

        let format = select_audio_format(&info.formats).ok_or(ResolveError::NoPlayableFormat)?;
        let stream_url = format.url.clone().ok_or(ResolveError::NoPlayableFormat)?;
        tracing::debug!(
            "Selected {} format for {url}",
            format.acodec.as_deref().unwrap_or("unknown")
        );

        Ok(PlayableTrack {
            title: info.title.unwrap_or_else(|| "Unknown Title".to_string()),
            stream_url,
        })
    }

    async fn resolve_title(&self, url: &str) -> Result<String, ResolveError> {
        let stdout = self.output(&["--get-title", "--no-playlist", url]).await?;
        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ResolveError::ExtractorCrash("no title".to_string()))
    }

    async fn resolve_playlist_title(&self, url: &str) -> Result<String, ResolveError> {
        let json = self
            .output(&["--dump-single-json", "--flat-playlist", url])
            .await?;
        let info: ListInfo = serde_json::from_str(&json)
            .map_err(|e| ResolveError::ExtractorCrash(format!("unreadable metadata: {e}")))?;
        info.title
            .ok_or_else(|| ResolveError::ExtractorCrash("playlist has no title".to_string()))
    }

    fn stream_list(&self, url: &str) -> BoxStream<'static, Result<Track, ResolveError>> {
        let spawned = self
            .command()
            .args([
                url,
                "--skip-download",
                "--ignore-errors",
                "--print",
                "title",
                "--print",
                "webpage_url",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let error = ResolveError::ExtractorCrash(format!("failed to start {}: {e}", self.program));
                return stream::once(async move { Err(error) }).boxed();
            }
        };
        let Some(stdout) = child.stdout.take() else {
            let error = ResolveError::ExtractorCrash("stdout unavailable".to_string());
            return stream::once(async move { Err(error) }).boxed();
        };

        let reader = ListReader {
            child,
            lines: BufReader::new(stdout).lines(),
            timeout: self.timeout,
            emitted: 0,
            done: false,
        };
        stream::unfold(reader, |mut reader| async move {
            let entry = reader.next_entry().await?;
            Some((entry, reader))
        })
        .boxed()
    }
}

/// Reads `title`/`url` line pairs from a running yt-dlp.
struct ListReader {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    timeout: Duration,
    emitted: usize,
    done: bool,
}

impl ListReader {
    async fn next_entry(&mut self) -> Option<Result<Track, ResolveError>> {
        if self.done {
            return None;
        }
        loop {
            let title = match self.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return self.finish().await,
                Err(e) => return self.fail(e),
            };
            let url = match self.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::warn!("Playlist output ended after title '{title}'");
                    return self.finish().await;
                }
                Err(e) => return self.fail(e),
            };

            match parse_entry(&title, &url) {
                Some(track) => {
                    self.emitted += 1;
                    return Some(Ok(track));
                }
                None => tracing::warn!("Skipping malformed playlist entry: {title:?} / {url:?}"),
            }
        }
    }

    async fn next_line(&mut self) -> Result<Option<String>, ResolveError> {
        match tokio::time::timeout(self.timeout, self.lines.next_line()).await {
            Ok(Ok(line)) => Ok(line),
            Ok(Err(e)) => Err(ResolveError::ExtractorCrash(e.to_string())),
            Err(_) => Err(ResolveError::ExtractorCrash(
                "timed out waiting for playlist entries".to_string(),
            )),
        }
    }

    fn fail(&mut self, error: ResolveError) -> Option<Result<Track, ResolveError>> {
        self.done = true;
        Some(Err(error))
    }

    /// Only a run that produced nothing counts as a crash.
    async fn finish(&mut self) -> Option<Result<Track, ResolveError>> {
        self.done = true;
        match self.child.wait().await {
            Ok(status) if status.success() => None,
            Ok(status) if self.emitted > 0 => {
                tracing::warn!("yt-dlp exited with {status} after {} entries", self.emitted);
                None
            }
            Ok(status) => Some(Err(ResolveError::ExtractorCrash(format!(
                "yt-dlp exited with {status}"
            )))),
            Err(e) => Some(Err(ResolveError::ExtractorCrash(e.to_string()))),
        }
    }
}
