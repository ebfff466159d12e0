use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serenity::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{BotError, BotResult};
use crate::models::{Track, UNKNOWN_TRACK_TITLE};
use crate::resolver::MediaSearch;

const YTDLP_BIN: &str = "yt-dlp";

/// One JSON line printed by `yt-dlp -j`. Flat playlist listings only fill in
/// part of it.
#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<YtDlpThumbnail>,
}

#[derive(Debug, Deserialize)]
struct YtDlpThumbnail {
    url: String,
}

impl YtDlpEntry {
    fn into_track(self) -> Option<Track> {
        let webpage_url = self.webpage_url.or_else(|| self.url.clone())?;
        let source_url = self.url.unwrap_or_else(|| webpage_url.clone());

        let duration = self
            .duration
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok());

        let artwork_url = self
            .thumbnail
            .or_else(|| self.thumbnails.into_iter().last().map(|thumbnail| thumbnail.url));

        Some(Track {
            title: self.title.unwrap_or_else(|| UNKNOWN_TRACK_TITLE.to_string()),
            source_url,
            webpage_url,
            duration,
            artwork_url,
            requester: None,
        })
    }
}

fn parse_entries(output: &str) -> Vec<Track> {
    let lines: Vec<&str> = output.lines().filter(|line| !line.trim().is_empty()).collect();

    let tracks: Vec<Track> = lines
        .iter()
        .filter_map(|line| {
            let entry: YtDlpEntry = serde_json::from_str(line).ok()?;
            entry.into_track()
        })
        .collect();

    if tracks.len() < lines.len() {
        info!("Some entries have been skipped due to errors during parsing");
    }

    tracks
}

/// Media search over the `yt-dlp` executable.
pub struct YtDlp {
    timeout: Duration,
}

impl YtDlp {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run(&self, args: &[&str]) -> BotResult<Vec<Track>> {
        debug!("Running {YTDLP_BIN} {}", args.join(" "));

        let child = Command::new(YTDLP_BIN)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child).await??;

        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() && stdout.trim().is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("{YTDLP_BIN} failed: {}", stderr.trim());

            return Err(BotError::BackendUnavailable(format!(
                "{YTDLP_BIN} exited with {}",
                output.status
            )));
        }

        Ok(parse_entries(&stdout))
    }
}

#[async_trait]
impl MediaSearch for YtDlp {
    async fn search(&self, query: &str) -> BotResult<Option<Track>> {
        let target = format!("ytsearch1:{query}");
        let tracks = self.run(&["-j", "--no-playlist", &target]).await?;

        Ok(tracks.into_iter().next())
    }

    async fn load(&self, url: &str) -> BotResult<Option<Track>> {
        let tracks = self.run(&["-j", "--no-playlist", url]).await?;

        Ok(tracks.into_iter().next())
    }

    async fn playlist(&self, url: &str) -> BotResult<Vec<Track>> {
        info!("Getting tracks from playlist {url}");

        self.run(&["-j", "--flat-playlist", url]).await
    }
}
