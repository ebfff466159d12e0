use std::time::Duration;

use serenity::model::id::UserId;

pub const UNKNOWN_TRACK_TITLE: &str = "UNKNOWN TRACK";

/// A resolved, playable item. Never mutated once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    pub title: String,
    /// Direct media URI reported by the media backend.
    pub source_url: String,
    /// Page URL, stable enough to hand to the audio backend at play time.
    pub webpage_url: String,
    pub duration: Option<Duration>,
    pub artwork_url: Option<String>,
    pub requester: Option<UserId>,
}

impl Track {
    pub fn requested_by(self, requester: UserId) -> Self {
        Self {
            requester: Some(requester),
            ..self
        }
    }

    pub fn duration_text(&self) -> String {
        self.duration
            .map(format_duration)
            .unwrap_or_else(|| "N/A".to_string())
    }
}

/// Format a duration as `m:ss` or `h:mm:ss`.
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
pub(crate) fn test_track(title: &str) -> Track {
    Track {
        title: title.to_string(),
        source_url: format!("https://media.example/{title}.webm"),
        webpage_url: format!("https://video.example/watch?v={title}"),
        duration: Some(Duration::from_secs(200)),
        artwork_url: None,
        requester: None,
    }
}
