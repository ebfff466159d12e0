use std::fmt;

use thiserror::Error;

pub type BotResult<T> = Result<T, BotError>;

/// Why a lookup or a playback command came back empty-handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    /// The catalog has nothing for the link or text.
    NoCatalogMatch,
    /// The input (or every catalog item) had no playable media equivalent.
    NoPlayableMatch,
    /// A command needed a current track and there is none.
    NothingPlaying,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NotFoundKind::NoCatalogMatch => "no catalog match",
            NotFoundKind::NoPlayableMatch => "no playable match",
            NotFoundKind::NothingPlaying => "nothing playing",
        };

        f.write_str(text)
    }
}

#[derive(Error, Debug)]
pub enum BotError {
    #[error("not found: {0}")]
    NotFound(NotFoundKind),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no playback session for this guild")]
    NotConnected,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for BotError {
    fn from(err: reqwest::Error) -> Self {
        BotError::BackendUnavailable(format!("HTTP error: {err}"))
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::BackendUnavailable(format!("JSON error: {err}"))
    }
}

impl From<std::io::Error> for BotError {
    fn from(err: std::io::Error) -> Self {
        BotError::BackendUnavailable(format!("I/O error: {err}"))
    }
}

impl From<tokio::time::error::Elapsed> for BotError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        BotError::BackendUnavailable("external call timed out".to_string())
    }
}

impl BotError {
    /// Title and description shown to the user for this error.
    pub fn user_message(&self) -> (&'static str, String) {
        match self {
            BotError::NotFound(NotFoundKind::NoCatalogMatch) => (
                "Not Found",
                "I couldn't find anything in the catalog for that.".to_string(),
            ),
            BotError::NotFound(NotFoundKind::NoPlayableMatch) => (
                "Nothing to Play",
                "I couldn't find a playable version of that.".to_string(),
            ),
            BotError::NotFound(NotFoundKind::NothingPlaying) => (
                "Nothing Playing",
                "There is no track playing right now.".to_string(),
            ),
            BotError::PermissionDenied(reason) => ("Access Denied", reason.clone()),
            BotError::InvalidInput(reason) => ("Invalid Input", reason.clone()),
            BotError::NotConnected => (
                "Not Connected",
                "I'm not in a voice channel.".to_string(),
            ),
            BotError::BackendUnavailable(_) | BotError::Configuration(_) => (
                "Something Went Wrong",
                "I couldn't reach the music services. Try again in a moment.".to_string(),
            ),
        }
    }
}
