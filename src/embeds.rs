//! Reply rendering. Cards are plain data so they can be checked without a
//! gateway; [`Card::apply`] turns one into a serenity embed.

use std::sync::Arc;

use chrono::{Datelike, Local, Weekday};
use rand::seq::SliceRandom;
use rand::thread_rng;
use serenity::async_trait;
use serenity::builder::CreateEmbed;
use serenity::http::Http;
use serenity::model::id::ChannelId;
use tracing::info;

use crate::controller::{Announcer, SessionSnapshot};
use crate::error::BotError;
use crate::models::Track;
use crate::session::{Notice, MAX_VOLUME};

pub const BOT_NAME: &str = "DJ Boris";

pub const COLOUR_SUCCESS: u32 = 0x28a745;
pub const COLOUR_ERROR: u32 = 0xdc3545;
pub const COLOUR_INFO: u32 = 0x17a2b8;
pub const COLOUR_MUSIC: u32 = 0x6f42c1;

const QUEUE_PREVIEW: usize = 10;

const GENERAL_TAGLINES: [&str; 4] = [
    "Always on beat 🎶",
    "Turning up your party!",
    "Your daily dose of bass 🎧",
    "Keeping the beat alive 🔥",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub title: String,
    pub description: String,
    pub colour: u32,
    pub fields: Vec<(String, String, bool)>,
    pub thumbnail: Option<String>,
    pub footer: Option<String>,
}

impl Card {
    fn new(title: String, description: impl Into<String>, colour: u32) -> Self {
        Self {
            title,
            description: description.into(),
            colour,
            fields: Vec::new(),
            thumbnail: None,
            footer: Some(footer_text(Local::now().weekday())),
        }
    }

    pub fn success(title: &str, description: impl Into<String>) -> Self {
        Self::new(format!("✅ {title}"), description, COLOUR_SUCCESS)
    }

    pub fn error(title: &str, description: impl Into<String>) -> Self {
        Self::new(format!("❌ {title}"), description, COLOUR_ERROR)
    }

    pub fn info(title: &str, description: impl Into<String>) -> Self {
        Self::new(format!("ℹ️ {title}"), description, COLOUR_INFO)
    }

    fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push((name.into(), value.into(), inline));
        self
    }

    pub fn apply<'a>(&self, embed: &'a mut CreateEmbed) -> &'a mut CreateEmbed {
        embed
            .title(&self.title)
            .description(&self.description)
            .colour(self.colour);

        for (name, value, inline) in &self.fields {
            embed.field(name, value, *inline);
        }

        if let Some(thumbnail) = &self.thumbnail {
            embed.thumbnail(thumbnail);
        }

        if let Some(footer) = &self.footer {
            embed.footer(|f| f.text(footer));
        }

        embed
    }
}

/// Footer line that changes with the day of the week.
pub fn footer_text(weekday: Weekday) -> String {
    let tagline = match weekday {
        Weekday::Fri => "It's Friday, let's hear it! 🕺",
        Weekday::Sat | Weekday::Sun => "The music doesn't stop on weekends! ✨",
        Weekday::Mon => "Starting the week on the right foot! 🚀",
        _ => GENERAL_TAGLINES
            .choose(&mut thread_rng())
            .copied()
            .unwrap_or(GENERAL_TAGLINES[0]),
    };

    format!("{BOT_NAME} | {tagline}")
}

fn track_link(track: &Track) -> String {
    format!("**[{}]({})**", track.title, track.webpage_url)
}

pub fn error_card(error: &BotError) -> Card {
    let (title, description) = error.user_message();
    Card::error(title, description)
}

pub fn now_playing(track: &Track, next: Option<&Track>) -> Card {
    let mut card = Card::new("▶️ Now Playing".to_string(), track_link(track), COLOUR_MUSIC)
        .field("Duration", format!("`{}`", track.duration_text()), true);
    card.thumbnail = track.artwork_url.clone();

    if let Some(requester) = track.requester {
        card = card.field("Requested by", format!("<@{}>", requester.0), true);
    }

    let next = next
        .map(|track| track.title.clone())
        .unwrap_or_else(|| "End of the queue!".to_string());

    card.field("⬇️ Up Next", next, false)
}

pub fn left_for_inactivity() -> Card {
    Card::info("See You!", "The queue is empty, I'm heading out! 👋")
}

pub fn enqueued(tracks: &[Track], source_name: Option<&str>) -> Card {
    match (tracks, source_name) {
        ([track], _) => Card::success("Added to Queue", format!("{} was added to the queue.", track_link(track))),
        (tracks, Some(name)) => Card::success(
            "Playlist Added",
            format!("Added **{}** tracks from **{name}** to the queue.", tracks.len()),
        ),
        (tracks, None) => Card::success(
            "Playlist Added",
            format!("Added **{}** tracks to the queue.", tracks.len()),
        ),
    }
}

pub fn queue(snapshot: &SessionSnapshot) -> Card {
    if snapshot.now_playing.is_none() && snapshot.queued.is_empty() {
        return Card::info("Queue Empty", "There are no tracks in the queue.");
    }

    let mut card = Card::new("Music Queue 🎵".to_string(), String::new(), COLOUR_MUSIC);

    if let Some(track) = &snapshot.now_playing {
        card = card.field("▶️ Now Playing", track_link(track), false);
    }

    if !snapshot.queued.is_empty() {
        let listing = snapshot
            .queued
            .iter()
            .take(QUEUE_PREVIEW)
            .enumerate()
            .map(|(index, track)| format!("`{}.` {}", index + 1, track_link(track)))
            .collect::<Vec<String>>()
            .join("\n");

        card = card.field("⬇️ Up Next", listing, false);
    }

    if snapshot.queued.len() > QUEUE_PREVIEW {
        card.footer = Some(format!("... and {} more tracks.", snapshot.queued.len() - QUEUE_PREVIEW));
    }

    card
}

pub fn volume_bar(volume: u8) -> String {
    let filled = (volume / 10) as usize;
    let empty = ((MAX_VOLUME - volume.min(MAX_VOLUME)) / 10) as usize;

    format!("{}{}", "█".repeat(filled), "─".repeat(empty))
}

pub fn volume(volume: u8) -> Card {
    Card::info("Volume", format!("`{}` **{volume}%**", volume_bar(volume)))
}

pub fn always_on(enabled: bool) -> Card {
    let message = if enabled {
        "enabled! I won't leave the channel for inactivity anymore."
    } else {
        "disabled. I'll leave the channel after a few minutes of inactivity."
    };

    Card::info("24/7 Mode", format!("24/7 mode is **{message}**"))
}

pub fn help(prefix: &str) -> Card {
    let commands = [
        ("play <name|link>", "Plays (or queues) a track or playlist."),
        ("splay <name|catalog link>", "Plays a catalog track, playlist or album."),
        ("skip", "Skips to the next track in the queue."),
        ("stop", "Stops the music, clears the queue and leaves."),
        ("queue", "Shows the queue."),
        ("volume [0-150|+|-]", "Shows or changes the volume."),
        ("247", "Toggles 24/7 mode (never leave for inactivity)."),
        ("ping", "Shows the bot latency."),
        ("clear <1-100>", "[ADMIN] Deletes recent messages in this channel."),
    ];

    let listing = commands
        .iter()
        .map(|(usage, description)| format!("`{prefix}{usage}` - {description}"))
        .collect::<Vec<String>>()
        .join("\n");

    Card::new(format!("🎧 {BOT_NAME} Commands"), "Here is everything I can do!", COLOUR_MUSIC)
        .field("🎵 Music & ⚙️ General", listing, false)
}

/// Posts controller notices to the text channel they were addressed to.
pub struct ChannelAnnouncer {
    http: Arc<Http>,
}

impl ChannelAnnouncer {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Announcer for ChannelAnnouncer {
    async fn announce(&self, channel_id: ChannelId, notice: Notice) {
        let card = match &notice {
            Notice::NowPlaying { track, next } => now_playing(track, next.as_ref()),
            Notice::LeftForInactivity => left_for_inactivity(),
        };

        if let Err(why) = channel_id
            .send_message(&self.http, |m| m.embed(|e| card.apply(e)))
            .await
        {
            info!("Error sending message: {why:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use serenity::model::id::UserId;

    use super::*;
    use crate::models::test_track;
    use crate::session::PlaybackState;

    fn snapshot(now_playing: Option<Track>, queued: usize) -> SessionSnapshot {
        SessionSnapshot {
            state: PlaybackState::Playing,
            now_playing,
            queued: (0..queued).map(|i| test_track(&format!("t{i}"))).collect(),
            volume: 100,
            persistent: false,
        }
    }

    #[test]
    fn footer_follows_the_weekday() {
        assert_eq!(footer_text(Weekday::Fri), "DJ Boris | It's Friday, let's hear it! 🕺");
        assert_eq!(footer_text(Weekday::Sun), footer_text(Weekday::Sat));
        assert!(GENERAL_TAGLINES
            .iter()
            .any(|tagline| footer_text(Weekday::Wed).ends_with(tagline)));
    }

    #[test]
    fn queue_listing_is_capped_at_ten() {
        let card = queue(&snapshot(Some(test_track("current")), 13));

        assert_eq!(card.fields.len(), 2);
        assert!(card.fields[0].1.contains("current"));
        assert_eq!(card.fields[1].1.lines().count(), 10);
        assert!(card.fields[1].1.starts_with("`1.` **[t0]"));
        assert_eq!(card.footer.as_deref(), Some("... and 3 more tracks."));
    }

    #[test]
    fn empty_queue_is_an_info_card() {
        let card = queue(&snapshot(None, 0));

        assert_eq!(card.colour, COLOUR_INFO);
        assert!(card.title.contains("Queue Empty"));
    }

    #[test]
    fn now_playing_lists_duration_requester_and_next() {
        let track = Track {
            artwork_url: Some("https://i.example/a.jpg".to_string()),
            ..test_track("a").requested_by(UserId(99))
        };

        let card = now_playing(&track, None);

        assert_eq!(card.colour, COLOUR_MUSIC);
        assert_eq!(card.thumbnail.as_deref(), Some("https://i.example/a.jpg"));
        assert!(card.fields.contains(&("Duration".to_string(), "`3:20`".to_string(), true)));
        assert!(card.fields.contains(&("Requested by".to_string(), "<@99>".to_string(), true)));
        assert_eq!(card.fields.last().map(|f| f.1.as_str()), Some("End of the queue!"));
    }

    #[test]
    fn volume_bar_spans_the_full_range() {
        assert_eq!(volume_bar(0).chars().count(), 15);
        assert_eq!(volume_bar(150), "█".repeat(15));
        assert_eq!(volume_bar(100), format!("{}{}", "█".repeat(10), "─".repeat(5)));
    }

    #[test]
    fn enqueued_mentions_collection_name() {
        let tracks = vec![test_track("a"), test_track("b")];

        assert!(enqueued(&tracks, Some("Road Trip")).description.contains("**Road Trip**"));
        assert!(enqueued(&tracks[..1], None).title.contains("Added to Queue"));
    }

    #[test]
    fn errors_render_red() {
        let card = error_card(&BotError::NotConnected);

        assert_eq!(card.colour, COLOUR_ERROR);
        assert!(card.title.starts_with("❌"));
    }
}
