use std::sync::Arc;

use dashmap::DashMap;
use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::tracks::TrackHandle;
use songbird::{ytdl, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use tracing::info;

use crate::controller::{AudioBackend, EventSender, PlayerEvent};
use crate::error::{BotError, BotResult};
use crate::models::Track;
use crate::session::PlayId;

/// Plays through songbird, one active track handle per guild.
pub struct SongbirdBackend {
    manager: Arc<Songbird>,
    handles: DashMap<GuildId, TrackHandle>,
    events: EventSender,
}

impl SongbirdBackend {
    pub fn new(manager: Arc<Songbird>, events: EventSender) -> Self {
        Self {
            manager,
            handles: DashMap::new(),
            events,
        }
    }
}

/// Songbird gain where 1.0 is the source level.
fn volume_gain(volume: u8) -> f32 {
    volume as f32 / 100.0
}

#[async_trait]
impl AudioBackend for SongbirdBackend {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> BotResult<()> {
        let (handler_lock, result) = self.manager.join(guild_id, channel_id).await;

        result.map_err(|why| BotError::BackendUnavailable(format!("voice join failed: {why}")))?;

        let mut handler = handler_lock.lock().await;

        if handler.is_deaf() {
            info!("Already deafened in guild {}", guild_id.0);
        } else if let Err(e) = handler.deafen(true).await {
            info!("Deafen failed due to {e:?}");
        }

        Ok(())
    }

    async fn disconnect(&self, guild_id: GuildId) -> BotResult<()> {
        self.handles.remove(&guild_id);

        if self.manager.get(guild_id).is_some() {
            self.manager
                .remove(guild_id)
                .await
                .map_err(|why| BotError::BackendUnavailable(format!("voice leave failed: {why}")))?;
        }

        Ok(())
    }

    async fn play(&self, guild_id: GuildId, track: &Track, play_id: PlayId, volume: u8) -> BotResult<()> {
        let source = ytdl(&track.webpage_url).await.map_err(|why| {
            BotError::BackendUnavailable(format!("could not load {}: {why}", track.title))
        })?;

        let handler_lock = self.manager.get(guild_id).ok_or(BotError::NotConnected)?;
        let mut handler = handler_lock.lock().await;

        // The previous track's end event carries an older play id and is ignored.
        handler.stop();
        let track_handle = handler.play_source(source);

        if let Err(why) = track_handle.set_volume(volume_gain(volume)) {
            info!("Initial volume for {} not applied: {why}", track.title);
        }

        track_handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    guild_id,
                    play_id,
                    events: self.events.clone(),
                },
            )
            .map_err(|why| BotError::BackendUnavailable(format!("track end hook failed: {why}")))?;

        self.handles.insert(guild_id, track_handle);

        Ok(())
    }

    async fn stop(&self, guild_id: GuildId) -> BotResult<()> {
        if let Some((_, track_handle)) = self.handles.remove(&guild_id) {
            track_handle
                .stop()
                .map_err(|why| BotError::BackendUnavailable(format!("stop failed: {why}")))?;
        }

        Ok(())
    }

    async fn set_volume(&self, guild_id: GuildId, volume: u8) -> BotResult<()> {
        if let Some(track_handle) = self.handles.get(&guild_id) {
            track_handle
                .set_volume(volume_gain(volume))
                .map_err(|why| BotError::BackendUnavailable(format!("volume change failed: {why}")))?;
        }

        Ok(())
    }
}

struct TrackEndNotifier {
    guild_id: GuildId,
    play_id: PlayId,
    events: EventSender,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        info!("End notifier triggered for play {} in guild {}", self.play_id, self.guild_id.0);

        let event = PlayerEvent::TrackFinished {
            play_id: self.play_id,
        };

        if self.events.send((self.guild_id, event)).is_err() {
            info!("Controller gone, track end for guild {} dropped", self.guild_id.0);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_maps_to_gain() {
        assert_eq!(volume_gain(100), 1.0);
        assert_eq!(volume_gain(0), 0.0);
        assert_eq!(volume_gain(150), 1.5);
    }
}
