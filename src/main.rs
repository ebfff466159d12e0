use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use serenity::{
    async_trait,
    client::{Client, Context, EventHandler},
    framework::StandardFramework,
    model::{gateway::Activity, gateway::Ready, voice::VoiceState},
    prelude::GatewayIntents,
    Result as SerenityResult,
};
use songbird::{SerenityInit, Songbird};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::audio::SongbirdBackend;
use crate::commands::{BotData, BotDataMap, ControllerKey, PrefixKey, ResolverKey, GENERAL_GROUP};
use crate::config::Config;
use crate::controller::{Controller, PlayerEvent, SessionRegistry};
use crate::embeds::ChannelAnnouncer;
use crate::error::{BotError, BotResult};
use crate::resolver::{Catalog, Resolver};
use crate::session::PlaybackState;
use crate::spotify::SpotifyCatalog;
use crate::ytdlp::YtDlp;

mod audio;
mod commands;
mod config;
mod controller;
mod embeds;
mod error;
mod models;
mod resolver;
mod session;
mod spotify;
mod ytdlp;

const PRESENCE_ROTATION: Duration = Duration::from_secs(60);

struct Handler {
    prefix: String,
    presence_started: AtomicBool,
}

impl Handler {
    fn activities(&self) -> Vec<Activity> {
        vec![
            Activity::playing(format!("music with {}play", self.prefix)),
            Activity::listening(format!("{}help", self.prefix)),
        ]
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);

        {
            let data = &mut ctx.data.write().await;
            data.insert::<BotDataMap>(BotData { id: ready.user.id });
        }

        if self.presence_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let activities = self.activities();

        tokio::spawn(async move {
            for activity in activities.into_iter().cycle() {
                ctx.set_activity(activity).await;
                tokio::time::sleep(PRESENCE_ROTATION).await;
            }
        });
    }

    async fn voice_state_update(&self, ctx: Context, _: Option<VoiceState>, new: VoiceState) {
        if new.channel_id.is_some() {
            return;
        }

        let (bot_id, controller) = {
            let data = ctx.data.read().await;
            (
                data.get::<BotDataMap>().map(|data| data.id),
                data.get::<ControllerKey>().cloned(),
            )
        };

        let (Some(bot_id), Some(guild_id), Some(controller)) = (bot_id, new.guild_id, controller) else {
            return;
        };

        if bot_id != new.user_id {
            return;
        }

        if controller.state(guild_id) == PlaybackState::Idle {
            return;
        }

        info!("Bot was removed from voice in guild {}", guild_id.0);

        if let Err(why) = controller.dispatch(guild_id, PlayerEvent::Disconnected).await {
            warn!("Cleaning up after disconnect failed: {why}");
        }
    }
}

fn resolver(config: &Config) -> BotResult<Resolver> {
    let catalog = match &config.catalog {
        Some(credentials) => {
            let catalog = SpotifyCatalog::new(credentials.clone(), config.external_timeout)?;
            Some(Arc::new(catalog) as Arc<dyn Catalog>)
        }
        None => None,
    };

    Ok(Resolver::new(catalog, Arc::new(YtDlp::new(config.external_timeout))))
}

#[tokio::main]
async fn main() -> BotResult<()> {
    let dotenv_result = dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(why) = dotenv_result {
        info!("No .env file loaded: {why}");
    }

    let config = Config::from_env()?;
    let resolver = resolver(&config)?;

    let framework = StandardFramework::new()
        .configure(|c| c.prefix(config.prefix.as_str()))
        .after(commands::after)
        .on_dispatch_error(commands::dispatch_error)
        .group(&GENERAL_GROUP);

    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;

    let songbird = Songbird::serenity();

    let handler = Handler {
        prefix: config.prefix.clone(),
        presence_started: AtomicBool::new(false),
    };

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .framework(framework)
        .register_songbird_with(songbird.clone())
        .await
        .map_err(|why| BotError::Configuration(format!("Err creating client: {why}")))?;

    let (events, receiver) = mpsc::unbounded_channel();

    let controller = Arc::new(Controller::new(
        SessionRegistry::new(config.idle_timeout, config.default_volume),
        Arc::new(SongbirdBackend::new(songbird, events.clone())),
        Arc::new(ChannelAnnouncer::new(client.cache_and_http.http.clone())),
        events,
    ));

    tokio::spawn(controller.clone().run(receiver));

    {
        let mut w = client.data.write().await;

        w.insert::<ControllerKey>(controller);
        w.insert::<ResolverKey>(Arc::new(resolver));
        w.insert::<PrefixKey>(config.prefix.clone());
    }

    let shard_manager = client.shard_manager.clone();

    tokio::select! {
        result = client.start() => client_ended(result),
        signal = tokio::signal::ctrl_c() => {
            signal?;

            info!("Received Ctrl-C, shutting down.");

            shard_manager.lock().await.shutdown_all().await;

            Ok(())
        }
    }
}

/// The gateway client only returns on failure, e.g. a rejected token.
fn client_ended(result: SerenityResult<()>) -> BotResult<()> {
    result.map_err(|why| BotError::Configuration(format!("Client ended: {why}")))?;

    info!("Client ended.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use serenity::Error as SerenityError;

    use super::*;

    #[test]
    fn client_failure_ends_the_process_with_an_error() {
        let result = client_ended(Err(SerenityError::Other("invalid token")));

        assert!(matches!(result, Err(BotError::Configuration(message)) if message.contains("invalid token")));
        assert!(client_ended(Ok(())).is_ok());
    }
}
