//! Command Surface: prefix commands on serenity's standard framework.
//!
//! Handlers validate the caller, delegate to the resolver and the controller,
//! and render the outcome. Every [`BotError`] is rendered here and nowhere
//! else.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serenity::client::Context;
use serenity::framework::standard::macros::{command, group, hook};
use serenity::framework::standard::{Args, CommandResult, DispatchError};
use serenity::http::HttpError;
use serenity::model::channel::{Message, ReactionType};
use serenity::model::id::{ChannelId, GuildId, UserId};
use serenity::prelude::TypeMapKey;
use serenity::{Error as SerenityError, Result as SerenityResult};
use tracing::{error, info};

use crate::controller::{Controller, Outcome, PlayerEvent};
use crate::embeds::{self, Card};
use crate::error::{BotError, BotResult};
use crate::resolver::Resolver;
use crate::session::{PlaybackState, VOLUME_STEP};

const LOADING_EMOJI: &str = "⏳";
const MAX_CLEAR: u64 = 100;

pub struct ControllerKey;

impl TypeMapKey for ControllerKey {
    type Value = Arc<Controller>;
}

pub struct ResolverKey;

impl TypeMapKey for ResolverKey {
    type Value = Arc<Resolver>;
}

pub struct PrefixKey;

impl TypeMapKey for PrefixKey {
    type Value = String;
}

pub struct BotDataMap;

pub struct BotData {
    pub id: UserId,
}

impl TypeMapKey for BotDataMap {
    type Value = BotData;
}

#[group]
#[commands(play, splay, skip, stop, queue, volume, alwayson, ping, help, clear)]
struct General;

#[derive(Clone, Copy)]
enum ResolveMode {
    Direct,
    CatalogFirst,
}

#[command]
#[only_in(guilds)]
async fn play(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let result = with_loading_reaction(ctx, msg, enqueue(ctx, msg, args.message(), ResolveMode::Direct)).await;

    respond(ctx, msg, result).await
}

#[command]
#[only_in(guilds)]
async fn splay(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let result =
        with_loading_reaction(ctx, msg, enqueue(ctx, msg, args.message(), ResolveMode::CatalogFirst)).await;

    respond(ctx, msg, result).await
}

async fn enqueue(ctx: &Context, msg: &Message, input: &str, mode: ResolveMode) -> BotResult<Card> {
    let guild_id = guild_id(msg)?;
    let voice_channel = caller_voice_channel(ctx, msg)?;
    let resolver = resolver(ctx).await?;
    let controller = controller(ctx).await?;

    info!("User input is {input}");

    let resolution = match mode {
        ResolveMode::Direct => resolver.resolve(input, msg.author.id).await?,
        ResolveMode::CatalogFirst => resolver.resolve_catalog_first(input, msg.author.id).await?,
    };

    let card = embeds::enqueued(&resolution.tracks, resolution.source_name.as_deref());

    controller
        .dispatch(
            guild_id,
            PlayerEvent::Enqueue {
                tracks: resolution.tracks,
                voice_channel,
                text_channel: msg.channel_id,
            },
        )
        .await?;

    Ok(card)
}

#[command]
#[only_in(guilds)]
async fn skip(ctx: &Context, msg: &Message) -> CommandResult {
    let result = async {
        match dispatch(ctx, msg, PlayerEvent::Skip).await? {
            Outcome::Skipped(track) => Ok(Card::success("Track Skipped!", format!("Skipped **{}**.", track.title))),
            other => Err(unexpected(other)),
        }
    }
    .await;

    respond(ctx, msg, result).await
}

#[command]
#[only_in(guilds)]
async fn stop(ctx: &Context, msg: &Message) -> CommandResult {
    let result = async {
        dispatch(ctx, msg, PlayerEvent::Stop).await?;

        Ok(Card::success(
            "Party's Over!",
            "Music stopped and queue cleared. See you next time!",
        ))
    }
    .await;

    respond(ctx, msg, result).await
}

#[command]
#[only_in(guilds)]
async fn queue(ctx: &Context, msg: &Message) -> CommandResult {
    let result = async {
        let guild_id = guild_id(msg)?;
        let snapshot = controller(ctx).await?.snapshot(guild_id);

        Ok(embeds::queue(&snapshot))
    }
    .await;

    respond(ctx, msg, result).await
}

#[command]
#[only_in(guilds)]
async fn volume(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let result = async {
        let guild_id = guild_id(msg)?;
        let controller = controller(ctx).await?;
        let snapshot = controller.snapshot(guild_id);

        if snapshot.state == PlaybackState::Idle {
            return Err(BotError::NotConnected);
        }

        let target = match volume_target(args.message(), snapshot.volume)? {
            Some(target) => target,
            None => return Ok(embeds::volume(snapshot.volume)),
        };

        match controller.dispatch(guild_id, PlayerEvent::SetVolume(target)).await? {
            Outcome::Volume(volume) => Ok(embeds::volume(volume)),
            other => Err(unexpected(other)),
        }
    }
    .await;

    respond(ctx, msg, result).await
}

#[command]
#[aliases("247")]
#[only_in(guilds)]
async fn alwayson(ctx: &Context, msg: &Message) -> CommandResult {
    let result = async {
        match dispatch(ctx, msg, PlayerEvent::TogglePersistent).await? {
            Outcome::Persistent(enabled) => Ok(embeds::always_on(enabled)),
            other => Err(unexpected(other)),
        }
    }
    .await;

    respond(ctx, msg, result).await
}

#[command]
async fn ping(ctx: &Context, msg: &Message) -> CommandResult {
    let started = Instant::now();
    let mut reply = msg.channel_id.say(&ctx.http, "Pong! 🏓").await?;
    let latency = started.elapsed().as_millis();

    let card = Card::info("Pong! 🏓", format!("My latency is `{latency}ms`."));

    reply
        .edit(ctx, |m| m.content("").embed(|e| card.apply(e)))
        .await?;

    Ok(())
}

#[command]
async fn help(ctx: &Context, msg: &Message) -> CommandResult {
    let prefix = {
        let data = ctx.data.read().await;
        data.get::<PrefixKey>().cloned().unwrap_or_else(|| "!".to_string())
    };

    send_card(ctx, msg.channel_id, &embeds::help(&prefix)).await;

    Ok(())
}

#[command]
#[only_in(guilds)]
#[required_permissions("MANAGE_MESSAGES")]
async fn clear(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let result = async {
        let count = clear_count(args.message())?;

        let messages = msg
            .channel_id
            .messages(&ctx.http, |retriever| retriever.before(msg.id).limit(count))
            .await
            .map_err(moderation_error)?;

        let ids: Vec<_> = messages.iter().map(|message| message.id).collect();

        match ids.as_slice() {
            [] => {}
            [single] => msg
                .channel_id
                .delete_message(&ctx.http, *single)
                .await
                .map_err(moderation_error)?,
            _ => msg
                .channel_id
                .delete_messages(&ctx.http, ids.iter().copied())
                .await
                .map_err(moderation_error)?,
        }

        Ok(Card::success(
            "Cleanup Done!",
            format!("**{}** messages were deleted from this channel.", ids.len()),
        ))
    }
    .await;

    respond(ctx, msg, result).await
}

/// Parses the `volume` argument: nothing shows the level, `+`/`-` step it.
fn volume_target(arg: &str, current: u8) -> BotResult<Option<i64>> {
    match arg.trim() {
        "" => Ok(None),
        "+" => Ok(Some(current as i64 + VOLUME_STEP)),
        "-" => Ok(Some(current as i64 - VOLUME_STEP)),
        value => value
            .trim_end_matches('%')
            .parse::<i64>()
            .map(Some)
            .map_err(|_| BotError::InvalidInput(format!("`{value}` is not a volume. Use a number, `+` or `-`."))),
    }
}

fn clear_count(arg: &str) -> BotResult<u64> {
    let count = arg
        .trim()
        .parse::<i64>()
        .map_err(|_| BotError::InvalidInput("Tell me how many messages to delete (1-100).".to_string()))?;

    if count <= 0 {
        return Err(BotError::InvalidInput("The number of messages must be greater than zero.".to_string()));
    }

    if count as u64 > MAX_CLEAR {
        return Err(BotError::InvalidInput("You can only delete up to 100 messages at a time.".to_string()));
    }

    Ok(count as u64)
}

fn moderation_error(why: SerenityError) -> BotError {
    let forbidden = match &why {
        SerenityError::Http(http) => matches!(
            http.as_ref(),
            HttpError::UnsuccessfulRequest(response) if response.status_code.as_u16() == 403
        ),
        _ => false,
    };

    if forbidden {
        BotError::PermissionDenied("I don't have permission to delete messages in this channel.".to_string())
    } else {
        BotError::BackendUnavailable(format!("message cleanup failed: {why}"))
    }
}

fn unexpected(outcome: Outcome) -> BotError {
    BotError::BackendUnavailable(format!("unexpected outcome {outcome:?}"))
}

async fn dispatch(ctx: &Context, msg: &Message, event: PlayerEvent) -> BotResult<Outcome> {
    let guild_id = guild_id(msg)?;

    controller(ctx).await?.dispatch(guild_id, event).await
}

async fn respond(ctx: &Context, msg: &Message, result: BotResult<Card>) -> CommandResult {
    let card = match result {
        Ok(card) => card,
        Err(why) => {
            info!("Command from {} failed: {why}", msg.author.name);
            embeds::error_card(&why)
        }
    };

    send_card(ctx, msg.channel_id, &card).await;

    Ok(())
}

async fn send_card(ctx: &Context, channel_id: ChannelId, card: &Card) {
    check_msg(
        channel_id
            .send_message(&ctx.http, |m| m.embed(|e| card.apply(e)))
            .await,
    );
}

async fn with_loading_reaction<T>(ctx: &Context, msg: &Message, work: impl Future<Output = T>) -> T {
    let loading_emoji = ReactionType::Unicode(LOADING_EMOJI.to_string());

    if let Err(why) = msg.react(&ctx.http, loading_emoji.clone()).await {
        info!("Error adding reaction: {why:?}");
    }

    let result = work.await;

    let bot_id = {
        let data = ctx.data.read().await;
        data.get::<BotDataMap>().map(|data| data.id)
    };

    if let Some(bot_id) = bot_id {
        if let Err(why) = msg
            .channel_id
            .delete_reaction(&ctx.http, msg.id, Some(bot_id), loading_emoji)
            .await
        {
            info!("Error removing reaction: {why:?}");
        }
    }

    result
}

async fn controller(ctx: &Context) -> BotResult<Arc<Controller>> {
    let data = ctx.data.read().await;

    data.get::<ControllerKey>()
        .cloned()
        .ok_or_else(|| BotError::BackendUnavailable("playback controller not initialised".to_string()))
}

async fn resolver(ctx: &Context) -> BotResult<Arc<Resolver>> {
    let data = ctx.data.read().await;

    data.get::<ResolverKey>()
        .cloned()
        .ok_or_else(|| BotError::BackendUnavailable("track resolver not initialised".to_string()))
}

fn guild_id(msg: &Message) -> BotResult<GuildId> {
    msg.guild_id
        .ok_or_else(|| BotError::InvalidInput("This command only works in a server.".to_string()))
}

fn caller_voice_channel(ctx: &Context, msg: &Message) -> BotResult<ChannelId> {
    let guild = msg
        .guild(&ctx.cache)
        .ok_or_else(|| BotError::BackendUnavailable("guild not in cache".to_string()))?;

    guild
        .voice_states
        .get(&msg.author.id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| BotError::PermissionDenied("You need to be in a voice channel.".to_string()))
}

/// Checks that a message successfully sent; if not, then logs why.
fn check_msg(result: SerenityResult<Message>) {
    if let Err(why) = result {
        info!("Error sending message: {why:?}");
    }
}

#[hook]
pub async fn after(_ctx: &Context, _msg: &Message, command_name: &str, command_result: CommandResult) {
    if let Err(why) = command_result {
        error!("Command '{command_name}' returned error {why:?}");
    }
}

#[hook]
pub async fn dispatch_error(ctx: &Context, msg: &Message, error: DispatchError, command_name: &str) {
    let error = match error {
        DispatchError::LackingPermissions(_) => {
            BotError::PermissionDenied("You don't have permission to use this command.".to_string())
        }
        DispatchError::OnlyForGuilds => BotError::InvalidInput("This command only works in a server.".to_string()),
        other => {
            info!("Command '{command_name}' was not dispatched: {other:?}");
            return;
        }
    };

    send_card(ctx, msg.channel_id, &embeds::error_card(&error)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_argument_forms() {
        assert_eq!(volume_target("", 80).unwrap(), None);
        assert_eq!(volume_target(" + ", 80).unwrap(), Some(90));
        assert_eq!(volume_target("-", 5).unwrap(), Some(-5));
        assert_eq!(volume_target("120", 80).unwrap(), Some(120));
        assert_eq!(volume_target("75%", 80).unwrap(), Some(75));
        assert!(matches!(volume_target("loud", 80), Err(BotError::InvalidInput(_))));
    }

    #[test]
    fn clear_count_is_bounded() {
        assert_eq!(clear_count("10").unwrap(), 10);
        assert_eq!(clear_count("100").unwrap(), 100);
        assert!(matches!(clear_count("0"), Err(BotError::InvalidInput(_))));
        assert!(matches!(clear_count("101"), Err(BotError::InvalidInput(_))));
        assert!(matches!(clear_count("some"), Err(BotError::InvalidInput(_))));
    }
}
