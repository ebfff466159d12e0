//! Playback Controller.
//!
//! [`SessionRegistry::step`] is the pure half: it applies one [`PlayerEvent`]
//! to the guild's [`GuildSession`] and hands back the resulting [`Effect`]s.
//! [`Controller`] is the driver that carries those effects out against an
//! [`AudioBackend`] and an [`Announcer`], owns the idle timer tasks, and
//! consumes asynchronous events (track ends, timer fires) from its channel.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{BotError, BotResult};
use crate::models::Track;
use crate::session::{
    Effect, GuildSession, Notice, PlayId, PlaybackState, TimerToken, DEFAULT_VOLUME,
};

#[derive(Debug)]
pub enum PlayerEvent {
    Enqueue {
        tracks: Vec<Track>,
        voice_channel: ChannelId,
        text_channel: ChannelId,
    },
    TrackFinished {
        play_id: PlayId,
    },
    IdleTimerFired {
        token: TimerToken,
    },
    Skip,
    Stop,
    SetVolume(i64),
    TogglePersistent,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Enqueued { added: usize, started: bool },
    Skipped(Track),
    Stopped,
    Volume(u8),
    Persistent(bool),
    Handled,
}

/// Read-only view of a guild's playback for rendering.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: PlaybackState,
    pub now_playing: Option<Track>,
    pub queued: Vec<Track>,
    pub volume: u8,
    pub persistent: bool,
}

pub type EventSender = mpsc::UnboundedSender<(GuildId, PlayerEvent)>;
pub type EventReceiver = mpsc::UnboundedReceiver<(GuildId, PlayerEvent)>;

/// Owns every guild's session plus the guild-scoped always-on flags, which
/// outlive sessions.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, GuildSession>,
    persistent: DashMap<GuildId, bool>,
    idle_timeout: Duration,
    default_volume: u8,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration, default_volume: u8) -> Self {
        Self {
            sessions: DashMap::new(),
            persistent: DashMap::new(),
            idle_timeout,
            default_volume,
        }
    }

    pub fn is_persistent(&self, guild_id: GuildId) -> bool {
        self.persistent.get(&guild_id).map(|flag| *flag).unwrap_or(false)
    }

    pub fn state(&self, guild_id: GuildId) -> PlaybackState {
        self.sessions
            .get(&guild_id)
            .map(|session| session.state())
            .unwrap_or(PlaybackState::Idle)
    }

    pub fn snapshot(&self, guild_id: GuildId) -> SessionSnapshot {
        match self.sessions.get(&guild_id) {
            Some(session) => SessionSnapshot {
                state: session.state(),
                now_playing: session.now_playing().cloned(),
                queued: session.queue().cloned().collect(),
                volume: session.volume(),
                persistent: session.is_persistent(),
            },
            None => SessionSnapshot {
                state: PlaybackState::Idle,
                now_playing: None,
                queued: Vec::new(),
                volume: self.default_volume,
                persistent: self.is_persistent(guild_id),
            },
        }
    }

    /// Applies one event. Sessions are created on the first enqueue and
    /// dropped as soon as they fall back to `Idle`.
    pub fn step(&self, guild_id: GuildId, event: PlayerEvent) -> BotResult<(Outcome, Vec<Effect>)> {
        let result = self.apply(guild_id, event);

        if self
            .sessions
            .remove_if(&guild_id, |_, session| session.state() == PlaybackState::Idle)
            .is_some()
        {
            info!("Session for guild {} torn down", guild_id.0);
        }

        result
    }

    fn apply(&self, guild_id: GuildId, event: PlayerEvent) -> BotResult<(Outcome, Vec<Effect>)> {
        match event {
            PlayerEvent::Enqueue {
                tracks,
                voice_channel,
                text_channel,
            } => {
                let persistent = self.is_persistent(guild_id);
                let mut session = self.sessions.entry(guild_id).or_insert_with(|| {
                    info!("Creating session for guild {}", guild_id.0);
                    GuildSession::new(persistent, self.default_volume, self.idle_timeout)
                });

                let added = tracks.len();
                let was_playing = session.now_playing().is_some();

                let mut effects = session.attach(voice_channel, text_channel);
                effects.extend(session.enqueue(tracks));
                effects.extend(session.start_if_stopped());

                let started = !was_playing && session.now_playing().is_some();

                Ok((Outcome::Enqueued { added, started }, effects))
            }
            PlayerEvent::TrackFinished { play_id } => Ok((
                Outcome::Handled,
                self.with_session(guild_id, |session| session.finish_track(play_id))
                    .unwrap_or_default(),
            )),
            PlayerEvent::IdleTimerFired { token } => Ok((
                Outcome::Handled,
                self.with_session(guild_id, |session| session.idle_timer_fired(token))
                    .unwrap_or_default(),
            )),
            PlayerEvent::Disconnected => Ok((
                Outcome::Handled,
                self.with_session(guild_id, GuildSession::forced_disconnect)
                    .unwrap_or_default(),
            )),
            PlayerEvent::Skip => {
                let (skipped, effects) = self
                    .with_session(guild_id, GuildSession::skip)
                    .ok_or(BotError::NotConnected)??;

                Ok((Outcome::Skipped(skipped), effects))
            }
            PlayerEvent::Stop => {
                let effects = self
                    .with_session(guild_id, GuildSession::stop)
                    .ok_or(BotError::NotConnected)?;

                Ok((Outcome::Stopped, effects))
            }
            PlayerEvent::SetVolume(value) => {
                let (volume, effects) = self
                    .with_session(guild_id, |session| session.set_volume(value))
                    .ok_or(BotError::NotConnected)?;

                Ok((Outcome::Volume(volume), effects))
            }
            PlayerEvent::TogglePersistent => {
                let enabled = !self.is_persistent(guild_id);
                self.persistent.insert(guild_id, enabled);

                let effects = self
                    .with_session(guild_id, |session| session.set_persistent(enabled))
                    .unwrap_or_default();

                Ok((Outcome::Persistent(enabled), effects))
            }
        }
    }

    fn with_session<T>(&self, guild_id: GuildId, f: impl FnOnce(&mut GuildSession) -> T) -> Option<T> {
        self.sessions
            .get_mut(&guild_id)
            .map(|mut session| f(session.value_mut()))
    }

    fn discard(&self, guild_id: GuildId) {
        self.sessions.remove(&guild_id);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(crate::session::DEFAULT_IDLE_TIMEOUT, DEFAULT_VOLUME)
    }
}

/// Voice side of playback: joining, leaving and streaming.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> BotResult<()>;

    async fn disconnect(&self, guild_id: GuildId) -> BotResult<()>;

    /// Starts `track` and reports its end as `TrackFinished { play_id }`.
    async fn play(&self, guild_id: GuildId, track: &Track, play_id: PlayId, volume: u8) -> BotResult<()>;

    async fn stop(&self, guild_id: GuildId) -> BotResult<()>;

    async fn set_volume(&self, guild_id: GuildId, volume: u8) -> BotResult<()>;
}

/// Posts playback notices to a text channel.
#[async_trait]
pub trait Announcer: Send + Sync {
    async fn announce(&self, channel_id: ChannelId, notice: Notice);
}

pub struct Controller {
    registry: SessionRegistry,
    backend: Arc<dyn AudioBackend>,
    announcer: Arc<dyn Announcer>,
    timers: DashMap<GuildId, JoinHandle<()>>,
    /// Held across a step and its effects so one guild's backend calls never overlap.
    guild_locks: DashMap<GuildId, Arc<Mutex<()>>>,
    events: EventSender,
}

impl Controller {
    pub fn new(
        registry: SessionRegistry,
        backend: Arc<dyn AudioBackend>,
        announcer: Arc<dyn Announcer>,
        events: EventSender,
    ) -> Self {
        Self {
            registry,
            backend,
            announcer,
            timers: DashMap::new(),
            guild_locks: DashMap::new(),
            events,
        }
    }

    pub fn snapshot(&self, guild_id: GuildId) -> SessionSnapshot {
        self.registry.snapshot(guild_id)
    }

    pub fn state(&self, guild_id: GuildId) -> PlaybackState {
        self.registry.state(guild_id)
    }

    pub async fn dispatch(&self, guild_id: GuildId, event: PlayerEvent) -> BotResult<Outcome> {
        debug!("Guild {} event {:?}", guild_id.0, event);

        let lock = self.guild_lock(guild_id);
        let _guard = lock.lock().await;

        let (outcome, effects) = self.registry.step(guild_id, event)?;
        self.execute(guild_id, effects).await?;

        Ok(outcome)
    }

    /// Consumes track-end and idle-timer events until every sender is gone.
    pub async fn run(self: Arc<Self>, mut events: EventReceiver) {
        while let Some((guild_id, event)) = events.recv().await {
            let controller = self.clone();

            tokio::spawn(async move {
                if let Err(why) = controller.dispatch(guild_id, event).await {
                    warn!("Background event for guild {} failed: {why}", guild_id.0);
                }
            });
        }

        info!("Controller event loop ended");
    }

    async fn execute(&self, guild_id: GuildId, effects: Vec<Effect>) -> BotResult<()> {
        let mut failed_play = false;

        for effect in effects {
            match effect {
                Effect::Connect(channel_id) => {
                    if let Err(why) = self.backend.connect(guild_id, channel_id).await {
                        warn!("Could not join voice channel {} in guild {}: {why}", channel_id.0, guild_id.0);

                        self.cancel_idle_timer(guild_id);
                        self.registry.discard(guild_id);

                        return Err(why);
                    }
                }
                Effect::Play {
                    track,
                    play_id,
                    volume,
                } => {
                    info!("Guild {} playing {} - {}", guild_id.0, track.title, track.webpage_url);

                    failed_play = false;

                    if let Err(why) = self.backend.play(guild_id, &track, play_id, volume).await {
                        warn!("Could not play {}: {why}", track.title);

                        failed_play = true;
                        self.notify(guild_id, PlayerEvent::TrackFinished { play_id });
                    }
                }
                Effect::StopTrack => {
                    if let Err(why) = self.backend.stop(guild_id).await {
                        warn!("Stopping track in guild {} failed: {why}", guild_id.0);
                    }
                }
                Effect::SetVolume(volume) => {
                    if let Err(why) = self.backend.set_volume(guild_id, volume).await {
                        warn!("Setting volume in guild {} failed: {why}", guild_id.0);
                    }
                }
                Effect::ArmIdleTimer { token, after } => self.arm_idle_timer(guild_id, token, after),
                Effect::CancelIdleTimer => self.cancel_idle_timer(guild_id),
                Effect::Disconnect => {
                    info!("Leaving voice channel in guild {}", guild_id.0);

                    self.cancel_idle_timer(guild_id);

                    if let Err(why) = self.backend.disconnect(guild_id).await {
                        warn!("Disconnect in guild {} failed: {why}", guild_id.0);
                    }
                }
                Effect::Announce { channel, notice } => {
                    if failed_play && matches!(notice, Notice::NowPlaying { .. }) {
                        continue;
                    }

                    self.announcer.announce(channel, notice).await;
                }
            }
        }

        Ok(())
    }

    fn guild_lock(&self, guild_id: GuildId) -> Arc<Mutex<()>> {
        Arc::clone(&self.guild_locks.entry(guild_id).or_default())
    }

    fn arm_idle_timer(&self, guild_id: GuildId, token: TimerToken, after: Duration) {
        debug!("Arming idle timer {token} for guild {} ({}s)", guild_id.0, after.as_secs());

        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;

            if events
                .send((guild_id, PlayerEvent::IdleTimerFired { token }))
                .is_err()
            {
                debug!("Idle timer {token} fired after the controller stopped");
            }
        });

        if let Some(previous) = self.timers.insert(guild_id, handle) {
            previous.abort();
        }
    }

    fn cancel_idle_timer(&self, guild_id: GuildId) {
        if let Some((_, handle)) = self.timers.remove(&guild_id) {
            debug!("Cancelling idle timer for guild {}", guild_id.0);
            handle.abort();
        }
    }

    fn notify(&self, guild_id: GuildId, event: PlayerEvent) {
        if self.events.send((guild_id, event)).is_err() {
            warn!("Controller event loop is gone, dropping event for guild {}", guild_id.0);
        }
    }
}
