//! Per-guild playback state.
//!
//! A [`GuildSession`] never performs I/O. Every mutating operation returns the
//! [`Effect`]s the caller has to carry out against the audio backend, the idle
//! timer and the text channel, in order.

use std::collections::VecDeque;
use std::time::Duration;

use serenity::model::id::ChannelId;
use tracing::debug;

use crate::error::{BotError, BotResult, NotFoundKind};
use crate::models::Track;

pub const MIN_VOLUME: u8 = 0;
pub const MAX_VOLUME: u8 = 150;
pub const DEFAULT_VOLUME: u8 = 100;
pub const VOLUME_STEP: i64 = 10;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Identifies one start of one track. Finish events for older ids are stale.
pub type PlayId = u64;

/// Identifies one arming of the idle timer. Fires for older tokens are stale.
pub type TimerToken = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    ConnectedEmpty,
    Playing,
    AwaitingDisconnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    NowPlaying { track: Track, next: Option<Track> },
    LeftForInactivity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Connect(ChannelId),
    Play { track: Track, play_id: PlayId, volume: u8 },
    StopTrack,
    SetVolume(u8),
    ArmIdleTimer { token: TimerToken, after: Duration },
    CancelIdleTimer,
    Disconnect,
    Announce { channel: ChannelId, notice: Notice },
}

pub fn clamp_volume(value: i64) -> u8 {
    value.clamp(MIN_VOLUME as i64, MAX_VOLUME as i64) as u8
}

#[derive(Debug)]
pub struct GuildSession {
    queue: VecDeque<Track>,
    now_playing: Option<(PlayId, Track)>,
    volume: u8,
    persistent: bool,
    idle_timer: Option<TimerToken>,
    idle_timeout: Duration,
    voice_channel: Option<ChannelId>,
    text_channel: Option<ChannelId>,
    last_play_id: PlayId,
    last_timer: TimerToken,
}

impl GuildSession {
    pub fn new(persistent: bool, volume: u8, idle_timeout: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            now_playing: None,
            volume: clamp_volume(volume as i64),
            persistent,
            idle_timer: None,
            idle_timeout,
            voice_channel: None,
            text_channel: None,
            last_play_id: 0,
            last_timer: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        if self.voice_channel.is_none() {
            PlaybackState::Idle
        } else if self.now_playing.is_some() {
            PlaybackState::Playing
        } else if self.idle_timer.is_some() {
            PlaybackState::AwaitingDisconnect
        } else {
            PlaybackState::ConnectedEmpty
        }
    }

    pub fn now_playing(&self) -> Option<&Track> {
        self.now_playing.as_ref().map(|(_, track)| track)
    }

    pub fn queue(&self) -> impl Iterator<Item = &Track> {
        self.queue.iter()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    #[cfg(test)]
    pub fn has_idle_timer(&self) -> bool {
        self.idle_timer.is_some()
    }

    fn is_idle(&self) -> bool {
        self.now_playing.is_none() && self.queue.is_empty()
    }

    /// Binds the session to a voice channel (first time only) and remembers
    /// where announcements should go.
    pub fn attach(&mut self, voice_channel: ChannelId, text_channel: ChannelId) -> Vec<Effect> {
        self.text_channel = Some(text_channel);

        if self.voice_channel.is_some() {
            return Vec::new();
        }

        self.voice_channel = Some(voice_channel);
        vec![Effect::Connect(voice_channel)]
    }

    /// Appends tracks at the tail, in order. Cancels a pending idle timer.
    pub fn enqueue(&mut self, tracks: Vec<Track>) -> Vec<Effect> {
        if tracks.is_empty() {
            return Vec::new();
        }

        self.queue.extend(tracks);

        match self.idle_timer.take() {
            Some(token) => {
                debug!("Enqueue cancels idle timer {token}");
                vec![Effect::CancelIdleTimer]
            }
            None => Vec::new(),
        }
    }

    /// Starts the head of the queue when nothing is playing.
    pub fn start_if_stopped(&mut self) -> Vec<Effect> {
        if self.now_playing.is_none() && !self.queue.is_empty() {
            self.advance()
        } else {
            Vec::new()
        }
    }

    /// Pops the head of the queue into "now playing", or goes idle.
    pub fn advance(&mut self) -> Vec<Effect> {
        match self.queue.pop_front() {
            Some(track) => {
                self.last_play_id += 1;
                let play_id = self.last_play_id;
                self.now_playing = Some((play_id, track.clone()));

                let mut effects = Vec::new();

                if self.idle_timer.take().is_some() {
                    effects.push(Effect::CancelIdleTimer);
                }

                effects.push(Effect::Play {
                    track: track.clone(),
                    play_id,
                    volume: self.volume,
                });

                if let Some(channel) = self.text_channel {
                    effects.push(Effect::Announce {
                        channel,
                        notice: Notice::NowPlaying {
                            track,
                            next: self.queue.front().cloned(),
                        },
                    });
                }

                effects
            }
            None => {
                self.now_playing = None;

                if self.persistent {
                    Vec::new()
                } else {
                    self.arm_idle_timer()
                }
            }
        }
    }

    fn arm_idle_timer(&mut self) -> Vec<Effect> {
        self.last_timer += 1;
        self.idle_timer = Some(self.last_timer);

        vec![Effect::ArmIdleTimer {
            token: self.last_timer,
            after: self.idle_timeout,
        }]
    }

    /// The audio backend reports the end of `play_id`.
    pub fn finish_track(&mut self, play_id: PlayId) -> Vec<Effect> {
        match &self.now_playing {
            Some((current, _)) if *current == play_id => self.advance(),
            _ => {
                debug!("Ignoring stale track end for play {play_id}");
                Vec::new()
            }
        }
    }

    /// Stops the current track and moves on. Returns the skipped track.
    pub fn skip(&mut self) -> BotResult<(Track, Vec<Effect>)> {
        let (_, skipped) = self
            .now_playing
            .take()
            .ok_or(BotError::NotFound(NotFoundKind::NothingPlaying))?;

        let mut effects = vec![Effect::StopTrack];
        effects.extend(self.advance());

        Ok((skipped, effects))
    }

    pub fn set_volume(&mut self, value: i64) -> (u8, Vec<Effect>) {
        self.volume = clamp_volume(value);

        (self.volume, vec![Effect::SetVolume(self.volume)])
    }

    pub fn set_persistent(&mut self, persistent: bool) -> Vec<Effect> {
        self.persistent = persistent;

        if persistent {
            match self.idle_timer.take() {
                Some(_) => vec![Effect::CancelIdleTimer],
                None => Vec::new(),
            }
        } else if self.is_idle() && self.idle_timer.is_none() && self.voice_channel.is_some() {
            self.arm_idle_timer()
        } else {
            Vec::new()
        }
    }

    /// The idle timer armed as `token` ran out. Re-checks idleness now.
    pub fn idle_timer_fired(&mut self, token: TimerToken) -> Vec<Effect> {
        if self.idle_timer != Some(token) {
            debug!("Ignoring stale idle timer {token}");
            return Vec::new();
        }

        self.idle_timer = None;

        if !self.is_idle() || self.persistent {
            return Vec::new();
        }

        self.voice_channel = None;

        let mut effects = vec![Effect::Disconnect];

        if let Some(channel) = self.text_channel {
            effects.push(Effect::Announce {
                channel,
                notice: Notice::LeftForInactivity,
            });
        }

        effects
    }

    /// Clears everything and leaves the voice channel.
    pub fn stop(&mut self) -> Vec<Effect> {
        let mut effects = self.clear();
        effects.push(Effect::StopTrack);
        effects.push(Effect::Disconnect);
        effects
    }

    /// Someone else already removed us from the voice channel.
    pub fn forced_disconnect(&mut self) -> Vec<Effect> {
        let mut effects = self.clear();
        effects.push(Effect::StopTrack);
        effects
    }

    fn clear(&mut self) -> Vec<Effect> {
        self.queue.clear();
        self.now_playing = None;
        self.voice_channel = None;

        match self.idle_timer.take() {
            Some(_) => vec![Effect::CancelIdleTimer],
            None => Vec::new(),
        }
    }
}
