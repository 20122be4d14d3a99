//! Playback session state and transitions
//!
//! `PlaybackSession` is plain data owned by the player task. Every change
//! goes through one of the transition methods below; the player decides
//! *when* to call them, this module decides *what* each one means.
//!
//! Volume and mute are coupled: a volume of zero always reads as muted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use strum::Display;
use uuid::Uuid;

use crate::config::PlaybackConfig;
use crate::engine::{EngineError, EngineName};
use crate::errors::PlaybackError;
use crate::models::Channel;
use crate::streaming::classification::StreamFormat;
use crate::streaming::resolver::ResolvedUrl;
use crate::utils::jitter::generate_jitter_percent;

/// Session-level state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Resolving,
    Classified,
    Loading { engine: EngineName },
    Playing,
    Disconnected,
}

/// Connection status shown to the user; `Buffering` is a sub-status of `Playing`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Resolving,
    Buffering,
    Connected,
    Disconnected,
}

/// Exponential backoff between automatic session restarts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub jitter_percent: u8,
}

impl BackoffPolicy {
    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self {
            base: config.backoff_base,
            cap: config.backoff_cap,
            jitter_percent: config.backoff_jitter_percent,
        }
    }

    /// `base * 2^retry_count`, capped
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        1u32.checked_shl(retry_count)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Base delay plus jitter
    pub fn delay(&self, retry_count: u32) -> Duration {
        let delay = self.base_delay(retry_count);
        delay + generate_jitter_percent(delay, self.jitter_percent)
    }
}

/// What happens after a session disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Automatic restart after the delay
    Scheduled(Duration),
    /// Retry budget spent, waiting for a manual retry
    Exhausted,
    /// Retrying cannot help, waiting for a manual retry
    NotRetryable,
}

#[derive(Debug, Clone)]
pub struct PlaybackSession {
    id: Uuid,
    channel: Channel,
    phase: SessionPhase,
    connection: ConnectionState,
    resolved: Option<ResolvedUrl>,
    format: Option<StreamFormat>,
    candidates: Vec<EngineName>,
    attempted: Vec<EngineName>,
    selected_engine: Option<EngineName>,
    retry_count: u32,
    max_retries: u32,
    is_playing: bool,
    is_muted: bool,
    volume: f64,
    is_fullscreen: bool,
    last_error: Option<PlaybackError>,
    /// Recovered failures of the current connection cycle
    notices: Vec<PlaybackError>,
    next_retry_in: Option<Duration>,
    opened_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PlaybackSession {
    pub fn new(channel: Channel, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            channel,
            phase: SessionPhase::Idle,
            connection: ConnectionState::Connecting,
            resolved: None,
            format: None,
            candidates: Vec::new(),
            attempted: Vec::new(),
            selected_engine: None,
            retry_count: 0,
            max_retries,
            is_playing: false,
            is_muted: false,
            volume: 1.0,
            is_fullscreen: false,
            last_error: None,
            notices: Vec::new(),
            next_retry_in: None,
            opened_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn is_fullscreen(&self) -> bool {
        self.is_fullscreen
    }

    pub fn attempted(&self) -> &[EngineName] {
        &self.attempted
    }

    pub fn last_error(&self) -> Option<&PlaybackError> {
        self.last_error.as_ref()
    }

    /// Transport controls only act on a stream that reached `Playing`
    pub fn controls_enabled(&self) -> bool {
        self.phase == SessionPhase::Playing
    }

    /// Start of a connection cycle, on open and on every restart
    pub fn begin_resolving(&mut self) {
        self.phase = SessionPhase::Resolving;
        self.connection = ConnectionState::Resolving;
        self.resolved = None;
        self.format = None;
        self.candidates.clear();
        self.attempted.clear();
        self.selected_engine = None;
        self.is_playing = false;
        self.last_error = None;
        self.notices.clear();
        self.next_retry_in = None;
        self.touch();
    }

    pub fn resolved(&mut self, resolved: ResolvedUrl) {
        if let Some(failure) = &resolved.failure {
            self.notices.push(failure.clone());
        }
        self.resolved = Some(resolved);
        self.touch();
    }

    pub fn classified(&mut self, format: StreamFormat, candidates: Vec<EngineName>) {
        self.phase = SessionPhase::Classified;
        self.connection = ConnectionState::Connecting;
        self.format = Some(format);
        self.candidates = candidates;
        self.touch();
    }

    pub fn begin_loading(&mut self, engine: EngineName) {
        self.phase = SessionPhase::Loading { engine };
        self.connection = ConnectionState::Connecting;
        self.selected_engine = Some(engine);
        self.attempted.push(engine);
        self.touch();
    }

    /// A candidate failed to bind or become ready; it is no longer selected
    pub fn engine_failed(&mut self, engine: EngineName, error: &EngineError) {
        self.selected_engine = None;
        self.notices.push(PlaybackError::EngineLoadFailure {
            engine: engine.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        });
        self.touch();
    }

    pub fn engine_ready(&mut self) {
        self.phase = SessionPhase::Playing;
        self.connection = ConnectionState::Connected;
        self.touch();
    }

    /// Sink underrun; ignored outside `Playing`
    pub fn buffering(&mut self) {
        if self.phase == SessionPhase::Playing {
            self.connection = ConnectionState::Buffering;
            self.touch();
        }
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.is_playing = playing;
        if playing && self.phase == SessionPhase::Playing {
            self.connection = ConnectionState::Connected;
        }
        self.touch();
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool) {
        self.is_fullscreen = fullscreen;
        self.touch();
    }

    /// Clamp to `[0, 1]`; zero mutes, anything above unmutes
    pub fn set_volume(&mut self, volume: f64) {
        self.volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.is_muted = self.volume == 0.0;
        self.touch();
    }

    /// Flip mute; a silent stream cannot be unmuted
    pub fn toggle_mute(&mut self) {
        self.is_muted = !self.is_muted || self.volume == 0.0;
        self.touch();
    }

    /// Volume state reported back by the sink
    pub fn sync_volume(&mut self, volume: f64, muted: bool) {
        self.volume = volume.clamp(0.0, 1.0);
        self.is_muted = muted || self.volume == 0.0;
        self.touch();
    }

    /// Enter `Disconnected` with a terminal error and decide whether to restart
    pub fn disconnect(&mut self, error: PlaybackError, backoff: &BackoffPolicy) -> RetryDecision {
        self.phase = SessionPhase::Disconnected;
        self.connection = ConnectionState::Disconnected;
        self.selected_engine = None;
        self.is_playing = false;
        let retryable = error.is_retryable();
        self.last_error = Some(error);

        let decision = if !retryable {
            RetryDecision::NotRetryable
        } else if self.retry_count < self.max_retries {
            let delay = backoff.delay(self.retry_count);
            self.retry_count += 1;
            RetryDecision::Scheduled(delay)
        } else {
            RetryDecision::Exhausted
        };

        self.next_retry_in = match decision {
            RetryDecision::Scheduled(delay) => Some(delay),
            _ => None,
        };
        self.touch();
        decision
    }

    /// User-initiated retry restarts the retry budget
    pub fn manual_retry(&mut self) {
        self.retry_count = 0;
        self.next_retry_in = None;
        self.touch();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let disconnected = self.phase == SessionPhase::Disconnected;
        SessionSnapshot {
            session_id: self.id,
            channel_id: self.channel.id.clone(),
            channel_name: self.channel.name.clone(),
            source_url: self.channel.stream_url.clone(),
            resolved_url: self.resolved.as_ref().map(|r| r.url.clone()),
            resolution_strategy: self.resolved.as_ref().and_then(|r| r.strategy),
            format: self.format,
            phase: self.phase,
            connection_state: self.connection,
            candidates: self.candidates.clone(),
            attempted: self.attempted.clone(),
            selected_engine: self.selected_engine,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            is_playing: self.is_playing,
            is_muted: self.is_muted,
            volume: self.volume,
            is_fullscreen: self.is_fullscreen,
            controls_enabled: self.controls_enabled(),
            user_message: self
                .last_error
                .as_ref()
                .filter(|_| disconnected)
                .map(PlaybackError::user_message),
            last_error: self.last_error.clone(),
            can_retry: disconnected,
            notices: self.notices.clone(),
            next_retry_ms: self
                .next_retry_in
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            opened_at: self.opened_at,
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Diagnostics view of a session, published after every transition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub channel_id: String,
    pub channel_name: String,
    pub source_url: String,
    pub resolved_url: Option<String>,
    pub resolution_strategy: Option<&'static str>,
    pub format: Option<StreamFormat>,
    pub phase: SessionPhase,
    pub connection_state: ConnectionState,
    pub candidates: Vec<EngineName>,
    pub attempted: Vec<EngineName>,
    pub selected_engine: Option<EngineName>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub is_playing: bool,
    pub is_muted: bool,
    pub volume: f64,
    pub is_fullscreen: bool,
    pub controls_enabled: bool,
    pub last_error: Option<PlaybackError>,
    pub user_message: Option<String>,
    /// A manual retry action is offered
    pub can_retry: bool,
    pub notices: Vec<PlaybackError>,
    pub next_retry_ms: Option<u64>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn channel() -> Channel {
        Channel::new("1", "Al Jazeera", "https://live-hls.aljazeera.net/index.m3u8", "News")
    }

    fn backoff() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_secs(3),
            cap: Duration::from_secs(15),
            jitter_percent: 0,
        }
    }

    fn no_engine() -> PlaybackError {
        PlaybackError::NoEngineAvailable {
            attempted: vec!["hls".to_string()],
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = backoff();
        assert_eq!(policy.base_delay(0), Duration::from_secs(3));
        assert_eq!(policy.base_delay(1), Duration::from_secs(6));
        assert_eq!(policy.base_delay(2), Duration::from_secs(12));
        assert_eq!(policy.base_delay(3), Duration::from_secs(15));
        assert_eq!(policy.base_delay(64), Duration::from_secs(15));
    }

    #[test]
    fn test_backoff_jitter_stays_within_percentage() {
        let policy = BackoffPolicy {
            jitter_percent: 20,
            ..backoff()
        };
        for _ in 0..50 {
            let delay = policy.delay(0);
            assert!(delay >= Duration::from_secs(3));
            assert!(delay <= Duration::from_millis(3600));
        }
    }

    #[test]
    fn test_connection_cycle() {
        let mut session = PlaybackSession::new(channel(), 3);
        assert_eq!(session.phase(), SessionPhase::Idle);

        session.begin_resolving();
        assert_eq!(session.connection(), ConnectionState::Resolving);

        session.classified(StreamFormat::AdaptiveHls, vec![EngineName::Hls, EngineName::Native]);
        session.begin_loading(EngineName::Hls);
        assert!(!session.controls_enabled());

        session.engine_failed(EngineName::Hls, &EngineError::Network("503".into()));
        session.begin_loading(EngineName::Native);
        session.engine_ready();
        assert!(session.controls_enabled());
        assert_eq!(session.connection(), ConnectionState::Connected);

        session.buffering();
        assert_eq!(session.connection(), ConnectionState::Buffering);
        assert_eq!(session.phase(), SessionPhase::Playing);
        session.set_playing(true);
        assert_eq!(session.connection(), ConnectionState::Connected);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.attempted, vec![EngineName::Hls, EngineName::Native]);
        assert_eq!(snapshot.selected_engine, Some(EngineName::Native));
        assert_eq!(snapshot.notices.len(), 1);
        assert!(snapshot.user_message.is_none());
    }

    #[test]
    fn test_buffering_outside_playing_is_ignored() {
        let mut session = PlaybackSession::new(channel(), 3);
        session.begin_resolving();
        session.buffering();
        assert_eq!(session.connection(), ConnectionState::Resolving);
    }

    #[test]
    fn test_retry_budget_then_manual_retry() {
        let mut session = PlaybackSession::new(channel(), 2);
        let policy = backoff();

        assert_eq!(
            session.disconnect(no_engine(), &policy),
            RetryDecision::Scheduled(Duration::from_secs(3))
        );
        assert_eq!(
            session.disconnect(no_engine(), &policy),
            RetryDecision::Scheduled(Duration::from_secs(6))
        );
        assert_eq!(session.disconnect(no_engine(), &policy), RetryDecision::Exhausted);
        assert_eq!(session.retry_count(), 2);

        let snapshot = session.snapshot();
        assert!(snapshot.can_retry);
        assert_eq!(snapshot.next_retry_ms, None);
        assert_eq!(
            snapshot.user_message.as_deref(),
            Some("Failed to load video stream - Stream may be unavailable")
        );

        session.manual_retry();
        assert_eq!(session.retry_count(), 0);
        assert!(matches!(
            session.disconnect(no_engine(), &policy),
            RetryDecision::Scheduled(_)
        ));
    }

    #[test]
    fn test_format_unsupported_is_not_retried() {
        let mut session = PlaybackSession::new(channel(), 3);
        let decision = session.disconnect(
            PlaybackError::FormatUnsupported {
                format: "push-stream".into(),
            },
            &backoff(),
        );
        assert_eq!(decision, RetryDecision::NotRetryable);
        assert_eq!(session.retry_count(), 0);
        assert!(session.snapshot().can_retry);
    }

    #[test]
    fn test_new_cycle_clears_previous_failure() {
        let mut session = PlaybackSession::new(channel(), 3);
        session.disconnect(no_engine(), &backoff());
        session.begin_resolving();
        assert!(session.last_error().is_none());
        assert_eq!(session.retry_count(), 1);
        assert_eq!(session.snapshot().next_retry_ms, None);
    }

    #[test]
    fn test_toggle_mute() {
        let mut session = PlaybackSession::new(channel(), 3);
        session.toggle_mute();
        assert!(session.is_muted());
        session.toggle_mute();
        assert!(!session.is_muted());

        session.set_volume(0.0);
        session.toggle_mute();
        assert!(session.is_muted());
    }

    #[test]
    fn test_snapshot_serialization() {
        let mut session = PlaybackSession::new(channel(), 3);
        session.begin_resolving();
        session.classified(StreamFormat::AdaptiveHls, vec![EngineName::Hls]);
        session.begin_loading(EngineName::Hls);

        let json = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(json["phase"]["phase"], "loading");
        assert_eq!(json["phase"]["engine"], "hls");
        assert_eq!(json["connectionState"], "connecting");
        assert_eq!(json["format"], "adaptive-hls");
        assert_eq!(json["controlsEnabled"], false);
    }

    proptest! {
        #[test]
        fn prop_retry_count_never_exceeds_bound(max_retries in 0u32..6, failures in 0usize..20) {
            let mut session = PlaybackSession::new(channel(), max_retries);
            let policy = backoff();
            let mut scheduled = 0u32;
            for _ in 0..failures {
                if let RetryDecision::Scheduled(delay) = session.disconnect(no_engine(), &policy) {
                    prop_assert!(delay <= policy.cap);
                    scheduled += 1;
                }
                prop_assert!(session.retry_count() <= max_retries);
            }
            prop_assert_eq!(scheduled, max_retries.min(failures as u32));
        }

        #[test]
        fn prop_volume_mute_coupling(volume in 0.0f64..=1.0, start_muted in any::<bool>()) {
            let mut session = PlaybackSession::new(channel(), 3);
            if start_muted {
                session.toggle_mute();
            }
            session.set_volume(volume);
            prop_assert_eq!(session.is_muted(), volume == 0.0);
            prop_assert!((0.0..=1.0).contains(&session.volume()));

            session.set_volume(0.0);
            prop_assert!(session.is_muted());
        }

        #[test]
        fn prop_volume_is_clamped(volume in proptest::num::f64::ANY) {
            let mut session = PlaybackSession::new(channel(), 3);
            session.set_volume(volume);
            prop_assert!((0.0..=1.0).contains(&session.volume()));
        }
    }
}
