//! Media sink abstraction
//!
//! The sink is the rendering surface engines feed. At most one engine may be
//! bound to it at a time; binding while another engine holds it fails with
//! [`SinkError::AlreadyBound`].

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::engine::{EngineErrorKind, EngineName};

pub mod headless;

pub use headless::{BindingChange, HeadlessSink, HeadlessSinkOptions};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Sink already bound to {current}, cannot bind {requested}")]
    AlreadyBound {
        current: EngineName,
        requested: EngineName,
    },

    #[error("No source attached to the sink")]
    NoSource,

    #[error("Autoplay blocked by the runtime; a user action is required")]
    AutoplayBlocked,

    #[error("Fullscreen is not available")]
    FullscreenUnavailable,
}

/// Who asked for playback to start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOrigin {
    /// Unsolicited start after the stream became ready
    Autoplay,
    /// Explicit user action
    User,
}

/// Lifecycle and transport events emitted by a sink
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SinkEvent {
    /// Enough data to start playback (canplay)
    Ready,
    Playing,
    Paused,
    /// Buffer underrun
    Waiting,
    Error {
        kind: EngineErrorKind,
        message: String,
    },
    VolumeChanged {
        volume: f64,
        muted: bool,
    },
    /// Also emitted when fullscreen is left outside of the player's control
    FullscreenChanged {
        fullscreen: bool,
    },
}

/// Transport state of a sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkStatus {
    pub source: Option<String>,
    pub bound_engine: Option<EngineName>,
    pub playing: bool,
    pub volume: f64,
    pub muted: bool,
    pub fullscreen: bool,
    #[serde(with = "crate::config::duration_serde::duration")]
    pub current_time: Duration,
    /// Buffered ranges in seconds
    pub buffered: Vec<(f64, f64)>,
}

#[async_trait]
pub trait MediaSink: Send + Sync {
    /// Whether the sink decodes `mime` natively
    fn can_play_type(&self, mime: &str) -> bool;

    fn bind(&self, engine: EngineName) -> Result<(), SinkError>;

    /// Release the current binding and detach the source
    fn unbind(&self);

    fn set_source(&self, url: &str) -> Result<(), SinkError>;

    async fn play(&self, origin: PlayOrigin) -> Result<(), SinkError>;

    fn pause(&self);

    fn set_volume(&self, volume: f64);

    fn set_muted(&self, muted: bool);

    fn request_fullscreen(&self) -> Result<(), SinkError>;

    fn exit_fullscreen(&self);

    fn status(&self) -> SinkStatus;

    fn subscribe(&self) -> broadcast::Receiver<SinkEvent>;
}
