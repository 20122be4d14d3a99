//! Playback engines
//!
//! An engine takes a media URL, does whatever work it needs to reach a
//! playable state (manifest fetch and parse, stream probing) and feeds the
//! media sink. Engines are created per attempt by an [`EngineProvider`];
//! providers are probed once at start-up into a [`CapabilityRegistry`].
//!
//! Engine errors raised after `load` returned are reported on an
//! [`EngineEventSender`], tagged with the epoch the engine was created in so
//! the session can drop events from engines it already released.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::sink::{MediaSink, SinkError};
use crate::streaming::classification::StreamFormat;
use crate::utils::http_client::FetchError;

pub mod dash;
pub mod hls;
pub mod native;
pub mod registry;
pub mod selector;

pub use dash::{DashEngine, DashEngineProvider};
pub use hls::{HlsEngine, HlsEngineProvider};
pub use native::{NativeEngine, NativeEngineProvider};
pub use registry::CapabilityRegistry;
pub use selector::select_order;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, AsRefStr, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EngineName {
    /// Dedicated adaptive HLS engine
    Hls,
    /// Dedicated DASH engine
    Dash,
    /// The sink's own decoding
    Native,
}

impl EngineName {
    pub fn is_adaptive(&self) -> bool {
        matches!(self, Self::Hls | Self::Dash)
    }
}

/// Coarse error class reported by engines and the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum EngineErrorKind {
    Network,
    MediaDecode,
    UnsupportedFormat,
    Other,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Engine {engine} unavailable: {reason}")]
    Unavailable { engine: EngineName, reason: String },

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("No ready signal within {}", humantime::format_duration(*.0))]
    Timeout(Duration),
}

impl EngineError {
    pub fn kind(&self) -> EngineErrorKind {
        match self {
            Self::Network(_) | Self::Timeout(_) => EngineErrorKind::Network,
            Self::Manifest(_) | Self::UnsupportedFormat(_) => EngineErrorKind::UnsupportedFormat,
            Self::Media(_) => EngineErrorKind::MediaDecode,
            Self::Unavailable { .. } | Self::Sink(_) => EngineErrorKind::Other,
        }
    }
}

impl From<FetchError> for EngineError {
    fn from(e: FetchError) -> Self {
        Self::Network(e.to_string())
    }
}

/// Error raised by a bound engine after it became ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    pub kind: EngineErrorKind,
    /// Non-fatal errors get an in-engine recovery; fatal ones end the attempt
    pub fatal: bool,
    pub details: String,
}

impl EngineEvent {
    pub fn fatal<S: Into<String>>(kind: EngineErrorKind, details: S) -> Self {
        Self {
            kind,
            fatal: true,
            details: details.into(),
        }
    }

    pub fn non_fatal<S: Into<String>>(kind: EngineErrorKind, details: S) -> Self {
        Self {
            kind,
            fatal: false,
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEngineEvent {
    pub epoch: u64,
    pub engine: EngineName,
    pub event: EngineEvent,
}

/// Event channel handed to an engine on load
#[derive(Debug, Clone)]
pub struct EngineEventSender {
    epoch: u64,
    engine: EngineName,
    tx: mpsc::UnboundedSender<TaggedEngineEvent>,
}

impl EngineEventSender {
    pub fn new(epoch: u64, engine: EngineName, tx: mpsc::UnboundedSender<TaggedEngineEvent>) -> Self {
        Self { epoch, engine, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns false once the session stopped listening
    pub fn send(&self, event: EngineEvent) -> bool {
        self.tx
            .send(TaggedEngineEvent {
                epoch: self.epoch,
                engine: self.engine,
                event,
            })
            .is_ok()
    }
}

/// What an engine can play in this runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineSupport {
    pub hls: bool,
    pub dash: bool,
    pub progressive: bool,
}

impl EngineSupport {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn any(&self) -> bool {
        self.hls || self.dash || self.progressive
    }

    /// Unresolved indirect URLs are attempted as HLS, script endpoints and
    /// unknown URLs as progressive; push streams are never supported.
    pub fn supports(&self, format: StreamFormat) -> bool {
        match format {
            StreamFormat::AdaptiveHls | StreamFormat::Indirect => self.hls,
            StreamFormat::AdaptiveDash => self.dash,
            StreamFormat::Progressive(_) | StreamFormat::Unknown | StreamFormat::ScriptEndpoint => {
                self.progressive
            }
            StreamFormat::PushStream => false,
        }
    }
}

#[async_trait]
pub trait Engine: Send + Sync {
    fn name(&self) -> EngineName;

    /// Bind to `sink` and resolve once the stream is ready to play
    async fn load(
        &mut self,
        url: &str,
        sink: Arc<dyn MediaSink>,
        events: EngineEventSender,
    ) -> Result<(), EngineError>;

    /// In-engine recovery after a non-fatal error; false when exhausted
    async fn recover(&mut self, kind: EngineErrorKind) -> bool;

    /// Release every resource and the sink binding. Idempotent.
    async fn destroy(&mut self);
}

/// Capability probe and factory for one engine
#[async_trait]
pub trait EngineProvider: Send + Sync {
    fn name(&self) -> EngineName;

    async fn probe(&self, sink: &dyn MediaSink) -> Result<EngineSupport, EngineError>;

    fn create(&self) -> Box<dyn Engine>;
}
