//! In-memory media sink
//!
//! Tracks transport state, enforces exclusive engine binding and emits the
//! same lifecycle events a real rendering surface would. Runtime-originated
//! events (underruns, decode errors, fullscreen left through an OS gesture)
//! are injected with [`HeadlessSink::emit`].

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::{MediaSink, PlayOrigin, SinkError, SinkEvent, SinkStatus};
use crate::config::SinkConfig;
use crate::engine::EngineName;
use crate::utils::url::UrlUtils;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct HeadlessSinkOptions {
    pub native_hls: bool,
    pub native_dash: bool,
    pub autoplay_allowed: bool,
    /// Emit `Ready` as soon as a source is attached
    pub auto_ready: bool,
    pub fullscreen_available: bool,
}

impl Default for HeadlessSinkOptions {
    fn default() -> Self {
        Self::from(&SinkConfig::default())
    }
}

impl From<&SinkConfig> for HeadlessSinkOptions {
    fn from(config: &SinkConfig) -> Self {
        Self {
            native_hls: config.native_hls,
            native_dash: config.native_dash,
            autoplay_allowed: config.autoplay_allowed,
            auto_ready: true,
            fullscreen_available: true,
        }
    }
}

/// Entry of the binding history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingChange {
    Bound(EngineName),
    Unbound(EngineName),
    Rejected(EngineName),
}

#[derive(Debug)]
struct SinkState {
    source: Option<String>,
    bound_engine: Option<EngineName>,
    playing: bool,
    volume: f64,
    muted: bool,
    fullscreen: bool,
    history: Vec<BindingChange>,
}

pub struct HeadlessSink {
    options: HeadlessSinkOptions,
    state: Mutex<SinkState>,
    events: broadcast::Sender<SinkEvent>,
}

impl HeadlessSink {
    pub fn new(options: HeadlessSinkOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            options,
            state: Mutex::new(SinkState {
                source: None,
                bound_engine: None,
                playing: false,
                volume: 1.0,
                muted: false,
                fullscreen: false,
                history: Vec::new(),
            }),
            events,
        }
    }

    /// Inject a runtime event, applying its effect on the transport state
    pub fn emit(&self, event: SinkEvent) {
        {
            let mut state = self.lock();
            match &event {
                SinkEvent::Playing => state.playing = true,
                SinkEvent::Paused => state.playing = false,
                SinkEvent::FullscreenChanged { fullscreen } => state.fullscreen = *fullscreen,
                SinkEvent::VolumeChanged { volume, muted } => {
                    state.volume = *volume;
                    state.muted = *muted;
                }
                SinkEvent::Error { .. } => state.playing = false,
                SinkEvent::Ready | SinkEvent::Waiting => {}
            }
        }
        self.send(event);
    }

    /// Every bind, unbind and rejected bind in order
    pub fn binding_history(&self) -> Vec<BindingChange> {
        self.lock().history.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, event: SinkEvent) {
        trace!(?event, "sink event");
        // No subscribers is fine; nobody is watching the sink yet.
        let _ = self.events.send(event);
    }
}

impl Default for HeadlessSink {
    fn default() -> Self {
        Self::new(HeadlessSinkOptions::default())
    }
}

#[async_trait]
impl MediaSink for HeadlessSink {
    fn can_play_type(&self, mime: &str) -> bool {
        match mime.to_ascii_lowercase().as_str() {
            "application/vnd.apple.mpegurl" | "application/x-mpegurl" | "audio/mpegurl" => {
                self.options.native_hls
            }
            "application/dash+xml" => self.options.native_dash,
            "video/mp4" | "video/webm" | "audio/mp4" | "audio/mpeg" => true,
            _ => false,
        }
    }

    fn bind(&self, engine: EngineName) -> Result<(), SinkError> {
        let mut state = self.lock();
        if let Some(current) = state.bound_engine {
            state.history.push(BindingChange::Rejected(engine));
            return Err(SinkError::AlreadyBound {
                current,
                requested: engine,
            });
        }
        state.bound_engine = Some(engine);
        state.history.push(BindingChange::Bound(engine));
        debug!(%engine, "engine bound to sink");
        Ok(())
    }

    fn unbind(&self) {
        let was_playing = {
            let mut state = self.lock();
            let Some(engine) = state.bound_engine.take() else {
                return;
            };
            state.history.push(BindingChange::Unbound(engine));
            state.source = None;
            debug!(%engine, "engine unbound from sink");
            std::mem::replace(&mut state.playing, false)
        };
        if was_playing {
            self.send(SinkEvent::Paused);
        }
    }

    fn set_source(&self, url: &str) -> Result<(), SinkError> {
        self.lock().source = Some(url.to_string());
        debug!(url = %UrlUtils::obfuscate_credentials(url), "sink source attached");
        if self.options.auto_ready {
            self.send(SinkEvent::Ready);
        }
        Ok(())
    }

    async fn play(&self, origin: PlayOrigin) -> Result<(), SinkError> {
        {
            let mut state = self.lock();
            if state.source.is_none() {
                return Err(SinkError::NoSource);
            }
            if origin == PlayOrigin::Autoplay && !self.options.autoplay_allowed {
                return Err(SinkError::AutoplayBlocked);
            }
            if state.playing {
                return Ok(());
            }
            state.playing = true;
        }
        self.send(SinkEvent::Playing);
        Ok(())
    }

    fn pause(&self) {
        let was_playing = std::mem::replace(&mut self.lock().playing, false);
        if was_playing {
            self.send(SinkEvent::Paused);
        }
    }

    fn set_volume(&self, volume: f64) {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let (changed, muted) = {
            let mut state = self.lock();
            let changed = state.volume != volume;
            state.volume = volume;
            (changed, state.muted)
        };
        if changed {
            self.send(SinkEvent::VolumeChanged { volume, muted });
        }
    }

    fn set_muted(&self, muted: bool) {
        let (changed, volume) = {
            let mut state = self.lock();
            let changed = state.muted != muted;
            state.muted = muted;
            (changed, state.volume)
        };
        if changed {
            self.send(SinkEvent::VolumeChanged { volume, muted });
        }
    }

    fn request_fullscreen(&self) -> Result<(), SinkError> {
        if !self.options.fullscreen_available {
            return Err(SinkError::FullscreenUnavailable);
        }
        let changed = !std::mem::replace(&mut self.lock().fullscreen, true);
        if changed {
            self.send(SinkEvent::FullscreenChanged { fullscreen: true });
        }
        Ok(())
    }

    fn exit_fullscreen(&self) {
        let changed = std::mem::replace(&mut self.lock().fullscreen, false);
        if changed {
            self.send(SinkEvent::FullscreenChanged { fullscreen: false });
        }
    }

    fn status(&self) -> SinkStatus {
        let state = self.lock();
        SinkStatus {
            source: state.source.clone(),
            bound_engine: state.bound_engine,
            playing: state.playing,
            volume: state.volume,
            muted: state.muted,
            fullscreen: state.fullscreen,
            current_time: Duration::ZERO,
            buffered: Vec::new(),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
        self.events.subscribe()
    }
}
