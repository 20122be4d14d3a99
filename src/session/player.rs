//! Player task
//!
//! A single tokio task owns the current [`PlaybackSession`], the bound
//! engine and the media sink subscription. Everything that can change the
//! session (commands, engine events, sink events, timers) is funneled
//! through this task, so the session has exactly one writer.
//!
//! Every await of the connection cycle is raced against the command
//! channel. `Open`, `Close` and `Shutdown` win immediately: the pending
//! future (resolution, engine load, load timeout, backoff sleep) is dropped
//! and the engine torn down, so no timer of a closed session can fire.
//! Engine events carry the epoch they were issued under; anything from an
//! older epoch is discarded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::controls::ControlSurface;
use super::state::{BackoffPolicy, PlaybackSession, RetryDecision, SessionSnapshot};
use crate::config::PlaybackConfig;
use crate::engine::{
    select_order, CapabilityRegistry, Engine, EngineError, EngineErrorKind, EngineEventSender,
    EngineName, TaggedEngineEvent,
};
use crate::errors::PlaybackError;
use crate::models::Channel;
use crate::sink::{MediaSink, PlayOrigin, SinkError, SinkEvent};
use crate::streaming::classification::classify;
use crate::streaming::metrics::metrics;
use crate::streaming::resolver::UrlResolver;
use crate::streaming::KeyValue;

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub enum PlayerCommand {
    Open(Channel),
    Close,
    TogglePlay,
    ToggleMute,
    SetVolume(f64),
    ToggleFullscreen,
    Retry,
    Shutdown,
}

/// Why a session ended
#[derive(Debug)]
enum SessionExit {
    Close,
    Open(Channel),
    Shutdown,
}

/// How a connection cycle ended
enum Flow {
    Exit(SessionExit),
    Failed(PlaybackError),
}

impl From<SessionExit> for Flow {
    fn from(exit: SessionExit) -> Self {
        Self::Exit(exit)
    }
}

enum RetryWait {
    Elapsed,
    Manual,
    Exit(SessionExit),
}

enum Wake {
    Command(Option<PlayerCommand>),
    Engine(TaggedEngineEvent),
    Sink(Result<SinkEvent, RecvError>),
}

pub struct Player {
    config: PlaybackConfig,
    backoff: BackoffPolicy,
    registry: Arc<CapabilityRegistry>,
    resolver: Arc<UrlResolver>,
    sink: Arc<dyn MediaSink>,
    commands: mpsc::Receiver<PlayerCommand>,
    snapshots: watch::Sender<Option<SessionSnapshot>>,
    engine_tx: mpsc::UnboundedSender<TaggedEngineEvent>,
    engine_rx: mpsc::UnboundedReceiver<TaggedEngineEvent>,
    epoch: u64,
}

impl Player {
    /// Start the player task. It runs until `shutdown` or until every
    /// [`ControlSurface`] clone was dropped.
    pub fn spawn(
        config: PlaybackConfig,
        registry: Arc<CapabilityRegistry>,
        resolver: Arc<UrlResolver>,
        sink: Arc<dyn MediaSink>,
    ) -> (ControlSurface, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();

        let player = Self {
            backoff: BackoffPolicy::from_config(&config),
            config,
            registry,
            resolver,
            sink,
            commands: command_rx,
            snapshots: snapshot_tx,
            engine_tx,
            engine_rx,
            epoch: 0,
        };
        let handle = tokio::spawn(player.run());

        (ControlSurface::new(command_tx, snapshot_rx), handle)
    }

    async fn run(mut self) {
        info!(target: "player.session", "player started");
        let mut pending: Option<Channel> = None;

        loop {
            let channel = match pending.take() {
                Some(channel) => channel,
                None => match self.commands.recv().await {
                    Some(PlayerCommand::Open(channel)) => channel,
                    Some(PlayerCommand::Shutdown) | None => break,
                    Some(command) => {
                        debug!(target: "player.session", ?command, "no open session, command ignored");
                        continue;
                    }
                },
            };

            match self.run_session(channel).await {
                SessionExit::Open(next) => pending = Some(next),
                SessionExit::Close => {}
                SessionExit::Shutdown => break,
            }
        }

        self.snapshots.send_replace(None);
        info!(target: "player.session", "player stopped");
    }

    async fn run_session(&mut self, channel: Channel) -> SessionExit {
        let mut session = PlaybackSession::new(channel, self.config.max_retries);
        info!(
            target: "player.session",
            session_id = %session.id(),
            channel_id = %session.channel().id,
            channel = %session.channel().name,
            "opening channel"
        );

        let mut engine: Option<Box<dyn Engine>> = None;
        let exit = self.drive(&mut session, &mut engine).await;
        self.teardown(&session, &mut engine).await;

        info!(
            target: "player.session",
            session_id = %session.id(),
            reason = exit_reason(&exit),
            "session closed"
        );
        exit
    }

    /// Connection cycles until the session is closed or replaced
    async fn drive(
        &mut self,
        session: &mut PlaybackSession,
        engine: &mut Option<Box<dyn Engine>>,
    ) -> SessionExit {
        loop {
            let flow = match self.connect(session, engine).await {
                Ok(sink_events) => self.supervise(session, engine, sink_events).await,
                Err(flow) => flow,
            };

            let error = match flow {
                Flow::Exit(exit) => return exit,
                Flow::Failed(error) => error,
            };

            self.release_engine(engine).await;
            warn!(
                target: "player.session",
                session_id = %session.id(),
                error = %error,
                retry_count = session.retry_count(),
                "session disconnected"
            );
            let decision = session.disconnect(error, &self.backoff);
            self.publish(session);

            let delay = match decision {
                RetryDecision::Scheduled(delay) => {
                    info!(
                        target: "player.session",
                        session_id = %session.id(),
                        attempt = session.retry_count(),
                        delay = %humantime::format_duration(delay),
                        "scheduling automatic restart"
                    );
                    Some(delay)
                }
                RetryDecision::Exhausted => {
                    warn!(target: "player.session", session_id = %session.id(), "retry budget exhausted, waiting for manual retry");
                    None
                }
                RetryDecision::NotRetryable => {
                    info!(target: "player.session", session_id = %session.id(), "error is not retryable, waiting for manual retry");
                    None
                }
            };

            match self.wait_for_retry(delay).await {
                RetryWait::Elapsed => {
                    metrics()
                        .session_retries_total
                        .add(1, &[KeyValue::new("trigger", "automatic")]);
                }
                RetryWait::Manual => {
                    info!(target: "player.session", session_id = %session.id(), "manual retry");
                    metrics()
                        .session_retries_total
                        .add(1, &[KeyValue::new("trigger", "manual")]);
                    session.manual_retry();
                }
                RetryWait::Exit(exit) => return exit,
            }
        }
    }

    /// Resolve, classify and walk the engine candidates until one is ready.
    /// Returns the sink subscription taken right after the engine became ready.
    async fn connect(
        &mut self,
        session: &mut PlaybackSession,
        engine: &mut Option<Box<dyn Engine>>,
    ) -> Result<broadcast::Receiver<SinkEvent>, Flow> {
        session.begin_resolving();
        self.publish(session);

        let source = session.channel().stream_url.clone();
        let resolved = race(
            &mut self.commands,
            self.resolver.resolve(&source, classify(&source)),
        )
        .await?;
        let url = resolved.url.clone();
        session.resolved(resolved);

        let format = classify(&url);
        metrics()
            .classification_total
            .add(1, &[KeyValue::new("format", format.to_string())]);
        let candidates = select_order(format, &self.registry.available_for(format));
        debug!(
            target: "player.session",
            session_id = %session.id(),
            %format,
            ?candidates,
            "stream classified"
        );
        session.classified(format, candidates.clone());
        self.publish(session);

        if candidates.is_empty() {
            return Err(Flow::Failed(PlaybackError::FormatUnsupported {
                format: format.to_string(),
            }));
        }

        for name in candidates {
            session.begin_loading(name);
            self.publish(session);

            let error = match self.attempt(name, &url).await? {
                Ok(ready) => {
                    *engine = Some(ready);
                    let sink_events = self.sink.subscribe();
                    self.on_ready(session, name).await;
                    return Ok(sink_events);
                }
                Err(error) => error,
            };

            warn!(
                target: "player.session",
                session_id = %session.id(),
                engine = %name,
                error = %error,
                "engine failed to load, trying next candidate"
            );
            metrics().engine_failures_total.add(
                1,
                &[
                    KeyValue::new("engine", name.to_string()),
                    KeyValue::new("kind", error.kind().to_string()),
                ],
            );
            session.engine_failed(name, &error);
            self.publish(session);
        }

        Err(Flow::Failed(PlaybackError::NoEngineAvailable {
            attempted: session.attempted().iter().map(|e| e.to_string()).collect(),
        }))
    }

    /// One bounded load attempt. A failed engine is destroyed before returning.
    async fn attempt(
        &mut self,
        name: EngineName,
        url: &str,
    ) -> Result<Result<Box<dyn Engine>, EngineError>, Flow> {
        let Some(mut candidate) = self.registry.create(name) else {
            return Ok(Err(EngineError::Unavailable {
                engine: name,
                reason: "no provider registered".to_string(),
            }));
        };

        self.epoch += 1;
        let events = EngineEventSender::new(self.epoch, name, self.engine_tx.clone());
        let timeout = self.config.load_timeout(name.is_adaptive());
        metrics()
            .engine_attempts_total
            .add(1, &[KeyValue::new("engine", name.to_string())]);

        let outcome = race(
            &mut self.commands,
            tokio::time::timeout(timeout, candidate.load(url, self.sink.clone(), events)),
        )
        .await;

        let error = match outcome {
            Ok(Ok(Ok(()))) => return Ok(Ok(candidate)),
            Ok(Ok(Err(error))) => error,
            Ok(Err(_elapsed)) => EngineError::Timeout(timeout),
            Err(exit) => {
                candidate.destroy().await;
                self.epoch += 1;
                return Err(exit.into());
            }
        };

        candidate.destroy().await;
        self.epoch += 1;
        Ok(Err(error))
    }

    async fn on_ready(&mut self, session: &mut PlaybackSession, engine: EngineName) {
        session.engine_ready();
        info!(
            target: "player.session",
            session_id = %session.id(),
            %engine,
            "stream ready"
        );

        self.sink.set_volume(session.volume());
        self.sink.set_muted(session.is_muted());

        if self.config.autoplay {
            match self.sink.play(PlayOrigin::Autoplay).await {
                Ok(()) => session.set_playing(true),
                Err(SinkError::AutoplayBlocked) => {
                    info!(target: "player.session", session_id = %session.id(), "autoplay blocked, waiting for user action");
                }
                Err(e) => {
                    warn!(target: "player.session", session_id = %session.id(), error = %e, "autoplay failed");
                }
            }
        }
        self.publish(session);
    }

    /// Watch a playing stream until it fails or the session ends
    async fn supervise(
        &mut self,
        session: &mut PlaybackSession,
        engine: &mut Option<Box<dyn Engine>>,
        mut sink_events: broadcast::Receiver<SinkEvent>,
    ) -> Flow {
        loop {
            let wake = tokio::select! {
                biased;
                command = self.commands.recv() => Wake::Command(command),
                Some(tagged) = self.engine_rx.recv() => Wake::Engine(tagged),
                event = sink_events.recv() => Wake::Sink(event),
            };

            match wake {
                Wake::Command(None) | Wake::Command(Some(PlayerCommand::Shutdown)) => {
                    return SessionExit::Shutdown.into()
                }
                Wake::Command(Some(PlayerCommand::Close)) => return SessionExit::Close.into(),
                Wake::Command(Some(PlayerCommand::Open(next))) => {
                    return SessionExit::Open(next).into()
                }
                Wake::Command(Some(command)) => self.apply_control(session, command).await,
                Wake::Engine(tagged) => {
                    if tagged.epoch != self.epoch {
                        debug!(
                            target: "player.session",
                            epoch = tagged.epoch,
                            current = self.epoch,
                            engine = %tagged.engine,
                            "discarding event from released engine"
                        );
                        continue;
                    }
                    let event = tagged.event;
                    if event.fatal {
                        return Flow::Failed(PlaybackError::PlaybackRuntimeError {
                            kind: event.kind,
                            message: event.details,
                        });
                    }
                    let recovered = match engine.as_mut() {
                        Some(engine) => engine.recover(event.kind).await,
                        None => false,
                    };
                    if !recovered {
                        return Flow::Failed(PlaybackError::PlaybackRuntimeError {
                            kind: event.kind,
                            message: event.details,
                        });
                    }
                    info!(
                        target: "player.session",
                        session_id = %session.id(),
                        kind = %event.kind,
                        details = %event.details,
                        "engine recovered from non-fatal error"
                    );
                    continue;
                }
                Wake::Sink(Ok(event)) => match event {
                    SinkEvent::Waiting => session.buffering(),
                    SinkEvent::Playing => session.set_playing(true),
                    SinkEvent::Paused => session.set_playing(false),
                    SinkEvent::FullscreenChanged { fullscreen } => {
                        session.set_fullscreen(fullscreen)
                    }
                    // A volume and a mute change issued together echo one event
                    // each; the first carries a half-applied state, so sync from
                    // the sink's current transport state instead.
                    SinkEvent::VolumeChanged { .. } => {
                        let status = self.sink.status();
                        if status.volume == session.volume() && status.muted == session.is_muted() {
                            continue;
                        }
                        session.sync_volume(status.volume, status.muted)
                    }
                    SinkEvent::Error { kind, message } => {
                        return Flow::Failed(PlaybackError::PlaybackRuntimeError { kind, message })
                    }
                    SinkEvent::Ready => continue,
                },
                Wake::Sink(Err(RecvError::Lagged(skipped))) => {
                    warn!(target: "player.session", skipped, "sink events lagged");
                    continue;
                }
                Wake::Sink(Err(RecvError::Closed)) => {
                    return Flow::Failed(PlaybackError::PlaybackRuntimeError {
                        kind: EngineErrorKind::Other,
                        message: "media sink went away".to_string(),
                    })
                }
            }
            self.publish(session);
        }
    }

    async fn apply_control(&mut self, session: &mut PlaybackSession, command: PlayerCommand) {
        if !session.controls_enabled() {
            debug!(target: "player.session", ?command, "controls disabled, command ignored");
            return;
        }

        match command {
            PlayerCommand::TogglePlay => {
                if session.is_playing() {
                    self.sink.pause();
                    session.set_playing(false);
                } else {
                    match self.sink.play(PlayOrigin::User).await {
                        Ok(()) => session.set_playing(true),
                        Err(e) => warn!(target: "player.session", error = %e, "play request failed"),
                    }
                }
            }
            PlayerCommand::ToggleMute => {
                session.toggle_mute();
                self.sink.set_muted(session.is_muted());
            }
            PlayerCommand::SetVolume(volume) => {
                session.set_volume(volume);
                self.sink.set_volume(session.volume());
                self.sink.set_muted(session.is_muted());
            }
            // Session state follows the sink's FullscreenChanged event, which
            // also covers fullscreen left outside of the player.
            PlayerCommand::ToggleFullscreen => {
                if session.is_fullscreen() {
                    self.sink.exit_fullscreen();
                } else if let Err(e) = self.sink.request_fullscreen() {
                    warn!(target: "player.session", error = %e, "fullscreen request failed");
                }
            }
            PlayerCommand::Retry => {
                debug!(target: "player.session", "stream is playing, retry ignored");
            }
            PlayerCommand::Open(_) | PlayerCommand::Close | PlayerCommand::Shutdown => {}
        }
    }

    /// Backoff sleep (or an indefinite wait when `delay` is `None`) raced
    /// against commands
    async fn wait_for_retry(&mut self, delay: Option<Duration>) -> RetryWait {
        let timer = async {
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    None | Some(PlayerCommand::Shutdown) => return RetryWait::Exit(SessionExit::Shutdown),
                    Some(PlayerCommand::Close) => return RetryWait::Exit(SessionExit::Close),
                    Some(PlayerCommand::Open(next)) => return RetryWait::Exit(SessionExit::Open(next)),
                    Some(PlayerCommand::Retry) => return RetryWait::Manual,
                    Some(command) => {
                        debug!(target: "player.session", ?command, "disconnected, command ignored");
                    }
                },
                _ = &mut timer => return RetryWait::Elapsed,
            }
        }
    }

    async fn release_engine(&mut self, engine: &mut Option<Box<dyn Engine>>) {
        if let Some(mut engine) = engine.take() {
            debug!(target: "player.session", engine = %engine.name(), "releasing engine");
            engine.destroy().await;
        }
        self.epoch += 1;
    }

    async fn teardown(&mut self, session: &PlaybackSession, engine: &mut Option<Box<dyn Engine>>) {
        self.release_engine(engine).await;
        if session.is_fullscreen() || self.sink.status().fullscreen {
            self.sink.exit_fullscreen();
        }
        self.snapshots.send_replace(None);
    }

    fn publish(&self, session: &PlaybackSession) {
        self.snapshots.send_replace(Some(session.snapshot()));
    }
}

/// Run `future` unless a session-ending command arrives first. Other
/// commands are dropped: controls are disabled while connecting.
async fn race<F: Future>(
    commands: &mut mpsc::Receiver<PlayerCommand>,
    future: F,
) -> Result<F::Output, SessionExit> {
    tokio::pin!(future);
    loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                None | Some(PlayerCommand::Shutdown) => return Err(SessionExit::Shutdown),
                Some(PlayerCommand::Close) => return Err(SessionExit::Close),
                Some(PlayerCommand::Open(next)) => return Err(SessionExit::Open(next)),
                Some(command) => {
                    debug!(target: "player.session", ?command, "connecting, command ignored");
                }
            },
            output = &mut future => return Ok(output),
        }
    }
}

fn exit_reason(exit: &SessionExit) -> &'static str {
    match exit {
        SessionExit::Close => "closed",
        SessionExit::Open(_) => "replaced",
        SessionExit::Shutdown => "shutdown",
    }
}
