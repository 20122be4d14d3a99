//! Control surface
//!
//! Cloneable handle to the player task. Commands are queued; whether they
//! take effect depends on the session state when the player receives them
//! (transport controls are ignored until the stream is playing).

use tokio::sync::{mpsc, watch};

use super::player::PlayerCommand;
use super::state::SessionSnapshot;
use crate::errors::{AppError, AppResult};
use crate::models::Channel;

#[derive(Clone)]
pub struct ControlSurface {
    commands: mpsc::Sender<PlayerCommand>,
    snapshots: watch::Receiver<Option<SessionSnapshot>>,
}

impl ControlSurface {
    pub(crate) fn new(
        commands: mpsc::Sender<PlayerCommand>,
        snapshots: watch::Receiver<Option<SessionSnapshot>>,
    ) -> Self {
        Self {
            commands,
            snapshots,
        }
    }

    /// Open `channel`, replacing any open session
    pub async fn open_channel(&self, channel: Channel) -> AppResult<()> {
        self.send(PlayerCommand::Open(channel)).await
    }

    /// Close the overlay: release the engine and cancel pending timers
    pub async fn close(&self) -> AppResult<()> {
        self.send(PlayerCommand::Close).await
    }

    pub async fn toggle_play(&self) -> AppResult<()> {
        self.send(PlayerCommand::TogglePlay).await
    }

    pub async fn toggle_mute(&self) -> AppResult<()> {
        self.send(PlayerCommand::ToggleMute).await
    }

    /// Clamped to `[0, 1]`; zero mutes, anything above unmutes
    pub async fn set_volume(&self, volume: f64) -> AppResult<()> {
        self.send(PlayerCommand::SetVolume(volume)).await
    }

    pub async fn toggle_fullscreen(&self) -> AppResult<()> {
        self.send(PlayerCommand::ToggleFullscreen).await
    }

    /// Manual retry; resets the automatic retry budget
    pub async fn retry(&self) -> AppResult<()> {
        self.send(PlayerCommand::Retry).await
    }

    /// Close any session and stop the player task
    pub async fn shutdown(&self) -> AppResult<()> {
        self.send(PlayerCommand::Shutdown).await
    }

    /// Latest published snapshot, `None` while no overlay is open
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SessionSnapshot>> {
        self.snapshots.clone()
    }

    /// Wait for the first snapshot (current one included) matching `predicate`
    pub async fn wait_for<F>(&self, predicate: F) -> AppResult<Option<SessionSnapshot>>
    where
        F: FnMut(&Option<SessionSnapshot>) -> bool,
    {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(predicate)
            .await
            .map_err(|_| AppError::PlayerStopped)?
            .clone();
        Ok(snapshot)
    }

    async fn send(&self, command: PlayerCommand) -> AppResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AppError::PlayerStopped)
    }
}
