//! Playback sessions
//!
//! One session per channel open in the overlay. [`state`] holds the session
//! data and its transitions, [`player`] the task driving them, and
//! [`controls`] the handle callers use to talk to that task.

pub mod controls;
pub mod player;
pub mod state;

pub use controls::ControlSurface;
pub use player::{Player, PlayerCommand};
pub use state::{
    BackoffPolicy, ConnectionState, PlaybackSession, RetryDecision, SessionPhase, SessionSnapshot,
};
