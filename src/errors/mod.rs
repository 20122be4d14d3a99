//! Centralized error handling for the IPTV player
//!
//! Each layer owns a small `thiserror` enum close to the code that raises it
//! (`FetchError` in `utils::http_client`, `ResolveError` in the resolver,
//! `EngineError` in `engine`, `SinkError` in `sink`). This module holds the
//! two types that cross layers:
//!
//! - **`PlaybackError`**: the user-visible failure taxonomy of a playback
//!   session. Every failure either advances the engine candidate list,
//!   schedules a backoff retry, or is rendered as a terminal message.
//! - **`AppError`**: top-level error for the library surface and CLI.
//!
//! # Usage
//!
//! ```rust
//! use iptv_player::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<String> {
//!     Ok("success".to_string())
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;
