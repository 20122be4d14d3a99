//! Error type definitions for the IPTV player
//!
//! `PlaybackError` mirrors the failure classes a playback session can run
//! into, from best-effort URL resolution up to fatal runtime errors after
//! the stream started.

use serde::Serialize;
use thiserror::Error;

use crate::engine::EngineErrorKind;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Catalog loading or lookup errors
    #[error("Catalog error: {message}")]
    Catalog { message: String },

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Playback session errors surfaced outside the player task
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    /// The player task is gone and can no longer accept commands
    #[error("Player task stopped")]
    PlayerStopped,

    /// I/O errors (catalog files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors (catalog files)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client construction errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure taxonomy of a playback session.
///
/// Only `NoEngineAvailable`, `PlaybackRuntimeError` and `FormatUnsupported`
/// ever become the terminal error of a session; the other two variants are
/// recorded for diagnostics and recovered locally.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackError {
    /// Every resolution strategy failed; playback continues with the original URL.
    #[error("Resolution failed for {url}: {message}")]
    ResolutionFailure { url: String, message: String },

    /// A single engine candidate could not bind or become ready in time.
    #[error("Engine {engine} failed to load ({kind}): {message}")]
    EngineLoadFailure {
        engine: String,
        kind: EngineErrorKind,
        message: String,
    },

    /// All engine candidates were attempted and none reached the ready state.
    #[error("No playback engine could start the stream (tried: {})", attempted.join(", "))]
    NoEngineAvailable { attempted: Vec<String> },

    /// Fatal error reported after the session reached `Playing`.
    #[error("Playback error ({kind}): {message}")]
    PlaybackRuntimeError {
        kind: EngineErrorKind,
        message: String,
    },

    /// The classified format has no candidate engine in this runtime.
    #[error("Format unsupported: {format}")]
    FormatUnsupported { format: String },
}

impl PlaybackError {
    /// Whether the session may schedule an automatic backoff restart.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoEngineAvailable { .. } | Self::PlaybackRuntimeError { .. }
        )
    }

    /// Human-readable message presented next to the manual retry action.
    pub fn user_message(&self) -> String {
        match self {
            Self::ResolutionFailure { .. } => {
                "Could not resolve the stream address - trying it as-is".to_string()
            }
            Self::EngineLoadFailure { engine, .. } => {
                format!("The {engine} player could not open the stream")
            }
            Self::NoEngineAvailable { .. } => {
                "Failed to load video stream - Stream may be unavailable".to_string()
            }
            Self::PlaybackRuntimeError { kind, message } => match kind {
                EngineErrorKind::Network => {
                    "Network error - Stream may be blocked or unavailable".to_string()
                }
                EngineErrorKind::MediaDecode => {
                    "Media error - Invalid stream format or codec not supported".to_string()
                }
                EngineErrorKind::UnsupportedFormat => {
                    "Stream format error - Unable to parse media".to_string()
                }
                EngineErrorKind::Other => format!("Stream error: {message}"),
            },
            Self::FormatUnsupported { format } => {
                format!("This stream format ({format}) cannot be played here")
            }
        }
    }
}

impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a catalog error
    pub fn catalog<S: Into<String>>(message: S) -> Self {
        Self::Catalog {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_no_engine_and_runtime_errors_are_retryable() {
        let no_engine = PlaybackError::NoEngineAvailable {
            attempted: vec!["hls".into(), "native".into()],
        };
        let runtime = PlaybackError::PlaybackRuntimeError {
            kind: EngineErrorKind::Network,
            message: "segment 404".into(),
        };
        let unsupported = PlaybackError::FormatUnsupported {
            format: "push-stream".into(),
        };

        assert!(no_engine.is_retryable());
        assert!(runtime.is_retryable());
        assert!(!unsupported.is_retryable());
    }

    #[test]
    fn no_engine_message_lists_attempts() {
        let err = PlaybackError::NoEngineAvailable {
            attempted: vec!["hls".into(), "native".into()],
        };
        assert_eq!(
            err.to_string(),
            "No playback engine could start the stream (tried: hls, native)"
        );
    }

    #[test]
    fn runtime_error_serializes_with_type_tag() {
        let err = PlaybackError::PlaybackRuntimeError {
            kind: EngineErrorKind::MediaDecode,
            message: "bad frame".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "playback_runtime_error");
        assert_eq!(json["kind"], "media-decode");
    }
}
