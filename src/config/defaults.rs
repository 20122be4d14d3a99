/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
use std::time::Duration;

// Playback session defaults
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(3);
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(15);
pub const DEFAULT_BACKOFF_JITTER_PERCENT: u8 = 0;
pub const DEFAULT_ADAPTIVE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_NATIVE_LOAD_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_AUTOPLAY: bool = true;

// Upper bound accepted by `Config::validate`.
pub const MAX_ALLOWED_RETRIES: u32 = 10;

// Resolver defaults
pub const DEFAULT_RESOLVER_REQUEST_TIMEOUT: Duration = Duration::from_secs(8);
pub const DEFAULT_RESOLVER_TOTAL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_BODY_BYTES: usize = 256 * 1024;
pub const DEFAULT_RELAYS: &[&str] = &[
    "https://api.allorigins.win/raw?url={url}",
    "https://corsproxy.io/?url={url}",
    "https://api.codetabs.com/v1/proxy?quest={url}",
];
pub const DEFAULT_OUTPUT_PARAM: &str = "output";
pub const DEFAULT_OUTPUT_CANDIDATES: &[&str] = &["64", "16", "7"];
pub const DEFAULT_DOCUMENT_SCAN: bool = true;

// Engine defaults
pub const DEFAULT_MAX_PLAYLIST_ERRORS: u32 = 6;
pub const DEFAULT_MAX_RECOVERIES: u32 = 2;
pub const DEFAULT_MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

// Sink defaults
pub const DEFAULT_NATIVE_HLS: bool = false;
pub const DEFAULT_NATIVE_DASH: bool = false;
pub const DEFAULT_AUTOPLAY_ALLOWED: bool = true;
