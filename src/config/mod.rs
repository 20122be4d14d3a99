use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use defaults::*;
use duration_serde::duration;

/// Environment variable prefix; nested keys are separated by `__`
/// (e.g. `IPTV_PLAYER_PLAYBACK__MAX_RETRIES=5`).
pub const ENV_PREFIX: &str = "IPTV_PLAYER_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub engines: EngineConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Session-level retry, backoff and load timeout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Automatic restarts allowed before the session stays disconnected
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles with every automatic retry
    #[serde(default = "default_backoff_base", with = "duration")]
    pub backoff_base: Duration,
    /// Upper bound for the backoff delay
    #[serde(default = "default_backoff_cap", with = "duration")]
    pub backoff_cap: Duration,
    /// Random jitter added on top of the delay, as a percentage of it
    #[serde(default = "default_backoff_jitter_percent")]
    pub backoff_jitter_percent: u8,
    /// Ready timeout for adaptive engines (hls, dash)
    #[serde(default = "default_adaptive_load_timeout", with = "duration")]
    pub adaptive_load_timeout: Duration,
    /// Ready timeout for native playback
    #[serde(default = "default_native_load_timeout", with = "duration")]
    pub native_load_timeout: Duration,
    /// Start playback as soon as the stream is ready
    #[serde(default = "default_autoplay")]
    pub autoplay: bool,
}

/// URL resolution settings for indirect and script endpoint URLs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Timeout applied to every single HTTP request made while resolving
    #[serde(default = "default_resolver_request_timeout", with = "duration")]
    pub request_timeout: Duration,
    /// Budget for the whole resolution of one URL
    #[serde(default = "default_resolver_total_timeout", with = "duration")]
    pub total_timeout: Duration,
    /// Maximum bytes read from any fetched page or manifest
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Relay fetcher templates, `{url}` is replaced by the encoded target
    #[serde(default = "default_relays")]
    pub relays: Vec<String>,
    /// Query parameter selecting the output format on redirect services
    #[serde(default = "default_output_param")]
    pub output_param: String,
    /// Output format values tried when reconstructing a direct URL
    #[serde(default = "default_output_candidates")]
    pub output_candidates: Vec<String>,
    /// Inspect the endpoint document itself after the relays failed
    #[serde(default = "default_document_scan")]
    pub document_scan: bool,
}

/// Playback engine availability and engine-internal limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_true")]
    pub hls: bool,
    #[serde(default = "default_true")]
    pub dash: bool,
    #[serde(default = "default_true")]
    pub native: bool,
    /// Consecutive playlist refresh failures before the HLS engine reports a fatal error
    #[serde(default = "default_max_playlist_errors")]
    pub max_playlist_errors: u32,
    /// In-engine recoveries allowed per bound engine
    #[serde(default = "default_max_recoveries")]
    pub max_recoveries: u32,
    /// Lower bound for live playlist refresh
    #[serde(default = "default_min_poll_interval", with = "duration")]
    pub min_poll_interval: Duration,
}

/// Capabilities of the headless media sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Sink decodes HLS manifests itself
    #[serde(default = "default_native_hls")]
    pub native_hls: bool,
    /// Sink decodes DASH manifests itself
    #[serde(default = "default_native_dash")]
    pub native_dash: bool,
    /// Unsolicited playback start is permitted
    #[serde(default = "default_autoplay_allowed")]
    pub autoplay_allowed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// JSON channel list replacing the built-in seed data
    pub path: Option<PathBuf>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_backoff_base() -> Duration {
    DEFAULT_BACKOFF_BASE
}

fn default_backoff_cap() -> Duration {
    DEFAULT_BACKOFF_CAP
}

fn default_backoff_jitter_percent() -> u8 {
    DEFAULT_BACKOFF_JITTER_PERCENT
}

fn default_adaptive_load_timeout() -> Duration {
    DEFAULT_ADAPTIVE_LOAD_TIMEOUT
}

fn default_native_load_timeout() -> Duration {
    DEFAULT_NATIVE_LOAD_TIMEOUT
}

fn default_autoplay() -> bool {
    DEFAULT_AUTOPLAY
}

fn default_resolver_request_timeout() -> Duration {
    DEFAULT_RESOLVER_REQUEST_TIMEOUT
}

fn default_resolver_total_timeout() -> Duration {
    DEFAULT_RESOLVER_TOTAL_TIMEOUT
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_relays() -> Vec<String> {
    DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect()
}

fn default_output_param() -> String {
    DEFAULT_OUTPUT_PARAM.to_string()
}

fn default_output_candidates() -> Vec<String> {
    DEFAULT_OUTPUT_CANDIDATES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_document_scan() -> bool {
    DEFAULT_DOCUMENT_SCAN
}

fn default_true() -> bool {
    true
}

fn default_max_playlist_errors() -> u32 {
    DEFAULT_MAX_PLAYLIST_ERRORS
}

fn default_max_recoveries() -> u32 {
    DEFAULT_MAX_RECOVERIES
}

fn default_min_poll_interval() -> Duration {
    DEFAULT_MIN_POLL_INTERVAL
}

fn default_native_hls() -> bool {
    DEFAULT_NATIVE_HLS
}

fn default_native_dash() -> bool {
    DEFAULT_NATIVE_DASH
}

fn default_autoplay_allowed() -> bool {
    DEFAULT_AUTOPLAY_ALLOWED
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            backoff_cap: default_backoff_cap(),
            backoff_jitter_percent: default_backoff_jitter_percent(),
            adaptive_load_timeout: default_adaptive_load_timeout(),
            native_load_timeout: default_native_load_timeout(),
            autoplay: default_autoplay(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_resolver_request_timeout(),
            total_timeout: default_resolver_total_timeout(),
            max_body_bytes: default_max_body_bytes(),
            relays: default_relays(),
            output_param: default_output_param(),
            output_candidates: default_output_candidates(),
            document_scan: default_document_scan(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hls: true,
            dash: true,
            native: true,
            max_playlist_errors: default_max_playlist_errors(),
            max_recoveries: default_max_recoveries(),
            min_poll_interval: default_min_poll_interval(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            native_hls: default_native_hls(),
            native_dash: default_native_dash(),
            autoplay_allowed: default_autoplay_allowed(),
        }
    }
}

impl PlaybackConfig {
    /// Ready timeout for the given engine kind
    pub fn load_timeout(&self, adaptive: bool) -> Duration {
        if adaptive {
            self.adaptive_load_timeout
        } else {
            self.native_load_timeout
        }
    }
}

impl Config {
    /// Merge defaults, the TOML file (if present) and `IPTV_PLAYER_*` variables
    pub fn load_from_file<P: AsRef<Path>>(config_file: P) -> Result<Self> {
        let path = config_file.as_ref();
        if path.exists() {
            info!("Loading configuration from {}", path.display());
        } else {
            info!(
                "Config file {} not found, using defaults and environment",
                path.display()
            );
        }

        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break the retry or timeout invariants
    pub fn validate(&self) -> Result<()> {
        let playback = &self.playback;
        if playback.max_retries > MAX_ALLOWED_RETRIES {
            bail!(
                "playback.max_retries {} exceeds the maximum of {}",
                playback.max_retries,
                MAX_ALLOWED_RETRIES
            );
        }
        if playback.backoff_base.is_zero() {
            bail!("playback.backoff_base must be greater than zero");
        }
        if playback.backoff_cap < playback.backoff_base {
            bail!("playback.backoff_cap must not be lower than playback.backoff_base");
        }
        if playback.adaptive_load_timeout.is_zero() || playback.native_load_timeout.is_zero() {
            bail!("engine load timeouts must be greater than zero");
        }
        if self.resolver.request_timeout.is_zero() || self.resolver.total_timeout.is_zero() {
            bail!("resolver timeouts must be greater than zero");
        }
        if self.resolver.max_body_bytes == 0 {
            bail!("resolver.max_body_bytes must be greater than zero");
        }
        if let Some(relay) = self.resolver.relays.iter().find(|r| !r.contains("{url}")) {
            bail!("resolver relay template '{relay}' is missing the {{url}} placeholder");
        }
        Ok(())
    }
}
