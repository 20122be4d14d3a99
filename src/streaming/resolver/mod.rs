//! URL resolution for indirect and script endpoint stream URLs
//!
//! Resolution is best effort. Strategies are tried in order; the first one
//! that yields a URL wins. When every strategy fails, or the total budget
//! runs out, the original URL is handed back unchanged together with a
//! `ResolutionFailure` so playback can still be attempted.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::errors::PlaybackError;
use crate::streaming::classification::StreamFormat;
use crate::streaming::metrics::metrics;
use crate::streaming::KeyValue;
use crate::utils::http_client::{FetchError, HttpFetcher};
use crate::utils::url::UrlUtils;

pub mod patterns;
pub mod strategies;

pub use strategies::{
    DocumentScanStrategy, FormatSubstitutionStrategy, RedirectStrategy, RelayScrapeStrategy,
};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no media URL found")]
    NoMatch,

    #[error("every attempt failed (last: {last})")]
    Exhausted { last: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// One technique for turning an indirect URL into a direct media URL
#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Formats this strategy knows how to handle
    fn applies_to(&self, format: StreamFormat) -> bool;

    async fn resolve(&self, url: &str) -> Result<String, ResolveError>;
}

/// Outcome of a resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedUrl {
    pub original: String,
    /// URL handed to classification and the engines
    pub url: String,
    /// Strategy that produced `url`, `None` for identity or fallback
    pub strategy: Option<&'static str>,
    /// Set when resolution was needed but nothing worked
    pub failure: Option<PlaybackError>,
}

impl ResolvedUrl {
    fn identity(url: &str) -> Self {
        Self {
            original: url.to_string(),
            url: url.to_string(),
            strategy: None,
            failure: None,
        }
    }

    pub fn changed(&self) -> bool {
        self.url != self.original
    }
}

/// Ordered strategy chain with a total time budget
pub struct UrlResolver {
    strategies: Vec<Arc<dyn ResolutionStrategy>>,
    total_timeout: Duration,
}

impl UrlResolver {
    pub fn new(strategies: Vec<Arc<dyn ResolutionStrategy>>, total_timeout: Duration) -> Self {
        Self {
            strategies,
            total_timeout,
        }
    }

    /// Default chain: relays then document scan for script endpoints,
    /// redirect following then output format substitution for indirect URLs.
    pub fn from_config(config: &ResolverConfig, fetcher: Arc<dyn HttpFetcher>) -> Self {
        let mut strategies: Vec<Arc<dyn ResolutionStrategy>> = vec![Arc::new(
            RelayScrapeStrategy::new(
                fetcher.clone(),
                config.relays.clone(),
                config.request_timeout,
            ),
        )];
        if config.document_scan {
            strategies.push(Arc::new(DocumentScanStrategy::new(
                fetcher.clone(),
                config.request_timeout,
            )));
        }
        strategies.push(Arc::new(RedirectStrategy::new(
            fetcher,
            config.request_timeout,
        )));
        strategies.push(Arc::new(FormatSubstitutionStrategy::new(
            config.output_param.clone(),
            config.output_candidates.clone(),
        )));

        Self::new(strategies, config.total_timeout)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Resolve `url`; identity for formats that need no resolution.
    /// Always completes within the total budget.
    pub async fn resolve(&self, url: &str, format: StreamFormat) -> ResolvedUrl {
        if !format.needs_resolution() {
            return ResolvedUrl::identity(url);
        }

        let safe_url = UrlUtils::obfuscate_credentials(url);
        debug!(target: "stream.resolve", url = %safe_url, %format, "resolving stream URL");

        let outcome = tokio::time::timeout(self.total_timeout, self.run_chain(url, format)).await;
        let message = match outcome {
            Ok(Ok((resolved, strategy))) => {
                info!(
                    target: "stream.resolve",
                    url = %safe_url,
                    resolved = %UrlUtils::obfuscate_credentials(&resolved),
                    strategy,
                    "stream URL resolved"
                );
                metrics().resolution_total.add(
                    1,
                    &[
                        KeyValue::new("strategy", strategy),
                        KeyValue::new("outcome", "resolved"),
                    ],
                );
                return ResolvedUrl {
                    original: url.to_string(),
                    url: resolved,
                    strategy: Some(strategy),
                    failure: None,
                };
            }
            Ok(Err(errors)) if errors.is_empty() => {
                "no resolution strategy applies to this format".to_string()
            }
            Ok(Err(errors)) => errors.join("; "),
            Err(_) => format!(
                "resolution did not finish within {}",
                humantime::format_duration(self.total_timeout)
            ),
        };

        warn!(
            target: "stream.resolve",
            url = %safe_url,
            reason = %message,
            "resolution failed, continuing with the original URL"
        );
        metrics().resolution_total.add(
            1,
            &[
                KeyValue::new("strategy", "none"),
                KeyValue::new("outcome", "fallback"),
            ],
        );
        metrics().resolution_fallback_total.add(1, &[]);

        ResolvedUrl {
            original: url.to_string(),
            url: url.to_string(),
            strategy: None,
            failure: Some(PlaybackError::ResolutionFailure {
                url: url.to_string(),
                message,
            }),
        }
    }

    async fn run_chain(
        &self,
        url: &str,
        format: StreamFormat,
    ) -> Result<(String, &'static str), Vec<String>> {
        let mut errors = Vec::new();
        for strategy in self.strategies.iter().filter(|s| s.applies_to(format)) {
            match strategy.resolve(url).await {
                Ok(resolved) if resolved != url => return Ok((resolved, strategy.name())),
                Ok(_) => {
                    debug!(target: "stream.resolve", strategy = strategy.name(), "strategy returned the input URL");
                    errors.push(format!("{}: returned the input URL", strategy.name()));
                }
                Err(e) => {
                    debug!(target: "stream.resolve", strategy = strategy.name(), error = %e, "strategy failed");
                    errors.push(format!("{}: {e}", strategy.name()));
                }
            }
        }
        Err(errors)
    }
}
