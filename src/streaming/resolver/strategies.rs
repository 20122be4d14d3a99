//! Built-in resolution strategies
//!
//! - `RelayScrapeStrategy`: fetch a script endpoint through public relays and
//!   scan the returned text for a media URL
//! - `DocumentScanStrategy`: fetch the endpoint document itself and inspect
//!   media elements and inline scripts
//! - `RedirectStrategy`: follow redirects of a redirect service, falling back
//!   to a body scan
//! - `FormatSubstitutionStrategy`: rewrite the output format parameter of a
//!   redirect service, unverified

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::patterns::{find_media_reference, find_media_url};
use super::{ResolutionStrategy, ResolveError};
use crate::streaming::classification::{classify, StreamFormat};
use crate::utils::http_client::{FetchError, FetchedPage, HttpFetcher};
use crate::utils::url::UrlUtils;

/// Per-request timeout on top of whatever the fetcher enforces
async fn fetch_with_timeout(
    fetcher: &dyn HttpFetcher,
    url: &str,
    timeout: Duration,
) -> Result<FetchedPage, FetchError> {
    match tokio::time::timeout(timeout, fetcher.fetch(url)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            url: url.to_string(),
        }),
    }
}

pub struct RelayScrapeStrategy {
    fetcher: Arc<dyn HttpFetcher>,
    relays: Vec<String>,
    request_timeout: Duration,
}

impl RelayScrapeStrategy {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, relays: Vec<String>, request_timeout: Duration) -> Self {
        Self {
            fetcher,
            relays,
            request_timeout,
        }
    }

    fn relay_url(template: &str, target: &str) -> String {
        template.replace("{url}", &urlencoding::encode(target))
    }
}

#[async_trait]
impl ResolutionStrategy for RelayScrapeStrategy {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn applies_to(&self, format: StreamFormat) -> bool {
        format == StreamFormat::ScriptEndpoint
    }

    async fn resolve(&self, url: &str) -> Result<String, ResolveError> {
        let mut last = None;
        for template in &self.relays {
            let relay_url = Self::relay_url(template, url);
            match fetch_with_timeout(self.fetcher.as_ref(), &relay_url, self.request_timeout).await
            {
                Ok(page) => {
                    if let Some(found) = find_media_url(&page.body) {
                        return Ok(found);
                    }
                    debug!(target: "stream.resolve", relay = %template, "relay response has no media URL");
                    last = Some("no media URL in relay response".to_string());
                }
                Err(e) => {
                    debug!(target: "stream.resolve", relay = %template, error = %e, "relay fetch failed");
                    last = Some(e.to_string());
                }
            }
        }
        match last {
            Some(last) => Err(ResolveError::Exhausted { last }),
            None => Err(ResolveError::NoMatch),
        }
    }
}

pub struct DocumentScanStrategy {
    fetcher: Arc<dyn HttpFetcher>,
    request_timeout: Duration,
}

impl DocumentScanStrategy {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, request_timeout: Duration) -> Self {
        Self {
            fetcher,
            request_timeout,
        }
    }

    /// Media elements first, then inline scripts, then the raw text.
    /// Kept synchronous: the parsed document is not `Send`.
    fn scan_document(body: &str, base: &str) -> Option<String> {
        let document = Html::parse_document(body);

        if let Ok(selector) = Selector::parse("video[src], source[src]") {
            for element in document.select(&selector) {
                if let Some(src) = element.value().attr("src") {
                    let absolute = UrlUtils::absolutize(base, src.trim());
                    if classify(&absolute).is_adaptive()
                        || matches!(classify(&absolute), StreamFormat::Progressive(_))
                    {
                        return Some(absolute);
                    }
                }
            }
        }

        if let Ok(selector) = Selector::parse("script") {
            for script in document.select(&selector) {
                let text: String = script.text().collect();
                if let Some(found) = find_media_reference(&text, base) {
                    return Some(found);
                }
            }
        }

        find_media_url(body)
    }
}

#[async_trait]
impl ResolutionStrategy for DocumentScanStrategy {
    fn name(&self) -> &'static str {
        "document-scan"
    }

    fn applies_to(&self, format: StreamFormat) -> bool {
        format == StreamFormat::ScriptEndpoint
    }

    async fn resolve(&self, url: &str) -> Result<String, ResolveError> {
        let page = fetch_with_timeout(self.fetcher.as_ref(), url, self.request_timeout).await?;
        Self::scan_document(&page.body, &page.final_url).ok_or(ResolveError::NoMatch)
    }
}

pub struct RedirectStrategy {
    fetcher: Arc<dyn HttpFetcher>,
    request_timeout: Duration,
}

impl RedirectStrategy {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, request_timeout: Duration) -> Self {
        Self {
            fetcher,
            request_timeout,
        }
    }
}

#[async_trait]
impl ResolutionStrategy for RedirectStrategy {
    fn name(&self) -> &'static str {
        "redirect"
    }

    fn applies_to(&self, format: StreamFormat) -> bool {
        format == StreamFormat::Indirect
    }

    async fn resolve(&self, url: &str) -> Result<String, ResolveError> {
        let page = fetch_with_timeout(self.fetcher.as_ref(), url, self.request_timeout).await?;

        // A redirect that lands on another redirect service page is not a result.
        if page.final_url != url && classify(&page.final_url) != StreamFormat::Indirect {
            return Ok(page.final_url);
        }

        find_media_url(&page.body).ok_or(ResolveError::NoMatch)
    }
}

pub struct FormatSubstitutionStrategy {
    param: String,
    candidates: Vec<String>,
}

impl FormatSubstitutionStrategy {
    pub fn new(param: String, candidates: Vec<String>) -> Self {
        Self { param, candidates }
    }
}

#[async_trait]
impl ResolutionStrategy for FormatSubstitutionStrategy {
    fn name(&self) -> &'static str {
        "format-substitution"
    }

    fn applies_to(&self, format: StreamFormat) -> bool {
        format == StreamFormat::Indirect
    }

    /// First candidate URL that differs from the input; never fetched.
    async fn resolve(&self, url: &str) -> Result<String, ResolveError> {
        self.candidates
            .iter()
            .filter_map(|value| UrlUtils::with_query_param(url, &self.param, value))
            .find(|candidate| candidate != url)
            .ok_or(ResolveError::NoMatch)
    }
}
