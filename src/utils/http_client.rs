use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{redirect, Client, Response};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::utils::url::UrlUtils;

/// Bytes read by [`HttpFetcher::probe`]; enough to sniff a container or manifest header.
pub const PROBE_BYTES: usize = 4096;

/// Response of a bounded GET
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Location after following redirects
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    /// Body decoded lossily as UTF-8, cut at the byte limit
    pub body: String,
    pub truncated: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },
    #[error("HTTP request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("Failed reading body of {url}: {message}")]
    Body { url: String, message: String },
}

/// HTTP access used by the resolver strategies and the engines.
///
/// Every call carries its own timeout and never reads more than a bounded
/// number of body bytes, so live streams and hostile pages cannot stall
/// the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// GET `url` following redirects, reading at most the configured body limit
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;

    /// GET only the first [`PROBE_BYTES`] of `url`
    async fn probe(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// Default implementation of HttpFetcher using reqwest
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: Client,
    request_timeout: Duration,
    max_body_bytes: usize,
}

impl ReqwestFetcher {
    pub fn new(request_timeout: Duration, max_body_bytes: usize) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(request_timeout)
            .redirect(redirect::Policy::limited(10))
            .user_agent(concat!("iptv-player/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            request_timeout,
            max_body_bytes,
        })
    }

    async fn get_bounded(&self, url: &str, limit: usize) -> Result<FetchedPage, FetchError> {
        debug!(url = %UrlUtils::obfuscate_credentials(url), limit, "HTTP GET");

        let resp = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| map_request_error(url, e))?;

        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        read_bounded(resp, url, limit).await
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.get_bounded(url, self.max_body_bytes).await
    }

    async fn probe(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.get_bounded(url, PROBE_BYTES.min(self.max_body_bytes))
            .await
    }
}

fn map_request_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Request {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

/// Stream the body in chunks, stopping at `limit` bytes
async fn read_bounded(resp: Response, url: &str, limit: usize) -> Result<FetchedPage, FetchError> {
    let final_url = resp.url().to_string();
    let status = resp.status().as_u16();
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let mut body = resp.bytes_stream();
    let mut collected: Vec<u8> = Vec::with_capacity(limit.min(8192));
    let mut truncated = false;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Body {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;
        if collected.len() + chunk.len() > limit {
            collected.extend_from_slice(&chunk[..(limit - collected.len())]);
            truncated = true;
            break;
        }
        collected.extend_from_slice(&chunk);
    }

    Ok(FetchedPage {
        final_url,
        status,
        content_type,
        body: String::from_utf8_lossy(&collected).into_owned(),
        truncated,
    })
}

impl FetchedPage {
    /// Page as served from `url` without redirects; handy for fakes
    pub fn ok<S: Into<String>>(url: &str, body: S) -> Self {
        Self {
            final_url: url.to_string(),
            status: 200,
            content_type: None,
            body: body.into(),
            truncated: false,
        }
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn redirected_to<S: Into<String>>(mut self, final_url: S) -> Self {
        self.final_url = final_url.into();
        self
    }
}
