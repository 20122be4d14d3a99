//! Utility modules shared across the player
//!
//! - `http_client`: bounded HTTP fetching behind the `HttpFetcher` trait
//! - `url`: URL inspection and rewriting helpers
//! - `jitter`: randomized backoff jitter

pub mod http_client;
pub mod jitter;
pub mod url;

pub use http_client::{FetchError, FetchedPage, HttpFetcher, ReqwestFetcher};
pub use url::UrlUtils;
