//! Native playback through the sink's own decoders
//!
//! The URL is probed with a bounded GET before anything is attached, so HTML
//! error pages and manifests the sink cannot decode fail fast instead of
//! running into the load timeout.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::{
    Engine, EngineError, EngineErrorKind, EngineEventSender, EngineName, EngineProvider,
    EngineSupport,
};
use crate::sink::{MediaSink, SinkEvent};
use crate::streaming::classification::{classify, ProgressiveContainer, StreamFormat};
use crate::utils::http_client::{FetchedPage, HttpFetcher};
use crate::utils::url::UrlUtils;

const HLS_MIME: &str = "application/vnd.apple.mpegurl";
const DASH_MIME: &str = "application/dash+xml";

pub struct NativeEngineProvider {
    fetcher: Arc<dyn HttpFetcher>,
}

impl NativeEngineProvider {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl EngineProvider for NativeEngineProvider {
    fn name(&self) -> EngineName {
        EngineName::Native
    }

    async fn probe(&self, sink: &dyn MediaSink) -> Result<EngineSupport, EngineError> {
        Ok(EngineSupport {
            hls: sink.can_play_type(HLS_MIME),
            dash: sink.can_play_type(DASH_MIME),
            progressive: sink.can_play_type(ProgressiveContainer::Mp4.mime_type()),
        })
    }

    fn create(&self) -> Box<dyn Engine> {
        Box::new(NativeEngine::new(self.fetcher.clone()))
    }
}

pub struct NativeEngine {
    fetcher: Arc<dyn HttpFetcher>,
    sink: Option<Arc<dyn MediaSink>>,
}

impl NativeEngine {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self {
            fetcher,
            sink: None,
        }
    }
}

#[async_trait]
impl Engine for NativeEngine {
    fn name(&self) -> EngineName {
        EngineName::Native
    }

    async fn load(
        &mut self,
        url: &str,
        sink: Arc<dyn MediaSink>,
        _events: EngineEventSender,
    ) -> Result<(), EngineError> {
        let format = classify(url);
        if let Some(mime) = format.mime_type().filter(|_| format.is_adaptive()) {
            if !sink.can_play_type(mime) {
                return Err(EngineError::UnsupportedFormat(format!(
                    "sink cannot decode {format} natively"
                )));
            }
        }

        let probe = self.fetcher.probe(url).await?;
        check_probe(&probe, sink.as_ref())?;

        sink.bind(EngineName::Native)?;
        self.sink = Some(sink.clone());

        // Subscribe before attaching so the ready signal cannot be missed.
        let mut events = sink.subscribe();
        sink.set_source(url)?;
        debug!(url = %UrlUtils::obfuscate_credentials(url), "native source attached, waiting for ready");

        loop {
            match events.recv().await {
                Ok(SinkEvent::Ready) => return Ok(()),
                Ok(SinkEvent::Error { kind, message }) => {
                    return Err(match kind {
                        EngineErrorKind::Network => EngineError::Network(message),
                        EngineErrorKind::UnsupportedFormat => {
                            EngineError::UnsupportedFormat(message)
                        }
                        EngineErrorKind::MediaDecode | EngineErrorKind::Other => {
                            EngineError::Media(message)
                        }
                    })
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "native engine lagged behind sink events");
                }
                Err(RecvError::Closed) => {
                    return Err(EngineError::Media("sink event stream closed".to_string()))
                }
            }
        }
    }

    async fn recover(&mut self, _kind: EngineErrorKind) -> bool {
        false
    }

    async fn destroy(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.unbind();
        }
    }
}

/// Reject probe responses the sink would never turn into playback
fn check_probe(probe: &FetchedPage, sink: &dyn MediaSink) -> Result<(), EngineError> {
    let content_type = probe
        .content_type
        .as_deref()
        .map(|ct| ct.to_ascii_lowercase())
        .unwrap_or_default();

    if content_type.starts_with("text/html") {
        return Err(EngineError::UnsupportedFormat(
            "endpoint returned an HTML page".to_string(),
        ));
    }

    let body = probe.body.trim_start();
    let manifest = if body.starts_with("#EXTM3U") || content_type.contains("mpegurl") {
        Some(StreamFormat::AdaptiveHls)
    } else if content_type.contains("dash+xml") || body.contains("<MPD") {
        Some(StreamFormat::AdaptiveDash)
    } else {
        None
    };

    match manifest.and_then(|format| format.mime_type().map(|mime| (format, mime))) {
        Some((format, mime)) if !sink.can_play_type(mime) => Err(EngineError::UnsupportedFormat(
            format!("stream is a {format} manifest the sink cannot decode"),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{HeadlessSink, HeadlessSinkOptions};
    use crate::utils::http_client::{FetchError, MockHttpFetcher};
    use tokio::sync::mpsc;

    fn sender() -> EngineEventSender {
        let (tx, _rx) = mpsc::unbounded_channel();
        EngineEventSender::new(1, EngineName::Native, tx)
    }

    fn fetcher_returning(page: FetchedPage) -> Arc<dyn HttpFetcher> {
        let mut fetcher = MockHttpFetcher::new();
        fetcher
            .expect_probe()
            .returning(move |_| Ok(page.clone()));
        Arc::new(fetcher)
    }

    #[tokio::test]
    async fn test_progressive_stream_becomes_ready() {
        let url = "https://cdn.tv/movie.mp4";
        let sink = Arc::new(HeadlessSink::default());
        let mut engine = NativeEngine::new(fetcher_returning(
            FetchedPage::ok(url, "\0\0\0 ftypisom").with_content_type("video/mp4"),
        ));

        engine.load(url, sink.clone(), sender()).await.unwrap();
        assert_eq!(sink.status().bound_engine, Some(EngineName::Native));
        assert_eq!(sink.status().source.as_deref(), Some(url));

        assert!(!engine.recover(EngineErrorKind::Network).await);
        engine.destroy().await;
        assert_eq!(sink.status().bound_engine, None);
    }

    #[tokio::test]
    async fn test_hls_url_rejected_without_native_support() {
        let sink = Arc::new(HeadlessSink::default());
        let mut engine = NativeEngine::new(Arc::new(MockHttpFetcher::new()));

        let err = engine
            .load("https://cdn.tv/live.m3u8", sink.clone(), sender())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat(_)));
        assert_eq!(sink.status().bound_engine, None);
    }

    #[tokio::test]
    async fn test_probe_rejects_html_and_undecodable_manifests() {
        let url = "https://cdn.tv/stream";
        let sink = Arc::new(HeadlessSink::default());

        let mut html = NativeEngine::new(fetcher_returning(
            FetchedPage::ok(url, "<!doctype html>").with_content_type("text/html; charset=utf-8"),
        ));
        assert!(matches!(
            html.load(url, sink.clone(), sender()).await,
            Err(EngineError::UnsupportedFormat(_))
        ));

        let mut manifest = NativeEngine::new(fetcher_returning(FetchedPage::ok(
            url,
            "#EXTM3U\n#EXT-X-TARGETDURATION:6\n",
        )));
        assert!(matches!(
            manifest.load(url, sink.clone(), sender()).await,
            Err(EngineError::UnsupportedFormat(_))
        ));

        let native_hls = Arc::new(HeadlessSink::new(HeadlessSinkOptions {
            native_hls: true,
            ..HeadlessSinkOptions::default()
        }));
        let mut accepted = NativeEngine::new(fetcher_returning(FetchedPage::ok(
            url,
            "#EXTM3U\n#EXT-X-TARGETDURATION:6\n",
        )));
        assert!(accepted.load(url, native_hls, sender()).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_failure_is_network_error() {
        let mut fetcher = MockHttpFetcher::new();
        fetcher.expect_probe().returning(|url| {
            Err(FetchError::Timeout {
                url: url.to_string(),
            })
        });
        let mut engine = NativeEngine::new(Arc::new(fetcher));
        let err = engine
            .load(
                "https://cdn.tv/movie.mp4",
                Arc::new(HeadlessSink::default()),
                sender(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::Network);
    }

    #[tokio::test]
    async fn test_sink_error_fails_the_load() {
        let url = "https://cdn.tv/movie.mp4";
        let sink = Arc::new(HeadlessSink::new(HeadlessSinkOptions {
            auto_ready: false,
            ..HeadlessSinkOptions::default()
        }));
        let mut engine = NativeEngine::new(fetcher_returning(FetchedPage::ok(url, "")));

        let injector = sink.clone();
        let load = tokio::spawn(async move { engine.load(url, sink, sender()).await });
        // The source is attached only after the engine subscribed.
        while injector.status().source.is_none() {
            tokio::task::yield_now().await;
        }
        injector.emit(SinkEvent::Error {
            kind: EngineErrorKind::MediaDecode,
            message: "codec not supported".to_string(),
        });

        let err = load.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::MediaDecode);
    }

    #[tokio::test]
    async fn test_provider_probes_sink_capabilities() {
        let provider = NativeEngineProvider::new(Arc::new(MockHttpFetcher::new()));
        let support = provider.probe(&HeadlessSink::default()).await.unwrap();
        assert!(!support.hls);
        assert!(!support.dash);
        assert!(support.progressive);
    }
}
