//! Dedicated HLS engine
//!
//! Loads the manifest itself: master playlists are reduced to their highest
//! bandwidth variant, and the stream counts as ready once a media playlist
//! with at least one segment has been parsed. Live playlists are refreshed
//! by a monitor task for as long as the engine stays bound.

use async_trait::async_trait;
use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    Engine, EngineError, EngineErrorKind, EngineEvent, EngineEventSender, EngineName,
    EngineProvider, EngineSupport,
};
use crate::config::EngineConfig;
use crate::sink::MediaSink;
use crate::utils::http_client::HttpFetcher;
use crate::utils::url::UrlUtils;

pub struct HlsEngineProvider {
    fetcher: Arc<dyn HttpFetcher>,
    config: EngineConfig,
}

impl HlsEngineProvider {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, config: EngineConfig) -> Self {
        Self { fetcher, config }
    }
}

#[async_trait]
impl EngineProvider for HlsEngineProvider {
    fn name(&self) -> EngineName {
        EngineName::Hls
    }

    async fn probe(&self, _sink: &dyn MediaSink) -> Result<EngineSupport, EngineError> {
        if !self.config.hls {
            return Err(EngineError::Unavailable {
                engine: EngineName::Hls,
                reason: "disabled in configuration".to_string(),
            });
        }
        Ok(EngineSupport {
            hls: true,
            ..EngineSupport::none()
        })
    }

    fn create(&self) -> Box<dyn Engine> {
        Box::new(HlsEngine::new(self.fetcher.clone(), self.config.clone()))
    }
}

struct PlaylistMonitor {
    cancel: CancellationToken,
    reload: Arc<Notify>,
    handle: JoinHandle<()>,
}

pub struct HlsEngine {
    fetcher: Arc<dyn HttpFetcher>,
    config: EngineConfig,
    sink: Option<Arc<dyn MediaSink>>,
    media_url: Option<String>,
    monitor: Option<PlaylistMonitor>,
    recoveries: Arc<AtomicU32>,
}

impl HlsEngine {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, config: EngineConfig) -> Self {
        Self {
            fetcher,
            config,
            sink: None,
            media_url: None,
            monitor: None,
            recoveries: Arc::new(AtomicU32::new(0)),
        }
    }

    /// URL of the media playlist fed to the sink, once loaded
    pub fn media_url(&self) -> Option<&str> {
        self.media_url.as_deref()
    }

    /// Follow a master playlist down to one media playlist. The returned URL
    /// is where the media playlist was actually served from.
    async fn fetch_media_playlist(&self, url: &str) -> Result<(String, MediaPlaylist), EngineError> {
        match fetch_playlist(self.fetcher.as_ref(), url).await? {
            (final_url, Playlist::MediaPlaylist(playlist)) => Ok((final_url, playlist)),
            (master_url, Playlist::MasterPlaylist(master)) => {
                let variant_url = select_variant(&master, &master_url).ok_or_else(|| {
                    EngineError::Manifest("master playlist has no playable variant".to_string())
                })?;
                debug!(
                    variant = %UrlUtils::obfuscate_credentials(&variant_url),
                    "selected highest bandwidth variant"
                );
                match fetch_playlist(self.fetcher.as_ref(), &variant_url).await? {
                    (final_url, Playlist::MediaPlaylist(playlist)) => Ok((final_url, playlist)),
                    (_, Playlist::MasterPlaylist(_)) => Err(EngineError::Manifest(
                        "variant points to another master playlist".to_string(),
                    )),
                }
            }
        }
    }

    fn start_monitor(&mut self, url: String, target_duration: Duration, events: EngineEventSender) {
        let cancel = CancellationToken::new();
        let reload = Arc::new(Notify::new());
        let task = MonitorTask {
            fetcher: self.fetcher.clone(),
            url,
            interval: target_duration.max(self.config.min_poll_interval),
            max_errors: self.config.max_playlist_errors.max(1),
            events,
            cancel: cancel.clone(),
            reload: reload.clone(),
            recoveries: self.recoveries.clone(),
        };
        let handle = tokio::spawn(task.run());
        self.monitor = Some(PlaylistMonitor {
            cancel,
            reload,
            handle,
        });
    }

    fn stop_monitor(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.cancel.cancel();
            monitor.handle.abort();
        }
    }
}

#[async_trait]
impl Engine for HlsEngine {
    fn name(&self) -> EngineName {
        EngineName::Hls
    }

    async fn load(
        &mut self,
        url: &str,
        sink: Arc<dyn MediaSink>,
        events: EngineEventSender,
    ) -> Result<(), EngineError> {
        sink.bind(EngineName::Hls)?;
        self.sink = Some(sink.clone());

        let (media_url, playlist) = self.fetch_media_playlist(url).await?;
        if playlist.segments.is_empty() {
            return Err(EngineError::Manifest(
                "media playlist has no segments".to_string(),
            ));
        }

        sink.set_source(&media_url)?;
        info!(
            url = %UrlUtils::obfuscate_credentials(&media_url),
            segments = playlist.segments.len(),
            live = !playlist.end_list,
            "HLS media playlist loaded"
        );

        if !playlist.end_list {
            self.start_monitor(
                media_url.clone(),
                Duration::from_secs(playlist.target_duration),
                events,
            );
        }
        self.media_url = Some(media_url);
        Ok(())
    }

    async fn recover(&mut self, kind: EngineErrorKind) -> bool {
        if !matches!(kind, EngineErrorKind::Network | EngineErrorKind::MediaDecode) {
            return false;
        }
        let attempt = self.recoveries.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.config.max_recoveries {
            warn!(attempt, %kind, "HLS recovery budget exhausted");
            return false;
        }

        match kind {
            EngineErrorKind::Network => match &self.monitor {
                Some(monitor) => {
                    debug!(attempt, "forcing playlist reload");
                    monitor.reload.notify_one();
                    true
                }
                None => false,
            },
            _ => match (&self.sink, &self.media_url) {
                (Some(sink), Some(url)) => {
                    debug!(attempt, "re-attaching media source after decode error");
                    sink.set_source(url).is_ok()
                }
                _ => false,
            },
        }
    }

    async fn destroy(&mut self) {
        self.stop_monitor();
        if let Some(sink) = self.sink.take() {
            sink.unbind();
        }
        self.media_url = None;
    }
}

impl Drop for HlsEngine {
    fn drop(&mut self) {
        self.stop_monitor();
    }
}

struct MonitorTask {
    fetcher: Arc<dyn HttpFetcher>,
    url: String,
    interval: Duration,
    max_errors: u32,
    events: EngineEventSender,
    cancel: CancellationToken,
    reload: Arc<Notify>,
    recoveries: Arc<AtomicU32>,
}

impl MonitorTask {
    async fn run(self) {
        let mut failures: u32 = 0;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.reload.notified() => {}
            }

            let refreshed = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = fetch_playlist(self.fetcher.as_ref(), &self.url) => result,
            };

            match refreshed {
                Ok((_, Playlist::MediaPlaylist(playlist))) => {
                    failures = 0;
                    self.recoveries.store(0, Ordering::SeqCst);
                    if playlist.end_list {
                        debug!("live playlist ended, monitor stopping");
                        break;
                    }
                }
                Ok((_, Playlist::MasterPlaylist(_))) => {
                    self.events.send(EngineEvent::fatal(
                        EngineErrorKind::UnsupportedFormat,
                        "media playlist turned into a master playlist",
                    ));
                    break;
                }
                Err(e) => {
                    failures += 1;
                    let fatal = failures >= self.max_errors;
                    warn!(failures, fatal, error = %e, "playlist refresh failed");
                    let event = if fatal {
                        EngineEvent::fatal(e.kind(), e.to_string())
                    } else {
                        EngineEvent::non_fatal(e.kind(), e.to_string())
                    };
                    if !self.events.send(event) || fatal {
                        break;
                    }
                }
            }
        }
    }
}

/// Playlist at `url` together with the URL it was served from after redirects
async fn fetch_playlist(
    fetcher: &dyn HttpFetcher,
    url: &str,
) -> Result<(String, Playlist), EngineError> {
    let page = fetcher.fetch(url).await?;
    if page.truncated {
        return Err(EngineError::Manifest(
            "playlist exceeds the body size limit".to_string(),
        ));
    }
    let playlist = parse_playlist(&page.body)?;
    Ok((page.final_url, playlist))
}

fn parse_playlist(body: &str) -> Result<Playlist, EngineError> {
    if !body.trim_start().starts_with("#EXTM3U") {
        return Err(EngineError::Manifest("missing #EXTM3U header".to_string()));
    }
    m3u8_rs::parse_playlist_res(body.as_bytes())
        .map_err(|e| EngineError::Manifest(format!("unparseable playlist: {e}")))
}

/// Highest bandwidth regular variant, absolutized against the master URL
fn select_variant(master: &MasterPlaylist, master_url: &str) -> Option<String> {
    master
        .variants
        .iter()
        .filter(|variant| !variant.is_i_frame)
        .max_by_key(|variant| variant.bandwidth)
        .map(|variant| UrlUtils::absolutize(master_url, &variant.uri))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{BindingChange, HeadlessSink};
    use crate::utils::http_client::{FetchError, FetchedPage, MockHttpFetcher};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2400000,RESOLUTION=1280x720
high/index.m3u8
";

    const LIVE: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:1
#EXTINF:6.0,
seg1.ts
#EXTINF:6.0,
seg2.ts
";

    const VOD: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXTINF:10.0,
seg1.ts
#EXT-X-ENDLIST
";

    const EMPTY: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXT-X-ENDLIST
";

    fn engine_with(fetcher: MockHttpFetcher, config: EngineConfig) -> HlsEngine {
        HlsEngine::new(Arc::new(fetcher), config)
    }

    fn events() -> (EngineEventSender, mpsc::UnboundedReceiver<crate::engine::TaggedEngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EngineEventSender::new(1, EngineName::Hls, tx), rx)
    }

    #[tokio::test]
    async fn test_master_playlist_selects_highest_bandwidth() {
        let mut fetcher = MockHttpFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|url| url == "https://cdn.tv/live/master.m3u8")
            .returning(|url| Ok(FetchedPage::ok(url, MASTER)));
        fetcher
            .expect_fetch()
            .withf(|url| url == "https://cdn.tv/live/high/index.m3u8")
            .returning(|url| Ok(FetchedPage::ok(url, VOD)));

        let sink = Arc::new(HeadlessSink::default());
        let mut engine = engine_with(fetcher, EngineConfig::default());
        let (sender, _rx) = events();

        engine
            .load("https://cdn.tv/live/master.m3u8", sink.clone(), sender)
            .await
            .unwrap();

        assert_eq!(engine.media_url(), Some("https://cdn.tv/live/high/index.m3u8"));
        let status = sink.status();
        assert_eq!(status.bound_engine, Some(EngineName::Hls));
        assert_eq!(
            status.source.as_deref(),
            Some("https://cdn.tv/live/high/index.m3u8")
        );
        assert!(engine.monitor.is_none());

        engine.destroy().await;
        engine.destroy().await;
        assert_eq!(
            sink.binding_history(),
            vec![
                BindingChange::Bound(EngineName::Hls),
                BindingChange::Unbound(EngineName::Hls)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_variants_resolve_against_redirected_master() {
        let mut fetcher = MockHttpFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|url| url == "https://lb.example/live/ch1.m3u8")
            .times(1)
            .returning(|url| {
                Ok(FetchedPage::ok(url, MASTER)
                    .redirected_to("https://edge7.example/hls/ch1/master.m3u8"))
            });
        fetcher
            .expect_fetch()
            .withf(|url| url == "https://edge7.example/hls/ch1/high/index.m3u8")
            .times(1)
            .returning(|url| {
                Ok(FetchedPage::ok(url, LIVE)
                    .redirected_to("https://edge9.example/hls/ch1/high/index.m3u8"))
            });
        fetcher
            .expect_fetch()
            .withf(|url| url == "https://edge9.example/hls/ch1/high/index.m3u8")
            .returning(|url| Ok(FetchedPage::ok(url, LIVE)));

        let sink = Arc::new(HeadlessSink::default());
        let mut engine = engine_with(fetcher, EngineConfig::default());
        let (sender, _rx) = events();
        engine
            .load("https://lb.example/live/ch1.m3u8", sink.clone(), sender)
            .await
            .unwrap();

        assert_eq!(
            engine.media_url(),
            Some("https://edge9.example/hls/ch1/high/index.m3u8")
        );
        assert_eq!(
            sink.status().source.as_deref(),
            Some("https://edge9.example/hls/ch1/high/index.m3u8")
        );

        // Refreshes go to the final location; any other URL fails the mock.
        tokio::time::sleep(Duration::from_secs(20)).await;
        engine.destroy().await;
    }

    #[tokio::test]
    async fn test_truncated_playlist_is_rejected() {
        let mut fetcher = MockHttpFetcher::new();
        fetcher.expect_fetch().returning(|url| {
            Ok(FetchedPage {
                truncated: true,
                ..FetchedPage::ok(url, LIVE)
            })
        });

        let sink = Arc::new(HeadlessSink::default());
        let mut engine = engine_with(fetcher, EngineConfig::default());
        let (sender, _rx) = events();
        let err = engine
            .load("https://cdn.tv/live.m3u8", sink.clone(), sender)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Manifest(ref message) if message.contains("size limit")));
        assert_eq!(sink.status().source, None);
    }

    #[tokio::test]
    async fn test_playlist_without_segments_is_not_ready() {
        let mut fetcher = MockHttpFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|url| Ok(FetchedPage::ok(url, EMPTY)));

        let sink = Arc::new(HeadlessSink::default());
        let mut engine = engine_with(fetcher, EngineConfig::default());
        let (sender, _rx) = events();

        let err = engine
            .load("https://cdn.tv/empty.m3u8", sink.clone(), sender)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Manifest(_)));
        assert_eq!(sink.status().source, None);
    }

    #[tokio::test]
    async fn test_html_body_is_rejected() {
        let mut fetcher = MockHttpFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|url| Ok(FetchedPage::ok(url, "<html><body>Not found</body></html>")));

        let mut engine = engine_with(fetcher, EngineConfig::default());
        let (sender, _rx) = events();
        let err = engine
            .load(
                "https://cdn.tv/live.m3u8",
                Arc::new(HeadlessSink::default()),
                sender,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::UnsupportedFormat);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_monitor_escalates_consecutive_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut fetcher = MockHttpFetcher::new();
        fetcher.expect_fetch().returning(move |url| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(FetchedPage::ok(url, LIVE))
            } else {
                Err(FetchError::Status {
                    url: url.to_string(),
                    status: 503,
                })
            }
        });

        let config = EngineConfig {
            max_playlist_errors: 3,
            ..EngineConfig::default()
        };
        let mut engine = engine_with(fetcher, config);
        let (sender, mut rx) = events();
        engine
            .load(
                "https://cdn.tv/live.m3u8",
                Arc::new(HeadlessSink::default()),
                sender,
            )
            .await
            .unwrap();

        let mut fatal_flags = Vec::new();
        for _ in 0..3 {
            let tagged = rx.recv().await.unwrap();
            assert_eq!(tagged.epoch, 1);
            assert_eq!(tagged.event.kind, EngineErrorKind::Network);
            fatal_flags.push(tagged.event.fatal);
        }
        assert_eq!(fatal_flags, vec![false, false, true]);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        engine.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_budget_is_bounded() {
        let mut fetcher = MockHttpFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|url| Ok(FetchedPage::ok(url, LIVE)));

        let config = EngineConfig {
            max_recoveries: 2,
            ..EngineConfig::default()
        };
        let mut engine = engine_with(fetcher, config);
        let (sender, _rx) = events();
        engine
            .load(
                "https://cdn.tv/live.m3u8",
                Arc::new(HeadlessSink::default()),
                sender,
            )
            .await
            .unwrap();

        assert!(engine.recover(EngineErrorKind::MediaDecode).await);
        assert!(engine.recover(EngineErrorKind::Network).await);
        assert!(!engine.recover(EngineErrorKind::Network).await);
        assert!(!engine.recover(EngineErrorKind::Other).await);

        engine.destroy().await;
    }

    #[tokio::test]
    async fn test_provider_respects_configuration() {
        let sink = HeadlessSink::default();
        let fetcher: Arc<dyn HttpFetcher> = Arc::new(MockHttpFetcher::new());

        let enabled = HlsEngineProvider::new(fetcher.clone(), EngineConfig::default());
        assert!(enabled.probe(&sink).await.unwrap().hls);

        let disabled = HlsEngineProvider::new(
            fetcher,
            EngineConfig {
                hls: false,
                ..EngineConfig::default()
            },
        );
        assert!(matches!(
            disabled.probe(&sink).await,
            Err(EngineError::Unavailable { .. })
        ));
    }
}
