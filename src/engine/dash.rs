//! DASH engine
//!
//! Validates the MPD before handing it to the sink: the document must have
//! an `MPD` root and describe at least one `Representation`.

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    Engine, EngineError, EngineErrorKind, EngineEventSender, EngineName, EngineProvider,
    EngineSupport,
};
use crate::config::EngineConfig;
use crate::sink::MediaSink;
use crate::utils::http_client::HttpFetcher;
use crate::utils::url::UrlUtils;

pub struct DashEngineProvider {
    fetcher: Arc<dyn HttpFetcher>,
    config: EngineConfig,
}

impl DashEngineProvider {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, config: EngineConfig) -> Self {
        Self { fetcher, config }
    }
}

#[async_trait]
impl EngineProvider for DashEngineProvider {
    fn name(&self) -> EngineName {
        EngineName::Dash
    }

    async fn probe(&self, _sink: &dyn MediaSink) -> Result<EngineSupport, EngineError> {
        if !self.config.dash {
            return Err(EngineError::Unavailable {
                engine: EngineName::Dash,
                reason: "disabled in configuration".to_string(),
            });
        }
        Ok(EngineSupport {
            dash: true,
            ..EngineSupport::none()
        })
    }

    fn create(&self) -> Box<dyn Engine> {
        Box::new(DashEngine::new(
            self.fetcher.clone(),
            self.config.max_recoveries,
        ))
    }
}

/// What the engine learned from the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpdSummary {
    pub representations: usize,
    /// `type="dynamic"` marks a live presentation
    pub live: bool,
}

pub struct DashEngine {
    fetcher: Arc<dyn HttpFetcher>,
    max_recoveries: u32,
    recoveries: u32,
    sink: Option<Arc<dyn MediaSink>>,
    manifest_url: Option<String>,
}

impl DashEngine {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, max_recoveries: u32) -> Self {
        Self {
            fetcher,
            max_recoveries,
            recoveries: 0,
            sink: None,
            manifest_url: None,
        }
    }
}

#[async_trait]
impl Engine for DashEngine {
    fn name(&self) -> EngineName {
        EngineName::Dash
    }

    async fn load(
        &mut self,
        url: &str,
        sink: Arc<dyn MediaSink>,
        _events: EngineEventSender,
    ) -> Result<(), EngineError> {
        sink.bind(EngineName::Dash)?;
        self.sink = Some(sink.clone());

        let page = self.fetcher.fetch(url).await?;
        if page.truncated {
            return Err(EngineError::Manifest(
                "MPD exceeds the body size limit".to_string(),
            ));
        }
        let summary = parse_mpd(&page.body)?;

        // Segment URLs in the MPD are relative to where it was served from.
        sink.set_source(&page.final_url)?;
        info!(
            url = %UrlUtils::obfuscate_credentials(&page.final_url),
            representations = summary.representations,
            live = summary.live,
            "DASH manifest loaded"
        );
        self.manifest_url = Some(page.final_url);
        Ok(())
    }

    async fn recover(&mut self, kind: EngineErrorKind) -> bool {
        if !matches!(kind, EngineErrorKind::Network | EngineErrorKind::MediaDecode) {
            return false;
        }
        self.recoveries += 1;
        if self.recoveries > self.max_recoveries {
            warn!(attempt = self.recoveries, %kind, "DASH recovery budget exhausted");
            return false;
        }
        match (&self.sink, &self.manifest_url) {
            (Some(sink), Some(url)) => {
                debug!(attempt = self.recoveries, %kind, "re-attaching DASH source");
                sink.set_source(url).is_ok()
            }
            _ => false,
        }
    }

    async fn destroy(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.unbind();
        }
        self.manifest_url = None;
    }
}

/// Minimal structural check of an MPD document
pub fn parse_mpd(body: &str) -> Result<MpdSummary, EngineError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut root_seen = false;
    let mut live = false;
    let mut representations = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let name = e.local_name();
                if !root_seen {
                    if name.as_ref() != b"MPD" {
                        return Err(EngineError::Manifest(format!(
                            "unexpected root element <{}>",
                            String::from_utf8_lossy(name.as_ref())
                        )));
                    }
                    root_seen = true;
                    live = e
                        .try_get_attribute("type")
                        .ok()
                        .flatten()
                        .is_some_and(|attr| attr.value.as_ref() == b"dynamic");
                } else if name.as_ref() == b"Representation" {
                    representations += 1;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(EngineError::Manifest(format!(
                    "malformed MPD at position {}: {e}",
                    reader.buffer_position()
                )))
            }
        }
    }

    if !root_seen {
        return Err(EngineError::Manifest("document has no MPD root".to_string()));
    }
    if representations == 0 {
        return Err(EngineError::Manifest(
            "MPD describes no representation".to_string(),
        ));
    }
    Ok(MpdSummary {
        representations,
        live,
    })
}
