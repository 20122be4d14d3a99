//! Capability registry
//!
//! Every provider is probed once, at start-up, against the media sink. The
//! result is queried synchronously by the session for each channel; nothing
//! is re-probed per session.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    DashEngineProvider, Engine, EngineName, EngineProvider, EngineSupport, HlsEngineProvider,
    NativeEngineProvider,
};
use crate::config::EngineConfig;
use crate::sink::MediaSink;
use crate::streaming::classification::StreamFormat;
use crate::utils::http_client::HttpFetcher;

pub struct CapabilityRegistry {
    providers: HashMap<EngineName, Arc<dyn EngineProvider>>,
    support: HashMap<EngineName, EngineSupport>,
}

impl CapabilityRegistry {
    /// Providers for the built-in engines enabled in `config`
    pub fn default_providers(
        config: &EngineConfig,
        fetcher: Arc<dyn HttpFetcher>,
    ) -> Vec<Arc<dyn EngineProvider>> {
        let mut providers: Vec<Arc<dyn EngineProvider>> = Vec::new();
        if config.hls {
            providers.push(Arc::new(HlsEngineProvider::new(fetcher.clone(), config.clone())));
        }
        if config.dash {
            providers.push(Arc::new(DashEngineProvider::new(fetcher.clone(), config.clone())));
        }
        if config.native {
            providers.push(Arc::new(NativeEngineProvider::new(fetcher)));
        }
        providers
    }

    /// Probe every provider once. Probe failures mark the engine unavailable.
    pub async fn probe(providers: Vec<Arc<dyn EngineProvider>>, sink: &dyn MediaSink) -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
            support: HashMap::new(),
        };

        for provider in providers {
            let name = provider.name();
            if registry.providers.contains_key(&name) {
                warn!(engine = %name, "duplicate engine provider ignored");
                continue;
            }
            let support = match provider.probe(sink).await {
                Ok(support) => support,
                Err(e) => {
                    warn!(engine = %name, error = %e, "engine probe failed, marking unavailable");
                    EngineSupport::none()
                }
            };
            info!(
                engine = %name,
                hls = support.hls,
                dash = support.dash,
                progressive = support.progressive,
                "engine capabilities probed"
            );
            registry.support.insert(name, support);
            registry.providers.insert(name, provider);
        }

        registry
    }

    pub fn support(&self, engine: EngineName) -> EngineSupport {
        self.support.get(&engine).copied().unwrap_or_default()
    }

    /// Engines that can play anything at all
    pub fn available(&self) -> HashSet<EngineName> {
        self.support
            .iter()
            .filter(|(_, support)| support.any())
            .map(|(name, _)| *name)
            .collect()
    }

    /// Engines able to play `format`
    pub fn available_for(&self, format: StreamFormat) -> HashSet<EngineName> {
        self.support
            .iter()
            .filter(|(_, support)| support.supports(format))
            .map(|(name, _)| *name)
            .collect()
    }

    /// Fresh engine instance for one load attempt
    pub fn create(&self, engine: EngineName) -> Option<Box<dyn Engine>> {
        self.providers.get(&engine).map(|provider| provider.create())
    }
}
