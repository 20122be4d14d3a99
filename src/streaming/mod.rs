/**
 * streaming/mod.rs
 * =================
 * Public module entrypoint for stream inspection ahead of playback.
 *
 * Currently exposes:
 *   - classification: pure URL to `StreamFormat` mapping used to pick engines.
 *   - resolver: best-effort resolution of indirect and script endpoint URLs
 *     through an ordered list of pluggable strategies.
 *   - metrics: OpenTelemetry counters for classification, resolution,
 *     engine attempts and session retries.
 */
pub mod classification;
pub mod resolver;

pub use classification::{classify, ProgressiveContainer, StreamFormat};
pub use resolver::{ResolvedUrl, UrlResolver};

// Streaming metrics instrumentation module
pub mod metrics {
    use opentelemetry::global;
    use opentelemetry::metrics::{Counter, Meter};
    use std::sync::OnceLock;

    /// Aggregated metric instruments for classification, resolution and playback attempts.
    pub struct StreamingMetrics {
        pub classification_total: Counter<u64>,
        pub resolution_total: Counter<u64>,
        pub resolution_fallback_total: Counter<u64>,
        pub engine_attempts_total: Counter<u64>,
        pub engine_failures_total: Counter<u64>,
        pub session_retries_total: Counter<u64>,
    }

    impl StreamingMetrics {
        fn new() -> Self {
            let meter: Meter = global::meter("iptv-player.streaming");
            Self {
                classification_total: meter
                    .u64_counter("stream_classification_total")
                    .with_description("Total stream URL classifications")
                    .build(),
                resolution_total: meter
                    .u64_counter("stream_resolution_total")
                    .with_description("Resolutions of indirect and script endpoint URLs")
                    .build(),
                resolution_fallback_total: meter
                    .u64_counter("stream_resolution_fallback_total")
                    .with_description("Resolutions that fell back to the original URL")
                    .build(),
                engine_attempts_total: meter
                    .u64_counter("engine_load_attempts_total")
                    .with_description("Engine load attempts")
                    .build(),
                engine_failures_total: meter
                    .u64_counter("engine_load_failures_total")
                    .with_description("Engine load attempts that failed or timed out")
                    .build(),
                session_retries_total: meter
                    .u64_counter("session_retries_total")
                    .with_description("Automatic and manual session restarts")
                    .build(),
            }
        }
    }

    static METRICS: OnceLock<StreamingMetrics> = OnceLock::new();

    /// Public accessor for global streaming metrics instruments.
    pub fn metrics() -> &'static StreamingMetrics {
        METRICS.get_or_init(StreamingMetrics::new)
    }
}

/// Re-export of OpenTelemetry KeyValue for metric labels.
pub use opentelemetry::KeyValue;
