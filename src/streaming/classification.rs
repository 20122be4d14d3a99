/*!
 * Stream Format Classification
 * ============================
 *
 * Maps a stream URL onto the transport / container family that decides
 * which playback engines are tried. Rules are checked in precedence order,
 * first match wins:
 *
 *   1. Known redirect service signature (relinker / redirect servlet) => Indirect
 *   2. `.m3u8` path                                                   => AdaptiveHls
 *   3. `.mpd` path                                                    => AdaptiveDash
 *   4. `.mp4` `.webm` `.avi` `.mkv` `.flv` path                        => Progressive
 *   5. Server-side script in path or query (`.php` ...)               => ScriptEndpoint
 *   6. `rtmp://` / `rtmps://` scheme                                  => PushStream
 *   7. anything else                                                  => Unknown
 *
 * `classify` never touches the network and never panics; malformed input
 * simply ends up as `Unknown`.
 */

use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::LazyLock;
use strum::{AsRefStr, Display, EnumString};

use crate::utils::url::UrlUtils;

/// Redirect service signatures (relinker style endpoints).
static INDIRECT_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)relinker|redirect[-_]?servlet").ok());

/// Server-side script extensions that never serve media themselves.
const SCRIPT_EXTENSIONS: &[&str] = &["php", "asp", "aspx", "jsp", "cgi"];

/// Container of a progressive download; diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ProgressiveContainer {
    Mp4,
    Webm,
    Avi,
    Mkv,
    Flv,
}

impl ProgressiveContainer {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::Webm => "video/webm",
            Self::Avi => "video/x-msvideo",
            Self::Mkv => "video/x-matroska",
            Self::Flv => "video/x-flv",
        }
    }
}

/// Transport / container classification of a stream URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamFormat {
    /// Redirect service; must be resolved before playback
    Indirect,
    AdaptiveHls,
    AdaptiveDash,
    Progressive(ProgressiveContainer),
    /// Script page pointing at the media somewhere in its output
    ScriptEndpoint,
    /// RTMP family; no engine can play it
    PushStream,
    Unknown,
}

impl StreamFormat {
    /// Whether the URL has to go through the resolver before engine selection
    pub fn needs_resolution(&self) -> bool {
        matches!(self, Self::Indirect | Self::ScriptEndpoint)
    }

    pub fn is_adaptive(&self) -> bool {
        matches!(self, Self::AdaptiveHls | Self::AdaptiveDash)
    }

    /// MIME type a media sink would be asked about for native playback
    pub fn mime_type(&self) -> Option<&'static str> {
        match self {
            Self::AdaptiveHls => Some("application/vnd.apple.mpegurl"),
            Self::AdaptiveDash => Some("application/dash+xml"),
            Self::Progressive(container) => Some(container.mime_type()),
            _ => None,
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indirect => f.write_str("indirect"),
            Self::AdaptiveHls => f.write_str("adaptive-hls"),
            Self::AdaptiveDash => f.write_str("adaptive-dash"),
            Self::Progressive(container) => write!(f, "progressive-{container}"),
            Self::ScriptEndpoint => f.write_str("script-endpoint"),
            Self::PushStream => f.write_str("push-stream"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

impl Serialize for StreamFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Classify a stream URL. Pure and deterministic.
pub fn classify(url: &str) -> StreamFormat {
    let url = url.trim();

    if INDIRECT_PATTERN
        .as_ref()
        .is_some_and(|re| re.is_match(url))
    {
        return StreamFormat::Indirect;
    }

    let extension = UrlUtils::path_extension(url);
    match extension.as_deref() {
        Some("m3u8") => return StreamFormat::AdaptiveHls,
        Some("mpd") => return StreamFormat::AdaptiveDash,
        Some(ext) => {
            if let Ok(container) = ext.parse::<ProgressiveContainer>() {
                return StreamFormat::Progressive(container);
            }
        }
        None => {}
    }

    if extension
        .as_deref()
        .is_some_and(|ext| SCRIPT_EXTENSIONS.contains(&ext))
        || query_names_script(url)
    {
        return StreamFormat::ScriptEndpoint;
    }

    if matches!(
        UrlUtils::scheme(url).as_deref(),
        Some("rtmp") | Some("rtmps")
    ) {
        return StreamFormat::PushStream;
    }

    StreamFormat::Unknown
}

/// `player?src=play.php` style references to a script in the query string
fn query_names_script(url: &str) -> bool {
    let Some((_, query)) = url.split_once('?') else {
        return false;
    };
    let query = query.split('#').next().unwrap_or_default().to_ascii_lowercase();
    SCRIPT_EXTENSIONS.iter().any(|ext| {
        let needle = format!(".{ext}");
        query.match_indices(&needle).any(|(pos, _)| {
            query[pos + needle.len()..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_ascii_alphanumeric())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://mediaserver.abnvideos.com/streams/abnafrica.m3u8", StreamFormat::AdaptiveHls)]
    #[case("https://live.example/hls/INDEX.M3U8?token=abc", StreamFormat::AdaptiveHls)]
    #[case(
        "https://vs-cmaf-push-ww-live.akamaized.net/x=4/i=urn:bbc/iptv_hd_abr_v1.mpd",
        StreamFormat::AdaptiveDash
    )]
    #[case("https://cdn.example/movie.mp4", StreamFormat::Progressive(ProgressiveContainer::Mp4))]
    #[case("https://cdn.example/clip.WEBM", StreamFormat::Progressive(ProgressiveContainer::Webm))]
    #[case("https://cdn.example/a.mkv#t=10", StreamFormat::Progressive(ProgressiveContainer::Mkv))]
    #[case("http://cdn.example/old.flv", StreamFormat::Progressive(ProgressiveContainer::Flv))]
    #[case("http://cdn.example/old.avi", StreamFormat::Progressive(ProgressiveContainer::Avi))]
    #[case(
        "https://mediapolis.rai.it/relinker/relinkerServlet.htm?cont=2606",
        StreamFormat::Indirect
    )]
    #[case("https://tv.example/redirect_servlet?id=1", StreamFormat::Indirect)]
    #[case("https://tv.example/live/player.php?ch=4", StreamFormat::ScriptEndpoint)]
    #[case("https://tv.example/embed?src=stream.php", StreamFormat::ScriptEndpoint)]
    #[case("rtmp://live.example/app/stream", StreamFormat::PushStream)]
    #[case("RTMPS://live.example/app/stream", StreamFormat::PushStream)]
    #[case("https://tv.example/live", StreamFormat::Unknown)]
    #[case("https://tv.example/page?x=phpinfo", StreamFormat::Unknown)]
    #[case("", StreamFormat::Unknown)]
    #[case("not a url at all", StreamFormat::Unknown)]
    fn test_classify(#[case] url: &str, #[case] expected: StreamFormat) {
        assert_eq!(classify(url), expected);
    }

    #[test]
    fn test_manifest_extension_beats_script_markers() {
        assert_eq!(
            classify("https://host/index.php/manifest.m3u8"),
            StreamFormat::AdaptiveHls
        );
        assert_eq!(
            classify("https://host/manifest.m3u8?origin=player.php"),
            StreamFormat::AdaptiveHls
        );
    }

    #[test]
    fn test_relinker_beats_manifest_extension() {
        assert_eq!(
            classify("https://host/relinker/live.m3u8"),
            StreamFormat::Indirect
        );
    }

    #[test]
    fn test_rtmp_with_manifest_extension_is_hls() {
        // Extension rules are checked before the scheme rule.
        assert_eq!(
            classify("rtmp://live.example/app/index.m3u8"),
            StreamFormat::AdaptiveHls
        );
    }

    #[test]
    fn test_format_display_and_mime() {
        assert_eq!(StreamFormat::AdaptiveHls.to_string(), "adaptive-hls");
        assert_eq!(
            StreamFormat::Progressive(ProgressiveContainer::Webm).to_string(),
            "progressive-webm"
        );
        assert_eq!(
            StreamFormat::AdaptiveDash.mime_type(),
            Some("application/dash+xml")
        );
        assert_eq!(StreamFormat::PushStream.mime_type(), None);
        assert!(StreamFormat::ScriptEndpoint.needs_resolution());
        assert!(!StreamFormat::AdaptiveHls.needs_resolution());
    }

    proptest! {
        #[test]
        fn classify_is_deterministic(url in ".{0,120}") {
            prop_assert_eq!(classify(&url), classify(&url));
        }

        #[test]
        fn m3u8_paths_are_hls_unless_indirect(
            host in "[a-z]{1,12}\\.(tv|com|net)",
            path in "[a-z0-9/]{0,30}",
            query in "[a-z0-9=&.]{0,20}",
        ) {
            let url = format!("https://{host}/{path}/live.m3u8?{query}");
            prop_assume!(!url.to_ascii_lowercase().contains("relinker"));
            prop_assume!(!url.to_ascii_lowercase().contains("servlet"));
            prop_assert_eq!(classify(&url), StreamFormat::AdaptiveHls);
        }
    }
}
