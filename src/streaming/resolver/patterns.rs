//! Direct media URL scanning over untrusted text
//!
//! Relay responses and endpoint documents are never executed, only
//! pattern-matched. JSON-escaped slashes (`\/`) are undone first since many
//! players embed their configuration as a JSON blob.

use regex::Regex;
use std::sync::LazyLock;

use crate::utils::url::UrlUtils;

/// Absolute media URL, optionally quoted or inside an `src=` attribute
static ABSOLUTE_MEDIA_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)https?://[^\s"'<>\\]+?\.(?:m3u8|mpd|mp4|webm|mkv|flv|avi)\b(?:[?#][^\s"'<>\\]*)?"#,
    )
    .ok()
});

/// Quoted reference that may be relative (`"hls/live.m3u8"`)
static QUOTED_MEDIA_REFERENCE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)["']([^"'\s<>]+?\.(?:m3u8|mpd|mp4|webm|mkv|flv|avi)\b[^"'\s<>]*)["']"#,
    )
    .ok()
});

fn unescape(text: &str) -> String {
    text.replace("\\/", "/").replace("\\u0026", "&").replace("&amp;", "&")
}

/// First absolute direct-media URL in `text`
pub fn find_media_url(text: &str) -> Option<String> {
    let text = unescape(text);
    ABSOLUTE_MEDIA_URL
        .as_ref()?
        .find(&text)
        .map(|m| m.as_str().to_string())
}

/// First quoted media reference in `text`, absolutized against `base`
pub fn find_media_reference(text: &str, base: &str) -> Option<String> {
    if let Some(url) = find_media_url(text) {
        return Some(url);
    }
    let text = unescape(text);
    QUOTED_MEDIA_REFERENCE
        .as_ref()?
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| UrlUtils::absolutize(base, m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_media_url_in_html_attribute() {
        let html = r#"<video id="p"><source src="https://cdn.tv/live/index.m3u8?tok=1" type="application/x-mpegURL"></video>"#;
        assert_eq!(
            find_media_url(html).as_deref(),
            Some("https://cdn.tv/live/index.m3u8?tok=1")
        );
    }

    #[test]
    fn test_find_media_url_in_json_blob() {
        let js = r#"var cfg = {"file":"https:\/\/edge.tv\/ch1\/playlist.m3u8","autostart":true};"#;
        assert_eq!(
            find_media_url(js).as_deref(),
            Some("https://edge.tv/ch1/playlist.m3u8")
        );
    }

    #[test]
    fn test_find_media_url_requires_extension_boundary() {
        assert_eq!(find_media_url("see https://cdn.tv/file.mp4abc now"), None);
        assert_eq!(find_media_url("no media here, only https://cdn.tv/"), None);
    }

    #[test]
    fn test_find_media_reference_relative() {
        let script = r#"player.load('streams/ch4.m3u8');"#;
        assert_eq!(
            find_media_reference(script, "https://tv.example/live/player.php?ch=4").as_deref(),
            Some("https://tv.example/live/streams/ch4.m3u8")
        );
    }
}
