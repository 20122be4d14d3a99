//! M3U playlist import
//!
//! `#EXTINF` lines carry the channel attributes, the next non-comment line
//! the stream URL:
//!
//! ```text
//! #EXTINF:-1 tvg-id="AlJazeera.qa" tvg-logo="https://i.imgur.com/7bRVpnu.png" group-title="News",Al Jazeera
//! https://live-hls-web-aje.getaj.net/AJE/index.m3u8
//! ```

use tracing::debug;

use crate::models::Channel;

/// Category given to entries without a `group-title`
pub const UNCATEGORIZED: &str = "Undefined";

/// Parse an M3U playlist. Entries without a name or URL are skipped; ids
/// come from `tvg-id` or, when absent, the entry position.
pub fn parse_m3u(content: &str) -> Vec<Channel> {
    let mut channels = Vec::new();
    let mut pending: Option<&str> = None;

    for line in content.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if line.starts_with("#EXTINF:") {
            pending = Some(line);
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let Some(extinf) = pending.take() else {
            continue;
        };
        match parse_entry(extinf, line, channels.len() + 1) {
            Some(channel) => channels.push(channel),
            None => debug!(line = extinf, "skipping malformed EXTINF entry"),
        }
    }

    channels
}

fn parse_entry(extinf: &str, url: &str, position: usize) -> Option<Channel> {
    let (attributes, name) = split_title(&extinf["#EXTINF:".len()..])?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut id = None;
    let mut logo = None;
    let mut group = None;
    for (key, value) in parse_attributes(attributes) {
        match key.as_str() {
            "tvg-id" if !value.is_empty() => id = Some(value),
            "tvg-logo" if !value.is_empty() => logo = Some(value),
            "group-title" if !value.is_empty() => group = Some(value),
            _ => {}
        }
    }

    let mut channel = Channel::new(
        id.unwrap_or_else(|| position.to_string()),
        name.to_string(),
        url.to_string(),
        group.unwrap_or_else(|| UNCATEGORIZED.to_string()),
    );
    channel.logo_url = logo;
    Some(channel)
}

/// Split at the first comma outside quotes; titles may contain commas
fn split_title(line: &str) -> Option<(&str, &str)> {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return Some((&line[..i], &line[i + 1..])),
            _ => {}
        }
    }
    None
}

/// `key="quoted value"` pairs; the leading duration is skipped
fn parse_attributes(attributes: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut rest = attributes.trim_start();

    // "-1 tvg-id=..." : the duration carries no '='
    if let Some((first, tail)) = rest.split_once(char::is_whitespace) {
        if !first.contains('=') {
            rest = tail;
        }
    }

    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim().to_ascii_lowercase();
        let after = &rest[eq + 1..];
        let (value, tail) = match after.strip_prefix('"') {
            Some(quoted) => match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            },
            None => match after.find(char::is_whitespace) {
                Some(end) => (&after[..end], &after[end..]),
                None => (after, ""),
            },
        };
        if !key.is_empty() {
            attrs.push((key, value.trim().to_string()));
        }
        rest = tail.trim_start();
    }

    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYLIST: &str = r#"#EXTM3U
#EXTINF:-1 tvg-id="AlJazeera.qa" tvg-logo="https://i.imgur.com/7bRVpnu.png" group-title="News",Al Jazeera English (1080p)
https://live-hls-web-aje.getaj.net/AJE/index.m3u8
#EXTINF:-1 tvg-logo="" group-title="Music",Clubbing TV, Paris
#EXTVLCOPT:http-user-agent=Mozilla/5.0
https://example.com/clubbing.m3u8

#EXTINF:-1,
https://example.com/nameless.m3u8
#EXTINF:-1 group-title=Kids,Cartoon Classics
https://example.com/cartoons.mp4
"#;

    #[test]
    fn test_parse_m3u_entries() {
        let channels = parse_m3u(PLAYLIST);
        assert_eq!(channels.len(), 3);

        let aje = &channels[0];
        assert_eq!(aje.id, "AlJazeera.qa");
        assert_eq!(aje.name, "Al Jazeera English (1080p)");
        assert_eq!(aje.category, "News");
        assert_eq!(aje.logo_url.as_deref(), Some("https://i.imgur.com/7bRVpnu.png"));

        let clubbing = &channels[1];
        assert_eq!(clubbing.name, "Clubbing TV, Paris");
        assert_eq!(clubbing.id, "2");
        assert_eq!(clubbing.logo_url, None);
        assert_eq!(clubbing.stream_url, "https://example.com/clubbing.m3u8");

        let cartoons = &channels[2];
        assert_eq!(cartoons.category, "Kids");
        assert_eq!(cartoons.id, "3");
    }

    #[test]
    fn test_missing_group_title_is_uncategorized() {
        let channels = parse_m3u("#EXTINF:-1,Plain\nhttps://example.com/plain.mp4\n");
        assert_eq!(channels[0].category, UNCATEGORIZED);
    }
}
