use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable catalog entry; the playback session only ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub name: String,
    /// Logo image reference; may be missing or fail to load
    #[serde(default, alias = "logo")]
    pub logo_url: Option<String>,
    pub stream_url: String,
    /// Free-text label, inconsistently cased across data sets
    #[serde(default)]
    pub category: String,
    /// Carried through from catalog data; nothing in the player reads it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epg: Option<Vec<EpgProgram>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpgProgram {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub genre: String,
}

/// Category as presented by the catalog (normalized key, first-seen label)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub channel_count: usize,
}

impl Channel {
    pub fn new<S: Into<String>>(id: S, name: S, stream_url: S, category: S) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            logo_url: None,
            stream_url: stream_url.into(),
            category: category.into(),
            epg: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_accepts_original_logo_field_name() {
        let json = r#"{
            "id": "3",
            "name": "2M Monde",
            "logo": "https://i.imgur.com/MvpntzA.png",
            "streamUrl": "https://example.com/2M_ES.m3u8",
            "category": "General"
        }"#;
        let channel: Channel = serde_json::from_str(json).unwrap();
        assert_eq!(
            channel.logo_url.as_deref(),
            Some("https://i.imgur.com/MvpntzA.png")
        );
        assert_eq!(channel.stream_url, "https://example.com/2M_ES.m3u8");
        assert!(channel.epg.is_none());
    }

    #[test]
    fn channel_without_logo_or_category_still_parses() {
        let json = r#"{"id": "x", "name": "Bare", "streamUrl": "rtmp://live/bare"}"#;
        let channel: Channel = serde_json::from_str(json).unwrap();
        assert!(channel.logo_url.is_none());
        assert_eq!(channel.category, "");
    }
}
