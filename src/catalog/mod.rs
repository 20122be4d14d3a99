//! Channel catalog
//!
//! Static channel list the player is opened from. Categories are free text
//! and inconsistently cased across data sets, so every category comparison
//! goes through [`normalize_category`]: trimmed and case-insensitive.

use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::config::CatalogConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{Category, Channel};

pub mod m3u;

pub use m3u::parse_m3u;

const SEED_CHANNELS: &str = include_str!("../../data/channels.json");

/// Category value matching every channel
pub const ALL_CATEGORIES: &str = "all";

/// Comparison key for a free-text category
pub fn normalize_category(category: &str) -> String {
    category.trim().to_lowercase()
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    channels: Vec<Channel>,
}

impl Catalog {
    pub fn new(channels: Vec<Channel>) -> Self {
        let mut seen = std::collections::HashSet::new();
        for channel in &channels {
            if !seen.insert(channel.id.as_str()) {
                warn!(id = %channel.id, name = %channel.name, "duplicate channel id, lookups return the first");
            }
        }
        Self { channels }
    }

    /// Built-in channel list
    pub fn seed() -> AppResult<Self> {
        let channels: Vec<Channel> = serde_json::from_str(SEED_CHANNELS)?;
        Ok(Self::new(channels))
    }

    /// Configured file, or the built-in list when none is set
    pub fn from_config(config: &CatalogConfig) -> AppResult<Self> {
        match &config.path {
            Some(path) => Self::load_from_file(path),
            None => Self::seed(),
        }
    }

    /// JSON array of channels, or an M3U playlist for `.m3u`/`.m3u8` files
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let is_playlist = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("m3u") || ext.eq_ignore_ascii_case("m3u8"));
        let channels = if is_playlist {
            parse_m3u(&content)
        } else {
            serde_json::from_str(&content)?
        };

        if channels.is_empty() {
            return Err(AppError::catalog(format!(
                "{} contains no channels",
                path.display()
            )));
        }
        info!("Loaded {} channels from {}", channels.len(), path.display());
        Ok(Self::new(channels))
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Channel> {
        self.channels.iter().find(|channel| channel.id == id)
    }

    /// Like [`Catalog::get`] but failing with `NotFound`
    pub fn require(&self, id: &str) -> AppResult<&Channel> {
        self.get(id)
            .ok_or_else(|| AppError::not_found("channel", id))
    }

    /// Distinct categories in first-seen order, labelled as first seen
    pub fn categories(&self) -> Vec<Category> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut categories: Vec<Category> = Vec::new();

        for channel in &self.channels {
            let key = normalize_category(&channel.category);
            if key.is_empty() {
                continue;
            }
            match index.get(&key) {
                Some(&position) => categories[position].channel_count += 1,
                None => {
                    index.insert(key.clone(), categories.len());
                    categories.push(Category {
                        id: key,
                        name: channel.category.trim().to_string(),
                        channel_count: 1,
                    });
                }
            }
        }

        categories
    }

    /// Channels in `category` (`None` or `"all"` for every category) whose
    /// name contains `search`, both compared case-insensitively
    pub fn filter(&self, category: Option<&str>, search: Option<&str>) -> Vec<&Channel> {
        let category = category
            .map(normalize_category)
            .filter(|c| !c.is_empty() && c != ALL_CATEGORIES);
        let search = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        self.channels
            .iter()
            .filter(|channel| {
                category
                    .as_deref()
                    .map_or(true, |c| normalize_category(&channel.category) == c)
            })
            .filter(|channel| {
                search
                    .as_deref()
                    .map_or(true, |s| channel.name.to_lowercase().contains(s))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    fn catalog() -> Catalog {
        Catalog::new(vec![
            Channel::new("1", "Al Jazeera", "https://example.com/aje.m3u8", "News"),
            Channel::new("2", "France 24", "https://example.com/f24.m3u8", "NEWS "),
            Channel::new("3", "Cartoon Classics", "https://example.com/toons.mp4", "Kids"),
            Channel::new("4", "Business Daily", "https://example.com/biz.m3u8", "Business"),
        ])
    }

    #[test]
    fn test_seed_catalog_loads() {
        let catalog = Catalog::seed().unwrap();
        assert!(catalog.len() > 50);
        assert!(catalog.channels().iter().all(|c| !c.stream_url.is_empty()));
        assert!(catalog
            .categories()
            .iter()
            .any(|category| category.id == "news"));
    }

    #[test]
    fn test_categories_are_normalized() {
        let categories = catalog().categories();
        assert_eq!(categories.len(), 3);
        assert_eq!(categories[0].id, "news");
        assert_eq!(categories[0].name, "News");
        assert_eq!(categories[0].channel_count, 2);
    }

    #[rstest]
    #[case(None, None, 4)]
    #[case(Some("all"), None, 4)]
    #[case(Some("ALL"), None, 4)]
    #[case(Some("news"), None, 2)]
    #[case(Some(" News"), Some("jazeera"), 1)]
    #[case(None, Some("DAILY"), 1)]
    #[case(Some("Sports"), None, 0)]
    #[case(Some("kids"), Some("news"), 0)]
    fn test_filter(
        #[case] category: Option<&str>,
        #[case] search: Option<&str>,
        #[case] expected: usize,
    ) {
        assert_eq!(catalog().filter(category, search).len(), expected);
    }

    #[test]
    fn test_lookup() {
        let catalog = catalog();
        assert_eq!(catalog.get("3").map(|c| c.name.as_str()), Some("Cartoon Classics"));
        assert!(catalog.get("99").is_none());
        assert!(matches!(
            catalog.require("99"),
            Err(AppError::NotFound { .. })
        ));
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_duplicate_ids_resolve_to_first() {
        let catalog = Catalog::new(vec![
            Channel::new("1", "First", "https://example.com/a.m3u8", "News"),
            Channel::new("1", "Second", "https://example.com/b.m3u8", "News"),
        ]);
        assert_eq!(catalog.get("1").map(|c| c.name.as_str()), Some("First"));
        assert!(logs_contain("duplicate channel id"));
    }

    #[test]
    fn test_load_from_json_and_m3u_files() {
        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            json,
            r#"[{{"id":"7","name":"Test","streamUrl":"https://example.com/t.mp4","category":"Movies"}}]"#
        )
        .unwrap();
        let catalog = Catalog::load_from_file(json.path()).unwrap();
        assert_eq!(catalog.get("7").map(|c| c.category.as_str()), Some("Movies"));

        let mut playlist = tempfile::Builder::new().suffix(".m3u").tempfile().unwrap();
        writeln!(
            playlist,
            "#EXTM3U\n#EXTINF:-1 group-title=\"Music\",Radio One\nhttps://example.com/radio.mp3"
        )
        .unwrap();
        let catalog = Catalog::load_from_file(playlist.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.channels()[0].category, "Music");

        let empty = tempfile::Builder::new().suffix(".m3u8").tempfile().unwrap();
        assert!(matches!(
            Catalog::load_from_file(empty.path()),
            Err(AppError::Catalog { .. })
        ));
    }
}
