//! Link resolution: dispatch input URLs to capability-matched resolvers

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use crate::api::{MusicClient, Song};

mod album;
mod artist;
mod chart;
mod playlist;
mod song;

pub use album::AlbumResolver;
pub use artist::ArtistResolver;
pub use chart::ChartResolver;
pub use playlist::PlaylistResolver;
pub use song::SongResolver;

/// One link flavor the tool understands. Resolvers are tried in registry
/// order; the first whose pattern table matches wins.
#[async_trait]
pub trait UrlResolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// URL patterns this resolver accepts; each must capture an `id`.
    fn patterns(&self) -> &[Regex];

    fn suitable(&self, url: &str) -> bool {
        self.match_id(url).is_some()
    }

    fn match_id(&self, url: &str) -> Option<String> {
        self.patterns().iter().find_map(|re| {
            re.captures(url)
                .and_then(|caps| caps.name("id"))
                .map(|m| m.as_str().to_string())
        })
    }

    /// Expand the URL into zero or more song records.
    async fn resolve(&self, client: &MusicClient, url: &str) -> Result<Vec<Song>>;
}

/// Registry in priority order: most specific first, charts last.
pub fn default_resolvers() -> Vec<Box<dyn UrlResolver>> {
    vec![
        Box::new(SongResolver::new()),
        Box::new(AlbumResolver::new()),
        Box::new(PlaylistResolver::new()),
        Box::new(ArtistResolver::new()),
        Box::new(ChartResolver::new()),
    ]
}

pub(crate) fn compile_patterns(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("static URL pattern"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_resolver_matches_its_urls() {
        let cases: Vec<(&str, &str)> = vec![
            ("https://y.qq.com/n/ryqq/songDetail/000xyz123", "song"),
            (
                "https://i.y.qq.com/v8/playsong.html?songmid=000xyz123&from=share",
                "song",
            ),
            ("https://y.qq.com/n/ryqq/albumDetail/002abc", "album"),
            ("https://y.qq.com/n/ryqq/playlist/7654321", "playlist"),
            ("https://y.qq.com/n/ryqq/singer/003def", "artist"),
            ("https://y.qq.com/n/ryqq/toplist/26", "chart"),
        ];

        let resolvers = default_resolvers();
        for (url, expected) in cases {
            let matched = resolvers
                .iter()
                .find(|r| r.suitable(url))
                .unwrap_or_else(|| panic!("no resolver for {url}"));
            assert_eq!(matched.name(), expected, "wrong resolver for {url}");
        }
    }

    #[test]
    fn test_unsupported_url_matches_nothing() {
        let resolvers = default_resolvers();
        for url in [
            "https://example.com/song/123",
            "https://y.qq.com/n/ryqq/mv/000abc",
            "not a url",
        ] {
            assert!(resolvers.iter().all(|r| !r.suitable(url)), "{url} matched");
        }
    }

    #[test]
    fn test_match_id_extracts_capture() {
        let song = SongResolver::new();
        assert_eq!(
            song.match_id("https://y.qq.com/n/ryqq/songDetail/000xyz123"),
            Some("000xyz123".to_string())
        );
        assert_eq!(song.match_id("https://y.qq.com/n/ryqq/albumDetail/x"), None);
    }
}
