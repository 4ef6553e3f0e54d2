//! Artist page resolver

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::info;

use super::{compile_patterns, UrlResolver};
use crate::api::{MusicClient, Song};

pub struct ArtistResolver {
    patterns: Vec<Regex>,
}

impl ArtistResolver {
    pub fn new() -> Self {
        Self {
            patterns: compile_patterns(&[
                r"https?://y\.qq\.com/n/ryqq/singer/(?P<id>[0-9A-Za-z]+)",
                r"https?://i\.y\.qq\.com/n2/m/share/profile_v2/index\.html\?.*singermid=(?P<id>[0-9A-Za-z]+)",
            ]),
        }
    }
}

impl Default for ArtistResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlResolver for ArtistResolver {
    fn name(&self) -> &'static str {
        "artist"
    }

    fn patterns(&self) -> &[Regex] {
        &self.patterns
    }

    async fn resolve(&self, client: &MusicClient, url: &str) -> Result<Vec<Song>> {
        let mid = self.match_id(url).context("URL did not carry a singer id")?;
        let songs = client.artist_songs(&mid).await?;
        info!("Artist {} expanded to {} song(s)", mid, songs.len());
        Ok(songs)
    }
}
