//! Album link resolver

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::info;

use super::{compile_patterns, UrlResolver};
use crate::api::{MusicClient, Song};

pub struct AlbumResolver {
    patterns: Vec<Regex>,
}

impl AlbumResolver {
    pub fn new() -> Self {
        Self {
            patterns: compile_patterns(&[
                r"https?://y\.qq\.com/n/ryqq/albumDetail/(?P<id>[0-9A-Za-z]+)",
                r"https?://i\.y\.qq\.com/n2/m/share/details/album\.html\?.*albumId=(?P<id>[0-9A-Za-z]+)",
            ]),
        }
    }
}

impl Default for AlbumResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlResolver for AlbumResolver {
    fn name(&self) -> &'static str {
        "album"
    }

    fn patterns(&self) -> &[Regex] {
        &self.patterns
    }

    async fn resolve(&self, client: &MusicClient, url: &str) -> Result<Vec<Song>> {
        let mid = self.match_id(url).context("URL did not carry an album id")?;
        let songs = client.album_songs(&mid).await?;
        info!("Album {} expanded to {} song(s)", mid, songs.len());
        Ok(songs)
    }
}
