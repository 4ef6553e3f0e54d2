//! Playlist link resolver

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::info;

use super::{compile_patterns, UrlResolver};
use crate::api::{MusicClient, Song};
use crate::error::DownloadError;

pub struct PlaylistResolver {
    patterns: Vec<Regex>,
}

impl PlaylistResolver {
    pub fn new() -> Self {
        Self {
            patterns: compile_patterns(&[
                r"https?://y\.qq\.com/n/ryqq/playlist/(?P<id>[0-9]+)",
                r"https?://i\.y\.qq\.com/n2/m/share/details/taoge\.html\?.*id=(?P<id>[0-9]+)",
                r"https?://i\.y\.qq\.com/n2/m/share/details/interactive_playlist\.html\?.*id=(?P<id>[0-9]+)",
            ]),
        }
    }
}

impl Default for PlaylistResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlResolver for PlaylistResolver {
    fn name(&self) -> &'static str {
        "playlist"
    }

    fn patterns(&self) -> &[Regex] {
        &self.patterns
    }

    async fn resolve(&self, client: &MusicClient, url: &str) -> Result<Vec<Song>> {
        let id = self.match_id(url).context("URL did not carry a playlist id")?;
        let id: u64 = id
            .parse()
            .map_err(|_| DownloadError::Validation(format!("playlist id '{id}' is not numeric")))?;
        let songs = client.playlist_songs(id).await?;
        info!("Playlist {} expanded to {} song(s)", id, songs.len());
        Ok(songs)
    }
}
