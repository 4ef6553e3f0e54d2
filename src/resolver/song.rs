//! Single-song link resolver

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;

use super::{compile_patterns, UrlResolver};
use crate::api::{MusicClient, Song};

pub struct SongResolver {
    patterns: Vec<Regex>,
}

impl SongResolver {
    pub fn new() -> Self {
        Self {
            patterns: compile_patterns(&[
                r"https?://y\.qq\.com/n/ryqq/songDetail/(?P<id>[0-9A-Za-z]+)",
                r"https?://i\.y\.qq\.com/v8/playsong\.html\?.*songmid=(?P<id>[0-9A-Za-z]+)",
            ]),
        }
    }
}

impl Default for SongResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlResolver for SongResolver {
    fn name(&self) -> &'static str {
        "song"
    }

    fn patterns(&self) -> &[Regex] {
        &self.patterns
    }

    async fn resolve(&self, client: &MusicClient, url: &str) -> Result<Vec<Song>> {
        let mid = self.match_id(url).context("URL did not carry a song id")?;
        client.songs_by_mid(&[mid]).await
    }
}
