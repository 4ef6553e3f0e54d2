//! Chart (toplist) resolver

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::info;

use super::{compile_patterns, UrlResolver};
use crate::api::{MusicClient, Song};
use crate::error::DownloadError;

pub struct ChartResolver {
    patterns: Vec<Regex>,
}

impl ChartResolver {
    pub fn new() -> Self {
        Self {
            patterns: compile_patterns(&[
                r"https?://y\.qq\.com/n/ryqq/toplist/(?P<id>[0-9]+)",
                r"https?://i\.y\.qq\.com/n2/m/share/details/toplist\.html\?.*id=(?P<id>[0-9]+)",
            ]),
        }
    }
}

impl Default for ChartResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlResolver for ChartResolver {
    fn name(&self) -> &'static str {
        "chart"
    }

    fn patterns(&self) -> &[Regex] {
        &self.patterns
    }

    async fn resolve(&self, client: &MusicClient, url: &str) -> Result<Vec<Song>> {
        let id = self.match_id(url).context("URL did not carry a chart id")?;
        let id: u64 = id
            .parse()
            .map_err(|_| DownloadError::Validation(format!("chart id '{id}' is not numeric")))?;
        let songs = client.chart_songs(id).await?;
        info!("Chart {} expanded to {} song(s)", id, songs.len());
        Ok(songs)
    }
}
