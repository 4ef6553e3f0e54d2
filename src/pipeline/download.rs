//! Download stage: quality cascade, URL negotiation and file transfer
//!
//! URLs are negotiated tier by tier, best-first: every still-pending mid
//! is asked for at the current tier, winners leave the pending set, and
//! the cascade moves down one tier for the rest. A song that wins at one
//! tier is never re-requested at a lower one. Negotiated URLs then feed
//! the concurrent download engine; items that produced no playable URL
//! at any allowed tier are marked failed.

use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;
use std::collections::HashMap;
use tracing::{info, warn};

use super::{ItemState, RunContext, Stage, StageFlow};
use crate::api::{Credential, MusicClient, SongUrl};
use crate::download::{DownloadConfig, DownloadEngine, TaskStatus};
use crate::quality::{fallback_order, QualityTier, TierCeiling};

/// Source of playable URLs for one quality tier.
#[async_trait]
pub trait TierUrlSource: Send + Sync {
    async fn urls(&self, mids: &[String], tier: QualityTier) -> Result<Vec<SongUrl>>;
}

struct ApiUrlSource<'a> {
    client: &'a MusicClient,
    credential: Option<&'a Credential>,
}

#[async_trait]
impl TierUrlSource for ApiUrlSource<'_> {
    async fn urls(&self, mids: &[String], tier: QualityTier) -> Result<Vec<SongUrl>> {
        self.client.download_urls(mids, tier, self.credential).await
    }
}

pub struct DownloadStage;

impl DownloadStage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DownloadStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for DownloadStage {
    fn name(&self) -> &'static str {
        "download"
    }

    async fn process(&self, ctx: &mut RunContext) -> Result<StageFlow> {
        let mids: Vec<String> = ctx
            .items
            .iter()
            .filter(|item| item.is_live())
            .map(|item| item.song.mid.clone())
            .collect();
        if mids.is_empty() {
            return Ok(StageFlow::Stop);
        }

        let source = ApiUrlSource {
            client: &ctx.client,
            credential: ctx.credential.as_ref(),
        };
        let ceiling = TierCeiling::Rank(ctx.settings.basic.quality);
        let urls = negotiate_urls(&source, mids, ceiling).await?;

        for item in ctx.items.iter_mut().filter(|item| item.is_live()) {
            match urls.get(&item.song.mid) {
                Some(url) => {
                    item.download_url = Some(url.clone());
                    item.state = ItemState::UrlObtained;
                }
                None => item.mark_failed("no playable URL at any allowed quality"),
            }
        }

        let engine = DownloadEngine::new(DownloadConfig {
            save_dir: ctx.settings.basic.output.clone(),
            num_workers: ctx.settings.basic.num_workers,
            max_retries: ctx.settings.basic.max_retries,
            timeout: ctx.settings.basic.timeout,
            overwrite: ctx.settings.basic.overwrite,
            show_progress: !ctx.settings.basic.no_progress,
            ..Default::default()
        })?;

        for item in ctx
            .items
            .iter_mut()
            .filter(|item| item.is_live() && item.state == ItemState::UrlObtained)
        {
            let Some(song_url) = item.download_url.clone() else {
                continue;
            };
            let url = song_url.url.clone().unwrap_or_default();
            match engine.add_task(&url, &item.song.full_name(), song_url.tier.extension()) {
                Some(path) => item.audio_path = Some(path),
                // Informational skip, not a failure: the file is already
                // on disk or another queued item claimed the destination.
                None => item.mark_skipped("destination already exists"),
            }
        }

        let outcomes = engine.execute_tasks().await;
        let mut by_path: HashMap<_, _> = outcomes
            .into_iter()
            .map(|outcome| (outcome.path.clone(), outcome))
            .collect();

        let mut downloaded = 0;
        for item in ctx.items.iter_mut().filter(|item| item.is_live()) {
            let Some(path) = item.audio_path.clone() else {
                continue;
            };
            match by_path.remove(&path) {
                Some(outcome) if outcome.succeeded() => {
                    item.state = ItemState::Downloaded;
                    downloaded += 1;
                }
                Some(outcome) => {
                    let reason = match outcome.status {
                        TaskStatus::Failed(reason) => reason,
                        other => format!("unexpected terminal status: {other:?}"),
                    };
                    item.mark_failed(reason);
                }
                None => item.mark_failed("download produced no outcome"),
            }
        }

        if downloaded == 0 {
            warn!("No songs downloaded");
            return Ok(StageFlow::Stop);
        }
        info!("{} song(s) downloaded", downloaded.to_string().green());
        Ok(StageFlow::Continue)
    }
}

/// Walk the cascade once, best tier first. Every pending mid is asked at
/// the current tier; mids that come back with a URL are settled and
/// excluded from all lower tiers.
pub async fn negotiate_urls(
    source: &dyn TierUrlSource,
    mids: Vec<String>,
    ceiling: TierCeiling,
) -> Result<HashMap<String, SongUrl>> {
    let mut settled: HashMap<String, SongUrl> = HashMap::new();
    let mut pending = mids;

    for tier in fallback_order(ceiling) {
        if pending.is_empty() {
            break;
        }
        let urls = match source.urls(&pending, tier).await {
            Ok(urls) => urls,
            Err(err) => {
                warn!("URL negotiation failed at {}: {err:#}", tier.name());
                continue;
            }
        };

        let mut won = 0;
        for song_url in urls {
            if song_url.url.is_some() {
                pending.retain(|mid| mid != &song_url.mid);
                settled.insert(song_url.mid.clone(), song_url);
                won += 1;
            }
        }
        info!(
            "Tier {}: {} of {} song(s) available",
            tier.name(),
            won,
            won + pending.len()
        );
    }

    Ok(settled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records the batch requested at each tier and answers from a canned
    /// (mid, tier) table.
    struct FakeSource {
        available: Vec<(&'static str, QualityTier)>,
        batches: Mutex<Vec<(QualityTier, Vec<String>)>>,
    }

    #[async_trait]
    impl TierUrlSource for FakeSource {
        async fn urls(&self, mids: &[String], tier: QualityTier) -> Result<Vec<SongUrl>> {
            self.batches.lock().unwrap().push((tier, mids.to_vec()));
            Ok(mids
                .iter()
                .map(|mid| SongUrl {
                    mid: mid.clone(),
                    url: self
                        .available
                        .iter()
                        .find(|(m, t)| m == mid && *t == tier)
                        .map(|_| format!("https://cdn/{mid}")),
                    tier,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_winner_never_requested_at_lower_tiers() {
        let source = FakeSource {
            available: vec![
                ("aaa", QualityTier::Flac),
                ("bbb", QualityTier::Mp3_320),
                ("aaa", QualityTier::Mp3_320),
            ],
            batches: Mutex::new(Vec::new()),
        };

        let settled = negotiate_urls(
            &source,
            vec!["aaa".into(), "bbb".into()],
            TierCeiling::Named(QualityTier::Flac),
        )
        .await
        .unwrap();

        assert_eq!(settled["aaa"].tier, QualityTier::Flac);
        assert_eq!(settled["bbb"].tier, QualityTier::Mp3_320);

        let batches = source.batches.lock().unwrap();
        for (tier, mids) in batches.iter() {
            if tier.rank() < QualityTier::Flac.rank() {
                assert!(!mids.contains(&"aaa".to_string()), "settled mid re-requested");
            }
        }
    }

    #[tokio::test]
    async fn test_unavailable_song_left_unsettled() {
        let source = FakeSource {
            available: vec![],
            batches: Mutex::new(Vec::new()),
        };

        let settled = negotiate_urls(
            &source,
            vec!["zzz".into()],
            TierCeiling::Named(QualityTier::Mp3_128),
        )
        .await
        .unwrap();
        assert!(settled.is_empty());
    }

    #[tokio::test]
    async fn test_cascade_stops_once_all_settled() {
        let source = FakeSource {
            available: vec![("aaa", QualityTier::Master)],
            batches: Mutex::new(Vec::new()),
        };

        negotiate_urls(
            &source,
            vec!["aaa".into()],
            TierCeiling::Named(QualityTier::Master),
        )
        .await
        .unwrap();

        assert_eq!(source.batches.lock().unwrap().len(), 1);
    }
}
