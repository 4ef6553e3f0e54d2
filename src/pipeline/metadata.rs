//! Metadata stage: tag, cover and lyric enrichment for downloaded files
//!
//! Runs in three passes over the downloaded items: tag writes, cover
//! embedding, lyric handling. Cover images go through the same download
//! engine as audio, so an album's shared cover is fetched once
//! (destination dedup), under the run's worker bound and retry policy.
//! Enrichment is best-effort: a failed tag write or missing lyric logs a
//! warning and leaves the audio file in place rather than failing the
//! item.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{ItemState, RunContext, Stage, StageFlow};
use crate::api::{cover_url, MusicClient, Song};
use crate::config::Settings;
use crate::download::{DownloadConfig, DownloadEngine};
use crate::tag;

pub struct MetadataStage;

impl MetadataStage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MetadataStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for MetadataStage {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn process(&self, ctx: &mut RunContext) -> Result<StageFlow> {
        if !ctx.settings.metadata.enabled && !ctx.settings.lyric.enabled {
            return Ok(StageFlow::Continue);
        }

        let jobs: Vec<(usize, Song, PathBuf)> = ctx
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_live() && item.state == ItemState::Downloaded)
            .filter_map(|(idx, item)| {
                item.audio_path.clone().map(|p| (idx, item.song.clone(), p))
            })
            .collect();
        if jobs.is_empty() {
            return Ok(StageFlow::Continue);
        }

        if ctx.settings.metadata.enabled {
            let tagged = join_all(jobs.iter().map(|(idx, song, path)| {
                let client = ctx.client.clone();
                async move { (*idx, write_tags(&client, song, path).await) }
            }))
            .await;
            for (idx, result) in tagged {
                match result {
                    Ok(()) => {
                        debug!("Tagged {}", ctx.items[idx].song.full_name());
                        ctx.items[idx].state = ItemState::Tagged;
                    }
                    Err(err) => {
                        warn!("Failed to tag {}: {err:#}", ctx.items[idx].song.full_name())
                    }
                }
            }

            if ctx.settings.metadata.embed_cover {
                let embedded = embed_covers(&ctx.settings, &jobs).await?;
                for idx in embedded {
                    ctx.items[idx].state = ItemState::CoverEmbedded;
                }
            }
        }

        if ctx.settings.lyric.enabled {
            let written = join_all(jobs.iter().map(|(idx, song, path)| {
                let client = ctx.client.clone();
                let settings = ctx.settings.clone();
                async move { (*idx, handle_lyric(&client, &settings, song, path).await) }
            }))
            .await;
            for (idx, result) in written {
                let name = ctx.items[idx].song.full_name();
                match result {
                    Ok(true) => {
                        debug!("Wrote lyrics for {name}");
                        ctx.items[idx].state = ItemState::LyricEmbedded;
                    }
                    Ok(false) => debug!("No lyrics available for {name}"),
                    Err(err) => warn!("Failed to write lyrics for {name}: {err:#}"),
                }
            }
        }

        info!("Metadata pass complete");
        Ok(StageFlow::Continue)
    }
}

async fn write_tags(client: &MusicClient, song: &Song, audio_path: &Path) -> Result<()> {
    let metadata = client.song_metadata(&song.mid).await?;
    let path = audio_path.to_path_buf();
    tokio::task::spawn_blocking(move || tag::write_metadata(&path, &metadata))
        .await
        .context("Tag write task panicked")?
}

/// Fetch every distinct cover once through the download engine, embed it
/// into each item's audio file, then remove the temporary image files.
/// Returns the indices of items whose cover was embedded.
async fn embed_covers(settings: &Settings, jobs: &[(usize, Song, PathBuf)]) -> Result<Vec<usize>> {
    let engine = cover_engine(settings)?;
    let covers = queue_covers(&engine, jobs);
    if covers.is_empty() {
        return Ok(Vec::new());
    }

    let fetched: HashSet<PathBuf> = engine
        .execute_tasks()
        .await
        .into_iter()
        .filter(|outcome| outcome.succeeded())
        .map(|outcome| outcome.path)
        .collect();

    let results = join_all(jobs.iter().filter_map(|(idx, song, audio_path)| {
        let cover_path = covers.get(idx).filter(|p| fetched.contains(*p))?.clone();
        let audio_path = audio_path.clone();
        let name = song.full_name();
        Some(async move {
            match embed_one_cover(&audio_path, &cover_path).await {
                Ok(()) => {
                    debug!("Embedded cover for {name}");
                    Some(*idx)
                }
                Err(err) => {
                    warn!("Failed to embed cover for {name}: {err:#}");
                    None
                }
            }
        })
    }))
    .await;

    for path in &fetched {
        let _ = tokio::fs::remove_file(path).await;
    }

    Ok(results.into_iter().flatten().collect())
}

fn cover_engine(settings: &Settings) -> Result<DownloadEngine> {
    DownloadEngine::new(DownloadConfig {
        save_dir: settings.basic.output.clone(),
        num_workers: settings.basic.num_workers,
        max_retries: settings.basic.max_retries,
        timeout: settings.basic.timeout,
        // Cover files are transient fetch targets, always refreshed.
        overwrite: true,
        show_progress: false,
        ..Default::default()
    })
}

/// Queue one download per distinct cover URL and map each item index to
/// its cover's destination. Items sharing an album map to the same path.
fn queue_covers(
    engine: &DownloadEngine,
    jobs: &[(usize, Song, PathBuf)],
) -> HashMap<usize, PathBuf> {
    let mut by_url: HashMap<String, PathBuf> = HashMap::new();
    let mut covers = HashMap::new();

    for (idx, song, _) in jobs {
        let Some(url) = cover_url(song) else {
            debug!("No cover available for {}", song.full_name());
            continue;
        };
        if let Some(path) = by_url.get(&url) {
            covers.insert(*idx, path.clone());
        } else if let Some(path) = engine.add_task(&url, &cover_stem(&url), ".jpg") {
            by_url.insert(url, path.clone());
            covers.insert(*idx, path);
        }
    }
    covers
}

/// Filename stem for a cover image: the picture id segment of its URL.
fn cover_stem(url: &str) -> String {
    url.rsplit('/')
        .next()
        .unwrap_or(url)
        .trim_end_matches(".jpg")
        .to_string()
}

async fn embed_one_cover(audio_path: &Path, cover_path: &Path) -> Result<()> {
    let image = tokio::fs::read(cover_path)
        .await
        .with_context(|| format!("Failed to read cover file: {}", cover_path.display()))?;
    let path = audio_path.to_path_buf();
    tokio::task::spawn_blocking(move || tag::embed_cover(&path, &image))
        .await
        .context("Cover embed task panicked")?
}

/// Fetch lyrics, write the `.lrc` sidecar and optionally embed. The
/// sidecar is removed after a successful embed unless configured to stay.
async fn handle_lyric(
    client: &MusicClient,
    settings: &Settings,
    song: &Song,
    audio_path: &Path,
) -> Result<bool> {
    let lyric = client
        .lyric(&song.mid, settings.lyric.trans, settings.lyric.roma)
        .await?;
    let Some(text) = lyric.merged(settings.lyric.trans, settings.lyric.roma) else {
        return Ok(false);
    };

    let sidecar = audio_path.with_extension("lrc");
    tokio::fs::write(&sidecar, &text)
        .await
        .with_context(|| format!("Failed to write {}", sidecar.display()))?;

    if settings.lyric.embed {
        let path = audio_path.to_path_buf();
        tokio::task::spawn_blocking(move || tag::embed_lyric(&path, &text))
            .await
            .context("Lyric embed task panicked")??;

        if !settings.lyric.keep_sidecar {
            let _ = tokio::fs::remove_file(&sidecar).await;
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AlbumRef, Singer};
    use tempfile::tempdir;

    fn song_on_album(mid: &str, album_mid: &str) -> Song {
        Song {
            id: 0,
            mid: mid.into(),
            name: mid.into(),
            title: mid.into(),
            singer: vec![Singer {
                id: 1,
                mid: "singer".into(),
                name: "Artist".into(),
                title: "Artist".into(),
            }],
            album: AlbumRef {
                mid: album_mid.into(),
                ..Default::default()
            },
            interval: 0,
        }
    }

    #[test]
    fn test_shared_album_cover_queued_once() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.basic.output = dir.path().to_path_buf();
        let engine = cover_engine(&settings).unwrap();

        let jobs = vec![
            (0, song_on_album("a", "album1"), PathBuf::from("a.mp3")),
            (1, song_on_album("b", "album1"), PathBuf::from("b.mp3")),
            (2, song_on_album("c", "album2"), PathBuf::from("c.mp3")),
        ];
        let covers = queue_covers(&engine, &jobs);

        // Every item got a destination, but the shared album collapsed
        // onto one file.
        assert_eq!(covers.len(), 3);
        assert_eq!(covers[&0], covers[&1]);
        assert_ne!(covers[&0], covers[&2]);

        let distinct: HashSet<&PathBuf> = covers.values().collect();
        assert_eq!(distinct.len(), 2);
    }

    #[test]
    fn test_cover_stem_uses_picture_id() {
        assert_eq!(
            cover_stem("https://y.gtimg.cn/music/photo_new/T002R500x500M000abc.jpg"),
            "T002R500x500M000abc"
        );
    }
}
