//! Download pipeline: ordered stages over a shared run context
//!
//! A run flows through login, link resolution, audio download and
//! metadata embedding. Each stage reads and mutates the shared
//! [`RunContext`]; a stage may stop the chain early when nothing is left
//! to do downstream. Failed work items are kept (with their reason) for
//! the end-of-run report rather than dropped.

use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::{Credential, MusicClient, Song, SongUrl};
use crate::config::Settings;

mod download;
mod login;
mod metadata;
mod resolve;

pub use download::DownloadStage;
pub use login::LoginStage;
pub use metadata::MetadataStage;
pub use resolve::ResolveStage;

/// How far one song has progressed through the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ItemState {
    Resolved,
    UrlObtained,
    Downloaded,
    Tagged,
    CoverEmbedded,
    LyricEmbedded,
}

/// One song travelling through the pipeline.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// The input URL this song came from.
    pub source_url: String,
    pub song: Song,
    pub download_url: Option<SongUrl>,
    pub audio_path: Option<PathBuf>,
    pub state: ItemState,
    /// Terminal failure reason; a failed item stays in the list for the
    /// end-of-run report but is skipped by later stages.
    pub failure: Option<String>,
    /// Informational skip (destination already on disk). Not a failure;
    /// reported separately and left out of later stages.
    pub skip: Option<String>,
}

impl WorkItem {
    pub fn new(source_url: &str, song: Song) -> Self {
        Self {
            source_url: source_url.to_string(),
            song,
            download_url: None,
            audio_path: None,
            state: ItemState::Resolved,
            failure: None,
            skip: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.failure.is_none() && self.skip.is_none()
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!("{}: {}", self.song.full_name(), reason);
        self.failure = Some(reason);
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!("{}: {}", self.song.full_name(), reason);
        self.skip = Some(reason);
    }
}

/// Shared state threaded through every stage.
pub struct RunContext {
    pub settings: Settings,
    pub client: Arc<MusicClient>,
    pub credential: Option<Credential>,
    pub input_urls: Vec<String>,
    pub items: Vec<WorkItem>,
}

impl RunContext {
    pub fn new(settings: Settings, client: Arc<MusicClient>, input_urls: Vec<String>) -> Self {
        Self {
            settings,
            client,
            credential: None,
            input_urls,
            items: Vec::new(),
        }
    }

}

/// Whether the chain continues past the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFlow {
    Continue,
    /// Nothing left for later stages; end the run after the report.
    Stop,
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, ctx: &mut RunContext) -> Result<StageFlow>;
}

/// Default stage order for a full run.
pub fn default_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(LoginStage::new()),
        Box::new(ResolveStage::new()),
        Box::new(DownloadStage::new()),
        Box::new(MetadataStage::new()),
    ]
}

/// Drive the context through the stages in order, then print the
/// end-of-run report. A `Stop` ends the chain early; stage errors
/// propagate and abort the run.
pub async fn run(ctx: &mut RunContext, stages: &[Box<dyn Stage>]) -> Result<()> {
    for stage in stages {
        debug!("Entering stage: {}", stage.name());
        match stage.process(ctx).await? {
            StageFlow::Continue => {}
            StageFlow::Stop => {
                debug!("Stage {} ended the run", stage.name());
                break;
            }
        }
    }
    report(ctx);
    Ok(())
}

/// Counts for the end-of-run summary: (downloaded, skipped, failed).
fn summarize(items: &[WorkItem]) -> (usize, usize, usize) {
    let downloaded = items
        .iter()
        .filter(|item| item.is_live() && item.state >= ItemState::Downloaded)
        .count();
    let skipped = items.iter().filter(|item| item.skip.is_some()).count();
    let failed = items.iter().filter(|item| item.failure.is_some()).count();
    (downloaded, skipped, failed)
}

/// End-of-run summary: per-item failures with reasons, then totals.
/// Skips are informational and listed apart from failures.
fn report(ctx: &RunContext) {
    for item in &ctx.items {
        if let Some(reason) = &item.failure {
            println!(
                "  {} {} ({})",
                "✗".red(),
                item.song.full_name(),
                reason.as_str().dimmed()
            );
        } else if let Some(reason) = &item.skip {
            println!(
                "  {} {} ({})",
                "-".yellow(),
                item.song.full_name(),
                reason.as_str().dimmed()
            );
        }
    }

    let (downloaded, skipped, failed) = summarize(&ctx.items);
    if ctx.items.is_empty() {
        info!("Nothing to download");
    } else {
        info!(
            "Finished: {} downloaded, {} skipped, {} failed",
            downloaded.to_string().green(),
            skipped.to_string().yellow(),
            failed.to_string().red()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingStage {
        name: &'static str,
        flow: StageFlow,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Stage for RecordingStage {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn process(&self, _ctx: &mut RunContext) -> Result<StageFlow> {
            self.log.lock().unwrap().push(self.name);
            Ok(self.flow)
        }
    }

    fn test_context() -> RunContext {
        let client = Arc::new(MusicClient::new(Duration::from_secs(1)).unwrap());
        RunContext::new(Settings::default(), client, vec![])
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(RecordingStage {
                name: "first",
                flow: StageFlow::Continue,
                log: log.clone(),
            }),
            Box::new(RecordingStage {
                name: "second",
                flow: StageFlow::Continue,
                log: log.clone(),
            }),
        ];

        let mut ctx = test_context();
        run(&mut ctx, &stages).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_stop_short_circuits_later_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(RecordingStage {
                name: "first",
                flow: StageFlow::Stop,
                log: log.clone(),
            }),
            Box::new(RecordingStage {
                name: "second",
                flow: StageFlow::Continue,
                log: log.clone(),
            }),
        ];

        let mut ctx = test_context();
        run(&mut ctx, &stages).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_failed_items_are_kept_with_reason() {
        let mut ctx = test_context();
        let song = Song {
            id: 1,
            mid: "abc".into(),
            name: "Song".into(),
            title: "Song".into(),
            singer: vec![],
            album: Default::default(),
            interval: 0,
        };
        ctx.items.push(WorkItem::new("url", song));
        ctx.items[0].mark_failed("no playable url");

        assert_eq!(ctx.items.len(), 1);
        assert!(!ctx.items[0].is_live());
        assert_eq!(ctx.items[0].failure.as_deref(), Some("no playable url"));
    }

    #[test]
    fn test_skipped_items_are_not_failures() {
        let song = |mid: &str| Song {
            id: 0,
            mid: mid.into(),
            name: mid.into(),
            title: mid.into(),
            singer: vec![],
            album: Default::default(),
            interval: 0,
        };

        let mut downloaded = WorkItem::new("url", song("a"));
        downloaded.state = ItemState::Downloaded;
        let mut skipped = WorkItem::new("url", song("b"));
        skipped.mark_skipped("destination already exists");
        let mut failed = WorkItem::new("url", song("c"));
        failed.mark_failed("no playable URL at any allowed quality");

        assert!(skipped.failure.is_none());
        assert!(!skipped.is_live());

        let items = vec![downloaded, skipped, failed];
        assert_eq!(summarize(&items), (1, 1, 1));
    }
}
