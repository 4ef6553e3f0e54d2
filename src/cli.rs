//! CLI surface and its mapping onto run settings

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::config::{BasicSettings, LoginSettings, LyricSettings, MetadataSettings, Settings};

#[derive(Parser, Debug)]
#[command(name = "tunedl", about = "Download songs, albums and playlists from QQ Music links")]
#[command(version, author)]
pub struct Cli {
    /// Song, album, playlist, artist or chart links
    #[arg(value_name = "URL", required = true)]
    pub urls: Vec<String>,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Number of parallel downloads
    #[arg(short = 'n', long, default_value = "8")]
    pub num_workers: usize,

    /// Maximum quality tier rank to attempt (falls back to lower tiers)
    #[arg(short, long, default_value = "50")]
    pub quality: u32,

    /// Overwrite existing files
    #[arg(short = 'w', long)]
    pub overwrite: bool,

    /// Request timeout in seconds
    #[arg(long, default_value = "15")]
    pub timeout: u64,

    /// Attempts per download, first try included
    #[arg(long, default_value = "3")]
    pub max_retries: u32,

    /// Fetch lyrics
    #[arg(long)]
    pub lyric: bool,

    /// Include the translated lyric variant (implies --lyric)
    #[arg(long)]
    pub trans: bool,

    /// Include the romanized lyric variant (implies --lyric)
    #[arg(long)]
    pub roma: bool,

    /// Keep lyrics in a .lrc sidecar instead of embedding them
    #[arg(long)]
    pub no_embed_lyric: bool,

    /// Keep the .lrc sidecar even after embedding
    #[arg(long)]
    pub keep_lrc: bool,

    /// Skip writing tags into downloaded files
    #[arg(long)]
    pub no_metadata: bool,

    /// Skip embedding cover art
    #[arg(long)]
    pub no_cover: bool,

    /// Inline credential as musicid:musickey
    #[arg(short = 'c', long = "cookies", value_name = "MUSICID:MUSICKEY",
          env = "TUNEDL_COOKIES", conflicts_with_all = ["login", "load"])]
    pub cookies: Option<String>,

    /// Log in interactively
    #[arg(long, value_parser = ["qq", "wx", "phone"], conflicts_with = "load")]
    pub login: Option<String>,

    /// Load a saved credential file
    #[arg(long, value_name = "FILE")]
    pub load: Option<PathBuf>,

    /// Save the credential after a successful login
    #[arg(long, value_name = "FILE")]
    pub save: Option<PathBuf>,

    /// Disable progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Fold the flags into structured run settings.
    pub fn to_settings(&self) -> Settings {
        Settings {
            basic: BasicSettings {
                output: self.output.clone(),
                num_workers: self.num_workers.max(1),
                max_retries: self.max_retries.max(1),
                quality: self.quality,
                timeout: Duration::from_secs(self.timeout),
                overwrite: self.overwrite,
                no_progress: self.no_progress,
            },
            login: LoginSettings {
                secret: self.cookies.clone(),
                login_kind: self.login.clone(),
                load_path: self.load.clone(),
                save_path: self.save.clone(),
            },
            lyric: LyricSettings {
                enabled: self.lyric || self.trans || self.roma,
                trans: self.trans,
                roma: self.roma,
                embed: !self.no_embed_lyric,
                keep_sidecar: self.keep_lrc,
            },
            metadata: MetadataSettings {
                enabled: !self.no_metadata,
                embed_cover: !self.no_metadata && !self.no_cover,
            },
        }
    }

    /// Dump the effective parameters at startup, secret redacted.
    pub fn log_parameters(&self) {
        info!("urls        = {:?}", self.urls);
        info!("output      = {}", self.output.display());
        info!("num_workers = {}", self.num_workers);
        info!("quality     = {}", self.quality);
        info!("overwrite   = {}", self.overwrite);
        info!("timeout     = {}s", self.timeout);
        info!("max_retries = {}", self.max_retries);
        info!(
            "lyric       = {} (trans={}, roma={}, embed={}, keep_lrc={})",
            self.lyric, self.trans, self.roma, !self.no_embed_lyric, self.keep_lrc
        );
        info!("metadata    = {} (cover={})", !self.no_metadata, !self.no_cover);
        info!(
            "cookies     = {}",
            if self.cookies.is_some() { "<redacted>" } else { "<none>" }
        );
        info!("login       = {:?}", self.login);
        info!("load        = {:?}", self.load);
        info!("save        = {:?}", self.save);
    }
}
