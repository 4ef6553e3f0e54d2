//! Run settings resolved from the CLI surface

use std::path::PathBuf;
use std::time::Duration;

/// Download-side knobs.
#[derive(Debug, Clone)]
pub struct BasicSettings {
    pub output: PathBuf,
    pub num_workers: usize,
    pub max_retries: u32,
    /// Quality ceiling as a numeric tier rank.
    pub quality: u32,
    pub timeout: Duration,
    pub overwrite: bool,
    pub no_progress: bool,
}

/// Credential sources, in the priority order the login stage tries them.
#[derive(Debug, Clone, Default)]
pub struct LoginSettings {
    /// Inline `musicid:musickey` secret.
    pub secret: Option<String>,
    /// Interactive login flavor: `qq`, `wx` or `phone`.
    pub login_kind: Option<String>,
    pub load_path: Option<PathBuf>,
    pub save_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LyricSettings {
    pub enabled: bool,
    pub trans: bool,
    pub roma: bool,
    pub embed: bool,
    /// Keep the `.lrc` sidecar after embedding.
    pub keep_sidecar: bool,
}

#[derive(Debug, Clone)]
pub struct MetadataSettings {
    pub enabled: bool,
    pub embed_cover: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub basic: BasicSettings,
    pub login: LoginSettings,
    pub lyric: LyricSettings,
    pub metadata: MetadataSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            basic: BasicSettings {
                output: PathBuf::from("."),
                num_workers: 8,
                max_retries: 3,
                quality: 50,
                timeout: Duration::from_secs(15),
                overwrite: false,
                no_progress: false,
            },
            login: LoginSettings::default(),
            lyric: LyricSettings {
                enabled: false,
                trans: false,
                roma: false,
                embed: true,
                keep_sidecar: false,
            },
            metadata: MetadataSettings {
                enabled: true,
                embed_cover: true,
            },
        }
    }
}

/// Default location for the persisted credential when `--load`/`--save`
/// are not given: `<config dir>/tunedl/credential.json`.
pub fn default_credential_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tunedl").join("credential.json"))
}
