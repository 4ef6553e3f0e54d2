//! Service credentials and request signing
//!
//! Credentials are the `musicid`/`musickey` pair the service issues after
//! a QR or phone login. They serialize to a portable JSON text form so a
//! login survives across runs via `--save`/`--load`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::DownloadError;

/// Issued login credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub musicid: u64,
    pub musickey: String,
    #[serde(default)]
    pub refresh_key: Option<String>,
    /// When this credential was last issued or refreshed.
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(musicid: u64, musickey: String) -> Self {
        Self {
            musicid,
            musickey,
            refresh_key: None,
            issued_at: Some(Utc::now()),
        }
    }

    /// Parse the inline `musicid:musickey` secret form.
    pub fn from_secret(secret: &str) -> Result<Self, DownloadError> {
        let (id, key) = secret.split_once(':').ok_or_else(|| {
            DownloadError::Validation(
                "credential must be 'musicid:musickey' joined by ':'".to_string(),
            )
        })?;
        let musicid: u64 = id.trim().parse().map_err(|_| {
            DownloadError::Validation(format!("musicid '{id}' is not a number"))
        })?;
        if key.trim().is_empty() {
            return Err(DownloadError::Validation("musickey is empty".to_string()));
        }
        Ok(Self::new(musicid, key.trim().to_string()))
    }

    /// Whether the credential carries both fields needed for API calls.
    pub fn is_usable(&self) -> bool {
        self.musicid != 0 && !self.musickey.is_empty()
    }

    /// Portable text form persisted to the credential file.
    pub fn to_text(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize credential")
    }

    pub fn from_text(text: &str) -> Result<Self> {
        serde_json::from_str(text.trim()).context("Failed to parse credential file")
    }
}

/// Sign a request payload the way the service's web clients do:
/// lowercase hex MD5 over a fixed salt plus the serialized body.
pub fn sign_payload(payload: &str) -> String {
    const SIGN_SALT: &str = "CJBPACrRuNy7";
    let mut hasher = Md5::new();
    hasher.update(SIGN_SALT.as_bytes());
    hasher.update(payload.as_bytes());
    format!("zzb{}", hex::encode(hasher.finalize()))
}
