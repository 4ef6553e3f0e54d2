//! Music service HTTP client
//!
//! Thin wrapper over the service's unified JSON gateway: every call posts
//! a signed `{comm, req_1}` envelope and unwraps `req_1.data`. Only the
//! operations the pipeline needs are exposed; everything else the service
//! offers is out of scope.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::auth::{sign_payload, Credential};
use super::models::{Lyric, Song, SongMetadata, SongUrl};
use crate::error::DownloadError;
use crate::quality::QualityTier;

/// Unified API gateway.
const API_BASE: &str = "https://u.y.qq.com/cgi-bin/musicu.fcg";

/// QR image / poll endpoints for third-party login.
const QR_SHOW_URL: &str = "https://ssl.ptlogin2.qq.com/ptqrshow";
const QR_POLL_URL: &str = "https://ssl.ptlogin2.qq.com/ptqrlogin";

/// Stream host used when the URL endpoint returns relative paths.
const STREAM_HOST: &str = "https://isure.stream.qqmusic.qq.com/";

/// Third-party login flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginKind {
    Qq,
    Wx,
}

impl LoginKind {
    fn appid(&self) -> &'static str {
        match self {
            LoginKind::Qq => "716027609",
            LoginKind::Wx => "wx48db31d50e334801",
        }
    }
}

/// An issued QR code awaiting scan.
#[derive(Debug, Clone)]
pub struct QrCode {
    pub kind: LoginKind,
    /// Opaque ticket the poll endpoint correlates on.
    pub identifier: String,
    /// PNG image bytes to present to the user.
    pub image: Vec<u8>,
}

/// One poll of a pending QR login.
#[derive(Debug, Clone)]
pub enum QrPollState {
    Waiting,
    Scanned,
    Done(Credential),
    Refused,
    Timeout,
}

/// Outcome of requesting a phone auth code.
#[derive(Debug, Clone)]
pub enum PhoneCodeState {
    Sent,
    /// The service wants a captcha solved in a browser first.
    CaptchaRequired(String),
}

pub struct MusicClient {
    http_client: Client,
    base_url: String,
}

impl MusicClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("tunedl/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: API_BASE.to_string(),
        })
    }

    /// Post one signed envelope and unwrap `req_1.data`.
    async fn request(
        &self,
        module: &str,
        method: &str,
        param: Value,
        credential: Option<&Credential>,
    ) -> Result<Value> {
        let mut comm = json!({
            "cv": 4747474,
            "ct": 24,
            "format": "json",
            "platform": "yqq.json",
            "uin": credential.map(|c| c.musicid).unwrap_or(0),
        });
        if let Some(cred) = credential {
            comm["authst"] = Value::String(cred.musickey.clone());
            comm["tmeLoginType"] = Value::String("2".to_string());
        }

        let body = json!({
            "comm": comm,
            "req_1": { "module": module, "method": method, "param": param },
        });
        let payload = body.to_string();
        let sign = sign_payload(&payload);

        debug!("API call {}::{}", module, method);
        let mut response: Value = self
            .http_client
            .post(format!("{}?sign={}", self.base_url, sign))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .with_context(|| format!("Request to {module}::{method} failed"))?
            .error_for_status()
            .with_context(|| format!("{module}::{method} rejected"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {module}::{method} response"))?;

        let code = response["code"].as_i64().unwrap_or(-1);
        if code != 0 {
            bail!("Service error {code} from {module}::{method}");
        }
        let req_code = response["req_1"]["code"].as_i64().unwrap_or(-1);
        if req_code != 0 {
            bail!("Service error {req_code} from {module}::{method}");
        }
        Ok(response["req_1"]["data"].take())
    }

    /// Fetch full song records for a batch of song mids.
    pub async fn songs_by_mid(&self, mids: &[String]) -> Result<Vec<Song>> {
        let data = self
            .request(
                "music.trackInfo.UniformRuleCtrl",
                "CgiGetTrackInfo",
                json!({ "mids": mids, "types": vec![0; mids.len()] }),
                None,
            )
            .await?;
        parse_songs(&data["tracks"])
    }

    /// All songs of an album.
    pub async fn album_songs(&self, album_mid: &str) -> Result<Vec<Song>> {
        let data = self
            .request(
                "music.musichallAlbum.AlbumSongList",
                "GetAlbumSongList",
                json!({ "albumMid": album_mid, "begin": 0, "num": 1000, "order": 2 }),
                None,
            )
            .await?;
        parse_wrapped_songs(&data["songList"])
    }

    /// All songs of a playlist.
    pub async fn playlist_songs(&self, playlist_id: u64) -> Result<Vec<Song>> {
        let data = self
            .request(
                "music.srfDissInfo.aiDissInfo",
                "uniform_get_Dissinfo",
                json!({ "disstid": playlist_id, "song_begin": 0, "song_num": 1000, "userinfo": 1, "tag": 1 }),
                None,
            )
            .await?;
        parse_songs(&data["songlist"])
    }

    /// An artist's songs, most popular first.
    pub async fn artist_songs(&self, singer_mid: &str) -> Result<Vec<Song>> {
        let data = self
            .request(
                "musichall.song_list_server",
                "GetSingerSongList",
                json!({ "singerMid": singer_mid, "begin": 0, "num": 100, "order": 1 }),
                None,
            )
            .await?;
        parse_wrapped_songs(&data["songList"])
    }

    /// Entries of a chart (toplist).
    pub async fn chart_songs(&self, top_id: u64) -> Result<Vec<Song>> {
        let data = self
            .request(
                "musicToplist.ToplistInfoServer",
                "GetDetail",
                json!({ "topId": top_id, "offset": 0, "num": 100 }),
                None,
            )
            .await?;
        parse_songs(&data["songInfoList"])
    }

    /// Negotiate playable URLs for a batch of songs at one quality tier.
    /// A song missing from the reply, or returned with an empty path,
    /// comes back with `url: None` (tier unavailable).
    pub async fn download_urls(
        &self,
        mids: &[String],
        tier: QualityTier,
        credential: Option<&Credential>,
    ) -> Result<Vec<SongUrl>> {
        let filenames: Vec<String> = mids
            .iter()
            .map(|mid| format!("{}{}{}{}", tier_prefix(tier), mid, mid, tier.extension()))
            .collect();

        let data = self
            .request(
                "music.vkey.GetVkey",
                "UrlGetVkey",
                json!({
                    "filename": filenames,
                    "guid": "tunedl",
                    "songmid": mids,
                    "songtype": vec![0; mids.len()],
                }),
                credential,
            )
            .await?;

        let host = data["sip"]
            .as_array()
            .and_then(|hosts| hosts.first())
            .and_then(Value::as_str)
            .unwrap_or(STREAM_HOST)
            .to_string();

        let mut urls = Vec::with_capacity(mids.len());
        let infos = data["midurlinfo"].as_array().cloned().unwrap_or_default();
        for mid in mids {
            let purl = infos
                .iter()
                .find(|info| info["songmid"].as_str() == Some(mid))
                .and_then(|info| info["purl"].as_str())
                .filter(|purl| !purl.is_empty());
            urls.push(SongUrl {
                mid: mid.clone(),
                url: purl.map(|p| format!("{host}{p}")),
                tier,
            });
        }
        Ok(urls)
    }

    /// Descriptive tags for one song.
    pub async fn song_metadata(&self, mid: &str) -> Result<SongMetadata> {
        let data = self
            .request(
                "music.pf_song_detail_svr",
                "get_song_detail_yqq",
                json!({ "song_mid": mid }),
                None,
            )
            .await?;

        let track = &data["track_info"];
        let info = &data["info"];

        let mut metadata = SongMetadata {
            title: track["title"]
                .as_str()
                .or_else(|| track["name"].as_str())
                .unwrap_or_default()
                .to_string(),
            ..Default::default()
        };
        if let Some(singers) = track["singer"].as_array() {
            metadata.artists = singers
                .iter()
                .filter_map(|s| s["name"].as_str())
                .map(str::to_string)
                .collect();
            metadata.album_artists = metadata.artists.clone();
        }
        if let Some(album) = track["album"]["name"].as_str().filter(|n| !n.is_empty()) {
            metadata.album = Some(album.to_string());
        }
        if let Some(index) = track["index_album"].as_u64().filter(|n| *n > 0) {
            metadata.track_number = Some(index as u32);
        }
        if let Some(index) = track["index_cd"].as_u64().filter(|n| *n > 0) {
            metadata.disc_number = Some(index as u32);
        }
        metadata.genre = pick_info_value(info, "genre");
        metadata.company = pick_info_value(info, "company");
        metadata.release_date = track["time_public"]
            .as_str()
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .or_else(|| pick_info_value(info, "pub_time"));

        Ok(metadata)
    }

    /// Lyric payload for one song; any variant may be absent.
    pub async fn lyric(&self, mid: &str, trans: bool, roma: bool) -> Result<Lyric> {
        let data = self
            .request(
                "music.musichallSong.PlayLyricInfo",
                "GetPlayLyricInfo",
                json!({
                    "songMid": mid,
                    "qrc": 0,
                    "trans": trans as u8,
                    "roma": roma as u8,
                }),
                None,
            )
            .await?;
        serde_json::from_value(data).context("Failed to parse lyric payload")
    }

    /// Issue a login QR code for scanning.
    pub async fn qr_create(&self, kind: LoginKind) -> Result<QrCode> {
        let response = self
            .http_client
            .get(QR_SHOW_URL)
            .query(&[
                ("appid", kind.appid()),
                ("e", "2"),
                ("l", "M"),
                ("s", "3"),
                ("d", "72"),
                ("v", "4"),
            ])
            .send()
            .await
            .context("Failed to request login QR code")?
            .error_for_status()
            .context("QR code endpoint rejected the request")?;

        let identifier = response
            .cookies()
            .find(|c| c.name() == "qrsig")
            .map(|c| c.value().to_string())
            .unwrap_or_default();
        if identifier.is_empty() {
            bail!("QR code response carried no ticket");
        }

        let image = response
            .bytes()
            .await
            .context("Failed to read QR image")?
            .to_vec();

        Ok(QrCode {
            kind,
            identifier,
            image,
        })
    }

    /// Poll a pending QR login once.
    pub async fn qr_poll(&self, qr: &QrCode) -> Result<QrPollState> {
        let text = self
            .http_client
            .get(QR_POLL_URL)
            .query(&[
                ("appid", qr.kind.appid()),
                ("qrsig", qr.identifier.as_str()),
                ("from_ui", "1"),
                ("action", "0-0"),
            ])
            .send()
            .await
            .context("QR poll request failed")?
            .text()
            .await
            .context("Failed to read QR poll response")?;

        // The endpoint answers with a ptuiCB('<code>', ...) blob.
        let state = match poll_code(&text) {
            Some("66") => QrPollState::Waiting,
            Some("67") => QrPollState::Scanned,
            Some("65") => QrPollState::Timeout,
            Some("68") => QrPollState::Refused,
            Some("0") => {
                let credential = self.exchange_login_ticket(&text).await?;
                QrPollState::Done(credential)
            }
            other => {
                debug!("Unknown QR poll code {:?}", other);
                QrPollState::Waiting
            }
        };
        Ok(state)
    }

    /// Trade a confirmed login ticket for a service credential.
    async fn exchange_login_ticket(&self, ticket_blob: &str) -> Result<Credential> {
        let data = self
            .request(
                "music.login.LoginServer",
                "Login",
                json!({ "code": ticket_blob, "loginMode": 2 }),
                None,
            )
            .await?;
        credential_from_login_data(&data)
    }

    /// Ask the service to text an auth code to a phone number.
    pub async fn send_phone_code(&self, phone: &str) -> Result<PhoneCodeState> {
        let data = self
            .request(
                "music.login.LoginServer",
                "SendPhoneAuthCode",
                json!({ "tmeAppid": "qqmusic", "phoneNo": phone, "areaCode": "86" }),
                None,
            )
            .await?;

        if let Some(url) = data["securityURL"].as_str().filter(|u| !u.is_empty()) {
            return Ok(PhoneCodeState::CaptchaRequired(url.to_string()));
        }
        Ok(PhoneCodeState::Sent)
    }

    /// Complete a phone login with the received code.
    pub async fn phone_authorize(&self, phone: &str, code: &str) -> Result<Credential> {
        let data = self
            .request(
                "music.login.LoginServer",
                "Login",
                json!({ "code": code, "phoneNo": phone, "loginMode": 1 }),
                None,
            )
            .await?;
        credential_from_login_data(&data)
    }

    /// Refresh an expired credential; returns the replacement.
    pub async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let data = self
            .request(
                "music.login.LoginServer",
                "Login",
                json!({
                    "refresh_key": credential.refresh_key.clone().unwrap_or_default(),
                    "musicid": credential.musicid,
                    "musickey": credential.musickey,
                    "loginMode": 2,
                }),
                Some(credential),
            )
            .await?;
        credential_from_login_data(&data)
    }

    /// Cheap authenticated request; a rejection means the key has expired.
    pub async fn validate(&self, credential: &Credential) -> bool {
        self.request(
            "music.UserInfo.userInfoServer",
            "GetLoginUserInfo",
            json!({}),
            Some(credential),
        )
        .await
        .is_ok()
    }
}

/// Tier-specific filename prefix the URL endpoint expects.
fn tier_prefix(tier: QualityTier) -> &'static str {
    match tier {
        QualityTier::Master => "AI00",
        QualityTier::Atmos2 => "Q000",
        QualityTier::Atmos51 => "Q001",
        QualityTier::Flac => "F000",
        QualityTier::Ogg640 => "O801",
        QualityTier::Ogg320 => "O800",
        QualityTier::Ogg192 => "O600",
        QualityTier::Ogg96 => "O400",
        QualityTier::Mp3_320 => "M800",
        QualityTier::Mp3_128 => "M500",
        QualityTier::Aac192 => "C600",
        QualityTier::Aac96 => "C400",
        QualityTier::Aac48 => "C200",
    }
}

fn parse_songs(value: &Value) -> Result<Vec<Song>> {
    serde_json::from_value(value.clone().take()).context("Failed to parse song list")
}

/// Some endpoints nest each song under a `songInfo` wrapper.
fn parse_wrapped_songs(value: &Value) -> Result<Vec<Song>> {
    let entries = value.as_array().cloned().unwrap_or_default();
    entries
        .into_iter()
        .map(|entry| {
            serde_json::from_value(entry["songInfo"].clone()).context("Failed to parse song entry")
        })
        .collect()
}

fn pick_info_value(info: &Value, key: &str) -> Option<String> {
    info[key]["content"]
        .as_array()
        .and_then(|items| items.first())
        .and_then(|item| item["value"].as_str())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn poll_code(text: &str) -> Option<&str> {
    let start = text.find('\'')? + 1;
    let end = text[start..].find('\'')? + start;
    Some(&text[start..end])
}

fn credential_from_login_data(data: &Value) -> Result<Credential> {
    let musicid = data["musicid"]
        .as_u64()
        .or_else(|| data["musicid"].as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0);
    let musickey = data["musickey"].as_str().unwrap_or_default().to_string();

    let mut credential = Credential::new(musicid, musickey);
    credential.refresh_key = data["refresh_key"]
        .as_str()
        .filter(|k| !k.is_empty())
        .map(str::to_string);

    if !credential.is_usable() {
        return Err(DownloadError::Auth("login reply carried no usable credential".into()).into());
    }
    Ok(credential)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_code_extraction() {
        assert_eq!(poll_code("ptuiCB('66','0','','0','waiting')"), Some("66"));
        assert_eq!(poll_code("ptuiCB('0','0','https://x','0','ok')"), Some("0"));
        assert_eq!(poll_code("garbage"), None);
    }

    #[test]
    fn test_credential_from_login_data() {
        let data = json!({ "musicid": 7, "musickey": "k", "refresh_key": "r" });
        let cred = credential_from_login_data(&data).unwrap();
        assert_eq!(cred.musicid, 7);
        assert_eq!(cred.refresh_key.as_deref(), Some("r"));

        let bad = json!({ "musicid": 0, "musickey": "" });
        assert!(credential_from_login_data(&bad).is_err());
    }

    #[test]
    fn test_tier_prefixes_are_distinct() {
        use std::collections::HashSet;
        let tiers = [
            QualityTier::Master,
            QualityTier::Flac,
            QualityTier::Ogg320,
            QualityTier::Mp3_320,
            QualityTier::Mp3_128,
            QualityTier::Aac48,
        ];
        let prefixes: HashSet<_> = tiers.iter().map(|t| tier_prefix(*t)).collect();
        assert_eq!(prefixes.len(), tiers.len());
    }
}
