//! Login stage: establish a credential before any authenticated call
//!
//! Credential sources, in order: inline `musicid:musickey` secret,
//! interactive login (QR scan or phone code), then a saved credential
//! file. A stale credential is refreshed when possible; if every source
//! fails the run continues anonymously, limited to freely streamable
//! tiers. This stage never ends the chain.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use dialoguer::Input;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{RunContext, Stage, StageFlow};
use crate::api::{Credential, LoginKind, MusicClient, PhoneCodeState, QrPollState};
use crate::config::default_credential_path;

/// QR poll cadence.
const QR_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct LoginStage;

impl LoginStage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoginStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for LoginStage {
    fn name(&self) -> &'static str {
        "login"
    }

    async fn process(&self, ctx: &mut RunContext) -> Result<StageFlow> {
        let obtained = obtain_credential(ctx).await?;

        let mut credential = None;
        if let Some(obtained) = obtained {
            match ensure_fresh(&ctx.client, obtained.credential).await {
                Some((cred, refreshed)) => {
                    let changed = obtained.newly_issued || refreshed;
                    let target = save_destination(
                        changed,
                        ctx.settings.login.save_path.as_ref(),
                        obtained.origin.as_ref(),
                    );
                    if let Some(target) = target {
                        if let Err(err) = save_credential(&cred, &target) {
                            warn!("Failed to save credential: {err:#}");
                        }
                    }
                    credential = Some(cred);
                }
                None => {
                    warn!("Credential expired and could not be refreshed, continuing anonymously")
                }
            }
        }

        if let Some(cred) = &credential {
            info!("Logged in as account {}", cred.musicid);
        } else {
            debug!("Running anonymously; premium quality tiers are unavailable");
        }

        ctx.credential = credential;
        Ok(StageFlow::Continue)
    }
}

/// A credential plus where it came from, for the save-on-change decision.
struct ObtainedCredential {
    credential: Credential,
    /// Issued by an interactive login this run.
    newly_issued: bool,
    /// File the credential was loaded from, if any.
    origin: Option<PathBuf>,
}

/// Try the credential sources in priority order. Interactive-login
/// failures (refused scan, expired QR) degrade to anonymous; only a
/// malformed inline secret is a hard error.
async fn obtain_credential(ctx: &RunContext) -> Result<Option<ObtainedCredential>> {
    let login = &ctx.settings.login;

    if let Some(secret) = &login.secret {
        // A malformed inline secret is a usage error, not a degradation.
        let cred = Credential::from_secret(secret)?;
        return Ok(Some(ObtainedCredential {
            credential: cred,
            newly_issued: false,
            origin: None,
        }));
    }

    if let Some(kind) = &login.login_kind {
        return match interactive_login(&ctx.client, kind).await {
            Ok(cred) => Ok(Some(ObtainedCredential {
                credential: cred,
                newly_issued: true,
                origin: None,
            })),
            Err(err) => {
                warn!("Interactive login failed: {err:#}, continuing anonymously");
                Ok(None)
            }
        };
    }

    let path = login
        .load_path
        .clone()
        .or_else(|| default_credential_path().filter(|p| p.exists()));
    if let Some(path) = path {
        match load_credential(&path) {
            Ok(cred) => {
                debug!("Loaded credential from {}", path.display());
                return Ok(Some(ObtainedCredential {
                    credential: cred,
                    newly_issued: false,
                    origin: Some(path),
                }));
            }
            Err(err) => warn!("Ignoring unreadable credential file: {err:#}"),
        }
    }

    Ok(None)
}

/// Where to persist the credential, if anywhere. Unchanged credentials
/// are never rewritten; a refreshed file-loaded credential goes back to
/// its own file when no explicit save path is given.
fn save_destination(
    changed: bool,
    save_path: Option<&PathBuf>,
    origin: Option<&PathBuf>,
) -> Option<PathBuf> {
    if !changed {
        return None;
    }
    save_path.or(origin).cloned()
}

/// Validate the credential against the service, refreshing once if
/// stale. The flag reports whether a refresh replaced the key.
async fn ensure_fresh(client: &MusicClient, credential: Credential) -> Option<(Credential, bool)> {
    if !credential.is_usable() {
        return None;
    }
    if client.validate(&credential).await {
        return Some((credential, false));
    }
    debug!("Credential rejected, attempting refresh");
    match client.refresh(&credential).await {
        Ok(fresh) => {
            info!("Credential refreshed");
            Some((fresh, true))
        }
        Err(err) => {
            debug!("Refresh failed: {err:#}");
            None
        }
    }
}

async fn interactive_login(client: &MusicClient, kind: &str) -> Result<Credential> {
    match kind {
        "qq" => qr_login(client, LoginKind::Qq).await,
        "wx" => qr_login(client, LoginKind::Wx).await,
        "phone" => phone_login(client).await,
        other => bail!("Unknown login method: {other} (expected qq, wx or phone)"),
    }
}

/// Issue a QR code, write it to a temp file and poll until a terminal
/// state. The user scans it with the service's mobile app.
async fn qr_login(client: &MusicClient, kind: LoginKind) -> Result<Credential> {
    let qr = client.qr_create(kind).await?;

    let qr_path = std::env::temp_dir().join("tunedl_login_qr.png");
    std::fs::write(&qr_path, &qr.image)
        .with_context(|| format!("Failed to write QR image to {}", qr_path.display()))?;
    println!(
        "{} {}",
        "Scan the QR code to log in:".cyan(),
        qr_path.display()
    );

    let result = poll_qr(client, &qr).await;
    let _ = std::fs::remove_file(&qr_path);
    result
}

async fn poll_qr(client: &MusicClient, qr: &crate::api::QrCode) -> Result<Credential> {
    let mut scanned = false;
    loop {
        match client.qr_poll(qr).await? {
            QrPollState::Waiting => {}
            QrPollState::Scanned => {
                if !scanned {
                    info!("QR code scanned, confirm on your device");
                    scanned = true;
                }
            }
            QrPollState::Done(cred) => return Ok(cred),
            QrPollState::Refused => bail!("Login refused on the device"),
            QrPollState::Timeout => bail!("QR code expired before it was scanned"),
        }
        tokio::time::sleep(QR_POLL_INTERVAL).await;
    }
}

/// Phone-code login. Prompts are blocking terminal reads; acceptable for
/// an interactive CLI path.
async fn phone_login(client: &MusicClient) -> Result<Credential> {
    let phone: String = Input::new()
        .with_prompt("Phone number")
        .interact_text()
        .context("Failed to read phone number")?;

    loop {
        match client.send_phone_code(&phone).await? {
            PhoneCodeState::Sent => break,
            PhoneCodeState::CaptchaRequired(url) => {
                println!("{} {}", "Solve the captcha in a browser:".yellow(), url);
                let _: String = Input::new()
                    .with_prompt("Press enter once solved")
                    .allow_empty(true)
                    .interact_text()
                    .context("Failed to read confirmation")?;
            }
        }
    }

    let code: String = Input::new()
        .with_prompt("Auth code")
        .interact_text()
        .context("Failed to read auth code")?;

    client.phone_authorize(&phone, code.trim()).await
}

fn load_credential(path: &Path) -> Result<Credential> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read credential file: {}", path.display()))?;
    Credential::from_text(&text)
}

fn save_credential(credential: &Credential, path: &PathBuf) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, credential.to_text()?)
        .with_context(|| format!("Failed to write credential file: {}", path.display()))?;
    info!("Credential saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use std::sync::Arc;

    #[test]
    fn test_save_destination_only_on_change() {
        let save = PathBuf::from("/tmp/save.json");
        let origin = PathBuf::from("/tmp/origin.json");

        // Unchanged credentials are never rewritten, even with --save.
        assert_eq!(save_destination(false, Some(&save), Some(&origin)), None);

        // Changed: explicit save path wins, origin file is the fallback.
        assert_eq!(
            save_destination(true, Some(&save), Some(&origin)),
            Some(save.clone())
        );
        assert_eq!(
            save_destination(true, None, Some(&origin)),
            Some(origin.clone())
        );
        assert_eq!(save_destination(true, None, None), None);
    }

    #[tokio::test]
    async fn test_failed_interactive_login_degrades_to_anonymous() {
        let client = Arc::new(MusicClient::new(Duration::from_secs(1)).unwrap());
        let mut settings = Settings::default();
        settings.login.login_kind = Some("email".into());

        let stage = LoginStage::new();
        let mut ctx = RunContext::new(settings, client, vec![]);
        let flow = stage.process(&mut ctx).await.unwrap();

        assert_eq!(flow, StageFlow::Continue);
        assert!(ctx.credential.is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credential.json");

        let cred = Credential::new(12345, "secretkey".into());
        save_credential(&cred, &path).unwrap();

        let loaded = load_credential(&path).unwrap();
        assert_eq!(loaded.musicid, 12345);
        assert_eq!(loaded.musickey, "secretkey");
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_credential(&path).is_err());
    }
}
