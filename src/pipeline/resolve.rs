//! Resolve stage: expand input URLs into a deduplicated work list
//!
//! Short share links are first unrolled to their canonical form, then
//! each URL is dispatched to the first resolver whose pattern table
//! matches. Songs are deduplicated by mid across every input, so the
//! same track named twice (or via two containers) is downloaded once.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{info, warn};

use super::{RunContext, Stage, StageFlow, WorkItem};
use crate::resolver::{default_resolvers, UrlResolver};

/// Host serving redirect-style share links.
const SHORT_LINK_HOST: &str = "c6.y.qq.com";

pub struct ResolveStage {
    resolvers: Vec<Box<dyn UrlResolver>>,
}

impl ResolveStage {
    pub fn new() -> Self {
        Self {
            resolvers: default_resolvers(),
        }
    }

    /// Build with an explicit resolver registry.
    pub fn with_resolvers(resolvers: Vec<Box<dyn UrlResolver>>) -> Self {
        Self { resolvers }
    }
}

impl Default for ResolveStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for ResolveStage {
    fn name(&self) -> &'static str {
        "resolve"
    }

    async fn process(&self, ctx: &mut RunContext) -> Result<StageFlow> {
        let mut seen_mids: HashSet<String> = HashSet::new();
        // One client for every short link in this run; redirects stay
        // manual so the Location header is observable.
        let short_link_client = reqwest::Client::builder()
            .user_agent(concat!("tunedl/", env!("CARGO_PKG_VERSION")))
            .timeout(ctx.settings.basic.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        for input in ctx.input_urls.clone() {
            let url = match expand_short_link(&short_link_client, &input).await {
                Ok(url) => url,
                Err(err) => {
                    warn!("Failed to expand {input}: {err:#}");
                    continue;
                }
            };

            let Some(resolver) = self.resolvers.iter().find(|r| r.suitable(&url)) else {
                warn!("Unsupported link, skipping: {input}");
                continue;
            };

            match resolver.resolve(&ctx.client, &url).await {
                Ok(songs) => {
                    let mut added = 0;
                    for song in songs {
                        if seen_mids.insert(song.mid.clone()) {
                            ctx.items.push(WorkItem::new(&input, song));
                            added += 1;
                        }
                    }
                    info!("Resolved {added} song(s) from {} link: {input}", resolver.name());
                }
                Err(err) => warn!("Failed to resolve {input}: {err:#}"),
            }
        }

        if ctx.items.is_empty() {
            warn!("No songs resolved from the given links");
            return Ok(StageFlow::Stop);
        }
        info!("{} song(s) queued", ctx.items.len());
        Ok(StageFlow::Continue)
    }
}

/// Follow one redirect hop for short share links; other URLs pass
/// through untouched.
async fn expand_short_link(client: &reqwest::Client, url: &str) -> Result<String> {
    let is_short = url::Url::parse(url)
        .map(|parsed| parsed.host_str() == Some(SHORT_LINK_HOST))
        .unwrap_or(false);
    if !is_short {
        return Ok(url.to_string());
    }

    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to request short link: {url}"))?;

    let location = response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .with_context(|| format!("Short link did not redirect: {url}"))?;
    Ok(location.to_string())
}
