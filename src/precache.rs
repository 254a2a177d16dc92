//! Next-episode precaching.
//!
//! After a stream response for `tt123:1:4` the gateway may quietly request
//! streams for `tt123:1:5` and touch the first uncached debrid link so the
//! service starts caching it before the user gets there.
//!
//! ```text
//! idle -> check cooldown -> skip
//!                        -> dispatch -> fetching -> succeeded (ticket written)
//!                                                -> failed    (logged)
//! ```

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{redirect, Client, StatusCode};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cache::Cache;
use crate::error::{GatewayError, Result};
use crate::http_client::USER_AGENT;
use crate::metadata::{MetadataProvider, SeasonInfo};
use crate::models::{ParsedStream, ANIME_ID_PREFIXES};

pub const TOUCH_TIMEOUT: Duration = Duration::from_secs(20);
pub const TASK_TIMEOUT: Duration = Duration::from_secs(60);

static SEASON_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+):(\d+):(\d+)$").expect("valid regex"));

// ═══════════════════════════════════════════════════════════════════════
// Episode ids
// ═══════════════════════════════════════════════════════════════════════

/// `base:season:episode`, or `prefix:id:episode` for anime ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeId {
    pub base: String,
    pub season: Option<u32>,
    pub episode: u32,
}

impl EpisodeId {
    #[must_use]
    pub fn parse(id: &str) -> Option<Self> {
        if ANIME_ID_PREFIXES.iter().any(|p| id.starts_with(p)) {
            let (base, episode) = id.rsplit_once(':')?;
            if base.matches(':').count() == 1 {
                return Some(Self {
                    base: base.to_string(),
                    season: None,
                    episode: episode.parse().ok()?,
                });
            }
        }
        let caps = SEASON_EPISODE.captures(id)?;
        Some(Self {
            base: caps[1].to_string(),
            season: Some(caps[2].parse().ok()?),
            episode: caps[3].parse().ok()?,
        })
    }

    /// The following episode, rolling into the next season only when the
    /// current one is known to be finished and the next one is known.
    /// `None` when the numbers cannot be incremented.
    #[must_use]
    pub fn next(&self, seasons: &[SeasonInfo]) -> Option<String> {
        let Some(season) = self.season else {
            return Some(format!("{}:{}", self.base, self.episode.checked_add(1)?));
        };
        let finished = seasons
            .iter()
            .any(|s| s.season == season && s.episodes == self.episode);
        let next_season = season
            .checked_add(1)
            .filter(|next| seasons.iter().any(|s| s.season == *next));
        match next_season {
            Some(next) if finished => Some(format!("{}:{next}:1", self.base)),
            _ => Some(format!("{}:{}:{}", self.base, season, self.episode.checked_add(1)?)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Collaborators
// ═══════════════════════════════════════════════════════════════════════

/// Produces the shaped stream list for the computed id.
#[async_trait]
pub trait PrecacheSource: Send + Sync {
    async fn precache_streams(&self, r#type: &str, id: &str) -> Vec<ParsedStream>;
}

/// Issues the request that makes a service start caching a stream.
#[async_trait]
pub trait Toucher: Send + Sync {
    /// Returns the final 2xx status.
    async fn touch(&self, url: &str) -> Result<u16>;
}

/// GET with at most one same-host redirect.
pub struct HttpToucher {
    client: Client,
}

impl HttpToucher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .use_rustls_tls()
            .redirect(redirect::Policy::none())
            .timeout(TOUCH_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

/// Resolve a redirect target, refusing hosts other than the original's.
fn same_host_target(original: &url::Url, location: &str) -> Result<url::Url> {
    let target = original.join(location)?;
    let same = match (original.host_str(), target.host_str()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    };
    if same {
        Ok(target)
    } else {
        Err(GatewayError::CrossHostRedirect(target.to_string()))
    }
}

#[async_trait]
impl Toucher for HttpToucher {
    #[instrument(skip(self), fields(url = %url))]
    async fn touch(&self, url: &str) -> Result<u16> {
        let original = url::Url::parse(url)?;
        let mut response = self.client.get(original.clone()).send().await?;

        if response.status().is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| GatewayError::Status {
                    status: response.status().as_u16(),
                    url: url.to_string(),
                })?
                .to_string();
            let target = same_host_target(&original, &location)?;
            debug!(target = %target, "Following same-host redirect");
            response = self.client.get(target).send().await?;
        }

        let status: StatusCode = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(GatewayError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            })
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// State machine
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheRequest {
    pub r#type: String,
    pub id: String,
    pub user_id: String,
    pub cooldown_secs: u64,
    /// Touch even when cached results exist.
    pub always: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Cooldown,
    NotAnEpisode,
    /// Season or episode number is already at its maximum.
    NoNextEpisode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletedReason {
    AlreadyCached,
    NoCandidate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecacheOutcome {
    Skipped(SkipReason),
    Completed(CompletedReason),
    Succeeded { id: String, status: u16 },
    Failed(String),
}

#[must_use]
pub fn ticket_key(r#type: &str, id: &str, user_id: &str) -> String {
    format!("precache-{}-{id}-{user_id}", r#type)
}

pub struct Precacher {
    cache: Arc<dyn Cache>,
    metadata: Option<Arc<dyn MetadataProvider>>,
    toucher: Arc<dyn Toucher>,
    task_timeout: Duration,
}

impl Precacher {
    pub fn new(cache: Arc<dyn Cache>, metadata: Option<Arc<dyn MetadataProvider>>, toucher: Arc<dyn Toucher>) -> Self {
        Self {
            cache,
            metadata,
            toucher,
            task_timeout: TASK_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    async fn seasons(&self, r#type: &str, episode: &EpisodeId) -> Vec<SeasonInfo> {
        let Some(metadata) = &self.metadata else {
            return Vec::new();
        };
        if episode.season.is_none() {
            return Vec::new();
        }
        match metadata.seasons(r#type, &episode.base).await {
            Ok(seasons) => seasons,
            Err(e) => {
                debug!(id = %episode.base, error = %e, "Season lookup failed, rollover disabled");
                Vec::new()
            }
        }
    }

    async fn write_ticket(&self, key: &str, next_id: &str, cooldown_secs: u64) {
        let ticket = json!({ "at": chrono::Utc::now().to_rfc3339(), "next": next_id });
        self.cache.set(key, ticket, cooldown_secs).await;
    }

    /// Run one precache attempt to completion.
    #[instrument(skip(self, source), fields(kind = %request.r#type, id = %request.id))]
    pub async fn run(&self, source: &dyn PrecacheSource, request: &PrecacheRequest) -> PrecacheOutcome {
        let key = ticket_key(&request.r#type, &request.id, &request.user_id);
        if self.cache.get(&key, false).await.is_some() {
            debug!("Precache ticket present");
            return PrecacheOutcome::Skipped(SkipReason::Cooldown);
        }
        let Some(episode) = EpisodeId::parse(&request.id) else {
            return PrecacheOutcome::Skipped(SkipReason::NotAnEpisode);
        };

        let seasons = self.seasons(&request.r#type, &episode).await;
        let Some(next_id) = episode.next(&seasons) else {
            debug!("Episode number cannot be incremented");
            return PrecacheOutcome::Skipped(SkipReason::NoNextEpisode);
        };
        debug!(next = %next_id, "Fetching next episode");
        let streams = source.precache_streams(&request.r#type, &next_id).await;

        let any_cached = streams.iter().any(|s| s.is_service_backed() && !s.is_uncached());
        if any_cached && !request.always {
            return PrecacheOutcome::Completed(CompletedReason::AlreadyCached);
        }

        let Some(url) = streams
            .iter()
            .filter(|s| s.is_uncached())
            .find_map(|s| s.url.as_deref())
        else {
            return PrecacheOutcome::Completed(CompletedReason::NoCandidate);
        };

        match self.toucher.touch(url).await {
            // Only a successful touch arms the cooldown.
            Ok(status) => {
                self.write_ticket(&key, &next_id, request.cooldown_secs).await;
                PrecacheOutcome::Succeeded { id: next_id, status }
            }
            Err(e) => PrecacheOutcome::Failed(e.to_string()),
        }
    }

    /// Detach a run from the triggering request, bounded by the task timeout.
    pub fn spawn(
        self: &Arc<Self>,
        source: Arc<dyn PrecacheSource>,
        request: PrecacheRequest,
    ) -> JoinHandle<PrecacheOutcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(this.task_timeout, this.run(source.as_ref(), &request)).await {
                Ok(outcome) => outcome,
                Err(_) => PrecacheOutcome::Failed(format!("timed out after {}s", this.task_timeout.as_secs())),
            };
            match &outcome {
                PrecacheOutcome::Failed(reason) => warn!(id = %request.id, %reason, "Precache failed"),
                other => info!(id = %request.id, outcome = ?other, "Precache finished"),
            }
            outcome
        })
    }
}
