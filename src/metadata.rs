//! Season/episode counts used to roll precaching over to the next season.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::http_client::AddonClient;

pub const CINEMETA_URL: &str = "https://v3-cinemeta.strem.io";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeasonInfo {
    pub season: u32,
    pub episodes: u32,
}

/// Best-effort series metadata.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Known seasons of a series, ascending, specials excluded.
    async fn seasons(&self, r#type: &str, id: &str) -> Result<Vec<SeasonInfo>>;
}

#[derive(Deserialize)]
struct MetaEnvelope {
    meta: MetaVideos,
}

#[derive(Deserialize)]
struct MetaVideos {
    #[serde(default)]
    videos: Vec<Video>,
}

#[derive(Deserialize)]
struct Video {
    season: Option<u32>,
    episode: Option<u32>,
}

fn count_seasons(videos: &[Video]) -> Vec<SeasonInfo> {
    let mut counts: BTreeMap<u32, u32> = BTreeMap::new();
    for video in videos {
        if let (Some(season), Some(_)) = (video.season, video.episode) {
            if season > 0 {
                *counts.entry(season).or_default() += 1;
            }
        }
    }
    counts
        .into_iter()
        .map(|(season, episodes)| SeasonInfo { season, episodes })
        .collect()
}

/// Cinemeta-compatible meta endpoint.
pub struct CinemetaProvider {
    client: AddonClient,
    base_url: String,
}

impl CinemetaProvider {
    pub fn new(client: AddonClient) -> Self {
        Self::with_base_url(client, CINEMETA_URL)
    }

    pub fn with_base_url(client: AddonClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MetadataProvider for CinemetaProvider {
    async fn seasons(&self, r#type: &str, id: &str) -> Result<Vec<SeasonInfo>> {
        let url = format!(
            "{}/meta/{}/{}.json",
            self.base_url,
            urlencoding::encode(r#type),
            urlencoding::encode(id)
        );
        let envelope: MetaEnvelope = self.client.get_json(&url, LOOKUP_TIMEOUT).await?;
        let seasons = count_seasons(&envelope.meta.videos);
        debug!(id, seasons = seasons.len(), "Fetched season counts");
        Ok(seasons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_episodes_per_season_without_specials() {
        let json = r#"{"meta": {"videos": [
            {"season": 0, "episode": 1},
            {"season": 1, "episode": 1},
            {"season": 1, "episode": 2},
            {"season": 2, "episode": 1},
            {"title": "trailer"}
        ]}}"#;
        let envelope: MetaEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(
            count_seasons(&envelope.meta.videos),
            vec![SeasonInfo { season: 1, episodes: 2 }, SeasonInfo { season: 2, episodes: 1 }]
        );
    }

    #[test]
    fn missing_videos_means_no_seasons() {
        let envelope: MetaEnvelope = serde_json::from_str(r#"{"meta": {}}"#).unwrap();
        assert!(count_seasons(&envelope.meta.videos).is_empty());
    }
}
