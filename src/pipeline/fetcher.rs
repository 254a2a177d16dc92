//! Concurrent stream fetcher with optional ordered fetch groups.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::{FetchOutcome, FetchStatistic, Fetcher};
use crate::addon::{with_timeout, AddonHandle};
use crate::config::{FetchGroups, UserConfig};
use crate::parser::StreamParser;
use crate::selection::addon_error;

/// Calls every candidate's `get_streams` concurrently and parses the results.
pub struct ConcurrentFetcher {
    parser: Arc<dyn StreamParser>,
}

impl ConcurrentFetcher {
    pub fn new(parser: Arc<dyn StreamParser>) -> Self {
        Self { parser }
    }

    async fn fetch_all(&self, addons: &[AddonHandle], r#type: &str, id: &str, outcome: &mut FetchOutcome) {
        let calls = addons.iter().map(|handle| async move {
            let started = Instant::now();
            let result = with_timeout(&handle.addon, handle.connector.get_streams(r#type, id)).await;
            (handle, result, started.elapsed())
        });

        for (handle, result, elapsed) in join_all(calls).await {
            #[allow(clippy::cast_possible_truncation)]
            let elapsed_ms = elapsed.as_millis() as u64;
            match result {
                Ok(raw) => {
                    let parsed: Vec<_> = raw
                        .iter()
                        .enumerate()
                        .filter_map(|(i, value)| self.parser.parse(&handle.addon, value, i))
                        .collect();
                    debug!(addon = %handle.addon.name, count = parsed.len(), elapsed_ms, "Fetched streams");
                    outcome.statistics.push(FetchStatistic {
                        addon: handle.addon.name.clone(),
                        count: parsed.len(),
                        elapsed_ms,
                        failed: false,
                    });
                    outcome.streams.extend(parsed);
                }
                Err(e) => {
                    warn!(addon = %handle.addon.name, error = %e, elapsed_ms, "Stream fetch failed");
                    outcome.errors.push(addon_error(&handle.addon, &e));
                    outcome.statistics.push(FetchStatistic {
                        addon: handle.addon.name.clone(),
                        count: 0,
                        elapsed_ms,
                        failed: true,
                    });
                }
            }
        }
    }
}

/// Split candidates into the configured groups, in group order.
///
/// Candidates not named in any group form a final implicit group.
fn partition_groups(addons: &[AddonHandle], groups: &FetchGroups) -> Vec<Vec<AddonHandle>> {
    let mut batches: Vec<Vec<AddonHandle>> = groups
        .groups
        .iter()
        .map(|group| {
            addons
                .iter()
                .filter(|h| group.contains(&h.addon.instance_id))
                .cloned()
                .collect()
        })
        .collect();

    let ungrouped: Vec<_> = addons
        .iter()
        .filter(|h| !groups.groups.iter().any(|g| g.contains(&h.addon.instance_id)))
        .cloned()
        .collect();
    batches.push(ungrouped);
    batches.retain(|batch| !batch.is_empty());
    batches
}

#[async_trait]
impl Fetcher for ConcurrentFetcher {
    async fn fetch(&self, addons: &[AddonHandle], r#type: &str, id: &str, config: &UserConfig) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();

        let Some(groups) = config.groups.as_ref().filter(|g| !g.groups.is_empty()) else {
            self.fetch_all(addons, r#type, id, &mut outcome).await;
            return outcome;
        };

        for (index, batch) in partition_groups(addons, groups).iter().enumerate() {
            if index > 0 && outcome.streams.len() >= groups.min_results {
                info!(
                    group = index,
                    results = outcome.streams.len(),
                    "Enough results, skipping remaining groups"
                );
                break;
            }
            self.fetch_all(batch, r#type, id, &mut outcome).await;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addon::AddonConnector;
    use crate::models::{Addon, Manifest};
    use crate::parser::DefaultStreamParser;
    use anyhow::{anyhow, Result};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Streams {
        count: usize,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AddonConnector for Streams {
        async fn get_manifest(&self) -> Result<Manifest> {
            Ok(Manifest::default())
        }

        async fn get_streams(&self, _type: &str, id: &str) -> Result<Vec<Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("upstream down"));
            }
            Ok((0..self.count)
                .map(|i| json!({"url": format!("https://cdn.example/{id}/{i}.mkv")}))
                .collect())
        }
    }

    fn handle(id: &str, count: usize, fail: bool) -> (AddonHandle, Arc<Streams>) {
        let connector = Arc::new(Streams {
            count,
            fail,
            calls: AtomicUsize::new(0),
        });
        let manifest: Manifest =
            serde_json::from_str(r#"{"id":"x","name":"X","types":["movie"],"resources":["stream"]}"#).unwrap();
        let addon = Arc::new(Addon::new(id, id.to_uppercase(), "https://x.example/manifest.json"));
        (AddonHandle::new(addon, connector.clone(), manifest), connector)
    }

    fn fetcher() -> ConcurrentFetcher {
        ConcurrentFetcher::new(Arc::new(DefaultStreamParser::default()))
    }

    #[tokio::test]
    async fn collects_streams_errors_and_statistics() {
        let (a, _) = handle("a", 2, false);
        let (b, _) = handle("b", 0, true);
        let outcome = fetcher().fetch(&[a, b], "movie", "tt1", &UserConfig::default()).await;
        assert_eq!(outcome.streams.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].title, "B");
        assert!(outcome.errors[0].description.contains("upstream down"));
        assert_eq!(outcome.statistics.len(), 2);
        assert!(outcome.statistics[1].failed);
    }

    #[tokio::test]
    async fn later_groups_skipped_once_enough_results() {
        let (a, _) = handle("a", 3, false);
        let (b, b_conn) = handle("b", 3, false);
        let mut config = UserConfig::default();
        config.groups = Some(FetchGroups {
            groups: vec![vec!["a".into()], vec!["b".into()]],
            min_results: 2,
        });
        let outcome = fetcher().fetch(&[a, b], "movie", "tt1", &config).await;
        assert_eq!(outcome.streams.len(), 3);
        assert_eq!(b_conn.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn later_groups_run_when_short() {
        let (a, _) = handle("a", 0, true);
        let (b, b_conn) = handle("b", 1, false);
        let (c, c_conn) = handle("c", 1, false);
        let mut config = UserConfig::default();
        config.groups = Some(FetchGroups {
            groups: vec![vec!["a".into()], vec!["b".into()]],
            min_results: 1,
        });
        let outcome = fetcher().fetch(&[a, b, c], "movie", "tt1", &config).await;
        assert_eq!(outcome.streams.len(), 1);
        assert_eq!(b_conn.calls.load(Ordering::SeqCst), 1);
        // ungrouped "c" is the implicit last group
        assert_eq!(c_conn.calls.load(Ordering::SeqCst), 0);
    }
}
