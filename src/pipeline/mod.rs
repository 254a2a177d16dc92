//! Stream shaping pipeline.
//!
//! Stages run strictly in order over one request's stream collection:
//!
//! ```text
//! Fetch → Filter → ExpressionFilter → Deduplicate → Precompute → Sort
//! ```
//!
//! Streams from `result_passthrough` addons skip the three filtering
//! stages and rejoin before Precompute. Streams from `force_to_top` addons
//! are moved to the front after sorting. Limiting, proxying and formatting
//! happen afterwards in the session.
//!
//! Every stage is a trait so callers can swap heuristics; the defaults
//! live in the submodules.

pub mod dedup;
pub mod expression;
pub mod fetcher;
pub mod filter;
pub mod precompute;
pub mod sort;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::addon::AddonHandle;
use crate::config::UserConfig;
use crate::models::{effective_type, ErrorEntry, ParsedStream};
use crate::parser::{DefaultStreamParser, StreamParser};

pub use dedup::KeyDeduplicator;
pub use expression::PatternExpressionFilter;
pub use fetcher::ConcurrentFetcher;
pub use filter::PolicyFilter;
pub use precompute::PatternPrecomputer;
pub use sort::CriteriaSorter;

/// Per-addon fetch statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchStatistic {
    pub addon: String,
    pub count: usize,
    pub elapsed_ms: u64,
    pub failed: bool,
}

/// Everything the fetch stage produced.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub streams: Vec<ParsedStream>,
    pub errors: Vec<ErrorEntry>,
    pub statistics: Vec<FetchStatistic>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch and parse streams from every candidate. Never fails as a whole.
    async fn fetch(&self, addons: &[AddonHandle], r#type: &str, id: &str, config: &UserConfig) -> FetchOutcome;
}

pub trait StreamFilter: Send + Sync {
    fn filter(&self, streams: Vec<ParsedStream>, r#type: &str, id: &str, config: &UserConfig) -> Vec<ParsedStream>;
}

pub trait ExpressionFilter: Send + Sync {
    fn apply(&self, streams: Vec<ParsedStream>, config: &UserConfig) -> Vec<ParsedStream>;
}

pub trait Deduplicator: Send + Sync {
    fn deduplicate(&self, streams: Vec<ParsedStream>) -> Vec<ParsedStream>;
}

pub trait Precomputer: Send + Sync {
    /// Annotate streams in place.
    fn precompute(&self, streams: &mut [ParsedStream], config: &UserConfig);
}

pub trait Sorter: Send + Sync {
    fn sort(&self, streams: Vec<ParsedStream>, effective_type: &str, config: &UserConfig) -> Vec<ParsedStream>;
}

/// The configured stage implementations.
#[derive(Clone)]
pub struct Pipeline {
    pub fetcher: Arc<dyn Fetcher>,
    pub filter: Arc<dyn StreamFilter>,
    pub expressions: Arc<dyn ExpressionFilter>,
    pub deduplicator: Arc<dyn Deduplicator>,
    pub precomputer: Arc<dyn Precomputer>,
    pub sorter: Arc<dyn Sorter>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::with_parser(Arc::new(DefaultStreamParser::default()))
    }
}

impl Pipeline {
    /// Default stages using the given stream parser.
    pub fn with_parser(parser: Arc<dyn StreamParser>) -> Self {
        Self {
            fetcher: Arc::new(ConcurrentFetcher::new(parser)),
            filter: Arc::new(PolicyFilter),
            expressions: Arc::new(PatternExpressionFilter),
            deduplicator: Arc::new(KeyDeduplicator),
            precomputer: Arc::new(PatternPrecomputer),
            sorter: Arc::new(CriteriaSorter),
        }
    }

    /// Run fetch through sort for one stream request.
    pub async fn run(&self, addons: &[AddonHandle], r#type: &str, id: &str, config: &UserConfig) -> FetchOutcome {
        let FetchOutcome {
            streams,
            errors,
            statistics,
        } = self.fetcher.fetch(addons, r#type, id, config).await;
        let fetched = streams.len();

        let (passthrough, shaped): (Vec<_>, Vec<_>) =
            streams.into_iter().partition(|s| s.addon.result_passthrough);

        let shaped = self.filter.filter(shaped, r#type, id, config);
        let shaped = self.expressions.apply(shaped, config);
        let mut streams = self.deduplicator.deduplicate(shaped);
        streams.extend(passthrough);

        self.precomputer.precompute(&mut streams, config);
        let streams = self.sorter.sort(streams, effective_type(r#type, id), config);
        let streams = force_to_top(streams);

        debug!(fetched, kept = streams.len(), errors = errors.len(), "Pipeline finished");
        FetchOutcome {
            streams,
            errors,
            statistics,
        }
    }
}

/// Stable move of `force_to_top` addons' streams to the front.
fn force_to_top(streams: Vec<ParsedStream>) -> Vec<ParsedStream> {
    let (mut top, rest): (Vec<_>, Vec<_>) = streams.into_iter().partition(|s| s.addon.force_to_top);
    top.extend(rest);
    top
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::models::{Addon, ParsedFile, ParsedStream, StreamType};

    pub fn addon(id: &str) -> Arc<Addon> {
        Arc::new(Addon::new(id, id.to_uppercase(), format!("https://{id}.example/manifest.json")))
    }

    pub fn stream(id: &str, addon: &Arc<Addon>) -> ParsedStream {
        let mut s = ParsedStream::new(id, Arc::clone(addon), StreamType::Http);
        s.url = Some(format!("https://cdn.example/{id}.mkv"));
        s.filename = Some(format!("{id}.mkv"));
        s.parsed_file = Some(ParsedFile::default());
        s
    }

    pub fn with_resolution(mut s: ParsedStream, resolution: &str) -> ParsedStream {
        s.parsed_file.get_or_insert_with(ParsedFile::default).resolution = Some(resolution.to_string());
        s
    }

    pub fn ids(streams: &[ParsedStream]) -> Vec<&str> {
        streams.iter().map(|s| s.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::models::Addon;

    struct Fixed(Vec<ParsedStream>);

    #[async_trait]
    impl Fetcher for Fixed {
        async fn fetch(&self, _: &[AddonHandle], _: &str, _: &str, _: &UserConfig) -> FetchOutcome {
            FetchOutcome {
                streams: self.0.clone(),
                ..FetchOutcome::default()
            }
        }
    }

    fn pipeline(streams: Vec<ParsedStream>) -> Pipeline {
        Pipeline {
            fetcher: Arc::new(Fixed(streams)),
            ..Pipeline::default()
        }
    }

    #[tokio::test]
    async fn passthrough_streams_skip_filters_and_dedup() {
        let normal = addon("a");
        let mut raw = Addon::new("p", "P", "https://p.example/manifest.json");
        raw.result_passthrough = true;
        let passthrough = Arc::new(raw);

        let a1 = with_resolution(stream("a1", &normal), "480p");
        let p1 = with_resolution(stream("p1", &passthrough), "480p");
        let mut p2 = with_resolution(stream("p2", &passthrough), "480p");
        p2.url.clone_from(&p1.url);

        let mut config = UserConfig::default();
        config.filters.excluded_resolutions = vec!["480p".into()];
        let outcome = pipeline(vec![a1, p1, p2]).run(&[], "movie", "tt1", &config).await;
        assert_eq!(ids(&outcome.streams), vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn force_to_top_runs_after_sort() {
        let normal = addon("a");
        let mut raw = Addon::new("t", "T", "https://t.example/manifest.json");
        raw.force_to_top = true;
        let top = Arc::new(raw);

        let best = with_resolution(stream("a1", &normal), "2160p");
        let worst = with_resolution(stream("t1", &top), "480p");
        let outcome = pipeline(vec![best, worst])
            .run(&[], "movie", "tt1", &UserConfig::default())
            .await;
        assert_eq!(ids(&outcome.streams), vec!["t1", "a1"]);
    }
}
