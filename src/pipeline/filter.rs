//! Policy filter: cached state, resolution, quality, type, language, size.

use tracing::debug;

use super::StreamFilter;
use crate::config::UserConfig;
use crate::models::ParsedStream;

/// Bucket name for streams whose field could not be parsed.
const UNKNOWN: &str = "Unknown";

fn listed(list: &[String], value: Option<&str>) -> bool {
    let value = value.unwrap_or(UNKNOWN);
    list.iter().any(|entry| entry.eq_ignore_ascii_case(value))
}

/// Default filter driven by [`crate::config::FilterConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyFilter;

impl PolicyFilter {
    fn keep(stream: &ParsedStream, config: &UserConfig) -> bool {
        let filters = &config.filters;

        if config.exclude_uncached && stream.is_uncached() {
            return false;
        }
        if listed(&filters.excluded_resolutions, stream.resolution()) {
            return false;
        }
        if listed(&filters.excluded_qualities, stream.quality()) {
            return false;
        }
        if filters.excluded_stream_types.contains(&stream.stream_type) {
            return false;
        }

        let required = &config.languages.required;
        if !required.is_empty()
            && !stream
                .languages()
                .iter()
                .any(|l| required.iter().any(|r| r.eq_ignore_ascii_case(l)))
        {
            return false;
        }

        if let Some(size) = stream.size {
            if filters.min_size.is_some_and(|min| size < min) || filters.max_size.is_some_and(|max| size > max) {
                return false;
            }
        }
        true
    }
}

impl StreamFilter for PolicyFilter {
    fn filter(&self, streams: Vec<ParsedStream>, r#type: &str, id: &str, config: &UserConfig) -> Vec<ParsedStream> {
        let before = streams.len();
        let kept: Vec<_> = streams.into_iter().filter(|s| Self::keep(s, config)).collect();
        debug!(kind = r#type, id, removed = before - kept.len(), "Filtered streams");
        kept
    }
}
