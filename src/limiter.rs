//! Per-category result quotas.
//!
//! One left-to-right pass keeps running counts per category value plus a
//! global count. A stream is dropped as soon as any configured category
//! has reached its cap for the stream's value; otherwise every configured
//! counter (global included) goes up by one. Missing values count under
//! `"Unknown"`, so they share a bucket with a literal `"Unknown"` value.
//!
//! Streams from `result_passthrough` addons are kept and not counted.

use std::collections::HashMap;

use tracing::debug;

use crate::config::ResultLimits;
use crate::models::ParsedStream;

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Category {
    Indexer,
    ReleaseGroup,
    Resolution,
    Quality,
    Addon,
    StreamType,
    Service,
}

impl Category {
    fn value(self, stream: &ParsedStream) -> &str {
        let value = match self {
            Self::Indexer => stream.indexer.as_deref(),
            Self::ReleaseGroup => stream.release_group(),
            Self::Resolution => stream.resolution(),
            Self::Quality => stream.quality(),
            Self::Addon => Some(stream.addon.instance_id.as_str()),
            Self::StreamType => Some(stream.stream_type.as_str()),
            Self::Service => stream.service.as_ref().map(|s| s.id.as_str()),
        };
        value.unwrap_or(UNKNOWN)
    }
}

/// Quota enforcer for one session.
#[derive(Debug, Clone)]
pub struct Limiter {
    global: Option<usize>,
    caps: Vec<(Category, usize)>,
}

impl Limiter {
    #[must_use]
    pub fn new(limits: &ResultLimits) -> Self {
        let caps = [
            (Category::Indexer, limits.indexer),
            (Category::ReleaseGroup, limits.release_group),
            (Category::Resolution, limits.resolution),
            (Category::Quality, limits.quality),
            (Category::Addon, limits.addon),
            (Category::StreamType, limits.stream_type),
            (Category::Service, limits.service),
        ]
        .into_iter()
        .filter_map(|(category, cap)| cap.map(|c| (category, c)))
        .collect();

        Self {
            global: limits.global,
            caps,
        }
    }

    /// No quotas configured.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.global.is_none() && self.caps.is_empty()
    }

    /// Keep an order-preserving subsequence that respects every cap.
    #[must_use]
    pub fn apply(&self, streams: Vec<ParsedStream>) -> Vec<ParsedStream> {
        if self.is_noop() {
            return streams;
        }

        let before = streams.len();
        let mut global = 0usize;
        let mut counts: HashMap<(Category, String), usize> = HashMap::new();

        let kept: Vec<_> = streams
            .into_iter()
            .filter(|stream| {
                if stream.addon.result_passthrough {
                    return true;
                }
                if self.global.is_some_and(|cap| global >= cap) {
                    return false;
                }

                let keys: Vec<(Category, String, usize)> = self
                    .caps
                    .iter()
                    .map(|&(category, cap)| (category, category.value(stream).to_string(), cap))
                    .collect();

                let full = keys.iter().any(|(category, value, cap)| {
                    counts.get(&(*category, value.clone())).copied().unwrap_or(0) >= *cap
                });
                if full {
                    return false;
                }

                global += 1;
                for (category, value, _) in keys {
                    *counts.entry((category, value)).or_insert(0) += 1;
                }
                true
            })
            .collect();

        debug!(removed = before - kept.len(), "Applied result limits");
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Addon, ParsedFile, ServiceInfo, StreamType};
    use std::sync::Arc;

    fn stream(id: &str, addon: &Arc<Addon>, resolution: Option<&str>) -> ParsedStream {
        let mut s = ParsedStream::new(id, Arc::clone(addon), StreamType::Http);
        s.parsed_file = Some(ParsedFile {
            resolution: resolution.map(String::from),
            ..ParsedFile::default()
        });
        s
    }

    fn ids(streams: &[ParsedStream]) -> Vec<&str> {
        streams.iter().map(|s| s.id.as_str()).collect()
    }

    fn addon() -> Arc<Addon> {
        Arc::new(Addon::new("a", "A", "https://a.example/manifest.json"))
    }

    #[test]
    fn resolution_cap_of_one() {
        let a = addon();
        let limiter = Limiter::new(&ResultLimits {
            resolution: Some(1),
            ..ResultLimits::default()
        });
        let out = limiter.apply(vec![
            stream("A", &a, Some("1080p")),
            stream("B", &a, Some("1080p")),
            stream("C", &a, Some("720p")),
        ]);
        assert_eq!(ids(&out), vec!["A", "C"]);
    }

    #[test]
    fn no_limits_is_identity() {
        let a = addon();
        let input: Vec<_> = (0..5).map(|i| stream(&i.to_string(), &a, None)).collect();
        let limiter = Limiter::new(&ResultLimits::default());
        assert!(limiter.is_noop());
        assert_eq!(ids(&limiter.apply(input)), vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn global_cap_truncates() {
        let a = addon();
        let input: Vec<_> = (0..5).map(|i| stream(&i.to_string(), &a, Some("1080p"))).collect();
        let limiter = Limiter::new(&ResultLimits {
            global: Some(2),
            ..ResultLimits::default()
        });
        assert_eq!(ids(&limiter.apply(input)), vec!["0", "1"]);
    }

    #[test]
    fn dropped_streams_do_not_count_elsewhere() {
        let a = addon();
        let limiter = Limiter::new(&ResultLimits {
            resolution: Some(1),
            global: Some(2),
            ..ResultLimits::default()
        });
        let out = limiter.apply(vec![
            stream("A", &a, Some("1080p")),
            stream("B", &a, Some("1080p")),
            stream("C", &a, Some("1080p")),
            stream("D", &a, Some("720p")),
            stream("E", &a, Some("480p")),
        ]);
        assert_eq!(ids(&out), vec!["A", "D"]);
    }

    #[test]
    fn missing_values_share_the_unknown_bucket() {
        let a = addon();
        let limiter = Limiter::new(&ResultLimits {
            resolution: Some(1),
            ..ResultLimits::default()
        });
        let out = limiter.apply(vec![
            stream("none", &a, None),
            stream("literal", &a, Some("Unknown")),
            stream("hd", &a, Some("720p")),
        ]);
        assert_eq!(ids(&out), vec!["none", "hd"]);
    }

    #[test]
    fn service_and_addon_caps() {
        let a = addon();
        let b = Arc::new(Addon::new("b", "B", "https://b.example/manifest.json"));
        let mut rd1 = stream("rd1", &a, None);
        rd1.service = Some(ServiceInfo { id: "realdebrid".into(), cached: true });
        let mut rd2 = rd1.clone();
        rd2.id = "rd2".into();
        let limiter = Limiter::new(&ResultLimits {
            service: Some(1),
            addon: Some(2),
            ..ResultLimits::default()
        });
        let mut b1 = stream("b1", &b, None);
        b1.service = Some(ServiceInfo { id: "alldebrid".into(), cached: true });
        // a4 is dropped by the shared "Unknown" service bucket, not by the addon cap
        let out = limiter.apply(vec![rd1, rd2, stream("a3", &a, None), stream("a4", &a, None), b1]);
        assert_eq!(ids(&out), vec!["rd1", "a3", "b1"]);
    }

    #[test]
    fn passthrough_streams_are_exempt() {
        let mut raw = Addon::new("p", "P", "https://p.example/manifest.json");
        raw.result_passthrough = true;
        let p = Arc::new(raw);
        let limiter = Limiter::new(&ResultLimits {
            global: Some(1),
            ..ResultLimits::default()
        });
        let out = limiter.apply(vec![stream("p1", &p, None), stream("p2", &p, None), stream("a", &addon(), None)]);
        assert_eq!(ids(&out), vec!["p1", "p2", "a"]);
    }
}
