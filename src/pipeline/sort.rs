//! Stable multi-key sort driven by [`crate::config::SortConfig`].

use std::cmp::Ordering;

use super::Sorter;
use crate::config::{SortCriterion, SortDirection, SortKey, UserConfig};
use crate::models::ParsedStream;

/// Best first.
pub const RESOLUTION_ORDER: &[&str] = &["2160p", "1440p", "1080p", "720p", "576p", "480p", "360p"];

/// Best first.
pub const QUALITY_ORDER: &[&str] = &[
    "BluRay REMUX",
    "BluRay",
    "WEB-DL",
    "WEBRip",
    "HDRip",
    "HDTV",
    "DVDRip",
    "SCR",
    "TS",
    "CAM",
];

/// Higher score for earlier entries; unlisted values score zero.
fn rank(order: &[&str], value: Option<&str>) -> u64 {
    value
        .and_then(|v| order.iter().position(|o| o.eq_ignore_ascii_case(v)))
        .map_or(0, |i| (order.len() - i) as u64)
}

fn score(stream: &ParsedStream, key: SortKey, config: &UserConfig) -> u64 {
    match key {
        SortKey::Cached => match &stream.service {
            Some(service) if service.cached => 2,
            Some(_) => 0,
            None => 1,
        },
        SortKey::Resolution => rank(RESOLUTION_ORDER, stream.resolution()),
        SortKey::Quality => rank(QUALITY_ORDER, stream.quality()),
        SortKey::Size => stream.size.unwrap_or(0),
        SortKey::Seeders => u64::from(stream.seeders.unwrap_or(0)),
        SortKey::Language => {
            let preferred = &config.languages.preferred;
            stream
                .languages()
                .iter()
                .filter_map(|l| config.languages.preferred_rank(l))
                .min()
                .map_or(0, |i| (preferred.len() - i) as u64)
        }
        SortKey::RegexPatterns => {
            let patterns = &config.preferred_patterns;
            stream
                .regex_matched
                .as_deref()
                .and_then(|name| patterns.iter().position(|p| p.name == name))
                .map_or(0, |i| (patterns.len() - i) as u64)
        }
        SortKey::Library => u64::from(stream.library),
    }
}

fn compare(a: &ParsedStream, b: &ParsedStream, criteria: &[SortCriterion], config: &UserConfig) -> Ordering {
    for criterion in criteria {
        let ordering = score(a, criterion.key, config).cmp(&score(b, criterion.key, config));
        let ordering = match criterion.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CriteriaSorter;

impl Sorter for CriteriaSorter {
    fn sort(&self, mut streams: Vec<ParsedStream>, effective_type: &str, config: &UserConfig) -> Vec<ParsedStream> {
        let criteria = config.sort.criteria_for(effective_type);
        streams.sort_by(|a, b| compare(a, b, criteria, config));
        streams
    }
}
