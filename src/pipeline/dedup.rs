//! Duplicate removal, keeping the first occurrence.

use std::collections::HashSet;

use tracing::debug;

use super::Deduplicator;
use crate::models::ParsedStream;

/// Deduplicates by info hash + file index, then URL, then filename + size.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyDeduplicator;

fn key(stream: &ParsedStream) -> Option<String> {
    if let Some(hash) = &stream.info_hash {
        return Some(format!("hash:{}:{}", hash.to_lowercase(), stream.file_idx.map_or(-1, i64::from)));
    }
    if let Some(url) = &stream.url {
        return Some(format!("url:{url}"));
    }
    let filename = stream.filename.as_ref()?;
    Some(format!("file:{}:{}", filename.to_lowercase(), stream.size.unwrap_or(0)))
}

impl Deduplicator for KeyDeduplicator {
    fn deduplicate(&self, streams: Vec<ParsedStream>) -> Vec<ParsedStream> {
        let before = streams.len();
        let mut seen = HashSet::new();
        let kept: Vec<_> = streams
            .into_iter()
            .filter(|s| key(s).map_or(true, |k| seen.insert(k)))
            .collect();
        debug!(removed = before - kept.len(), "Deduplicated streams");
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn first_occurrence_wins() {
        let a = addon("a");
        let b = addon("b");
        let first = stream("first", &a);
        let mut dup = stream("dup", &b);
        dup.url.clone_from(&first.url);
        let other = stream("other", &b);
        let kept = KeyDeduplicator.deduplicate(vec![first, dup, other]);
        assert_eq!(ids(&kept), vec!["first", "other"]);
    }

    #[test]
    fn hash_key_includes_file_index() {
        let a = addon("a");
        let mut one = stream("one", &a);
        one.url = None;
        one.info_hash = Some("ABC".into());
        one.file_idx = Some(1);
        let mut two = one.clone();
        two.id = "two".into();
        two.file_idx = Some(2);
        let mut again = one.clone();
        again.id = "again".into();
        again.info_hash = Some("abc".into());
        let kept = KeyDeduplicator.deduplicate(vec![one, two, again]);
        assert_eq!(ids(&kept), vec!["one", "two"]);
    }

    #[test]
    fn keyless_streams_are_kept() {
        let a = addon("a");
        let mut x = stream("x", &a);
        x.url = None;
        x.filename = None;
        x.external_url = Some("https://site.example".into());
        let mut y = x.clone();
        y.id = "y".into();
        assert_eq!(KeyDeduplicator.deduplicate(vec![x, y]).len(), 2);
    }
}
