//! Regex exclusion filter over filenames and folder names.

use regex::Regex;
use tracing::{debug, warn};

use super::ExpressionFilter;
use crate::config::UserConfig;
use crate::models::ParsedStream;

#[derive(Debug, Clone, Copy, Default)]
pub struct PatternExpressionFilter;

fn compile(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %p, error = %e, "Ignoring invalid exclusion pattern");
                None
            }
        })
        .collect()
}

impl ExpressionFilter for PatternExpressionFilter {
    fn apply(&self, streams: Vec<ParsedStream>, config: &UserConfig) -> Vec<ParsedStream> {
        let patterns = compile(&config.filters.excluded_patterns);
        if patterns.is_empty() {
            return streams;
        }

        let before = streams.len();
        let kept: Vec<_> = streams
            .into_iter()
            .filter(|s| {
                let names = [s.filename.as_deref(), s.folder_name.as_deref()];
                !names
                    .iter()
                    .flatten()
                    .any(|name| patterns.iter().any(|re| re.is_match(name)))
            })
            .collect();
        debug!(removed = before - kept.len(), "Applied exclusion patterns");
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn drops_matching_filenames_and_folders() {
        let a = addon("a");
        let mut cam = stream("cam", &a);
        cam.filename = Some("Movie.2024.HDCAM.mkv".into());
        let mut folder = stream("folder", &a);
        folder.folder_name = Some("Movie.2024.HDCAM".into());
        let clean = stream("clean", &a);

        let mut config = UserConfig::default();
        config.filters.excluded_patterns = vec!["(?i)cam".into(), "([".into()];
        let kept = PatternExpressionFilter.apply(vec![cam, folder, clean], &config);
        assert_eq!(ids(&kept), vec!["clean"]);
    }

    #[test]
    fn no_patterns_is_identity() {
        let a = addon("a");
        let kept = PatternExpressionFilter.apply(vec![stream("1", &a)], &UserConfig::default());
        assert_eq!(kept.len(), 1);
    }
}
