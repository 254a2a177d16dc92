//! Marks each stream with the first preferred pattern its filename matches.

use regex::Regex;
use tracing::warn;

use super::Precomputer;
use crate::config::UserConfig;
use crate::models::ParsedStream;

#[derive(Debug, Clone, Copy, Default)]
pub struct PatternPrecomputer;

impl Precomputer for PatternPrecomputer {
    fn precompute(&self, streams: &mut [ParsedStream], config: &UserConfig) {
        let patterns: Vec<(&str, Regex)> = config
            .preferred_patterns
            .iter()
            .filter_map(|p| match Regex::new(&p.pattern) {
                Ok(re) => Some((p.name.as_str(), re)),
                Err(e) => {
                    warn!(name = %p.name, error = %e, "Ignoring invalid preferred pattern");
                    None
                }
            })
            .collect();
        if patterns.is_empty() {
            return;
        }

        for stream in streams.iter_mut() {
            let Some(filename) = stream.filename.as_deref() else {
                continue;
            };
            stream.regex_matched = patterns
                .iter()
                .find(|(_, re)| re.is_match(filename))
                .map(|(name, _)| (*name).to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::NamedPattern;

    #[test]
    fn first_matching_pattern_is_recorded() {
        let a = addon("a");
        let mut remux = stream("r", &a);
        remux.filename = Some("Movie.REMUX.HDR.mkv".into());
        let mut plain = stream("p", &a);
        plain.filename = Some("Movie.WEB.mkv".into());

        let mut config = UserConfig::default();
        config.preferred_patterns = vec![
            NamedPattern { name: "Remux".into(), pattern: "(?i)remux".into() },
            NamedPattern { name: "HDR".into(), pattern: "HDR".into() },
        ];
        let mut streams = vec![remux, plain];
        PatternPrecomputer.precompute(&mut streams, &config);
        assert_eq!(streams[0].regex_matched.as_deref(), Some("Remux"));
        assert_eq!(streams[1].regex_matched, None);
    }
}
