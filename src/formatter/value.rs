//! Read-only projection of one stream that templates evaluate against.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;

use super::languages::LanguageFields;
use super::FormatContext;
use crate::models::ParsedStream;

/// Value of one template field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Str(String),
    Array(Vec<String>),
    Number(f64),
    Bool(bool),
    Absent,
}

static ABSENT: FieldValue = FieldValue::Absent;

impl FieldValue {
    fn text(value: Option<&str>) -> Self {
        value.map_or(Self::Absent, |s| Self::Str(s.to_string()))
    }

    #[allow(clippy::cast_precision_loss)]
    fn number(value: Option<u64>) -> Self {
        value.map_or(Self::Absent, |n| Self::Number(n as f64))
    }

    fn list<T: ToString>(values: &[T]) -> Self {
        Self::Array(values.iter().map(ToString::to_string).collect())
    }

    /// Kind name used in `{unknown_<kind>_modifier(..)}` markers.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Number(_) => "number",
            Self::Bool(_) => "boolean",
            Self::Absent => "absent",
        }
    }

    /// Present and non-empty.
    #[must_use]
    pub fn exists(&self) -> bool {
        match self {
            Self::Str(s) => !s.is_empty(),
            Self::Array(items) => !items.is_empty(),
            Self::Number(_) | Self::Bool(_) => true,
            Self::Absent => false,
        }
    }

    /// Plain rendering without a modifier.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Array(items) => items.join(", "),
            Self::Number(n) => format_number(*n),
            Self::Bool(b) => b.to_string(),
            Self::Absent => String::new(),
        }
    }
}

/// Integers without a fractional part, everything else in shortest form.
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        #[allow(clippy::cast_possible_truncation)]
        let whole = n as i64;
        whole.to_string()
    } else {
        n.to_string()
    }
}

/// Template sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Section {
    Stream,
    Service,
    Addon,
    Config,
    Debug,
}

pub const STREAM_FIELDS: &[&str] = &[
    "filename",
    "folderName",
    "size",
    "folderSize",
    "duration",
    "library",
    "type",
    "infoHash",
    "indexer",
    "seeders",
    "age",
    "proxied",
    "message",
    "regexMatched",
    "title",
    "year",
    "seasons",
    "episodes",
    "seasonEpisode",
    "resolution",
    "quality",
    "encode",
    "releaseGroup",
    "visualTags",
    "audioTags",
    "audioChannels",
    "edition",
    "repack",
    "languages",
    "uLanguages",
    "languageEmojis",
    "uLanguageEmojis",
    "languageCodes",
    "uLanguageCodes",
    "smallLanguageCodes",
    "uSmallLanguageCodes",
];

pub const SERVICE_FIELDS: &[&str] = &["id", "name", "shortName", "cached"];
pub const ADDON_FIELDS: &[&str] = &["name", "instanceId", "presetId", "manifestUrl"];
pub const CONFIG_FIELDS: &[&str] = &["addonName"];
pub const DEBUG_FIELDS: &[&str] = &["json", "jsonf"];

impl Section {
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "stream" => Some(Self::Stream),
            "service" => Some(Self::Service),
            "addon" => Some(Self::Addon),
            "config" => Some(Self::Config),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }

    #[must_use]
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Self::Stream => STREAM_FIELDS,
            Self::Service => SERVICE_FIELDS,
            Self::Addon => ADDON_FIELDS,
            Self::Config => CONFIG_FIELDS,
            Self::Debug => DEBUG_FIELDS,
        }
    }

    /// The whitelisted field name, if known.
    #[must_use]
    pub fn field(self, name: &str) -> Option<&'static str> {
        self.fields().iter().copied().find(|f| *f == name)
    }
}

/// `(display name, short name)` for a service id.
#[must_use]
pub fn service_names(id: &str) -> (&str, &str) {
    match id {
        "realdebrid" => ("Real-Debrid", "RD"),
        "alldebrid" => ("AllDebrid", "AD"),
        "premiumize" => ("Premiumize", "PM"),
        "debridlink" => ("Debrid-Link", "DL"),
        "torbox" => ("TorBox", "TB"),
        "offcloud" => ("Offcloud", "OC"),
        "pikpak" => ("PikPak", "PKP"),
        "easydebrid" => ("EasyDebrid", "ED"),
        "easynews" => ("Easynews", "EN"),
        other => (other, other),
    }
}

fn season_episode(seasons: &[u32], episodes: &[u32]) -> Vec<String> {
    match (seasons.is_empty(), episodes.is_empty()) {
        (false, false) => seasons
            .iter()
            .flat_map(|s| episodes.iter().map(move |e| format!("S{s:02}E{e:02}")))
            .collect(),
        (false, true) => seasons.iter().map(|s| format!("S{s:02}")).collect(),
        (true, false) => episodes.iter().map(|e| format!("E{e:02}")).collect(),
        (true, true) => Vec::new(),
    }
}

type Fields = BTreeMap<&'static str, FieldValue>;

/// Per-call projection; built fresh and never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseValue {
    stream: Fields,
    service: Fields,
    addon: Fields,
    config: Fields,
    debug: Fields,
}

impl ParseValue {
    #[must_use]
    pub fn build(stream: &ParsedStream, context: &FormatContext, with_debug: bool) -> Self {
        let file = stream.parsed_file.clone().unwrap_or_default();
        let langs = LanguageFields::derive(&file.languages, &context.languages);

        let stream_fields: Fields = [
            ("filename", FieldValue::text(stream.filename.as_deref())),
            ("folderName", FieldValue::text(stream.folder_name.as_deref())),
            ("size", FieldValue::number(stream.size)),
            ("folderSize", FieldValue::number(stream.folder_size)),
            ("duration", FieldValue::number(stream.duration)),
            ("library", FieldValue::Bool(stream.library)),
            ("type", FieldValue::Str(stream.stream_type.as_str().to_string())),
            ("infoHash", FieldValue::text(stream.info_hash.as_deref())),
            ("indexer", FieldValue::text(stream.indexer.as_deref())),
            ("seeders", FieldValue::number(stream.seeders.map(u64::from))),
            ("age", FieldValue::text(stream.age.as_deref())),
            ("proxied", FieldValue::Bool(stream.proxied)),
            ("message", FieldValue::text(stream.message.as_deref())),
            ("regexMatched", FieldValue::text(stream.regex_matched.as_deref())),
            ("title", FieldValue::text(file.title.as_deref())),
            ("year", FieldValue::number(file.year.map(u64::from))),
            ("seasons", FieldValue::list(&file.seasons)),
            ("episodes", FieldValue::list(&file.episodes)),
            ("seasonEpisode", FieldValue::Array(season_episode(&file.seasons, &file.episodes))),
            ("resolution", FieldValue::text(file.resolution.as_deref())),
            ("quality", FieldValue::text(file.quality.as_deref())),
            ("encode", FieldValue::text(file.encode.as_deref())),
            ("releaseGroup", FieldValue::text(file.release_group.as_deref())),
            ("visualTags", FieldValue::list(&file.visual_tags)),
            ("audioTags", FieldValue::list(&file.audio_tags)),
            ("audioChannels", FieldValue::list(&file.audio_channels)),
            ("edition", FieldValue::text(file.edition.as_deref())),
            ("repack", FieldValue::Bool(file.repack)),
            ("languages", FieldValue::Array(langs.names)),
            ("uLanguages", FieldValue::Array(langs.user_names)),
            ("languageEmojis", FieldValue::Array(langs.emojis)),
            ("uLanguageEmojis", FieldValue::Array(langs.user_emojis)),
            ("languageCodes", FieldValue::Array(langs.codes)),
            ("uLanguageCodes", FieldValue::Array(langs.user_codes)),
            ("smallLanguageCodes", FieldValue::Array(langs.small_codes)),
            ("uSmallLanguageCodes", FieldValue::Array(langs.user_small_codes)),
        ]
        .into_iter()
        .collect();

        let service: Fields = match &stream.service {
            Some(info) => {
                let (name, short) = service_names(&info.id);
                [
                    ("id", FieldValue::Str(info.id.clone())),
                    ("name", FieldValue::Str(name.to_string())),
                    ("shortName", FieldValue::Str(short.to_string())),
                    ("cached", FieldValue::Bool(info.cached)),
                ]
                .into_iter()
                .collect()
            }
            None => Fields::new(),
        };

        let addon: Fields = [
            ("name", FieldValue::Str(stream.addon.name.clone())),
            ("instanceId", FieldValue::Str(stream.addon.instance_id.clone())),
            ("presetId", FieldValue::Str(stream.addon.preset_id.clone())),
            ("manifestUrl", FieldValue::Str(stream.addon.manifest_url.clone())),
        ]
        .into_iter()
        .collect();

        let config: Fields = [("addonName", FieldValue::Str(context.addon_name.clone()))]
            .into_iter()
            .collect();

        let mut value = Self {
            stream: stream_fields,
            service,
            addon,
            config,
            debug: Fields::new(),
        };
        if with_debug {
            value.debug = value.debug_fields();
        }
        value
    }

    fn debug_fields(&self) -> Fields {
        let snapshot = json!({
            "stream": self.stream,
            "service": self.service,
            "addon": self.addon,
            "config": self.config,
        });
        let compact = serde_json::to_string(&snapshot).unwrap_or_default();
        let pretty = serde_json::to_string_pretty(&snapshot).unwrap_or_default();
        [("json", FieldValue::Str(compact)), ("jsonf", FieldValue::Str(pretty))]
            .into_iter()
            .collect()
    }

    #[must_use]
    pub fn get(&self, section: Section, field: &str) -> &FieldValue {
        let fields = match section {
            Section::Stream => &self.stream,
            Section::Service => &self.service,
            Section::Addon => &self.addon,
            Section::Config => &self.config,
            Section::Debug => &self.debug,
        };
        fields.get(field).unwrap_or(&ABSENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguagePreferences;
    use crate::models::{Addon, ParsedFile, ServiceInfo, StreamType};
    use std::sync::Arc;

    fn context() -> FormatContext {
        FormatContext {
            addon_name: "StreamFed".into(),
            languages: LanguagePreferences::default(),
        }
    }

    fn sample() -> ParsedStream {
        let addon = Arc::new(Addon::new("tio", "Torrentio", "https://t.example/manifest.json"));
        let mut stream = ParsedStream::new("tio.0", addon, StreamType::Debrid);
        stream.size = Some(1_500_000_000);
        stream.seeders = Some(0);
        stream.service = Some(ServiceInfo { id: "realdebrid".into(), cached: true });
        stream.parsed_file = Some(ParsedFile {
            resolution: Some("1080p".into()),
            seasons: vec![1],
            episodes: vec![2, 3],
            ..ParsedFile::default()
        });
        stream
    }

    #[test]
    fn every_whitelisted_stream_field_is_projected() {
        let value = ParseValue::build(&sample(), &context(), false);
        for field in STREAM_FIELDS {
            assert!(value.stream.contains_key(field), "missing {field}");
        }
    }

    #[test]
    fn projects_stream_service_and_config() {
        let value = ParseValue::build(&sample(), &context(), false);
        assert_eq!(value.get(Section::Stream, "resolution"), &FieldValue::Str("1080p".into()));
        assert_eq!(value.get(Section::Stream, "seeders"), &FieldValue::Number(0.0));
        assert_eq!(value.get(Section::Stream, "indexer"), &FieldValue::Absent);
        assert_eq!(
            value.get(Section::Stream, "seasonEpisode"),
            &FieldValue::Array(vec!["S01E02".into(), "S01E03".into()])
        );
        assert_eq!(value.get(Section::Service, "shortName"), &FieldValue::Str("RD".into()));
        assert_eq!(value.get(Section::Config, "addonName"), &FieldValue::Str("StreamFed".into()));
        assert_eq!(value.get(Section::Debug, "json"), &FieldValue::Absent);
    }

    #[test]
    fn debug_section_serialises_projection() {
        let value = ParseValue::build(&sample(), &context(), true);
        let FieldValue::Str(json) = value.get(Section::Debug, "json") else {
            panic!("debug.json should be a string");
        };
        let parsed: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(parsed["stream"]["resolution"], "1080p");
        assert_eq!(parsed["stream"]["indexer"], serde_json::Value::Null);
        assert_eq!(parsed["service"]["cached"], true);
    }

    #[test]
    fn rendering_and_existence() {
        assert_eq!(FieldValue::Number(3.0).render(), "3");
        assert_eq!(FieldValue::Number(2.5).render(), "2.5");
        assert_eq!(FieldValue::Array(vec!["a".into(), "b".into()]).render(), "a, b");
        assert!(FieldValue::Number(0.0).exists());
        assert!(!FieldValue::Str(String::new()).exists());
        assert!(!FieldValue::Array(vec![]).exists());
    }

    #[test]
    fn sections_know_their_fields() {
        assert_eq!(Section::parse("stream"), Some(Section::Stream));
        assert_eq!(Section::parse("tools"), None);
        assert_eq!(Section::Stream.field("resolution"), Some("resolution"));
        assert_eq!(Section::Stream.field("doesnotexist"), None);
    }
}
