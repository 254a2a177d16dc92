//! Release filename parsing and raw stream normalisation.
//!
//! [`RegexReleaseParser`] recovers resolution, quality, codec, tags,
//! languages and episode numbers from a scene-style filename.
//! [`DefaultStreamParser`] turns a raw addon stream object into a
//! [`ParsedStream`], detecting the delivery type and reading the size,
//! seeder and indexer lines addons embed in their descriptions.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::models::{Addon, ParsedFile, ParsedStream, ServiceInfo, StreamType};

/// Filename → structured release fields.
pub trait ReleaseParser: Send + Sync {
    fn parse(&self, filename: &str) -> ParsedFile;
}

/// Raw addon stream object → pipeline record. `None` drops unusable entries.
pub trait StreamParser: Send + Sync {
    fn parse(&self, addon: &Arc<Addon>, raw: &Value, index: usize) -> Option<ParsedStream>;
}

// ═══════════════════════════════════════════════════════════════════════
// Release parser
// ═══════════════════════════════════════════════════════════════════════

fn re(pattern: &str) -> Regex {
    // Patterns are literals in this file; a typo is a programming error.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern}: {e}"))
}

fn table(entries: &[(&str, &str)]) -> Vec<(Regex, String)> {
    entries
        .iter()
        .map(|(pattern, label)| (re(&format!(r"(?i)(?:^|[^a-z0-9]){pattern}(?:[^a-z0-9]|$)")), (*label).to_string()))
        .collect()
}

static RESOLUTIONS: LazyLock<Vec<(Regex, String)>> = LazyLock::new(|| {
    table(&[
        (r"(?:2160p|4k|uhd)", "2160p"),
        (r"1440p", "1440p"),
        (r"(?:1080p|1080i|fhd)", "1080p"),
        (r"(?:720p|hd)", "720p"),
        (r"576p", "576p"),
        (r"480p", "480p"),
        (r"360p", "360p"),
    ])
});

static QUALITIES: LazyLock<Vec<(Regex, String)>> = LazyLock::new(|| {
    table(&[
        (r"(?:blu-?ray[ .\-]?remux|bd[ .\-]?remux|remux)", "BluRay REMUX"),
        (r"(?:blu-?ray|bd-?rip|br-?rip|bdrip)", "BluRay"),
        (r"web[ .\-]?dl", "WEB-DL"),
        (r"(?:web-?rip|web)", "WEBRip"),
        (r"hd-?rip", "HDRip"),
        (r"(?:hdtv|pdtv)", "HDTV"),
        (r"dvd-?rip", "DVDRip"),
        (r"(?:hd-?cam|cam-?rip|cam)", "CAM"),
        (r"(?:telesync|hdts|ts)", "TS"),
        (r"(?:screener|scr)", "SCR"),
    ])
});

static ENCODES: LazyLock<Vec<(Regex, String)>> = LazyLock::new(|| {
    table(&[
        (r"(?:x265|h\.?265|hevc)", "HEVC"),
        (r"(?:x264|h\.?264|avc)", "AVC"),
        (r"av1", "AV1"),
        (r"xvid", "XviD"),
    ])
});

static VISUAL_TAGS: LazyLock<Vec<(Regex, String)>> = LazyLock::new(|| {
    table(&[
        (r"hdr10(?:\+|plus)", "HDR10+"),
        (r"hdr10", "HDR10"),
        (r"hdr", "HDR"),
        (r"(?:dv|dovi|dolby[ .\-]?vision)", "DV"),
        (r"imax", "IMAX"),
        (r"10-?bit", "10bit"),
        (r"3d", "3D"),
    ])
});

static AUDIO_TAGS: LazyLock<Vec<(Regex, String)>> = LazyLock::new(|| {
    table(&[
        (r"atmos", "Atmos"),
        (r"true-?hd", "TrueHD"),
        (r"dts[ .\-]?hd(?:[ .\-]?ma)?", "DTS-HD MA"),
        (r"dts", "DTS"),
        (r"(?:ddp|dd\+|e-?ac-?3)", "DD+"),
        (r"(?:dd|ac-?3)", "DD"),
        (r"aac", "AAC"),
        (r"flac", "FLAC"),
        (r"opus", "Opus"),
    ])
});

static AUDIO_CHANNELS: LazyLock<Vec<(Regex, String)>> =
    LazyLock::new(|| table(&[(r"7[ .]1", "7.1"), (r"5[ .]1", "5.1"), (r"2[ .]0", "2.0")]));

static LANGUAGES: LazyLock<Vec<(Regex, String)>> = LazyLock::new(|| {
    table(&[
        (r"(?:multi|dual[ .\-]?audio)", "Multi"),
        (r"(?:english|eng)", "English"),
        (r"(?:french|fran[cç]ais|vff|vf|truefrench)", "French"),
        (r"(?:german|deutsch|ger)", "German"),
        (r"(?:spanish|espa[nñ]ol|castellano|spa)", "Spanish"),
        (r"(?:latino|lat)", "Latino"),
        (r"(?:italian|italiano|ita)", "Italian"),
        (r"(?:portuguese|portugu[eê]s|por)", "Portuguese"),
        (r"(?:russian|rus)", "Russian"),
        (r"(?:japanese|jap|jpn)", "Japanese"),
        (r"(?:korean|kor)", "Korean"),
        (r"(?:chinese|chi|mandarin)", "Chinese"),
        (r"(?:hindi|hin)", "Hindi"),
        (r"(?:arabic|ara)", "Arabic"),
        (r"(?:dutch|nld)", "Dutch"),
        (r"(?:polish|pol)", "Polish"),
        (r"(?:turkish|tur)", "Turkish"),
    ])
});

static EDITIONS: LazyLock<Vec<(Regex, String)>> = LazyLock::new(|| {
    table(&[
        (r"extended", "Extended"),
        (r"director'?s[ .\-]?cut", "Director's Cut"),
        (r"unrated", "Unrated"),
        (r"remastered", "Remastered"),
        (r"theatrical", "Theatrical"),
    ])
});

static REPACK: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\b(?:repack|proper)\b"));
static YEAR: LazyLock<Regex> = LazyLock::new(|| re(r"(?:^|[^0-9])((?:19|20)\d{2})(?:[^0-9p]|$)"));
static SEASON_EPISODE: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\bS(\d{1,2})[ .]?E(\d{1,4})(?:-?E(\d{1,4}))?"));
static CROSS_EPISODE: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\b(\d{1,2})x(\d{1,3})\b"));
static SEASON_ONLY: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\b(?:S|Season[ .])(\d{1,2})\b"));
static GROUP_SUFFIX: LazyLock<Regex> = LazyLock::new(|| re(r"-([A-Za-z0-9]{2,})$"));
static GROUP_PREFIX: LazyLock<Regex> = LazyLock::new(|| re(r"^\[([^\]]+)\]"));
static EXTENSION: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\.(?:mkv|mp4|avi|m4v|ts|webm|mov|wmv)$"));
static TITLE_STOP: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)[ .\-_(\[](?:(?:19|20)\d{2}|S\d{1,2}E\d|S\d{1,2}\b|\d{3,4}p|4k|web|blu-?ray|hdtv|remux)")
});

fn matches_all(table: &[(Regex, String)], text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for (pattern, label) in table {
        if pattern.is_match(text) && !found.contains(label) {
            found.push(label.clone());
        }
    }
    found
}

fn first_match(table: &[(Regex, String)], text: &str) -> Option<String> {
    table
        .iter()
        .find(|(pattern, _)| pattern.is_match(text))
        .map(|(_, label)| label.clone())
}

/// Regex-driven release parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexReleaseParser;

impl RegexReleaseParser {
    fn seasons_and_episodes(name: &str) -> (Vec<u32>, Vec<u32>) {
        let mut seasons = Vec::new();
        let mut episodes = Vec::new();
        let push = |list: &mut Vec<u32>, value: Option<u32>| {
            if let Some(v) = value {
                if !list.contains(&v) {
                    list.push(v);
                }
            }
        };

        for caps in SEASON_EPISODE.captures_iter(name) {
            push(&mut seasons, caps.get(1).and_then(|m| m.as_str().parse().ok()));
            let start: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());
            let end: Option<u32> = caps.get(3).and_then(|m| m.as_str().parse().ok());
            match (start, end) {
                (Some(s), Some(e)) if e >= s && e - s < 100 => {
                    for ep in s..=e {
                        push(&mut episodes, Some(ep));
                    }
                }
                _ => push(&mut episodes, start),
            }
        }
        if seasons.is_empty() {
            if let Some(caps) = CROSS_EPISODE.captures(name) {
                push(&mut seasons, caps.get(1).and_then(|m| m.as_str().parse().ok()));
                push(&mut episodes, caps.get(2).and_then(|m| m.as_str().parse().ok()));
            }
        }
        if seasons.is_empty() {
            for caps in SEASON_ONLY.captures_iter(name) {
                push(&mut seasons, caps.get(1).and_then(|m| m.as_str().parse().ok()));
            }
        }
        (seasons, episodes)
    }

    fn title(name: &str) -> Option<String> {
        let name = GROUP_PREFIX.replace(name, "");
        let end = TITLE_STOP.find(&name).map_or(name.len(), |m| m.start());
        let title = name[..end]
            .replace(['.', '_'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        (!title.is_empty()).then_some(title)
    }
}

impl ReleaseParser for RegexReleaseParser {
    fn parse(&self, filename: &str) -> ParsedFile {
        let name = EXTENSION.replace(filename.trim(), "");
        let name = name.as_ref();

        let (seasons, episodes) = Self::seasons_and_episodes(name);
        let release_group = GROUP_SUFFIX
            .captures(name)
            .or_else(|| GROUP_PREFIX.captures(name))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string());

        ParsedFile {
            title: Self::title(name),
            year: YEAR
                .captures(name)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok()),
            seasons,
            episodes,
            resolution: first_match(&RESOLUTIONS, name),
            quality: first_match(&QUALITIES, name),
            encode: first_match(&ENCODES, name),
            release_group,
            visual_tags: matches_all(&VISUAL_TAGS, name),
            audio_tags: matches_all(&AUDIO_TAGS, name),
            audio_channels: matches_all(&AUDIO_CHANNELS, name),
            languages: matches_all(&LANGUAGES, name),
            edition: first_match(&EDITIONS, name),
            repack: REPACK.is_match(name),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Stream parser
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawStream {
    name: Option<String>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    yt_id: Option<String>,
    info_hash: Option<String>,
    file_idx: Option<u32>,
    external_url: Option<String>,
    behavior_hints: RawHints,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawHints {
    filename: Option<String>,
    video_size: Option<u64>,
    binge_group: Option<String>,
    not_web_ready: bool,
    proxy_headers: Option<RawProxyHeaders>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawProxyHeaders {
    request: Option<HashMap<String, String>>,
    response: Option<HashMap<String, String>>,
}

/// `[RD+]`, `[AD download]`, `[TB⚡]`...
static SERVICE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| re(r"\[(RD|AD|PM|DL|TB|OC|PKP|ED|EN)(\+|⚡| download|⏳)?\]"));
static SIZE_LINE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)(?:💾|📦)\s*(\d+(?:[.,]\d+)?)\s*(TB|GB|MB|KB|B)\b"));
static SEEDERS_LINE: LazyLock<Regex> = LazyLock::new(|| re(r"👤\s*(\d+)"));
static INDEXER_LINE: LazyLock<Regex> = LazyLock::new(|| re(r"(?:⚙️|🔍)\s*([^\s💾📦👤]+)"));

fn service_id(code: &str) -> &'static str {
    match code {
        "RD" => "realdebrid",
        "AD" => "alldebrid",
        "PM" => "premiumize",
        "DL" => "debridlink",
        "TB" => "torbox",
        "OC" => "offcloud",
        "PKP" => "pikpak",
        "ED" => "easydebrid",
        _ => "easynews",
    }
}

/// Parse `1.5 GB` style sizes (binary multiples).
#[must_use]
pub fn parse_size(value: &str, unit: &str) -> Option<u64> {
    let number: f64 = value.replace(',', ".").parse().ok()?;
    let multiplier = match unit.to_ascii_uppercase().as_str() {
        "TB" => 1024_f64.powi(4),
        "GB" => 1024_f64.powi(3),
        "MB" => 1024_f64.powi(2),
        "KB" => 1024_f64,
        _ => 1.0,
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some((number * multiplier).round() as u64)
}

/// Default Stremio-protocol stream parser.
#[derive(Clone)]
pub struct DefaultStreamParser {
    release: Arc<dyn ReleaseParser>,
}

impl Default for DefaultStreamParser {
    fn default() -> Self {
        Self::new(Arc::new(RegexReleaseParser))
    }
}

impl DefaultStreamParser {
    pub fn new(release: Arc<dyn ReleaseParser>) -> Self {
        Self { release }
    }
}

impl StreamParser for DefaultStreamParser {
    fn parse(&self, addon: &Arc<Addon>, raw: &Value, index: usize) -> Option<ParsedStream> {
        let raw: RawStream = match serde_json::from_value(raw.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(addon = %addon.instance_id, error = %e, "Skipping malformed stream");
                return None;
            }
        };

        let name = raw.name.clone().unwrap_or_default();
        let description = raw.description.clone().or_else(|| raw.title.clone()).unwrap_or_default();

        let service = SERVICE_MARKER.captures(&name).map(|caps| ServiceInfo {
            id: service_id(&caps[1]).to_string(),
            cached: caps.get(2).is_some_and(|m| matches!(m.as_str(), "+" | "⚡")),
        });

        let stream_type = if raw.info_hash.is_some() && raw.url.is_none() {
            StreamType::P2p
        } else if raw.yt_id.is_some() {
            StreamType::Youtube
        } else if raw.url.is_some() && service.is_some() {
            StreamType::Debrid
        } else if raw.url.is_some() {
            StreamType::Http
        } else if raw.external_url.is_some() {
            StreamType::External
        } else {
            debug!(addon = %addon.instance_id, "Skipping stream without a locator");
            return None;
        };

        let filename = raw
            .behavior_hints
            .filename
            .clone()
            .or_else(|| description.lines().next().map(str::trim).filter(|l| !l.is_empty()).map(String::from));

        let mut parsed_file = filename.as_deref().map(|f| self.release.parse(f)).unwrap_or_default();
        if parsed_file.resolution.is_none() {
            parsed_file.resolution = self.release.parse(&name).resolution;
        }

        let size = raw.behavior_hints.video_size.or_else(|| {
            SIZE_LINE
                .captures(&description)
                .and_then(|c| parse_size(&c[1], &c[2]))
        });

        let mut stream = ParsedStream::new(format!("{}.{index}", addon.instance_id), Arc::clone(addon), stream_type);
        stream.url = raw.url;
        stream.external_url = raw.external_url;
        stream.yt_id = raw.yt_id;
        stream.info_hash = raw.info_hash.map(|h| h.to_lowercase());
        stream.file_idx = raw.file_idx;
        stream.filename = filename;
        stream.size = size;
        stream.seeders = SEEDERS_LINE.captures(&description).and_then(|c| c[1].parse().ok());
        stream.indexer = INDEXER_LINE.captures(&description).map(|c| c[1].to_string());
        stream.library = addon.library;
        stream.service = service;
        stream.parsed_file = Some(parsed_file);
        stream.binge_group = raw.behavior_hints.binge_group;
        stream.not_web_ready = raw.behavior_hints.not_web_ready;
        if let Some(headers) = raw.behavior_hints.proxy_headers {
            stream.request_headers = headers.request;
            stream.response_headers = headers.response;
        }
        Some(stream)
    }
}
