//! Core data types shared by the registrar, the pipeline and the handlers.
//!
//! Wire types (manifests, metas, subtitles, response streams) use the
//! camelCase field names of the addon protocol. Internal records
//! ([`Addon`], [`ParsedStream`]) keep Rust naming since they only travel
//! through configuration files and debug output.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Id prefix routed to locally generated error metas.
pub const ERROR_META_PREFIX: &str = "aiostreamserror";

/// Id prefixes that mark anime-style ids.
pub const ANIME_ID_PREFIXES: &[&str] = &["kitsu:", "mal:", "anilist:", "anidb:"];

fn default_timeout_ms() -> u64 {
    15_000
}

fn is_false(value: &bool) -> bool {
    !*value
}

// ═══════════════════════════════════════════════════════════════════════
// Resources
// ═══════════════════════════════════════════════════════════════════════

/// Resource names an addon can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Stream,
    Catalog,
    Meta,
    Subtitles,
    AddonCatalog,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Stream,
        ResourceKind::Catalog,
        ResourceKind::Meta,
        ResourceKind::Subtitles,
        ResourceKind::AddonCatalog,
    ];

    /// Name used in manifests and request paths.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Catalog => "catalog",
            Self::Meta => "meta",
            Self::Subtitles => "subtitles",
            Self::AddonCatalog => "addon_catalog",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown resource: {s}"))
    }
}

/// A resource after shorthand expansion, either for one addon or merged
/// across all of them.
///
/// `id_prefixes == None` means the resource applies to every id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: ResourceKind,
    pub types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_prefixes: Option<Vec<String>>,
}

impl Resource {
    /// Whether this resource declares the given content type.
    #[must_use]
    pub fn supports_type(&self, r#type: &str) -> bool {
        self.types.iter().any(|t| t == r#type)
    }

    /// Whether the id passes the prefix restriction. No prefixes matches all.
    #[must_use]
    pub fn matches_id(&self, id: &str) -> bool {
        match &self.id_prefixes {
            None => true,
            Some(prefixes) => prefixes.iter().any(|p| id.starts_with(p.as_str())),
        }
    }

    /// Whether an id prefix restriction is declared and matches.
    #[must_use]
    pub fn matches_prefix(&self, id: &str) -> bool {
        self.id_prefixes
            .as_ref()
            .is_some_and(|prefixes| prefixes.iter().any(|p| id.starts_with(p.as_str())))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Addons & manifests
// ═══════════════════════════════════════════════════════════════════════

/// Configuration for one upstream addon instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Addon {
    /// Unique per session; used to namespace catalog ids.
    pub instance_id: String,
    /// Which kind of addon this is (e.g. `"torrentio"`, `"custom"`).
    #[serde(default = "default_preset")]
    pub preset_id: String,
    pub name: String,
    pub manifest_url: String,
    /// Resource allow-list. `None` allows everything the manifest declares.
    #[serde(default)]
    pub resources: Option<Vec<ResourceKind>>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub force_to_top: bool,
    #[serde(default)]
    pub result_passthrough: bool,
    #[serde(default)]
    pub library: bool,
}

fn default_preset() -> String {
    "custom".to_string()
}

impl Addon {
    /// Minimal addon record, mostly useful in tests and tooling.
    pub fn new(instance_id: impl Into<String>, name: impl Into<String>, manifest_url: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            preset_id: default_preset(),
            name: name.into(),
            manifest_url: manifest_url.into(),
            resources: None,
            timeout_ms: default_timeout_ms(),
            force_to_top: false,
            result_passthrough: false,
            library: false,
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether the allow-list admits the resource.
    #[must_use]
    pub fn allows(&self, kind: ResourceKind) -> bool {
        self.resources.as_ref().map_or(true, |list| list.contains(&kind))
    }
}

/// A resource entry as it appears in a manifest: bare name or full object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestResource {
    Short(String),
    Full(ResourceDeclaration),
}

/// Full resource object from a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDeclaration {
    pub name: String,
    #[serde(default)]
    pub types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_prefixes: Option<Vec<String>>,
}

/// Extra parameter a catalog accepts (`genre`, `search`, `skip`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogExtra {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options_limit: Option<u32>,
}

/// Catalog or addon-catalog declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCatalog {
    #[serde(rename = "type")]
    pub r#type: String,
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<CatalogExtra>,
}

impl ManifestCatalog {
    #[must_use]
    pub fn extra(&self, name: &str) -> Option<&CatalogExtra> {
        self.extra.iter().find(|e| e.name == name)
    }
}

/// Capabilities document served by an addon at `manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub resources: Vec<ManifestResource>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_prefixes: Option<Vec<String>>,
    #[serde(default)]
    pub catalogs: Vec<ManifestCatalog>,
    #[serde(default)]
    pub addon_catalogs: Vec<ManifestCatalog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior_hints: Option<Value>,
}

impl Manifest {
    /// Structural checks applied before a manifest is admitted.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("manifest has no id".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("manifest has no name".to_string());
        }
        if self.resources.is_empty() {
            return Err("manifest declares no resources".to_string());
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Streams
// ═══════════════════════════════════════════════════════════════════════

/// How a stream is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Http,
    P2p,
    Debrid,
    Live,
    Youtube,
    External,
    Usenet,
}

impl StreamType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::P2p => "p2p",
            Self::Debrid => "debrid",
            Self::Live => "live",
            Self::Youtube => "youtube",
            Self::External => "external",
            Self::Usenet => "usenet",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Debrid/usenet service backing a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: String,
    pub cached: bool,
}

/// Fields recovered from a release filename.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedFile {
    pub title: Option<String>,
    pub year: Option<u32>,
    pub seasons: Vec<u32>,
    pub episodes: Vec<u32>,
    pub resolution: Option<String>,
    pub quality: Option<String>,
    pub encode: Option<String>,
    pub release_group: Option<String>,
    pub visual_tags: Vec<String>,
    pub audio_tags: Vec<String>,
    pub audio_channels: Vec<String>,
    pub languages: Vec<String>,
    pub edition: Option<String>,
    pub repack: bool,
}

/// Error payload: title plus description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub title: String,
    pub description: String,
}

impl ErrorEntry {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Addon-agnostic stream record that flows through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedStream {
    pub id: String,
    /// Owning addon, shared with the session.
    pub addon: Arc<Addon>,
    #[serde(rename = "type")]
    pub stream_type: StreamType,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub yt_id: Option<String>,
    #[serde(default)]
    pub info_hash: Option<String>,
    #[serde(default)]
    pub file_idx: Option<u32>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub folder_name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub folder_size: Option<u64>,
    /// Milliseconds.
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub indexer: Option<String>,
    #[serde(default)]
    pub seeders: Option<u32>,
    #[serde(default)]
    pub age: Option<String>,
    #[serde(default)]
    pub library: bool,
    #[serde(default)]
    pub service: Option<ServiceInfo>,
    #[serde(default)]
    pub parsed_file: Option<ParsedFile>,
    #[serde(default)]
    pub proxied: bool,
    #[serde(default)]
    pub regex_matched: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<ErrorEntry>,
    #[serde(default)]
    pub request_headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub response_headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub binge_group: Option<String>,
    #[serde(default)]
    pub not_web_ready: bool,
}

impl ParsedStream {
    /// Empty stream record of the given type owned by `addon`.
    pub fn new(id: impl Into<String>, addon: Arc<Addon>, stream_type: StreamType) -> Self {
        Self {
            id: id.into(),
            addon,
            stream_type,
            url: None,
            external_url: None,
            yt_id: None,
            info_hash: None,
            file_idx: None,
            filename: None,
            folder_name: None,
            size: None,
            folder_size: None,
            duration: None,
            indexer: None,
            seeders: None,
            age: None,
            library: false,
            service: None,
            parsed_file: None,
            proxied: false,
            regex_matched: None,
            message: None,
            error: None,
            request_headers: None,
            response_headers: None,
            binge_group: None,
            not_web_ready: false,
        }
    }

    fn file(&self) -> Option<&ParsedFile> {
        self.parsed_file.as_ref()
    }

    #[must_use]
    pub fn resolution(&self) -> Option<&str> {
        self.file().and_then(|f| f.resolution.as_deref())
    }

    #[must_use]
    pub fn quality(&self) -> Option<&str> {
        self.file().and_then(|f| f.quality.as_deref())
    }

    #[must_use]
    pub fn release_group(&self) -> Option<&str> {
        self.file().and_then(|f| f.release_group.as_deref())
    }

    #[must_use]
    pub fn languages(&self) -> &[String] {
        self.file().map_or(&[], |f| f.languages.as_slice())
    }

    /// Whether the stream is backed by a debrid/usenet service.
    #[must_use]
    pub fn is_service_backed(&self) -> bool {
        self.service.is_some()
    }

    /// Service-backed and not yet cached by that service.
    #[must_use]
    pub fn is_uncached(&self) -> bool {
        self.service.as_ref().is_some_and(|s| !s.cached)
    }
}

/// Hints the client uses when playing a stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binge_group: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub not_web_ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_headers: Option<ProxyHeaders>,
}

/// Headers a client must send/expect when playing a stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyHeaders {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HashMap<String, String>>,
}

/// Stream object returned to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseStream {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_idx: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    #[serde(default)]
    pub behavior_hints: BehaviorHints,
}

impl ResponseStream {
    /// Combine a pipeline record with its formatted display text.
    #[must_use]
    pub fn from_parsed(stream: &ParsedStream, name: String, description: String) -> Self {
        let proxy_headers = if stream.request_headers.is_some() || stream.response_headers.is_some() {
            Some(ProxyHeaders {
                request: stream.request_headers.clone(),
                response: stream.response_headers.clone(),
            })
        } else {
            None
        };
        Self {
            name,
            description,
            url: stream.url.clone(),
            info_hash: stream.info_hash.clone(),
            file_idx: stream.file_idx,
            yt_id: stream.yt_id.clone(),
            external_url: stream.external_url.clone(),
            behavior_hints: BehaviorHints {
                filename: stream.filename.clone(),
                video_size: stream.size,
                binge_group: stream.binge_group.clone(),
                not_web_ready: stream.not_web_ready,
                proxy_headers,
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Metas, subtitles, addon catalogs
// ═══════════════════════════════════════════════════════════════════════

/// Meta or meta preview. Unknown fields pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaItem {
    pub id: String,
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Subtitle track. Unknown fields pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtitle {
    #[serde(default)]
    pub id: String,
    pub url: String,
    pub lang: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Entry in an addon catalog (a catalog of other addons).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonCatalogEntry {
    pub transport_name: String,
    pub transport_url: String,
    #[serde(default)]
    pub manifest: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ═══════════════════════════════════════════════════════════════════════
// Responses
// ═══════════════════════════════════════════════════════════════════════

/// Uniform envelope returned by every request handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayResponse<T> {
    pub success: bool,
    pub data: T,
    pub errors: Vec<ErrorEntry>,
}

impl<T> GatewayResponse<T> {
    pub fn ok(data: T, errors: Vec<ErrorEntry>) -> Self {
        Self {
            success: true,
            data,
            errors,
        }
    }

    pub fn failure(data: T, errors: Vec<ErrorEntry>) -> Self {
        Self {
            success: false,
            data,
            errors,
        }
    }
}

/// Catalog/subtitle extras as ordered `key=value` pairs.
pub type Extras = Vec<(String, String)>;

/// Parse `genre=Action&skip=100` into ordered pairs.
#[must_use]
pub fn parse_extras(raw: &str) -> Extras {
    raw.trim_end_matches(".json")
        .split('&')
        .filter(|part| !part.is_empty())
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            let value = urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string());
            Some((key.to_string(), value))
        })
        .collect()
}

/// Encode extras back into path form.
#[must_use]
pub fn encode_extras(extras: &Extras) -> String {
    extras
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Content type used for sorting: `anime` for anime-style ids.
#[must_use]
pub fn effective_type<'a>(r#type: &'a str, id: &str) -> &'a str {
    if ANIME_ID_PREFIXES.iter().any(|p| id.starts_with(p)) {
        "anime"
    } else {
        r#type
    }
}
