//! User configuration loaded from `~/.config/streamfed/config.toml`.
//!
//! One [`UserConfig`] describes a whole session: the addons to federate and
//! every policy applied to their results. Everything except `addons` has a
//! default, so a minimal file only lists addons:
//!
//! ```toml
//! [[addons]]
//! instance_id = "tio"
//! name = "Torrentio"
//! manifest_url = "https://torrentio.strem.fun/manifest.json"
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{Addon, StreamType};

/// Complete configuration for one user session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Identity used to scope cache entries (precache tickets, shuffles).
    pub user_id: String,
    /// Name of the merged addon shown to the client.
    pub addon_name: String,
    pub addons: Vec<Addon>,
    /// Exclude addons whose manifest fails instead of aborting init.
    pub skip_failed_addons: bool,
    pub manifest_cache_secs: u64,
    pub exclude_uncached: bool,
    pub groups: Option<FetchGroups>,
    pub languages: LanguagePreferences,
    pub filters: FilterConfig,
    pub preferred_patterns: Vec<NamedPattern>,
    pub sort: SortConfig,
    pub result_limits: ResultLimits,
    pub proxy: ProxyConfig,
    pub formatter: FormatterConfig,
    pub precache: PrecacheConfig,
    pub catalog_modifications: Vec<CatalogModification>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            user_id: "default".to_string(),
            addon_name: "StreamFed".to_string(),
            addons: Vec::new(),
            skip_failed_addons: true,
            manifest_cache_secs: 600,
            exclude_uncached: false,
            groups: None,
            languages: LanguagePreferences::default(),
            filters: FilterConfig::default(),
            preferred_patterns: Vec::new(),
            sort: SortConfig::default(),
            result_limits: ResultLimits::default(),
            proxy: ProxyConfig::default(),
            formatter: FormatterConfig::default(),
            precache: PrecacheConfig::default(),
            catalog_modifications: Vec::new(),
        }
    }
}

/// Addons fetched in ordered groups; later groups only run while the
/// cumulative result count is below `min_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchGroups {
    pub groups: Vec<Vec<String>>,
    #[serde(default = "default_min_results")]
    pub min_results: usize,
}

fn default_min_results() -> usize {
    1
}

/// Languages the user cares about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguagePreferences {
    pub preferred: Vec<String>,
    pub required: Vec<String>,
    pub included: Vec<String>,
}

impl LanguagePreferences {
    /// Whether the language appears in any of the user's lists.
    #[must_use]
    pub fn contains(&self, language: &str) -> bool {
        self.preferred
            .iter()
            .chain(&self.required)
            .chain(&self.included)
            .any(|l| l.eq_ignore_ascii_case(language))
    }

    /// Position in the preferred list, used for sorting.
    #[must_use]
    pub fn preferred_rank(&self, language: &str) -> Option<usize> {
        self.preferred.iter().position(|l| l.eq_ignore_ascii_case(language))
    }
}

/// Simple exclusion rules applied by the default filter stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub excluded_resolutions: Vec<String>,
    pub excluded_qualities: Vec<String>,
    pub excluded_stream_types: Vec<StreamType>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    /// Regexes matched against the filename; a match excludes the stream.
    pub excluded_patterns: Vec<String>,
}

/// Named regex used by the precompute and sort stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedPattern {
    pub name: String,
    pub pattern: String,
}

/// Sort keys understood by the default sorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Cached,
    Resolution,
    Quality,
    Size,
    Seeders,
    Language,
    RegexPatterns,
    Library,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCriterion {
    pub key: SortKey,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortCriterion {
    #[must_use]
    pub fn desc(key: SortKey) -> Self {
        Self {
            key,
            direction: SortDirection::Desc,
        }
    }
}

/// Sort criteria, with optional overrides per effective content type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    pub criteria: Vec<SortCriterion>,
    pub per_type: HashMap<String, Vec<SortCriterion>>,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            criteria: vec![
                SortCriterion::desc(SortKey::Cached),
                SortCriterion::desc(SortKey::Resolution),
                SortCriterion::desc(SortKey::Quality),
                SortCriterion::desc(SortKey::Size),
            ],
            per_type: HashMap::new(),
        }
    }
}

impl SortConfig {
    /// Criteria for the given effective type.
    #[must_use]
    pub fn criteria_for(&self, effective_type: &str) -> &[SortCriterion] {
        self.per_type
            .get(effective_type)
            .map_or(self.criteria.as_slice(), Vec::as_slice)
    }
}

/// Per-category result quotas. `None` leaves a category unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultLimits {
    pub global: Option<usize>,
    pub indexer: Option<usize>,
    pub release_group: Option<usize>,
    pub resolution: Option<usize>,
    pub quality: Option<usize>,
    pub addon: Option<usize>,
    pub stream_type: Option<usize>,
    pub service: Option<usize>,
}

impl ResultLimits {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Proxy backends that can rewrite stream URLs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyBackendKind {
    #[default]
    Mediaflow,
}

/// Proxy settings for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub id: ProxyBackendKind,
    pub url: Option<String>,
    pub credentials: Option<String>,
    /// Public IP to announce instead of asking the backend.
    pub public_ip: Option<String>,
    /// Addon instance ids whose streams get proxied. Empty allows all.
    pub proxied_addons: Vec<String>,
    /// Service ids whose streams get proxied. Empty allows all.
    pub proxied_services: Vec<String>,
}

/// Built-in display templates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatterPreset {
    #[default]
    Default,
    Torrentio,
    Minimal,
}

/// Display templates. Explicit templates override the preset's.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatterConfig {
    pub preset: FormatterPreset,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Next-episode precaching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecacheConfig {
    pub next_episode: bool,
    /// Touch an uncached stream even when cached results exist.
    pub always: bool,
    pub cooldown_secs: u64,
}

impl Default for PrecacheConfig {
    fn default() -> Self {
        Self {
            next_episode: false,
            always: false,
            cooldown_secs: 24 * 60 * 60,
        }
    }
}

/// User edit to one merged catalog, keyed by namespaced id and type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogModification {
    pub id: String,
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub name: Option<String>,
    /// Make the genre extra required so the catalog only shows on discover.
    #[serde(default)]
    pub only_on_discover: bool,
    #[serde(default)]
    pub override_type: Option<String>,
    #[serde(default)]
    pub disable_search: bool,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub persist_shuffle_hours: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl UserConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that cannot be expressed through serde alone.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for addon in &self.addons {
            if addon.instance_id.trim().is_empty() {
                bail!("addon '{}' has an empty instance_id", addon.name);
            }
            if addon.instance_id.contains('.') {
                bail!("addon instance_id '{}' must not contain '.'", addon.instance_id);
            }
            if !seen.insert(addon.instance_id.as_str()) {
                bail!("duplicate addon instance_id '{}'", addon.instance_id);
            }
            url::Url::parse(&addon.manifest_url)
                .with_context(|| format!("invalid manifest_url for addon '{}'", addon.instance_id))?;
            if addon.timeout_ms == 0 {
                bail!("addon '{}' timeout_ms must be > 0", addon.instance_id);
            }
        }

        if self.proxy.enabled {
            let Some(url) = &self.proxy.url else {
                bail!("proxy.url must be set when the proxy is enabled");
            };
            url::Url::parse(url).context("invalid proxy.url")?;
        }

        let limits = &self.result_limits;
        let all_limits = [
            limits.global,
            limits.indexer,
            limits.release_group,
            limits.resolution,
            limits.quality,
            limits.addon,
            limits.stream_type,
            limits.service,
        ];
        if all_limits.iter().any(|l| *l == Some(0)) {
            bail!("result_limits values must be >= 1");
        }

        for pattern in self.preferred_patterns.iter().map(|p| &p.pattern).chain(&self.filters.excluded_patterns) {
            regex::Regex::new(pattern).with_context(|| format!("invalid pattern '{pattern}'"))?;
        }

        Ok(())
    }

    /// Addon by instance id.
    #[must_use]
    pub fn addon(&self, instance_id: &str) -> Option<&Addon> {
        self.addons.iter().find(|a| a.instance_id == instance_id)
    }
}

/// Load a configuration file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn load_config(path: &Path) -> Result<UserConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    UserConfig::from_toml_str(&content).with_context(|| format!("invalid config in {}", path.display()))
}

/// Return the default config file path.
#[must_use]
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("streamfed")
        .join("config.toml")
}
