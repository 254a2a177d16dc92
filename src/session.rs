//! Session orchestrator.
//!
//! A [`Session`] is built once per user configuration: every addon's manifest
//! is fetched concurrently, admitted addons are merged into a frozen
//! [`CapabilityTable`], and the request handlers then route against that
//! table. Handlers only exist on an initialised session.
//!
//! # Stream flow
//!
//! ```text
//! candidates -> fetch -> filter -> expressions -> dedup -> precompute -> sort
//!            -> limit -> proxify -> format
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::future::join_all;
use rand::seq::SliceRandom;
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::addon::{with_timeout, AddonHandle, ConnectorFactory, HttpConnectorFactory};
use crate::cache::{get_json, set_json, Cache, MemoryCache};
use crate::config::{ProxyBackendKind, UserConfig};
use crate::error::{GatewayError, Result};
use crate::formatter::Formatter;
use crate::http_client::AddonClient;
use crate::limiter::Limiter;
use crate::metadata::{CinemetaProvider, MetadataProvider};
use crate::models::{
    encode_extras, Addon, AddonCatalogEntry, ErrorEntry, Extras, GatewayResponse, Manifest, ManifestResource,
    MetaItem, ParsedStream, ResourceDeclaration, ResourceKind, ResponseStream, Subtitle, ERROR_META_PREFIX,
};
use crate::pipeline::Pipeline;
use crate::precache::{EpisodeId, HttpToucher, PrecacheOutcome, PrecacheRequest, PrecacheSource, Precacher, Toucher};
use crate::proxy::{MediaflowBackend, Proxifier, ProxyBackend};
use crate::registry::{CapabilityRegistrar, CapabilityTable, MergedCatalog};
use crate::selection::{addon_error, candidates, MetaTiers};

/// Identifier of the merged manifest.
pub const MANIFEST_ID: &str = "com.streamfed.gateway";

// ═══════════════════════════════════════════════════════════════════════
// Services
// ═══════════════════════════════════════════════════════════════════════

/// Collaborators injected into a session.
#[derive(Clone)]
pub struct Services {
    pub cache: Arc<dyn Cache>,
    pub connectors: Arc<dyn ConnectorFactory>,
    pub pipeline: Pipeline,
    pub proxy_backend: Option<Arc<dyn ProxyBackend>>,
    pub metadata: Option<Arc<dyn MetadataProvider>>,
    pub toucher: Arc<dyn Toucher>,
}

impl Services {
    /// HTTP-backed defaults with an in-memory cache.
    pub fn for_config(config: &UserConfig) -> Result<Self> {
        let client = AddonClient::new()?;
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());

        let proxy_backend: Option<Arc<dyn ProxyBackend>> = if config.proxy.enabled {
            match config.proxy.id {
                ProxyBackendKind::Mediaflow => Some(Arc::new(MediaflowBackend::new(
                    config.proxy.clone(),
                    client.clone(),
                    Arc::clone(&cache),
                )?)),
            }
        } else {
            None
        };

        Ok(Self {
            cache,
            connectors: Arc::new(HttpConnectorFactory::new(client.clone())),
            pipeline: Pipeline::default(),
            proxy_backend,
            metadata: Some(Arc::new(CinemetaProvider::new(client))),
            toucher: Arc::new(HttpToucher::new()?),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Synthetic error metas
// ═══════════════════════════════════════════════════════════════════════

/// Meta id that renders `error` when the client opens it.
#[must_use]
pub fn error_meta_id(error: &ErrorEntry) -> String {
    let payload = serde_json::to_vec(error).unwrap_or_default();
    format!("{ERROR_META_PREFIX}.{}", URL_SAFE_NO_PAD.encode(payload))
}

fn decode_error_meta(r#type: &str, id: &str, encoded: &str) -> Option<MetaItem> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')).ok()?;
    let error: ErrorEntry = serde_json::from_slice(&bytes).ok()?;
    let mut extra = Map::new();
    extra.insert("description".into(), Value::String(error.description));
    Some(MetaItem {
        id: id.to_string(),
        r#type: r#type.to_string(),
        name: Some(error.title),
        extra,
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════════════════

struct Inner {
    config: UserConfig,
    /// Relaxed copy used for speculative fetches.
    precache_config: UserConfig,
    services: Services,
    handles: Vec<AddonHandle>,
    table: CapabilityTable,
    init_errors: Vec<ErrorEntry>,
    limiter: Limiter,
    proxifier: Proxifier,
    formatter: Formatter,
    precacher: Arc<Precacher>,
}

/// An initialised gateway session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

async fn load_manifest(services: &Services, addon: &Arc<Addon>, ttl_secs: u64) -> Result<Manifest> {
    let key = format!("manifest:{}", addon.manifest_url);
    if let Some(manifest) = get_json::<Manifest>(services.cache.as_ref(), &key).await {
        debug!(addon = %addon.instance_id, "Manifest served from cache");
        return Ok(manifest);
    }

    let connector = services.connectors.connect(addon);
    let manifest = with_timeout(addon, connector.get_manifest()).await?;
    manifest.validate().map_err(GatewayError::InvalidManifest)?;
    if ttl_secs > 0 {
        set_json(services.cache.as_ref(), &key, &manifest, ttl_secs).await;
    }
    Ok(manifest)
}

impl Session {
    /// Fetch every manifest concurrently and freeze the capability table.
    ///
    /// A failing addon is recorded and skipped, or aborts initialisation
    /// when `skip_failed_addons` is off.
    #[instrument(skip_all, fields(user = %config.user_id, addons = config.addons.len()))]
    pub async fn initialise(config: UserConfig, services: Services) -> Result<Self> {
        config.validate()?;

        let addons: Vec<Arc<Addon>> = config.addons.iter().cloned().map(Arc::new).collect();
        let results = join_all(
            addons
                .iter()
                .map(|addon| load_manifest(&services, addon, config.manifest_cache_secs)),
        )
        .await;

        let mut handles = Vec::new();
        let mut init_errors = Vec::new();
        let mut registrar = CapabilityRegistrar::new();

        for (addon, result) in addons.into_iter().zip(results) {
            match result {
                Ok(manifest) => {
                    let connector = services.connectors.connect(&addon);
                    let handle = AddonHandle::new(addon, connector, manifest);
                    registrar.register(&handle);
                    handles.push(handle);
                }
                Err(e) if config.skip_failed_addons => {
                    warn!(addon = %addon.instance_id, error = %e, "Skipping addon that failed to initialise");
                    init_errors.push(ErrorEntry::new(addon.name.clone(), format!("failed to initialise: {e}")));
                }
                Err(e) => {
                    return Err(GatewayError::AddonInit {
                        addon: addon.name.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        let table = registrar.finish(&config.catalog_modifications);
        info!(
            admitted = handles.len(),
            failed = init_errors.len(),
            catalogs = table.catalogs.len(),
            "Session initialised"
        );

        let mut precache_config = config.clone();
        precache_config.exclude_uncached = false;
        precache_config.groups = None;

        let precacher = Arc::new(Precacher::new(
            Arc::clone(&services.cache),
            services.metadata.clone(),
            Arc::clone(&services.toucher),
        ));

        Ok(Self {
            inner: Arc::new(Inner {
                limiter: Limiter::new(&config.result_limits),
                proxifier: Proxifier::new(services.proxy_backend.clone()),
                formatter: Formatter::for_user(&config),
                precacher,
                precache_config,
                config,
                services,
                handles,
                table,
                init_errors,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &UserConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn table(&self) -> &CapabilityTable {
        &self.inner.table
    }

    #[must_use]
    pub fn init_errors(&self) -> &[ErrorEntry] {
        &self.inner.init_errors
    }

    #[must_use]
    pub fn handles(&self) -> &[AddonHandle] {
        &self.inner.handles
    }

    fn handle(&self, instance_id: &str) -> Option<&AddonHandle> {
        self.inner.handles.iter().find(|h| h.addon.instance_id == instance_id)
    }

    // ───────────────────────────────────────────────────────────────────
    // Manifest
    // ───────────────────────────────────────────────────────────────────

    /// The merged manifest presented to clients.
    #[must_use]
    pub fn get_manifest(&self) -> GatewayResponse<Manifest> {
        let table = &self.inner.table;
        let manifest = Manifest {
            id: MANIFEST_ID.to_string(),
            name: self.inner.config.addon_name.clone(),
            version: crate::VERSION.to_string(),
            description: Some(format!("Federated view over {} addons", self.inner.handles.len())),
            resources: table
                .resources
                .iter()
                .map(|r| {
                    ManifestResource::Full(ResourceDeclaration {
                        name: r.name.as_str().to_string(),
                        types: Some(r.types.clone()),
                        id_prefixes: r.id_prefixes.clone(),
                    })
                })
                .collect(),
            types: table.types(),
            id_prefixes: None,
            catalogs: table.catalogs.iter().map(|c| c.catalog.clone()).collect(),
            addon_catalogs: table.addon_catalogs.iter().map(|c| c.catalog.clone()).collect(),
            behavior_hints: Some(json!({ "configurable": true })),
        };
        GatewayResponse::ok(manifest, Vec::new())
    }

    // ───────────────────────────────────────────────────────────────────
    // Streams
    // ───────────────────────────────────────────────────────────────────

    /// Pipeline plus limits, before proxying and formatting.
    async fn shaped_streams(&self, r#type: &str, id: &str, config: &UserConfig) -> (Vec<ParsedStream>, Vec<ErrorEntry>) {
        let candidates = candidates(&self.inner.handles, ResourceKind::Stream, r#type, id);
        if candidates.is_empty() {
            debug!(kind = r#type, id, "No stream candidates");
            return (Vec::new(), Vec::new());
        }
        let outcome = self.inner.services.pipeline.run(&candidates, r#type, id, config).await;
        (self.inner.limiter.apply(outcome.streams), outcome.errors)
    }

    #[instrument(skip_all, fields(kind = %r#type, id = %id))]
    pub async fn get_streams(&self, r#type: &str, id: &str) -> GatewayResponse<Vec<ResponseStream>> {
        let (streams, mut errors) = self.shaped_streams(r#type, id, &self.inner.config).await;
        let streams = self.inner.proxifier.apply(streams).await;
        let data: Vec<ResponseStream> = streams.iter().map(|s| self.inner.formatter.to_response(s)).collect();
        errors.extend(self.inner.init_errors.iter().cloned());

        debug!(returned = data.len(), errors = errors.len(), "Stream response ready");
        // Detached; the handle is only useful to callers that want the outcome.
        drop(self.trigger_precache(r#type, id));
        GatewayResponse::ok(data, errors)
    }

    /// Start a next-episode precache for `id` if the user enabled it.
    pub fn trigger_precache(&self, r#type: &str, id: &str) -> Option<JoinHandle<PrecacheOutcome>> {
        let precache = &self.inner.config.precache;
        if !precache.next_episode || EpisodeId::parse(id).is_none() {
            return None;
        }
        let request = PrecacheRequest {
            r#type: r#type.to_string(),
            id: id.to_string(),
            user_id: self.inner.config.user_id.clone(),
            cooldown_secs: precache.cooldown_secs,
            always: precache.always,
        };
        let source: Arc<dyn PrecacheSource> = Arc::new(self.clone());
        Some(self.inner.precacher.spawn(source, request))
    }

    // ───────────────────────────────────────────────────────────────────
    // Catalogs
    // ───────────────────────────────────────────────────────────────────

    #[instrument(skip_all, fields(kind = %r#type, id = %id))]
    pub async fn get_catalog(&self, r#type: &str, id: &str, extras: &Extras) -> GatewayResponse<Vec<MetaItem>> {
        let Some(merged) = self.inner.table.find_catalog(r#type, id) else {
            let error = GatewayError::UnknownCatalog(format!("{}/{id}", r#type));
            return GatewayResponse::failure(Vec::new(), vec![ErrorEntry::new("Catalog", error.to_string())]);
        };
        let Some(handle) = self.handle(&merged.addon_instance_id) else {
            let error = GatewayError::UnknownAddon(merged.addon_instance_id.clone());
            return GatewayResponse::failure(Vec::new(), vec![ErrorEntry::new("Catalog", error.to_string())]);
        };

        let call = handle
            .connector
            .get_catalog(&merged.original_type, &merged.original_id, extras);
        match with_timeout(&handle.addon, call).await {
            Ok(metas) if merged.shuffle => GatewayResponse::ok(self.shuffle(merged, extras, metas).await, Vec::new()),
            Ok(metas) => GatewayResponse::ok(metas, Vec::new()),
            Err(e) if extras.iter().any(|(key, _)| key == "skip") => {
                debug!(addon = %handle.addon.name, error = %e, "Paginated catalog request failed");
                GatewayResponse::ok(Vec::new(), Vec::new())
            }
            Err(e) => {
                warn!(addon = %handle.addon.name, error = %e, "Catalog request failed");
                GatewayResponse::failure(Vec::new(), vec![addon_error(&handle.addon, e)])
            }
        }
    }

    /// Shuffle a catalog page, keeping the order stable for the persistence window.
    async fn shuffle(&self, merged: &MergedCatalog, extras: &Extras, metas: Vec<MetaItem>) -> Vec<MetaItem> {
        let hours = merged.persist_shuffle_hours.unwrap_or(0);
        if hours == 0 {
            return shuffled(metas);
        }

        let cache = self.inner.services.cache.as_ref();
        let key = format!(
            "shuffle:{}:{}:{}:{}",
            self.inner.config.user_id,
            merged.catalog.r#type,
            merged.catalog.id,
            encode_extras(extras)
        );
        if let Some(order) = get_json::<Vec<String>>(cache, &key).await {
            return apply_order(metas, &order);
        }

        let metas = shuffled(metas);
        let order: Vec<&str> = metas.iter().map(|m| m.id.as_str()).collect();
        set_json(cache, &key, &order, hours * 60 * 60).await;
        metas
    }

    // ───────────────────────────────────────────────────────────────────
    // Meta
    // ───────────────────────────────────────────────────────────────────

    #[instrument(skip_all, fields(kind = %r#type, id = %id))]
    pub async fn get_meta(&self, r#type: &str, id: &str) -> GatewayResponse<Option<MetaItem>> {
        if let Some(encoded) = id.strip_prefix(ERROR_META_PREFIX).and_then(|rest| rest.strip_prefix('.')) {
            return match decode_error_meta(r#type, id, encoded) {
                Some(meta) => GatewayResponse::ok(Some(meta), Vec::new()),
                None => GatewayResponse::failure(None, vec![ErrorEntry::new("Meta", "malformed error meta id")]),
            };
        }

        let tiers = MetaTiers::select(&self.inner.handles, r#type, id);
        if tiers.is_empty() {
            let message = format!("no addon provides meta for {} {id}", r#type);
            return GatewayResponse::failure(None, vec![ErrorEntry::new("Meta", message)]);
        }
        tiers.resolve(r#type, id).await
    }

    // ───────────────────────────────────────────────────────────────────
    // Subtitles
    // ───────────────────────────────────────────────────────────────────

    #[instrument(skip_all, fields(kind = %r#type, id = %id))]
    pub async fn get_subtitles(&self, r#type: &str, id: &str, extras: &Extras) -> GatewayResponse<Vec<Subtitle>> {
        let candidates = candidates(&self.inner.handles, ResourceKind::Subtitles, r#type, id);
        let results = join_all(
            candidates
                .iter()
                .map(|h| with_timeout(&h.addon, h.connector.get_subtitles(r#type, id, extras))),
        )
        .await;

        let mut subtitles = Vec::new();
        let mut errors = Vec::new();
        for (handle, result) in candidates.iter().zip(results) {
            match result {
                Ok(found) => subtitles.extend(found),
                Err(e) => {
                    warn!(addon = %handle.addon.name, error = %e, "Subtitle request failed");
                    errors.push(addon_error(&handle.addon, e));
                }
            }
        }
        GatewayResponse::ok(subtitles, errors)
    }

    // ───────────────────────────────────────────────────────────────────
    // Addon catalogs
    // ───────────────────────────────────────────────────────────────────

    #[instrument(skip_all, fields(kind = %r#type, id = %id))]
    pub async fn get_addon_catalog(&self, r#type: &str, id: &str) -> GatewayResponse<Vec<AddonCatalogEntry>> {
        let Some(merged) = self.inner.table.find_addon_catalog(r#type, id) else {
            let error = GatewayError::UnknownCatalog(format!("{}/{id}", r#type));
            return GatewayResponse::failure(Vec::new(), vec![ErrorEntry::new("Addon catalog", error.to_string())]);
        };
        let Some(handle) = self.handle(&merged.addon_instance_id) else {
            let error = GatewayError::UnknownAddon(merged.addon_instance_id.clone());
            return GatewayResponse::failure(Vec::new(), vec![ErrorEntry::new("Addon catalog", error.to_string())]);
        };

        let call = handle
            .connector
            .get_addon_catalog(&merged.original_type, &merged.original_id);
        match with_timeout(&handle.addon, call).await {
            Ok(addons) => GatewayResponse::ok(addons, Vec::new()),
            Err(e) => {
                warn!(addon = %handle.addon.name, error = %e, "Addon catalog request failed");
                GatewayResponse::failure(Vec::new(), vec![addon_error(&handle.addon, e)])
            }
        }
    }

    /// Egress address of the configured proxy, if any.
    pub async fn proxy_public_ip(&self) -> Option<String> {
        self.inner.proxifier.public_ip().await
    }
}

#[async_trait]
impl PrecacheSource for Session {
    async fn precache_streams(&self, r#type: &str, id: &str) -> Vec<ParsedStream> {
        let (streams, errors) = self.shaped_streams(r#type, id, &self.inner.precache_config).await;
        if !errors.is_empty() {
            debug!(id, errors = errors.len(), "Precache fetch reported errors");
        }
        streams
    }
}

fn shuffled(mut metas: Vec<MetaItem>) -> Vec<MetaItem> {
    metas.shuffle(&mut rand::thread_rng());
    metas
}

/// Reorder by a stored id order; ids not in it keep their order at the end.
fn apply_order(metas: Vec<MetaItem>, order: &[String]) -> Vec<MetaItem> {
    let rank: HashMap<&str, usize> = order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
    let mut ranked: Vec<(usize, MetaItem)> = metas
        .into_iter()
        .map(|m| (rank.get(m.id.as_str()).copied().unwrap_or(usize::MAX), m))
        .collect();
    ranked.sort_by_key(|(r, _)| *r);
    ranked.into_iter().map(|(_, m)| m).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str) -> MetaItem {
        MetaItem {
            id: id.into(),
            r#type: "movie".into(),
            name: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn error_meta_ids_round_trip() {
        let error = ErrorEntry::new("Torrentio", "timed out");
        let id = error_meta_id(&error);
        assert!(id.starts_with("aiostreamserror."));
        let encoded = id.strip_prefix("aiostreamserror.").unwrap();
        let meta = decode_error_meta("movie", &id, encoded).unwrap();
        assert_eq!(meta.name.as_deref(), Some("Torrentio"));
        assert_eq!(meta.extra["description"], "timed out");
        assert!(decode_error_meta("movie", "x", "%%%").is_none());
    }

    #[test]
    fn stored_order_is_reapplied() {
        let metas = vec![meta("a"), meta("b"), meta("c"), meta("new")];
        let order = vec!["c".to_string(), "a".to_string(), "b".to_string()];
        let ids: Vec<String> = apply_order(metas, &order).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["c", "a", "b", "new"]);
    }

    #[test]
    fn shuffle_keeps_every_item() {
        let mut ids: Vec<String> = shuffled((0..20).map(|i| meta(&i.to_string())).collect())
            .into_iter()
            .map(|m| m.id)
            .collect();
        ids.sort_by_key(|id| id.parse::<u32>().unwrap());
        assert_eq!(ids, (0..20).map(|i| i.to_string()).collect::<Vec<_>>());
    }
}
