//! Addon connector trait and the HTTP implementation of the addon protocol.
//!
//! An [`AddonConnector`] knows how to talk to one upstream addon. The
//! gateway never inspects connector internals: it asks for a manifest once
//! per session and then for catalogs, metas, streams, subtitles or addon
//! catalogs as requests arrive.
//!
//! # Protocol
//!
//! ```text
//! {base}/manifest.json
//! {base}/{resource}/{type}/{id}.json
//! {base}/{resource}/{type}/{id}/{extras}.json      extras = k=v&k2=v2
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::GatewayError;
use crate::http_client::AddonClient;
use crate::models::{
    encode_extras, Addon, AddonCatalogEntry, Extras, Manifest, MetaItem, Resource, ResourceKind, Subtitle,
};
use crate::registry::expand_resources;

/// Stateless client for one addon instance. Safe to call concurrently.
#[async_trait]
pub trait AddonConnector: Send + Sync {
    /// Fetch the addon's capabilities document.
    async fn get_manifest(&self) -> Result<Manifest>;

    /// Fetch raw stream objects; normalisation is the parser's job.
    async fn get_streams(&self, r#type: &str, id: &str) -> Result<Vec<Value>>;

    async fn get_catalog(&self, r#type: &str, id: &str, extras: &Extras) -> Result<Vec<MetaItem>> {
        let _ = (r#type, id, extras);
        Err(anyhow!("catalog not supported"))
    }

    async fn get_meta(&self, r#type: &str, id: &str) -> Result<MetaItem> {
        let _ = (r#type, id);
        Err(anyhow!("meta not supported"))
    }

    async fn get_subtitles(&self, r#type: &str, id: &str, extras: &Extras) -> Result<Vec<Subtitle>> {
        let _ = (r#type, id, extras);
        Err(anyhow!("subtitles not supported"))
    }

    async fn get_addon_catalog(&self, r#type: &str, id: &str) -> Result<Vec<AddonCatalogEntry>> {
        let _ = (r#type, id);
        Err(anyhow!("addon catalogs not supported"))
    }
}

/// Builds connectors for configured addons at session init.
pub trait ConnectorFactory: Send + Sync {
    fn connect(&self, addon: &Arc<Addon>) -> Arc<dyn AddonConnector>;
}

/// Run an addon call under the addon's own timeout.
pub async fn with_timeout<T>(addon: &Addon, call: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(addon.timeout(), call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout {
            addon: addon.name.clone(),
            timeout_ms: addon.timeout_ms,
        }
        .into()),
    }
}

/// A configured addon together with its connector and admitted manifest.
#[derive(Clone)]
pub struct AddonHandle {
    pub addon: Arc<Addon>,
    pub connector: Arc<dyn AddonConnector>,
    pub manifest: Arc<Manifest>,
    /// Expanded, allow-list filtered resources.
    pub resources: Vec<Resource>,
}

impl AddonHandle {
    pub fn new(addon: Arc<Addon>, connector: Arc<dyn AddonConnector>, manifest: Manifest) -> Self {
        let resources = expand_resources(&addon, &manifest);
        Self {
            addon,
            connector,
            manifest: Arc::new(manifest),
            resources,
        }
    }

    #[must_use]
    pub fn resource(&self, kind: ResourceKind) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == kind)
    }

    /// Declares the resource for the type, and its prefixes (if any) match the id.
    #[must_use]
    pub fn supports(&self, kind: ResourceKind, r#type: &str, id: &str) -> bool {
        self.resource(kind)
            .is_some_and(|r| r.supports_type(r#type) && r.matches_id(id))
    }
}

impl fmt::Debug for AddonHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonHandle")
            .field("addon", &self.addon.instance_id)
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// HTTP connector
// ═══════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct StreamsPayload {
    #[serde(default)]
    streams: Vec<Value>,
}

#[derive(Deserialize)]
struct CatalogPayload {
    #[serde(default)]
    metas: Vec<MetaItem>,
}

#[derive(Deserialize)]
struct MetaPayload {
    meta: Option<MetaItem>,
}

#[derive(Deserialize)]
struct SubtitlesPayload {
    #[serde(default)]
    subtitles: Vec<Subtitle>,
}

#[derive(Deserialize)]
struct AddonsPayload {
    #[serde(default)]
    addons: Vec<AddonCatalogEntry>,
}

/// Connector speaking the addon HTTP protocol.
pub struct HttpAddonConnector {
    addon: Arc<Addon>,
    base_url: String,
    client: AddonClient,
}

impl HttpAddonConnector {
    pub fn new(addon: Arc<Addon>, client: AddonClient) -> Self {
        let base_url = base_url(&addon.manifest_url);
        Self {
            addon,
            base_url,
            client,
        }
    }

    fn resource_url(&self, resource: ResourceKind, r#type: &str, id: &str, extras: Option<&Extras>) -> String {
        let mut url = format!(
            "{}/{}/{}/{}",
            self.base_url,
            resource.as_str(),
            urlencoding::encode(r#type),
            urlencoding::encode(id)
        );
        if let Some(extras) = extras.filter(|e| !e.is_empty()) {
            url.push('/');
            url.push_str(&encode_extras(extras));
        }
        url.push_str(".json");
        url
    }

    async fn fetch<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        tracing::debug!(addon = %self.addon.instance_id, "Fetching {}", url);
        Ok(self.client.get_json(url, self.addon.timeout()).await?)
    }
}

/// Strip `/manifest.json` (and trailing slashes) from a manifest URL.
#[must_use]
pub fn base_url(manifest_url: &str) -> String {
    manifest_url
        .trim_end_matches('/')
        .trim_end_matches("/manifest.json")
        .trim_end_matches('/')
        .to_string()
}

#[async_trait]
impl AddonConnector for HttpAddonConnector {
    async fn get_manifest(&self) -> Result<Manifest> {
        self.fetch(&self.addon.manifest_url).await
    }

    async fn get_streams(&self, r#type: &str, id: &str) -> Result<Vec<Value>> {
        let url = self.resource_url(ResourceKind::Stream, r#type, id, None);
        let payload: StreamsPayload = self.fetch(&url).await?;
        Ok(payload.streams)
    }

    async fn get_catalog(&self, r#type: &str, id: &str, extras: &Extras) -> Result<Vec<MetaItem>> {
        let url = self.resource_url(ResourceKind::Catalog, r#type, id, Some(extras));
        let payload: CatalogPayload = self.fetch(&url).await?;
        Ok(payload.metas)
    }

    async fn get_meta(&self, r#type: &str, id: &str) -> Result<MetaItem> {
        let url = self.resource_url(ResourceKind::Meta, r#type, id, None);
        let payload: MetaPayload = self.fetch(&url).await?;
        payload
            .meta
            .ok_or_else(|| anyhow!("{} returned no meta for {id}", self.addon.name))
    }

    async fn get_subtitles(&self, r#type: &str, id: &str, extras: &Extras) -> Result<Vec<Subtitle>> {
        let url = self.resource_url(ResourceKind::Subtitles, r#type, id, Some(extras));
        let payload: SubtitlesPayload = self.fetch(&url).await?;
        Ok(payload.subtitles)
    }

    async fn get_addon_catalog(&self, r#type: &str, id: &str) -> Result<Vec<AddonCatalogEntry>> {
        let url = self.resource_url(ResourceKind::AddonCatalog, r#type, id, None);
        let payload: AddonsPayload = self.fetch(&url).await?;
        Ok(payload.addons)
    }
}

/// Factory producing [`HttpAddonConnector`]s that share one client.
#[derive(Clone)]
pub struct HttpConnectorFactory {
    client: AddonClient,
}

impl HttpConnectorFactory {
    #[must_use]
    pub fn new(client: AddonClient) -> Self {
        Self { client }
    }
}

impl ConnectorFactory for HttpConnectorFactory {
    fn connect(&self, addon: &Arc<Addon>) -> Arc<dyn AddonConnector> {
        Arc::new(HttpAddonConnector::new(Arc::clone(addon), self.client.clone()))
    }
}
