//! Capability registrar: merges every admitted addon manifest into one
//! resource/catalog/addon-catalog table.
//!
//! # Merge rules
//!
//! - Shorthand resources (`"stream"`) inherit the manifest's `types` and
//!   `idPrefixes`; resources outside the addon's allow-list are dropped.
//! - Resources merge by name. `types` are unioned. `idPrefixes` are unioned
//!   only while every contributor declares a non-empty list; the first
//!   contributor without prefixes makes the merged entry match every id,
//!   permanently.
//! - Catalog ids are namespaced as `{instance_id}.{catalog_id}`.
//! - A merged `meta` resource restricted by prefixes also routes
//!   [`ERROR_META_PREFIX`] so synthetic error metas stay reachable.
//! - User catalog modifications run once, after everything is merged.

use tracing::debug;

use crate::addon::AddonHandle;
use crate::config::CatalogModification;
use crate::models::{Addon, Manifest, ManifestCatalog, ManifestResource, Resource, ResourceKind, ERROR_META_PREFIX};

/// Expand one addon's manifest resources and apply its allow-list.
#[must_use]
pub fn expand_resources(addon: &Addon, manifest: &Manifest) -> Vec<Resource> {
    let mut expanded: Vec<Resource> = Vec::new();

    for declared in &manifest.resources {
        let (name, types, id_prefixes) = match declared {
            ManifestResource::Short(name) => (name.as_str(), manifest.types.clone(), manifest.id_prefixes.clone()),
            ManifestResource::Full(decl) => (
                decl.name.as_str(),
                decl.types.clone().unwrap_or_else(|| manifest.types.clone()),
                decl.id_prefixes.clone(),
            ),
        };

        let Ok(kind) = name.parse::<ResourceKind>() else {
            debug!(addon = %addon.instance_id, resource = name, "Ignoring unknown resource");
            continue;
        };
        if !addon.allows(kind) {
            continue;
        }

        merge_into(
            &mut expanded,
            Resource {
                name: kind,
                types: dedup(types),
                id_prefixes: normalise_prefixes(id_prefixes),
            },
        );
    }

    expanded
}

fn normalise_prefixes(prefixes: Option<Vec<String>>) -> Option<Vec<String>> {
    prefixes.map(dedup).filter(|p| !p.is_empty())
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

fn union(target: &mut Vec<String>, incoming: &[String]) {
    for value in incoming {
        if !target.contains(value) {
            target.push(value.clone());
        }
    }
}

/// Merge `incoming` into the table entry of the same name.
fn merge_into(table: &mut Vec<Resource>, incoming: Resource) {
    let Some(existing) = table.iter_mut().find(|r| r.name == incoming.name) else {
        table.push(incoming);
        return;
    };

    union(&mut existing.types, &incoming.types);
    existing.id_prefixes = match (existing.id_prefixes.take(), incoming.id_prefixes) {
        (Some(mut ours), Some(theirs)) => {
            union(&mut ours, &theirs);
            Some(ours)
        }
        _ => None,
    };
}

/// A catalog in the merged manifest plus routing information.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedCatalog {
    /// Catalog as exposed to clients (namespaced id, user edits applied).
    pub catalog: ManifestCatalog,
    pub addon_instance_id: String,
    pub original_id: String,
    pub original_type: String,
    pub shuffle: bool,
    pub persist_shuffle_hours: Option<u64>,
}

impl MergedCatalog {
    fn new(addon: &Addon, catalog: &ManifestCatalog) -> Self {
        let mut exposed = catalog.clone();
        exposed.id = format!("{}.{}", addon.instance_id, catalog.id);
        Self {
            catalog: exposed,
            addon_instance_id: addon.instance_id.clone(),
            original_id: catalog.id.clone(),
            original_type: catalog.r#type.clone(),
            shuffle: false,
            persist_shuffle_hours: None,
        }
    }
}

/// Frozen capability table for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityTable {
    pub resources: Vec<Resource>,
    pub catalogs: Vec<MergedCatalog>,
    pub addon_catalogs: Vec<MergedCatalog>,
}

impl CapabilityTable {
    #[must_use]
    pub fn resource(&self, kind: ResourceKind) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == kind)
    }

    /// Union of every declared content type, in first-seen order.
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        let mut types = Vec::new();
        for resource in &self.resources {
            union(&mut types, &resource.types);
        }
        for merged in self.catalogs.iter().chain(&self.addon_catalogs) {
            union(&mut types, std::slice::from_ref(&merged.catalog.r#type));
        }
        types
    }

    #[must_use]
    pub fn find_catalog(&self, r#type: &str, id: &str) -> Option<&MergedCatalog> {
        self.catalogs
            .iter()
            .find(|c| c.catalog.id == id && c.catalog.r#type == r#type)
    }

    #[must_use]
    pub fn find_addon_catalog(&self, r#type: &str, id: &str) -> Option<&MergedCatalog> {
        self.addon_catalogs
            .iter()
            .find(|c| c.catalog.id == id && c.catalog.r#type == r#type)
    }
}

/// Accumulates addons in priority order and produces a [`CapabilityTable`].
#[derive(Debug, Default)]
pub struct CapabilityRegistrar {
    table: CapabilityTable,
}

impl CapabilityRegistrar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one admitted addon. Call in configured priority order.
    pub fn register(&mut self, handle: &AddonHandle) {
        for resource in &handle.resources {
            merge_into(&mut self.table.resources, resource.clone());
        }

        let addon = &handle.addon;
        if addon.allows(ResourceKind::Catalog) {
            self.table
                .catalogs
                .extend(handle.manifest.catalogs.iter().map(|c| MergedCatalog::new(addon, c)));
        }
        if addon.allows(ResourceKind::AddonCatalog) {
            self.table.addon_catalogs.extend(
                handle
                    .manifest
                    .addon_catalogs
                    .iter()
                    .map(|c| MergedCatalog::new(addon, c)),
            );
        }
    }

    /// Seal the table, applying the error-meta sentinel and user edits.
    #[must_use]
    pub fn finish(mut self, modifications: &[CatalogModification]) -> CapabilityTable {
        if let Some(meta) = self
            .table
            .resources
            .iter_mut()
            .find(|r| r.name == ResourceKind::Meta)
        {
            if let Some(prefixes) = meta.id_prefixes.as_mut() {
                if !prefixes.iter().any(|p| p == ERROR_META_PREFIX) {
                    prefixes.push(ERROR_META_PREFIX.to_string());
                }
            }
        }

        self.table.catalogs = apply_modifications(std::mem::take(&mut self.table.catalogs), modifications);
        self.table
    }
}

/// Reorder, drop and edit catalogs according to the user's list.
fn apply_modifications(catalogs: Vec<MergedCatalog>, modifications: &[CatalogModification]) -> Vec<MergedCatalog> {
    if modifications.is_empty() {
        return catalogs;
    }

    let position = |c: &MergedCatalog| {
        modifications
            .iter()
            .position(|m| m.id == c.catalog.id && m.r#type == c.catalog.r#type)
    };

    let mut ordered: Vec<(Option<usize>, MergedCatalog)> =
        catalogs.into_iter().map(|c| (position(&c), c)).collect();
    // Stable: unlisted catalogs keep their relative order after listed ones.
    ordered.sort_by_key(|(pos, _)| pos.unwrap_or(usize::MAX));

    ordered
        .into_iter()
        .filter_map(|(pos, catalog)| match pos {
            None => Some(catalog),
            Some(i) => edit_catalog(catalog, &modifications[i]),
        })
        .collect()
}

/// Apply one modification. Returns `None` when the catalog is dropped.
fn edit_catalog(mut merged: MergedCatalog, modification: &CatalogModification) -> Option<MergedCatalog> {
    if !modification.enabled {
        return None;
    }

    if let Some(name) = &modification.name {
        merged.catalog.name.clone_from(name);
    }

    if modification.only_on_discover {
        if let Some(genre) = merged.catalog.extra.iter_mut().find(|e| e.name == "genre") {
            genre.is_required = true;
        }
    }

    if let Some(new_type) = &modification.override_type {
        merged.catalog.r#type.clone_from(new_type);
    }

    if modification.disable_search {
        let search_required = merged.catalog.extra("search").is_some_and(|e| e.is_required);
        if search_required {
            // Search-only catalog: nothing left to show.
            return None;
        }
        merged.catalog.extra.retain(|e| e.name != "search");
    }

    merged.shuffle = modification.shuffle;
    merged.persist_shuffle_hours = modification.persist_shuffle_hours;
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addon::AddonConnector;
    use crate::models::CatalogExtra;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;

    struct NoopConnector;

    #[async_trait]
    impl AddonConnector for NoopConnector {
        async fn get_manifest(&self) -> anyhow::Result<Manifest> {
            Ok(Manifest::default())
        }

        async fn get_streams(&self, _type: &str, _id: &str) -> anyhow::Result<Vec<Value>> {
            Ok(vec![])
        }
    }

    fn handle(instance_id: &str, manifest_json: &str) -> AddonHandle {
        let addon = Arc::new(Addon::new(instance_id, instance_id.to_uppercase(), "https://x.example/manifest.json"));
        let manifest: Manifest = serde_json::from_str(manifest_json).unwrap();
        AddonHandle::new(addon, Arc::new(NoopConnector), manifest)
    }

    fn merged(handles: &[AddonHandle]) -> CapabilityTable {
        let mut registrar = CapabilityRegistrar::new();
        for h in handles {
            registrar.register(h);
        }
        registrar.finish(&[])
    }

    const WITH_TT: &str = r#"{"id":"a","name":"A","types":["movie"],"idPrefixes":["tt"],"resources":["stream"]}"#;
    const NO_PREFIX: &str = r#"{"id":"b","name":"B","types":["series"],"resources":["stream"]}"#;

    #[test]
    fn missing_prefixes_make_merged_resource_match_all_in_any_order() {
        let a = handle("a", WITH_TT);
        let b = handle("b", NO_PREFIX);

        for order in [vec![a.clone(), b.clone()], vec![b, a]] {
            let table = merged(&order);
            let stream = table.resource(ResourceKind::Stream).unwrap();
            assert_eq!(stream.id_prefixes, None);
            assert_eq!(stream.types.len(), 2);
        }
    }

    #[test]
    fn prefix_lists_are_unioned() {
        let a = handle("a", WITH_TT);
        let c = handle(
            "c",
            r#"{"id":"c","name":"C","types":["movie"],"idPrefixes":["kitsu:","tt"],"resources":["stream"]}"#,
        );
        let table = merged(&[a, c]);
        let stream = table.resource(ResourceKind::Stream).unwrap();
        assert_eq!(stream.id_prefixes, Some(vec!["tt".to_string(), "kitsu:".to_string()]));
    }

    #[test]
    fn absent_stays_absent_after_later_prefixed_addon() {
        let table = merged(&[handle("b", NO_PREFIX), handle("a", WITH_TT), handle("a2", WITH_TT)]);
        assert_eq!(table.resource(ResourceKind::Stream).unwrap().id_prefixes, None);
    }

    #[test]
    fn empty_prefix_list_counts_as_absent() {
        let d = handle(
            "d",
            r#"{"id":"d","name":"D","types":["movie"],"idPrefixes":[],"resources":["stream"]}"#,
        );
        let table = merged(&[handle("a", WITH_TT), d]);
        assert_eq!(table.resource(ResourceKind::Stream).unwrap().id_prefixes, None);
    }

    #[test]
    fn full_resource_uses_its_own_types_and_prefixes() {
        let h = handle(
            "a",
            r#"{"id":"a","name":"A","types":["movie","series"],"idPrefixes":["tt"],
                "resources":[{"name":"meta","types":["series"],"idPrefixes":["kitsu:"]}, {"name":"stream"}]}"#,
        );
        let meta = h.resource(ResourceKind::Meta).unwrap();
        assert_eq!(meta.types, vec!["series"]);
        assert_eq!(meta.id_prefixes, Some(vec!["kitsu:".to_string()]));
        let stream = h.resource(ResourceKind::Stream).unwrap();
        assert_eq!(stream.types, vec!["movie", "series"]);
        assert_eq!(stream.id_prefixes, None);
    }

    #[test]
    fn allow_list_drops_resources_and_catalogs() {
        let mut registrar = CapabilityRegistrar::new();
        let mut addon = Addon::new("a", "A", "https://x.example/manifest.json");
        addon.resources = Some(vec![ResourceKind::Stream]);
        let manifest: Manifest = serde_json::from_str(
            r#"{"id":"a","name":"A","types":["movie"],"resources":["stream","meta","catalog"],
                "catalogs":[{"type":"movie","id":"top"}]}"#,
        )
        .unwrap();
        let h = AddonHandle::new(Arc::new(addon), Arc::new(NoopConnector), manifest);
        registrar.register(&h);
        let table = registrar.finish(&[]);
        assert!(table.resource(ResourceKind::Meta).is_none());
        assert!(table.catalogs.is_empty());
        assert_eq!(table.resources.len(), 1);
    }

    #[test]
    fn meta_with_prefixes_routes_error_sentinel() {
        let h = handle(
            "a",
            r#"{"id":"a","name":"A","types":["movie"],"idPrefixes":["tt"],"resources":["meta"]}"#,
        );
        let table = merged(&[h]);
        let prefixes = table.resource(ResourceKind::Meta).unwrap().id_prefixes.clone().unwrap();
        assert_eq!(prefixes, vec!["tt".to_string(), ERROR_META_PREFIX.to_string()]);
    }

    #[test]
    fn meta_without_prefixes_gets_no_sentinel() {
        let h = handle("a", r#"{"id":"a","name":"A","types":["movie"],"resources":["meta"]}"#);
        let table = merged(&[h]);
        assert_eq!(table.resource(ResourceKind::Meta).unwrap().id_prefixes, None);
    }

    fn catalog_handles() -> Vec<AddonHandle> {
        vec![
            handle(
                "a",
                r#"{"id":"a","name":"A","types":["movie"],"resources":["catalog"],
                    "catalogs":[{"type":"movie","id":"top","name":"Top"},
                                {"type":"movie","id":"new","name":"New",
                                 "extra":[{"name":"genre","options":["Action"]},{"name":"search"}]}]}"#,
            ),
            handle(
                "b",
                r#"{"id":"b","name":"B","types":["series"],"resources":["catalog"],
                    "catalogs":[{"type":"series","id":"top","name":"Top"},
                                {"type":"series","id":"search","name":"Search",
                                 "extra":[{"name":"search","isRequired":true}]}]}"#,
            ),
        ]
    }

    fn modification(id: &str, r#type: &str) -> CatalogModification {
        CatalogModification {
            id: id.into(),
            r#type: r#type.into(),
            enabled: true,
            name: None,
            only_on_discover: false,
            override_type: None,
            disable_search: false,
            shuffle: false,
            persist_shuffle_hours: None,
        }
    }

    fn finish_with(mods: &[CatalogModification]) -> CapabilityTable {
        let mut registrar = CapabilityRegistrar::new();
        for h in &catalog_handles() {
            registrar.register(h);
        }
        registrar.finish(mods)
    }

    fn ids(table: &CapabilityTable) -> Vec<String> {
        table.catalogs.iter().map(|c| c.catalog.id.clone()).collect()
    }

    #[test]
    fn catalog_ids_are_namespaced() {
        let table = finish_with(&[]);
        assert_eq!(ids(&table), vec!["a.top", "a.new", "b.top", "b.search"]);
        assert_eq!(table.catalogs[2].original_id, "top");
        assert_eq!(table.catalogs[2].addon_instance_id, "b");
    }

    #[test]
    fn listed_catalogs_come_first_unlisted_keep_order() {
        let table = finish_with(&[modification("b.top", "series"), modification("a.new", "movie")]);
        assert_eq!(ids(&table), vec!["b.top", "a.new", "a.top", "b.search"]);
    }

    #[test]
    fn disabled_catalogs_are_dropped() {
        let mut m = modification("a.top", "movie");
        m.enabled = false;
        let table = finish_with(&[m]);
        assert_eq!(ids(&table), vec!["a.new", "b.top", "b.search"]);
    }

    #[test]
    fn edits_rename_require_genre_override_type() {
        let mut m = modification("a.new", "movie");
        m.name = Some("Fresh".into());
        m.only_on_discover = true;
        m.override_type = Some("series".into());
        let table = finish_with(&[m]);
        let edited = &table.catalogs[0];
        assert_eq!(edited.catalog.name, "Fresh");
        assert_eq!(edited.catalog.r#type, "series");
        assert_eq!(edited.original_type, "movie");
        assert!(edited.catalog.extra("genre").unwrap().is_required);
        assert!(table.find_catalog("series", "a.new").is_some());
        assert!(table.find_catalog("movie", "a.new").is_none());
    }

    #[test]
    fn disable_search_strips_extra_or_drops_search_only_catalog() {
        let mut new = modification("a.new", "movie");
        new.disable_search = true;
        let mut search = modification("b.search", "series");
        search.disable_search = true;
        let table = finish_with(&[new, search]);
        assert_eq!(ids(&table), vec!["a.new", "a.top", "b.top"]);
        assert_eq!(
            table.catalogs[0].catalog.extra,
            vec![CatalogExtra {
                name: "genre".into(),
                is_required: false,
                options: Some(vec!["Action".into()]),
                options_limit: None,
            }]
        );
    }

    #[test]
    fn types_union_resources_and_catalogs() {
        let table = finish_with(&[]);
        assert_eq!(table.types(), vec!["movie", "series"]);
    }
}
