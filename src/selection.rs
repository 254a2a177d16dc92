//! Per-resource candidate selection.
//!
//! Stream and subtitle requests fan out to every addon that declares the
//! resource for the type and whose prefixes (if any) match the id. Meta
//! requests walk two tiers one addon at a time and stop at the first hit.

use std::fmt::Display;

use tracing::{debug, warn};

use crate::addon::{with_timeout, AddonHandle};
use crate::models::{Addon, ErrorEntry, GatewayResponse, MetaItem, ResourceKind};

/// Error entry attributed to an addon.
pub(crate) fn addon_error(addon: &Addon, error: impl Display) -> ErrorEntry {
    ErrorEntry::new(addon.name.clone(), error.to_string())
}

/// Addons able to serve `kind` for this type and id, in configured order.
#[must_use]
pub fn candidates(handles: &[AddonHandle], kind: ResourceKind, r#type: &str, id: &str) -> Vec<AddonHandle> {
    handles
        .iter()
        .filter(|h| h.supports(kind, r#type, id))
        .cloned()
        .collect()
}

/// Meta candidates split into priority tiers.
#[derive(Debug, Default)]
pub struct MetaTiers {
    /// Declared prefixes match the id.
    pub prefixed: Vec<AddonHandle>,
    /// Support the type without any prefix restriction.
    pub general: Vec<AddonHandle>,
}

impl MetaTiers {
    #[must_use]
    pub fn select(handles: &[AddonHandle], r#type: &str, id: &str) -> Self {
        let mut tiers = Self::default();
        for handle in handles {
            let Some(meta) = handle.resource(ResourceKind::Meta) else {
                continue;
            };
            if !meta.supports_type(r#type) {
                continue;
            }
            if meta.matches_prefix(id) {
                tiers.prefixed.push(handle.clone());
            } else if meta.id_prefixes.is_none() {
                tiers.general.push(handle.clone());
            }
        }
        tiers
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefixed.is_empty() && self.general.is_empty()
    }

    /// Try each candidate sequentially; the first meta wins.
    ///
    /// Prefixed-tier failures are collected and returned only if nobody
    /// answers. General-tier failures are logged and dropped.
    pub async fn resolve(&self, r#type: &str, id: &str) -> GatewayResponse<Option<MetaItem>> {
        let mut errors = Vec::new();

        for handle in &self.prefixed {
            match with_timeout(&handle.addon, handle.connector.get_meta(r#type, id)).await {
                Ok(meta) => return GatewayResponse::ok(Some(meta), Vec::new()),
                Err(e) => {
                    warn!(addon = %handle.addon.name, id, error = %e, "Meta lookup failed");
                    errors.push(addon_error(&handle.addon, e));
                }
            }
        }

        for handle in &self.general {
            match with_timeout(&handle.addon, handle.connector.get_meta(r#type, id)).await {
                Ok(meta) => return GatewayResponse::ok(Some(meta), Vec::new()),
                Err(e) => debug!(addon = %handle.addon.name, id, error = %e, "General meta lookup failed"),
            }
        }

        GatewayResponse::failure(None, errors)
    }
}
