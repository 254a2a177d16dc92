//! HTTP client shared by addon connectors, the proxy backend and the
//! metadata provider.
//!
//! Features:
//! - HTTP/2 multiplexing across concurrent addon calls
//! - Brotli, Zstd, Gzip compression (auto-negotiated)
//! - Connection pooling with keep-alive
//! - Per-call timeouts layered over a conservative client default

use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::error::{GatewayError, Result};

/// User agent sent to addons.
pub const USER_AGENT: &str = concat!("streamfed/", env!("CARGO_PKG_VERSION"));

/// HTTP client used for all outbound addon traffic.
#[derive(Clone)]
pub struct AddonClient {
    client: Client,
}

impl AddonClient {
    /// Create a new pooled client.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            // ═══════════════════════════════════════════════════════════════
            // CONNECTION REUSE
            // ═══════════════════════════════════════════════════════════════
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .use_rustls_tls()
            // ═══════════════════════════════════════════════════════════════
            // COMPRESSION (auto-negotiated via Accept-Encoding)
            // ═══════════════════════════════════════════════════════════════
            .brotli(true)
            .zstd(true)
            .gzip(true)
            .deflate(true)
            // ═══════════════════════════════════════════════════════════════
            // TIMEOUTS (per-request timeouts override the total)
            // ═══════════════════════════════════════════════════════════════
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self { client })
    }

    /// GET a URL with the given timeout, failing on non-2xx statuses.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get(&self, url: &str, timeout: Duration) -> Result<Response> {
        debug!("Requesting");
        let response = self.client.get(url).timeout(timeout).send().await?;
        let status = response.status();
        debug!(status = %status, version = ?response.version(), "Response received");

        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    /// GET a URL and decode its JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, timeout: Duration) -> Result<T> {
        let response = self.get(url, timeout).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Get the underlying reqwest client
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}
