//! MediaFlow proxy backend.
//!
//! - `POST {base}/generate_urls` rewrites a batch of URLs in one call.
//! - `GET {base}/proxy/ip?api_password=...` reports the egress address,
//!   cached for an hour per proxy URL.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{ProxyBackend, ProxyRequest};
use crate::cache::{get_json, set_json, Cache};
use crate::config::ProxyConfig;
use crate::http_client::AddonClient;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const PUBLIC_IP_TTL_SECS: u64 = 60 * 60;
const STREAM_ENDPOINT: &str = "/proxy/stream";

#[derive(Serialize)]
struct GenerateUrlsBody<'a> {
    mediaflow_proxy_url: &'a str,
    api_password: Option<&'a str>,
    urls: Vec<UrlEntry<'a>>,
}

#[derive(Serialize)]
struct UrlEntry<'a> {
    endpoint: &'static str,
    destination_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_headers: Option<&'a std::collections::HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_headers: Option<&'a std::collections::HashMap<String, String>>,
}

#[derive(Deserialize)]
struct GenerateUrlsResponse {
    #[serde(default)]
    urls: Vec<Option<String>>,
}

#[derive(Deserialize)]
struct IpResponse {
    ip: Option<String>,
}

pub struct MediaflowBackend {
    config: ProxyConfig,
    base_url: String,
    client: AddonClient,
    cache: Arc<dyn Cache>,
}

impl MediaflowBackend {
    /// # Errors
    ///
    /// Fails when the config has no proxy URL.
    pub fn new(config: ProxyConfig, client: AddonClient, cache: Arc<dyn Cache>) -> Result<Self> {
        let base_url = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("mediaflow proxy needs a url"))?
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            config,
            base_url,
            client,
            cache,
        })
    }

    fn ip_cache_key(&self) -> String {
        format!("mediaflow-ip:{}", self.base_url)
    }
}

#[async_trait]
impl ProxyBackend for MediaflowBackend {
    fn config(&self) -> &ProxyConfig {
        &self.config
    }

    #[instrument(skip(self, requests), fields(count = requests.len()))]
    async fn generate_urls(&self, requests: &[ProxyRequest]) -> Result<Vec<Option<String>>> {
        let body = GenerateUrlsBody {
            mediaflow_proxy_url: &self.base_url,
            api_password: self.config.credentials.as_deref(),
            urls: requests
                .iter()
                .map(|r| UrlEntry {
                    endpoint: STREAM_ENDPOINT,
                    destination_url: &r.url,
                    filename: r.filename.as_deref(),
                    request_headers: r.request_headers.as_ref(),
                    response_headers: r.response_headers.as_ref(),
                })
                .collect(),
        };

        let response = self
            .client
            .inner()
            .post(format!("{}/generate_urls", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .context("generate_urls request failed")?
            .error_for_status()
            .context("generate_urls rejected")?;

        let parsed: GenerateUrlsResponse = response.json().await.context("invalid generate_urls response")?;
        debug!(returned = parsed.urls.len(), "Generated proxy URLs");
        Ok(parsed.urls)
    }

    async fn public_ip(&self) -> Result<Option<String>> {
        let key = self.ip_cache_key();
        if let Some(ip) = get_json::<String>(self.cache.as_ref(), &key).await {
            return Ok(Some(ip));
        }

        let mut url = url::Url::parse(&format!("{}/proxy/ip", self.base_url))?;
        if let Some(password) = &self.config.credentials {
            url.query_pairs_mut().append_pair("api_password", password);
        }
        let response: IpResponse = self.client.get_json(url.as_str(), REQUEST_TIMEOUT).await?;

        if let Some(ip) = &response.ip {
            set_json(self.cache.as_ref(), &key, ip, PUBLIC_IP_TTL_SECS).await;
        }
        Ok(response.ip)
    }
}
