//! Conditional stream URL rewriting through a proxy backend.
//!
//! The [`Proxifier`] decides per stream whether it needs proxying, sends
//! one batched request to the backend, and swaps in the returned URLs.
//! A stream that needed proxying but got no URL back is dropped: serving
//! the unproxied URL could leak the user's address to the upstream host.

pub mod mediaflow;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ProxyConfig;
use crate::models::ParsedStream;

pub use mediaflow::MediaflowBackend;

/// One URL to proxy, with the headers the upstream expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyRequest {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<HashMap<String, String>>,
}

impl ProxyRequest {
    fn for_stream(stream: &ParsedStream, url: &str) -> Self {
        Self {
            url: url.to_string(),
            filename: stream.filename.clone(),
            request_headers: stream.request_headers.clone(),
            response_headers: stream.response_headers.clone(),
        }
    }
}

/// A proxy service able to rewrite URLs.
#[async_trait]
pub trait ProxyBackend: Send + Sync {
    fn config(&self) -> &ProxyConfig;

    /// Rewrite a batch of URLs. Results correspond to requests by position.
    async fn generate_urls(&self, requests: &[ProxyRequest]) -> Result<Vec<Option<String>>>;

    /// Address the proxy egresses from, if it can tell.
    async fn public_ip(&self) -> Result<Option<String>>;
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url).ok()?.host_str().map(str::to_ascii_lowercase)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Leave,
    /// Already points at the proxy.
    SelfHosted,
    Proxy,
}

/// Applies the proxy policy to a stream collection.
#[derive(Clone, Default)]
pub struct Proxifier {
    backend: Option<Arc<dyn ProxyBackend>>,
}

impl Proxifier {
    pub fn new(backend: Option<Arc<dyn ProxyBackend>>) -> Self {
        Self { backend }
    }

    fn decide(config: &ProxyConfig, proxy_host: Option<&str>, stream: &ParsedStream) -> Decision {
        let Some(url) = stream.url.as_deref() else {
            return Decision::Leave;
        };
        if !config.enabled || stream.proxied {
            return Decision::Leave;
        }
        if proxy_host.is_some() && host_of(url).as_deref() == proxy_host {
            return Decision::SelfHosted;
        }

        let addon_allowed =
            config.proxied_addons.is_empty() || config.proxied_addons.contains(&stream.addon.instance_id);
        let service_allowed = config.proxied_services.is_empty()
            || stream
                .service
                .as_ref()
                .is_some_and(|s| config.proxied_services.contains(&s.id));

        if addon_allowed && service_allowed {
            Decision::Proxy
        } else {
            Decision::Leave
        }
    }

    /// Rewrite eligible streams; fail closed on missing results.
    pub async fn apply(&self, mut streams: Vec<ParsedStream>) -> Vec<ParsedStream> {
        let Some(backend) = &self.backend else {
            return streams;
        };
        let config = backend.config();
        if !config.enabled {
            return streams;
        }
        let proxy_host = config.url.as_deref().and_then(host_of);

        let mut pending: Vec<usize> = Vec::new();
        for (index, stream) in streams.iter_mut().enumerate() {
            match Self::decide(config, proxy_host.as_deref(), stream) {
                Decision::Leave => {}
                Decision::SelfHosted => stream.proxied = true,
                Decision::Proxy => pending.push(index),
            }
        }
        if pending.is_empty() {
            return streams;
        }

        let requests: Vec<ProxyRequest> = pending
            .iter()
            .filter_map(|&i| streams[i].url.as_deref().map(|url| ProxyRequest::for_stream(&streams[i], url)))
            .collect();

        let results = match backend.generate_urls(&requests).await {
            Ok(urls) => {
                if urls.len() != requests.len() {
                    warn!(expected = requests.len(), got = urls.len(), "Proxy returned a mismatched batch");
                }
                urls
            }
            Err(e) => {
                warn!(error = %e, count = requests.len(), "Proxy URL generation failed; dropping affected streams");
                Vec::new()
            }
        };

        let mut rejected = vec![false; streams.len()];
        for (slot, &index) in pending.iter().enumerate() {
            match results.get(slot).cloned().flatten() {
                Some(url) => {
                    let stream = &mut streams[index];
                    stream.url = Some(url);
                    stream.proxied = true;
                    stream.request_headers = None;
                }
                None => rejected[index] = true,
            }
        }

        let dropped = rejected.iter().filter(|d| **d).count();
        debug!(proxied = pending.len() - dropped, dropped, "Proxified streams");
        streams
            .into_iter()
            .zip(rejected)
            .filter_map(|(stream, rejected)| (!rejected).then_some(stream))
            .collect()
    }

    /// Public IP of the proxy, if a backend is configured.
    pub async fn public_ip(&self) -> Option<String> {
        let backend = self.backend.as_ref()?;
        if let Some(ip) = &backend.config().public_ip {
            return Some(ip.clone());
        }
        match backend.public_ip().await {
            Ok(ip) => ip,
            Err(e) => {
                warn!(error = %e, "Proxy public IP lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Addon, ServiceInfo, StreamType};
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockBackend {
        config: ProxyConfig,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProxyBackend for MockBackend {
        fn config(&self) -> &ProxyConfig {
            &self.config
        }

        async fn generate_urls(&self, requests: &[ProxyRequest]) -> Result<Vec<Option<String>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("proxy down"));
            }
            Ok(requests
                .iter()
                .map(|r| (!r.url.contains("reject")).then(|| format!("https://proxy.example/p?d={}", r.url)))
                .collect())
        }

        async fn public_ip(&self) -> Result<Option<String>> {
            Ok(Some("203.0.113.7".into()))
        }
    }

    fn backend(enabled: bool, fail: bool) -> Arc<MockBackend> {
        Arc::new(MockBackend {
            config: ProxyConfig {
                enabled,
                url: Some("https://proxy.example".into()),
                ..ProxyConfig::default()
            },
            fail,
            calls: AtomicUsize::new(0),
        })
    }

    fn stream(id: &str, url: Option<&str>) -> ParsedStream {
        let addon = Arc::new(Addon::new("a", "A", "https://a.example/manifest.json"));
        let mut s = ParsedStream::new(id, addon, StreamType::Http);
        s.url = url.map(String::from);
        s.request_headers = Some(HashMap::from([("Referer".into(), "https://a.example".into())]));
        s
    }

    #[tokio::test]
    async fn disabled_proxy_leaves_streams_alone() {
        let b = backend(false, false);
        let input = vec![stream("1", Some("https://cdn.example/1.mkv"))];
        let out = Proxifier::new(Some(b.clone())).apply(input.clone()).await;
        assert_eq!(out[0].url, input[0].url);
        assert!(!out[0].proxied);
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);

        let out = Proxifier::default().apply(input.clone()).await;
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn rewrites_and_strips_request_headers() {
        let out = Proxifier::new(Some(backend(true, false)))
            .apply(vec![stream("1", Some("https://cdn.example/1.mkv")), stream("2", None)])
            .await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].url.as_deref(), Some("https://proxy.example/p?d=https://cdn.example/1.mkv"));
        assert!(out[0].proxied);
        assert!(out[0].request_headers.is_none());
        assert!(!out[1].proxied);
    }

    #[tokio::test]
    async fn self_hosted_stream_is_only_marked() {
        let b = backend(true, false);
        let out = Proxifier::new(Some(b.clone()))
            .apply(vec![stream("1", Some("https://PROXY.example/already"))])
            .await;
        assert_eq!(out[0].url.as_deref(), Some("https://PROXY.example/already"));
        assert!(out[0].proxied);
        assert!(out[0].request_headers.is_some());
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn overall_failure_drops_only_streams_needing_proxy() {
        let mut config_backend = backend(true, true);
        Arc::get_mut(&mut config_backend).unwrap().config.proxied_services = vec!["realdebrid".into()];
        let mut rd = stream("rd", Some("https://rd.example/1"));
        rd.service = Some(ServiceInfo { id: "realdebrid".into(), cached: true });
        let plain = stream("plain", Some("https://cdn.example/2"));
        let out = Proxifier::new(Some(config_backend)).apply(vec![rd, plain]).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "plain");
        assert!(!out[0].proxied);
    }

    #[tokio::test]
    async fn absent_result_drops_that_stream() {
        let out = Proxifier::new(Some(backend(true, false)))
            .apply(vec![
                stream("ok", Some("https://cdn.example/ok")),
                stream("bad", Some("https://cdn.example/reject")),
            ])
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "ok");
    }

    #[tokio::test]
    async fn addon_allow_list() {
        let mut b = backend(true, false);
        Arc::get_mut(&mut b).unwrap().config.proxied_addons = vec!["other".into()];
        let out = Proxifier::new(Some(b)).apply(vec![stream("1", Some("https://cdn.example/1"))]).await;
        assert!(!out[0].proxied);
    }

    #[tokio::test]
    async fn configured_public_ip_wins() {
        let mut b = backend(true, false);
        assert_eq!(Proxifier::new(Some(b.clone())).public_ip().await.as_deref(), Some("203.0.113.7"));
        Arc::get_mut(&mut b).unwrap().config.public_ip = Some("198.51.100.1".into());
        assert_eq!(Proxifier::new(Some(b)).public_ip().await.as_deref(), Some("198.51.100.1"));
    }
}
