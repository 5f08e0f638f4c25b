use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::{Certificate, Proxy};

use crate::error::TransferError;

/// Knobs for building the shared `reqwest::Client` used by both the
/// `Fetcher` and the `Client`. Mirrors the original `FetcherOption`.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    pub insecure_skip_verify: bool,
    pub root_ca_pem: Option<String>,
    pub disallow_redirects: bool,
    /// HTTP/2 is disabled by default (HTTP/1.1 only); set `true` to allow
    /// the client to negotiate HTTP/2 when the server supports it.
    pub enable_http2: bool,
    pub proxy_url: Option<String>,
    /// hostname -> override host[:port], `"*"` matches anything unmapped.
    pub resolve_host_map: HashMap<String, String>,
    pub user_agent: Option<String>,
}

fn default_user_agent() -> &'static str {
    if cfg!(target_os = "windows") {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0"
    } else if cfg!(target_os = "macos") {
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.3; rv:122.0) Gecko/20100101 Firefox/122.0"
    } else {
        "Mozilla/5.0 (X11; Linux i686; rv:122.0) Gecko/20100101 Firefox/122.0"
    }
}

pub fn build_client(cfg: &TransportConfig) -> Result<reqwest::Client, TransferError> {
    let mut builder = reqwest::Client::builder()
        .cookie_store(true)
        .pool_max_idle_per_host(10_000)
        .pool_idle_timeout(Duration::from_secs(90))
        .danger_accept_invalid_certs(cfg.insecure_skip_verify)
        .user_agent(cfg.user_agent.clone().unwrap_or_else(|| default_user_agent().to_string()));

    if !cfg.enable_http2 {
        builder = builder.http1_only();
    }

    if cfg.disallow_redirects {
        builder = builder.redirect(reqwest::redirect::Policy::none());
    }

    if let Some(pem) = &cfg.root_ca_pem {
        let cert = Certificate::from_pem(pem.as_bytes())
            .map_err(|e| TransferError::Validation(format!("invalid root CA pem: {e}")))?;
        builder = builder.add_root_certificate(cert);
    }

    if let Some(proxy_url) = &cfg.proxy_url {
        let proxy = Proxy::all(proxy_url)
            .map_err(|e| TransferError::Validation(format!("invalid proxy url: {e}")))?;
        builder = builder.proxy(proxy);
    }

    if !cfg.resolve_host_map.is_empty() {
        let resolver = HostOverrideResolver::new(cfg.resolve_host_map.clone());
        builder = builder.dns_resolver(Arc::new(resolver));
    }

    builder.build().map_err(TransferError::from)
}

/// Resolves a fixed set of hostnames to an override host (or IP), falling
/// back to normal DNS lookup of the override target (or the original host,
/// for anything unmapped). `"*"` is a wildcard matching any host not
/// otherwise listed, mirroring the original `GetDialContextWithHosts`.
#[derive(Clone)]
struct HostOverrideResolver {
    map: Arc<HashMap<String, String>>,
}

impl HostOverrideResolver {
    fn new(map: HashMap<String, String>) -> Self {
        Self { map: Arc::new(map) }
    }

    fn target_for(&self, host: &str) -> Option<String> {
        self.map.get(host).or_else(|| self.map.get("*")).cloned()
    }
}

impl Resolve for HostOverrideResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        let resolver = self.clone();
        Box::pin(async move {
            let lookup_target = resolver.target_for(&host).unwrap_or(host);
            let lookup_target = if lookup_target.contains(':') {
                lookup_target
            } else {
                format!("{lookup_target}:0")
            };
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host(lookup_target)
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?
                .collect();
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}
