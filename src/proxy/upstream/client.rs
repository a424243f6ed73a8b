// Upstream client implementation
// One pooled HTTP client shared by every proxied request

use axum::http::{header, HeaderMap, HeaderValue, Method};
use bytes::Bytes;
use reqwest::{redirect, Client, Response};
use tokio::time::Duration;
use url::Url;

use crate::proxy::config::ProxyConfig;
use crate::proxy::error::{ProxyError, Result};

/// Inbound request headers relayed to the upstream as-is.
const FORWARDED_HEADERS: [header::HeaderName; 9] = [
    header::ACCEPT,
    header::ACCEPT_LANGUAGE,
    header::RANGE,
    header::IF_RANGE,
    header::IF_NONE_MATCH,
    header::IF_MODIFIED_SINCE,
    header::IF_MATCH,
    header::IF_UNMODIFIED_SINCE,
    header::CONTENT_TYPE,
];

const DEFAULT_ACCEPT: &str = "*/*";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

pub struct UpstreamClient {
    http_client: Client,
    /// Time allowed until the upstream response headers arrive; bodies
    /// (media streams) are not bounded by it
    request_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &ProxyConfig) -> std::result::Result<Self, String> {
        let mut builder = Client::builder()
            // Connection settings (connection reuse across requests)
            .connect_timeout(Duration::from_secs(20))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            // Redirects are re-targeted at the proxy, never followed here
            .redirect(redirect::Policy::none())
            .user_agent(&config.user_agent);

        let proxy = &config.upstream_proxy;
        if proxy.enabled && !proxy.url.is_empty() {
            let upstream_proxy = reqwest::Proxy::all(&proxy.url)
                .map_err(|e| format!("Invalid upstream proxy {}: {}", proxy.url, e))?;
            builder = builder.proxy(upstream_proxy);
            tracing::info!("UpstreamClient enabled proxy: {}", proxy.url);
        } else {
            builder = builder.no_proxy();
        }

        let http_client = builder
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            http_client,
            request_timeout: Duration::from_secs(config.request_timeout),
        })
    }

    /// Headers sent upstream for an inbound request.
    ///
    /// Only [`FORWARDED_HEADERS`] (plus `Cookie` when `forward_cookies`) are
    /// relayed; `Referer` is always the target's origin and `Host` comes
    /// from the target URL.
    pub fn build_headers(inbound: &HeaderMap, target: &Url, forward_cookies: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for name in FORWARDED_HEADERS.iter() {
            for value in inbound.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        if forward_cookies {
            for value in inbound.get_all(header::COOKIE) {
                headers.append(header::COOKIE, value.clone());
            }
        }

        headers
            .entry(header::ACCEPT)
            .or_insert(HeaderValue::from_static(DEFAULT_ACCEPT));
        headers
            .entry(header::ACCEPT_LANGUAGE)
            .or_insert(HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE));

        if let Ok(referer) = HeaderValue::from_str(&target.origin().ascii_serialization()) {
            headers.insert(header::REFERER, referer);
        }
        headers
    }

    /// Issue one upstream request. Transport failures are mapped to
    /// [`ProxyError`]; any HTTP status is a successful response.
    pub async fn send(
        &self,
        method: Method,
        target: &Url,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response> {
        let mut request = self
            .http_client
            .request(method.clone(), target.clone())
            .headers(headers);
        if !body.is_empty() {
            request = request.body(body);
        }

        let sent = match tokio::time::timeout(self.request_timeout, request.send()).await {
            Ok(sent) => sent,
            Err(_) => {
                tracing::warn!("Upstream {} {} timed out", method, target);
                return Err(ProxyError::UpstreamTimeout {
                    host: target.host_str().unwrap_or_default().to_string(),
                });
            }
        };

        match sent {
            Ok(resp) => {
                tracing::debug!("✓ Upstream {} {} | Status: {}", method, target, resp.status());
                Ok(resp)
            }
            Err(e) => {
                tracing::warn!("Upstream {} {} failed: {}", method, target, e);
                Err(ProxyError::from_upstream(target, e))
            }
        }
    }
}
