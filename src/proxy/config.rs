use serde::{Deserialize, Serialize};

use crate::proxy::sanitizer::HeaderPolicy;

/// Default upstream User-Agent (a current desktop browser; some upstreams
/// refuse unknown clients).
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36";

/// Rewriting proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Allow LAN access
    /// - false: loopback only (127.0.0.1, default)
    /// - true: all interfaces (0.0.0.0)
    #[serde(default)]
    pub allow_lan_access: bool,

    /// Listening port
    pub port: u16,

    /// Scheme of the proxy addresses written into rewritten content.
    /// TLS is normally terminated in front of this process, hence `https`.
    #[serde(default = "default_public_scheme")]
    pub public_scheme: String,

    /// Host (and port) written into proxy addresses. When unset, the inbound
    /// `Host` header is used.
    #[serde(default)]
    pub public_host: Option<String>,

    /// Upstream request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Idle time after which a session is evicted (minutes)
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: i64,

    /// Largest HTML/CSS body that is buffered for rewriting; larger bodies
    /// are streamed through untouched
    #[serde(default = "default_max_rewrite_bytes")]
    pub max_rewrite_bytes: usize,

    /// Largest inbound request body forwarded upstream
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,

    /// Response header policy
    #[serde(default)]
    pub header_policy: HeaderPolicy,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Upstream proxy configuration
    #[serde(default)]
    pub upstream_proxy: UpstreamProxyConfig,
}

/// Upstream proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpstreamProxyConfig {
    /// Enabled
    pub enabled: bool,
    /// Proxy address (http://, https://, socks5://)
    pub url: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            allow_lan_access: false,
            port: 3001,
            public_scheme: default_public_scheme(),
            public_host: None,
            request_timeout: default_request_timeout(),
            session_ttl_minutes: default_session_ttl_minutes(),
            max_rewrite_bytes: default_max_rewrite_bytes(),
            max_request_body_bytes: default_max_request_body_bytes(),
            header_policy: HeaderPolicy::default(),
            user_agent: default_user_agent(),
            upstream_proxy: UpstreamProxyConfig::default(),
        }
    }
}

fn default_public_scheme() -> String {
    "https".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_session_ttl_minutes() -> i64 {
    12 * 60
}

fn default_max_rewrite_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_max_request_body_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl ProxyConfig {
    /// Get the actual listen address
    pub fn get_bind_address(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }

    /// Origin written into proxy addresses for a request that arrived with
    /// `host_header`.
    pub fn public_origin(&self, host_header: Option<&str>) -> Option<String> {
        let host = self.public_host.as_deref().or(host_header)?;
        host.parse::<axum::http::uri::Authority>().ok()?;
        Some(format!("{}://{}", self.public_scheme, host))
    }
}
