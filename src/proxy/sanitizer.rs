// Response header / cookie sanitizer

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

use crate::proxy::rewriter::RewriteContext;

/// Security headers that would stop a proxied page from running inside the
/// proxy's own origin.
pub const DENIED_HEADERS: [&str; 8] = [
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
    "strict-transport-security",
    "x-content-type-options",
    "cross-origin-opener-policy",
    "cross-origin-embedder-policy",
    "cross-origin-resource-policy",
];

/// Headers forwarded under [`HeaderPolicy::AllowList`].
pub const ALLOWED_HEADERS: [&str; 6] = [
    "content-type",
    "content-length",
    "accept-ranges",
    "content-range",
    "date",
    "last-modified",
];

const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "proxy-connection",
];

/// Which upstream response headers reach the client.
///
/// One policy is applied to every response of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HeaderPolicy {
    /// Forward everything except [`DENIED_HEADERS`]
    #[default]
    DenyList,
    /// Forward only [`ALLOWED_HEADERS`]
    AllowList,
}

impl HeaderPolicy {
    fn forwards(self, name: &HeaderName) -> bool {
        let name = name.as_str();
        if HOP_BY_HOP.contains(&name) || name.starts_with("proxy-") {
            return false;
        }
        match self {
            Self::DenyList => !DENIED_HEADERS.contains(&name),
            Self::AllowList => ALLOWED_HEADERS.contains(&name),
        }
    }
}

/// Cookie handling for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieMode {
    /// No cookies in either direction
    Stateless,
    /// Cookies flow, bound to the session's path on the proxy origin
    Session { scope: String },
}

impl CookieMode {
    pub fn forwards_cookies(&self) -> bool {
        matches!(self, Self::Session { .. })
    }
}

/// Filter upstream headers for the client.
///
/// `Set-Cookie` is sanitized (session mode) or dropped (stateless mode)
/// regardless of `policy`; `Access-Control-Allow-Origin: *` is always set.
pub fn sanitize_response_headers(
    upstream: &HeaderMap,
    policy: HeaderPolicy,
    cookies: &CookieMode,
) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(upstream.len() + 1);

    for (name, value) in upstream {
        if name == header::SET_COOKIE {
            continue;
        }
        if policy.forwards(name) {
            out.append(name.clone(), value.clone());
        }
    }

    if let CookieMode::Session { scope } = cookies {
        for value in upstream.get_all(header::SET_COOKIE) {
            let Ok(raw) = value.to_str() else {
                tracing::debug!("dropping non-ASCII Set-Cookie header");
                continue;
            };
            match HeaderValue::from_str(&sanitize_set_cookie(raw, Some(scope))) {
                Ok(v) => {
                    out.append(header::SET_COOKIE, v);
                }
                Err(e) => tracing::debug!("dropping unrepresentable Set-Cookie: {}", e),
            }
        }
    }

    out.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    out
}

/// Strip `Domain`, downgrade `SameSite=None` to `Lax`, and bind the cookie
/// to `path_scope` when one is given.
pub fn sanitize_set_cookie(value: &str, path_scope: Option<&str>) -> String {
    let mut parts = value.split(';');
    let mut out = vec![parts.next().unwrap_or_default().trim().to_string()];
    let mut has_path = false;

    for attr in parts {
        let attr = attr.trim();
        if attr.is_empty() {
            continue;
        }
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), Some(v.trim())),
            None => (attr, None),
        };
        if key.eq_ignore_ascii_case("domain") {
            continue;
        }
        if key.eq_ignore_ascii_case("samesite")
            && val.map(|v| v.eq_ignore_ascii_case("none")).unwrap_or(false)
        {
            out.push("SameSite=Lax".to_string());
            continue;
        }
        if key.eq_ignore_ascii_case("path") {
            if let Some(scope) = path_scope {
                has_path = true;
                out.push(format!("Path={}", scope));
                continue;
            }
        }
        out.push(attr.to_string());
    }

    if let (Some(scope), false) = (path_scope, has_path) {
        out.push(format!("Path={}", scope));
    }
    out.join("; ")
}

/// Re-target a redirect at the proxy. Non-redirect responses are untouched.
pub fn rewrite_location(headers: &mut HeaderMap, status: StatusCode, ctx: &RewriteContext<'_>) {
    if !status.is_redirection() {
        return;
    }
    let Some(location) = headers.get(header::LOCATION).and_then(|v| v.to_str().ok()) else {
        return;
    };
    let Some(rewritten) = ctx.rewrite_url(location) else {
        return;
    };
    match HeaderValue::from_str(&rewritten) {
        Ok(value) => {
            tracing::debug!("redirect {} -> {}", location, rewritten);
            headers.insert(header::LOCATION, value);
        }
        Err(e) => tracing::debug!("leaving Location unrewritten: {}", e),
    }
}
