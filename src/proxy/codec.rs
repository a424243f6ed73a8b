//! URL codec: maps a target URL to its proxy address and back.
//!
//! Proxy addresses have the form `{origin}/proxy[/{session}]?url={target}`
//! where `target` is percent-encoded with [`COMPONENT`]. The client agent
//! (`rewriter/agent.js`) applies the same escape set and the same opaque
//! scheme rule, so both sides produce identical addresses.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::proxy::error::{ProxyError, Result};

/// Path every proxy address starts with.
pub const PROXY_PATH: &str = "/proxy";

/// Query parameter carrying the target URL.
pub const TARGET_PARAM: &str = "url";

/// `encodeURIComponent` plus `! ' ( ) *`, which keeps addresses safe inside
/// unquoted CSS `url()` tokens.
pub const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const OPAQUE_SCHEMES: [&str; 3] = ["data:", "blob:", "javascript:"];

/// A target URL together with the session it is browsed in, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAddress {
    pub target: Url,
    pub session: Option<String>,
}

impl ProxyAddress {
    pub fn to_proxy_url(&self, proxy_origin: &str) -> String {
        encode(self.target.as_str(), proxy_origin, self.session.as_deref())
    }
}

/// True for references that must never be routed through the proxy.
pub fn is_opaque(reference: &str) -> bool {
    let trimmed = reference.trim_start();
    OPAQUE_SCHEMES.iter().any(|scheme| {
        trimmed
            .get(..scheme.len())
            .map(|head| head.eq_ignore_ascii_case(scheme))
            .unwrap_or(false)
    })
}

/// `{origin}/proxy` or `{origin}/proxy/{session}`.
pub fn proxy_prefix(proxy_origin: &str, session: Option<&str>) -> String {
    match session {
        Some(sid) => format!("{}{}/{}", proxy_origin, PROXY_PATH, sid),
        None => format!("{}{}", proxy_origin, PROXY_PATH),
    }
}

/// True when `url` already addresses this proxy.
pub fn is_proxy_address(url: &str, proxy_origin: &str) -> bool {
    let Some(head) = url.get(..proxy_origin.len()) else {
        return false;
    };
    if !head.eq_ignore_ascii_case(proxy_origin) {
        return false;
    }
    let rest = &url[proxy_origin.len()..];
    rest.strip_prefix(PROXY_PATH)
        .map(|tail| tail.starts_with('?') || tail.starts_with('/'))
        .unwrap_or(false)
}

/// Encode an absolute URL into its proxy address.
///
/// Empty input, opaque schemes, relative input and existing proxy addresses
/// are returned unchanged.
pub fn encode(absolute_url: &str, proxy_origin: &str, session: Option<&str>) -> String {
    if absolute_url.is_empty()
        || is_opaque(absolute_url)
        || is_proxy_address(absolute_url, proxy_origin)
    {
        return absolute_url.to_string();
    }
    let Ok(parsed) = Url::parse(absolute_url) else {
        return absolute_url.to_string();
    };
    format!(
        "{}?{}={}",
        proxy_prefix(proxy_origin, session),
        TARGET_PARAM,
        utf8_percent_encode(parsed.as_str(), COMPONENT)
    )
}

/// Resolve a possibly relative reference against `base`.
///
/// Parse failures return the input unchanged; callers treat an unchanged
/// result as "not rewritten".
pub fn resolve(reference: &str, base: &Url) -> String {
    base.join(reference)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| reference.to_string())
}

/// The single rewrite rule shared by the HTML and CSS rewriters, the
/// `Location` rewrite and the client agent.
///
/// Returns `None` when the reference must be left as found.
pub fn rewrite_reference(
    reference: &str,
    base: &Url,
    proxy_origin: &str,
    session: Option<&str>,
) -> Option<String> {
    let trimmed = reference.trim();
    if trimmed.is_empty() || is_opaque(trimmed) || is_proxy_address(trimmed, proxy_origin) {
        return None;
    }

    if trimmed.starts_with('#') {
        let mut page = base.clone();
        page.set_fragment(None);
        return Some(format!(
            "{}{}",
            encode(page.as_str(), proxy_origin, session),
            trimmed
        ));
    }

    let absolute = match base.join(trimmed) {
        Ok(url) => url,
        Err(e) => {
            tracing::debug!("leaving reference `{}` unrewritten: {}", trimmed, e);
            return None;
        }
    };
    if !matches!(absolute.scheme(), "http" | "https" | "ws" | "wss") {
        return None;
    }
    Some(encode(absolute.as_str(), proxy_origin, session))
}

/// Validate a raw `url` parameter into an absolute target URL.
pub fn parse_target(raw: Option<&str>) -> Result<Url> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).ok_or(ProxyError::MissingTarget)?;
    let url = Url::parse(raw).map_err(|e| ProxyError::MalformedTarget {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(ProxyError::MalformedTarget {
            url: raw.to_string(),
            reason: "URL cannot be used as a navigation target".to_string(),
        });
    }
    Ok(url)
}

/// Recover the target (and session) from a proxy address.
pub fn decode(proxy_url: &str) -> Result<ProxyAddress> {
    let parsed = Url::parse(proxy_url).map_err(|e| ProxyError::MalformedTarget {
        url: proxy_url.to_string(),
        reason: e.to_string(),
    })?;

    let not_proxy = || ProxyError::MalformedTarget {
        url: proxy_url.to_string(),
        reason: format!("path is not under {}", PROXY_PATH),
    };
    let session = match parsed.path().strip_prefix(PROXY_PATH) {
        Some("") | Some("/") => None,
        Some(tail) => {
            let sid = tail.strip_prefix('/').ok_or_else(not_proxy)?;
            let sid = sid.trim_end_matches('/');
            if sid.contains('/') {
                return Err(ProxyError::MalformedTarget {
                    url: proxy_url.to_string(),
                    reason: format!("unexpected path segments after session `{}`", sid),
                });
            }
            Some(sid.to_string())
        }
        None => return Err(not_proxy()),
    };

    let raw_target = parsed
        .query_pairs()
        .find(|(key, _)| key == TARGET_PARAM)
        .map(|(_, value)| value.into_owned());
    let target = parse_target(raw_target.as_deref())?;

    Ok(ProxyAddress { target, session })
}
