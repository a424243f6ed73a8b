// Content rewriters - pure payload transformations, no I/O

pub mod agent;
pub mod css;
pub mod html;

use encoding_rs::Encoding;
use url::Url;

use crate::proxy::codec;

/// Immutable per-request rewrite inputs.
#[derive(Debug, Clone, Copy)]
pub struct RewriteContext<'a> {
    /// Target URL, used as the base for every relative reference
    pub target: &'a Url,
    /// `{scheme}://{host}` of this proxy as seen by the client
    pub proxy_origin: &'a str,
    pub session: Option<&'a str>,
    /// Extra scripts injected after the agent (session mode only)
    pub scripts: &'a [String],
}

impl<'a> RewriteContext<'a> {
    pub fn new(target: &'a Url, proxy_origin: &'a str) -> Self {
        Self {
            target,
            proxy_origin,
            session: None,
            scripts: &[],
        }
    }

    pub fn with_session(mut self, session: &'a str, scripts: &'a [String]) -> Self {
        self.session = Some(session);
        self.scripts = scripts;
        self
    }

    /// Resolve-then-encode `reference`, or `None` to leave it as found.
    pub fn rewrite_url(&self, reference: &str) -> Option<String> {
        codec::rewrite_reference(reference, self.target, self.proxy_origin, self.session)
    }

    /// Proxy address of an absolute URL in this context.
    pub fn encode(&self, absolute: &str) -> String {
        codec::encode(absolute, self.proxy_origin, self.session)
    }
}

/// Rewriting strategy selected from the upstream `Content-Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Css,
    Passthrough,
}

impl ContentKind {
    pub fn from_content_type(content_type: &str) -> Self {
        let lower = content_type.to_ascii_lowercase();
        if lower.contains("text/html") {
            Self::Html
        } else if lower.contains("text/css") {
            Self::Css
        } else {
            Self::Passthrough
        }
    }
}

/// Encoding named by the `charset` parameter of a `Content-Type` value.
///
/// Unknown labels are treated as absent.
pub fn charset(content_type: &str) -> Option<&'static Encoding> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let label = value.trim().trim_matches(|c: char| c == '"' || c == '\'');
        Encoding::for_label(label.as_bytes())
    })
}

/// Apply the rewriter for `kind` to a buffered payload encoded in `charset`.
pub fn rewrite(
    kind: ContentKind,
    body: &[u8],
    charset: Option<&'static Encoding>,
    ctx: &RewriteContext<'_>,
) -> Vec<u8> {
    match kind {
        ContentKind::Html => html::rewrite_html(body, charset, ctx),
        ContentKind::Css => css::rewrite_css(body, charset, ctx),
        ContentKind::Passthrough => body.to_vec(),
    }
}
