// CSS rewriter - url() tokens only

use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::bytes::{Captures, Regex};

use super::RewriteContext;

static CSS_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i-u)url\(\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<bare>[^)"'\s]*))\s*\)"#)
        .expect("valid CSS url regex")
});

/// Rewrite every `url(...)` token in a stylesheet, keeping its quote style.
///
/// Matching runs on raw bytes so everything outside the tokens is copied
/// as received. URL tokens are decoded with `charset` (UTF-8 when absent);
/// tokens that do not decode cleanly are left as found. Stylesheets in a
/// non-ASCII-compatible encoding are returned unchanged.
pub fn rewrite_css(input: &[u8], charset: Option<&'static Encoding>, ctx: &RewriteContext<'_>) -> Vec<u8> {
    let encoding = charset.unwrap_or(encoding_rs::UTF_8);
    if !encoding.is_ascii_compatible() {
        tracing::debug!("{} is {}, leaving CSS unrewritten", ctx.target, encoding.name());
        return input.to_vec();
    }

    CSS_URL_RE
        .replace_all(input, |caps: &Captures| {
            let (quote, raw) = if let Some(m) = caps.name("dq") {
                ("\"", m.as_bytes())
            } else if let Some(m) = caps.name("sq") {
                ("'", m.as_bytes())
            } else {
                ("", caps.name("bare").map(|m| m.as_bytes()).unwrap_or_default())
            };
            let rewritten = encoding
                .decode_without_bom_handling_and_without_replacement(raw)
                .and_then(|reference| ctx.rewrite_url(&reference));
            match rewritten {
                Some(rewritten) => format!("url({quote}{rewritten}{quote})").into_bytes(),
                None => caps[0].to_vec(),
            }
        })
        .into_owned()
}
