// HTML rewriter
//
// Built on lol_html so that untouched markup, whitespace and comments are
// emitted byte-for-byte; only the injected head elements and rewritten
// attributes differ from the upstream document.

use std::cell::Cell;

use encoding_rs::Encoding;
use lol_html::html_content::{ContentType, Element};
use lol_html::{element, AsciiCompatibleEncoding, HtmlRewriter, Settings};

use super::{agent, RewriteContext};

/// Attributes holding a single URL.
pub const URL_ATTRIBUTES: [&str; 4] = ["href", "src", "action", "data"];

/// Rewrite an HTML document for `ctx`.
///
/// `charset` comes from the upstream `Content-Type`; without one the
/// document is read as UTF-8 and a `<meta charset>` may switch it. Bytes
/// outside the rewritten attributes are copied as received, whatever the
/// encoding. Documents in encodings the rewriter cannot handle (UTF-16,
/// ISO-2022-JP) and documents it fails to process are returned unchanged.
pub fn rewrite_html(input: &[u8], charset: Option<&'static Encoding>, ctx: &RewriteContext<'_>) -> Vec<u8> {
    let encoding = match charset {
        Some(enc) => match AsciiCompatibleEncoding::new(enc) {
            Some(encoding) => encoding,
            None => {
                tracing::debug!("{} is {}, leaving HTML unrewritten", ctx.target, enc.name());
                return input.to_vec();
            }
        },
        None => AsciiCompatibleEncoding::utf_8(),
    };

    let injection = injection(ctx);
    let injected = Cell::new(false);
    let mut output = Vec::with_capacity(input.len() + injection.len());

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("head", |el| {
                    if !injected.replace(true) {
                        el.prepend(&injection, ContentType::Html);
                    }
                    Ok(())
                }),
                element!("body", |el| {
                    if !injected.replace(true) {
                        el.before(&injection, ContentType::Html);
                    }
                    Ok(())
                }),
                element!("[href]", |el| {
                    rewrite_url_attribute(el, "href", ctx);
                    Ok(())
                }),
                element!("[src]", |el| {
                    rewrite_url_attribute(el, "src", ctx);
                    Ok(())
                }),
                element!("[action]", |el| {
                    rewrite_url_attribute(el, "action", ctx);
                    Ok(())
                }),
                element!("[data]", |el| {
                    rewrite_url_attribute(el, "data", ctx);
                    Ok(())
                }),
                element!("[srcset]", |el| {
                    if let Some(value) = el.get_attribute("srcset") {
                        let rewritten = rewrite_srcset(&decode_amp(&value), ctx);
                        if rewritten != value {
                            set_attribute(el, "srcset", &rewritten);
                        }
                    }
                    Ok(())
                }),
            ],
            encoding,
            adjust_charset_on_meta_tag: charset.is_none(),
            ..Settings::new()
        },
        |chunk: &[u8]| output.extend_from_slice(chunk),
    );

    let result = rewriter.write(input).and_then(|_| rewriter.end());
    if let Err(e) = result {
        tracing::warn!("HTML rewrite failed for {}: {}", ctx.target, e);
        return input.to_vec();
    }

    if injected.get() {
        return output;
    }
    let enc: &'static Encoding = charset.unwrap_or(encoding_rs::UTF_8);
    let (prefix, _, _) = enc.encode(&injection);
    let mut document = prefix.into_owned();
    document.extend_from_slice(&output);
    document
}

/// `<base>`, the client agent and any session scripts, in that order.
pub(crate) fn injection(ctx: &RewriteContext<'_>) -> String {
    let mut out = format!(
        "<base href=\"{}\">{}",
        escape_attribute(ctx.target.as_str()),
        agent::script_tag(ctx.proxy_origin)
    );
    for script in ctx.scripts {
        out.push_str("<script>");
        out.push_str(script);
        out.push_str("</script>");
    }
    out
}

/// Rewrite the URL token of each `srcset` candidate, keeping descriptors
/// and candidate order.
pub fn rewrite_srcset(srcset: &str, ctx: &RewriteContext<'_>) -> String {
    srcset_candidates(srcset)
        .into_iter()
        .map(|(url, descriptors)| {
            let url = ctx.rewrite_url(url).unwrap_or_else(|| url.to_string());
            let descriptors = descriptors.split_whitespace().collect::<Vec<_>>().join(" ");
            if descriptors.is_empty() {
                url
            } else {
                format!("{} {}", url, descriptors)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Split a `srcset` into `(url, descriptors)` pairs.
///
/// The URL token runs to the next whitespace, so commas inside it (as in
/// `data:` URLs) do not end the candidate; descriptors run to the next
/// comma outside parentheses.
fn srcset_candidates(srcset: &str) -> Vec<(&str, &str)> {
    let is_space = |c: char| c.is_ascii_whitespace();
    let mut candidates = Vec::new();
    let mut rest = srcset;

    loop {
        rest = rest.trim_start_matches(|c: char| is_space(c) || c == ',');
        if rest.is_empty() {
            break;
        }

        let url_end = rest.find(is_space).unwrap_or(rest.len());
        let (url, after) = rest.split_at(url_end);
        let bare = url.trim_end_matches(',');
        if bare.len() != url.len() {
            // `a.png, b.png`: a comma ending the URL token closes the candidate
            candidates.push((bare, ""));
            rest = after;
            continue;
        }

        let mut depth = 0usize;
        let mut end = after.len();
        for (i, c) in after.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    end = i;
                    break;
                }
                _ => {}
            }
        }
        candidates.push((url, after[..end].trim()));
        rest = &after[end..];
    }
    candidates
}

fn rewrite_url_attribute(el: &mut Element<'_, '_>, name: &str, ctx: &RewriteContext<'_>) {
    let Some(value) = el.get_attribute(name) else {
        return;
    };
    if let Some(rewritten) = ctx.rewrite_url(&decode_amp(&value)) {
        set_attribute(el, name, &rewritten);
    }
}

fn set_attribute(el: &mut Element<'_, '_>, name: &str, value: &str) {
    if let Err(e) = el.set_attribute(name, value) {
        tracing::debug!("could not set {} on <{}>: {}", name, el.tag_name(), e);
    }
}

fn decode_amp(value: &str) -> String {
    value.replace("&amp;", "&")
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}
