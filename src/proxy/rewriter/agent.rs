//! Client agent injected into every proxied HTML document.
//!
//! The agent is a fixed, versioned template (`agent.js`) with one
//! substitution parameter, the proxy origin. It installs four hook points:
//!
//! - `window.fetch`
//! - `XMLHttpRequest.prototype.open`
//! - `Element.prototype.setAttribute` for `src`, `href`, `action`, `data`
//! - `window.WebSocket` (session-scoped pages only)
//!
//! Each hook applies the rewrite rule of [`crate::proxy::codec::rewrite_reference`].
//! The agent also posts `{type, url, title, favicon}` messages to the
//! embedding frame on load and whenever the title or favicon changes.

/// Bumped whenever the hook contract in `agent.js` changes.
pub const AGENT_VERSION: u32 = 1;

const TEMPLATE: &str = include_str!("agent.js");
const ORIGIN_PLACEHOLDER: &str = "__PROXY_ORIGIN__";

/// Render the agent for `proxy_origin` (e.g. `https://proxy.example`).
pub fn render(proxy_origin: &str) -> String {
    TEMPLATE.replacen(ORIGIN_PLACEHOLDER, &escape_js_string(proxy_origin), 1)
}

/// `<script>` element wrapping the rendered agent.
pub fn script_tag(proxy_origin: &str) -> String {
    format!("<script>{}</script>", render(proxy_origin))
}

fn escape_js_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '<' => out.push_str("\\x3c"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}
