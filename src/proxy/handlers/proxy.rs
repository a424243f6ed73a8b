// Fetch pipeline handlers
//
// Received -> TargetResolved -> UpstreamDispatched -> {Success, Redirect,
// UpstreamError} -> RewriteApplied -> Sent

use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, Path, Query, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::Response,
};
use bytes::{Bytes, BytesMut};
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use tokio::time::Duration;
use url::Url;

use crate::proxy::codec;
use crate::proxy::error::{ProxyError, Result};
use crate::proxy::handlers::websocket;
use crate::proxy::rewriter::{self, ContentKind, RewriteContext};
use crate::proxy::sanitizer::{self, CookieMode};
use crate::proxy::server::AppState;
use crate::proxy::session_manager::Session;
use crate::proxy::upstream::UpstreamClient;

#[derive(Debug, Deserialize)]
pub struct TargetQuery {
    pub url: Option<String>,
}

/// `ANY /proxy?url=...` (no cookies, no session scripts)
pub async fn handle_proxy(
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
    ws: Option<WebSocketUpgrade>,
    request: Request,
) -> Result<Response> {
    if ws.is_some() {
        return Err(ProxyError::WebSocketRequiresSession);
    }
    let target = codec::parse_target(query.url.as_deref())?;
    forward(&state, target, None, request).await
}

/// `ANY /proxy/{session}?url=...`, including WebSocket upgrades
pub async fn handle_session_proxy(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<TargetQuery>,
    ws: Option<WebSocketUpgrade>,
    request: Request,
) -> Result<Response> {
    let session = state
        .sessions
        .get(&session_id)
        .ok_or(ProxyError::UnknownSession(session_id))?;
    let target = codec::parse_target(query.url.as_deref())?;

    if let Some(ws) = ws {
        return websocket::tunnel(ws, target, &session, request.headers());
    }
    forward(&state, target, Some(session.as_ref()), request).await
}

/// Proxy one request to `target` and rewrite the response.
async fn forward(
    state: &AppState,
    target: Url,
    session: Option<&Session>,
    request: Request,
) -> Result<Response> {
    if !matches!(target.scheme(), "http" | "https") {
        return Err(ProxyError::MalformedTarget {
            url: target.to_string(),
            reason: format!("unsupported scheme `{}`", target.scheme()),
        });
    }

    let proxy_origin = proxy_origin(state, &request);
    let cookie_mode = match session {
        Some(s) => CookieMode::Session {
            scope: s.cookie_scope(),
        },
        None => CookieMode::Stateless,
    };

    let (parts, body) = request.into_parts();
    let limit = state.config.max_request_body_bytes;
    let body = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| ProxyError::RequestBodyTooLarge { limit })?;

    tracing::info!(
        "Proxying {} {}{}",
        parts.method,
        target,
        session.map(|s| format!(" (session {})", s.id())).unwrap_or_default()
    );

    let upstream_headers =
        UpstreamClient::build_headers(&parts.headers, &target, cookie_mode.forwards_cookies());
    let upstream = state
        .upstream
        .send(parts.method.clone(), &target, upstream_headers, body)
        .await?;

    let status = upstream.status();
    let mut ctx = RewriteContext::new(&target, &proxy_origin);
    if let Some(s) = session {
        ctx = ctx.with_session(s.id(), s.scripts());
    }

    let mut headers =
        sanitizer::sanitize_response_headers(upstream.headers(), state.config.header_policy, &cookie_mode);

    if status.is_redirection() && headers.contains_key(header::LOCATION) {
        sanitizer::rewrite_location(&mut headers, status, &ctx);
        headers.remove(header::CONTENT_LENGTH);
        return Ok(build_response(status, headers, Body::empty()));
    }

    let kind = rewrite_kind(&parts.method, status, upstream.headers());
    if kind == ContentKind::Passthrough {
        return Ok(build_response(
            status,
            headers,
            Body::from_stream(upstream.bytes_stream()),
        ));
    }

    let max = state.config.max_rewrite_bytes;
    if upstream
        .content_length()
        .map(|len| len as usize > max)
        .unwrap_or(false)
    {
        tracing::debug!("{} exceeds {} bytes, streaming without rewrite", target, max);
        return Ok(build_response(
            status,
            headers,
            Body::from_stream(upstream.bytes_stream()),
        ));
    }

    let charset = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(rewriter::charset);

    let body_timeout = Duration::from_secs(state.config.request_timeout);
    let buffered = tokio::time::timeout(body_timeout, buffer_body(upstream.bytes_stream(), max, &target))
        .await
        .map_err(|_| {
            tracing::warn!("Upstream body for {} stalled past {:?}", target, body_timeout);
            ProxyError::UpstreamTimeout {
                host: target.host_str().unwrap_or_default().to_string(),
            }
        })??;

    let buffered = match buffered {
        Buffered::Complete(buffered) => buffered,
        Buffered::Overflow(head, rest) => {
            tracing::debug!("{} grew past {} bytes, streaming without rewrite", target, max);
            let head = stream::once(async move { Ok::<Bytes, reqwest::Error>(head.freeze()) });
            return Ok(build_response(status, headers, Body::from_stream(head.chain(rest))));
        }
    };

    let rewritten = rewriter::rewrite(kind, &buffered, charset, &ctx);
    headers.remove(header::CONTENT_LENGTH);
    tracing::debug!(
        "Rewrote {:?} {} ({} -> {} bytes)",
        kind,
        target,
        buffered.len(),
        rewritten.len()
    );
    Ok(build_response(status, headers, Body::from(rewritten)))
}

/// Outcome of reading a rewritable body into memory.
enum Buffered<S> {
    Complete(BytesMut),
    /// Bytes read so far and the unread remainder
    Overflow(BytesMut, S),
}

async fn buffer_body<S>(mut body: S, max: usize, target: &Url) -> Result<Buffered<S>>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    let mut buffered = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| ProxyError::from_upstream(target, e))?;
        buffered.extend_from_slice(&chunk);
        if buffered.len() > max {
            return Ok(Buffered::Overflow(buffered, body));
        }
    }
    Ok(Buffered::Complete(buffered))
}

/// Strategy for a response; anything that is not a complete, decoded
/// HTML/CSS document passes through.
fn rewrite_kind(method: &Method, status: StatusCode, upstream: &HeaderMap) -> ContentKind {
    if method == Method::HEAD
        || status == StatusCode::PARTIAL_CONTENT
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
        || upstream.contains_key(header::CONTENT_ENCODING)
    {
        return ContentKind::Passthrough;
    }
    let content_type = upstream
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    ContentKind::from_content_type(content_type)
}

fn proxy_origin(state: &AppState, request: &Request) -> String {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()));
    state.config.public_origin(host).unwrap_or_else(|| {
        format!(
            "{}://{}:{}",
            state.config.public_scheme,
            state.config.get_bind_address(),
            state.config.port
        )
    })
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
