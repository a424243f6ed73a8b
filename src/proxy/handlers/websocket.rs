// WebSocket tunnel for session-scoped addresses

use std::borrow::Cow;

use axum::{
    extract::ws::{self, WebSocket, WebSocketUpgrade},
    http::{header, HeaderMap, HeaderValue},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{
    self, client::IntoClientRequest, protocol::frame::coding::CloseCode,
};
use url::Url;

use crate::proxy::error::{ProxyError, Result};
use crate::proxy::session_manager::Session;

/// Accept the client upgrade and bridge it to the upstream endpoint.
///
/// Only called for sessions that exist; unknown sessions are rejected
/// before any handshake takes place.
pub fn tunnel(
    ws: WebSocketUpgrade,
    target: Url,
    session: &Session,
    inbound: &HeaderMap,
) -> Result<Response> {
    let upstream_url = to_ws_url(target)?;

    let protocols: Vec<String> = inbound
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    let cookie = inbound.get(header::COOKIE).cloned();
    let session_id = session.id().to_string();

    tracing::info!("WebSocket tunnel {} (session {})", upstream_url, session_id);

    Ok(ws
        .protocols(protocols.clone())
        .on_upgrade(move |socket| async move {
            if let Err(e) = bridge(socket, &upstream_url, cookie, &protocols).await {
                tracing::warn!("WebSocket tunnel to {} failed: {}", upstream_url, e);
            }
            tracing::debug!("WebSocket tunnel closed (session {})", session_id);
        }))
}

/// Map an http(s) target to ws(s); ws(s) targets are kept.
fn to_ws_url(mut target: Url) -> Result<Url> {
    let scheme = match target.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(ProxyError::WebSocketTarget(other.to_string())),
    };
    if target.scheme() != scheme && target.set_scheme(scheme).is_err() {
        return Err(ProxyError::WebSocketTarget(target.to_string()));
    }
    Ok(target)
}

async fn bridge(
    socket: WebSocket,
    upstream_url: &Url,
    cookie: Option<HeaderValue>,
    protocols: &[String],
) -> std::result::Result<(), tungstenite::Error> {
    let mut request = upstream_url.as_str().into_client_request()?;
    let headers = request.headers_mut();
    if let Some(cookie) = cookie {
        headers.insert(header::COOKIE, cookie);
    }
    if let Ok(origin) = HeaderValue::from_str(&upstream_origin(upstream_url)) {
        headers.insert(header::ORIGIN, origin);
    }
    if !protocols.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&protocols.join(", ")) {
            headers.insert(header::SEC_WEBSOCKET_PROTOCOL, value);
        }
    }

    let (upstream, _) = tokio_tungstenite::connect_async(request).await?;
    let (mut client_tx, mut client_rx) = socket.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let to_upstream = async {
        while let Some(Ok(msg)) = client_rx.next().await {
            if upstream_tx.send(to_upstream_message(msg)).await.is_err() {
                break;
            }
        }
    };

    let to_client = async {
        while let Some(Ok(msg)) = upstream_rx.next().await {
            let Some(msg) = to_client_message(msg) else {
                continue;
            };
            if client_tx.send(msg).await.is_err() {
                break;
            }
        }
    };

    tokio::select! {
        _ = to_upstream => {},
        _ = to_client => {},
    }
    Ok(())
}

/// `https://host` form of a ws(s) URL, sent as the upstream `Origin`.
fn upstream_origin(url: &Url) -> String {
    let mut http = url.clone();
    let scheme = if url.scheme() == "wss" { "https" } else { "http" };
    let _ = http.set_scheme(scheme);
    http.origin().ascii_serialization()
}

fn to_upstream_message(msg: ws::Message) -> tungstenite::Message {
    match msg {
        ws::Message::Text(text) => tungstenite::Message::Text(text),
        ws::Message::Binary(data) => tungstenite::Message::Binary(data),
        ws::Message::Ping(data) => tungstenite::Message::Ping(data),
        ws::Message::Pong(data) => tungstenite::Message::Pong(data),
        ws::Message::Close(frame) => {
            tungstenite::Message::Close(frame.map(|f| tungstenite::protocol::CloseFrame {
                code: CloseCode::from(f.code),
                reason: f.reason,
            }))
        }
    }
}

fn to_client_message(msg: tungstenite::Message) -> Option<ws::Message> {
    Some(match msg {
        tungstenite::Message::Text(text) => ws::Message::Text(text),
        tungstenite::Message::Binary(data) => ws::Message::Binary(data),
        tungstenite::Message::Ping(data) => ws::Message::Ping(data),
        tungstenite::Message::Pong(data) => ws::Message::Pong(data),
        tungstenite::Message::Close(frame) => ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: f.code.into(),
            reason: Cow::Owned(f.reason.into_owned()),
        })),
        tungstenite::Message::Frame(_) => return None,
    })
}
