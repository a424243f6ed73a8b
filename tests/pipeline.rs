// End-to-end tests: the proxy router against a real local upstream.

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use rewrite_proxy::proxy::{build_router, codec, AppState, ProxyConfig};
use tower::ServiceExt;

const ORIGIN: &str = "https://proxy.test";

const PAGE: &str = r#"<html><head><title>Home</title></head><body><img src="img.png"><a href="https://other.test/x">x</a><a href="mailto:a@b.c">m</a></body></html>"#;

async fn page() -> Response {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], PAGE).into_response()
}

async fn stylesheet() -> Response {
    (
        [(header::CONTENT_TYPE, "text/css")],
        r#"body{background:url(img/bg.png)} @import url("/a.css");"#,
    )
        .into_response()
}

async fn moved() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/login")], "moved").into_response()
}

fn video_bytes() -> Vec<u8> {
    (0..100u8).collect()
}

async fn video(headers: HeaderMap) -> Response {
    let data = video_bytes();
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.split_once('-'))
        .and_then(|(s, e)| Some((s.parse::<usize>().ok()?, e.parse::<usize>().ok()?)));
    match range {
        Some((start, end)) => (
            StatusCode::PARTIAL_CONTENT,
            [
                (header::CONTENT_TYPE, "video/mp4".to_string()),
                (header::ACCEPT_RANGES, "bytes".to_string()),
                (
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, data.len()),
                ),
            ],
            data[start..=end].to_vec(),
        )
            .into_response(),
        None => ([(header::CONTENT_TYPE, "video/mp4")], data).into_response(),
    }
}

async fn missing() -> Response {
    (StatusCode::NOT_FOUND, [(header::CONTENT_TYPE, "text/plain")], "gone").into_response()
}

async fn set_cookie() -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/plain"),
            (header::SET_COOKIE, "id=1; Domain=127.0.0.1; Path=/; SameSite=None"),
        ],
        "ok",
    )
        .into_response()
}

async fn echo_cookie(headers: HeaderMap) -> String {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn binary() -> Response {
    let data: Vec<u8> = (0..=255u8).collect();
    ([(header::CONTENT_TYPE, "application/octet-stream")], data).into_response()
}

async fn secure() -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/plain"),
            (header::CONTENT_SECURITY_POLICY, "default-src 'self'"),
            (header::X_FRAME_OPTIONS, "DENY"),
            (header::ETAG, "\"v1\""),
        ],
        "secure",
    )
        .into_response()
}

async fn echo_body(body: Bytes) -> Bytes {
    body
}

const BIG_PAGE: &str = r#"<html><head><title>Big</title></head><body><img src="img.png"><p>padding padding padding padding padding padding</p></body></html>"#;

async fn big_page() -> Response {
    ([(header::CONTENT_TYPE, "text/html")], BIG_PAGE).into_response()
}

/// Same page without a Content-Length, delivered in small chunks.
async fn chunked_page() -> Response {
    let chunks: Vec<Result<Bytes, std::io::Error>> = BIG_PAGE
        .as_bytes()
        .chunks(16)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    (
        [(header::CONTENT_TYPE, "text/html")],
        Body::from_stream(futures::stream::iter(chunks)),
    )
        .into_response()
}

/// Sends the start of a document, then never finishes.
async fn stalled_page() -> Response {
    let head = futures::stream::once(async { Ok::<_, std::io::Error>(Bytes::from_static(b"<html><head>")) });
    (
        [(header::CONTENT_TYPE, "text/html")],
        Body::from_stream(head.chain(futures::stream::pending())),
    )
        .into_response()
}

async fn latin1_page() -> Response {
    (
        [(header::CONTENT_TYPE, "text/html; charset=iso-8859-1")],
        b"<html><head></head><body><p>caf\xE9</p><img src=\"img.png\"></body></html>".to_vec(),
    )
        .into_response()
}

/// Start an upstream on an ephemeral port and return its base URL.
async fn spawn_upstream() -> String {
    let app = Router::new()
        .route("/page.html", get(page))
        .route("/style.css", get(stylesheet))
        .route("/old", get(moved))
        .route("/video.mp4", get(video))
        .route("/missing", get(missing))
        .route("/cookie", get(set_cookie))
        .route("/echo-cookie", get(echo_cookie))
        .route("/bin", get(binary))
        .route("/secure", get(secure))
        .route("/echo", post(echo_body))
        .route("/big.html", get(big_page))
        .route("/chunked.html", get(chunked_page))
        .route("/stall.html", get(stalled_page))
        .route("/latin1.html", get(latin1_page));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn test_config() -> ProxyConfig {
    ProxyConfig {
        public_host: Some("proxy.test".into()),
        public_scheme: "https".into(),
        request_timeout: 10,
        ..ProxyConfig::default()
    }
}

fn proxy_app_with(config: ProxyConfig) -> (Router, AppState) {
    let state = AppState::new(config).unwrap();
    (build_router(state.clone()), state)
}

fn proxy_app() -> (Router, AppState) {
    proxy_app_with(test_config())
}

/// Path and query of the proxy address for `target`.
fn proxied(target: &str, session: Option<&str>) -> String {
    codec::encode(target, ORIGIN, session)
        .strip_prefix(ORIGIN)
        .unwrap()
        .to_string()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "proxy.test")
        .body(Body::empty())
        .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn html_references_rewritten_and_agent_injected() {
    let upstream = spawn_upstream().await;
    let (app, _) = proxy_app();
    let target = format!("{}/page.html", upstream);

    let response = app.oneshot(get_request(&proxied(&target, None))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

    let html = body_text(response).await;
    let img = codec::encode(&format!("{}/img.png", upstream), ORIGIN, None);
    let other = codec::encode("https://other.test/x", ORIGIN, None);
    assert!(html.contains(&format!("src=\"{}\"", img)), "{}", html);
    assert!(html.contains(&format!("href=\"{}\"", other)));
    assert!(html.contains("href=\"mailto:a@b.c\""));

    let base = html.find(&format!("<base href=\"{}\">", target)).unwrap();
    let agent = html.find("<script>").unwrap();
    let title = html.find("<title>").unwrap();
    assert!(base < agent && agent < title);
}

#[tokio::test]
async fn session_pages_carry_session_scripts_and_addresses() {
    let upstream = spawn_upstream().await;
    let (app, _) = proxy_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/new-session")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"scripts":["window.injected=1;"]}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    let sid = created["sessionId"].as_str().unwrap().to_string();

    let target = format!("{}/page.html", upstream);
    let response = app
        .oneshot(get_request(&proxied(&target, Some(&sid))))
        .await
        .unwrap();
    let html = body_text(response).await;

    assert!(html.contains("<script>window.injected=1;</script>"));
    let img = codec::encode(&format!("{}/img.png", upstream), ORIGIN, Some(&sid));
    assert!(img.starts_with(&format!("{}/proxy/{}?url=", ORIGIN, sid)));
    assert!(html.contains(&format!("src=\"{}\"", img)));
}

#[tokio::test]
async fn css_urls_rewritten() {
    let upstream = spawn_upstream().await;
    let (app, _) = proxy_app();

    let response = app
        .oneshot(get_request(&proxied(&format!("{}/style.css", upstream), None)))
        .await
        .unwrap();
    let css = body_text(response).await;

    let bg = codec::encode(&format!("{}/img/bg.png", upstream), ORIGIN, None);
    let import = codec::encode(&format!("{}/a.css", upstream), ORIGIN, None);
    assert!(css.contains(&format!("url({})", bg)), "{}", css);
    assert!(css.contains(&format!("url(\"{}\")", import)));
}

#[tokio::test]
async fn redirect_location_points_back_at_proxy() {
    let upstream = spawn_upstream().await;
    let (app, _) = proxy_app();

    let response = app
        .oneshot(get_request(&proxied(&format!("{}/old", upstream), None)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers()[header::LOCATION],
        codec::encode(&format!("{}/login", upstream), ORIGIN, None).as_str()
    );
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn range_requests_pass_through() {
    let upstream = spawn_upstream().await;
    let (app, _) = proxy_app();

    let request = Request::builder()
        .uri(proxied(&format!("{}/video.mp4", upstream), None))
        .header(header::RANGE, "bytes=10-19")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 10-19/100");
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    assert_eq!(body_bytes(response).await, video_bytes()[10..=19].to_vec());
}

#[tokio::test]
async fn upstream_errors_are_relayed() {
    let upstream = spawn_upstream().await;
    let (app, _) = proxy_app();

    let response = app
        .oneshot(get_request(&proxied(&format!("{}/missing", upstream), None)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(response).await, "gone");
}

#[tokio::test]
async fn binary_bodies_are_byte_identical() {
    let upstream = spawn_upstream().await;
    let (app, _) = proxy_app();

    let response = app
        .oneshot(get_request(&proxied(&format!("{}/bin", upstream), None)))
        .await
        .unwrap();
    assert_eq!(body_bytes(response).await, (0..=255u8).collect::<Vec<_>>());
}

#[tokio::test]
async fn security_headers_stripped() {
    let upstream = spawn_upstream().await;
    let (app, _) = proxy_app();

    let response = app
        .oneshot(get_request(&proxied(&format!("{}/secure", upstream), None)))
        .await
        .unwrap();
    let headers = response.headers();
    assert!(headers.get(header::CONTENT_SECURITY_POLICY).is_none());
    assert!(headers.get(header::X_FRAME_OPTIONS).is_none());
    assert_eq!(headers[header::ETAG], "\"v1\"");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn request_bodies_are_forwarded() {
    let upstream = spawn_upstream().await;
    let (app, _) = proxy_app();

    let request = Request::builder()
        .method("POST")
        .uri(proxied(&format!("{}/echo", upstream), None))
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("a=1&b=2"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "a=1&b=2");
}

#[tokio::test]
async fn cookies_scoped_to_session() {
    let upstream = spawn_upstream().await;
    let (app, state) = proxy_app();
    let sid = state.sessions.create_session(Vec::new());

    let response = app
        .clone()
        .oneshot(get_request(&proxied(&format!("{}/cookie", upstream), Some(&sid))))
        .await
        .unwrap();
    assert_eq!(
        response.headers()[header::SET_COOKIE],
        format!("id=1; Path=/proxy/{}; SameSite=Lax", sid).as_str()
    );

    let request = Request::builder()
        .uri(proxied(&format!("{}/echo-cookie", upstream), Some(&sid)))
        .header(header::COOKIE, "id=1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(body_text(response).await, "id=1");
}

#[tokio::test]
async fn stateless_mode_carries_no_cookies() {
    let upstream = spawn_upstream().await;
    let (app, _) = proxy_app();

    let response = app
        .clone()
        .oneshot(get_request(&proxied(&format!("{}/cookie", upstream), None)))
        .await
        .unwrap();
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    let request = Request::builder()
        .uri(proxied(&format!("{}/echo-cookie", upstream), None))
        .header(header::COOKIE, "id=1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(body_text(response).await, "");
}

#[tokio::test]
async fn missing_or_malformed_target_is_400() {
    let (app, _) = proxy_app();

    let response = app.clone().oneshot(get_request("/proxy")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "URL is required");

    let response = app
        .oneshot(get_request("/proxy?url=not%20a%20url"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_and_destroyed_sessions_are_404() {
    let upstream = spawn_upstream().await;
    let (app, state) = proxy_app();
    let target = format!("{}/page.html", upstream);

    let response = app
        .clone()
        .oneshot(get_request(&proxied(&target, Some("nope"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let sid = state.sessions.create_session(Vec::new());
    let other = state.sessions.create_session(Vec::new());
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/session/{}", sid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(get_request(&proxied(&target, Some(&sid))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(get_request(&proxied(&target, Some(&other))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unreachable_upstream_is_502() {
    // Bind then drop to get a port with nothing listening
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (app, _) = proxy_app();
    let response = app
        .oneshot(get_request(&proxied(&format!("http://{}/", addr), None)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn session_endpoints_and_health() {
    let (app, _) = proxy_app();

    let response = app.clone().oneshot(get_request("/new-session")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(!created["sessionId"].as_str().unwrap().is_empty());

    let response = app.oneshot(get_request("/healthz")).await.unwrap();
    let health: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["sessions"], 1);
}

#[tokio::test]
async fn oversized_documents_stream_unrewritten() {
    let upstream = spawn_upstream().await;
    let (app, _) = proxy_app_with(ProxyConfig {
        max_rewrite_bytes: 64,
        ..test_config()
    });

    // Known length, and length discovered while buffering
    for path in ["/big.html", "/chunked.html"] {
        let response = app
            .clone()
            .oneshot(get_request(&proxied(&format!("{}{}", upstream, path), None)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, BIG_PAGE, "{}", path);
    }
}

#[tokio::test]
async fn documents_under_the_limit_are_rewritten_when_chunked() {
    let upstream = spawn_upstream().await;
    let (app, _) = proxy_app();

    let response = app
        .oneshot(get_request(&proxied(&format!("{}/chunked.html", upstream), None)))
        .await
        .unwrap();
    let html = body_text(response).await;
    let img = codec::encode(&format!("{}/img.png", upstream), ORIGIN, None);
    assert!(html.contains(&format!("src=\"{}\"", img)));
}

#[tokio::test]
async fn stalled_document_body_times_out() {
    let upstream = spawn_upstream().await;
    let (app, _) = proxy_app_with(ProxyConfig {
        request_timeout: 1,
        ..test_config()
    });

    let response = app
        .oneshot(get_request(&proxied(&format!("{}/stall.html", upstream), None)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn latin1_documents_keep_their_bytes() {
    let upstream = spawn_upstream().await;
    let (app, _) = proxy_app();

    let response = app
        .oneshot(get_request(&proxied(&format!("{}/latin1.html", upstream), None)))
        .await
        .unwrap();
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/html; charset=iso-8859-1"
    );
    let body = body_bytes(response).await;
    assert!(body.windows(11).any(|w| w == b"<p>caf\xE9</p>"));

    let img = codec::encode(&format!("{}/img.png", upstream), ORIGIN, None);
    let src = format!("src=\"{}\"", img);
    assert!(body.windows(src.len()).any(|w| w == src.as_bytes()));
}
