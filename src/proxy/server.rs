use axum::{
    extract::{DefaultBodyLimit, State},
    response::{IntoResponse, Json, Response},
    routing::{any, delete, get},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::proxy::config::ProxyConfig;
use crate::proxy::session_manager::SessionRegistry;
use crate::proxy::upstream::UpstreamClient;

/// How often idle sessions are evicted
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Axum application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub sessions: Arc<SessionRegistry>,
    pub upstream: Arc<UpstreamClient>,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> Result<Self, String> {
        let upstream = UpstreamClient::new(&config)?;
        Ok(Self {
            sessions: Arc::new(SessionRegistry::new(config.session_ttl_minutes)),
            upstream: Arc::new(upstream),
            config: Arc::new(config),
        })
    }
}

/// Routes served by the proxy.
pub fn build_router(state: AppState) -> Router {
    use crate::proxy::handlers;

    let body_limit = state.config.max_request_body_bytes;

    Router::new()
        .route("/proxy", any(handlers::proxy::handle_proxy))
        .route("/proxy/:session_id", any(handlers::proxy::handle_session_proxy))
        .route(
            "/new-session",
            get(handlers::session::new_session).post(handlers::session::new_session_with_scripts),
        )
        .route("/session/:session_id", delete(handlers::session::destroy_session))
        .route("/healthz", get(health_check_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(crate::proxy::middleware::cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Axum server instance
pub struct AxumServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    state: AppState,
    local_addr: SocketAddr,
}

impl AxumServer {
    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.state.sessions
    }

    /// Start Axum server
    pub async fn start(
        host: String,
        port: u16,
        config: ProxyConfig,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), String> {
        let state = AppState::new(config)?;
        let app = build_router(state.clone());

        // Bind address
        let addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind address {}: {}", addr, e))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| format!("Failed to read bound address {}: {}", addr, e))?;

        tracing::info!("Rewriting proxy started at http://{}", local_addr);

        // Create shutdown channel
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let server_instance = Self {
            shutdown_tx: Some(shutdown_tx),
            state: state.clone(),
            local_addr,
        };

        let sessions = state.sessions.clone();

        // Start server in a new task
        let handle = tokio::spawn(async move {
            use hyper::server::conn::http1;
            use hyper_util::rt::TokioIo;
            use hyper_util::service::TowerToHyperService;

            let mut sweep = tokio::time::interval(SESSION_SWEEP_INTERVAL);

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let service = TowerToHyperService::new(app.clone());

                                tokio::task::spawn(async move {
                                    if let Err(err) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .with_upgrades() // WebSocket tunnels
                                        .await
                                    {
                                        debug!("Connection handling ended or error: {:?}", err);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {:?}", e);
                            }
                        }
                    }
                    _ = sweep.tick() => {
                        sessions.cleanup_expired();
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("Rewriting proxy stopped listening");
                        break;
                    }
                }
            }
        });

        Ok((server_instance, handle))
    }

    /// Stop the server
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Health check handler
async fn health_check_handler(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.sessions.len(),
    }))
    .into_response()
}
