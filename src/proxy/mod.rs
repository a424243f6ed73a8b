// proxy module - rewriting reverse proxy

pub mod codec;             // Proxy address encoding/decoding
pub mod config;
pub mod error;
pub mod handlers;          // Endpoint handlers
pub mod middleware;        // Axum layers
pub mod rewriter;          // HTML/CSS rewriting and the client agent
pub mod sanitizer;         // Response header and cookie policy
pub mod server;
pub mod session_manager;   // Per-tab sessions
pub mod upstream;          // Upstream client

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use server::{build_router, AppState, AxumServer};
pub use session_manager::SessionRegistry;
