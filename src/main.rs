use rewrite_proxy::modules;
use rewrite_proxy::proxy;

#[tokio::main]
async fn main() -> Result<(), String> {
    let _log_guard = modules::logger::init_logger();

    let mut proxy_config = match modules::config::load_web_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::warn!("failed to load web config: {}. using defaults", err);
            let cfg = proxy::ProxyConfig::default();
            let _ = modules::config::save_web_config(&cfg);
            cfg
        }
    };

    modules::config::apply_env_overrides(&mut proxy_config, |key| std::env::var(key).ok())?;

    let bind_address = if let Ok(addr) = std::env::var("REWRITE_PROXY_BIND") {
        if addr != "127.0.0.1" && addr != "localhost" {
            proxy_config.allow_lan_access = true;
        }
        addr
    } else {
        proxy_config.get_bind_address().to_string()
    };

    if proxy_config.upstream_proxy.enabled {
        tracing::info!("upstream requests go through {}", proxy_config.upstream_proxy.url);
    }
    match proxy_config.public_host.as_deref() {
        Some(host) => tracing::info!("proxy addresses use {}://{}", proxy_config.public_scheme, host),
        None => tracing::info!("proxy addresses follow the inbound Host header"),
    }

    let port = proxy_config.port;
    let (server, handle) = proxy::AxumServer::start(bind_address, port, proxy_config)
        .await
        .map_err(|e| format!("failed to start proxy server: {}", e))?;

    tracing::info!("rewrite-proxy listening on http://{}", server.local_addr());

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for shutdown signal: {}", e))?;

    tracing::info!(
        "shutdown requested, stopping server ({} live session(s))...",
        server.sessions().len()
    );
    server.stop();
    let _ = handle.await;

    Ok(())
}
