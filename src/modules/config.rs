use std::fs;
use std::path::Path;

use crate::proxy::sanitizer::HeaderPolicy;
use crate::proxy::ProxyConfig;
use super::paths::get_data_dir;

const CONFIG_FILE: &str = "web_config.json";

/// Load web service configuration
pub fn load_web_config() -> Result<ProxyConfig, String> {
    load_web_config_from(&get_data_dir()?)
}

/// Save web service configuration
pub fn save_web_config(config: &ProxyConfig) -> Result<(), String> {
    save_web_config_to(&get_data_dir()?, config)
}

/// Load `web_config.json` from `data_dir`, writing the defaults on first run.
pub fn load_web_config_from(data_dir: &Path) -> Result<ProxyConfig, String> {
    let config_path = data_dir.join(CONFIG_FILE);

    if !config_path.exists() {
        let config = ProxyConfig::default();
        let _ = save_web_config_to(data_dir, &config);
        return Ok(config);
    }

    let content = fs::read_to_string(&config_path)
        .map_err(|e| format!("Failed to read config file: {}", e))?;

    serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse config file: {}", e))
}

pub fn save_web_config_to(data_dir: &Path, config: &ProxyConfig) -> Result<(), String> {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    fs::write(&config_path, content)
        .map_err(|e| format!("Failed to save config: {}", e))
}

fn env_flag(value: &str) -> bool {
    matches!(value, "1" | "true" | "yes" | "on")
}

/// Apply `REWRITE_PROXY_*` overrides on top of the file configuration.
///
/// `lookup` is `std::env::var` in production.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: F) -> Result<(), String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("REWRITE_PROXY_ALLOW_LAN") {
        if env_flag(&value) {
            config.allow_lan_access = true;
        }
    }

    if let Some(value) = lookup("REWRITE_PROXY_PORT") {
        config.port = value
            .trim()
            .parse()
            .map_err(|e| format!("Invalid REWRITE_PROXY_PORT `{}`: {}", value, e))?;
    }

    if let Some(host) = lookup("REWRITE_PROXY_PUBLIC_HOST") {
        let host = host.trim();
        config.public_host = (!host.is_empty()).then(|| host.to_string());
    }

    if let Some(scheme) = lookup("REWRITE_PROXY_PUBLIC_SCHEME") {
        match scheme.trim() {
            "http" | "https" => config.public_scheme = scheme.trim().to_string(),
            other => return Err(format!("Invalid REWRITE_PROXY_PUBLIC_SCHEME `{}`", other)),
        }
    }

    if let Some(policy) = lookup("REWRITE_PROXY_HEADER_POLICY") {
        config.header_policy = match policy.trim() {
            "deny_list" | "deny" => HeaderPolicy::DenyList,
            "allow_list" | "allow" => HeaderPolicy::AllowList,
            other => return Err(format!("Invalid REWRITE_PROXY_HEADER_POLICY `{}`", other)),
        };
    }

    if let Some(url) = lookup("REWRITE_PROXY_UPSTREAM_PROXY") {
        config.upstream_proxy.enabled = !url.trim().is_empty();
        config.upstream_proxy.url = url.trim().to_string();
    }

    Ok(())
}
