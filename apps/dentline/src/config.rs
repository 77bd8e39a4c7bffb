use std::env;
#[cfg(test)]
use std::sync::Mutex;

use webrtc::ice_transport::ice_server::RTCIceServer;

/// NAT-traversal relay addresses used when none are configured.
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:global.stun.twilio.com:3478",
];

const DEFAULT_API_URL: &str = "http://127.0.0.1:4000";

/// Client configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Dedicated relay address; when unset the API origin serves as the
    /// signaling endpoint.
    pub relay_url: Option<String>,
    /// Base URL of the REST backend (consultation submissions).
    pub api_url: String,
    /// STUN server URIs handed to every peer connection.
    pub stun_servers: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let relay_url = env::var("DENTLINE_RELAY_URL")
            .ok()
            .filter(|value| !value.is_empty());
        let api_url =
            env::var("DENTLINE_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let stun_servers = match env::var("DENTLINE_STUN_SERVERS") {
            Ok(value) => value
                .split(',')
                .map(|uri| uri.trim().to_string())
                .filter(|uri| !uri.is_empty())
                .collect(),
            Err(_) => default_stun_servers(),
        };
        Self {
            relay_url,
            api_url,
            stun_servers,
        }
    }

    /// Signaling endpoint: the dedicated relay address, or the API origin
    /// when none is configured.
    pub fn signaling_url(&self) -> &str {
        self.relay_url.as_deref().unwrap_or(&self.api_url)
    }

    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        if self.stun_servers.is_empty() {
            return Vec::new();
        }
        vec![RTCIceServer {
            urls: self.stun_servers.clone(),
            ..Default::default()
        }]
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: None,
            api_url: DEFAULT_API_URL.to_string(),
            stun_servers: default_stun_servers(),
        }
    }
}

fn default_stun_servers() -> Vec<String> {
    DEFAULT_STUN_SERVERS
        .iter()
        .map(|uri| (*uri).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;

    // Environment variable tests must not run in parallel.
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    #[test]
    fn signaling_falls_back_to_api_origin() {
        let config = Config {
            relay_url: None,
            api_url: "http://api.example.com".into(),
            stun_servers: vec![],
        };
        assert_eq!(config.signaling_url(), "http://api.example.com");

        let config = Config {
            relay_url: Some("wss://relay.example.com".into()),
            ..config
        };
        assert_eq!(config.signaling_url(), "wss://relay.example.com");
    }

    #[test]
    fn from_env_reads_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe {
            env::set_var("DENTLINE_RELAY_URL", "http://relay.local:9000");
            env::set_var("DENTLINE_STUN_SERVERS", "stun:a.example:3478, stun:b.example:3478");
        }
        let config = Config::from_env();
        assert_eq!(config.relay_url.as_deref(), Some("http://relay.local:9000"));
        assert_eq!(
            config.stun_servers,
            vec!["stun:a.example:3478", "stun:b.example:3478"]
        );
        unsafe {
            env::remove_var("DENTLINE_RELAY_URL");
            env::remove_var("DENTLINE_STUN_SERVERS");
        }
    }

    #[test]
    fn from_env_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe {
            env::remove_var("DENTLINE_RELAY_URL");
            env::remove_var("DENTLINE_API_URL");
            env::remove_var("DENTLINE_STUN_SERVERS");
        }
        let config = Config::from_env();
        assert_eq!(config.relay_url, None);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.stun_servers.len(), 2);
        assert_eq!(config.ice_servers().len(), 1);
    }
}
