use std::env;

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        let port = env::var("DENTLINE_DESK_PORT")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(4000);
        Self { port }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self { port: 4000 }
    }
}
