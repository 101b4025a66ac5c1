//! Engine configuration, fixed at startup.

use crate::error::{EngineError, EngineResult};
use std::time::Duration;
use url::Url;

/// Builds that are still running change roughly every couple of seconds on the server.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SERVER: &str = "http://localhost:8080";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub base_url: Url,
    /// Live log endpoint, `ws://<host>/ws` unless overridden.
    pub ws_url: Url,
    /// Delay before re-fetching a build that is not terminal yet.
    pub poll_interval: Duration,
    /// A log connection that is not open within this window counts as failed.
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl EngineConfig {
    pub fn new(base_url: Url) -> EngineResult<Self> {
        let ws_url = derive_ws_url(&base_url)?;
        Ok(Self {
            base_url,
            ws_url,
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn from_server(server: &str) -> EngineResult<Self> {
        let base_url = Url::parse(server)
            .map_err(|e| EngineError::Network(format!("invalid server URL '{server}': {e}")))?;
        Self::new(base_url)
    }

    pub fn with_ws_url(mut self, ws_url: Url) -> Self {
        self.ws_url = ws_url;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// `http://host:port/anything` -> `ws://host:port/ws`, `https` -> `wss`.
pub fn derive_ws_url(base_url: &Url) -> EngineResult<Url> {
    let scheme = match base_url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(EngineError::Network(format!(
                "unsupported URL scheme '{other}'"
            )))
        }
    };
    let host = base_url
        .host_str()
        .ok_or_else(|| EngineError::Network(format!("URL has no host: {base_url}")))?;
    let authority = match base_url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Url::parse(&format!("{scheme}://{authority}/ws"))
        .map_err(|e| EngineError::Network(format!("cannot build websocket URL: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_follows_host_and_port() {
        let config = EngineConfig::from_server("http://localhost:8080/ui/").unwrap();
        assert_eq!(config.ws_url.as_str(), "ws://localhost:8080/ws");
    }

    #[test]
    fn tls_maps_to_wss() {
        let url = Url::parse("https://ci.example.com").unwrap();
        assert_eq!(derive_ws_url(&url).unwrap().as_str(), "wss://ci.example.com/ws");
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        assert!(EngineConfig::from_server("ftp://ci.example.com").is_err());
        assert!(EngineConfig::from_server("not a url").is_err());
    }

    #[test]
    fn defaults_and_overrides() {
        let config = EngineConfig::from_server(DEFAULT_SERVER)
            .unwrap()
            .with_poll_interval(Duration::from_secs(7))
            .with_connect_timeout(Duration::from_millis(250));
        assert_eq!(config.poll_interval, Duration::from_secs(7));
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }
}
