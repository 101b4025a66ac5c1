//! REST backend over reqwest.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::traits::CiBackend;
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

const USER_AGENT: &str = concat!("senw/", env!("CARGO_PKG_VERSION"));

pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| EngineError::Network(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    /// Appends percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> EngineResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                EngineError::Network(format!("base URL cannot be a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, segments: &[&str]) -> EngineResult<String> {
        let url = self.endpoint(segments)?;
        let start = std::time::Instant::now();
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| EngineError::Network(format!("GET {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Network(classify_http_error(status, &body)));
        }
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::Network(format!("reading {url} failed: {e}")))?;

        tracing::debug!(
            %url,
            elapsed_ms = start.elapsed().as_millis(),
            bytes = body.len(),
            "request completed"
        );
        Ok(body)
    }
}

#[async_trait]
impl CiBackend for HttpBackend {
    async fn check_available(&self) -> EngineResult<()> {
        self.get(&["status"]).await.map(|_| ())
    }

    async fn fetch_repos(&self) -> EngineResult<String> {
        self.get(&["repos"]).await
    }

    async fn fetch_repo(&self, org: &str, name: &str) -> EngineResult<String> {
        self.get(&["repo", org, name]).await
    }

    async fn fetch_builds(&self, org: &str, name: &str) -> EngineResult<String> {
        self.get(&["repo", org, name, "builds"]).await
    }

    async fn fetch_build(&self, org: &str, name: &str, build_id: &str) -> EngineResult<String> {
        self.get(&["repo", org, name, "build", build_id]).await
    }
}

pub fn classify_http_error(status: reqwest::StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    match status.as_u16() {
        404 => "Not found on server (was it deleted?)".to_string(),
        401 | 403 => format!("Server refused access ({status})"),
        _ if trimmed.is_empty() => format!("Server returned {status}"),
        _ => format!("Server returned {status}: {trimmed}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn backend(server: &str) -> HttpBackend {
        HttpBackend::new(&EngineConfig::from_server(server).unwrap()).unwrap()
    }

    #[test]
    fn endpoint_appends_segments() {
        let b = backend("http://localhost:8080");
        let url = b.endpoint(&["repo", "acme", "core", "build", "b1"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/repo/acme/core/build/b1");
    }

    #[test]
    fn endpoint_keeps_base_path_and_encodes() {
        let b = backend("http://ci.local/api/");
        let url = b.endpoint(&["repo", "my org", "core"]).unwrap();
        assert_eq!(url.as_str(), "http://ci.local/api/repo/my%20org/core");
    }

    #[test]
    fn endpoint_rejects_opaque_base() {
        let mut config = EngineConfig::from_server("http://localhost:8080").unwrap();
        config.base_url = Url::parse("mailto:x").unwrap();
        let b = HttpBackend::new(&config).unwrap();
        let err = b.endpoint(&["repos"]).unwrap_err();
        assert_eq!(err.error_code(), "engine.network");
        assert!(err.to_string().contains("mailto:x"));
    }

    #[test]
    fn classify_not_found() {
        let msg = classify_http_error(StatusCode::NOT_FOUND, "");
        assert!(msg.contains("Not found"));
    }

    #[test]
    fn classify_forbidden() {
        let msg = classify_http_error(StatusCode::FORBIDDEN, "nope");
        assert!(msg.contains("refused"));
    }

    #[test]
    fn classify_generic_with_body() {
        let msg = classify_http_error(StatusCode::INTERNAL_SERVER_ERROR, " boom \n");
        assert_eq!(msg, "Server returned 500 Internal Server Error: boom");
    }

    #[test]
    fn classify_generic_empty_body() {
        let msg = classify_http_error(StatusCode::BAD_GATEWAY, "   ");
        assert_eq!(msg, "Server returned 502 Bad Gateway");
    }
}
