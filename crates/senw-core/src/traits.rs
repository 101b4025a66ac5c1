use crate::error::EngineResult;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Raw read access to the CI server. Implementations return the response body untouched;
/// decoding lives in [`crate::parser`].
#[async_trait]
pub trait CiBackend: Send + Sync {
    /// `GET /status`
    async fn check_available(&self) -> EngineResult<()>;
    /// `GET /repos`
    async fn fetch_repos(&self) -> EngineResult<String>;
    /// `GET /repo/{org}/{name}`
    async fn fetch_repo(&self, org: &str, name: &str) -> EngineResult<String>;
    /// `GET /repo/{org}/{name}/builds`
    async fn fetch_builds(&self, org: &str, name: &str) -> EngineResult<String>;
    /// `GET /repo/{org}/{name}/build/{build_id}`
    async fn fetch_build(&self, org: &str, name: &str, build_id: &str) -> EngineResult<String>;
}

/// Text frames of one live log connection, in arrival order. The stream ends on remote close.
pub type LogFeed = BoxStream<'static, EngineResult<String>>;

/// Opens live log connections. Receive-only: nothing is ever sent back.
#[async_trait]
pub trait LogConnector: Send + Sync {
    async fn connect(&self) -> EngineResult<LogFeed>;
}
