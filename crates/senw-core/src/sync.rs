//! Backend fetches and poll scheduling.
//!
//! The typed fetches are one-shot: no retry, no backoff. Background fetches run as tokio
//! tasks that post an [`EngineEvent`] when done. At most one task exists per [`FetchKey`]:
//! while a fetch is in flight, new requests for the same entity are suppressed until the
//! owner calls [`SyncClient::settle`]. A poll that is still waiting out its interval is
//! replaced by an immediate request.

use crate::error::EngineResult;
use crate::events::EngineEvent;
use crate::model::{Build, BuildId, RepoId, Repository, RepositoryDetail};
use crate::parser;
use crate::traits::CiBackend;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchKey {
    Builds(RepoId),
    Build(RepoId, BuildId),
}

pub async fn fetch_repos(backend: &dyn CiBackend) -> EngineResult<Vec<Repository>> {
    let json = backend.fetch_repos().await?;
    parser::parse_repos(&json)
}

pub async fn fetch_repo(backend: &dyn CiBackend, repo: &Repository) -> EngineResult<RepositoryDetail> {
    let json = backend.fetch_repo(&repo.org, &repo.name).await?;
    let mut detail = parser::parse_repo_detail(&json)?;
    // The detail payload may omit the id the list used; keep the caller's identity.
    if detail.repository.id != repo.id {
        detail.repository.id.clone_from(&repo.id);
        for build in &mut detail.builds {
            build.repo_id.clone_from(&repo.id);
        }
    }
    Ok(detail)
}

pub async fn fetch_builds(backend: &dyn CiBackend, repo: &Repository) -> EngineResult<Vec<Build>> {
    let json = backend.fetch_builds(&repo.org, &repo.name).await?;
    parser::parse_builds(&json, &repo.id)
}

pub async fn fetch_build(
    backend: &dyn CiBackend,
    repo: &Repository,
    build_id: &str,
) -> EngineResult<Build> {
    let json = backend.fetch_build(&repo.org, &repo.name, build_id).await?;
    parser::parse_build(&json, &repo.id)
}

struct Pending {
    handle: JoinHandle<()>,
    /// When the request goes out; later than now for a scheduled poll.
    due: Instant,
}

pub struct SyncClient {
    backend: Arc<dyn CiBackend>,
    tx: mpsc::UnboundedSender<EngineEvent>,
    poll_interval: Duration,
    pending: HashMap<FetchKey, Pending>,
}

impl SyncClient {
    pub fn new(
        backend: Arc<dyn CiBackend>,
        tx: mpsc::UnboundedSender<EngineEvent>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            tx,
            poll_interval,
            pending: HashMap::new(),
        }
    }

    pub fn backend(&self) -> Arc<dyn CiBackend> {
        Arc::clone(&self.backend)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_pending(&self, key: &FetchKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Starts a background build-list fetch now. Returns `false` if one is already in flight.
    pub fn request_builds(&mut self, repo: &Repository, generation: u64) -> bool {
        self.spawn_builds(repo, generation, Duration::ZERO)
    }

    /// Starts a background build-detail fetch now. Returns `false` if one is already in flight.
    pub fn request_build(&mut self, repo: &Repository, build_id: &str, generation: u64) -> bool {
        self.spawn_build(repo, build_id, generation, Duration::ZERO)
    }

    /// Re-fetches the build list after the poll interval.
    pub fn poll_builds(&mut self, repo: &Repository, generation: u64) -> bool {
        self.spawn_builds(repo, generation, self.poll_interval)
    }

    /// Re-fetches the build detail after the poll interval.
    pub fn poll_build(&mut self, repo: &Repository, build_id: &str, generation: u64) -> bool {
        self.spawn_build(repo, build_id, generation, self.poll_interval)
    }

    /// Marks the fetch for `key` as resolved so the entity can be fetched again.
    pub fn settle(&mut self, key: &FetchKey) {
        self.pending.remove(key);
    }

    /// Aborts pending fetches whose key matches `predicate`.
    pub fn cancel_where(&mut self, predicate: impl Fn(&FetchKey) -> bool) {
        self.pending.retain(|key, pending| {
            if predicate(key) {
                tracing::debug!(?key, "fetch cancelled");
                pending.handle.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn cancel_all(&mut self) {
        self.cancel_where(|_| true);
    }

    /// Whether a new request for `key` may start. A scheduled poll gives way to an immediate
    /// request; anything else already pending wins.
    fn claim(&mut self, key: &FetchKey, delay: Duration) -> bool {
        let Some(pending) = self.pending.get(key) else {
            return true;
        };
        if delay.is_zero() && pending.due > Instant::now() {
            tracing::debug!(?key, "scheduled poll replaced by immediate fetch");
            pending.handle.abort();
            self.pending.remove(key);
            return true;
        }
        tracing::debug!(?key, "fetch already pending, skipped");
        false
    }

    fn track(&mut self, key: FetchKey, handle: JoinHandle<()>, delay: Duration) {
        let due = Instant::now() + delay;
        self.pending.insert(key, Pending { handle, due });
    }

    fn spawn_builds(&mut self, repo: &Repository, generation: u64, delay: Duration) -> bool {
        let key = FetchKey::Builds(repo.id.clone());
        if !self.claim(&key, delay) {
            return false;
        }
        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        let repo = repo.clone();
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = fetch_builds(backend.as_ref(), &repo).await;
            if tx
                .send(EngineEvent::BuildsFetched {
                    generation,
                    repo_id: repo.id,
                    result,
                })
                .is_err()
            {
                tracing::debug!("fetch_builds: channel closed");
            }
        });
        self.track(key, handle, delay);
        true
    }

    fn spawn_build(
        &mut self,
        repo: &Repository,
        build_id: &str,
        generation: u64,
        delay: Duration,
    ) -> bool {
        let key = FetchKey::Build(repo.id.clone(), build_id.to_string());
        if !self.claim(&key, delay) {
            return false;
        }
        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        let repo = repo.clone();
        let build_id = build_id.to_string();
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = fetch_build(backend.as_ref(), &repo, &build_id).await;
            if tx
                .send(EngineEvent::BuildFetched {
                    generation,
                    repo_id: repo.id,
                    build_id,
                    result,
                })
                .is_err()
            {
                tracing::debug!("fetch_build: channel closed");
            }
        });
        self.track(key, handle, delay);
        true
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use async_trait::async_trait;

    /// Every request hangs, so fetches stay in flight.
    struct Stalled;

    #[async_trait]
    impl CiBackend for Stalled {
        async fn check_available(&self) -> EngineResult<()> {
            std::future::pending().await
        }
        async fn fetch_repos(&self) -> EngineResult<String> {
            std::future::pending().await
        }
        async fn fetch_repo(&self, _: &str, _: &str) -> EngineResult<String> {
            std::future::pending().await
        }
        async fn fetch_builds(&self, _: &str, _: &str) -> EngineResult<String> {
            std::future::pending().await
        }
        async fn fetch_build(&self, _: &str, _: &str, _: &str) -> EngineResult<String> {
            Err(EngineError::Network("unreachable".into()))
        }
    }

    fn repo() -> Repository {
        Repository {
            id: "1".into(),
            org: "acme".into(),
            name: "core".into(),
            url: String::new(),
        }
    }

    fn client() -> (SyncClient, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            SyncClient::new(Arc::new(Stalled), tx, Duration::from_secs(60)),
            rx,
        )
    }

    #[tokio::test]
    async fn in_flight_fetch_suppresses_new_requests() {
        let (mut sync, _rx) = client();
        assert!(sync.request_builds(&repo(), 0));
        assert!(!sync.request_builds(&repo(), 0));
        assert!(!sync.poll_builds(&repo(), 0));
        assert_eq!(sync.pending_count(), 1);
    }

    #[tokio::test]
    async fn immediate_request_replaces_scheduled_poll() {
        let (mut sync, _rx) = client();
        assert!(sync.poll_builds(&repo(), 0));
        assert!(!sync.poll_builds(&repo(), 0));
        assert!(sync.request_builds(&repo(), 0));
        assert_eq!(sync.pending_count(), 1);
    }

    #[tokio::test]
    async fn settle_and_cancel_release_keys() {
        let (mut sync, mut rx) = client();
        assert!(sync.request_build(&repo(), "b1", 3));
        match rx.recv().await {
            Some(EngineEvent::BuildFetched {
                generation,
                build_id,
                result,
                ..
            }) => {
                assert_eq!(generation, 3);
                assert_eq!(build_id, "b1");
                assert!(result.is_err());
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let key = FetchKey::Build("1".into(), "b1".into());
        assert!(sync.is_pending(&key));
        sync.settle(&key);
        assert!(!sync.is_pending(&key));

        sync.request_builds(&repo(), 0);
        sync.request_build(&repo(), "b2", 0);
        sync.cancel_where(|k| matches!(k, FetchKey::Build(..)));
        assert!(sync.is_pending(&FetchKey::Builds("1".into())));
        sync.cancel_all();
        assert_eq!(sync.pending_count(), 0);
    }
}
