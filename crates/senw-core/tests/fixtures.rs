#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use senw_core::config::EngineConfig;
use senw_core::error::{EngineError, EngineResult};
use senw_core::traits::{CiBackend, LogConnector, LogFeed};
use senw_core::EntityStore;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const REPOS: &str = r#"[{"id": "1", "org": "acme", "name": "core"}]"#;
pub const BUILDS_PATH: &str = "/repo/acme/core/builds";

pub fn build_path(id: &str) -> String {
    format!("/repo/acme/core/build/{id}")
}

pub fn build_summary(id: &str, status: &str) -> String {
    format!(r#"{{"id": "{id}", "status": "{status}", "success": true, "timestamp": "2024-01-01T00:00:00"}}"#)
}

pub fn builds_json(builds: &[(&str, &str)]) -> String {
    let items: Vec<String> = builds
        .iter()
        .map(|(id, status)| build_summary(id, status))
        .collect();
    format!("[{}]", items.join(","))
}

/// `steps` are `(id, name, status, exitcode, log)`.
pub fn build_detail(id: &str, status: &str, steps: &[(&str, &str, &str, Option<i32>, &str)]) -> String {
    let steps: Vec<String> = steps
        .iter()
        .map(|(sid, name, st, code, log)| {
            let code = code.map_or_else(|| "null".to_string(), |c| c.to_string());
            format!(
                r#"{{"id": "{sid}", "name": "{name}", "status": "{st}", "exitcode": {code}, "build": {}}}"#,
                serde_json::to_string(log).unwrap()
            )
        })
        .collect();
    format!(
        r#"{{"id": "{id}", "status": "{status}", "success": true, "timestamp": "2024-01-01T00:00:00", "steps": [{}]}}"#,
        steps.join(",")
    )
}

pub fn log_frame(step: &str, line: &str) -> String {
    serde_json::json!({ "Step": step, "Line": line }).to_string()
}

pub fn config() -> EngineConfig {
    EngineConfig::from_server("http://localhost:8080")
        .unwrap()
        .with_poll_interval(Duration::from_secs(60))
        .with_connect_timeout(Duration::from_secs(2))
}

/// Canned responses keyed by request path. The last queued response for a path repeats.
#[derive(Default)]
pub struct FakeBackend {
    responses: Mutex<HashMap<String, VecDeque<EngineResult<String>>>>,
    requests: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, path: &str, body: &str) {
        self.push(path, Ok(body.to_string()));
    }

    pub fn fail(&self, path: &str, error: EngineError) {
        self.push(path, Err(error));
    }

    fn push(&self, path: &str, response: EngineResult<String>) {
        self.responses
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|p| *p == path)
            .count()
    }

    fn get(&self, path: String) -> EngineResult<String> {
        self.requests.lock().unwrap().push(path.clone());
        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(&path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Err(EngineError::Network(format!("no route for {path}"))),
        }
    }
}

#[async_trait]
impl CiBackend for FakeBackend {
    async fn check_available(&self) -> EngineResult<()> {
        self.get("/status".to_string()).map(|_| ())
    }

    async fn fetch_repos(&self) -> EngineResult<String> {
        self.get("/repos".to_string())
    }

    async fn fetch_repo(&self, org: &str, name: &str) -> EngineResult<String> {
        self.get(format!("/repo/{org}/{name}"))
    }

    async fn fetch_builds(&self, org: &str, name: &str) -> EngineResult<String> {
        self.get(format!("/repo/{org}/{name}/builds"))
    }

    async fn fetch_build(&self, org: &str, name: &str, build_id: &str) -> EngineResult<String> {
        self.get(format!("/repo/{org}/{name}/build/{build_id}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectMode {
    #[default]
    Accept,
    Hang,
    Refuse,
}

/// Each `connect` opens an in-memory feed; tests push frames into the newest one.
#[derive(Default)]
pub struct FakeConnector {
    mode: ConnectMode,
    feeds: Mutex<Vec<mpsc::UnboundedSender<EngineResult<String>>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_mode(mode: ConnectMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            feeds: Mutex::default(),
        })
    }

    pub fn connections(&self) -> usize {
        self.feeds.lock().unwrap().len()
    }

    /// Sends a frame on the newest connection. Returns `false` if its reader is gone.
    pub fn send(&self, frame: &str) -> bool {
        self.feeds
            .lock()
            .unwrap()
            .last()
            .is_some_and(|tx| tx.send(Ok(frame.to_string())).is_ok())
    }

    pub fn send_on(&self, connection: usize, frame: &str) -> bool {
        self.feeds
            .lock()
            .unwrap()
            .get(connection)
            .is_some_and(|tx| tx.send(Ok(frame.to_string())).is_ok())
    }

    /// Remote close of the newest connection.
    pub fn hang_up(&self) {
        self.feeds.lock().unwrap().pop();
    }
}

#[async_trait]
impl LogConnector for FakeConnector {
    async fn connect(&self) -> EngineResult<LogFeed> {
        match self.mode {
            ConnectMode::Hang => std::future::pending().await,
            ConnectMode::Refuse => Err(EngineError::Network("connection refused".into())),
            ConnectMode::Accept => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.feeds.lock().unwrap().push(tx);
                let feed = stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                });
                Ok(feed.boxed())
            }
        }
    }
}

pub fn store(backend: &Arc<FakeBackend>, connector: &Arc<FakeConnector>) -> EntityStore {
    store_with(config(), backend, connector)
}

pub fn store_with(
    config: EngineConfig,
    backend: &Arc<FakeBackend>,
    connector: &Arc<FakeConnector>,
) -> EntityStore {
    EntityStore::new(&config, backend.clone(), connector.clone())
}

/// Applies exactly one engine event, failing the test if none arrives.
pub async fn pump(store: &mut EntityStore) {
    let applied = tokio::time::timeout(Duration::from_secs(2), store.pump())
        .await
        .expect("no engine event within 2s");
    assert!(applied, "engine queue closed");
}

/// Applies every event that arrives within `window`.
pub async fn drain(store: &mut EntityStore, window: Duration) -> usize {
    let mut applied = 0;
    while let Ok(Some(event)) = tokio::time::timeout(window, store.next_event()).await {
        store.apply(event);
        applied += 1;
    }
    applied
}

/// Repository "1" (acme/core) loaded and selected, build list applied.
pub async fn with_repo_selected(store: &mut EntityStore) {
    store.load_repositories().await.unwrap();
    store.select_repository("1").unwrap();
    pump(store).await;
}
