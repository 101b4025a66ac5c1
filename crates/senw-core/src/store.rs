//! The engine: canonical state, selection rules, and the single point where background
//! results are applied.
//!
//! All mutation happens through `&mut EntityStore` on the task that owns it. Background work
//! posts [`EngineEvent`]s which the owner drains with [`EntityStore::next_event`] and hands to
//! [`EntityStore::apply`]. Each mutation commits fully and only then notifies subscribers.
//!
//! Staleness is detected two ways: fetches carry the generation they were started under
//! (bumped whenever the selection they depend on changes), and stream events carry their
//! session id.

use crate::ansi::Segment;
use crate::bus::{Change, EventBus, SubscriptionId, Topic};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::EngineEvent;
use crate::http::HttpBackend;
use crate::model::{Build, BuildId, RepoId, Repository, RepositoryDetail, Step, StepId};
use crate::session::{Frame, LogStreamSession, SessionId, StreamIndicator};
use crate::sync::{self, FetchKey, SyncClient};
use crate::traits::{CiBackend, LogConnector};
use crate::ws::WsConnector;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything a subscriber may read.
#[derive(Debug, Default)]
pub struct EngineState {
    repos: Vec<Repository>,
    builds: HashMap<RepoId, Vec<Build>>,
    selected_repo: Option<RepoId>,
    selected_build: Option<BuildId>,
    selected_step: Option<StepId>,
    stream: StreamIndicator,
    errors: HashMap<Topic, EngineError>,
}

impl EngineState {
    pub fn repos(&self) -> &[Repository] {
        &self.repos
    }

    pub fn repository(&self, id: &str) -> Option<&Repository> {
        self.repos.iter().find(|r| r.id == id)
    }

    pub fn selected_repository(&self) -> Option<&Repository> {
        self.selected_repo.as_deref().and_then(|id| self.repository(id))
    }

    /// Builds of the selected repository, in backend order.
    pub fn builds(&self) -> &[Build] {
        self.selected_repo
            .as_ref()
            .and_then(|id| self.builds.get(id))
            .map_or(&[], Vec::as_slice)
    }

    pub fn builds_of(&self, repo_id: &str) -> &[Build] {
        self.builds.get(repo_id).map_or(&[], Vec::as_slice)
    }

    /// Most recent first. Builds without a parseable timestamp go last, otherwise stable.
    pub fn builds_by_recency(&self) -> Vec<&Build> {
        let mut builds: Vec<&Build> = self.builds().iter().collect();
        builds.sort_by(|a, b| match (a.parsed_timestamp(), b.parsed_timestamp()) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        builds
    }

    pub fn build(&self, id: &str) -> Option<&Build> {
        self.builds().iter().find(|b| b.id == id)
    }

    pub fn selected_build(&self) -> Option<&Build> {
        self.selected_build.as_deref().and_then(|id| self.build(id))
    }

    pub fn selected_step(&self) -> Option<&Step> {
        let step_id = self.selected_step.as_deref()?;
        self.selected_build()?.step(step_id)
    }

    pub fn selected_repo_id(&self) -> Option<&str> {
        self.selected_repo.as_deref()
    }

    pub fn selected_build_id(&self) -> Option<&str> {
        self.selected_build.as_deref()
    }

    pub fn selected_step_id(&self) -> Option<&str> {
        self.selected_step.as_deref()
    }

    pub fn stream(&self) -> &StreamIndicator {
        &self.stream
    }

    /// Last failure for `topic`, cleared by the next successful fetch.
    pub fn last_error(&self, topic: Topic) -> Option<&EngineError> {
        self.errors.get(&topic)
    }

    fn selected_build_mut(&mut self) -> Option<&mut Build> {
        let repo_id = self.selected_repo.as_ref()?;
        let build_id = self.selected_build.as_ref()?;
        self.builds
            .get_mut(repo_id)?
            .iter_mut()
            .find(|b| b.id == *build_id)
    }

    fn selected_step_mut(&mut self) -> Option<&mut Step> {
        let step_id = self.selected_step.clone()?;
        self.selected_build_mut()?.step_mut(&step_id)
    }
}

pub struct EntityStore {
    state: EngineState,
    bus: EventBus,
    sync: SyncClient,
    connector: Arc<dyn LogConnector>,
    tx: mpsc::UnboundedSender<EngineEvent>,
    rx: mpsc::UnboundedReceiver<EngineEvent>,
    connect_timeout: Duration,
    session: Option<LogStreamSession>,
    next_session: SessionId,
    /// Bumped when the selected repository changes; guards build-list fetches.
    repo_generation: u64,
    /// Bumped when the selected repository or build changes; guards build-detail fetches.
    build_generation: u64,
    shut_down: bool,
}

impl EntityStore {
    pub fn new(
        config: &EngineConfig,
        backend: Arc<dyn CiBackend>,
        connector: Arc<dyn LogConnector>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: EngineState::default(),
            bus: EventBus::new(),
            sync: SyncClient::new(backend, tx.clone(), config.poll_interval),
            connector,
            tx,
            rx,
            connect_timeout: config.connect_timeout,
            session: None,
            next_session: 0,
            repo_generation: 0,
            build_generation: 0,
            shut_down: false,
        }
    }

    /// Store wired to the HTTP backend and websocket transport named in `config`.
    pub fn connect(config: &EngineConfig) -> EngineResult<Self> {
        let backend = Arc::new(HttpBackend::new(config)?);
        let connector = Arc::new(WsConnector::new(config.ws_url.clone()));
        Ok(Self::new(config, backend, connector))
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn on_change(
        &mut self,
        topic: Topic,
        handler: impl FnMut(&Change, &EngineState) + Send + 'static,
    ) -> SubscriptionId {
        self.bus.subscribe(topic, Box::new(handler))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    // -- Commands --

    /// `GET /status`. The returned future does not borrow the store.
    pub fn check_server(&self) -> impl Future<Output = EngineResult<()>> + Send + 'static {
        let backend = self.sync.backend();
        async move { backend.check_available().await }
    }

    /// Replaces the repository list. On failure the previous list stays and the error is
    /// both returned and published on the `repos` topic.
    pub async fn load_repositories(&mut self) -> EngineResult<()> {
        self.ensure_running()?;
        let backend = self.sync.backend();
        let result = sync::fetch_repos(backend.as_ref()).await;
        let repos = match result {
            Ok(repos) => repos,
            Err(e) => {
                tracing::warn!("loading repositories failed: {e}");
                self.fail(Topic::Repos, e.clone());
                return Err(e);
            }
        };
        tracing::debug!(count = repos.len(), "repositories loaded");

        self.state.repos = repos;
        self.state.errors.remove(&Topic::Repos);
        let known: Vec<RepoId> = self.state.repos.iter().map(|r| r.id.clone()).collect();
        self.state.builds.retain(|id, _| known.contains(id));
        let lost_selection = self
            .state
            .selected_repo
            .as_ref()
            .is_some_and(|id| !known.contains(id));
        if lost_selection {
            self.clear_repository_selection();
        }
        self.emit(Change::ReposReplaced);
        if lost_selection {
            self.emit_stream_change();
        }
        Ok(())
    }

    /// One-shot `GET /repo/{org}/{name}`; the store is not modified.
    pub fn repository_detail(
        &self,
        id: &str,
    ) -> impl Future<Output = EngineResult<RepositoryDetail>> + Send + 'static {
        let backend = self.sync.backend();
        let repo = self.state.repository(id).cloned().ok_or_else(|| {
            EngineError::InvalidSelection(format!("unknown repository '{id}'"))
        });
        async move { sync::fetch_repo(backend.as_ref(), &repo?).await }
    }

    pub fn select_repository(&mut self, id: &str) -> EngineResult<()> {
        self.ensure_running()?;
        let repo = self
            .state
            .repository(id)
            .cloned()
            .ok_or_else(|| EngineError::InvalidSelection(format!("unknown repository '{id}'")))?;

        self.clear_repository_selection();
        self.state.selected_repo = Some(repo.id.clone());
        self.state.builds.entry(repo.id.clone()).or_default();
        self.sync.request_builds(&repo, self.repo_generation);
        tracing::debug!(repo = %repo.slug(), "repository selected");

        self.emit(Change::BuildsReplaced {
            repo_id: repo.id.clone(),
        });
        self.emit_stream_change();
        Ok(())
    }

    pub fn select_build(&mut self, id: &str) -> EngineResult<()> {
        self.ensure_running()?;
        let repo = self
            .state
            .selected_repository()
            .cloned()
            .ok_or_else(|| EngineError::InvalidSelection("no repository selected".into()))?;
        if self.state.build(id).is_none() {
            return Err(EngineError::InvalidSelection(format!(
                "build '{id}' does not belong to repository '{}'",
                repo.id
            )));
        }

        self.close_session();
        self.state.stream = StreamIndicator::Idle;
        self.build_generation += 1;
        self.sync
            .cancel_where(|key| matches!(key, FetchKey::Build(..)));

        let previous = self.state.selected_build.take();
        self.state.selected_step = None;
        if let Some(builds) = self.state.builds.get_mut(&repo.id) {
            for build in builds.iter_mut() {
                if build.id == id {
                    build.selected = true;
                    for step in &mut build.steps {
                        step.selected = false;
                    }
                } else if previous.as_deref() == Some(build.id.as_str()) {
                    // Transient detail of the old selection is discarded
                    build.selected = false;
                    build.steps.clear();
                    build.detail_loaded = false;
                }
            }
        }
        self.state.selected_build = Some(id.to_string());
        self.sync.request_build(&repo, id, self.build_generation);
        tracing::debug!(build = id, "build selected");

        self.emit(Change::BuildUpdated {
            build_id: id.to_string(),
        });
        self.emit_stream_change();
        Ok(())
    }

    /// Selects a step of the selected build; a non-terminal step gets a live log session.
    /// Re-selecting the streaming step reconnects.
    pub fn select_step(&mut self, id: &str) -> EngineResult<()> {
        self.ensure_running()?;
        let build = self
            .state
            .selected_build()
            .ok_or_else(|| EngineError::InvalidSelection("no build selected".into()))?;
        let build_id = build.id.clone();
        let step = build.step(id).ok_or_else(|| {
            EngineError::InvalidSelection(format!(
                "step '{id}' does not belong to build '{build_id}'"
            ))
        })?;
        let step_name = step.name.clone();
        let stream = !step.is_terminal();

        self.close_session();
        if let Some(build) = self.state.selected_build_mut() {
            for step in &mut build.steps {
                step.selected = step.id == id;
            }
        }
        self.state.selected_step = Some(id.to_string());

        if stream {
            self.next_session += 1;
            let mut session = LogStreamSession::new(self.next_session, id.to_string(), step_name);
            session.open(Arc::clone(&self.connector), self.tx.clone(), self.connect_timeout);
            self.session = Some(session);
            self.state.stream = StreamIndicator::Connecting;
        } else {
            self.state.stream = StreamIndicator::Idle;
        }
        tracing::debug!(step = id, stream, "step selected");

        self.emit(Change::BuildUpdated { build_id });
        self.emit_stream_change();
        Ok(())
    }

    /// Re-syncs the selected build list and build detail, terminal or not. Entities with a
    /// fetch in flight are skipped.
    pub fn refresh(&mut self) {
        if self.shut_down {
            return;
        }
        let Some(repo) = self.state.selected_repository().cloned() else {
            return;
        };
        self.sync.request_builds(&repo, self.repo_generation);
        if let Some(build_id) = self.state.selected_build.clone() {
            self.sync.request_build(&repo, &build_id, self.build_generation);
        }
    }

    /// Closes the session and aborts every fetch and poll. Events still queued are ignored.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.close_session();
        self.sync.cancel_all();
        self.repo_generation += 1;
        self.build_generation += 1;
        tracing::debug!("engine shut down");
    }

    // -- Event application --

    /// Waits for the next background completion.
    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        self.rx.recv().await
    }

    /// Waits for one event and applies it.
    pub async fn pump(&mut self) -> bool {
        match self.rx.recv().await {
            Some(event) => {
                self.apply(event);
                true
            }
            None => false,
        }
    }

    pub fn apply(&mut self, event: EngineEvent) {
        if self.shut_down {
            tracing::trace!(?event, "engine shut down, event dropped");
            return;
        }
        match event {
            EngineEvent::BuildsFetched {
                generation,
                repo_id,
                result,
            } => self.apply_builds(generation, repo_id, result),
            EngineEvent::BuildFetched {
                generation,
                repo_id,
                build_id,
                result,
            } => self.apply_build(generation, repo_id, build_id, result),
            EngineEvent::StreamOpened { session } => self.apply_stream_opened(session),
            EngineEvent::StreamFrame { session, text } => self.apply_stream_frame(session, &text),
            EngineEvent::StreamClosed { session, reason } => {
                self.apply_stream_closed(session, reason);
            }
        }
    }

    fn apply_builds(&mut self, generation: u64, repo_id: RepoId, result: EngineResult<Vec<Build>>) {
        if generation != self.repo_generation
            || self.state.selected_repo.as_deref() != Some(repo_id.as_str())
        {
            tracing::debug!(repo = %repo_id, "stale build list dropped");
            return;
        }
        self.sync.settle(&FetchKey::Builds(repo_id.clone()));

        let incoming = match result {
            Ok(builds) => builds,
            Err(e) => {
                tracing::warn!(repo = %repo_id, "build list fetch failed: {e}");
                self.fail(Topic::Builds, e);
                return;
            }
        };

        let mut existing: Vec<Build> = self.state.builds.remove(&repo_id).unwrap_or_default();
        let merged: Vec<Build> = incoming
            .into_iter()
            .map(|build| match existing.iter().position(|b| b.id == build.id) {
                Some(pos) => {
                    let mut kept = existing.swap_remove(pos);
                    kept.merge_summary(build);
                    kept
                }
                None => build,
            })
            .collect();
        let poll = merged.iter().any(|b| !b.is_terminal());
        self.state.builds.insert(repo_id.clone(), merged);
        self.state.errors.remove(&Topic::Builds);

        let lost_build = self
            .state
            .selected_build
            .as_ref()
            .is_some_and(|id| self.state.build(id).is_none());
        if lost_build {
            tracing::debug!("selected build vanished from the list");
            self.close_session();
            self.state.stream = StreamIndicator::Idle;
            self.state.selected_build = None;
            self.state.selected_step = None;
            self.build_generation += 1;
            self.sync
                .cancel_where(|key| matches!(key, FetchKey::Build(..)));
        }

        self.emit(Change::BuildsReplaced {
            repo_id: repo_id.clone(),
        });
        if lost_build {
            self.emit_stream_change();
        }
        if poll {
            if let Some(repo) = self.state.repository(&repo_id).cloned() {
                self.sync.poll_builds(&repo, self.repo_generation);
            }
        }
    }

    fn apply_build(
        &mut self,
        generation: u64,
        repo_id: RepoId,
        build_id: BuildId,
        result: EngineResult<Build>,
    ) {
        if generation != self.build_generation
            || self.state.selected_repo.as_deref() != Some(repo_id.as_str())
            || self.state.selected_build.as_deref() != Some(build_id.as_str())
        {
            tracing::debug!(build = %build_id, "stale build detail dropped");
            return;
        }
        self.sync
            .settle(&FetchKey::Build(repo_id.clone(), build_id.clone()));

        let mut incoming = match result {
            Ok(build) => build,
            Err(e) => {
                tracing::warn!(build = %build_id, "build fetch failed: {e}");
                self.fail(Topic::Build, e);
                return;
            }
        };

        let selected_step = self.state.selected_step.clone();
        let live_step = self
            .session
            .as_ref()
            .filter(|s| s.is_active())
            .map(|s| s.step_id().to_string());
        let mut stream_changed = false;
        let mut step_lost = false;

        let Some(build) = self.state.selected_build_mut() else {
            tracing::warn!(build = %build_id, "selected build missing from store");
            return;
        };
        let mut steps = std::mem::take(&mut incoming.steps);
        let services = std::mem::take(&mut incoming.services);
        for step in &mut steps {
            if selected_step.as_deref() != Some(step.id.as_str()) {
                continue;
            }
            step.selected = true;
            let current = build
                .step_mut(&step.id)
                .map(|s| std::mem::take(&mut s.output))
                .unwrap_or_default();
            let streaming = live_step.as_deref() == Some(step.id.as_str());
            if streaming && !step.is_terminal() {
                step.output = current;
            } else {
                // The selected step's buffer never shrinks
                if step.output.len() < current.len() {
                    step.output = current;
                }
                if streaming {
                    stream_changed = true;
                }
            }
        }
        if let Some(step_id) = selected_step.as_deref() {
            step_lost = !steps.iter().any(|s| s.id == step_id);
        }
        build.merge_summary(incoming);
        build.steps = steps;
        build.services = services;
        build.detail_loaded = true;
        let poll = build.needs_refresh();
        self.state.errors.remove(&Topic::Build);

        if stream_changed || step_lost {
            // Step finished (or vanished): the bulk log is authoritative from here on
            self.discard_session();
            self.state.stream = StreamIndicator::Idle;
            stream_changed = true;
        }
        if step_lost {
            self.state.selected_step = None;
        }

        self.emit(Change::BuildUpdated {
            build_id: build_id.clone(),
        });
        if stream_changed {
            self.emit_stream_change();
        }
        if poll {
            if let Some(repo) = self.state.repository(&repo_id).cloned() {
                self.sync.poll_build(&repo, &build_id, self.build_generation);
            }
        }
    }

    fn current_session(&mut self, id: SessionId) -> Option<&mut LogStreamSession> {
        self.session.as_mut().filter(|s| s.id() == id)
    }

    fn apply_stream_opened(&mut self, id: SessionId) {
        let Some(session) = self.current_session(id) else {
            tracing::debug!(session = id, "stale stream open ignored");
            return;
        };
        if session.mark_open() {
            tracing::debug!(session = id, "log session open");
            self.state.stream = StreamIndicator::Live;
            self.emit_stream_change();
        }
    }

    fn apply_stream_frame(&mut self, id: SessionId, text: &str) {
        let Some(session) = self.current_session(id) else {
            tracing::trace!(session = id, "frame from stale session dropped");
            return;
        };
        let segments = match session.accept(text) {
            Ok(Frame::Append(segments)) => segments,
            Ok(Frame::Foreign(step)) => {
                tracing::trace!(session = id, %step, "frame for another step dropped");
                return;
            }
            Ok(Frame::Inert) => return,
            Err(e) => {
                tracing::warn!(session = id, "dropping log frame: {e}");
                return;
            }
        };
        let step_id = session.step_id().to_string();
        self.append_log(&step_id, segments);
    }

    fn apply_stream_closed(&mut self, id: SessionId, reason: Option<EngineError>) {
        let Some(session) = self.current_session(id) else {
            return;
        };
        let step_id = session.step_id().to_string();
        let tail = session.close();
        let reason = match reason {
            Some(e) => {
                tracing::warn!(session = id, "log session failed: {e}");
                e.to_string()
            }
            None => "closed by server".to_string(),
        };
        self.append_log(&step_id, tail);
        self.state.stream = StreamIndicator::Disconnected { reason };
        self.emit_stream_change();
    }

    fn append_log(&mut self, step_id: &str, segments: Vec<Segment>) {
        if segments.is_empty() {
            return;
        }
        let Some(step) = self
            .state
            .selected_step_mut()
            .filter(|s| s.id == step_id)
        else {
            return;
        };
        step.output.append(segments.clone());
        self.emit(Change::LogAppended {
            step_id: step_id.to_string(),
            segments,
        });
    }

    // -- Helpers --

    fn ensure_running(&self) -> EngineResult<()> {
        if self.shut_down {
            Err(EngineError::InvalidSelection("engine is shut down".into()))
        } else {
            Ok(())
        }
    }

    /// Closes the session and appends the converter tail to its step, selected or not.
    fn close_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let step_id = session.step_id().to_string();
        let tail = session.close();
        if tail.is_empty() {
            return;
        }
        let Some(step) = self
            .state
            .selected_build_mut()
            .and_then(|b| b.step_mut(&step_id))
        else {
            return;
        };
        step.output.append(tail.clone());
        self.emit(Change::LogAppended {
            step_id,
            segments: tail,
        });
    }

    /// Closes the session without flushing; the caller has an authoritative bulk log.
    fn discard_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            drop(session.close());
        }
    }

    /// Drops repository, build and step selection along with every pending fetch.
    fn clear_repository_selection(&mut self) {
        self.close_session();
        self.state.stream = StreamIndicator::Idle;
        self.sync.cancel_all();
        self.repo_generation += 1;
        self.build_generation += 1;
        for builds in self.state.builds.values_mut() {
            for build in builds.iter_mut() {
                if build.selected {
                    build.selected = false;
                    build.steps.clear();
                    build.detail_loaded = false;
                }
            }
        }
        self.state.selected_repo = None;
        self.state.selected_build = None;
        self.state.selected_step = None;
    }

    fn fail(&mut self, topic: Topic, error: EngineError) {
        self.state.errors.insert(topic, error.clone());
        self.emit(Change::FetchFailed { topic, error });
    }

    fn emit(&mut self, change: Change) {
        self.bus.emit(&change, &self.state);
    }

    fn emit_stream_change(&mut self) {
        let change = Change::StreamChanged {
            step_id: self.state.selected_step.clone(),
            indicator: self.state.stream.clone(),
        };
        self.emit(change);
    }
}

impl Drop for EntityStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;

    fn build(id: &str, ts: &str) -> Build {
        Build {
            id: id.into(),
            number: 0,
            repo_id: "r".into(),
            timestamp: ts.into(),
            coverage: String::new(),
            duration: String::new(),
            status: Status::Done,
            success: true,
            committers: vec![],
            commit: String::new(),
            steps: vec![],
            services: vec![],
            detail_loaded: false,
            selected: false,
        }
    }

    #[test]
    fn builds_by_recency_orders_newest_first() {
        let mut state = EngineState {
            selected_repo: Some("r".into()),
            ..EngineState::default()
        };
        state.builds.insert(
            "r".into(),
            vec![
                build("old", "2024-01-01T00:00:00"),
                build("junk", "whenever"),
                build("new", "2024-03-01T00:00:00Z"),
                build("mid", "2024-02-01T00:00:00"),
            ],
        );
        let order: Vec<&str> = state
            .builds_by_recency()
            .iter()
            .map(|b| b.id.as_str())
            .collect();
        assert_eq!(order, vec!["new", "mid", "old", "junk"]);
    }

    #[test]
    fn empty_state_has_no_selection() {
        let state = EngineState::default();
        assert!(state.builds().is_empty());
        assert!(state.selected_build().is_none());
        assert!(state.selected_step().is_none());
        assert_eq!(*state.stream(), StreamIndicator::Idle);
        assert!(state.last_error(Topic::Repos).is_none());
    }
}
