//! Change notifications for whatever renders the store.
//!
//! Handlers run synchronously on the thread that owns the [`EntityStore`](crate::store::EntityStore),
//! after the mutation they describe has been committed, so a handler always sees the
//! updated [`EngineState`]. Delivery is FIFO per topic.

use crate::ansi::Segment;
use crate::error::EngineError;
use crate::model::{BuildId, RepoId, StepId};
use crate::session::StreamIndicator;
use crate::store::EngineState;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Repos,
    Builds,
    Build,
    Log,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Repos => "repos",
            Topic::Builds => "builds",
            Topic::Build => "build",
            Topic::Log => "log",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Repository list replaced.
    ReposReplaced,
    /// Build list of a repository re-synced, or the selection within it moved.
    BuildsReplaced { repo_id: RepoId },
    /// Build detail applied, or step selection moved.
    BuildUpdated { build_id: BuildId },
    /// Segments appended to a step's output buffer, in socket order.
    LogAppended {
        step_id: StepId,
        segments: Vec<Segment>,
    },
    StreamChanged {
        step_id: Option<StepId>,
        indicator: StreamIndicator,
    },
    /// A fetch failed; prior data is still in place.
    FetchFailed { topic: Topic, error: EngineError },
}

impl Change {
    pub fn topic(&self) -> Topic {
        match self {
            Change::ReposReplaced => Topic::Repos,
            Change::BuildsReplaced { .. } => Topic::Builds,
            Change::BuildUpdated { .. } => Topic::Build,
            Change::LogAppended { .. } | Change::StreamChanged { .. } => Topic::Log,
            Change::FetchFailed { topic, .. } => *topic,
        }
    }
}

pub type Handler = Box<dyn FnMut(&Change, &EngineState) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<Topic, Vec<(SubscriptionId, Handler)>>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, topic: Topic, handler: Handler) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.handlers.entry(topic).or_default().push((id, handler));
        id
    }

    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for handlers in self.handlers.values_mut() {
            if let Some(pos) = handlers.iter().position(|(sid, _)| *sid == id) {
                drop(handlers.remove(pos));
                return true;
            }
        }
        false
    }

    pub fn emit(&mut self, change: &Change, state: &EngineState) {
        let topic = change.topic();
        tracing::trace!(topic = topic.as_str(), ?change, "notify");
        if let Some(handlers) = self.handlers.get_mut(&topic) {
            for (_, handler) in handlers.iter_mut() {
                handler(change, state);
            }
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.handlers.get(&topic).map_or(0, Vec::len)
    }
}
