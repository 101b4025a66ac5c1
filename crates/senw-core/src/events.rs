//! Completions posted back to the store by background tasks.
//!
//! Fetch tasks and the log socket reader never touch the store directly. They send an
//! [`EngineEvent`] on the engine's unbounded channel and the owner of the store applies it
//! with [`EntityStore::apply`](crate::store::EntityStore::apply). Every event carries the
//! generation or session it was started under so stale completions can be dropped.

use crate::error::EngineError;
use crate::error::EngineResult;
use crate::model::{Build, BuildId, RepoId};
use crate::session::SessionId;

#[derive(Debug)]
pub enum EngineEvent {
    BuildsFetched {
        generation: u64,
        repo_id: RepoId,
        result: EngineResult<Vec<Build>>,
    },
    BuildFetched {
        generation: u64,
        repo_id: RepoId,
        build_id: BuildId,
        result: EngineResult<Build>,
    },
    StreamOpened {
        session: SessionId,
    },
    StreamFrame {
        session: SessionId,
        text: String,
    },
    /// `reason` is `None` when the server closed the stream cleanly.
    StreamClosed {
        session: SessionId,
        reason: Option<EngineError>,
    },
}
