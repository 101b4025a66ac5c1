//! One live log connection for one step.
//!
//! `Idle -> Connecting -> Open -> Closed`. The socket is read by a spawned task that only
//! forwards frames, tagged with the session id, to the engine queue; decoding, correlation
//! and conversion happen here on the store's side so a closed session can never append.

use crate::ansi::{AnsiConverter, Segment};
use crate::error::{EngineError, EngineResult};
use crate::events::EngineEvent;
use crate::model::StepId;
use crate::parser;
use crate::traits::LogConnector;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// What the presentation layer shows next to the log pane.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamIndicator {
    /// No session; the step is terminal or nothing is selected.
    #[default]
    Idle,
    Connecting,
    Live,
    /// The last received lines stay visible.
    Disconnected { reason: String },
}

/// Result of offering one inbound frame to the session.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Append(Vec<Segment>),
    /// Valid frame for another step.
    Foreign(String),
    /// Session is not open; frame ignored.
    Inert,
}

pub struct LogStreamSession {
    id: SessionId,
    step_id: StepId,
    step_name: String,
    state: SessionState,
    converter: AnsiConverter,
    task: Option<JoinHandle<()>>,
}

impl LogStreamSession {
    pub fn new(id: SessionId, step_id: StepId, step_name: String) -> Self {
        Self {
            id,
            step_id,
            step_name,
            state: SessionState::Idle,
            converter: AnsiConverter::new(),
            task: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Connecting or open.
    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Connecting | SessionState::Open)
    }

    /// `Idle -> Connecting`. The reader task reports back through `tx`; a connection that is
    /// not open within `connect_timeout` is reported closed with [`EngineError::Timeout`].
    pub fn open(
        &mut self,
        connector: Arc<dyn LogConnector>,
        tx: mpsc::UnboundedSender<EngineEvent>,
        connect_timeout: Duration,
    ) {
        if self.state != SessionState::Idle {
            return;
        }
        self.state = SessionState::Connecting;
        let session = self.id;
        tracing::debug!(session, step = %self.step_name, "log session connecting");

        self.task = Some(tokio::spawn(async move {
            let reason = match tokio::time::timeout(connect_timeout, connector.connect()).await {
                Err(_) => Some(EngineError::Timeout(connect_timeout)),
                Ok(Err(e)) => Some(e),
                Ok(Ok(mut feed)) => {
                    if tx.send(EngineEvent::StreamOpened { session }).is_err() {
                        return;
                    }
                    loop {
                        match feed.next().await {
                            Some(Ok(text)) => {
                                if tx.send(EngineEvent::StreamFrame { session, text }).is_err() {
                                    return;
                                }
                            }
                            Some(Err(e)) => break Some(e),
                            None => break None,
                        }
                    }
                }
            };
            let _ = tx.send(EngineEvent::StreamClosed { session, reason });
        }));
    }

    /// `Connecting -> Open`. Returns `false` in any other state.
    pub fn mark_open(&mut self) -> bool {
        if self.state == SessionState::Connecting {
            self.state = SessionState::Open;
            true
        } else {
            false
        }
    }

    /// Decodes a frame and converts its text when it targets this session's step.
    pub fn accept(&mut self, frame: &str) -> EngineResult<Frame> {
        if self.state != SessionState::Open {
            return Ok(Frame::Inert);
        }
        let event = parser::parse_log_event(frame)?;
        if event.step != self.step_name {
            return Ok(Frame::Foreign(event.step));
        }
        Ok(Frame::Append(self.converter.push(&event.line)))
    }

    /// Idempotent. Aborts the reader and returns whatever the converter still held back
    /// (a trailing `\r`), which is empty on every call after the first.
    pub fn close(&mut self) -> Vec<Segment> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let was_open = self.state == SessionState::Open;
        self.state = SessionState::Closed;
        tracing::debug!(session = self.id, step = %self.step_name, "log session closed");
        if was_open {
            self.converter.finish()
        } else {
            Vec::new()
        }
    }
}

impl Drop for LogStreamSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::LogFeed;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct NeverConnects;

    #[async_trait]
    impl LogConnector for NeverConnects {
        async fn connect(&self) -> EngineResult<LogFeed> {
            std::future::pending().await
        }
    }

    fn open_session() -> LogStreamSession {
        let mut session = LogStreamSession::new(1, "s1".into(), "test".into());
        session.state = SessionState::Open;
        session
    }

    #[test]
    fn frames_for_the_target_step_are_converted() {
        let mut session = open_session();
        let out = session.accept(r#"{"Step":"test","Line":"PASS\n"}"#).unwrap();
        assert_eq!(
            out,
            Frame::Append(vec![
                Segment::Text {
                    text: "PASS".into(),
                    style: Default::default()
                },
                Segment::Break
            ])
        );
    }

    #[test]
    fn frames_for_other_steps_are_foreign() {
        let mut session = open_session();
        let out = session.accept(r#"{"Step":"lint","Line":"x"}"#).unwrap();
        assert_eq!(out, Frame::Foreign("lint".into()));
    }

    #[test]
    fn malformed_frame_is_decode_error() {
        let mut session = open_session();
        let err = session.accept("{").unwrap_err();
        assert_eq!(err.error_code(), "engine.decode");
    }

    #[test]
    fn close_is_idempotent_and_makes_session_inert() {
        let mut session = open_session();
        session.accept(r#"{"Step":"test","Line":"a\r"}"#).unwrap();
        assert_eq!(session.close(), vec![Segment::Break]);
        assert!(session.close().is_empty());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            session.accept(r#"{"Step":"test","Line":"late"}"#).unwrap(),
            Frame::Inert
        );
        assert!(!session.mark_open());
    }

    #[tokio::test]
    async fn connect_timeout_reports_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = LogStreamSession::new(9, "s1".into(), "test".into());
        session.open(Arc::new(NeverConnects), tx, Duration::from_millis(20));
        assert_eq!(session.state(), SessionState::Connecting);

        match rx.recv().await {
            Some(EngineEvent::StreamClosed { session: 9, reason }) => {
                assert_eq!(
                    reason,
                    Some(EngineError::Timeout(Duration::from_millis(20)))
                );
                assert_eq!(
                    reason.map(|e| e.to_string()).as_deref(),
                    Some("timed out after 20ms")
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
