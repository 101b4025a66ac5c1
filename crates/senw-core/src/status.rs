//! Status classification.
//!
//! The backend reports a raw lifecycle string (`Created`, `Started`, `Running`, `Done`) in
//! whatever case the deployment happens to use. Everything in the engine goes through
//! [`Status`] and [`classify`] instead of comparing strings ad hoc. Unrecognised values are
//! common while a new backend rolls out, so they classify as pending rather than erroring.

use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    Created,
    Started,
    Running,
    Done,
    #[default]
    Unknown,
}

impl Status {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" => Status::Created,
            "started" => Status::Started,
            "running" => Status::Running,
            "done" => Status::Done,
            _ => Status::Unknown,
        }
    }

    /// `Done` is the only terminal value.
    pub fn is_terminal(self) -> bool {
        self == Status::Done
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Created => "Created",
            Status::Started => "Started",
            Status::Running => "Running",
            Status::Done => "Done",
            Status::Unknown => "Unknown",
        }
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map_or(Status::Unknown, Status::parse))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Icon {
    /// Created, nothing picked it up yet.
    Asterisk,
    /// Started or running.
    Hourglass,
    Ok,
    Remove,
    /// Unrecognised status.
    Neutral,
}

impl Icon {
    pub fn glyph(self) -> &'static str {
        match self {
            Icon::Asterisk => "*",
            Icon::Hourglass => "⧗",
            Icon::Ok => "✓",
            Icon::Remove => "✗",
            Icon::Neutral => "·",
        }
    }

    pub fn css_class(self) -> &'static str {
        match self {
            Icon::Asterisk => "glyphicon-asterisk",
            Icon::Hourglass => "glyphicon-hourglass",
            Icon::Ok => "glyphicon-ok",
            Icon::Remove => "glyphicon-remove",
            Icon::Neutral => "glyphicon-question-sign",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleClass {
    Success,
    Danger,
    Muted,
}

impl StyleClass {
    pub fn css_class(self) -> &'static str {
        match self {
            StyleClass::Success => "text-success",
            StyleClass::Danger => "text-danger",
            StyleClass::Muted => "text-muted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    pub phase: Phase,
    pub icon: Icon,
    pub style: StyleClass,
}

impl Signal {
    const fn pending(icon: Icon) -> Self {
        Self {
            phase: Phase::Pending,
            icon,
            style: StyleClass::Muted,
        }
    }
}

/// Maps a raw status plus an optional outcome to a presentation-agnostic signal.
///
/// `outcome` is `None` when the outcome is unknown. A `Done` status with an unknown
/// outcome classifies as failure: the backend always reports an outcome for finished work.
pub fn classify(raw: &str, outcome: Option<bool>) -> Signal {
    classify_status(Status::parse(raw), outcome)
}

pub fn classify_status(status: Status, outcome: Option<bool>) -> Signal {
    match status {
        Status::Done if outcome == Some(true) => Signal {
            phase: Phase::Success,
            icon: Icon::Ok,
            style: StyleClass::Success,
        },
        Status::Done => Signal {
            phase: Phase::Failure,
            icon: Icon::Remove,
            style: StyleClass::Danger,
        },
        Status::Started | Status::Running => Signal::pending(Icon::Hourglass),
        Status::Created => Signal::pending(Icon::Asterisk),
        Status::Unknown => Signal::pending(Icon::Neutral),
    }
}

pub fn classify_build(status: Status, success: bool) -> Signal {
    classify_status(status, Some(success))
}

/// Exit code zero is success; a missing exit code means the outcome is not known yet.
pub fn classify_step(status: Status, exit_code: Option<i32>) -> Signal {
    classify_status(status, exit_code.map(|code| code == 0))
}
