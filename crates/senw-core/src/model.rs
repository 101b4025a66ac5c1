//! Repositories, builds and steps as the engine holds them.

use crate::ansi::{self, Segment};
use crate::status::{self, Signal, Status};
use chrono::{DateTime, NaiveDateTime, Utc};

pub type RepoId = String;
pub type BuildId = String;
pub type StepId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub id: RepoId,
    pub org: String,
    pub name: String,
    pub url: String,
}

impl Repository {
    /// `org/name`, as used in REST paths.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.org, self.name)
    }
}

/// A repository together with its build summaries, as returned by the detail endpoint.
#[derive(Debug, Clone)]
pub struct RepositoryDetail {
    pub repository: Repository,
    pub builds: Vec<Build>,
}

#[derive(Debug, Clone)]
pub struct Build {
    pub id: BuildId,
    pub number: u64,
    /// Owning repository; a back-reference only.
    pub repo_id: RepoId,
    /// Passed through as the backend sent it.
    pub timestamp: String,
    pub coverage: String,
    pub duration: String,
    pub status: Status,
    /// Meaningful only once `status` is terminal.
    pub success: bool,
    pub committers: Vec<String>,
    pub commit: String,
    pub steps: Vec<Step>,
    /// Sidecar containers (databases and the like) with their logs, from the detail endpoint.
    pub services: Vec<Service>,
    /// `true` once the detail endpoint has been applied.
    pub detail_loaded: bool,
    pub selected: bool,
}

impl Build {
    pub fn signal(&self) -> Signal {
        status::classify_build(self.status, self.success)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// A build is stable only when it and every step are terminal.
    pub fn needs_refresh(&self) -> bool {
        !self.is_terminal() || self.steps.iter().any(|s| !s.is_terminal())
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    pub fn selected_step(&self) -> Option<&Step> {
        self.steps.iter().find(|s| s.selected)
    }

    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    /// `YYYY-MM-DD HH:MM`, or the raw value when it is not a timestamp.
    pub fn display_time(&self) -> String {
        match self.parsed_timestamp() {
            Some(ts) => ts.format("%Y-%m-%d %H:%M").to_string(),
            None => self.timestamp.clone(),
        }
    }

    /// Copies the summary fields of `incoming` without touching steps or selection.
    pub fn merge_summary(&mut self, incoming: Build) {
        self.number = incoming.number;
        self.timestamp = incoming.timestamp;
        self.coverage = incoming.coverage;
        self.duration = incoming.duration;
        self.status = incoming.status;
        self.success = incoming.success;
        self.committers = incoming.committers;
        self.commit = incoming.commit;
        if !self.detail_loaded {
            self.steps = incoming.steps;
            self.services = incoming.services;
        }
    }
}

/// Accepts RFC 3339 as well as the offset-less `2024-01-01T00:00:00` form.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[derive(Debug, Clone)]
pub struct Step {
    pub id: StepId,
    /// Live log frames correlate on this, not on `id`.
    pub name: String,
    pub build_id: BuildId,
    pub status: Status,
    /// Meaningful only once `status` is terminal.
    pub exit_code: Option<i32>,
    pub output: LogBuffer,
    pub selected: bool,
}

impl Step {
    pub fn signal(&self) -> Signal {
        status::classify_step(self.status, self.exit_code)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone)]
pub struct Service {
    pub name: String,
    /// Snapshot as of the last detail fetch; services are never streamed.
    pub output: LogBuffer,
}

/// Append-only rendered output of a step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBuffer {
    segments: Vec<Segment>,
    visible_len: usize,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts a complete log fetched in bulk.
    pub fn from_log(raw: &str) -> Self {
        let mut buffer = Self::new();
        buffer.append(ansi::convert_all(raw));
        buffer
    }

    pub fn append(&mut self, segments: Vec<Segment>) {
        self.visible_len += segments.iter().map(Segment::visible_len).sum::<usize>();
        ansi::extend_segments(&mut self.segments, segments);
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Visible length in chars, breaks counted as one. Never decreases while streaming.
    pub fn len(&self) -> usize {
        self.visible_len
    }

    pub fn is_empty(&self) -> bool {
        self.visible_len == 0
    }

    pub fn to_html(&self) -> String {
        ansi::to_html(&self.segments)
    }

    pub fn visible_text(&self) -> String {
        ansi::visible_text(&self.segments)
    }

    pub fn line_count(&self) -> usize {
        if self.segments.is_empty() {
            return 0;
        }
        let breaks = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Break))
            .count();
        match self.segments.last() {
            Some(Segment::Break) => breaks,
            _ => breaks + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(status: Status) -> Build {
        Build {
            id: "7".into(),
            number: 7,
            repo_id: "acme/core".into(),
            timestamp: "2024-01-01T10:30:00Z".into(),
            coverage: String::new(),
            duration: String::new(),
            status,
            success: false,
            committers: vec![],
            commit: String::new(),
            steps: vec![],
            services: vec![],
            detail_loaded: false,
            selected: false,
        }
    }

    fn step(status: Status) -> Step {
        Step {
            id: "test".into(),
            name: "test".into(),
            build_id: "7".into(),
            status,
            exit_code: None,
            output: LogBuffer::new(),
            selected: false,
        }
    }

    #[test]
    fn timestamps_with_and_without_offset() {
        assert!(parse_timestamp("2024-01-01T00:00:00").is_some());
        assert!(parse_timestamp("2024-01-01T00:00:00.123456789+02:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn display_time_truncates_to_minutes() {
        assert_eq!(build(Status::Done).display_time(), "2024-01-01 10:30");
        let mut b = build(Status::Done);
        b.timestamp = "n/a".into();
        assert_eq!(b.display_time(), "n/a");
    }

    #[test]
    fn terminal_build_with_running_step_needs_refresh() {
        let mut b = build(Status::Done);
        assert!(!b.needs_refresh());
        b.steps.push(step(Status::Running));
        assert!(b.needs_refresh());
    }

    #[test]
    fn merge_summary_keeps_loaded_steps() {
        let mut b = build(Status::Running);
        b.steps.push(step(Status::Running));
        b.services.push(Service {
            name: "postgres".into(),
            output: LogBuffer::from_log("ready\n"),
        });
        b.detail_loaded = true;
        b.selected = true;
        let mut incoming = build(Status::Done);
        incoming.success = true;
        b.merge_summary(incoming);
        assert_eq!(b.status, Status::Done);
        assert!(b.success);
        assert_eq!(b.steps.len(), 1);
        assert_eq!(b.services.len(), 1);
        assert!(b.selected);
    }

    #[test]
    fn log_buffer_counts_visible_chars() {
        let mut buffer = LogBuffer::from_log("\x1b[31mab\x1b[0m\nc");
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.line_count(), 2);
        buffer.append(ansi::convert_all("d\n"));
        assert_eq!(buffer.visible_text(), "ab\ncd\n");
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.line_count(), 2);
    }
}
