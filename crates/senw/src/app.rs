use chrono::{DateTime, Utc};
use senw_core::model::{Build, Repository};
use senw_core::status::Status;
use senw_core::EngineState;
use std::collections::HashMap;

/// Format a duration in seconds as a human-readable string (e.g. "5s", "2m 30s", "1h 5m").
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Time since the build's timestamp, e.g. "5m 3s ago". `None` if the timestamp doesn't parse.
pub fn build_age(build: &Build, now: DateTime<Utc>) -> Option<String> {
    let ts = build.parsed_timestamp()?;
    Some(format!(
        "{} ago",
        format_duration(now.signed_duration_since(ts).num_seconds())
    ))
}

/// Truncate a string to fit within `max_width` display columns, appending '…' if truncated.
pub fn truncate(s: &str, max_width: usize) -> String {
    use unicode_width::UnicodeWidthStr;
    if max_width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(s) <= max_width {
        return s.to_string();
    }
    let mut result = String::new();
    let mut width = 0;
    for c in s.chars() {
        let cw = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw + 1 > max_width {
            result.push('\u{2026}');
            break;
        }
        result.push(c);
        width += cw;
    }
    result
}

pub const NOTIFICATION_TTL_SECS: u64 = 5;
pub const ERROR_TTL_SECS: u64 = 10;
pub const SPINNER_FRAME_COUNT: usize = 10;
/// Below this width the log pane is hidden and the tree takes the whole body.
pub const NARROW_WIDTH_THRESHOLD: u16 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeLevel {
    Repo,
    Build,
    Step,
}

/// One visible line of the navigation tree. Holds ids, never data; resolve against the
/// current [`EngineState`] at render time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRow {
    pub level: TreeLevel,
    pub id: String,
}

impl TreeRow {
    fn new(level: TreeLevel, id: &str) -> Self {
        Self {
            level,
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub message: String,
    pub timestamp: std::time::Instant,
}

/// A build that went from running to `Done` while being watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedBuild {
    pub repo: String,
    pub number: u64,
    pub success: bool,
}

pub struct AppState {
    pub version_string: String,
    pub server: String,
    pub cursor: usize,
    pub rows: Vec<TreeRow>,
    /// Lines scrolled up from the bottom of the log pane; 0 follows the tail.
    pub log_scroll: usize,
    pub spinner_frame: usize,
    pub should_quit: bool,
    pub notifications: Vec<Notification>,
    pub desktop_notify: bool,
    error: Option<(String, std::time::Instant)>,
    known_status: HashMap<(String, String), Status>,
}

impl AppState {
    pub fn new(server: String, desktop_notify: bool) -> Self {
        Self {
            version_string: format!("v{}", env!("CARGO_PKG_VERSION")),
            server,
            cursor: 0,
            rows: Vec::new(),
            log_scroll: 0,
            spinner_frame: 0,
            should_quit: false,
            notifications: Vec::new(),
            desktop_notify,
            error: None,
            known_status: HashMap::new(),
        }
    }

    /// Recomputes the visible rows and keeps the cursor on the row it was on, if still there.
    pub fn rebuild_tree(&mut self, state: &EngineState) {
        let current = self.current_row().cloned();
        let builds = state.builds_by_recency();
        self.rows = tree_rows(
            state.repos(),
            state.selected_repo_id(),
            &builds,
            state.selected_build(),
        );
        self.cursor = current
            .and_then(|row| self.rows.iter().position(|r| *r == row))
            .unwrap_or_else(|| self.cursor.min(self.rows.len().saturating_sub(1)));
    }

    pub fn current_row(&self) -> Option<&TreeRow> {
        self.rows.get(self.cursor)
    }

    /// Moves the cursor onto the row for `id` at `level`, if it is visible.
    pub fn focus(&mut self, level: TreeLevel, id: &str) {
        if let Some(pos) = self.rows.iter().position(|r| r.level == level && r.id == id) {
            self.cursor = pos;
        }
    }

    pub fn move_cursor_up(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
        }
    }

    pub fn move_cursor_down(&mut self) {
        if !self.rows.is_empty() && self.cursor < self.rows.len() - 1 {
            self.cursor += 1;
        }
    }

    /// Records the status of every build of the selected repository and returns those that
    /// just reached `Done`. Builds seen for the first time never count as finished.
    pub fn finished_builds(&mut self, state: &EngineState) -> Vec<FinishedBuild> {
        let Some(repo) = state.selected_repository() else {
            return Vec::new();
        };
        let mut finished = Vec::new();
        for build in state.builds() {
            let key = (repo.id.clone(), build.id.clone());
            let previous = self.known_status.insert(key, build.status);
            if previous.is_some_and(|s| !s.is_terminal()) && build.is_terminal() {
                finished.push(FinishedBuild {
                    repo: repo.slug(),
                    number: build.number,
                    success: build.success,
                });
            }
        }
        finished
    }

    pub fn add_notification(&mut self, message: String) {
        self.notifications.push(Notification {
            message,
            timestamp: std::time::Instant::now(),
        });
    }

    pub fn prune_notifications(&mut self) {
        let now = std::time::Instant::now();
        self.notifications
            .retain(|n| now.duration_since(n.timestamp).as_secs() < NOTIFICATION_TTL_SECS);
    }

    pub fn advance_spinner(&mut self) {
        self.spinner_frame = (self.spinner_frame + 1) % SPINNER_FRAME_COUNT;
    }

    pub fn set_error(&mut self, msg: String) {
        self.error = Some((msg, std::time::Instant::now()));
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn prune_error(&mut self) {
        if let Some((_, ts)) = &self.error {
            if ts.elapsed().as_secs() >= ERROR_TTL_SECS {
                self.error = None;
            }
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|(msg, _)| msg.as_str())
    }

    // --- Log pane scrolling ---

    pub fn scroll_log_up(&mut self, amount: usize, total_lines: usize, visible_height: usize) {
        let max_scroll = total_lines.saturating_sub(visible_height);
        self.log_scroll = (self.log_scroll + amount).min(max_scroll);
    }

    pub fn scroll_log_down(&mut self, amount: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(amount);
    }

    pub fn scroll_log_to_top(&mut self, total_lines: usize, visible_height: usize) {
        self.log_scroll = total_lines.saturating_sub(visible_height);
    }

    pub fn follow_log_tail(&mut self) {
        self.log_scroll = 0;
    }

    pub fn is_following_log(&self) -> bool {
        self.log_scroll == 0
    }
}

/// Repositories, with the builds of the selected one nested under it (most recent first),
/// and the steps of the selected build nested under that.
pub fn tree_rows(
    repos: &[Repository],
    selected_repo: Option<&str>,
    builds: &[&Build],
    selected_build: Option<&Build>,
) -> Vec<TreeRow> {
    let mut rows = Vec::new();
    for repo in repos {
        rows.push(TreeRow::new(TreeLevel::Repo, &repo.id));
        if selected_repo != Some(repo.id.as_str()) {
            continue;
        }
        for build in builds {
            rows.push(TreeRow::new(TreeLevel::Build, &build.id));
            if selected_build.is_some_and(|b| b.id == build.id) {
                rows.extend(
                    build
                        .steps
                        .iter()
                        .map(|step| TreeRow::new(TreeLevel::Step, &step.id)),
                );
            }
        }
    }
    rows
}
