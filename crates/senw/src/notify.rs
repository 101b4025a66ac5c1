use crate::app::FinishedBuild;
use notify_rust::{Notification, Urgency};

/// Pops a desktop notification for a finished build. Returns the error text on failure.
pub fn send_desktop(build: &FinishedBuild) -> Option<String> {
    let (summary, icon, urgency) = if build.success {
        ("Build passed", "dialog-information", Urgency::Normal)
    } else {
        ("Build failed", "dialog-error", Urgency::Critical)
    };

    Notification::new()
        .summary(summary)
        .body(&format!("{} #{}", build.repo, build.number))
        .icon(icon)
        .urgency(urgency)
        .show()
        .err()
        .map(|e| format!("Desktop notification failed: {e}"))
}
