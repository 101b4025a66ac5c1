//! Animated multi-phase startup screen.
//!
//! Each phase (contact server, load repositories, open the requested repository) is driven
//! by `tokio::select!` against an 80ms spinner tick, so the animation keeps moving during slow
//! network calls.

use crate::tui::spinner;
use color_eyre::eyre::{eyre, Report, Result};
use ratatui::backend::Backend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Terminal;
use senw_core::EntityStore;
use std::future::Future;
use std::time::Duration;

const SENW_ASCII_ART: &[&str] = &[
    r"  ███████╗███████╗███╗   ██╗██╗    ██╗",
    r"  ██╔════╝██╔════╝████╗  ██║██║    ██║",
    r"  ███████╗█████╗  ██╔██╗ ██║██║ █╗ ██║",
    r"  ╚════██║██╔══╝  ██║╚██╗██║██║███╗██║",
    r"  ███████║███████╗██║ ╚████║╚███╔███╔╝",
    r"  ╚══════╝╚══════╝╚═╝  ╚═══╝ ╚══╝╚══╝ ",
];

/// Interpolate a 2-stop gradient: Amber -> Teal across `total_lines`.
fn gradient_color(line_idx: usize, total_lines: usize) -> Color {
    if total_lines <= 1 {
        return Color::Rgb(255, 176, 0);
    }
    let t = line_idx as f64 / (total_lines - 1) as f64;
    let lerp = |from: f64, to: f64| (from + (to - from) * t) as u8;
    Color::Rgb(lerp(255.0, 0.0), lerp(176.0, 168.0), lerp(0.0, 150.0))
}

#[derive(Clone)]
enum PhaseStatus {
    InProgress,
    Done,
    Failed(String),
}

#[derive(Clone)]
struct StartupPhase {
    label: String,
    detail: Option<String>,
    status: PhaseStatus,
}

fn render_startup<B: Backend>(terminal: &mut Terminal<B>, phases: &[StartupPhase], frame: usize) {
    if let Err(e) = terminal.draw(|f| {
        let area = f.area();
        let art_height = SENW_ASCII_ART.len() as u16;
        let total_lines = art_height + 1 + phases.len() as u16;
        let top_offset = (area.height.saturating_sub(total_lines) / 2).saturating_sub(4);
        let vertical = Layout::vertical([
            Constraint::Length(top_offset),
            Constraint::Length(total_lines),
            Constraint::Min(0),
        ])
        .split(area);

        let mut lines: Vec<Line> = SENW_ASCII_ART
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let color = gradient_color(i, SENW_ASCII_ART.len());
                Line::from(Span::styled(*line, Style::default().fg(color)))
            })
            .collect();

        lines.push(Line::from(""));

        lines.extend(phases.iter().map(|phase| {
            let (icon, icon_style) = match &phase.status {
                PhaseStatus::InProgress => (
                    spinner::frame(frame).to_string(),
                    Style::default().fg(Color::Yellow),
                ),
                PhaseStatus::Done => ("\u{2713}".to_string(), Style::default().fg(Color::Green)),
                PhaseStatus::Failed(_) => ("\u{2717}".to_string(), Style::default().fg(Color::Red)),
            };

            let mut spans = vec![
                Span::styled(format!("  {icon} "), icon_style),
                Span::styled(&phase.label, Style::default().fg(Color::White)),
            ];

            if let Some(detail) = &phase.detail {
                spans.push(Span::raw("  "));
                spans.push(Span::styled(detail, Style::default().fg(Color::DarkGray)));
            }

            if let PhaseStatus::Failed(msg) = &phase.status {
                spans.push(Span::raw("  "));
                spans.push(Span::styled(msg, Style::default().fg(Color::Red)));
            }

            Line::from(spans)
        }));

        f.render_widget(Paragraph::new(lines), vertical[1]);
    }) {
        tracing::warn!("startup render failed: {e}");
    }
}

async fn run_phase<B, F, T>(
    terminal: &mut Terminal<B>,
    phases: &mut Vec<StartupPhase>,
    label: &str,
    fut: F,
) -> Result<T>
where
    B: Backend,
    F: Future<Output = Result<T>>,
{
    phases.push(StartupPhase {
        label: label.to_string(),
        detail: None,
        status: PhaseStatus::InProgress,
    });
    render_startup(terminal, phases, 0);

    let mut ticker = tokio::time::interval(Duration::from_millis(80));
    let mut frame = 0usize;
    tokio::pin!(fut);

    loop {
        tokio::select! {
            result = &mut fut => {
                let idx = phases.len() - 1;
                match &result {
                    Ok(_) => phases[idx].status = PhaseStatus::Done,
                    Err(e) => phases[idx].status = PhaseStatus::Failed(e.to_string()),
                }
                render_startup(terminal, phases, frame);
                return result;
            }
            _ = ticker.tick() => {
                frame += 1;
                render_startup(terminal, phases, frame);
            }
        }
    }
}

fn set_detail<B: Backend>(terminal: &mut Terminal<B>, phases: &mut [StartupPhase], detail: String) {
    if let Some(phase) = phases.last_mut() {
        phase.detail = Some(detail);
    }
    render_startup(terminal, phases, 0);
}

/// Contacts the server, loads the repository list and, if `repo_arg` names one, selects it
/// and waits for its build list. Only the first two phases are fatal.
pub async fn run_startup<B: Backend>(
    terminal: &mut Terminal<B>,
    store: &mut EntityStore,
    server: &str,
    repo_arg: Option<&str>,
) -> Result<()> {
    let mut phases: Vec<StartupPhase> = Vec::new();

    let probe = store.check_server();
    run_phase(terminal, &mut phases, "Contacting server", async move {
        probe.await.map_err(|e| eyre!("{server}: {e}"))
    })
    .await?;

    run_phase(terminal, &mut phases, "Loading repositories", async {
        store.load_repositories().await.map_err(Report::from)
    })
    .await?;
    let count = store.state().repos().len();
    set_detail(terminal, &mut phases, format!("{count} repositories"));

    let Some(slug) = repo_arg else {
        return Ok(());
    };

    let label = format!("Opening {slug}");
    let result = run_phase(terminal, &mut phases, &label, async {
        let id = store
            .state()
            .repos()
            .iter()
            .find(|r| r.slug() == slug)
            .map(|r| r.id.clone())
            .ok_or_else(|| eyre!("no repository named {slug}"))?;
        store.select_repository(&id)?;
        store.pump().await;
        Ok::<_, Report>(store.state().builds().len())
    })
    .await;

    match result {
        Ok(builds) => set_detail(terminal, &mut phases, format!("{builds} builds")),
        Err(e) => {
            // Non-fatal: the repository list is still usable.
            tracing::warn!("could not open {slug}: {e}");
            if let Some(phase) = phases.last_mut() {
                phase.status = PhaseStatus::Done;
            }
            set_detail(terminal, &mut phases, "(skipped)".to_string());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn gradient_endpoints() {
        assert_eq!(gradient_color(0, 6), Color::Rgb(255, 176, 0));
        assert_eq!(gradient_color(5, 6), Color::Rgb(0, 168, 150));
        assert_eq!(gradient_color(0, 1), Color::Rgb(255, 176, 0));
    }

    #[test]
    fn art_lines_share_width() {
        use unicode_width::UnicodeWidthStr;
        let width = SENW_ASCII_ART[0].width();
        assert!(SENW_ASCII_ART.iter().all(|l| l.width() == width));
    }
}
