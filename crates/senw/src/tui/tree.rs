use crate::app::{build_age, truncate, AppState, TreeLevel, TreeRow, NARROW_WIDTH_THRESHOLD};
use crate::tui::spinner;
use chrono::Utc;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;
use senw_core::model::{Build, Repository, Step};
use senw_core::status::{Icon, Signal, StyleClass};
use senw_core::EngineState;
use unicode_width::UnicodeWidthStr;

pub fn render(f: &mut Frame, area: Rect, state: &AppState, engine: &EngineState) {
    let narrow = area.width < NARROW_WIDTH_THRESHOLD;
    let inner_width = area.width.saturating_sub(1) as usize;

    if state.rows.is_empty() {
        let para = Paragraph::new("No repositories on this server")
            .style(Style::default().fg(Color::DarkGray))
            .block(Block::default().borders(Borders::NONE));
        f.render_widget(para, area);
        return;
    }

    let visible_height = area.height as usize;
    let scroll_offset = if state.cursor >= visible_height {
        state.cursor - visible_height + 1
    } else {
        0
    };

    let lines: Vec<Line> = state
        .rows
        .iter()
        .enumerate()
        .skip(scroll_offset)
        .take(visible_height)
        .map(|(i, row)| {
            let is_cursor = i == state.cursor;
            render_row(row, engine, state.spinner_frame, is_cursor, narrow, inner_width)
        })
        .collect();

    let tree = Paragraph::new(lines).block(Block::default().borders(Borders::RIGHT).border_style(
        Style::default().fg(Color::DarkGray),
    ));
    f.render_widget(tree, area);
}

fn render_row(
    row: &TreeRow,
    engine: &EngineState,
    frame: usize,
    is_cursor: bool,
    narrow: bool,
    width: usize,
) -> Line<'static> {
    let line = match row.level {
        TreeLevel::Repo => engine
            .repository(&row.id)
            .map(|repo| repo_line(repo, engine.selected_repo_id() == Some(repo.id.as_str()), width)),
        TreeLevel::Build => engine
            .build(&row.id)
            .map(|build| build_line(build, frame, narrow, width)),
        TreeLevel::Step => engine
            .selected_build()
            .and_then(|b| b.step(&row.id))
            .map(|step| step_line(step, frame, width)),
    };
    let line = line.unwrap_or_default();
    if is_cursor {
        line.style(Style::default().bg(Color::DarkGray))
    } else {
        line
    }
}

/// Glyph and colour for a status signal. Running entities animate.
fn signal_icon(signal: Signal, frame: usize) -> (&'static str, Color) {
    let glyph = match signal.icon {
        Icon::Hourglass => spinner::hourglass(frame),
        icon => icon.glyph(),
    };
    let color = match (signal.icon, signal.style) {
        (Icon::Hourglass, _) => Color::Yellow,
        (_, StyleClass::Success) => Color::Green,
        (_, StyleClass::Danger) => Color::Red,
        (_, StyleClass::Muted) => Color::DarkGray,
    };
    (glyph, color)
}

fn selected_style(selected: bool) -> Style {
    if selected {
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    }
}

fn repo_line(repo: &Repository, expanded: bool, width: usize) -> Line<'static> {
    let arrow = if expanded { "▼ " } else { "▶ " };
    let name = truncate(&repo.slug(), width.saturating_sub(arrow.width()));
    Line::from(vec![
        Span::styled(arrow, Style::default().fg(Color::DarkGray)),
        Span::styled(name, selected_style(expanded)),
    ])
}

fn build_line(build: &Build, frame: usize, narrow: bool, width: usize) -> Line<'static> {
    let (glyph, color) = signal_icon(build.signal(), frame);
    let mut spans = vec![
        Span::raw("  "),
        Span::styled(format!("{glyph} "), Style::default().fg(color)),
        Span::styled(format!("#{}", build.number), selected_style(build.selected)),
    ];
    let mut used = 4 + format!("#{}", build.number).width();

    if narrow {
        if let Some(age) = build_age(build, Utc::now()) {
            let age = format!("  {age}");
            used += age.width();
            spans.push(Span::styled(age, Style::default().fg(Color::DarkGray)));
        }
    } else {
        let time = format!("  {}", build.display_time());
        used += time.width();
        spans.push(Span::styled(time, Style::default().fg(Color::DarkGray)));
        if !build.duration.is_empty() {
            let duration = format!("  {}", build.duration);
            used += duration.width();
            spans.push(Span::styled(duration, Style::default().fg(Color::DarkGray)));
        }
    }

    if let Some(author) = build.committers.first() {
        let room = width.saturating_sub(used + 2);
        if room > 3 {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(
                truncate(author, room),
                Style::default().fg(Color::Magenta),
            ));
        }
    }
    Line::from(spans)
}

fn step_line(step: &Step, frame: usize, width: usize) -> Line<'static> {
    let (glyph, color) = signal_icon(step.signal(), frame);
    let exit = match step.exit_code {
        Some(code) if step.is_terminal() && code != 0 => format!(" (exit {code})"),
        _ => String::new(),
    };
    let name = truncate(&step.name, width.saturating_sub(6 + exit.width()));
    Line::from(vec![
        Span::raw("    "),
        Span::styled(format!("{glyph} "), Style::default().fg(color)),
        Span::styled(name, selected_style(step.selected)),
        Span::styled(exit, Style::default().fg(Color::Red)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use senw_core::status::classify;

    #[test]
    fn success_and_failure_colours() {
        assert_eq!(signal_icon(classify("Done", Some(true)), 0), ("✓", Color::Green));
        assert_eq!(signal_icon(classify("done", Some(false)), 0), ("✗", Color::Red));
    }

    #[test]
    fn running_animates_in_yellow() {
        let (glyph, color) = signal_icon(classify("Running", None), 0);
        assert_eq!(color, Color::Yellow);
        assert_eq!(glyph, spinner::hourglass(0));
    }

    #[test]
    fn unknown_status_is_muted() {
        let (_, color) = signal_icon(classify("Exploded", None), 0);
        assert_eq!(color, Color::DarkGray);
    }
}
