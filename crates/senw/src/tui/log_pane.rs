//! Output of the selected step.
//!
//! The engine hands out styled [`Segment`]s; this module maps their styles onto ratatui and
//! splits them into lines. The view follows the tail unless the user scrolled up.

use crate::app::AppState;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;
use senw_core::ansi::{self, Segment};
use senw_core::{EngineState, StreamIndicator};

pub fn render(f: &mut Frame, area: Rect, state: &AppState, engine: &EngineState) {
    let Some(step) = engine.selected_step() else {
        let hint = Paragraph::new(" Select a step to view its output")
            .style(Style::default().fg(Color::DarkGray));
        f.render_widget(hint, area);
        return;
    };

    let inner_height = area.height.saturating_sub(1) as usize;
    let lines = segments_to_lines(step.output.segments());
    let total = lines.len();
    let end = total.saturating_sub(state.log_scroll.min(total.saturating_sub(inner_height)));
    let start = end.saturating_sub(inner_height);

    let position = if total > inner_height {
        format!(" [{}-{}/{}]", start + 1, end, total)
    } else {
        String::new()
    };
    let follow = if state.is_following_log() && *engine.stream() == StreamIndicator::Live {
        " ⇣"
    } else {
        ""
    };

    let block = Block::default()
        .title(Line::from(vec![
            Span::styled(
                format!(" {} ", step.name),
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ),
            Span::styled(position, Style::default().fg(Color::DarkGray)),
            Span::styled(follow, Style::default().fg(Color::Green)),
        ]))
        .borders(Borders::TOP)
        .border_style(Style::default().fg(Color::DarkGray));

    let visible: Vec<Line> = lines.into_iter().skip(start).take(end - start).collect();
    f.render_widget(Paragraph::new(visible).block(block), area);
}

/// Number of rendered lines in the selected step's output.
pub fn line_count(engine: &EngineState) -> usize {
    engine
        .selected_step()
        .map_or(0, |step| step.output.line_count())
}

pub fn segments_to_lines(segments: &[Segment]) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let mut current: Vec<Span<'static>> = Vec::new();
    for segment in segments {
        match segment {
            Segment::Text { text, style } => {
                current.push(Span::styled(text.clone(), to_style(*style)));
            }
            Segment::Break => lines.push(Line::from(std::mem::take(&mut current))),
        }
    }
    if !current.is_empty() {
        lines.push(Line::from(current));
    }
    lines
}

fn to_color(color: ansi::Color) -> Color {
    match color {
        ansi::Color::Indexed(n) => Color::Indexed(n),
        ansi::Color::Rgb(r, g, b) => Color::Rgb(r, g, b),
    }
}

fn to_style(style: ansi::Style) -> Style {
    let mut out = Style::default();
    if let Some(fg) = style.fg {
        out = out.fg(to_color(fg));
    }
    if let Some(bg) = style.bg {
        out = out.bg(to_color(bg));
    }
    if style.bold {
        out = out.add_modifier(Modifier::BOLD);
    }
    if style.faint {
        out = out.add_modifier(Modifier::DIM);
    }
    if style.italic {
        out = out.add_modifier(Modifier::ITALIC);
    }
    if style.underline {
        out = out.add_modifier(Modifier::UNDERLINED);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use senw_core::ansi::convert_all;

    fn plain(lines: &[Line<'_>]) -> Vec<String> {
        lines
            .iter()
            .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect()
    }

    #[test]
    fn breaks_split_lines() {
        let lines = segments_to_lines(&convert_all("one\ntwo\nthree"));
        assert_eq!(plain(&lines), vec!["one", "two", "three"]);
    }

    #[test]
    fn trailing_break_adds_no_empty_line() {
        let lines = segments_to_lines(&convert_all("one\n"));
        assert_eq!(plain(&lines), vec!["one"]);
    }

    #[test]
    fn blank_lines_survive() {
        let lines = segments_to_lines(&convert_all("a\n\nb"));
        assert_eq!(plain(&lines), vec!["a", "", "b"]);
    }

    #[test]
    fn sgr_colour_maps_to_indexed() {
        let lines = segments_to_lines(&convert_all("\x1b[1;31mFAIL\x1b[0m ok"));
        let fail = &lines[0].spans[0];
        assert_eq!(fail.content, "FAIL");
        assert_eq!(fail.style.fg, Some(Color::Indexed(1)));
        assert!(fail.style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(lines[0].spans[1].style, Style::default());
    }

    #[test]
    fn truecolor_maps_to_rgb() {
        let lines = segments_to_lines(&convert_all("\x1b[38;2;10;20;30mx"));
        assert_eq!(lines[0].spans[0].style.fg, Some(Color::Rgb(10, 20, 30)));
    }
}
