use crate::app::{truncate, AppState, NARROW_WIDTH_THRESHOLD};
use crate::tui::spinner;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;
use senw_core::{EngineState, StreamIndicator};

pub fn render(f: &mut Frame, area: Rect, state: &AppState, engine: &EngineState) {
    let narrow = area.width < NARROW_WIDTH_THRESHOLD;

    let mut spans = vec![
        Span::styled(
            format!(" senw {} ", state.version_string),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("│ "),
    ];

    if !narrow {
        spans.push(Span::styled(
            state.server.as_str(),
            Style::default().fg(Color::DarkGray),
        ));
        spans.push(Span::raw(" "));
    }

    if let Some(repo) = engine.selected_repository() {
        spans.push(Span::styled(
            repo.slug(),
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ));
    }

    spans.push(Span::raw(" "));
    spans.extend(stream_spans(engine.stream(), state.spinner_frame, narrow));

    if state.error_message().is_some() {
        spans.push(Span::raw(" "));
        spans.push(Span::styled(
            "!",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    }

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::BOTTOM)
            .border_style(Style::default().fg(Color::DarkGray)),
    );

    f.render_widget(header, area);
}

fn stream_spans(indicator: &StreamIndicator, frame: usize, narrow: bool) -> Vec<Span<'static>> {
    match indicator {
        StreamIndicator::Idle => Vec::new(),
        StreamIndicator::Connecting => vec![Span::styled(
            format!("{} connecting", spinner::frame(frame)),
            Style::default().fg(Color::Yellow),
        )],
        StreamIndicator::Live => vec![Span::styled(
            "● live",
            Style::default().fg(Color::Green),
        )],
        StreamIndicator::Disconnected { reason } => {
            let text = if narrow {
                "○ disconnected".to_string()
            } else {
                format!("○ disconnected: {}", truncate(reason, 40))
            };
            vec![Span::styled(text, Style::default().fg(Color::Red))]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(spans: &[Span<'_>]) -> String {
        spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn idle_shows_nothing() {
        assert!(stream_spans(&StreamIndicator::Idle, 0, false).is_empty());
    }

    #[test]
    fn live_and_disconnected_labels() {
        assert_eq!(text(&stream_spans(&StreamIndicator::Live, 0, false)), "● live");
        let gone = StreamIndicator::Disconnected {
            reason: "closed by server".into(),
        };
        assert_eq!(
            text(&stream_spans(&gone, 0, false)),
            "○ disconnected: closed by server"
        );
        assert_eq!(text(&stream_spans(&gone, 0, true)), "○ disconnected");
    }
}
