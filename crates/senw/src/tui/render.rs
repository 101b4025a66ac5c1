use crate::app::{AppState, NARROW_WIDTH_THRESHOLD};
use crate::tui::{footer, header, log_pane, tree};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Frame;
use senw_core::EngineState;

struct Areas {
    header: Rect,
    tree: Rect,
    log: Option<Rect>,
    footer: Rect,
}

fn layout(area: Rect) -> Areas {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // header
            Constraint::Min(1),    // body
            Constraint::Length(2), // footer
        ])
        .split(area);

    let (tree, log) = if area.width < NARROW_WIDTH_THRESHOLD {
        (chunks[1], None)
    } else {
        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(chunks[1]);
        (body[0], Some(body[1]))
    };

    Areas {
        header: chunks[0],
        tree,
        log,
        footer: chunks[2],
    }
}

/// Rows of log text visible at `area`, used as the page size for PgUp/PgDn.
pub fn log_page_height(area: Rect) -> usize {
    layout(area)
        .log
        .map_or(0, |log| log.height.saturating_sub(1) as usize)
}

pub fn render(f: &mut Frame, state: &AppState, engine: &EngineState) {
    let areas = layout(f.area());

    header::render(f, areas.header, state, engine);
    tree::render(f, areas.tree, state, engine);
    if let Some(log) = areas.log {
        log_pane::render(f, log, state, engine);
    }
    footer::render(f, areas.footer, state);

    if let Some(err) = state.error_message() {
        let area = f.area();
        if area.height > 6 && area.width >= 4 {
            let err_area = Rect {
                x: area.x + 1,
                y: area.y + area.height.saturating_sub(5),
                width: area.width.saturating_sub(2),
                height: 3,
            };
            let err_widget = Paragraph::new(err.to_owned())
                .style(Style::default().fg(Color::Red))
                .block(
                    Block::default()
                        .title(" Error ")
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(Color::Red)),
                )
                .wrap(Wrap { trim: true });
            f.render_widget(err_widget, err_area);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    #[test]
    fn narrow_terminal_hides_log_pane() {
        assert_eq!(log_page_height(Rect::new(0, 0, 40, 30)), 0);
        assert_eq!(log_page_height(Rect::new(0, 0, 120, 30)), 25);
    }

    #[test]
    fn renders_empty_state_and_error() {
        let mut terminal = Terminal::new(TestBackend::new(100, 20)).unwrap();
        let mut state = AppState::new("http://localhost:8080".into(), false);
        state.set_error("Server returned 500".into());
        let engine = EngineState::default();
        terminal.draw(|f| render(f, &state, &engine)).unwrap();

        let buffer = terminal.backend().buffer();
        let text: String = buffer.content().iter().map(|c| c.symbol()).collect();
        assert!(text.contains("senw"));
        assert!(text.contains("No repositories on this server"));
        assert!(text.contains("Select a step"));
        assert!(text.contains("Server returned 500"));
    }
}
