use senw::app::{AppState, FinishedBuild, TreeLevel};
use senw::cli::{self, Cli};
use senw::events::{AppEvent, EventHandler};
use senw::input::{self, Action, InputContext};
use senw::tui;

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use crossterm::execute;
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen, SetTitle};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Rect;
use ratatui::Terminal;
use senw_core::ansi::Segment;
use senw_core::{Change, EntityStore, Topic};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

fn setup_verbose_logging() -> Result<()> {
    let state_dir = dirs_next_or_fallback();
    std::fs::create_dir_all(&state_dir)
        .map_err(|e| eyre!("Failed to create log directory {state_dir:?}: {e}"))?;
    let log_path = state_dir.join("debug.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| eyre!("Failed to open log file {log_path:?}: {e}"))?;
    tracing_subscriber::fmt()
        .with_writer(file)
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .init();
    tracing::info!(
        "senw v{} starting with verbose logging",
        env!("CARGO_PKG_VERSION")
    );
    Ok(())
}

fn dirs_next_or_fallback() -> std::path::PathBuf {
    if let Some(state) = std::env::var_os("XDG_STATE_HOME") {
        std::path::PathBuf::from(state).join("senw")
    } else if let Some(home) = std::env::var_os("HOME") {
        std::path::PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("senw")
    } else {
        std::path::PathBuf::from("/tmp/senw")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    if args.verbose {
        setup_verbose_logging()?;
    }

    if let Some(repo) = &args.repo {
        cli::validate_repo_format(repo).map_err(|e| eyre!(e))?;
    }
    let config = args.engine_config()?;
    let mut store = EntityStore::connect(&config)?;

    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        if let Err(e) = terminal::disable_raw_mode() {
            eprintln!("Failed to disable raw mode during panic: {e}");
        }
        if let Err(e) = execute!(io::stdout(), LeaveAlternateScreen, SetTitle("")) {
            eprintln!("Failed to leave alternate screen during panic: {e}");
        }
        original_hook(panic_info);
    }));

    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    if let Err(e) = tui::startup::run_startup(
        &mut terminal,
        &mut store,
        config.base_url.as_str(),
        args.repo.as_deref(),
    )
    .await
    {
        terminal::disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen, SetTitle(""))?;
        terminal.show_cursor()?;
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    execute!(
        io::stdout(),
        SetTitle(format!("senw {}", config.base_url.as_str()))
    )?;

    let mut state = AppState::new(config.base_url.to_string(), !args.no_notify);
    state.rebuild_tree(store.state());
    state.finished_builds(store.state());
    if let Some(id) = store.state().selected_repo_id() {
        state.focus(TreeLevel::Repo, id);
    }

    let events = EventHandler::new(Duration::from_millis(100));
    let tx = events.sender();

    for topic in [Topic::Repos, Topic::Builds, Topic::Build, Topic::Log] {
        let tx = tx.clone();
        store.on_change(topic, move |change, _| {
            if tx.send(AppEvent::Changed(change.clone())).is_err() {
                tracing::debug!("ui channel closed, dropping {} change", change.topic().as_str());
            }
        });
    }

    let result = run_app(&mut terminal, &mut state, &mut store, events, &tx).await;

    store.shutdown();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, SetTitle(""))?;
    terminal.show_cursor()?;

    result
}

/// Visible height of the log pane. Must stay in sync with `tui::render::render`.
fn log_page_height(terminal: &Terminal<CrosstermBackend<io::Stdout>>) -> usize {
    match terminal.size() {
        Ok(size) => tui::render::log_page_height(Rect::new(0, 0, size.width, size.height)),
        Err(e) => {
            tracing::warn!("terminal size query failed: {e}");
            20
        }
    }
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: &mut AppState,
    store: &mut EntityStore,
    mut events: EventHandler,
    tx: &UnboundedSender<AppEvent>,
) -> Result<()> {
    loop {
        terminal.draw(|f| tui::render::render(f, state, store.state()))?;

        state.prune_notifications();
        state.prune_error();

        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                match event {
                    AppEvent::Key(key) => {
                        let ctx = InputContext {
                            has_error: state.error_message().is_some(),
                        };
                        let action = input::map_key(key, &ctx);
                        handle_action(action, terminal, state, store).await;
                    }
                    AppEvent::Tick => state.advance_spinner(),
                    AppEvent::Changed(change) => handle_change(&change, state, store, tx),
                    AppEvent::Error(msg) => state.set_error(msg),
                }
            }
            Some(event) = store.next_event() => store.apply(event),
        }

        if state.should_quit {
            break;
        }
    }

    events.stop();
    Ok(())
}

async fn handle_action(
    action: Action,
    terminal: &Terminal<CrosstermBackend<io::Stdout>>,
    state: &mut AppState,
    store: &mut EntityStore,
) {
    match action {
        Action::Quit => state.should_quit = true,
        Action::DismissError => state.clear_error(),
        Action::MoveUp => state.move_cursor_up(),
        Action::MoveDown => state.move_cursor_down(),
        Action::Select => {
            let Some(row) = state.current_row().cloned() else {
                return;
            };
            let result = match row.level {
                TreeLevel::Repo => store.select_repository(&row.id),
                TreeLevel::Build => store.select_build(&row.id),
                TreeLevel::Step => {
                    state.follow_log_tail();
                    store.select_step(&row.id)
                }
            };
            if let Err(e) = result {
                state.set_error(e.to_string());
            }
            state.rebuild_tree(store.state());
        }
        Action::Refresh => {
            if store.state().selected_repo_id().is_some() {
                store.refresh();
            } else if let Err(e) = store.load_repositories().await {
                // Already surfaced through the bus as a FetchFailed change.
                tracing::warn!("repository reload failed: {e}");
            }
        }
        Action::ScrollUp => {
            let total = tui::log_pane::line_count(store.state());
            state.scroll_log_up(1, total, log_page_height(terminal));
        }
        Action::ScrollDown => state.scroll_log_down(1),
        Action::PageUp => {
            let total = tui::log_pane::line_count(store.state());
            let page = log_page_height(terminal);
            state.scroll_log_up(page.max(1), total, page);
        }
        Action::PageDown => state.scroll_log_down(log_page_height(terminal).max(1)),
        Action::ScrollToTop => {
            let total = tui::log_pane::line_count(store.state());
            state.scroll_log_to_top(total, log_page_height(terminal));
        }
        Action::FollowTail => state.follow_log_tail(),
        Action::None => {}
    }
}

fn handle_change(
    change: &Change,
    state: &mut AppState,
    store: &EntityStore,
    tx: &UnboundedSender<AppEvent>,
) {
    match change {
        Change::FetchFailed { topic, error } => {
            state.set_error(format!("Failed to load {}: {error}", topic.as_str()));
        }
        Change::LogAppended { step_id, segments } => {
            // Keep a scrolled-back view anchored while new lines arrive below it.
            let selected = store.state().selected_step_id() == Some(step_id.as_str());
            if selected && !state.is_following_log() {
                state.log_scroll += segments
                    .iter()
                    .filter(|s| matches!(s, Segment::Break))
                    .count();
            }
        }
        _ => {}
    }

    state.rebuild_tree(store.state());

    if matches!(change.topic(), Topic::Builds | Topic::Build) {
        for finished in state.finished_builds(store.state()) {
            announce(state, tx, finished);
        }
    }
}

fn announce(state: &mut AppState, tx: &UnboundedSender<AppEvent>, finished: FinishedBuild) {
    let verdict = if finished.success { "passed" } else { "failed" };
    tracing::info!("{} #{} {verdict}", finished.repo, finished.number);
    state.add_notification(format!("{} #{} {verdict}", finished.repo, finished.number));

    #[cfg(feature = "desktop-notify")]
    {
        if state.desktop_notify {
            send_desktop_notification(tx.clone(), finished);
        }
    }
    #[cfg(not(feature = "desktop-notify"))]
    {
        let _ = tx;
    }
}

#[cfg(feature = "desktop-notify")]
fn send_desktop_notification(tx: UnboundedSender<AppEvent>, finished: FinishedBuild) {
    tokio::task::spawn_blocking(move || {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            senw::notify::send_desktop(&finished)
        }));
        match result {
            Ok(Some(err)) => {
                if tx.send(AppEvent::Error(err)).is_err() {
                    tracing::warn!("notify: channel closed");
                }
            }
            Err(panic_payload) => {
                let msg = panic_payload
                    .downcast::<String>()
                    .map(|s| *s)
                    .unwrap_or_else(|p| {
                        p.downcast::<&str>()
                            .map(|s| (*s).to_string())
                            .unwrap_or_else(|_| "unknown panic".to_string())
                    });
                tracing::error!("notify panicked: {msg}");
                if tx
                    .send(AppEvent::Error(format!("Notification crashed: {msg}")))
                    .is_err()
                {
                    tracing::warn!("notify: channel closed");
                }
            }
            Ok(None) => {}
        }
    });
}
