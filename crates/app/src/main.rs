// Composition root: parses the command line, wires the adapters into the
// services and runs the terminal UI until the user quits

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, Event as TermEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use gitagrip::adapters::git::GitCommandRunner;
use gitagrip::adapters::persistence::FileConfigStore;
use gitagrip::cli::CliArgs;
use gitagrip::logging;
use gitagrip::services::app_service::AppService;
use gitagrip::tui::{TuiModel, TuiUpdate, TuiView};
use gitagrip_core::app::Coordinator;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long the UI waits for a key before pumping bus events again
const POLL_INTERVAL: Duration = Duration::from_millis(50);

type Tui = Terminal<CrosstermBackend<Stdout>>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    if let Err(err) = logging::init(&cwd) {
        // The alternate screen is not up yet, so this still reaches the user
        eprintln!("warning: logging disabled: {:#}", err);
    }

    let base_dir = args.resolve_base_dir()?;
    info!(base = %base_dir.display(), "starting GitaGrip");

    let config_store = Arc::new(FileConfigStore::for_base_dir(&base_dir));
    let loaded = config_store.load_or_init(&base_dir);
    if loaded.created {
        info!(path = %config_store.path().display(), "first run in this directory");
    }

    let cancel = CancellationToken::new();
    let mut service = AppService::new(
        loaded.config,
        args.settings(),
        Arc::new(GitCommandRunner::new()),
        config_store,
        cancel.clone(),
    )?;

    // Subscribe before anything is published so no scan event is missed
    let coordinator = Coordinator::new(
        service.bus(),
        service.repos(),
        service.groups(),
        service.coordinator_options(),
    );
    service.start(loaded.problem)?;

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received");
                cancel.cancel();
            }
        }
    });

    let mut terminal = setup_terminal()?;
    let mut model = TuiModel::new(coordinator);
    let result = tokio::task::block_in_place(|| run_ui(&mut model, &mut terminal, &cancel));

    if let Err(err) = restore_terminal(&mut terminal) {
        warn!("Failed to restore terminal: {:#}", err);
    }

    // Unsubscribes the coordinator before the bus stops
    drop(model);
    service.shutdown().await;

    if let Err(err) = &result {
        error!("Application error: {:#}", err);
    }
    info!("GitaGrip shut down cleanly");
    result
}

fn setup_terminal() -> Result<Tui> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    if let Err(err) = execute!(stdout, EnterAlternateScreen) {
        let _ = disable_raw_mode();
        return Err(err).context("Failed to enter the alternate screen");
    }
    Terminal::new(CrosstermBackend::new(stdout)).context("Failed to initialise the terminal")
}

fn restore_terminal(terminal: &mut Tui) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Main UI loop: drain bus events into the coordinator, redraw when the view
/// changed, and feed key presses back as intents
fn run_ui(model: &mut TuiModel, terminal: &mut Tui, cancel: &CancellationToken) -> Result<()> {
    let size = terminal.size()?;
    TuiUpdate::handle_resize(model, size.width, size.height);

    loop {
        if model.coordinator.pump(Instant::now()) {
            model.mark_dirty();
        }
        if model.needs_redraw() {
            terminal.draw(|frame| TuiView::render(model, frame))?;
            model.mark_drawn();
        }

        if model.should_quit() {
            info!("Quit requested, exiting main loop");
            return Ok(());
        }
        if cancel.is_cancelled() {
            info!("Cancelled, exiting main loop");
            return Ok(());
        }

        if event::poll(POLL_INTERVAL)? {
            match event::read()? {
                TermEvent::Key(key) if key.kind == KeyEventKind::Press => {
                    TuiUpdate::handle_key(model, key.code, key.modifiers, Instant::now());
                }
                TermEvent::Resize(width, height) => TuiUpdate::handle_resize(model, width, height),
                _ => {}
            }
        }
    }
}
