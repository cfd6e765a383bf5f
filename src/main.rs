use clap::{error::ErrorKind, CommandFactory, Parser};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use devclass::{
    app::{App, AppAction},
    app_dirs::AppDirs,
    clock::{Clock, SystemClock},
    config::{ConfigStore, FileConfigStore},
    execution::{CodeExecutor, ProcessExecutor},
    format::format_countdown,
    exercise::{Exercise, ExerciseAuthority, ExerciseBank},
    runtime::{ChallengeEvent, CrosstermEventSource, EventSource, FixedTicker, Runner, Ticker},
    session::{ChallengeSession, Mode},
    store::{KeyValueStore, MemoryStore, SqliteStore},
    telemetry,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use std::{
    error::Error,
    io::{self, stdin},
    path::PathBuf,
};
use tracing::{info, warn};

/// timed coding challenges in the terminal
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Solve a coding exercise before the clock runs out. Running out of time locks new attempts for two hours, even across restarts."
)]
pub struct Cli {
    /// exercise to open (see --list)
    #[clap(short = 'e', long)]
    exercise: Option<String>,

    /// list bundled exercises and exit
    #[clap(long)]
    list: bool,

    /// print the current lockout status and exit
    #[clap(long)]
    status: bool,

    /// seconds allowed per attempt
    #[clap(long)]
    time_budget: Option<u64>,

    /// state database location
    #[clap(long)]
    db: Option<PathBuf>,

    /// remember an exercise as the default and exit
    #[clap(long, value_name = "ID")]
    set_default: Option<String>,
}

fn open_store(path: Option<&PathBuf>) -> Box<dyn KeyValueStore> {
    let opened = match path {
        Some(p) => SqliteStore::open(p),
        None => SqliteStore::open_default(),
    };

    match opened {
        Ok(store) => Box::new(store),
        Err(e) => {
            // Without durable storage the lockout only lasts for this process.
            warn!(error = %e, "state database unavailable, falling back to memory");
            Box::new(MemoryStore::new())
        }
    }
}

fn find_exercise(bank: &ExerciseBank, id: &str) -> Exercise {
    match bank.exercise(id) {
        Some(exercise) => exercise.clone(),
        None => {
            let mut cmd = Cli::command();
            cmd.error(
                ErrorKind::InvalidValue,
                format!("unknown exercise '{id}' (see --list)"),
            )
            .exit();
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if let Some(log_path) = AppDirs::log_path() {
        telemetry::init_tracing(&log_path);
    }

    let config_store = FileConfigStore::new();
    let mut config = config_store.load();
    let mut settings = config.session_settings();
    if let Some(secs) = cli.time_budget {
        settings.time_budget_secs = secs.max(1);
    }

    let bank = ExerciseBank::bundled()?;

    if cli.list {
        for exercise in bank.exercises() {
            println!("{:<16} {:<12} {}", exercise.id, exercise.language, exercise.title);
        }
        return Ok(());
    }

    if let Some(id) = cli.set_default.as_deref() {
        let exercise = find_exercise(&bank, id);
        config.default_exercise = Some(exercise.id.clone());
        config_store.save(&config)?;
        info!(exercise = %exercise.id, path = %config_store.path().display(), "default exercise saved");
        println!(
            "default exercise is now {} ({})",
            exercise.id,
            config_store.path().display()
        );
        return Ok(());
    }

    let store = open_store(cli.db.as_ref());

    if cli.status {
        let session = ChallengeSession::open(store, SystemClock, settings);
        let view = session.view();
        match view.mode {
            Mode::Locked => println!("locked, next attempt in {}", view.formatted_lock_countdown),
            _ => println!(
                "ready, {} per attempt",
                format_countdown(session.settings().time_budget_secs)
            ),
        }
        return Ok(());
    }

    let exercise = match cli.exercise.as_deref().or(config.default_exercise.as_deref()) {
        Some(id) => find_exercise(&bank, id),
        None => bank.first().clone(),
    };

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    enable_raw_mode()?;

    let events = CrosstermEventSource::new();
    let mut app = App::new(
        store,
        SystemClock,
        settings,
        bank,
        exercise,
        ProcessExecutor::with_timeout(config.run_timeout()),
        events.sender(),
    );

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let runner = Runner::new(events, FixedTicker::default());
    let result = start_tui(&mut terminal, &mut app, runner);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    info!(mode = %app.view().mode, "challenge closed");
    result
}

fn start_tui<B, S, C, X, E, T>(
    terminal: &mut Terminal<B>,
    app: &mut App<S, C, X>,
    mut runner: Runner<E, T>,
) -> Result<(), Box<dyn Error>>
where
    B: Backend,
    S: KeyValueStore,
    C: Clock,
    X: CodeExecutor,
    E: EventSource,
    T: Ticker,
{
    loop {
        terminal.draw(|f| f.render_widget(&*app, f.area()))?;

        match runner.step() {
            ChallengeEvent::Tick => {
                app.on_tick();
            }
            ChallengeEvent::Resize => {}
            ChallengeEvent::RunFinished(report) => app.on_run_finished(report),
            ChallengeEvent::Key(key) => {
                if app.on_key(key) == AppAction::Quit {
                    break;
                }
            }
        }
    }

    Ok(())
}
