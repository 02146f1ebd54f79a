use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use resonant::{
    app::{Action, App},
    app_dirs::AppDirs,
    audio::{AudioGate, TerminalBell},
    config::{Config, ConfigStore, FileConfigStore, ShellConfig},
    logging,
    offline::{
        CacheVersion, InstallOutcome, PageMessage, ReqwestNetwork, Request, ShellController,
        ShellHandle, ShellService, SqliteCacheStorage, StorageError,
    },
    page::load_shell,
    pattern::{PatternCatalog, PatternId},
    runtime::{AppEvent, CrosstermEventSource, FixedTicker, Runner},
    ui::screen,
    CONFIG_RECHECK_SECS, TICK_RATE_MS,
};
use std::{
    error::Error,
    io::{self, stdin, Write},
    sync::{mpsc::Sender, Arc},
    time::{Duration, Instant},
};
use tokio::{runtime::Runtime, sync::broadcast::error::RecvError};
use url::Url;
use webbrowser::Browser;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// calm breathing timer tui with gentle chimes
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "A calm breathing timer for the terminal. Follow the circle through box, 4-7-8 or coherent breathing with a chime at every phase, and keep the app shell and pattern catalog cached for offline use."
)]
pub struct Cli {
    /// breathing pattern: box, 4-7-8, coherent or an id from the pattern catalog
    #[clap(short = 'p', long)]
    pattern: Option<PatternId>,

    /// seconds per phase for box breathing
    #[clap(short = 'b', long, value_parser = clap::value_parser!(u64).range(2..=8))]
    box_duration: Option<u64>,

    /// session length in minutes
    #[clap(short = 'm', long, value_parser = clap::value_parser!(u32).range(1..=20))]
    minutes: Option<u32>,

    /// start with chimes muted
    #[clap(long)]
    mute: bool,

    /// origin serving the offline app shell
    #[clap(long)]
    origin: Option<Url>,

    /// app shell cache version; a new value installs a new deploy
    #[clap(long)]
    shell_version: Option<String>,

    /// path of the pattern catalog on the origin
    #[clap(long)]
    catalog: Option<String>,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// drive the offline shell cache without the tui
    Cache {
        #[clap(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum CacheAction {
    /// install a shell version (defaults to the configured one)
    Install { version: Option<String> },
    /// activate a version now; without one, promote the waiting version
    Activate { version: Option<String> },
    /// fetch a path through the controller
    Fetch {
        path: String,
        /// treat the request as a page navigation
        #[clap(long)]
        navigate: bool,
    },
    /// show the registration and every cached entry
    List,
}

impl Cli {
    /// Flags win over the persisted config
    fn apply(&self, cfg: &mut Config) {
        if let Some(pattern) = &self.pattern {
            cfg.pattern = pattern.clone();
        }
        if let Some(secs) = self.box_duration {
            cfg.box_duration_secs = secs;
        }
        if let Some(minutes) = self.minutes {
            cfg.session_minutes = minutes;
        }
        if self.mute {
            cfg.sound = false;
        }
        if let Some(origin) = &self.origin {
            cfg.shell.origin = Some(origin.clone());
        }
        if let Some(version) = &self.shell_version {
            cfg.shell.version = version.clone();
        }
        if let Some(catalog) = &self.catalog {
            cfg.shell.catalog_path = catalog.clone();
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let store = FileConfigStore::new();
    let mut config = store.load();
    cli.apply(&mut config);

    if let Some(Command::Cache { action }) = cli.command.clone() {
        logging::init_stderr_logging();
        let rt = Runtime::new()?;
        return rt.block_on(run_cache(action, config));
    }

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let _log_guard = AppDirs::log_dir().and_then(|dir| logging::init_file_logging(&dir).ok());
    tracing::info!(pattern = %config.pattern, minutes = config.session_minutes, "starting");

    let rt = Runtime::new()?;
    let shell = match config.shell.origin.clone() {
        Some(origin) => {
            let _guard = rt.enter();
            match spawn_shell(origin) {
                Ok(shell) => Some(shell),
                Err(e) => {
                    tracing::warn!(error = %e, "offline shell disabled");
                    None
                }
            }
        }
        None => None,
    };

    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let bell = TerminalBell::new();
    let mut app = App::new(config, PatternCatalog::builtin(), AudioGate::new(bell.clone()));
    let result = start_tui(&mut terminal, &mut app, &bell, &cli, &store, &rt, shell.as_ref());

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen,)?;
    terminal.show_cursor()?;

    if let Err(e) = store.save(&app.config) {
        tracing::warn!(error = %e, "could not save settings");
    }

    result
}

fn open_storage() -> Result<SqliteCacheStorage, StorageError> {
    match AppDirs::cache_db_path() {
        Some(path) => SqliteCacheStorage::open_at(&path),
        None => SqliteCacheStorage::in_memory(),
    }
}

/// Needs a tokio runtime context
fn spawn_shell(origin: Url) -> Result<ShellHandle, Box<dyn Error>> {
    let controller = ShellController::new(open_storage()?, origin)?;
    let network = Arc::new(ReqwestNetwork::new(FETCH_TIMEOUT)?);
    Ok(ShellService::spawn(controller, network))
}

fn start_tui<B: Backend + Write>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    bell: &TerminalBell,
    cli: &Cli,
    store: &dyn ConfigStore,
    rt: &Runtime,
    shell: Option<&ShellHandle>,
) -> Result<(), Box<dyn Error>> {
    let events = CrosstermEventSource::new();
    let tx = events.sender();

    if let Some(shell) = shell {
        forward_notices(rt, shell, tx.clone());
        spawn_install(rt, shell, &app.config.shell, Some(tx.clone()));
    }

    let mut runner = Runner::new(events, FixedTicker::new(Duration::from_millis(TICK_RATE_MS)));
    let mut last_config_check = Instant::now();

    terminal.draw(|f| screen::draw(app, f))?;

    loop {
        match runner.step() {
            AppEvent::Tick => {
                let was_running = app.engine.state().is_running();
                app.on_tick(runner.interval());

                if last_config_check.elapsed() >= Duration::from_secs(CONFIG_RECHECK_SECS) {
                    last_config_check = Instant::now();
                    let mut fresh = store.load();
                    cli.apply(&mut fresh);
                    if app.reload_shell_config(&fresh) {
                        tracing::info!(version = %app.config.shell.version, "new shell version configured");
                        if let Some(shell) = shell {
                            spawn_install(rt, shell, &app.config.shell, None);
                        }
                    }
                }

                if was_running {
                    terminal.draw(|f| screen::draw(app, f))?;
                }
                if let Err(e) = bell.ring_due(terminal.backend_mut(), Instant::now()) {
                    tracing::debug!(error = %e, "bell write failed");
                }
            }
            AppEvent::Resize => {
                terminal.draw(|f| screen::draw(app, f))?;
            }
            AppEvent::Key(key) => {
                match app.handle_key(key) {
                    Action::Quit => break,
                    Action::PostMessage(msg) => {
                        if let Some(shell) = shell {
                            post_message(rt, shell, &msg);
                        }
                    }
                    Action::Reload => {
                        if let Some(shell) = shell {
                            spawn_load(rt, shell, &app.config.shell, tx.clone());
                        }
                    }
                    Action::OpenOrigin(url) => {
                        if Browser::is_available() {
                            if let Err(e) = webbrowser::open(url.as_str()) {
                                tracing::warn!(%url, error = %e, "could not open browser");
                            }
                        }
                    }
                    Action::None => {}
                }
                terminal.draw(|f| screen::draw(app, f))?;
            }
            AppEvent::Shell(notice) => {
                tracing::debug!(?notice, "shell notice");
                if app.on_notice(&notice) == Action::Reload {
                    if let Some(shell) = shell {
                        spawn_load(rt, shell, &app.config.shell, tx.clone());
                    }
                }
                terminal.draw(|f| screen::draw(app, f))?;
            }
            AppEvent::ShellLoaded(load) => {
                app.apply_shell_load(load);
                terminal.draw(|f| screen::draw(app, f))?;
            }
        }
    }

    Ok(())
}

fn forward_notices(rt: &Runtime, shell: &ShellHandle, tx: Sender<AppEvent>) {
    let mut notices = shell.subscribe();
    rt.spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => {
                    if tx.send(AppEvent::Shell(notice)).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "shell notices lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Installs the configured version, then loads the shell when `tx` is given.
fn spawn_install(rt: &Runtime, shell: &ShellHandle, cfg: &ShellConfig, tx: Option<Sender<AppEvent>>) {
    let shell = shell.clone();
    let cfg = cfg.clone();
    rt.spawn(async move {
        match cfg.version.parse::<CacheVersion>() {
            Ok(version) => match shell.install(version, &cfg.manifest).await {
                Ok(outcome) => tracing::info!(?outcome, "shell install"),
                Err(e) => tracing::warn!(error = %e, "shell install failed"),
            },
            Err(e) => tracing::warn!(error = %e, "bad shell version"),
        }

        if let Some(tx) = tx {
            load_into(&shell, &cfg.catalog_path, tx).await;
        }
    });
}

fn spawn_load(rt: &Runtime, shell: &ShellHandle, cfg: &ShellConfig, tx: Sender<AppEvent>) {
    let shell = shell.clone();
    let catalog_path = cfg.catalog_path.clone();
    rt.spawn(async move { load_into(&shell, &catalog_path, tx).await });
}

async fn load_into(shell: &ShellHandle, catalog_path: &str, tx: Sender<AppEvent>) {
    match load_shell(shell, catalog_path).await {
        Ok(load) => {
            let _ = tx.send(AppEvent::ShellLoaded(load));
        }
        Err(e) => tracing::warn!(error = %e, "shell load failed"),
    }
}

fn post_message(rt: &Runtime, shell: &ShellHandle, msg: &PageMessage) {
    let raw = match serde_json::to_string(msg) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "could not encode page message");
            return;
        }
    };
    let shell = shell.clone();
    rt.spawn(async move {
        if let Err(e) = shell.post_message(&raw).await {
            tracing::warn!(error = %e, "page message not delivered");
        }
    });
}

async fn run_cache(action: CacheAction, config: Config) -> Result<(), Box<dyn Error>> {
    let Some(origin) = config.shell.origin.clone() else {
        return Err("no shell origin configured; pass --origin".into());
    };
    let shell = spawn_shell(origin)?;

    match action {
        CacheAction::Install { version } => {
            let version: CacheVersion = version.unwrap_or(config.shell.version).parse()?;
            match shell.install(version.clone(), &config.shell.manifest).await? {
                InstallOutcome::Activated(activation) => {
                    println!("{} installed and active", activation.current)
                }
                InstallOutcome::Waiting(version) => {
                    println!("{version} installed, waiting (run `resonant cache activate`)")
                }
                InstallOutcome::AlreadyActive => println!("{version} already active"),
            }
        }
        CacheAction::Activate { version } => {
            let activation = match version {
                Some(version) => Some(shell.activate(version.parse()?).await?),
                None => shell.skip_waiting().await?,
            };
            match activation {
                Some(activation) => {
                    println!("{} active", activation.current);
                    for deleted in activation.deleted {
                        println!("  deleted {deleted}");
                    }
                }
                None => println!("nothing waiting"),
            }
        }
        CacheAction::Fetch { path, navigate } => {
            let url = shell.scope().join(&path)?;
            let request = if navigate {
                Request::navigate(url)
            } else {
                Request::get(url)
            };
            let served = shell.handle(request).await?;
            println!(
                "{} {:?} {} bytes",
                served.response.status,
                served.source,
                served.response.body.len()
            );
        }
        CacheAction::List => {
            let registration = shell.registration().await?;
            let show = |v: &Option<CacheVersion>| {
                v.as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string())
            };
            println!("active:  {}", show(&registration.active));
            println!("waiting: {}", show(&registration.waiting));

            for key in shell.keys().await? {
                println!("{key}");
                for entry in shell.entries(key.parse()?).await? {
                    println!(
                        "  {} {} {} {}B {}",
                        entry.key.method,
                        entry.key.url,
                        entry.status,
                        entry.bytes,
                        entry.stored_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
    }

    Ok(())
}
