mod input;
mod render;

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use droidpane_core::config::settings::LogConfig;
use droidpane_core::config::{default_config_path, Config};
use droidpane_core::event::{Command, Event};
use droidpane_core::fs::{Backend, Backends, LocalBackend, Location};
use droidpane_core::log::ActivityLog;
use droidpane_core::nav::pane::PaneHomes;
use droidpane_core::nav::remote_start_path;
use droidpane_core::ops::job::JobId;
use droidpane_core::remote::{AdbBridge, MemoryBridge, RemoteBackend};
use droidpane_core::session::{Outcome, Session};

use crate::input::{parse_line, InputAction, HELP};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Dual-pane file manager for the local disk and an attached Android device"
)]
struct Args {
    /// Local start directory (defaults to the current directory)
    local: Option<PathBuf>,

    /// Remote start directory; relative paths are taken under /sdcard
    remote: Option<String>,

    /// Configuration file (defaults to $XDG_CONFIG_HOME/droidpane/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device serial, overriding the configuration file
    #[arg(short, long)]
    serial: Option<String>,

    /// Use a built-in in-memory device instead of adb
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    // Logs go to a file so they never interleave with the prompt
    init_tracing(&config.log)?;
    tracing::info!(config = %config_path.display(), demo = args.demo, "starting droidpane");

    let log = Arc::new(ActivityLog::new(config.log.max_entries));
    let interval = config.transfer.progress_interval();
    let remote: Arc<dyn Backend> = if args.demo {
        Arc::new(
            RemoteBackend::new(Arc::new(demo_device()), log.clone())
                .with_progress_interval(interval),
        )
    } else {
        let serial = args.serial.clone().or_else(|| config.remote.serial.clone());
        let bridge = AdbBridge::new(config.remote.adb_path.clone()).with_serial(serial);
        Arc::new(RemoteBackend::new(Arc::new(bridge), log.clone()).with_progress_interval(interval))
    };

    remote
        .ensure_available()
        .await
        .context("no usable device; connect one or run with --demo")?;
    let remote_home = remote_start_path(&config.remote.default_path.to_string_lossy());
    let remote_start = match &args.remote {
        Some(path) => remote_start_path(path),
        None => remote_home.clone(),
    };
    check_remote_dir(remote.as_ref(), &remote_start).await?;

    let launch_dir = std::env::current_dir().context("failed to get current directory")?;
    let local_start = match &args.local {
        Some(path) => tokio::fs::canonicalize(path)
            .await
            .with_context(|| format!("cannot open {}", path.display()))?,
        None => launch_dir.clone(),
    };

    let backends = Backends::new(Arc::new(LocalBackend::new()), remote);
    let homes = PaneHomes {
        local: launch_dir,
        remote: remote_home,
    };
    let (mut session, events) = Session::new(
        backends,
        homes,
        Location::local(local_start),
        Location::remote(remote_start),
        &config,
        log.clone(),
    );
    session.load().await?;

    let printer = tokio::spawn(print_events(events));
    let result = run_repl(&mut session, &log).await;

    let cancelled = session.shutdown().await;
    if cancelled > 0 {
        println!("cancelled {cancelled} unfinished job(s)");
    }
    drop(session);
    let _ = printer.await;
    tracing::info!("droidpane exited");
    result
}

fn init_tracing(log: &LogConfig) -> anyhow::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log.file)
        .with_context(|| format!("failed to open log file {}", log.file.display()))?;
    let filter = tracing_subscriber::EnvFilter::try_new(&log.level)
        .with_context(|| format!("invalid log level {:?}", log.level))?;

    tracing_subscriber::fmt()
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .with_env_filter(filter)
        .init();
    Ok(())
}

/// A small device tree for trying the frontend without hardware.
fn demo_device() -> MemoryBridge {
    let bridge = MemoryBridge::new();
    bridge.add_file("/sdcard/DCIM/Camera/IMG_0001.jpg", vec![0xFF; 48 * 1024]);
    bridge.add_file("/sdcard/DCIM/Camera/IMG_0002.jpg", vec![0xFF; 96 * 1024]);
    bridge.add_file("/sdcard/Download/notes.txt", b"droidpane demo device\n");
    bridge.add_dir("/sdcard/Music");
    bridge.add_symlink("/sdcard/Pictures", "/sdcard/DCIM");
    bridge.set_transfer_delay(Duration::from_millis(300));
    bridge
}

async fn check_remote_dir(remote: &dyn Backend, path: &Path) -> anyhow::Result<()> {
    let entry = remote
        .stat(path)
        .await
        .with_context(|| format!("remote start path {}", path.display()))?;
    if !entry.is_dir() && !entry.is_symlink() {
        bail!("remote start path {} is not a directory", path.display());
    }
    Ok(())
}

async fn print_events(mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        if let Some(line) = render::render_event(&event) {
            println!("{line}");
        }
    }
}

async fn run_repl(session: &mut Session, log: &ActivityLog) -> anyhow::Result<()> {
    show_panes(session);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}> ", session.focus());
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match parse_line(&line) {
            Ok(InputAction::Quit) => break,
            Ok(action) => handle(session, log, action).await,
            Err(e) => println!("error: {e}"),
        }
    }
    Ok(())
}

async fn handle(session: &mut Session, log: &ActivityLog, action: InputAction) {
    match action {
        InputAction::Command(Command::ClearLog) => match session.execute(Command::ClearLog).await {
            Ok(_) => println!("log cleared"),
            Err(e) => println!("error: {e}"),
        },
        InputAction::Command(command) => execute(session, command).await,
        InputAction::Cancel(None) => execute(session, Command::CancelAll).await,
        InputAction::Cancel(Some(number)) => match find_job(session, number) {
            Some(id) => execute(session, Command::Cancel(id)).await,
            None => println!("no job #{number}"),
        },
        InputAction::Dismiss(number) => match find_job(session, number) {
            Some(id) => execute(session, Command::Dismiss(id)).await,
            None => println!("no job #{number}"),
        },
        InputAction::Show => show_panes(session),
        InputAction::Jobs => {
            let jobs = session.engine().jobs();
            if jobs.is_empty() {
                println!("no jobs");
            }
            for job in &jobs {
                println!("{}", render::render_job(job));
            }
        }
        InputAction::Log => {
            for entry in log.entries() {
                println!("{}", render::render_log_entry(&entry));
            }
        }
        InputAction::Help => println!("{HELP}"),
        InputAction::Quit | InputAction::Nothing => {}
    }
}

async fn execute(session: &mut Session, command: Command) {
    match session.execute(command).await {
        Ok(Outcome::Done) => {
            let id = session.focus();
            print!("{}", render::render_pane(&session.pane(id).view(), true));
        }
        Ok(Outcome::Submitted(ids)) if ids.is_empty() => println!("nothing selected"),
        // Queued jobs announce themselves through the event printer
        Ok(Outcome::Submitted(_)) => {}
        Ok(Outcome::Signalled(0)) => println!("no matching job"),
        Ok(Outcome::Signalled(count)) => println!("{count} job(s) signalled"),
        Ok(Outcome::Output(out)) => {
            print!("{out}");
            if !out.is_empty() && !out.ends_with('\n') {
                println!();
            }
        }
        Ok(Outcome::Started) => println!("started in the background; see log"),
        Err(e) => {
            tracing::warn!("command failed: {e}");
            println!("error: {e}");
        }
    }
}

fn find_job(session: &Session, number: u64) -> Option<JobId> {
    session
        .engine()
        .jobs()
        .into_iter()
        .map(|job| job.id)
        .find(|id| id.get() == number)
}

fn show_panes(session: &Session) {
    let (left, right) = session.views();
    let focus = session.focus();
    print!("{}", render::render_pane(&left, left.id == focus));
    print!("{}", render::render_pane(&right, right.id == focus));
}
