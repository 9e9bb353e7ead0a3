use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use infinity_updater::config::{self, AppPaths, UpdaterConfig};
use infinity_updater::engine::EngineBootstrap;
use infinity_updater::settings::SettingsStore;
use infinity_updater::startup::{StartupAction, acknowledge_update, startup_action};
use infinity_updater::update::{
    EventSink, UpdateEvent, UpdateOrchestrator, UpdateWorker, VersionReport,
};
use infinity_updater::version::probe::{CommandProbe, VersionProbe};
use infinity_updater::version::types::VersionDescriptor;

#[derive(Parser)]
#[command(name = "infinity-updater")]
#[command(version, about = "Keeps the Infinity downloader and its engine up to date")]
struct Cli {
    /// Started by the update helper after a completed update
    #[arg(long = "post-update", global = true)]
    post_update: bool,

    /// Write the log file as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Path to updater.json (defaults to the file next to the executable)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Update the application, then the engine
    Update {
        /// Reinstall the engine even if it is current
        #[arg(long)]
        force: bool,
        /// Only update the engine
        #[arg(long)]
        skip_app: bool,
    },
    /// Show installed and latest versions without downloading
    Check,
    /// Install missing engine binaries
    Setup {
        /// Folder downloads are saved to
        #[arg(long)]
        download_path: Option<String>,
    },
    /// Print the version a binary reports
    Probe { path: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = infinity_updater::logging::init(&config::log_path(), cli.log_json)
        .context("failed to initialize logging")?;

    let paths = AppPaths::discover().context("cannot locate the running executable")?;
    let config_file = cli.config.clone().unwrap_or_else(|| paths.config_file.clone());
    let config = UpdaterConfig::load(&config_file);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli, config, paths))
}

async fn run(cli: Cli, config: UpdaterConfig, paths: AppPaths) -> anyhow::Result<()> {
    match cli.command {
        Some(Command::Update { force, skip_app }) => update(&config, &paths, force, skip_app).await,
        Some(Command::Check) => {
            let orchestrator = UpdateOrchestrator::from_config(&config, &paths, EventSink::disabled());
            print_report(&orchestrator.check().await);
            Ok(())
        }
        Some(Command::Setup { download_path }) => setup(&config, &paths, download_path).await,
        Some(Command::Probe { path }) => {
            let version = CommandProbe::default()
                .probe(&path)
                .await
                .with_context(|| format!("{} did not report a version", path.display()))?;
            println!("{}", version);
            Ok(())
        }
        None => startup(&config, &paths, cli.post_update),
    }
}

async fn update(
    config: &UpdaterConfig,
    paths: &AppPaths,
    force: bool,
    skip_app: bool,
) -> anyhow::Result<()> {
    let (events, rx) = EventSink::channel();
    let printer = tokio::spawn(print_events(rx));

    let mut orchestrator = UpdateOrchestrator::from_config(config, paths, events).with_force(force);
    if skip_app {
        orchestrator = orchestrator.skip_app_stage("Application update skipped (--skip-app)");
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let worker = UpdateWorker::new();
    let handle = worker
        .start(Arc::new(orchestrator), cancel)
        .context("an update is already running")?;
    let outcome = handle.await?;
    printer.await?;

    if outcome.restart_required {
        println!("{}", outcome.message);
        return Ok(());
    }
    if !outcome.succeeded {
        anyhow::bail!("update failed: {}", outcome.message);
    }

    match outcome.new_identifier.as_str() {
        "" => println!("{}", outcome.message),
        version => println!("{} ({})", outcome.message, version),
    }
    Ok(())
}

async fn setup(
    config: &UpdaterConfig,
    paths: &AppPaths,
    download_path: Option<String>,
) -> anyhow::Result<()> {
    let mut settings = SettingsStore::new(&paths.settings_file);
    if let Some(download_path) = download_path {
        settings.save_download_path(&download_path)?;
    }

    let (events, rx) = EventSink::channel();
    let printer = tokio::spawn(print_events(rx));

    let bootstrap = EngineBootstrap::from_config(config, paths, events);
    let result = bootstrap.ensure(&CancellationToken::new()).await;
    drop(bootstrap);
    printer.await?;

    let report = result?;
    if report.installed_anything() {
        println!("Engine installed in {}", paths.engine_dir.display());
    } else {
        println!("Engine already installed");
    }
    Ok(())
}

fn startup(config: &UpdaterConfig, paths: &AppPaths, post_update: bool) -> anyhow::Result<()> {
    let mut settings = SettingsStore::new(&paths.settings_file);
    let engine_complete = paths.tool_path(&config.tool).exists() && paths.ffmpeg_path().exists();

    match startup_action(post_update, &mut settings, engine_complete) {
        StartupAction::AcknowledgeUpdate => {
            acknowledge_update(&mut settings)?;
            println!("Update complete: now running {}", config.app_version);
        }
        StartupAction::ChooseDownloadPath => {
            println!("Choose a download folder with `infinity-updater setup --download-path <DIR>`");
        }
        StartupAction::InstallEngine => {
            println!("Engine is incomplete; run `infinity-updater setup`");
        }
        StartupAction::Ready => {
            println!("Ready. Downloads go to {}", settings.download_path());
        }
    }
    Ok(())
}

async fn print_events(mut rx: UnboundedReceiver<UpdateEvent>) {
    let mut last_percent: Option<i64> = None;

    while let Some(event) = rx.recv().await {
        match event {
            UpdateEvent::Progress {
                label,
                percent: Some(percent),
            } => {
                // One line per whole percent
                let whole = percent as i64;
                if last_percent != Some(whole) {
                    println!("[{:>3}%] {}", whole, label);
                    last_percent = Some(whole);
                }
            }
            UpdateEvent::Progress {
                label,
                percent: None,
            } => println!("[ .. ] {}", label),
            UpdateEvent::Log { level, message } => {
                println!("{:<8} {}", level.as_str().to_uppercase(), message)
            }
        }
    }
}

fn latest_identifier(descriptor: &Option<VersionDescriptor>) -> &str {
    descriptor
        .as_ref()
        .map_or("unavailable", |d| d.identifier.as_str())
}

fn print_report(report: &VersionReport) {
    println!(
        "application: {} (latest: {}){}",
        report.app_version,
        latest_identifier(&report.app_latest),
        if report.app_update_available() {
            " - update available"
        } else {
            ""
        }
    );
    println!(
        "engine:      {} (latest: {}) - {:?}",
        if report.tool_installed {
            report.tool_version.as_deref().unwrap_or("unknown")
        } else {
            "not installed"
        },
        latest_identifier(&report.tool_latest),
        report.tool_decision()
    );
}
