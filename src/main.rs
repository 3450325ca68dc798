use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use arbor_core::ids::AgentId;
use arbor_core::provider::{ModelSelection, OfflineGateway};
use arbor_core::render::{FrameView, Renderer};
use arbor_engine::tools::create_default_registry;
use arbor_engine::{dispatch, AgentManager, CommandOutcome, ForkBarrier, ManagerConfig};
use arbor_settings::ArborSettings;
use arbor_store::Database;
use arbor_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "arbor", about = "Branching agent conversations over an event log")]
struct Cli {
    /// Agent/event database. Overrides `database.path`.
    #[arg(long)]
    db: Option<PathBuf>,

    /// System prompt written on a fresh install.
    #[arg(long)]
    system_prompt: Option<String>,

    /// Default log filter (`RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Log JSON lines to stderr.
    #[arg(long)]
    json_logs: bool,
}

/// Line-oriented renderer: every display line goes to stdout tagged with the
/// agent's short id.
struct TerminalRenderer;

impl Renderer for TerminalRenderer {
    fn append_display_line(&self, agent: &AgentId, line: &str) {
        println!("[{}] {line}", agent.short());
    }

    fn render_frame(&self, view: &FrameView) {
        if let Some(current) = view.current() {
            print!("{}> ", current.uuid.short());
            let _ = std::io::stdout().flush();
        }
    }
}

fn apply_cli(settings: &mut ArborSettings, cli: &Cli) {
    if let Some(db) = &cli.db {
        settings.database.path = db.to_string_lossy().into_owned();
    }
    if let Some(prompt) = &cli.system_prompt {
        settings.agent.system_prompt = Some(prompt.clone());
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level = level.clone();
    }
    if cli.json_logs {
        settings.logging.json = true;
    }
}

fn manager_config(settings: &ArborSettings) -> anyhow::Result<ManagerConfig> {
    let working_directory = match &settings.runtime.working_directory {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir().context("resolving working directory")?,
    };
    let thinking = settings.agent.default_thinking.parse().unwrap_or_default();
    Ok(ManagerConfig {
        system_prompt: settings.agent.system_prompt.clone(),
        default_selection: ModelSelection::new(
            settings.agent.default_provider.clone(),
            settings.agent.default_model.clone(),
            thinking,
        ),
        working_directory,
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = arbor_settings::load_settings().context("loading settings")?;
    apply_cli(&mut settings, &cli);

    let _telemetry = init_telemetry(TelemetryConfig {
        log_level: settings.logging.level.clone(),
        json: settings.logging.json,
        log_to_sqlite: settings.logging.persist_warnings,
        log_db_path: PathBuf::from(&settings.logging.log_db_path),
    });

    let db_path = PathBuf::from(&settings.database.path);
    let db = Database::open(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;

    let manager = AgentManager::new(
        db,
        Arc::new(ForkBarrier::new()),
        Arc::new(OfflineGateway),
        Arc::new(TerminalRenderer),
        Arc::new(create_default_registry()),
        manager_config(&settings)?,
    )?;
    let report = manager.restore()?;
    tracing::info!(
        fresh_install = report.fresh_install,
        restored = report.restored.len(),
        failed = report.failed.len(),
        "agent tree restored"
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_millis(
        settings.runtime.tick_interval_ms.max(1),
    ));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = manager.tick() {
                    tracing::error!(error = %e, "tick failed");
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else { break };
                match dispatch(&manager, &line).await {
                    Ok(CommandOutcome::Done(msg) | CommandOutcome::Notice(msg)) if !msg.is_empty() => {
                        println!("{msg}");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "command failed"),
                }
                manager.render();
            }
        }
    }

    tracing::info!("shutting down");
    manager.shutdown();
    Ok(())
}
