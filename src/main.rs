use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webloom::{
    ActionKind, Engine, EngineConfig, InMemoryEventSink, InMemoryFlowStore, PageId, PageRoute,
    RunBundle, RunEvent, RunEventKind, RunReport, RunState, ScriptedPageBridge, SelectorKind,
    SessionId, StepStatus,
};
use webloom_action_engine::validate as validate_action;

/// Webloom - self-healing web automation workflows
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Yaml,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow bundle against its scripted document
    Run(RunArgs),

    /// Validate a bundle without executing anything
    Check(CheckArgs),

    /// Show engine information and the effective configuration
    Info,
}

#[derive(Args)]
struct RunArgs {
    /// Bundle file (JSON or YAML)
    bundle: PathBuf,

    /// Session id for the page route
    #[arg(long, default_value = "cli-session")]
    session: String,

    /// Page id for the page route
    #[arg(long, default_value = "cli-page")]
    page: String,

    /// Execute the workflow this many times against one engine
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// Abort the run after this long (e.g. "30s", "2m")
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<std::time::Duration>,
}

#[derive(Args)]
struct CheckArgs {
    /// Bundle file (JSON or YAML)
    bundle: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.debug)?;
    info!("Starting webloom v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_ref())?;

    let result = match cli.command {
        Commands::Run(args) => cmd_run(args, &config, &cli.output).await,
        Commands::Check(args) => cmd_check(args, &cli.output),
        Commands::Info => cmd_info(&config, &cli.output),
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Command failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let path = match path {
        Some(path) => Some(path.clone()),
        None => default_config_path().filter(|p| p.exists()),
    };
    match &path {
        Some(p) => info!("Loading configuration from {}", p.display()),
        None => debug!("No configuration file found, using defaults"),
    }
    EngineConfig::load(path.as_deref()).context("Failed to load configuration")
}

fn default_config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push("webloom");
    path.push("webloom.toml");
    Some(path)
}

async fn cmd_run(args: RunArgs, config: &EngineConfig, output: &OutputFormat) -> Result<()> {
    let bundle = RunBundle::load(&args.bundle)
        .with_context(|| format!("Failed to load bundle {}", args.bundle.display()))?;

    let document = bundle.scripted_document();
    let mut bridge = ScriptedPageBridge::new().with_elements(document.clone());
    // The same scripted document backs every page the workflow opens.
    for url in bundle.navigate_urls() {
        bridge = bridge.with_document(url, document.clone());
    }
    let bridge = Arc::new(bridge);
    let store = Arc::new(InMemoryFlowStore::new());
    store.insert_workflow(bundle.workflow.clone());
    for selector in &bundle.selectors {
        store.insert_selector(selector.clone());
    }
    let sink = Arc::new(InMemoryEventSink::new(1024));

    let engine = Engine::builder()
        .config(config.clone())
        .bridge(bridge)
        .store(store)
        .sink(sink.clone())
        .build()?;

    let route = PageRoute::new(
        SessionId::from(args.session.as_str()),
        PageId::from(args.page.as_str()),
    );
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, aborting run");
            canceller.cancel();
        }
    });
    if let Some(limit) = args.timeout {
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            warn!("Run timeout of {} reached, aborting", humantime::format_duration(limit));
            canceller.cancel();
        });
    }

    let workflow_id = bundle.workflow.id.clone();
    for round in 0..args.repeat.max(1) {
        let report = engine.run(&workflow_id, &route, cancel.clone()).await?;
        let events = sink.recent_run(&report.run_id);
        emit_report(&report, &events, output, round)?;
        if report.state != RunState::Completed {
            bail!("run finished in state {}", report.state.name());
        }
    }

    Ok(())
}

fn emit_report(
    report: &RunReport,
    events: &[RunEvent],
    output: &OutputFormat,
    round: u32,
) -> Result<()> {
    match output {
        OutputFormat::Human => print_human_report(report, events, round),
        OutputFormat::Json | OutputFormat::Yaml => {
            let payload = serde_json::json!({
                "round": round,
                "report": report,
                "events": events,
            });
            emit_value(&payload, output)?;
        }
    }
    Ok(())
}

fn print_human_report(report: &RunReport, events: &[RunEvent], round: u32) {
    if round > 0 {
        println!();
        println!("Round {}:", round + 1);
    }
    let duration = (report.finished_at - report.started_at)
        .to_std()
        .unwrap_or_default();
    println!(
        "Run {} [{}] finished in {}",
        report.run_id,
        report.state.name(),
        humantime::format_duration(duration)
    );
    for step in &report.steps {
        let marker = match step.status {
            StepStatus::Success => "ok",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        let mut line = format!(
            "  #{} {} [{}] {} attempt(s)",
            step.order, step.step_id, marker, step.attempts
        );
        if step.from_cache {
            line.push_str(" (cached)");
        }
        if let Some(error) = &step.error {
            line.push_str(" error: ");
            line.push_str(error);
        }
        println!("{}", line);
    }
    for event in events {
        if let RunEventKind::SelectorHealed {
            selector_id,
            kind,
            value,
        } = &event.kind
        {
            println!("  healed {}: now {} \"{}\"", selector_id, kind.name(), value);
        }
    }
}

fn cmd_check(args: CheckArgs, output: &OutputFormat) -> Result<()> {
    let bundle = RunBundle::load(&args.bundle)
        .with_context(|| format!("Failed to load bundle {}", args.bundle.display()))?;

    let mut problems = Vec::new();
    if let Err(err) = bundle.workflow.validate() {
        problems.push(err.to_string());
    }
    for step in bundle.workflow.ordered_steps() {
        if let Err(err) = validate_action(&step.action) {
            problems.push(format!("step {}: {}", step.order, err));
        }
    }
    for selector_id in bundle.dangling_selectors() {
        problems.push(format!(
            "selector '{}' is not defined in the bundle",
            selector_id
        ));
    }

    match output {
        OutputFormat::Human => {
            if problems.is_empty() {
                println!(
                    "{} ok: {} step(s), {} selector(s)",
                    args.bundle.display(),
                    bundle.workflow.steps.len(),
                    bundle.selectors.len()
                );
            } else {
                for problem in &problems {
                    println!("problem: {}", problem);
                }
            }
        }
        OutputFormat::Json | OutputFormat::Yaml => {
            let payload = serde_json::json!({
                "bundle": args.bundle.display().to_string(),
                "ok": problems.is_empty(),
                "problems": problems,
            });
            emit_value(&payload, output)?;
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        bail!("{} problem(s) found", problems.len());
    }
}

fn cmd_info(config: &EngineConfig, output: &OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Human => {
            println!("webloom v{}", env!("CARGO_PKG_VERSION"));
            println!("Action kinds:");
            for kind in ActionKind::ALL {
                println!("  - {}", kind.name());
            }
            println!("Selector kinds (fallback orders by success rate):");
            for kind in SelectorKind::ALL {
                println!("  - {}", kind.name());
            }
            println!("Configuration:");
            print!("{}", serde_yaml::to_string(config)?);
        }
        OutputFormat::Json | OutputFormat::Yaml => {
            let payload = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "action_kinds": ActionKind::ALL.iter().map(|k| k.name()).collect::<Vec<_>>(),
                "selector_kinds": SelectorKind::ALL.iter().map(|k| k.name()).collect::<Vec<_>>(),
                "config": config,
            });
            emit_value(&payload, output)?;
        }
    }
    Ok(())
}

fn emit_value(value: &serde_json::Value, output: &OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        _ => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
