//! studyboard CLI: terminal views over a study-tracking backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use studyboard::{
    Attribute, HttpBackendClient, Notifier, PollExit, RefreshOutcome, Severity, StoreConfig,
    StoreEvent, StudyDetail, StudyDirection, StudyId, StudySummary, SyncStore, Trial,
};

#[derive(Parser)]
#[command(
    name = "studyboard",
    about = "📈 studyboard: live views of optimization studies",
    version
)]
struct Cli {
    /// Backend API base URL (overrides the config file)
    #[arg(long, global = true)]
    url: Option<String>,
    /// YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List studies with their best values
    List {
        /// Also print user and system attributes
        #[arg(long)]
        attrs: bool,
    },
    /// Show the trials of a study
    Show {
        study_id: StudyId,
    },
    /// Create a new study
    Create {
        name: String,
        /// Optimization direction
        #[arg(long, short, default_value = "minimize")]
        direction: StudyDirection,
    },
    /// Poll a study until all of its trials have finished
    Watch {
        study_id: StudyId,
        /// Poll interval in milliseconds (overrides the config file)
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_json, cli.log_file.as_deref())?;

    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(url) = cli.url {
        config.base_url = url;
    }
    if let Commands::Watch {
        interval_ms: Some(ms),
        ..
    } = cli.command
    {
        config.poll_interval_ms = ms;
    }
    config.validate()?;
    debug!(base_url = %config.base_url, "using backend");

    let client = HttpBackendClient::new(&config)?;
    let store = SyncStore::global_or_init(|| {
        SyncStore::new(Arc::new(client), Arc::new(ConsoleNotifier), config)
    });

    match cli.command {
        Commands::List { attrs } => cmd_list(store, attrs).await?,
        Commands::Show { study_id } => cmd_show(store, study_id).await?,
        Commands::Create { name, direction } => cmd_create(store, &name, direction).await?,
        Commands::Watch { study_id, .. } => cmd_watch(store, study_id).await?,
    }

    Ok(())
}

fn init_tracing(json: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (writer, guard) = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(log_file.is_none())
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
    Ok(guard)
}

/// Prints notifications to stderr so they stay out of piped table output.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Success => eprintln!("✓ {message}"),
            Severity::Error => eprintln!("✗ {message}"),
        }
    }
}

// ─── Command implementations ──────────────────────────────────────────────────

async fn cmd_list(store: &SyncStore, attrs: bool) -> Result<()> {
    if store.refresh_summaries().await == RefreshOutcome::Failed {
        anyhow::bail!("study list unavailable at {}", store.config().base_url);
    }

    let studies = store.summaries();
    if studies.is_empty() {
        println!("No studies found at {}", store.config().base_url);
        return Ok(());
    }
    println!("{}", summaries_table(&studies));

    if attrs {
        for study in studies.iter() {
            if study.user_attrs.is_empty() && study.system_attrs.is_empty() {
                continue;
            }
            println!();
            println!("── {} (id={}) ──────────────────────", study.study_name, study.study_id);
            println!("{}", attributes_table(&study.user_attrs, &study.system_attrs));
        }
    }
    Ok(())
}

async fn cmd_show(store: &SyncStore, study_id: StudyId) -> Result<()> {
    if store.refresh_detail(study_id).await == RefreshOutcome::Failed {
        anyhow::bail!("study {study_id} unavailable");
    }
    let detail = store
        .cached_detail(study_id)
        .with_context(|| format!("study {study_id} missing from cache"))?;
    print_detail(&detail);
    Ok(())
}

async fn cmd_create(store: &SyncStore, name: &str, direction: StudyDirection) -> Result<()> {
    let created = store.create_study(name, direction).await?;
    println!("{}", summaries_table(std::slice::from_ref(&created)));
    Ok(())
}

async fn cmd_watch(store: &SyncStore, study_id: StudyId) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Loading study {study_id}..."));

    let subscription = {
        let watched = store.clone();
        let spinner = spinner.clone();
        store.subscribe(move |event: &StoreEvent| {
            if *event != StoreEvent::DetailChanged(study_id) {
                return;
            }
            if let Some(detail) = watched.cached_detail(study_id) {
                spinner.set_message(format!("{}: {}", detail.name, detail.state_counts()));
            }
        })
    };

    let handle = store.watch_detail(study_id);
    let exit = tokio::select! {
        exit = handle.wait() => exit,
        _ = tokio::signal::ctrl_c() => PollExit::Cancelled,
    };
    subscription.unsubscribe();
    spinner.finish_and_clear();

    let detail = store.cached_detail(study_id);
    match (exit, detail) {
        (PollExit::Settled, Some(detail)) => {
            println!("All trials finished.");
            print_detail(&detail);
        }
        (PollExit::Cancelled, Some(detail)) => {
            println!("Stopped watching; trials still running.");
            print_detail(&detail);
        }
        (_, None) => anyhow::bail!("study {study_id} was never loaded"),
    }
    Ok(())
}

// ─── Rendering ────────────────────────────────────────────────────────────────

fn summaries_table(studies: &[StudySummary]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Study ID", "Name", "Direction", "Best value", "Started"]);
    for study in studies {
        table.add_row([
            study.study_id.to_string(),
            study.study_name.clone(),
            study.direction.to_string(),
            format_value(study.best_value()),
            format_time(study.datetime_start),
        ]);
    }
    table
}

fn attributes_table(user: &[Attribute], system: &[Attribute]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Kind", "Key", "Value"]);
    let rows = user
        .iter()
        .map(|a| ("user", a))
        .chain(system.iter().map(|a| ("system", a)));
    for (kind, attr) in rows {
        table.add_row([kind, attr.key.as_str(), attr.value.as_str()]);
    }
    table
}

fn trials_table(trials: &[Trial]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Trial ID", "Number", "State", "Value", "Params"]);
    for trial in trials {
        table.add_row([
            trial.trial_id.to_string(),
            trial.number.to_string(),
            trial.state.to_string(),
            format_value(trial.value),
            trial.params_label(),
        ]);
    }
    table
}

fn print_detail(detail: &StudyDetail) {
    println!("Study: {} (id={})", detail.name, detail.study_id);
    if let Some(direction) = detail.direction {
        println!("Direction: {direction}");
    }
    println!("Trials: {}", detail.state_counts());
    if let Some(best) = detail.best_trial() {
        println!(
            "Best: trial #{} = {}",
            best.number,
            format_value(best.value)
        );
    }
    if !detail.trials.is_empty() {
        println!("{}", trials_table(&detail.trials));
    }
}

// ─── Utilities ────────────────────────────────────────────────────────────────

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{v:.1}"),
        Some(v) => format!("{v:.6}").trim_end_matches('0').to_string(),
        None => "-".to_string(),
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
