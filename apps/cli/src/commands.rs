//! CLI command definitions, routing, and tracing setup.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use contourkit_core::{
    ProgressReporter, RunContext, RunRequest, RunSummary, StepInfo, StepRegistry, break_lock,
    load_batch, run_batch, run_locality,
};
use contourkit_engine::{BridgeCommand, BridgeEngine};
use contourkit_shared::{
    AppConfig, EngineConfig, SpatialReference, init_config, load_config, load_config_from,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// contourkit: contours and tile indexes from elevation rasters.
#[derive(Parser)]
#[command(
    name = "contourkit",
    version,
    about = "Build per-tile contour deliverables and a GeoJSON tile index from DEM rasters.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.contourkit/contourkit.toml.
    #[arg(long, global = true, env = "CONTOURKIT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Process one locality, optionally resuming at a named step.
    Run {
        /// State identifier (e.g. OH). Prompted for when omitted.
        state: Option<String>,

        /// Locality name (e.g. Adams). Prompted for when omitted.
        locality: Option<String>,

        /// Target spatial reference well-known ID. Prompted for when omitted.
        target_srs: Option<String>,

        /// Step to resume from (see `contourkit steps`).
        #[arg(long)]
        step: Option<String>,

        /// Print the resolved run context and exit without processing.
        #[arg(long)]
        dry_run: bool,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,

        /// Remove the locality's run lock first (after a killed run).
        #[arg(long)]
        break_lock: bool,
    },

    /// List the pipeline steps in execution order.
    Steps,

    /// Process every locality listed in a batch file.
    Batch {
        /// TOML file with one `[[run]]` table per locality.
        file: PathBuf,

        /// Localities processed at once (defaults to `batch.jobs`).
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Remove every listed locality's run lock first.
        #[arg(long)]
        break_lock: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "contourkit=info",
        1 => "contourkit=debug",
        _ => "contourkit=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            state,
            locality,
            target_srs,
            step,
            dry_run,
            yes,
            break_lock,
        } => {
            let config = resolve_config(config_path)?;
            let args = RunArgs {
                state,
                locality,
                target_srs,
                step,
                dry_run,
                yes,
                break_lock,
            };
            cmd_run(config, args).await
        }
        Command::Steps => cmd_steps(),
        Command::Batch {
            file,
            jobs,
            break_lock,
        } => {
            let config = resolve_config(config_path)?;
            cmd_batch(config, &file, jobs, break_lock).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

fn bridge_command(engine: &EngineConfig) -> BridgeCommand {
    BridgeCommand {
        command: engine.command.clone(),
        script: engine.script.clone(),
        working_dir: engine.working_dir.clone(),
    }
}

fn connect_engine(ctx: &RunContext) -> contourkit_shared::Result<BridgeEngine> {
    BridgeEngine::spawn(&bridge_command(&ctx.config.engine))
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

struct RunArgs {
    state: Option<String>,
    locality: Option<String>,
    target_srs: Option<String>,
    step: Option<String>,
    dry_run: bool,
    yes: bool,
    break_lock: bool,
}

async fn cmd_run(config: AppConfig, args: RunArgs) -> Result<()> {
    let prompted = args.state.is_none() || args.locality.is_none() || args.target_srs.is_none();

    let state = match args.state {
        Some(s) => s,
        None => prompt("State (e.g. OH)")?,
    };
    let locality = match args.locality {
        Some(l) => l,
        None => prompt("Locality")?,
    };
    let target_srs: SpatialReference = match args.target_srs {
        Some(t) => t.parse()?,
        None => prompt("Target spatial reference (WKID)")?.parse()?,
    };

    // Unknown steps and bad identifiers fail here, before any worker exists.
    let ctx = RunContext::new(
        RunRequest {
            state,
            locality,
            target_srs,
            start_step: args.step,
        },
        &config,
    )?;

    if args.dry_run || prompted {
        print_context(&ctx);
    }
    if args.dry_run {
        return Ok(());
    }
    if prompted && !args.yes && !confirm("Proceed with processing?")? {
        println!("Aborted.");
        return Ok(());
    }

    if args.break_lock {
        release_lock(&ctx)?;
    }

    info!(
        state = %ctx.state,
        locality = %ctx.locality,
        target_srs = %ctx.target_srs,
        start_step = ctx.start_step(),
        "starting run"
    );

    let summary = tokio::task::spawn_blocking(move || {
        let reporter = CliProgress::new();
        run_locality(&ctx, connect_engine, &reporter)
    })
    .await
    .map_err(|e| eyre!("run worker failed: {e}"))??;

    print_summary(&summary);
    Ok(())
}

fn release_lock(ctx: &RunContext) -> Result<()> {
    if break_lock(ctx)? {
        println!("Removed the run lock for {}/{}.", ctx.state, ctx.locality);
    }
    Ok(())
}

fn print_context(ctx: &RunContext) {
    println!();
    for (label, value) in ctx.describe() {
        println!("  {:<18} {value}", format!("{label}:"));
    }
    println!();
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("  {}/{} complete", summary.state, summary.locality);
    println!("  Started at: {}", summary.start_step);
    println!("  Executed:   {}", summary.executed.len());
    println!("  Skipped:    {}", summary.skipped.len());
    for line in summary.counters.log_lines() {
        println!("  {line}");
    }
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

fn prompt(label: &str) -> Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{label}: ")?;
    stdout.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let answer = line.trim().to_string();
    if answer.is_empty() {
        return Err(eyre!("no value entered for {label}"));
    }
    Ok(answer)
}

fn confirm(question: &str) -> Result<bool> {
    let mut stdout = io::stdout();
    write!(stdout, "{question} [y/N] ")?;
    stdout.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(is_yes(&line))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

// ---------------------------------------------------------------------------
// steps
// ---------------------------------------------------------------------------

fn cmd_steps() -> Result<()> {
    let catalog = StepRegistry::catalog();
    for (index, step) in catalog.steps().iter().enumerate() {
        println!("{:>3}  {:<26} {}", index + 1, step.name, step.phase());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// batch
// ---------------------------------------------------------------------------

async fn cmd_batch(
    config: AppConfig,
    file: &Path,
    jobs: Option<usize>,
    break_locks: bool,
) -> Result<()> {
    let contexts = load_batch(file, &config)?;
    if break_locks {
        for ctx in &contexts {
            release_lock(ctx)?;
        }
    }
    let jobs = jobs.unwrap_or(config.batch.jobs);
    if jobs == 0 {
        return Err(eyre!("--jobs must be at least 1"));
    }
    let total = contexts.len();
    info!(file = %file.display(), runs = total, jobs, "starting batch");

    let progress: Arc<dyn ProgressReporter> = Arc::new(CliProgress::for_batch());
    let outcomes = run_batch(contexts, jobs, Arc::new(connect_engine), progress.clone()).await;
    drop(progress);

    println!();
    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(summary) => println!(
                "  ok      {:<28} {:.1}s",
                outcome.label(),
                summary.elapsed.as_secs_f64()
            ),
            Err(e) => {
                failed += 1;
                println!("  failed  {:<28} {e}", outcome.label());
            }
        }
    }
    println!();

    if failed > 0 {
        return Err(eyre!("{failed} of {total} localities failed"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
    /// Batch runs share one spinner across localities, so a finished
    /// locality prints a line instead of clearing it.
    shared: bool,
}

impl CliProgress {
    fn new() -> Self {
        Self::with_spinner(false)
    }

    fn for_batch() -> Self {
        Self::with_spinner(true)
    }

    fn with_spinner(shared: bool) -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner, shared }
    }
}

impl ProgressReporter for CliProgress {
    fn message(&self, message: &str) {
        self.spinner.set_message(message.to_string());
    }

    fn step_started(&self, step: &StepInfo) {
        self.spinner.set_message(step.to_string());
    }

    fn step_skipped(&self, step: &StepInfo, reason: &str) {
        self.spinner.set_message(format!("{step} skipped: {reason}"));
    }

    fn step_completed(&self, step: &StepInfo, elapsed: Duration) {
        self.spinner
            .println(format!("  ✓ {step} ({:.1}s)", elapsed.as_secs_f64()));
    }

    fn done(&self, summary: &RunSummary) {
        if self.shared {
            self.spinner.println(format!(
                "  {}/{} done in {:.1}s",
                summary.state,
                summary.locality,
                summary.elapsed.as_secs_f64()
            ));
        } else {
            self.spinner.finish_and_clear();
        }
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
