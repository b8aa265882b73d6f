//! CLI command definitions, routing, and tracing setup.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use nbbuild_changes::{DetectOptions, EventPayload, Git, detect, load_event};
use nbbuild_core::pipeline::{PipelineConfig, ProgressReporter};
use nbbuild_core::report::{NotebookStatus, RunReport, Step};
use nbbuild_core::toolchain::JupyterToolchain;
use nbbuild_shared::{
    AppConfig, ChangeSet, FailurePolicy, NbBuildError, SelectionMode, Stage, init_config,
    load_config, load_config_from,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// nbbuild — execute and render the notebooks a change touched.
#[derive(Parser)]
#[command(
    name = "nbbuild",
    version,
    about = "Execute changed Jupyter notebooks and convert them to HTML.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Repository to operate on.
    #[arg(long, default_value = ".", global = true)]
    pub repo: PathBuf,

    /// Config file (defaults to <repo>/nbbuild.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Options shared by every command that selects notebooks.
#[derive(Args, Clone, Debug, Default)]
pub(crate) struct SelectArgs {
    /// Process every notebook instead of only the changed ones.
    #[arg(long)]
    pub all: bool,

    /// Base branch or commit (defaults to the env var named in config).
    #[arg(long)]
    pub base: Option<String>,

    /// CI event payload JSON (defaults to the env var named in config).
    #[arg(long)]
    pub event: Option<PathBuf>,
}

/// Options for commands that run the pipeline.
#[derive(Args, Clone, Debug, Default)]
pub(crate) struct RunArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Stop at the first failing notebook.
    #[arg(long)]
    pub fail_fast: bool,

    /// Directory for HTML output (overrides config).
    #[arg(long)]
    pub html_dir: Option<PathBuf>,

    /// Write a JSON run report to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Execute the selected notebooks in place.
    Execute(RunArgs),

    /// Convert the selected notebooks to HTML.
    Convert(RunArgs),

    /// Execute, then convert the notebooks that ran cleanly.
    Build(RunArgs),

    /// Execute every notebook in the repository.
    ExecuteAll(RunArgs),

    /// Convert every notebook in the repository.
    ConvertAll(RunArgs),

    /// Print the selected notebooks, one per line.
    List(SelectArgs),

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
    /// Write nbbuild.toml with defaults at the repository root.
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
        0 => "nbbuild=info",
        1 => "nbbuild=debug",
        _ => "nbbuild=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // stdout is reserved for command output (e.g. `list`)
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let repo = cli.repo.as_path();
    let config = cli.config.as_deref();
    match cli.command {
        Command::Execute(args) => cmd_run(repo, config, Stage::Execute, false, args).await,
        Command::Convert(args) => cmd_run(repo, config, Stage::Convert, false, args).await,
        Command::Build(args) => cmd_run(repo, config, Stage::Build, false, args).await,
        Command::ExecuteAll(args) => cmd_run(repo, config, Stage::Execute, true, args).await,
        Command::ConvertAll(args) => cmd_run(repo, config, Stage::Convert, true, args).await,
        Command::List(args) => cmd_list(repo, config, &args),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(repo),
            ConfigAction::Show => cmd_config_show(repo, config),
        },
    }
}

// ---------------------------------------------------------------------------
// Shared resolution
// ---------------------------------------------------------------------------

/// Load `--config`, else `nbbuild.toml` at the top of the working tree.
fn resolve_config(repo: &Path, config: Option<&Path>) -> Result<AppConfig> {
    let config = match config {
        Some(path) => load_config_from(path)?,
        None => {
            // outside a repository detection fails later with a clearer error
            let root = Git::open(repo)
                .map(|git| git.root().to_path_buf())
                .unwrap_or_else(|_| repo.to_path_buf());
            load_config(&root)?
        }
    };
    Ok(config)
}

/// Read a non-empty environment variable.
fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Inputs to change detection once flags, environment and payload are merged.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Selection {
    all: bool,
    base_ref: Option<String>,
}

/// Merge selection inputs.
///
/// All mode wins if requested by `--all`, by an `-all` command, or by the
/// override label. The base ref comes from `--base`, then the environment,
/// then the payload's pull request.
fn resolve_selection(
    args: &SelectArgs,
    force_all: bool,
    env_base_ref: Option<String>,
    event: &EventPayload,
    override_label: &str,
) -> Selection {
    let labelled = event.has_label(override_label);
    if labelled {
        info!(label = %override_label, "override label present, selecting all notebooks");
    }

    let base_ref = args
        .base
        .clone()
        .or(env_base_ref)
        .or_else(|| event.base_ref().map(String::from));

    Selection {
        all: force_all || args.all || labelled,
        base_ref,
    }
}

/// Work out the change set from flags, environment, and the CI event payload.
fn select_notebooks(
    repo: &Path,
    config: &AppConfig,
    args: &SelectArgs,
    force_all: bool,
) -> std::result::Result<ChangeSet, NbBuildError> {
    let event_path = args
        .event
        .clone()
        .or_else(|| env_non_empty(&config.git.event_path_env).map(PathBuf::from));
    let event = load_event(event_path.as_deref())?;

    let selection = resolve_selection(
        args,
        force_all,
        env_non_empty(&config.git.base_ref_env),
        &event,
        &config.git.override_label,
    );
    debug!(?selection, ?event_path, "selection inputs");

    let opts = DetectOptions {
        base_ref: selection.base_ref,
        remote: config.git.remote.clone(),
        all: selection.all,
        exclude_patterns: config.defaults.exclude_patterns.clone(),
    };

    detect(repo, &opts)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    repo: &Path,
    config_path: Option<&Path>,
    stage: Stage,
    force_all: bool,
    args: RunArgs,
) -> Result<()> {
    let config = resolve_config(repo, config_path)?;
    let changes = select_notebooks(repo, &config, &args.select, force_all)?;

    let html_dir = args
        .html_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.defaults.html_dir));
    let html_dir = if html_dir.is_absolute() {
        html_dir
    } else {
        changes.repo_root.join(html_dir)
    };

    let policy = if args.fail_fast {
        FailurePolicy::FailFast
    } else {
        config.failure_policy()
    };

    let pipeline_config = PipelineConfig {
        stage,
        policy,
        html_dir,
    };

    info!(
        %stage,
        ?policy,
        notebooks = changes.len(),
        selection = %describe_selection(&changes.mode),
        "starting run"
    );

    let toolchain = JupyterToolchain::from(&config.jupyter);
    let reporter = CliProgress::new();
    let report =
        nbbuild_core::pipeline::run(&changes, &pipeline_config, &toolchain, &reporter).await?;

    if let Some(path) = &args.report {
        report
            .write_json(path)
            .wrap_err_with(|| format!("writing report to {}", path.display()))?;
        info!(path = %path.display(), "run report written");
    }

    write_summary(&report, &mut std::io::stdout(), &mut std::io::stderr())?;
    outcome(&report)
}

/// `Err` naming the failure count when any notebook failed.
fn outcome(report: &RunReport) -> Result<()> {
    let failed = report.count(NotebookStatus::Failed);
    if failed > 0 {
        return Err(eyre!("{failed} notebook(s) failed during {}", report.stage));
    }
    Ok(())
}

fn cmd_list(repo: &Path, config_path: Option<&Path>, args: &SelectArgs) -> Result<()> {
    let config = resolve_config(repo, config_path)?;
    let changes = select_notebooks(repo, &config, args, false)?;

    info!(
        selection = %describe_selection(&changes.mode),
        count = changes.len(),
        "change set"
    );
    for path in changes.paths() {
        println!("{}", path.display());
    }
    Ok(())
}

fn cmd_config_init(repo: &Path) -> Result<()> {
    let path = init_config(repo)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(repo: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(repo, config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn describe_selection(mode: &SelectionMode) -> String {
    match mode {
        SelectionMode::All => "all notebooks".to_string(),
        SelectionMode::Modified {
            base_ref,
            base_commit,
        } => {
            let short = base_commit.get(..8).unwrap_or(base_commit.as_str());
            format!("changed since {base_ref} ({short})")
        }
    }
}

/// Write per-run totals to `out` and every failure to `err`.
fn write_summary(
    report: &RunReport,
    out: &mut impl Write,
    err: &mut impl Write,
) -> io::Result<()> {
    let succeeded = report.count(NotebookStatus::Succeeded);
    let failed = report.count(NotebookStatus::Failed);
    let pending = report.count(NotebookStatus::Pending);
    let elapsed = report.finished_at - report.started_at;

    writeln!(out)?;
    writeln!(out, "  Run {} ({})", report.run_id, report.stage)?;
    writeln!(out, "  Notebooks: {}", report.notebooks.len())?;
    writeln!(out, "  Succeeded: {succeeded}")?;
    writeln!(out, "  Failed:    {failed}")?;
    if pending > 0 {
        writeln!(out, "  Skipped:   {pending}")?;
    }
    writeln!(
        out,
        "  Time:      {:.1}s",
        elapsed.num_milliseconds() as f64 / 1000.0
    )?;
    writeln!(out)?;

    for nb in report.failures() {
        if let Some(failure) = &nb.failure {
            writeln!(err, "FAILED [{}] {}", failure.step, nb.path.display())?;
            writeln!(err, "    {}", failure.message)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn notebook_started(&self, step: Step, path: &Path, current: usize, total: usize) {
        let verb = match step {
            Step::Execute => "Executing",
            Step::Convert => "Converting",
        };
        self.spinner
            .set_message(format!("{verb} [{current}/{total}] {}", path.display()));
    }

    fn notebook_failed(&self, step: Step, path: &Path, error: &NbBuildError) {
        self.spinner.suspend(|| {
            eprintln!("  ✗ {step} {}: {error}", path.display());
        });
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}
