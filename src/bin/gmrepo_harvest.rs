use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use gmrepo_harvest::browser::WebDriverFetcher;
use gmrepo_harvest::config::{ConfigLoader, ConfigOverrides, FetcherKind, ResolvedConfig};
use gmrepo_harvest::engine::{DispatchEngine, DispatchOptions, ProgressSink, RunReport, Shutdown};
use gmrepo_harvest::error::HarvestError;
use gmrepo_harvest::fetch::ItemFetcher;
use gmrepo_harvest::gmrepo::GmrepoHttpClient;
use gmrepo_harvest::index::{GroupIndex, GroupIndexSource, TableSource};
use gmrepo_harvest::ledger::CompletionLedger;
use gmrepo_harvest::output::{GroupListing, JsonOutput, LogProgress, OutputMode, TextOutput};
use gmrepo_harvest::store::DirectoryStore;

/// Exit code for a run that finished but left failed items behind.
const EXIT_PARTIAL: u8 = 3;

#[derive(Parser)]
#[command(name = "gmrepo-harvest")]
#[command(about = "Resumable bulk download of GMrepo species abundance tables, grouped by disease")]
#[command(version, author)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    fetch: FetchArgs,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download every pending run (default)")]
    Fetch(FetchArgs),
    #[command(about = "Report settled and pending runs without touching the network")]
    Status(CommonArgs),
    #[command(about = "List groups in the input table with their run counts")]
    Groups(CommonArgs),
}

#[derive(Args, Clone, Default)]
struct CommonArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    input: Option<String>,

    #[arg(long)]
    sheet: Option<String>,

    #[arg(long)]
    output_dir: Option<String>,

    #[arg(long)]
    ledger: Option<String>,

    #[arg(long)]
    json: bool,
}

#[derive(Args, Clone, Default)]
struct FetchArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long)]
    retries: Option<usize>,

    #[arg(long, value_enum)]
    fetcher: Option<FetcherKind>,

    /// Stop starting new runs after this many seconds.
    #[arg(long)]
    max_runtime_secs: Option<u64>,

    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<HarvestError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &HarvestError) -> u8 {
    if error.is_load_error() || error.is_config_error() {
        2
    } else {
        1
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Fetch(args)) => run_fetch(args),
        Some(Commands::Status(common)) => run_fetch(FetchArgs {
            common,
            dry_run: true,
            ..FetchArgs::default()
        }),
        Some(Commands::Groups(common)) => run_groups(common),
        None => run_fetch(cli.fetch),
    }
}

fn output_mode(common: &CommonArgs) -> OutputMode {
    if common.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    }
}

fn overrides(common: &CommonArgs) -> ConfigOverrides {
    ConfigOverrides {
        input: common.input.clone(),
        sheet: common.sheet.clone(),
        output_dir: common.output_dir.clone(),
        ledger: common.ledger.clone(),
        ..ConfigOverrides::default()
    }
}

fn load_index(config: &ResolvedConfig) -> Result<GroupIndex, HarvestError> {
    TableSource::new(&config.input).load()
}

fn run_groups(common: CommonArgs) -> miette::Result<ExitCode> {
    let config = ConfigLoader::resolve(common.config.as_deref(), overrides(&common))?;
    let index = load_index(&config)?;
    let listing = GroupListing::from(&index);
    match output_mode(&common) {
        OutputMode::Json => JsonOutput::print_groups(&listing).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_groups(&listing).into_diagnostic()?,
    }
    Ok(ExitCode::SUCCESS)
}

fn run_fetch(args: FetchArgs) -> miette::Result<ExitCode> {
    let FetchArgs {
        common,
        workers,
        timeout_secs,
        retries,
        fetcher,
        max_runtime_secs,
        dry_run,
    } = args;
    let mode = output_mode(&common);

    let config = ConfigLoader::resolve(
        common.config.as_deref(),
        ConfigOverrides {
            workers,
            timeout_secs,
            retries,
            fetcher,
            ..overrides(&common)
        },
    )?;
    let index = load_index(&config)?;

    let store = DirectoryStore::new(config.output_dir.clone());
    let ledger = if dry_run {
        CompletionLedger::open_read_only(&config.ledger_path)
    } else {
        CompletionLedger::open(&config.ledger_path)
    }?;
    let options = DispatchOptions {
        workers: config.workers,
        dry_run,
    };
    let shutdown = match max_runtime_secs {
        Some(secs) => Shutdown::with_deadline(Duration::from_secs(secs)),
        None => Shutdown::new(),
    };

    // A dry run never fetches, so it never needs the browser download area.
    let item_fetcher: Box<dyn ItemFetcher> = match config.fetcher {
        FetcherKind::Browser if !dry_run => Box::new(WebDriverFetcher::new(&config.browser)?),
        _ => Box::new(GmrepoHttpClient::new(&config.api)?),
    };
    let engine = DispatchEngine::new(store, ledger, item_fetcher, options);

    let sink: &dyn ProgressSink = match mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &LogProgress,
    };
    let report = engine.run(&index, &shutdown, sink)?;
    print_report(&report, mode)?;

    if report.has_failures() && !dry_run {
        return Ok(ExitCode::from(EXIT_PARTIAL));
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &RunReport, mode: OutputMode) -> miette::Result<()> {
    match mode {
        OutputMode::Json => JsonOutput::print_report(report).into_diagnostic(),
        OutputMode::Text => TextOutput::print_report(report).into_diagnostic(),
    }
}
