use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use collection_feed::aggregate::{AggregateProjector, display_slice};
use collection_feed::bus::NotificationBus;
use collection_feed::config::{ConfigLoader, ResolvedConfig};
use collection_feed::coordinator::{GetOptions, IngestionCoordinator};
use collection_feed::error::FeedError;
use collection_feed::fetch::VamHttpClient;
use collection_feed::output::{FilterOutput, GetOutput, JsonOutput};
use collection_feed::refill::RefillReport;
use collection_feed::store::FileStore;

type Coordinator = IngestionCoordinator<VamHttpClient, FileStore>;

#[derive(Parser)]
#[command(name = "collection-feed")]
#[command(about = "Incrementally ingest a museum collection API into a local snapshot")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Serve the snapshot, refreshing it when stale")]
    Get(GetArgs),
    #[command(about = "Filter the snapshot by year and text")]
    Filter(FilterArgs),
    #[command(about = "Print the year histogram and vocabulary")]
    Summary,
    #[command(about = "Refresh and stream updates while background pages arrive")]
    Watch(PageArgs),
}

#[derive(Args, Clone, Copy)]
struct PageArgs {
    #[arg(long)]
    force: bool,

    #[arg(long)]
    initial_pages: Option<u32>,

    #[arg(long)]
    total_pages: Option<u32>,
}

#[derive(Args)]
struct GetArgs {
    #[command(flatten)]
    pages: PageArgs,

    #[arg(long, help = "Print the background refill report")]
    report: bool,
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long)]
    year: Option<i32>,

    #[arg(long)]
    query: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<FeedError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &FeedError) -> u8 {
    match error {
        FeedError::SnapshotMissing | FeedError::ConfigRead(_) => 2,
        error if error.is_fetch() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let coordinator = build_coordinator(&config)?;

    let outcome = match cli.command {
        Command::Get(args) => run_get(&coordinator, &config, args),
        Command::Filter(args) => run_filter(&coordinator, &config, args),
        Command::Summary => run_summary(&coordinator, &config),
        Command::Watch(args) => run_watch(&coordinator, &config, args),
    };
    // only reached with a refill still running when a command failed early
    coordinator.shutdown();
    outcome
}

fn build_coordinator(config: &ResolvedConfig) -> miette::Result<Coordinator> {
    let client = VamHttpClient::new(config.api.clone())?;
    let store = FileStore::open(config.cache_path.clone())?;
    Ok(IngestionCoordinator::new(
        Arc::new(client),
        Arc::new(store),
        config.coordinator.clone(),
    ))
}

fn page_options(config: &ResolvedConfig, args: PageArgs) -> GetOptions {
    GetOptions {
        force_refresh: args.force,
        initial_pages: args.initial_pages.unwrap_or(config.pages.initial_pages),
        total_pages: args.total_pages.unwrap_or(config.pages.total_pages),
    }
}

fn run_get(coordinator: &Coordinator, config: &ResolvedConfig, args: GetArgs) -> miette::Result<()> {
    let result = coordinator.get_with_action(page_options(config, args.pages))?;
    let snapshot = &result.snapshot;
    JsonOutput::print_get(&GetOutput {
        action: result.action,
        generation: snapshot.generation,
        total: snapshot.len(),
        aggregates: coordinator.summary(snapshot),
        records: display_slice(&snapshot.records),
    })
    .into_diagnostic()?;

    let report = finish_refill(coordinator);
    if args.report
        && let Some(report) = report
    {
        JsonOutput::print_report(&report).into_diagnostic()?;
    }
    Ok(())
}

fn run_filter(
    coordinator: &Coordinator,
    config: &ResolvedConfig,
    args: FilterArgs,
) -> miette::Result<()> {
    let snapshot = coordinator.get(config.pages)?;
    let records = coordinator.filter(&snapshot, args.year, args.query.as_deref());
    JsonOutput::print_filter(&FilterOutput {
        matched: records.len(),
        records,
    })
    .into_diagnostic()?;
    finish_refill(coordinator);
    Ok(())
}

fn run_summary(coordinator: &Coordinator, config: &ResolvedConfig) -> miette::Result<()> {
    let snapshot = coordinator.get(config.pages)?;
    JsonOutput::print_summary(&coordinator.summary(&snapshot)).into_diagnostic()?;
    finish_refill(coordinator);
    Ok(())
}

/// Lets a refill started by this run reach its last page, so the cache it
/// leaves behind holds every configured page.
fn finish_refill(coordinator: &Coordinator) -> Option<RefillReport> {
    let report = coordinator.wait_for_refill()?;
    tracing::info!(
        pages = report.appended_pages.len(),
        failed = report.failed_pages.len(),
        "background refill finished"
    );
    Some(report)
}

fn run_watch(
    coordinator: &Coordinator,
    config: &ResolvedConfig,
    args: PageArgs,
) -> miette::Result<()> {
    let projector = AggregateProjector::spawn(
        coordinator.store().clone(),
        coordinator.subscribe(),
        Arc::new(NotificationBus::new(config.coordinator.bus_capacity)),
    );
    let updates = projector.subscribe();

    let snapshot = coordinator.get(page_options(config, args))?;
    tracing::info!(records = snapshot.len(), "initial snapshot ready");

    while coordinator.refill_in_progress() {
        match updates.recv_timeout(Duration::from_millis(250)) {
            Ok(update) => JsonOutput::print_update(&update).into_diagnostic()?,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    let report = coordinator.wait_for_refill();
    // lets the projector drain its queue and exit
    coordinator.bus().close();
    projector.join();
    for update in updates.try_iter() {
        JsonOutput::print_update(&update).into_diagnostic()?;
    }
    if let Some(report) = report {
        JsonOutput::print_report(&report).into_diagnostic()?;
    }
    Ok(())
}
