use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use lumo_media_archiver::archive::{ArchiveOptions, Archiver};
use lumo_media_archiver::catalog::CatalogHttpClient;
use lumo_media_archiver::config::{ConfigLoader, LocalSettings, Overrides, ResolvedSettings};
use lumo_media_archiver::error::ArchiverError;
use lumo_media_archiver::fetcher::HttpItemFetcher;
use lumo_media_archiver::output::{
    ConsoleOutput, JsonOutput, OutputMode, print_plan_table, print_run_summary,
    print_state_summary,
};
use lumo_media_archiver::state::ProgressStore;
use lumo_media_archiver::store::BackupStore;

#[derive(Parser)]
#[command(name = "lumo-ma")]
#[command(about = "Resumable DVD-chunked archiver for self-hosted media catalogs")]
#[command(version, author)]
struct Cli {
    /// Emit machine-readable JSON instead of human output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Archive the catalog onto capacity-bounded chunks")]
    Archive(ArchiveArgs),
    #[command(about = "Show how the catalog would be laid out into chunks")]
    Plan(ConnectionArgs),
    #[command(about = "Show the persisted resume state")]
    Status(ConnectionArgs),
    #[command(about = "Delete the persisted resume state")]
    Reset(ResetArgs),
}

#[derive(Args, Clone)]
struct ConnectionArgs {
    #[arg(long)]
    config: Option<String>,

    /// Catalog base URL, e.g. https://photos.example.net
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    api_key: Option<String>,

    #[arg(long)]
    backup_dir: Option<String>,

    #[arg(long)]
    state_file: Option<String>,

    /// Chunk capacity in bytes (default: single-layer DVD).
    #[arg(long)]
    capacity: Option<u64>,

    #[arg(long)]
    page_size: Option<u32>,
}

#[derive(Args, Clone)]
struct ArchiveArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Walk the archival loop without transferring or persisting anything.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Clone)]
struct ResetArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Required: deleting the state makes the next run start from scratch.
    #[arg(long)]
    force: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<ArchiverError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ArchiverError) -> u8 {
    match error {
        ArchiverError::MissingConfig
        | ArchiverError::ConfigRead(_)
        | ArchiverError::ConfigParse(_)
        | ArchiverError::InvalidConfig(_)
        | ArchiverError::ResumeMarkerNotFound(_) => 2,
        ArchiverError::Probe(_)
        | ArchiverError::CatalogHttp(_)
        | ArchiverError::CatalogStatus { .. }
        | ArchiverError::FetchHttp(_)
        | ArchiverError::FetchStatus { .. } => 3,
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
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    match cli.command {
        Commands::Archive(args) => run_archive(args, output_mode),
        Commands::Plan(args) => run_plan(args, output_mode),
        Commands::Status(args) => run_status(args, output_mode),
        Commands::Reset(args) => run_reset(args),
    }
}

fn overrides_from(connection: &ConnectionArgs) -> Overrides {
    Overrides {
        base_url: connection.base_url.clone(),
        api_key: connection.api_key.clone(),
        backup_dir: connection.backup_dir.clone(),
        state_file: connection.state_file.clone(),
        capacity_bytes: connection.capacity,
        page_size: connection.page_size,
    }
}

fn resolve(connection: &ConnectionArgs) -> miette::Result<ResolvedSettings> {
    ConfigLoader::resolve(connection.config.as_deref(), overrides_from(connection))
        .into_diagnostic()
}

fn resolve_local(connection: &ConnectionArgs) -> miette::Result<LocalSettings> {
    ConfigLoader::resolve_local(connection.config.as_deref(), overrides_from(connection))
        .into_diagnostic()
}

fn build_archiver(
    settings: &ResolvedSettings,
) -> miette::Result<Archiver<CatalogHttpClient, HttpItemFetcher>> {
    let catalog = CatalogHttpClient::new(&settings.base_url, &settings.api_key).into_diagnostic()?;
    let fetcher = HttpItemFetcher::new(&settings.base_url, &settings.api_key).into_diagnostic()?;
    Ok(Archiver::new(
        catalog,
        fetcher,
        BackupStore::new(settings.backup_dir.clone()),
        ProgressStore::new(settings.state_file.clone()),
        settings.capacity_bytes,
        settings.page_size,
    ))
}

fn run_archive(args: ArchiveArgs, output_mode: OutputMode) -> miette::Result<()> {
    let settings = resolve(&args.connection)?;
    let archiver = build_archiver(&settings)?;
    let options = ArchiveOptions {
        dry_run: args.dry_run,
    };

    match output_mode {
        OutputMode::Json => {
            let report = archiver.run(options, &JsonOutput).into_diagnostic()?;
            JsonOutput::print_run(&report).into_diagnostic()?;
        }
        OutputMode::Human => {
            let report = archiver.run(options, &ConsoleOutput).into_diagnostic()?;
            print_run_summary(&report);
        }
    }
    Ok(())
}

fn run_plan(args: ConnectionArgs, output_mode: OutputMode) -> miette::Result<()> {
    let settings = resolve(&args)?;
    let archiver = build_archiver(&settings)?;

    match output_mode {
        OutputMode::Json => {
            let report = archiver.plan(&JsonOutput).into_diagnostic()?;
            JsonOutput::print_plan(&report).into_diagnostic()?;
        }
        OutputMode::Human => {
            let report = archiver.plan(&ConsoleOutput).into_diagnostic()?;
            print_plan_table(&report);
        }
    }
    Ok(())
}

fn run_status(args: ConnectionArgs, output_mode: OutputMode) -> miette::Result<()> {
    let settings = resolve_local(&args)?;
    let store = ProgressStore::new(settings.state_file.clone());
    let state = store.load().into_diagnostic()?;

    match output_mode {
        OutputMode::Json => JsonOutput::print_state(&state).into_diagnostic()?,
        OutputMode::Human => print_state_summary(&state),
    }
    Ok(())
}

fn run_reset(args: ResetArgs) -> miette::Result<()> {
    let settings = resolve_local(&args.connection)?;
    if !args.force {
        return Err(miette::Report::msg(
            "refusing to delete resume state without --force",
        ));
    }
    let store = ProgressStore::new(settings.state_file.clone());
    let removed = store.clear().into_diagnostic()?;
    if removed {
        println!("removed state file {}", settings.state_file);
    } else {
        println!("no state file at {}", settings.state_file);
    }
    Ok(())
}
