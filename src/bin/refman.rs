use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use refman::app::{App, ProgressSink, RegistryTarget, TracingSink};
use refman::config::Settings;
use refman::domain::RefDataset;
use refman::download::{CancelToken, Downloader, FetchOptions};
use refman::error::RefmanError;
use refman::location::PathResolver;
use refman::output::{JsonOutput, OutputMode, TextOutput};
use refman::remote::HttpRemoteClient;

#[derive(Parser)]
#[command(name = "refman")]
#[command(about = "Register and download combinations of genomic reference files")]
#[command(version, author)]
struct Cli {
    /// Registry file (or directory holding refman.toml); overrides --global
    #[arg(long, global = true)]
    registry: Option<String>,

    /// Use the per-user global registry
    #[arg(long, global = true)]
    global: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Create a new, empty registry")]
    Init(InitArgs),
    #[command(about = "Register (or replace) a dataset")]
    Register(RegisterArgs),
    #[command(about = "List registered datasets")]
    List(ListArgs),
    #[command(about = "Download registered files")]
    Download(DownloadArgs),
    #[command(about = "Remove a dataset from the registry")]
    Remove(RemoveArgs),
}

#[derive(Args)]
struct InitArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Args)]
struct RegisterArgs {
    label: String,
    #[arg(long)]
    fasta: Option<String>,
    #[arg(long)]
    genbank: Option<String>,
    #[arg(long)]
    gfa: Option<String>,
    #[arg(long)]
    gff: Option<String>,
    #[arg(long)]
    gtf: Option<String>,
    #[arg(long)]
    bed: Option<String>,
}

#[derive(Args)]
struct ListArgs {
    label: Option<String>,
}

#[derive(Args)]
struct DownloadArgs {
    /// Dataset to fetch; all datasets when omitted
    label: Option<String>,

    /// Destination directory (default: current directory)
    #[arg(long)]
    dest: Option<Utf8PathBuf>,

    /// Re-fetch files that already exist
    #[arg(long)]
    force: bool,

    /// Give up on unfinished files after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[derive(Args)]
struct RemoveArgs {
    label: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<RefmanError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &RefmanError) -> u8 {
    match error {
        RefmanError::RegistryNotFound(_)
        | RefmanError::RegistryAlreadyExists(_)
        | RefmanError::DatasetNotFound(_) => 2,
        RefmanError::Network { .. }
        | RefmanError::HttpStatus { .. }
        | RefmanError::DownloadFailed { .. } => 3,
        RefmanError::InvalidDataset { .. }
        | RefmanError::InvalidUrl { .. }
        | RefmanError::PathResolution(_) => 4,
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
        OutputMode::Text
    };
    let target = RegistryTarget {
        path: cli.registry,
        global: cli.global,
    };

    let settings = Settings::from_env();
    let resolver = PathResolver::new(&settings)?;
    let client = HttpRemoteClient::new(settings.timeout)?;
    let app = App::new(
        resolver,
        Downloader::new(client, FetchOptions::from_settings(&settings)),
    );
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &TracingSink,
    };

    match cli.command {
        Command::Init(args) => {
            let result = app.init(args.title, args.description, &target, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_init(&result).into_diagnostic()?,
                OutputMode::Text => println!("Initialized registry at {}", result.location.path),
            }
        }
        Command::Register(args) => {
            let dataset = RefDataset::try_new(
                args.label, args.fasta, args.genbank, args.gfa, args.gff, args.gtf, args.bed,
            )?;
            let result = app.register(dataset, &target, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_register(&result).into_diagnostic()?,
                OutputMode::Text => {
                    let verb = if result.replaced { "Replaced" } else { "Registered" };
                    println!("{verb} '{}' in {}", result.label, result.location.path);
                }
            }
        }
        Command::List(args) => {
            let result = app.list(args.label.as_deref(), &target, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_list(&result).into_diagnostic()?,
                OutputMode::Text => {
                    TextOutput::print(&TextOutput::render_list(&result)).into_diagnostic()?
                }
            }
        }
        Command::Download(args) => run_download(&app, args, &target, output_mode, sink)?,
        Command::Remove(args) => {
            let result = app.remove(&args.label, &target, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_remove(&result).into_diagnostic()?,
                OutputMode::Text => {
                    println!("Removed '{}' from {}", result.label, result.location.path)
                }
            }
        }
    }
    Ok(())
}

fn run_download(
    app: &App<HttpRemoteClient>,
    args: DownloadArgs,
    target: &RegistryTarget,
    output_mode: OutputMode,
    sink: &dyn ProgressSink,
) -> miette::Result<()> {
    let cancel = match args.deadline_secs {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };

    let result = app.download(
        args.label.as_deref(),
        args.dest.as_deref(),
        args.force,
        target,
        &cancel,
        sink,
    );
    match result {
        Ok(result) => match output_mode {
            OutputMode::Json => JsonOutput::print_download(&result).into_diagnostic(),
            OutputMode::Text => {
                TextOutput::print(&TextOutput::render_report(&result.report)).into_diagnostic()
            }
        },
        Err(RefmanError::DownloadFailed { report }) => {
            match output_mode {
                OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
                OutputMode::Text => {
                    TextOutput::print(&TextOutput::render_report(&report)).into_diagnostic()?
                }
            }
            Err(RefmanError::DownloadFailed { report }.into())
        }
        Err(err) => Err(err.into()),
    }
}
