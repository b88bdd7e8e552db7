use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use mmit::aggregate::AnnotationLimit;
use mmit::app::{App, RunOptions};
use mmit::config::{ConfigLoader, ResolvedConfig};
use mmit::domain::{Operation, StudyFormat};
use mmit::error::{ErrorClass, MmitError};
use mmit::metaspace::MetaspaceHttpClient;
use mmit::object_store::HttpObjectStore;
use mmit::output::{
    JsonOutput, OutputMode, StderrProgress, print_report_summary, print_samples_summary,
};
use mmit::retrieval::RetrievalEngine;
use mmit::sample::MetadataLoader;
use mmit::session::StoreSession;
use mmit::sink::Sink;

#[derive(Parser)]
#[command(name = "mmit")]
#[command(about = "METASPACE to MetaboLights interface tools")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Path to mmit.json
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run operations over a METASPACE metadata export")]
    Run(RunArgs),
    #[command(about = "Print the parsed submissions without touching the network")]
    Show(ShowArgs),
    #[command(about = "List objects in a store")]
    List(ListArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(short, long)]
    input: PathBuf,

    #[arg(short, long)]
    output: Utf8PathBuf,

    #[arg(long = "op", value_enum, required = true)]
    operations: Vec<Operation>,

    #[arg(long, default_value = "")]
    title: String,

    #[arg(long, default_value = "")]
    description: String,

    #[arg(long)]
    database: Option<String>,

    #[arg(long)]
    fdr: Option<f64>,

    #[arg(long)]
    annotation_limit: Option<usize>,

    #[arg(long, value_enum)]
    study_format: Option<StudyFormat>,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct ShowArgs {
    #[arg(short, long)]
    input: PathBuf,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    store: Option<String>,

    #[arg(long, default_value = "")]
    prefix: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<MmitError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MmitError) -> u8 {
    match error.class() {
        ErrorClass::Data | ErrorClass::Config => 2,
        ErrorClass::Transfer | ErrorClass::Service => 3,
        ErrorClass::Serialization => 4,
        ErrorClass::Io => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => run_batch(args, &config, output_mode),
        Commands::Show(args) => run_show(args, output_mode),
        Commands::List(args) => run_list(args, &config, output_mode),
    }
}

fn run_batch(
    args: RunArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let samples = MetadataLoader::from_path(&args.input)?;
    if let Some(fdr) = args.fdr
        && !(0.0..=1.0).contains(&fdr)
    {
        return Err(MmitError::ConfigParse(format!("fdr must be within [0, 1], got {fdr}")).into());
    }

    let session = StoreSession::from_config(config);
    let store = HttpObjectStore::connect(&session)?;
    let service = MetaspaceHttpClient::new(&config.service_url)?;
    let limit = args
        .annotation_limit
        .map_or(config.annotation_limit, AnnotationLimit::First);
    let app = App::new(&session, store, service, Sink::new(args.output), limit);

    let mut options = RunOptions::from_config(config);
    options.title = args.title;
    options.description = args.description;
    options.dry_run = args.dry_run;
    if let Some(database) = args.database {
        options.database = database;
    }
    if let Some(fdr) = args.fdr {
        options.fdr = fdr;
    }
    if let Some(format) = args.study_format {
        options.study_format = format;
    }

    let report = match output_mode {
        OutputMode::Interactive => {
            let report = app.run(&samples, &args.operations, &options, &StderrProgress)?;
            print_report_summary(&report);
            report
        }
        OutputMode::NonInteractive => {
            let report = app.run(&samples, &args.operations, &options, &JsonOutput)?;
            JsonOutput::print_report(&report).into_diagnostic()?;
            report
        }
    };

    if report.has_failures() {
        return Err(miette::Report::msg("one or more operations failed"));
    }
    Ok(())
}

fn run_show(args: ShowArgs, output_mode: OutputMode) -> miette::Result<()> {
    let samples = MetadataLoader::from_path(&args.input)?;
    match output_mode {
        OutputMode::Interactive => print_samples_summary(&samples),
        OutputMode::NonInteractive => JsonOutput::print_samples(&samples).into_diagnostic()?,
    }
    Ok(())
}

fn run_list(
    args: ListArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let session = StoreSession::from_config(config);
    if args.store.is_none() && session.default_bucket().is_none() {
        return Err(MmitError::MissingConfig.into());
    }
    let store = HttpObjectStore::connect(&session)?;
    let engine = RetrievalEngine::new(&session, store, Sink::new("."));
    let locators = engine.discover(args.store.as_deref(), &args.prefix)?;
    match output_mode {
        OutputMode::Interactive => {
            for locator in &locators {
                println!("{}", session.uri(locator));
            }
        }
        OutputMode::NonInteractive => JsonOutput::print_locators(&locators).into_diagnostic()?,
    }
    Ok(())
}
