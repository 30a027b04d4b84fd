use std::fs::File;
use std::io::{self, BufWriter};
use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_gene_annotator::annotation::AnnotationTable;
use kira_gene_annotator::app::App;
use kira_gene_annotator::clock::SystemClock;
use kira_gene_annotator::config::{ConfigLoader, Settings};
use kira_gene_annotator::error::KiraError;
use kira_gene_annotator::input::read_identifiers;
use kira_gene_annotator::output::{JsonOutput, LogSink};
use kira_gene_annotator::uniprot::{MAX_SEARCH_SIZE, UniprotHttpClient};

#[derive(Parser)]
#[command(name = "kira-ga")]
#[command(about = "Map gene symbols to UniProt accessions and fetch their functional annotations")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true, help = "Polling deadline per mapping job, in seconds")]
    poll_timeout: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Map gene symbols to accessions and print the mapping as JSON")]
    Map(InputArgs),
    #[command(about = "Fetch annotations for a list of UniProt accessions")]
    Annotate(TableArgs),
    #[command(about = "Map gene symbols, then fetch annotations for the mapped accessions")]
    Run(TableArgs),
}

#[derive(Args, Clone)]
struct InputArgs {
    input: Utf8PathBuf,

    #[arg(long, help = "Column holding the identifiers in a CSV/TSV input")]
    column: Option<String>,

    #[arg(long)]
    batch_size: Option<usize>,
}

#[derive(Args, Clone)]
struct TableArgs {
    #[command(flatten)]
    input: InputArgs,

    #[arg(long, short, help = "Write the annotation table here instead of stdout")]
    output: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::InvalidBatchSize(_)
        | KiraError::BatchTooLarge { .. }
        | KiraError::InvalidAccession(_)
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidConfig(_)
        | KiraError::InputParse(_) => 2,
        other if other.is_upstream() => 3,
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
    let mut settings = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(secs) = cli.poll_timeout {
        settings.poll_timeout = Some(
            Duration::try_from_secs_f64(secs)
                .map_err(|_| KiraError::InvalidConfig("poll timeout must be non-negative".into()))?,
        );
    }

    match cli.command {
        Commands::Map(args) => {
            let app = build_app(settings, &args, |s, size| s.mapping_batch_size = size)?;
            let genes = read_identifiers(&args.input, args.column.as_deref())?;
            let result = app.map(&genes, &LogSink)?;
            JsonOutput::print_map(&result).into_diagnostic()?;
        }
        Commands::Annotate(args) => {
            let app = build_app(settings, &args.input, |s, size| {
                s.annotation_batch_size = size
            })?;
            let accessions = read_identifiers(&args.input.input, args.input.column.as_deref())?;
            let result = app.annotate(&accessions, &LogSink)?;
            write_table(&result.table, args.output.as_ref())?;
            if args.output.is_some() {
                JsonOutput::print_annotate(&result).into_diagnostic()?;
            }
        }
        Commands::Run(args) => {
            let app = build_app(settings, &args.input, |s, size| s.mapping_batch_size = size)?;
            let genes = read_identifiers(&args.input.input, args.input.column.as_deref())?;
            let result = app.run(&genes, &LogSink)?;
            write_table(&result.annotations.table, args.output.as_ref())?;
            if args.output.is_some() {
                JsonOutput::print_run(&result).into_diagnostic()?;
            }
        }
    }
    Ok(())
}

fn build_app(
    mut settings: Settings,
    args: &InputArgs,
    apply_batch_size: impl FnOnce(&mut Settings, usize),
) -> Result<App<UniprotHttpClient, SystemClock>, KiraError> {
    if let Some(size) = args.batch_size {
        if size == 0 {
            return Err(KiraError::InvalidBatchSize(size));
        }
        apply_batch_size(&mut settings, size);
    }
    if settings.annotation_batch_size > MAX_SEARCH_SIZE {
        return Err(KiraError::BatchTooLarge {
            size: settings.annotation_batch_size,
            max: MAX_SEARCH_SIZE,
        });
    }
    let client = UniprotHttpClient::new(&settings)?;
    Ok(App::new(client, SystemClock, settings))
}

fn write_table(table: &AnnotationTable, output: Option<&Utf8PathBuf>) -> Result<(), KiraError> {
    match output {
        Some(path) => {
            let file = File::create(path)
                .map_err(|err| KiraError::Filesystem(format!("{path}: {err}")))?;
            table.write_tsv(BufWriter::new(file))
        }
        None => table.write_tsv(io::stdout().lock()),
    }
}
