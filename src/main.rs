use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{debug, error, info};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use txn_pipeline::{
    ImputeStrategy, ParquetStore, PipelineError, QueryErrorKind, QueryParams, SimpleLogger,
    TransformConfig, read_raw, run_query, transform_with_report, write_csv, write_json,
};

static LOGGER: SimpleLogger = SimpleLogger;

#[derive(Parser, Debug)]
#[command(author, version, about = "Transaction cleaning pipeline and query tool", long_about = None)]
struct Cli {
    /// Location of the validated transaction table
    #[arg(long, global = true, default_value = "output/transactions.parquet")]
    store: PathBuf,

    /// Log debug output
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Clean a raw CSV or Parquet file and replace the stored table with the result
    Transform(TransformArgs),
    /// Filter the stored table by date range and status
    Query(QueryArgs),
}

#[derive(Args, Debug)]
struct TransformArgs {
    /// Raw transactions file (.csv or .parquet)
    #[arg(short, long)]
    input: PathBuf,

    /// Aggregate used to fill missing quantities within a product
    #[arg(long, default_value = "median")]
    quantity_strategy: ImputeStrategy,

    /// Aggregate used to fill missing prices within a product
    #[arg(long, default_value = "mean")]
    price_strategy: ImputeStrategy,

    /// Drop rows whose status is not a known value instead of keeping them
    #[arg(long, default_value_t = false)]
    drop_unrecognized_status: bool,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Earliest date to include (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<String>,

    /// Latest date to include (YYYY-MM-DD)
    #[arg(long)]
    end_date: Option<String>,

    /// Exact normalized status to match (e.g. complete)
    #[arg(long)]
    status: Option<String>,

    /// Output format for matching rows
    #[arg(long, default_value = "json")]
    format: OutputFormat,

    /// Write matching rows to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

fn main() -> ExitCode {
    let total_start = Instant::now();
    let cli = Cli::parse();

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(if cli.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        });
    }

    let store = ParquetStore::new(&cli.store);
    let code = match cli.command {
        Command::Transform(args) => match run_transform(&args, &store) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Transform failed: {}", e);
                ExitCode::FAILURE
            }
        },
        Command::Query(args) => run_query_command(&args, &store),
    };

    debug!("Total runtime: {:.2?}", total_start.elapsed());
    code
}

fn run_transform(args: &TransformArgs, store: &ParquetStore) -> Result<(), PipelineError> {
    let config = TransformConfig {
        quantity_strategy: args.quantity_strategy,
        price_strategy: args.price_strategy,
        drop_unrecognized_status: args.drop_unrecognized_status,
    };
    debug!(
        "Input file: {} | Store: {} | {:?}",
        args.input.display(),
        store.path().display(),
        config
    );

    let ingest_start = Instant::now();
    let batches = read_raw(&args.input)?;
    debug!("Ingestion took {:.2?}", ingest_start.elapsed());

    let processing_start = Instant::now();
    let (rows, report) = transform_with_report(&batches, &config)?;
    info!(
        "Data processing completed in {:.2?} | {} of {} rows kept",
        processing_start.elapsed(),
        report.output_rows,
        report.input_rows
    );
    debug!("{:?}", report);

    let store_start = Instant::now();
    store.replace(&rows)?;
    debug!("Store write took {:.2?}", store_start.elapsed());
    Ok(())
}

fn run_query_command(args: &QueryArgs, store: &ParquetStore) -> ExitCode {
    let params = QueryParams {
        start_date: args.start_date.clone(),
        end_date: args.end_date.clone(),
        status: args.status.clone(),
    };

    let rows = match run_query(store, &params) {
        Ok(rows) => rows,
        Err(e) => {
            error!("{}", e);
            return match e.kind() {
                QueryErrorKind::Validation => ExitCode::from(2),
                QueryErrorKind::Infrastructure => ExitCode::FAILURE,
            };
        }
    };

    let written = match &args.output {
        Some(path) => File::create(path)
            .map_err(PipelineError::from)
            .and_then(|file| write_rows(&rows, args.format, BufWriter::new(file))),
        None => write_rows(&rows, args.format, io::stdout().lock()),
    };
    match written {
        Ok(()) => {
            info!("Returned {} rows", rows.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to write results: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn write_rows<W: Write>(
    rows: &[txn_pipeline::Transaction],
    format: OutputFormat,
    mut output: W,
) -> Result<(), PipelineError> {
    match format {
        OutputFormat::Json => write_json(rows, &mut output)?,
        OutputFormat::Csv => write_csv(rows, &mut output)?,
    }
    output.flush()?;
    Ok(())
}
