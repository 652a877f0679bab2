use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use sami_pdf2xls::{
    BatchContext, Direction, ErrorKind, ExtractOptions, FieldMapping, PageSelection, PdfSource,
    PipelineError, PipelineOptions, QualityMode, StyleMode, TranscribeOptions,
    TranscriptionReport, output_file_name, records_from_pdfs, transcribe_pdfs,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "pdf2xls",
    version,
    about = "Transcribe vehicle-crossing tables from PDFs into an XLS template"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write the crossing records into a copy of the template.
    Convert(ConvertArgs),
    /// Print the normalized records as JSON without touching a template.
    Records(BatchArgs),
}

#[derive(Debug, Args)]
struct BatchArgs {
    /// Input PDF path. Repeatable; documents are read in the order given.
    #[arg(short, long = "input", required = true)]
    inputs: Vec<PathBuf>,

    /// Crossing direction: out or in.
    #[arg(short, long)]
    direction: Direction,

    /// Declaration number written on outbound rows.
    #[arg(long, default_value = "")]
    document_number: String,

    /// Page selection like 1-3,5, applied to every document.
    #[arg(long)]
    pages: Option<String>,

    /// Minimum cells required per candidate table row.
    #[arg(long, default_value_t = 2)]
    min_cols: usize,

    /// Header of the plate column.
    #[arg(long, default_value = sami_pdf2xls::DEFAULT_PLATE_HEADER)]
    plate_header: String,

    /// Fail on low-confidence tables instead of keeping them.
    #[arg(long, conflicts_with = "skip_ambiguous")]
    strict: bool,

    /// Drop low-confidence tables instead of keeping them.
    #[arg(long, conflicts_with = "strict")]
    skip_ambiguous: bool,

    /// Enable verbose warning output.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Args)]
struct ConvertArgs {
    #[command(flatten)]
    batch: BatchArgs,

    /// Template workbook path.
    #[arg(short, long, env = "PDF2XLS_TEMPLATE")]
    template: PathBuf,

    /// Output path. Defaults to a timestamped name in --output-dir.
    #[arg(short, long, conflicts_with = "output_dir")]
    output: Option<PathBuf>,

    /// Directory for the timestamped output file.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Store every value as text with the @ number format.
    #[arg(long)]
    force_text: bool,

    /// First data row, 0-based.
    #[arg(long, default_value_t = 1)]
    start_row: u16,

    /// First data column, 0-based.
    #[arg(long, default_value_t = 0)]
    start_col: u16,

    /// Sheet index, 0-based.
    #[arg(long, default_value_t = 0)]
    sheet: usize,

    /// Print a JSON summary of the run on stdout.
    #[arg(long)]
    json: bool,
}

fn batch_context(args: &BatchArgs) -> BatchContext {
    BatchContext::new(args.direction, args.document_number.clone())
}

fn parse_extract_options(args: &BatchArgs) -> Result<ExtractOptions> {
    let pages = args
        .pages
        .as_deref()
        .map(PageSelection::from_str)
        .transpose()
        .map_err(|error| anyhow!("invalid page selection: {error}"))
        .context("failed to parse --pages")?;

    let quality_mode = if args.strict {
        QualityMode::Strict
    } else if args.skip_ambiguous {
        QualityMode::SkipAmbiguous
    } else {
        QualityMode::BestEffort
    };

    Ok(ExtractOptions {
        pages,
        quality_mode,
        min_cols: args.min_cols,
    })
}

fn parse_options(args: &BatchArgs, transcribe: TranscribeOptions) -> Result<PipelineOptions> {
    Ok(PipelineOptions {
        extract: parse_extract_options(args)?,
        fields: FieldMapping {
            plate_header: args.plate_header.clone(),
        },
        transcribe,
    })
}

fn read_documents(paths: &[PathBuf]) -> Result<Vec<PdfSource>> {
    paths
        .iter()
        .map(|path| {
            PdfSource::from_path(path)
                .with_context(|| format!("failed to read PDF '{}'", path.display()))
        })
        .collect()
}

fn log_report(report: &TranscriptionReport, verbose: bool) {
    if report.warnings.is_empty() {
        return;
    }

    eprintln!("warning: {} issue(s) detected", report.warnings.len());
    if verbose {
        for warning in &report.warnings {
            eprintln!(
                "  - {:?} document={:?} page={:?} confidence={:?}: {}",
                warning.code, warning.document, warning.page, warning.confidence, warning.message
            );
        }
    }
}

fn output_path(args: &ConvertArgs) -> PathBuf {
    args.output.clone().unwrap_or_else(|| {
        args.output_dir
            .join(output_file_name(&chrono::Local::now()))
    })
}

/// Writes through a temporary file next to `path`, so a failed run never
/// leaves a truncated workbook behind.
fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create a temporary file in '{}'", dir.display()))?;
    file.write_all(bytes)
        .and_then(|()| file.as_file().sync_all())
        .with_context(|| format!("failed to write '{}'", file.path().display()))?;
    file.persist(path)
        .with_context(|| format!("failed to write '{}'", path.display()))?;
    Ok(())
}

fn run_convert(args: &ConvertArgs) -> Result<()> {
    let batch = batch_context(&args.batch);
    let options = parse_options(
        &args.batch,
        TranscribeOptions {
            sheet_index: args.sheet,
            start_row: args.start_row,
            start_col: args.start_col,
            style_mode: if args.force_text {
                StyleMode::ForceText
            } else {
                StyleMode::PreserveType
            },
        },
    )?;
    let documents = read_documents(&args.batch.inputs)?;
    let template = std::fs::read(&args.template)
        .with_context(|| format!("failed to read template '{}'", args.template.display()))?;

    let transcription = transcribe_pdfs(&documents, &template, &batch, &options)
        .context("failed to transcribe records")?;
    let path = output_path(args);
    write_output(&path, &transcription.bytes)?;
    log_report(&transcription.report, args.batch.verbose);

    if args.json {
        let summary = serde_json::json!({
            "output": path.display().to_string(),
            "bytes": transcription.bytes.len(),
            "report": transcription.report,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        eprintln!(
            "wrote {} row(s) to '{}'",
            transcription.report.row_count,
            path.display()
        );
    }
    Ok(())
}

fn run_records(args: &BatchArgs) -> Result<()> {
    let batch = batch_context(args);
    let options = parse_options(args, TranscribeOptions::default())?;
    let documents = read_documents(&args.inputs)?;
    let records = records_from_pdfs(&documents, &batch, &options)
        .context("failed to read records")?;
    log_report(&records.report, args.verbose);
    println!("{}", serde_json::to_string_pretty(&records.records)?);
    Ok(())
}

fn exit_code(error: &anyhow::Error) -> ExitCode {
    let empty = error
        .downcast_ref::<PipelineError>()
        .is_some_and(|error| error.kind() == ErrorKind::ExtractionEmpty);
    if empty {
        ExitCode::from(2)
    } else {
        ExitCode::from(1)
    }
}

fn main() -> ExitCode {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sami_pdf2xls=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    // Exit code 2 belongs to empty extractions, so usage errors exit with 1.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let usage = error.use_stderr();
            let _ = error.print();
            return if usage { ExitCode::from(1) } else { ExitCode::SUCCESS };
        }
    };
    let result = match &cli.command {
        Commands::Convert(args) => run_convert(args),
        Commands::Records(args) => run_records(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            exit_code(&error)
        }
    }
}
