mod aggregate;
mod error;
mod extract;
mod header;
mod model;
mod normalize;
mod options;
mod package;
mod pdf_reader;
mod table_detect;
mod table_parse;
mod transcribe;
mod warning;
pub mod xls;

use serde::Serialize;
use tracing::info;

pub use aggregate::aggregate_rows;
pub use error::{ErrorKind, ExtractError, NormalizeError, PipelineError, TemplateError};
pub use extract::{Extraction, PdfSource, extract_tables};
pub use model::{
    BatchContext, CANONICAL_FIELD_COUNT, CANONICAL_FIELD_NAMES, CanonicalRecord,
    DECLARATION_DOCUMENT_TYPE, Direction, FieldValue, RawTable, RawTableRow, RowSource,
    header_key,
};
pub use normalize::{DATE_TIME_FIELD, normalize_date, normalize_row, normalize_rows, split_date_time};
pub use options::{
    DEFAULT_PLATE_HEADER, ExtractOptions, FieldMapping, PageSelection, PipelineOptions,
    QualityMode, StyleMode, TranscribeOptions,
};
pub use package::{XLS_MIME_TYPE, output_file_name, package};
pub use transcribe::{build_patch, transcribe};
pub use warning::{ExtractWarning, WarningCode};
pub use xls::Template;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionReport {
    pub document_count: usize,
    pub table_count: usize,
    pub row_count: usize,
    pub warnings: Vec<ExtractWarning>,
}

/// Canonical records read from a batch of PDFs, before any template is
/// involved.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    pub records: Vec<CanonicalRecord>,
    pub report: TranscriptionReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub bytes: Vec<u8>,
    pub records: Vec<CanonicalRecord>,
    pub report: TranscriptionReport,
}

/// Extracts, aggregates and normalizes every table row of `documents`.
///
/// # Errors
/// [`PipelineError`] of kind `ExtractionEmpty` when no document holds a
/// table, `MissingField` when a row lacks a required field, and
/// `InvalidInput` when a document cannot be read.
pub fn records_from_pdfs(
    documents: &[PdfSource],
    batch: &BatchContext,
    options: &PipelineOptions,
) -> Result<RecordBatch, PipelineError> {
    let extraction = extract_tables(documents, &options.extract)?;
    let rows = aggregate_rows(&extraction.tables);
    let records = normalize_rows(&rows, batch, &options.fields)?;

    Ok(RecordBatch {
        report: TranscriptionReport {
            document_count: documents.len(),
            table_count: extraction.tables.len(),
            row_count: records.len(),
            warnings: extraction.warnings,
        },
        records,
    })
}

/// Runs the whole pipeline: PDFs in, packaged workbook bytes out.
///
/// Nothing is produced unless every stage succeeds; `template_bytes` is
/// never modified.
///
/// # Errors
/// Any [`PipelineError`] from [`records_from_pdfs`], plus
/// `TemplateUnreadable` when the template cannot be parsed and
/// `SerializationFailure` when the records do not fit it.
pub fn transcribe_pdfs(
    documents: &[PdfSource],
    template_bytes: &[u8],
    batch: &BatchContext,
    options: &PipelineOptions,
) -> Result<Transcription, PipelineError> {
    let RecordBatch { records, report } = records_from_pdfs(documents, batch, options)?;
    let template = Template::parse(template_bytes)?;
    let written = transcribe(&template, &records, &options.transcribe)?;
    let bytes = package(&written)?;

    info!(
        documents = report.document_count,
        tables = report.table_count,
        rows = report.row_count,
        warnings = report.warnings.len(),
        bytes = bytes.len(),
        "transcription finished"
    );

    Ok(Transcription {
        bytes,
        records,
        report,
    })
}
