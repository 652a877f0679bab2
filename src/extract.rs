use std::path::Path;

use tracing::{info, warn};

use crate::error::ExtractError;
use crate::header::apply_header;
use crate::model::{DetectedTable, RawTable};
use crate::options::{ExtractOptions, QualityMode};
use crate::pdf_reader::read_pdf_pages;
use crate::table_detect::{LOW_CONFIDENCE_THRESHOLD, detect_page_table};
use crate::warning::{ExtractWarning, WarningCode};

/// One submitted PDF document, already in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfSource {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl PdfSource {
    #[must_use]
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Reads a PDF from disk, naming it after its path.
    ///
    /// # Errors
    /// Returns [`ExtractError::Io`] when the file cannot be read.
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let bytes = std::fs::read(path)?;
        Ok(Self::new(path.display().to_string(), bytes))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub tables: Vec<RawTable>,
    pub warnings: Vec<ExtractWarning>,
}

fn apply_quality_mode(
    table: DetectedTable,
    document: usize,
    options: &ExtractOptions,
    warnings: &mut Vec<ExtractWarning>,
) -> Result<Option<DetectedTable>, ExtractError> {
    if table.confidence >= LOW_CONFIDENCE_THRESHOLD {
        return Ok(Some(table));
    }

    match options.quality_mode {
        QualityMode::BestEffort => {
            warnings.push(
                ExtractWarning::new(
                    WarningCode::LowConfidence,
                    "table confidence is low; rows kept in best-effort mode",
                )
                .with_document(document)
                .with_page(table.page)
                .with_confidence(table.confidence),
            );
            Ok(Some(table))
        }
        QualityMode::Strict => Err(ExtractError::AmbiguousTable {
            document,
            page: table.page,
            confidence: table.confidence,
        }),
        QualityMode::SkipAmbiguous => {
            warnings.push(
                ExtractWarning::new(WarningCode::LowConfidence, "skipping low-confidence table")
                    .with_document(document)
                    .with_page(table.page)
                    .with_confidence(table.confidence),
            );
            Ok(None)
        }
    }
}

/// Extracts at most one table per page from every document, in document
/// then page order.
///
/// # Errors
/// Fails when a document cannot be loaded, when a strict-mode table is too
/// ambiguous, and with [`ExtractError::ExtractionEmpty`] when no page of any
/// document holds a table.
pub fn extract_tables(
    documents: &[PdfSource],
    options: &ExtractOptions,
) -> Result<Extraction, ExtractError> {
    if options.min_cols < 2 {
        return Err(ExtractError::InvalidOption(
            "min_cols must be at least 2".to_string(),
        ));
    }

    let mut tables = Vec::new();
    let mut warnings = Vec::new();

    for (document, source) in documents.iter().enumerate() {
        let pages = read_pdf_pages(&source.bytes, document, options.pages.as_ref())?;
        for page in &pages {
            let Some(detected) = detect_page_table(page, options.min_cols) else {
                warnings.push(
                    ExtractWarning::new(WarningCode::NoTableOnPage, "no table found on page")
                        .with_document(document)
                        .with_page(page.page_number),
                );
                continue;
            };

            let Some(detected) = apply_quality_mode(detected, document, options, &mut warnings)?
            else {
                continue;
            };

            if let Some(table) = apply_header(&detected, document, &mut warnings) {
                tables.push(table);
            }
        }
        info!(
            document,
            name = %source.name,
            pages = pages.len(),
            "document scanned for tables"
        );
    }

    for warning in &warnings {
        warn!(
            code = ?warning.code,
            document = ?warning.document,
            page = ?warning.page,
            "{}",
            warning.message
        );
    }

    if tables.is_empty() {
        return Err(ExtractError::ExtractionEmpty);
    }

    Ok(Extraction { tables, warnings })
}
