use tracing::info;

use crate::error::NormalizeError;
use crate::model::{BatchContext, CanonicalRecord, RawTableRow, header_key};
use crate::options::FieldMapping;

/// Field name reported when a table has no column left for the timestamp.
pub const DATE_TIME_FIELD: &str = "date/time (last column)";

/// Splits combined date-time text into its first two whitespace tokens.
///
/// One token yields an empty time; absent or blank text yields two empty
/// strings.
#[must_use]
pub fn split_date_time(raw: Option<&str>) -> (String, String) {
    let mut tokens = raw.unwrap_or_default().split_whitespace();
    let date = tokens.next().unwrap_or_default().to_string();
    let time = tokens.next().unwrap_or_default().to_string();
    (date, time)
}

/// Rewrites `.`-delimited dates with `/`; dates already holding a `/` are
/// returned unchanged. No calendar validation is done.
#[must_use]
pub fn normalize_date(date: &str) -> String {
    if date.contains('/') {
        date.to_string()
    } else {
        date.replace('.', "/")
    }
}

fn missing(index: usize, row: &RawTableRow, field: &str) -> NormalizeError {
    NormalizeError::MissingField {
        row: index,
        document: row.source.document,
        page: row.source.page,
        field: field.to_string(),
    }
}

/// Maps one aggregated row onto the canonical record shape.
///
/// # Errors
/// [`NormalizeError::MissingField`] when the row has no plate cell, or when
/// its table has no column after the plate to read the timestamp from.
pub fn normalize_row(
    index: usize,
    row: &RawTableRow,
    batch: &BatchContext,
    mapping: &FieldMapping,
) -> Result<CanonicalRecord, NormalizeError> {
    let plate = row
        .field(&mapping.plate_header)
        .flatten()
        .ok_or_else(|| missing(index, row, &mapping.plate_header))?;

    let (last_header, date_time) = row
        .last_field()
        .filter(|(header, _)| header_key(header) != header_key(&mapping.plate_header))
        .ok_or_else(|| missing(index, row, DATE_TIME_FIELD))?;
    let (date, time) = split_date_time(date_time);
    tracing::trace!(row = index, column = last_header, %date, %time, "timestamp split");

    Ok(CanonicalRecord {
        direction: batch.direction,
        document_type: batch.document_type,
        document_number: batch.document_number.clone(),
        plate: plate.to_string(),
        trailer1: String::new(),
        trailer2: String::new(),
        date: normalize_date(&date),
        time,
    })
}

/// Normalizes every aggregated row, failing the whole batch on the first
/// row that lacks a required field.
///
/// # Errors
/// The first [`NormalizeError`] hit, carrying that row's index.
pub fn normalize_rows(
    rows: &[RawTableRow],
    batch: &BatchContext,
    mapping: &FieldMapping,
) -> Result<Vec<CanonicalRecord>, NormalizeError> {
    let records = rows
        .iter()
        .enumerate()
        .map(|(index, row)| normalize_row(index, row, batch, mapping))
        .collect::<Result<Vec<_>, _>>()?;
    info!(
        records = records.len(),
        direction = %batch.direction,
        "rows normalized"
    );
    Ok(records)
}
