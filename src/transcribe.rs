use tracing::info;

use crate::error::TemplateError;
use crate::model::{CanonicalRecord, FieldValue};
use crate::options::{StyleMode, TranscribeOptions};
use crate::xls::{CellStyle, CellWrite, MAX_COLUMN, SheetPatch, Template, WriteValue, apply_patch};

fn preserved_value(field: FieldValue) -> WriteValue {
    match field {
        FieldValue::Empty => WriteValue::Blank,
        FieldValue::Text(text) if text.is_empty() => WriteValue::Blank,
        FieldValue::Text(text) => WriteValue::Text(text),
        #[allow(clippy::cast_precision_loss)]
        FieldValue::Integer(value) => WriteValue::Number(value as f64),
    }
}

/// Lays records out as cell writes: record `i` goes to row
/// `start_row + i`, field `j` to column `start_col + j`.
///
/// # Errors
/// [`TemplateError::RowOverflow`] or [`TemplateError::ColumnOverflow`] when
/// a record would land outside the sheet.
pub fn build_patch(
    records: &[CanonicalRecord],
    options: &TranscribeOptions,
) -> Result<SheetPatch, TemplateError> {
    let mut cells = Vec::with_capacity(records.len() * crate::model::CANONICAL_FIELD_COUNT);
    for (index, record) in records.iter().enumerate() {
        let row = usize::from(options.start_row) + index;
        let row = u16::try_from(row).map_err(|_| TemplateError::RowOverflow(row))?;

        for (offset, field) in record.fields().into_iter().enumerate() {
            let col = usize::from(options.start_col) + offset;
            let col = u16::try_from(col)
                .ok()
                .filter(|col| *col <= MAX_COLUMN)
                .ok_or(TemplateError::ColumnOverflow(col))?;

            let (value, style) = match options.style_mode {
                StyleMode::PreserveType => (preserved_value(field), CellStyle::Inherit),
                StyleMode::ForceText => (WriteValue::Text(field.as_text()), CellStyle::Text),
            };
            cells.push(CellWrite {
                row,
                col,
                value,
                style,
            });
        }
    }

    Ok(SheetPatch {
        sheet_index: options.sheet_index,
        cells,
    })
}

/// Writes `records` into a copy of `template`.
///
/// # Errors
/// Any [`TemplateError`] from laying out or applying the patch.
pub fn transcribe(
    template: &Template,
    records: &[CanonicalRecord],
    options: &TranscribeOptions,
) -> Result<Template, TemplateError> {
    let patch = build_patch(records, options)?;
    let written = apply_patch(template, &patch)?;
    info!(
        rows = records.len(),
        cells = patch.cells.len(),
        sheet = options.sheet_index,
        mode = ?options.style_mode,
        "records transcribed"
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::build_patch;
    use crate::error::TemplateError;
    use crate::model::{BatchContext, CanonicalRecord, Direction};
    use crate::options::{StyleMode, TranscribeOptions};
    use crate::xls::{CellStyle, WriteValue};
    use pretty_assertions::assert_eq;

    fn record(direction: Direction) -> CanonicalRecord {
        let batch = BatchContext::new(direction, "0098");
        CanonicalRecord {
            direction: batch.direction,
            document_type: batch.document_type,
            document_number: batch.document_number,
            plate: "34AB123".to_string(),
            trailer1: String::new(),
            trailer2: String::new(),
            date: "01/06/2024".to_string(),
            time: "14:05".to_string(),
        }
    }

    #[test]
    fn preserve_mode_keeps_numbers_and_blanks_empties() {
        let patch = build_patch(&[record(Direction::Out)], &TranscribeOptions::default())
            .expect("record fits");
        let values = patch.cells.iter().map(|cell| cell.value.clone()).collect::<Vec<_>>();
        assert_eq!(
            values,
            vec![
                WriteValue::Text("Ç".to_string()),
                WriteValue::Number(3.0),
                WriteValue::Text("0098".to_string()),
                WriteValue::Text("34AB123".to_string()),
                WriteValue::Blank,
                WriteValue::Blank,
                WriteValue::Text("01/06/2024".to_string()),
                WriteValue::Text("14:05".to_string()),
            ]
        );
        assert!(patch.cells.iter().all(|cell| cell.row == 1));
        assert!(patch.cells.iter().all(|cell| cell.style == CellStyle::Inherit));
    }

    #[test]
    fn force_text_writes_every_field_as_text() {
        let options = TranscribeOptions {
            style_mode: StyleMode::ForceText,
            start_row: 4,
            start_col: 2,
            ..TranscribeOptions::default()
        };
        let patch = build_patch(&[record(Direction::In), record(Direction::Out)], &options)
            .expect("records fit");

        assert_eq!(patch.cells.len(), 16);
        assert_eq!((patch.cells[0].row, patch.cells[0].col), (4, 2));
        assert_eq!(patch.cells[1].value, WriteValue::Text(String::new()));
        assert_eq!(patch.cells[9].value, WriteValue::Text("3".to_string()));
        assert_eq!((patch.cells[15].row, patch.cells[15].col), (5, 9));
        assert!(patch.cells.iter().all(|cell| cell.style == CellStyle::Text));
    }

    #[test]
    fn rows_past_the_sheet_end_overflow() {
        let options = TranscribeOptions {
            start_row: u16::MAX,
            ..TranscribeOptions::default()
        };
        let records = vec![record(Direction::In); 2];
        let error = build_patch(&records, &options).expect_err("second row overflows");
        assert!(matches!(error, TemplateError::RowOverflow(65_536)));
    }

    #[test]
    fn columns_past_the_sheet_end_overflow() {
        let options = TranscribeOptions {
            start_col: 250,
            ..TranscribeOptions::default()
        };
        let error = build_patch(&[record(Direction::In)], &options).expect_err("too wide");
        assert!(matches!(error, TemplateError::ColumnOverflow(256)));
    }
}
