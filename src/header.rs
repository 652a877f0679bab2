use crate::model::{DetectedTable, RawTable};
use crate::table_parse::assign_to_columns;
use crate::warning::{ExtractWarning, WarningCode};

/// Turns a detected table into header plus keyed data rows.
///
/// The first row is always the header. Data cells land under the header
/// column they overlap most, so a blank cell leaves its column empty instead
/// of pulling the next value left. Cells that end up sharing a column are
/// joined and the row is reported; the row itself is kept.
pub(crate) fn apply_header(
    table: &DetectedTable,
    document: usize,
    warnings: &mut Vec<ExtractWarning>,
) -> Option<RawTable> {
    let (headers, data) = table.rows.split_first()?;

    let mut rows = Vec::with_capacity(data.len());
    for (index, cells) in data.iter().enumerate() {
        let (row, shared) = assign_to_columns(headers, cells);
        if shared {
            warnings.push(
                ExtractWarning::new(
                    WarningCode::RaggedRow,
                    format!(
                        "data row {} has cells that share one of the {} header columns; they were joined",
                        index + 1,
                        headers.len()
                    ),
                )
                .with_document(document)
                .with_page(table.page),
            );
        }
        rows.push(row);
    }

    Some(RawTable {
        document,
        page: table.page,
        headers: headers.iter().map(|cell| cell.text.clone()).collect(),
        rows,
    })
}
