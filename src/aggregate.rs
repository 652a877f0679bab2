use crate::model::{RawTable, RawTableRow, RowSource};

/// Flattens per-page tables into one row sequence.
///
/// Order is document, then page, then row; nothing is filtered or
/// deduplicated, so repeated crossings stay repeated.
#[must_use]
pub fn aggregate_rows(tables: &[RawTable]) -> Vec<RawTableRow> {
    tables
        .iter()
        .flat_map(|table| {
            let source = RowSource {
                document: table.document,
                page: table.page,
            };
            table.rows.iter().map(move |row| {
                let fields = table
                    .headers
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                RawTableRow::new(source, fields)
            })
        })
        .collect()
}
