//! Cell writes applied to a copy of a template.
//!
//! A [`SheetPatch`] is plain data built from the records to write; applying
//! it never touches the source [`Template`].

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::error::TemplateError;
use crate::xls::biff::{BLANK, COLINFO, DEFAULTROWHEIGHT, DIMENSIONS, INDEX, LABEL, NUMBER, ROW, Record, encode_chars};
use crate::xls::bytes::{put_u16, put_u32, u16_at, u32_at};
use crate::xls::sheet::{CellUnit, SheetRecords, widen_row};
use crate::xls::template::{DEFAULT_CELL_XF, Template};

/// Last column a BIFF8 sheet can address.
pub const MAX_COLUMN: u16 = 255;
/// Longest text a LABEL record holds.
pub const MAX_LABEL_CHARS: usize = 255;
const DEFAULT_ROW_HEIGHT: u16 = 0x00FF;

#[derive(Debug, Clone, PartialEq)]
pub enum WriteValue {
    Blank,
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStyle {
    /// Keep the format the cell position already has.
    Inherit,
    /// The inherited format with its number format switched to `@`.
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellWrite {
    pub row: u16,
    pub col: u16,
    pub value: WriteValue,
    pub style: CellStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetPatch {
    pub sheet_index: usize,
    pub cells: Vec<CellWrite>,
}

/// Sheet-wide formats a new cell falls back on.
struct SheetDefaults {
    row_height: u16,
    /// `(first column, last column, xf)` for each COLINFO record.
    columns: Vec<(u16, u16, u16)>,
}

impl SheetDefaults {
    fn read(sheet: &SheetRecords) -> Self {
        let row_height = sheet
            .find(DEFAULTROWHEIGHT)
            .and_then(|record| record.u16_at(2))
            .unwrap_or(DEFAULT_ROW_HEIGHT);
        let columns = sheet
            .records_of(COLINFO)
            .filter_map(|record| Some((record.u16_at(0)?, record.u16_at(2)?, record.u16_at(6)?)))
            .collect();
        Self {
            row_height,
            columns,
        }
    }

    fn column_xf(&self, col: u16) -> Option<u16> {
        self.columns
            .iter()
            .find(|(first, last, _)| (*first..=*last).contains(&col))
            .map(|(_, _, xf)| *xf)
    }
}

/// Row default format, present when the ROW record's fGhostDirty bit is set.
fn row_xf(record: &Record) -> Option<u16> {
    if record.u16_at(12)? & 0x0080 == 0 {
        return None;
    }
    record.u16_at(14).map(|xf| xf & 0x0FFF)
}

fn new_row_record(row: u16, first: u16, last: u16, height: u16) -> Record {
    let mut data = Vec::with_capacity(16);
    for value in [row, first, last + 1, height, 0, 0, 0x0100, DEFAULT_CELL_XF] {
        data.extend_from_slice(&value.to_le_bytes());
    }
    Record::new(ROW, data)
}

fn cell_header(row: u16, col: u16, xf: u16) -> Vec<u8> {
    let mut data = Vec::with_capacity(16);
    for value in [row, col, xf] {
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}

fn label_record(row: u16, col: u16, xf: u16, text: &str) -> Result<Record, TemplateError> {
    let (chars, flags, bytes) = encode_chars(text);
    let length = u16::try_from(chars)
        .ok()
        .filter(|_| chars <= MAX_LABEL_CHARS)
        .ok_or(TemplateError::TextTooLong(chars))?;
    let mut data = cell_header(row, col, xf);
    data.extend_from_slice(&length.to_le_bytes());
    data.push(flags);
    data.extend_from_slice(&bytes);
    Ok(Record::new(LABEL, data))
}

fn cell_record(row: u16, col: u16, xf: u16, value: &WriteValue) -> Result<Record, TemplateError> {
    match value {
        WriteValue::Blank => Ok(Record::new(BLANK, cell_header(row, col, xf))),
        WriteValue::Number(number) => {
            let mut data = cell_header(row, col, xf);
            data.extend_from_slice(&number.to_le_bytes());
            Ok(Record::new(NUMBER, data))
        }
        // Readers reject zero-length LABEL strings.
        WriteValue::Text(text) if text.is_empty() => Ok(Record::new(BLANK, cell_header(row, col, xf))),
        WriteValue::Text(text) => label_record(row, col, xf, text),
    }
}

/// Widens DIMENSIONS to cover rows `rows` and columns `cols` (inclusive).
fn widen_dimensions(sheet: &mut SheetRecords, rows: (u16, u16), cols: (u16, u16)) {
    let Some(record) = sheet.find_mut(DIMENSIONS) else {
        return;
    };
    let data = &mut record.data;
    let (Some(row_mic), Some(row_mac), Some(col_mic), Some(col_mac)) =
        (u32_at(data, 0), u32_at(data, 4), u16_at(data, 8), u16_at(data, 10))
    else {
        return;
    };

    let new_rows = (u32::from(rows.0), u32::from(rows.1) + 1);
    let new_cols = (cols.0, cols.1 + 1);
    let (row_mic, row_mac) = if row_mic >= row_mac {
        new_rows
    } else {
        (row_mic.min(new_rows.0), row_mac.max(new_rows.1))
    };
    let (col_mic, col_mac) = if col_mic >= col_mac {
        new_cols
    } else {
        (col_mic.min(new_cols.0), col_mac.max(new_cols.1))
    };
    put_u32(data, 0, row_mic);
    put_u32(data, 4, row_mac);
    put_u16(data, 8, col_mic);
    put_u16(data, 10, col_mac);
}

fn update_index_rows(sheet: &mut SheetRecords) {
    let Some((first, last)) = sheet.table.row_bounds() else {
        return;
    };
    if let Some(index) = sheet.find_mut(INDEX)
        && index.data.len() >= 12
    {
        put_u32(&mut index.data, 4, u32::from(first));
        put_u32(&mut index.data, 8, u32::from(last) + 1);
    }
}

/// Applies `patch` to a copy of `template`.
///
/// Cells already present at a written position are replaced and lend their
/// format to the new cell. Every record outside the written cells, the ROW
/// records of written rows and the sheet's DIMENSIONS and INDEX records is
/// carried over unchanged.
///
/// # Errors
/// [`TemplateError::MissingSheet`] for a sheet index that is not a worksheet,
/// [`TemplateError::ColumnOverflow`] past column 255,
/// [`TemplateError::TextTooLong`] for text over 255 characters and
/// [`TemplateError::FormatTableFull`] when no text format can be added.
pub fn apply_patch(template: &Template, patch: &SheetPatch) -> Result<Template, TemplateError> {
    let mut out = template.clone();
    let mut sheet = SheetRecords::split(out.sheet_records(patch.sheet_index)?.to_vec())?;
    let defaults = SheetDefaults::read(&sheet);
    let mut text_formats: HashMap<u16, u16> = HashMap::new();

    let mut rows: BTreeMap<u16, Vec<&CellWrite>> = BTreeMap::new();
    for write in &patch.cells {
        if write.col > MAX_COLUMN {
            return Err(TemplateError::ColumnOverflow(usize::from(write.col)));
        }
        rows.entry(write.row).or_default().push(write);
    }

    let mut bounds: Option<((u16, u16), (u16, u16))> = None;
    for (row, writes) in &rows {
        let row = *row;
        let default_xf = sheet.table.row_record(row).and_then(row_xf);
        for write in writes {
            let existing = sheet.table.remove_range(row, write.col, write.col);
            let base = existing
                .get(&write.col)
                .copied()
                .or(default_xf)
                .or_else(|| defaults.column_xf(write.col))
                .unwrap_or(DEFAULT_CELL_XF);
            let xf = match write.style {
                CellStyle::Inherit => base,
                CellStyle::Text => match text_formats.get(&base) {
                    Some(xf) => *xf,
                    None => {
                        let xf = out.text_format_xf(base)?;
                        text_formats.insert(base, xf);
                        xf
                    }
                },
            };
            let record = cell_record(row, write.col, xf, &write.value)?;
            sheet.table.insert(row, CellUnit::single(record)?);
        }

        let first = writes.iter().map(|write| write.col).min().unwrap_or_default();
        let last = writes.iter().map(|write| write.col).max().unwrap_or_default();
        match sheet.table.rows.get_mut(&row).and_then(|entry| entry.record.as_mut()) {
            Some(record) => widen_row(record, first, last),
            None => sheet
                .table
                .set_row_record(row, new_row_record(row, first, last, defaults.row_height)),
        }
        bounds = Some(match bounds {
            None => ((row, row), (first, last)),
            Some((rows, cols)) => ((rows.0.min(row), rows.1.max(row)), (cols.0.min(first), cols.1.max(last))),
        });
    }

    if let Some((rows, cols)) = bounds {
        widen_dimensions(&mut sheet, rows, cols);
    }
    update_index_rows(&mut sheet);
    out.replace_sheet_records(patch.sheet_index, sheet.join()?)?;

    debug!(
        sheet = patch.sheet_index,
        cells = patch.cells.len(),
        text_formats = text_formats.len(),
        "patch applied"
    );
    Ok(out)
}
