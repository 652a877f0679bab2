//! Worksheet cell table: the ROW, cell and DBCELL records between a sheet's
//! header records and its view records, regrouped by row so cells can be
//! replaced and the block structure rebuilt.

use std::collections::BTreeMap;

use crate::error::TemplateError;
use crate::xls::biff::{
    ARRAY, BLANK, BOOLERR, CONTINUE, DBCELL, DIMENSIONS, EOF, FORMULA, LABEL, LABELSST, MULBLANK,
    MULRK, NUMBER, RK, ROW, RSTRING, Record, SHRFMLA, STRING, TABLE, WINDOW2, decode_chars,
};
use crate::xls::bytes::{f64_at, put_u16, u8_at, u16_at, u32_at};
use crate::xls::patch::MAX_COLUMN;

/// Rows per DBCELL block.
const ROWS_PER_BLOCK: u16 = 32;
const ROW_RECORD_LEN: usize = 20;

/// Decoded content of one cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Blank,
    Number(f64),
    Text(String),
    /// Index into the workbook's shared string table.
    SharedString(u32),
    /// Any other cell record, identified by its record type.
    Other(u16),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub xf: u16,
    pub value: CellValue,
}

/// Decodes an RK number: a 30-bit integer or the top 30 bits of a double,
/// optionally scaled by 1/100.
#[must_use]
pub fn decode_rk(rk: u32) -> f64 {
    #[allow(clippy::cast_possible_wrap)]
    let value = if rk & 0x02 != 0 {
        f64::from((rk as i32) >> 2)
    } else {
        f64::from_bits(u64::from(rk & !0x03) << 32)
    };
    if rk & 0x01 != 0 { value / 100.0 } else { value }
}

fn is_cell(kind: u16) -> bool {
    matches!(
        kind,
        BLANK | MULBLANK | NUMBER | RK | MULRK | LABEL | LABELSST | BOOLERR | FORMULA | RSTRING
    )
}

/// Records that belong to the cell record before them.
fn is_attachment(kind: u16) -> bool {
    matches!(kind, STRING | SHRFMLA | ARRAY | TABLE | CONTINUE)
}

/// A cell record covering `first..=last`, followed by its attached records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CellUnit {
    pub(crate) first: u16,
    pub(crate) last: u16,
    pub(crate) records: Vec<Record>,
}

impl CellUnit {
    pub(crate) fn single(record: Record) -> Result<Self, TemplateError> {
        let (_, first, last) = cell_span(&record)?;
        Ok(Self {
            first,
            last,
            records: vec![record],
        })
    }

    fn head(&self) -> &Record {
        &self.records[0]
    }

    fn covers(&self, col: u16) -> bool {
        (self.first..=self.last).contains(&col)
    }

    /// XF index of column `col` within this unit.
    pub(crate) fn xf_at(&self, col: u16) -> Option<u16> {
        let head = self.head();
        let slot = usize::from(col.checked_sub(self.first)?);
        match head.kind {
            MULBLANK => head.u16_at(4 + slot * 2),
            MULRK => head.u16_at(4 + slot * 6),
            _ => head.u16_at(4),
        }
    }

    fn read(&self, col: u16) -> Option<Cell> {
        let head = self.head();
        let data = &head.data;
        let xf = self.xf_at(col)?;
        let value = match head.kind {
            BLANK | MULBLANK => CellValue::Blank,
            NUMBER => CellValue::Number(f64_at(data, 6)?),
            RK => CellValue::Number(decode_rk(u32_at(data, 6)?)),
            MULRK => {
                let slot = usize::from(col - self.first);
                CellValue::Number(decode_rk(u32_at(data, 6 + slot * 6)?))
            }
            LABEL => {
                let chars = usize::from(u16_at(data, 6)?);
                let high_byte = u8_at(data, 8)? & 0x01 != 0;
                CellValue::Text(decode_chars(data, 9, chars, high_byte)?)
            }
            LABELSST => CellValue::SharedString(u32_at(data, 6)?),
            other => CellValue::Other(other),
        };
        Some(Cell { xf, value })
    }
}

/// Row and column span of a cell record.
fn cell_span(record: &Record) -> Result<(u16, u16, u16), TemplateError> {
    let short = || TemplateError::malformed(0, format!("cell record 0x{:04X} is too short", record.kind));
    let row = record.u16_at(0).ok_or_else(short)?;
    let first = record.u16_at(2).ok_or_else(short)?;
    let last = match record.kind {
        MULBLANK | MULRK => {
            let tail = record.data.len().checked_sub(2).ok_or_else(short)?;
            record.u16_at(tail).ok_or_else(short)?
        }
        _ => first,
    };
    if last < first {
        return Err(TemplateError::malformed(
            0,
            format!("cell run on row {row} ends before it starts"),
        ));
    }
    if last > MAX_COLUMN {
        return Err(TemplateError::malformed(
            0,
            format!("cell run on row {row} ends past column {MAX_COLUMN}"),
        ));
    }
    Ok((row, first, last))
}

/// Rebuilds the part of a MULBLANK or MULRK run covering `first..=last`.
fn run_segment(head: &Record, row: u16, unit_first: u16, first: u16, last: u16) -> Option<Record> {
    let (stride, single_kind) = match head.kind {
        MULBLANK => (2, BLANK),
        MULRK => (6, RK),
        _ => return None,
    };
    let start = 4 + usize::from(first - unit_first) * stride;
    let end = 4 + usize::from(last - unit_first + 1) * stride;
    let items = head.data.get(start..end)?;

    let mut data = Vec::with_capacity(items.len() + 6);
    data.extend_from_slice(&row.to_le_bytes());
    data.extend_from_slice(&first.to_le_bytes());
    data.extend_from_slice(items);
    if first == last {
        Some(Record::new(single_kind, data))
    } else {
        data.extend_from_slice(&last.to_le_bytes());
        Some(Record::new(head.kind, data))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct RowEntry {
    pub(crate) record: Option<Record>,
    pub(crate) cells: Vec<CellUnit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct CellTable {
    pub(crate) rows: BTreeMap<u16, RowEntry>,
}

impl CellTable {
    pub(crate) fn cell(&self, row: u16, col: u16) -> Option<Cell> {
        self.unit(row, col)?.read(col)
    }

    pub(crate) fn unit(&self, row: u16, col: u16) -> Option<&CellUnit> {
        self.rows.get(&row)?.cells.iter().find(|unit| unit.covers(col))
    }

    pub(crate) fn row_record(&self, row: u16) -> Option<&Record> {
        self.rows.get(&row)?.record.as_ref()
    }

    pub(crate) fn set_row_record(&mut self, row: u16, record: Record) {
        self.rows.entry(row).or_default().record = Some(record);
    }

    pub(crate) fn insert(&mut self, row: u16, unit: CellUnit) {
        let cells = &mut self.rows.entry(row).or_default().cells;
        let position = cells.partition_point(|existing| existing.first < unit.first);
        cells.insert(position, unit);
    }

    /// Removes every cell of `row` within `first..=last`, returning the XF
    /// each removed column carried. Runs reaching outside the range are cut
    /// down to the parts that remain.
    pub(crate) fn remove_range(&mut self, row: u16, first: u16, last: u16) -> BTreeMap<u16, u16> {
        let mut removed = BTreeMap::new();
        let Some(entry) = self.rows.get_mut(&row) else {
            return removed;
        };

        let mut kept = Vec::with_capacity(entry.cells.len());
        for unit in entry.cells.drain(..) {
            if unit.last < first || unit.first > last {
                kept.push(unit);
                continue;
            }
            for col in unit.first.max(first)..=unit.last.min(last) {
                if let Some(xf) = unit.xf_at(col) {
                    removed.insert(col, xf);
                }
            }
            let head = unit.head();
            if unit.first < first {
                kept.extend(
                    run_segment(head, row, unit.first, unit.first, first - 1)
                        .and_then(|record| CellUnit::single(record).ok()),
                );
            }
            if unit.last > last {
                kept.extend(
                    run_segment(head, row, unit.first, last + 1, unit.last)
                        .and_then(|record| CellUnit::single(record).ok()),
                );
            }
        }
        kept.sort_by_key(|unit| unit.first);
        entry.cells = kept;
        removed
    }

    /// Lays the rows out in blocks of 32: ROW records, then the cells of
    /// those rows, then a DBCELL pointing back at both.
    pub(crate) fn to_records(&self) -> Result<Vec<Record>, TemplateError> {
        let mut out = Vec::new();
        let mut blocks: BTreeMap<u16, Vec<(&u16, &RowEntry)>> = BTreeMap::new();
        for (row, entry) in &self.rows {
            blocks.entry(row / ROWS_PER_BLOCK).or_default().push((row, entry));
        }

        for rows in blocks.values() {
            let mut position = 0usize;
            let mut first_row_position = None;
            for (_, entry) in rows {
                if let Some(record) = &entry.record {
                    first_row_position.get_or_insert(position);
                    position += record.encoded_len();
                    out.push(record.clone());
                }
            }

            let mut offsets = Vec::new();
            let mut previous = first_row_position.map(|start| start + ROW_RECORD_LEN);
            for (_, entry) in rows {
                let cells_start = position;
                for record in entry.cells.iter().flat_map(|unit| &unit.records) {
                    position += record.encoded_len();
                    out.push(record.clone());
                }
                if entry.record.is_some() {
                    if let Some(reference) = previous {
                        let delta = cells_start.saturating_sub(reference);
                        offsets.push(u16::try_from(delta).map_err(|_| TemplateError::RecordTooLarge(delta))?);
                    }
                    previous = Some(cells_start);
                }
            }

            if let Some(start) = first_row_position {
                let back = u32::try_from(position - start)
                    .map_err(|_| TemplateError::RecordTooLarge(position - start))?;
                let mut data = back.to_le_bytes().to_vec();
                data.extend(offsets.iter().flat_map(|offset| offset.to_le_bytes()));
                out.push(Record::new(DBCELL, data));
            }
        }
        Ok(out)
    }

    pub(crate) fn row_bounds(&self) -> Option<(u16, u16)> {
        let first = *self.rows.keys().next()?;
        let last = *self.rows.keys().next_back()?;
        Some((first, last))
    }
}

/// A worksheet substream with its cell table lifted out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SheetRecords {
    pub(crate) before: Vec<Record>,
    pub(crate) table: CellTable,
    pub(crate) after: Vec<Record>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Region {
    Before,
    Table,
    After,
}

impl SheetRecords {
    /// Splits a worksheet's records. DBCELL records are dropped; they are
    /// rebuilt by [`SheetRecords::join`].
    pub(crate) fn split(records: Vec<Record>) -> Result<Self, TemplateError> {
        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut table = CellTable::default();
        let mut region = Region::Before;
        let mut last_unit: Option<u16> = None;

        for record in records {
            let kind = record.kind;
            let table_record = kind == ROW || kind == DBCELL || is_cell(kind);
            if region == Region::Before && table_record {
                region = Region::Table;
            }
            if region == Region::Table && !table_record && !is_attachment(kind) {
                region = Region::After;
            }

            match region {
                Region::Before => before.push(record),
                Region::After if !table_record => after.push(record),
                _ if kind == ROW => {
                    let row = record
                        .u16_at(0)
                        .ok_or_else(|| TemplateError::malformed(0, "ROW record is too short"))?;
                    table.set_row_record(row, record);
                    last_unit = None;
                }
                _ if kind == DBCELL => last_unit = None,
                _ if is_cell(kind) => {
                    let (row, _, _) = cell_span(&record)?;
                    table.rows.entry(row).or_default().cells.push(CellUnit::single(record)?);
                    last_unit = Some(row);
                }
                _ => {
                    let unit = last_unit
                        .and_then(|row| table.rows.get_mut(&row)?.cells.last_mut())
                        .ok_or_else(|| {
                            TemplateError::malformed(0, format!("record 0x{kind:04X} follows no cell"))
                        })?;
                    unit.records.push(record);
                }
            }
        }

        for entry in table.rows.values_mut() {
            entry.cells.sort_by_key(|unit| unit.first);
        }

        if region == Region::Before {
            let split_at = before
                .iter()
                .position(|record| record.kind == DIMENSIONS)
                .map(|position| position + 1)
                .or_else(|| before.iter().position(|record| record.kind == WINDOW2))
                .or_else(|| before.iter().rposition(|record| record.kind == EOF))
                .unwrap_or(before.len());
            after = before.split_off(split_at);
        }

        Ok(Self {
            before,
            table,
            after,
        })
    }

    pub(crate) fn join(&self) -> Result<Vec<Record>, TemplateError> {
        let mut records = self.before.clone();
        records.extend(self.table.to_records()?);
        records.extend(self.after.iter().cloned());
        Ok(records)
    }

    pub(crate) fn find(&self, kind: u16) -> Option<&Record> {
        self.before.iter().find(|record| record.kind == kind)
    }

    pub(crate) fn find_mut(&mut self, kind: u16) -> Option<&mut Record> {
        self.before.iter_mut().find(|record| record.kind == kind)
    }

    pub(crate) fn records_of(&self, kind: u16) -> impl Iterator<Item = &Record> {
        self.before.iter().filter(move |record| record.kind == kind)
    }
}

/// Widens a ROW record's `colMic..colMac` to include `first..=last`.
pub(crate) fn widen_row(record: &mut Record, first: u16, last: u16) {
    let (Some(mic), Some(mac)) = (record.u16_at(2), record.u16_at(4)) else {
        return;
    };
    let (mic, mac) = if mic == mac {
        (first, last + 1)
    } else {
        (mic.min(first), mac.max(last + 1))
    };
    put_u16(&mut record.data, 2, mic);
    put_u16(&mut record.data, 4, mac);
}
