use tracing::debug;

use crate::error::TemplateError;
use crate::xls::biff::{
    BIFF8_VERSION, BOUNDSHEET, DBCELL, DEFCOLWIDTH, FILEPASS, GLOBALS_SUBSTREAM, INDEX, Record,
    Substream, WORKSHEET_SUBSTREAM, XF, read_short_string, read_substreams, write_records,
};
use crate::xls::bytes::{put_u16, put_u32, u16_at, u32_at};
use crate::xls::cfb::CompoundFile;
use crate::xls::sheet::{Cell, SheetRecords};

const WORKBOOK_STREAM: &str = "Workbook";
const BIFF5_STREAM: &str = "Book";
/// Streams below this size are zero-padded so they stay out of the mini stream.
const MIN_WORKBOOK_LEN: usize = 4096;

/// Built-in number format `@` (text).
pub const TEXT_NUMBER_FORMAT: u16 = 49;
/// XF index of the default cell format in every BIFF8 workbook.
pub const DEFAULT_CELL_XF: u16 = 15;
const MAX_XF_COUNT: usize = 4050;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SheetEntry {
    name: String,
    /// Index into `Template::substreams`, when the BOUNDSHEET offset matches one.
    substream: Option<usize>,
}

/// A legacy binary workbook held in memory.
///
/// Parsing keeps every record verbatim; only records touched by
/// [`crate::xls::apply_patch`] and the offsets that depend on record sizes
/// differ when it is written back out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    container: CompoundFile,
    globals: Vec<Record>,
    substreams: Vec<Substream>,
    sheets: Vec<SheetEntry>,
    trailing: Vec<u8>,
}

impl Template {
    /// Parses a BIFF8 workbook out of its compound-file container.
    ///
    /// # Errors
    /// Every error returned here is one for which
    /// [`TemplateError::is_unreadable`] holds.
    pub fn parse(bytes: &[u8]) -> Result<Self, TemplateError> {
        let container = CompoundFile::parse(bytes)?;
        let Some(workbook) = container.stream(WORKBOOK_STREAM) else {
            return Err(if container.stream(BIFF5_STREAM).is_some() {
                TemplateError::UnsupportedVersion(0x0500)
            } else {
                TemplateError::MissingWorkbook
            });
        };

        let stream = read_substreams(workbook)?;
        let mut substreams = stream.substreams.into_iter();
        let globals = substreams
            .next()
            .ok_or_else(|| TemplateError::malformed(0, "workbook stream holds no records"))?;
        match globals.bof() {
            Some((BIFF8_VERSION, GLOBALS_SUBSTREAM)) => {}
            Some((BIFF8_VERSION, _)) => {
                return Err(TemplateError::malformed(0, "first substream is not the workbook globals"));
            }
            Some((version, _)) => return Err(TemplateError::UnsupportedVersion(version)),
            None => return Err(TemplateError::malformed(0, "workbook stream has no BOF record")),
        }
        if globals.records.iter().any(|record| record.kind == FILEPASS) {
            return Err(TemplateError::Encrypted);
        }

        let substreams = substreams.collect::<Vec<_>>();
        let sheets = globals
            .records
            .iter()
            .filter(|record| record.kind == BOUNDSHEET)
            .map(|record| {
                let position = u32_at(&record.data, 0)
                    .ok_or_else(|| TemplateError::malformed(globals.offset, "BOUNDSHEET record is too short"))?;
                let name = read_short_string(&record.data, 6).unwrap_or_default();
                let substream = substreams
                    .iter()
                    .position(|substream| substream.offset == position as usize);
                Ok(SheetEntry { name, substream })
            })
            .collect::<Result<Vec<_>, TemplateError>>()?;

        debug!(
            sheets = sheets.len(),
            substreams = substreams.len(),
            bytes = workbook.len(),
            "workbook parsed"
        );

        Ok(Self {
            container,
            globals: globals.records,
            substreams,
            sheets,
            trailing: stream.trailing,
        })
    }

    #[must_use]
    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|sheet| sheet.name.as_str()).collect()
    }

    #[must_use]
    pub fn xf_count(&self) -> usize {
        self.globals.iter().filter(|record| record.kind == XF).count()
    }

    /// Number format index of cell format `xf`.
    #[must_use]
    pub fn number_format(&self, xf: u16) -> Option<u16> {
        self.xf_record(xf)?.u16_at(2)
    }

    /// Reads one cell of a worksheet.
    ///
    /// # Errors
    /// [`TemplateError::MissingSheet`] when `sheet` is not a worksheet.
    pub fn cell(&self, sheet: usize, row: u16, col: u16) -> Result<Option<Cell>, TemplateError> {
        let records = SheetRecords::split(self.sheet_records(sheet)?.to_vec())?;
        Ok(records.table.cell(row, col))
    }

    fn xf_record(&self, xf: u16) -> Option<&Record> {
        self.globals
            .iter()
            .filter(|record| record.kind == XF)
            .nth(usize::from(xf))
    }

    pub(crate) fn sheet_records(&self, sheet: usize) -> Result<&[Record], TemplateError> {
        let index = self.worksheet_substream(sheet)?;
        Ok(&self.substreams[index].records)
    }

    pub(crate) fn replace_sheet_records(
        &mut self,
        sheet: usize,
        records: Vec<Record>,
    ) -> Result<(), TemplateError> {
        let index = self.worksheet_substream(sheet)?;
        self.substreams[index].records = records;
        Ok(())
    }

    fn worksheet_substream(&self, sheet: usize) -> Result<usize, TemplateError> {
        self.sheets
            .get(sheet)
            .and_then(|entry| entry.substream)
            .filter(|index| {
                self.substreams[*index]
                    .bof()
                    .is_some_and(|(_, kind)| kind == WORKSHEET_SUBSTREAM)
            })
            .ok_or(TemplateError::MissingSheet(sheet))
    }

    /// Returns a cell format identical to `base` except for the `@` number
    /// format, appending one after the last XF record when needed.
    pub(crate) fn text_format_xf(&mut self, base: u16) -> Result<u16, TemplateError> {
        let positions = self
            .globals
            .iter()
            .enumerate()
            .filter(|(_, record)| record.kind == XF)
            .map(|(position, _)| position)
            .collect::<Vec<_>>();
        let source = positions
            .get(usize::from(base))
            .map(|position| &self.globals[*position])
            .ok_or_else(|| TemplateError::malformed(0, format!("cell format {base} does not exist")))?;

        if source.u16_at(2) == Some(TEXT_NUMBER_FORMAT) {
            return Ok(base);
        }
        if positions.len() >= MAX_XF_COUNT {
            return Err(TemplateError::FormatTableFull);
        }

        let mut data = source.data.clone();
        let flags = u16_at(&data, 4)
            .ok_or_else(|| TemplateError::malformed(0, format!("cell format {base} is too short")))?;
        put_u16(&mut data, 2, TEXT_NUMBER_FORMAT);
        // A style XF becomes the parent of the new cell XF.
        if flags & 0x0004 != 0 {
            put_u16(&mut data, 4, (flags & 0x000B) | (base << 4));
        }
        if let Some(used) = data.get_mut(9) {
            *used |= 0x04;
        }

        let insert_at = positions.last().map_or(0, |position| position + 1);
        self.globals.insert(insert_at, Record::new(XF, data));
        let xf = u16::try_from(positions.len()).map_err(|_| TemplateError::FormatTableFull)?;
        debug!(base, xf, "text cell format added");
        Ok(xf)
    }

    /// The workbook stream with every size-dependent offset recomputed.
    fn workbook_stream(&self) -> Result<Vec<u8>, TemplateError> {
        let mut substreams = self.substreams.clone();
        for substream in &mut substreams {
            let blocks = substream
                .records
                .iter()
                .filter(|record| record.kind == DBCELL)
                .count();
            if let Some(index) = substream.records.iter_mut().find(|record| record.kind == INDEX) {
                index.data.resize(16 + 4 * blocks, 0);
            }
        }

        let mut globals = self.globals.clone();
        let mut position = globals.iter().map(Record::encoded_len).sum::<usize>();
        let mut offsets = Vec::with_capacity(substreams.len());
        for substream in &mut substreams {
            offsets.push(position);
            relocate_index(&mut substream.records, position)?;
            position += substream.records.iter().map(Record::encoded_len).sum::<usize>();
        }

        for (record, sheet) in globals
            .iter_mut()
            .filter(|record| record.kind == BOUNDSHEET)
            .zip(&self.sheets)
        {
            if let Some(index) = sheet.substream {
                put_u32(&mut record.data, 0, stream_offset(offsets[index])?);
            }
        }

        let mut out = Vec::with_capacity(position + self.trailing.len());
        write_records(&globals, &mut out)?;
        for substream in &substreams {
            write_records(&substream.records, &mut out)?;
        }
        out.extend_from_slice(&self.trailing);
        if out.len() < MIN_WORKBOOK_LEN {
            out.resize(MIN_WORKBOOK_LEN, 0);
        }
        Ok(out)
    }

    /// Writes the workbook back into a copy of its container.
    ///
    /// # Errors
    /// Fails when a record or offset no longer fits the file format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TemplateError> {
        let mut container = self.container.clone();
        container.set_stream(WORKBOOK_STREAM, self.workbook_stream()?);
        Ok(container.to_bytes())
    }
}

fn stream_offset(position: usize) -> Result<u32, TemplateError> {
    u32::try_from(position).map_err(|_| TemplateError::RecordTooLarge(position))
}

/// Points a sheet's INDEX record at its DEFCOLWIDTH and DBCELL records,
/// given the sheet's absolute start in the workbook stream.
fn relocate_index(records: &mut [Record], start: usize) -> Result<(), TemplateError> {
    let mut position = start;
    let mut default_width = None;
    let mut blocks = Vec::new();
    for record in records.iter() {
        match record.kind {
            DEFCOLWIDTH => default_width = default_width.or(Some(position)),
            DBCELL => blocks.push(position),
            _ => {}
        }
        position += record.encoded_len();
    }

    let Some(index) = records.iter_mut().find(|record| record.kind == INDEX) else {
        return Ok(());
    };
    if let Some(default_width) = default_width {
        put_u32(&mut index.data, 12, stream_offset(default_width)?);
    }
    for (slot, block) in blocks.into_iter().enumerate() {
        put_u32(&mut index.data, 16 + slot * 4, stream_offset(block)?);
    }
    Ok(())
}
