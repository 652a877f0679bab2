//! BIFF8 record stream.
//! Records are kept verbatim, CONTINUE records included, so anything this
//! crate does not touch is written back byte for byte.

use encoding_rs::UTF_16LE;

use crate::error::TemplateError;
use crate::xls::bytes::{u8_at, u16_at};

pub(crate) const BOF: u16 = 0x0809; // Beginning of a substream
pub(crate) const EOF: u16 = 0x000A; // End of a substream
pub(crate) const CONTINUE: u16 = 0x003C; // Continuation of the previous record
pub(crate) const BOUNDSHEET: u16 = 0x0085; // Sheet name, type and stream position
pub(crate) const XF: u16 = 0x00E0; // Cell or style format
pub(crate) const FILEPASS: u16 = 0x002F; // Workbook encryption header
pub(crate) const INDEX: u16 = 0x020B; // Row range and DBCELL positions of a sheet
pub(crate) const DBCELL: u16 = 0x00D7; // Row block offsets
pub(crate) const DIMENSIONS: u16 = 0x0200; // Used range of a sheet
pub(crate) const ROW: u16 = 0x0208; // Row properties
pub(crate) const BLANK: u16 = 0x0201; // Empty formatted cell
pub(crate) const MULBLANK: u16 = 0x00BE; // Run of empty formatted cells
pub(crate) const NUMBER: u16 = 0x0203; // IEEE 754 number cell
pub(crate) const RK: u16 = 0x027E; // Compressed number cell
pub(crate) const MULRK: u16 = 0x00BD; // Run of compressed number cells
pub(crate) const LABEL: u16 = 0x0204; // Inline text cell
pub(crate) const LABELSST: u16 = 0x00FD; // Shared string table text cell
pub(crate) const BOOLERR: u16 = 0x0205; // Boolean or error cell
pub(crate) const FORMULA: u16 = 0x0006; // Formula cell
pub(crate) const STRING: u16 = 0x0207; // Cached text result of the previous formula
pub(crate) const ARRAY: u16 = 0x0221; // Array formula attached to a formula cell
pub(crate) const SHRFMLA: u16 = 0x04BC; // Shared formula attached to a formula cell
pub(crate) const TABLE: u16 = 0x0236; // Data table attached to a formula cell
pub(crate) const RSTRING: u16 = 0x00D6; // Rich text cell
pub(crate) const COLINFO: u16 = 0x007D; // Column width and default format
pub(crate) const DEFCOLWIDTH: u16 = 0x0055; // Default column width
pub(crate) const DEFAULTROWHEIGHT: u16 = 0x0225; // Default row height
pub(crate) const WINDOW2: u16 = 0x023E; // Sheet window settings

pub(crate) const BIFF8_VERSION: u16 = 0x0600;
pub(crate) const GLOBALS_SUBSTREAM: u16 = 0x0005;
pub(crate) const WORKSHEET_SUBSTREAM: u16 = 0x0010;

/// Largest record body a BIFF8 reader accepts.
pub(crate) const MAX_RECORD_DATA: usize = 8224;
pub(crate) const RECORD_HEADER_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Record {
    pub(crate) kind: u16,
    pub(crate) data: Vec<u8>,
}

impl Record {
    pub(crate) fn new(kind: u16, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    pub(crate) fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.data.len()
    }

    pub(crate) fn u16_at(&self, offset: usize) -> Option<u16> {
        u16_at(&self.data, offset)
    }

    pub(crate) fn write_to(&self, out: &mut Vec<u8>) -> Result<(), TemplateError> {
        let length = u16::try_from(self.data.len())
            .ok()
            .filter(|length| usize::from(*length) <= MAX_RECORD_DATA)
            .ok_or(TemplateError::RecordTooLarge(self.data.len()))?;
        out.extend_from_slice(&self.kind.to_le_bytes());
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&self.data);
        Ok(())
    }
}

/// Records of one BOF..EOF substream, with their position in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Substream {
    pub(crate) offset: usize,
    pub(crate) records: Vec<Record>,
}

impl Substream {
    /// `(version, substream type)` from the leading BOF record.
    pub(crate) fn bof(&self) -> Option<(u16, u16)> {
        let first = self.records.first().filter(|record| record.kind == BOF)?;
        Some((first.u16_at(0)?, first.u16_at(2)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordStream {
    pub(crate) substreams: Vec<Substream>,
    /// Padding after the last substream, written back unchanged.
    pub(crate) trailing: Vec<u8>,
}

/// Splits a workbook stream on its top-level BOF/EOF pairs. Chart or macro
/// substreams nested inside a sheet stay part of that sheet.
pub(crate) fn read_substreams(bytes: &[u8]) -> Result<RecordStream, TemplateError> {
    let mut substreams = Vec::new();
    let mut current: Option<Substream> = None;
    let mut depth = 0usize;
    let mut position = 0;

    while position < bytes.len() {
        let (Some(kind), Some(length)) = (u16_at(bytes, position), u16_at(bytes, position + 2))
        else {
            if depth == 0 {
                break;
            }
            return Err(TemplateError::malformed(position, "truncated record header"));
        };
        if depth == 0 && kind == 0 && length == 0 {
            break;
        }

        let start = position + RECORD_HEADER_SIZE;
        let end = start + usize::from(length);
        let data = bytes
            .get(start..end)
            .ok_or_else(|| TemplateError::malformed(position, "record runs past the stream"))?;

        if depth == 0 {
            if kind != BOF {
                return Err(TemplateError::malformed(
                    position,
                    format!("record 0x{kind:04X} outside of any substream"),
                ));
            }
            current = Some(Substream {
                offset: position,
                records: Vec::new(),
            });
        }

        let record = Record::new(kind, data.to_vec());
        if let Some(substream) = current.as_mut() {
            substream.records.push(record);
        }

        match kind {
            BOF => depth += 1,
            EOF => {
                depth -= 1;
                if depth == 0 {
                    substreams.extend(current.take());
                }
            }
            _ => {}
        }
        position = end;
    }

    if depth != 0 {
        return Err(TemplateError::malformed(position, "substream has no EOF record"));
    }

    Ok(RecordStream {
        substreams,
        trailing: bytes.get(position..).unwrap_or_default().to_vec(),
    })
}

pub(crate) fn write_records(records: &[Record], out: &mut Vec<u8>) -> Result<(), TemplateError> {
    records.iter().try_for_each(|record| record.write_to(out))
}

/// Decodes `chars` characters of an XLUnicodeString body starting at
/// `offset`; `high_byte` selects UTF-16LE over compressed Latin-1.
pub(crate) fn decode_chars(data: &[u8], offset: usize, chars: usize, high_byte: bool) -> Option<String> {
    if high_byte {
        let bytes = data.get(offset..offset + chars * 2)?;
        let (text, _) = UTF_16LE.decode_without_bom_handling(bytes);
        Some(text.into_owned())
    } else {
        let bytes = data.get(offset..offset + chars)?;
        Some(bytes.iter().copied().map(char::from).collect())
    }
}

/// ShortXLUnicodeString: `cch` byte, flags byte, characters.
pub(crate) fn read_short_string(data: &[u8], offset: usize) -> Option<String> {
    let chars = usize::from(u8_at(data, offset)?);
    let high_byte = u8_at(data, offset + 1)? & 0x01 != 0;
    decode_chars(data, offset + 2, chars, high_byte)
}

/// Encodes text as `(cch, flags, characters)`, compressing to one byte per
/// character when every character fits.
pub(crate) fn encode_chars(text: &str) -> (usize, u8, Vec<u8>) {
    let units = text.encode_utf16().collect::<Vec<_>>();
    let compressible = units.iter().all(|unit| *unit <= 0xFF);
    let bytes = if compressible {
        units.iter().map(|unit| unit.to_le_bytes()[0]).collect()
    } else {
        units.iter().flat_map(|unit| unit.to_le_bytes()).collect()
    };
    (units.len(), u8::from(!compressible), bytes)
}
