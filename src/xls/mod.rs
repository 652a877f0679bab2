//! Legacy binary spreadsheet (BIFF8 inside an OLE compound file).

mod biff;
mod bytes;
mod cfb;
mod patch;
mod sheet;
mod template;

pub use cfb::CompoundFile;
pub use patch::{CellStyle, CellWrite, MAX_COLUMN, MAX_LABEL_CHARS, SheetPatch, WriteValue, apply_patch};
pub use sheet::{Cell, CellValue, decode_rk};
pub use template::{DEFAULT_CELL_XF, TEXT_NUMBER_FORMAT, Template};
