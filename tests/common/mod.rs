#![allow(dead_code)]

use std::path::Path;

use encoding_rs::WINDOWS_1252;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, StringFormat, dictionary};
use sami_pdf2xls::xls::CompoundFile;

pub const SUMMARY_STREAM: &str = "\u{5}SummaryInformation";
pub const TEMPLATE_HEADERS: [&str; 8] = [
    "Yön", "Belge Tipi", "Belge No", "Plaka", "Dorse 1", "Dorse 2", "Tarih", "Saat",
];
/// Cell format of the header labels and of columns 0..=7 (COLINFO).
pub const HEADER_XF: u16 = 16;
/// Cell format of the pre-formatted blank run on row 1 (date format 14).
pub const DATE_XF: u16 = 17;
pub const TEMPLATE_XF_COUNT: usize = 18;

/// Builds a PDF whose pages hold the given lines in WinAnsi-encoded Courier.
pub fn pdf_bytes<S: AsRef<str>>(pages: &[Vec<S>]) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut doc = Document::with_version("1.5");

    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut page_ids = Vec::new();

    for lines in pages {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new("TL", vec![14.into()]),
            Operation::new("Td", vec![40.into(), 780.into()]),
        ];

        for (index, line) in lines.iter().enumerate() {
            let (bytes, _, _) = WINDOWS_1252.encode(line.as_ref());
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(bytes.into_owned(), StringFormat::Literal)],
            ));
            if index + 1 < lines.len() {
                operations.push(Operation::new("T*", vec![]));
            }
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        page_ids.push(page_id);
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.iter().map(|id| (*id).into()).collect::<Vec<_>>(),
            "Count" => i64::try_from(page_ids.len())?,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}

pub fn create_test_pdf<S: AsRef<str>>(
    path: &Path,
    pages: &[Vec<S>],
) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::write(path, pdf_bytes(pages)?)?;
    Ok(())
}

/// A crossing report page: header plus `(plate, timestamp)` rows.
pub fn report_page(rows: &[(&str, &str)]) -> Vec<String> {
    let mut lines = vec![
        "Kapikule Gümrük Raporu".to_string(),
        "No  Araç Plaka  Tarih Saat".to_string(),
    ];
    for (index, (plate, stamp)) in rows.iter().enumerate() {
        lines.push(format!("{}  {plate}  {stamp}", index + 1));
    }
    lines
}

fn record(kind: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 4);
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&u16::try_from(data.len()).unwrap_or(u16::MAX).to_le_bytes());
    out.extend_from_slice(data);
    out
}

fn words(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

fn bof(kind: u16) -> Vec<u8> {
    let mut data = words(&[0x0600, kind, 0x0DBB, 0x07CC]);
    data.extend_from_slice(&[0; 8]);
    record(0x0809, &data)
}

fn xf(format: u16, flags: u16) -> Vec<u8> {
    let mut data = words(&[0, format, flags]);
    data.extend_from_slice(&[0x20, 0, 0, 0]);
    data.extend_from_slice(&[0; 8]);
    data.extend_from_slice(&words(&[0x20C0]));
    record(0x00E0, &data)
}

fn label(row: u16, col: u16, xf: u16, text: &str) -> Vec<u8> {
    let units = text.encode_utf16().collect::<Vec<_>>();
    let mut data = words(&[row, col, xf, u16::try_from(units.len()).unwrap_or(0)]);
    data.push(1);
    data.extend_from_slice(&words(&units));
    record(0x0204, &data)
}

fn row(index: u16, last_col: u16) -> Vec<u8> {
    record(0x0208, &words(&[index, 0, last_col + 1, 0x0114, 0, 0, 0x0100, 0x000F]))
}

fn globals(sheet_offset: u32) -> Vec<u8> {
    let mut out = bof(0x0005);
    out.extend(record(0x0042, &words(&[1200])));
    out.extend(record(0x0031, &[0xC8, 0, 0, 0, 0xFF, 0x7F, 0x90, 0x01, 0, 0, 0, 0, 0xA2, 0, 5, 0, b'A', b'r', b'i', b'a', b'l']));
    for _ in 0..15 {
        out.extend(xf(0, 0xFFF5));
    }
    out.extend(xf(0, 0x0001));
    out.extend(xf(0, 0x0001));
    out.extend(xf(14, 0x0001));
    out.extend(record(0x0293, &[0x00, 0x80, 0x00, 0xFF]));

    let mut boundsheet = sheet_offset.to_le_bytes().to_vec();
    boundsheet.extend_from_slice(&[0, 0, 6, 0]);
    boundsheet.extend_from_slice(b"Sayfa1");
    out.extend(record(0x0085, &boundsheet));
    out.extend(record(0x000A, &[]));
    out
}

fn worksheet() -> Vec<u8> {
    let mut cells = Vec::new();
    for (col, text) in (0u16..).zip(TEMPLATE_HEADERS) {
        cells.extend(label(0, col, HEADER_XF, text));
    }
    let blank_run_start = cells.len();
    let mut run = words(&[1, 0]);
    run.extend(words(&[DATE_XF; 10]));
    run.extend(words(&[9]));
    cells.extend(record(0x00BE, &run));

    let rows = [row(0, 7), row(1, 9)].concat();
    let first_cells = u16::try_from(rows.len() - 20).unwrap_or(0);
    let second_cells = u16::try_from(blank_run_start).unwrap_or(0);
    let back = u32::try_from(rows.len() + cells.len()).unwrap_or(0);
    let mut dbcell = back.to_le_bytes().to_vec();
    dbcell.extend(words(&[first_cells, second_cells]));

    let mut index = vec![0; 4];
    index.extend(0u32.to_le_bytes());
    index.extend(2u32.to_le_bytes());
    index.extend(0u32.to_le_bytes());
    index.extend(0u32.to_le_bytes());

    let mut out = bof(0x0010);
    out.extend(record(0x020B, &index));
    out.extend(record(0x0225, &words(&[0, 0x0114])));
    out.extend(record(0x0055, &words(&[8])));
    out.extend(record(0x007D, &words(&[0, 7, 0x0C00, HEADER_XF, 0, 0])));
    let mut dimensions = 0u32.to_le_bytes().to_vec();
    dimensions.extend(2u32.to_le_bytes());
    dimensions.extend(words(&[0, 10, 0]));
    out.extend(record(0x0200, &dimensions));
    out.extend(rows);
    out.extend(cells);
    out.extend(record(0x00D7, &dbcell));
    out.extend(record(0x023E, &words(&[0x06B6, 0, 0, 0x0040, 0, 0, 0, 0, 0])));
    out.extend(record(0x00E5, &words(&[1, 10, 11, 0, 2])));
    out.extend(record(0x000A, &[]));
    out
}

/// Record types compared between a template and its output.
pub const BOUNDSHEET: u16 = 0x0085;
pub const XF: u16 = 0x00E0;
pub const MULBLANK: u16 = 0x00BE;
pub const LABEL: u16 = 0x0204;

/// The workbook stream of an `.xls` file as `(type, data)` records, one list
/// per BOF..EOF substream. Padding after the last substream is skipped.
pub fn substreams(xls: &[u8]) -> Vec<Vec<(u16, Vec<u8>)>> {
    let container = CompoundFile::parse(xls).expect("file should be a compound file");
    let stream = container.stream("Workbook").expect("file should hold a workbook");

    let mut out: Vec<Vec<(u16, Vec<u8>)>> = Vec::new();
    let mut open = false;
    let mut offset = 0;
    while offset + 4 <= stream.len() {
        let kind = u16::from_le_bytes([stream[offset], stream[offset + 1]]);
        let len = usize::from(u16::from_le_bytes([stream[offset + 2], stream[offset + 3]]));
        if !open && kind != 0x0809 {
            break;
        }
        let data = stream[offset + 4..offset + 4 + len].to_vec();
        offset += 4 + len;

        if kind == 0x0809 {
            out.push(Vec::new());
            open = true;
        }
        out.last_mut().expect("substream started").push((kind, data));
        if kind == 0x000A {
            open = false;
        }
    }
    out
}

/// Little-endian encoding of `values`, for building expected record data.
pub fn le_words(values: &[u16]) -> Vec<u8> {
    words(values)
}

pub fn summary_bytes() -> Vec<u8> {
    (0u8..=255).cycle().take(436).collect()
}

/// One-sheet BIFF8 workbook: a header row of labels on row 0 and a
/// date-formatted blank run over columns 0..=9 of row 1.
pub fn template_bytes() -> Vec<u8> {
    let sheet_offset = u32::try_from(globals(0).len()).unwrap_or(0);
    let mut workbook = globals(sheet_offset);
    workbook.extend(worksheet());
    workbook.resize(workbook.len().max(4096), 0);

    let mut container = CompoundFile::new();
    container.set_stream("Workbook", workbook);
    container.set_stream(SUMMARY_STREAM, summary_bytes());
    container.to_bytes()
}
