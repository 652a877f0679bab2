mod common;

use std::process::Command;

use pretty_assertions::assert_eq;
use sami_pdf2xls::xls::{CellValue, CompoundFile, TEXT_NUMBER_FORMAT};
use sami_pdf2xls::{
    BatchContext, Direction, ErrorKind, PdfSource, PipelineOptions, StyleMode, Template,
    TranscribeOptions, records_from_pdfs, transcribe_pdfs,
};
use tempfile::tempdir;

fn report(name: &str, rows: &[(&str, &str)]) -> PdfSource {
    let bytes = common::pdf_bytes(&[common::report_page(rows)]).expect("PDF fixture should be created");
    PdfSource::new(name, bytes)
}

fn force_text() -> PipelineOptions {
    PipelineOptions {
        transcribe: TranscribeOptions {
            style_mode: StyleMode::ForceText,
            ..TranscribeOptions::default()
        },
        ..PipelineOptions::default()
    }
}

fn value_at(template: &Template, row: u16, col: u16) -> CellValue {
    template
        .cell(0, row, col)
        .expect("sheet 0 exists")
        .unwrap_or_else(|| panic!("cell ({row}, {col}) is missing"))
        .value
}

fn text_at(template: &Template, row: u16, col: u16) -> String {
    match template.cell(0, row, col).expect("sheet 0 exists") {
        Some(cell) => match cell.value {
            CellValue::Text(text) => text,
            other => panic!("cell ({row}, {col}) is not text: {other:?}"),
        },
        None => panic!("cell ({row}, {col}) is missing"),
    }
}

#[test]
fn two_documents_become_two_text_rows() {
    let documents = [
        report("first.pdf", &[("34AB123", "01.06.2024 14:05")]),
        report("second.pdf", &[("34AB123", "01.06.2024 14:05")]),
    ];
    let batch = BatchContext::new(Direction::Out, "0098");

    let transcription = transcribe_pdfs(&documents, &common::template_bytes(), &batch, &force_text())
        .expect("pipeline should succeed");
    assert_eq!(transcription.report.document_count, 2);
    assert_eq!(transcription.report.table_count, 2);
    assert_eq!(transcription.report.row_count, 2);

    let written = Template::parse(&transcription.bytes).expect("output should parse");
    let text = |value: &str| CellValue::Text(value.to_string());
    let expected = vec![
        text("Ç"),
        text("3"),
        text("0098"),
        text("34AB123"),
        CellValue::Blank,
        CellValue::Blank,
        text("01/06/2024"),
        text("14:05"),
    ];
    for row in [1u16, 2] {
        let values = (0..8).map(|col| value_at(&written, row, col)).collect::<Vec<_>>();
        assert_eq!(values, expected);
        for col in 0..8 {
            let cell = written.cell(0, row, col).expect("sheet 0 exists").expect("cell written");
            assert_eq!(written.number_format(cell.xf), Some(TEXT_NUMBER_FORMAT));
        }
    }
    assert_eq!(written.cell(0, 3, 0).expect("sheet 0 exists"), None);
}

#[test]
fn force_text_copies_the_inherited_formats() {
    let documents = [report(
        "report.pdf",
        &[("34AB123", "01.06.2024 14:05"), ("06XY987", "02.06.2024 09:30")],
    )];
    let batch = BatchContext::new(Direction::Out, "0098");
    let transcription = transcribe_pdfs(&documents, &common::template_bytes(), &batch, &force_text())
        .expect("pipeline should succeed");
    let written = Template::parse(&transcription.bytes).expect("output should parse");

    // Row 1 inherits the pre-formatted run, row 2 the column format.
    assert_eq!(written.xf_count(), common::TEMPLATE_XF_COUNT + 2);
    let first = written.cell(0, 1, 0).expect("sheet 0 exists").expect("cell written");
    let second = written.cell(0, 2, 0).expect("sheet 0 exists").expect("cell written");
    assert_ne!(first.xf, second.xf);
    assert!(usize::from(first.xf) >= common::TEMPLATE_XF_COUNT);
    assert!(usize::from(second.xf) >= common::TEMPLATE_XF_COUNT);

    // The rest of the pre-formatted run is left in place.
    for col in [8, 9] {
        let cell = written.cell(0, 1, col).expect("sheet 0 exists").expect("run kept");
        assert_eq!(cell.value, CellValue::Blank);
        assert_eq!(cell.xf, common::DATE_XF);
    }
}

#[test]
fn preserve_mode_keeps_numbers_and_template_formats() {
    let documents = [report("report.pdf", &[("34AB123", "01.06.2024 14:05")])];
    let batch = BatchContext::new(Direction::Out, "0098");
    let transcription = transcribe_pdfs(
        &documents,
        &common::template_bytes(),
        &batch,
        &PipelineOptions::default(),
    )
    .expect("pipeline should succeed");
    let written = Template::parse(&transcription.bytes).expect("output should parse");

    let document_type = written.cell(0, 1, 1).expect("sheet 0 exists").expect("cell written");
    assert_eq!(document_type.value, CellValue::Number(3.0));
    assert_eq!(document_type.xf, common::DATE_XF);

    let trailer = written.cell(0, 1, 4).expect("sheet 0 exists").expect("cell written");
    assert_eq!(trailer.value, CellValue::Blank);
    assert_eq!(text_at(&written, 1, 2), "0098");
    assert_eq!(written.xf_count(), common::TEMPLATE_XF_COUNT);
}

#[test]
fn inbound_rows_leave_document_fields_empty() {
    let documents = [report("report.pdf", &[("34AB123", "01/06/2024 14:05")])];
    let batch = BatchContext::new(Direction::In, "ignored");
    let transcription = transcribe_pdfs(&documents, &common::template_bytes(), &batch, &force_text())
        .expect("pipeline should succeed");
    let written = Template::parse(&transcription.bytes).expect("output should parse");

    assert_eq!(text_at(&written, 1, 0), "G");
    for col in [1, 2] {
        let cell = written.cell(0, 1, col).expect("sheet 0 exists").expect("cell written");
        assert_eq!(cell.value, CellValue::Blank);
        assert_eq!(written.number_format(cell.xf), Some(TEXT_NUMBER_FORMAT));
    }
    assert_eq!(text_at(&written, 1, 6), "01/06/2024");
}

#[test]
fn template_outside_the_written_rows_is_unchanged() {
    let template_bytes = common::template_bytes();
    let template = Template::parse(&template_bytes).expect("template should parse");
    let documents = [report("report.pdf", &[("34AB123", "01.06.2024 14:05")])];
    let batch = BatchContext::new(Direction::Out, "0098");
    let transcription = transcribe_pdfs(&documents, &template_bytes, &batch, &force_text())
        .expect("pipeline should succeed");
    let written = Template::parse(&transcription.bytes).expect("output should parse");

    assert_eq!(written.sheet_names(), vec!["Sayfa1"]);
    for col in 0..8 {
        assert_eq!(
            written.cell(0, 0, col).expect("sheet 0 exists"),
            template.cell(0, 0, col).expect("sheet 0 exists")
        );
        assert_eq!(text_at(&written, 0, col), common::TEMPLATE_HEADERS[usize::from(col)]);
    }

    let container = CompoundFile::parse(&transcription.bytes).expect("output is a compound file");
    assert_eq!(
        container.stream(common::SUMMARY_STREAM),
        Some(common::summary_bytes().as_slice())
    );
}

type Records = Vec<(u16, Vec<u8>)>;

fn without(records: &Records, kinds: &[u16]) -> Records {
    records
        .iter()
        .filter(|(kind, _)| !kinds.contains(kind))
        .cloned()
        .collect()
}

fn only(records: &Records, kinds: &[u16]) -> Records {
    records
        .iter()
        .filter(|(kind, _)| kinds.contains(kind))
        .cloned()
        .collect()
}

#[test]
fn records_outside_the_written_cells_are_kept_in_both_style_modes() {
    const SHEET_SETTINGS: [u16; 5] = [0x0055, 0x007D, 0x0225, 0x023E, 0x00E5];

    let template_bytes = common::template_bytes();
    let before = common::substreams(&template_bytes);
    let documents = [report("report.pdf", &[("34AB123", "01.06.2024 14:05")])];
    let batch = BatchContext::new(Direction::Out, "0098");

    for options in [PipelineOptions::default(), force_text()] {
        let transcription = transcribe_pdfs(&documents, &template_bytes, &batch, &options)
            .expect("pipeline should succeed");
        let after = common::substreams(&transcription.bytes);
        assert_eq!(after.len(), before.len());

        // Globals: only appended formats and the sheet offset may differ.
        let ignored = [common::XF, common::BOUNDSHEET];
        assert_eq!(without(&after[0], &ignored), without(&before[0], &ignored));
        let (old_xfs, new_xfs) = (only(&before[0], &[common::XF]), only(&after[0], &[common::XF]));
        assert_eq!(&new_xfs[..old_xfs.len()], old_xfs.as_slice());
        let sheet_names = |records: &Records| {
            only(records, &[common::BOUNDSHEET])
                .into_iter()
                .map(|(_, data)| data[4..].to_vec())
                .collect::<Vec<_>>()
        };
        assert_eq!(sheet_names(&after[0]), sheet_names(&before[0]));

        // Sheet settings, the header labels and the tail of the formatted run.
        assert_eq!(only(&after[1], &SHEET_SETTINGS), only(&before[1], &SHEET_SETTINGS));
        let header_labels = |records: &Records| {
            only(records, &[common::LABEL])
                .into_iter()
                .filter(|(_, data)| data[..2] == [0, 0])
                .collect::<Vec<_>>()
        };
        assert_eq!(header_labels(&after[1]), header_labels(&before[1]));
        let tail_run = common::le_words(&[1, 8, common::DATE_XF, common::DATE_XF, 9]);
        assert!(after[1].contains(&(common::MULBLANK, tail_run)));
    }
}

#[test]
fn force_text_output_opens_in_another_reader() {
    use calamine::{Data, Reader, Xls, open_workbook_from_rs};

    let documents = [report("report.pdf", &[("34AB123", "01.06.2024 14:05")])];
    let batch = BatchContext::new(Direction::In, "ignored");
    let transcription = transcribe_pdfs(&documents, &common::template_bytes(), &batch, &force_text())
        .expect("pipeline should succeed");

    let mut workbook: Xls<_> = open_workbook_from_rs(std::io::Cursor::new(transcription.bytes))
        .expect("calamine should open the output");
    let range = workbook
        .worksheet_range("Sayfa1")
        .expect("calamine should read the sheet");

    let text = |row: u32, col: u32| match range.get_value((row, col)) {
        Some(Data::String(value)) => value.clone(),
        None | Some(Data::Empty) => String::new(),
        Some(other) => panic!("cell ({row}, {col}) is not text: {other:?}"),
    };
    assert_eq!(text(0, 3), "Plaka");
    assert_eq!(text(1, 0), "G");
    assert_eq!(text(1, 1), "");
    assert_eq!(text(1, 3), "34AB123");
    assert_eq!(text(1, 4), "");
    assert_eq!(text(1, 6), "01/06/2024");
    assert_eq!(text(1, 7), "14:05");
}

#[test]
fn same_inputs_give_same_bytes() {
    let documents = [
        report("a.pdf", &[("34AB123", "01.06.2024 14:05")]),
        report("b.pdf", &[("06XY987", "02.06.2024")]),
    ];
    let batch = BatchContext::new(Direction::Out, "0098");
    let template = common::template_bytes();

    let first = transcribe_pdfs(&documents, &template, &batch, &force_text())
        .expect("pipeline should succeed");
    let second = transcribe_pdfs(&documents, &template, &batch, &force_text())
        .expect("pipeline should succeed");
    assert_eq!(first.bytes, second.bytes);
    assert_eq!(first.records[1].time, "");
}

#[test]
fn records_keep_document_order_and_duplicates() {
    let documents = [
        report("a.pdf", &[("34AB123", "01.06.2024 14:05"), ("34AB123", "01.06.2024 14:05")]),
        report("b.pdf", &[("06XY987", "01.06.2024 15:10")]),
    ];
    let batch = BatchContext::new(Direction::Out, "0098");
    let records = records_from_pdfs(&documents, &batch, &PipelineOptions::default())
        .expect("records should normalize");

    let plates = records
        .records
        .iter()
        .map(|record| record.plate.as_str())
        .collect::<Vec<_>>();
    assert_eq!(plates, vec!["34AB123", "34AB123", "06XY987"]);
    assert_eq!(records.report.row_count, 3);
}

#[test]
fn documents_without_tables_report_extraction_empty() {
    let bytes = common::pdf_bytes(&[vec!["No table here"]]).expect("PDF fixture should be created");
    let batch = BatchContext::new(Direction::Out, "0098");
    let error = transcribe_pdfs(
        &[PdfSource::new("empty.pdf", bytes)],
        &common::template_bytes(),
        &batch,
        &PipelineOptions::default(),
    )
    .expect_err("no table to transcribe");
    assert_eq!(error.kind(), ErrorKind::ExtractionEmpty);
}

#[test]
fn tables_without_a_plate_column_report_the_row() {
    let bytes = common::pdf_bytes(&[vec!["No  Kapi  Tarih Saat", "1  Kapikule  01.06.2024 14:05"]])
        .expect("PDF fixture should be created");
    let batch = BatchContext::new(Direction::Out, "0098");
    let error = records_from_pdfs(
        &[PdfSource::new("gate.pdf", bytes)],
        &batch,
        &PipelineOptions::default(),
    )
    .expect_err("plate column is missing");
    assert_eq!(error.kind(), ErrorKind::MissingField);
    assert!(error.to_string().contains("row 0"));
}

#[test]
fn a_blank_plate_cell_does_not_pull_the_timestamp_left() {
    let bytes = common::pdf_bytes(&[vec![
        "No  Araç Plaka  Tarih Saat",
        "1   34AB123     01.06.2024 14:05",
        "2               01.06.2024 14:06",
    ]])
    .expect("PDF fixture should be created");
    let batch = BatchContext::new(Direction::Out, "0098");
    let error = records_from_pdfs(
        &[PdfSource::new("gap.pdf", bytes)],
        &batch,
        &PipelineOptions::default(),
    )
    .expect_err("second row has no plate");

    assert_eq!(error.kind(), ErrorKind::MissingField);
    assert!(error.to_string().contains("row 1"));
}

#[test]
fn unreadable_templates_fail_the_batch() {
    let documents = [report("report.pdf", &[("34AB123", "01.06.2024 14:05")])];
    let batch = BatchContext::new(Direction::Out, "0098");
    let error = transcribe_pdfs(&documents, b"not a workbook", &batch, &PipelineOptions::default())
        .expect_err("template is garbage");
    assert_eq!(error.kind(), ErrorKind::TemplateUnreadable);
}

#[test]
fn cli_writes_the_workbook() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("report.pdf");
    let template = dir.path().join("template.xls");
    let output = dir.path().join("out.xls");
    common::create_test_pdf(&input, &[common::report_page(&[("34AB123", "01.06.2024 14:05")])])
        .expect("PDF fixture should be created");
    std::fs::write(&template, common::template_bytes()).expect("template should be written");

    let status = Command::new(env!("CARGO_BIN_EXE_pdf2xls"))
        .args([
            "convert",
            "-i",
            &input.to_string_lossy(),
            "--template",
            &template.to_string_lossy(),
            "--direction",
            "out",
            "--document-number",
            "0098",
            "--force-text",
            "-o",
            &output.to_string_lossy(),
        ])
        .status()
        .expect("CLI should run");

    assert_eq!(status.code(), Some(0));
    let written = Template::parse(&std::fs::read(&output).expect("output should exist"))
        .expect("output should parse");
    assert_eq!(text_at(&written, 1, 3), "34AB123");
}

#[test]
fn cli_exits_with_code_2_when_no_tables() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("cli-empty.pdf");
    let template = dir.path().join("template.xls");
    let output = dir.path().join("cli-empty.xls");

    common::create_test_pdf(&input, &[vec!["No table here"]])
        .expect("PDF fixture should be created");
    std::fs::write(&template, common::template_bytes()).expect("template should be written");

    let status = Command::new(env!("CARGO_BIN_EXE_pdf2xls"))
        .args([
            "convert",
            "-i",
            &input.to_string_lossy(),
            "--template",
            &template.to_string_lossy(),
            "--direction",
            "in",
            "-o",
            &output.to_string_lossy(),
        ])
        .status()
        .expect("CLI should run");

    assert_eq!(status.code(), Some(2));
    assert!(!output.exists());
}

#[test]
fn cli_leaves_no_partial_output_when_the_write_fails() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("report.pdf");
    let template = dir.path().join("template.xls");
    let output = dir.path().join("taken");
    common::create_test_pdf(&input, &[common::report_page(&[("34AB123", "01.06.2024 14:05")])])
        .expect("PDF fixture should be created");
    std::fs::write(&template, common::template_bytes()).expect("template should be written");
    std::fs::create_dir(&output).expect("output directory should be created");
    std::fs::write(output.join("keep.txt"), b"keep").expect("marker should be written");

    let listing = || {
        let mut names = std::fs::read_dir(dir.path())
            .expect("tempdir should be listed")
            .map(|entry| entry.expect("entry should be read").file_name())
            .collect::<Vec<_>>();
        names.sort();
        names
    };
    let before = listing();

    let status = Command::new(env!("CARGO_BIN_EXE_pdf2xls"))
        .args([
            "convert",
            "-i",
            &input.to_string_lossy(),
            "--template",
            &template.to_string_lossy(),
            "--direction",
            "out",
            "-o",
            &output.to_string_lossy(),
        ])
        .status()
        .expect("CLI should run");

    assert_eq!(status.code(), Some(1));
    assert_eq!(listing(), before);
    assert!(output.join("keep.txt").exists());
}

#[test]
fn cli_rejects_unknown_directions_with_code_1() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("report.pdf");
    common::create_test_pdf(&input, &[common::report_page(&[("34AB123", "01.06.2024 14:05")])])
        .expect("PDF fixture should be created");

    let output = Command::new(env!("CARGO_BIN_EXE_pdf2xls"))
        .args(["records", "-i", &input.to_string_lossy(), "--direction", "sideways"])
        .output()
        .expect("CLI should run");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("sideways"));
    assert!(output.stdout.is_empty());

    let output = Command::new(env!("CARGO_BIN_EXE_pdf2xls"))
        .args(["records", "-i", &input.to_string_lossy(), "--direction", "Ç"])
        .output()
        .expect("CLI should run");
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("34AB123"));
}
