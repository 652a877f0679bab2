use std::collections::BTreeMap;

use encoding_rs::{UTF_16BE, WINDOWS_1254};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;

use crate::error::ExtractError;
use crate::model::{PageText, TextCell};
use crate::options::PageSelection;
use crate::table_parse::split_line_into_cells;

/// Glyph width, in thousandths of the font size, used when a font carries no
/// `/Widths` array.
const DEFAULT_GLYPH_WIDTH: f32 = 500.0;
/// Width of every glyph of the fixed-pitch standard fonts.
const COURIER_GLYPH_WIDTH: f32 = 600.0;

fn split_text_into_pages(raw_text: &str) -> Vec<String> {
    let mut pages = raw_text
        .split('\u{000C}')
        .map(str::to_string)
        .collect::<Vec<_>>();
    if pages.last().is_some_and(String::is_empty) {
        pages.pop();
    }
    pages
}

fn looks_decoding_broken(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }

    if text.contains("?Identity-H Unimplemented?") {
        return true;
    }

    let total = text.chars().count();
    let replacement = text.matches('\u{FFFD}').count();
    let control = text
        .chars()
        .filter(|ch| ch.is_control() && !matches!(ch, '\n' | '\r' | '\t'))
        .count();

    replacement * 8 > total || control * 5 > total
}

fn decode_pdf_bytes(encoding: Option<&str>, bytes: &[u8]) -> String {
    let decoded = Document::decode_text(encoding, bytes);
    if !looks_decoding_broken(&decoded) {
        return decoded;
    }

    let unicode_hint = encoding.is_some_and(|name| {
        let lower = name.to_ascii_lowercase();
        lower.contains("utf16")
            || lower.contains("ucs2")
            || lower.contains("identity-h")
            || lower.contains("unicode")
    });
    if unicode_hint || bytes.starts_with(&[0xFE, 0xFF]) {
        let bytes = bytes.strip_prefix(&[0xFE, 0xFF]).unwrap_or(bytes);
        let (utf16, had_errors) = UTF_16BE.decode_without_bom_handling(bytes);
        if !had_errors && !utf16.is_empty() {
            return utf16.into_owned();
        }
    }

    // Turkish single-byte fonts commonly ship without a usable /Encoding.
    let (turkish, _, had_errors) = WINDOWS_1254.decode(bytes);
    if !had_errors && !turkish.is_empty() {
        return turkish.into_owned();
    }

    String::from_utf8_lossy(bytes).to_string()
}

/// Scores one candidate layout of a page. Lines that split into several
/// cells count most, then lines holding a date and time.
fn layout_score(lines: &[Vec<TextCell>]) -> i64 {
    let text = lines
        .iter()
        .flatten()
        .map(|cell| cell.text.as_str())
        .collect::<String>();
    if text.trim().is_empty() {
        return i64::MIN / 4;
    }

    let mut score = 0_i64;
    for cells in lines.iter().filter(|cells| !cells.is_empty()) {
        score += 1;
        if cells.len() >= 2 {
            score += 50;
        }
        let stamp = cells.iter().any(|cell| {
            let value = cell.text.as_str();
            value.chars().any(|ch| ch.is_ascii_digit())
                && (value.contains('.') || value.contains('/'))
                && value.contains(':')
        });
        if stamp {
            score += 15;
        }
    }

    if looks_decoding_broken(&text) {
        score -= 800;
    }
    score
}

fn text_layout(text: &str) -> Vec<Vec<TextCell>> {
    text.lines()
        .map(split_line_into_cells)
        .filter(|cells| !cells.is_empty())
        .collect()
}

/// Keeps the best-scoring layout; later candidates win ties.
fn choose_best_layout(candidates: Vec<Vec<Vec<TextCell>>>) -> Vec<Vec<TextCell>> {
    candidates
        .into_iter()
        .max_by_key(|lines| layout_score(lines))
        .unwrap_or_default()
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

fn number(object: &Object) -> Option<f32> {
    object.as_float().ok()
}

/// Encoding and advance widths of one page font.
struct FontMetrics<'a> {
    encoding: Option<&'a str>,
    first_char: i64,
    widths: Vec<f32>,
    default_width: f32,
}

impl<'a> FontMetrics<'a> {
    fn read(document: &'a Document, font: &'a Dictionary) -> Self {
        let fixed_pitch = font
            .get(b"BaseFont")
            .and_then(Object::as_name)
            .is_ok_and(|name| name.starts_with(b"Courier"));
        let widths = font
            .get(b"Widths")
            .ok()
            .and_then(|object| resolve(document, object))
            .and_then(|object| object.as_array().ok())
            .map(|items| {
                items
                    .iter()
                    .map(|item| resolve(document, item).and_then(number).unwrap_or(0.0))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            encoding: Some(font.get_font_encoding()),
            first_char: font
                .get(b"FirstChar")
                .and_then(Object::as_i64)
                .unwrap_or(0),
            widths,
            default_width: if fixed_pitch {
                COURIER_GLYPH_WIDTH
            } else {
                DEFAULT_GLYPH_WIDTH
            },
        }
    }

    fn width(&self, code: u8) -> f32 {
        usize::try_from(i64::from(code) - self.first_char)
            .ok()
            .and_then(|index| self.widths.get(index))
            .copied()
            .filter(|width| *width > 0.0)
            .unwrap_or(self.default_width)
    }
}

/// One shown glyph, positioned in text space.
#[derive(Debug, Clone, PartialEq)]
struct Glyph {
    ch: char,
    x0: f32,
    x1: f32,
    y: f32,
    size: f32,
    space: f32,
}

/// Text state of the content walk. Only the horizontal placement of text is
/// tracked; rotation and the current transformation matrix are ignored.
struct TextState {
    matrix: [f32; 6],
    line: [f32; 6],
    size: f32,
    leading: f32,
    char_spacing: f32,
    word_spacing: f32,
    scale: f32,
}

const IDENTITY: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

impl TextState {
    fn new() -> Self {
        Self {
            matrix: IDENTITY,
            line: IDENTITY,
            size: 0.0,
            leading: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            scale: 1.0,
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        let [a, b, c, d, e, f] = self.line;
        self.line = [a, b, c, d, tx * a + ty * c + e, tx * b + ty * d + f];
        self.matrix = self.line;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.leading);
    }

    fn advance(&mut self, tx: f32) {
        self.matrix[4] += tx * self.matrix[0];
        self.matrix[5] += tx * self.matrix[1];
    }

    fn show(&mut self, font: Option<&FontMetrics<'_>>, bytes: &[u8], glyphs: &mut Vec<Glyph>) {
        let decoded = decode_pdf_bytes(font.and_then(|font| font.encoding), bytes);
        let single_byte = decoded.chars().count() == bytes.len();
        let width_of = |index: usize| match (font, single_byte) {
            (Some(font), true) => font.width(bytes[index]),
            (Some(font), false) => font.default_width,
            (None, _) => DEFAULT_GLYPH_WIDTH,
        };
        let space = font.map_or(DEFAULT_GLYPH_WIDTH, |font| font.width(b' ')) / 1000.0
            * self.size
            * self.scale
            * self.matrix[0].abs();

        for (index, ch) in decoded.chars().enumerate() {
            let mut tx = width_of(index) / 1000.0 * self.size + self.char_spacing;
            if single_byte && bytes[index] == b' ' {
                tx += self.word_spacing;
            }
            tx *= self.scale;

            let x0 = self.matrix[4];
            self.advance(tx);
            glyphs.push(Glyph {
                ch,
                x0,
                x1: self.matrix[4],
                y: self.matrix[5],
                size: (self.size * self.matrix[3]).abs().max(1.0),
                space: space.max(f32::EPSILON),
            });
        }
    }

    fn show_array(
        &mut self,
        font: Option<&FontMetrics<'_>>,
        items: &[Object],
        glyphs: &mut Vec<Glyph>,
    ) {
        for item in items {
            match item {
                Object::String(bytes, _) => self.show(font, bytes, glyphs),
                other => {
                    if let Some(adjust) = number(other) {
                        self.advance(-adjust / 1000.0 * self.size * self.scale);
                    }
                }
            }
        }
    }
}

/// Groups glyphs into lines by baseline, then into cells wherever the gap to
/// the previous glyph is wider than one and a half spaces.
fn glyphs_to_lines(mut glyphs: Vec<Glyph>) -> Vec<Vec<TextCell>> {
    glyphs.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x0.total_cmp(&b.x0)));

    let mut rows: Vec<Vec<Glyph>> = Vec::new();
    for glyph in glyphs {
        match rows.last_mut() {
            Some(row) if (row[0].y - glyph.y).abs() <= row[0].size * 0.3 => row.push(glyph),
            _ => rows.push(vec![glyph]),
        }
    }

    let mut lines = Vec::new();
    for mut row in rows {
        row.sort_by(|a, b| a.x0.total_cmp(&b.x0));
        let mut cells: Vec<TextCell> = Vec::new();
        let mut current: Option<TextCell> = None;
        for glyph in row.iter().filter(|glyph| !glyph.ch.is_whitespace()) {
            match current.as_mut() {
                Some(cell) if glyph.x0 - cell.end <= glyph.space * 1.5 => {
                    if glyph.x0 - cell.end > glyph.space * 0.3 {
                        cell.text.push(' ');
                    }
                    cell.text.push(glyph.ch);
                    cell.end = cell.end.max(glyph.x1);
                }
                _ => {
                    cells.extend(current.take());
                    current = Some(TextCell::new(glyph.ch.to_string(), glyph.x0, glyph.x1));
                }
            }
        }
        cells.extend(current);
        if !cells.is_empty() {
            lines.push(cells);
        }
    }
    lines
}

/// Lays out a page from its content stream, keeping where each run of text
/// starts and ends so blank table cells stay visible as gaps.
fn layout_page_content(document: &Document, page_id: ObjectId) -> Option<Vec<Vec<TextCell>>> {
    let raw_content = document.get_page_content(page_id).ok()?;
    let content = Content::decode(&raw_content).ok()?;
    let fonts = document
        .get_page_fonts(page_id)
        .into_iter()
        .map(|(name, font)| (name, FontMetrics::read(document, font)))
        .collect::<BTreeMap<Vec<u8>, FontMetrics<'_>>>();

    let mut state = TextState::new();
    let mut font: Option<&FontMetrics<'_>> = None;
    let mut glyphs = Vec::new();
    for operation in &content.operations {
        let operands = &operation.operands;
        let operand = |index: usize| operands.get(index).and_then(number);
        match operation.operator.as_str() {
            "BT" => {
                state.matrix = IDENTITY;
                state.line = IDENTITY;
            }
            "Tf" => {
                font = operands
                    .first()
                    .and_then(|operand| operand.as_name().ok())
                    .and_then(|name| fonts.get(name));
                state.size = operand(1).unwrap_or(state.size);
            }
            "TL" => state.leading = operand(0).unwrap_or(state.leading),
            "Tc" => state.char_spacing = operand(0).unwrap_or(state.char_spacing),
            "Tw" => state.word_spacing = operand(0).unwrap_or(state.word_spacing),
            "Tz" => state.scale = operand(0).map_or(state.scale, |scale| scale / 100.0),
            "Td" | "TD" => {
                let (tx, ty) = (operand(0).unwrap_or(0.0), operand(1).unwrap_or(0.0));
                if operation.operator == "TD" {
                    state.leading = -ty;
                }
                state.move_line(tx, ty);
            }
            "Tm" => {
                let values = (0..6).filter_map(operand).collect::<Vec<_>>();
                if let Ok(matrix) = <[f32; 6]>::try_from(values) {
                    state.matrix = matrix;
                    state.line = matrix;
                }
            }
            "T*" => state.next_line(),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    state.show(font, bytes, &mut glyphs);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    state.show_array(font, items, &mut glyphs);
                }
            }
            "'" => {
                state.next_line();
                if let Some(Object::String(bytes, _)) = operands.first() {
                    state.show(font, bytes, &mut glyphs);
                }
            }
            "\"" => {
                state.word_spacing = operand(0).unwrap_or(state.word_spacing);
                state.char_spacing = operand(1).unwrap_or(state.char_spacing);
                state.next_line();
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    state.show(font, bytes, &mut glyphs);
                }
            }
            _ => {}
        }
    }

    let lines = glyphs_to_lines(glyphs);
    (!lines.is_empty()).then_some(lines)
}

/// Reads the positioned lines of every selected page of one PDF document.
///
/// Each page's layout is the best of three: `pdf-extract` text, lopdf's own
/// text extraction (both split on wide whitespace, positioned by character
/// column), and a walk over the page's content stream that positions text by
/// its glyph widths. The content walk wins ties.
pub(crate) fn read_pdf_pages(
    input_pdf: &[u8],
    document_index: usize,
    page_selection: Option<&PageSelection>,
) -> Result<Vec<PageText>, ExtractError> {
    let document = Document::load_mem(input_pdf).map_err(|source| ExtractError::PdfLoad {
        document: document_index,
        source,
    })?;
    let pages_map = document.get_pages();

    let pdf_extract_pages = pdf_extract::extract_text_from_mem(input_pdf)
        .ok()
        .map(|text| split_text_into_pages(&text))
        .filter(|pages| pages.len() == pages_map.len());

    let mut pages = Vec::new();
    for (index, (page_no, page_id)) in pages_map.iter().enumerate() {
        if page_selection.is_some_and(|selection| !selection.contains(*page_no)) {
            continue;
        }

        let mut candidates = Vec::new();
        if let Some(text) = pdf_extract_pages.as_ref().and_then(|pages| pages.get(index)) {
            candidates.push(text_layout(text));
        }
        if let Ok(text) = document.extract_text(&[*page_no]) {
            candidates.push(text_layout(&text));
        }
        if let Some(lines) = layout_page_content(&document, *page_id) {
            candidates.push(lines);
        }

        let count = candidates.len();
        let lines = choose_best_layout(candidates);
        debug!(
            document = document_index,
            page = page_no,
            candidates = count,
            lines = lines.len(),
            "page laid out"
        );

        pages.push(PageText {
            page_number: *page_no,
            lines,
        });
    }

    if pages.is_empty() {
        return Err(ExtractError::NoPagesSelected(document_index));
    }

    Ok(pages)
}
