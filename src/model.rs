use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Document-type code written for outbound crossings (customs declaration).
pub const DECLARATION_DOCUMENT_TYPE: u8 = 3;

/// Number of fields in a [`CanonicalRecord`], and of columns written per row.
pub const CANONICAL_FIELD_COUNT: usize = 8;

/// Column titles of the canonical record, in write order.
pub const CANONICAL_FIELD_NAMES: [&str; CANONICAL_FIELD_COUNT] = [
    "direction",
    "document_type",
    "document_number",
    "plate",
    "trailer1",
    "trailer2",
    "date",
    "time",
];

/// A run of text on one line together with its horizontal extent.
///
/// `start` and `end` share a unit within one page only: text-space units when
/// the page was laid out from its content stream, character columns when it
/// came from a plain-text extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct TextCell {
    pub text: String,
    pub start: f32,
    pub end: f32,
}

impl TextCell {
    #[must_use]
    pub fn new(text: impl Into<String>, start: f32, end: f32) -> Self {
        Self {
            text: text.into(),
            start,
            end,
        }
    }
}

/// Lines of one page, top to bottom, each split into cells left to right.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page_number: u32,
    pub lines: Vec<Vec<TextCell>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedTable {
    pub page: u32,
    pub rows: Vec<Vec<TextCell>>,
    pub confidence: f32,
}

/// One table found on one page, header split off from its data rows.
///
/// Data rows are padded to the header width with `None`, so an absent cell is
/// distinguishable from a cell that was present but empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub document: usize,
    pub page: u32,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowSource {
    pub document: usize,
    pub page: u32,
}

/// One data row of an extracted table, keyed by its table's header text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTableRow {
    pub source: RowSource,
    pub fields: Vec<(String, Option<String>)>,
}

impl RawTableRow {
    #[must_use]
    pub fn new(source: RowSource, fields: Vec<(String, Option<String>)>) -> Self {
        Self { source, fields }
    }

    /// Looks up a field by header, comparing with [`header_key`].
    ///
    /// Returns `None` when no header matches, `Some(None)` when the header
    /// exists but this row has no cell under it.
    #[must_use]
    pub fn field(&self, header: &str) -> Option<Option<&str>> {
        let wanted = header_key(header);
        self.fields
            .iter()
            .find(|(name, _)| header_key(name) == wanted)
            .map(|(_, value)| value.as_deref())
    }

    #[must_use]
    pub fn last_field(&self) -> Option<(&str, Option<&str>)> {
        self.fields
            .last()
            .map(|(name, value)| (name.as_str(), value.as_deref()))
    }
}

/// Normalizes header text for comparison: whitespace runs collapse to one
/// space and letters fold to lowercase.
#[must_use]
pub fn header_key(header: &str) -> String {
    header
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Out,
    In,
}

impl Direction {
    /// Code written into the direction column.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Out => "Ç",
            Self::In => "G",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Out => "OUT",
            Self::In => "IN",
        })
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "out" | "ç" | "c" | "cikis" | "çıkış" => Ok(Self::Out),
            "in" | "g" | "giris" | "giriş" => Ok(Self::In),
            other => Err(format!("invalid direction '{other}', expected out or in")),
        }
    }
}

/// Batch-level metadata shared by every record of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchContext {
    pub direction: Direction,
    pub document_type: Option<u8>,
    pub document_number: Option<String>,
}

impl BatchContext {
    /// Outbound batches carry the declaration code and the caller's document
    /// number verbatim; inbound batches carry neither.
    #[must_use]
    pub fn new(direction: Direction, document_number: impl Into<String>) -> Self {
        match direction {
            Direction::Out => Self {
                direction,
                document_type: Some(DECLARATION_DOCUMENT_TYPE),
                document_number: Some(document_number.into()),
            },
            Direction::In => Self {
                direction,
                document_type: None,
                document_number: None,
            },
        }
    }
}

/// A single output cell value before style policy is applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Empty,
    Integer(i64),
    Text(String),
}

impl FieldValue {
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Integer(value) => value.to_string(),
            Self::Text(value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalRecord {
    pub direction: Direction,
    pub document_type: Option<u8>,
    pub document_number: Option<String>,
    pub plate: String,
    pub trailer1: String,
    pub trailer2: String,
    pub date: String,
    pub time: String,
}

impl CanonicalRecord {
    /// The record's fields in column order.
    #[must_use]
    pub fn fields(&self) -> [FieldValue; CANONICAL_FIELD_COUNT] {
        let text = |value: &str| FieldValue::Text(value.to_string());
        [
            text(self.direction.code()),
            self.document_type
                .map_or(FieldValue::Empty, |code| FieldValue::Integer(i64::from(code))),
            self.document_number
                .as_deref()
                .map_or(FieldValue::Empty, text),
            text(&self.plate),
            text(&self.trailer1),
            text(&self.trailer2),
            text(&self.date),
            text(&self.time),
        ]
    }

    #[must_use]
    pub fn text_fields(&self) -> [String; CANONICAL_FIELD_COUNT] {
        self.fields().map(|field| field.as_text())
    }
}
