use std::fmt::{Display, Formatter};
use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to load PDF document {document}: {source}")]
    PdfLoad {
        document: usize,
        #[source]
        source: lopdf::Error,
    },

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("no pages of document {0} remain after applying the page selection")]
    NoPagesSelected(usize),

    #[error("table on page {page} of document {document} is too ambiguous (confidence={confidence:.2})")]
    AmbiguousTable {
        document: usize,
        page: u32,
        confidence: f32,
    },

    #[error("no table could be read from the supplied PDF documents")]
    ExtractionEmpty,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("row {row} (document {document}, page {page}) has no '{field}' field")]
    MissingField {
        row: usize,
        document: usize,
        page: u32,
        field: String,
    },
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template is not a compound document: {0}")]
    Container(String),

    #[error("template has no Workbook stream")]
    MissingWorkbook,

    #[error("unsupported workbook version 0x{0:04X}, expected BIFF8")]
    UnsupportedVersion(u16),

    #[error("malformed workbook record at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    #[error("template workbook is password protected")]
    Encrypted,

    #[error("template has no sheet at index {0}")]
    MissingSheet(usize),

    #[error("row {0} is beyond the last addressable sheet row")]
    RowOverflow(usize),

    #[error("column {0} is beyond the last addressable sheet column")]
    ColumnOverflow(usize),

    #[error("text of {0} characters exceeds the 255 character cell limit")]
    TextTooLong(usize),

    #[error("template already holds the maximum number of cell formats")]
    FormatTableFull,

    #[error("record of {0} bytes does not fit in a single workbook record")]
    RecordTooLarge(usize),
}

impl TemplateError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            offset,
            reason: reason.into(),
        }
    }

    /// Whether the failure happened while reading the template rather than
    /// while writing the transcribed workbook back out.
    #[must_use]
    pub fn is_unreadable(&self) -> bool {
        matches!(
            self,
            Self::Container(_)
                | Self::MissingWorkbook
                | Self::UnsupportedVersion(_)
                | Self::Malformed { .. }
                | Self::Encrypted
                | Self::MissingSheet(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ExtractionEmpty,
    MissingField,
    TemplateUnreadable,
    SerializationFailure,
    InvalidInput,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ExtractionEmpty => "extraction_empty",
            Self::MissingField => "missing_field",
            Self::TemplateUnreadable => "template_unreadable",
            Self::SerializationFailure => "serialization_failure",
            Self::InvalidInput => "invalid_input",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl PipelineError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Extract(ExtractError::ExtractionEmpty) => ErrorKind::ExtractionEmpty,
            Self::Extract(_) => ErrorKind::InvalidInput,
            Self::Normalize(NormalizeError::MissingField { .. }) => ErrorKind::MissingField,
            Self::Template(error) if error.is_unreadable() => ErrorKind::TemplateUnreadable,
            Self::Template(_) => ErrorKind::SerializationFailure,
        }
    }

    /// Only an empty extraction is a warning the caller can recover from by
    /// supplying different documents.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::ExtractionEmpty
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, ExtractError, NormalizeError, PipelineError, TemplateError};

    #[test]
    fn classifies_stage_errors() {
        let empty = PipelineError::from(ExtractError::ExtractionEmpty);
        assert_eq!(empty.kind(), ErrorKind::ExtractionEmpty);
        assert!(empty.is_recoverable());

        let missing = PipelineError::from(NormalizeError::MissingField {
            row: 4,
            document: 1,
            page: 2,
            field: "Araç Plaka".to_string(),
        });
        assert_eq!(missing.kind(), ErrorKind::MissingField);
        assert!(missing.to_string().contains("row 4"));

        let unreadable = PipelineError::from(TemplateError::MissingWorkbook);
        assert_eq!(unreadable.kind(), ErrorKind::TemplateUnreadable);
        assert!(!unreadable.is_recoverable());

        let overflow = PipelineError::from(TemplateError::RowOverflow(70_000));
        assert_eq!(overflow.kind(), ErrorKind::SerializationFailure);
        assert_eq!(overflow.kind().code(), "serialization_failure");
    }
}
