use chrono::{DateTime, TimeZone};
use tracing::debug;

use crate::error::TemplateError;
use crate::xls::Template;

/// Media type of the packaged workbook.
pub const XLS_MIME_TYPE: &str = "application/vnd.ms-excel";

/// Serializes a transcribed workbook. Equal templates give equal bytes.
///
/// # Errors
/// [`TemplateError`] when a record or stream offset no longer fits the file
/// format.
pub fn package(template: &Template) -> Result<Vec<u8>, TemplateError> {
    let bytes = template.to_bytes()?;
    debug!(bytes = bytes.len(), "workbook packaged");
    Ok(bytes)
}

/// Download name for a workbook produced at `at`.
#[must_use]
pub fn output_file_name<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("Sami-{}.xls", at.format("%Y-%m-%d-%H-%M-%S"))
}
