use std::path::PathBuf;
use thiserror::Error;

/// Errors that callers may need to tell apart.
///
/// Most fallible operations in this crate return [`anyhow::Result`]; the
/// conditions below are the ones with a defined, matchable identity. They
/// travel inside the [`anyhow::Error`] and can be recovered with
/// [`anyhow::Error::downcast_ref`].
///
/// A [`GtframeError::Parsing`] is fatal for the whole parse: a line that does
/// not split into 9 tab-separated fields means the input is not GTF at all,
/// not that a single row is bad, so there is no row-skipping recovery.
#[derive(Debug, Error)]
pub enum GtframeError {
    /// A non-comment, non-blank line did not have exactly 9 tab-separated
    /// fields.
    #[error("wrong number of fields {n_fields} (expected 9) at line {line_number}")]
    Parsing { n_fields: usize, line_number: usize },

    /// A fixed field that must be numeric could not be converted.
    #[error("invalid {field} value {value:?} at line {line_number}")]
    InvalidField {
        field: &'static str,
        value: String,
        line_number: usize,
    },

    /// The input path does not exist. Raised before any read is attempted.
    #[error("GTF file does not exist: {}", path.display())]
    FileNotFound { path: PathBuf },
}
