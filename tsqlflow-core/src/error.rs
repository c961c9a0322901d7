//! The crate's single error type and the taxonomy it encodes.

use thiserror::Error;

/// Errors surfaced synchronously to callers of [`crate::parse`].
///
/// `dry_run` and `sandbox_run` are infallible at the API boundary — engine
/// failures and cancellation are reported as trace events and summary
/// flags instead (see `RunSummary::had_error`).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Unparseable procedure text, a missing required field, or a
    /// procedure referencing a system database under a live connection.
    #[error("bad input: {0}")]
    BadInput(String),

    /// A per-statement engine failure. Callers of `parse` never see this
    /// variant; it exists so sandbox/live code can build on `?` internally
    /// before downgrading the error to a trace event.
    #[error("engine error {number:?}: {message}")]
    EngineError { number: Option<i32>, message: String },

    /// An invariant violation in the builder or walker. Should be
    /// unreachable; if it fires, something in this crate is wrong.
    #[error("internal error: {0}")]
    Internal(String),

    /// The caller cancelled the run.
    #[error("cancelled")]
    Cancelled,
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        let number = match &err {
            rusqlite::Error::SqliteFailure(e, _) => Some(e.extended_code),
            _ => None,
        };
        CoreError::EngineError {
            number,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
