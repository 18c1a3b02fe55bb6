//! Error codes for weft primitives and pipeline execution
//!
//! Every public primitive returns `Result<()>`; `Ok(())` means the stage was
//! queued (or, for scalar outputs, executed). Non-success codes are closed:
//! they identify the failure class, never carry payloads, and are cheap to
//! store as the pipeline-global status.

use thiserror::Error;

/// Failure codes returned by weft primitives
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Vector or matrix sizes disagree; nothing was queued
    #[error("container dimensions do not match")]
    Mismatch,

    /// A descriptor constraint was violated at execution time
    #[error("descriptor constraint violated at execution")]
    Illegal,

    /// Input and output containers alias without the safe_overlap descriptor
    #[error("aliased input and output without the safe_overlap descriptor")]
    Overlap,

    /// An internal invariant was violated
    #[error("internal invariant violated")]
    Panic,

    /// Non-recoverable runtime failure
    #[error("non-recoverable runtime failure")]
    Failed,
}

/// Result type alias using the weft error code
pub type Result<T = ()> = std::result::Result<T, Error>;

/// Keep the first non-success code observed, in the manner of a pipeline
/// collecting per-tile stage results.
pub fn keep_first(current: Result, incoming: Result) -> Result {
    if current.is_err() {
        current
    } else {
        incoming
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::Mismatch.to_string(),
            "container dimensions do not match"
        );
        assert_eq!(
            Error::Illegal.to_string(),
            "descriptor constraint violated at execution"
        );
        assert_eq!(
            Error::Overlap.to_string(),
            "aliased input and output without the safe_overlap descriptor"
        );
        assert_eq!(Error::Panic.to_string(), "internal invariant violated");
        assert_eq!(Error::Failed.to_string(), "non-recoverable runtime failure");
    }

    #[test]
    fn test_keep_first() {
        assert_eq!(keep_first(Ok(()), Ok(())), Ok(()));
        assert_eq!(keep_first(Ok(()), Err(Error::Illegal)), Err(Error::Illegal));
        assert_eq!(
            keep_first(Err(Error::Mismatch), Err(Error::Illegal)),
            Err(Error::Mismatch)
        );
        assert_eq!(keep_first(Err(Error::Failed), Ok(())), Err(Error::Failed));
    }

    #[test]
    fn test_error_is_copy_and_eq() {
        let e = Error::Overlap;
        let f = e;
        assert_eq!(e, f);
    }
}
