//! Custom error types for the crate.
//!
//! Each module defines its own typed error enum with `thiserror`; this module
//! consolidates them into a single `Error` for callers that drive the whole
//! reduction pipeline. By using `#[from]`, `Error` can be seamlessly created
//! from the underlying error types, simplifying error handling throughout
//! the crate with the `?` operator.
//!
//! The split mirrors the two failure classes of the pipeline:
//!
//! - **Construction-time fatal errors** (malformed coefficient tables,
//!   invalid polarization strings, invalid calibration wavelengths,
//!   out-of-range raw readings): these indicate a malformed input dataset
//!   and abort the current trial's construction entirely. No
//!   partially-initialized `Trial` or `BeamSplitter` is ever observable.
//! - **Computation-time errors** (`NoAveragePossible`): a replicate group
//!   with no reading surviving the robust-averaging filter. By default this
//!   aborts the enclosing compute call; see
//!   [`crate::experiment::trial::AveragingPolicy`] for the masking
//!   alternative.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Consolidated error type for the reduction pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// An instrument measurement was invalid or could not be averaged.
    #[error("measurement error: {0}")]
    Measurement(#[from] crate::measurement::MeasurementError),

    /// The beam-splitter calibration was malformed.
    #[error("beam splitter error: {0}")]
    BeamSplitter(#[from] crate::experiment::beam_splitter::BeamSplitterError),

    /// A trial folder could not be turned into a typed trial.
    #[error("extraction error: {0}")]
    Extraction(#[from] crate::extraction::ExtractionError),

    /// File or stream I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
