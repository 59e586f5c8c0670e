//! Power measurement abstractions for the optical power meters used in the
//! experiment.
//!
//! # Units
//!
//! All readings are raw instrument values in **watts (W)**, not yet
//! background-subtracted. Wavelengths are in nanometers.
//!
//! # Uncertainty
//!
//! Every implementation reports a **one-sided** absolute uncertainty per
//! reading: the amount by which the true power may exceed the displayed
//! value. Uncertainties are never negative and always have the same length
//! as the value array.
//!
//! # Robust averaging
//!
//! Replicate readings from these meters occasionally contain wild outliers
//! (a reading taken mid-autorange, or with the beam momentarily blocked).
//! Each implementation carries the outlier-rejection strategy appropriate to
//! its instrument; see [`Newport835Measurement`] and
//! [`ThorlabsPm100aMeasurement`]. When no reading survives the filter,
//! [`PowerMeasurement::average`] fails with
//! [`MeasurementError::NoAveragePossible`].

pub mod newport835;
pub mod thorlabs_pm100a;

pub use newport835::Newport835Measurement;
pub use thorlabs_pm100a::ThorlabsPm100aMeasurement;

use ndarray::Array1;
use thiserror::Error;

/// Errors produced by the power-measurement implementations.
#[derive(Debug, Error)]
pub enum MeasurementError {
    /// A reading fell outside every range of the power meter. This indicates
    /// a malformed dataset and is fatal, never retried.
    #[error("reading of {0} W is outside every range of the power meter")]
    InvalidMeasurement(f64),

    /// The configured measurement wavelength is outside the calibrated bands
    /// of the sensor. Fatal at construction.
    #[error("wavelength of {0} nm is outside the calibrated bands of the sensor")]
    InvalidWavelength(f64),

    /// No reading survived the robust-averaging filter.
    #[error("no reading survived the robust-averaging filter")]
    NoAveragePossible,
}

/// Capability trait for a set of power readings taken on one instrument.
///
/// Implementations pair a value array with the calibration state needed to
/// judge its uncertainty (measurement ranges, configured wavelength). The
/// trait is object-safe: the trial pipeline stores its two sensor
/// backgrounds as `Box<dyn PowerMeasurement>` and derives live measurements
/// from them without ever inspecting the concrete type.
pub trait PowerMeasurement {
    /// The contained readings, in watts.
    fn values(&self) -> &Array1<f64>;

    /// Replaces the entire value array.
    fn set_values(&mut self, values: Array1<f64>);

    /// Computes the one-sided absolute uncertainty of each contained
    /// reading. The result has the same length as [`values`](Self::values)
    /// and is never negative.
    fn abs_uncertainty(&self) -> Result<Array1<f64>, MeasurementError>;

    /// Computes a robust point estimate of the contained readings.
    fn average(&self) -> Result<f64, MeasurementError>;

    /// Builds a fresh measurement of the same instrument and calibration
    /// state holding `values`.
    ///
    /// This is how a background template becomes a live-data measurement:
    /// the derived instance never aliases the template's array, so the
    /// template stays stable across the many averaging calls within one
    /// trial.
    fn with_values(&self, values: Array1<f64>) -> Box<dyn PowerMeasurement>;
}
