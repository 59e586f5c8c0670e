//! The beam-splitter slide model.
//!
//! A glass slide splits the laser beam ahead of the grating: one sensor
//! watches the reflected arm, the other the transmitted arm. Given the
//! slide's calibrated reflectivity/transmittivity per polarization and per
//! sensor, the model converts a pair of raw (transmitted, reflected)
//! measurements into incident power, coupling efficiency, and the one-sided
//! propagated uncertainty of each.
//!
//! Error propagation here is numerical rather than closed-form: each input
//! is perturbed upward by its own absolute uncertainty, the output is
//! recomputed with one perturbation at a time, and the two output shifts
//! are combined in quadrature. The one-sidedness matches the one-sided
//! uncertainty model of the power meters.

use std::collections::BTreeMap;

use ndarray::Array1;
use thiserror::Error;

use crate::experiment::definitions::{PolarizationState, PowerMeterLabel};
use crate::measurement::{MeasurementError, PowerMeasurement};

/// The four calibration columns every sensor row must provide.
pub const COEFFICIENT_COLUMNS: [&str; 4] = ["RV", "RH", "TV", "TH"];

/// Errors produced when building a [`BeamSplitter`].
#[derive(Debug, Error)]
pub enum BeamSplitterError {
    /// The coefficient table is missing a required sensor row or
    /// coefficient column. Raised at construction; a beam splitter is never
    /// observable in a partially-built state.
    #[error("invalid optical coefficients: {0}")]
    InvalidOpticalCoefficientsFormat(String),
}

/// Calibration coefficients indexed by sensor label and column name.
///
/// Rows are keyed by the sensor label as written in the parameter file
/// ("A", "B"); columns by coefficient name ("RH", "TH", "RV", "TV").
#[derive(Debug, Clone, Default)]
pub struct CoefficientTable {
    rows: BTreeMap<String, BTreeMap<String, f64>>,
}

impl CoefficientTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one calibration value.
    pub fn insert(&mut self, label: &str, column: &str, value: f64) {
        self.rows
            .entry(label.to_string())
            .or_default()
            .insert(column.to_string(), value);
    }

    /// Looks up one calibration value.
    pub fn get(&self, label: &str, column: &str) -> Option<f64> {
        self.rows.get(label)?.get(column).copied()
    }

    /// Whether a sensor row exists.
    pub fn has_row(&self, label: &str) -> bool {
        self.rows.contains_key(label)
    }

    /// Whether every row carries the named column.
    pub fn has_column(&self, column: &str) -> bool {
        !self.rows.is_empty() && self.rows.values().all(|row| row.contains_key(column))
    }
}

/// A beam splitter with calibrated reflectivity and transmittivity
/// coefficients, and the assignment of physical sensors to the two optical
/// roles.
#[derive(Debug, Clone)]
pub struct BeamSplitter {
    optical_coefficients: CoefficientTable,
    transmitted_power_meter_label: PowerMeterLabel,
    reflected_power_meter_label: PowerMeterLabel,
}

impl BeamSplitter {
    /// Creates a beam splitter, validating the coefficient table up front:
    /// both sensor roles must have a row, and every row must carry all four
    /// coefficient columns.
    pub fn new(
        optical_coefficients: CoefficientTable,
        transmitted_power_meter_label: PowerMeterLabel,
        reflected_power_meter_label: PowerMeterLabel,
    ) -> Result<Self, BeamSplitterError> {
        for label in [transmitted_power_meter_label, reflected_power_meter_label] {
            if !optical_coefficients.has_row(label.as_str()) {
                return Err(BeamSplitterError::InvalidOpticalCoefficientsFormat(
                    format!("no row specifying {label} found in optical coefficients"),
                ));
            }
        }
        for column in COEFFICIENT_COLUMNS {
            if !optical_coefficients.has_column(column) {
                return Err(BeamSplitterError::InvalidOpticalCoefficientsFormat(
                    format!(
                        "required column '{column}' specifying an optical coefficient \
                         not found in optical coefficients"
                    ),
                ));
            }
        }
        Ok(Self {
            optical_coefficients,
            transmitted_power_meter_label,
            reflected_power_meter_label,
        })
    }

    /// The calibration table the splitter was built from.
    pub fn optical_coefficients(&self) -> &CoefficientTable {
        &self.optical_coefficients
    }

    /// Reflectivity of the slide toward the reflected-role sensor at the
    /// given polarization. Present by construction-time validation.
    fn reflectivity(&self, polarization: PolarizationState) -> f64 {
        let column = format!("R{}", polarization.letter());
        self.optical_coefficients
            .get(self.reflected_power_meter_label.as_str(), &column)
            .unwrap_or(f64::NAN)
    }

    /// Computes the incident power from the reflected-arm measurement:
    /// `(R - R_bg) / reflectivity`.
    ///
    /// Backgrounds are single-element measurements broadcast across the
    /// readings. Near-zero reflectivities or readings produce IEEE
    /// NaN/Inf, which propagate into the result; filtering them is a
    /// presentation-layer concern.
    pub fn compute_incident_power(
        &self,
        polarization: PolarizationState,
        _transmitted: &dyn PowerMeasurement,
        reflected: &dyn PowerMeasurement,
        _transmitted_bg: &dyn PowerMeasurement,
        reflected_bg: &dyn PowerMeasurement,
    ) -> Array1<f64> {
        let reflectivity = self.reflectivity(polarization);
        (reflected.values() - reflected_bg.values()) / reflectivity
    }

    /// One-sided uncertainty of the incident power, by finite-difference
    /// propagation of both sensors' uncertainties combined in quadrature.
    pub fn compute_incident_power_error(
        &self,
        polarization: PolarizationState,
        transmitted: &dyn PowerMeasurement,
        reflected: &dyn PowerMeasurement,
        transmitted_bg: &dyn PowerMeasurement,
        reflected_bg: &dyn PowerMeasurement,
    ) -> Result<Array1<f64>, MeasurementError> {
        let base = self.compute_incident_power(
            polarization,
            transmitted,
            reflected,
            transmitted_bg,
            reflected_bg,
        );
        let transmitted_up = transmitted
            .with_values(transmitted.values() + &transmitted.abs_uncertainty()?);
        let reflected_up =
            reflected.with_values(reflected.values() + &reflected.abs_uncertainty()?);
        let from_transmitted = self.compute_incident_power(
            polarization,
            transmitted_up.as_ref(),
            reflected,
            transmitted_bg,
            reflected_bg,
        ) - &base;
        let from_reflected = self.compute_incident_power(
            polarization,
            transmitted,
            reflected_up.as_ref(),
            transmitted_bg,
            reflected_bg,
        ) - &base;
        Ok(quadrature(&from_transmitted, &from_reflected))
    }

    /// Computes the coupling efficiency:
    /// `(T - T_bg) / ((R - R_bg) / reflectivity)`.
    ///
    /// The denominator is the incident power inferred from the reflected
    /// arm. Near-zero denominators (low reflected signal) produce IEEE
    /// NaN/Inf, propagated downstream untouched.
    pub fn compute_efficiency(
        &self,
        polarization: PolarizationState,
        transmitted: &dyn PowerMeasurement,
        reflected: &dyn PowerMeasurement,
        transmitted_bg: &dyn PowerMeasurement,
        reflected_bg: &dyn PowerMeasurement,
    ) -> Array1<f64> {
        let incident = self.compute_incident_power(
            polarization,
            transmitted,
            reflected,
            transmitted_bg,
            reflected_bg,
        );
        (transmitted.values() - transmitted_bg.values()) / incident
    }

    /// One-sided uncertainty of the efficiency, by the same
    /// finite-difference quadrature scheme as
    /// [`compute_incident_power_error`](Self::compute_incident_power_error).
    pub fn compute_efficiency_error(
        &self,
        polarization: PolarizationState,
        transmitted: &dyn PowerMeasurement,
        reflected: &dyn PowerMeasurement,
        transmitted_bg: &dyn PowerMeasurement,
        reflected_bg: &dyn PowerMeasurement,
    ) -> Result<Array1<f64>, MeasurementError> {
        let base = self.compute_efficiency(
            polarization,
            transmitted,
            reflected,
            transmitted_bg,
            reflected_bg,
        );
        let transmitted_up = transmitted
            .with_values(transmitted.values() + &transmitted.abs_uncertainty()?);
        let reflected_up =
            reflected.with_values(reflected.values() + &reflected.abs_uncertainty()?);
        let from_transmitted = self.compute_efficiency(
            polarization,
            transmitted_up.as_ref(),
            reflected,
            transmitted_bg,
            reflected_bg,
        ) - &base;
        let from_reflected = self.compute_efficiency(
            polarization,
            transmitted,
            reflected_up.as_ref(),
            transmitted_bg,
            reflected_bg,
        ) - &base;
        Ok(quadrature(&from_transmitted, &from_reflected))
    }
}

/// Element-wise quadrature sum of two partial error contributions.
fn quadrature(a: &Array1<f64>, b: &Array1<f64>) -> Array1<f64> {
    (a.mapv(|x| x * x) + b.mapv(|x| x * x)).mapv(f64::sqrt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{Newport835Measurement, ThorlabsPm100aMeasurement};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn full_table() -> CoefficientTable {
        let mut table = CoefficientTable::new();
        for (label, rh, th, rv, tv) in [
            ("A", 0.05770, 0.90088, 0.09828, 0.88649),
            ("B", 0.05776, 0.90472, 0.09954, 0.87219),
        ] {
            table.insert(label, "RH", rh);
            table.insert(label, "TH", th);
            table.insert(label, "RV", rv);
            table.insert(label, "TV", tv);
        }
        table
    }

    fn splitter() -> BeamSplitter {
        BeamSplitter::new(full_table(), PowerMeterLabel::B, PowerMeterLabel::A).unwrap()
    }

    fn thorlabs(values: ndarray::Array1<f64>) -> Box<dyn PowerMeasurement> {
        Box::new(ThorlabsPm100aMeasurement::new(values, 637.8).unwrap())
    }

    fn newport(values: ndarray::Array1<f64>) -> Box<dyn PowerMeasurement> {
        Box::new(Newport835Measurement::new(values))
    }

    #[test]
    fn test_missing_coefficient_column_is_rejected() {
        let mut table = CoefficientTable::new();
        for label in ["A", "B"] {
            table.insert(label, "RH", 0.058);
            table.insert(label, "RV", 0.098);
            table.insert(label, "TV", 0.886);
            // "TH" deliberately absent.
        }
        let result = BeamSplitter::new(table, PowerMeterLabel::B, PowerMeterLabel::A);
        assert!(matches!(
            result,
            Err(BeamSplitterError::InvalidOpticalCoefficientsFormat(_))
        ));
    }

    #[test]
    fn test_missing_sensor_row_is_rejected() {
        let mut table = CoefficientTable::new();
        table.insert("A", "RH", 0.058);
        table.insert("A", "TH", 0.901);
        table.insert("A", "RV", 0.098);
        table.insert("A", "TV", 0.886);
        let result = BeamSplitter::new(table, PowerMeterLabel::B, PowerMeterLabel::A);
        assert!(matches!(
            result,
            Err(BeamSplitterError::InvalidOpticalCoefficientsFormat(_))
        ));
    }

    #[test]
    fn test_incident_power_uses_reflected_arm_and_polarization_column() {
        let mut table = CoefficientTable::new();
        for label in ["A", "B"] {
            table.insert(label, "RH", 0.058);
            table.insert(label, "TH", 0.901);
            table.insert(label, "RV", 0.098);
            table.insert(label, "TV", 0.886);
        }
        let bs = BeamSplitter::new(table, PowerMeterLabel::B, PowerMeterLabel::A).unwrap();
        let transmitted = newport(array![2.05e-6]);
        let reflected = thorlabs(array![1.025e-5]);
        let t_bg = newport(array![0.0]);
        let r_bg = thorlabs(array![0.0]);
        let incident = bs.compute_incident_power(
            PolarizationState::Horizontal,
            transmitted.as_ref(),
            reflected.as_ref(),
            t_bg.as_ref(),
            r_bg.as_ref(),
        );
        assert_relative_eq!(incident[0], 1.025e-5 / 0.058, max_relative = 1e-9);

        let incident_v = bs.compute_incident_power(
            PolarizationState::Vertical,
            transmitted.as_ref(),
            reflected.as_ref(),
            t_bg.as_ref(),
            r_bg.as_ref(),
        );
        assert_relative_eq!(incident_v[0], 1.025e-5 / 0.098, max_relative = 1e-9);
    }

    #[test]
    fn test_efficiency_subtracts_backgrounds() {
        let bs = splitter();
        let transmitted = newport(array![2.1e-6]);
        let reflected = thorlabs(array![1.05e-5]);
        let t_bg = newport(array![1e-7]);
        let r_bg = thorlabs(array![2.5e-7]);
        let efficiency = bs.compute_efficiency(
            PolarizationState::Horizontal,
            transmitted.as_ref(),
            reflected.as_ref(),
            t_bg.as_ref(),
            r_bg.as_ref(),
        );
        let expected = (2.1e-6 - 1e-7) / ((1.05e-5 - 2.5e-7) / 0.05770);
        assert_relative_eq!(efficiency[0], expected, max_relative = 1e-9);
    }

    #[test]
    fn test_incident_power_error_is_insensitive_to_transmitted_arm() {
        // Incident power depends only on the reflected arm, so its error
        // must equal the pure reflected contribution.
        let bs = splitter();
        let transmitted = newport(array![2.05e-6]);
        let reflected = thorlabs(array![1.025e-5]);
        let t_bg = newport(array![0.0]);
        let r_bg = thorlabs(array![0.0]);
        let err = bs
            .compute_incident_power_error(
                PolarizationState::Horizontal,
                transmitted.as_ref(),
                reflected.as_ref(),
                t_bg.as_ref(),
                r_bg.as_ref(),
            )
            .unwrap();
        // Perturbing reflected by 3% shifts incident power by 3%.
        let expected = (1.025e-5 * 0.03) / 0.05770;
        assert_relative_eq!(err[0], expected, max_relative = 1e-9);
    }

    #[test]
    fn test_efficiency_error_combines_both_arms_in_quadrature() {
        let bs = splitter();
        let transmitted = newport(array![2.05e-6]);
        let reflected = thorlabs(array![1.025e-5]);
        let t_bg = newport(array![0.0]);
        let r_bg = thorlabs(array![0.0]);
        let base = bs.compute_efficiency(
            PolarizationState::Horizontal,
            transmitted.as_ref(),
            reflected.as_ref(),
            t_bg.as_ref(),
            r_bg.as_ref(),
        )[0];
        // Transmitted perturbation: scales the numerator.
        let t_unc = transmitted.abs_uncertainty().unwrap()[0];
        let d_t = (2.05e-6 + t_unc) / (1.025e-5 / 0.05770) - base;
        // Reflected perturbation: scales the denominator.
        let d_r = 2.05e-6 / ((1.025e-5 * 1.03) / 0.05770) - base;
        let expected = (d_t * d_t + d_r * d_r).sqrt();
        let err = bs
            .compute_efficiency_error(
                PolarizationState::Horizontal,
                transmitted.as_ref(),
                reflected.as_ref(),
                t_bg.as_ref(),
                r_bg.as_ref(),
            )
            .unwrap();
        assert_relative_eq!(err[0], expected, max_relative = 1e-9);
    }

    #[test]
    fn test_zero_reflected_signal_propagates_non_finite_values() {
        let bs = splitter();
        let transmitted = newport(array![2.05e-6]);
        let reflected = thorlabs(array![0.0]);
        let t_bg = newport(array![0.0]);
        let r_bg = thorlabs(array![0.0]);
        let efficiency = bs.compute_efficiency(
            PolarizationState::Horizontal,
            transmitted.as_ref(),
            reflected.as_ref(),
            t_bg.as_ref(),
            r_bg.as_ref(),
        );
        assert!(!efficiency[0].is_finite());
    }
}
