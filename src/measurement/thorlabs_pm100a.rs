//! Measurement model for the Thorlabs PM100A console with the S120VC
//! photodiode sensor.
//!
//! Unlike the Newport 835, this combination has a single power range; its
//! quoted fractional uncertainty depends only on the wavelength the console
//! is configured for, per the S120VC calibration certificate. The
//! wavelength, and with it the fractional uncertainty, is fixed once at
//! construction.

use ndarray::Array1;

use super::{MeasurementError, PowerMeasurement};

/// Multiplicative window half-width used by the robust average: readings
/// farther than this factor from the first-pass mean are discarded.
const AVERAGE_MULTIPLIER: f64 = 5.0;

/// Fractional uncertainty of the S120VC sensor for a configured wavelength,
/// from the calibration bands on its data sheet.
fn frac_uncertainty_at(wavelength: f64) -> Result<f64, MeasurementError> {
    match wavelength {
        w if (200.0..=279.0).contains(&w) => Ok(0.07),
        w if w > 279.0 && w <= 439.0 => Ok(0.05),
        w if w > 439.0 && w <= 980.0 => Ok(0.03),
        w if w > 980.0 && w <= 1100.0 => Ok(0.07),
        w => Err(MeasurementError::InvalidWavelength(w)),
    }
}

/// A set of readings taken on a Thorlabs PM100A + S120VC power meter.
#[derive(Debug, Clone)]
pub struct ThorlabsPm100aMeasurement {
    values: Array1<f64>,
    wavelength: f64,
    frac_uncertainty: f64,
}

impl ThorlabsPm100aMeasurement {
    /// Creates a set of readings taken at the configured wavelength
    /// `at_wavelength`, in nanometers. Fails if the wavelength is outside
    /// every calibrated band of the sensor.
    pub fn new(values: Array1<f64>, at_wavelength: f64) -> Result<Self, MeasurementError> {
        let frac_uncertainty = frac_uncertainty_at(at_wavelength)?;
        Ok(Self {
            values,
            wavelength: at_wavelength,
            frac_uncertainty,
        })
    }

    /// The wavelength the console was configured for, in nanometers.
    pub fn wavelength(&self) -> f64 {
        self.wavelength
    }
}

impl PowerMeasurement for ThorlabsPm100aMeasurement {
    fn values(&self) -> &Array1<f64> {
        &self.values
    }

    fn set_values(&mut self, values: Array1<f64>) {
        self.values = values;
    }

    fn abs_uncertainty(&self) -> Result<Array1<f64>, MeasurementError> {
        Ok(&self.values * self.frac_uncertainty)
    }

    /// Windowed average: compute a first-pass mean, keep only readings
    /// within a factor of [`AVERAGE_MULTIPLIER`] above or below it (both
    /// bounds checked against the original first-pass mean, not
    /// recomputed), then average the survivors.
    fn average(&self) -> Result<f64, MeasurementError> {
        if self.values.is_empty() {
            return Err(MeasurementError::NoAveragePossible);
        }
        let first_pass = self.values.sum() / self.values.len() as f64;
        let survivors: Vec<f64> = self
            .values
            .iter()
            .copied()
            .filter(|&v| v < first_pass * AVERAGE_MULTIPLIER)
            .filter(|&v| v > first_pass / AVERAGE_MULTIPLIER)
            .collect();
        if survivors.is_empty() {
            return Err(MeasurementError::NoAveragePossible);
        }
        Ok(survivors.iter().sum::<f64>() / survivors.len() as f64)
    }

    fn with_values(&self, values: Array1<f64>) -> Box<dyn PowerMeasurement> {
        Box::new(Self {
            values,
            wavelength: self.wavelength,
            frac_uncertainty: self.frac_uncertainty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_frac_uncertainty_follows_wavelength_band() {
        let m = ThorlabsPm100aMeasurement::new(array![1e-5], 637.8).unwrap();
        let unc = m.abs_uncertainty().unwrap();
        assert_relative_eq!(unc[0], 3e-7, max_relative = 1e-12);

        let uv = ThorlabsPm100aMeasurement::new(array![1e-5], 250.0).unwrap();
        assert_relative_eq!(uv.abs_uncertainty().unwrap()[0], 7e-7, max_relative = 1e-12);

        let violet = ThorlabsPm100aMeasurement::new(array![1e-5], 400.0).unwrap();
        assert_relative_eq!(
            violet.abs_uncertainty().unwrap()[0],
            5e-7,
            max_relative = 1e-12
        );

        let ir = ThorlabsPm100aMeasurement::new(array![1e-5], 1064.0).unwrap();
        assert_relative_eq!(ir.abs_uncertainty().unwrap()[0], 7e-7, max_relative = 1e-12);
    }

    #[test]
    fn test_wavelength_outside_every_band_fails_at_construction() {
        assert!(matches!(
            ThorlabsPm100aMeasurement::new(array![1e-5], 150.0),
            Err(MeasurementError::InvalidWavelength(_))
        ));
        assert!(matches!(
            ThorlabsPm100aMeasurement::new(array![1e-5], 1200.0),
            Err(MeasurementError::InvalidWavelength(_))
        ));
    }

    #[test]
    fn test_windowed_average_keeps_close_replicates() {
        let m = ThorlabsPm100aMeasurement::new(array![1.0e-5, 1.05e-5], 637.8).unwrap();
        assert_relative_eq!(m.average().unwrap(), 1.025e-5, max_relative = 1e-12);
    }

    #[test]
    fn test_windowed_average_discards_near_zero_glitch() {
        let m = ThorlabsPm100aMeasurement::new(array![1.0e-5, 1.0e-5, 1.0e-9], 637.8).unwrap();
        // First-pass mean ~6.67e-6; the window (1.33e-6, 3.34e-5) drops the
        // glitch reading and averages the two real ones.
        assert_relative_eq!(m.average().unwrap(), 1.0e-5, max_relative = 1e-12);
    }

    #[test]
    fn test_all_readings_outside_window_cannot_be_averaged() {
        // First-pass mean is zero, so the strict window (0/5, 0*5) is empty.
        let m = ThorlabsPm100aMeasurement::new(array![0.0, 0.0], 637.8).unwrap();
        assert!(matches!(
            m.average(),
            Err(MeasurementError::NoAveragePossible)
        ));
    }

    #[test]
    fn test_empty_values_cannot_be_averaged() {
        let m = ThorlabsPm100aMeasurement::new(Array1::zeros(0), 637.8).unwrap();
        assert!(matches!(
            m.average(),
            Err(MeasurementError::NoAveragePossible)
        ));
    }

    #[test]
    fn test_with_values_keeps_the_calibration_wavelength() {
        let template = ThorlabsPm100aMeasurement::new(array![1e-6], 637.8).unwrap();
        let live = template.with_values(array![2e-5]);
        // Same band as the template: 3% of 2e-5.
        assert_relative_eq!(
            live.abs_uncertainty().unwrap()[0],
            6e-7,
            max_relative = 1e-12
        );
    }
}
