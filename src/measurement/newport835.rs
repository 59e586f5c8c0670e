//! Measurement model for the Newport Model 835 optical power meter.
//!
//! The 835 is a wide-dynamic-range meter: its display spans six decade
//! ranges from 2 nW full scale up to 200 mW full scale, and the quoted
//! accuracy is the sum of a full-scale term and a reading term, both
//! fractional and both depending on which range a reading lands in.

use ndarray::Array1;

use super::{MeasurementError, PowerMeasurement};

/// The six display ranges of the Newport Model 835, from the instrument's
/// accuracy specification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Range835 {
    TwoNanowatts,
    TwentyNanowatts,
    TwoHundredNanowatts,
    TwoMilliwatts,
    TwentyMilliwatts,
    TwoHundredMilliwatts,
}

impl Range835 {
    /// Finds the range a reading would be displayed on. Readings below zero
    /// or above 200 mW fit no range and are invalid.
    fn classify(value: f64) -> Result<Self, MeasurementError> {
        match value {
            v if (0.0..=2e-9).contains(&v) => Ok(Range835::TwoNanowatts),
            v if v > 2e-9 && v <= 20e-9 => Ok(Range835::TwentyNanowatts),
            v if v > 20e-9 && v <= 200e-9 => Ok(Range835::TwoHundredNanowatts),
            v if v > 200e-9 && v <= 2e-3 => Ok(Range835::TwoMilliwatts),
            v if v > 2e-3 && v <= 20e-3 => Ok(Range835::TwentyMilliwatts),
            v if v > 20e-3 && v <= 200e-3 => Ok(Range835::TwoHundredMilliwatts),
            v => Err(MeasurementError::InvalidMeasurement(v)),
        }
    }

    /// Full-scale fractional uncertainty for this range.
    fn fullscale_frac_uncertainty(self) -> f64 {
        match self {
            Range835::TwoNanowatts => 0.002,
            Range835::TwentyNanowatts
            | Range835::TwoHundredNanowatts
            | Range835::TwoMilliwatts
            | Range835::TwentyMilliwatts
            | Range835::TwoHundredMilliwatts => 0.0005,
        }
    }

    /// Reading fractional uncertainty for this range.
    fn reading_frac_uncertainty(self) -> f64 {
        match self {
            Range835::TwoNanowatts | Range835::TwentyNanowatts => 0.004,
            Range835::TwoHundredNanowatts => 0.002,
            Range835::TwoMilliwatts => 0.0015,
            Range835::TwentyMilliwatts | Range835::TwoHundredMilliwatts => 0.001,
        }
    }
}

/// Log-decade histogram bin index used by the robust average. Bin edges run
/// from 1e-10 to 1e10; the index counts edges at or below the value,
/// so readings below 1e-10 land in bin 0 and readings above 1e10 in the
/// last bin.
fn decade_bin(value: f64) -> usize {
    (-10..=10)
        .map(|exponent| 10f64.powi(exponent))
        .filter(|edge| *edge <= value)
        .count()
}

/// A set of readings taken on a Newport Model 835 power meter.
#[derive(Debug, Clone)]
pub struct Newport835Measurement {
    values: Array1<f64>,
}

impl Newport835Measurement {
    /// Creates a set of Newport Model 835 readings, in watts.
    pub fn new(values: Array1<f64>) -> Self {
        Self { values }
    }
}

impl PowerMeasurement for Newport835Measurement {
    fn values(&self) -> &Array1<f64> {
        &self.values
    }

    fn set_values(&mut self, values: Array1<f64>) {
        self.values = values;
    }

    /// Per-reading absolute uncertainty: `v * (fullscale + reading)` with
    /// both fractions looked up from the range the reading lands in. A
    /// reading outside every range is fatal.
    fn abs_uncertainty(&self) -> Result<Array1<f64>, MeasurementError> {
        let mut uncertainties = Array1::zeros(self.values.len());
        for (slot, &value) in uncertainties.iter_mut().zip(self.values.iter()) {
            let range = Range835::classify(value)?;
            *slot = value
                * (range.fullscale_frac_uncertainty() + range.reading_frac_uncertainty());
        }
        Ok(uncertainties)
    }

    /// Mode-bin average: histogram the readings into log-decade bins, then
    /// average only the readings in the most populated bin. This meter's
    /// rare outliers are multiple orders of magnitude off, so the winning
    /// decade isolates the real signal without a hard threshold. Ties go to
    /// the lowest bin.
    fn average(&self) -> Result<f64, MeasurementError> {
        if self.values.is_empty() {
            return Err(MeasurementError::NoAveragePossible);
        }
        let bins: Vec<usize> = self.values.iter().map(|&v| decade_bin(v)).collect();
        let mut counts = std::collections::BTreeMap::new();
        for &bin in &bins {
            *counts.entry(bin).or_insert(0usize) += 1;
        }
        let mut winning_bin = 0usize;
        let mut winning_count = 0usize;
        for (&bin, &count) in &counts {
            if count > winning_count {
                winning_bin = bin;
                winning_count = count;
            }
        }
        let survivors: Vec<f64> = self
            .values
            .iter()
            .zip(&bins)
            .filter(|(_, &bin)| bin == winning_bin)
            .map(|(&v, _)| v)
            .collect();
        if survivors.is_empty() {
            return Err(MeasurementError::NoAveragePossible);
        }
        Ok(survivors.iter().sum::<f64>() / survivors.len() as f64)
    }

    fn with_values(&self, values: Array1<f64>) -> Box<dyn PowerMeasurement> {
        Box::new(Self::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_uncertainty_fraction_constant_within_a_range() {
        // Both readings sit in the 2 mW range: 0.0005 + 0.0015.
        let m = Newport835Measurement::new(array![1e-3, 1.5e-3]);
        let unc = m.abs_uncertainty().unwrap();
        assert_relative_eq!(unc[0] / 1e-3, 0.002, max_relative = 1e-12);
        assert_relative_eq!(unc[1] / 1.5e-3, 0.002, max_relative = 1e-12);
    }

    #[test]
    fn test_uncertainty_discontinuous_across_range_boundary() {
        let m = Newport835Measurement::new(array![2e-9, 2.1e-9]);
        let unc = m.abs_uncertainty().unwrap();
        // 2 nW range: 0.002 + 0.004; 20 nW range: 0.0005 + 0.004.
        assert_relative_eq!(unc[0] / 2e-9, 0.006, max_relative = 1e-12);
        assert_relative_eq!(unc[1] / 2.1e-9, 0.0045, max_relative = 1e-12);
    }

    #[test]
    fn test_uncertainty_continuous_upward_from_zero() {
        let m = Newport835Measurement::new(array![0.0]);
        let unc = m.abs_uncertainty().unwrap();
        assert_eq!(unc[0], 0.0);
    }

    #[test]
    fn test_negative_reading_is_invalid() {
        let m = Newport835Measurement::new(array![-1e-9]);
        assert!(matches!(
            m.abs_uncertainty(),
            Err(MeasurementError::InvalidMeasurement(_))
        ));
    }

    #[test]
    fn test_reading_above_full_scale_is_invalid() {
        let m = Newport835Measurement::new(array![0.201]);
        assert!(matches!(
            m.abs_uncertainty(),
            Err(MeasurementError::InvalidMeasurement(_))
        ));
        // 0.200 W exactly is still on the top range.
        let top = Newport835Measurement::new(array![0.200]);
        assert!(top.abs_uncertainty().is_ok());
    }

    #[test]
    fn test_mode_bin_average_discards_decade_outlier() {
        let m = Newport835Measurement::new(array![1.0e-6, 1.1e-6, 1.0e-2]);
        // Two readings in the microwatt decade outvote the lone 10 mW spike.
        assert_relative_eq!(m.average().unwrap(), 1.05e-6, max_relative = 1e-12);
    }

    #[test]
    fn test_mode_bin_average_tie_goes_to_lowest_bin() {
        let m = Newport835Measurement::new(array![1.0e-6, 1.0e-2]);
        assert_relative_eq!(m.average().unwrap(), 1.0e-6, max_relative = 1e-12);
    }

    #[test]
    fn test_empty_values_cannot_be_averaged() {
        let m = Newport835Measurement::new(Array1::zeros(0));
        assert!(matches!(
            m.average(),
            Err(MeasurementError::NoAveragePossible)
        ));
    }

    #[test]
    fn test_with_values_does_not_alias_the_template() {
        let template = Newport835Measurement::new(array![3e-6]);
        let mut live = template.with_values(array![1e-6, 2e-6]);
        live.set_values(array![5e-6]);
        assert_eq!(template.values(), &array![3e-6]);
    }
}
