//! The per-trial aggregation pipeline from raw readings to
//! efficiency-vs-angle curves.
//!
//! A trial owns the full raw data matrix for one experimental run plus the
//! calibration needed to reduce it: the beam splitter, the polarization,
//! and one background measurement per sensor. The pipeline stages are pure
//! transforms over that state:
//!
//! 1. group raw rows by incident angle, then by mirror angle;
//! 2. robustly average each replicate group per sensor;
//! 3. convert averaged (transmitted, reflected) pairs through the beam
//!    splitter into incident power / efficiency (and their one-sided
//!    errors);
//! 4. fold the per-mirror-angle efficiencies into a single
//!    total-efficiency value per incident angle.
//!
//! Angle grouping matches rows by **exact floating-point equality**: the
//! acquisition software writes each commanded angle with an identical
//! representation on every replicate row, and legacy datasets depend on
//! that. Switching to tolerance-based matching would change which
//! replicates merge, so it is deliberately not done here.

use std::collections::BTreeMap;

use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ordered_float::OrderedFloat;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::experiment::beam_splitter::BeamSplitter;
use crate::experiment::definitions::PolarizationState;
use crate::measurement::{MeasurementError, PowerMeasurement};

/// Angle-keyed curve tables: incident angle → one row per mirror angle.
///
/// Keys are the numeric incident angles (not stringified), so iteration
/// order is deterministic and ascending.
pub type AngleCurves = BTreeMap<OrderedFloat<f64>, Array2<f64>>;

/// What to do when a replicate group has no reading surviving its robust
/// average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AveragingPolicy {
    /// Let the failure abort the enclosing compute call.
    #[default]
    Propagate,
    /// Mask the failed group and substitute the mean of the other
    /// successfully-averaged groups for the same sensor, applied after the
    /// fact. If every group fails, the failure still propagates.
    MaskFailures,
}

/// Column positions of the physical quantities in the raw data matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ColumnLayout {
    /// Column holding the reflected-arm power readings.
    pub reflected_power: usize,
    /// Column holding the transmitted-arm power readings.
    pub transmitted_power: usize,
    /// Column holding the incident angle. The acquisition software writes
    /// the legacy "grating angle", which is the negative of the incident
    /// angle.
    pub incident_angle: usize,
    /// Column holding the mirror angle.
    pub mirror_angle: usize,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            reflected_power: 1,
            transmitted_power: 2,
            incident_angle: 3,
            mirror_angle: 4,
        }
    }
}

/// One experimental run, ready for reduction.
pub struct Trial {
    trial_label: String,
    data: Array2<f64>,
    beam_splitter: BeamSplitter,
    polarization: PolarizationState,
    transmitted_background: Box<dyn PowerMeasurement>,
    reflected_background: Box<dyn PowerMeasurement>,
    columns: ColumnLayout,
    averaging_policy: AveragingPolicy,
}

impl Trial {
    /// Creates a trial over the full raw dataset of one run.
    ///
    /// `data` is the headerless numeric matrix, one row per physical
    /// reading; `columns` names which column holds which quantity. The
    /// backgrounds are single-element measurements of each sensor with no
    /// input light; their instrument type determines how replicate readings
    /// from that sensor are averaged and how their uncertainty is judged.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trial_label: impl Into<String>,
        data: Array2<f64>,
        beam_splitter: BeamSplitter,
        polarization: PolarizationState,
        transmitted_background: Box<dyn PowerMeasurement>,
        reflected_background: Box<dyn PowerMeasurement>,
        columns: ColumnLayout,
    ) -> Self {
        Self {
            trial_label: trial_label.into(),
            data,
            beam_splitter,
            polarization,
            transmitted_background,
            reflected_background,
            columns,
            averaging_policy: AveragingPolicy::default(),
        }
    }

    /// Sets the replicate-averaging failure policy.
    pub fn with_averaging_policy(mut self, policy: AveragingPolicy) -> Self {
        self.averaging_policy = policy;
        self
    }

    /// The display label of the trial.
    pub fn trial_label(&self) -> &str {
        &self.trial_label
    }

    /// The polarization the trial was run at.
    pub fn polarization(&self) -> PolarizationState {
        self.polarization
    }

    /// The beam splitter used in the trial.
    pub fn beam_splitter(&self) -> &BeamSplitter {
        &self.beam_splitter
    }

    /// Computes the averaged powers vs mirror angle for the given incident
    /// angles (default: every incident angle present in the data).
    ///
    /// Returns, per incident angle, an Nx4 table with columns mirror angle,
    /// incident power, transmitted power, reflected power.
    /// `power_scale_factor` multiplies every power column (not the angles);
    /// pass 1.0 for raw watts.
    pub fn compute_powers_vs_mirror_angle(
        &self,
        incident_angles_to_use: Option<&[f64]>,
        power_scale_factor: f64,
    ) -> Result<AngleCurves> {
        let incident_angles = self.incident_angles_or_default(incident_angles_to_use);
        debug!(
            "computing powers vs mirror angle for {} incident angles of trial '{}'",
            incident_angles.len(),
            self.trial_label
        );
        let mut result = AngleCurves::new();
        for incident_angle in incident_angles {
            // The data column stores the legacy grating angle, the negative
            // of the incident angle.
            let grating_angle = -incident_angle;
            let single_run =
                select_rows_equal(&self.data.view(), self.columns.incident_angle, grating_angle);
            let mirror_angles =
                unique_values(single_run.column(self.columns.mirror_angle));
            let averaged = self.average_replicates(&single_run, &mirror_angles)?;

            let transmitted = self
                .transmitted_background
                .with_values(averaged.column(1).to_owned());
            let reflected = self
                .reflected_background
                .with_values(averaged.column(2).to_owned());
            let incident_power = self.beam_splitter.compute_incident_power(
                self.polarization,
                transmitted.as_ref(),
                reflected.as_ref(),
                self.transmitted_background.as_ref(),
                self.reflected_background.as_ref(),
            );

            let mut table = Array2::zeros((averaged.nrows(), 4));
            table.column_mut(0).assign(&averaged.column(0));
            table
                .column_mut(1)
                .assign(&(incident_power * power_scale_factor));
            table
                .column_mut(2)
                .assign(&(transmitted.values() * power_scale_factor));
            table
                .column_mut(3)
                .assign(&(reflected.values() * power_scale_factor));
            result.insert(OrderedFloat(incident_angle), table);
        }
        Ok(result)
    }

    /// Computes the one-sided power errors vs mirror angle for the given
    /// incident angles.
    ///
    /// Returns, per incident angle, an Nx4 table with columns mirror angle,
    /// incident power error, transmitted power uncertainty, reflected power
    /// uncertainty (of the averaged replicate measurements), each scaled by
    /// `power_scale_factor`.
    pub fn compute_power_errors_vs_mirror_angle(
        &self,
        incident_angles_to_use: Option<&[f64]>,
        power_scale_factor: f64,
    ) -> Result<AngleCurves> {
        let incident_angles = self.incident_angles_or_default(incident_angles_to_use);
        let mut result = AngleCurves::new();
        for incident_angle in incident_angles {
            let grating_angle = -incident_angle;
            let single_run =
                select_rows_equal(&self.data.view(), self.columns.incident_angle, grating_angle);
            let mirror_angles =
                unique_values(single_run.column(self.columns.mirror_angle));
            let averaged = self.average_replicates(&single_run, &mirror_angles)?;

            let transmitted = self
                .transmitted_background
                .with_values(averaged.column(1).to_owned());
            let reflected = self
                .reflected_background
                .with_values(averaged.column(2).to_owned());
            let incident_power_error = self.beam_splitter.compute_incident_power_error(
                self.polarization,
                transmitted.as_ref(),
                reflected.as_ref(),
                self.transmitted_background.as_ref(),
                self.reflected_background.as_ref(),
            )?;

            let mut table = Array2::zeros((averaged.nrows(), 4));
            table.column_mut(0).assign(&averaged.column(0));
            table
                .column_mut(1)
                .assign(&(incident_power_error * power_scale_factor));
            table
                .column_mut(2)
                .assign(&(transmitted.abs_uncertainty()? * power_scale_factor));
            table
                .column_mut(3)
                .assign(&(reflected.abs_uncertainty()? * power_scale_factor));
            result.insert(OrderedFloat(incident_angle), table);
        }
        Ok(result)
    }

    /// Computes the efficiency vs mirror angle for the given incident
    /// angles.
    ///
    /// Returns, per incident angle, an Nx2 table with columns mirror angle
    /// and efficiency.
    pub fn compute_efficiency_vs_mirror_angle(
        &self,
        incident_angles_to_use: Option<&[f64]>,
    ) -> Result<AngleCurves> {
        let powers = self.compute_powers_vs_mirror_angle(incident_angles_to_use, 1.0)?;
        let mut result = AngleCurves::new();
        for (incident_angle, table) in powers {
            let transmitted = self
                .transmitted_background
                .with_values(table.column(2).to_owned());
            let reflected = self
                .reflected_background
                .with_values(table.column(3).to_owned());
            let efficiency = self.beam_splitter.compute_efficiency(
                self.polarization,
                transmitted.as_ref(),
                reflected.as_ref(),
                self.transmitted_background.as_ref(),
                self.reflected_background.as_ref(),
            );
            result.insert(incident_angle, stack_two_columns(table.column(0), &efficiency));
        }
        Ok(result)
    }

    /// Computes the one-sided error in efficiency vs mirror angle for the
    /// given incident angles.
    ///
    /// Returns, per incident angle, an Nx2 table with columns mirror angle
    /// and efficiency error.
    pub fn compute_efficiency_errors_vs_mirror_angle(
        &self,
        incident_angles_to_use: Option<&[f64]>,
    ) -> Result<AngleCurves> {
        let powers = self.compute_powers_vs_mirror_angle(incident_angles_to_use, 1.0)?;
        let mut result = AngleCurves::new();
        for (incident_angle, table) in powers {
            let transmitted = self
                .transmitted_background
                .with_values(table.column(2).to_owned());
            let reflected = self
                .reflected_background
                .with_values(table.column(3).to_owned());
            let efficiency_error = self.beam_splitter.compute_efficiency_error(
                self.polarization,
                transmitted.as_ref(),
                reflected.as_ref(),
                self.transmitted_background.as_ref(),
                self.reflected_background.as_ref(),
            )?;
            result.insert(
                incident_angle,
                stack_two_columns(table.column(0), &efficiency_error),
            );
        }
        Ok(result)
    }

    /// Computes the total efficiency vs incident angle.
    ///
    /// Returns an Nx2 array with columns incident angle and total
    /// efficiency, where the total is the **sum** over all mirror angles at
    /// that incident angle: each mirror angle probes a distinct diffraction
    /// channel, and the total coupling is the sum across all excited
    /// channels.
    pub fn compute_efficiency_vs_incident_angle(
        &self,
        incident_angles_to_use: Option<&[f64]>,
    ) -> Result<Array2<f64>> {
        let per_mirror = self.compute_efficiency_vs_mirror_angle(incident_angles_to_use)?;
        let mut result = Array2::zeros((per_mirror.len(), 2));
        for (i, (incident_angle, table)) in per_mirror.iter().enumerate() {
            result[[i, 0]] = incident_angle.into_inner();
            result[[i, 1]] = table.column(1).sum();
        }
        Ok(result)
    }

    /// Computes the error in total efficiency vs incident angle.
    ///
    /// Returns an Nx2 array with columns incident angle and the sum of the
    /// squared per-mirror-angle efficiency errors (independent channels
    /// combined in quadrature).
    ///
    /// TODO: take the final square root so the error column carries the
    /// same units as the efficiency itself; downstream consumers currently
    /// expect the squared sum.
    pub fn compute_efficiency_error_vs_incident_angle(
        &self,
        incident_angles_to_use: Option<&[f64]>,
    ) -> Result<Array2<f64>> {
        let per_mirror =
            self.compute_efficiency_errors_vs_mirror_angle(incident_angles_to_use)?;
        let mut result = Array2::zeros((per_mirror.len(), 2));
        for (i, (incident_angle, table)) in per_mirror.iter().enumerate() {
            result[[i, 0]] = incident_angle.into_inner();
            result[[i, 1]] = table.column(1).mapv(|e| e * e).sum();
        }
        Ok(result)
    }

    /// The incident angles to reduce: either the caller's explicit list, or
    /// every distinct value in the data (negated from the stored grating
    /// angles).
    fn incident_angles_or_default(&self, incident_angles_to_use: Option<&[f64]>) -> Vec<f64> {
        match incident_angles_to_use {
            Some(angles) => angles.to_vec(),
            None => unique_values(self.data.column(self.columns.incident_angle))
                .into_iter()
                .map(|grating_angle| -grating_angle)
                .collect(),
        }
    }

    /// Averages the replicate readings of each mirror angle within a single
    /// run. Returns an Nx3 table with columns mirror angle, transmitted
    /// power, reflected power.
    fn average_replicates(
        &self,
        single_run: &Array2<f64>,
        mirror_angles: &[f64],
    ) -> Result<Array2<f64>> {
        let mut transmitted_avgs: Vec<Option<f64>> = Vec::with_capacity(mirror_angles.len());
        let mut reflected_avgs: Vec<Option<f64>> = Vec::with_capacity(mirror_angles.len());
        for &mirror_angle in mirror_angles {
            let replicates =
                select_rows_equal(&single_run.view(), self.columns.mirror_angle, mirror_angle);
            let transmitted = self
                .transmitted_background
                .with_values(replicates.column(self.columns.transmitted_power).to_owned());
            let reflected = self
                .reflected_background
                .with_values(replicates.column(self.columns.reflected_power).to_owned());
            transmitted_avgs.push(self.apply_policy(transmitted.average(), mirror_angle)?);
            reflected_avgs.push(self.apply_policy(reflected.average(), mirror_angle)?);
        }
        let transmitted_avgs = fill_masked(transmitted_avgs)?;
        let reflected_avgs = fill_masked(reflected_avgs)?;

        let mut averaged = Array2::zeros((mirror_angles.len(), 3));
        for (i, &mirror_angle) in mirror_angles.iter().enumerate() {
            averaged[[i, 0]] = mirror_angle;
            averaged[[i, 1]] = transmitted_avgs[i];
            averaged[[i, 2]] = reflected_avgs[i];
        }
        Ok(averaged)
    }

    /// Applies the averaging-failure policy to one replicate-group average.
    /// `Ok(None)` marks a masked failure to be filled in afterwards.
    fn apply_policy(
        &self,
        average: std::result::Result<f64, MeasurementError>,
        mirror_angle: f64,
    ) -> Result<Option<f64>> {
        match average {
            Ok(value) => Ok(Some(value)),
            Err(MeasurementError::NoAveragePossible)
                if self.averaging_policy == AveragingPolicy::MaskFailures =>
            {
                warn!(
                    "no average possible at mirror angle {mirror_angle} of trial '{}'; \
                     masking the group",
                    self.trial_label
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Replaces masked (failed) group averages with the mean of the successful
/// ones. Fails if no group at all could be averaged.
fn fill_masked(averages: Vec<Option<f64>>) -> Result<Vec<f64>> {
    if averages.iter().all(Option::is_some) {
        return Ok(averages.into_iter().flatten().collect());
    }
    let successes: Vec<f64> = averages.iter().copied().flatten().collect();
    if successes.is_empty() {
        return Err(Error::Measurement(MeasurementError::NoAveragePossible));
    }
    let fallback = successes.iter().sum::<f64>() / successes.len() as f64;
    Ok(averages
        .into_iter()
        .map(|avg| avg.unwrap_or(fallback))
        .collect())
}

/// Rows of `data` whose `column` value equals `value` exactly. Exact
/// floating-point comparison is intentional; see the module docs.
fn select_rows_equal(data: &ArrayView2<'_, f64>, column: usize, value: f64) -> Array2<f64> {
    let indices: Vec<usize> = data
        .column(column)
        .iter()
        .enumerate()
        .filter(|(_, &v)| v == value)
        .map(|(i, _)| i)
        .collect();
    data.select(Axis(0), &indices)
}

/// Distinct values of a column, sorted ascending, deduplicated by exact
/// equality.
fn unique_values(column: ArrayView1<'_, f64>) -> Vec<f64> {
    let mut values: Vec<f64> = column.iter().copied().collect();
    values.sort_by_key(|&v| OrderedFloat(v));
    values.dedup_by(|a, b| a == b);
    values
}

/// Stacks an angle column and a value column into an Nx2 table.
fn stack_two_columns(angles: ArrayView1<'_, f64>, values: &Array1<f64>) -> Array2<f64> {
    let mut table = Array2::zeros((angles.len(), 2));
    table.column_mut(0).assign(&angles);
    table.column_mut(1).assign(values);
    table
}
