//! Extraction of typed trials from trial folders.
//!
//! A trial folder holds the raw acquisition output:
//!
//! - `data.csv` — headerless numeric table, one row per physical reading;
//! - `computation_parameters.csv` — indexed by sensor label ("A"/"B"), with
//!   the beam-splitter coefficient block (`RH, TH, RV, TV`), the
//!   `Polarization` field, per-sensor `Background Power (W)`, the
//!   `Instrument` identity of each sensor, and — for wavelength-calibrated
//!   meters — the configured `Wavelength (nm)`;
//! - `grating_parameters.csv` (optional) — grating geometry consumed only
//!   by the theoretical overlays.
//!
//! Extraction performs all file I/O up front and hands the core pure,
//! typed values; no I/O happens inside the reduction pipeline itself. The
//! sensor-to-instrument mapping is resolved here, once, by a lookup keyed
//! on the instrument identity string, so the pipeline never inspects
//! concrete measurement types at runtime.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::{array, Array2};
use serde::Deserialize;
use thiserror::Error;

use crate::experiment::beam_splitter::{
    BeamSplitter, BeamSplitterError, CoefficientTable, COEFFICIENT_COLUMNS,
};
use crate::experiment::definitions::{PolarizationState, PowerMeterLabel};
use crate::experiment::trial::{ColumnLayout, Trial};
use crate::measurement::{
    MeasurementError, Newport835Measurement, PowerMeasurement, ThorlabsPm100aMeasurement,
};
use crate::theory::Grating;

/// File name of the raw-readings table inside a trial folder.
pub const DATA_FILE: &str = "data.csv";
/// File name of the computation-parameters table inside a trial folder.
pub const PARAMETER_FILE: &str = "computation_parameters.csv";
/// File name of the optional grating-geometry table inside a trial folder.
pub const GRATING_PARAMETER_FILE: &str = "grating_parameters.csv";

/// Default instrument identity for the reflected-arm sensor "A".
const DEFAULT_INSTRUMENT_A: &str = "ThorlabsPM100A";
/// Default instrument identity for the transmitted-arm sensor "B".
const DEFAULT_INSTRUMENT_B: &str = "NewportModel835";

/// Errors produced while turning a trial folder into typed values.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// A file in the trial folder could not be read or parsed as CSV.
    #[error("failed to read {path}: {source}")]
    Csv {
        /// The offending file.
        path: PathBuf,
        /// The underlying CSV/I-O error.
        source: csv::Error,
    },

    /// A cell expected to be numeric did not parse.
    #[error("non-numeric value {value:?} in {path}")]
    NonNumericValue {
        /// The offending file.
        path: PathBuf,
        /// The cell contents.
        value: String,
    },

    /// The polarization field did not start with "H" or "V".
    #[error("invalid polarization state {0:?}")]
    InvalidPolarizationState(String),

    /// A required parameter row or column was absent.
    #[error("computation parameters are missing {0}")]
    MissingParameter(String),

    /// The instrument identity of a sensor is not known to the registry.
    #[error("unknown instrument identity {0:?}")]
    UnknownInstrument(String),

    /// The grating parameter file could not be read.
    #[error("error reading the grating parameter file: {0}")]
    GratingParameterFile(String),

    /// The grating parameter file is missing or has malformed parameters.
    #[error("missing or malformed grating parameters: {0}")]
    MissingGratingParameters(String),

    /// The beam-splitter coefficient block was malformed.
    #[error(transparent)]
    BeamSplitter(#[from] BeamSplitterError),

    /// A background measurement could not be constructed.
    #[error(transparent)]
    Measurement(#[from] MeasurementError),
}

/// Extracts the trial information from a trial folder.
///
/// `columns` names which `data.csv` column holds which physical quantity;
/// pass [`ColumnLayout::default`] for the standard acquisition layout. An
/// empty `trial_name` falls back to the folder's name.
pub fn extract_trial_info(
    trial_folder: &Path,
    columns: ColumnLayout,
    trial_name: &str,
) -> Result<Trial, ExtractionError> {
    info!("extracting trial from {}", trial_folder.display());
    let data = read_data_matrix(&trial_folder.join(DATA_FILE))?;
    let parameters = ParameterTable::read(&trial_folder.join(PARAMETER_FILE))?;

    let mut coefficients = CoefficientTable::new();
    for label in [PowerMeterLabel::A, PowerMeterLabel::B] {
        for column in COEFFICIENT_COLUMNS {
            if let Some(value) = parameters.number(label.as_str(), column)? {
                coefficients.insert(label.as_str(), column, value);
            }
        }
    }
    // Sensor A watches the reflected arm, sensor B the transmitted arm.
    let beam_splitter = BeamSplitter::new(coefficients, PowerMeterLabel::B, PowerMeterLabel::A)?;

    let polarization_text = parameters
        .text(PowerMeterLabel::A.as_str(), "Polarization")
        .ok_or_else(|| ExtractionError::MissingParameter("column 'Polarization'".into()))?;
    let polarization = PolarizationState::from_parameter(polarization_text).ok_or_else(|| {
        ExtractionError::InvalidPolarizationState(polarization_text.to_string())
    })?;

    let reflected_background = background_measurement(&parameters, PowerMeterLabel::A)?;
    let transmitted_background = background_measurement(&parameters, PowerMeterLabel::B)?;

    let trial_label = if trial_name.is_empty() {
        trial_folder
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        trial_name.to_string()
    };
    debug!(
        "extracted trial '{trial_label}': {} readings, {polarization} polarization",
        data.nrows()
    );

    Ok(Trial::new(
        trial_label,
        data,
        beam_splitter,
        polarization,
        transmitted_background,
        reflected_background,
        columns,
    ))
}

/// Extracts the grating geometry from a trial folder's
/// `grating_parameters.csv`, for the theoretical overlays.
pub fn extract_grating_info(trial_folder: &Path) -> Result<Grating, ExtractionError> {
    #[derive(Debug, Deserialize)]
    struct GratingRecord {
        groove_spacing: u32,
        e_m: f64,
        wavelength: f64,
        e_d: f64,
        epsilon: f64,
    }

    let path = trial_folder.join(GRATING_PARAMETER_FILE);
    let mut reader = csv::Reader::from_path(&path)
        .map_err(|e| ExtractionError::GratingParameterFile(e.to_string()))?;
    let record: GratingRecord = reader
        .deserialize()
        .next()
        .ok_or_else(|| {
            ExtractionError::MissingGratingParameters("no parameter row found".into())
        })?
        .map_err(|e| ExtractionError::MissingGratingParameters(e.to_string()))?;
    Ok(Grating::new(
        record.groove_spacing,
        record.e_m,
        record.e_d,
        record.wavelength,
        record.epsilon,
    ))
}

/// Builds the single-element background measurement for one sensor, using
/// the instrument registry keyed on the sensor's `Instrument` identity.
fn background_measurement(
    parameters: &ParameterTable,
    label: PowerMeterLabel,
) -> Result<Box<dyn PowerMeasurement>, ExtractionError> {
    let background = parameters
        .number(label.as_str(), "Background Power (W)")?
        .ok_or_else(|| {
            ExtractionError::MissingParameter(format!(
                "column 'Background Power (W)' for sensor {label}"
            ))
        })?;
    let default_instrument = match label {
        PowerMeterLabel::A => DEFAULT_INSTRUMENT_A,
        PowerMeterLabel::B => DEFAULT_INSTRUMENT_B,
    };
    let instrument = parameters
        .text(label.as_str(), "Instrument")
        .unwrap_or(default_instrument);
    match instrument {
        "NewportModel835" => Ok(Box::new(Newport835Measurement::new(array![background]))),
        "ThorlabsPM100A" => {
            let wavelength = parameters
                .number(label.as_str(), "Wavelength (nm)")?
                .ok_or_else(|| {
                    ExtractionError::MissingParameter(format!(
                        "column 'Wavelength (nm)' for sensor {label}"
                    ))
                })?;
            Ok(Box::new(ThorlabsPm100aMeasurement::new(
                array![background],
                wavelength,
            )?))
        }
        other => Err(ExtractionError::UnknownInstrument(other.to_string())),
    }
}

/// Reads the headerless raw-readings table into a numeric matrix.
fn read_data_matrix(path: &Path) -> Result<Array2<f64>, ExtractionError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| ExtractionError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    let mut cells = Vec::new();
    let mut rows = 0usize;
    let mut columns = 0usize;
    for record in reader.records() {
        let record = record.map_err(|source| ExtractionError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        rows += 1;
        columns = columns.max(record.len());
        for cell in record.iter() {
            let value: f64 =
                cell.parse()
                    .map_err(|_| ExtractionError::NonNumericValue {
                        path: path.to_path_buf(),
                        value: cell.to_string(),
                    })?;
            cells.push(value);
        }
    }
    Array2::from_shape_vec((rows, columns), cells).map_err(|e| {
        ExtractionError::NonNumericValue {
            path: path.to_path_buf(),
            value: format!("ragged table: {e}"),
        }
    })
}

/// The computation-parameters table: rows indexed by the first column (the
/// sensor label), cells addressed by header name.
struct ParameterTable {
    path: PathBuf,
    rows: BTreeMap<String, BTreeMap<String, String>>,
}

impl ParameterTable {
    fn read(path: &Path) -> Result<Self, ExtractionError> {
        let mut reader =
            csv::Reader::from_path(path).map_err(|source| ExtractionError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|source| ExtractionError::Csv {
                path: path.to_path_buf(),
                source,
            })?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = BTreeMap::new();
        for record in reader.records() {
            let record = record.map_err(|source| ExtractionError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
            let Some(label) = record.get(0) else {
                continue;
            };
            let mut row = BTreeMap::new();
            for (header, cell) in headers.iter().skip(1).zip(record.iter().skip(1)) {
                row.insert(header.clone(), cell.to_string());
            }
            rows.insert(label.to_string(), row);
        }
        Ok(Self {
            path: path.to_path_buf(),
            rows,
        })
    }

    /// A cell as text; `None` when the row or column is absent or empty.
    fn text(&self, label: &str, column: &str) -> Option<&str> {
        let cell = self.rows.get(label)?.get(column)?.as_str();
        if cell.is_empty() {
            None
        } else {
            Some(cell)
        }
    }

    /// A cell as a number; `Ok(None)` when absent, an error when present
    /// but non-numeric.
    fn number(&self, label: &str, column: &str) -> Result<Option<f64>, ExtractionError> {
        match self.text(label, column) {
            None => Ok(None),
            Some(cell) => cell
                .parse()
                .map(Some)
                .map_err(|_| ExtractionError::NonNumericValue {
                    path: self.path.clone(),
                    value: cell.to_string(),
                }),
        }
    }
}
