//! Shared definitions for the experimental apparatus.

use std::fmt;

/// The two physical power sensors in the apparatus, as labelled in the
/// parameter files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PowerMeterLabel {
    /// Sensor "A", conventionally watching the beam reflected off the
    /// beam-splitter slide.
    A,
    /// Sensor "B", conventionally watching the power transmitted toward the
    /// grating.
    B,
}

impl PowerMeterLabel {
    /// The label as it appears in the parameter file index column.
    pub fn as_str(self) -> &'static str {
        match self {
            PowerMeterLabel::A => "A",
            PowerMeterLabel::B => "B",
        }
    }
}

impl fmt::Display for PowerMeterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The polarization state of the input beam during a trial.
///
/// The state selects which beam-splitter calibration column applies: the
/// column name is the coefficient kind ("R" or "T") followed by the first
/// letter of the polarization name, e.g. "RH".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolarizationState {
    /// Horizontal (P) polarization.
    Horizontal,
    /// Vertical (S) polarization.
    Vertical,
}

impl PolarizationState {
    /// First letter of the polarization name, used to form coefficient
    /// column names.
    pub fn letter(self) -> char {
        match self {
            PolarizationState::Horizontal => 'H',
            PolarizationState::Vertical => 'V',
        }
    }

    /// Parses a parameter-file polarization field. Only the first character
    /// is significant: "H"/"h" and "V"/"v" are accepted, anything else is
    /// rejected.
    pub fn from_parameter(text: &str) -> Option<Self> {
        match text.chars().next() {
            Some('H') | Some('h') => Some(PolarizationState::Horizontal),
            Some('V') | Some('v') => Some(PolarizationState::Vertical),
            _ => None,
        }
    }
}

impl fmt::Display for PolarizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolarizationState::Horizontal => f.write_str("Horizontal"),
            PolarizationState::Vertical => f.write_str("Vertical"),
        }
    }
}
