//! Data reduction for diffraction-grating surface plasmon resonance (SPR)
//! trials.
//!
//! The experimental apparatus records raw photodetector readings from two
//! optical power sensors (one watching the beam reflected off a beam-splitter
//! slide, one watching the power transmitted toward the grating) while a
//! folding mirror and the grating stage are stepped through angles. Each
//! trial folder holds a headerless `data.csv` of raw readings plus a
//! `computation_parameters.csv` describing sensor backgrounds, beam-splitter
//! calibration coefficients, and the polarization used.
//!
//! This crate reduces those raw readings into efficiency-vs-angle curves,
//! with optional one-sided error bars and theoretical overlays (SPR and
//! Wood's-anomaly angle predictions).
//!
//! ## Modules
//!
//! - [`measurement`] — the power-measurement capability trait and the two
//!   instrument-specific implementations with their uncertainty models.
//! - [`experiment`] — the beam-splitter model and the [`experiment::Trial`]
//!   aggregation pipeline from raw rows to efficiency curves.
//! - [`extraction`] — the boundary adapter that turns a trial folder into a
//!   typed [`experiment::Trial`] / [`theory::Grating`].
//! - [`theory`] — closed-form grating-order, SPR, and Wood's-anomaly angle
//!   predictions used for plot overlays.
//! - [`error`] — the crate-level error type.

pub mod error;
pub mod experiment;
pub mod extraction;
pub mod measurement;
pub mod theory;

pub use error::{Error, Result};
