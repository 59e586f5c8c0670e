//! CLI entry point for the SPR trial reduction.
//!
//! Extracts one or more trial folders, runs the reduction pipeline, and
//! writes the reduced curves as CSV files — the same arrays the plotting
//! layer consumes.
//!
//! # Usage
//!
//! Reduce a trial and write its total-efficiency curve:
//!
//! ```bash
//! plotdata --trial "Trials/GR13-1205 (UP) (5)=Left, P" --error --out reduced/
//! ```
//!
//! Restrict to specific incident angles and include the theory overlays:
//!
//! ```bash
//! plotdata -t Trials/GH13-12V -a 14 -a 18 --theory
//! ```

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use spr_reduction::experiment::trial::{ColumnLayout, Trial};
use spr_reduction::extraction::{extract_grating_info, extract_trial_info};

/// Hard-coded overlay depth: orders beyond the tenth are never physical on
/// this apparatus.
const MAX_OVERLAY_ORDER: u32 = 10;

#[derive(Parser)]
#[command(name = "plotdata")]
#[command(about = "Extract and reduce diffraction grating SPR trials", long_about = None)]
struct Cli {
    /// Trial folder to reduce, as `PATH` or `PATH=LABEL`. Repeat to reduce
    /// several trials.
    #[arg(short, long = "trial", value_parser = parse_trial_spec, required = true)]
    trial: Vec<(PathBuf, String)>,

    /// Incident angle to include (must be present in the dataset). Repeat
    /// for each angle of interest; by default every angle found in the
    /// dataset is reduced.
    #[arg(short = 'a', long = "incident-angle")]
    incident_angle: Vec<f64>,

    /// Multiplicative factor applied to the power columns of the
    /// powers-vs-mirror-angle table.
    #[arg(short = 'm', long, default_value_t = 1.0)]
    scale: f64,

    /// Also write the one-sided error column next to the efficiency curve.
    #[arg(short, long)]
    error: bool,

    /// Also write the powers-vs-mirror-angle table per trial.
    #[arg(short, long)]
    powers: bool,

    /// Write SPR and Wood's-anomaly angle overlays from the trial's
    /// grating_parameters.csv.
    #[arg(long)]
    theory: bool,

    /// Output directory for the reduced CSV files.
    #[arg(short, long, default_value = ".")]
    out: PathBuf,
}

/// Parses a `PATH` or `PATH=LABEL` trial argument; without a label the
/// folder name is used.
fn parse_trial_spec(spec: &str) -> Result<(PathBuf, String), String> {
    let (path, label) = match spec.split_once('=') {
        Some((path, label)) => (PathBuf::from(path), label.to_string()),
        None => (PathBuf::from(spec), String::new()),
    };
    if path.as_os_str().is_empty() {
        return Err("empty trial path".to_string());
    }
    Ok((path, label))
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    fs::create_dir_all(&cli.out)
        .with_context(|| format!("creating output directory {}", cli.out.display()))?;
    let angles: Option<&[f64]> = if cli.incident_angle.is_empty() {
        None
    } else {
        Some(&cli.incident_angle)
    };

    for (trial_folder, label) in &cli.trial {
        let trial = extract_trial_info(trial_folder, ColumnLayout::default(), label)
            .with_context(|| format!("extracting trial from {}", trial_folder.display()))?;
        info!("reducing trial '{}'", trial.trial_label());

        write_efficiency_curve(&cli, &trial, angles)?;
        if cli.powers {
            write_powers_tables(&cli, &trial, angles)?;
        }
        if cli.theory {
            write_theory_overlays(&cli, trial_folder, trial.trial_label())?;
        }
    }
    Ok(())
}

/// File-name-safe version of a trial label.
fn slug(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

fn write_efficiency_curve(cli: &Cli, trial: &Trial, angles: Option<&[f64]>) -> Result<()> {
    let efficiency = trial.compute_efficiency_vs_incident_angle(angles)?;
    let path = cli
        .out
        .join(format!("{}_efficiency_vs_incident_angle.csv", slug(trial.trial_label())));
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("creating {}", path.display()))?;
    if cli.error {
        let errors = trial.compute_efficiency_error_vs_incident_angle(angles)?;
        writer.write_record(["incident_angle", "total_efficiency", "total_efficiency_error_sq"])?;
        for (row, error_row) in efficiency.rows().into_iter().zip(errors.rows()) {
            writer.write_record(&[
                row[0].to_string(),
                row[1].to_string(),
                error_row[1].to_string(),
            ])?;
        }
    } else {
        writer.write_record(["incident_angle", "total_efficiency"])?;
        for row in efficiency.rows() {
            writer.write_record(&[row[0].to_string(), row[1].to_string()])?;
        }
    }
    writer.flush()?;
    info!("wrote {}", path.display());
    Ok(())
}

fn write_powers_tables(cli: &Cli, trial: &Trial, angles: Option<&[f64]>) -> Result<()> {
    let powers = trial.compute_powers_vs_mirror_angle(angles, cli.scale)?;
    let path = cli
        .out
        .join(format!("{}_powers_vs_mirror_angle.csv", slug(trial.trial_label())));
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record([
        "incident_angle",
        "mirror_angle",
        "incident_power",
        "transmitted_power",
        "reflected_power",
    ])?;
    for (incident_angle, table) in &powers {
        for row in table.rows() {
            writer.write_record(&[
                incident_angle.to_string(),
                row[0].to_string(),
                row[1].to_string(),
                row[2].to_string(),
                row[3].to_string(),
            ])?;
        }
    }
    writer.flush()?;
    info!("wrote {}", path.display());
    Ok(())
}

fn write_theory_overlays(cli: &Cli, trial_folder: &std::path::Path, label: &str) -> Result<()> {
    let grating = extract_grating_info(trial_folder)
        .with_context(|| format!("reading grating parameters from {}", trial_folder.display()))?;
    let path = cli.out.join(format!("{}_overlays.csv", slug(label)));
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(["kind", "order", "angle"])?;
    for (order, angle) in grating.spr_angles(MAX_OVERLAY_ORDER) {
        writer.write_record(&["spr".to_string(), order.to_string(), angle.to_string()])?;
    }
    for (order, angle) in grating.woods_anomaly_angles(MAX_OVERLAY_ORDER) {
        writer.write_record(&["woods".to_string(), order.to_string(), angle.to_string()])?;
    }
    writer.flush()?;
    info!("wrote {}", path.display());
    Ok(())
}
