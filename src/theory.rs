//! Closed-form angle predictions for the diffraction grating.
//!
//! These feed the theoretical overlays drawn on top of the measured
//! efficiency curves: the locations of the diffraction orders, the angles
//! where grating-coupled surface plasmon resonance (SPR) is excited, and
//! the Wood's-anomaly (Rayleigh passing-off) angles where a diffracted
//! order grazes the grating surface.
//!
//! # Conventions
//!
//! Angles are measured from the grating normal in the plane of incidence
//! and expressed in degrees. `epsilon` is the pitch of the grating normal
//! relative to the incidence plane, in degrees; it enters every condition
//! through the foreshortened line density `G / cos(epsilon)`. The grating
//! equation convention is
//!
//! ```text
//! sin(theta_m) = m * lambda * G / cos(epsilon) - sin(theta_i)
//! ```
//!
//! with `G` the line density in grooves per meter.

use std::collections::BTreeMap;

use log::warn;

/// No diffraction order beyond the fifth is observable on this apparatus.
const MAX_DIFFRACTION_ORDER: i32 = 5;

/// The grating geometry and the optical constants of its interface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grating {
    /// Groove density in grooves per millimeter.
    pub groove_spacing: u32,
    /// Relative permittivity of the metal surface.
    pub e_m: f64,
    /// Relative permittivity of the dielectric above the grating.
    pub e_d: f64,
    /// Design wavelength of the input light, in nanometers.
    pub wavelength: f64,
    /// Pitch of the grating normal relative to the incidence plane, in
    /// degrees.
    pub epsilon: f64,
}

impl Grating {
    /// Creates a grating description.
    pub fn new(groove_spacing: u32, e_m: f64, e_d: f64, wavelength: f64, epsilon: f64) -> Self {
        Self {
            groove_spacing,
            e_m,
            e_d,
            wavelength,
            epsilon,
        }
    }

    /// `lambda * G / cos(epsilon)`: the per-order in-plane momentum step,
    /// in units of the free-space wavenumber.
    fn order_step(&self) -> f64 {
        let line_density = f64::from(self.groove_spacing) * 1e3;
        let wavelength = self.wavelength * 1e-9;
        wavelength * line_density / self.epsilon.to_radians().cos()
    }

    /// Locations of the diffraction orders for light at `incident_angle`
    /// degrees.
    ///
    /// Returns `(order, angle)` pairs for every order with a physical
    /// solution, angles measured from the grating normal in degrees.
    pub fn find_diffraction_orders(&self, incident_angle: f64) -> Vec<(i32, f64)> {
        let step = self.order_step();
        let sin_incident = incident_angle.to_radians().sin();
        (-MAX_DIFFRACTION_ORDER..=MAX_DIFFRACTION_ORDER)
            .filter_map(|order| {
                let sine = f64::from(order) * step - sin_incident;
                physical_angle(sine).map(|angle| (order, angle))
            })
            .collect()
    }

    /// Incident angles at which grating-coupled SPR is excited, per order.
    ///
    /// Momentum matching against the surface-plasmon wavevector
    /// `n_spp = sqrt(e_m * e_d / (e_m + e_d))`:
    ///
    /// ```text
    /// sin(theta_spr) = m * lambda * G / cos(epsilon) - n_spp
    /// ```
    ///
    /// Orders up to `max_order` in magnitude with a physical solution are
    /// returned. An interface that supports no bound plasmon mode (the
    /// effective index comes out non-real) yields an empty map.
    pub fn spr_angles(&self, max_order: u32) -> BTreeMap<i32, f64> {
        // A bound plasmon mode needs a metal: e_m < -e_d so that the
        // effective index comes out real and above the light line.
        let ratio = self.e_m * self.e_d / (self.e_m + self.e_d);
        if self.e_m + self.e_d >= 0.0 || ratio < 0.0 {
            warn!(
                "no bound plasmon mode for e_m = {}, e_d = {}; skipping SPR angles",
                self.e_m, self.e_d
            );
            return BTreeMap::new();
        }
        let n_spp = ratio.sqrt();
        let step = self.order_step();
        let max_order = max_order as i32;
        (-max_order..=max_order)
            .filter(|&order| order != 0)
            .filter_map(|order| {
                let sine = f64::from(order) * step - n_spp;
                physical_angle(sine).map(|angle| (order, angle))
            })
            .collect()
    }

    /// Incident angles of the Wood's anomalies, per order.
    ///
    /// A diffracted order passes off along the grating surface when its
    /// in-plane momentum reaches the grazing limit `sqrt(e_d)`:
    ///
    /// ```text
    /// sin(theta_w) = m * lambda * G / cos(epsilon) - sqrt(e_d)
    /// ```
    pub fn woods_anomaly_angles(&self, max_order: u32) -> BTreeMap<i32, f64> {
        let grazing = self.e_d.sqrt();
        let step = self.order_step();
        let max_order = max_order as i32;
        (-max_order..=max_order)
            .filter(|&order| order != 0)
            .filter_map(|order| {
                let sine = f64::from(order) * step - grazing;
                physical_angle(sine).map(|angle| (order, angle))
            })
            .collect()
    }
}

/// Converts a sine into an angle in degrees when it is physical.
fn physical_angle(sine: f64) -> Option<f64> {
    if (-1.0..=1.0).contains(&sine) {
        Some(sine.asin().to_degrees())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// A gold-like grating at 637.8 nm: 1200 grooves/mm, e_m well below
    /// -(e_d).
    fn grating() -> Grating {
        Grating::new(1200, -10.0, 1.0, 637.8, 4.16)
    }

    #[test]
    fn test_zero_order_reflects_specularly() {
        let orders = grating().find_diffraction_orders(30.0);
        let zero = orders.iter().find(|(m, _)| *m == 0).unwrap();
        assert_relative_eq!(zero.1, -30.0, max_relative = 1e-9);
    }

    #[test]
    fn test_diffraction_orders_are_physical_and_bounded() {
        let orders = grating().find_diffraction_orders(18.0);
        assert!(!orders.is_empty());
        for (order, angle) in orders {
            assert!(order.abs() <= MAX_DIFFRACTION_ORDER);
            assert!((-90.0..=90.0).contains(&angle));
        }
    }

    #[test]
    fn test_spr_angles_respect_momentum_matching() {
        let g = grating();
        let angles = g.spr_angles(10);
        assert!(!angles.is_empty());
        let n_spp = (g.e_m * g.e_d / (g.e_m + g.e_d)).sqrt();
        for (&order, &angle) in &angles {
            let sine = angle.to_radians().sin();
            let recovered = f64::from(order) * g.order_step() - n_spp;
            assert_relative_eq!(sine, recovered, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_no_spr_angles_without_a_bound_mode() {
        // A dielectric "metal" supports no surface plasmon.
        let g = Grating::new(1200, 2.25, 1.0, 637.8, 0.0);
        assert!(g.spr_angles(10).is_empty());
    }

    #[test]
    fn test_woods_anomalies_sit_at_the_passing_off_condition() {
        let g = grating();
        let angles = g.woods_anomaly_angles(10);
        assert!(!angles.is_empty());
        for (&order, &angle) in &angles {
            let sine = angle.to_radians().sin();
            let recovered = f64::from(order) * g.order_step() - g.e_d.sqrt();
            assert_relative_eq!(sine, recovered, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_woods_anomaly_precedes_spr_for_each_order() {
        // The plasmon momentum exceeds the grazing photon momentum, so each
        // order's SPR angle sits below its Wood's anomaly.
        let g = grating();
        let spr = g.spr_angles(10);
        let woods = g.woods_anomaly_angles(10);
        for (order, spr_angle) in &spr {
            if let Some(wood_angle) = woods.get(order) {
                assert!(spr_angle < wood_angle);
            }
        }
    }
}
