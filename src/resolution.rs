//! Bivariate normal pointing resolution over (phi, theta) and the models
//! that build one for a recorded peak.

use std::f64::consts::PI;

use crate::error::{Error, Result};
use crate::event::{PeakSummary, Polarization};
use crate::utils::wrap_degrees;

/// Probability density over arrival direction, centred on a peak.
///
/// Angles are in degrees. The azimuth offset is wrapped into [-180, 180)
/// before evaluation, so the density is periodic in phi.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointingResolution {
    phi: f64,
    theta: f64,
    dphi: f64,
    dtheta: f64,
    rho: f64,
    inv_dphi2: f64,
    inv_dtheta2: f64,
    inv_dphidtheta: f64,
    expterm: f64,
    norm: f64,
}

fn check_parameters(dphi: f64, dtheta: f64, rho: f64) -> Result<()> {
    let finite = dphi.is_finite() && dtheta.is_finite() && rho.is_finite();
    if !finite || dphi <= 0.0 || dtheta <= 0.0 || rho.abs() >= 1.0 {
        return Err(Error::InvalidResolution { dphi, dtheta, rho });
    }
    Ok(())
}

impl PointingResolution {
    pub fn new(phi: f64, theta: f64, dphi: f64, dtheta: f64, rho: f64) -> Result<Self> {
        check_parameters(dphi, dtheta, rho)?;
        if !(phi.is_finite() && theta.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "pointing centre must be finite, got ({phi}, {theta})"
            )));
        }
        let one_minus_rho2 = 1.0 - rho * rho;
        Ok(Self {
            phi,
            theta,
            dphi,
            dtheta,
            rho,
            inv_dphi2: 1.0 / (dphi * dphi),
            inv_dtheta2: 1.0 / (dtheta * dtheta),
            inv_dphidtheta: 1.0 / (dphi * dtheta),
            expterm: -1.0 / (2.0 * one_minus_rho2),
            norm: 1.0 / (2.0 * PI * dphi * dtheta * one_minus_rho2.sqrt()),
        })
    }

    pub fn uncorrelated(phi: f64, theta: f64, dphi: f64, dtheta: f64) -> Result<Self> {
        Self::new(phi, theta, dphi, dtheta, 0.0)
    }

    pub fn phi(&self) -> f64 {
        self.phi
    }

    pub fn theta(&self) -> f64 {
        self.theta
    }

    pub fn dphi(&self) -> f64 {
        self.dphi
    }

    pub fn dtheta(&self) -> f64 {
        self.dtheta
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }

    /// Density at the peak itself.
    pub fn norm(&self) -> f64 {
        self.norm
    }

    pub fn compute_probability(&self, phi: f64, theta: f64) -> f64 {
        let dphi = wrap_degrees(phi - self.phi);
        let dtheta = theta - self.theta;
        let q = dphi * dphi * self.inv_dphi2 + dtheta * dtheta * self.inv_dtheta2
            - 2.0 * self.rho * dphi * dtheta * self.inv_dphidtheta;
        self.norm * (self.expterm * q).exp()
    }

    pub fn compute_probabilities(&self, phi: &[f64], theta: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(phi.len());
        self.compute_probabilities_into(phi, theta, &mut out);
        out
    }

    /// Evaluate pointwise into `out`, resizing it to the input length.
    pub fn compute_probabilities_into(&self, phi: &[f64], theta: &[f64], out: &mut Vec<f64>) {
        debug_assert_eq!(phi.len(), theta.len(), "phi/theta length mismatch");
        out.clear();
        out.extend(
            phi.iter()
                .zip(theta.iter())
                .map(|(&p, &t)| self.compute_probability(p, t)),
        );
    }
}

/// Builds a [`PointingResolution`] for one peak of an event summary.
pub trait PointingResolutionModel: Send + Sync {
    /// Reinitialize `out` for peak `peak` of `pol`.
    fn compute_pointing_resolution_into(
        &self,
        summary: &dyn PeakSummary,
        pol: Polarization,
        peak: usize,
        out: &mut PointingResolution,
    ) -> Result<()>;

    fn compute_pointing_resolution(
        &self,
        summary: &dyn PeakSummary,
        pol: Polarization,
        peak: usize,
    ) -> Result<PointingResolution> {
        let found = summary
            .peak(pol, peak)
            .ok_or(Error::MissingPeak { pol, index: peak })?;
        let mut out = PointingResolution::uncorrelated(found.phi, found.theta, 1.0, 1.0)?;
        self.compute_pointing_resolution_into(summary, pol, peak, &mut out)?;
        Ok(out)
    }
}

/// Same spread for every event.
#[derive(Clone, Copy, Debug)]
pub struct ConstantPointingResolutionModel {
    dphi: f64,
    dtheta: f64,
    rho: f64,
}

impl ConstantPointingResolutionModel {
    pub fn new(dphi: f64, dtheta: f64, rho: f64) -> Result<Self> {
        check_parameters(dphi, dtheta, rho)?;
        Ok(Self { dphi, dtheta, rho })
    }
}

impl PointingResolutionModel for ConstantPointingResolutionModel {
    fn compute_pointing_resolution_into(
        &self,
        summary: &dyn PeakSummary,
        pol: Polarization,
        peak: usize,
        out: &mut PointingResolution,
    ) -> Result<()> {
        let found = summary
            .peak(pol, peak)
            .ok_or(Error::MissingPeak { pol, index: peak })?;
        *out = PointingResolution::new(found.phi, found.theta, self.dphi, self.dtheta, self.rho)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::event::{EventSummary, Peak};

    fn integrate(res: &PointingResolution, half_width: f64, step: f64) -> f64 {
        let n = (2.0 * half_width / step).round() as usize;
        let mut total = 0.0;
        for i in 0..n {
            let phi = res.phi() - half_width + (i as f64 + 0.5) * step;
            for j in 0..n {
                let theta = res.theta() - half_width + (j as f64 + 0.5) * step;
                total += res.compute_probability(phi, theta);
            }
        }
        total * step * step
    }

    #[test]
    fn density_integrates_to_one() {
        for rho in [0.0, 0.5, -0.8] {
            let res = PointingResolution::new(30.0, -10.0, 0.8, 0.5, rho).unwrap();
            let total = integrate(&res, 8.0, 0.02);
            assert_abs_diff_eq!(total, 1.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn centre_is_the_mode() {
        let res = PointingResolution::uncorrelated(100.0, 5.0, 1.0, 2.0).unwrap();
        let peak = res.compute_probability(100.0, 5.0);
        assert_abs_diff_eq!(peak, res.norm(), epsilon = 1e-15);
        for delta in [-3.0, -0.1, 0.1, 2.0] {
            assert!(peak > res.compute_probability(100.0 + delta, 5.0));
            assert!(peak > res.compute_probability(100.0, 5.0 + delta));
        }
    }

    #[test]
    fn azimuth_offset_wraps() {
        let res = PointingResolution::uncorrelated(359.0, 0.0, 1.0, 1.0).unwrap();
        let across = res.compute_probability(1.0, 0.0);
        let direct = res.compute_probability(357.0, 0.0);
        assert_abs_diff_eq!(across, direct, epsilon = 1e-15);
    }

    #[test]
    fn correlation_tilts_the_ellipse() {
        let res = PointingResolution::new(0.0, 0.0, 1.0, 1.0, 0.7).unwrap();
        assert!(res.compute_probability(1.0, 1.0) > res.compute_probability(1.0, -1.0));
    }

    #[test]
    fn vector_matches_scalar_and_reuses_buffer() {
        let res = PointingResolution::new(10.0, 2.0, 0.5, 0.3, 0.2).unwrap();
        let phi = [10.0, 10.2, 9.5, 190.0];
        let theta = [2.0, 2.1, 1.0, 2.0];
        let mut out = vec![99.0; 10];
        res.compute_probabilities_into(&phi, &theta, &mut out);
        assert_eq!(out.len(), 4);
        for ((&p, &t), &v) in phi.iter().zip(theta.iter()).zip(out.iter()) {
            assert_eq!(v, res.compute_probability(p, t));
        }
        assert_eq!(res.compute_probabilities(&phi, &theta), out);
    }

    #[test]
    fn rejects_degenerate_parameters() {
        for (dphi, dtheta, rho) in [
            (0.0, 1.0, 0.0),
            (1.0, -1.0, 0.0),
            (1.0, 1.0, 1.0),
            (1.0, 1.0, -1.5),
            (f64::NAN, 1.0, 0.0),
        ] {
            assert!(matches!(
                PointingResolution::new(0.0, 0.0, dphi, dtheta, rho),
                Err(Error::InvalidResolution { .. })
            ));
            assert!(ConstantPointingResolutionModel::new(dphi, dtheta, rho).is_err());
        }
    }

    #[test]
    fn constant_model_centres_on_recorded_peak() {
        let mut summary = EventSummary::new(1);
        summary.push_peak(
            Polarization::Vertical,
            Peak {
                phi: 45.0,
                theta: -8.0,
                value: 0.3,
            },
        );
        let model = ConstantPointingResolutionModel::new(0.5, 0.3, 0.1).unwrap();

        let mut out = PointingResolution::uncorrelated(0.0, 0.0, 9.0, 9.0).unwrap();
        model
            .compute_pointing_resolution_into(&summary, Polarization::Vertical, 0, &mut out)
            .unwrap();
        assert_eq!((out.phi(), out.theta()), (45.0, -8.0));
        assert_eq!((out.dphi(), out.dtheta(), out.rho()), (0.5, 0.3, 0.1));

        let fresh = model
            .compute_pointing_resolution(&summary, Polarization::Vertical, 0)
            .unwrap();
        assert_eq!(fresh, out);

        assert!(matches!(
            model.compute_pointing_resolution(&summary, Polarization::Horizontal, 0),
            Err(Error::MissingPeak {
                pol: Polarization::Horizontal,
                index: 0
            })
        ));
    }
}
