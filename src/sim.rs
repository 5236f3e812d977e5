//! Synthetic array events: an impulsive plane wave plus Gaussian noise,
//! digitised on slightly jittered sample times.

use std::f64::consts::PI;

use num_complex::Complex;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{Error, Result};
use crate::event::{ChannelVolts, EventWaveforms, FilteredEvent, Polarization};
use crate::geom::AntennaPositions;
use crate::waveform::Waveform;

#[derive(Clone, Debug)]
pub struct PulseSimulation {
    /// Source azimuth (degrees)
    pub phi: f64,
    /// Source elevation (degrees)
    pub theta: f64,
    /// Polarization carrying the full pulse amplitude
    pub pol: Polarization,
    pub amplitude: f64,
    /// Fraction of the amplitude leaking into the other polarization
    pub cross_pol: f64,
    /// Gaussian envelope width (ns)
    pub width: f64,
    /// Carrier frequency of the pulse (GHz)
    pub carrier: f64,
    /// Arrival time at the array origin (ns)
    pub arrival: f64,
    pub noise_rms: f64,
    pub n_samples: usize,
    /// Nominal sample spacing (ns)
    pub dt: f64,
    /// Peak-to-peak sample time jitter as a fraction of `dt`, below 1
    pub jitter: f64,
}

impl Default for PulseSimulation {
    fn default() -> Self {
        Self {
            phi: 0.0,
            theta: 0.0,
            pol: Polarization::Horizontal,
            amplitude: 100.0,
            cross_pol: 0.1,
            width: 1.0,
            carrier: 0.3,
            arrival: 40.0,
            noise_rms: 5.0,
            n_samples: 256,
            dt: 0.5,
            jitter: 0.2,
        }
    }
}

impl PulseSimulation {
    fn pulse(&self, t: f64) -> f64 {
        let x = t / self.width;
        (-0.5 * x * x).exp() * (2.0 * PI * self.carrier * t).cos()
    }

    /// One event. Channel group delays are always present in the data.
    pub fn simulate(&self, geometry: &AntennaPositions, rng: &mut StdRng) -> Result<EventWaveforms> {
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(Error::InvalidConfig(format!(
                "sample jitter must be in [0, 1), got {}",
                self.jitter
            )));
        }
        let noise = Normal::new(0.0, self.noise_rms).map_err(|e| {
            Error::InvalidConfig(format!("noise rms {}: {e}", self.noise_rms))
        })?;

        let mut channels: [Vec<Waveform>; 2] = [Vec::new(), Vec::new()];
        for pol in Polarization::ALL {
            let gain = if pol == self.pol {
                self.amplitude
            } else {
                self.amplitude * self.cross_pol
            };
            for antenna in 0..geometry.len() {
                let arrival = self.arrival
                    + geometry.geometric_delay(antenna, pol, self.phi, self.theta)
                    + geometry.position(antenna, pol).group_delay;
                let mut times = Vec::with_capacity(self.n_samples);
                let mut values = Vec::with_capacity(self.n_samples);
                for k in 0..self.n_samples {
                    let offset = if self.jitter > 0.0 {
                        rng.gen_range(-0.5..0.5) * self.jitter * self.dt
                    } else {
                        0.0
                    };
                    let t = k as f64 * self.dt + offset;
                    times.push(t);
                    values.push(gain * self.pulse(t - arrival) + noise.sample(rng));
                }
                channels[pol.index()].push(Waveform::from_uneven(times, values, self.dt)?);
            }
        }
        let [hpol, vpol] = channels;
        Ok(EventWaveforms::new(hpol, vpol))
    }
}

/// Remove the mean of every channel, standing in for an upstream filter chain.
pub fn remove_dc(event: &EventWaveforms) -> Result<EventWaveforms> {
    let mut filtered: [Vec<Waveform>; 2] = [Vec::new(), Vec::new()];
    for pol in Polarization::ALL {
        for antenna in 0..event.num_antennas() {
            let mut wf = event.unfiltered(antenna, pol).clone();
            wf.update_freq(|spectrum, _| {
                if let Some(dc) = spectrum.first_mut() {
                    *dc = Complex::new(0.0, 0.0);
                }
            })?;
            filtered[pol.index()].push(wf);
        }
    }
    let [hpol, vpol] = filtered;
    Ok(event.clone().with_filtered(hpol, vpol))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::geom::RingSpec;
    use rand::SeedableRng;

    fn ring() -> AntennaPositions {
        AntennaPositions::from_rings(&[RingSpec {
            count: 8,
            radius: 1.0,
            z: 0.0,
            phi_offset: 0.0,
        }])
        .unwrap()
    }

    #[test]
    fn noiseless_pulse_peaks_at_geometric_arrival() {
        let geometry = ring();
        let sim = PulseSimulation {
            phi: 45.0,
            noise_rms: 0.0,
            jitter: 0.0,
            carrier: 0.0,
            ..PulseSimulation::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let event = sim.simulate(&geometry, &mut rng).unwrap();
        for antenna in 0..geometry.len() {
            let expected =
                sim.arrival + geometry.geometric_delay(antenna, Polarization::Horizontal, 45.0, 0.0);
            let wf = event.unfiltered(antenna, Polarization::Horizontal);
            let (t, value) = wf.peak_abs().unwrap();
            assert_abs_diff_eq!(t, expected, epsilon = sim.dt / 2.0 + 1e-9);
            assert!(value > 0.9 * sim.amplitude);
            let (_, cross) = event.unfiltered(antenna, Polarization::Vertical).peak_abs().unwrap();
            assert_abs_diff_eq!(cross, value * sim.cross_pol, epsilon = 1e-9);
        }
    }

    #[test]
    fn same_seed_same_event() {
        let geometry = ring();
        let sim = PulseSimulation::default();
        let a = sim
            .simulate(&geometry, &mut StdRng::seed_from_u64(11))
            .unwrap();
        let b = sim
            .simulate(&geometry, &mut StdRng::seed_from_u64(11))
            .unwrap();
        assert_eq!(
            a.unfiltered(5, Polarization::Vertical).even(),
            b.unfiltered(5, Polarization::Vertical).even()
        );
        let raw = a.unfiltered(0, Polarization::Horizontal).raw().unwrap();
        assert_eq!(raw.times.len(), sim.n_samples);
    }

    #[test]
    fn remove_dc_zeroes_the_mean() {
        let geometry = ring();
        let sim = PulseSimulation::default();
        let event = sim
            .simulate(&geometry, &mut StdRng::seed_from_u64(5))
            .unwrap();
        let filtered = remove_dc(&event).unwrap();
        assert!(filtered.has_filtered());
        let wf = filtered.filtered(2, Polarization::Horizontal);
        let mean = wf.even().iter().sum::<f64>() / wf.len() as f64;
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-9);
    }
}
