//! Per-channel instrument responses and their removal from waveforms.

use std::fs;
use std::path::Path;

use num_complex::Complex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::waveform::Waveform;

/// Instrument response of one (antenna, polarization) channel.
pub trait Response: Send + Sync {
    /// Remove this response from `wf` in place.
    fn deconvolve_in_place(&self, wf: &mut Waveform) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum DeconvolutionMethod {
    /// Divide by the response. Bins where `|H|` is at or below `floor` carry
    /// no usable signal and are zeroed.
    Naive { floor: f64 },
    /// Undo only the phase of the response, multiplying by `conj(H)/|H|`.
    #[default]
    AllPass,
}

/// Complex response sampled at increasing frequencies (GHz), linearly
/// interpolated in between and zero outside the table.
#[derive(Debug, Clone)]
pub struct TabulatedResponse {
    freqs: Vec<f64>,
    gains: Vec<Complex<f64>>,
    method: DeconvolutionMethod,
}

impl TabulatedResponse {
    pub fn new(
        freqs: Vec<f64>,
        gains: Vec<Complex<f64>>,
        method: DeconvolutionMethod,
    ) -> Result<Self> {
        if freqs.len() != gains.len() {
            return Err(Error::InvalidConfig(format!(
                "response has {} frequencies but {} gains",
                freqs.len(),
                gains.len()
            )));
        }
        if freqs.is_empty() {
            return Err(Error::InvalidConfig("response table is empty".into()));
        }
        if freqs.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(Error::InvalidConfig(
                "response frequencies must be strictly increasing".into(),
            ));
        }
        Ok(Self {
            freqs,
            gains,
            method,
        })
    }

    /// Frequency-independent gain over `[0, f_max]`.
    pub fn flat(gain: Complex<f64>, f_max: f64, method: DeconvolutionMethod) -> Result<Self> {
        Self::new(vec![0.0, f_max], vec![gain, gain], method)
    }

    /// Read `freq_ghz re im` lines; `#` starts a comment.
    pub fn from_file(path: &Path, method: DeconvolutionMethod) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let response = Self::parse(&text, method)?;
        debug!(
            "Loaded {}-point response from {}",
            response.freqs.len(),
            path.display()
        );
        Ok(response)
    }

    pub fn parse(text: &str, method: DeconvolutionMethod) -> Result<Self> {
        let mut freqs = Vec::new();
        let mut gains = Vec::new();
        for (line_idx, line) in text.lines().enumerate() {
            let line = line.splitn(2, '#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let values = line
                .split_whitespace()
                .map(|field| field.parse::<f64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Parse {
                    line: line_idx + 1,
                    message: e.to_string(),
                })?;
            if values.len() != 3 {
                return Err(Error::Parse {
                    line: line_idx + 1,
                    message: format!("expected 'freq re im', found {} columns", values.len()),
                });
            }
            freqs.push(values[0]);
            gains.push(Complex::new(values[1], values[2]));
        }
        Self::new(freqs, gains, method)
    }

    pub fn method(&self) -> DeconvolutionMethod {
        self.method
    }

    pub fn with_method(mut self, method: DeconvolutionMethod) -> Self {
        self.method = method;
        self
    }

    /// Interpolated response at `f` (GHz).
    pub fn gain_at(&self, f: f64) -> Complex<f64> {
        let last = self.freqs.len() - 1;
        if f < self.freqs[0] || f > self.freqs[last] {
            return Complex::new(0.0, 0.0);
        }
        let idx = self.freqs.partition_point(|&x| x <= f);
        if idx == 0 {
            return self.gains[0];
        }
        if idx > last {
            return self.gains[last];
        }
        let (f0, f1) = (self.freqs[idx - 1], self.freqs[idx]);
        let t = (f - f0) / (f1 - f0);
        self.gains[idx - 1] * (1.0 - t) + self.gains[idx] * t
    }
}

impl Response for TabulatedResponse {
    fn deconvolve_in_place(&self, wf: &mut Waveform) -> Result<()> {
        let method = self.method;
        wf.update_freq(|spectrum, df| {
            for (k, bin) in spectrum.iter_mut().enumerate() {
                let h = self.gain_at(k as f64 * df);
                let mag = h.norm();
                *bin = match method {
                    DeconvolutionMethod::Naive { floor } => {
                        if mag > floor {
                            *bin / h
                        } else {
                            Complex::new(0.0, 0.0)
                        }
                    }
                    DeconvolutionMethod::AllPass => {
                        if mag > 0.0 {
                            *bin * h.conj() / mag
                        } else {
                            *bin
                        }
                    }
                };
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn pulse(n: usize) -> Waveform {
        let values = (0..n)
            .map(|i| {
                let x = i as f64 - n as f64 / 2.0;
                (-x * x / 8.0).exp()
            })
            .collect();
        Waveform::from_even(0.0, 0.5, values)
    }

    #[test]
    fn gain_interpolates_and_vanishes_outside_table() {
        let resp = TabulatedResponse::new(
            vec![0.0, 1.0],
            vec![Complex::new(1.0, 0.0), Complex::new(3.0, 2.0)],
            DeconvolutionMethod::AllPass,
        )
        .unwrap();
        let mid = resp.gain_at(0.5);
        assert_abs_diff_eq!(mid.re, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(mid.im, 1.0, epsilon = 1e-12);
        assert_eq!(resp.gain_at(1.0), Complex::new(3.0, 2.0));
        assert_eq!(resp.gain_at(1.5), Complex::new(0.0, 0.0));
    }

    #[test]
    fn naive_flat_gain_divides_amplitude() {
        let original = pulse(32);
        let mut wf = original.clone();
        let resp = TabulatedResponse::flat(
            Complex::new(4.0, 0.0),
            2.0,
            DeconvolutionMethod::Naive { floor: 1e-6 },
        )
        .unwrap();
        resp.deconvolve_in_place(&mut wf).unwrap();
        for (&a, &b) in original.even().iter().zip(wf.even().iter()) {
            assert_abs_diff_eq!(a / 4.0, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn all_pass_preserves_spectral_magnitude() {
        let mut original = pulse(32);
        let mut wf = original.clone();
        let phase = Complex::from_polar(2.0, PI / 3.0);
        let resp = TabulatedResponse::flat(phase, 2.0, DeconvolutionMethod::AllPass).unwrap();
        resp.deconvolve_in_place(&mut wf).unwrap();
        let before: Vec<f64> = original.freq().unwrap().iter().map(|z| z.norm()).collect();
        let after: Vec<f64> = wf.freq().unwrap().iter().map(|z| z.norm()).collect();
        // DC is forced real, so only compare the interior bins
        for k in 1..before.len() - 1 {
            assert_abs_diff_eq!(before[k], after[k], epsilon = 1e-9);
        }
    }

    #[test]
    fn parse_reads_table_and_rejects_bad_rows() {
        let text = "# f re im\n0.0 1 0\n0.5 0.5 -0.5\n\n1.0 0 1 # edge\n";
        let resp = TabulatedResponse::parse(text, DeconvolutionMethod::AllPass).unwrap();
        assert_eq!(resp.gain_at(0.5), Complex::new(0.5, -0.5));
        assert!(matches!(
            TabulatedResponse::parse("0 1\n", DeconvolutionMethod::AllPass),
            Err(Error::Parse { line: 1, .. })
        ));
        assert!(TabulatedResponse::parse("1 1 0\n0 1 0\n", DeconvolutionMethod::AllPass).is_err());
    }

    #[test]
    fn phase_only_is_the_default_method() {
        assert_eq!(DeconvolutionMethod::default(), DeconvolutionMethod::AllPass);
    }
}
