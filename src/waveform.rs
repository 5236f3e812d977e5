//! Dual-representation waveform.
//!
//! A [`Waveform`] keeps the irregularly sampled record it was built from (if
//! any) together with a regularly sampled "even" series `t0 + k·dt`. The
//! one-sided spectrum of the even series is computed on first use and cached.
//! Mutating the even samples drops the cache; operations that produce both
//! domains at once (`pad_freq`, `update_freq`) leave it valid.
//!
//! Time is in nanoseconds, so spectra are indexed in GHz.

use num_complex::Complex;

use crate::error::{Error, Result};
use crate::spectrum::PowerSpectrum;
use crate::utils::{accumulate_power_add, clear_real_only_bins, scale_in_place, FftHelper};

/// Tolerance, in samples, for treating an evaluation time as on the grid edge.
const EDGE_TOLERANCE: f64 = 1e-9;

/// Irregularly sampled record, strictly increasing in time.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSamples {
    pub times: Vec<f64>,
    pub values: Vec<f64>,
}

impl RawSamples {
    fn eval(&self, t: f64) -> f64 {
        let times = &self.times;
        let values = &self.values;
        let idx = times.partition_point(|&x| x <= t);
        if idx == 0 {
            return values[0];
        }
        if idx >= times.len() {
            return values[times.len() - 1];
        }
        let (t_lo, t_hi) = (times[idx - 1], times[idx]);
        let frac = (t - t_lo) / (t_hi - t_lo);
        values[idx - 1] + frac * (values[idx] - values[idx - 1])
    }
}

#[derive(Debug)]
pub struct Waveform {
    raw: Option<RawSamples>,
    t0: f64,
    dt: f64,
    even: Vec<f64>,
    spectrum: Option<Vec<Complex<f64>>>,
}

impl Clone for Waveform {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            t0: self.t0,
            dt: self.dt,
            even: self.even.clone(),
            spectrum: self.spectrum.clone(),
        }
    }

    /// Reuses this waveform's buffers.
    fn clone_from(&mut self, source: &Self) {
        self.raw.clone_from(&source.raw);
        self.t0 = source.t0;
        self.dt = source.dt;
        self.even.clone_from(&source.even);
        self.spectrum.clone_from(&source.spectrum);
    }
}

impl Default for Waveform {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Waveform {
    /// `n` zero samples at unit spacing starting at t = 0.
    pub fn new(n: usize) -> Self {
        Self::from_even(0.0, 1.0, vec![0.0; n])
    }

    pub fn from_even(t0: f64, dt: f64, values: Vec<f64>) -> Self {
        debug_assert!(dt > 0.0, "sample spacing must be positive");
        Self {
            raw: None,
            t0,
            dt,
            even: values,
            spectrum: None,
        }
    }

    /// Build from an irregular record, resampling linearly onto a grid of
    /// spacing `dt` that starts at the first raw time.
    pub fn from_uneven(times: Vec<f64>, values: Vec<f64>, dt: f64) -> Result<Self> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(Error::InvalidWaveform(format!(
                "sample spacing must be positive, got {dt}"
            )));
        }
        if times.len() != values.len() {
            return Err(Error::InvalidWaveform(format!(
                "{} times but {} values",
                times.len(),
                values.len()
            )));
        }
        if times.is_empty() {
            return Err(Error::InvalidWaveform("no samples".into()));
        }
        if times.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(Error::InvalidWaveform(
                "sample times must be strictly increasing".into(),
            ));
        }
        if times.iter().chain(values.iter()).any(|v| !v.is_finite()) {
            return Err(Error::InvalidWaveform("non-finite sample".into()));
        }

        let raw = RawSamples { times, values };
        let t0 = raw.times[0];
        let span = raw.times[raw.times.len() - 1] - t0;
        let n = (span / dt + EDGE_TOLERANCE).floor() as usize + 1;
        let even = (0..n).map(|k| raw.eval(t0 + k as f64 * dt)).collect();

        Ok(Self {
            raw: Some(raw),
            t0,
            dt,
            even,
            spectrum: None,
        })
    }

    pub fn raw(&self) -> Option<&RawSamples> {
        self.raw.as_ref()
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn t0(&self) -> f64 {
        self.t0
    }

    pub fn len(&self) -> usize {
        self.even.len()
    }

    pub fn is_empty(&self) -> bool {
        self.even.is_empty()
    }

    pub fn even(&self) -> &[f64] {
        &self.even
    }

    /// Time of the last even sample (`t0` when empty).
    pub fn last_time(&self) -> f64 {
        self.t0 + self.even.len().saturating_sub(1) as f64 * self.dt
    }

    pub fn time_at(&self, index: usize) -> f64 {
        self.t0 + index as f64 * self.dt
    }

    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.even.len()).map(move |k| self.time_at(k))
    }

    /// Frequency bin spacing of the spectrum.
    pub fn df(&self) -> f64 {
        if self.even.is_empty() {
            0.0
        } else {
            1.0 / (self.even.len() as f64 * self.dt)
        }
    }

    /// Mutable even samples. Drops the cached spectrum.
    pub fn even_mut(&mut self) -> &mut [f64] {
        self.spectrum = None;
        &mut self.even
    }

    /// Re-grid in place to `n` zeroed samples at `t0 + k·dt`, keeping the
    /// allocation. Raw samples and spectrum no longer apply and are dropped.
    pub fn reset_even(&mut self, t0: f64, dt: f64, n: usize) -> &mut [f64] {
        debug_assert!(dt > 0.0, "sample spacing must be positive");
        self.raw = None;
        self.spectrum = None;
        self.t0 = t0;
        self.dt = dt;
        self.even.clear();
        self.even.resize(n, 0.0);
        &mut self.even
    }

    pub fn has_spectrum(&self) -> bool {
        self.spectrum.is_some()
    }

    /// One-sided spectrum (`len/2 + 1` bins), computed on first use.
    pub fn freq(&mut self) -> Result<&[Complex<f64>]> {
        if self.spectrum.is_none() {
            let spectrum = self.compute_spectrum()?;
            self.spectrum = Some(spectrum);
        }
        Ok(self.spectrum.as_deref().unwrap_or(&[]))
    }

    fn compute_spectrum(&self) -> Result<Vec<Complex<f64>>> {
        let n = self.even.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let helper = FftHelper::new(n);
        let mut scratch = self.even.clone();
        let mut spectrum = vec![Complex::new(0.0, 0.0); helper.half_len()];
        helper.forward_r2c_process(&mut scratch, &mut spectrum)?;
        Ok(spectrum)
    }

    /// Power spectrum `|X_k|^2 / n` on the spectrum's frequency grid.
    pub fn power(&mut self) -> Result<PowerSpectrum> {
        let n = self.even.len();
        let df = self.df();
        let spectrum = self.freq()?;
        let mut power = vec![0.0; spectrum.len()];
        accumulate_power_add(&mut power, spectrum);
        if n > 0 {
            scale_in_place(&mut power, 1.0 / n as f64);
        }
        Ok(PowerSpectrum::new(df, power))
    }

    /// Edit the spectrum in place and regenerate the even samples from it.
    /// The closure receives the one-sided spectrum and the bin spacing.
    pub fn update_freq<F>(&mut self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut [Complex<f64>], f64),
    {
        let n = self.even.len();
        if n == 0 {
            return Ok(());
        }
        let df = self.df();
        self.freq()?;
        let mut spectrum = self.spectrum.take().unwrap_or_default();
        edit(&mut spectrum, df);
        clear_real_only_bins(&mut spectrum, n);

        let helper = FftHelper::new(n);
        let mut scratch = spectrum.clone();
        helper.inverse_c2r_process(&mut scratch, &mut self.even)?;
        self.spectrum = Some(spectrum);
        self.raw = None;
        Ok(())
    }

    /// Zero-pad the spectrum by `npad`, giving `len·npad` samples at spacing
    /// `dt/npad` over the same start time. Amplitudes are preserved and the
    /// original samples reappear at every `npad`-th index.
    pub fn pad_freq(&mut self, npad: usize) -> Result<()> {
        let n = self.even.len();
        if npad <= 1 || n == 0 {
            return Ok(());
        }
        let spectrum = self.freq()?;
        let m = n * npad;
        let helper = FftHelper::new(m);
        let mut padded = vec![Complex::new(0.0, 0.0); helper.half_len()];
        let gain = npad as f64;
        for (dest, src) in padded.iter_mut().zip(spectrum.iter()) {
            *dest = *src * gain;
        }
        // The old Nyquist bin stands for both +f and -f once it is no longer at the edge.
        if n % 2 == 0 {
            padded[n / 2] *= 0.5;
        }

        self.even.clear();
        self.even.resize(m, 0.0);
        let mut scratch = padded.clone();
        helper.inverse_c2r_process(&mut scratch, &mut self.even)?;
        self.dt /= npad as f64;
        self.spectrum = Some(padded);
        Ok(())
    }

    /// Linear interpolation of the even series; zero outside its span.
    pub fn eval_even(&self, t: f64) -> f64 {
        let n = self.even.len();
        if n == 0 {
            return 0.0;
        }
        let x = (t - self.t0) / self.dt;
        let last = (n - 1) as f64;
        if x < -EDGE_TOLERANCE || x > last + EDGE_TOLERANCE {
            return 0.0;
        }
        let x = x.clamp(0.0, last);
        let i = x.floor() as usize;
        if i >= n - 1 {
            return self.even[n - 1];
        }
        let frac = x - i as f64;
        self.even[i] * (1.0 - frac) + self.even[i + 1] * frac
    }

    /// Time and value of the sample with the largest magnitude.
    pub fn peak_abs(&self) -> Option<(f64, f64)> {
        self.even
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
            .map(|(idx, &value)| (self.time_at(idx), value))
    }

    /// Magnitude of the analytic signal.
    pub fn hilbert_envelope(&mut self) -> Result<Vec<f64>> {
        let n = self.even.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let spectrum = self.freq()?;
        let mut analytic = vec![Complex::new(0.0, 0.0); n];
        analytic[0] = spectrum[0];
        let positive_end = (n + 1) / 2;
        for k in 1..positive_end {
            analytic[k] = spectrum[k] * 2.0;
        }
        if n % 2 == 0 {
            analytic[n / 2] = spectrum[n / 2];
        }
        FftHelper::new(n).inverse_c2c(&mut analytic);
        Ok(analytic.iter().map(|z| z.norm()).collect())
    }
}
