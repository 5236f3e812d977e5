use std::cell::RefCell;
use std::error::Error;
use std::sync::Arc;

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::Result;

pub type DynError = Box<dyn Error + Send + Sync>;

thread_local! {
    // Planners cache their plans by length; waveform lengths repeat from event to event.
    static REAL_PLANNER: RefCell<RealFftPlanner<f64>> = RefCell::new(RealFftPlanner::new());
    static COMPLEX_PLANNER: RefCell<FftPlanner<f64>> = RefCell::new(FftPlanner::new());
}

pub struct FftHelper {
    len: usize,
    pub forward_r2c: Arc<dyn RealToComplex<f64>>,
    pub inverse_c2r: Arc<dyn ComplexToReal<f64>>,
    pub inverse_c2c: Arc<dyn Fft<f64>>,
}

impl FftHelper {
    pub fn new(len: usize) -> Self {
        let (forward_r2c, inverse_c2r) = REAL_PLANNER.with(|planner| {
            let mut planner = planner.borrow_mut();
            (planner.plan_fft_forward(len), planner.plan_fft_inverse(len))
        });
        let inverse_c2c = COMPLEX_PLANNER.with(|planner| planner.borrow_mut().plan_fft_inverse(len));

        Self {
            len,
            forward_r2c,
            inverse_c2r,
            inverse_c2c,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn half_len(&self) -> usize {
        self.len / 2 + 1
    }

    /// Normalised inverse complex transform (divides by the length).
    pub fn inverse_c2c(&self, spectrum: &mut [Complex<f64>]) {
        debug_assert_eq!(spectrum.len(), self.len);
        self.inverse_c2c.process(spectrum);
        let scale = 1.0 / self.len as f64;
        for value in spectrum.iter_mut() {
            *value *= scale;
        }
    }

    /// Unnormalised forward real transform. `input` is used as scratch.
    pub fn forward_r2c_process(
        &self,
        input: &mut [f64],
        output: &mut [Complex<f64>],
    ) -> Result<()> {
        debug_assert_eq!(input.len(), self.len);
        debug_assert_eq!(output.len(), self.half_len());
        self.forward_r2c.process(input, output)?;
        Ok(())
    }

    /// Normalised inverse real transform. `spectrum` is used as scratch.
    pub fn inverse_c2r_process(
        &self,
        spectrum: &mut [Complex<f64>],
        output: &mut [f64],
    ) -> Result<()> {
        debug_assert_eq!(spectrum.len(), self.half_len());
        debug_assert_eq!(output.len(), self.len);
        clear_real_only_bins(spectrum, self.len);
        self.inverse_c2r.process(spectrum, output)?;
        let scale = 1.0 / self.len as f64;
        for value in output.iter_mut() {
            *value *= scale;
        }
        Ok(())
    }
}

/// A real signal has a purely real DC bin, and a purely real Nyquist bin when
/// the length is even. Spectral edits (deconvolution, phase rotation) can leave
/// residual imaginary parts there which the C2R transform rejects.
pub fn clear_real_only_bins(spectrum: &mut [Complex<f64>], fft_len: usize) {
    if let Some(dc) = spectrum.first_mut() {
        dc.im = 0.0;
    }
    if fft_len % 2 == 0 {
        let nyquist_idx = fft_len / 2;
        if nyquist_idx > 0 && nyquist_idx < spectrum.len() {
            spectrum[nyquist_idx].im = 0.0;
        }
    }
}

/// 累積バッファに複素スペクトルのパワー `|z|^2` を加算する。
pub fn accumulate_power_add(dest: &mut [f64], src: &[Complex<f64>]) {
    debug_assert_eq!(dest.len(), src.len());
    for (acc, value) in dest.iter_mut().zip(src.iter()) {
        *acc += value.re * value.re + value.im * value.im;
    }
}

/// Positionwise `dest += src` over the shorter of the two lengths.
pub fn add_overlapping(dest: &mut [f64], src: &[f64]) {
    for (acc, value) in dest.iter_mut().zip(src.iter()) {
        *acc += *value;
    }
}

pub fn scale_in_place(values: &mut [f64], factor: f64) {
    for value in values.iter_mut() {
        *value *= factor;
    }
}

/// Wrap an angle in degrees into [-180, 180).
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}
