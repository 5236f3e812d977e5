use crate::utils::{add_overlapping, scale_in_place};

/// One-sided power spectrum on a uniform grid `k·df`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerSpectrum {
    df: f64,
    values: Vec<f64>,
}

impl PowerSpectrum {
    pub fn new(df: f64, values: Vec<f64>) -> Self {
        Self { df, values }
    }

    pub fn df(&self) -> f64 {
        self.df
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn frequencies(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.values.len()).map(move |k| k as f64 * self.df)
    }

    /// Replace contents with `other`, reusing this allocation.
    pub fn assign(&mut self, other: &PowerSpectrum) {
        self.df = other.df;
        self.values.clear();
        self.values.extend_from_slice(&other.values);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Positionwise sum with `other` over the shorter length. Bins are matched
    /// by index, so spectra from different time bases are summed bin for bin.
    pub fn accumulate(&mut self, other: &PowerSpectrum) {
        add_overlapping(&mut self.values, &other.values);
    }

    pub fn scale(&mut self, factor: f64) {
        scale_in_place(&mut self.values, factor);
    }

    pub fn total_power(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Frequency and value of the strongest bin, ignoring DC.
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, &value)| (k as f64 * self.df, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn accumulate_then_scale_averages_bins() {
        let mut acc = PowerSpectrum::new(0.1, vec![1.0, 2.0, 3.0]);
        acc.accumulate(&PowerSpectrum::new(0.1, vec![3.0, 4.0, 5.0, 100.0]));
        acc.scale(0.5);
        assert_eq!(acc.values(), &[2.0, 3.0, 4.0]);
        assert_eq!(acc.len(), 3);
    }

    #[test]
    fn assign_copies_grid_and_values() {
        let mut acc = PowerSpectrum::new(1.0, vec![9.0; 10]);
        acc.assign(&PowerSpectrum::new(0.25, vec![1.0, 2.0]));
        assert_eq!(acc.df(), 0.25);
        assert_eq!(acc.values(), &[1.0, 2.0]);
        let freqs: Vec<f64> = acc.frequencies().collect();
        assert_eq!(freqs, vec![0.0, 0.25]);
    }

    #[test]
    fn peak_skips_dc() {
        let spec = PowerSpectrum::new(0.5, vec![50.0, 1.0, 7.0, 3.0]);
        assert_eq!(spec.peak(), Some((1.0, 7.0)));
        assert_abs_diff_eq!(spec.total_power(), 61.0, epsilon = 1e-12);
    }
}
