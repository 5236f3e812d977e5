//! Error types for the combination and pointing-resolution core.

use std::io;
use thiserror::Error;

use crate::event::Polarization;

/// Result type for library operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the library
#[derive(Error, Debug)]
pub enum Error {
    /// Pointing resolution parameters do not describe a proper density
    #[error("invalid pointing resolution: dphi={dphi}, dtheta={dtheta}, rho={rho} (need dphi>0, dtheta>0, |rho|<1)")]
    InvalidResolution { dphi: f64, dtheta: f64, rho: f64 },

    /// Combiner or settings value out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Summary has no peak at the requested index
    #[error("no recorded peak {index} for {pol:?} polarization")]
    MissingPeak { pol: Polarization, index: usize },

    /// Antenna selection came back empty
    #[error("antenna selection returned no antennas")]
    NoAntennas,

    /// Malformed sample data
    #[error("invalid waveform: {0}")]
    InvalidWaveform(String),

    #[error("FFT failed: {0}")]
    Fft(#[from] realfft::FftError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// Syntax error in a table, response or settings file
    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
}
