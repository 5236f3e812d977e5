//! Coherent waveform combination for broadband antenna arrays.
//!
//! For a trial arrival direction the [`WaveformCombiner`] picks the antennas
//! facing it, compensates their plane-wave delays and averages them into one
//! coherent waveform, optionally removing each channel's instrument response
//! first. A [`PointingResolution`] then scores candidate directions around a
//! reconstructed peak.

pub mod combiner;
pub mod config;
pub mod error;
pub mod event;
pub mod flags;
pub mod geom;
pub mod resolution;
pub mod response;
pub mod sim;
pub mod spectrum;
pub mod utils;
pub mod waveform;
pub mod xml;

pub use combiner::{combine_waveforms, combine_waveforms_into, WaveformCombiner};
pub use config::{AnalysisSettings, CombinerConfig, ResolutionConfig};
pub use error::{Error, Result};
pub use event::{
    ChannelVolts, EventSummary, EventWaveforms, FilteredEvent, Peak, PeakSummary, Polarization,
};
pub use flags::{check_saturation, SaturationFlags};
pub use geom::{AntennaPosition, AntennaPositions, AntennaSelector, DelayModel, RingSpec};
pub use resolution::{
    ConstantPointingResolutionModel, PointingResolution, PointingResolutionModel,
};
pub use response::{DeconvolutionMethod, Response, TabulatedResponse};
pub use spectrum::PowerSpectrum;
pub use waveform::Waveform;
