//! Narrow views of an array event: per-channel waveforms, raw volts for
//! saturation checks, and the recorded peak directions of an event summary.

use crate::waveform::Waveform;

/// Channel polarization of an antenna feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Polarization {
    Horizontal,
    Vertical,
}

impl Polarization {
    pub const ALL: [Polarization; 2] = [Polarization::Horizontal, Polarization::Vertical];

    pub fn index(self) -> usize {
        match self {
            Polarization::Horizontal => 0,
            Polarization::Vertical => 1,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Polarization::Horizontal => 'H',
            Polarization::Vertical => 'V',
        }
    }

    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter.trim() {
            "H" | "h" | "hpol" | "HPOL" => Some(Polarization::Horizontal),
            "V" | "v" | "vpol" | "VPOL" => Some(Polarization::Vertical),
            _ => None,
        }
    }
}

/// Conditioned waveforms of one event, as handed over by the filter chain.
pub trait FilteredEvent {
    fn filtered(&self, antenna: usize, pol: Polarization) -> &Waveform;
    fn unfiltered(&self, antenna: usize, pol: Polarization) -> &Waveform;
}

/// Raw calibrated volts per channel.
pub trait ChannelVolts {
    fn num_antennas(&self) -> usize;
    fn volts(&self, antenna: usize, pol: Polarization) -> &[f64];
}

/// In-memory event: one waveform per (polarization, antenna), with an
/// optional filtered copy. Without a filtered copy both views are the same.
#[derive(Debug, Clone)]
pub struct EventWaveforms {
    unfiltered: [Vec<Waveform>; 2],
    filtered: Option<[Vec<Waveform>; 2]>,
}

impl EventWaveforms {
    pub fn new(hpol: Vec<Waveform>, vpol: Vec<Waveform>) -> Self {
        debug_assert_eq!(hpol.len(), vpol.len());
        Self {
            unfiltered: [hpol, vpol],
            filtered: None,
        }
    }

    pub fn with_filtered(mut self, hpol: Vec<Waveform>, vpol: Vec<Waveform>) -> Self {
        debug_assert_eq!(hpol.len(), self.unfiltered[0].len());
        debug_assert_eq!(vpol.len(), self.unfiltered[1].len());
        self.filtered = Some([hpol, vpol]);
        self
    }

    pub fn has_filtered(&self) -> bool {
        self.filtered.is_some()
    }
}

impl FilteredEvent for EventWaveforms {
    fn filtered(&self, antenna: usize, pol: Polarization) -> &Waveform {
        match &self.filtered {
            Some(filtered) => &filtered[pol.index()][antenna],
            None => &self.unfiltered[pol.index()][antenna],
        }
    }

    fn unfiltered(&self, antenna: usize, pol: Polarization) -> &Waveform {
        &self.unfiltered[pol.index()][antenna]
    }
}

impl ChannelVolts for EventWaveforms {
    fn num_antennas(&self) -> usize {
        self.unfiltered[0].len()
    }

    /// Raw samples when the channel was digitised unevenly, else the even grid.
    fn volts(&self, antenna: usize, pol: Polarization) -> &[f64] {
        let wf = &self.unfiltered[pol.index()][antenna];
        wf.raw().map_or(wf.even(), |raw| &raw.values[..])
    }
}

/// Recorded direction of an interferometric-map peak.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Peak {
    pub phi: f64,
    pub theta: f64,
    pub value: f64,
}

/// Read-only access to the peaks recorded for an event.
pub trait PeakSummary {
    fn peak(&self, pol: Polarization, index: usize) -> Option<Peak>;
}

#[derive(Debug, Clone, Default)]
pub struct EventSummary {
    pub event_number: u64,
    pub peaks: [Vec<Peak>; 2],
}

impl EventSummary {
    pub fn new(event_number: u64) -> Self {
        Self {
            event_number,
            peaks: [Vec::new(), Vec::new()],
        }
    }

    pub fn push_peak(&mut self, pol: Polarization, peak: Peak) {
        self.peaks[pol.index()].push(peak);
    }
}

impl PeakSummary for EventSummary {
    fn peak(&self, pol: Polarization, index: usize) -> Option<Peak> {
        self.peaks[pol.index()].get(index).copied()
    }
}
