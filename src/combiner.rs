//! Delay-compensated coherent summation of array waveforms.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::CombinerConfig;
use crate::error::{Error, Result};
use crate::event::{FilteredEvent, Polarization};
use crate::geom::{AntennaPositions, AntennaSelector, DelayModel};
use crate::response::{DeconvolutionMethod, Response, TabulatedResponse};
use crate::spectrum::PowerSpectrum;
use crate::waveform::Waveform;

/// Relative slack on the output length so that a span which is an exact
/// multiple of `dt` does not gain a sample from rounding.
const SPAN_TOLERANCE: f64 = 1e-9;

/// Combines the antennas nearest a trial direction into one waveform.
///
/// Working buffers are kept between calls, so one combiner must not be used
/// for two events at once; give every worker its own.
#[derive(Clone)]
pub struct WaveformCombiner {
    config: CombinerConfig,
    selector: Arc<dyn AntennaSelector>,
    delay_model: Arc<dyn DelayModel>,
    responses: [Vec<Option<Arc<dyn Response>>>; 2],

    antennas: Vec<usize>,
    delays: Vec<f64>,
    padded: Vec<Waveform>,
    deconv: Vec<Waveform>,

    coherent: Waveform,
    deconvolved: Waveform,
    coherent_avg_spectrum: PowerSpectrum,
    deconvolved_avg_spectrum: PowerSpectrum,
    deconvolved_valid: bool,
}

impl WaveformCombiner {
    pub fn new(config: CombinerConfig, geometry: Arc<AntennaPositions>) -> Result<Self> {
        Self::with_collaborators(config, geometry.clone(), geometry)
    }

    pub fn with_collaborators(
        config: CombinerConfig,
        selector: Arc<dyn AntennaSelector>,
        delay_model: Arc<dyn DelayModel>,
    ) -> Result<Self> {
        let total = selector.num_antennas();
        config.validate(total)?;
        Ok(Self {
            config,
            selector,
            delay_model,
            responses: [vec![None; total], vec![None; total]],
            antennas: Vec::with_capacity(config.nant),
            delays: Vec::with_capacity(config.nant),
            padded: Vec::new(),
            deconv: Vec::new(),
            coherent: Waveform::default(),
            deconvolved: Waveform::default(),
            coherent_avg_spectrum: PowerSpectrum::default(),
            deconvolved_avg_spectrum: PowerSpectrum::default(),
            deconvolved_valid: false,
        })
    }

    pub fn config(&self) -> &CombinerConfig {
        &self.config
    }

    pub fn n_antennas(&self) -> usize {
        self.config.nant
    }

    pub fn set_n_antennas(&mut self, nant: usize) -> Result<()> {
        let config = CombinerConfig { nant, ..self.config };
        config.validate(self.selector.num_antennas())?;
        self.config = config;
        Ok(())
    }

    pub fn set_npad(&mut self, npad: usize) -> Result<()> {
        let config = CombinerConfig { npad, ..self.config };
        config.validate(self.selector.num_antennas())?;
        self.config = config;
        Ok(())
    }

    pub fn set_use_unfiltered(&mut self, use_unfiltered: bool) {
        self.config.use_unfiltered = use_unfiltered;
    }

    pub fn set_deconvolve(&mut self, deconvolve: bool) {
        self.config.deconvolve = deconvolve;
    }

    pub fn set_group_delay(&mut self, group_delay: bool) {
        self.config.group_delay = group_delay;
    }

    fn for_each_slot<F>(&mut self, pol: Option<Polarization>, antenna: Option<usize>, mut f: F)
    where
        F: FnMut(&mut Option<Arc<dyn Response>>),
    {
        let pols: &[Polarization] = match pol {
            Some(Polarization::Horizontal) => &[Polarization::Horizontal],
            Some(Polarization::Vertical) => &[Polarization::Vertical],
            None => &Polarization::ALL,
        };
        for p in pols {
            let table = &mut self.responses[p.index()];
            match antenna {
                Some(ant) => {
                    if let Some(slot) = table.get_mut(ant) {
                        f(slot);
                    }
                }
                None => table.iter_mut().for_each(&mut f),
            }
        }
    }

    /// Register `response` for a channel. `None` for the polarization or the
    /// antenna applies it to all of them; the response itself is shared.
    pub fn set_response(
        &mut self,
        response: Arc<dyn Response>,
        pol: Option<Polarization>,
        antenna: Option<usize>,
    ) {
        if let (None, Some(ant)) = (pol, antenna) {
            warn!("Setting the same response for both polarizations of antenna {ant}");
        }
        self.for_each_slot(pol, antenna, |slot| *slot = Some(response.clone()));
    }

    pub fn clear_response(&mut self, pol: Option<Polarization>, antenna: Option<usize>) {
        self.for_each_slot(pol, antenna, |slot| *slot = None);
    }

    pub fn has_response(&self, pol: Polarization, antenna: usize) -> bool {
        matches!(self.responses[pol.index()].get(antenna), Some(Some(_)))
    }

    /// Load `{antenna:02}{H|V}.txt` response tables from `dir`. Channels
    /// without a file keep their current response. Returns how many were
    /// loaded.
    pub fn load_responses_from_dir(
        &mut self,
        dir: &Path,
        method: DeconvolutionMethod,
    ) -> Result<usize> {
        let mut loaded = 0;
        for pol in Polarization::ALL {
            for antenna in 0..self.responses[pol.index()].len() {
                let path = dir.join(format!("{:02}{}.txt", antenna, pol.letter()));
                if !path.is_file() {
                    debug!("No response file {}", path.display());
                    continue;
                }
                let response = TabulatedResponse::from_file(&path, method)?;
                self.responses[pol.index()][antenna] = Some(Arc::new(response));
                loaded += 1;
            }
        }
        debug!("Loaded {loaded} responses from {}", dir.display());
        Ok(loaded)
    }

    /// Combine the antennas nearest `phi` for a source at (`phi`, `theta`).
    /// Antennas whose bit is set in `disallowed` are not used. On error the
    /// coherent waveform and spectrum are empty and nothing is deconvolved.
    pub fn combine(
        &mut self,
        phi: f64,
        theta: f64,
        event: &dyn FilteredEvent,
        pol: Polarization,
        disallowed: u64,
    ) -> Result<()> {
        let CombinerConfig {
            nant: wanted,
            npad,
            use_unfiltered,
            deconvolve,
            group_delay,
        } = self.config;

        // A failed combine leaves empty outputs behind, never the previous event's.
        self.deconvolved_valid = false;
        let (t0, dt) = (self.coherent.t0(), self.coherent.dt());
        self.coherent.reset_even(t0, dt, 0);
        self.coherent_avg_spectrum.clear();
        self.selector
            .closest_antennas(phi, wanted, pol, disallowed, &mut self.antennas);
        debug_assert_eq!(
            self.antennas.len(),
            wanted,
            "antenna selection returned the wrong number of antennas"
        );
        if self.antennas.is_empty() {
            return Err(Error::NoAntennas);
        }
        let nant = self.antennas.len();

        self.padded.resize_with(nant, Waveform::default);
        if deconvolve {
            self.deconv.resize_with(nant, Waveform::default);
        }
        self.delays.clear();
        let mut all_responses = true;

        for (i, &ant) in self.antennas.iter().enumerate() {
            let source = if use_unfiltered {
                event.unfiltered(ant, pol)
            } else {
                event.filtered(ant, pol)
            };
            let wf = &mut self.padded[i];
            wf.clone_from(source);
            // The transform computed here is carried into the deconvolution copy.
            let power = wf.power()?;
            if i == 0 {
                self.coherent_avg_spectrum.assign(&power);
            } else {
                self.coherent_avg_spectrum.accumulate(&power);
            }

            if deconvolve {
                let response = self.responses[pol.index()]
                    .get(ant)
                    .and_then(|slot| slot.as_ref());
                match response {
                    Some(response) => {
                        let dwf = &mut self.deconv[i];
                        dwf.clone_from(wf);
                        response.deconvolve_in_place(dwf)?;
                        let power = dwf.power()?;
                        if i == 0 {
                            self.deconvolved_avg_spectrum.assign(&power);
                        } else {
                            self.deconvolved_avg_spectrum.accumulate(&power);
                        }
                        dwf.pad_freq(npad)?;
                    }
                    None => {
                        if all_responses {
                            warn!(
                                "No response for antenna {ant} {}-pol, deconvolved waveform unavailable",
                                pol.letter()
                            );
                        }
                        all_responses = false;
                    }
                }
            }

            wf.pad_freq(npad)?;

            let delay = if i == 0 {
                0.0
            } else {
                self.delay_model
                    .delta_t(ant, self.antennas[0], phi, theta, pol, group_delay)
            };
            self.delays.push(delay);
        }

        debug!(
            "combine phi={phi:.2} theta={theta:.2} {}-pol antennas={:?} delays={:?}",
            pol.letter(),
            self.antennas,
            self.delays
        );

        let scale = 1.0 / nant as f64;
        combine_waveforms_into(&self.padded[..nant], &self.delays, None, &mut self.coherent);
        self.coherent_avg_spectrum.scale(scale);

        if deconvolve && all_responses {
            combine_waveforms_into(
                &self.deconv[..nant],
                &self.delays,
                None,
                &mut self.deconvolved,
            );
            self.deconvolved_avg_spectrum.scale(scale);
            self.deconvolved_valid = true;
        }
        Ok(())
    }

    pub fn coherent(&self) -> &Waveform {
        &self.coherent
    }

    pub fn coherent_avg_spectrum(&self) -> &PowerSpectrum {
        &self.coherent_avg_spectrum
    }

    /// `None` unless deconvolution is on and the last combine had a response
    /// for every channel.
    pub fn deconvolved(&self) -> Option<&Waveform> {
        (self.config.deconvolve && self.deconvolved_valid).then_some(&self.deconvolved)
    }

    pub fn deconvolved_avg_spectrum(&self) -> Option<&PowerSpectrum> {
        (self.config.deconvolve && self.deconvolved_valid)
            .then_some(&self.deconvolved_avg_spectrum)
    }

    /// Antennas used by the last combine, reference first.
    pub fn antennas(&self) -> &[usize] {
        &self.antennas
    }

    /// Delay of each used antenna relative to the first.
    pub fn delays(&self) -> &[f64] {
        &self.delays
    }
}

/// Average `wfs`, each read `delays[j]` later, into a new waveform.
pub fn combine_waveforms(wfs: &[Waveform], delays: &[f64], scales: Option<&[f64]>) -> Waveform {
    let mut out = Waveform::default();
    combine_waveforms_into(wfs, delays, scales, &mut out);
    out
}

/// Reuses `out`'s buffer. The output grid starts at the earliest delayed
/// start time and shares the sample spacing of `wfs[0]`, which all inputs
/// must have. Sample `t` is `Σ wfs[j](t + delays[j]) · scales[j] / wfs.len()`.
pub fn combine_waveforms_into(
    wfs: &[Waveform],
    delays: &[f64],
    scales: Option<&[f64]>,
    out: &mut Waveform,
) {
    let Some(first) = wfs.first() else {
        let (t0, dt) = (out.t0(), out.dt());
        out.reset_even(t0, dt, 0);
        return;
    };
    debug_assert_eq!(wfs.len(), delays.len(), "one delay per waveform");
    debug_assert!(
        scales.map_or(true, |s| s.len() == wfs.len()),
        "one scale per waveform"
    );
    let dt = first.dt();
    debug_assert!(
        wfs.iter().all(|w| (w.dt() - dt).abs() <= 1e-9 * dt),
        "waveforms must share a sample spacing"
    );

    let mut start = f64::INFINITY;
    let mut end = f64::NEG_INFINITY;
    for (wf, &delay) in wfs.iter().zip(delays.iter()) {
        start = start.min(wf.t0() + delay);
        end = end.max(wf.last_time() + delay);
    }
    let n = ((end - start) / dt - SPAN_TOLERANCE).ceil().max(0.0) as usize;

    let nwf = wfs.len() as f64;
    let samples = out.reset_even(start, dt, n);
    for (k, sample) in samples.iter_mut().enumerate() {
        let t = start + k as f64 * dt;
        let mut value = 0.0;
        for (j, (wf, &delay)) in wfs.iter().zip(delays.iter()).enumerate() {
            let scale = scales.map_or(1.0, |s| s[j]);
            value += wf.eval_even(t + delay) * scale / nwf;
        }
        *sample = value;
    }
}
