mod args;
mod plot;

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use coherent_array::sim::{remove_dc, PulseSimulation};
use coherent_array::utils::DynError;
use coherent_array::{
    check_saturation, AntennaPositions, ConstantPointingResolutionModel, EventSummary, Peak,
    PointingResolutionModel, Polarization, PowerSpectrum, SaturationFlags, Waveform,
    WaveformCombiner,
};

use plot::{plot_spectra, plot_waveforms, BLUE, RED};

/// Read-only inputs shared by every worker.
struct EventContext<'a> {
    geometry: &'a AntennaPositions,
    sim: &'a PulseSimulation,
    model: &'a ConstantPointingResolutionModel,
    saturation_threshold: f64,
    disallowed: u64,
    nant: usize,
    pol: Polarization,
    phi: f64,
    theta: f64,
    seed: u64,
}

struct FirstEvent {
    coherent: Waveform,
    spectrum: PowerSpectrum,
    deconvolved: Option<(Waveform, PowerSpectrum)>,
}

struct EventResult {
    event: u64,
    saturation: SaturationFlags,
    antennas: usize,
    peak_time: f64,
    peak_value: f64,
    envelope_peak: f64,
    spectrum_peak: f64,
    deconvolved_peak: Option<f64>,
    probability: f64,
    first: Option<FirstEvent>,
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn usable_antennas(total: usize, disallowed: u64) -> usize {
    (0..total)
        .filter(|&i| i >= 64 || disallowed & (1u64 << i) == 0)
        .count()
}

fn process_event(
    combiner: &mut WaveformCombiner,
    ctx: &EventContext<'_>,
    event: u64,
) -> coherent_array::Result<EventResult> {
    let mut rng = StdRng::seed_from_u64(ctx.seed.wrapping_add(event));
    let raw = ctx.sim.simulate(ctx.geometry, &mut rng)?;
    let saturation = check_saturation(&raw, ctx.saturation_threshold);
    let filtered = remove_dc(&raw)?;
    let disallowed = ctx.disallowed | saturation.combined();

    let mut result = EventResult {
        event,
        saturation,
        antennas: 0,
        peak_time: f64::NAN,
        peak_value: f64::NAN,
        envelope_peak: f64::NAN,
        spectrum_peak: f64::NAN,
        deconvolved_peak: None,
        probability: f64::NAN,
        first: None,
    };
    let usable = usable_antennas(ctx.geometry.len(), disallowed);
    if usable < ctx.nant {
        warn!(
            "Event {event}: only {usable} usable antennas ({} saturated channels), skipping",
            saturation.count
        );
        return Ok(result);
    }

    combiner.combine(ctx.phi, ctx.theta, &filtered, ctx.pol, disallowed)?;
    let coherent = combiner.coherent();
    result.antennas = combiner.antennas().len();
    if let Some((t, value)) = coherent.peak_abs() {
        result.peak_time = t;
        result.peak_value = value;
    }
    result.envelope_peak = coherent
        .clone()
        .hilbert_envelope()?
        .into_iter()
        .fold(0.0, f64::max);
    result.spectrum_peak = combiner
        .coherent_avg_spectrum()
        .peak()
        .map_or(f64::NAN, |(f, _)| f);
    result.deconvolved_peak = combiner
        .deconvolved()
        .and_then(|wf| wf.peak_abs())
        .map(|(_, value)| value);

    let mut summary = EventSummary::new(event);
    summary.push_peak(
        ctx.pol,
        Peak {
            phi: ctx.phi,
            theta: ctx.theta,
            value: result.peak_value.abs(),
        },
    );
    let resolution = ctx.model.compute_pointing_resolution(&summary, ctx.pol, 0)?;
    result.probability = resolution.compute_probability(ctx.sim.phi, ctx.sim.theta);

    if event == 0 {
        result.first = Some(FirstEvent {
            coherent: coherent.clone(),
            spectrum: combiner.coherent_avg_spectrum().clone(),
            deconvolved: combiner
                .deconvolved()
                .cloned()
                .zip(combiner.deconvolved_avg_spectrum().cloned()),
        });
    }
    debug!(
        "Event {event}: peak {:.3} at {:.3} ns, envelope {:.3}, p={:.4e}",
        result.peak_value, result.peak_time, result.envelope_peak, result.probability
    );
    Ok(result)
}

fn write_summary<W: Write>(out: &mut W, results: &[EventResult]) -> io::Result<()> {
    writeln!(
        out,
        "# event nsat hsat vsat nant peak_t_ns peak envelope spec_peak_ghz deconv_peak probability"
    )?;
    for r in results {
        writeln!(
            out,
            "{:6} {:3} {:#018x} {:#018x} {:3} {:10.4} {:10.4} {:10.4} {:8.4} {:10.4} {:12.5e}",
            r.event,
            r.saturation.count,
            r.saturation.hpol,
            r.saturation.vpol,
            r.antennas,
            r.peak_time,
            r.peak_value,
            r.envelope_peak,
            r.spectrum_peak,
            r.deconvolved_peak.unwrap_or(f64::NAN),
            r.probability,
        )?;
    }
    out.flush()
}

fn write_plots(dir: &Path, first: &FirstEvent) -> Result<(), DynError> {
    fs::create_dir_all(dir)?;
    let waveform_path = dir.join("coherent.png");
    let spectrum_path = dir.join("spectrum.png");
    let waveform_file = waveform_path.to_str().ok_or("Plot path is not valid UTF-8")?;
    let spectrum_file = spectrum_path.to_str().ok_or("Plot path is not valid UTF-8")?;

    let mut waveforms = vec![(&first.coherent, &BLUE, "coherent")];
    let mut spectra = vec![(&first.spectrum, &BLUE, "coherent")];
    if let Some((wf, spectrum)) = &first.deconvolved {
        waveforms.push((wf, &RED, "deconvolved"));
        spectra.push((spectrum, &RED, "deconvolved"));
    }
    plot_waveforms(waveform_file, &waveforms)?;
    plot_spectra(spectrum_file, &spectra)?;
    info!("Wrote {} and {}", waveform_path.display(), spectrum_path.display());
    Ok(())
}

fn main() -> Result<(), DynError> {
    let args = args::Args::parse();
    init_logging(args.debug);

    let available_cores = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) } as usize;
    if args.cpu == 0 {
        return Err("--cpu must be at least 1".into());
    }
    if args.cpu > available_cores {
        return Err(format!(
            "--cpu value ({}) exceeds the number of available cores ({})",
            args.cpu, available_cores
        )
        .into());
    }
    if args.events == 0 {
        return Err("--events must be at least 1".into());
    }

    let settings = args.resolve_settings()?;
    let pol = args.polarization()?;

    let geometry = Arc::new(match &settings.antennas {
        Some(path) => AntennaPositions::from_file(path)?,
        None => AntennaPositions::from_rings(&args::DEFAULT_RINGS)?,
    });
    info!("Array has {} antennas", geometry.len());

    let mut prototype = WaveformCombiner::new(settings.combiner, geometry.clone())?;
    match &settings.responses {
        Some(dir) => {
            let loaded = prototype.load_responses_from_dir(dir, args.deconvolution_method())?;
            info!("Loaded {loaded} channel responses from {}", dir.display());
        }
        None if settings.combiner.deconvolve => {
            warn!("Deconvolution requested without a response directory; no deconvolved output");
        }
        None => {}
    }

    let model = ConstantPointingResolutionModel::new(
        settings.resolution.dphi,
        settings.resolution.dtheta,
        settings.resolution.rho,
    )?;

    let sim = PulseSimulation {
        phi: args.source_phi,
        theta: args.source_theta,
        pol,
        amplitude: args.amplitude,
        noise_rms: args.noise,
        n_samples: args.samples,
        dt: args.dt,
        ..PulseSimulation::default()
    };
    let ctx = EventContext {
        geometry: &geometry,
        sim: &sim,
        model: &model,
        saturation_threshold: settings.saturation_threshold,
        disallowed: args::parse_antenna_mask(args.disallow.as_deref())?,
        nant: settings.combiner.nant,
        pol,
        phi: args.phi.unwrap_or(args.source_phi),
        theta: args.theta.unwrap_or(args.source_theta),
        seed: args.seed,
    };

    rayon::ThreadPoolBuilder::new()
        .num_threads(args.cpu)
        .build_global()
        .map_err(|_| "Failed to initialise rayon thread pool")?;

    info!(
        "Combining {} events at phi={:.2} theta={:.2} ({}-pol, {} antennas, npad={}) on {} threads",
        args.events,
        ctx.phi,
        ctx.theta,
        pol.letter(),
        settings.combiner.nant,
        settings.combiner.npad,
        args.cpu
    );

    let mut results = (0..args.events as u64)
        .into_par_iter()
        .map_init(
            || prototype.clone(),
            |combiner, event| process_event(combiner, &ctx, event),
        )
        .collect::<coherent_array::Result<Vec<_>>>()?;
    results.sort_by_key(|r| r.event);

    let combined: Vec<&EventResult> = results.iter().filter(|r| r.antennas > 0).collect();
    if combined.is_empty() {
        warn!("No event could be combined");
    } else {
        let n = combined.len() as f64;
        let mean_peak = combined.iter().map(|r| r.peak_value.abs()).sum::<f64>() / n;
        let mean_prob = combined.iter().map(|r| r.probability).sum::<f64>() / n;
        info!(
            "{} of {} events combined, mean |peak| {:.3}, mean probability at source {:.4e}",
            combined.len(),
            results.len(),
            mean_peak,
            mean_prob
        );
    }

    match &args.output {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            write_summary(&mut writer, &results)?;
            info!("Wrote summary to {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            write_summary(&mut writer, &results)?;
        }
    }

    if let Some(dir) = &args.plot {
        match results.iter().find_map(|r| r.first.as_ref()) {
            Some(first) => write_plots(dir, first)?,
            None => warn!("First event was not combined; nothing to plot"),
        }
    }
    Ok(())
}
