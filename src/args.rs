use std::path::PathBuf;

use clap::Parser;

use coherent_array::utils::DynError;
use coherent_array::{AnalysisSettings, DeconvolutionMethod, Polarization, RingSpec};

pub const DEFAULT_EVENTS: usize = 16;

/// Three stacked 16-antenna rings, the middle and bottom ones offset by half
/// a sector.
pub const DEFAULT_RINGS: [RingSpec; 3] = [
    RingSpec {
        count: 16,
        radius: 1.0,
        z: 2.5,
        phi_offset: 0.0,
    },
    RingSpec {
        count: 16,
        radius: 2.0,
        z: 0.0,
        phi_offset: 11.25,
    },
    RingSpec {
        count: 16,
        radius: 2.0,
        z: -1.5,
        phi_offset: 11.25,
    },
];

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Coherent combination of simulated broadband array events",
    long_about = None,
    after_help = "Examples:\n  coherent_array --events 32 --phi 40 --theta -12\n  coherent_array --config analysis.cfg --antennas array.xml --responses resp/ --deconvolve --output summary.txt\n  coherent_array --source-phi 40 --phi 42 --pol v --plot plots/ --cpu 4\n"
)]
pub struct Args {
    /// Settings file (key = value) providing defaults for the options below
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Antenna table or XML array description (default: built-in three-ring array)
    #[arg(long)]
    pub antennas: Option<PathBuf>,

    /// Directory of per-channel response tables named NN{H|V}.txt
    #[arg(long)]
    pub responses: Option<PathBuf>,

    /// Deconvolution method for loaded responses
    #[arg(
        long,
        default_value = "allpass",
        value_parser = clap::builder::PossibleValuesParser::new(["allpass", "naive"])
    )]
    pub method: String,

    /// Magnitude floor below which naive deconvolution zeroes a bin
    #[arg(long, default_value_t = 1e-3)]
    pub floor: f64,

    /// Number of events to simulate
    #[arg(long, default_value_t = DEFAULT_EVENTS)]
    pub events: usize,

    /// Source azimuth in degrees
    #[arg(long = "source-phi", allow_hyphen_values = true, default_value_t = 30.0)]
    pub source_phi: f64,

    /// Source elevation in degrees
    #[arg(long = "source-theta", allow_hyphen_values = true, default_value_t = -10.0)]
    pub source_theta: f64,

    /// Trial azimuth for the combination (default: source azimuth)
    #[arg(long, allow_hyphen_values = true)]
    pub phi: Option<f64>,

    /// Trial elevation for the combination (default: source elevation)
    #[arg(long, allow_hyphen_values = true)]
    pub theta: Option<f64>,

    /// Polarization to combine
    #[arg(
        long,
        default_value = "h",
        value_parser = clap::builder::PossibleValuesParser::new(["h", "v"])
    )]
    pub pol: String,

    /// Pulse amplitude in the simulated polarization
    #[arg(long, default_value_t = 100.0)]
    pub amplitude: f64,

    /// RMS of the additive Gaussian noise
    #[arg(long, default_value_t = 5.0)]
    pub noise: f64,

    /// Samples per simulated channel
    #[arg(long, default_value_t = 256)]
    pub samples: usize,

    /// Nominal sample spacing in ns
    #[arg(long, default_value_t = 0.5)]
    pub dt: f64,

    /// Random seed; event k uses seed + k
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Comma-separated antennas excluded from every combination
    #[arg(long)]
    pub disallow: Option<String>,

    /// Number of antennas to combine
    #[arg(long)]
    pub nant: Option<usize>,

    /// Frequency-domain zero-padding factor
    #[arg(long)]
    pub npad: Option<usize>,

    /// Combine unfiltered rather than DC-filtered waveforms
    #[arg(long)]
    pub unfiltered: bool,

    /// Deconvolve the channel responses
    #[arg(long)]
    pub deconvolve: bool,

    /// Do not correct channel group delays
    #[arg(long = "no-group-delay")]
    pub no_group_delay: bool,

    /// Azimuthal pointing resolution in degrees
    #[arg(long)]
    pub dphi: Option<f64>,

    /// Elevation pointing resolution in degrees
    #[arg(long)]
    pub dtheta: Option<f64>,

    /// Correlation between the azimuth and elevation errors
    #[arg(long, allow_hyphen_values = true)]
    pub rho: Option<f64>,

    /// Saturation threshold on raw volts
    #[arg(long)]
    pub saturation: Option<f64>,

    /// Output file for the per-event summary (default: stdout)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Directory for plots of the first event
    #[arg(long)]
    pub plot: Option<PathBuf>,

    /// Number of parallel worker threads
    #[arg(long, default_value_t = 2)]
    pub cpu: usize,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    pub fn polarization(&self) -> Result<Polarization, DynError> {
        Polarization::from_letter(&self.pol)
            .ok_or_else(|| format!("unknown polarization '{}'", self.pol).into())
    }

    pub fn deconvolution_method(&self) -> DeconvolutionMethod {
        match self.method.as_str() {
            "naive" => DeconvolutionMethod::Naive { floor: self.floor },
            _ => DeconvolutionMethod::AllPass,
        }
    }

    /// Settings file values (or defaults) with command-line overrides applied.
    pub fn resolve_settings(&self) -> Result<AnalysisSettings, DynError> {
        let mut settings = match &self.config {
            Some(path) => AnalysisSettings::from_file(path)?,
            None => AnalysisSettings::default(),
        };
        if let Some(nant) = self.nant {
            settings.combiner.nant = nant;
        }
        if let Some(npad) = self.npad {
            settings.combiner.npad = npad;
        }
        if self.unfiltered {
            settings.combiner.use_unfiltered = true;
        }
        if self.deconvolve {
            settings.combiner.deconvolve = true;
        }
        if self.no_group_delay {
            settings.combiner.group_delay = false;
        }
        if let Some(dphi) = self.dphi {
            settings.resolution.dphi = dphi;
        }
        if let Some(dtheta) = self.dtheta {
            settings.resolution.dtheta = dtheta;
        }
        if let Some(rho) = self.rho {
            settings.resolution.rho = rho;
        }
        if let Some(threshold) = self.saturation {
            settings.saturation_threshold = threshold;
        }
        if self.antennas.is_some() {
            settings.antennas = self.antennas.clone();
        }
        if self.responses.is_some() {
            settings.responses = self.responses.clone();
        }
        Ok(settings)
    }
}

/// Parse a comma-separated antenna list into a bit mask.
pub fn parse_antenna_mask(list: Option<&str>) -> Result<u64, DynError> {
    let Some(list) = list else {
        return Ok(0);
    };
    let mut mask = 0u64;
    for entry in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let antenna = entry.parse::<usize>()?;
        if antenna >= 64 {
            return Err(format!("antenna {antenna} cannot be masked (limit is 63)").into());
        }
        mask |= 1u64 << antenna;
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn antenna_mask_from_list() {
        assert_eq!(parse_antenna_mask(None).unwrap(), 0);
        assert_eq!(parse_antenna_mask(Some("0, 3,5,")).unwrap(), 0b101001);
        assert!(parse_antenna_mask(Some("64")).is_err());
        assert!(parse_antenna_mask(Some("x")).is_err());
    }

    #[test]
    fn command_line_overrides_defaults() {
        let args = Args::parse_from([
            "coherent_array",
            "--nant",
            "7",
            "--deconvolve",
            "--no-group-delay",
            "--rho",
            "-0.2",
            "--method",
            "naive",
        ]);
        let settings = args.resolve_settings().unwrap();
        assert_eq!(settings.combiner.nant, 7);
        assert_eq!(settings.combiner.npad, 3);
        assert!(settings.combiner.deconvolve);
        assert!(!settings.combiner.group_delay);
        assert_eq!(settings.resolution.rho, -0.2);
        assert_eq!(
            args.deconvolution_method(),
            DeconvolutionMethod::Naive { floor: 1e-3 }
        );
        assert_eq!(args.polarization().unwrap(), Polarization::Horizontal);
    }
}
