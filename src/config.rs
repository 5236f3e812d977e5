//! Combiner and resolution parameters, and the `key = value` settings file
//! that carries them.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CombinerConfig {
    /// Number of antennas combined per direction
    pub nant: usize,
    /// Frequency-domain zero-padding factor
    pub npad: usize,
    pub use_unfiltered: bool,
    pub deconvolve: bool,
    pub group_delay: bool,
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self {
            nant: 15,
            npad: 3,
            use_unfiltered: false,
            deconvolve: false,
            group_delay: true,
        }
    }
}

impl CombinerConfig {
    pub fn validate(&self, total_antennas: usize) -> Result<()> {
        if self.nant == 0 || self.nant > total_antennas {
            return Err(Error::InvalidConfig(format!(
                "nantennas must be in 1..={total_antennas}, got {}",
                self.nant
            )));
        }
        if self.npad == 0 {
            return Err(Error::InvalidConfig("npad must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolutionConfig {
    pub dphi: f64,
    pub dtheta: f64,
    pub rho: f64,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            dphi: 0.5,
            dtheta: 0.3,
            rho: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisSettings {
    pub combiner: CombinerConfig,
    pub resolution: ResolutionConfig,
    pub saturation_threshold: f64,
    /// Antenna table or XML description
    pub antennas: Option<PathBuf>,
    /// Directory of per-channel response tables
    pub responses: Option<PathBuf>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            combiner: CombinerConfig::default(),
            resolution: ResolutionConfig::default(),
            saturation_threshold: 1000.0,
            antennas: None,
            responses: None,
        }
    }
}

fn parse_value<T>(params: &HashMap<String, (usize, String)>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match params.get(key) {
        None => Ok(None),
        Some((line, raw)) => raw.parse::<T>().map(Some).map_err(|e| Error::Parse {
            line: *line,
            message: format!("{key} = '{raw}': {e}"),
        }),
    }
}

fn parse_flag(params: &HashMap<String, (usize, String)>, key: &str) -> Result<Option<bool>> {
    match params.get(key) {
        None => Ok(None),
        Some((line, raw)) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(Error::Parse {
                line: *line,
                message: format!("{key} = '{raw}' is not a boolean"),
            }),
        },
    }
}

impl AnalysisSettings {
    /// Keys are matched case-insensitively with underscores ignored. Relative
    /// paths are resolved against the settings file's directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut params = HashMap::new();
        for (line_idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.splitn(2, '#').next().unwrap_or("").trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let Some(index) = line.find('=') else {
                return Err(Error::Parse {
                    line: line_idx + 1,
                    message: format!("expected 'key = value', found '{line}'"),
                });
            };
            let (key, value) = line.split_at(index);
            let key = key.trim().to_ascii_lowercase().replace('_', "");
            let value = value
                .trim_start_matches('=')
                .trim()
                .trim_matches('"')
                .trim_matches('\'')
                .to_string();
            params.insert(key, (line_idx + 1, value));
        }

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let resolve = |key: &str| {
            params.get(key).map(|(_, raw)| {
                let p = PathBuf::from(raw);
                if p.is_relative() {
                    base.join(p)
                } else {
                    p
                }
            })
        };

        let defaults = AnalysisSettings::default();
        let combiner = CombinerConfig {
            nant: parse_value(&params, "nantennas")?.unwrap_or(defaults.combiner.nant),
            npad: parse_value(&params, "npad")?.unwrap_or(defaults.combiner.npad),
            use_unfiltered: parse_flag(&params, "unfiltered")?
                .unwrap_or(defaults.combiner.use_unfiltered),
            deconvolve: parse_flag(&params, "deconvolve")?.unwrap_or(defaults.combiner.deconvolve),
            group_delay: parse_flag(&params, "groupdelay")?
                .unwrap_or(defaults.combiner.group_delay),
        };
        let resolution = ResolutionConfig {
            dphi: parse_value(&params, "dphi")?.unwrap_or(defaults.resolution.dphi),
            dtheta: parse_value(&params, "dtheta")?.unwrap_or(defaults.resolution.dtheta),
            rho: parse_value(&params, "rho")?.unwrap_or(defaults.resolution.rho),
        };

        Ok(Self {
            combiner,
            resolution,
            saturation_threshold: parse_value(&params, "saturation")?
                .unwrap_or(defaults.saturation_threshold),
            antennas: resolve("antennas"),
            responses: resolve("responses"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn settings_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.cfg");
        let mut file = File::create(&path).unwrap();
        writeln!(
            file,
            "# combiner\nN_Antennas = 9\nnpad=2\nDeconvolve = yes\ngroup_delay = 0\n\
             dphi = 0.7 # wider\nsaturation = 500\nantennas = \"geom/array.xml\"\n; disabled line\n"
        )
        .unwrap();

        let settings = AnalysisSettings::from_file(&path).unwrap();
        assert_eq!(settings.combiner.nant, 9);
        assert_eq!(settings.combiner.npad, 2);
        assert!(settings.combiner.deconvolve);
        assert!(!settings.combiner.group_delay);
        assert!(!settings.combiner.use_unfiltered);
        assert_eq!(settings.resolution.dphi, 0.7);
        assert_eq!(settings.resolution.dtheta, 0.3);
        assert_eq!(settings.saturation_threshold, 500.0);
        assert_eq!(settings.antennas, Some(dir.path().join("geom/array.xml")));
        assert_eq!(settings.responses, None);
    }

    #[test]
    fn bad_values_report_their_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.cfg");
        std::fs::write(&path, "npad = 3\nrho = lots\n").unwrap();
        assert!(matches!(
            AnalysisSettings::from_file(&path),
            Err(Error::Parse { line: 2, .. })
        ));
        std::fs::write(&path, "deconvolve = maybe\n").unwrap();
        assert!(AnalysisSettings::from_file(&path).is_err());
        std::fs::write(&path, "just words\n").unwrap();
        assert!(AnalysisSettings::from_file(&path).is_err());
    }

    #[test]
    fn combiner_config_validation() {
        let config = CombinerConfig::default();
        assert!(config.validate(48).is_ok());
        assert!(config.validate(10).is_err());
        assert!(CombinerConfig { npad: 0, ..config }.validate(48).is_err());
        assert!(CombinerConfig { nant: 0, ..config }.validate(48).is_err());
    }
}
