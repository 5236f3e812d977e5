use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::event::Polarization;
use crate::utils::wrap_degrees;

/// Speed of light in m/ns
pub const C_M_PER_NS: f64 = 0.299_792_458;

/// Largest array a geometry file may describe.
pub const MAX_ANTENNAS: usize = 4096;

// --- Array Geometric Definitions ---
// Source direction vector (s): unit vector from the array towards the source.
//   phi is azimuth, theta is elevation above the horizontal plane (degrees):
//   s = (cos(theta) cos(phi), cos(theta) sin(phi), sin(theta))
// Antenna position vector (r): phase centre in the array frame, stored in
//   cylindrical form (r, phi, z).
// Arrival time (tau): tau_i = -(r_i . s) / C, plus the channel group delay
//   when that correction is enabled.
//   Positive tau_i means the signal arrives late.
// Pair delay: delta_t(a, b) = tau_a - tau_b, the time antenna a sees the
//   wavefront after antenna b.
// ----------------------------------

/// Chooses the antennas best placed to see a given azimuth.
pub trait AntennaSelector: Send + Sync {
    fn num_antennas(&self) -> usize;

    /// Fill `out` with up to `n` antennas ordered by azimuthal distance from
    /// `phi`, skipping any antenna whose bit is set in `disallowed`.
    fn closest_antennas(
        &self,
        phi: f64,
        n: usize,
        pol: Polarization,
        disallowed: u64,
        out: &mut Vec<usize>,
    );
}

/// Expected arrival-time differences across the array.
pub trait DelayModel: Send + Sync {
    fn delta_t(
        &self,
        ant_a: usize,
        ant_b: usize,
        phi: f64,
        theta: f64,
        pol: Polarization,
        group_delay: bool,
    ) -> f64;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AntennaPosition {
    /// Azimuth of the phase centre (degrees)
    pub phi: f64,
    /// Horizontal distance from the array axis (m)
    pub r: f64,
    /// Height (m)
    pub z: f64,
    /// Frequency-independent channel delay (ns)
    pub group_delay: f64,
}

impl AntennaPosition {
    pub fn new(phi: f64, r: f64, z: f64) -> Self {
        Self {
            phi,
            r,
            z,
            group_delay: 0.0,
        }
    }

    pub fn with_group_delay(mut self, group_delay: f64) -> Self {
        self.group_delay = group_delay;
        self
    }

    pub fn xyz(&self) -> [f64; 3] {
        let phi = self.phi.to_radians();
        [self.r * phi.cos(), self.r * phi.sin(), self.z]
    }
}

/// One ring of equally spaced antennas.
#[derive(Clone, Copy, Debug)]
pub struct RingSpec {
    pub count: usize,
    pub radius: f64,
    pub z: f64,
    pub phi_offset: f64,
}

pub fn direction_vector(phi: f64, theta: f64) -> [f64; 3] {
    let (phi, theta) = (phi.to_radians(), theta.to_radians());
    [
        theta.cos() * phi.cos(),
        theta.cos() * phi.sin(),
        theta.sin(),
    ]
}

/// Antenna phase centres for both polarizations. Built once and then shared
/// read-only between combiners.
#[derive(Debug, Clone)]
pub struct AntennaPositions {
    positions: [Vec<AntennaPosition>; 2],
}

impl AntennaPositions {
    pub fn new(hpol: Vec<AntennaPosition>, vpol: Vec<AntennaPosition>) -> Result<Self> {
        if hpol.is_empty() {
            return Err(Error::InvalidConfig("antenna table is empty".into()));
        }
        if hpol.len() != vpol.len() {
            return Err(Error::InvalidConfig(format!(
                "{} H-pol positions but {} V-pol positions",
                hpol.len(),
                vpol.len()
            )));
        }
        Ok(Self {
            positions: [hpol, vpol],
        })
    }

    /// Same phase centre for both polarizations.
    pub fn uniform(positions: Vec<AntennaPosition>) -> Result<Self> {
        Self::new(positions.clone(), positions)
    }

    /// Stacked rings, numbered ring by ring in increasing azimuth.
    pub fn from_rings(rings: &[RingSpec]) -> Result<Self> {
        let mut positions = Vec::new();
        for ring in rings {
            let step = 360.0 / ring.count.max(1) as f64;
            for i in 0..ring.count {
                let phi = wrap_degrees(ring.phi_offset + i as f64 * step).rem_euclid(360.0);
                positions.push(AntennaPosition::new(phi, ring.radius, ring.z));
            }
        }
        Self::uniform(positions)
    }

    /// Load a table or, for a `.xml` extension, an XML array description.
    pub fn from_file(path: &Path) -> Result<Self> {
        let is_xml = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case("xml"))
            .unwrap_or(false);
        let text = fs::read_to_string(path)?;
        let positions = if is_xml {
            crate::xml::parse_antenna_xml(&text)?
        } else {
            Self::parse_table(&text)?
        };
        debug!(
            "Loaded {} antenna positions from {}",
            positions.len(),
            path.display()
        );
        Ok(positions)
    }

    /// Whitespace table, one antenna per line: `index phi r z [group_delay]`.
    /// `#` starts a comment.
    pub fn parse_table(text: &str) -> Result<Self> {
        let mut slots: Vec<Option<AntennaPosition>> = Vec::new();
        for (line_idx, line) in text.lines().enumerate() {
            let line_no = line_idx + 1;
            let line = line.splitn(2, '#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 4 && fields.len() != 5 {
                return Err(Error::Parse {
                    line: line_no,
                    message: format!("expected 4 or 5 columns, found {}", fields.len()),
                });
            }
            let index = fields[0].parse::<usize>().map_err(|e| Error::Parse {
                line: line_no,
                message: format!("antenna index: {e}"),
            })?;
            let index = check_index(index, line_no)?;
            let mut numbers = [0.0f64; 4];
            for (slot, field) in numbers.iter_mut().zip(fields[1..].iter()) {
                *slot = field.parse::<f64>().map_err(|e| Error::Parse {
                    line: line_no,
                    message: format!("'{field}': {e}"),
                })?;
            }
            if index >= slots.len() {
                slots.resize(index + 1, None);
            }
            if slots[index].is_some() {
                return Err(Error::Parse {
                    line: line_no,
                    message: format!("antenna {index} listed twice"),
                });
            }
            slots[index] = Some(
                AntennaPosition::new(numbers[0], numbers[1], numbers[2])
                    .with_group_delay(numbers[3]),
            );
        }
        let positions = collect_complete(slots)?;
        Self::uniform(positions)
    }

    pub fn len(&self) -> usize {
        self.positions[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions[0].is_empty()
    }

    pub fn position(&self, antenna: usize, pol: Polarization) -> &AntennaPosition {
        &self.positions[pol.index()][antenna]
    }

    /// Geometric arrival time relative to the array origin (ns).
    pub fn geometric_delay(&self, antenna: usize, pol: Polarization, phi: f64, theta: f64) -> f64 {
        let r = self.position(antenna, pol).xyz();
        let s = direction_vector(phi, theta);
        -(r[0] * s[0] + r[1] * s[1] + r[2] * s[2]) / C_M_PER_NS
    }
}

pub(crate) fn check_index(index: usize, line: usize) -> Result<usize> {
    if index >= MAX_ANTENNAS {
        return Err(Error::Parse {
            line,
            message: format!("antenna index {index} exceeds the limit of {}", MAX_ANTENNAS - 1),
        });
    }
    Ok(index)
}

/// Every index from 0 up to the largest one seen must be present.
pub(crate) fn collect_complete(
    slots: Vec<Option<AntennaPosition>>,
) -> Result<Vec<AntennaPosition>> {
    slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| {
            slot.ok_or_else(|| Error::InvalidConfig(format!("antenna {idx} missing from table")))
        })
        .collect()
}

impl AntennaSelector for AntennaPositions {
    fn num_antennas(&self) -> usize {
        self.len()
    }

    fn closest_antennas(
        &self,
        phi: f64,
        n: usize,
        pol: Polarization,
        disallowed: u64,
        out: &mut Vec<usize>,
    ) {
        let mut candidates: Vec<(f64, usize)> = self.positions[pol.index()]
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx >= 64 || disallowed & (1u64 << idx) == 0)
            .map(|(idx, pos)| (wrap_degrees(pos.phi - phi).abs(), idx))
            .collect();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        out.clear();
        out.extend(candidates.into_iter().take(n).map(|(_, idx)| idx));
    }
}

impl DelayModel for AntennaPositions {
    fn delta_t(
        &self,
        ant_a: usize,
        ant_b: usize,
        phi: f64,
        theta: f64,
        pol: Polarization,
        group_delay: bool,
    ) -> f64 {
        // Baseline form: delta_t(a, a) is exactly zero.
        let a = self.position(ant_a, pol);
        let b = self.position(ant_b, pol);
        let (ra, rb) = (a.xyz(), b.xyz());
        let s = direction_vector(phi, theta);
        let baseline = [ra[0] - rb[0], ra[1] - rb[1], ra[2] - rb[2]];
        let mut delay = -(baseline[0] * s[0] + baseline[1] * s[1] + baseline[2] * s[2]) / C_M_PER_NS;
        if group_delay {
            delay += a.group_delay - b.group_delay;
        }
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn two_rings() -> AntennaPositions {
        AntennaPositions::from_rings(&[
            RingSpec {
                count: 8,
                radius: 1.0,
                z: 1.0,
                phi_offset: 0.0,
            },
            RingSpec {
                count: 8,
                radius: 2.0,
                z: -1.0,
                phi_offset: 22.5,
            },
        ])
        .unwrap()
    }

    #[test]
    fn rings_are_numbered_in_azimuth_order() {
        let geom = two_rings();
        assert_eq!(geom.len(), 16);
        assert_abs_diff_eq!(geom.position(2, Polarization::Vertical).phi, 90.0, epsilon = 1e-12);
        assert_abs_diff_eq!(geom.position(8, Polarization::Horizontal).phi, 22.5, epsilon = 1e-12);
    }

    #[test]
    fn closest_antennas_follow_azimuth_with_wraparound() {
        let geom = two_rings();
        let mut out = Vec::new();
        geom.closest_antennas(355.0, 3, Polarization::Horizontal, 0, &mut out);
        // 0 deg (5 away), then 337.5 deg (ant 15, 17.5 away), then 22.5 deg (ant 8, 27.5 away)
        assert_eq!(out, vec![0, 15, 8]);
    }

    #[test]
    fn closest_antennas_respect_disallowed_mask() {
        let geom = two_rings();
        let mut out = Vec::new();
        geom.closest_antennas(0.0, 2, Polarization::Horizontal, 1 << 0, &mut out);
        assert_eq!(out, vec![8, 15]);
        geom.closest_antennas(0.0, 40, Polarization::Horizontal, 0b11, &mut out);
        assert_eq!(out.len(), 14);
        assert!(!out.contains(&0) && !out.contains(&1));
    }

    #[test]
    fn delta_t_matches_plane_wave_formula() {
        let geom = two_rings();
        let (phi, theta) = (40.0, 15.0);
        let pol = Polarization::Horizontal;
        for (a, b) in [(0usize, 1usize), (3, 12), (7, 7)] {
            let expected = geom.geometric_delay(a, pol, phi, theta)
                - geom.geometric_delay(b, pol, phi, theta);
            let got = geom.delta_t(a, b, phi, theta, pol, false);
            assert_abs_diff_eq!(got, expected, epsilon = 1e-9);
            let reverse = geom.delta_t(b, a, phi, theta, pol, false);
            assert_abs_diff_eq!(got, -reverse, epsilon = 1e-12);
        }
    }

    #[test]
    fn facing_antenna_sees_wavefront_first() {
        let geom = two_rings();
        // antenna 0 faces phi=0, antenna 4 faces phi=180; both on the top ring
        let dt = geom.delta_t(4, 0, 0.0, 0.0, Polarization::Horizontal, false);
        assert_abs_diff_eq!(dt, 2.0 / C_M_PER_NS, epsilon = 1e-9);
    }

    #[test]
    fn group_delay_only_applies_when_enabled() {
        let positions = vec![
            AntennaPosition::new(0.0, 1.0, 0.0).with_group_delay(0.5),
            AntennaPosition::new(90.0, 1.0, 0.0).with_group_delay(2.0),
        ];
        let geom = AntennaPositions::uniform(positions).unwrap();
        let pol = Polarization::Vertical;
        let without = geom.delta_t(1, 0, 30.0, 0.0, pol, false);
        let with = geom.delta_t(1, 0, 30.0, 0.0, pol, true);
        assert_abs_diff_eq!(with - without, 1.5, epsilon = 1e-12);
    }

    #[test]
    fn parse_table_reads_columns_and_comments() {
        let text = "# idx phi r z gd\n1 90 1.0 0.5 0.25\n0 0 1.0 0.5   # reference\n\n";
        let geom = AntennaPositions::parse_table(text).unwrap();
        assert_eq!(geom.len(), 2);
        let p = geom.position(1, Polarization::Horizontal);
        assert_eq!((p.phi, p.r, p.z, p.group_delay), (90.0, 1.0, 0.5, 0.25));
        assert_eq!(geom.position(0, Polarization::Vertical).group_delay, 0.0);
    }

    #[test]
    fn parse_table_reports_gaps_and_bad_lines() {
        assert!(matches!(
            AntennaPositions::parse_table("0 0 1 0\n2 90 1 0\n"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            AntennaPositions::parse_table("0 0 1\n"),
            Err(Error::Parse { line: 1, .. })
        ));
        assert!(matches!(
            AntennaPositions::parse_table("0 0 1 0\n0 0 1 0\n"),
            Err(Error::Parse { line: 2, .. })
        ));
        assert!(matches!(
            AntennaPositions::parse_table("0 0 1 0\n99999999999 0 1 0\n"),
            Err(Error::Parse { line: 2, .. })
        ));
    }
}
