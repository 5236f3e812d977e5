use crate::event::{ChannelVolts, Polarization};

/// Per-antenna saturation bits and the number of saturated channels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SaturationFlags {
    pub hpol: u64,
    pub vpol: u64,
    pub count: usize,
}

impl SaturationFlags {
    /// Antennas saturated in either polarization, usable as a disallowed mask.
    pub fn combined(&self) -> u64 {
        self.hpol | self.vpol
    }

    pub fn mask(&self, pol: Polarization) -> u64 {
        match pol {
            Polarization::Horizontal => self.hpol,
            Polarization::Vertical => self.vpol,
        }
    }
}

/// Flag every channel with a sample whose magnitude exceeds `threshold`.
/// A channel counts once however many samples exceed it. Antennas beyond
/// bit 63 are counted but cannot be masked.
pub fn check_saturation(event: &dyn ChannelVolts, threshold: f64) -> SaturationFlags {
    let mut flags = SaturationFlags::default();
    for antenna in 0..event.num_antennas() {
        for pol in Polarization::ALL {
            if !event.volts(antenna, pol).iter().any(|v| v.abs() > threshold) {
                continue;
            }
            flags.count += 1;
            if antenna < 64 {
                let bit = 1u64 << antenna;
                match pol {
                    Polarization::Horizontal => flags.hpol |= bit,
                    Polarization::Vertical => flags.vpol |= bit,
                }
            }
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventWaveforms;
    use crate::waveform::Waveform;

    fn channel(peak: f64) -> Waveform {
        Waveform::from_even(0.0, 1.0, vec![0.0, peak, -peak, 0.5 * peak])
    }

    #[test]
    fn distinct_masks_and_one_count_per_channel() {
        let hpol = vec![channel(10.0), channel(2000.0), channel(1.0)];
        let vpol = vec![channel(-1500.0), channel(3000.0), channel(999.0)];
        let event = EventWaveforms::new(hpol, vpol);
        let flags = check_saturation(&event, 1000.0);
        assert_eq!(flags.hpol, 0b010);
        assert_eq!(flags.vpol, 0b011);
        assert_eq!(flags.count, 3);
        assert_eq!(flags.combined(), 0b011);
        assert_eq!(flags.mask(Polarization::Vertical), 0b011);
        assert_eq!(check_saturation(&event, 1000.0), flags);
    }

    #[test]
    fn off_grid_raw_sample_saturates() {
        let spike = Waveform::from_uneven(vec![0.0, 0.3, 1.0], vec![0.0, 1500.0, 0.0], 1.0).unwrap();
        assert!(spike.even().iter().all(|v| v.abs() <= 1000.0));
        let quiet = Waveform::from_even(0.0, 1.0, vec![0.0, 0.0]);
        let event = EventWaveforms::new(vec![spike], vec![quiet]);
        let flags = check_saturation(&event, 1000.0);
        assert_eq!(flags.count, 1);
        assert_eq!(flags.hpol, 0b1);
        assert_eq!(flags.vpol, 0);
    }

    #[test]
    fn threshold_is_exclusive() {
        let event = EventWaveforms::new(vec![channel(1000.0)], vec![channel(0.0)]);
        assert_eq!(check_saturation(&event, 1000.0), SaturationFlags::default());
    }
}
