//! Synthetic thermocouple data.
//!
//! Used when no card can be opened. Each channel drifts smoothly around a base
//! temperature of `20 + 2·(n-1)` °C. With the `smooth_noise` feature the drift is
//! one-dimensional gradient noise sampled on a very slow time scale; without it
//! the generator falls back to a slow sinusoid with a per-channel phase.
//!
//! The generator is seedable: two sources built with the same seed produce the
//! same value for the same channel and instant.

use crate::channel::{ChannelId, CHANNEL_COUNT};
#[cfg(feature = "smooth_noise")]
use rand::{seq::SliceRandom, Rng, SeedableRng};
#[cfg(feature = "smooth_noise")]
use rand_chacha::ChaCha8Rng;

/// Approximate type-K sensitivity, used to fabricate a plausible signal voltage.
const MV_PER_DEGREE: f64 = 0.041;

#[cfg(feature = "smooth_noise")]
const TIME_SCALE: f64 = 0.001;
#[cfg(feature = "smooth_noise")]
const NOISE_AMPLITUDE: f64 = 10.0;

const SINE_AMPLITUDE: f64 = 2.5;
const SINE_PERIOD_DIVISOR: f64 = 15.0;
const SINE_PHASE_STEP: f64 = 0.6;

/// One-dimensional gradient ("Perlin") noise with a seeded lattice.
#[cfg(feature = "smooth_noise")]
#[derive(Debug, Clone)]
pub struct GradientNoise {
    permutation: [u8; 256],
    gradients: [f64; 256],
}

#[cfg(feature = "smooth_noise")]
impl GradientNoise {
    /// Build a lattice from a seed.
    pub fn new(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut permutation: [u8; 256] = std::array::from_fn(|i| i as u8);
        permutation.shuffle(&mut rng);
        let gradients = std::array::from_fn(|_| rng.gen_range(-1.0..=1.0));
        Self {
            permutation,
            gradients,
        }
    }

    fn gradient(&self, lattice: i64) -> f64 {
        let idx = self.permutation[(lattice & 0xff) as usize];
        self.gradients[usize::from(idx)]
    }

    /// Sample the noise at `x`. Output lies in [-0.5, 0.5] and is zero on
    /// lattice points.
    pub fn sample(&self, x: f64) -> f64 {
        let x0 = x.floor();
        let t = x - x0;
        let lattice = x0 as i64;
        let g0 = self.gradient(lattice);
        let g1 = self.gradient(lattice + 1);
        let fade = t * t * t * (t * (t * 6.0 - 15.0) + 10.0);
        let a = g0 * t;
        let b = g1 * (t - 1.0);
        a + fade * (b - a)
    }
}

/// Synthetic data generator.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    #[cfg(feature = "smooth_noise")]
    generators: Vec<GradientNoise>,
}

impl SyntheticSource {
    /// Build a generator. `seed` offsets every channel's lattice; `None` uses
    /// fresh entropy.
    pub fn new(seed: Option<u64>) -> Self {
        #[cfg(feature = "smooth_noise")]
        {
            let base = seed.unwrap_or_else(rand::random);
            let generators = (0..CHANNEL_COUNT as u64)
                .map(|ch| GradientNoise::new(base.wrapping_add(ch)))
                .collect();
            Self { generators }
        }
        #[cfg(not(feature = "smooth_noise"))]
        {
            let _ = seed;
            Self {}
        }
    }

    /// Name of the active generator, for diagnostics.
    pub fn generator_name(&self) -> &'static str {
        if cfg!(feature = "smooth_noise") {
            "gradient noise"
        } else {
            "sine wave (fallback)"
        }
    }

    /// Temperature for a channel at `t_secs` (seconds since the Unix epoch),
    /// rounded to 0.1 °C.
    pub fn temperature_at(&self, channel: ChannelId, t_secs: f64) -> f64 {
        let idx = channel.index();
        let base = 20.0 + idx as f64 * 2.0;
        let value = base + self.drift(idx, t_secs);
        (value * 10.0).round() / 10.0
    }

    /// Signal voltage matching a temperature, in mV. Always non-zero for
    /// the temperatures this generator produces.
    pub fn millivolts_for(&self, celsius: f64) -> f64 {
        celsius * MV_PER_DEGREE
    }

    #[cfg(feature = "smooth_noise")]
    fn drift(&self, idx: usize, t_secs: f64) -> f64 {
        NOISE_AMPLITUDE * self.generators[idx].sample(t_secs * TIME_SCALE)
    }

    #[cfg(not(feature = "smooth_noise"))]
    fn drift(&self, idx: usize, t_secs: f64) -> f64 {
        sine_drift(idx, t_secs)
    }
}

/// The sinusoidal fallback drift.
pub fn sine_drift(idx: usize, t_secs: f64) -> f64 {
    let phase = idx as f64 * SINE_PHASE_STEP;
    SINE_AMPLITUDE * (t_secs / SINE_PERIOD_DIVISOR + phase).sin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_sources_are_deterministic() {
        let a = SyntheticSource::new(Some(42));
        let b = SyntheticSource::new(Some(42));
        for ch in ChannelId::all() {
            for t in [0.0, 1_700_000_000.0, 1_700_000_123.4] {
                assert_eq!(a.temperature_at(ch, t), b.temperature_at(ch, t));
            }
        }
    }

    #[test]
    fn test_values_stay_near_base() {
        let source = SyntheticSource::new(Some(7));
        for ch in ChannelId::all() {
            let base = 20.0 + ch.index() as f64 * 2.0;
            for step in 0..200 {
                let t = 1_700_000_000.0 + f64::from(step) * 37.0;
                let value = source.temperature_at(ch, t);
                assert!((value - base).abs() <= 10.0, "{ch} drifted to {value}");
                assert!(source.millivolts_for(value) > 0.0);
            }
        }
    }

    #[test]
    fn test_values_are_rounded_to_tenths() {
        let source = SyntheticSource::new(Some(1));
        let value = source.temperature_at(ChannelId::new(1).unwrap(), 1_700_000_042.0);
        assert!(((value * 10.0).round() - value * 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_sine_fallback_has_channel_phase() {
        assert_eq!(sine_drift(0, 0.0), 0.0);
        assert!((sine_drift(1, 0.0) - 2.5 * 0.6f64.sin()).abs() < 1e-12);
    }

    #[cfg(feature = "smooth_noise")]
    #[test]
    fn test_gradient_noise_is_smooth_and_bounded() {
        let noise = GradientNoise::new(3);
        assert_eq!(noise.sample(5.0), 0.0);
        let mut previous = noise.sample(0.0);
        for i in 1..1000 {
            let x = f64::from(i) * 0.01;
            let value = noise.sample(x);
            assert!((-0.5..=0.5).contains(&value));
            assert!((value - previous).abs() < 0.05);
            previous = value;
        }
    }
}
