//! Synthetic frame contents.

use super::rng::MockRng;

/// What the simulated receiver captures.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FramePattern {
    /// Every sample is exactly zero, as from a dead front end.
    Zeros,
    /// Every sample has the same value.
    Constant(f32),
    /// Sample `i` is `i / len`, offset by the frame counter.
    Ramp,
    /// Uniform noise in `[-amplitude, amplitude)`.
    Noise {
        /// Peak amplitude
        amplitude: f32,
    },
    /// Low noise floor with one reflector at a bin.
    #[default]
    Target,
}

impl FramePattern {
    /// Fill one frame.
    pub fn fill(&self, out: &mut [f32], counter: u32, rng: &MockRng) {
        match *self {
            Self::Zeros => out.fill(0.0),
            Self::Constant(v) => out.fill(v),
            Self::Ramp => {
                let len = out.len().max(1) as f32;
                let shift = (counter % 16) as f32 / 16.0;
                for (i, v) in out.iter_mut().enumerate() {
                    *v = i as f32 / len + shift;
                }
            }
            Self::Noise { amplitude } => rng.fill_symmetric(out, amplitude),
            Self::Target => {
                rng.fill_symmetric(out, 1e-3);
                let peak = out.len() / 3;
                for (i, v) in out.iter_mut().enumerate() {
                    let d = i.abs_diff(peak) as f32;
                    *v += 0.5 * (-d * d / 8.0).exp();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_pattern_is_exact() {
        let rng = MockRng::new(Some(1));
        let mut out = [1.0f32; 32];
        FramePattern::Zeros.fill(&mut out, 3, &rng);
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_target_has_peak() {
        let rng = MockRng::new(Some(1));
        let mut out = [0.0f32; 90];
        FramePattern::Target.fill(&mut out, 0, &rng);
        let (idx, _) = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        assert_eq!(idx, 30);
    }
}
