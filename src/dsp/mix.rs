//! Dry/wet blend.

/// Linear crossfade between the untouched input and the processed signal.
pub struct MixStage;

impl MixStage {
    /// `wet[i] = dry[i] * (1 - mix) + wet[i] * mix`, written into `wet`.
    ///
    /// The endpoints are exact: `mix == 0` copies `dry` and `mix == 1`
    /// leaves `wet` alone.
    #[inline]
    pub fn blend(dry: &[f32], wet: &mut [f32], mix: f32) {
        let mix = mix.clamp(0.0, 1.0);
        if mix >= 1.0 {
            return;
        }
        if mix <= 0.0 {
            let n = dry.len().min(wet.len());
            wet[..n].copy_from_slice(&dry[..n]);
            return;
        }
        let dry_gain = 1.0 - mix;
        for (w, &d) in wet.iter_mut().zip(dry) {
            *w = d * dry_gain + *w * mix;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_are_exact() {
        let dry = [0.1, -0.2, 0.3];
        let mut wet = [0.7, 0.8, -0.9];
        MixStage::blend(&dry, &mut wet, 0.0);
        assert_eq!(wet, dry);

        let mut wet = [0.7, 0.8, -0.9];
        MixStage::blend(&dry, &mut wet, 1.0);
        assert_eq!(wet, [0.7, 0.8, -0.9]);
    }

    #[test]
    fn test_halfway() {
        let dry = [1.0, 0.0];
        let mut wet = [0.0, 1.0];
        MixStage::blend(&dry, &mut wet, 0.5);
        assert_eq!(wet, [0.5, 0.5]);
    }

    #[test]
    fn test_out_of_range_mix_is_clamped() {
        let dry = [1.0];
        let mut wet = [0.0];
        MixStage::blend(&dry, &mut wet, -3.0);
        assert_eq!(wet, [1.0]);
    }
}
