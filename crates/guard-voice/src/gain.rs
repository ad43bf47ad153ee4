//! Input gain normalization
//!
//! A fixed manual gain is applied first, then the frame is nudged toward a target RMS
//! level. Near-silent frames are left alone so background hiss is never amplified.

/// Gain settings
#[derive(Debug, Clone)]
pub struct GainConfig {
    /// Multiplier applied before normalization (clamped to 0.0..=10.0)
    pub manual_gain: f32,

    /// Target RMS level in dBFS (default: -20)
    pub target_rms_db: f32,

    /// Frames with RMS below this are not boosted
    pub silence_floor: f32,

    /// Upper bound on the automatic boost factor
    pub max_boost: f32,
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            manual_gain: 1.0,
            target_rms_db: -20.0,
            silence_floor: 0.001,
            max_boost: 20.0,
        }
    }
}

impl GainConfig {
    pub fn new(manual_gain: f32, target_rms_db: f32) -> Self {
        Self {
            manual_gain,
            target_rms_db,
            ..Self::default()
        }
    }

    fn target_rms(&self) -> f32 {
        10f32.powf(self.target_rms_db / 20.0)
    }
}

/// Root mean square of a frame.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Apply manual gain and RMS normalization in place.
pub fn apply_gain(samples: &mut [f32], config: &GainConfig) {
    let manual = config.manual_gain.clamp(0.0, 10.0);
    if (manual - 1.0).abs() > f32::EPSILON {
        samples.iter_mut().for_each(|s| *s *= manual);
    }

    let level = rms(samples);
    if level >= config.silence_floor {
        let factor = (config.target_rms() / level).min(config.max_boost.max(1.0));
        if factor > 1.0 {
            samples.iter_mut().for_each(|s| *s *= factor);
        }
    }

    samples.iter_mut().for_each(|s| *s = s.clamp(-1.0, 1.0));
}
