//! Energy-based voice activity detection.
//!
//! Classifies a frame as voiced when the average absolute sample magnitude
//! exceeds a fixed threshold. Intentionally simple: no spectral analysis,
//! no adaptive calibration. The threshold and silence-tail length are plain
//! configuration values tuned by trial.

/// Configuration for the VAD segmenter.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Average absolute sample magnitude above which a frame counts as voiced.
    pub threshold: i64,
    /// Consecutive silent frames that close an in-progress utterance.
    pub silence_frames: u32,
    /// Minimum utterance length in samples; shorter segments are discarded.
    pub min_utterance_samples: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: super::VAD_THRESHOLD,
            silence_frames: super::VAD_SILENCE_FRAMES,
            min_utterance_samples: (super::SAMPLE_RATE / 4) as usize,
        }
    }
}

impl VadConfig {
    pub fn is_voiced(&self, frame: &[i16]) -> bool {
        average_magnitude(frame) > self.threshold
    }
}

/// Average absolute magnitude over a frame. Returns 0 for an empty frame so
/// zero-length device reads always classify as silence.
pub fn average_magnitude(samples: &[i16]) -> i64 {
    if samples.is_empty() {
        return 0;
    }
    let sum: i64 = samples.iter().map(|s| i64::from(*s).abs()).sum();
    sum / samples.len() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_frame_is_silent() {
        assert_eq!(average_magnitude(&[]), 0);
        assert!(!VadConfig::default().is_voiced(&[]));
    }

    #[test]
    fn magnitude_uses_absolute_values() {
        assert_eq!(average_magnitude(&[-200, 200]), 200);
    }

    #[test]
    fn threshold_is_exclusive() {
        let cfg = VadConfig {
            threshold: 100,
            ..VadConfig::default()
        };
        assert!(!cfg.is_voiced(&[100, 100]));
        assert!(cfg.is_voiced(&[101, 101]));
    }

    #[test]
    fn default_minimum_is_a_quarter_second() {
        let cfg = VadConfig::default();
        assert_eq!(cfg.min_utterance_samples, 4_000);
    }
}
