//! Utterance segmentation state machine.
//!
//! Pure logic shared by the live capture loop and the tests: frames go in,
//! completed utterances come out. Keeping this free of device and thread
//! concerns lets the silence/voice scenarios run against scripted frames.

use super::vad::VadConfig;

/// A captured speech segment. Immutable once emitted; the segmenter clones
/// its accumulator before handing one out, so the consumer owns the samples
/// exclusively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioUtterance {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioUtterance {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// What the segmenter decided for a single frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Idle and the frame was silent.
    Quiet,
    /// Voice detected; transitioned from idle to recording.
    Started,
    /// Still accumulating an in-progress utterance.
    Recording,
    /// Silence tail reached; a complete utterance is ready.
    Completed(AudioUtterance),
    /// Silence tail reached but the segment was below the minimum duration.
    Discarded { samples: usize },
}

/// Sense -> buffer -> segment state machine.
///
/// Idle until a voiced frame arrives, then accumulates every frame until the
/// configured number of consecutive silent frames closes the segment. The
/// trailing silence tail is trimmed on emission so the utterance holds the
/// voiced stretch only.
pub struct Segmenter {
    cfg: VadConfig,
    sample_rate: u32,
    accumulator: Vec<i16>,
    trailing_silence_samples: usize,
    silent_frames: u32,
    recording: bool,
}

impl Segmenter {
    pub fn new(cfg: VadConfig, sample_rate: u32) -> Self {
        Self {
            cfg,
            sample_rate,
            accumulator: Vec::with_capacity(super::UTTERANCE_BUFFER_SAMPLES),
            trailing_silence_samples: 0,
            silent_frames: 0,
            recording: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Feed one frame of samples and advance the state machine.
    pub fn push_frame(&mut self, frame: &[i16]) -> FrameOutcome {
        let voiced = self.cfg.is_voiced(frame);

        if !self.recording {
            if !voiced {
                return FrameOutcome::Quiet;
            }
            self.recording = true;
            self.accumulator.clear();
            self.accumulator.extend_from_slice(frame);
            self.trailing_silence_samples = 0;
            self.silent_frames = 0;
            return FrameOutcome::Started;
        }

        self.accumulator.extend_from_slice(frame);
        if voiced {
            self.silent_frames = 0;
            self.trailing_silence_samples = 0;
            return FrameOutcome::Recording;
        }

        self.silent_frames += 1;
        self.trailing_silence_samples = self.trailing_silence_samples.saturating_add(frame.len());
        if self.silent_frames < self.cfg.silence_frames {
            return FrameOutcome::Recording;
        }

        // Silence tail reached: close the segment and reset for the next one.
        self.recording = false;
        self.silent_frames = 0;
        let voiced_len = self
            .accumulator
            .len()
            .saturating_sub(self.trailing_silence_samples);
        self.accumulator.truncate(voiced_len);
        self.trailing_silence_samples = 0;

        if voiced_len >= self.cfg.min_utterance_samples {
            FrameOutcome::Completed(AudioUtterance {
                samples: self.accumulator.clone(),
                sample_rate: self.sample_rate,
            })
        } else {
            FrameOutcome::Discarded {
                samples: voiced_len,
            }
        }
    }

    /// Drop any partial segment, e.g. when the capture loop stops.
    pub fn reset(&mut self) {
        self.recording = false;
        self.silent_frames = 0;
        self.trailing_silence_samples = 0;
        self.accumulator.clear();
    }
}
