//! Audio capture and voice activity detection pipeline.
//!
//! The microphone is opened with a fixed format (16 kHz mono signed 16-bit)
//! and consumed through a pull-based source abstraction. Frames are
//! classified by average energy and assembled into discrete utterances that
//! are handed off through a single-slot channel.

/// Fixed capture sample rate.
pub const SAMPLE_RATE: u32 = 16_000;

/// Fixed capture channel count (mono).
pub const CHANNELS: u16 = 1;

/// Samples per capture frame (256 ms at 16 kHz).
pub const FRAME_SAMPLES: usize = 4_096;

/// Initial accumulator capacity: enough for roughly a minute of speech.
pub(crate) const UTTERANCE_BUFFER_SAMPLES: usize = 1024 * 1024;

/// Default voiced/silent energy threshold (average absolute magnitude).
pub const VAD_THRESHOLD: i64 = 100;

/// Default number of consecutive silent frames that ends a recording.
pub const VAD_SILENCE_FRAMES: u32 = 10;

mod capture;
mod listener;
mod source;
#[cfg(test)]
mod tests;
mod vad;
pub mod wav;

pub use capture::{AudioUtterance, FrameOutcome, Segmenter};
pub use listener::{CaptureError, CaptureService, CaptureSnapshot};
pub use source::{AudioSource, MicSource, SourceError};
pub use vad::{average_magnitude, VadConfig};
