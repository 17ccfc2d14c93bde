pub mod audio;
pub mod config;
pub mod shutdown;
pub mod status;
pub mod telemetry;
pub mod text;
pub mod whisper;

pub use audio::{AudioUtterance, CaptureError, CaptureService};
pub use shutdown::{GracefulShutdown, Shutdownable};
pub use status::StatusReporter;
pub use whisper::{TranscriptionResult, WhisperServer};
