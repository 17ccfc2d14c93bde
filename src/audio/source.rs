//! Audio input abstraction over CPAL.
//!
//! CPAL hands samples to a callback on its own thread, and its `Stream` type
//! is not `Send`. The capture loop instead consumes a pull-based
//! [`AudioSource`]: `read` returns whatever frames are queued (possibly
//! nothing) without blocking. `MicSource` parks the stream on a dedicated
//! owner thread and forwards fixed-size frames over a bounded channel, so the
//! VAD logic stays platform-independent and testable against scripted frames.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, warn};

use super::{CHANNELS, FRAME_SAMPLES, SAMPLE_RATE};

#[derive(Debug, Error)]
pub enum SourceError {
    /// The device could not be opened or streamed. Fatal at startup.
    #[error("audio device error: {0}")]
    Device(String),
    /// A read hiccup; the caller should retry after a short delay.
    #[error("transient audio read error: {0}")]
    Transient(String),
    /// The source was closed and will produce no more frames.
    #[error("audio source closed")]
    Closed,
}

/// Pull-based audio input.
///
/// Implementations must never block in `read`; an empty frame list means "no
/// data yet". The capture loop owns pacing and retries.
pub trait AudioSource: Send {
    /// Begin (or restart) delivering frames.
    fn resume(&mut self) -> Result<(), SourceError>;
    /// Stop delivering frames; queued frames may be discarded.
    fn pause(&mut self);
    /// Dequeue one frame if available. Non-blocking.
    fn read(&mut self) -> Result<Vec<i16>, SourceError>;
    /// Release the device. The source cannot be resumed afterwards.
    fn close(&mut self);
}

/// How many complete frames may queue between the CPAL callback and the
/// capture loop before new frames are dropped.
const FRAME_QUEUE_CAPACITY: usize = 8;

enum OwnerExit {
    Requested,
}

/// Microphone input backed by CPAL.
///
/// The stream itself lives on an owner thread spawned by `resume`; `pause`
/// signals that thread and joins it. The device handle is kept here so the
/// source can be paused and resumed across listen sessions.
pub struct MicSource {
    device: cpal::Device,
    device_name: String,
    frames: Option<Receiver<Vec<i16>>>,
    stop: Option<Sender<OwnerExit>>,
    owner: Option<JoinHandle<()>>,
    closed: bool,
}

impl MicSource {
    /// Open the default (or named) input device. Fails fast when no device is
    /// available so startup can abort with a clear message.
    pub fn open(preferred_device: Option<&str>) -> Result<Self, SourceError> {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        let device = match preferred_device {
            Some(name) => {
                let mut devices = host
                    .input_devices()
                    .map_err(|e| SourceError::Device(format!("no input devices: {e}")))?;
                devices
                    .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    .ok_or_else(|| SourceError::Device(format!("input device '{name}' not found")))?
            }
            None => host
                .default_input_device()
                .ok_or_else(|| SourceError::Device("no default input device".to_string()))?,
        };

        // Probe the default config now so a broken device fails initialize(),
        // not the first resume().
        device
            .default_input_config()
            .map_err(|e| SourceError::Device(format!("failed to query input config: {e}")))?;

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        Ok(Self {
            device,
            device_name,
            frames: None,
            stop: None,
            owner: None,
            closed: false,
        })
    }

    /// List input device names for `--list-input-devices`.
    pub fn list_devices() -> Result<Vec<String>, SourceError> {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| SourceError::Device(format!("no input devices: {e}")))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl AudioSource for MicSource {
    fn resume(&mut self) -> Result<(), SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        if self.owner.is_some() {
            return Ok(());
        }

        let (frame_tx, frame_rx) = bounded::<Vec<i16>>(FRAME_QUEUE_CAPACITY);
        let (stop_tx, stop_rx) = bounded::<OwnerExit>(1);
        let (ready_tx, ready_rx) = bounded::<Result<(), SourceError>>(1);
        let device = self.device.clone();

        let owner = thread::spawn(move || {
            stream_owner(device, frame_tx, stop_rx, ready_tx);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.frames = Some(frame_rx);
                self.stop = Some(stop_tx);
                self.owner = Some(owner);
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = owner.join();
                Err(err)
            }
            Err(_) => {
                let _ = owner.join();
                Err(SourceError::Device(
                    "audio stream thread exited before becoming ready".to_string(),
                ))
            }
        }
    }

    fn pause(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(OwnerExit::Requested);
        }
        if let Some(owner) = self.owner.take() {
            let _ = owner.join();
        }
        self.frames = None;
    }

    fn read(&mut self) -> Result<Vec<i16>, SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        let Some(frames) = self.frames.as_ref() else {
            return Ok(Vec::new());
        };
        match frames.try_recv() {
            Ok(frame) => Ok(frame),
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(Vec::new()),
            Err(crossbeam_channel::TryRecvError::Disconnected) => Err(SourceError::Transient(
                "audio stream disconnected".to_string(),
            )),
        }
    }

    fn close(&mut self) {
        self.pause();
        self.closed = true;
        debug!(device = %self.device_name, "audio source closed");
    }
}

/// Owns the CPAL stream for the lifetime of one listen session. Builds the
/// stream, plays it, then blocks until pause/close is requested.
fn stream_owner(
    device: cpal::Device,
    frame_tx: Sender<Vec<i16>>,
    stop_rx: Receiver<OwnerExit>,
    ready_tx: Sender<Result<(), SourceError>>,
) {
    use cpal::traits::StreamTrait;

    let stream = match build_input_stream(&device, frame_tx) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };
    if let Err(err) = stream.play() {
        let _ = ready_tx.send(Err(SourceError::Device(format!(
            "failed to start audio stream: {err}"
        ))));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Either an explicit pause request or the MicSource being dropped
    // (sender disconnect) ends the session.
    let _ = stop_rx.recv();
    if let Err(err) = stream.pause() {
        debug!("failed to pause audio stream: {err}");
    }
    drop(stream);
}

/// Chunks callback data into fixed-size frames and forwards them. Frames are
/// dropped (not queued unbounded) when the capture loop falls behind.
struct FrameChunker {
    pending: Vec<i16>,
    sender: Sender<Vec<i16>>,
}

impl FrameChunker {
    fn new(sender: Sender<Vec<i16>>) -> Self {
        Self {
            pending: Vec::with_capacity(FRAME_SAMPLES * 2),
            sender,
        }
    }

    fn push<T: Copy>(&mut self, data: &[T], convert: impl Fn(T) -> i16) {
        self.pending.extend(data.iter().copied().map(convert));
        while self.pending.len() >= FRAME_SAMPLES {
            let frame: Vec<i16> = self.pending.drain(..FRAME_SAMPLES).collect();
            match self.sender.try_send(frame) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("audio frame queue full, dropping frame");
                }
            }
        }
    }
}

fn build_input_stream(
    device: &cpal::Device,
    frame_tx: Sender<Vec<i16>>,
) -> Result<cpal::Stream, SourceError> {
    use cpal::traits::DeviceTrait;
    use cpal::{SampleFormat, StreamConfig};

    let default_config = device
        .default_input_config()
        .map_err(|e| SourceError::Device(format!("failed to query input config: {e}")))?;
    let format = default_config.sample_format();

    // Fixed capture format: 16 kHz mono signed 16-bit. The native sample type
    // varies by backend, so convert in the callback.
    let config = StreamConfig {
        channels: CHANNELS,
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = |err| debug!("audio stream error: {err}");
    let mut chunker = FrameChunker::new(frame_tx);

    let stream = match format {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _| chunker.push(data, |s| s),
            err_fn,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _| {
                chunker.push(data, |s| (s.clamp(-1.0, 1.0) * 32_767.0) as i16)
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _| chunker.push(data, |s| (i32::from(s) - 32_768) as i16),
            err_fn,
            None,
        ),
        other => {
            return Err(SourceError::Device(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    };

    stream.map_err(|e| SourceError::Device(format!("failed to open audio stream: {e}")))
}
