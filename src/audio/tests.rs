use super::capture::{AudioUtterance, FrameOutcome, Segmenter};
use super::listener::{CaptureError, CaptureService};
use super::source::{AudioSource, SourceError};
use super::vad::VadConfig;
use super::wav;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn voiced_frame(len: usize) -> Vec<i16> {
    vec![500i16; len]
}

fn silent_frame(len: usize) -> Vec<i16> {
    vec![0i16; len]
}

fn default_segmenter() -> Segmenter {
    Segmenter::new(VadConfig::default(), super::SAMPLE_RATE)
}

#[test]
fn fifty_silent_frames_produce_no_utterance() {
    let mut segmenter = default_segmenter();
    for _ in 0..50 {
        assert_eq!(segmenter.push_frame(&silent_frame(160)), FrameOutcome::Quiet);
    }
    assert!(!segmenter.is_recording());
}

#[test]
fn voiced_stretch_bounded_by_silence_yields_exactly_the_voiced_samples() {
    let frame_len = 160;
    let mut segmenter = default_segmenter();

    for _ in 0..20 {
        assert_eq!(
            segmenter.push_frame(&silent_frame(frame_len)),
            FrameOutcome::Quiet
        );
    }
    for i in 0..30 {
        let outcome = segmenter.push_frame(&voiced_frame(frame_len));
        if i == 0 {
            assert_eq!(outcome, FrameOutcome::Started);
        } else {
            assert_eq!(outcome, FrameOutcome::Recording);
        }
    }

    // Silence tail is 10 frames; the 10th closes the segment.
    let mut completed = None;
    for i in 0..15 {
        match segmenter.push_frame(&silent_frame(frame_len)) {
            FrameOutcome::Completed(utterance) => {
                assert_eq!(i, 9, "segment should close on the 10th silent frame");
                completed = Some(utterance);
            }
            FrameOutcome::Recording => assert!(i < 9),
            FrameOutcome::Quiet => assert!(i > 9),
            other => panic!("unexpected outcome {other:?} at silent frame {i}"),
        }
    }

    let utterance = completed.expect("expected exactly one utterance");
    assert_eq!(utterance.samples.len(), 30 * frame_len);
    assert!(utterance.samples.iter().all(|s| *s == 500));
    assert_eq!(utterance.sample_rate, super::SAMPLE_RATE);
}

#[test]
fn speech_below_minimum_duration_is_discarded() {
    let frame_len = 160;
    let mut segmenter = default_segmenter();

    assert_eq!(
        segmenter.push_frame(&voiced_frame(frame_len)),
        FrameOutcome::Started
    );
    assert_eq!(
        segmenter.push_frame(&voiced_frame(frame_len)),
        FrameOutcome::Recording
    );
    for i in 0..10 {
        match segmenter.push_frame(&silent_frame(frame_len)) {
            FrameOutcome::Discarded { samples } => {
                assert_eq!(i, 9);
                assert_eq!(samples, 2 * frame_len);
            }
            FrameOutcome::Recording => assert!(i < 9),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}

#[test]
fn interior_silence_shorter_than_the_tail_is_kept() {
    let frame_len = 400;
    let cfg = VadConfig {
        threshold: 100,
        silence_frames: 10,
        min_utterance_samples: 1_000,
    };
    let mut segmenter = Segmenter::new(cfg, super::SAMPLE_RATE);

    for _ in 0..10 {
        segmenter.push_frame(&voiced_frame(frame_len));
    }
    for _ in 0..5 {
        segmenter.push_frame(&silent_frame(frame_len));
    }
    for _ in 0..10 {
        segmenter.push_frame(&voiced_frame(frame_len));
    }

    let mut completed = None;
    for _ in 0..10 {
        if let FrameOutcome::Completed(utterance) = segmenter.push_frame(&silent_frame(frame_len)) {
            completed = Some(utterance);
        }
    }

    // The mid-segment pause stays; only the closing tail is trimmed.
    let utterance = completed.expect("expected an utterance");
    assert_eq!(utterance.samples.len(), 25 * frame_len);
}

#[test]
fn reset_drops_a_partial_segment() {
    let mut segmenter = default_segmenter();
    segmenter.push_frame(&voiced_frame(160));
    assert!(segmenter.is_recording());
    segmenter.reset();
    assert!(!segmenter.is_recording());
    assert_eq!(segmenter.push_frame(&silent_frame(160)), FrameOutcome::Quiet);
}

#[test]
fn wav_round_trip_preserves_samples_and_rate() {
    let utterance = AudioUtterance {
        samples: (0..8_000).map(|i| ((i % 600) as i16) - 300).collect(),
        sample_rate: super::SAMPLE_RATE,
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("roundtrip.wav");

    wav::write_wav(&path, &utterance).expect("write wav");
    let restored = wav::read_wav(&path).expect("read wav");

    assert_eq!(restored, utterance);
}

/// Replays a prepared sequence of reads, then reports silence forever.
struct ScriptedSource {
    reads: VecDeque<Result<Vec<i16>, SourceError>>,
    resumed: bool,
    closed: bool,
}

impl ScriptedSource {
    fn new(reads: Vec<Result<Vec<i16>, SourceError>>) -> Box<Self> {
        Box::new(Self {
            reads: reads.into(),
            resumed: false,
            closed: false,
        })
    }
}

impl AudioSource for ScriptedSource {
    fn resume(&mut self) -> Result<(), SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        self.resumed = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.resumed = false;
    }

    fn read(&mut self) -> Result<Vec<i16>, SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        self.reads.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

fn quick_vad() -> VadConfig {
    VadConfig {
        threshold: 100,
        silence_frames: 3,
        min_utterance_samples: 800,
    }
}

fn utterance_script(voiced_frames: usize) -> Vec<Result<Vec<i16>, SourceError>> {
    let mut reads = Vec::new();
    for _ in 0..voiced_frames {
        reads.push(Ok(voiced_frame(400)));
    }
    for _ in 0..3 {
        reads.push(Ok(silent_frame(400)));
    }
    reads
}

#[test]
fn uninitialized_service_rejects_start() {
    let service = CaptureService::new(VadConfig::default(), None);
    match service.start_listening() {
        Err(CaptureError::State(msg)) => assert_eq!(msg, "not initialized"),
        other => panic!("expected state error, got {other:?}"),
    }
}

#[test]
fn stop_requires_active_listening() {
    let service = CaptureService::with_source(quick_vad(), ScriptedSource::new(Vec::new()));
    match service.stop_listening() {
        Err(CaptureError::State(msg)) => assert_eq!(msg, "not currently listening"),
        other => panic!("expected state error, got {other:?}"),
    }
}

#[test]
fn double_start_is_rejected() {
    let service = CaptureService::with_source(quick_vad(), ScriptedSource::new(Vec::new()));
    service.start_listening().expect("first start");
    match service.start_listening() {
        Err(CaptureError::State(msg)) => assert_eq!(msg, "already listening"),
        other => panic!("expected state error, got {other:?}"),
    }
    service.cleanup();
}

#[test]
fn captures_an_utterance_end_to_end() {
    let service =
        CaptureService::with_source(quick_vad(), ScriptedSource::new(utterance_script(5)));
    service.start_listening().expect("start");

    let utterance = service
        .wait_for_utterance(Duration::from_secs(3))
        .expect("utterance");
    assert_eq!(utterance.samples.len(), 5 * 400);
    assert_eq!(utterance.sample_rate, super::SAMPLE_RATE);

    service.cleanup();
}

#[test]
fn transient_read_errors_are_retried() {
    let mut reads = vec![Err(SourceError::Transient("hiccup".to_string()))];
    reads.extend(utterance_script(5));
    let service = CaptureService::with_source(quick_vad(), ScriptedSource::new(reads));
    service.start_listening().expect("start");

    let utterance = service
        .wait_for_utterance(Duration::from_secs(3))
        .expect("utterance despite transient error");
    assert_eq!(utterance.samples.len(), 5 * 400);

    service.cleanup();
}

#[test]
fn second_utterance_is_dropped_while_slot_is_full() {
    let mut reads = utterance_script(5);
    reads.extend(utterance_script(7));
    let service = CaptureService::with_source(quick_vad(), ScriptedSource::new(reads));
    service.start_listening().expect("start");

    // Let the loop chew through both segments before anyone consumes.
    thread::sleep(Duration::from_millis(600));

    let first = service
        .wait_for_utterance(Duration::from_secs(1))
        .expect("first utterance");
    assert_eq!(first.samples.len(), 5 * 400, "oldest-pending is delivered");

    match service.wait_for_utterance(Duration::from_millis(200)) {
        Err(CaptureError::TimedOut) => {}
        other => panic!("second utterance should have been dropped, got {other:?}"),
    }

    service.cleanup();
}

#[test]
fn recording_started_signal_fires_once_per_segment() {
    let service =
        CaptureService::with_source(quick_vad(), ScriptedSource::new(utterance_script(5)));
    service.start_listening().expect("start");

    let _ = service.wait_for_utterance(Duration::from_secs(3));
    assert!(service.take_recording_started());
    assert!(!service.take_recording_started());

    service.cleanup();
}

#[test]
fn wait_reports_stop_underneath_the_caller() {
    let service = Arc::new(CaptureService::with_source(
        quick_vad(),
        ScriptedSource::new(Vec::new()),
    ));
    service.start_listening().expect("start");

    let stopper = service.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        stopper.stop_listening().expect("stop");
    });

    match service.wait_for_utterance(Duration::from_secs(5)) {
        Err(CaptureError::Stopped) => {}
        other => panic!("expected Stopped, got {other:?}"),
    }
    handle.join().expect("stopper thread");
}

#[test]
fn wait_reports_shutdown() {
    let service = CaptureService::with_source(quick_vad(), ScriptedSource::new(Vec::new()));
    service.cleanup();
    match service.wait_for_utterance(Duration::from_millis(100)) {
        Err(CaptureError::ShuttingDown) => {}
        other => panic!("expected ShuttingDown, got {other:?}"),
    }
}

#[test]
fn cleanup_is_idempotent() {
    let service =
        CaptureService::with_source(quick_vad(), ScriptedSource::new(utterance_script(5)));
    service.start_listening().expect("start");
    service.cleanup();
    service.cleanup();

    assert!(!service.is_listening());
    assert!(service.snapshot().shutting_down);

    // A restart after cleanup is refused.
    match service.start_listening() {
        Err(CaptureError::ShuttingDown) => {}
        other => panic!("expected ShuttingDown, got {other:?}"),
    }
}

#[test]
fn wait_times_out_when_nothing_is_spoken() {
    let service = CaptureService::with_source(quick_vad(), ScriptedSource::new(Vec::new()));
    service.start_listening().expect("start");
    match service.wait_for_utterance(Duration::from_millis(150)) {
        Err(CaptureError::TimedOut) => {}
        other => panic!("expected TimedOut, got {other:?}"),
    }
    service.cleanup();
}

#[test]
fn transcribing_flag_round_trips() {
    let service = CaptureService::with_source(quick_vad(), ScriptedSource::new(Vec::new()));
    assert!(!service.is_transcribing());
    service.set_transcribing(true);
    assert!(service.is_transcribing());
    service.set_transcribing(false);
    assert!(!service.is_transcribing());
}
