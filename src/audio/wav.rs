//! RIFF/WAVE container I/O for captured utterances.
//!
//! Used for the transient per-request transcription input and for optional
//! persistent recordings (`--save-recordings`).

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

use super::capture::AudioUtterance;

/// Write an utterance as 16-bit mono PCM.
pub fn write_wav(path: &Path, utterance: &AudioUtterance) -> Result<()> {
    let spec = WavSpec {
        channels: super::CHANNELS,
        sample_rate: utterance.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("failed to create wav file {}", path.display()))?;
    for sample in &utterance.samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize().context("failed to finalize wav file")?;
    Ok(())
}

/// Read a 16-bit PCM file back into an utterance.
pub fn read_wav(path: &Path) -> Result<AudioUtterance> {
    let mut reader = WavReader::open(path)
        .with_context(|| format!("failed to open wav file {}", path.display()))?;
    let spec = reader.spec();
    anyhow::ensure!(
        spec.sample_format == SampleFormat::Int && spec.bits_per_sample == 16,
        "expected 16-bit PCM, got {:?}/{} bits",
        spec.sample_format,
        spec.bits_per_sample
    );
    let samples = reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .context("failed to read wav samples")?;
    Ok(AudioUtterance {
        samples,
        sample_rate: spec.sample_rate,
    })
}
