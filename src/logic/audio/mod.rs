//! Audio Boundary - WAV decode / encode
//!
//! The engine only consumes mono PCM + sample rate. Multi-channel input
//! keeps its first channel; nothing is mixed down.

use std::io::{Cursor, Read};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{SentinelError, SentinelResult};

/// Mono PCM in [-1, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioData {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Samples between two offsets, clamped to the recording
    pub fn clip(&self, start_secs: f64, end_secs: f64) -> AudioData {
        let rate = self.sample_rate as f64;
        let to_index = |secs: f64| ((secs.max(0.0) * rate) as usize).min(self.samples.len());
        let start = to_index(start_secs);
        let end = to_index(end_secs).max(start);

        AudioData {
            samples: self.samples[start..end].to_vec(),
            sample_rate: self.sample_rate,
        }
    }
}

pub fn decode_wav(path: &Path) -> SentinelResult<AudioData> {
    let reader = WavReader::open(path)?;
    let audio = decode_reader(reader)?;
    log::info!(
        "Decoded {:?}: {} Hz, {:.2}s",
        path,
        audio.sample_rate,
        audio.duration_secs()
    );
    Ok(audio)
}

pub fn decode_wav_bytes(bytes: &[u8]) -> SentinelResult<AudioData> {
    decode_reader(WavReader::new(Cursor::new(bytes))?)
}

fn decode_reader<R: Read>(reader: WavReader<R>) -> SentinelResult<AudioData> {
    let spec = reader.spec();
    if spec.sample_rate == 0 || spec.channels == 0 {
        return Err(SentinelError::Decode("invalid WAV header".to_string()));
    }
    let channels = spec.channels as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let samples = if channels > 1 {
        interleaved.into_iter().step_by(channels).collect()
    } else {
        interleaved
    };

    Ok(AudioData {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// 16-bit mono WAV bytes
pub fn encode_wav(audio: &AudioData) -> SentinelResult<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &s in &audio.samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
