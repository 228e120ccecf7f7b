use std::path::Path;

use anyhow::Result;
use hound::{SampleFormat, WavReader};
use rayon::prelude::*;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, WindowFunction};
use tracing::info;

pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Reads a wav file and returns mono, peak-normalized samples at 16 kHz,
/// the format the transcription model expects. The acquisition step already
/// asks ffmpeg for 16 kHz mono, so resampling is the fallback path.
pub fn parse_audio_file(path: &Path) -> Result<Vec<f32>> {
    let (samples, num_channels, sample_rate) = read_wav_file(path)?;

    let mono_samples = convert_to_mono(&samples, num_channels);
    let normalized_samples = normalize_audio(&mono_samples);

    if sample_rate != WHISPER_SAMPLE_RATE {
        info!("Resampling from {} Hz to {} Hz", sample_rate, WHISPER_SAMPLE_RATE);
        resample_audio(&normalized_samples, sample_rate)
    } else {
        Ok(normalized_samples)
    }
}

fn read_wav_file(path: &Path) -> Result<(Vec<f32>, usize, u32)> {
    let mut reader = WavReader::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to read WAV file: {}", e))?;

    let num_channels = reader.spec().channels as usize;
    let sample_rate = reader.spec().sample_rate;

    if reader.spec().sample_format != SampleFormat::Int {
        return Err(anyhow::anyhow!("Unsupported sample format: expected integer format"));
    }
    if reader.spec().bits_per_sample != 16 {
        return Err(anyhow::anyhow!("Unsupported bits per sample: expected 16 bits"));
    }

    let samples: Vec<f32> = reader
        .samples::<i16>()
        .map(|s| s.map(|val| val as f32))
        .collect::<std::result::Result<Vec<f32>, _>>()
        .map_err(|e| anyhow::anyhow!("Failed to read samples: {}", e))?;

    if samples.is_empty() {
        return Err(anyhow::anyhow!("Audio file contains no samples"));
    }

    Ok((samples, num_channels, sample_rate))
}

fn convert_to_mono(samples: &[f32], num_channels: usize) -> Vec<f32> {
    if num_channels <= 1 {
        return samples.to_vec();
    }
    samples
        .par_chunks(num_channels)
        .map(|chunk| chunk.iter().sum::<f32>() / num_channels as f32)
        .collect()
}

fn normalize_audio(samples: &[f32]) -> Vec<f32> {
    let max_abs = samples
        .par_iter()
        .map(|&s| s.abs())
        .reduce(|| 0.0, f32::max);
    if max_abs == 0.0 {
        return samples.to_vec();
    }
    samples.par_iter().map(|&s| s / max_abs).collect()
}

fn resample_audio(samples: &[f32], original_sample_rate: u32) -> Result<Vec<f32>> {
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: rubato::SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        WHISPER_SAMPLE_RATE as f64 / original_sample_rate as f64,
        2.0,
        params,
        samples.len(),
        1,
    )
    .map_err(|e| anyhow::anyhow!("Failed to create resampler: {}", e))?;

    let resampled = resampler
        .process(&[samples.to_vec()], None)
        .map_err(|e| anyhow::anyhow!("Resampling failed: {}", e))?;

    Ok(resampled.into_iter().next().unwrap_or_default())
}
