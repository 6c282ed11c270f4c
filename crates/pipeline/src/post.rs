//! Audio post-processing for synthesized PCM
//!
//! Pure transformations over f32 mono: linear-phase resample to the egress
//! rate, loudness normalization toward a target dBFS, and a tanh soft
//! limiter at the configured ceiling. The emitted PCM is final; clients
//! never alter playback rate.

use rubato::{FftFixedIn, Resampler};

use voicehub_config::TtsConfig;
use voicehub_core::audio::rms_dbfs;

/// Loudness target applied when normalization is enabled
pub const TARGET_LOUDNESS_DBFS: f32 = -16.0;

/// Below this level a block counts as silence and is never gain-boosted
const NORMALIZE_FLOOR_DBFS: f32 = -70.0;

/// Input chunk size for the FFT resampler
const RESAMPLE_CHUNK: usize = 1024;

/// Resample mono f32 audio. Falls back to linear interpolation for very
/// short inputs where the FFT resampler cannot be set up.
pub fn resample(samples: &[f32], from_hz: u32, to_hz: u32) -> Vec<f32> {
    if from_hz == to_hz || samples.is_empty() {
        return samples.to_vec();
    }
    if samples.len() < 256 {
        return resample_linear(samples, from_hz, to_hz);
    }

    let input: Vec<f64> = samples.iter().map(|&s| s as f64).collect();

    let mut resampler =
        match FftFixedIn::<f64>::new(from_hz as usize, to_hz as usize, RESAMPLE_CHUNK, 2, 1) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "FFT resampler init failed, using linear fallback");
                return resample_linear(samples, from_hz, to_hz);
            }
        };

    let mut out: Vec<f32> = Vec::with_capacity(
        (samples.len() as u64 * to_hz as u64 / from_hz as u64) as usize + RESAMPLE_CHUNK,
    );
    let mut pos = 0;
    while pos + RESAMPLE_CHUNK <= input.len() {
        match resampler.process(&[&input[pos..pos + RESAMPLE_CHUNK]], None) {
            Ok(frames) => out.extend(frames[0].iter().map(|&s| s as f32)),
            Err(e) => {
                tracing::warn!(error = %e, "FFT resampling failed, using linear fallback");
                return resample_linear(samples, from_hz, to_hz);
            }
        }
        pos += RESAMPLE_CHUNK;
    }
    if pos < input.len() {
        if let Ok(frames) = resampler.process_partial(Some(&[&input[pos..]]), None) {
            out.extend(frames[0].iter().map(|&s| s as f32));
        }
    }
    // Flush the resampler's internal delay line.
    if let Ok(frames) = resampler.process_partial(None::<&[&[f64]]>, None) {
        out.extend(frames[0].iter().map(|&s| s as f32));
    }

    out
}

fn resample_linear(samples: &[f32], from_hz: u32, to_hz: u32) -> Vec<f32> {
    let ratio = to_hz as f64 / from_hz as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;

    let mut out = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx_floor = src_idx.floor() as usize;
        let idx_ceil = (idx_floor + 1).min(samples.len().saturating_sub(1));
        let frac = (src_idx - idx_floor as f64) as f32;

        out.push(samples[idx_floor] * (1.0 - frac) + samples[idx_ceil] * frac);
    }
    out
}

/// Apply gain so the block's RMS lands at `target_dbfs`. Blocks below the
/// silence floor are left untouched.
pub fn normalize_loudness(samples: &mut [f32], target_dbfs: f32) {
    let current = rms_dbfs(samples);
    if current <= NORMALIZE_FLOOR_DBFS {
        return;
    }
    let gain = 10f32.powf((target_dbfs - current) / 20.0);
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
}

/// Soft limiter with a tanh-shaped knee at the given ceiling.
pub fn soft_limit(samples: &mut [f32], ceiling_dbfs: f32) {
    let ceiling = 10f32.powf(ceiling_dbfs / 20.0);
    if ceiling <= 0.0 {
        return;
    }
    for sample in samples.iter_mut() {
        *sample = ceiling * (*sample / ceiling).tanh();
    }
}

/// The post-processing chain applied to every synthesized chunk
#[derive(Debug, Clone)]
pub struct AudioPost {
    pub target_sample_rate: u32,
    pub loudness_normalize: bool,
    pub limiter_ceiling_dbfs: f32,
}

impl AudioPost {
    pub fn from_config(config: &TtsConfig) -> Self {
        Self {
            target_sample_rate: config.target_sample_rate,
            loudness_normalize: config.loudness_normalize,
            limiter_ceiling_dbfs: config.limiter_ceiling_dbfs,
        }
    }

    /// Resample → normalize → limit. Returns the finalized PCM.
    pub fn process(&self, samples: &[f32], from_hz: u32) -> Vec<f32> {
        let mut out = resample(samples, from_hz, self.target_sample_rate);
        if self.loudness_normalize {
            normalize_loudness(&mut out, TARGET_LOUDNESS_DBFS);
        }
        soft_limit(&mut out, self.limiter_ceiling_dbfs);
        out
    }
}

impl Default for AudioPost {
    fn default() -> Self {
        Self::from_config(&TtsConfig::default())
    }
}
