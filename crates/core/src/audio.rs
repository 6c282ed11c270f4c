//! Audio frame and segment types
//!
//! Ingress audio arrives as PCM16 mono at 16 kHz and is converted to f32
//! (normalized to [-1.0, 1.0]) at the transport boundary. Everything past
//! that boundary works on f32 samples.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sample rates the backend deals with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 16kHz - microphone ingress, STT input
    #[default]
    Hz16000,
    /// 22.05kHz - fast CPU TTS engine output
    Hz22050,
    /// 24kHz - synthesized audio egress target
    Hz24000,
    /// 44.1kHz
    Hz44100,
    /// 48kHz
    Hz48000,
}

impl SampleRate {
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz22050 => 22050,
            SampleRate::Hz24000 => 24000,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }

    /// Closest supported rate for a raw Hz value
    pub fn from_u32(hz: u32) -> Option<Self> {
        match hz {
            16000 => Some(SampleRate::Hz16000),
            22050 => Some(SampleRate::Hz22050),
            24000 => Some(SampleRate::Hz24000),
            44100 => Some(SampleRate::Hz44100),
            48000 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }

    /// Samples in a window of the given length
    pub fn samples_for(&self, window: Duration) -> usize {
        (self.as_u32() as u128 * window.as_millis() / 1000) as usize
    }
}

const PCM16_NORMALIZE: f32 = 32768.0;
const PCM16_SCALE: f32 = 32767.0;

/// Decode PCM16 little-endian bytes into normalized f32 samples.
///
/// A trailing odd byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            sample as f32 / PCM16_NORMALIZE
        })
        .collect()
}

/// Encode normalized f32 samples into PCM16 little-endian bytes.
///
/// Samples outside [-1.0, 1.0] are clamped before conversion.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        out.extend_from_slice(&((clamped * PCM16_SCALE) as i16).to_le_bytes());
    }
    out
}

/// One inbound audio frame, already decoded to f32
#[derive(Clone)]
pub struct AudioFrame {
    /// Normalized samples
    pub samples: Arc<[f32]>,
    /// Sample rate (fixed 16 kHz for ingress)
    pub sample_rate: SampleRate,
    /// Client-assigned frame sequence number
    pub sequence: u32,
    /// Client capture timestamp (milliseconds)
    pub timestamp_ms: u64,
    /// RMS energy in dBFS, computed once at decode time
    pub energy_dbfs: f32,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("sequence", &self.sequence)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("energy_dbfs", &self.energy_dbfs)
            .finish()
    }
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: SampleRate, sequence: u32, timestamp_ms: u64) -> Self {
        let energy_dbfs = rms_dbfs(&samples);
        Self {
            samples: samples.into(),
            sample_rate,
            sequence,
            timestamp_ms,
            energy_dbfs,
        }
    }

    /// Decode a PCM16 payload straight into a frame
    pub fn from_pcm16(bytes: &[u8], sample_rate: SampleRate, sequence: u32, timestamp_ms: u64) -> Self {
        Self::new(pcm16_to_f32(bytes), sample_rate, sequence, timestamp_ms)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate.as_u32() as f64)
    }
}

/// RMS energy of a sample block in dBFS. Empty or silent input maps to -96 dB.
pub fn rms_dbfs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return -96.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    let rms = (sum_squares / samples.len() as f32).sqrt();
    if rms > 0.0 {
        (20.0 * rms.log10()).max(-96.0)
    } else {
        -96.0
    }
}

/// A finalized, immutable speech segment handed to the STT adapter
#[derive(Clone)]
pub struct AudioSegment {
    pub samples: Arc<[f32]>,
    pub sample_rate: SampleRate,
    /// Wall-clock bounds of the segment
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: chrono::DateTime<chrono::Utc>,
}

impl AudioSegment {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate.as_u32() as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl std::fmt::Debug for AudioSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSegment")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("duration_ms", &self.duration().as_millis())
            .finish()
    }
}

/// Accumulates frames of one stream until finalization
#[derive(Debug)]
pub struct SegmentBuffer {
    samples: Vec<f32>,
    sample_rate: SampleRate,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl SegmentBuffer {
    pub fn new(sample_rate: SampleRate) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
            started_at: chrono::Utc::now(),
        }
    }

    pub fn push(&mut self, frame: &AudioFrame) {
        self.samples.extend(frame.samples.iter());
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate.as_u32() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Consume the buffer into an immutable segment
    pub fn finalize(self) -> AudioSegment {
        AudioSegment {
            samples: self.samples.into(),
            sample_rate: self.sample_rate,
            started_at: self.started_at,
            ended_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_round_trip_sign() {
        let pcm16: Vec<u8> = vec![0x00, 0x40, 0x00, 0xC0]; // one positive, one negative
        let samples = pcm16_to_f32(&pcm16);
        assert_eq!(samples.len(), 2);
        assert!(samples[0] > 0.0);
        assert!(samples[1] < 0.0);
    }

    #[test]
    fn test_trailing_odd_byte_ignored() {
        let samples = pcm16_to_f32(&[0x00, 0x40, 0x7F]);
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn test_rms_silence_floor() {
        assert_eq!(rms_dbfs(&[]), -96.0);
        assert_eq!(rms_dbfs(&[0.0; 160]), -96.0);
        assert!(rms_dbfs(&[0.5; 160]) > -10.0);
    }

    #[test]
    fn test_segment_buffer_accumulates() {
        let mut buf = SegmentBuffer::new(SampleRate::Hz16000);
        let frame = AudioFrame::new(vec![0.1; 160], SampleRate::Hz16000, 0, 0);
        buf.push(&frame);
        buf.push(&frame);
        assert_eq!(buf.len(), 320);

        let segment = buf.finalize();
        assert_eq!(segment.samples.len(), 320);
        assert!(segment.duration() >= Duration::from_millis(19));
    }

    #[test]
    fn test_sample_rate_window() {
        assert_eq!(SampleRate::Hz16000.samples_for(Duration::from_millis(20)), 320);
        assert_eq!(SampleRate::Hz24000.samples_for(Duration::from_millis(10)), 240);
    }
}
