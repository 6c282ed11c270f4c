//! Energy-based voice activity detection
//!
//! A rolling RMS estimate per frame drives stream auto-finalization: once at
//! least one voiced frame was seen, a configured run of silence ends the
//! stream. A noise gate keeps mic hum and line noise from counting as voice.

use std::time::Duration;

use voicehub_core::AudioFrame;
use voicehub_config::AudioConfig;

/// Runtime-adjustable VAD options (via `set_audio_opts`)
#[derive(Debug, Clone)]
pub struct VadOptions {
    pub enabled: bool,
    /// Silence below this RMS level (dBFS)
    pub threshold_dbfs: f32,
    /// Silence run that finalizes the stream
    pub silence_window: Duration,
    /// Frames below this energy never count as voiced
    pub noise_gate_dbfs: f32,
}

impl VadOptions {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            enabled: config.vad_enabled,
            threshold_dbfs: config.vad_threshold_dbfs,
            silence_window: Duration::from_millis(config.vad_silence_window_ms),
            noise_gate_dbfs: config.noise_gate_dbfs,
        }
    }
}

impl Default for VadOptions {
    fn default() -> Self {
        Self::from_config(&AudioConfig::default())
    }
}

/// Decision for one processed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// Voice energy present
    Voiced,
    /// Silence, but the stream keeps running
    Silence,
    /// Silence window elapsed after voiced audio: finalize the stream
    EndOfSpeech,
}

/// Per-stream VAD state
#[derive(Debug)]
pub struct VadDetector {
    options: VadOptions,
    voiced_seen: bool,
    silence_accumulated: Duration,
    /// Exponential moving average of frame RMS, in dBFS
    rolling_dbfs: f32,
}

/// EMA weight for the rolling energy estimate
const ROLLING_ALPHA: f32 = 0.35;

impl VadDetector {
    pub fn new(options: VadOptions) -> Self {
        Self {
            options,
            voiced_seen: false,
            silence_accumulated: Duration::ZERO,
            rolling_dbfs: -96.0,
        }
    }

    pub fn options(&self) -> &VadOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: VadOptions) {
        self.options = options;
    }

    /// Process one frame and decide whether the stream should end.
    ///
    /// Silence time is accumulated from frame durations, so the decision is
    /// independent of wall-clock jitter between frames.
    pub fn process(&mut self, frame: &AudioFrame) -> VadDecision {
        if !self.options.enabled {
            return VadDecision::Silence;
        }

        self.rolling_dbfs =
            self.rolling_dbfs * (1.0 - ROLLING_ALPHA) + frame.energy_dbfs * ROLLING_ALPHA;

        let gated = frame.energy_dbfs <= self.options.noise_gate_dbfs;
        let voiced = !gated && self.rolling_dbfs > self.options.threshold_dbfs;

        if voiced {
            self.voiced_seen = true;
            self.silence_accumulated = Duration::ZERO;
            return VadDecision::Voiced;
        }

        if self.voiced_seen {
            self.silence_accumulated += frame.duration();
            if self.silence_accumulated >= self.options.silence_window {
                return VadDecision::EndOfSpeech;
            }
        }

        VadDecision::Silence
    }

    pub fn reset(&mut self) {
        self.voiced_seen = false;
        self.silence_accumulated = Duration::ZERO;
        self.rolling_dbfs = -96.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicehub_core::SampleRate;

    fn loud_frame(seq: u32) -> AudioFrame {
        AudioFrame::new(vec![0.5; 320], SampleRate::Hz16000, seq, 0)
    }

    fn quiet_frame(seq: u32) -> AudioFrame {
        AudioFrame::new(vec![0.0005; 320], SampleRate::Hz16000, seq, 0)
    }

    fn detector(window_ms: u64) -> VadDetector {
        VadDetector::new(VadOptions {
            enabled: true,
            threshold_dbfs: -40.0,
            silence_window: Duration::from_millis(window_ms),
            noise_gate_dbfs: -55.0,
        })
    }

    #[test]
    fn test_silence_before_voice_never_finalizes() {
        let mut vad = detector(100);
        for seq in 0..100 {
            assert_eq!(vad.process(&quiet_frame(seq)), VadDecision::Silence);
        }
    }

    #[test]
    fn test_end_of_speech_after_silence_window() {
        let mut vad = detector(100);
        // Voice first (a few frames so the rolling average catches up)
        for seq in 0..5 {
            vad.process(&loud_frame(seq));
        }
        // 320 samples @ 16kHz = 20ms per frame; 5 frames = 100ms of silence
        let mut decisions = Vec::new();
        for seq in 5..11 {
            decisions.push(vad.process(&quiet_frame(seq)));
        }
        assert!(decisions.contains(&VadDecision::EndOfSpeech));
    }

    #[test]
    fn test_voice_resets_silence_run() {
        let mut vad = detector(100);
        for seq in 0..5 {
            vad.process(&loud_frame(seq));
        }
        for seq in 5..8 {
            assert_ne!(vad.process(&quiet_frame(seq)), VadDecision::EndOfSpeech);
        }
        // Speech resumes, then a short silence run must not finalize
        for seq in 8..12 {
            vad.process(&loud_frame(seq));
        }
        assert_ne!(vad.process(&quiet_frame(12)), VadDecision::EndOfSpeech);
    }

    #[test]
    fn test_disabled_vad_is_inert() {
        let mut vad = detector(20);
        vad.set_options(VadOptions {
            enabled: false,
            ..vad.options().clone()
        });
        for seq in 0..10 {
            vad.process(&loud_frame(seq));
        }
        for seq in 10..40 {
            assert_eq!(vad.process(&quiet_frame(seq)), VadDecision::Silence);
        }
    }
}
