//! ONNX speech recognition backend
//!
//! Loads an exported encoder/CTC model plus its token table and decodes a
//! whole segment in one pass. Inference runs to completion inside
//! `block_in_place` so the async scheduler is never starved.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use parking_lot::Mutex;

use voicehub_core::{AudioSegment, EngineError, SpeechToText, SttModelInfo, Transcription};

/// CTC blank token index
const BLANK: usize = 0;

/// ONNX-backed recognizer
pub struct WhisperStt {
    session: Mutex<Session>,
    tokens: Vec<String>,
    model_name: String,
    gpu: bool,
}

impl WhisperStt {
    /// Load a model directory containing `model.onnx` and `tokens.txt`.
    pub fn load(model_dir: impl AsRef<Path>, device: &str) -> Result<Self, EngineError> {
        let model_dir = model_dir.as_ref();
        let model_path: PathBuf = model_dir.join("model.onnx");
        let tokens_path: PathBuf = model_dir.join("tokens.txt");

        let session = Session::builder()
            .map_err(|e| EngineError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| EngineError::Model(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e| EngineError::Model(e.to_string()))?
            .commit_from_file(&model_path)
            .map_err(|e| EngineError::Model(e.to_string()))?;

        let tokens = std::fs::read_to_string(&tokens_path)
            .map_err(|e| EngineError::Model(format!("tokens.txt: {e}")))?
            .lines()
            .map(|line| line.split_whitespace().next().unwrap_or("").to_string())
            .collect();

        Ok(Self {
            session: Mutex::new(session),
            tokens,
            model_name: model_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "onnx".to_string()),
            gpu: device.eq_ignore_ascii_case("cuda"),
        })
    }

    fn decode_logits(&self, logits: &[f32], n_frames: usize, vocab_size: usize) -> String {
        let mut out = String::new();
        let mut previous = BLANK;
        for frame_idx in 0..n_frames {
            let frame = &logits[frame_idx * vocab_size..(frame_idx + 1) * vocab_size];
            let best = frame
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(BLANK);
            if best != BLANK && best != previous {
                if let Some(token) = self.tokens.get(best) {
                    out.push_str(&token.replace('▁', " "));
                }
            }
            previous = best;
        }
        out.trim().to_string()
    }
}

#[async_trait::async_trait]
impl SpeechToText for WhisperStt {
    async fn transcribe(
        &self,
        segment: &AudioSegment,
        language: Option<&str>,
    ) -> Result<Transcription, EngineError> {
        let samples: Arc<[f32]> = segment.samples.clone();
        let language = language.unwrap_or("de").to_string();

        tokio::task::block_in_place(|| {
            let input = Array2::from_shape_vec((1, samples.len()), samples.to_vec())
                .map_err(|e| EngineError::Decode(e.to_string()))?;
            let tensor = Tensor::from_array(input).map_err(|e| EngineError::Model(e.to_string()))?;

            let mut session = self.session.lock();
            let outputs = session
                .run(ort::inputs!["audio" => tensor])
                .map_err(|e| EngineError::Model(e.to_string()))?;

            let (shape, data) = outputs
                .get("logits")
                .ok_or_else(|| EngineError::Model("missing logits output".to_string()))?
                .try_extract_tensor::<f32>()
                .map_err(|e| EngineError::Model(e.to_string()))?;

            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            if dims.len() < 3 {
                return Err(EngineError::Decode(format!("unexpected logits shape {dims:?}")));
            }
            let (n_frames, vocab_size) = (dims[1], dims[2]);
            let text = self.decode_logits(data, n_frames, vocab_size);

            Ok(Transcription {
                confidence: if text.is_empty() { 0.0 } else { 0.9 },
                text,
                language,
            })
        })
    }

    fn available_models(&self) -> Vec<SttModelInfo> {
        vec![SttModelInfo {
            name: self.model_name.clone(),
            loaded: true,
        }]
    }

    fn gpu_available(&self) -> bool {
        self.gpu
    }

    fn model_name(&self) -> String {
        self.model_name.clone()
    }
}
