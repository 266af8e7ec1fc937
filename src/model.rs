//! Generative model interface and the LLaMA-backed implementation
//!
//! The pipeline only sees [`GenerativeModel`]: something that turns a prompt
//! into text and reports named stage outputs to a caller-supplied
//! [`StageObserver`] while it computes. Capture state therefore lives with the
//! caller, never inside the model.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::error::{MindError, Result};
use crate::forward_llama::{CaptureLlama, LlamaFiles};

/// Receives stage outputs during a forward pass.
///
/// The model calls `observe` exactly once per forward pass for every stage
/// for which `wants` returns true.
pub trait StageObserver {
    fn wants(&self, stage: &str) -> bool;
    fn observe(&mut self, stage: &str, output: &Tensor) -> Result<()>;
}

/// Observer that captures nothing.
pub struct NoCapture;

impl StageObserver for NoCapture {
    fn wants(&self, _stage: &str) -> bool {
        false
    }

    fn observe(&mut self, _stage: &str, _output: &Tensor) -> Result<()> {
        Ok(())
    }
}

/// Caller-side cancellation for a pending generation.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(MindError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A text generator that exposes named computation stages.
///
/// Implementations hold no per-request mutable state, so one instance can
/// serve overlapping requests from several threads.
pub trait GenerativeModel: Send + Sync {
    /// Width of the stage outputs
    fn d_model(&self) -> usize;

    /// Every stage name the model can report
    fn stage_names(&self) -> Vec<String>;

    fn has_stage(&self, name: &str) -> bool {
        self.stage_names().iter().any(|s| s == name)
    }

    /// Generate text for `prompt`, reporting watched stages to `observer`.
    fn generate(
        &self,
        prompt: &str,
        max_new_tokens: usize,
        observer: &mut dyn StageObserver,
        cancel: &CancelFlag,
    ) -> Result<String>;
}

/// Normalise a module path to a stage name.
///
/// HuggingFace module paths carry a `model.` prefix
/// (`model.layers.14.mlp.down_proj`); stage names do not.
pub fn canonical_stage_name(name: &str) -> &str {
    name.trim().strip_prefix("model.").unwrap_or(name.trim())
}

/// Resolve a device identifier: `cpu`, `cuda`, `cuda:N` or `metal`.
///
/// CUDA falls back to CPU when it is not available.
pub fn parse_device(name: &str) -> Result<Device> {
    let name = name.trim().to_lowercase();
    match name.as_str() {
        "cpu" => Ok(Device::Cpu),
        "metal" => Ok(Device::new_metal(0)?),
        s if s == "cuda" || s.starts_with("cuda:") => {
            let ordinal = match s.strip_prefix("cuda:") {
                Some(n) => n
                    .parse::<usize>()
                    .map_err(|_| MindError::Config(format!("invalid CUDA ordinal in '{name}'")))?,
                None => 0,
            };
            let device = Device::cuda_if_available(ordinal)?;
            if device.is_cpu() {
                warn!("CUDA not available, using CPU");
            }
            Ok(device)
        }
        other => Err(MindError::Config(format!("unknown device '{other}'"))),
    }
}

/// Dtype used for model weights on `device`
pub fn model_dtype(device: &Device) -> DType {
    if device.is_cpu() {
        DType::F32
    } else {
        DType::BF16
    }
}

/// LLaMA-family causal LM with tokenizer
pub struct LlamaGenerator {
    model: CaptureLlama,
    tokenizer: Tokenizer,
    stop_tokens: Vec<u32>,
    temperature: f32,
}

impl LlamaGenerator {
    /// Load a model from a local directory or a HuggingFace repository id.
    pub fn load(model_path: &str, device: &Device, temperature: f32) -> Result<Self> {
        let files = LlamaFiles::locate(model_path)?;
        let dtype = model_dtype(device);
        info!("Device: {device:?}, dtype: {dtype:?}");

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| MindError::Tokenizer(e.to_string()))?;
        let model = CaptureLlama::load(&files, device, dtype)?;

        let mut stop_tokens = model
            .config()
            .eos_token_id
            .as_ref()
            .map(|e| e.to_vec())
            .unwrap_or_default();
        let vocab = tokenizer.get_vocab(true);
        for special in ["<|eot_id|>", "<|end_of_text|>", "</s>"] {
            if let Some(&id) = vocab.get(special) {
                if !stop_tokens.contains(&id) {
                    stop_tokens.push(id);
                }
            }
        }
        debug!("Stop tokens: {stop_tokens:?}");

        Ok(Self {
            model,
            tokenizer,
            stop_tokens,
            temperature,
        })
    }

    pub fn n_layers(&self) -> usize {
        self.model.n_layers()
    }
}

impl GenerativeModel for LlamaGenerator {
    fn d_model(&self) -> usize {
        self.model.d_model()
    }

    fn stage_names(&self) -> Vec<String> {
        self.model.stage_names()
    }

    fn generate(
        &self,
        prompt: &str,
        max_new_tokens: usize,
        observer: &mut dyn StageObserver,
        cancel: &CancelFlag,
    ) -> Result<String> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| MindError::Tokenizer(e.to_string()))?;
        let prompt_ids = encoding.get_ids();
        debug!("Prompt: {} tokens", prompt_ids.len());

        let tokens = self.model.generate(
            prompt_ids,
            max_new_tokens,
            self.temperature,
            &self.stop_tokens,
            observer,
            cancel,
        )?;
        debug!("Generated {} tokens", tokens.len() - prompt_ids.len());

        self.tokenizer
            .decode(&tokens, true)
            .map_err(|e| MindError::Tokenizer(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_stage_name() {
        assert_eq!(
            canonical_stage_name("model.layers.14.mlp.down_proj"),
            "layers.14.mlp.down_proj"
        );
        assert_eq!(canonical_stage_name(" layers.3 "), "layers.3");
        assert_eq!(canonical_stage_name("norm"), "norm");
    }

    #[test]
    fn test_parse_device() {
        assert!(parse_device("cpu").unwrap().is_cpu());
        assert!(parse_device("CPU").unwrap().is_cpu());
        assert!(matches!(parse_device("tpu"), Err(MindError::Config(_))));
        assert!(matches!(parse_device("cuda:x"), Err(MindError::Config(_))));
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(flag.check().is_ok());
        clone.cancel();
        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(MindError::Cancelled)));
    }

    #[test]
    fn test_no_capture_wants_nothing() {
        assert!(!NoCapture.wants("layers.0"));
    }

    #[test]
    fn test_model_dtype() {
        assert_eq!(model_dtype(&Device::Cpu), DType::F32);
    }
}
