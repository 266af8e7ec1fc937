//! LLaMA forward pass with named-stage capture
//!
//! Runs the decoder layer by layer with a KV-cache and reports stage outputs
//! to a [`StageObserver`]. Every stage the observer wants is reported exactly
//! once per forward pass; during generation that is once for the prompt pass
//! and once per decode step.
//!
//! ## Stage names
//!
//! | stage                      | tensor                                |
//! |----------------------------|---------------------------------------|
//! | `embed_tokens`             | token embeddings                      |
//! | `layers.{i}.self_attn`     | attention output (after `o_proj`)     |
//! | `layers.{i}.mlp`           | MLP output                            |
//! | `layers.{i}.mlp.down_proj` | same tensor as `layers.{i}.mlp`       |
//! | `layers.{i}`               | residual stream after decoder layer i |
//! | `norm`                     | final normalized hidden states        |
//!
//! All outputs have shape `[batch, seq, hidden_size]`.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_nn::{embedding, linear_no_bias, Embedding, Linear, RmsNorm, VarBuilder};
use hf_hub::{api::sync::Api, Repo, RepoType};
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{MindError, Result};
use crate::kv_cache::KVCache;
use crate::model::{CancelFlag, StageObserver};

/// Model configuration (subset of HuggingFace `config.json`)
#[derive(Debug, Clone, Deserialize)]
pub struct LlamaConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_attention_heads: usize,
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,
    pub num_hidden_layers: usize,
    pub vocab_size: usize,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f64,
    #[serde(default = "default_rms_norm_eps")]
    pub rms_norm_eps: f64,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub tie_word_embeddings: bool,
    #[serde(default)]
    pub eos_token_id: Option<EosTokens>,
}

/// `eos_token_id` is a single id in older configs and a list in Llama 3.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EosTokens {
    One(u32),
    Many(Vec<u32>),
}

impl EosTokens {
    pub fn to_vec(&self) -> Vec<u32> {
        match self {
            Self::One(id) => vec![*id],
            Self::Many(ids) => ids.clone(),
        }
    }
}

impl LlamaConfig {
    fn kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }

    fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
}

fn default_rope_theta() -> f64 {
    500_000.0
}

fn default_rms_norm_eps() -> f64 {
    1e-5
}

fn default_max_position_embeddings() -> usize {
    8192
}

/// Files needed to instantiate a model.
#[derive(Debug, Clone)]
pub struct LlamaFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

/// Safetensors index for sharded models
#[derive(Debug, Deserialize)]
struct SafetensorsIndex {
    weight_map: std::collections::HashMap<String, String>,
}

impl LlamaFiles {
    /// Resolve model files from a local directory, or download them from
    /// HuggingFace when `model_path` is not a directory.
    pub fn locate(model_path: &str) -> Result<Self> {
        let dir = Path::new(model_path);
        if dir.is_dir() {
            info!("Loading model files from {}", dir.display());
            Self::from_dir(dir)
        } else {
            info!("Fetching model files for {model_path} from HuggingFace");
            Self::from_hub(model_path)
        }
    }

    fn from_dir(dir: &Path) -> Result<Self> {
        let index_path = dir.join("model.safetensors.index.json");
        let weights = if index_path.is_file() {
            shard_names(&index_path)?
                .into_iter()
                .map(|name| dir.join(name))
                .collect()
        } else {
            vec![dir.join("model.safetensors")]
        };
        for path in &weights {
            if !path.is_file() {
                return Err(MindError::Config(format!(
                    "weight file {} not found",
                    path.display()
                )));
            }
        }
        Ok(Self {
            config: dir.join("config.json"),
            tokenizer: dir.join("tokenizer.json"),
            weights,
        })
    }

    fn from_hub(model_id: &str) -> Result<Self> {
        let api = Api::new()?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));
        let config = repo.get("config.json")?;
        let tokenizer = repo.get("tokenizer.json")?;

        let weights = if let Ok(index_path) = repo.get("model.safetensors.index.json") {
            let shards = shard_names(&index_path)?;
            info!("Downloading {} shard files...", shards.len());
            shards
                .iter()
                .map(|name| repo.get(name).map_err(MindError::from))
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![repo.get("model.safetensors")?]
        };
        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }
}

/// Unique shard filenames listed in a safetensors index, sorted.
fn shard_names(index_path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(index_path).map_err(|e| MindError::io(index_path, e))?;
    let index: SafetensorsIndex = serde_json::from_str(&text)?;
    let mut names: Vec<String> = index.weight_map.into_values().collect();
    names.sort();
    names.dedup();
    Ok(names)
}

/// Precomputed rotary tables, `[max_seq_len, head_dim / 2]`
struct RotaryEmbedding {
    cos: Tensor,
    sin: Tensor,
}

impl RotaryEmbedding {
    fn new(config: &LlamaConfig, device: &Device, dtype: DType) -> Result<Self> {
        let dim = config.head_dim();
        let inv_freq: Vec<f32> = (0..dim)
            .step_by(2)
            .map(|i| 1.0 / config.rope_theta.powf(i as f64 / dim as f64) as f32)
            .collect();
        let inv_freq = Tensor::new(inv_freq, device)?;
        let positions: Vec<f32> = (0..config.max_position_embeddings)
            .map(|i| i as f32)
            .collect();
        let positions = Tensor::new(positions, device)?;

        let freqs = positions.unsqueeze(1)?.matmul(&inv_freq.unsqueeze(0)?)?;
        Ok(Self {
            cos: freqs.cos()?.to_dtype(dtype)?,
            sin: freqs.sin()?.to_dtype(dtype)?,
        })
    }

    fn apply(&self, q: &Tensor, k: &Tensor, start_pos: usize) -> Result<(Tensor, Tensor)> {
        let seq_len = q.dim(2)?;
        let cos = self.cos.narrow(0, start_pos, seq_len)?;
        let sin = self.sin.narrow(0, start_pos, seq_len)?;
        let q = candle_nn::rotary_emb::rope(&q.contiguous()?, &cos, &sin)?;
        let k = candle_nn::rotary_emb::rope(&k.contiguous()?, &cos, &sin)?;
        Ok((q, k))
    }
}

/// Attention mask for `new_len` queries starting at `start_pos` over
/// `start_pos + new_len` keys. `None` when a single query sees everything.
fn generation_mask(
    new_len: usize,
    start_pos: usize,
    device: &Device,
    dtype: DType,
) -> Result<Option<Tensor>> {
    if new_len == 1 {
        return Ok(None);
    }
    let total = start_pos + new_len;
    let mask: Vec<f32> = (0..new_len)
        .flat_map(|i| {
            (0..total).map(move |j| if j <= start_pos + i { 0.0 } else { f32::NEG_INFINITY })
        })
        .collect();
    let mask = Tensor::from_vec(mask, (1, 1, new_len, total), device)?.to_dtype(dtype)?;
    Ok(Some(mask))
}

fn repeat_kv(x: Tensor, n_rep: usize) -> Result<Tensor> {
    if n_rep == 1 {
        return Ok(x);
    }
    let (b, num_kv_heads, seq_len, head_dim) = x.dims4()?;
    let x = x
        .unsqueeze(2)?
        .expand((b, num_kv_heads, n_rep, seq_len, head_dim))?;
    Ok(x.reshape((b, num_kv_heads * n_rep, seq_len, head_dim))?)
}

/// Grouped-query attention, no bias on any projection
struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(vb: VarBuilder, config: &LlamaConfig) -> Result<Self> {
        let head_dim = config.head_dim();
        let hidden = config.hidden_size;
        let kv_dim = config.kv_heads() * head_dim;
        Ok(Self {
            q_proj: linear_no_bias(hidden, config.num_attention_heads * head_dim, vb.pp("q_proj"))?,
            k_proj: linear_no_bias(hidden, kv_dim, vb.pp("k_proj"))?,
            v_proj: linear_no_bias(hidden, kv_dim, vb.pp("v_proj"))?,
            o_proj: linear_no_bias(config.num_attention_heads * head_dim, hidden, vb.pp("o_proj"))?,
            num_heads: config.num_attention_heads,
            num_kv_heads: config.kv_heads(),
            head_dim,
        })
    }

    fn forward(
        &self,
        x: &Tensor,
        rotary: &RotaryEmbedding,
        start_pos: usize,
        cache_k: &mut Option<Tensor>,
        cache_v: &mut Option<Tensor>,
    ) -> Result<Tensor> {
        let (b, seq_len, _) = x.dims3()?;

        let q = self
            .q_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let k = self
            .k_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?;
        let v = self
            .v_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let (q, k) = rotary.apply(&q, &k, start_pos)?;

        let (k, v) = match (cache_k.as_ref(), cache_v.as_ref()) {
            (Some(prev_k), Some(prev_v)) => {
                (Tensor::cat(&[prev_k, &k], 2)?, Tensor::cat(&[prev_v, &v], 2)?)
            }
            _ => (k, v),
        };
        *cache_k = Some(k.clone());
        *cache_v = Some(v.clone());

        let n_rep = self.num_heads / self.num_kv_heads;
        let k = repeat_kv(k, n_rep)?.contiguous()?;
        let v = repeat_kv(v, n_rep)?.contiguous()?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.transpose(2, 3)?.contiguous()?)? * scale)?;
        let scores = match generation_mask(seq_len, start_pos, x.device(), scores.dtype())? {
            Some(mask) => scores.broadcast_add(&mask)?,
            None => scores,
        };
        let weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let out = weights.matmul(&v)?.transpose(1, 2)?.reshape((b, seq_len, ()))?;
        Ok(self.o_proj.forward(&out)?)
    }
}

/// SwiGLU MLP, no bias
struct Mlp {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
}

impl Mlp {
    fn load(vb: VarBuilder, config: &LlamaConfig) -> Result<Self> {
        let (h, i) = (config.hidden_size, config.intermediate_size);
        Ok(Self {
            gate_proj: linear_no_bias(h, i, vb.pp("gate_proj"))?,
            up_proj: linear_no_bias(h, i, vb.pp("up_proj"))?,
            down_proj: linear_no_bias(i, h, vb.pp("down_proj"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let gate = candle_nn::ops::silu(&self.gate_proj.forward(x)?)?;
        let hidden = (gate * self.up_proj.forward(x)?)?;
        Ok(self.down_proj.forward(&hidden)?)
    }
}

/// Precomputed stage names for one decoder layer
struct LayerStages {
    output: String,
    self_attn: String,
    mlp: String,
    down_proj: String,
}

impl LayerStages {
    fn new(i: usize) -> Self {
        Self {
            output: format!("layers.{i}"),
            self_attn: format!("layers.{i}.self_attn"),
            mlp: format!("layers.{i}.mlp"),
            down_proj: format!("layers.{i}.mlp.down_proj"),
        }
    }

    fn all(&self) -> [&str; 4] {
        [
            self.output.as_str(),
            self.self_attn.as_str(),
            self.mlp.as_str(),
            self.down_proj.as_str(),
        ]
    }
}

/// Report `output` when the observer watches `stage`.
fn emit(observer: &mut dyn StageObserver, stage: &str, output: &Tensor) -> Result<()> {
    if observer.wants(stage) {
        observer.observe(stage, output)?;
    }
    Ok(())
}

struct DecoderLayer {
    self_attn: Attention,
    mlp: Mlp,
    input_layernorm: RmsNorm,
    post_attention_layernorm: RmsNorm,
    stages: LayerStages,
}

impl DecoderLayer {
    fn load(vb: VarBuilder, config: &LlamaConfig, index: usize) -> Result<Self> {
        let eps = config.rms_norm_eps;
        Ok(Self {
            self_attn: Attention::load(vb.pp("self_attn"), config)?,
            mlp: Mlp::load(vb.pp("mlp"), config)?,
            input_layernorm: candle_nn::rms_norm(config.hidden_size, eps, vb.pp("input_layernorm"))?,
            post_attention_layernorm: candle_nn::rms_norm(
                config.hidden_size,
                eps,
                vb.pp("post_attention_layernorm"),
            )?,
            stages: LayerStages::new(index),
        })
    }

    fn forward(
        &self,
        x: &Tensor,
        rotary: &RotaryEmbedding,
        start_pos: usize,
        cache_k: &mut Option<Tensor>,
        cache_v: &mut Option<Tensor>,
        observer: &mut dyn StageObserver,
    ) -> Result<Tensor> {
        let attn = self.self_attn.forward(
            &self.input_layernorm.forward(x)?,
            rotary,
            start_pos,
            cache_k,
            cache_v,
        )?;
        emit(observer, &self.stages.self_attn, &attn)?;
        let x = (x + attn)?;

        let mlp = self.mlp.forward(&self.post_attention_layernorm.forward(&x)?)?;
        emit(observer, &self.stages.mlp, &mlp)?;
        emit(observer, &self.stages.down_proj, &mlp)?;
        let x = (x + mlp)?;

        emit(observer, &self.stages.output, &x)?;
        Ok(x)
    }
}

/// LLaMA decoder that reports named stages during its forward passes
pub struct CaptureLlama {
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    norm: RmsNorm,
    lm_head: Linear,
    rotary: RotaryEmbedding,
    config: LlamaConfig,
    device: Device,
}

impl CaptureLlama {
    /// Load weights listed in `files` onto `device` with `dtype`.
    pub fn load(files: &LlamaFiles, device: &Device, dtype: DType) -> Result<Self> {
        let text = std::fs::read_to_string(&files.config)
            .map_err(|e| MindError::io(&files.config, e))?;
        let config: LlamaConfig = serde_json::from_str(&text)?;
        info!(
            "Model config: {} layers, {} hidden, {} vocab",
            config.num_hidden_layers, config.hidden_size, config.vocab_size
        );
        if config.hidden_size % config.num_attention_heads != 0
            || config.num_attention_heads % config.kv_heads() != 0
        {
            return Err(MindError::Config(format!(
                "inconsistent head layout: hidden={}, heads={}, kv_heads={}",
                config.hidden_size,
                config.num_attention_heads,
                config.kv_heads()
            )));
        }

        info!("Loading weights from {} file(s)...", files.weights.len());
        // SAFETY: the files are mmaped read-only and not modified while loaded.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files.weights, dtype, device)? };
        let vb_model = vb.pp("model");

        let embed_tokens = embedding(config.vocab_size, config.hidden_size, vb_model.pp("embed_tokens"))?;
        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            if (i + 1) % 10 == 0 || i == 0 {
                info!("Loading layer {}/{}", i + 1, config.num_hidden_layers);
            }
            layers.push(DecoderLayer::load(vb_model.pp(format!("layers.{i}")), &config, i)?);
        }
        let norm = candle_nn::rms_norm(config.hidden_size, config.rms_norm_eps, vb_model.pp("norm"))?;
        let lm_head = if config.tie_word_embeddings {
            Linear::new(embed_tokens.embeddings().clone(), None)
        } else {
            linear_no_bias(config.hidden_size, config.vocab_size, vb.pp("lm_head"))?
        };
        let rotary = RotaryEmbedding::new(&config, device, dtype)?;

        info!("Model loaded with {} layers", config.num_hidden_layers);
        Ok(Self {
            embed_tokens,
            layers,
            norm,
            lm_head,
            rotary,
            config,
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &LlamaConfig {
        &self.config
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn d_model(&self) -> usize {
        self.config.hidden_size
    }

    /// Every stage name this model reports
    pub fn stage_names(&self) -> Vec<String> {
        let mut names = vec!["embed_tokens".to_string()];
        for layer in &self.layers {
            names.extend(layer.stages.all().iter().map(|s| (*s).to_string()));
        }
        names.push("norm".to_string());
        names
    }

    pub fn new_kv_cache(&self) -> KVCache {
        KVCache::new(self.layers.len())
    }

    /// One forward pass over `input_ids` (`[1, seq]`), extending `kv_cache`.
    ///
    /// Returns the logits of the last position, shape `[1, vocab]`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        kv_cache: &mut KVCache,
        observer: &mut dyn StageObserver,
    ) -> Result<Tensor> {
        let start_pos = kv_cache.seq_len();
        let seq_len = input_ids.dim(1)?;
        if start_pos + seq_len > self.config.max_position_embeddings {
            return Err(MindError::InvalidRequest(format!(
                "sequence of {} tokens exceeds the model context of {}",
                start_pos + seq_len,
                self.config.max_position_embeddings
            )));
        }

        let mut hidden = self.embed_tokens.forward(input_ids)?;
        emit(observer, "embed_tokens", &hidden)?;

        for (i, layer) in self.layers.iter().enumerate() {
            let (cache_k, cache_v) = kv_cache.layer_mut(i);
            hidden = layer.forward(&hidden, &self.rotary, start_pos, cache_k, cache_v, observer)?;
        }

        let output = self.norm.forward(&hidden)?;
        emit(observer, "norm", &output)?;

        let last = output.i((.., seq_len - 1, ..))?;
        Ok(self.lm_head.forward(&last)?)
    }

    /// Generate up to `max_new_tokens` tokens after `prompt_ids`.
    ///
    /// Returns prompt and generated ids. Stops early on any of `stop_tokens`.
    /// `cancel` is checked before every forward pass.
    pub fn generate(
        &self,
        prompt_ids: &[u32],
        max_new_tokens: usize,
        temperature: f32,
        stop_tokens: &[u32],
        observer: &mut dyn StageObserver,
        cancel: &CancelFlag,
    ) -> Result<Vec<u32>> {
        if prompt_ids.is_empty() {
            return Err(MindError::InvalidRequest("prompt produced no tokens".to_string()));
        }
        let mut kv_cache = self.new_kv_cache();
        let mut tokens = prompt_ids.to_vec();

        cancel.check()?;
        let prompt = Tensor::new(prompt_ids, &self.device)?.unsqueeze(0)?;
        let mut logits = self.forward(&prompt, &mut kv_cache, observer)?;

        for step in 0..max_new_tokens {
            let next = sample_from_logits(&logits, temperature)?;
            if stop_tokens.contains(&next) {
                debug!("Stop token {next} after {step} generated tokens");
                break;
            }
            tokens.push(next);
            if step + 1 == max_new_tokens {
                break;
            }

            cancel.check()?;
            let input = Tensor::new(&[next], &self.device)?.unsqueeze(0)?;
            logits = self.forward(&input, &mut kv_cache, observer)?;
        }

        debug!(
            "KV cache: {} layers, {} positions, {} bytes",
            kv_cache.n_layers(),
            kv_cache.seq_len(),
            kv_cache.memory_usage()
        );
        Ok(tokens)
    }
}

/// Sample a token from logits with temperature (greedy when `temperature <= 0`)
fn sample_from_logits(logits: &Tensor, temperature: f32) -> Result<u32> {
    let logits: Vec<f32> = logits.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;

    if temperature <= 0.0 {
        let (max_idx, _) = logits
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .ok_or_else(|| MindError::Config("model produced empty logits".to_string()))?;
        return Ok(max_idx as u32);
    }

    let scaled: Vec<f32> = logits.iter().map(|x| x / temperature).collect();
    let max_val = scaled.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp_vals: Vec<f32> = scaled.iter().map(|x| (x - max_val).exp()).collect();
    let sum: f32 = exp_vals.iter().sum();

    let r: f32 = rand::thread_rng().gen::<f32>() * sum;
    let mut cumsum = 0.0;
    for (idx, &p) in exp_vals.iter().enumerate() {
        cumsum += p;
        if r < cumsum {
            return Ok(idx as u32);
        }
    }
    Ok((exp_vals.len() - 1) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_mask_prompt_pass() {
        let mask = generation_mask(3, 0, &Device::Cpu, DType::F32).unwrap().unwrap();
        assert_eq!(mask.dims(), &[1, 1, 3, 3]);
        let rows: Vec<Vec<f32>> = mask.squeeze(0).unwrap().squeeze(0).unwrap().to_vec2().unwrap();
        assert_eq!(rows[0][0], 0.0);
        assert!(rows[0][1].is_infinite());
        assert_eq!(rows[2], vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_generation_mask_with_cached_prefix() {
        let mask = generation_mask(2, 3, &Device::Cpu, DType::F32).unwrap().unwrap();
        assert_eq!(mask.dims(), &[1, 1, 2, 5]);
        let rows: Vec<Vec<f32>> = mask.squeeze(0).unwrap().squeeze(0).unwrap().to_vec2().unwrap();
        assert_eq!(&rows[0][..4], &[0.0, 0.0, 0.0, 0.0]);
        assert!(rows[0][4].is_infinite());
        assert!(rows[1].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_single_token_needs_no_mask() {
        assert!(generation_mask(1, 7, &Device::Cpu, DType::F32).unwrap().is_none());
    }

    #[test]
    fn test_greedy_sampling() {
        let logits = Tensor::new(&[[0.1f32, 3.0, -1.0, 2.9]], &Device::Cpu).unwrap();
        assert_eq!(sample_from_logits(&logits, 0.0).unwrap(), 1);
    }

    #[test]
    fn test_eos_tokens_forms() {
        let one: EosTokens = serde_json::from_str("128001").unwrap();
        let many: EosTokens = serde_json::from_str("[128001, 128009]").unwrap();
        assert_eq!(one.to_vec(), vec![128001]);
        assert_eq!(many.to_vec(), vec![128001, 128009]);
    }

    #[test]
    fn test_config_defaults() {
        let config: LlamaConfig = serde_json::from_str(
            r#"{"hidden_size": 64, "intermediate_size": 128, "num_attention_heads": 4,
                "num_hidden_layers": 2, "vocab_size": 100}"#,
        )
        .unwrap();
        assert_eq!(config.kv_heads(), 4);
        assert_eq!(config.head_dim(), 16);
        assert!(!config.tie_word_embeddings);
        assert!(config.eos_token_id.is_none());
    }

    #[test]
    fn test_layer_stage_names() {
        let stages = LayerStages::new(14);
        assert_eq!(
            stages.all(),
            ["layers.14", "layers.14.self_attn", "layers.14.mlp", "layers.14.mlp.down_proj"]
        );
    }
}
