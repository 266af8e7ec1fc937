//! The decide pipeline
//!
//! One call runs generation with a private [`ActivationCache`] attached to the
//! capture layer, mean-pools the stage output of the last forward pass, reads
//! the strongest dictionary features and optionally refines the pooled vector.
//!
//! ## Usage
//!
//! ```ignore
//! let config = ModelConfig::load(Path::new("mind.json"))?;
//! let pipeline = DecidePipeline::from_config(&config)?;
//! let response = pipeline.decide(&DecideRequest::new("agent-7", "Buy or sell?"))?;
//! ```

use std::sync::Arc;

use candle_core::{DType, Tensor};
use tracing::{debug, info, warn};

use crate::cache::ActivationCache;
use crate::config::ModelConfig;
use crate::error::{MindError, Result};
use crate::hrm::HierarchicalRefiner;
use crate::model::{
    canonical_stage_name, parse_device, CancelFlag, GenerativeModel, LlamaGenerator, NoCapture,
    StageObserver,
};
use crate::sae::{SparseEncoder, DEFAULT_TOP_K};
use crate::schema::{DecideRequest, DecideResponse, FeatureValue};

/// Generation plus feature extraction plus optional refinement.
///
/// Holds only immutable shared components, so one pipeline can be wrapped in
/// an `Arc` and called from many threads at once.
pub struct DecidePipeline {
    model: Arc<dyn GenerativeModel>,
    encoder: Option<Arc<SparseEncoder>>,
    refiner: Arc<HierarchicalRefiner>,
    capture_layer: Option<String>,
    top_k: usize,
}

impl DecidePipeline {
    /// Assemble a pipeline, checking that the parts fit together.
    ///
    /// Fails with `MissingActivation` if the capture layer is not a stage of
    /// the model, `DimensionMismatch` if the encoder or refiner width differs
    /// from the model width, `Config` if `top_k` exceeds [`DEFAULT_TOP_K`] and
    /// `InvalidTopK` if the dictionary is narrower than `top_k`.
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        encoder: Option<Arc<SparseEncoder>>,
        refiner: Arc<HierarchicalRefiner>,
        capture_layer: Option<String>,
        top_k: usize,
    ) -> Result<Self> {
        let capture_layer = capture_layer.map(|l| canonical_stage_name(&l).to_string());
        if let Some(layer) = &capture_layer {
            if !model.has_stage(layer) {
                return Err(MindError::MissingActivation {
                    layer: layer.clone(),
                });
            }
        }

        if top_k > DEFAULT_TOP_K {
            return Err(MindError::Config(format!(
                "top_k must be at most {DEFAULT_TOP_K}, got {top_k}"
            )));
        }

        let d_model = model.d_model();
        if let Some(encoder) = &encoder {
            if encoder.d_model() != d_model {
                return Err(MindError::dimension(
                    "sparse encoder width",
                    d_model,
                    encoder.d_model(),
                ));
            }
            if top_k > encoder.d_sae() {
                return Err(MindError::InvalidTopK {
                    k: top_k,
                    d_sae: encoder.d_sae(),
                });
            }
        }
        if refiner.d_model() != d_model {
            return Err(MindError::dimension("refiner width", d_model, refiner.d_model()));
        }

        if capture_layer.is_none() {
            warn!("No capture layer configured: features and refinement are unavailable");
        } else if encoder.is_none() {
            warn!("No sparse dictionary configured: responses carry no features");
        }

        Ok(Self {
            model,
            encoder,
            refiner,
            capture_layer,
            top_k,
        })
    }

    /// Load every component named by `config`.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        config.validate()?;
        let device = parse_device(&config.device)?;

        info!("Loading model: {}", config.model_path);
        let model = LlamaGenerator::load(&config.model_path, &device, config.temperature)?;
        info!(
            "Model loaded: {} layers, d_model={}",
            model.n_layers(),
            model.d_model()
        );
        let d_model = model.d_model();

        let encoder = match &config.sae_path {
            Some(path) => Some(Arc::new(SparseEncoder::load(path, &device)?)),
            None => None,
        };
        let refiner = match &config.hrm_path {
            Some(path) => HierarchicalRefiner::load(path, config.hrm_steps, &device)?,
            None => HierarchicalRefiner::seeded(d_model, config.hrm_steps, config.hrm_seed, &device)?,
        };

        Self::new(
            Arc::new(model),
            encoder,
            Arc::new(refiner),
            config.capture_layer.clone(),
            config.top_k,
        )
    }

    /// The stage whose output is tapped, if any
    pub fn capture_layer(&self) -> Option<&str> {
        self.capture_layer.as_deref()
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn d_model(&self) -> usize {
        self.model.d_model()
    }

    /// Run one request to completion.
    pub fn decide(&self, request: &DecideRequest) -> Result<DecideResponse> {
        self.decide_with_cancel(request, &CancelFlag::new())
    }

    /// Run one request, stopping with `Cancelled` once `cancel` is raised.
    pub fn decide_with_cancel(
        &self,
        request: &DecideRequest,
        cancel: &CancelFlag,
    ) -> Result<DecideResponse> {
        debug!(
            "decide: agent={} hrm={} max_new_tokens={}",
            request.agent_id, request.hrm_enabled, request.max_new_tokens
        );

        let Some(layer) = self.capture_layer.as_deref() else {
            if request.hrm_enabled {
                return Err(MindError::CaptureDisabled);
            }
            let text = self.generate(request, &mut NoCapture, cancel)?;
            return Ok(DecideResponse {
                text,
                features: Vec::new(),
                hrm_vector: None,
            });
        };

        let mut cache = ActivationCache::watching([layer]);
        cache.reset();
        let text = self.generate(request, &mut cache, cancel)?;

        let captured = cache.get(layer)?;
        let pooled = mean_pool(captured, self.model.d_model())?;
        debug!(
            "Pooled {} positions from the last pass of '{layer}'",
            captured.elem_count() / self.model.d_model()
        );

        let features = match &self.encoder {
            Some(encoder) => {
                let encoded = encoder.encode(&pooled)?;
                debug!("{} of {} features active", encoded.active_count(), encoded.len());
                encoded
                    .top_k(self.top_k)?
                    .into_iter()
                    .map(FeatureValue::from)
                    .collect()
            }
            None => Vec::new(),
        };

        let hrm_vector = if request.hrm_enabled {
            Some(self.refiner.refine(&pooled)?.to_vec1::<f32>()?)
        } else {
            None
        };

        Ok(DecideResponse {
            text,
            features,
            hrm_vector,
        })
    }

    fn generate(
        &self,
        request: &DecideRequest,
        observer: &mut dyn StageObserver,
        cancel: &CancelFlag,
    ) -> Result<String> {
        self.model
            .generate(&request.prompt, request.max_new_tokens, observer, cancel)
    }
}

/// Average a captured `(..., seq, d_model)` activation over its positions.
///
/// Returns a `(d_model,)` F32 tensor.
pub fn mean_pool(activation: &Tensor, d_model: usize) -> Result<Tensor> {
    let width = activation.dims().last().copied().unwrap_or(0);
    if width != d_model {
        return Err(MindError::dimension("captured activation width", d_model, width));
    }
    if activation.elem_count() == 0 {
        return Err(MindError::dimension("captured positions", 1, 0));
    }
    let rows = activation
        .to_dtype(DType::F32)?
        .reshape(((), d_model))?;
    Ok(rows.mean(0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_mean_pool_averages_positions() {
        let t = Tensor::new(&[[[1f32, 2.0], [3.0, 4.0], [5.0, 9.0]]], &Device::Cpu).unwrap();
        let pooled: Vec<f32> = mean_pool(&t, 2).unwrap().to_vec1().unwrap();
        assert_eq!(pooled, vec![3.0, 5.0]);
    }

    #[test]
    fn test_mean_pool_single_vector() {
        let t = Tensor::new(&[0.5f32, -1.0, 2.0], &Device::Cpu).unwrap();
        let pooled: Vec<f32> = mean_pool(&t, 3).unwrap().to_vec1().unwrap();
        assert_eq!(pooled, vec![0.5, -1.0, 2.0]);
    }

    #[test]
    fn test_mean_pool_width_mismatch() {
        let t = Tensor::zeros((1, 4, 6), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            mean_pool(&t, 8),
            Err(MindError::DimensionMismatch {
                expected: 8,
                actual: 6,
                ..
            })
        ));
    }

    #[test]
    fn test_mean_pool_converts_half_precision() {
        let t = Tensor::ones((1, 2, 4), DType::BF16, &Device::Cpu).unwrap();
        let pooled = mean_pool(&t, 4).unwrap();
        assert_eq!(pooled.dtype(), DType::F32);
        assert_eq!(pooled.to_vec1::<f32>().unwrap(), vec![1.0; 4]);
    }
}
