//! Sparse autoencoder (SAE) feature extraction
//!
//! Projects a pooled residual activation into the dictionary's feature space
//! and ranks the most active features.
//!
//! # Architecture
//!
//! ```text
//! Encode:  features = ReLU(activation · W_encᵀ)        W_enc: [d_sae, d_model]
//! Decode:  activation_hat = features · W_dec            W_dec: [d_sae, d_model]
//! ```
//!
//! Parameters never change after loading, so one encoder is shared read-only
//! by every request.

use std::cmp::Ordering;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{MindError, Result};
use crate::weights::{expect_dims, WeightFile};

/// Number of feature readings returned per request.
pub const DEFAULT_TOP_K: usize = 20;

/// One ranked feature activation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureReading {
    /// Index of the feature in the dictionary (0..d_sae)
    pub feature_id: usize,
    /// Activation after ReLU, always >= 0
    pub value: f32,
}

/// Dense feature activations for one activation vector.
///
/// Values are elementwise >= 0. The vector is read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    /// Dictionary width
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw activations indexed by feature id
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Number of strictly positive features
    pub fn active_count(&self) -> usize {
        self.values.iter().filter(|&&v| v > 0.0).count()
    }

    /// Select the `k` largest activations.
    ///
    /// Readings are ordered by value descending; equal values are ordered by
    /// ascending feature id. When fewer than `k` features are active, the
    /// remainder is filled with zero-valued features in the same order.
    pub fn top_k(&self, k: usize) -> Result<Vec<FeatureReading>> {
        if k > self.values.len() {
            return Err(MindError::InvalidTopK {
                k,
                d_sae: self.values.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut indexed: Vec<(usize, f32)> = self.values.iter().copied().enumerate().collect();
        indexed.select_nth_unstable_by(k - 1, rank_order);
        indexed.truncate(k);
        indexed.sort_unstable_by(rank_order);

        Ok(indexed
            .into_iter()
            .map(|(feature_id, value)| FeatureReading { feature_id, value })
            .collect())
    }
}

/// Value descending, then feature id ascending. Total, so selection is deterministic.
fn rank_order(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

/// Sparse dictionary with a fixed encode matrix.
pub struct SparseEncoder {
    w_enc: Tensor,         // [d_sae, d_model]
    w_dec: Option<Tensor>, // [d_sae, d_model]
    d_model: usize,
    d_sae: usize,
}

impl SparseEncoder {
    /// Load the dictionary from a safetensors checkpoint.
    ///
    /// Expects `W_enc` with shape `[d_sae, d_model]` and optionally `W_dec`
    /// with the same shape. Weights are converted to F32.
    pub fn load(path: &Path, device: &Device) -> Result<Self> {
        info!("Loading sparse dictionary from {}", path.display());
        let mut file = WeightFile::open(path, device)?;
        let w_enc = file.take("W_enc")?;
        let w_dec = file.take_optional("W_dec");
        let encoder = Self::new(w_enc, w_dec)?;
        info!(
            "Sparse dictionary: d_model={}, d_sae={}, decoder={}",
            encoder.d_model,
            encoder.d_sae,
            encoder.w_dec.is_some()
        );
        Ok(encoder)
    }

    /// Build an encoder from in-memory weights.
    pub fn new(w_enc: Tensor, w_dec: Option<Tensor>) -> Result<Self> {
        let (d_sae, d_model) = w_enc.dims2()?;
        let w_enc = w_enc.to_dtype(DType::F32)?.contiguous()?;
        let w_dec = match w_dec {
            Some(w) => {
                expect_dims(&w, &[d_sae, d_model], "W_dec")?;
                Some(w.to_dtype(DType::F32)?.contiguous()?)
            }
            None => None,
        };
        Ok(Self {
            w_enc,
            w_dec,
            d_model,
            d_sae,
        })
    }

    /// Activation width the encoder accepts
    pub fn d_model(&self) -> usize {
        self.d_model
    }

    /// Number of dictionary features
    pub fn d_sae(&self) -> usize {
        self.d_sae
    }

    /// Whether `W_dec` was loaded
    pub fn has_decoder(&self) -> bool {
        self.w_dec.is_some()
    }

    /// Encode one activation vector into dictionary features.
    ///
    /// The activation is flattened first, so `(d_model,)` and `(1, d_model)`
    /// are both accepted.
    pub fn encode(&self, activation: &Tensor) -> Result<FeatureVector> {
        let flat = activation.flatten_all()?;
        let width = flat.dim(0)?;
        if width != self.d_model {
            return Err(MindError::dimension("sparse encoder input", self.d_model, width));
        }

        let a = flat
            .to_dtype(DType::F32)?
            .to_device(self.w_enc.device())?
            .contiguous()?;
        // W_enc @ a == a · W_encᵀ
        let pre_acts = self.w_enc.matmul(&a.unsqueeze(1)?)?.squeeze(1)?;
        let values: Vec<f32> = pre_acts.relu()?.to_vec1()?;

        Ok(FeatureVector { values })
    }

    /// Encode and rank in one call.
    pub fn top_k(&self, activation: &Tensor, k: usize) -> Result<Vec<FeatureReading>> {
        self.encode(activation)?.top_k(k)
    }

    /// Reconstruct an activation from features via `W_dec`.
    pub fn decode(&self, features: &FeatureVector) -> Result<Tensor> {
        let w_dec = self.w_dec.as_ref().ok_or_else(|| MindError::MissingWeight {
            name: "W_dec".to_string(),
        })?;
        if features.len() != self.d_sae {
            return Err(MindError::dimension("sparse decoder input", self.d_sae, features.len()));
        }
        let f = Tensor::from_slice(features.values(), (1, self.d_sae), w_dec.device())?;
        Ok(f.matmul(w_dec)?.squeeze(0)?)
    }

    /// Mean squared error between an activation and its reconstruction.
    pub fn reconstruction_mse(&self, activation: &Tensor) -> Result<f32> {
        let features = self.encode(activation)?;
        let reconstructed = self.decode(&features)?;
        let original = activation
            .flatten_all()?
            .to_dtype(DType::F32)?
            .to_device(reconstructed.device())?;
        let mse = (original - reconstructed)?.sqr()?.mean_all()?;
        Ok(mse.to_scalar::<f32>()?)
    }
}
