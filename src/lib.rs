// Pedantic clippy configuration for ML/math codebase
// These are acceptable in numerical/ML code:
#![allow(clippy::cast_precision_loss)] // usize→f32 intentional in ML
#![allow(clippy::cast_possible_truncation)] // usize→u32 in tensor indexing
#![allow(clippy::cast_possible_wrap)] // usize→i64 in tensor ops
#![allow(clippy::many_single_char_names)] // r, z, n, h standard in GRU math
#![allow(clippy::similar_names)] // related variables like `w1`/`b1`
#![allow(clippy::module_name_repetitions)] // ModelConfig in config.rs is fine
// Documentation pedantic:
#![allow(clippy::doc_markdown)] // backticks for every technical term is excessive
#![allow(clippy::missing_errors_doc)] // # Errors section for every Result fn
#![allow(clippy::missing_panics_doc)] // # Panics section for every panic
// Method style pedantic:
#![allow(clippy::must_use_candidate)] // #[must_use] on every pure fn is excessive
#![allow(clippy::return_self_not_must_use)] // #[must_use] on Self returns
#![allow(clippy::needless_pass_by_value)] // value params for API flexibility
#![allow(clippy::cast_sign_loss)] // f32→usize when value is known positive

//! mind-rs: interpretable decisions from a generative model
//!
//! Generates a reply to an agent's prompt while tapping one internal stage of
//! the model, explains that activation with a sparse dictionary and optionally
//! refines it with a small recurrent corrector.
//!
//! ## Architecture
//!
//! - `pipeline`: DecidePipeline coordinating generation, features and refinement
//! - `model`: GenerativeModel trait, stage observers, device selection
//! - `forward_llama`: LLaMA forward pass reporting named stages to an observer
//! - `kv_cache`: KV-cache for autoregressive generation
//! - `cache`: Per-request ActivationCache for captured stage outputs
//! - `sae`: Sparse autoencoder encoding and top-k feature selection
//! - `hrm`: Hierarchical refiner (GRU low level, feed-forward high level)
//! - `weights`: Safetensors checkpoint loading for the dictionary and refiner
//! - `schema`: Decide request and response types
//! - `config`: Process-wide ModelConfig
//! - `error`: MindError and the library Result alias

pub mod cache;
pub mod config;
pub mod error;
pub mod forward_llama;
pub mod hrm;
pub mod kv_cache;
pub mod model;
pub mod pipeline;
pub mod sae;
pub mod schema;
pub mod weights;

pub use cache::ActivationCache;
pub use config::ModelConfig;
pub use error::{MindError, Result};
pub use forward_llama::{CaptureLlama, LlamaConfig, LlamaFiles};
pub use hrm::{HierarchicalRefiner, RefinerParts, DEFAULT_STEPS};
pub use kv_cache::KVCache;
pub use model::{
    canonical_stage_name, parse_device, CancelFlag, GenerativeModel, LlamaGenerator, NoCapture,
    StageObserver,
};
pub use pipeline::{mean_pool, DecidePipeline};
pub use sae::{FeatureReading, FeatureVector, SparseEncoder, DEFAULT_TOP_K};
pub use schema::{DecideRequest, DecideResponse, FeatureValue};
pub use weights::WeightFile;
