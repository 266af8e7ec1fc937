//! Process-wide model configuration
//!
//! Loaded once at start-up from a JSON file (and optionally overridden from
//! the command line), then treated as read-only.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MindError, Result};
use crate::hrm::DEFAULT_STEPS;
use crate::sae::DEFAULT_TOP_K;

/// Configuration for the decide pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Local model directory or HuggingFace repository id
    #[serde(alias = "llm_path")]
    pub model_path: String,
    /// Sparse dictionary checkpoint (safetensors)
    #[serde(default)]
    pub sae_path: Option<PathBuf>,
    /// Stage whose output feeds the dictionary and refiner
    #[serde(default, alias = "sae_layer")]
    pub capture_layer: Option<String>,
    /// Compute device: `cpu`, `cuda`, `cuda:N` or `metal`
    #[serde(default = "default_device")]
    pub device: String,
    /// Refiner checkpoint; seeded initialisation when absent
    #[serde(default)]
    pub hrm_path: Option<PathBuf>,
    #[serde(default = "default_hrm_steps")]
    pub hrm_steps: usize,
    #[serde(default = "default_hrm_seed")]
    pub hrm_seed: u64,
    /// Feature readings per response
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Sampling temperature (0.0 = greedy)
    #[serde(default)]
    pub temperature: f32,
    /// Largest `max_new_tokens` a request may ask for
    #[serde(default = "default_max_new_tokens_limit")]
    pub max_new_tokens_limit: usize,
}

fn default_device() -> String {
    "cuda".to_string()
}

fn default_hrm_steps() -> usize {
    DEFAULT_STEPS
}

fn default_hrm_seed() -> u64 {
    42
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_max_new_tokens_limit() -> usize {
    512
}

impl ModelConfig {
    /// Configuration with defaults for everything but the model path
    pub fn new(model_path: impl Into<String>) -> Self {
        Self {
            model_path: model_path.into(),
            sae_path: None,
            capture_layer: None,
            device: default_device(),
            hrm_path: None,
            hrm_steps: default_hrm_steps(),
            hrm_seed: default_hrm_seed(),
            top_k: default_top_k(),
            temperature: 0.0,
            max_new_tokens_limit: default_max_new_tokens_limit(),
        }
    }

    /// Read and validate a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| MindError::io(path, e))?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no request could succeed with
    pub fn validate(&self) -> Result<()> {
        if self.model_path.trim().is_empty() {
            return Err(MindError::Config("model_path is empty".to_string()));
        }
        if matches!(&self.capture_layer, Some(layer) if layer.trim().is_empty()) {
            return Err(MindError::Config("capture_layer is empty".to_string()));
        }
        if self.top_k == 0 || self.top_k > DEFAULT_TOP_K {
            return Err(MindError::Config(format!(
                "top_k must be in 1..={DEFAULT_TOP_K}, got {}",
                self.top_k
            )));
        }
        if self.max_new_tokens_limit == 0 {
            return Err(MindError::Config(
                "max_new_tokens_limit must be positive".to_string(),
            ));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(MindError::Config(format!(
                "temperature must be a finite non-negative number, got {}",
                self.temperature
            )));
        }
        Ok(())
    }

    /// Features are extracted only with both a dictionary and a capture layer
    pub fn feature_extraction_enabled(&self) -> bool {
        self.sae_path.is_some() && self.capture_layer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config: ModelConfig = serde_json::from_str(r#"{"model_path": "models/llama3"}"#).unwrap();
        assert_eq!(config, ModelConfig::new("models/llama3"));
        assert_eq!(config.device, "cuda");
        assert_eq!(config.hrm_steps, 3);
        assert_eq!(config.top_k, 20);
        assert_eq!(config.temperature, 0.0);
        assert!(!config.feature_extraction_enabled());
    }

    #[test]
    fn test_original_field_names_are_accepted() {
        let config: ModelConfig = serde_json::from_str(
            r#"{
                "llm_path": "models/llama3-8b",
                "sae_path": "models/sae-layer14.safetensors",
                "sae_layer": "layers.14.mlp.down_proj"
            }"#,
        )
        .unwrap();
        assert_eq!(config.model_path, "models/llama3-8b");
        assert_eq!(config.capture_layer.as_deref(), Some("layers.14.mlp.down_proj"));
        assert!(config.feature_extraction_enabled());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let parsed: std::result::Result<ModelConfig, _> =
            serde_json::from_str(r#"{"model_path": "m", "sae_layr": "layers.1"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = ModelConfig::new("m");
        assert!(config.validate().is_ok());

        config.top_k = 0;
        assert!(config.validate().is_err());

        config.top_k = 21;
        assert!(matches!(config.validate(), Err(MindError::Config(_))));
        config.top_k = 20;
        assert!(config.validate().is_ok());

        let mut config = ModelConfig::new("m");
        config.capture_layer = Some("  ".to_string());
        assert!(config.validate().is_err());

        let mut config = ModelConfig::new("m");
        config.temperature = -1.0;
        assert!(config.validate().is_err());

        assert!(ModelConfig::new(" ").validate().is_err());
    }
}
