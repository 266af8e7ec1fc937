//! Activation cache for named stage outputs
//!
//! One cache belongs to exactly one in-flight inference. The pipeline creates
//! it, hands it to the model as a [`StageObserver`], and reads it back once
//! generation returns, so overlapping requests never share capture state.

use std::collections::{BTreeSet, HashMap};

use candle_core::Tensor;

use crate::error::{MindError, Result};
use crate::model::StageObserver;

/// Stores stage outputs captured during one inference
#[derive(Debug, Default)]
pub struct ActivationCache {
    /// Stage names this cache asks the model to report
    watched: BTreeSet<String>,
    /// Captured outputs keyed by stage name
    activations: HashMap<String, Tensor>,
}

impl ActivationCache {
    /// Create an empty cache that watches no stage
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache watching the given stage names
    pub fn watching<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            watched: names.into_iter().map(Into::into).collect(),
            activations: HashMap::new(),
        }
    }

    /// Add a stage to the watch set
    pub fn watch(&mut self, name: impl Into<String>) {
        self.watched.insert(name.into());
    }

    /// Whether `name` is in the watch set
    pub fn is_watching(&self, name: &str) -> bool {
        self.watched.contains(name)
    }

    /// Store `tensor` under `name`, replacing any earlier value
    pub fn record(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.activations.insert(name.into(), tensor);
    }

    /// Drop every captured activation. The watch set is kept.
    pub fn reset(&mut self) {
        self.activations.clear();
    }

    /// Most recent activation for `name`
    pub fn get(&self, name: &str) -> Result<&Tensor> {
        self.activations
            .get(name)
            .ok_or_else(|| MindError::MissingActivation {
                layer: name.to_string(),
            })
    }

    /// Whether an activation for `name` was captured
    pub fn contains(&self, name: &str) -> bool {
        self.activations.contains_key(name)
    }

    /// Number of captured stages
    pub fn len(&self) -> usize {
        self.activations.len()
    }

    /// Check if nothing has been captured
    pub fn is_empty(&self) -> bool {
        self.activations.is_empty()
    }

    /// Names of the captured stages, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.activations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl StageObserver for ActivationCache {
    fn wants(&self, stage: &str) -> bool {
        self.is_watching(stage)
    }

    fn observe(&mut self, stage: &str, output: &Tensor) -> Result<()> {
        self.record(stage, output.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_record_overwrites() {
        let device = Device::Cpu;
        let mut cache = ActivationCache::new();
        cache.record("layers.0", Tensor::zeros((1, 3, 8), DType::F32, &device).unwrap());
        cache.record("layers.0", Tensor::ones((1, 5, 8), DType::F32, &device).unwrap());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("layers.0").unwrap().dims(), &[1, 5, 8]);
    }

    #[test]
    fn test_reset_clears_but_keeps_watch_set() {
        let device = Device::Cpu;
        let mut cache = ActivationCache::watching(["layers.14.mlp.down_proj"]);
        cache.record(
            "layers.14.mlp.down_proj",
            Tensor::zeros((1, 1, 8), DType::F32, &device).unwrap(),
        );
        assert!(!cache.is_empty());

        cache.reset();

        assert!(cache.is_empty());
        assert!(cache.is_watching("layers.14.mlp.down_proj"));
    }

    #[test]
    fn test_get_missing_stage() {
        let cache = ActivationCache::watching(["layers.3"]);
        match cache.get("layers.3") {
            Err(MindError::MissingActivation { layer }) => assert_eq!(layer, "layers.3"),
            other => panic!("expected MissingActivation, got {other:?}"),
        }
    }

    #[test]
    fn test_observer_only_wants_watched_stages() {
        let device = Device::Cpu;
        let mut cache = ActivationCache::watching(["layers.1"]);
        assert!(cache.wants("layers.1"));
        assert!(!cache.wants("layers.1.mlp"));

        let t = Tensor::zeros((1, 2, 4), DType::F32, &device).unwrap();
        cache.observe("layers.1", &t).unwrap();
        assert_eq!(cache.names(), vec!["layers.1"]);
    }

    #[test]
    fn test_observer_keeps_latest_pass() {
        let device = Device::Cpu;
        let mut cache = ActivationCache::watching(["layers.1"]);
        let prompt = Tensor::zeros((1, 5, 4), DType::F32, &device).unwrap();
        let step = Tensor::ones((1, 1, 4), DType::F32, &device).unwrap();

        cache.observe("layers.1", &prompt).unwrap();
        cache.observe("layers.1", &step).unwrap();

        let latest = cache.get("layers.1").unwrap();
        assert_eq!(latest.dims(), &[1, 1, 4]);
        assert_eq!(latest.flatten_all().unwrap().to_vec1::<f32>().unwrap(), vec![1.0; 4]);
    }
}
