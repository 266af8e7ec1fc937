//! Per-generation key/value cache
//!
//! Each layer keeps keys and values of shape
//! `[batch, num_kv_heads, seq_len, head_dim]` for every position processed so
//! far. A cache lives for exactly one `generate` call and is never shared
//! between requests.

use candle_core::Tensor;

/// Key/value tensors per decoder layer
#[derive(Debug, Clone)]
pub struct KVCache {
    keys: Vec<Option<Tensor>>,
    values: Vec<Option<Tensor>>,
}

impl KVCache {
    /// Create an empty cache for `n_layers` layers
    pub fn new(n_layers: usize) -> Self {
        Self {
            keys: vec![None; n_layers],
            values: vec![None; n_layers],
        }
    }

    /// Number of positions already processed (0 if empty)
    pub fn seq_len(&self) -> usize {
        self.keys
            .iter()
            .flatten()
            .next()
            .map_or(0, |k| k.dim(2).unwrap_or(0))
    }

    pub fn n_layers(&self) -> usize {
        self.keys.len()
    }

    /// Mutable key and value slots of one layer
    pub fn layer_mut(&mut self, layer: usize) -> (&mut Option<Tensor>, &mut Option<Tensor>) {
        (&mut self.keys[layer], &mut self.values[layer])
    }

    /// Bytes held by all cached tensors
    pub fn memory_usage(&self) -> usize {
        self.keys
            .iter()
            .chain(&self.values)
            .flatten()
            .map(|t| t.elem_count() * t.dtype().size_in_bytes())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_new_cache_is_empty() {
        let cache = KVCache::new(32);
        assert_eq!(cache.n_layers(), 32);
        assert_eq!(cache.seq_len(), 0);
        assert_eq!(cache.memory_usage(), 0);
    }

    #[test]
    fn test_layer_slots_track_positions() {
        let mut cache = KVCache::new(2);
        let kv = Tensor::zeros((1, 4, 7, 16), DType::F32, &Device::Cpu).unwrap();
        {
            let (k, v) = cache.layer_mut(1);
            *k = Some(kv.clone());
            *v = Some(kv);
        }
        assert_eq!(cache.seq_len(), 7);
        assert_eq!(cache.memory_usage(), 2 * 4 * 7 * 16 * 4);
    }
}
