//! Safetensors checkpoint reading for the dictionary and refiner parameters

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use safetensors::tensor::{SafeTensors, TensorView};
use tracing::info;

use crate::error::{MindError, Result};

/// Every tensor of one checkpoint file, converted to F32 on a device.
pub struct WeightFile {
    tensors: HashMap<String, Tensor>,
}

impl WeightFile {
    /// Read and convert all tensors in `path`.
    pub fn open(path: &Path, device: &Device) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| MindError::io(path, e))?;
        info!("Read {} MB from {}", data.len() / (1024 * 1024), path.display());
        let st = SafeTensors::deserialize(&data)?;

        let mut tensors = HashMap::with_capacity(st.len());
        for (name, view) in st.tensors() {
            let tensor = tensor_from_view(&view, device)?.to_dtype(DType::F32)?;
            tensors.insert(name, tensor);
        }
        Ok(Self { tensors })
    }

    /// Wrap tensors that are already in memory.
    pub fn from_tensors(tensors: HashMap<String, Tensor>) -> Self {
        Self { tensors }
    }

    /// Take a tensor out of the file, failing when it is absent.
    pub fn take(&mut self, name: &str) -> Result<Tensor> {
        self.tensors
            .remove(name)
            .ok_or_else(|| MindError::MissingWeight {
                name: name.to_string(),
            })
    }

    /// Take a tensor out of the file if present.
    pub fn take_optional(&mut self, name: &str) -> Option<Tensor> {
        self.tensors.remove(name)
    }
}

/// Check that `tensor` has exactly the dimensions `expected`.
pub(crate) fn expect_dims(tensor: &Tensor, expected: &[usize], context: &str) -> Result<()> {
    let dims = tensor.dims();
    if dims.len() != expected.len() {
        return Err(MindError::dimension(
            format!("rank of {context}"),
            expected.len(),
            dims.len(),
        ));
    }
    for (axis, (&want, &got)) in expected.iter().zip(dims).enumerate() {
        if want != got {
            return Err(MindError::dimension(
                format!("{context} axis {axis}"),
                want,
                got,
            ));
        }
    }
    Ok(())
}

/// Convert a safetensors `TensorView` to a candle `Tensor` on the given device.
fn tensor_from_view(view: &TensorView<'_>, device: &Device) -> Result<Tensor> {
    let dtype = match view.dtype() {
        safetensors::Dtype::BF16 => DType::BF16,
        safetensors::Dtype::F16 => DType::F16,
        safetensors::Dtype::F32 => DType::F32,
        safetensors::Dtype::F64 => DType::F64,
        other => {
            return Err(MindError::Config(format!(
                "unsupported checkpoint dtype {other:?}"
            )))
        }
    };
    Ok(Tensor::from_raw_buffer(view.data(), dtype, view.shape(), device)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_missing_weight() {
        let mut file = WeightFile::from_tensors(HashMap::new());
        assert!(matches!(
            file.take("W_enc"),
            Err(MindError::MissingWeight { name }) if name == "W_enc"
        ));
        assert!(file.take_optional("W_dec").is_none());
    }

    #[test]
    fn test_expect_dims() {
        let t = Tensor::zeros((4, 8), DType::F32, &Device::Cpu).unwrap();
        assert!(expect_dims(&t, &[4, 8], "W_enc").is_ok());
        assert!(matches!(
            expect_dims(&t, &[4, 16], "W_enc"),
            Err(MindError::DimensionMismatch { expected: 16, actual: 8, .. })
        ));
        assert!(expect_dims(&t, &[32], "b").is_err());
    }

    #[test]
    fn test_open_round_trips_safetensors_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");
        let mut map = HashMap::new();
        map.insert(
            "W_enc".to_string(),
            Tensor::ones((3, 2), DType::F32, &Device::Cpu).unwrap(),
        );
        candle_core::safetensors::save(&map, &path).unwrap();

        let mut file = WeightFile::open(&path, &Device::Cpu).unwrap();
        let w = file.take("W_enc").unwrap();
        assert_eq!(w.dims(), &[3, 2]);
        assert_eq!(w.dtype(), DType::F32);
    }
}
