//! Hierarchical refinement module (HRM)
//!
//! Two-level iterative corrector over a residual activation:
//!
//! ```text
//! state_0 = 0,  x_0 = activation
//! for i in 1..=steps:
//!     state_i      = GRUCell(x_{i-1}, state_{i-1})          (low level)
//!     correction_i = W2 · relu(W1 · state_i + b1) + b2      (high level)
//!     x_i          = state_i + correction_i
//! return x_steps
//! ```
//!
//! The GRU uses the PyTorch gate layout (r, z, n stacked along rows of
//! `weight_ih`/`weight_hh`). Its state is a convex mix of the previous state
//! and a `tanh` candidate, so starting from zero it never leaves `[-1, 1]`.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::error::{MindError, Result};
use crate::weights::{expect_dims, WeightFile};

/// Default number of refinement steps.
pub const DEFAULT_STEPS: usize = 3;

/// Affine map `w · x + b` with `w: [out, in]`, `b: [out]`.
struct Linear {
    weight: Tensor,
    bias: Tensor,
}

impl Linear {
    fn new(weight: Tensor, bias: Tensor, context: &str) -> Result<Self> {
        let (out, _) = weight.dims2()?;
        expect_dims(&bias, &[out], context)?;
        Ok(Self {
            weight: weight.to_dtype(DType::F32)?.contiguous()?,
            bias: bias.to_dtype(DType::F32)?,
        })
    }

    /// `x` has shape `(in,)`; returns `(out,)`.
    fn apply(&self, x: &Tensor) -> Result<Tensor> {
        let y = self.weight.matmul(&x.unsqueeze(1)?)?.squeeze(1)?;
        Ok((y + &self.bias)?)
    }
}

/// Low-level recurrent state tracker.
struct GruCell {
    input: Linear,  // weight_ih [3d, d], bias_ih [3d]
    hidden: Linear, // weight_hh [3d, d], bias_hh [3d]
    d: usize,
}

impl GruCell {
    fn step(&self, x: &Tensor, h: &Tensor) -> Result<Tensor> {
        let d = self.d;
        let gi = self.input.apply(x)?;
        let gh = self.hidden.apply(h)?;

        let r = candle_nn::ops::sigmoid(&(gi.narrow(0, 0, d)? + gh.narrow(0, 0, d)?)?)?;
        let z = candle_nn::ops::sigmoid(&(gi.narrow(0, d, d)? + gh.narrow(0, d, d)?)?)?;
        let n = (gi.narrow(0, 2 * d, d)? + (r * gh.narrow(0, 2 * d, d)?)?)?.tanh()?;

        // (1 - z) * n + z * h  ==  n + z * (h - n)
        let delta = (z * (h - &n)?)?;
        Ok((n + delta)?)
    }
}

/// High-level feed-forward correction: linear → relu → linear.
struct Correction {
    first: Linear,
    second: Linear,
}

impl Correction {
    fn apply(&self, state: &Tensor) -> Result<Tensor> {
        let hidden = self.first.apply(state)?.relu()?;
        self.second.apply(&hidden)
    }
}

/// Parameters of a [`HierarchicalRefiner`], laid out as in the PyTorch checkpoint.
pub struct RefinerParts {
    pub weight_ih: Tensor,
    pub weight_hh: Tensor,
    pub bias_ih: Tensor,
    pub bias_hh: Tensor,
    pub w1: Tensor,
    pub b1: Tensor,
    pub w2: Tensor,
    pub b2: Tensor,
}

/// Iterative two-level corrector with fixed parameters.
pub struct HierarchicalRefiner {
    low: GruCell,
    high: Correction,
    d_model: usize,
    steps: usize,
    device: Device,
}

impl HierarchicalRefiner {
    /// Load parameters from a safetensors export of the refiner state dict.
    pub fn load(path: &Path, steps: usize, device: &Device) -> Result<Self> {
        info!("Loading refiner from {}", path.display());
        let mut file = WeightFile::open(path, device)?;
        let parts = RefinerParts {
            weight_ih: file.take("L.net.weight_ih")?,
            weight_hh: file.take("L.net.weight_hh")?,
            bias_ih: file.take("L.net.bias_ih")?,
            bias_hh: file.take("L.net.bias_hh")?,
            w1: file.take("H.net.0.weight")?,
            b1: file.take("H.net.0.bias")?,
            w2: file.take("H.net.2.weight")?,
            b2: file.take("H.net.2.bias")?,
        };
        Self::from_parts(parts, steps)
    }

    /// Initialise every parameter from `U(-1/√d, 1/√d)` with a seeded RNG.
    ///
    /// Same seed, same parameters.
    pub fn seeded(d_model: usize, steps: usize, seed: u64, device: &Device) -> Result<Self> {
        if d_model == 0 {
            return Err(MindError::Config("refiner width must be positive".to_string()));
        }
        info!("Initialising refiner: d_model={d_model}, steps={steps}, seed={seed}");
        let bound = 1.0 / (d_model as f32).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut sample = |shape: &[usize]| -> Result<Tensor> {
            let n: usize = shape.iter().product();
            let data: Vec<f32> = (0..n).map(|_| dist.sample(&mut rng)).collect();
            Ok(Tensor::from_vec(data, shape, device)?)
        };

        let d = d_model;
        let parts = RefinerParts {
            weight_ih: sample(&[3 * d, d])?,
            weight_hh: sample(&[3 * d, d])?,
            bias_ih: sample(&[3 * d])?,
            bias_hh: sample(&[3 * d])?,
            w1: sample(&[d, d])?,
            b1: sample(&[d])?,
            w2: sample(&[d, d])?,
            b2: sample(&[d])?,
        };
        Self::from_parts(parts, steps)
    }

    /// Build a refiner from explicit parameters, checking every shape.
    pub fn from_parts(parts: RefinerParts, steps: usize) -> Result<Self> {
        let (rows, d) = parts.weight_ih.dims2()?;
        if rows != 3 * d {
            return Err(MindError::dimension("L.net.weight_ih rows", 3 * d, rows));
        }
        expect_dims(&parts.weight_hh, &[3 * d, d], "L.net.weight_hh")?;
        expect_dims(&parts.w1, &[d, d], "H.net.0.weight")?;
        expect_dims(&parts.w2, &[d, d], "H.net.2.weight")?;
        let device = parts.weight_ih.device().clone();

        Ok(Self {
            low: GruCell {
                input: Linear::new(parts.weight_ih, parts.bias_ih, "L.net.bias_ih")?,
                hidden: Linear::new(parts.weight_hh, parts.bias_hh, "L.net.bias_hh")?,
                d,
            },
            high: Correction {
                first: Linear::new(parts.w1, parts.b1, "H.net.0.bias")?,
                second: Linear::new(parts.w2, parts.b2, "H.net.2.bias")?,
            },
            d_model: d,
            steps,
            device,
        })
    }

    /// Activation width the refiner accepts
    pub fn d_model(&self) -> usize {
        self.d_model
    }

    /// Number of refinement steps per call
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Run the refinement recurrence on one activation.
    ///
    /// Returns a new `(d_model,)` F32 tensor; the input is left untouched.
    pub fn refine(&self, activation: &Tensor) -> Result<Tensor> {
        let flat = activation.flatten_all()?;
        let width = flat.dim(0)?;
        if width != self.d_model {
            return Err(MindError::dimension("refiner input", self.d_model, width));
        }

        let mut x = flat
            .to_dtype(DType::F32)?
            .to_device(&self.device)?
            .contiguous()?;
        let mut state = Tensor::zeros(self.d_model, DType::F32, &self.device)?;
        for _ in 0..self.steps {
            state = self.low.step(&x, &state)?;
            let correction = self.high.apply(&state)?;
            x = (&state + correction)?;
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeros(shape: &[usize]) -> Tensor {
        Tensor::zeros(shape, DType::F32, &Device::Cpu).unwrap()
    }

    fn filled(shape: &[usize], value: f32) -> Tensor {
        (Tensor::ones(shape, DType::F32, &Device::Cpu).unwrap() * f64::from(value)).unwrap()
    }

    fn to_vec(t: &Tensor) -> Vec<f32> {
        t.to_vec1().unwrap()
    }

    #[test]
    fn test_zero_steps_is_identity() {
        let hrm = HierarchicalRefiner::seeded(8, 0, 7, &Device::Cpu).unwrap();
        let a = Tensor::new(&[0.1f32, -0.2, 0.3, 4.0, -5.0, 0.0, 1.0, 2.0], &Device::Cpu).unwrap();
        assert_eq!(to_vec(&hrm.refine(&a).unwrap()), to_vec(&a));
    }

    #[test]
    fn test_refine_is_deterministic_and_pure() {
        let hrm = HierarchicalRefiner::seeded(16, DEFAULT_STEPS, 42, &Device::Cpu).unwrap();
        let data: Vec<f32> = (0..16).map(|i| (i as f32).sin()).collect();
        let a = Tensor::from_vec(data.clone(), 16, &Device::Cpu).unwrap();

        let first = to_vec(&hrm.refine(&a).unwrap());
        let second = to_vec(&hrm.refine(&a).unwrap());
        assert_eq!(first, second);
        assert_eq!(to_vec(&a), data);
    }

    #[test]
    fn test_refine_ignores_input_layout() {
        let hrm = HierarchicalRefiner::seeded(16, DEFAULT_STEPS, 42, &Device::Cpu).unwrap();
        let broadcast = Tensor::full(2.5f32, 16, &Device::Cpu).unwrap();
        let dense = Tensor::from_vec(vec![2.5f32; 16], 16, &Device::Cpu).unwrap();
        assert_eq!(
            to_vec(&hrm.refine(&broadcast).unwrap()),
            to_vec(&hrm.refine(&dense).unwrap())
        );
    }

    #[test]
    fn test_same_seed_same_parameters() {
        let a = Tensor::from_vec(vec![0.5f32; 12], 12, &Device::Cpu).unwrap();
        let x = HierarchicalRefiner::seeded(12, 2, 3, &Device::Cpu).unwrap();
        let y = HierarchicalRefiner::seeded(12, 2, 3, &Device::Cpu).unwrap();
        let z = HierarchicalRefiner::seeded(12, 2, 4, &Device::Cpu).unwrap();
        assert_eq!(to_vec(&x.refine(&a).unwrap()), to_vec(&y.refine(&a).unwrap()));
        assert_ne!(to_vec(&x.refine(&a).unwrap()), to_vec(&z.refine(&a).unwrap()));
    }

    #[test]
    fn test_zero_parameters_keep_zero_fixed_point() {
        let d = 6;
        let parts = RefinerParts {
            weight_ih: zeros(&[3 * d, d]),
            weight_hh: zeros(&[3 * d, d]),
            bias_ih: zeros(&[3 * d]),
            bias_hh: zeros(&[3 * d]),
            w1: zeros(&[d, d]),
            b1: zeros(&[d]),
            w2: zeros(&[d, d]),
            b2: zeros(&[d]),
        };
        let hrm = HierarchicalRefiner::from_parts(parts, 5).unwrap();
        let out = to_vec(&hrm.refine(&zeros(&[d])).unwrap());
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_zero_input_fixed_point_set_by_output_bias() {
        // Only the correction's output bias is non-zero: every step yields
        // state = 0.5 * candidate with candidate = tanh(0) = 0, so x = b2.
        let d = 4;
        let parts = RefinerParts {
            weight_ih: zeros(&[3 * d, d]),
            weight_hh: zeros(&[3 * d, d]),
            bias_ih: zeros(&[3 * d]),
            bias_hh: zeros(&[3 * d]),
            w1: zeros(&[d, d]),
            b1: zeros(&[d]),
            w2: zeros(&[d, d]),
            b2: filled(&[d], 0.25),
        };
        let hrm = HierarchicalRefiner::from_parts(parts, 3).unwrap();
        let out = to_vec(&hrm.refine(&zeros(&[d])).unwrap());
        assert!(out.iter().all(|&v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_state_saturates_for_large_inputs() {
        // Identity input weights with zero correction: the output is the raw
        // GRU state, which stays inside [-1, 1] however large the input.
        let d = 4;
        let eye: Vec<f32> = (0..3 * d * d)
            .map(|i| {
                let (row, col) = (i / d, i % d);
                if row % d == col {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        let parts = RefinerParts {
            weight_ih: Tensor::from_vec(eye, (3 * d, d), &Device::Cpu).unwrap(),
            weight_hh: zeros(&[3 * d, d]),
            bias_ih: zeros(&[3 * d]),
            bias_hh: zeros(&[3 * d]),
            w1: zeros(&[d, d]),
            b1: zeros(&[d]),
            w2: zeros(&[d, d]),
            b2: zeros(&[d]),
        };
        let hrm = HierarchicalRefiner::from_parts(parts, 10).unwrap();
        let a = Tensor::new(&[1e6f32, -1e6, 3e4, -7.0], &Device::Cpu).unwrap();
        let out = to_vec(&hrm.refine(&a).unwrap());
        assert!(out.iter().all(|v| v.is_finite() && v.abs() <= 1.0));
    }

    #[test]
    fn test_refine_dimension_mismatch() {
        let hrm = HierarchicalRefiner::seeded(8, 1, 0, &Device::Cpu).unwrap();
        assert!(matches!(
            hrm.refine(&zeros(&[9])),
            Err(MindError::DimensionMismatch { expected: 8, actual: 9, .. })
        ));
    }

    #[test]
    fn test_from_parts_rejects_bad_shapes() {
        let d = 4;
        let parts = RefinerParts {
            weight_ih: zeros(&[2 * d, d]),
            weight_hh: zeros(&[3 * d, d]),
            bias_ih: zeros(&[3 * d]),
            bias_hh: zeros(&[3 * d]),
            w1: zeros(&[d, d]),
            b1: zeros(&[d]),
            w2: zeros(&[d, d]),
            b2: zeros(&[d]),
        };
        assert!(HierarchicalRefiner::from_parts(parts, 1).is_err());
    }
}
