//! Small differentiable building blocks.
//!
//! These are written with primitive candle ops so that `Tensor::backward`
//! reaches every parameter, and so dropout can draw from a caller supplied RNG.
use candle_core::{Module, Result, Tensor, D};
use candle_nn::{linear, Linear, VarBuilder};
use rand::{Rng, RngCore};

#[derive(Clone, Debug)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub fn new(dim: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(dim, "weight", candle_nn::init::ONE)?;
        let bias = vb.get_with_hints(dim, "bias", candle_nn::init::ZERO)?;
        Ok(Self { weight, bias, eps })
    }
}

impl Module for LayerNorm {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let centered = x.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normalized = centered.broadcast_div(&(variance + self.eps)?.sqrt()?)?;
        normalized
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}

/// Source of dropout masks. `None` is inference mode.
pub type DropoutRng<'a> = Option<&'a mut (dyn RngCore + 'static)>;

/// Inverted dropout driven by an injected RNG.
///
/// `rng = None` is inference mode and returns the input untouched.
#[derive(Clone, Debug)]
pub struct Dropout {
    p: f32,
}

impl Dropout {
    pub fn new(p: f32) -> Self {
        Self { p }
    }

    pub fn forward(&self, x: &Tensor, rng: DropoutRng<'_>) -> Result<Tensor> {
        let Some(rng) = rng else {
            return Ok(x.clone());
        };
        if self.p <= 0.0 {
            return Ok(x.clone());
        }
        let scale = 1.0 / (1.0 - self.p);
        let mask: Vec<f32> = (0..x.elem_count())
            .map(|_| if rng.gen::<f32>() < self.p { 0.0 } else { scale })
            .collect();
        let mask = Tensor::from_vec(mask, x.dims(), x.device())?.to_dtype(x.dtype())?;
        x.mul(&mask)
    }
}

/// `ln(1 + e^x)`, keeps per-head weights positive.
///
/// Evaluated as `max(x, 0) + log1p(e^-|x|)` so it neither overflows for large
/// `x` nor rounds to zero for very negative `x`.
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    x.relu()? + log1p(&x.abs()?.neg()?.exp()?)?
}

/// `ln(1 + u)` for `u >= 0`, accurate when `1 + u` rounds to 1.
fn log1p(u: &Tensor) -> Result<Tensor> {
    let w = (u + 1.0)?;
    let delta = (&w - 1.0)?;
    let exact = delta.gt(&delta.zeros_like()?)?;
    // log(w) * u / (w - 1) cancels the rounding in w; where w == 1, ln(1 + u) ~ u
    let safe_delta = exact.where_cond(&delta, &delta.ones_like()?)?;
    let corrected = (w.log()? * u)?.div(&safe_delta)?;
    exact.where_cond(&corrected, u)
}

/// Position-wise transition: three linear layers with ReLU between them.
#[derive(Clone, Debug)]
pub struct Transition {
    w1: Linear,
    w2: Linear,
    w3: Linear,
}

impl Transition {
    pub fn new(dim: usize, vb: VarBuilder) -> Result<Self> {
        let w1 = linear(dim, dim, vb.pp("linear_1"))?;
        let w2 = linear(dim, dim, vb.pp("linear_2"))?;
        let w3 = linear(dim, dim, vb.pp("linear_3"))?;
        Ok(Self { w1, w2, w3 })
    }
}

impl Module for Transition {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        x.apply(&self.w1)?
            .relu()?
            .apply(&self.w2)?
            .relu()?
            .apply(&self.w3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Var};
    use candle_nn::VarMap;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_layer_norm_statistics() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let norm = LayerNorm::new(8, 1e-5, vb).unwrap();
        let x = Tensor::randn(3f32, 2., (4, 8), &device).unwrap();
        let y = norm.forward(&x).unwrap();
        let means: Vec<f32> = y.mean(D::Minus1).unwrap().to_vec1().unwrap();
        assert!(means.iter().all(|m| m.abs() < 1e-5));
    }

    #[test]
    fn test_layer_norm_is_differentiable() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let norm = LayerNorm::new(4, 1e-5, vb).unwrap();
        let x = Var::from_tensor(&Tensor::randn(0f32, 1., (2, 4), &device).unwrap()).unwrap();
        let loss = norm.forward(x.as_tensor()).unwrap().sqr().unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        assert!(grads.get(x.as_tensor()).is_some());
    }

    #[test]
    fn test_dropout_modes() {
        let device = Device::Cpu;
        let x = Tensor::ones((16, 16), DType::F32, &device).unwrap();
        let dropout = Dropout::new(0.5);

        let inference = dropout.forward(&x, None).unwrap();
        assert_eq!(inference.sum_all().unwrap().to_scalar::<f32>().unwrap(), 256.0);

        let mut rng_a = StdRng::seed_from_u64(7);
        let mut rng_b = StdRng::seed_from_u64(7);
        let a = dropout.forward(&x, Some(&mut rng_a)).unwrap();
        let b = dropout.forward(&x, Some(&mut rng_b)).unwrap();
        let a: Vec<f32> = a.flatten_all().unwrap().to_vec1().unwrap();
        let b: Vec<f32> = b.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|&v| v == 0.0 || v == 2.0));
        assert!(a.iter().any(|&v| v == 0.0));
    }

    #[test]
    fn test_softplus_positive() {
        let device = Device::Cpu;
        let x = Tensor::new(&[-20f32, 0.0, 3.0], &device).unwrap();
        let y: Vec<f32> = softplus(&x).unwrap().to_vec1().unwrap();
        assert!(y.iter().all(|&v| v > 0.0));
        assert!((y[0] - (-20f32).exp()).abs() < 1e-12);
        assert!((y[1] - 2f32.ln()).abs() < 1e-6);
        assert!((y[2] - (1.0 + 3f32.exp()).ln()).abs() < 1e-5);
    }

    #[test]
    fn test_softplus_extreme_inputs() {
        let device = Device::Cpu;
        let x = Var::from_tensor(&Tensor::new(&[-60f32, -20.0, 100.0, 500.0], &device).unwrap())
            .unwrap();
        let y = softplus(x.as_tensor()).unwrap();
        let values: Vec<f32> = y.to_vec1().unwrap();
        assert!(values.iter().all(|v| v.is_finite() && *v > 0.0));
        assert_eq!(values[2], 100.0);
        assert_eq!(values[3], 500.0);

        let grads = y.sum_all().unwrap().backward().unwrap();
        let grad: Vec<f32> = grads.get(x.as_tensor()).unwrap().to_vec1().unwrap();
        assert!(grad.iter().all(|g| g.is_finite()));
        assert!((grad[3] - 1.0).abs() < 1e-6);
    }
}
