//! Invariant Point Attention
//!
//! Multi-head attention over the single representation whose logits combine
//! three terms per head:
//!
//! - scalar query/key dot products, scaled by `1/sqrt(c)`
//! - a bias projected from the pair representation
//! - the negative squared distance between query and key points. Points are
//!   predicted in each residue's local frame and compared in global space. The
//!   per-head weight goes through softplus so it can never flip sign.
//!
//! Value points are aggregated in global space and mapped back into the
//! query's local frame, so a rigid motion applied to every frame leaves the
//! output unchanged.
//!
//! - [AlphaFold2 supplement, Algorithm 22](https://www.nature.com/articles/s41586-021-03819-2)
use crate::config::StructureModuleConfig;
use crate::error::{FoldError, Result};
use crate::frame::Frame;
use crate::nn::softplus;
use candle_core::{Module, Tensor, D};
use candle_nn::ops::softmax;
use candle_nn::{linear, Linear, VarBuilder};

/// softplus(x) == 1 at initialization.
const HEAD_WEIGHT_INIT: f64 = 0.541_324_854_612_918;

#[derive(Clone, Debug)]
pub struct InvariantPointAttention {
    linear_q: Linear,
    linear_k: Linear,
    linear_v: Linear,
    linear_q_points: Linear,
    linear_k_points: Linear,
    linear_v_points: Linear,
    linear_b: Linear,
    linear_out: Linear,
    head_weights: Tensor,
    num_heads: usize,
    c_hidden: usize,
    num_query_points: usize,
    num_value_points: usize,
    pair_size: usize,
    eps: f64,
}

impl InvariantPointAttention {
    pub fn load(vb: VarBuilder, config: &StructureModuleConfig) -> candle_core::Result<Self> {
        let StructureModuleConfig {
            single_embedding_size: c_s,
            pair_embedding_size: c_z,
            ipa_embedding_size: c,
            num_heads: h,
            num_query_points: p_q,
            num_value_points: p_v,
            eps,
            ..
        } = *config;

        let linear_q = linear(c_s, h * c, vb.pp("linear_q"))?;
        let linear_k = linear(c_s, h * c, vb.pp("linear_k"))?;
        let linear_v = linear(c_s, h * c, vb.pp("linear_v"))?;
        let linear_q_points = linear(c_s, h * p_q * 3, vb.pp("linear_q_points"))?;
        let linear_k_points = linear(c_s, h * p_q * 3, vb.pp("linear_k_points"))?;
        let linear_v_points = linear(c_s, h * p_v * 3, vb.pp("linear_v_points"))?;
        let linear_b = linear(c_z, h, vb.pp("linear_b"))?;
        let linear_out = linear(config.ipa_output_size(), c_s, vb.pp("linear_out"))?;
        let head_weights = vb.get_with_hints(
            h,
            "head_weights",
            candle_nn::Init::Const(HEAD_WEIGHT_INIT),
        )?;

        Ok(Self {
            linear_q,
            linear_k,
            linear_v,
            linear_q_points,
            linear_k_points,
            linear_v_points,
            linear_b,
            linear_out,
            head_weights,
            num_heads: h,
            c_hidden: c,
            num_query_points: p_q,
            num_value_points: p_v,
            pair_size: c_z,
            eps,
        })
    }

    /// Accepts `single: [L, C_s]`, `pair: [L, L, C_z]` with frames `[L]`, or the
    /// same with a leading batch axis. Returns an update shaped like `single`.
    pub fn forward(&self, single: &Tensor, pair: &Tensor, frames: &Frame) -> Result<Tensor> {
        self.check_shapes(single, pair, frames)?;
        if single.rank() == 2 {
            let out = self.forward_batched(
                &single.unsqueeze(0)?,
                &pair.unsqueeze(0)?,
                &frames.unsqueeze(0)?,
            )?;
            return Ok(out.squeeze(0)?);
        }
        self.forward_batched(single, pair, frames)
    }

    fn check_shapes(&self, single: &Tensor, pair: &Tensor, frames: &Frame) -> Result<()> {
        let dims = single.dims();
        if !(2..=3).contains(&dims.len()) || frames.batch_shape() != &dims[..dims.len() - 1] {
            return Err(FoldError::RepresentationShapeMismatch {
                name: "single",
                actual: dims.to_vec(),
                expected: frames.batch_shape().to_vec(),
            });
        }
        let mut expected_pair = dims[..dims.len() - 1].to_vec();
        expected_pair.push(dims[dims.len() - 2]);
        expected_pair.push(self.pair_size);
        if pair.dims() != expected_pair.as_slice() {
            return Err(FoldError::RepresentationShapeMismatch {
                name: "pair",
                actual: pair.dims().to_vec(),
                expected: expected_pair,
            });
        }
        Ok(())
    }

    fn forward_batched(&self, single: &Tensor, pair: &Tensor, frames: &Frame) -> Result<Tensor> {
        let (b, l, _) = single.dims3()?;
        let h = self.num_heads;
        let c = self.c_hidden;
        tracing::trace!(batch = b, len = l, heads = h, "invariant point attention");

        // [b, l, h * c] -> [b, h, l, c]
        let split_heads = |x: Tensor| -> candle_core::Result<Tensor> {
            x.reshape((b, l, h, c))?.transpose(1, 2)?.contiguous()
        };
        let q = split_heads(self.linear_q.forward(single)?)?;
        let k = split_heads(self.linear_k.forward(single)?)?;
        let v = split_heads(self.linear_v.forward(single)?)?;

        let scalar_logits = (q.matmul(&k.t()?)? * (1.0 / (c as f64).sqrt()))?;
        let pair_bias = self
            .linear_b
            .forward(pair)?
            .permute((0, 3, 1, 2))?
            .contiguous()?;

        let (p_q, p_v) = (self.num_query_points, self.num_value_points);
        let q_points = self.global_points(&self.linear_q_points, single, frames, p_q)?;
        let k_points = self.global_points(&self.linear_k_points, single, frames, p_q)?;
        let v_points = self.global_points(&self.linear_v_points, single, frames, p_v)?;

        // [b, h, l, 1, p, 3] - [b, h, 1, l, p, 3] -> [b, h, l, l]
        let sq_dist = q_points
            .unsqueeze(3)?
            .broadcast_sub(&k_points.unsqueeze(2)?)?
            .sqr()?
            .sum(D::Minus1)?
            .sum(D::Minus1)?;
        let w_c = (2.0 / (9.0 * p_q as f64)).sqrt();
        let w_l = (1.0 / 3.0f64).sqrt();
        let gamma = softplus(&self.head_weights)?.reshape((1, h, 1, 1))?;
        let point_logits = (sq_dist.broadcast_mul(&gamma)? * (w_c / 2.0))?;

        let logits = (((scalar_logits + pair_bias)? - point_logits)? * w_l)?;
        let attn = softmax(&logits, D::Minus1)?;

        // scalar values: [b, h, l, c] -> [b, l, h * c]
        let o_scalar = attn
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, l, h * c))?;

        // pair values: [b, l, h, l] x [b, l, l, c_z] -> [b, l, h * c_z]
        let o_pair = attn
            .transpose(1, 2)?
            .contiguous()?
            .matmul(pair)?
            .reshape((b, l, h * self.pair_size))?;

        // value points are summed in global space, then moved into the local frame
        let v_points = v_points.reshape((b, h, l, p_v * 3))?;
        let o_points = attn
            .matmul(&v_points)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, l, h * p_v, 3))?;
        let o_points = frames.apply_inverse(&o_points)?;
        let o_norm = (o_points.sqr()?.sum(D::Minus1)? + self.eps)?.sqrt()?;
        let o_points = o_points.reshape((b, l, h * p_v * 3))?;

        let out = Tensor::cat(&[&o_scalar, &o_points, &o_norm, &o_pair], D::Minus1)?;
        Ok(self.linear_out.forward(&out)?)
    }

    /// Project points in the local frame and map them to global space: `[b, h, l, n, 3]`.
    fn global_points(
        &self,
        proj: &Linear,
        single: &Tensor,
        frames: &Frame,
        n: usize,
    ) -> Result<Tensor> {
        let (b, l, _) = single.dims3()?;
        let h = self.num_heads;
        let local = proj.forward(single)?.reshape((b, l, h * n, 3))?;
        let global = frames.apply(&local)?;
        Ok(global
            .reshape((b, l, h, n, 3))?
            .permute((0, 2, 1, 3, 4))?
            .contiguous()?)
    }
}
