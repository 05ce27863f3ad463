//! Rigid Frames
//!
//! A [`Frame`] is a batch of rigid transforms `x -> R·x + t`, one per sequence
//! position. Rotations are stored as `[..., 3, 3]` and translations as `[..., 3]`
//! where the leading dims (the *batch shape*) must agree.
//!
//! Points passed to [`Frame::apply`] / [`Frame::apply_inverse`] may carry extra
//! point axes between the batch shape and the xyz axis, e.g. `[L, P, 3]` points
//! under `[L]` frames. These broadcast against the frame axes.
use crate::error::{FoldError, Result};
use candle_core::{DType, Device, Tensor, D};

#[derive(Clone, Debug)]
pub struct Frame {
    rotations: Tensor,
    translations: Tensor,
}

impl Frame {
    pub fn new(rotations: Tensor, translations: Tensor) -> Result<Self> {
        let rot_dims = rotations.dims();
        let trans_dims = translations.dims();
        if rot_dims.len() < 2 || rot_dims[rot_dims.len() - 2..] != [3, 3] {
            return Err(FoldError::InvalidRotationShape(rot_dims.to_vec()));
        }
        if trans_dims.is_empty() || trans_dims[trans_dims.len() - 1] != 3 {
            return Err(FoldError::InvalidTranslationShape(trans_dims.to_vec()));
        }
        if rot_dims[..rot_dims.len() - 2] != trans_dims[..trans_dims.len() - 1] {
            return Err(FoldError::FrameShapeMismatch {
                rotations: rot_dims.to_vec(),
                translations: trans_dims.to_vec(),
            });
        }
        Ok(Self {
            rotations,
            translations,
        })
    }

    /// Identity rotation and zero translation for every entry of `shape`.
    pub fn identity(shape: &[usize], dtype: DType, device: &Device) -> Result<Self> {
        let mut rot_shape = shape.to_vec();
        rot_shape.extend([3, 3]);
        let mut trans_shape = shape.to_vec();
        trans_shape.push(3);
        let rotations = eye3(dtype, device)?.broadcast_as(rot_shape)?.contiguous()?;
        let translations = Tensor::zeros(trans_shape, dtype, device)?;
        Self::new(rotations, translations)
    }

    /// Uniformly oriented rotations with normally distributed translations.
    pub fn random(shape: &[usize], std: f64, dtype: DType, device: &Device) -> Result<Self> {
        let mut quat_shape = shape.to_vec();
        quat_shape.push(4);
        let mut trans_shape = shape.to_vec();
        trans_shape.push(3);
        let quaternions = Tensor::randn(0f32, 1f32, quat_shape, device)?.to_dtype(dtype)?;
        let translations = Tensor::randn(0f32, 1f32, trans_shape, device)?
            .to_dtype(dtype)?
            .affine(std, 0.0)?;
        Self::from_quaternion(&quaternions, &translations, 1e-12)
    }

    /// Build frames from `[..., 4]` quaternions `(w, x, y, z)`.
    ///
    /// The quaternions do not need to be normalized. `eps` keeps the
    /// normalization finite when a quaternion is close to zero.
    pub fn from_quaternion(quaternions: &Tensor, translations: &Tensor, eps: f64) -> Result<Self> {
        let norm = (quaternions.sqr()?.sum_keepdim(D::Minus1)? + eps)?.sqrt()?;
        let q = quaternions.broadcast_div(&norm)?;
        let part = |i: usize| q.narrow(D::Minus1, i, 1);
        let (a, b, c, d) = (part(0)?, part(1)?, part(2)?, part(3)?);
        let (aa, bb, cc, dd) = (a.sqr()?, b.sqr()?, c.sqr()?, d.sqr()?);
        let (ab, ac, ad) = ((&a * &b)?, (&a * &c)?, (&a * &d)?);
        let (bc, bd, cd) = ((&b * &c)?, (&b * &d)?, (&c * &d)?);

        #[rustfmt::skip]
        let entries = [
            (((&aa + &bb)? - &cc)? - &dd)?, ((&bc - &ad)? * 2.0)?,          ((&bd + &ac)? * 2.0)?,
            ((&bc + &ad)? * 2.0)?,          (((&aa - &bb)? + &cc)? - &dd)?, ((&cd - &ab)? * 2.0)?,
            ((&bd - &ac)? * 2.0)?,          ((&cd + &ab)? * 2.0)?,          (((&aa - &bb)? - &cc)? + &dd)?,
        ];

        let mut rot_shape = quaternions.dims()[..quaternions.rank() - 1].to_vec();
        rot_shape.extend([3, 3]);
        let rotations = Tensor::cat(&entries, D::Minus1)?.reshape(rot_shape)?;
        Self::new(rotations, translations.clone())
    }

    /// Gram-Schmidt frame from three points.
    ///
    /// The origin sits at `x2`, the first axis points toward `x3` and `x1` lies in
    /// the xy-plane. For a backbone this is `(N, CA, C)`.
    pub fn from_three_points(x1: &Tensor, x2: &Tensor, x3: &Tensor, eps: f64) -> Result<Self> {
        let v1 = (x3 - x2)?;
        let v2 = (x1 - x2)?;
        let e1 = normalize(&v1, eps)?;
        let proj = (&e1 * &v2)?.sum_keepdim(D::Minus1)?;
        let u2 = (&v2 - e1.broadcast_mul(&proj)?)?;
        let e2 = normalize(&u2, eps)?;
        let e3 = cross_product(&e1, &e2)?;
        let rotations = Tensor::stack(&[e1, e2, e3], D::Minus1)?;
        Self::new(rotations, x2.clone())
    }

    pub fn rotations(&self) -> &Tensor {
        &self.rotations
    }

    pub fn translations(&self) -> &Tensor {
        &self.translations
    }

    /// Leading dims shared by rotations and translations.
    pub fn batch_shape(&self) -> &[usize] {
        let dims = self.translations.dims();
        &dims[..dims.len() - 1]
    }

    pub fn dtype(&self) -> DType {
        self.translations.dtype()
    }

    pub fn device(&self) -> &Device {
        self.translations.device()
    }

    /// `self ∘ other`: apply `other` in the local coordinates of `self`.
    pub fn compose(&self, other: &Self) -> Result<Self> {
        let rotations = matmul3(&self.rotations, &other.rotations)?;
        let translations =
            rotate(&self.rotations, &other.translations)?.broadcast_add(&self.translations)?;
        Self::new(rotations, translations)
    }

    /// Inverse transform.
    ///
    /// The rotation block is inverted in closed form (adjugate over determinant),
    /// which reduces to `Rᵗ` for proper rotations. The determinant is not
    /// checked: a singular block yields non-finite entries rather than an error.
    pub fn inverse(&self) -> Result<Self> {
        let row = |i: usize| self.rotations.narrow(D::Minus2, i, 1)?.squeeze(D::Minus2);
        let (r0, r1, r2) = (row(0)?, row(1)?, row(2)?);
        let c0 = cross_product(&r1, &r2)?;
        let c1 = cross_product(&r2, &r0)?;
        let c2 = cross_product(&r0, &r1)?;
        let det = (&r0 * &c0)?.sum_keepdim(D::Minus1)?.unsqueeze(D::Minus1)?;
        let rotations = Tensor::stack(&[c0, c1, c2], D::Minus1)?.broadcast_div(&det)?;
        let translations = rotate(&rotations, &self.translations)?.neg()?;
        Self::new(rotations, translations)
    }

    /// Local to global: `R·p + t`.
    pub fn apply(&self, points: &Tensor) -> Result<Tensor> {
        let (rotations, translations) = self.expand_for(points)?;
        Ok(rotate(&rotations, points)?.broadcast_add(&translations)?)
    }

    /// Global to local: expresses `points` in the coordinates of each frame.
    pub fn apply_inverse(&self, points: &Tensor) -> Result<Tensor> {
        self.inverse()?.apply(points)
    }

    pub fn detach(&self) -> Self {
        Self {
            rotations: self.rotations.detach(),
            translations: self.translations.detach(),
        }
    }

    /// Insert a unit axis at `dim` of the batch shape.
    pub fn unsqueeze(&self, dim: usize) -> Result<Self> {
        Self::new(self.rotations.unsqueeze(dim)?, self.translations.unsqueeze(dim)?)
    }

    /// Remove the unit axis at `dim` of the batch shape.
    pub fn squeeze(&self, dim: usize) -> Result<Self> {
        Self::new(self.rotations.squeeze(dim)?, self.translations.squeeze(dim)?)
    }

    // Reshape rotations to [..., 1 x extra, 3, 3] and translations to
    // [..., 1 x extra, 3] so they broadcast over the point axes.
    fn expand_for(&self, points: &Tensor) -> Result<(Tensor, Tensor)> {
        let batch = self.batch_shape();
        let point_dims = points.dims();
        if point_dims.last() != Some(&3) || point_dims.len() < batch.len() + 1 {
            return Err(FoldError::RepresentationShapeMismatch {
                name: "points",
                actual: point_dims.to_vec(),
                expected: batch.to_vec(),
            });
        }
        let extra = point_dims.len() - 1 - batch.len();
        let mut rot_shape = batch.to_vec();
        rot_shape.extend(std::iter::repeat(1).take(extra));
        let mut trans_shape = rot_shape.clone();
        rot_shape.extend([3, 3]);
        trans_shape.push(3);
        Ok((
            self.rotations.reshape(rot_shape)?,
            self.translations.reshape(trans_shape)?,
        ))
    }
}

fn eye3(dtype: DType, device: &Device) -> Result<Tensor> {
    #[rustfmt::skip]
    let eye = [
        1f32, 0., 0.,
        0.,   1., 0.,
        0.,   0., 1.,
    ];
    Ok(Tensor::from_slice(&eye, (3, 3), device)?.to_dtype(dtype)?)
}

// 3x3 products are broadcast_mul + sum: candle's matmul rejects rank > 4
// operands and stride-0 broadcast layouts.

/// `R·v` over the trailing axes: `[..., 3, 3] x [..., 3] -> [..., 3]`.
fn rotate(rotations: &Tensor, vectors: &Tensor) -> Result<Tensor> {
    Ok(rotations
        .broadcast_mul(&vectors.unsqueeze(D::Minus2)?)?
        .sum(D::Minus1)?)
}

/// `A·B` over the trailing 3x3 blocks.
fn matmul3(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    Ok(a.unsqueeze(D::Minus1)?
        .broadcast_mul(&b.unsqueeze(D::Minus(3))?)?
        .sum(D::Minus2)?)
}

fn normalize(v: &Tensor, eps: f64) -> Result<Tensor> {
    let norm = (v.sqr()?.sum_keepdim(D::Minus1)? + eps)?.sqrt()?;
    Ok(v.broadcast_div(&norm)?)
}

/// Cross product over the last axis.
pub fn cross_product(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let a0 = a.narrow(D::Minus1, 0, 1)?;
    let a1 = a.narrow(D::Minus1, 1, 1)?;
    let a2 = a.narrow(D::Minus1, 2, 1)?;

    let b0 = b.narrow(D::Minus1, 0, 1)?;
    let b1 = b.narrow(D::Minus1, 1, 1)?;
    let b2 = b.narrow(D::Minus1, 2, 1)?;

    let c0 = ((&a1 * &b2)? - (&a2 * &b1)?)?;
    let c1 = ((&a2 * &b0)? - (&a0 * &b2)?)?;
    let c2 = ((&a0 * &b1)? - (&a1 * &b0)?)?;

    Ok(Tensor::cat(&[&c0, &c1, &c2], D::Minus1)?)
}
