//! Frame Aligned Point Error
//!
//! Every atom `j` is expressed in the local coordinates of every frame `i`, for
//! both the predicted and the true structure. The loss is the mean of the
//! clamped distances between the two local positions, divided by a length
//! scale. Because each term is measured inside a frame, a global rigid motion
//! of either structure does not change the loss.
use crate::config::FapeConfig;
use crate::error::{FoldError, Result};
use crate::frame::Frame;
use candle_core::{Tensor, D};

/// Compute FAPE.
///
/// - `pred_frames`, `true_frames`: frames with batch shape `[..., L]`
/// - `pred_points`, `true_points`: atoms shaped `[..., M, 3]`
///
/// Returns a scalar tensor.
pub fn compute_fape(
    pred_frames: &Frame,
    pred_points: &Tensor,
    true_frames: &Frame,
    true_points: &Tensor,
    config: &FapeConfig,
) -> Result<Tensor> {
    if pred_frames.batch_shape() != true_frames.batch_shape() {
        return Err(FoldError::RepresentationShapeMismatch {
            name: "true_frames",
            actual: true_frames.batch_shape().to_vec(),
            expected: pred_frames.batch_shape().to_vec(),
        });
    }
    if pred_points.dims() != true_points.dims() {
        return Err(FoldError::RepresentationShapeMismatch {
            name: "true_points",
            actual: true_points.dims().to_vec(),
            expected: pred_points.dims().to_vec(),
        });
    }

    let local_pred = local_points(pred_frames, pred_points)?;
    let local_true = local_points(true_frames, true_points)?;

    // sqrt(d^2 + eps) - sqrt(eps): finite gradient at zero, and zero for a perfect match
    let sq_dist = (local_pred - local_true)?.sqr()?.sum(D::Minus1)?;
    let offset = Tensor::new(config.eps, sq_dist.device())?
        .to_dtype(sq_dist.dtype())?
        .sqrt()?;
    let dist = (sq_dist + config.eps)?.sqrt()?.broadcast_sub(&offset)?;
    let clamped = dist.minimum(config.clamp_distance)?;
    Ok((clamped.mean_all()? / config.length_scale)?)
}

/// `[..., L, M, 3]`: atom `j` in the local frame of residue `i`.
fn local_points(frames: &Frame, points: &Tensor) -> Result<Tensor> {
    let batch_rank = frames.batch_shape().len();
    if batch_rank == 0 || points.rank() != batch_rank + 1 {
        return Err(FoldError::RepresentationShapeMismatch {
            name: "points",
            actual: points.dims().to_vec(),
            expected: frames.batch_shape()[..batch_rank.saturating_sub(1)].to_vec(),
        });
    }
    // [..., M, 3] -> [..., 1, M, 3] so every frame sees every atom
    frames.apply_inverse(&points.unsqueeze(batch_rank - 1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn test_zero_for_identical_structures() {
        let device = Device::Cpu;
        let frames = Frame::random(&[8], 5.0, DType::F32, &device).unwrap();
        let points = Tensor::randn(0f32, 5., (24, 3), &device).unwrap();
        let loss =
            compute_fape(&frames, &points, &frames, &points, &FapeConfig::default()).unwrap();
        assert_eq!(loss.dims(), &[] as &[usize]);
        assert!(scalar(&loss).abs() < 1e-6);
    }

    #[test]
    fn test_invariant_to_independent_rigid_motions() {
        let device = Device::Cpu;
        let config = FapeConfig::default();
        let pred_frames = Frame::random(&[6], 3.0, DType::F32, &device).unwrap();
        let true_frames = Frame::random(&[6], 3.0, DType::F32, &device).unwrap();
        let pred_points = pred_frames.translations().clone();
        let true_points = true_frames.translations().clone();
        let loss = compute_fape(&pred_frames, &pred_points, &true_frames, &true_points, &config)
            .unwrap();

        let g_pred = Frame::random(&[1], 10.0, DType::F32, &device).unwrap();
        let g_true = Frame::random(&[1], 10.0, DType::F32, &device).unwrap();
        let moved = compute_fape(
            &g_pred.compose(&pred_frames).unwrap(),
            &g_pred.apply(&pred_points).unwrap(),
            &g_true.compose(&true_frames).unwrap(),
            &g_true.apply(&true_points).unwrap(),
            &config,
        )
        .unwrap();
        assert!((scalar(&loss) - scalar(&moved)).abs() < 1e-4);
        assert!(scalar(&loss) > 0.0);
    }

    #[test]
    fn test_clamped() {
        let device = Device::Cpu;
        let config = FapeConfig::default();
        let frames = Frame::identity(&[2], DType::F32, &device).unwrap();
        let pred = Tensor::new(&[[0f32, 0., 0.], [0., 0., 0.]], &device).unwrap();
        let truth = Tensor::new(&[[1000f32, 0., 0.], [1000., 0., 0.]], &device).unwrap();
        let loss = compute_fape(&frames, &pred, &frames, &truth, &config).unwrap();
        // every pair saturates at clamp_distance / length_scale
        assert!((scalar(&loss) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_batched_points() {
        let device = Device::Cpu;
        let frames = Frame::random(&[2, 4], 1.0, DType::F32, &device).unwrap();
        let points = Tensor::randn(0f32, 1., (2, 12, 3), &device).unwrap();
        let shifted = (&points + 0.5).unwrap();
        let loss =
            compute_fape(&frames, &points, &frames, &shifted, &FapeConfig::default()).unwrap();
        assert!(scalar(&loss) > 0.0);
    }

    #[test]
    fn test_mismatched_points() {
        let device = Device::Cpu;
        let frames = Frame::identity(&[3], DType::F32, &device).unwrap();
        let a = Tensor::zeros((3, 3), DType::F32, &device).unwrap();
        let b = Tensor::zeros((4, 3), DType::F32, &device).unwrap();
        assert!(compute_fape(&frames, &a, &frames, &b, &FapeConfig::default()).is_err());
    }
}
