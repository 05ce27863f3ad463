//! Structure Module
//!
//! Iteratively refines one rigid frame per residue. Each layer runs
//! [`InvariantPointAttention`], updates the single representation, predicts a
//! local frame update and composes it onto the current frames. After the last
//! layer the frames place an idealized backbone for every residue.
//!
//! When ground truth is supplied every layer contributes an auxiliary FAPE
//! term on its updated frames, and the final backbone atoms get a full FAPE.
use crate::config::StructureModuleConfig;
use crate::error::{FoldError, Result};
use crate::fape::compute_fape;
use crate::frame::Frame;
use crate::ipa::InvariantPointAttention;
use crate::nn::{Dropout, DropoutRng, LayerNorm, Transition};
use crate::residue::{AtomTemplate, BACKBONE_ATOMS};
use candle_core::{Module, Tensor, D};
use candle_nn::{linear, Linear, VarBuilder};

/// Supervision targets for a forward pass.
///
/// Both parts are detached on construction; gradients never flow into the truth.
#[derive(Clone, Debug)]
pub struct GroundTruth {
    pub frames: Frame,
    /// `[..., L, 3, 3]` N / CA / C coordinates. Derived from the frames and the
    /// atom template when not given explicitly.
    pub coords: Option<Tensor>,
}

impl GroundTruth {
    pub fn from_frames(frames: &Frame) -> Self {
        Self {
            frames: frames.detach(),
            coords: None,
        }
    }

    /// Ground truth from `[..., L, 3, 3]` backbone coordinates (N, CA, C).
    pub fn from_backbone(coords: &Tensor, eps: f64) -> Result<Self> {
        let atom = |i: usize| coords.narrow(D::Minus2, i, 1)?.squeeze(D::Minus2);
        let frames = Frame::from_three_points(&atom(0)?, &atom(1)?, &atom(2)?, eps)?;
        Ok(Self {
            frames: frames.detach(),
            coords: Some(coords.detach()),
        })
    }
}

#[derive(Debug)]
pub struct StructureOutput {
    /// `[..., L, 3, 3]` predicted N / CA / C coordinates.
    pub coords: Tensor,
    pub frames: Frame,
    /// Mean of the per-layer FAPE on frame origins.
    pub aux_loss: Option<Tensor>,
    /// FAPE on the final backbone atoms.
    pub fape_loss: Option<Tensor>,
}

/// One refinement step.
#[derive(Clone, Debug)]
pub struct StructureModuleLayer {
    ipa: InvariantPointAttention,
    ipa_dropout: Dropout,
    ipa_norm: LayerNorm,
    transition: Transition,
    transition_dropout: Dropout,
    transition_norm: LayerNorm,
    backbone_update: Linear,
    config: StructureModuleConfig,
}

impl StructureModuleLayer {
    pub fn load(vb: VarBuilder, config: &StructureModuleConfig) -> candle_core::Result<Self> {
        let c_s = config.single_embedding_size;
        Ok(Self {
            ipa: InvariantPointAttention::load(vb.pp("ipa"), config)?,
            ipa_dropout: Dropout::new(config.dropout),
            ipa_norm: LayerNorm::new(c_s, 1e-5, vb.pp("ipa_norm"))?,
            transition: Transition::new(c_s, vb.pp("transition"))?,
            transition_dropout: Dropout::new(config.dropout),
            transition_norm: LayerNorm::new(c_s, 1e-5, vb.pp("transition_norm"))?,
            // 3 quaternion components + 3 translation components
            backbone_update: linear(c_s, 6, vb.pp("backbone_update"))?,
            config: config.clone(),
        })
    }

    /// Returns the updated single representation, the updated frames and, when
    /// `truth` is given, the FAPE of the updated frame origins.
    ///
    /// Passing an `rng` enables dropout (training mode).
    pub fn forward(
        &self,
        single: &Tensor,
        pair: &Tensor,
        frames: &Frame,
        truth: Option<&Frame>,
        mut rng: DropoutRng<'_>,
    ) -> Result<(Tensor, Frame, Option<Tensor>)> {
        let update = self.ipa.forward(single, pair, frames)?;
        let update = self.ipa_dropout.forward(&update, rng.as_deref_mut())?;
        let single = self.ipa_norm.forward(&(single + update)?)?;

        let update = self.transition.forward(&single)?;
        let update = self.transition_dropout.forward(&update, rng.as_deref_mut())?;
        let single = self.transition_norm.forward(&(single + update)?)?;

        let frames = frames.compose(&self.predict_update(&single)?)?;

        let loss = match truth {
            Some(truth) => Some(compute_fape(
                &frames,
                frames.translations(),
                truth,
                truth.translations(),
                &self.config.fape,
            )?),
            None => None,
        };
        Ok((single, frames, loss))
    }

    /// Local frame update. The rotation is the normalized quaternion `(1, b, c, d)`,
    /// so a zero prediction is the identity and the result is always a proper rotation.
    fn predict_update(&self, single: &Tensor) -> Result<Frame> {
        let update = self.backbone_update.forward(single)?;
        let bcd = update.narrow(D::Minus1, 0, 3)?;
        let translations = (update.narrow(D::Minus1, 3, 3)? * self.config.translation_scale)?;
        let ones = bcd.narrow(D::Minus1, 0, 1)?.ones_like()?;
        let quaternions = Tensor::cat(&[&ones, &bcd], D::Minus1)?;
        Frame::from_quaternion(&quaternions, &translations, self.config.eps)
    }
}

/// Stack of [`StructureModuleLayer`]s.
///
/// - [AlphaFold2 supplement, Algorithm 20](https://www.nature.com/articles/s41586-021-03819-2)
#[derive(Clone, Debug)]
pub struct StructureModule {
    layers: Vec<StructureModuleLayer>,
    config: StructureModuleConfig,
}

impl StructureModule {
    pub fn load(vb: VarBuilder, config: &StructureModuleConfig) -> candle_core::Result<Self> {
        let layers = if config.share_weights {
            vec![StructureModuleLayer::load(vb.pp("layer"), config)?]
        } else {
            (0..config.num_layers)
                .map(|i| StructureModuleLayer::load(vb.pp("layers").pp(i), config))
                .collect::<candle_core::Result<Vec<_>>>()?
        };
        Ok(Self {
            layers,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &StructureModuleConfig {
        &self.config
    }

    fn layer(&self, idx: usize) -> &StructureModuleLayer {
        if self.config.share_weights {
            &self.layers[0]
        } else {
            &self.layers[idx]
        }
    }

    /// Predict backbone coordinates.
    ///
    /// - `single`: `[L, C_s]` or `[B, L, C_s]`
    /// - `pair`: `[L, L, C_z]` or `[B, L, L, C_z]`
    /// - `sequence`: three letter residue names, one per position
    /// - `truth`: optional supervision; without it both losses are `None`
    /// - `rng`: enables dropout when given
    pub fn forward<S: AsRef<str>>(
        &self,
        single: &Tensor,
        pair: &Tensor,
        sequence: &[S],
        truth: Option<&GroundTruth>,
        mut rng: DropoutRng<'_>,
    ) -> Result<StructureOutput> {
        let dims = single.dims();
        if dims.len() < 2 {
            return Err(FoldError::RepresentationShapeMismatch {
                name: "single",
                actual: dims.to_vec(),
                expected: vec![sequence.len()],
            });
        }
        let positions = dims[dims.len() - 2];
        if sequence.len() != positions {
            return Err(FoldError::SequenceLengthMismatch {
                sequence: sequence.len(),
                positions,
            });
        }
        let mut coord_shape = dims[..dims.len() - 1].to_vec();
        coord_shape.extend([BACKBONE_ATOMS, 3]);
        let template = AtomTemplate::backbone(sequence, single.dtype(), single.device())?
            .broadcast_as(coord_shape)?;

        let mut frames = Frame::identity(&dims[..dims.len() - 1], single.dtype(), single.device())?;
        let mut single = single.clone();
        let mut aux_losses = Vec::with_capacity(self.config.num_layers);
        let truth_frames = truth.map(|t| t.frames.detach());

        for idx in 0..self.config.num_layers {
            let (s, f, loss) = self.layer(idx).forward(
                &single,
                pair,
                &frames,
                truth_frames.as_ref(),
                rng.as_deref_mut(),
            )?;
            tracing::debug!(
                layer = idx,
                positions,
                supervised = loss.is_some(),
                "structure module layer"
            );
            single = s;
            frames = f;
            aux_losses.extend(loss);
        }

        let coords = frames.apply(&template)?;

        let (aux_loss, fape_loss) = match (truth, truth_frames) {
            (Some(truth), Some(truth_frames)) => {
                let aux_loss = if aux_losses.is_empty() {
                    Tensor::zeros((), frames.dtype(), frames.device())?
                } else {
                    Tensor::stack(&aux_losses, 0)?.mean_all()?
                };
                let true_coords = match &truth.coords {
                    Some(coords) => coords.detach(),
                    None => truth_frames.apply(&template)?,
                };
                let fape_loss = compute_fape(
                    &frames,
                    &flatten_atoms(&coords)?,
                    &truth_frames,
                    &flatten_atoms(&true_coords)?,
                    &self.config.fape,
                )?;
                (Some(aux_loss), Some(fape_loss))
            }
            _ => (None, None),
        };

        Ok(StructureOutput {
            coords,
            frames,
            aux_loss,
            fape_loss,
        })
    }
}

/// `[..., L, 3, 3]` -> `[..., L * 3, 3]`
fn flatten_atoms(coords: &Tensor) -> Result<Tensor> {
    let dims = coords.dims();
    let mut shape = dims[..dims.len() - 3].to_vec();
    shape.push(dims[dims.len() - 3] * BACKBONE_ATOMS);
    shape.push(3);
    Ok(coords.reshape(shape)?)
}
