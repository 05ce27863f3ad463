use serde::{Deserialize, Serialize};

/// Frame Aligned Point Error settings.
///
/// Distances are in Angstrom.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FapeConfig {
    /// Per-pair errors are clamped to this distance.
    pub clamp_distance: f64,
    /// The mean clamped error is divided by this.
    pub length_scale: f64,
    /// Added under the square root so the gradient at zero error is finite.
    pub eps: f64,
}

impl Default for FapeConfig {
    fn default() -> Self {
        Self {
            clamp_distance: 10.0,
            length_scale: 10.0,
            eps: 1e-4,
        }
    }
}

/// Structure Module configuration.
///
/// ```
/// use ferritin_fold::StructureModuleConfig;
/// let config = StructureModuleConfig::from_json(r#"{"num_layers": 3, "num_heads": 2}"#).unwrap();
/// assert_eq!(config.num_layers, 3);
/// assert_eq!(config.single_embedding_size, 384);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StructureModuleConfig {
    pub single_embedding_size: usize,
    pub pair_embedding_size: usize,
    /// Channels per head for the scalar query/key/value projections.
    pub ipa_embedding_size: usize,
    pub num_heads: usize,
    pub num_query_points: usize,
    pub num_value_points: usize,
    pub num_layers: usize,
    pub dropout: f32,
    /// Apply the same layer parameters at every refinement step.
    pub share_weights: bool,
    /// Multiplier on the predicted translation update.
    pub translation_scale: f64,
    /// Guard for the quaternion and point-norm square roots.
    pub eps: f64,
    pub fape: FapeConfig,
}

impl Default for StructureModuleConfig {
    fn default() -> Self {
        Self {
            single_embedding_size: 384,
            pair_embedding_size: 128,
            ipa_embedding_size: 16,
            num_heads: 12,
            num_query_points: 4,
            num_value_points: 8,
            num_layers: 8,
            dropout: 0.1,
            share_weights: false,
            translation_scale: 1.0,
            eps: 1e-8,
            fape: FapeConfig::default(),
        }
    }
}

impl StructureModuleConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Width of the concatenated IPA output before the final projection:
    /// scalar values, local value points (xyz), their norms and the pair values.
    pub fn ipa_output_size(&self) -> usize {
        self.num_heads
            * (self.ipa_embedding_size + self.num_value_points * 4 + self.pair_embedding_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = StructureModuleConfig::from_json(
            r#"{"num_layers": 2, "dropout": 0.0, "fape": {"clamp_distance": 5.0}}"#,
        )
        .unwrap();
        assert_eq!(config.num_layers, 2);
        assert_eq!(config.dropout, 0.0);
        assert_eq!(config.fape.clamp_distance, 5.0);
        assert_eq!(config.fape.length_scale, 10.0);
        assert_eq!(config.num_heads, 12);
    }

    #[test]
    fn test_ipa_output_size() {
        let config = StructureModuleConfig {
            ipa_embedding_size: 6,
            num_heads: 2,
            num_value_points: 3,
            pair_embedding_size: 5,
            ..Default::default()
        };
        assert_eq!(config.ipa_output_size(), 2 * (6 + 12 + 5));
    }
}
