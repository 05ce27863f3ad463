use thiserror::Error;

pub type Result<T> = std::result::Result<T, FoldError>;

#[derive(Error, Debug)]
pub enum FoldError {
    #[error("Invalid rotation shape {0:?}: expected [..., 3, 3]")]
    InvalidRotationShape(Vec<usize>),
    #[error("Invalid translation shape {0:?}: expected [..., 3]")]
    InvalidTranslationShape(Vec<usize>),
    #[error("Shape mismatch between rotations {rotations:?} and translations {translations:?}")]
    FrameShapeMismatch {
        rotations: Vec<usize>,
        translations: Vec<usize>,
    },
    #[error("{name} has shape {actual:?}, expected leading dims {expected:?}")]
    RepresentationShapeMismatch {
        name: &'static str,
        actual: Vec<usize>,
        expected: Vec<usize>,
    },
    #[error("Sequence has {sequence} residues but the representation has {positions} positions")]
    SequenceLengthMismatch { sequence: usize, positions: usize },
    #[error("Unknown residue: {0}")]
    UnknownResidue(String),
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}
