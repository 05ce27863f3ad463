//! Residue vocabulary and idealized backbone geometry.
//!
//! Local backbone coordinates place CA at the origin, C on the +x axis and N in
//! the xy-plane, matching [`Frame::from_three_points`](crate::Frame::from_three_points)
//! with `(N, CA, C)`.
use crate::error::{FoldError, Result};
use candle_core::{DType, Device, Tensor};
use itertools::Itertools;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString};

/// Backbone atoms per residue in the template: N, CA, C.
pub const BACKBONE_ATOMS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum ResidueType {
    #[strum(serialize = "ALA")]
    Ala,
    #[strum(serialize = "ARG")]
    Arg,
    #[strum(serialize = "ASN")]
    Asn,
    #[strum(serialize = "ASP")]
    Asp,
    #[strum(serialize = "CYS")]
    Cys,
    #[strum(serialize = "GLN")]
    Gln,
    #[strum(serialize = "GLU")]
    Glu,
    #[strum(serialize = "GLY")]
    Gly,
    #[strum(serialize = "HIS")]
    His,
    #[strum(serialize = "ILE")]
    Ile,
    #[strum(serialize = "LEU")]
    Leu,
    #[strum(serialize = "LYS")]
    Lys,
    #[strum(serialize = "MET")]
    Met,
    #[strum(serialize = "PHE")]
    Phe,
    #[strum(serialize = "PRO")]
    Pro,
    #[strum(serialize = "SER")]
    Ser,
    #[strum(serialize = "THR")]
    Thr,
    #[strum(serialize = "TRP")]
    Trp,
    #[strum(serialize = "TYR")]
    Tyr,
    #[strum(serialize = "VAL")]
    Val,
}

impl ResidueType {
    /// Parse a three letter code. Unknown codes are an error, never a default.
    pub fn from_three_letter(code: &str) -> Result<Self> {
        Self::from_str(code).map_err(|_| FoldError::UnknownResidue(code.to_string()))
    }

    #[rustfmt::skip]
    pub fn from_one_letter(code: char) -> Result<Self> {
        use ResidueType::*;
        Ok(match code.to_ascii_uppercase() {
            'A' => Ala, 'R' => Arg, 'N' => Asn, 'D' => Asp,
            'C' => Cys, 'Q' => Gln, 'E' => Glu, 'G' => Gly,
            'H' => His, 'I' => Ile, 'L' => Leu, 'K' => Lys,
            'M' => Met, 'F' => Phe, 'P' => Pro, 'S' => Ser,
            'T' => Thr, 'W' => Trp, 'Y' => Tyr, 'V' => Val,
            _ => return Err(FoldError::UnknownResidue(code.to_string())),
        })
    }

    /// Idealized local N / CA / C coordinates in Angstrom.
    #[rustfmt::skip]
    pub fn backbone_template(&self) -> [[f32; 3]; BACKBONE_ATOMS] {
        use ResidueType::*;
        let (n, c) = match self {
            Ala => ([-0.525, 1.363, 0.0], [1.526, 0.0, 0.0]),
            Arg => ([-0.524, 1.362, 0.0], [1.525, 0.0, 0.0]),
            Asn => ([-0.536, 1.357, 0.0], [1.526, 0.0, 0.0]),
            Asp => ([-0.525, 1.362, 0.0], [1.527, 0.0, 0.0]),
            Cys => ([-0.522, 1.362, 0.0], [1.524, 0.0, 0.0]),
            Gln => ([-0.526, 1.361, 0.0], [1.526, 0.0, 0.0]),
            Glu => ([-0.528, 1.361, 0.0], [1.526, 0.0, 0.0]),
            Gly => ([-0.572, 1.337, 0.0], [1.517, 0.0, 0.0]),
            His => ([-0.527, 1.360, 0.0], [1.525, 0.0, 0.0]),
            Ile => ([-0.493, 1.373, 0.0], [1.527, 0.0, 0.0]),
            Leu => ([-0.520, 1.363, 0.0], [1.525, 0.0, 0.0]),
            Lys => ([-0.526, 1.362, 0.0], [1.526, 0.0, 0.0]),
            Met => ([-0.521, 1.364, 0.0], [1.525, 0.0, 0.0]),
            Phe => ([-0.518, 1.363, 0.0], [1.524, 0.0, 0.0]),
            Pro => ([-0.566, 1.351, 0.0], [1.527, 0.0, 0.0]),
            Ser => ([-0.529, 1.360, 0.0], [1.525, 0.0, 0.0]),
            Thr => ([-0.517, 1.364, 0.0], [1.526, 0.0, 0.0]),
            Trp => ([-0.521, 1.363, 0.0], [1.525, 0.0, 0.0]),
            Tyr => ([-0.522, 1.362, 0.0], [1.524, 0.0, 0.0]),
            Val => ([-0.494, 1.373, 0.0], [1.527, 0.0, 0.0]),
        };
        [n, [0.0, 0.0, 0.0], c]
    }
}

/// Lookup of idealized backbone coordinates for a sequence.
pub struct AtomTemplate;

impl AtomTemplate {
    /// `[L, 3, 3]` local N / CA / C coordinates for three letter residue names.
    pub fn backbone<S: AsRef<str>>(
        sequence: &[S],
        dtype: DType,
        device: &Device,
    ) -> Result<Tensor> {
        let residues: Vec<ResidueType> = sequence
            .iter()
            .map(|name| ResidueType::from_three_letter(name.as_ref()))
            .collect::<Result<_>>()?;
        Self::backbone_for(&residues, dtype, device)
    }

    pub fn backbone_for(residues: &[ResidueType], dtype: DType, device: &Device) -> Result<Tensor> {
        let coords = residues
            .iter()
            .flat_map(|res| res.backbone_template())
            .flatten()
            .collect_vec();
        let template = Tensor::from_vec(coords, (residues.len(), BACKBONE_ATOMS, 3), device)?;
        Ok(template.to_dtype(dtype)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::IndexOp;
    use strum::IntoEnumIterator;

    #[test]
    fn test_parse_codes() {
        assert_eq!(ResidueType::from_three_letter("MET").unwrap(), ResidueType::Met);
        assert_eq!(ResidueType::from_three_letter("phe").unwrap(), ResidueType::Phe);
        assert_eq!(ResidueType::from_one_letter('w').unwrap(), ResidueType::Trp);
        assert_eq!(ResidueType::Ser.to_string(), "SER");
        assert_eq!(ResidueType::iter().count(), 20);
        assert!(matches!(
            ResidueType::from_three_letter("XYZ"),
            Err(FoldError::UnknownResidue(name)) if name == "XYZ"
        ));
        assert!(matches!(
            ResidueType::from_one_letter('X'),
            Err(FoldError::UnknownResidue(_))
        ));
    }

    #[test]
    fn test_backbone_template() {
        let device = Device::Cpu;
        let template =
            AtomTemplate::backbone(&["MET", "PHE", "PRO"], DType::F32, &device).unwrap();
        assert_eq!(template.dims(), &[3, 3, 3]);

        // CA at the origin, C along +x
        let ca: Vec<f32> = template.i((1, 1)).unwrap().to_vec1().unwrap();
        assert_eq!(ca, vec![0.0, 0.0, 0.0]);
        let c: Vec<f32> = template.i((2, 2)).unwrap().to_vec1().unwrap();
        assert_eq!(c, vec![1.527, 0.0, 0.0]);
        let n: Vec<f32> = template.i((0, 0)).unwrap().to_vec1().unwrap();
        assert_eq!(n, vec![-0.521, 1.364, 0.0]);
    }

    #[test]
    fn test_unknown_residue_in_sequence() {
        let result = AtomTemplate::backbone(&["ALA", "UNK"], DType::F32, &Device::Cpu);
        assert!(matches!(result, Err(FoldError::UnknownResidue(name)) if name == "UNK"));
    }
}
