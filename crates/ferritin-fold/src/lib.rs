//! ferritin-fold
//!
//! Backbone structure prediction from single and pair representations:
//!
//! - [`Frame`]: batched rigid transforms (rotation + translation)
//! - [`InvariantPointAttention`]: attention that is invariant to global rigid motions
//! - [`StructureModule`]: iterative frame refinement producing N / CA / C coordinates
//! - [`compute_fape`]: Frame Aligned Point Error
//!
//! ```shell
//! cargo test -p ferritin-fold
//! cargo test -p ferritin-fold --features metal
//! ```
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::Device;

pub use config::{FapeConfig, StructureModuleConfig};
pub use error::{FoldError, Result};
pub use fape::compute_fape;
pub use frame::Frame;
pub use ipa::InvariantPointAttention;
pub use nn::DropoutRng;
pub use residue::{AtomTemplate, ResidueType, BACKBONE_ATOMS};
pub use structure::{GroundTruth, StructureModule, StructureModuleLayer, StructureOutput};

pub mod config;
pub mod error;
pub mod fape;
pub mod frame;
pub mod ipa;
pub mod nn;
pub mod residue;
pub mod structure;

pub fn device(cpu: bool) -> candle_core::Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else if cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else if metal_is_available() {
        Ok(Device::new_metal(0)?)
    } else {
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            tracing::info!("Running on CPU, to run on GPU(metal), build with `--features metal`");
        }
        #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
        {
            tracing::info!("Running on CPU, to run on GPU, build with `--features cuda`");
        }
        Ok(Device::Cpu)
    }
}
