//! Canopy height model builder and spectral-index generator.

pub mod chm;
pub mod spectral;

pub use chm::{calculate_chm, calculate_chm_tile};
pub use spectral::{IndexDefinition, evaluate_index_tile, resolve_bands};
