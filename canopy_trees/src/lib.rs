//! Treetop detection and crown delineation kernels, driven one core+halo
//! tile at a time by `canopy_engine`.

pub mod crown;
pub mod imgconv;
pub mod morphology;
pub mod treetop;

pub use crown::{delineate_crowns, delineate_crowns_tile};
pub use treetop::{detect_treetops, detect_treetops_tile};
