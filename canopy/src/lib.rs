//! # canopy
//!
//! A toolbox for extracting per-polygon statistics and derived raster
//! products from forest remote sensing raster stacks: canopy height models,
//! spectral indices, treetop detection, crown delineation, and object-based
//! feature extraction, all driven tile-by-tile over core+halo partitions so
//! memory use stays bounded regardless of raster size (spec.md §4.2).
//!
//! ## Usage Example
//!
//! ```rust
//! use canopy::core::DetectionParams;
//! use canopy::trees::detect_treetops;
//!
//! # fn run(source: &dyn canopy::core::RasterSource) -> anyhow::Result<()> {
//! let treetops = detect_treetops(source, &DetectionParams::default(), 256, 16)?;
//! println!("found {} treetops", treetops.len());
//! # Ok(())
//! # }
//! ```

pub mod io;

pub use canopy_core as core;
pub use canopy_engine as engine;
pub use canopy_extract as extract;
pub use canopy_geometry as geometry;
pub use canopy_raster as raster;
pub use canopy_trees as trees;
