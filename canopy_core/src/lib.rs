//! Raster envelope, windowing, strategy selection, configuration, and the
//! ambient error/diagnostics stack shared across the canopy workspace.

pub mod config;
pub mod diagnostics;
pub mod envelope;
pub mod error;
pub mod io;
pub mod strategy;
pub mod window;

pub use config::{Aggregation, DelineationMethod, DelineationParams, DetectionMethod, DetectionParams, TileMode};
pub use diagnostics::{CountingDiagnostics, Diagnostics, NullDiagnostics, SkipKind};
pub use envelope::{AffineTransform, BandTable, Crs, RasterEnvelope};
pub use error::CanopyError;
pub use io::{PointCloudSource, RasterSource, classify_block_structure};
pub use strategy::{BlockStructure, MemoryEstimate, ProcessingMode, RasterHeader, StrategyReport, determine_strategy};
pub use window::{CoreBox, CoreHaloTile, TileWindow, WorldBox, partition_core_boxes};
