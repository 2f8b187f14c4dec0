//! Object-based feature extractor (spec §4.4): intersects a vector table
//! with a raster tile stream and emits per-band statistics or raw pixel
//! payloads, one record per feature.

pub mod extractor;

pub use extractor::{ExtractionConfig, ExtractionStream, collect_records, extract_features};
