//! Vector feature table, spatial index, geometry repair, and the record
//! types emitted by the extractor and the tree-detection kernels.

pub mod io;
pub mod records;
pub mod repair;
pub mod table;

pub use io::VectorSource;
pub use records::{AttrValue, CrownRecord, ExtractionRecord, ExtractionValue, TreetopRecord};
pub use repair::repair_geometry;
pub use table::{Feature, VectorTable};
