//! Re-exports of the workspace's I/O collaborator traits, plus the
//! in-memory mock implementations used by the workspace's own tests
//! (spec §6; grounded on the teacher's `versatiles_pipeline::helpers`
//! mock-collaborator pattern).

pub mod mock;

pub use canopy_core::{PointCloudSource, RasterSource};
pub use canopy_geometry::VectorSource;
