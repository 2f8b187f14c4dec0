//! The tile/window partitioner and the synchronized-window dispatch engine
//! that drives every block-function kernel in the workspace.

pub mod dispatch;
pub mod partition;
#[cfg(test)]
mod test_support;

pub use dispatch::{DispatchConfig, DispatchOutput, RasterInput, dispatch};
pub use partition::{BlockIter, CoreHaloIter, CoreHaloVisit, Stitcher, TileIter, WindowIter};
