//! Raster and point-cloud I/O collaborator traits (spec §6). These are the
//! seam between the processing engine and file-format drivers (GeoTIFF,
//! ENVI, LAS/LAZ, ...), which are out of scope (spec.md §1 Non-goals).
//!
//! `VectorSource` lives in `canopy_geometry` instead of here, since its
//! return type (`VectorTable`) depends on that crate's geometry types and
//! this crate must not depend back on it.

use crate::envelope::{AffineTransform, BandTable, Crs};
use crate::strategy::{BlockStructure, RasterHeader};
use crate::window::TileWindow;
use anyhow::Result;
use ndarray::Array3;

/// Raster I/O collaborator (spec §6 "Raster I/O collaborator").
///
/// Implementations open a raster by path (or wrap an in-memory buffer, for
/// the test-only mocks in `canopy::io::mock`) and expose header metadata
/// plus windowed reads/writes.
pub trait RasterSource {
	/// Shape, dtype size, and native block structure, as the resource
	/// analyzer needs it.
	fn header(&self) -> RasterHeader;

	fn transform(&self) -> AffineTransform;

	fn crs(&self) -> &Crs;

	fn nodata(&self) -> Option<f64>;

	fn bands(&self) -> &BandTable;

	/// Per-band wavelength tags, read from band descriptions/metadata, for
	/// the spectral-index generator's band matching (spec §4.8). `None`
	/// for sources with no wavelength metadata.
	fn band_wavelength_nm(&self, band: usize) -> Option<f64>;

	/// The raster's native block windows, in row-major visitation order.
	/// Only meaningful when [`RasterHeader::block_structure`] is
	/// [`BlockStructure::Blocked`] — callers otherwise fall back to
	/// [`BlockStructure::Striped`] row windows.
	fn native_block_windows(&self) -> Vec<TileWindow>;

	/// Reads `window` as a `(bands, height, width)` array. A *boundless*
	/// read: pixels outside the raster's extent are filled with `fill`
	/// (defaulting to nodata, or 0.0 if no nodata is set) rather than
	/// erroring.
	fn read_window(&self, window: TileWindow, fill: Option<f64>) -> Result<Array3<f64>>;

	/// Writes `data` into `window` of an already-open output. Implementors
	/// open for read/write up front; this call does not itself open/close
	/// a handle.
	fn write_window(&mut self, window: TileWindow, data: &Array3<f64>) -> Result<()>;
}

/// Point-cloud collaborator for CHM inputs derived from classified point
/// clouds (spec §6 "Point cloud collaborator"). Ground filtering producing
/// the classification is itself an external black box (spec.md §1); this
/// trait only streams the classified result.
pub trait PointCloudSource {
	/// Global bounds `(x_min, y_min, x_max, y_max, z_min, z_max)` from the
	/// file header.
	fn bounds(&self) -> (f64, f64, f64, f64, f64, f64);

	/// Streams the point set in chunks. Each chunk is parallel arrays of
	/// equal length: x, y, z, ASPRS classification code, and LAS return
	/// number.
    fn chunks(&mut self) -> Box<dyn Iterator<Item = Result<PointChunk>> + '_>;
}

/// One chunk of streamed point-cloud data.
#[derive(Clone, Debug, PartialEq)]
pub struct PointChunk {
	pub x: Vec<f64>,
	pub y: Vec<f64>,
	pub z: Vec<f64>,
	pub classification: Vec<u8>,
	pub return_number: Vec<u8>,
}

/// Suggests a [`BlockStructure`] classification from a native block shape,
/// per spec §4.1: strip-oriented iff block width equals the raster width
/// or block height is 1; otherwise genuinely tiled/blocked.
#[must_use]
pub fn classify_block_structure(block_width: usize, block_height: usize, raster_width: usize) -> BlockStructure {
	if block_width == raster_width || block_height == 1 {
		BlockStructure::Striped { row_height: block_height }
	} else {
		BlockStructure::Blocked { block_size: block_width.max(block_height) }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case(256, 1, 1024, true)]
	#[case(1024, 16, 1024, true)]
	#[case(256, 256, 1024, false)]
	fn classify_block_structure_matches_spec_rule(#[case] bw: usize, #[case] bh: usize, #[case] rw: usize, #[case] expect_striped: bool) {
		let structure = classify_block_structure(bw, bh, rw);
		assert_eq!(matches!(structure, BlockStructure::Striped { .. }), expect_striped);
	}
}
