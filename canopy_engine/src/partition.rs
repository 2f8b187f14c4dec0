//! Tile/window partitioner (spec §4.2): three window iterators over a
//! raster source, a core+halo iterator for focal kernels, and a tile
//! stitcher. Implemented as plain `std::iter::Iterator`s rather than the
//! teacher's async `Stream` — spec §5 mandates single-threaded cooperative
//! streaming with no background workers, so there is nothing for an async
//! runtime to schedule around.

use anyhow::{Result, bail, ensure};
use canopy_core::{BlockStructure, CoreBox, CoreHaloTile, RasterEnvelope, RasterSource, TileWindow, WorldBox, partition_core_boxes};
use ndarray::Array3;

/// Walks a raster's native block windows (spec §4.2 `iter_blocks`). Valid
/// only when the source is blocked/tiled on disk; the resource analyzer
/// does not route a strip-oriented file here.
pub struct BlockIter<'a> {
	source: &'a dyn RasterSource,
	windows: std::vec::IntoIter<TileWindow>,
}

impl<'a> BlockIter<'a> {
	/// # Errors
	/// Returns an error if `source` is strip-oriented (no native block grid
	/// to walk).
	pub fn new(source: &'a dyn RasterSource) -> Result<Self> {
		ensure!(
			matches!(source.header().block_structure, BlockStructure::Blocked { .. }),
			"iter_blocks requires a blocked/tiled source; got a strip-oriented raster"
		);
		Ok(BlockIter {
			source,
			windows: source.native_block_windows().into_iter(),
		})
	}
}

impl Iterator for BlockIter<'_> {
	type Item = Result<(TileWindow, Array3<f64>)>;

	fn next(&mut self) -> Option<Self::Item> {
		let window = self.windows.next()?;
		Some(self.source.read_window(window, None).map(|array| (window, array)))
	}
}

/// Yields fixed-size windows on a regular grid, expanded by `overlap`
/// pixels and clipped at the raster edges (spec §4.2 `iter_tiles`).
pub struct TileIter<'a> {
	source: &'a dyn RasterSource,
	core_boxes: std::vec::IntoIter<CoreBox>,
	overlap: usize,
	width: usize,
	height: usize,
}

impl<'a> TileIter<'a> {
	#[must_use]
	pub fn new(source: &'a dyn RasterSource, tile_size: usize, overlap: usize) -> Self {
		let header = source.header();
		let core_boxes = partition_core_boxes(header.width, header.height, tile_size);
		TileIter {
			source,
			core_boxes: core_boxes.into_iter(),
			overlap,
			width: header.width,
			height: header.height,
		}
	}
}

impl Iterator for TileIter<'_> {
	type Item = Result<(TileWindow, Array3<f64>)>;

	fn next(&mut self) -> Option<Self::Item> {
		let core = self.core_boxes.next()?;
		let read = core.window.expand(self.overlap, self.width, self.height);
		Some(self.source.read_window(read, None).map(|array| (read, array)))
	}
}

/// Identical semantics to [`TileIter`] but over an already-loaded
/// in-memory envelope (spec §4.2 `iter_windows`); each yielded tile carries
/// its own adjusted envelope (transform moved to the window's origin) so
/// world coordinates stay correct downstream.
pub struct WindowIter<'a> {
	envelope: &'a RasterEnvelope,
	core_boxes: std::vec::IntoIter<CoreBox>,
	overlap: usize,
}

impl<'a> WindowIter<'a> {
	#[must_use]
	pub fn new(envelope: &'a RasterEnvelope, tile_size: usize, overlap: usize) -> Self {
		let core_boxes = partition_core_boxes(envelope.width(), envelope.height(), tile_size);
		WindowIter {
			envelope,
			core_boxes: core_boxes.into_iter(),
			overlap,
		}
	}
}

impl Iterator for WindowIter<'_> {
	type Item = Result<(TileWindow, RasterEnvelope)>;

	fn next(&mut self) -> Option<Self::Item> {
		let core = self.core_boxes.next()?;
		let read = core.window.expand(self.overlap, self.envelope.width(), self.envelope.height());
		Some(
			self.envelope
				.crop(read.x_min, read.y_min, read.width(), read.height())
				.map(|cropped| (read, cropped)),
		)
	}
}

/// One core+halo visitation: the read box's pixel data and transform, plus
/// the world-coordinate core box and read box (spec §4.2 `iter_core_halo`).
pub struct CoreHaloVisit {
	pub array: Array3<f64>,
	pub transform: canopy_core::AffineTransform,
	pub core_box: WorldBox,
	pub read_box: WorldBox,
	/// The core box in the parent raster's own pixel grid — where a
	/// stitcher or collector should file this visit's output.
	pub core_window: TileWindow,
	/// The same core box, expressed in the read array's own local pixel
	/// coordinates — the region a kernel should slice out when it's
	/// keeping only the core from a read-box-shaped result.
	pub core_in_read: TileWindow,
}

/// Core+halo iterator (spec §4.2): for each native block or fixed tile,
/// yields the read box's pixel data together with the owning (non
/// overlapping) core box, guaranteeing core boxes cover the parent's
/// bounds exactly (Testable Property 1).
pub struct CoreHaloIter<'a> {
	source: &'a dyn RasterSource,
	tiles: std::vec::IntoIter<CoreHaloTile>,
}

impl<'a> CoreHaloIter<'a> {
	#[must_use]
	pub fn new(source: &'a dyn RasterSource, tile_size: usize, overlap: usize) -> Self {
		let header = source.header();
		let cores = partition_core_boxes(header.width, header.height, tile_size);
		let tiles: Vec<CoreHaloTile> = cores
			.into_iter()
			.map(|core| CoreHaloTile::new(core, overlap, header.width, header.height))
			.collect();
		CoreHaloIter { source, tiles: tiles.into_iter() }
	}

	/// Builds the iterator from a raster's native block grid instead of a
	/// fixed tile size, for [`canopy_core::ProcessingMode::Blocked`] runs.
	#[must_use]
	pub fn from_native_blocks(source: &'a dyn RasterSource, overlap: usize) -> Self {
		let header = source.header();
		let windows = source.native_block_windows();
		let tiles: Vec<CoreHaloTile> = windows
			.into_iter()
			.enumerate()
			.map(|(tile_index, window)| {
				let core = CoreBox { window, tile_index };
				CoreHaloTile::new(core, overlap, header.width, header.height)
			})
			.collect();
		CoreHaloIter { source, tiles: tiles.into_iter() }
	}
}

impl Iterator for CoreHaloIter<'_> {
	type Item = Result<CoreHaloVisit>;

	fn next(&mut self) -> Option<Self::Item> {
		let tile = self.tiles.next()?;
		let transform = self.source.transform().translated(tile.read.x_min as i64, tile.read.y_min as i64);
		let core_offset = tile.core_offset_in_read();
		let core_in_read = TileWindow {
			x_min: core_offset.0,
			x_max: core_offset.0 + tile.core.window.width(),
			y_min: core_offset.1,
			y_max: core_offset.1 + tile.core.window.height(),
		};
		Some(self.source.read_window(tile.read, None).map(|array| CoreHaloVisit {
			array,
			transform,
			core_box: tile.core.window.to_world(&self.source.transform()),
			read_box: tile.read.to_world(&self.source.transform()),
			core_window: tile.core.window,
			core_in_read,
		}))
	}
}

/// Assembles processed tiles back into an output raster, accepting
/// `(window, tile)` writes in arbitrary order (spec §4.2 "Tile stitcher").
/// `sink` is given ownership of the write call so the stitcher itself
/// stays agnostic to the concrete output format.
pub struct Stitcher<'a> {
	sink: &'a mut dyn RasterSource,
}

impl<'a> Stitcher<'a> {
	#[must_use]
	pub fn new(sink: &'a mut dyn RasterSource) -> Self {
		Stitcher { sink }
	}

	/// Writes one tile's pixel block into the matching window of the
	/// output. Tiles may arrive in any order; each write targets only its
	/// own window.
	pub fn write_tile(&mut self, window: TileWindow, data: &Array3<f64>) -> Result<()> {
		if data.shape()[1] != window.height() || data.shape()[2] != window.width() {
			bail!(
				"tile array shape {:?} does not match window {}x{}",
				data.shape(),
				window.width(),
				window.height()
			);
		}
		self.sink.write_window(window, data)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::MemoryRasterSource;

	#[test]
	fn tile_iter_covers_whole_raster_with_no_gap() {
		let source = MemoryRasterSource::constant(1, 10, 10, 7.0);
		let mut covered = vec![vec![0u8; 10]; 10];
		for result in TileIter::new(&source, 4, 0) {
			let (window, _array) = result.unwrap();
			for y in window.y_min..window.y_max {
				for x in window.x_min..window.x_max {
					covered[y][x] += 1;
				}
			}
		}
		assert!(covered.iter().all(|row| row.iter().all(|&c| c == 1)));
	}

	#[test]
	fn core_halo_iter_core_boxes_tile_exactly() {
		let source = MemoryRasterSource::constant(1, 20, 20, 0.0);
		let mut covered = vec![vec![0u8; 20]; 20];
		for result in CoreHaloIter::new(&source, 6, 2) {
			let visit = result.unwrap();
			let core = visit.core_box;
			let x_min = core.x_min.round() as usize;
			let x_max = core.x_max.round() as usize;
			let y_min = (20.0 - core.y_max).round() as usize;
			let y_max = (20.0 - core.y_min).round() as usize;
			for y in y_min..y_max {
				for x in x_min..x_max {
					covered[y][x] += 1;
				}
			}
		}
		assert!(covered.iter().all(|row| row.iter().all(|&c| c == 1)));
	}

	#[test]
	fn block_iter_rejects_strip_oriented_source() {
		let source = MemoryRasterSource::striped(1, 10, 10, 0.0);
		assert!(BlockIter::new(&source).is_err());
	}
}
