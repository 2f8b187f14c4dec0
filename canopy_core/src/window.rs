//! Tile windowing and core+halo geometry (spec §4.2, §4.3).
//!
//! Bounds are half-open `[x_min, x_max) x [y_min, y_max)` throughout, so a
//! pixel sitting exactly on a boundary between two adjacent core boxes is
//! deterministically assigned to exactly one of them (Testable Property 1:
//! core boxes tile the parent raster with no overlap and no gap).

use crate::envelope::AffineTransform;
use anyhow::{Result, ensure};

/// An axis-aligned world-coordinate bounding box, `[x_min, x_max) x
/// [y_min, y_max)` with `x_min <= x_max` and `y_min <= y_max` regardless of
/// the transform's axis direction (a north-up transform has a negative
/// `e`, so pixel-row-increasing maps to decreasing `y`; this box is
/// normalized after the mapping). Half-open on the high edge, same as
/// [`TileWindow`], so a point sitting exactly on a boundary shared by two
/// adjacent core boxes belongs to exactly one of them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldBox {
	pub x_min: f64,
	pub x_max: f64,
	pub y_min: f64,
	pub y_max: f64,
}

impl WorldBox {
	/// True if `(x, y)` falls within this box: closed on the low edge, open
	/// on the high edge.
	#[must_use]
	pub fn contains(&self, x: f64, y: f64) -> bool {
		x >= self.x_min && x < self.x_max && y >= self.y_min && y < self.y_max
	}
}

/// A pixel-space window `[x_min, x_max) x [y_min, y_max)` into a parent
/// raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileWindow {
	pub x_min: usize,
	pub x_max: usize,
	pub y_min: usize,
	pub y_max: usize,
}

impl TileWindow {
	/// Builds a window, validating that it is non-empty and well-ordered.
	///
	/// # Errors
	/// Returns an error if `x_max <= x_min` or `y_max <= y_min`.
	pub fn new(x_min: usize, x_max: usize, y_min: usize, y_max: usize) -> Result<Self> {
		ensure!(x_max > x_min, "window has empty or negative x extent: [{x_min}, {x_max})");
		ensure!(y_max > y_min, "window has empty or negative y extent: [{y_min}, {y_max})");
		Ok(TileWindow { x_min, x_max, y_min, y_max })
	}

	#[must_use]
	pub fn width(&self) -> usize {
		self.x_max - self.x_min
	}

	#[must_use]
	pub fn height(&self) -> usize {
		self.y_max - self.y_min
	}

	/// Grows this window by `halo` pixels on every side, clipped to
	/// `[0, parent_width) x [0, parent_height)`.
	#[must_use]
	pub fn expand(&self, halo: usize, parent_width: usize, parent_height: usize) -> TileWindow {
		TileWindow {
			x_min: self.x_min.saturating_sub(halo),
			x_max: (self.x_max + halo).min(parent_width),
			y_min: self.y_min.saturating_sub(halo),
			y_max: (self.y_max + halo).min(parent_height),
		}
	}

	/// True if `(x, y)` falls within this window.
	#[must_use]
	pub fn contains(&self, x: usize, y: usize) -> bool {
		x >= self.x_min && x < self.x_max && y >= self.y_min && y < self.y_max
	}

	/// True if this window shares no pixel with `other`.
	#[must_use]
	pub fn is_disjoint(&self, other: &TileWindow) -> bool {
		self.x_max <= other.x_min || other.x_max <= self.x_min || self.y_max <= other.y_min || other.y_max <= self.y_min
	}

	/// The world-coordinate bounding box of this pixel window under
	/// `transform`, normalized so `x_min <= x_max` and `y_min <= y_max`
	/// regardless of the transform's axis orientation.
	#[must_use]
	pub fn to_world(&self, transform: &AffineTransform) -> WorldBox {
		let corners = [
			transform.apply(self.x_min as f64, self.y_min as f64),
			transform.apply(self.x_max as f64, self.y_min as f64),
			transform.apply(self.x_min as f64, self.y_max as f64),
			transform.apply(self.x_max as f64, self.y_max as f64),
		];
		let xs = corners.iter().map(|c| c.0);
		let ys = corners.iter().map(|c| c.1);
		WorldBox {
			x_min: xs.clone().fold(f64::INFINITY, f64::min),
			x_max: xs.fold(f64::NEG_INFINITY, f64::max),
			y_min: ys.clone().fold(f64::INFINITY, f64::min),
			y_max: ys.fold(f64::NEG_INFINITY, f64::max),
		}
	}
}

/// A core box: one tile of a parent-raster partition, with no overlap or
/// gap among siblings (Testable Property 1). Distinguished from a bare
/// [`TileWindow`] so partition-tiling invariants can be checked on the type
/// rather than re-derived from arbitrary windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoreBox {
	pub window: TileWindow,
	/// Row-major index of this box within the partition's tile grid.
	pub tile_index: usize,
}

/// A tile carrying both its core box (the region this tile is responsible
/// for writing) and its read box (core expanded by the kernel's halo, for
/// focal operations that need neighboring pixels).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoreHaloTile {
	pub core: CoreBox,
	pub read: TileWindow,
}

impl CoreHaloTile {
	/// Builds a tile from a core box, growing it by `halo` pixels to form
	/// the read box.
	#[must_use]
	pub fn new(core: CoreBox, halo: usize, parent_width: usize, parent_height: usize) -> Self {
		let read = core.window.expand(halo, parent_width, parent_height);
		CoreHaloTile { core, read }
	}

	/// Offset of the core box's origin within the read box — where a
	/// kernel operating on the read-box array should write its output back
	/// into the core region.
	#[must_use]
	pub fn core_offset_in_read(&self) -> (usize, usize) {
		(self.core.window.x_min - self.read.x_min, self.core.window.y_min - self.read.y_min)
	}
}

/// Partitions a `parent_width x parent_height` raster into a row-major grid
/// of core boxes of side `tile_size` pixels (edge tiles are smaller where
/// the raster doesn't divide evenly). Core boxes from this function always
/// tile the parent exactly: every pixel belongs to exactly one box.
#[must_use]
pub fn partition_core_boxes(parent_width: usize, parent_height: usize, tile_size: usize) -> Vec<CoreBox> {
	let mut boxes = Vec::new();
	let mut tile_index = 0;
	let mut y = 0;
	while y < parent_height {
		let y_max = (y + tile_size).min(parent_height);
		let mut x = 0;
		while x < parent_width {
			let x_max = (x + tile_size).min(parent_width);
			boxes.push(CoreBox {
				window: TileWindow { x_min: x, x_max, y_min: y, y_max },
				tile_index,
			});
			tile_index += 1;
			x = x_max;
		}
		y = y_max;
	}
	boxes
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[test]
	fn window_rejects_empty_extent() {
		assert!(TileWindow::new(5, 5, 0, 10).is_err());
		assert!(TileWindow::new(0, 10, 5, 5).is_err());
	}

	#[test]
	fn to_world_normalizes_north_up_axis_flip() {
		let transform = AffineTransform::north_up(0.0, 100.0, 1.0);
		let window = TileWindow::new(0, 10, 0, 10).unwrap();
		let world = window.to_world(&transform);
		assert!(world.x_min <= world.x_max);
		assert!(world.y_min <= world.y_max);
		assert_eq!(world.y_max, 100.0);
		assert_eq!(world.y_min, 90.0);
	}

	#[test]
	fn expand_clips_to_parent_bounds() {
		let w = TileWindow::new(0, 10, 0, 10).unwrap();
		let grown = w.expand(5, 12, 12);
		assert_eq!(grown, TileWindow { x_min: 0, x_max: 12, y_min: 0, y_max: 12 });
	}

	#[test]
	fn core_offset_in_read_accounts_for_clipped_halo() {
		let core = CoreBox { window: TileWindow::new(10, 20, 10, 20).unwrap(), tile_index: 0 };
		let tile = CoreHaloTile::new(core, 3, 100, 100);
		assert_eq!(tile.core_offset_in_read(), (3, 3));

		// Halo clipped at the raster edge shifts the offset accordingly.
		let edge_core = CoreBox { window: TileWindow::new(0, 10, 0, 10).unwrap(), tile_index: 0 };
		let edge_tile = CoreHaloTile::new(edge_core, 3, 100, 100);
		assert_eq!(edge_tile.core_offset_in_read(), (0, 0));
	}

	#[rstest]
	#[case(100, 100, 32)]
	#[case(257, 129, 64)]
	#[case(10, 10, 4)]
	fn partition_core_boxes_tile_exactly_with_no_overlap_or_gap(#[case] w: usize, #[case] h: usize, #[case] tile: usize) {
		let boxes = partition_core_boxes(w, h, tile);

		// No overlap: every distinct pair is disjoint.
		for i in 0..boxes.len() {
			for j in (i + 1)..boxes.len() {
				assert!(boxes[i].window.is_disjoint(&boxes[j].window), "boxes {i} and {j} overlap");
			}
		}

		// No gap: every pixel is covered by exactly one box.
		let mut covered = vec![vec![0u8; w]; h];
		for b in &boxes {
			for y in b.window.y_min..b.window.y_max {
				for x in b.window.x_min..b.window.x_max {
					covered[y][x] += 1;
				}
			}
		}
		assert!(covered.iter().all(|row| row.iter().all(|&c| c == 1)));
	}
}
