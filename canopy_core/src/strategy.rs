//! Resource-budget-aware dispatch strategy selection (spec §4.2), grounded
//! on the original implementation's `resources.py` sizing heuristic.

use crate::error::CanopyError;
use anyhow::{Result, ensure};

/// The natural on-disk block layout of a raster, used to decide whether
/// [`ProcessingMode::Tiled`] should walk striped rows or square blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStructure {
	/// The raster is stored (or should be read) in full-width row stripes
	/// of the given height, in pixels.
	Striped { row_height: usize },
	/// The raster is stored (or should be read) in square blocks of the
	/// given side length, in pixels.
	Blocked { block_size: usize },
}

/// The shape and component size of a raster under consideration, as seen
/// by the resource analyzer — no pixel data, just the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RasterHeader {
	pub bands: usize,
	pub height: usize,
	pub width: usize,
	/// Size in bytes of one pixel's stored sample (4 for f32, 8 for f64, ...).
	pub bytes_per_sample: usize,
	pub block_structure: BlockStructure,
}

impl RasterHeader {
	/// Total bytes required to hold the whole raster as one dense array.
	#[must_use]
	pub fn full_load_bytes(&self) -> u64 {
		self.bands as u64 * self.height as u64 * self.width as u64 * self.bytes_per_sample as u64
	}
}

/// The dispatch strategy chosen for a run (spec §4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingMode {
	/// Load the whole raster into one in-memory envelope.
	InMemory,
	/// Process in blocks matching the raster's natural block structure,
	/// without further subdivision.
	Blocked,
	/// Process in uniformly sized tiles, smaller than the natural blocks.
	Tiled { tile_size: usize },
}

/// A memory budget estimate: what a given mode would cost against what is
/// available, after applying the safety margin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemoryEstimate {
	/// Bytes the candidate mode would need to hold resident at once.
    pub required_bytes: u64,
	/// Bytes the system reports as free.
	pub available_bytes: u64,
	/// Multiplier applied to `required_bytes` before comparing against
	/// `available_bytes`, to leave headroom for working copies made by
	/// downstream kernels (gaussian blur buffers, watershed labels, ...).
	pub safety_factor: f64,
	/// Bytes that must remain free even after `required_bytes * safety_factor`
	/// is subtracted, so the rest of the system keeps functioning.
	pub min_free_bytes: u64,
}

impl MemoryEstimate {
	/// True if loading `required_bytes` under this estimate's margins would
	/// leave at least `min_free_bytes` of headroom.
	#[must_use]
	pub fn fits(&self) -> bool {
		let needed = (self.required_bytes as f64 * self.safety_factor) as u64;
		self.available_bytes.saturating_sub(needed) >= self.min_free_bytes
	}
}

/// The outcome of [`determine_strategy`]: the chosen mode plus the memory
/// estimate that justified it, for logging and the run manifest.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrategyReport {
	pub mode: ProcessingMode,
	pub estimate: MemoryEstimate,
}

const DEFAULT_SAFETY_FACTOR: f64 = 3.0;
const DEFAULT_MIN_FREE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// A block-sized candidate below which tiling no longer pays for itself —
/// below this, [`ProcessingMode::Blocked`] is preferred over a tiny tile.
const MIN_TILE_SIZE: usize = 256;

/// Chooses a dispatch mode for `header` given `available_bytes` of free
/// memory, matching the original implementation's two-branch decision: if
/// the whole raster fits in memory, load it whole; otherwise dispatch to
/// the raster's natural block structure, square [`ProcessingMode::Blocked`]
/// for a blocked layout or a row-oriented [`ProcessingMode::Tiled`] for a
/// striped one. There is no secondary per-block memory check — a raster
/// too big to load whole is always processed incrementally.
///
/// `force` overrides the decision: `Some(mode)` is returned as-is, except
/// forcing [`ProcessingMode::InMemory`] when memory-unsafe returns
/// [`CanopyError::MemoryUnsafe`] instead, and forcing
/// [`ProcessingMode::Blocked`] on a [`BlockStructure::Striped`] header
/// falls back to [`ProcessingMode::Tiled`] — a strip-oriented file has no
/// square blocks to walk.
pub fn determine_strategy(header: &RasterHeader, available_bytes: u64, force: Option<ProcessingMode>) -> Result<StrategyReport> {
	let whole_estimate = MemoryEstimate {
		required_bytes: header.full_load_bytes(),
		available_bytes,
		safety_factor: DEFAULT_SAFETY_FACTOR,
		min_free_bytes: DEFAULT_MIN_FREE_BYTES,
	};

	if let Some(mode) = force {
		if mode == ProcessingMode::InMemory && !whole_estimate.fits() {
			return Err(CanopyError::MemoryUnsafe(format!(
				"in-memory load of {} bytes would leave less than {} bytes free",
				whole_estimate.required_bytes, whole_estimate.min_free_bytes
			))
			.into());
		}
		if mode == ProcessingMode::Blocked && matches!(header.block_structure, BlockStructure::Striped { .. }) {
			log::warn!("forced Blocked mode on a strip-oriented raster; falling back to Tiled");
			let tile_size = natural_tile_size(header);
			return Ok(StrategyReport {
				mode: ProcessingMode::Tiled { tile_size },
				estimate: whole_estimate,
			});
		}
		return Ok(StrategyReport {
			mode,
			estimate: whole_estimate,
		});
	}

	if whole_estimate.fits() {
		return Ok(StrategyReport {
			mode: ProcessingMode::InMemory,
			estimate: whole_estimate,
		});
	}

	match header.block_structure {
		BlockStructure::Blocked { .. } => Ok(StrategyReport {
			mode: ProcessingMode::Blocked,
			estimate: whole_estimate,
		}),
		BlockStructure::Striped { .. } => Ok(StrategyReport {
			mode: ProcessingMode::Tiled {
				tile_size: natural_tile_size(header),
			},
			estimate: whole_estimate,
		}),
	}
}

/// The tile side length to walk a striped raster by, when it can't be read
/// whole or by native square blocks: its stripe height, floored at
/// [`MIN_TILE_SIZE`].
fn natural_tile_size(header: &RasterHeader) -> usize {
	match header.block_structure {
		BlockStructure::Striped { row_height } => row_height.max(MIN_TILE_SIZE),
		BlockStructure::Blocked { block_size } => block_size.max(MIN_TILE_SIZE),
	}
}

/// Validates a header's dimensions are non-zero, used by callers that
/// construct a `RasterHeader` from untrusted metadata before passing it to
/// [`determine_strategy`].
pub fn validate_header(header: &RasterHeader) -> Result<()> {
	ensure!(header.bands > 0, "raster header has zero bands");
	ensure!(header.height > 0 && header.width > 0, "raster header has a zero dimension");
	ensure!(header.bytes_per_sample > 0, "raster header has zero-byte samples");
	Ok(())
}
