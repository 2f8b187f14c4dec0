//! Tagged error taxonomy (spec §7).
//!
//! Most functions in this workspace return `anyhow::Result<T>`, matching the
//! ambient convention used throughout the teacher crates. `CanopyError` is
//! the subset of failures whose *kind* a caller needs to branch on (the
//! dispatch engine aborting on a grid mismatch, the resource analyzer
//! downgrading a mode on a memory-unsafe probe). Call sites recover the kind
//! with `err.downcast_ref::<CanopyError>()`.

use thiserror::Error;

/// Tagged error kinds from spec §7.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CanopyError {
	/// A referenced raster or vector input could not be located.
	#[error("input not found: {0}")]
	InputNotFound(String),

	/// Synchronized partitioner iterators disagreed on the next window, or
	/// one stream ended early. Fatal: the caller must pre-align inputs.
	#[error("grid mismatch across dispatch inputs: {0}")]
	GridMismatch(String),

	/// A memory probe judged `IN_MEMORY` unsafe while the caller explicitly
	/// requested it (the `auto` path downgrades instead of erroring).
	#[error("memory-unsafe in-memory load requested: {0}")]
	MemoryUnsafe(String),

	/// A feature geometry was invalid and could not be repaired.
	#[error("invalid geometry: {0}")]
	InvalidGeometry(String),

	/// Vector and raster CRS disagree and could not be reconciled.
	#[error("CRS mismatch: vector={vector}, raster={raster}")]
	CrsMismatch {
		/// The vector table's CRS tag.
		vector: String,
		/// The raster's CRS tag.
		raster: String,
	},

	/// A polygon's rasterized mask was empty even after the any-touched
	/// retry. Non-fatal: the polygon is skipped, no record emitted.
	#[error("empty pixel mask for feature {0}")]
	EmptyMask(String),

	/// A spectral-index band request could not be matched to an actual band
	/// within `max_tolerance` nanometers. Fatal for the index generator.
	#[error("wavelength {requested}nm unmatched within {tolerance}nm tolerance (nearest: {nearest}nm)")]
	WavelengthUnmatched {
		/// The requested wavelength, in nanometers.
		requested: f64,
		/// The tolerance the caller allowed, in nanometers.
		tolerance: f64,
		/// The nearest available band wavelength, in nanometers.
		nearest: f64,
	},

	/// A block function raised inside the dispatch engine. Fatal; any tiles
	/// already stitched to disk before the failure are dirty.
	#[error("kernel failure: {0}")]
	KernelFailure(String),
}
