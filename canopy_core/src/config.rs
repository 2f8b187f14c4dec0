//! Configuration envelopes for detection, delineation, tiling, and
//! cross-tile aggregation (spec §3 "Configuration").
//!
//! These are plain structs with literal defaults, matching the original
//! implementation's dataclass defaults rather than a builder or parsed
//! config-file format — the workspace has no file-format parsing Non-goal
//! to satisfy here, just the numeric defaults callers expect.

/// Treetop detection algorithm selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionMethod {
	/// Local-maximum filter over a fixed window.
	Lmf,
	/// Variable-window-size local-maximum filter, window scaled by height.
	Vws,
	/// Topographic-prominence filter.
	Prominence,
}

/// Parameters for treetop detection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionParams {
	pub method: DetectionMethod,
	/// Ground sample distance of the canopy height model, in meters.
	pub pixel_size: f64,
	/// Minimum canopy height (meters) considered a candidate treetop.
	pub min_height: f64,
	/// Minimum horizontal separation (meters) between accepted treetops.
	pub min_tree_distance: f64,
	/// Minimum topographic prominence (meters) for [`DetectionMethod::Prominence`].
	pub prominence_height: f64,
	/// Base sigma (meters) of the [`DetectionMethod::Vws`] window-size curve.
	pub vws_detection_sigma: f64,
	/// Per-meter-of-height growth rate of the [`DetectionMethod::Vws`] window.
	pub vws_distance_scale: f64,
	/// Exponent applied to height in the [`DetectionMethod::Vws`] window curve.
	pub vws_power: f64,
	/// Window side length, in pixels, for [`DetectionMethod::Lmf`].
	pub lmf_window_size: usize,
}

impl Default for DetectionParams {
	fn default() -> Self {
		DetectionParams {
			method: DetectionMethod::Prominence,
			pixel_size: 0.25,
			min_height: 3.0,
			min_tree_distance: 1.5,
			prominence_height: 1.0,
			vws_detection_sigma: 2.0,
			vws_distance_scale: 0.12,
			vws_power: 1.0,
			lmf_window_size: 5,
		}
	}
}

/// Crown delineation algorithm selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelineationMethod {
	/// Marker-controlled watershed over the inverted, smoothed CHM.
	Watershed,
	/// Ring-by-ring region growing from each treetop apex.
	RegionGrowing,
}

/// Parameters for crown delineation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DelineationParams {
	pub method: DelineationMethod,
	/// Ground sample distance of the canopy height model, in meters.
	pub pixel_size: f64,
	/// Minimum canopy height (meters) a pixel must clear to join any crown.
	pub min_height: f64,
	/// Gaussian smoothing sigma (pixels) applied before watershed.
	pub watershed_sigma: f64,
	/// Hard cap on crown radius, in meters, from the apex.
	pub max_crown_radius: f64,
	/// Fraction of apex height a ring must retain to stay inside the crown
	/// during the apex-inclusion check.
	pub apex_inclusion: f64,
	/// Fraction of the running ring maximum a pixel must retain to remain
	/// part of the crown (region-growing stopping rule).
	pub crown_threshold: f64,
}

impl Default for DelineationParams {
	fn default() -> Self {
		DelineationParams {
			method: DelineationMethod::Watershed,
			pixel_size: 0.25,
			min_height: 3.0,
			watershed_sigma: 0.5,
			max_crown_radius: 10.0,
			apex_inclusion: 0.45,
			crown_threshold: 0.55,
		}
	}
}

/// How per-tile kernel outputs are combined by the dispatch engine (spec §5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregation {
	/// Write each tile's output array back into its core window of a
	/// shared output envelope.
	Stitch,
	/// Append each tile's output records into one combined `Vec`.
	Collect,
	/// Fold tile outputs pairwise into a single running accumulator.
	Reduce,
	/// Discard tile outputs; only side effects (diagnostics counters) matter.
	None,
}

/// Tile sizing policy used by the partitioner when the dispatch strategy is
/// [`crate::strategy::ProcessingMode::Tiled`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TileMode {
	/// Fixed square tiles of the given side length, in pixels.
	Fixed(usize),
	/// Tiles sized to the raster's natural block structure (spec §4.2).
	Native,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn detection_defaults_match_documented_values() {
		let d = DetectionParams::default();
		assert_eq!(d.method, DetectionMethod::Prominence);
		assert!((d.pixel_size - 0.25).abs() < 1e-12);
		assert!((d.min_height - 3.0).abs() < 1e-12);
		assert!((d.min_tree_distance - 1.5).abs() < 1e-12);
		assert!((d.prominence_height - 1.0).abs() < 1e-12);
		assert!((d.vws_detection_sigma - 2.0).abs() < 1e-12);
		assert!((d.vws_distance_scale - 0.12).abs() < 1e-12);
		assert!((d.vws_power - 1.0).abs() < 1e-12);
		assert_eq!(d.lmf_window_size, 5);
	}

	#[test]
	fn delineation_defaults_match_documented_values() {
		let d = DelineationParams::default();
		assert_eq!(d.method, DelineationMethod::Watershed);
		assert!((d.pixel_size - 0.25).abs() < 1e-12);
		assert!((d.min_height - 3.0).abs() < 1e-12);
		assert!((d.watershed_sigma - 0.5).abs() < 1e-12);
		assert!((d.max_crown_radius - 10.0).abs() < 1e-12);
		assert!((d.apex_inclusion - 0.45).abs() < 1e-12);
		assert!((d.crown_threshold - 0.55).abs() < 1e-12);
	}
}
