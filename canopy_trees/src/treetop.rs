//! Treetop detection (spec §4.6): prominence (H-dome reconstruction), VWS,
//! and LMF peak-finding kernels over a CHM tile, deduplicated by core-box
//! containment.

use crate::imgconv::gaussian_blur;
use crate::morphology::{label_components, reconstruct_by_dilation};
use anyhow::Result;
use canopy_core::{AffineTransform, DetectionMethod, DetectionParams, RasterSource, WorldBox};
use canopy_engine::CoreHaloIter;
use canopy_geometry::TreetopRecord;
use geo_types::point;
use ndarray::{Array2, ArrayView2};

/// Iterates the CHM's core+halo tiles (spec §4.6) and runs the detector over
/// each, returning the combined, deduplicated treetop list (the module's
/// `Aggregation::Collect` entry point).
///
/// # Errors
/// Propagates any tile read failure from `chm_source`.
pub fn detect_treetops(chm_source: &dyn RasterSource, params: &DetectionParams, tile_size: usize, overlap: usize) -> Result<Vec<TreetopRecord>> {
	let mut records = Vec::new();
	let nodata = chm_source.nodata();
	for visit in CoreHaloIter::new(chm_source, tile_size, overlap) {
		let visit = visit?;
		let view = visit.array.index_axis(ndarray::Axis(0), 0);
		records.extend(detect_treetops_tile(view, visit.transform, visit.core_box, nodata, params)?);
	}
	Ok(records)
}

/// Fixed smoothing sigma for the prominence kernel (spec §4.6: "Gaussian-
/// smooth CHM (σ=0.5)"), distinct from any configurable sigma.
const PROMINENCE_SMOOTH_SIGMA: f64 = 0.5;

/// Minimum H-dome height above the reconstruction envelope for a pixel to
/// remain a prominence candidate (spec §4.6 step iii).
const PROMINENCE_DOME_THRESHOLD: f64 = 0.05;

/// Runs `params.method` over one CHM tile and returns the surviving
/// treetops, each already filtered to lie within `core_box` (spec §4.6:
/// "Emit a point only if it is contained in the tile's core box").
pub fn detect_treetops_tile(chm: ArrayView2<f64>, transform: AffineTransform, core_box: WorldBox, nodata: Option<f64>, params: &DetectionParams) -> Result<Vec<TreetopRecord>> {
	let chm_owned = mask_nodata(chm, nodata);
	let peaks = match params.method {
		DetectionMethod::Prominence => detect_prominence(&chm_owned, params),
		DetectionMethod::Vws => detect_vws(&chm_owned, params),
		DetectionMethod::Lmf => detect_lmf(&chm_owned, params),
	};

	let mut records = Vec::new();
	for (row, col, height) in peaks {
		let (x, y) = transform.apply(col as f64 + 0.5, row as f64 + 0.5);
		if core_box.contains(x, y) {
			records.push(TreetopRecord {
				location: point! { x: x, y: y },
				height,
				method: params.method,
			});
		}
	}
	Ok(records)
}

/// Replaces nodata pixels with `f64::NEG_INFINITY` so they never win a max
/// comparison or pass a `>= min_height` test.
fn mask_nodata(chm: ArrayView2<f64>, nodata: Option<f64>) -> Array2<f64> {
	Array2::from_shape_fn(chm.dim(), |idx| {
		let v = chm[idx];
		match nodata {
			Some(nd) if nd.is_nan() && v.is_nan() => f64::NEG_INFINITY,
			Some(nd) if v == nd => f64::NEG_INFINITY,
			_ => v,
		}
	})
}

fn detect_prominence(chm: &Array2<f64>, params: &DetectionParams) -> Vec<(usize, usize, f64)> {
	let smoothed = gaussian_blur(chm, PROMINENCE_SMOOTH_SIGMA);
	let marker = smoothed.mapv(|v| v - params.prominence_height);
	let reconstruction = reconstruct_by_dilation(marker, &smoothed);

	let (height, width) = smoothed.dim();
	let mut candidate = Array2::from_elem((height, width), false);
	for r in 0..height {
		for c in 0..width {
			let dome = smoothed[[r, c]] - reconstruction[[r, c]];
			candidate[[r, c]] = dome > PROMINENCE_DOME_THRESHOLD && smoothed[[r, c]] >= params.min_height;
		}
	}

	let labels = label_components(&candidate);
	let n_components = labels.iter().copied().max().unwrap_or(0);
	let min_distance_px = params.min_tree_distance / params.pixel_size;

	let mut peaks = Vec::new();
	for component in 1..=n_components {
		let mut pixels: Vec<(usize, usize, f64)> = Vec::new();
		for r in 0..height {
			for c in 0..width {
				if labels[[r, c]] == component {
					pixels.push((r, c, smoothed[[r, c]]));
				}
			}
		}
		peaks.extend(greedy_suppress(pixels, min_distance_px));
	}
	peaks
}

fn detect_vws(chm: &Array2<f64>, params: &DetectionParams) -> Vec<(usize, usize, f64)> {
	let (height, width) = chm.dim();
	let mut candidates = Vec::new();
	for r in 0..height {
		for c in 0..width {
			let h = chm[[r, c]];
			if h >= params.min_height {
				candidates.push((r, c, h));
			}
		}
	}
	candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).expect("nodata already masked to -inf"));

	let mut accepted: Vec<(usize, usize, f64)> = Vec::new();
	for (r, c, h) in candidates {
		let radius_m = params.vws_detection_sigma + h.powf(params.vws_power) * params.vws_distance_scale;
		let radius_px = radius_m / params.pixel_size;
		let excluded = accepted.iter().any(|&(ar, ac, _)| {
			let dr = r as f64 - ar as f64;
			let dc = c as f64 - ac as f64;
			(dr * dr + dc * dc).sqrt() < radius_px
		});
		if !excluded {
			accepted.push((r, c, h));
		}
	}
	accepted
}

fn detect_lmf(chm: &Array2<f64>, params: &DetectionParams) -> Vec<(usize, usize, f64)> {
	let (height, width) = chm.dim();
	let radius = (params.lmf_window_size / 2) as isize;
	let mut peaks = Vec::new();
	for r in 0..height {
		for c in 0..width {
			let h = chm[[r, c]];
			if h < params.min_height {
				continue;
			}
			let mut is_max = true;
			for dr in -radius..=radius {
				let rr = r as isize + dr;
				if rr < 0 || rr >= height as isize {
					continue;
				}
				for dc in -radius..=radius {
					let cc = c as isize + dc;
					if cc < 0 || cc >= width as isize {
						continue;
					}
					if chm[[rr as usize, cc as usize]] > h {
						is_max = false;
						break;
					}
				}
				if !is_max {
					break;
				}
			}
			if is_max {
				peaks.push((r, c, h));
			}
		}
	}
	peaks
}

/// Greedily accepts the highest remaining pixel, rejecting any later
/// pixel within `min_distance` of an already-accepted one — the shared
/// suppression rule behind both the prominence kernel's per-component pass
/// and the VWS kernel's whole-tile pass.
fn greedy_suppress(mut pixels: Vec<(usize, usize, f64)>, min_distance: f64) -> Vec<(usize, usize, f64)> {
	pixels.sort_by(|a, b| b.2.partial_cmp(&a.2).expect("components exclude -inf pixels"));
	let mut accepted: Vec<(usize, usize, f64)> = Vec::new();
	for (r, c, h) in pixels {
		let suppressed = accepted.iter().any(|&(ar, ac, _)| {
			let dr = r as f64 - ar as f64;
			let dc = c as f64 - ac as f64;
			(dr * dr + dc * dc).sqrt() < min_distance
		});
		if !suppressed {
			accepted.push((r, c, h));
		}
	}
	accepted
}

#[cfg(test)]
mod tests {
	use super::*;
	use canopy_core::{BandTable, BlockStructure, Crs, RasterHeader, WorldBox};
	use ndarray::{Array2, Array3};

	/// A fixed, single-band in-memory raster — just enough of
	/// [`RasterSource`] for [`detect_treetops`]'s tile loop.
	struct BumpSource {
		data: Array2<f64>,
		bands: BandTable,
		crs: Crs,
	}

	impl RasterSource for BumpSource {
		fn header(&self) -> RasterHeader {
			let (height, width) = self.data.dim();
			RasterHeader { bands: 1, height, width, bytes_per_sample: 8, block_structure: BlockStructure::Striped { row_height: 1 } }
		}
		fn transform(&self) -> AffineTransform {
			AffineTransform::north_up(0.0, self.data.dim().0 as f64, 1.0)
		}
		fn crs(&self) -> &Crs {
			&self.crs
		}
		fn nodata(&self) -> Option<f64> {
			None
		}
		fn bands(&self) -> &BandTable {
			&self.bands
		}
		fn band_wavelength_nm(&self, _band: usize) -> Option<f64> {
			None
		}
		fn native_block_windows(&self) -> Vec<canopy_core::TileWindow> {
			Vec::new()
		}
		fn read_window(&self, window: canopy_core::TileWindow, fill: Option<f64>) -> Result<Array3<f64>> {
			let (height, width) = self.data.dim();
			let fill = fill.unwrap_or(0.0);
			let array = Array3::from_shape_fn((1, window.height(), window.width()), |(_, r, c)| {
				let (row, col) = (window.y_min + r, window.x_min + c);
				if row < height && col < width { self.data[[row, col]] } else { fill }
			});
			Ok(array)
		}
		fn write_window(&mut self, _window: canopy_core::TileWindow, _data: &Array3<f64>) -> Result<()> {
			unreachable!("treetop detection never writes")
		}
	}

	#[test]
	fn detect_treetops_dedupes_a_peak_sitting_in_the_halo() {
		let chm = gaussian_bump(40, 20.0, 20.0, 20.0, 3.0);
		let source = BumpSource { data: chm, bands: BandTable::anonymous(1), crs: Crs::new("local") };
		let params = DetectionParams { method: DetectionMethod::Lmf, min_height: 1.0, lmf_window_size: 5, ..Default::default() };
		let records = detect_treetops(&source, &params, 16, 4).unwrap();
		assert_eq!(records.len(), 1);
	}

	fn whole_raster_box() -> WorldBox {
		WorldBox { x_min: 0.0, x_max: 1000.0, y_min: -1000.0, y_max: 1000.0 }
	}

	fn gaussian_bump(size: usize, cx: f64, cy: f64, amplitude: f64, spread: f64) -> Array2<f64> {
		Array2::from_shape_fn((size, size), |(r, c)| {
			let dr = r as f64 - cy;
			let dc = c as f64 - cx;
			amplitude * (-(dr * dr + dc * dc) / (2.0 * spread * spread)).exp()
		})
	}

	#[test]
	fn lmf_finds_single_peak_at_bump_center() {
		let chm = gaussian_bump(21, 10.0, 10.0, 20.0, 3.0);
		let params = DetectionParams { method: DetectionMethod::Lmf, min_height: 1.0, lmf_window_size: 5, ..Default::default() };
		let records = detect_treetops_tile(chm.view(), AffineTransform::north_up(0.0, 21.0, 1.0), whole_raster_box(), None, &params).unwrap();
		assert_eq!(records.len(), 1);
	}

	#[test]
	fn vws_rejects_a_second_peak_inside_the_first_exclusion_disk() {
		let mut chm = Array2::from_elem((10, 10), 0.0);
		chm[[5, 5]] = 10.0;
		chm[[5, 6]] = 9.9;
		let params = DetectionParams {
			method: DetectionMethod::Vws,
			min_height: 1.0,
			vws_detection_sigma: 5.0,
			vws_distance_scale: 0.0,
			vws_power: 1.0,
			pixel_size: 1.0,
			..Default::default()
		};
		let records = detect_treetops_tile(chm.view(), AffineTransform::north_up(0.0, 10.0, 1.0), whole_raster_box(), None, &params).unwrap();
		assert_eq!(records.len(), 1);
	}

	#[test]
	fn peaks_outside_core_box_are_dropped() {
		let chm = gaussian_bump(21, 10.0, 10.0, 20.0, 3.0);
		let params = DetectionParams { method: DetectionMethod::Lmf, min_height: 1.0, lmf_window_size: 5, ..Default::default() };
		let tiny_core = WorldBox { x_min: 0.0, x_max: 1.0, y_min: -1.0, y_max: 0.0 };
		let records = detect_treetops_tile(chm.view(), AffineTransform::north_up(0.0, 21.0, 1.0), tiny_core, None, &params).unwrap();
		assert!(records.is_empty());
	}
}
