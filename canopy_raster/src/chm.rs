//! Canopy height model builder (spec §4.5): `max(0, DSM - DTM)` per pixel,
//! with nodata propagation and optional median smoothing.

use anyhow::{Result, ensure};
use canopy_core::{Aggregation, RasterSource};
use canopy_engine::{DispatchConfig, DispatchOutput, RasterInput, dispatch};
use ndarray::{Array2, ArrayView2, Array3};
use std::collections::BTreeMap;

/// Computes one tile of the canopy height model from aligned, single-band
/// DSM and DTM arrays. Pixels where either input is nodata become
/// `output_nodata` in the result; all other pixels are `max(0, dsm - dtm)`.
///
/// If `filter_size > 0`, a median filter of that window size is applied to
/// the valid pixels only: nodata pixels are held aside, the filter runs
/// over the valid-region values with a zero-filled substitute standing in
/// for nodata during the windowed median, and the original nodata mask is
/// reapplied to the filtered result afterward (spec §4.5).
///
/// # Errors
/// Returns an error if `dsm` and `dtm` have different shapes.
pub fn calculate_chm_tile(
	dsm: ArrayView2<f64>,
	dtm: ArrayView2<f64>,
	dsm_nodata: Option<f64>,
	dtm_nodata: Option<f64>,
	output_nodata: f64,
	filter_size: usize,
) -> Result<Array2<f64>> {
	ensure!(dsm.dim() == dtm.dim(), "DSM and DTM tiles have mismatched shapes: {:?} vs {:?}", dsm.dim(), dtm.dim());

	let (height, width) = dsm.dim();
	let mut chm = Array2::<f64>::zeros((height, width));
	let mut valid = Array2::<bool>::from_elem((height, width), true);

	for r in 0..height {
		for c in 0..width {
			let dsm_v = dsm[[r, c]];
			let dtm_v = dtm[[r, c]];
			if is_nodata(dsm_v, dsm_nodata) || is_nodata(dtm_v, dtm_nodata) {
				chm[[r, c]] = output_nodata;
				valid[[r, c]] = false;
			} else {
				chm[[r, c]] = (dsm_v - dtm_v).max(0.0);
			}
		}
	}

	if filter_size > 0 {
		chm = median_filter_masked(&chm, &valid, filter_size, output_nodata);
	}

	Ok(chm)
}

/// Dispatches [`calculate_chm_tile`] across a DSM/DTM raster pair through
/// the engine's synchronized-window dispatch (spec §4.5 `calculate_chm`).
/// Aggregation is [`Aggregation::Stitch`] when `sink` is given,
/// [`Aggregation::Collect`] otherwise (a single collected tile for
/// in-memory runs, or the ordered tile list for a streamed run).
pub fn calculate_chm(
	dsm: &dyn RasterSource,
	dtm: &dyn RasterSource,
	output_nodata: f64,
	filter_size: usize,
	config: &DispatchConfig,
	sink: Option<&mut dyn RasterSource>,
) -> Result<DispatchOutput> {
	let dsm_nodata = dsm.nodata();
	let dtm_nodata = dtm.nodata();

	let mut inputs = BTreeMap::new();
	inputs.insert("dsm".to_string(), RasterInput::Source(dsm));
	inputs.insert("dtm".to_string(), RasterInput::Source(dtm));

	let aggregation = if sink.is_some() { Aggregation::Stitch } else { Aggregation::Collect };

	dispatch(
		&inputs,
		"dsm",
		config,
		|tiles| {
			let dsm_tile = &tiles["dsm"];
			let dtm_tile = &tiles["dtm"];
			let chm = calculate_chm_tile(
				dsm_tile.index_axis(ndarray::Axis(0), 0),
				dtm_tile.index_axis(ndarray::Axis(0), 0),
				dsm_nodata,
				dtm_nodata,
				output_nodata,
				filter_size,
			)?;
			let (h, w) = chm.dim();
			Ok(chm.into_shape_with_order((1, h, w))?)
		},
		aggregation,
		sink,
		None::<fn(Array3<f64>, Array3<f64>) -> Result<Array3<f64>>>,
	)
}

fn is_nodata(value: f64, nodata: Option<f64>) -> bool {
	match nodata {
		Some(nd) if nd.is_nan() => value.is_nan(),
		Some(nd) => value == nd,
		None => false,
	}
}

/// A plain-loop windowed median filter over `values`, masked by `valid`:
/// invalid pixels are substituted with `0.0` for the purposes of computing
/// neighboring medians, and the output re-masks every originally-invalid
/// pixel back to `nodata` regardless of what the filter computed for it
/// (spec §4.5's "nodata mask is reapplied afterward").
fn median_filter_masked(values: &Array2<f64>, valid: &Array2<bool>, window: usize, nodata: f64) -> Array2<f64> {
	let (height, width) = values.dim();
	let radius = (window / 2) as isize;
	let substituted: Array2<f64> = Array2::from_shape_fn((height, width), |(r, c)| if valid[[r, c]] { values[[r, c]] } else { 0.0 });

	let mut out = Array2::<f64>::zeros((height, width));
	let mut window_buf = Vec::with_capacity(window * window);
	for r in 0..height {
		for c in 0..width {
			if !valid[[r, c]] {
				out[[r, c]] = nodata;
				continue;
			}
			window_buf.clear();
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
					window_buf.push(substituted[[rr as usize, cc as usize]]);
				}
			}
			out[[r, c]] = median_of(&mut window_buf);
		}
	}
	out
}

fn median_of(values: &mut [f64]) -> f64 {
	let mid = values.len() / 2;
	values.sort_by(|a, b| a.partial_cmp(b).expect("CHM values are finite"));
	if values.len() % 2 == 0 {
		(values[mid - 1] + values[mid]) / 2.0
	} else {
		values[mid]
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use approx::assert_abs_diff_eq;
	use ndarray::array;

	#[test]
	fn chm_is_max_of_zero_and_difference() {
		let dsm = array![[20.0, 15.0], [22.0, 9.0]];
		let dtm = array![[10.0, 16.0], [10.0, 9.0]];
		let chm = calculate_chm_tile(dsm.view(), dtm.view(), None, None, -9999.0, 0).unwrap();
		assert_abs_diff_eq!(chm[[0, 0]], 10.0);
		assert_abs_diff_eq!(chm[[0, 1]], 0.0); // dsm < dtm clamps to zero
		assert_abs_diff_eq!(chm[[1, 0]], 12.0);
		assert_abs_diff_eq!(chm[[1, 1]], 0.0);
	}

	#[test]
	fn nodata_in_either_input_propagates() {
		// Scenario F: DSM pixel nodata, DTM pixel 12.0, surrounding 20.0/10.0.
		let mut dsm = Array2::from_elem((10, 10), 20.0);
		let mut dtm = Array2::from_elem((10, 10), 10.0);
		dsm[[5, 5]] = -9999.0;
		dtm[[5, 5]] = 12.0;

		let chm = calculate_chm_tile(dsm.view(), dtm.view(), Some(-9999.0), None, -9999.0, 0).unwrap();
		assert_abs_diff_eq!(chm[[5, 5]], -9999.0);
		assert_abs_diff_eq!(chm[[0, 0]], 10.0);
		assert_abs_diff_eq!(chm[[9, 9]], 10.0);
	}

	#[test]
	fn median_filter_leaves_nodata_pixels_untouched() {
		let mut dsm = Array2::from_elem((5, 5), 20.0);
		let dtm = Array2::from_elem((5, 5), 10.0);
		dsm[[2, 2]] = -9999.0;
		let chm = calculate_chm_tile(dsm.view(), dtm.view(), Some(-9999.0), None, -9999.0, 3).unwrap();
		assert_abs_diff_eq!(chm[[2, 2]], -9999.0);
		assert_abs_diff_eq!(chm[[0, 0]], 10.0);
	}

	#[test]
	fn mismatched_shapes_error() {
		let dsm = Array2::<f64>::zeros((2, 2));
		let dtm = Array2::<f64>::zeros((3, 3));
		assert!(calculate_chm_tile(dsm.view(), dtm.view(), None, None, -9999.0, 0).is_err());
	}
}
