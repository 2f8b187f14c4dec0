//! Grayscale morphology: dilation, erosion/closing, and H-dome
//! reconstruction-by-dilation, plus 4-connected component labeling. Plain
//! loops over contiguous arrays, no per-iteration allocation in the inner
//! scan — these are the numeric hotpaths Design Note §9 calls out.

use ndarray::Array2;

/// Grayscale dilation with a flat 3x3 structuring element (8-neighborhood
/// max filter), used by the watershed kernel's morphological closing step.
#[must_use]
pub fn dilate3x3(array: &Array2<f64>) -> Array2<f64> {
	window_extremum(array, 1, f64::max, f64::NEG_INFINITY)
}

/// Grayscale erosion with a flat 3x3 structuring element.
#[must_use]
pub fn erode3x3(array: &Array2<f64>) -> Array2<f64> {
	window_extremum(array, 1, f64::min, f64::INFINITY)
}

/// Morphological closing: dilation followed by erosion, removing small
/// dark gaps without shrinking the overall surface (spec §4.7 "close the
/// CHM with a 3x3 morphological closing").
#[must_use]
pub fn close3x3(array: &Array2<f64>) -> Array2<f64> {
	erode3x3(&dilate3x3(array))
}

fn window_extremum(array: &Array2<f64>, radius: isize, combine: fn(f64, f64) -> f64, identity: f64) -> Array2<f64> {
	let (height, width) = array.dim();
	let mut out = Array2::from_elem((height, width), identity);
	for r in 0..height {
		for c in 0..width {
			let mut acc = identity;
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
					acc = combine(acc, array[[rr as usize, cc as usize]]);
				}
			}
			out[[r, c]] = acc;
		}
	}
	out
}

/// Morphological reconstruction by dilation (the "H-dome" transform):
/// iteratively dilates `marker` with an 8-neighborhood flat element,
/// clamping to `mask` at every step, until no pixel changes. `marker` must
/// be pixelwise `<= mask`.
///
/// Used by the prominence treetop kernel to find the envelope a peak must
/// clear to be considered isolated rather than a shoulder on a larger
/// feature (spec §4.6 step ii).
#[must_use]
pub fn reconstruct_by_dilation(marker: Array2<f64>, mask: &Array2<f64>) -> Array2<f64> {
	let mut current = marker;
	loop {
		let dilated = dilate3x3(&current);
		let mut changed = false;
		for ((r, c), v) in current.indexed_iter_mut() {
			let clamped = dilated[[r, c]].min(mask[[r, c]]);
			if (clamped - *v).abs() > 1e-12 {
				changed = true;
			}
			*v = clamped;
		}
		if !changed {
			return current;
		}
	}
}

/// Labels 4-connected components of `mask`'s `true` pixels. Background is
/// label `0`; components are numbered `1..=n` in the order their first
/// pixel (row-major scan order) is encountered.
#[must_use]
pub fn label_components(mask: &Array2<bool>) -> Array2<i32> {
	let (height, width) = mask.dim();
	let mut labels = Array2::<i32>::zeros((height, width));
	let mut next_label = 1;
	let mut stack = Vec::new();

	for r0 in 0..height {
		for c0 in 0..width {
			if !mask[[r0, c0]] || labels[[r0, c0]] != 0 {
				continue;
			}
			labels[[r0, c0]] = next_label;
			stack.push((r0, c0));
			while let Some((r, c)) = stack.pop() {
				for (dr, dc) in [(-1_isize, 0_isize), (1, 0), (0, -1), (0, 1)] {
					let rr = r as isize + dr;
					let cc = c as isize + dc;
					if rr < 0 || cc < 0 || rr >= height as isize || cc >= width as isize {
						continue;
					}
					let (rr, cc) = (rr as usize, cc as usize);
					if mask[[rr, cc]] && labels[[rr, cc]] == 0 {
						labels[[rr, cc]] = next_label;
						stack.push((rr, cc));
					}
				}
			}
			next_label += 1;
		}
	}
	labels
}
