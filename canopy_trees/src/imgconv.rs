//! Conversions between `ndarray::Array2<f64>` and `image::ImageBuffer` —
//! the seam needed to reuse `imageproc`'s Gaussian blur on CHM tiles,
//! matching the teacher's own `imageproc`/`image` usage for raster pixel
//! kernels.

use image::{ImageBuffer, Luma};
use ndarray::Array2;

/// Converts a 2-D array to a single-channel `f32` image buffer.
#[must_use]
pub fn to_luma_f32(array: &Array2<f64>) -> ImageBuffer<Luma<f32>, Vec<f32>> {
	let (height, width) = array.dim();
	ImageBuffer::from_fn(width as u32, height as u32, |x, y| Luma([array[[y as usize, x as usize]] as f32]))
}

/// Converts a single-channel `f32` image buffer back to a 2-D `f64` array.
#[must_use]
pub fn from_luma_f32(image: &ImageBuffer<Luma<f32>, Vec<f32>>) -> Array2<f64> {
	let (width, height) = image.dimensions();
	Array2::from_shape_fn((height as usize, width as usize), |(y, x)| f64::from(image.get_pixel(x as u32, y as u32).0[0]))
}

/// Gaussian-smooths `array` with standard deviation `sigma` (pixels). A
/// `sigma` of `0.0` is a no-op, matching spec §4.7's "skip if 0".
#[must_use]
pub fn gaussian_blur(array: &Array2<f64>, sigma: f64) -> Array2<f64> {
	if sigma <= 0.0 {
		return array.clone();
	}
	let image = to_luma_f32(array);
	let blurred = imageproc::filter::gaussian_blur_f32(&image, sigma as f32);
	from_luma_f32(&blurred)
}

#[cfg(test)]
mod tests {
	use super::*;
	use approx::assert_abs_diff_eq;
	use ndarray::array;

	#[test]
	fn round_trip_preserves_values() {
		let a = array![[1.0, 2.0], [3.0, 4.0]];
		let image = to_luma_f32(&a);
		let back = from_luma_f32(&image);
		assert_abs_diff_eq!(back[[0, 0]], 1.0);
		assert_abs_diff_eq!(back[[1, 1]], 4.0);
	}

	#[test]
	fn zero_sigma_is_identity() {
		let a = array![[1.0, 5.0], [2.0, 9.0]];
		let b = gaussian_blur(&a, 0.0);
		assert_eq!(a, b);
	}
}
