//! The raster envelope: an in-memory array carrier with affine transform,
//! CRS tag, nodata value, and band-index table (spec §3 "Raster envelope").

use anyhow::{Result, bail, ensure};
use ndarray::{Array2, Array3, Axis};
use std::collections::BTreeMap;

/// An affine pixel→world transform `(a, b, c, d, e, f)`:
/// `x = a*col + b*row + c`, `y = d*col + e*row + f`.
///
/// North-up rasters have `b == d == 0` and `e < 0`; the transform is kept
/// general so rotated/sheared grids (and windows anchored away from the
/// origin) are representable without a special case.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineTransform {
	pub a: f64,
	pub b: f64,
	pub c: f64,
	pub d: f64,
	pub e: f64,
	pub f: f64,
}

impl AffineTransform {
	/// A north-up transform with square pixels of the given size, origin at
	/// `(x0, y0)` (the world coordinate of the pixel grid's top-left corner).
	#[must_use]
	pub fn north_up(x0: f64, y0: f64, pixel_size: f64) -> Self {
		AffineTransform {
			a: pixel_size,
			b: 0.0,
			c: x0,
			d: 0.0,
			e: -pixel_size,
			f: y0,
		}
	}

	/// Maps a pixel `(col, row)` to a world `(x, y)` coordinate. Pixel
	/// centers are `(col + 0.5, row + 0.5)`; callers pass that offset in
	/// when they want the center rather than the corner.
	#[must_use]
	pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
		(
			self.a * col + self.b * row + self.c,
			self.d * col + self.e * row + self.f,
		)
	}

	/// The transform of a window anchored at pixel `(col_off, row_off)` of
	/// this transform's grid — translates the origin, keeps the pixel size.
	#[must_use]
	pub fn translated(&self, col_off: i64, row_off: i64) -> Self {
		let (x, y) = self.apply(col_off as f64, row_off as f64);
		AffineTransform { c: x, f: y, ..*self }
	}

	/// Absolute pixel width/height implied by this transform, assuming an
	/// axis-aligned (non-rotated) grid.
	#[must_use]
	pub fn pixel_size(&self) -> (f64, f64) {
		(self.a.abs(), self.e.abs())
	}
}

/// An opaque CRS tag. Equality is structural (spec.md's Non-goals delegate
/// reprojection and CRS-database maintenance to the I/O layer); this is
/// deliberately just a comparable identifier, e.g. an EPSG code or WKT
/// string, not a geodesy library.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Crs(pub String);

impl Crs {
	#[must_use]
	pub fn new(tag: impl Into<String>) -> Self {
		Crs(tag.into())
	}
}

impl std::fmt::Display for Crs {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Ordered table mapping band name → 1-based band index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BandTable {
	names: Vec<String>,
	index_of: BTreeMap<String, usize>,
}

impl BandTable {
	/// Builds a band table from ordered names, indices assigned `1..=len`.
	///
	/// # Errors
	/// Returns an error if `names` contains a duplicate.
	pub fn from_names(names: impl IntoIterator<Item = impl Into<String>>) -> Result<Self> {
		let names: Vec<String> = names.into_iter().map(Into::into).collect();
		let mut index_of = BTreeMap::new();
		for (i, name) in names.iter().enumerate() {
			ensure!(index_of.insert(name.clone(), i + 1).is_none(), "duplicate band name: {name}");
		}
		Ok(BandTable { names, index_of })
	}

	/// Builds a default table with placeholder names `b1, b2, ...`.
	#[must_use]
	pub fn anonymous(bands: usize) -> Self {
		Self::from_names((1..=bands).map(|i| format!("b{i}"))).expect("generated names are unique")
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.names.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.names.is_empty()
	}

	/// 1-based index of `name`, if present.
	#[must_use]
	pub fn index_of(&self, name: &str) -> Option<usize> {
		self.index_of.get(name).copied()
	}

	/// Name of the 1-based band index, if in range.
	#[must_use]
	pub fn name_of(&self, index: usize) -> Option<&str> {
		index.checked_sub(1).and_then(|i| self.names.get(i)).map(String::as_str)
	}

	#[must_use]
	pub fn names(&self) -> &[String] {
		&self.names
	}
}

/// An in-memory array carrier: a 3-D pixel array `(bands, height, width)`
/// with affine transform, CRS, optional nodata sentinel, and band table
/// (spec §3).
#[derive(Clone, Debug)]
pub struct RasterEnvelope {
	data: Array3<f64>,
	transform: AffineTransform,
	crs: Crs,
	nodata: Option<f64>,
	bands: BandTable,
}

impl RasterEnvelope {
	/// Constructs an envelope from a 3-D `(bands, height, width)` array. A
	/// 2-D `(height, width)` array is promoted with a leading singleton
	/// band axis by [`RasterEnvelope::from_2d`] instead.
	///
	/// # Errors
	/// Returns an error if `bands.len() != data.shape()[0]`.
	pub fn new(data: Array3<f64>, transform: AffineTransform, crs: Crs, nodata: Option<f64>, bands: BandTable) -> Result<Self> {
		ensure!(
			bands.len() == data.shape()[0],
			"band table has {} entries but array has {} bands",
			bands.len(),
			data.shape()[0]
		);
		Ok(RasterEnvelope {
			data,
			transform,
			crs,
			nodata,
			bands,
		})
	}

	/// Promotes a 2-D `(height, width)` single-band array into an envelope.
	pub fn from_2d(data: Array2<f64>, transform: AffineTransform, crs: Crs, nodata: Option<f64>) -> Result<Self> {
		let (h, w) = data.dim();
		let data = data.into_shape_with_order((1, h, w))?;
		Self::new(data, transform, crs, nodata, BandTable::anonymous(1))
	}

	#[must_use]
	pub fn bands_count(&self) -> usize {
		self.data.shape()[0]
	}

	#[must_use]
	pub fn height(&self) -> usize {
		self.data.shape()[1]
	}

	#[must_use]
	pub fn width(&self) -> usize {
		self.data.shape()[2]
	}

	#[must_use]
	pub fn data(&self) -> &Array3<f64> {
		&self.data
	}

	#[must_use]
	pub fn data_mut(&mut self) -> &mut Array3<f64> {
		&mut self.data
	}

	#[must_use]
	pub fn into_data(self) -> Array3<f64> {
		self.data
	}

	#[must_use]
	pub fn transform(&self) -> AffineTransform {
		self.transform
	}

	#[must_use]
	pub fn crs(&self) -> &Crs {
		&self.crs
	}

	#[must_use]
	pub fn nodata(&self) -> Option<f64> {
		self.nodata
	}

	#[must_use]
	pub fn bands(&self) -> &BandTable {
		&self.bands
	}

	/// True if `value` is this envelope's nodata sentinel (NaN-aware).
	#[must_use]
	pub fn is_nodata(&self, value: f64) -> bool {
		match self.nodata {
			Some(nd) if nd.is_nan() => value.is_nan(),
			Some(nd) => value == nd,
			None => false,
		}
	}

	/// Reprojects to `target_crs`. `convert` maps one (col, row, current
	/// transform) pixel to the reprojected grid; left abstract because CRS
	/// math is an external collaborator (spec.md Non-goals). Reprojecting
	/// to the current CRS is idempotent and returns a clone of `self`
	/// (Testable Property 5) without invoking `convert`.
	pub fn reproject(&self, target_crs: &Crs, convert: impl FnOnce(&Self, &Crs) -> Result<Self>) -> Result<Self> {
		if &self.crs == target_crs {
			return Ok(self.clone());
		}
		convert(self, target_crs)
	}

	/// Crops to a pixel window, returning a new envelope with an adjusted
	/// transform. Out-of-range windows are clipped to the envelope bounds.
	pub fn crop(&self, col_off: usize, row_off: usize, width: usize, height: usize) -> Result<Self> {
		ensure!(col_off <= self.width() && row_off <= self.height(), "crop origin out of bounds");
		let width = width.min(self.width() - col_off);
		let height = height.min(self.height() - row_off);
		let data = self
			.data
			.slice(ndarray::s![.., row_off..row_off + height, col_off..col_off + width])
			.to_owned();
		Ok(RasterEnvelope {
			data,
			transform: self.transform.translated(col_off as i64, row_off as i64),
			crs: self.crs.clone(),
			nodata: self.nodata,
			bands: self.bands.clone(),
		})
	}

	/// Splits into one single-band envelope per band, preserving order.
	#[must_use]
	pub fn split(&self) -> Vec<Self> {
		(0..self.bands_count())
			.map(|i| {
				let data = self.data.index_axis(Axis(0), i).to_owned();
				let (h, w) = data.dim();
				let data = data.into_shape_with_order((1, h, w)).expect("shape is exact");
				RasterEnvelope {
					data,
					transform: self.transform,
					crs: self.crs.clone(),
					nodata: self.nodata,
					bands: BandTable::from_names([self.bands.name_of(i + 1).unwrap_or("b1").to_string()])
						.expect("single name is unique"),
				}
			})
			.collect()
	}

	/// Stacks single-band (or co-registered multi-band) envelopes into one
	/// multi-band envelope, preserving component order (Testable Property 6:
	/// `stack(split(x)) == x`).
	pub fn stack(components: &[Self]) -> Result<Self> {
		let Some(first) = components.first() else {
			bail!("cannot stack zero envelopes");
		};
		let (h, w) = (first.height(), first.width());
		for c in components {
			ensure!(c.height() == h && c.width() == w, "stack components must share dimensions");
		}
		let total_bands: usize = components.iter().map(RasterEnvelope::bands_count).sum();
		let mut data = Array3::<f64>::zeros((total_bands, h, w));
		let mut names = Vec::with_capacity(total_bands);
		let mut offset = 0;
		for c in components {
			let n = c.bands_count();
			data.slice_mut(ndarray::s![offset..offset + n, .., ..]).assign(&c.data);
			names.extend(c.bands.names().iter().cloned());
			offset += n;
		}
		let bands = dedupe_band_names(names);
		RasterEnvelope::new(data, first.transform, first.crs.clone(), first.nodata, bands)
	}
}

/// Disambiguates repeated band names (`b1`, `b1` → `b1`, `b1_2`) so
/// `BandTable::from_names` never fails on a stack of same-named bands.
fn dedupe_band_names(names: Vec<String>) -> BandTable {
	let mut seen: BTreeMap<String, usize> = BTreeMap::new();
	let unique: Vec<String> = names
		.into_iter()
		.map(|name| {
			let count = seen.entry(name.clone()).or_insert(0);
			*count += 1;
			if *count == 1 { name } else { format!("{name}_{count}") }
		})
		.collect();
	BandTable::from_names(unique).expect("deduped names are unique")
}

#[cfg(test)]
mod tests {
	use super::*;
	use approx::assert_abs_diff_eq;

	fn tiny_envelope() -> RasterEnvelope {
		let data = Array3::from_shape_fn((2, 3, 4), |(b, r, c)| (b * 100 + r * 10 + c) as f64);
		RasterEnvelope::new(
			data,
			AffineTransform::north_up(0.0, 0.0, 1.0),
			Crs::new("EPSG:32619"),
			Some(-9999.0),
			BandTable::from_names(["red", "nir"]).unwrap(),
		)
		.unwrap()
	}

	#[test]
	fn from_2d_promotes_singleton_band() {
		let data = Array2::from_shape_fn((3, 4), |(r, c)| (r * 10 + c) as f64);
		let env = RasterEnvelope::from_2d(data, AffineTransform::north_up(0.0, 0.0, 1.0), Crs::new("x"), None).unwrap();
		assert_eq!(env.bands_count(), 1);
		assert_eq!(env.height(), 3);
		assert_eq!(env.width(), 4);
	}

	#[test]
	fn band_table_rejects_duplicates() {
		assert!(BandTable::from_names(["red", "red"]).is_err());
	}

	#[test]
	fn band_count_mismatch_errors() {
		let data = Array3::<f64>::zeros((2, 2, 2));
		let err = RasterEnvelope::new(
			data,
			AffineTransform::north_up(0.0, 0.0, 1.0),
			Crs::new("x"),
			None,
			BandTable::anonymous(3),
		)
		.unwrap_err();
		assert!(err.to_string().contains("band table"));
	}

	#[test]
	fn transform_translated_moves_origin() {
		let t = AffineTransform::north_up(100.0, 200.0, 2.0);
		let t2 = t.translated(5, 3);
		let (x, y) = t2.apply(0.0, 0.0);
		assert_abs_diff_eq!(x, 110.0);
		assert_abs_diff_eq!(y, 194.0);
	}

	#[test]
	fn reproject_same_crs_is_idempotent() {
		let env = tiny_envelope();
		let same = env.reproject(&Crs::new("EPSG:32619"), |_, _| unreachable!("should not convert")).unwrap();
		assert_eq!(same.data(), env.data());
		assert_eq!(same.crs(), env.crs());
	}

	#[test]
	fn crop_adjusts_transform_and_clips() {
		let env = tiny_envelope();
		let cropped = env.crop(1, 1, 2, 2).unwrap();
		assert_eq!(cropped.width(), 2);
		assert_eq!(cropped.height(), 2);
		assert_eq!(cropped.data()[[0, 0, 0]], env.data()[[0, 1, 1]]);
		let (x, y) = cropped.transform().apply(0.0, 0.0);
		assert_abs_diff_eq!(x, 1.0);
		assert_abs_diff_eq!(y, -1.0);

		// Window overhanging the edge clips rather than erroring.
		let clipped = env.crop(3, 2, 10, 10).unwrap();
		assert_eq!(clipped.width(), 1);
		assert_eq!(clipped.height(), 1);
	}

	#[test]
	fn stack_split_round_trip_preserves_array_and_order() {
		let env = tiny_envelope();
		let parts = env.split();
		assert_eq!(parts.len(), 2);
		let restacked = RasterEnvelope::stack(&parts).unwrap();
		assert_eq!(restacked.data(), env.data());
		assert_eq!(restacked.bands().names(), env.bands().names());
	}

	#[test]
	fn is_nodata_handles_nan_sentinel() {
		let data = Array3::from_shape_fn((1, 1, 1), |_| f64::NAN);
		let env = RasterEnvelope::new(
			data,
			AffineTransform::north_up(0.0, 0.0, 1.0),
			Crs::new("x"),
			Some(f64::NAN),
			BandTable::anonymous(1),
		)
		.unwrap();
		assert!(env.is_nodata(f64::NAN));
		assert!(!env.is_nodata(0.0));
	}
}
