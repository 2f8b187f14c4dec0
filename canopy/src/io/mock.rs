//! In-memory collaborator mocks for tests (spec §6), grounded on
//! `versatiles_pipeline::helpers::{mock_image_source, dummy_image_source}`.
//! Not gated behind `#[cfg(test)]` so other workspace crates can pull them
//! in as an ordinary dev-dependency, same as the teacher's helpers module.

use anyhow::Result;
use canopy_core::{
	AffineTransform, BandTable, BlockStructure, Crs, PointCloudSource, PointChunk, RasterHeader, RasterSource, TileWindow,
};
use canopy_geometry::{Feature, VectorSource, VectorTable};
use ndarray::Array3;

/// A raster backed by a dense in-memory array — the fixture every kernel
/// test in this workspace builds its input from.
pub struct MockRasterSource {
	data: Array3<f64>,
	transform: AffineTransform,
	crs: Crs,
	bands: BandTable,
	nodata: Option<f64>,
	wavelengths: Vec<Option<f64>>,
}

impl MockRasterSource {
	/// Builds a mock raster from a `(bands, height, width)` array, a
	/// north-up transform anchored at `(x0, y0)` with the given pixel size,
	/// and band names in array order.
	#[must_use]
	pub fn new(data: Array3<f64>, x0: f64, y0: f64, pixel_size: f64, band_names: impl IntoIterator<Item = impl Into<String>>) -> Self {
		let bands = BandTable::from_names(band_names).expect("mock raster band names must be unique");
		let wavelengths = vec![None; bands.names().len()];
		MockRasterSource {
			transform: AffineTransform::north_up(x0, y0, pixel_size),
			crs: Crs::new("mock"),
			bands,
			nodata: None,
			wavelengths,
			data,
		}
	}

	#[must_use]
	pub fn with_nodata(mut self, nodata: f64) -> Self {
		self.nodata = Some(nodata);
		self
	}

	#[must_use]
	pub fn with_crs(mut self, crs: Crs) -> Self {
		self.crs = crs;
		self
	}

	/// Tags band `index` (0-based) with a center wavelength, for spectral-
	/// index band resolution (spec §4.8).
	#[must_use]
	pub fn with_wavelength(mut self, index: usize, wavelength_nm: f64) -> Self {
		self.wavelengths[index] = Some(wavelength_nm);
		self
	}
}

impl RasterSource for MockRasterSource {
	fn header(&self) -> RasterHeader {
		let shape = self.data.shape();
		RasterHeader {
			bands: shape[0],
			height: shape[1],
			width: shape[2],
			bytes_per_sample: 8,
			block_structure: BlockStructure::Striped { row_height: 1 },
		}
	}

	fn transform(&self) -> AffineTransform {
		self.transform
	}

	fn crs(&self) -> &Crs {
		&self.crs
	}

	fn nodata(&self) -> Option<f64> {
		self.nodata
	}

	fn bands(&self) -> &BandTable {
		&self.bands
	}

	fn band_wavelength_nm(&self, band: usize) -> Option<f64> {
		self.wavelengths.get(band).copied().flatten()
	}

	fn native_block_windows(&self) -> Vec<TileWindow> {
		Vec::new()
	}

	fn read_window(&self, window: TileWindow, fill: Option<f64>) -> Result<Array3<f64>> {
		let fill = fill.unwrap_or_else(|| self.nodata.unwrap_or(0.0));
		let shape = self.data.shape();
		let (bands, height, width) = (shape[0], shape[1], shape[2]);
		Ok(Array3::from_shape_fn((bands, window.height(), window.width()), |(b, r, c)| {
			let (row, col) = (window.y_min + r, window.x_min + c);
			if row < height && col < width { self.data[[b, row, col]] } else { fill }
		}))
	}

	fn write_window(&mut self, window: TileWindow, data: &Array3<f64>) -> Result<()> {
		let shape = self.data.shape();
		let (height, width) = (shape[1], shape[2]);
		for b in 0..data.shape()[0] {
			for r in 0..data.shape()[1] {
				for c in 0..data.shape()[2] {
					let (row, col) = (window.y_min + r, window.x_min + c);
					if row < height && col < width {
						self.data[[b, row, col]] = data[[b, r, c]];
					}
				}
			}
		}
		Ok(())
	}
}

/// A vector source backed by an already-loaded feature list — no file
/// format, just the features a test wants to query against.
pub struct MockVectorSource {
	features: Vec<Feature>,
	crs: Crs,
}

impl MockVectorSource {
	#[must_use]
	pub fn new(features: Vec<Feature>, crs: Crs) -> Self {
		MockVectorSource { features, crs }
	}
}

impl VectorSource for MockVectorSource {
	fn crs(&self) -> &Crs {
		&self.crs
	}

	fn load(&self, diagnostics: &dyn canopy_core::Diagnostics) -> Result<VectorTable> {
		VectorTable::build(self.features.clone(), self.crs.clone(), diagnostics)
	}
}

/// A point-cloud source backed by pre-chunked in-memory data, streamed out
/// one chunk per call exactly as given (no re-chunking).
pub struct MockPointCloudSource {
	bounds: (f64, f64, f64, f64, f64, f64),
	chunks: Vec<PointChunk>,
}

impl MockPointCloudSource {
	#[must_use]
	pub fn new(bounds: (f64, f64, f64, f64, f64, f64), chunks: Vec<PointChunk>) -> Self {
		MockPointCloudSource { bounds, chunks }
	}
}

impl PointCloudSource for MockPointCloudSource {
	fn bounds(&self) -> (f64, f64, f64, f64, f64, f64) {
		self.bounds
	}

	fn chunks(&mut self) -> Box<dyn Iterator<Item = Result<PointChunk>> + '_> {
		Box::new(self.chunks.drain(..).map(Ok))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use canopy_core::NullDiagnostics;
	use geo::{Geometry, Rect};
	use std::collections::BTreeMap;

	#[test]
	fn mock_raster_boundless_read_fills_out_of_bounds_pixels() {
		let data = Array3::from_elem((1, 4, 4), 7.0);
		let raster = MockRasterSource::new(data, 0.0, 4.0, 1.0, ["height"]).with_nodata(-9999.0);
		let window = TileWindow::new(2, 6, 2, 6).unwrap();
		let read = raster.read_window(window, None).unwrap();
		assert_eq!(read[[0, 0, 0]], 7.0);
		assert_eq!(read[[0, 3, 3]], -9999.0);
	}

	#[test]
	fn mock_vector_source_loads_features_in_the_given_crs() {
		let rect = Rect::new((0.0, 0.0), (1.0, 1.0));
		let feature = Feature::new(Geometry::Polygon(rect.to_polygon()), BTreeMap::new());
		let source = MockVectorSource::new(vec![feature], Crs::new("mock"));
		let diagnostics = NullDiagnostics;
		let table = source.load(&diagnostics).unwrap();
		assert_eq!(table.len(), 1);
		assert_eq!(table.crs(), &Crs::new("mock"));
	}

	#[test]
	fn mock_point_cloud_source_streams_chunks_once() {
		let chunk = PointChunk {
			x: vec![1.0],
			y: vec![2.0],
			z: vec![3.0],
			classification: vec![2],
			return_number: vec![1],
		};
		let mut source = MockPointCloudSource::new((0.0, 0.0, 10.0, 10.0, 0.0, 5.0), vec![chunk]);
		let chunks: Vec<_> = source.chunks().collect::<Result<_>>().unwrap();
		assert_eq!(chunks.len(), 1);
		assert!(source.chunks().next().is_none());
	}
}
