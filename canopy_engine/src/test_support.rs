//! In-memory `RasterSource` test double, used only by this crate's own
//! unit tests. The public, cross-crate mock lives in the `canopy` facade
//! crate (`canopy::io::mock`); this one stays private so engine tests
//! don't need the facade as a dev-dependency.
#![cfg(test)]

use canopy_core::envelope::{AffineTransform, BandTable, Crs};
use canopy_core::io::RasterSource;
use canopy_core::strategy::{BlockStructure, RasterHeader};
use canopy_core::window::TileWindow;
use ndarray::Array3;

pub struct MemoryRasterSource {
	data: Array3<f64>,
	transform: AffineTransform,
	crs: Crs,
	nodata: Option<f64>,
	bands: BandTable,
	block_structure: BlockStructure,
}

impl MemoryRasterSource {
	pub fn constant(bands: usize, height: usize, width: usize, value: f64) -> Self {
		MemoryRasterSource {
			data: Array3::from_elem((bands, height, width), value),
			transform: AffineTransform::north_up(0.0, height as f64, 1.0),
			crs: Crs::new("EPSG:32619"),
			nodata: Some(-9999.0),
			bands: BandTable::anonymous(bands),
			block_structure: BlockStructure::Blocked { block_size: 8 },
		}
	}

	pub fn striped(bands: usize, height: usize, width: usize, value: f64) -> Self {
		let mut source = Self::constant(bands, height, width, value);
		source.block_structure = BlockStructure::Striped { row_height: 1 };
		source
	}

	pub fn from_array(data: Array3<f64>, nodata: Option<f64>) -> Self {
		let (bands, height, _width) = data.dim();
		MemoryRasterSource {
			transform: AffineTransform::north_up(0.0, height as f64, 1.0),
			crs: Crs::new("EPSG:32619"),
			nodata,
			bands: BandTable::anonymous(bands),
			block_structure: BlockStructure::Blocked { block_size: 8 },
			data,
		}
	}
}

impl RasterSource for MemoryRasterSource {
	fn header(&self) -> RasterHeader {
		RasterHeader {
			bands: self.data.shape()[0],
			height: self.data.shape()[1],
			width: self.data.shape()[2],
			bytes_per_sample: 8,
			block_structure: self.block_structure,
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

	fn band_wavelength_nm(&self, _band: usize) -> Option<f64> {
		None
	}

	fn native_block_windows(&self) -> Vec<TileWindow> {
		let block_size = match self.block_structure {
			BlockStructure::Blocked { block_size } => block_size,
			BlockStructure::Striped { row_height } => return striped_windows(self.data.shape()[2], self.data.shape()[1], row_height),
		};
		canopy_core::window::partition_core_boxes(self.data.shape()[2], self.data.shape()[1], block_size)
			.into_iter()
			.map(|core_box| core_box.window)
			.collect()
	}

	fn read_window(&self, window: TileWindow, fill: Option<f64>) -> anyhow::Result<Array3<f64>> {
		let (_bands, height, width) = self.data.dim();
		let fill = fill.or(self.nodata).unwrap_or(0.0);
		let mut out = Array3::from_elem((self.data.shape()[0], window.height(), window.width()), fill);
		for y in window.y_min..window.y_max {
			if y >= height {
				continue;
			}
			for x in window.x_min..window.x_max {
				if x >= width {
					continue;
				}
				for b in 0..self.data.shape()[0] {
					out[[b, y - window.y_min, x - window.x_min]] = self.data[[b, y, x]];
				}
			}
		}
		Ok(out)
	}

	fn write_window(&mut self, window: TileWindow, data: &Array3<f64>) -> anyhow::Result<()> {
		for y in window.y_min..window.y_max {
			for x in window.x_min..window.x_max {
				for b in 0..self.data.shape()[0] {
					self.data[[b, y, x]] = data[[b, y - window.y_min, x - window.x_min]];
				}
			}
		}
		Ok(())
	}
}

fn striped_windows(width: usize, height: usize, row_height: usize) -> Vec<TileWindow> {
	let row_height = row_height.max(1);
	let mut windows = Vec::new();
	let mut y = 0;
	while y < height {
		let y_max = (y + row_height).min(height);
		windows.push(TileWindow { x_min: 0, x_max: width, y_min: y, y_max });
		y = y_max;
	}
	windows
}
