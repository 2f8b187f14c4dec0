//! Object-based feature extractor (spec §4.4): an explicit
//! `Streaming -> Draining -> Done` state machine (Design Note §9) over the
//! raster tile stream, intersecting each tile with the vector table's
//! spatial index and emitting per-polygon statistics or raw pixel payloads.

use anyhow::{Result, bail};
use canopy_core::{AffineTransform, Diagnostics, RasterSource, SkipKind, TileWindow, WorldBox};
use canopy_engine::TileIter;
use canopy_geometry::{ExtractionRecord, ExtractionValue, Feature, VectorTable};
use geo::{BoundingRect, Contains, Intersects};
use geo_types::{Geometry, Point, Rect};
use ndarray::Array3;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Static configuration for one extraction run (spec §4.4 operation
/// signature, minus the raster/vector inputs themselves).
#[derive(Clone, Debug)]
pub struct ExtractionConfig {
	/// Band names to extract, in output order.
	pub bands: Vec<String>,
	/// A pixel column is dropped if any requested band fails `value > threshold`.
	pub threshold: Option<f64>,
	/// When set, every record (fully-inside or boundary-finalized) carries
	/// raw per-band pixel vectors instead of summary statistics.
	pub return_raw: bool,
	pub tile_size: usize,
	pub overlap: usize,
	/// Tag stored in each record's `raster_source` field.
	pub raster_source_tag: String,
}

/// Per-feature state accumulated across tiles for a boundary-crossing
/// polygon (spec §5 "the extractor explicitly holds state across
/// suspensions").
struct BoundaryEntry {
	species: Option<String>,
	samples: BTreeMap<String, Vec<f64>>,
}

enum State<'a> {
	Streaming {
		tiles: TileIter<'a>,
		raster: &'a dyn RasterSource,
		vector: VectorTable,
		config: ExtractionConfig,
		band_indices: Vec<(String, usize)>,
		diagnostics: &'a dyn Diagnostics,
		boundary_buffer: BTreeMap<i64, BoundaryEntry>,
		fully_processed_ids: BTreeSet<i64>,
		pending: VecDeque<ExtractionRecord>,
	},
	Draining(std::vec::IntoIter<ExtractionRecord>),
	Done,
}

/// Lazy extraction stream (spec §4.4). Each [`Iterator::next`] call either
/// drains a record already computed for the current tile, advances to the
/// next tile, or (once the tile stream is exhausted) finalizes the
/// boundary buffer and drains it.
pub struct ExtractionStream<'a> {
	state: State<'a>,
}

/// Builds an extraction stream over `raster`, reprojecting `vector` to the
/// raster's CRS first if they disagree (spec §7 `CRSMismatch`: "recovered
/// silently by reprojecting the vector to the raster's CRS").
///
/// # Errors
/// Returns an error if a requested band name is not in the raster's band
/// table, or if reprojection fails.
pub fn extract_features<'a>(
	raster: &'a dyn RasterSource,
	vector: VectorTable,
	config: ExtractionConfig,
	diagnostics: &'a dyn Diagnostics,
	reproject_vector: impl Fn(&Geometry<f64>) -> Result<Geometry<f64>>,
) -> Result<ExtractionStream<'a>> {
	let vector = if vector.crs() == raster.crs() {
		vector
	} else {
		diagnostics.record(SkipKind::CrsReprojected, "vector input reprojected to raster CRS");
		vector.reproject(raster.crs(), reproject_vector)?
	};

	let mut band_indices = Vec::with_capacity(config.bands.len());
	for name in &config.bands {
		let Some(index) = raster.bands().index_of(name) else {
			bail!("requested band '{name}' is not present in the raster's band table");
		};
		band_indices.push((name.clone(), index - 1));
	}

	let tiles = TileIter::new(raster, config.tile_size, config.overlap);
	Ok(ExtractionStream {
		state: State::Streaming {
			tiles,
			raster,
			vector,
			config,
			band_indices,
			diagnostics,
			boundary_buffer: BTreeMap::new(),
			fully_processed_ids: BTreeSet::new(),
			pending: VecDeque::new(),
		},
	})
}

/// Drains `stream` into a `Vec`, the SPEC_FULL-supplemented convenience
/// wrapper around the lazy `ExtractionStream` for callers that just want
/// every record (spec.md's own entry point is the lazy sequence; batch
/// collection is left to the caller).
///
/// # Errors
/// Returns the first error yielded by the stream, if any.
pub fn collect_records(stream: ExtractionStream<'_>) -> Result<Vec<ExtractionRecord>> {
	stream.collect()
}

impl Iterator for ExtractionStream<'_> {
	type Item = Result<ExtractionRecord>;

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			match &mut self.state {
				State::Streaming { pending, .. } if !pending.is_empty() => {
					return pending.pop_front().map(Ok);
				}
				State::Streaming { tiles, .. } => match tiles.next() {
					Some(Ok((window, array))) => {
						if let Err(e) = self.process_tile(window, &array) {
							return Some(Err(e));
						}
					}
					Some(Err(e)) => return Some(Err(e)),
					None => self.finish_streaming(),
				},
				State::Draining(iter) => match iter.next() {
					Some(record) => return Some(Ok(record)),
					None => {
						self.state = State::Done;
						return None;
					}
				},
				State::Done => return None,
			}
		}
	}
}

impl<'a> ExtractionStream<'a> {
	/// Processes one tile: queries the vector index, classifies each
	/// candidate feature, and either emits a fully-inside record directly
	/// into `pending` or accumulates samples into the boundary buffer.
	fn process_tile(&mut self, window: TileWindow, array: &Array3<f64>) -> Result<()> {
		let State::Streaming { raster, vector, config, band_indices, diagnostics, boundary_buffer, fully_processed_ids, pending, .. } = &mut self.state else {
			unreachable!("process_tile only called while streaming");
		};
		let raster = *raster;
		let diagnostics = *diagnostics;

		let transform = raster.transform();
		let tile_box = window.to_world(&transform);
		let header = raster.header();
		let is_whole_raster = window.width() == header.width && window.height() == header.height;

		let indices = vector.query_bbox(tile_box.x_min, tile_box.y_min, tile_box.x_max, tile_box.y_max);
		for index in indices {
			let Some(feature) = vector.get(index) else { continue };
			if !feature.geometry.intersects(&rect_from_world(&tile_box)) {
				continue;
			}
			let crown_id = vector.crown_id_of(index);
			if fully_processed_ids.contains(&crown_id) {
				continue;
			}

			let Some(samples) = sample_feature(feature, &window, &transform, array, band_indices.as_slice(), config.threshold, raster.nodata(), diagnostics) else {
				continue;
			};
			if samples.values().all(Vec::is_empty) {
				continue;
			}

			let fully_inside = is_whole_raster || feature_bbox_within(feature, &tile_box);
			if fully_inside {
				let record = build_record(crown_id, feature.species(), &config.raster_source_tag, &samples, config.return_raw, band_indices.as_slice());
				pending.push_back(record);
				fully_processed_ids.insert(crown_id);
			} else {
				let entry = boundary_buffer.entry(crown_id).or_insert_with(|| BoundaryEntry { species: feature.species(), samples: BTreeMap::new() });
				for (name, _) in band_indices.iter() {
					entry.samples.entry(name.clone()).or_default().extend(samples.get(name).into_iter().flatten());
				}
			}
		}
		Ok(())
	}

	/// Transitions `Streaming -> Draining`, finalizing every buffered
	/// boundary feature (spec §4.4 step 6).
	fn finish_streaming(&mut self) {
		let old = std::mem::replace(&mut self.state, State::Done);
		let State::Streaming { config, boundary_buffer, .. } = old else {
			unreachable!("finish_streaming only called while streaming");
		};
		let records: Vec<ExtractionRecord> = boundary_buffer
			.into_iter()
			.filter_map(|(crown_id, entry)| {
				if entry.samples.values().all(Vec::is_empty) {
					return None;
				}
				let mut bands = BTreeMap::new();
				for (name, samples) in entry.samples {
					if samples.is_empty() {
						continue;
					}
					bands.insert(name, if config.return_raw { ExtractionValue::Raw(samples) } else { ExtractionValue::summarize(&samples) });
				}
				Some(ExtractionRecord { crown_id, species: entry.species, raster_source: config.raster_source_tag.clone(), bands })
			})
			.collect();
		self.state = State::Draining(records.into_iter());
	}
}

/// Per-band sample vectors for a feature's surviving pixels within one
/// tile — `None` if the geometry mask (even with any-touched retry) is
/// empty (spec §7 `EmptyMask`: "if still empty, the polygon is skipped").
fn sample_feature(
	feature: &Feature,
	window: &TileWindow,
	transform: &AffineTransform,
	array: &Array3<f64>,
	band_indices: &[(String, usize)],
	threshold: Option<f64>,
	nodata: Option<f64>,
	diagnostics: &dyn Diagnostics,
) -> Option<BTreeMap<String, Vec<f64>>> {
	let clip = clip_feature_window(feature, window, transform)?;
	let mut pixels = strict_mask_pixels(feature, &clip, transform);
	if pixels.is_empty() {
		pixels = any_touched_mask_pixels(feature, &clip, transform);
		if pixels.is_empty() {
			diagnostics.record(SkipKind::EmptyMask, "feature mask empty after any-touched retry");
			return None;
		}
	}

	let mut samples: BTreeMap<String, Vec<f64>> = band_indices.iter().map(|(name, _)| (name.clone(), Vec::new())).collect();
	'pixel: for (row, col) in pixels {
		let local_row = row - window.y_min;
		let local_col = col - window.x_min;
		let mut column = Vec::with_capacity(band_indices.len());
		for (_, band) in band_indices {
			let value = array[[*band, local_row, local_col]];
			if is_nodata(value, nodata) {
				continue 'pixel;
			}
			if let Some(t) = threshold {
				if !(value > t) {
					continue 'pixel;
				}
			}
			column.push(value);
		}
		for ((name, _), value) in band_indices.iter().zip(column) {
			samples.get_mut(name).expect("initialized above").push(value);
		}
	}
	Some(samples)
}

fn is_nodata(value: f64, nodata: Option<f64>) -> bool {
	match nodata {
		Some(nd) if nd.is_nan() => value.is_nan(),
		Some(nd) => value == nd,
		None => false,
	}
}

/// Clips the feature's pixel-space bounding window to `window`, returning
/// `None` if the clipped window is empty (spec §4.4 step 5a).
fn clip_feature_window(feature: &Feature, window: &TileWindow, parent_transform: &AffineTransform) -> Option<TileWindow> {
	let rect = feature.geometry.bounding_rect()?;
	let (px, py) = parent_transform.pixel_size();
	let col_left = (rect.min().x - parent_transform.c) / px;
	let col_right = (rect.max().x - parent_transform.c) / px;
	let row_top = (parent_transform.f - rect.max().y) / py;
	let row_bottom = (parent_transform.f - rect.min().y) / py;

	let x_min = col_left.floor().max(window.x_min as f64).max(0.0) as usize;
	let x_max = (col_right.ceil() as i64).min(window.x_max as i64).max(0) as usize;
	let y_min = row_top.floor().max(window.y_min as f64).max(0.0) as usize;
	let y_max = (row_bottom.ceil() as i64).min(window.y_max as i64).max(0) as usize;

	if x_max <= x_min || y_max <= y_min {
		return None;
	}
	TileWindow::new(x_min, x_max, y_min, y_max).ok()
}

/// Pixel centers whose world coordinate lies strictly inside the feature's
/// geometry (spec §4.4 step 5b, strict test).
fn strict_mask_pixels(feature: &Feature, clip: &TileWindow, transform: &AffineTransform) -> Vec<(usize, usize)> {
	let mut pixels = Vec::new();
	for row in clip.y_min..clip.y_max {
		for col in clip.x_min..clip.x_max {
			let (x, y) = transform.apply(col as f64 + 0.5, row as f64 + 0.5);
			if feature.geometry.contains(&Point::new(x, y)) {
				pixels.push((row, col));
			}
		}
	}
	pixels
}

/// Pixels whose unit square intersects the geometry at all (spec §4.4 step
/// 5b any-touched retry), for narrow crowns the strict test would miss
/// entirely.
fn any_touched_mask_pixels(feature: &Feature, clip: &TileWindow, transform: &AffineTransform) -> Vec<(usize, usize)> {
	let mut pixels = Vec::new();
	for row in clip.y_min..clip.y_max {
		for col in clip.x_min..clip.x_max {
			let (x0, y0) = transform.apply(col as f64, row as f64);
			let (x1, y1) = transform.apply(col as f64 + 1.0, row as f64 + 1.0);
			let square = Rect::new((x0.min(x1), y0.min(y1)), (x0.max(x1), y0.max(y1)));
			if feature.geometry.intersects(&square) {
				pixels.push((row, col));
			}
		}
	}
	pixels
}

/// True if `feature`'s bounding box is fully contained within `tile_box`
/// (spec §4.4 step 4's "feature lies within the tile box").
fn feature_bbox_within(feature: &Feature, tile_box: &WorldBox) -> bool {
	let Some(rect) = feature.geometry.bounding_rect() else { return false };
	rect.min().x >= tile_box.x_min && rect.max().x <= tile_box.x_max && rect.min().y >= tile_box.y_min && rect.max().y <= tile_box.y_max
}

fn rect_from_world(b: &WorldBox) -> Rect<f64> {
	Rect::new((b.x_min, b.y_min), (b.x_max, b.y_max))
}

fn build_record(crown_id: i64, species: Option<String>, raster_source_tag: &str, samples: &BTreeMap<String, Vec<f64>>, return_raw: bool, band_indices: &[(String, usize)]) -> ExtractionRecord {
	let mut bands = BTreeMap::new();
	for (name, _) in band_indices {
		let Some(values) = samples.get(name) else { continue };
		if values.is_empty() {
			continue;
		}
		bands.insert(name.clone(), if return_raw { ExtractionValue::Raw(values.clone()) } else { ExtractionValue::summarize(values) });
	}
	ExtractionRecord { crown_id, species, raster_source: raster_source_tag.to_string(), bands }
}

#[cfg(test)]
mod tests {
	use super::*;
	use canopy_core::{BandTable, BlockStructure, CountingDiagnostics, Crs, NullDiagnostics, RasterHeader};
	use canopy_geometry::VectorTable;
	use geo::Rect as GeoRect;
	use std::collections::BTreeMap as Map;

	struct ConstantRaster {
		data: Array3<f64>,
		bands: BandTable,
		crs: Crs,
		nodata: Option<f64>,
	}

	impl RasterSource for ConstantRaster {
		fn header(&self) -> RasterHeader {
			let shape = self.data.shape();
			RasterHeader { bands: shape[0], height: shape[1], width: shape[2], bytes_per_sample: 8, block_structure: BlockStructure::Striped { row_height: 1 } }
		}
		fn transform(&self) -> AffineTransform {
			AffineTransform::north_up(0.0, self.data.shape()[1] as f64, 1.0)
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
			Vec::new()
		}
		fn read_window(&self, window: TileWindow, fill: Option<f64>) -> Result<Array3<f64>> {
			let fill = fill.unwrap_or(0.0);
			let (bands, height, width) = (self.data.shape()[0], self.data.shape()[1], self.data.shape()[2]);
			Ok(Array3::from_shape_fn((bands, window.height(), window.width()), |(b, r, c)| {
				let (row, col) = (window.y_min + r, window.x_min + c);
				if row < height && col < width { self.data[[b, row, col]] } else { fill }
			}))
		}
		fn write_window(&mut self, _window: TileWindow, _data: &Array3<f64>) -> Result<()> {
			unreachable!("extraction never writes")
		}
	}

	fn box_feature(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Feature {
		let rect = GeoRect::new((x_min, y_min), (x_max, y_max));
		Feature::new(Geometry::Polygon(rect.to_polygon()), Map::new())
	}

	#[test]
	fn scenario_a_constant_value_extraction() {
		let data = Array3::from_elem((1, 10, 10), 100.0);
		let raster = ConstantRaster { data, bands: BandTable::from_names(["height"]).unwrap(), crs: Crs::new("UTM-19N"), nodata: None };
		let vector = VectorTable::from_repaired(vec![box_feature(0.0, 0.0, 2.0, 2.0)], Crs::new("UTM-19N")).unwrap();
		let config = ExtractionConfig { bands: vec!["height".to_string()], threshold: None, return_raw: false, tile_size: 10, overlap: 0, raster_source_tag: "chm".to_string() };
		let diagnostics = NullDiagnostics;
		let stream = extract_features(&raster, vector, config, &diagnostics, |g| Ok(g.clone())).unwrap();
		let records = collect_records(stream).unwrap();
		assert_eq!(records.len(), 1);
		let ExtractionValue::Summary { mean, min, max, median, stdev } = records[0].bands["height"].clone() else {
			panic!("expected summary");
		};
		assert!((mean - 100.0).abs() < 1e-9);
		assert!((min - 100.0).abs() < 1e-9);
		assert!((max - 100.0).abs() < 1e-9);
		assert!((median - 100.0).abs() < 1e-9);
		assert!(stdev.abs() < 1e-9);
	}

	#[test]
	fn scenario_d_crs_mismatch_reprojects_and_completes() {
		let data = Array3::from_elem((1, 10, 10), 5.0);
		let raster = ConstantRaster { data, bands: BandTable::from_names(["height"]).unwrap(), crs: Crs::new("UTM"), nodata: None };
		let vector = VectorTable::from_repaired(vec![box_feature(0.0, 0.0, 2.0, 2.0)], Crs::new("WGS84")).unwrap();
		let config = ExtractionConfig { bands: vec!["height".to_string()], threshold: None, return_raw: false, tile_size: 10, overlap: 0, raster_source_tag: "chm".to_string() };
		let diagnostics = CountingDiagnostics::new();
		let stream = extract_features(&raster, vector, config, &diagnostics, |g| Ok(g.clone())).unwrap();
		let records = collect_records(stream).unwrap();
		assert!(!records.is_empty());
		assert_eq!(diagnostics.count(SkipKind::CrsReprojected), 1);
	}

	#[test]
	fn boundary_crossing_feature_is_finalized_after_the_tile_stream() {
		let data = Array3::from_elem((1, 10, 10), 50.0);
		let raster = ConstantRaster { data, bands: BandTable::from_names(["height"]).unwrap(), crs: Crs::new("UTM"), nodata: None };
		// A feature spanning both 5x5 tiles cannot be fully inside either one.
		let vector = VectorTable::from_repaired(vec![box_feature(3.0, 0.0, 7.0, 10.0)], Crs::new("UTM")).unwrap();
		let config = ExtractionConfig { bands: vec!["height".to_string()], threshold: None, return_raw: false, tile_size: 5, overlap: 0, raster_source_tag: "chm".to_string() };
		let diagnostics = NullDiagnostics;
		let stream = extract_features(&raster, vector, config, &diagnostics, |g| Ok(g.clone())).unwrap();
		let records = collect_records(stream).unwrap();
		assert_eq!(records.len(), 1);
	}
}
