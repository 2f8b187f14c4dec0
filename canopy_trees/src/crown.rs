//! Crown delineation (spec §4.7): marker-controlled watershed and ringed
//! region growing, both seeded at treetop positions and filtered to the
//! tile's core box.

use crate::imgconv::gaussian_blur;
use crate::morphology::close3x3;
use anyhow::Result;
use canopy_core::{AffineTransform, DelineationMethod, DelineationParams, RasterSource, WorldBox};
use canopy_engine::CoreHaloIter;
use canopy_geometry::{CrownRecord, TreetopRecord};
use geo::algorithm::{Area, BooleanOps};
use geo::Rect;
use geo_types::{MultiPolygon, Polygon};
use ndarray::Array2;
use rstar::{AABB, RTree, RTreeObject};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Wraps a treetop's index into a point-only `rstar` entry so a tile can
/// query "which treetops fall in my read box" without scanning the whole
/// list (spec §4.7 step 1 "query the treetop spatial index").
struct IndexedTreetop {
	index: usize,
	x: f64,
	y: f64,
}

impl RTreeObject for IndexedTreetop {
	type Envelope = AABB<[f64; 2]>;

	fn envelope(&self) -> Self::Envelope {
		AABB::from_point([self.x, self.y])
	}
}

/// Iterates the CHM's core+halo tiles (spec §4.7) and delineates a crown
/// per surviving treetop, returning the combined crown list.
///
/// # Errors
/// Propagates any tile read failure from `chm_source`.
pub fn delineate_crowns(chm_source: &dyn RasterSource, treetops: &[TreetopRecord], params: &DelineationParams, tile_size: usize, overlap: usize) -> Result<Vec<CrownRecord>> {
	let index: RTree<IndexedTreetop> = RTree::bulk_load(
		treetops
			.iter()
			.enumerate()
			.map(|(index, t)| IndexedTreetop { index, x: t.location.x(), y: t.location.y() })
			.collect(),
	);

	let mut records = Vec::new();
	for visit in CoreHaloIter::new(chm_source, tile_size, overlap) {
		let visit = visit?;
		let chm = visit.array.index_axis(ndarray::Axis(0), 0).to_owned();
		let read_box = visit.read_box;
		let envelope = AABB::from_corners([read_box.x_min, read_box.y_min], [read_box.x_max, read_box.y_max]);
		let tile_treetops: Vec<(f64, f64, f64)> = index
			.locate_in_envelope_intersecting(&envelope)
			.map(|entry| {
				let t = &treetops[entry.index];
				(entry.x, entry.y, t.height)
			})
			.collect();
		records.extend(delineate_crowns_tile(&chm, visit.transform, visit.core_box, &tile_treetops, params)?);
	}
	Ok(records)
}

/// A treetop already converted to tile-local pixel coordinates, paired
/// with the label it seeds.
struct Apex {
	row: usize,
	col: usize,
	height: f64,
	label: i32,
}

/// Runs `params.method` over one CHM tile, seeded by `treetops` (world
/// coordinates, already filtered to this tile's read box by the caller),
/// and returns crown polygons whose apex lies in `core_box` (spec §4.7:
/// "emit the crown only if the apex geometry lies in the tile's core
/// box").
pub fn delineate_crowns_tile(
	chm: &Array2<f64>,
	transform: AffineTransform,
	core_box: WorldBox,
	treetop_world_coords: &[(f64, f64, f64)],
	params: &DelineationParams,
) -> Result<Vec<CrownRecord>> {
	let apexes = place_apexes(chm, transform, treetop_world_coords);
	if apexes.is_empty() {
		return Ok(Vec::new());
	}

	let labels = match params.method {
		DelineationMethod::Watershed => watershed(chm, &apexes, params),
		DelineationMethod::RegionGrowing => region_growing(chm, &apexes, params),
	};

	let mut records = Vec::new();
	for apex in &apexes {
		let (x, y) = transform.apply(apex.col as f64 + 0.5, apex.row as f64 + 0.5);
		if !core_box.contains(x, y) {
			continue;
		}
		let Some(polygon) = label_to_polygon(&labels, apex.label, &transform) else {
			continue;
		};
		let height = max_chm_in_label(chm, &labels, apex.label);
		records.push(CrownRecord {
			polygon,
			tree_id: apex.label as i64,
			height,
			method: params.method,
		});
	}
	Ok(records)
}

/// Converts each surviving treetop's world coordinate to a tile-local
/// pixel `(row, col)`, dropping any that fall outside the tile bounds
/// (spec §4.7 step 1), and assigns unique labels `1..=N`.
fn place_apexes(chm: &Array2<f64>, transform: AffineTransform, treetops: &[(f64, f64, f64)]) -> Vec<Apex> {
	let (height, width) = chm.dim();
	let inverse_scale = 1.0 / transform.pixel_size().0;
	let mut apexes = Vec::new();
	let mut label = 1;
	for &(x, y, tree_height) in treetops {
		let col = ((x - transform.c) * inverse_scale).floor();
		let row = ((transform.f - y) * inverse_scale).floor();
		if col < 0.0 || row < 0.0 || col as usize >= width || row as usize >= height {
			continue;
		}
		apexes.push(Apex { row: row as usize, col: col as usize, height: tree_height, label });
		label += 1;
	}
	apexes
}

#[derive(Clone, Copy, PartialEq)]
struct OrderedElevation(f64);

impl Eq for OrderedElevation {}
impl Ord for OrderedElevation {
	fn cmp(&self, other: &Self) -> Ordering {
		self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
	}
}
impl PartialOrd for OrderedElevation {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

/// Marker-controlled watershed over the negated, prepared CHM (spec §4.7
/// "Watershed"). A min-priority flood from the marker pixels; a pixel
/// reached from two differently-labeled fronts becomes an explicit
/// watershed line (label `0`) rather than being claimed by either.
fn watershed(chm: &Array2<f64>, apexes: &[Apex], params: &DelineationParams) -> Array2<i32> {
	let closed = close3x3(chm);
	let prepared = gaussian_blur(&closed, params.watershed_sigma);
	let (height, width) = prepared.dim();

	let mut labels = Array2::<i32>::zeros((height, width));
	let mut visited = Array2::<bool>::from_elem((height, width), false);
	let mut heap: BinaryHeap<(std::cmp::Reverse<OrderedElevation>, usize, usize)> = BinaryHeap::new();

	for apex in apexes {
		if prepared[[apex.row, apex.col]] < params.min_height {
			continue;
		}
		labels[[apex.row, apex.col]] = apex.label;
		visited[[apex.row, apex.col]] = true;
		push_neighbors(&mut heap, apex.row, apex.col, height, width, &prepared);
	}

	while let Some((std::cmp::Reverse(OrderedElevation(_)), r, c)) = heap.pop() {
		if visited[[r, c]] {
			continue;
		}
		if prepared[[r, c]] < params.min_height {
			visited[[r, c]] = true;
			continue;
		}
		let mut neighbor_labels = Vec::new();
		for (rr, cc) in neighbors(r, c, height, width) {
			let l = labels[[rr, cc]];
			if l != 0 && !neighbor_labels.contains(&l) {
				neighbor_labels.push(l);
			}
		}
		visited[[r, c]] = true;
		match neighbor_labels.as_slice() {
			[] => continue,
			[single] => {
				labels[[r, c]] = *single;
				push_neighbors(&mut heap, r, c, height, width, &prepared);
			}
			_ => {
				// Two or more distinct basins meet here: an explicit
				// watershed line. Leave label 0, do not propagate further.
			}
		}
	}
	labels
}

fn push_neighbors(heap: &mut BinaryHeap<(std::cmp::Reverse<OrderedElevation>, usize, usize)>, r: usize, c: usize, height: usize, width: usize, elevation: &Array2<f64>) {
	for (rr, cc) in neighbors(r, c, height, width) {
		heap.push((std::cmp::Reverse(OrderedElevation(elevation[[rr, cc]])), rr, cc));
	}
}

fn neighbors(r: usize, c: usize, height: usize, width: usize) -> Vec<(usize, usize)> {
	let mut out = Vec::with_capacity(4);
	if r > 0 {
		out.push((r - 1, c));
	}
	if r + 1 < height {
		out.push((r + 1, c));
	}
	if c > 0 {
		out.push((r, c - 1));
	}
	if c + 1 < width {
		out.push((r, c + 1));
	}
	out
}

/// Concentric ring offsets up to `max_radius_px`, grouped into rings by
/// ascending squared distance — the precomputed growth order the ringed
/// region-growing kernel scans (spec §4.7 "Region growing (ringed)").
fn build_rings(max_radius_px: f64) -> Vec<Vec<(isize, isize)>> {
	let r = max_radius_px.ceil() as isize;
	let max_sq = max_radius_px * max_radius_px;
	let mut by_distance: std::collections::BTreeMap<i64, Vec<(isize, isize)>> = std::collections::BTreeMap::new();
	for dr in -r..=r {
		for dc in -r..=r {
			if dr == 0 && dc == 0 {
				continue;
			}
			let sq = (dr * dr + dc * dc) as f64;
			if sq <= max_sq {
				// Scale to keep a stable integer key while preserving ring order.
				by_distance.entry((sq * 1000.0) as i64).or_default().push((dr, dc));
			}
		}
	}
	by_distance.into_values().collect()
}

/// Ringed region growing (spec §4.7 "Region growing (ringed)"): pads the
/// CHM conceptually by operating in bounds-checked offsets from each apex,
/// so the kernel never needs a real padded buffer.
fn region_growing(chm: &Array2<f64>, apexes: &[Apex], params: &DelineationParams) -> Array2<i32> {
	let closed = close3x3(chm);
	let prepared = gaussian_blur(&closed, params.watershed_sigma);
	let (height, width) = prepared.dim();
	let max_radius_px = params.max_crown_radius / params.pixel_size;
	let rings = build_rings(max_radius_px);

	let mut labels = Array2::<i32>::zeros((height, width));
	struct GrowthState {
		label: i32,
		apex_height: f64,
		cumulative_height: f64,
		pixel_count: f64,
		active: bool,
	}
	let mut states: Vec<GrowthState> = apexes
		.iter()
		.map(|apex| {
			labels[[apex.row, apex.col]] = apex.label;
			GrowthState {
				label: apex.label,
				apex_height: apex.height,
				cumulative_height: apex.height,
				pixel_count: 1.0,
				active: true,
			}
		})
		.collect();

	for ring in &rings {
		for (state, apex) in states.iter_mut().zip(apexes.iter()) {
			if !state.active {
				continue;
			}
			let mut grew = false;
			for &(dr, dc) in ring {
				let rr = apex.row as isize + dr;
				let cc = apex.col as isize + dc;
				if rr < 0 || cc < 0 || rr >= height as isize || cc >= width as isize {
					continue;
				}
				let (rr, cc) = (rr as usize, cc as usize);
				if labels[[rr, cc]] != 0 {
					continue;
				}
				let h = prepared[[rr, cc]];
				if h <= params.min_height {
					continue;
				}
				if h > state.apex_height + 0.5 {
					continue;
				}
				if h <= state.apex_height * params.apex_inclusion {
					continue;
				}
				if h * state.pixel_count <= state.cumulative_height * params.crown_threshold {
					continue;
				}
				let has_owned_4neighbor = neighbors(rr, cc, height, width).iter().any(|&(nr, nc)| labels[[nr, nc]] == state.label);
				if !has_owned_4neighbor {
					continue;
				}
				labels[[rr, cc]] = state.label;
				state.cumulative_height += h;
				state.pixel_count += 1.0;
				grew = true;
			}
			if !grew {
				state.active = false;
			}
		}
		if states.iter().all(|s| !s.active) {
			break;
		}
	}
	labels
}

/// Vectorizes a label's pixels into a single polygon by unioning each
/// pixel's world-space unit square (the `geo` analogue of a raster-to-
/// vector "dissolve" pass).
fn label_to_polygon(labels: &Array2<i32>, label: i32, transform: &AffineTransform) -> Option<Polygon<f64>> {
	let mut accumulated: Option<MultiPolygon<f64>> = None;
	for ((r, c), &l) in labels.indexed_iter() {
		if l != label {
			continue;
		}
		let (x0, y0) = transform.apply(c as f64, (r + 1) as f64);
		let (x1, y1) = transform.apply((c + 1) as f64, r as f64);
		let rect = Rect::new((x0.min(x1), y0.min(y1)), (x0.max(x1), y0.max(y1)));
		let square = MultiPolygon(vec![rect.to_polygon()]);
		accumulated = Some(match accumulated {
			Some(acc) => acc.union(&square),
			None => square,
		});
	}
	accumulated.and_then(|multi| multi.0.into_iter().max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area())))
}

fn max_chm_in_label(chm: &Array2<f64>, labels: &Array2<i32>, label: i32) -> f64 {
	chm.indexed_iter()
		.filter(|&((r, c), _)| labels[[r, c]] == label)
		.map(|(_, &v)| v)
		.fold(f64::NEG_INFINITY, f64::max)
}

#[cfg(test)]
mod tests {
	use super::*;
	use ndarray::Array2;

	fn bump(size: usize, cx: f64, cy: f64, amplitude: f64, spread: f64) -> Array2<f64> {
		Array2::from_shape_fn((size, size), |(r, c)| {
			let dr = r as f64 - cy;
			let dc = c as f64 - cx;
			amplitude * (-(dr * dr + dc * dc) / (2.0 * spread * spread)).exp()
		})
	}

	#[test]
	fn region_growing_produces_one_crown_per_apex() {
		let chm = bump(21, 10.0, 10.0, 20.0, 4.0);
		let transform = AffineTransform::north_up(0.0, 21.0, 1.0);
		let (x, y) = transform.apply(10.5, 10.5);
		let params = DelineationParams { method: DelineationMethod::RegionGrowing, max_crown_radius: 8.0, ..Default::default() };
		let core = WorldBox { x_min: 0.0, x_max: 21.0, y_min: -21.0, y_max: 21.0 };
		let records = delineate_crowns_tile(&chm, transform, core, &[(x, y, 20.0)], &params).unwrap();
		assert_eq!(records.len(), 1);
		assert!(records[0].height > 0.0);
	}

	#[test]
	fn watershed_splits_two_adjacent_bumps() {
		let mut chm = bump(30, 8.0, 15.0, 15.0, 3.0);
		let second = bump(30, 22.0, 15.0, 15.0, 3.0);
		for ((r, c), v) in chm.indexed_iter_mut() {
			*v = v.max(second[[r, c]]);
		}
		let transform = AffineTransform::north_up(0.0, 30.0, 1.0);
		let (x1, y1) = transform.apply(8.5, 15.5);
		let (x2, y2) = transform.apply(22.5, 15.5);
		let params = DelineationParams { method: DelineationMethod::Watershed, watershed_sigma: 0.0, min_height: 1.0, ..Default::default() };
		let core = WorldBox { x_min: 0.0, x_max: 30.0, y_min: -30.0, y_max: 30.0 };
		let records = delineate_crowns_tile(&chm, transform, core, &[(x1, y1, 15.0), (x2, y2, 15.0)], &params).unwrap();
		assert_eq!(records.len(), 2);
		assert_ne!(records[0].tree_id, records[1].tree_id);
	}
}
