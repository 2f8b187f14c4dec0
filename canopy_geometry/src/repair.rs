//! Geometry validity checking and repair (spec §7 `InvalidGeometry`,
//! spec §3 Vector table invariant "geometries are valid after explicit
//! repair").
//!
//! The repair strategy mirrors a GEOS `buffer(0)` self-union: unioning a
//! polygon with itself resolves self-intersections and fixes ring
//! winding, at the cost of being a no-op on some pathological inputs
//! (e.g. a polygon collapsed to zero area), which are then dropped.

use anyhow::{Result, bail};
use geo::algorithm::{Area, BooleanOps, Orient, orient::Direction};
use geo::{Geometry, LineString, MultiPolygon, Polygon};

/// Repairs `geometry`, returning the repaired geometry and whether a
/// repair was actually applied (geometry was already valid: `false`).
///
/// # Errors
/// Returns an error if the geometry is empty or repair collapses it to
/// nothing (the caller should drop the feature and count the skip).
pub fn repair_geometry(geometry: Geometry<f64>) -> Result<(Geometry<f64>, bool)> {
	match geometry {
		Geometry::Polygon(polygon) => {
			let (repaired, changed) = repair_polygon(polygon)?;
			Ok((Geometry::Polygon(repaired), changed))
		}
		Geometry::MultiPolygon(multi) => {
			let mut repaired_parts = Vec::with_capacity(multi.0.len());
			let mut changed_any = false;
			for polygon in multi.0 {
				let (repaired, changed) = repair_polygon(polygon)?;
				changed_any |= changed;
				repaired_parts.push(repaired);
			}
			if repaired_parts.is_empty() {
				bail!("multipolygon has no surviving parts after repair");
			}
			Ok((Geometry::MultiPolygon(MultiPolygon(repaired_parts)), changed_any))
		}
		Geometry::LineString(ref ls) if ls.0.is_empty() => bail!("empty line string"),
		Geometry::Point(_) | Geometry::LineString(_) | Geometry::MultiPoint(_) | Geometry::MultiLineString(_) => {
			// Points and lines have no winding/self-intersection to repair;
			// they are valid as long as they are non-empty.
			Ok((geometry, false))
		}
		other => Ok((other, false)),
	}
}

/// Repairs one polygon: closes an open exterior ring, fixes orientation
/// (CCW exterior / CW interiors, the `geo` convention), and self-unions to
/// resolve self-intersections.
fn repair_polygon(polygon: Polygon<f64>) -> Result<(Polygon<f64>, bool)> {
	if polygon.exterior().0.is_empty() {
		bail!("polygon has an empty exterior ring");
	}

	let closed = close_rings(polygon);
	let oriented = closed.orient(Direction::Default);

	let unioned = oriented.union(&oriented);
	let Some(repaired) = unioned.0.into_iter().max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area())) else {
		bail!("self-union collapsed polygon to nothing");
	};

	let changed = repaired != polygon;
	Ok((repaired, changed))
}

/// Ensures every ring of `polygon` is explicitly closed (first point ==
/// last point), a precondition `geo`'s boolean ops rely on that some
/// upstream loaders don't guarantee.
fn close_rings(polygon: Polygon<f64>) -> Polygon<f64> {
	let (exterior, interiors) = polygon.into_inner();
	let exterior = close_ring(exterior);
	let interiors = interiors.into_iter().map(close_ring).collect();
	Polygon::new(exterior, interiors)
}

fn close_ring(mut ring: LineString<f64>) -> LineString<f64> {
	if let (Some(first), Some(last)) = (ring.0.first().copied(), ring.0.last().copied()) {
		if first != last {
			ring.0.push(first);
		}
	}
	ring
}

#[cfg(test)]
mod tests {
	use super::*;
	use geo::Rect;

	#[test]
	fn valid_polygon_is_unchanged() {
		let polygon = Rect::new((0.0, 0.0), (1.0, 1.0)).to_polygon().orient(Direction::Default);
		let (repaired, changed) = repair_geometry(Geometry::Polygon(polygon.clone())).unwrap();
		assert!(!changed);
		assert_eq!(repaired, Geometry::Polygon(polygon));
	}

	#[test]
	fn unclosed_ring_is_repaired() {
		let ring = LineString::new(vec![(0.0, 0.0).into(), (1.0, 0.0).into(), (1.0, 1.0).into(), (0.0, 1.0).into()]);
		assert_ne!(ring.0.first(), ring.0.last());
		let polygon = Polygon::new(ring.clone(), vec![]);
		let (repaired, changed) = repair_geometry(Geometry::Polygon(polygon)).unwrap();
		assert!(changed);
		let Geometry::Polygon(repaired) = repaired else { panic!("expected polygon") };
		assert_eq!(repaired.exterior().0.first(), repaired.exterior().0.last());
	}

	#[test]
	fn empty_exterior_ring_errors() {
		let polygon = Polygon::new(LineString::new(vec![]), vec![]);
		assert!(repair_geometry(Geometry::Polygon(polygon)).is_err());
	}
}
