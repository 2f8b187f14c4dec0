//! Vector feature table: an ordered feature collection with an `rstar`
//! bounding-box index for the tile-intersection queries the extractor and
//! the tree-detection kernels run per tile (spec §3 "Vector table").

use crate::records::AttrValue;
use crate::repair::repair_geometry;
use anyhow::{Result, ensure};
use canopy_core::{CanopyError, Crs, Diagnostics, SkipKind};
use geo::{BoundingRect, Geometry};
use rstar::{AABB, RTree, RTreeObject};
use std::collections::BTreeMap;

/// One vector feature: a geometry plus an attribute map. `crown_id` is a
/// distinguished attribute (spec §3) read through [`Feature::crown_id`]
/// rather than stored as a separate field, so a table built from an
/// arbitrary attribute schema still round-trips it.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
	pub geometry: Geometry<f64>,
	pub attributes: BTreeMap<String, AttrValue>,
}

impl Feature {
	#[must_use]
	pub fn new(geometry: Geometry<f64>, attributes: BTreeMap<String, AttrValue>) -> Self {
		Feature { geometry, attributes }
	}

	/// The feature's `crown_id`, read from its attribute map. Callers that
	/// need the open-question default (row index when absent) use
	/// [`VectorTable::crown_id_of`] instead, which has access to the row's
	/// position.
	#[must_use]
	pub fn crown_id_attr(&self) -> Option<i64> {
		self.attributes.get("crown_id").and_then(AttrValue::as_i64)
	}

	#[must_use]
	pub fn species(&self) -> Option<String> {
		match self.attributes.get("species") {
			Some(AttrValue::Text(s)) => Some(s.clone()),
			_ => None,
		}
	}
}

/// A feature plus its row index, indexed by bounding-box in the table's
/// `rstar::RTree`. Kept separate from [`Feature`] so the tree never needs
/// to clone geometry to answer a query.
struct IndexedFeature {
	index: usize,
	envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedFeature {
	type Envelope = AABB<[f64; 2]>;

	fn envelope(&self) -> Self::Envelope {
		self.envelope
	}
}

/// An ordered feature collection with a CRS tag and a spatial index
/// answering "which feature indices intersect this bounding box?" (spec §3,
/// §6 "Vector I/O collaborator").
pub struct VectorTable {
	features: Vec<Feature>,
	crs: Crs,
	index: RTree<IndexedFeature>,
}

impl VectorTable {
	/// Builds a table from a feature list, repairing invalid geometries
	/// and dropping those that cannot be repaired (spec §7 `InvalidGeometry`).
	/// Empty-geometry features (after repair) count as a drop, not a silent
	/// skip, and are reported to `diagnostics`.
	pub fn build(features: Vec<Feature>, crs: Crs, diagnostics: &dyn Diagnostics) -> Result<Self> {
		let mut kept = Vec::with_capacity(features.len());
		for (i, feature) in features.into_iter().enumerate() {
			match repair_geometry(feature.geometry) {
				Ok((geom, was_repaired)) => {
					if was_repaired {
						diagnostics.record(SkipKind::GeometryRepaired, &format!("row {i}"));
					}
					kept.push(Feature::new(geom, feature.attributes));
				}
				Err(_) => {
					diagnostics.record(SkipKind::GeometryDropped, &format!("row {i}"));
				}
			}
		}
		Self::from_repaired(kept, crs)
	}

	/// Builds a table from features already known to be valid, skipping
	/// the repair pass. Used by tests and by callers constructing synthetic
	/// tables in-memory.
	pub fn from_repaired(features: Vec<Feature>, crs: Crs) -> Result<Self> {
		let mut entries = Vec::with_capacity(features.len());
		for (i, feature) in features.iter().enumerate() {
			let rect = feature.geometry.bounding_rect().ok_or_else(|| {
				CanopyError::InvalidGeometry(format!("feature {i} has no bounding rectangle (empty geometry)"))
			})?;
			let envelope = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
			entries.push(IndexedFeature { index: i, envelope });
		}
		ensure!(!features.is_empty() || entries.is_empty(), "unreachable: entries tracks features 1:1");
		let index = RTree::bulk_load(entries);
		Ok(VectorTable { features, crs, index })
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.features.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.features.is_empty()
	}

	#[must_use]
	pub fn crs(&self) -> &Crs {
		&self.crs
	}

	#[must_use]
	pub fn features(&self) -> &[Feature] {
		&self.features
	}

	#[must_use]
	pub fn get(&self, index: usize) -> Option<&Feature> {
		self.features.get(index)
	}

	/// The feature's `crown_id`: its `crown_id` attribute if present,
	/// otherwise its row index — the default-assignment rule the original
	/// implementation applies (`row.get('crown_id', idx)`).
	#[must_use]
	pub fn crown_id_of(&self, index: usize) -> i64 {
        self.features
            .get(index)
            .and_then(Feature::crown_id_attr)
            .unwrap_or(index as i64)
	}

	/// Indices of features whose bounding box intersects `(x_min, y_min,
	/// x_max, y_max)`. This is a bounding-box prefilter only — callers
	/// (spec §4.4 step 3) must still test actual geometry intersection.
	#[must_use]
	pub fn query_bbox(&self, x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Vec<usize> {
		let query = AABB::from_corners([x_min, y_min], [x_max, y_max]);
		self.index
			.locate_in_envelope_intersecting(&query)
			.map(|entry| entry.index)
			.collect()
	}

	/// Reprojects every feature's geometry with `convert`, returning a new
	/// table tagged with `target_crs`. Idempotent when `target_crs` already
	/// matches this table's CRS — returns without invoking `convert`,
	/// matching [`canopy_core::RasterEnvelope::reproject`]'s behavior.
	pub fn reproject(&self, target_crs: &Crs, convert: impl Fn(&Geometry<f64>) -> Result<Geometry<f64>>) -> Result<Self> {
		if &self.crs == target_crs {
			return Self::from_repaired(self.features.clone(), self.crs.clone());
		}
		let mut reprojected = Vec::with_capacity(self.features.len());
		for feature in &self.features {
			let geometry = convert(&feature.geometry)?;
			reprojected.push(Feature::new(geometry, feature.attributes.clone()));
		}
		Self::from_repaired(reprojected, target_crs.clone())
	}
}
