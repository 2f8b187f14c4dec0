//! Vector I/O collaborator (spec §6 "Vector I/O collaborator"). Lives here
//! rather than in `canopy_core` since its return type, [`VectorTable`],
//! depends on this crate's geometry types.

use crate::table::VectorTable;
use anyhow::Result;
use canopy_core::Crs;

/// Opens a vector file (or wraps an in-memory feature set, for the
/// test-only mocks in `canopy::io::mock`) and exposes it as a single
/// loaded [`VectorTable`].
///
/// Unlike [`canopy_core::RasterSource`], there is no windowed read: spec.md
/// §4.4 loads the whole vector input once up front and queries it per tile
/// through [`VectorTable::query_bbox`] instead of re-reading from the
/// collaborator.
pub trait VectorSource {
	fn crs(&self) -> &Crs;

	/// Loads the full feature table, repairing invalid geometries per
	/// [`VectorTable::build`].
	fn load(&self, diagnostics: &dyn canopy_core::Diagnostics) -> Result<VectorTable>;
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::records::AttrValue;
	use crate::table::Feature;
	use canopy_core::NullDiagnostics;
	use geo::{Geometry, Rect};
	use std::collections::BTreeMap;

	struct MemoryVectorSource {
		features: Vec<Feature>,
		crs: Crs,
	}

	impl VectorSource for MemoryVectorSource {
		fn crs(&self) -> &Crs {
			&self.crs
		}
		fn load(&self, diagnostics: &dyn canopy_core::Diagnostics) -> Result<VectorTable> {
			VectorTable::build(self.features.clone(), self.crs.clone(), diagnostics)
		}
	}

	#[test]
	fn memory_source_loads_a_repaired_table() {
		let rect = Rect::new((0.0, 0.0), (1.0, 1.0));
		let feature = Feature::new(Geometry::Polygon(rect.to_polygon()), BTreeMap::<String, AttrValue>::new());
		let source = MemoryVectorSource { features: vec![feature], crs: Crs::new("EPSG:4326") };
		let diagnostics = NullDiagnostics;
		let table = source.load(&diagnostics).unwrap();
		assert_eq!(table.len(), 1);
	}
}
