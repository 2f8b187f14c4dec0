//! Record types emitted by the feature extractor and the tree-detection
//! kernels (spec §3 "Extraction record" / "Treetop record" / "Crown
//! record").

use canopy_core::{DelineationMethod, DetectionMethod};
use geo_types::{Point, Polygon};
use std::collections::BTreeMap;

/// A scalar feature attribute value, used by [`crate::table::Feature`]'s
/// attribute map.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
	Int(i64),
	Float(f64),
	Text(String),
	Bool(bool),
}

impl AttrValue {
	/// Coerces to `f64` where a numeric interpretation makes sense;
	/// `None` for [`AttrValue::Text`].
	#[must_use]
	pub fn as_f64(&self) -> Option<f64> {
		match self {
			AttrValue::Int(v) => Some(*v as f64),
			AttrValue::Float(v) => Some(*v),
			AttrValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
			AttrValue::Text(_) => None,
		}
	}

	/// Coerces to `i64`, truncating a [`AttrValue::Float`] — used to read
	/// `crown_id` when it was stored as a float by an upstream loader.
	#[must_use]
	pub fn as_i64(&self) -> Option<i64> {
		match self {
			AttrValue::Int(v) => Some(*v),
			AttrValue::Float(v) => Some(*v as i64),
			AttrValue::Bool(v) => Some(i64::from(*v)),
			AttrValue::Text(_) => None,
		}
	}
}

/// Per-band output for one [`ExtractionRecord`]: either a five-number
/// summary, or the raw pixel vector, per spec §4.4 step 6.
#[derive(Clone, Debug, PartialEq)]
pub enum ExtractionValue {
	Summary {
		mean: f64,
		median: f64,
		stdev: f64,
		min: f64,
		max: f64,
	},
	Raw(Vec<f64>),
}

impl ExtractionValue {
	/// Reduces a collection of raw sample values into a [`ExtractionValue::Summary`],
	/// matching the formula the extractor also uses to finalize
	/// boundary-buffered features (Testable Property 3: statistics must be
	/// identical whether computed fully-inside or via the boundary buffer).
	///
	/// # Panics
	/// Panics if `samples` is empty; callers must not reach this with an
	/// empty per-band sample set (an empty mask is handled earlier, per
	/// spec §4.4 step 5b, and never reaches statistics computation).
	#[must_use]
	pub fn summarize(samples: &[f64]) -> Self {
		assert!(!samples.is_empty(), "cannot summarize an empty sample set");
		let mut sorted = samples.to_vec();
		sorted.sort_by(|a, b| a.partial_cmp(b).expect("nodata/threshold filtering removes NaN"));
		let n = sorted.len();
		let sum: f64 = sorted.iter().sum();
		let mean = sum / n as f64;
		let median = if n % 2 == 0 {
			(sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
		} else {
			sorted[n / 2]
		};
		let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
		ExtractionValue::Summary {
			mean,
			median,
			stdev: variance.sqrt(),
			min: sorted[0],
			max: sorted[n - 1],
		}
	}
}

/// Per-polygon, per-raster-source record produced by the feature extractor
/// (spec §3 "Extraction record").
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractionRecord {
	pub crown_id: i64,
	pub species: Option<String>,
	pub raster_source: String,
	/// Band name → extracted value, in the raster's band order.
	pub bands: BTreeMap<String, ExtractionValue>,
}

/// A detected treetop (spec §3 "Treetop record").
#[derive(Clone, Debug, PartialEq)]
pub struct TreetopRecord {
	pub location: Point<f64>,
	pub height: f64,
	pub method: DetectionMethod,
}

/// A delineated crown (spec §3 "Crown record").
#[derive(Clone, Debug, PartialEq)]
pub struct CrownRecord {
	pub polygon: Polygon<f64>,
	pub tree_id: i64,
	/// Maximum CHM value inside the polygon's pixel set.
	pub height: f64,
	pub method: DelineationMethod,
}
