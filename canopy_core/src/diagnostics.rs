//! Diagnostics capability (spec §3 "Logging & diagnostics").
//!
//! Modeled on the teacher's progress-reporting trait: rather than a global
//! mutable counter, callers that need to observe non-fatal skips pass in a
//! `&dyn Diagnostics` implementation. Production code logs through the
//! [`log`] facade *and* increments the capability; tests can hand in a
//! [`CountingDiagnostics`] and assert on the tallies directly.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A category of non-fatal event a kernel or the extractor may skip over
/// instead of failing the whole run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SkipKind {
	/// A feature geometry was invalid but repaired successfully.
	GeometryRepaired,
	/// A feature geometry was invalid and could not be repaired; dropped.
	GeometryDropped,
	/// A polygon rasterized to an empty pixel mask; dropped.
	EmptyMask,
	/// A vector or raster input was reprojected to reconcile a CRS mismatch.
	CrsReprojected,
	/// A treetop candidate was rejected by the minimum-distance suppression.
	TreetopSuppressed,
}

impl fmt::Display for SkipKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			SkipKind::GeometryRepaired => "geometry_repaired",
			SkipKind::GeometryDropped => "geometry_dropped",
			SkipKind::EmptyMask => "empty_mask",
			SkipKind::CrsReprojected => "crs_reprojected",
			SkipKind::TreetopSuppressed => "treetop_suppressed",
		};
		f.write_str(s)
	}
}

/// A sink for non-fatal diagnostic events raised during a processing run.
///
/// Implementations must be safe to share across tiles processed in
/// sequence (the dispatch engine holds one instance for the whole run);
/// `&self` methods use interior mutability rather than `&mut self` so a
/// single instance can be threaded through closures without a `RefCell`
/// at every call site.
pub trait Diagnostics: Send + Sync {
	/// Records one occurrence of `kind`, with a human-readable `detail`
	/// (e.g. the feature id or tile index) for log context.
	fn record(&self, kind: SkipKind, detail: &str);

	/// Total occurrences of `kind` recorded so far.
	fn count(&self, kind: SkipKind) -> u64;
}

/// The default [`Diagnostics`] implementation: logs each event through the
/// [`log`] facade at `warn!` and keeps an atomic tally per [`SkipKind`].
#[derive(Default)]
pub struct CountingDiagnostics {
	geometry_repaired: AtomicU64,
	geometry_dropped: AtomicU64,
	empty_mask: AtomicU64,
	crs_reprojected: AtomicU64,
	treetop_suppressed: AtomicU64,
}

impl CountingDiagnostics {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	fn counter(&self, kind: SkipKind) -> &AtomicU64 {
		match kind {
			SkipKind::GeometryRepaired => &self.geometry_repaired,
			SkipKind::GeometryDropped => &self.geometry_dropped,
			SkipKind::EmptyMask => &self.empty_mask,
			SkipKind::CrsReprojected => &self.crs_reprojected,
			SkipKind::TreetopSuppressed => &self.treetop_suppressed,
		}
	}
}

impl Diagnostics for CountingDiagnostics {
	fn record(&self, kind: SkipKind, detail: &str) {
		self.counter(kind).fetch_add(1, Ordering::Relaxed);
		log::warn!("{kind}: {detail}");
	}

	fn count(&self, kind: SkipKind) -> u64 {
		self.counter(kind).load(Ordering::Relaxed)
	}
}

/// A [`Diagnostics`] sink that discards every event. Useful as a default
/// for call sites that don't care to observe skips.
#[derive(Default)]
pub struct NullDiagnostics;

impl Diagnostics for NullDiagnostics {
	fn record(&self, _kind: SkipKind, _detail: &str) {}

	fn count(&self, _kind: SkipKind) -> u64 {
		0
	}
}
