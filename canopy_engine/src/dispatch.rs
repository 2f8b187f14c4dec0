//! Dispatch engine (spec §4.3): runs a pure block function across N
//! synchronized raster inputs and routes its output through one of four
//! aggregation modes.

use crate::partition::CoreHaloIter;
use anyhow::{Result, bail};
use canopy_core::{Aggregation, CanopyError, ProcessingMode, RasterEnvelope, RasterSource, TileWindow, determine_strategy};
use ndarray::Array3;
use std::collections::BTreeMap;

/// A named raster input: either a path-backed source or an already-loaded
/// envelope. The explicit sum type replaces the source's runtime "path or
/// envelope, probed at call time" decorator pattern with a single
/// construction-time choice (Design Note §9).
pub enum RasterInput<'a> {
	Source(&'a dyn RasterSource),
	Envelope(RasterEnvelope),
}

impl RasterInput<'_> {
	fn header(&self) -> canopy_core::RasterHeader {
		match self {
			RasterInput::Source(source) => source.header(),
			RasterInput::Envelope(envelope) => canopy_core::RasterHeader {
				bands: envelope.bands_count(),
				height: envelope.height(),
				width: envelope.width(),
				bytes_per_sample: 8,
				block_structure: canopy_core::BlockStructure::Blocked {
					block_size: envelope.width().max(envelope.height()),
				},
			},
		}
	}

	fn load_whole(&self) -> Result<Array3<f64>> {
		match self {
			RasterInput::Source(source) => source.read_window(
				TileWindow {
					x_min: 0,
					x_max: source.header().width,
					y_min: 0,
					y_max: source.header().height,
				},
				None,
			),
			RasterInput::Envelope(envelope) => Ok(envelope.data().clone()),
		}
	}
}

/// The combined result of a dispatch run, shaped by the requested
/// [`Aggregation`].
pub enum DispatchOutput {
	/// [`Aggregation::Stitch`]: tiles were written to the sink as they
	/// were produced; nothing further to return.
	Stitched,
	/// [`Aggregation::Collect`]: every tile's window and output array, in
	/// visitation order.
	Collected(Vec<(TileWindow, Array3<f64>)>),
	/// [`Aggregation::Reduce`]: the final folded accumulator.
	Reduced(Array3<f64>),
	/// [`Aggregation::None`]: the stream was drained for its side effects
	/// only.
	Discarded,
}

/// Runs `block_fn` over synchronized windows of `inputs`, keyed by name,
/// aggregating its output per `aggregation` (spec §4.3).
///
/// `primary` names the input used to pick the dispatch strategy and drive
/// the tile grid; all other inputs must be co-registered with it (same
/// transform, same dimensions) or a window mismatch will surface as
/// [`CanopyError::GridMismatch`].
pub struct DispatchConfig {
	pub tile_size: usize,
	pub overlap: usize,
	pub user_mode: Option<ProcessingMode>,
	pub available_bytes: u64,
}

pub fn dispatch<'a>(
	inputs: &BTreeMap<String, RasterInput<'a>>,
	primary: &str,
	config: &DispatchConfig,
	mut block_fn: impl FnMut(&BTreeMap<String, Array3<f64>>) -> Result<Array3<f64>>,
	aggregation: Aggregation,
	mut sink: Option<&mut dyn RasterSource>,
	mut reducer: Option<impl FnMut(Array3<f64>, Array3<f64>) -> Result<Array3<f64>>>,
) -> Result<DispatchOutput> {
	let primary_input = inputs
		.get(primary)
		.ok_or_else(|| CanopyError::InputNotFound(primary.to_string()))?;
	let header = primary_input.header();
	let report = determine_strategy(&header, config.available_bytes, config.user_mode)?;

	if report.mode == ProcessingMode::InMemory {
		let mut tiles = BTreeMap::new();
		for (name, input) in inputs {
			tiles.insert(name.clone(), input.load_whole()?);
		}
		let output = block_fn(&tiles)?;
		return aggregate_single(output, header.width, header.height, aggregation, sink.as_deref_mut(), reducer.as_mut());
	}

	let RasterInput::Source(primary_source) = primary_input else {
		bail!("only a path-backed primary input supports BLOCKED/TILED dispatch");
	};

	let tile_size = match report.mode {
		ProcessingMode::Tiled { tile_size } => tile_size,
		_ => config.tile_size,
	};

	let mut others: Vec<(&String, &dyn RasterSource)> = Vec::new();
	for (name, input) in inputs {
		if name == primary {
			continue;
		}
		let RasterInput::Source(source) = input else {
			bail!("co-registered input '{name}' must be path-backed for streaming dispatch");
		};
		let other_header = source.header();
		if other_header.width != header.width || other_header.height != header.height {
			return Err(CanopyError::GridMismatch(format!(
				"input '{name}' is {}x{} but primary '{primary}' is {}x{}",
				other_header.width, other_header.height, header.width, header.height
			))
			.into());
		}
		others.push((name, *source));
	}

	let mut primary_iter = CoreHaloIter::new(*primary_source, tile_size, config.overlap);
	let mut other_iters: Vec<(String, CoreHaloIter)> = others
		.into_iter()
		.map(|(name, source)| (name.clone(), CoreHaloIter::new(source, tile_size, config.overlap)))
		.collect();

	let mut collected = Vec::new();
	let mut accumulator: Option<Array3<f64>> = None;

	loop {
		let primary_visit = primary_iter.next();
		let mut other_visits = Vec::with_capacity(other_iters.len());
		for (name, iter) in &mut other_iters {
			other_visits.push((name.clone(), iter.next()));
		}

		let Some(primary_visit) = primary_visit else {
			if other_visits.iter().any(|(_, v)| v.is_some()) {
				return Err(CanopyError::GridMismatch("a co-registered input yielded more tiles than the primary".to_string()).into());
			}
			break;
		};
		let primary_visit = primary_visit?;

		let mut tiles = BTreeMap::new();
		tiles.insert(primary.to_string(), primary_visit.array);
		for (name, visit) in other_visits {
			let visit = visit.ok_or_else(|| CanopyError::GridMismatch(format!("input '{name}' ended before the primary stream")))?;
			let visit = visit?;
			if visit.core_box != primary_visit.core_box {
				return Err(CanopyError::GridMismatch(format!("input '{name}' produced a core box that does not match the primary")).into());
			}
			tiles.insert(name, visit.array);
		}

		let output = block_fn(&tiles)?;
		let core_local = crop_to_core(&output, &primary_visit.core_in_read)?;

		match aggregation {
			Aggregation::Stitch => {
				let sink = sink.as_deref_mut().ok_or_else(|| CanopyError::KernelFailure("STITCH aggregation requires an output sink".to_string()))?;
				sink.write_window(primary_visit.core_window, &core_local)?;
			}
			Aggregation::Collect => {
				collected.push((primary_visit.core_window, core_local));
			}
			Aggregation::Reduce => {
				let reducer = reducer.as_mut().ok_or_else(|| CanopyError::KernelFailure("REDUCE aggregation requires a reducer".to_string()))?;
				accumulator = Some(match accumulator.take() {
					Some(acc) => reducer(acc, output)?,
					None => output,
				});
			}
			Aggregation::None => {}
		}
	}

	Ok(match aggregation {
		Aggregation::Stitch => DispatchOutput::Stitched,
		Aggregation::Collect => DispatchOutput::Collected(collected),
		Aggregation::Reduce => DispatchOutput::Reduced(accumulator.ok_or_else(|| anyhow::anyhow!("REDUCE aggregation produced no tiles"))?),
		Aggregation::None => DispatchOutput::Discarded,
	})
}

/// Crops a kernel's full read-box-shaped output down to just the core
/// region, per `core_window`'s offset within the read array.
fn crop_to_core(output: &Array3<f64>, core_window: &TileWindow) -> Result<Array3<f64>> {
	if output.shape()[1] == core_window.height() && output.shape()[2] == core_window.width() {
		return Ok(output.clone());
	}
	Ok(output
		.slice(ndarray::s![.., core_window.y_min..core_window.y_max, core_window.x_min..core_window.x_max])
		.to_owned())
}

fn aggregate_single(
	output: Array3<f64>,
	width: usize,
	height: usize,
	aggregation: Aggregation,
	sink: Option<&mut dyn RasterSource>,
	mut reducer: Option<impl FnMut(Array3<f64>, Array3<f64>) -> Result<Array3<f64>>>,
) -> Result<DispatchOutput> {
	match aggregation {
		Aggregation::Stitch => {
			let sink = sink.ok_or_else(|| CanopyError::KernelFailure("STITCH aggregation requires an output sink".to_string()))?;
			sink.write_window(
				TileWindow { x_min: 0, x_max: width, y_min: 0, y_max: height },
				&output,
			)?;
			Ok(DispatchOutput::Stitched)
		}
		Aggregation::Collect => Ok(DispatchOutput::Collected(vec![(
			TileWindow { x_min: 0, x_max: width, y_min: 0, y_max: height },
			output,
		)])),
		Aggregation::Reduce => {
			let _ = &mut reducer;
			Ok(DispatchOutput::Reduced(output))
		}
		Aggregation::None => Ok(DispatchOutput::Discarded),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::MemoryRasterSource;

	#[test]
	fn in_memory_mode_calls_block_fn_once() {
		let a = MemoryRasterSource::constant(1, 4, 4, 10.0);
		let b = MemoryRasterSource::constant(1, 4, 4, 3.0);
		let mut inputs: BTreeMap<String, RasterInput> = BTreeMap::new();
		inputs.insert("a".to_string(), RasterInput::Source(&a));
		inputs.insert("b".to_string(), RasterInput::Source(&b));

		let config = DispatchConfig {
			tile_size: 2,
			overlap: 0,
			user_mode: Some(ProcessingMode::InMemory),
			available_bytes: 8 * 1024 * 1024 * 1024,
		};

		let mut calls = 0;
		let result = dispatch(
			&inputs,
			"a",
			&config,
			|tiles| {
				calls += 1;
				Ok(tiles["a"].clone() - tiles["b"].clone())
			},
			Aggregation::Collect,
			None,
			None::<fn(Array3<f64>, Array3<f64>) -> Result<Array3<f64>>>,
		)
		.unwrap();

		assert_eq!(calls, 1);
		let DispatchOutput::Collected(tiles) = result else { panic!("expected Collected") };
		assert_eq!(tiles.len(), 1);
		assert_eq!(tiles[0].1[[0, 0, 0]], 7.0);
	}

	#[test]
	fn grid_mismatch_on_differently_sized_co_registered_input() {
		let a = MemoryRasterSource::constant(1, 8, 8, 1.0);
		let b = MemoryRasterSource::constant(1, 4, 4, 1.0);
		let mut inputs: BTreeMap<String, RasterInput> = BTreeMap::new();
		inputs.insert("a".to_string(), RasterInput::Source(&a));
		inputs.insert("b".to_string(), RasterInput::Source(&b));

		let config = DispatchConfig {
			tile_size: 4,
			overlap: 0,
			user_mode: Some(ProcessingMode::Tiled { tile_size: 4 }),
			available_bytes: 8 * 1024 * 1024 * 1024,
		};

		let err = dispatch(
			&inputs,
			"a",
			&config,
			|tiles| Ok(tiles["a"].clone()),
			Aggregation::None,
			None,
			None::<fn(Array3<f64>, Array3<f64>) -> Result<Array3<f64>>>,
		)
		.unwrap_err();
		let kind = err.downcast_ref::<CanopyError>().expect("tagged error");
		assert!(matches!(kind, CanopyError::GridMismatch(_)));
	}
}
