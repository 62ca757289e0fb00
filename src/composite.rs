//! Block-wise compositing.
//!
//! For every block window the inputs are stacked along an image axis, the
//! criterion picks a winning image per pixel, and every output band of that
//! pixel is copied from the winner. Bands of one pixel are never mixed
//! across images.

use crate::bands::{self, ActiveBands, BandMap};
use crate::blocks::{self, BlockGrid, BlockWindow};
use crate::error::{CompositeError, Result};
use crate::expr::Criterion;
use crate::io::{RasterSink, RasterSource};
use crate::selection::WinnerMap;
use log::{debug, info};
use ndarray::{Array2, Array3, Array4, ArrayView3, Axis, Zip};
use std::collections::HashMap;

/// What a finished run produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub blocks: usize,
    pub pixels: usize,
    /// Pixels whose criterion bands are nodata in every input, written as
    /// the fill value
    pub empty_pixels: usize,
}

/// Input blocks stacked as `(image, band, row, col)`.
pub struct StackedBlock {
    pub data: Array4<f64>,
    /// true = nodata
    pub mask: Array4<bool>,
}

impl StackedBlock {
    /// Read `window` from every input, in input order.
    pub fn read<S: RasterSource>(inputs: &[S], window: &BlockWindow) -> Result<Self> {
        let band_count = inputs.first().map_or(0, |s| s.descriptor().band_count);
        let (rows, cols) = window.shape();
        let shape = (inputs.len(), band_count, rows, cols);

        let mut data = Array4::zeros(shape);
        let mut mask = Array4::from_elem(shape, false);

        for (j, src) in inputs.iter().enumerate() {
            let block = src.read_block(window)?;
            if block.data.dim() != (band_count, rows, cols) || block.mask.dim() != block.data.dim() {
                return Err(CompositeError::Read {
                    path: src.path().to_string(),
                    window: *window,
                    reason: format!(
                        "got block of shape {:?}, expected {:?}",
                        block.data.dim(),
                        (band_count, rows, cols)
                    ),
                });
            }
            data.index_axis_mut(Axis(0), j).assign(&block.data);
            mask.index_axis_mut(Axis(0), j).assign(&block.mask);
        }

        Ok(Self { data, mask })
    }

    /// `(image, row, col)` values of one band with masked pixels as NaN.
    pub fn band_values(&self, offset: usize) -> Array3<f64> {
        let mut values = self.data.index_axis(Axis(1), offset).to_owned();
        Zip::from(&mut values)
            .and(self.mask.index_axis(Axis(1), offset))
            .for_each(|v, &masked| {
                if masked {
                    *v = f64::NAN;
                }
            });
        values
    }

    /// Criterion input for the bands the expression reads.
    pub fn criterion_slices(&self, active: &ActiveBands) -> HashMap<String, Array3<f64>> {
        active
            .iter()
            .map(|(name, offset)| (name.to_string(), self.band_values(offset)))
            .collect()
    }

    /// First image per pixel whose active bands are all unmasked.
    pub fn first_valid_image(&self, active: &ActiveBands) -> WinnerMap {
        let (images, _, rows, cols) = self.data.dim();
        let offsets: Vec<usize> = active.iter().map(|(_, offset)| offset).collect();
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            (0..images).find(|&i| offsets.iter().all(|&b| !self.mask[[i, b, r, c]]))
        })
    }

    /// `output[band, r, c] = data[winner[r, c], band, r, c]`; pixels without
    /// a winner get `fills[band]`.
    pub fn gather(&self, winners: &WinnerMap, fills: &[f64]) -> Array3<f64> {
        let (_, band_count, rows, cols) = self.data.dim();
        let mut output = Array3::zeros((band_count, rows, cols));

        for (b, out_band) in output.axis_iter_mut(Axis(0)).enumerate() {
            let fill = fills.get(b).copied().unwrap_or(f64::NAN);
            let src_band = self.data.index_axis(Axis(1), b);
            Zip::indexed(out_band)
                .and(winners)
                .par_for_each(|(r, c), out, winner| {
                    *out = match *winner {
                        Some(img) => src_band[[img, r, c]],
                        None => fill,
                    };
                });
        }
        output
    }
}

/// Evaluate the criterion for one stacked block.
///
/// A pixel is left without a winner only when its criterion bands are
/// nodata in every image. Where the criterion itself is NaN everywhere
/// (e.g. 0/0) the first image with valid data wins.
pub fn winners_for_block(
    stack: &StackedBlock,
    active: &ActiveBands,
    criterion: &Criterion,
) -> Result<WinnerMap> {
    let slices = stack.criterion_slices(active);
    let views: HashMap<String, ArrayView3<'_, f64>> =
        slices.iter().map(|(k, v)| (k.clone(), v.view())).collect();

    let (images, _, rows, cols) = stack.data.dim();
    let mut winners = criterion.evaluate((images, rows, cols), &views)?;

    if winners.iter().any(Option::is_none) {
        let fallback = stack.first_valid_image(active);
        Zip::from(&mut winners)
            .and(&fallback)
            .for_each(|winner, &first_valid| {
                if winner.is_none() {
                    *winner = first_valid;
                }
            });
    }
    Ok(winners)
}

/// Composite `inputs` into `sink` over the windows of `grid`.
///
/// Band resolution happens before the first read; any read or write failure
/// aborts the run and the sink is not closed.
pub fn run<S: RasterSource, K: RasterSink>(
    inputs: &[S],
    sink: &mut K,
    band_map: &BandMap,
    criterion: &Criterion,
    grid: &BlockGrid,
) -> Result<RunSummary> {
    let first = inputs.first().ok_or(CompositeError::NoInputs)?.descriptor();

    let active = bands::resolve(band_map, criterion.identifiers())?;
    active.check_band_count(first.band_count)?;
    debug!(
        "Criterion bands: {:?}",
        active.iter().map(|(n, o)| format!("{}={}", n, o + 1)).collect::<Vec<_>>()
    );

    let fills = first.fill_values();
    let mut summary = RunSummary::default();

    info!(
        "Compositing {} inputs over {} blocks ({}x{})",
        inputs.len(),
        grid.total_blocks,
        grid.block_shape().0,
        grid.block_shape().1
    );

    for (idx, window) in grid.iter() {
        let stack = StackedBlock::read(inputs, &window)?;
        let winners = winners_for_block(&stack, &active, criterion)?;
        let composite = stack.gather(&winners, &fills);

        for (b, band) in composite.axis_iter(Axis(0)).enumerate() {
            sink.write_band(b + 1, &window, band)?;
        }

        let empty = winners.iter().filter(|w| w.is_none()).count();
        summary.blocks += 1;
        summary.pixels += window.rows * window.cols;
        summary.empty_pixels += empty;

        debug!("Block {} {} done ({} empty pixels)", idx, window, empty);
    }

    sink.close()?;

    info!(
        "Composited {} pixels in {} blocks ({} without a valid candidate)",
        summary.pixels, summary.blocks, summary.empty_pixels
    );
    Ok(summary)
}

/// Everything that can be checked without reading pixels: the shared block
/// grid and the criterion bands against the inputs' band count. Must pass
/// before an output is created.
pub fn prepare<S: RasterSource>(
    inputs: &[S],
    band_map: &BandMap,
    criterion: &Criterion,
) -> Result<BlockGrid> {
    let descriptors: Vec<(String, _)> = inputs
        .iter()
        .map(|s| (s.path().to_string(), s.descriptor().clone()))
        .collect();
    let grid = blocks::plan(&descriptors)?;

    let band_count = inputs.first().ok_or(CompositeError::NoInputs)?.descriptor().band_count;
    bands::resolve(band_map, criterion.identifiers())?.check_band_count(band_count)?;
    Ok(grid)
}

/// Check the inputs, plan their shared block grid and run.
pub fn composite<S: RasterSource, K: RasterSink>(
    inputs: &[S],
    sink: &mut K,
    band_map: &BandMap,
    criterion: &Criterion,
) -> Result<RunSummary> {
    let grid = prepare(inputs, band_map, criterion)?;
    run(inputs, sink, band_map, criterion, &grid)
}
