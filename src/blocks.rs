use crate::error::{CompositeError, Result};
use crate::io::RasterDescriptor;
use log::{debug, warn};
use std::fmt;

/// One tile of the raster extent, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWindow {
    pub row_off: usize,
    pub col_off: usize,
    pub rows: usize,
    pub cols: usize,
}

impl BlockWindow {
    pub fn new(row_off: usize, col_off: usize, rows: usize, cols: usize) -> Self {
        Self {
            row_off,
            col_off,
            rows,
            cols,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// GDAL window offset, (x, y)
    pub fn offset_xy(&self) -> (isize, isize) {
        (self.col_off as isize, self.row_off as isize)
    }

    /// GDAL window size, (x, y)
    pub fn size_xy(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }
}

impl fmt::Display for BlockWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "window (row {}, col {}, {}x{})",
            self.row_off, self.col_off, self.rows, self.cols
        )
    }
}

#[derive(Debug)]
pub struct BlockGrid {
    raster_rows: usize,
    raster_cols: usize,
    block_rows: usize,
    block_cols: usize,
    pub num_blocks_x: usize,
    pub num_blocks_y: usize,
    pub total_blocks: usize,
}

impl BlockGrid {
    pub fn new(
        raster_rows: usize,
        raster_cols: usize,
        block_rows: usize,
        block_cols: usize,
    ) -> Result<Self> {
        if block_rows == 0 || block_cols == 0 {
            return Err(CompositeError::InvalidBlockShape(block_rows, block_cols));
        }

        // Ceiling division; edge blocks are clipped to the extent
        let num_blocks_x = (raster_cols + block_cols - 1) / block_cols;
        let num_blocks_y = (raster_rows + block_rows - 1) / block_rows;
        let total_blocks = num_blocks_x * num_blocks_y;

        debug!(
            "BlockGrid: {}x{} raster, block={}x{} → {}x{} blocks ({} total)",
            raster_rows, raster_cols, block_rows, block_cols, num_blocks_y, num_blocks_x, total_blocks
        );

        Ok(Self {
            raster_rows,
            raster_cols,
            block_rows,
            block_cols,
            num_blocks_x,
            num_blocks_y,
            total_blocks,
        })
    }

    pub fn block_shape(&self) -> (usize, usize) {
        (self.block_rows, self.block_cols)
    }

    pub fn iter(&self) -> BlockIterator<'_> {
        BlockIterator::new(self)
    }

    pub fn window(&self, block_idx: usize) -> BlockWindow {
        // Row-major tile order
        let block_y = block_idx / self.num_blocks_x;
        let block_x = block_idx % self.num_blocks_x;

        let row_off = block_y * self.block_rows;
        let col_off = block_x * self.block_cols;
        let row_end = ((block_y + 1) * self.block_rows).min(self.raster_rows);
        let col_end = ((block_x + 1) * self.block_cols).min(self.raster_cols);

        BlockWindow::new(row_off, col_off, row_end - row_off, col_end - col_off)
    }
}

pub struct BlockIterator<'a> {
    grid: &'a BlockGrid,
    current_idx: usize,
}

impl<'a> BlockIterator<'a> {
    fn new(grid: &'a BlockGrid) -> Self {
        Self {
            grid,
            current_idx: 0,
        }
    }
}

impl<'a> Iterator for BlockIterator<'a> {
    type Item = (usize, BlockWindow);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_idx < self.grid.total_blocks {
            let window = self.grid.window(self.current_idx);
            let idx = self.current_idx;
            self.current_idx += 1;
            Some((idx, window))
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.grid.total_blocks - self.current_idx;
        (left, Some(left))
    }
}

impl ExactSizeIterator for BlockIterator<'_> {}

/// Derive the shared block grid for a set of inputs.
///
/// Every band of every input must report the same block shape, and the
/// inputs must agree on extent, band count and pixel type. Nothing is read.
pub fn plan(descriptors: &[(String, RasterDescriptor)]) -> Result<BlockGrid> {
    let (first_path, first) = descriptors.first().ok_or(CompositeError::NoInputs)?;

    if first.rows == 0 || first.cols == 0 {
        return Err(CompositeError::InvalidDimensions(first.rows, first.cols));
    }

    let block_shape = first.block_shape().ok_or_else(|| {
        CompositeError::BlockLayoutMismatch(format!(
            "bands of {} have differing block shapes {:?}",
            first_path, first.block_shapes
        ))
    })?;

    for (path, desc) in &descriptors[1..] {
        if (desc.rows, desc.cols) != (first.rows, first.cols) {
            return Err(CompositeError::InputMismatch {
                path: path.clone(),
                detail: format!(
                    "size {}x{} differs from {}x{}",
                    desc.rows, desc.cols, first.rows, first.cols
                ),
            });
        }
        if desc.band_count != first.band_count {
            return Err(CompositeError::InputMismatch {
                path: path.clone(),
                detail: format!(
                    "{} bands, expected {}",
                    desc.band_count, first.band_count
                ),
            });
        }
        if desc.data_type != first.data_type {
            return Err(CompositeError::InputMismatch {
                path: path.clone(),
                detail: format!(
                    "pixel type {:?}, expected {:?}",
                    desc.data_type, first.data_type
                ),
            });
        }
        match desc.block_shape() {
            Some(shape) if shape == block_shape => {}
            _ => {
                return Err(CompositeError::BlockLayoutMismatch(format!(
                    "{} has block shapes {:?}, {} has {:?}",
                    path, desc.block_shapes, first_path, block_shape
                )));
            }
        }
        if desc.geotransform != first.geotransform {
            warn!(
                "Geotransform of {} differs from {}; inputs are assumed co-registered",
                path, first_path
            );
        }
    }

    BlockGrid::new(first.rows, first.cols, block_shape.0, block_shape.1)
}
