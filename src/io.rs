use crate::blocks::{self, BlockGrid, BlockWindow};
use crate::error::{CompositeError, Result};
use gdal::cpl::CslStringList;
use gdal::raster::{Buffer, GdalDataType, RasterBand};
use gdal::{Dataset, Driver, DriverManager};
use log::{debug, info, warn};
use ndarray::{s, Array3, ArrayView2, Axis, Zip};
use std::cell::Cell;

#[derive(Debug, Clone, PartialEq)]
pub struct RasterDescriptor {
    pub rows: usize,
    pub cols: usize,
    pub band_count: usize,
    pub data_type: GdalDataType,
    /// Nodata value of each band
    pub nodata: Vec<Option<f64>>,
    /// Native block shape of each band, (rows, cols)
    pub block_shapes: Vec<(usize, usize)>,
    pub geotransform: Option<[f64; 6]>,
    pub projection: String,
}

impl RasterDescriptor {
    /// The block shape shared by every band, if there is one.
    pub fn block_shape(&self) -> Option<(usize, usize)> {
        let first = *self.block_shapes.first()?;
        self.block_shapes
            .iter()
            .all(|&shape| shape == first)
            .then_some(first)
    }

    /// Value written where a pixel has no winner, per band. Bands without
    /// nodata use NaN for float types and the type's far end for integers.
    pub fn fill_values(&self) -> Vec<f64> {
        (0..self.band_count)
            .map(|b| {
                self.nodata
                    .get(b)
                    .copied()
                    .flatten()
                    .unwrap_or_else(|| default_fill(self.data_type))
            })
            .collect()
    }
}

/// Fill for bands that declare no nodata: type maximum for unsigned
/// integers, type minimum for signed ones, NaN for floats.
pub fn default_fill(data_type: GdalDataType) -> f64 {
    match data_type {
        GdalDataType::UInt8 => u8::MAX as f64,
        GdalDataType::UInt16 => u16::MAX as f64,
        GdalDataType::UInt32 => u32::MAX as f64,
        GdalDataType::Int16 => i16::MIN as f64,
        GdalDataType::Int32 => i32::MIN as f64,
        _ => f64::NAN,
    }
}

/// One block of one raster, `(band, row, col)`, with `mask` true where the
/// value is nodata.
#[derive(Debug, Clone)]
pub struct MaskedBlock {
    pub data: Array3<f64>,
    pub mask: Array3<bool>,
}

impl MaskedBlock {
    /// Mask NaN and each band's own nodata value.
    pub fn from_data(data: Array3<f64>, nodata: &[Option<f64>]) -> Self {
        let mut mask = data.mapv(f64::is_nan);
        for (b, (band_mask, band)) in mask
            .axis_iter_mut(Axis(0))
            .zip(data.axis_iter(Axis(0)))
            .enumerate()
        {
            if let Some(nd) = nodata.get(b).copied().flatten() {
                Zip::from(band_mask)
                    .and(band)
                    .for_each(|m, &v| *m = *m || v == nd);
            }
        }
        Self { data, mask }
    }
}

pub trait RasterSource {
    fn path(&self) -> &str;

    fn descriptor(&self) -> &RasterDescriptor;

    /// Read every band of `window` as `f64`.
    fn read_block(&self, window: &BlockWindow) -> Result<MaskedBlock>;

    /// The native block grid of this raster.
    fn block_windows(&self) -> Result<BlockGrid> {
        blocks::plan(&[(self.path().to_string(), self.descriptor().clone())])
    }
}

pub trait RasterSink {
    /// Write one band (1-based) of an output block.
    fn write_band(&mut self, band: usize, window: &BlockWindow, data: ArrayView2<f64>) -> Result<()>;

    /// Flush everything written so far.
    fn close(&mut self) -> Result<()>;
}

fn check_block_shape(window: &BlockWindow, data: &ArrayView2<f64>) -> Result<()> {
    let (rows, cols) = data.dim();
    if (rows, cols) != window.shape() {
        return Err(CompositeError::InvalidBlockData {
            window: *window,
            rows,
            cols,
        });
    }
    Ok(())
}

/// Describe a dataset without reading pixel data
pub fn describe_dataset(dataset: &Dataset) -> Result<RasterDescriptor> {
    let (cols, rows) = dataset.raster_size();
    if cols == 0 || rows == 0 {
        return Err(CompositeError::InvalidDimensions(rows, cols));
    }

    let band_count = dataset.raster_count() as usize;
    let mut block_shapes = Vec::with_capacity(band_count);
    let mut nodata = Vec::with_capacity(band_count);
    let mut data_type = GdalDataType::Unknown;

    for band_index in 1..=band_count {
        let rasterband: RasterBand = dataset.rasterband(band_index)?;
        let (block_x, block_y) = rasterband.block_size();
        block_shapes.push((block_y, block_x));
        nodata.push(rasterband.no_data_value());

        if band_index == 1 {
            data_type = rasterband.band_type();
        }
    }

    Ok(RasterDescriptor {
        rows,
        cols,
        band_count,
        data_type,
        nodata,
        block_shapes,
        geotransform: dataset.geo_transform().ok(),
        projection: dataset.projection(),
    })
}

pub struct GdalSource {
    path: String,
    dataset: Dataset,
    descriptor: RasterDescriptor,
}

impl GdalSource {
    pub fn open(path: &str) -> Result<Self> {
        info!("Opening input raster: {}", path);
        let dataset = Dataset::open(path).map_err(|source| CompositeError::Open {
            path: path.to_string(),
            source,
        })?;
        let descriptor = describe_dataset(&dataset)?;

        debug!(
            "{}: {}x{}, {} bands, {:?}, blocks {:?}",
            path,
            descriptor.rows,
            descriptor.cols,
            descriptor.band_count,
            descriptor.data_type,
            descriptor.block_shapes
        );

        Ok(Self {
            path: path.to_string(),
            dataset,
            descriptor,
        })
    }
}

impl RasterSource for GdalSource {
    fn path(&self) -> &str {
        &self.path
    }

    fn descriptor(&self) -> &RasterDescriptor {
        &self.descriptor
    }

    fn read_block(&self, window: &BlockWindow) -> Result<MaskedBlock> {
        let read_err = |e: gdal::errors::GdalError| CompositeError::Read {
            path: self.path.clone(),
            window: *window,
            reason: e.to_string(),
        };

        let (rows, cols) = window.shape();
        let mut data_vec: Vec<f64> = Vec::with_capacity(self.descriptor.band_count * rows * cols);

        for band_index in 1..=self.descriptor.band_count {
            let rasterband = self.dataset.rasterband(band_index).map_err(read_err)?;
            let buffer = rasterband
                .read_as::<f64>(window.offset_xy(), window.size_xy(), window.size_xy(), None)
                .map_err(read_err)?;
            data_vec.extend_from_slice(buffer.data());
        }

        let data = Array3::from_shape_vec((self.descriptor.band_count, rows, cols), data_vec)?;
        Ok(MaskedBlock::from_data(data, &self.descriptor.nodata))
    }
}

/// Parse `KEY=VALUE` creation options for the output driver
pub fn creation_options(options: &[String]) -> Result<CslStringList> {
    let mut list = CslStringList::new();
    for opt in options {
        match opt.split_once('=') {
            Some((key, _)) if !key.trim().is_empty() => list.add_string(opt)?,
            _ => return Err(CompositeError::InvalidCreationOption(opt.clone())),
        }
    }
    Ok(list)
}

fn create_typed(
    driver: &Driver,
    path: &str,
    template: &RasterDescriptor,
    options: &CslStringList,
) -> Result<Dataset> {
    let (w, h, n) = (template.cols, template.rows, template.band_count);
    let dataset = match template.data_type {
        GdalDataType::UInt8 => driver.create_with_band_type_with_options::<u8, _>(path, w, h, n, options)?,
        GdalDataType::UInt16 => driver.create_with_band_type_with_options::<u16, _>(path, w, h, n, options)?,
        GdalDataType::Int16 => driver.create_with_band_type_with_options::<i16, _>(path, w, h, n, options)?,
        GdalDataType::UInt32 => driver.create_with_band_type_with_options::<u32, _>(path, w, h, n, options)?,
        GdalDataType::Int32 => driver.create_with_band_type_with_options::<i32, _>(path, w, h, n, options)?,
        GdalDataType::Float32 => driver.create_with_band_type_with_options::<f32, _>(path, w, h, n, options)?,
        GdalDataType::Float64 => driver.create_with_band_type_with_options::<f64, _>(path, w, h, n, options)?,
        other => {
            warn!("Pixel type {:?} not supported for output, writing Float64", other);
            driver.create_with_band_type_with_options::<f64, _>(path, w, h, n, options)?
        }
    };
    Ok(dataset)
}

pub struct GdalSink {
    dataset: Dataset,
}

impl GdalSink {
    /// Create the output with the template's size, bands, type and
    /// georeferencing. Every band declares its fill value as nodata.
    pub fn create(
        path: &str,
        format: &str,
        template: &RasterDescriptor,
        options: &[String],
    ) -> Result<Self> {
        info!("Creating output dataset: {} ({})", path, format);

        let driver = DriverManager::get_driver_by_name(format)?;
        let options = creation_options(options)?;
        let mut dataset = create_typed(&driver, path, template, &options)?;

        if let Some(gt) = template.geotransform {
            dataset.set_geo_transform(&gt)?;
        }
        if !template.projection.is_empty() {
            dataset.set_projection(&template.projection)?;
        }
        for (b, fill) in template.fill_values().into_iter().enumerate() {
            if template.nodata.get(b).copied().flatten().is_none() {
                debug!("Band {} has no nodata, declaring {} for empty pixels", b + 1, fill);
            }
            let mut band = dataset.rasterband(b + 1)?;
            band.set_no_data_value(Some(fill))?;
        }

        Ok(Self { dataset })
    }
}

impl RasterSink for GdalSink {
    fn write_band(&mut self, band: usize, window: &BlockWindow, data: ArrayView2<f64>) -> Result<()> {
        check_block_shape(window, &data)?;

        let write_err = |e: gdal::errors::GdalError| CompositeError::Write {
            band,
            window: *window,
            reason: e.to_string(),
        };

        let mut raster_band = self.dataset.rasterband(band).map_err(write_err)?;
        let mut buffer = Buffer::new(window.size_xy(), data.iter().copied().collect());
        raster_band
            .write(window.offset_xy(), window.size_xy(), &mut buffer)
            .map_err(write_err)?;

        debug!("Wrote band {} at {}", band, window);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.dataset.flush_cache()?;
        Ok(())
    }
}

/// In-memory raster, `(band, row, col)`.
pub struct MemRaster {
    path: String,
    descriptor: RasterDescriptor,
    data: Array3<f64>,
    fail_at: Option<BlockWindow>,
    reads: Cell<usize>,
}

impl MemRaster {
    /// Wrap `data` with the given block shape. Pixel type is Float64.
    pub fn new(
        path: impl Into<String>,
        data: Array3<f64>,
        block_shape: (usize, usize),
        nodata: Option<f64>,
    ) -> Self {
        let (band_count, rows, cols) = data.dim();
        let descriptor = RasterDescriptor {
            rows,
            cols,
            band_count,
            data_type: GdalDataType::Float64,
            nodata: vec![nodata; band_count],
            block_shapes: vec![block_shape; band_count],
            geotransform: None,
            projection: String::new(),
        };
        Self {
            path: path.into(),
            descriptor,
            data,
            fail_at: None,
            reads: Cell::new(0),
        }
    }

    /// Make reads of `window` fail.
    pub fn fail_at(mut self, window: BlockWindow) -> Self {
        self.fail_at = Some(window);
        self
    }

    /// Number of block reads served so far.
    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl RasterSource for MemRaster {
    fn path(&self) -> &str {
        &self.path
    }

    fn descriptor(&self) -> &RasterDescriptor {
        &self.descriptor
    }

    fn read_block(&self, window: &BlockWindow) -> Result<MaskedBlock> {
        if self.fail_at == Some(*window) {
            return Err(CompositeError::Read {
                path: self.path.clone(),
                window: *window,
                reason: "simulated read failure".to_string(),
            });
        }
        self.reads.set(self.reads.get() + 1);

        let block = self
            .data
            .slice(s![
                ..,
                window.row_off..window.row_off + window.rows,
                window.col_off..window.col_off + window.cols
            ])
            .to_owned();
        Ok(MaskedBlock::from_data(block, &self.descriptor.nodata))
    }
}

/// In-memory sink collecting the composite, `(band, row, col)`.
pub struct MemSink {
    data: Array3<f64>,
    writes: usize,
    closed: bool,
}

impl MemSink {
    pub fn new(band_count: usize, rows: usize, cols: usize) -> Self {
        Self {
            data: Array3::from_elem((band_count, rows, cols), f64::NAN),
            writes: 0,
            closed: false,
        }
    }

    pub fn for_descriptor(desc: &RasterDescriptor) -> Self {
        Self::new(desc.band_count, desc.rows, desc.cols)
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl RasterSink for MemSink {
    fn write_band(&mut self, band: usize, window: &BlockWindow, data: ArrayView2<f64>) -> Result<()> {
        check_block_shape(window, &data)?;
        if band == 0 || band > self.data.dim().0 {
            return Err(CompositeError::Write {
                band,
                window: *window,
                reason: "band out of range".to_string(),
            });
        }

        self.data
            .slice_mut(s![
                band - 1,
                window.row_off..window.row_off + window.rows,
                window.col_off..window.col_off + window.cols
            ])
            .assign(&data);
        self.writes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
