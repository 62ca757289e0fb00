use crate::blocks::BlockWindow;
use thiserror::Error;

/// Broad classes of failure a caller may want to report differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad band mapping or criterion expression; raised before any I/O.
    Configuration,
    /// Inputs disagree on shape, type, band count or block layout.
    Precondition,
    /// A read or write against a raster failed.
    Io,
}

#[derive(Error, Debug)]
pub enum CompositeError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Array shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        source: gdal::errors::GdalError,
    },

    #[error("Failed to read {path} at {window}: {reason}")]
    Read {
        path: String,
        window: BlockWindow,
        reason: String,
    },

    #[error("Failed to write band {band} at {window}: {reason}")]
    Write {
        band: usize,
        window: BlockWindow,
        reason: String,
    },

    #[error("Must specify either an algorithm or an expression")]
    MissingCriterion,

    #[error("Invalid band specification '{0}' (expected NAME=INDEX)")]
    InvalidBandSpec(String),

    #[error("Band '{name}' has invalid index '{value}' (must be an integer >= 1)")]
    InvalidBandIndex { name: String, value: String },

    #[error("Expression references unknown band '{0}'")]
    UnknownBand(String),

    #[error("Band '{name}' maps to index {index} but inputs only have {count} bands")]
    BandOutOfRange {
        name: String,
        index: usize,
        count: usize,
    },

    #[error("Expression parse error at byte {pos}: {message}")]
    Parse { pos: usize, message: String },

    #[error("Unsupported function '{name}' at byte {pos}")]
    UnsupportedFunction { name: String, pos: usize },

    #[error("Expression must be a single selection (max, min or median) at the outermost level")]
    NotASelection,

    #[error("Selection '{0}' may only appear as the outermost function")]
    NestedSelection(String),

    #[error("Function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },

    #[error("Invalid creation option '{0}' (expected KEY=VALUE)")]
    InvalidCreationOption(String),

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("No input rasters given")]
    NoInputs,

    #[error("All inputs must share one block layout: {0}")]
    BlockLayoutMismatch(String),

    #[error("Invalid block shape: {0}x{1}")]
    InvalidBlockShape(usize, usize),

    #[error("Input {path} does not match the first input: {detail}")]
    InputMismatch { path: String, detail: String },

    #[error("Input raster has invalid dimensions: {0}x{1}")]
    InvalidDimensions(usize, usize),

    #[error("Block data for {window} has shape {rows}x{cols}")]
    InvalidBlockData {
        window: BlockWindow,
        rows: usize,
        cols: usize,
    },
}

impl CompositeError {
    pub fn kind(&self) -> ErrorKind {
        use CompositeError::*;
        match self {
            MissingCriterion
            | InvalidBandSpec(_)
            | InvalidBandIndex { .. }
            | UnknownBand(_)
            | BandOutOfRange { .. }
            | Parse { .. }
            | UnsupportedFunction { .. }
            | NotASelection
            | NestedSelection(_)
            | Arity { .. }
            | InvalidCreationOption(_)
            | ThreadPool(_) => ErrorKind::Configuration,
            NoInputs
            | BlockLayoutMismatch(_)
            | InvalidBlockShape(..)
            | InputMismatch { .. }
            | InvalidDimensions(..) => ErrorKind::Precondition,
            Gdal(_) | ShapeError(_) | Open { .. } | Read { .. } | Write { .. }
            | InvalidBlockData { .. } => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, CompositeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            CompositeError::UnknownBand("swir3".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            CompositeError::BlockLayoutMismatch("256x256 vs 1x512".into()).kind(),
            ErrorKind::Precondition
        );
        let err = CompositeError::Read {
            path: "a.tif".into(),
            window: BlockWindow::new(0, 0, 4, 4),
            reason: "truncated".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_messages_carry_context() {
        let err = CompositeError::Read {
            path: "scene_2.tif".into(),
            window: BlockWindow::new(256, 512, 256, 256),
            reason: "truncated".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("scene_2.tif"));
        assert!(msg.contains("row 256"));
    }
}
