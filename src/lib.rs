// Library exports for testing and reuse

pub mod algorithm;
pub mod bands;
pub mod blocks;
pub mod cli;
pub mod composite;
pub mod error;
pub mod expr;
pub mod io;
pub mod selection;

// Re-export commonly used types
pub use algorithm::Algorithm;
pub use bands::BandMap;
pub use blocks::{plan, BlockGrid, BlockWindow};
pub use composite::{composite, prepare, run, RunSummary};
pub use error::{CompositeError, ErrorKind, Result};
pub use expr::{Criterion, FunctionTable};
pub use io::{GdalSink, GdalSource, RasterDescriptor, RasterSink, RasterSource};
