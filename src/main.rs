use clap::Parser;
use env_logger::Env;
use log::{debug, info};

use image_composite::algorithm::criterion_source;
use image_composite::cli::Args;
use image_composite::{bands, composite};
use image_composite::{CompositeError, Criterion, FunctionTable, GdalSink, GdalSource, RasterSource, Result};

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    info!("=== Image Composite ===");

    // Set thread pool size if specified
    if let Some(n_threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()?;
        info!("Using {} threads", n_threads);
    } else {
        info!("Using all available threads");
    }

    // Configuration is checked in full before any raster is opened
    let source = criterion_source(args.algo, args.expr.as_deref())?;
    let criterion = Criterion::parse(&source, &FunctionTable::standard())?;
    let band_map = args.band_map()?;
    debug!(
        "Band map: {:?}",
        band_map.iter().map(|(n, i)| format!("{}={}", n, i)).collect::<Vec<_>>()
    );
    bands::resolve(&band_map, criterion.identifiers())?;

    let inputs = args
        .inputs
        .iter()
        .map(|path| GdalSource::open(path))
        .collect::<Result<Vec<_>>>()?;

    // Band indices past the inputs' band count fail before the output exists
    let grid = composite::prepare(&inputs, &band_map, &criterion)?;

    let template = inputs.first().ok_or(CompositeError::NoInputs)?.descriptor();
    info!(
        "Raster size: {}x{}, {} bands, {:?}",
        template.rows, template.cols, template.band_count, template.data_type
    );

    info!("Writing output: {}", args.output);
    let mut sink = GdalSink::create(&args.output, &args.format, template, &args.creation_options)?;
    composite::run(&inputs, &mut sink, &band_map, &criterion, &grid)?;

    info!("=== Done! ===");
    Ok(())
}
