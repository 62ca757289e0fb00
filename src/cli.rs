use crate::algorithm::Algorithm;
use crate::bands::{self, BandMap};
use crate::error::Result;
use clap::Parser;

/// Output composites keep the original values of whichever input meets the
/// criterion at each pixel. In a maximum NDVI composite of ten images, every
/// band of a pixel comes from the image with the highest NDVI there.
#[derive(Parser, Debug)]
#[command(name = "image-composite")]
#[command(about = "Create image composites based on a per-pixel criterion")]
#[command(version)]
pub struct Args {
    /// Input rasters (same size, bands, pixel type and block layout)
    #[arg(value_name = "INPUTS", required = true)]
    pub inputs: Vec<String>,

    /// Create composite based on a predefined algorithm
    #[arg(long, value_enum)]
    pub algo: Option<Algorithm>,

    /// Create composite based on an S-expression, e.g. "(max (/ nir blue))"
    #[arg(long, value_name = "SEXPR")]
    pub expr: Option<String>,

    /// Output image composite
    #[arg(short, long, value_name = "FILE", default_value = "composite.gtif")]
    pub output: String,

    /// Output GDAL driver
    #[arg(short = 'f', long, value_name = "DRIVER", default_value = "GTiff")]
    pub format: String,

    /// Output creation option (repeatable)
    #[arg(long = "co", value_name = "KEY=VALUE")]
    pub creation_options: Vec<String>,

    /// Band number for blue band
    #[arg(long, value_name = "INT", default_value_t = 1)]
    pub blue: usize,

    /// Band number for green band
    #[arg(long, value_name = "INT", default_value_t = 2)]
    pub green: usize,

    /// Band number for red band
    #[arg(long, value_name = "INT", default_value_t = 3)]
    pub red: usize,

    /// Band number for near IR band
    #[arg(long, value_name = "INT", default_value_t = 4)]
    pub nir: usize,

    /// Band number for first SWIR band
    #[arg(long, value_name = "INT", default_value_t = 5)]
    pub swir1: usize,

    /// Band number for second SWIR band
    #[arg(long, value_name = "INT", default_value_t = 6)]
    pub swir2: usize,

    /// Additional band name and index (repeatable)
    #[arg(long = "band", value_name = "NAME=INDEX")]
    pub bands: Vec<String>,

    /// Number of threads (default: all available)
    #[arg(short, long, value_name = "N")]
    pub threads: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// The six named bands plus any `--band` pairs.
    pub fn band_map(&self) -> Result<BandMap> {
        let base = BandMap::from_pairs([
            ("blue", self.blue),
            ("green", self.green),
            ("red", self.red),
            ("nir", self.nir),
            ("swir1", self.swir1),
            ("swir2", self.swir2),
        ])?;
        bands::merge_user_bands(&base, &self.bands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["image-composite", "a.tif", "b.tif", "--algo", "maxNDVI"]).unwrap();
        assert_eq!(args.inputs, vec!["a.tif", "b.tif"]);
        assert_eq!(args.algo, Some(Algorithm::MaxNdvi));
        assert_eq!(args.output, "composite.gtif");
        assert_eq!(args.format, "GTiff");
        assert_eq!(args.band_map().unwrap(), BandMap::default());
    }

    #[test]
    fn test_band_overrides() {
        let args = Args::try_parse_from([
            "image-composite",
            "a.tif",
            "--expr",
            "(max (/ nir redge))",
            "--nir",
            "8",
            "--band",
            "redge=5",
        ])
        .unwrap();
        let bands = args.band_map().unwrap();
        assert_eq!(bands.get("nir"), Some(8));
        assert_eq!(bands.get("redge"), Some(5));
    }

    #[test]
    fn test_zero_band_rejected() {
        let args = Args::try_parse_from(["image-composite", "a.tif", "--algo", "minBlue", "--blue", "0"]).unwrap();
        assert!(args.band_map().is_err());
    }

    #[test]
    fn test_requires_inputs() {
        assert!(Args::try_parse_from(["image-composite", "--algo", "minBlue"]).is_err());
        assert!(Args::try_parse_from(["image-composite", "a.tif", "--algo", "maxEVI"]).is_err());
    }
}
