use crate::error::{CompositeError, Result};
use clap::ValueEnum;
use log::{debug, info, warn};
use std::fmt;

/// Predefined compositing criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Algorithm {
    #[value(name = "maxNDVI")]
    MaxNdvi,
    #[value(name = "medianNDVI")]
    MedianNdvi,
    #[value(name = "ZheZhu")]
    ZheZhu,
    #[value(name = "minBlue")]
    MinBlue,
    #[value(name = "maxNIR")]
    MaxNir,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::MaxNdvi => "maxNDVI",
            Algorithm::MedianNdvi => "medianNDVI",
            Algorithm::ZheZhu => "ZheZhu",
            Algorithm::MinBlue => "minBlue",
            Algorithm::MaxNir => "maxNIR",
        }
    }

    /// The S-expression this algorithm stands for.
    pub fn expression(&self) -> &'static str {
        match self {
            Algorithm::MaxNdvi => "(max (/ (- nir red) (+ nir red)))",
            Algorithm::MedianNdvi => "(median (/ (- nir red) (+ nir red)))",
            Algorithm::ZheZhu => "(max (/ nir blue))",
            Algorithm::MinBlue => "(min blue)",
            Algorithm::MaxNir => "(max nir)",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pick the criterion source text. A predefined algorithm wins over an
/// explicit expression.
pub fn criterion_source(algo: Option<Algorithm>, expr: Option<&str>) -> Result<String> {
    let source = match (algo, expr) {
        (None, None) => return Err(CompositeError::MissingCriterion),
        (Some(algo), Some(_)) => {
            warn!(
                "Predefined algorithm and expression both defined. \
                 Composite will be generated with predefined algorithm {}",
                algo
            );
            algo.expression().to_string()
        }
        (Some(algo), None) => {
            debug!("Using predefined algorithm: {}", algo);
            algo.expression().to_string()
        }
        (None, Some(expr)) => expr.to_string(),
    };
    info!("Compositing criteria S-expression: {}", source);
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Criterion, FunctionTable};

    #[test]
    fn test_all_algorithms_parse() {
        let table = FunctionTable::standard();
        for algo in Algorithm::value_variants() {
            assert!(Criterion::parse(algo.expression(), &table).is_ok(), "{}", algo);
        }
    }

    #[test]
    fn test_cli_names_match_display() {
        for algo in Algorithm::value_variants() {
            let parsed = Algorithm::from_str(algo.name(), false).unwrap();
            assert_eq!(parsed, *algo);
        }
        assert!(Algorithm::from_str("maxEVI", false).is_err());
    }

    #[test]
    fn test_criterion_source_precedence() {
        assert!(matches!(
            criterion_source(None, None),
            Err(CompositeError::MissingCriterion)
        ));
        assert_eq!(
            criterion_source(Some(Algorithm::MaxNir), Some("(min blue)")).unwrap(),
            "(max nir)"
        );
        assert_eq!(
            criterion_source(None, Some("(min blue)")).unwrap(),
            "(min blue)"
        );
    }
}
