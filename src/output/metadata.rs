//! Code for writing the parameters and summary of a run to file
use crate::adjustment::NormalisedWeights;
use crate::parameters::AllocationParameters;
use crate::result::AllocationResult;
use anyhow::Result;
use chrono::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// The output file name for run parameters
const PARAMETERS_FILE_NAME: &str = "parameters.toml";

#[derive(Serialize)]
struct Metadata<'a> {
    run: RunMetadata<'a>,
    program: ProgramMetadata,
    result: ResultMetadata,
    parameters: &'a AllocationParameters,
}

/// Information about the model run
#[derive(Serialize)]
struct RunMetadata<'a> {
    /// Path to the model which was run
    model_path: &'a Path,
    /// The date and time on which the run started
    datetime: String,
}

impl<'a> RunMetadata<'a> {
    fn new(model_path: &'a Path) -> Self {
        let dt = Local::now();
        Self {
            model_path,
            datetime: dt.to_rfc2822(),
        }
    }
}

#[derive(Serialize)]
struct ProgramMetadata {
    /// The program name
    name: &'static str,
    /// The program version as specified in Cargo.toml
    version: &'static str,
    /// Whether it is a debug build
    is_debug: bool,
}

impl Default for ProgramMetadata {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            is_debug: cfg!(debug_assertions),
        }
    }
}

/// Summary of the allocation
#[derive(Serialize)]
struct ResultMetadata {
    /// The convergence speed found by the solver, for convergence approaches
    #[serde(skip_serializing_if = "Option::is_none")]
    convergence_speed: Option<f64>,
    /// Whether cumulative targets had to be approximated
    fallback_used: bool,
    /// Adjustment weights after normalisation
    normalised_weights: NormalisedWeights,
}

impl ResultMetadata {
    fn new(result: &AllocationResult) -> Self {
        Self {
            convergence_speed: result.convergence_speed(),
            fallback_used: result
                .diagnostics()
                .is_some_and(|diagnostics| diagnostics.fallback_used),
            normalised_weights: result.weights(),
        }
    }
}

/// Write the parameters used and a summary of the result to the output path in TOML format
pub fn write_metadata(
    output_path: &Path,
    model_path: &Path,
    params: &AllocationParameters,
    result: &AllocationResult,
) -> Result<()> {
    let metadata = Metadata {
        run: RunMetadata::new(model_path),
        program: ProgramMetadata::default(),
        result: ResultMetadata::new(result),
        parameters: params,
    };
    let file_path = output_path.join(PARAMETERS_FILE_NAME);
    fs::write(&file_path, toml::to_string(&metadata)?)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::{AllocationData, Approach, allocate};
    use crate::fixture::country_table;
    use tempfile::tempdir;

    #[test]
    fn test_write_metadata() {
        let params = AllocationParameters::new(Approach::EqualPerCapita, 2020);
        let data = AllocationData {
            population: country_table("population", 2020, &[("A", &[1.0]), ("B", &[3.0])]),
            emissions: None,
            gdp: None,
            gini: None,
            reference: None,
        };
        let result = allocate(&params, &data).unwrap();

        let dir = tempdir().unwrap();
        write_metadata(dir.path(), Path::new("demos/three_countries"), &params, &result).unwrap();

        let contents = fs::read_to_string(dir.path().join(PARAMETERS_FILE_NAME)).unwrap();
        let table: toml::Table = toml::from_str(&contents).unwrap();
        assert_eq!(
            table["parameters"]["approach"].as_str(),
            Some("equal-per-capita")
        );
        assert_eq!(table["result"]["fallback_used"].as_bool(), Some(false));
        assert!(table["result"].get("convergence_speed").is_none());
        assert_eq!(table["program"]["name"].as_str(), Some("fair-shares"));
    }
}
