//! The module responsible for writing allocation results to disk.
use crate::country::CountryID;
use crate::result::AllocationResult;
use crate::timeseries::TimeSeries;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub mod metadata;

/// The output file name for shares
const SHARES_FILE_NAME: &str = "shares.csv";

/// The output file name for absolute allocations
const ABSOLUTE_FILE_NAME: &str = "absolute.csv";

/// The output file name for convergence diagnostics
const DIAGNOSTICS_FILE_NAME: &str = "diagnostics.csv";

/// Get the default output directory for the model in the specified directory: a folder named
/// after the model inside `results_root`
pub fn get_output_dir(results_root: &Path, model_dir: &Path) -> Result<PathBuf> {
    // canonicalise in case the user has specified "."
    let model_dir = model_dir
        .canonicalize()
        .context("Could not resolve path to model")?;

    let model_name = model_dir
        .file_name()
        .context("Model cannot be in root folder")?
        .to_str()
        .context("Invalid chars in model dir name")?;

    Ok(results_root.join(model_name))
}

/// Create a new output directory for the model specified at `model_dir`.
///
/// # Arguments
///
/// * `output_dir` - The folder to create
/// * `allow_overwrite` - Whether to replace the contents of an existing, non-empty folder
///
/// # Returns
///
/// Whether an existing folder's contents are being overwritten
pub fn create_output_directory(output_dir: &Path, allow_overwrite: bool) -> Result<bool> {
    // If the folder already exists, then delete it
    let overwrite = if let Ok(mut it) = fs::read_dir(output_dir) {
        if it.next().is_none() {
            // Folder exists and is empty: nothing to do
            return Ok(false);
        }

        ensure!(
            allow_overwrite,
            "Output folder already exists and is not empty. \
            Please delete the folder or pass the --overwrite command-line option."
        );

        fs::remove_dir_all(output_dir)?;
        true
    } else {
        false
    };

    // Try to create the directory, with parents
    fs::create_dir_all(output_dir)?;

    Ok(overwrite)
}

/// Represents a row in the shares CSV file
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct ShareRow {
    country_id: CountryID,
    year: u32,
    share: f64,
}

/// Represents a row in the absolute allocations CSV file
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct AbsoluteRow {
    country_id: CountryID,
    year: u32,
    value: f64,
    unit: String,
}

/// Represents a row in the convergence diagnostics CSV file.
///
/// The ratio is empty for countries which met their target.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct DiagnosticsRow {
    country_id: CountryID,
    achieved_cumulative_share: f64,
    ratio: Option<f64>,
}

/// Write a CSV file with one row per item
fn write_rows<T, I>(file_path: &Path, rows: I) -> Result<()>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut writer = csv::Writer::from_path(file_path)
        .with_context(|| format!("Failed to create {}", file_path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}

/// Flatten time series for each country into `(country, year, value)` triples
fn iter_values(
    series: &IndexMap<CountryID, TimeSeries>,
) -> impl Iterator<Item = (&CountryID, u32, f64)> {
    series
        .iter()
        .flat_map(|(country, ts)| ts.iter().map(move |(year, value)| (country, year, value)))
}

/// Write the result of an allocation to CSV files.
///
/// `shares.csv` is always written. `absolute.csv` is written when a reference is supplied and
/// `diagnostics.csv` when the result carries convergence diagnostics.
///
/// # Arguments
///
/// * `output_path` - Folder where files will be saved
/// * `result` - The allocation result
/// * `reference` - The World reference, used to calculate absolute allocations
pub fn write_results(
    output_path: &Path,
    result: &AllocationResult,
    reference: Option<&TimeSeries>,
) -> Result<()> {
    write_rows(
        &output_path.join(SHARES_FILE_NAME),
        iter_values(result.shares()).map(|(country, year, share)| ShareRow {
            country_id: country.clone(),
            year,
            share,
        }),
    )?;

    if let Some(reference) = reference {
        let absolute = result.absolute(reference)?;
        write_rows(
            &output_path.join(ABSOLUTE_FILE_NAME),
            iter_values(&absolute).map(|(country, year, value)| AbsoluteRow {
                country_id: country.clone(),
                year,
                value,
                unit: reference.unit().to_string(),
            }),
        )?;
    }

    if let Some(diagnostics) = result.diagnostics() {
        write_rows(
            &output_path.join(DIAGNOSTICS_FILE_NAME),
            diagnostics
                .achieved
                .iter()
                .map(|(country, achieved)| DiagnosticsRow {
                    country_id: country.clone(),
                    achieved_cumulative_share: *achieved,
                    ratio: diagnostics.ratios.get(country).copied(),
                }),
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjustment::NormalisedWeights;
    use crate::allocation::Approach;
    use crate::fixture::{series, values};
    use crate::result::{ConvergenceDiagnostics, SHARE_UNIT};
    use indexmap::indexmap;
    use itertools::Itertools;
    use std::fs::File;
    use tempfile::tempdir;

    fn read_rows<T: serde::de::DeserializeOwned>(file_path: &Path) -> Vec<T> {
        csv::Reader::from_path(file_path)
            .unwrap()
            .into_deserialize()
            .try_collect()
            .unwrap()
    }

    fn result(diagnostics: Option<ConvergenceDiagnostics>) -> AllocationResult {
        let shares = indexmap! {
            "A".into() => TimeSeries::new(SHARE_UNIT, 2020, vec![0.25, 0.5]).unwrap(),
            "B".into() => TimeSeries::new(SHARE_UNIT, 2020, vec![0.75, 0.5]).unwrap(),
        };
        AllocationResult::new(
            Approach::CumulativePerCapitaConvergence,
            NormalisedWeights::default(),
            Some(0.5),
            shares,
            diagnostics,
        )
    }

    #[test]
    fn test_write_shares_and_absolute() {
        let dir = tempdir().unwrap();
        write_results(dir.path(), &result(None), Some(&series(2020, &[100.0, 40.0]))).unwrap();

        let shares: Vec<ShareRow> = read_rows(&dir.path().join(SHARES_FILE_NAME));
        assert_eq!(shares.len(), 4);
        assert_eq!(
            shares[1],
            ShareRow {
                country_id: "A".into(),
                year: 2021,
                share: 0.5
            }
        );

        let absolute: Vec<AbsoluteRow> = read_rows(&dir.path().join(ABSOLUTE_FILE_NAME));
        assert_eq!(
            absolute[2],
            AbsoluteRow {
                country_id: "B".into(),
                year: 2020,
                value: 75.0,
                unit: "Mt".into()
            }
        );
        assert!(!dir.path().join(DIAGNOSTICS_FILE_NAME).exists());
    }

    #[test]
    fn test_write_diagnostics() {
        let diagnostics = ConvergenceDiagnostics {
            fallback_used: true,
            achieved: values(&[("A", 0.3), ("B", 0.7)]),
            ratios: values(&[("A", 1.2)]),
        };
        let dir = tempdir().unwrap();
        write_results(dir.path(), &result(Some(diagnostics)), None).unwrap();

        let rows: Vec<DiagnosticsRow> = read_rows(&dir.path().join(DIAGNOSTICS_FILE_NAME));
        assert_eq!(rows[0].ratio, Some(1.2));
        assert_eq!(rows[1].ratio, None);
        assert!(!dir.path().join(ABSOLUTE_FILE_NAME).exists());
    }

    #[test]
    fn test_get_output_dir() {
        let temp_dir = tempdir().unwrap();
        let model_dir = temp_dir.path().join("three_countries");
        fs::create_dir(&model_dir).unwrap();

        assert_eq!(
            get_output_dir(Path::new("results"), &model_dir).unwrap(),
            PathBuf::from("results/three_countries")
        );
        assert!(get_output_dir(Path::new("results"), &temp_dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_create_output_directory_new_directory() {
        let temp_dir = tempdir().unwrap();
        let output_dir = temp_dir.path().join("output");

        // Create a new empty directory should succeed
        assert!(!create_output_directory(&output_dir, false).unwrap());
        assert!(output_dir.is_dir());
    }

    #[test]
    fn test_create_output_directory_existing_non_empty_directory() {
        let temp_dir = tempdir().unwrap();
        let output_dir = temp_dir.path().join("output");
        fs::create_dir(&output_dir).unwrap();
        File::create(output_dir.join(SHARES_FILE_NAME)).unwrap();

        // Without overwrite permission this fails
        assert!(create_output_directory(&output_dir, false).is_err());

        // With overwrite permission the old contents are removed
        assert!(create_output_directory(&output_dir, true).unwrap());
        assert!(output_dir.is_dir());
        assert!(!output_dir.join(SHARES_FILE_NAME).exists());
    }
}
