//! Code for reading country tables, Gini coefficients and the World reference from CSV files.
use super::{input_err_msg, read_csv_optional};
use crate::country::{CountryID, CountryValues};
use crate::timeseries::{CountryTable, StationaryTable, TimeSeries};
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Deserialize;
use std::path::Path;

/// The file containing Gini coefficients
const GINI_FILE_NAME: &str = "gini.csv";

/// The file containing the World reference pathway or budget
const REFERENCE_FILE_NAME: &str = "reference.csv";

/// A row of a long-format table. An empty value means the value is undefined.
#[derive(Debug, PartialEq, Deserialize)]
struct TableRow {
    country_id: CountryID,
    unit: String,
    year: u32,
    value: Option<f64>,
}

/// A row of the Gini coefficients file
#[derive(Debug, PartialEq, Deserialize)]
struct GiniRow {
    country_id: CountryID,
    gini: f64,
}

/// Build a time series for each country from long-format rows
fn series_from_rows<I>(rows: I) -> Result<IndexMap<CountryID, TimeSeries>>
where
    I: IntoIterator<Item = TableRow>,
{
    let mut grouped: IndexMap<CountryID, (String, Vec<(u32, f64)>)> = IndexMap::new();
    for row in rows {
        let (unit, pairs) = grouped
            .entry(row.country_id.clone())
            .or_insert_with(|| (row.unit.clone(), Vec::new()));
        ensure!(
            *unit == row.unit,
            "Country {} has values in more than one unit ({unit} and {})",
            row.country_id,
            row.unit
        );
        pairs.push((row.year, row.value.unwrap_or(f64::NAN)));
    }

    grouped
        .into_iter()
        .map(|(country, (unit, pairs))| {
            let series = TimeSeries::from_pairs(unit, pairs)
                .with_context(|| format!("Invalid years for {country}"))?;
            Ok((country, series))
        })
        .collect()
}

/// Read a country table from `file_name` in the model directory, if the file exists.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model input files
/// * `file_name` - The CSV file to read
/// * `name` - What the table contains, used in error messages
pub fn read_country_table(
    model_dir: &Path,
    file_name: &str,
    name: &str,
) -> Result<Option<CountryTable>> {
    let file_path = model_dir.join(file_name);
    let Some(rows) = read_csv_optional::<TableRow>(&file_path)? else {
        return Ok(None);
    };

    let table = series_from_rows(rows)
        .and_then(|series| Ok(CountryTable::new(name, series)?))
        .with_context(|| input_err_msg(&file_path))?;

    Ok(Some(table))
}

/// Read Gini coefficients from the model directory, if the file exists
pub fn read_gini(model_dir: &Path) -> Result<Option<StationaryTable>> {
    let file_path = model_dir.join(GINI_FILE_NAME);
    let Some(rows) = read_csv_optional::<GiniRow>(&file_path)? else {
        return Ok(None);
    };

    let duplicates = rows.iter().map(|row| &row.country_id).duplicates().join(", ");
    ensure!(
        duplicates.is_empty(),
        "{}: countries appear more than once: {duplicates}",
        input_err_msg(&file_path)
    );

    let values: CountryValues = rows.into_iter().map(|row| (row.country_id, row.gini)).collect();
    Ok(Some(StationaryTable::new("gini", values)))
}

/// Read the World reference from the model directory, if the file exists.
///
/// Every row must be for `World`.
pub fn read_reference(model_dir: &Path) -> Result<Option<TimeSeries>> {
    let file_path = model_dir.join(REFERENCE_FILE_NAME);
    let Some(rows) = read_csv_optional::<TableRow>(&file_path)? else {
        return Ok(None);
    };

    let others = rows
        .iter()
        .filter(|row| !row.country_id.is_world())
        .map(|row| &row.country_id)
        .unique()
        .join(", ");
    ensure!(
        others.is_empty(),
        "{}: reference must only contain World rows, found: {others}",
        input_err_msg(&file_path)
    );

    let mut series = series_from_rows(rows).with_context(|| input_err_msg(&file_path))?;
    Ok(series.pop().map(|(_, series)| series))
}
