//! Common routines for handling input data.
use crate::allocation::AllocationData;
use crate::parameters::AllocationParameters;
use anyhow::{Context, Result, ensure};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

mod table;
use table::{read_country_table, read_gini, read_reference};

/// The file containing population for each country
const POPULATION_FILE_NAME: &str = "population.csv";

/// The file containing historical and current emissions
const EMISSIONS_FILE_NAME: &str = "emissions.csv";

/// The file containing GDP
const GDP_FILE_NAME: &str = "gdp.csv";

/// Read a series of type `T`s from a CSV file.
///
/// Will raise an error if the file is empty.
///
/// # Arguments
///
/// * `file_path` - Path to the CSV file
pub fn read_csv<T: DeserializeOwned>(file_path: &Path) -> Result<Vec<T>> {
    let rows = read_csv_internal(file_path)?;
    ensure!(!rows.is_empty(), "CSV file {} cannot be empty", file_path.display());

    Ok(rows)
}

/// Read a series of type `T`s from a CSV file, returning `None` if the file does not exist.
///
/// An existing but empty file is also treated as an error.
pub fn read_csv_optional<T: DeserializeOwned>(file_path: &Path) -> Result<Option<Vec<T>>> {
    if !file_path.is_file() {
        return Ok(None);
    }

    read_csv(file_path).map(Some)
}

fn read_csv_internal<T: DeserializeOwned>(file_path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(file_path).with_context(|| input_err_msg(file_path))?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .with_context(|| input_err_msg(file_path))
}

/// Parse a TOML file at the specified path.
///
/// # Arguments
///
/// * `file_path` - Path to the TOML file
///
/// # Returns
///
/// * The deserialised TOML data or an error if the file could not be read or parsed.
pub fn read_toml<T: DeserializeOwned>(file_path: &Path) -> Result<T> {
    let toml_str = fs::read_to_string(file_path).with_context(|| input_err_msg(file_path))?;
    let toml_data = toml::from_str(&toml_str).with_context(|| input_err_msg(file_path))?;
    Ok(toml_data)
}

/// Format an error message to include the file path. To be used with `anyhow::Context`.
pub fn input_err_msg<P: AsRef<Path>>(file_path: P) -> String {
    format!("Error reading {}", file_path.as_ref().display())
}

/// Read the input tables from a model directory.
///
/// `population.csv` must be present. Every other table is optional and only loaded if its file
/// exists; whether it is needed is decided when allocating.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model input files
pub fn read_allocation_data(model_dir: &Path) -> Result<AllocationData> {
    let population = read_country_table(model_dir, POPULATION_FILE_NAME, "population")?
        .with_context(|| {
            format!(
                "Missing required file {}",
                model_dir.join(POPULATION_FILE_NAME).display()
            )
        })?;

    Ok(AllocationData {
        population,
        emissions: read_country_table(model_dir, EMISSIONS_FILE_NAME, "emissions")?,
        gdp: read_country_table(model_dir, GDP_FILE_NAME, "gdp")?,
        gini: read_gini(model_dir)?,
        reference: read_reference(model_dir)?,
    })
}

/// Read a model from the specified directory.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model configuration files
///
/// # Returns
///
/// The allocation parameters and input tables, or an error if any file is missing or invalid.
pub fn load_model<P: AsRef<Path>>(model_dir: P) -> Result<(AllocationParameters, AllocationData)> {
    let model_dir = model_dir.as_ref();
    let params = AllocationParameters::from_path(model_dir)?;
    let data = read_allocation_data(model_dir)?;

    Ok((params, data))
}
