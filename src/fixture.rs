//! Fixtures for tests

use crate::country::{CountryID, CountryValues};
use crate::error::AllocationContext;
use crate::timeseries::{CountryTable, TimeSeries};
use rstest::fixture;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// A time series in `Mt` starting at `first_year`
pub fn series(first_year: u32, values: &[f64]) -> TimeSeries {
    TimeSeries::new("Mt", first_year, values.to_vec()).unwrap()
}

/// A table with a series for each country, all starting at `first_year`
pub fn country_table(name: &str, first_year: u32, rows: &[(&str, &[f64])]) -> CountryTable {
    let series = rows
        .iter()
        .map(|(country, values)| (CountryID::new(country), self::series(first_year, values)))
        .collect();
    CountryTable::new(name, series).unwrap()
}

/// A value for each country
pub fn values(items: &[(&str, f64)]) -> CountryValues {
    items
        .iter()
        .map(|(country, value)| (CountryID::new(country), *value))
        .collect()
}

#[fixture]
pub fn context() -> AllocationContext {
    AllocationContext {
        approach: "cumulative-per-capita-convergence".into(),
        responsibility_weight: 0.0,
        capability_weight: 0.0,
        first_year: 2020,
        last_year: 2021,
        max_convergence_speed: 0.9,
        max_deviation_sigma: Some(2.0),
    }
}
