//! Yearly time series and the tables built from them.
//!
//! A [`TimeSeries`] holds one value per year over a contiguous range of years, so gaps are
//! impossible by construction. Values may be `NaN` to mark a year as undefined; this is only
//! permitted in a World reference pathway and is checked by [`crate::validation`].
//!
//! A [`CountryTable`] maps each country to a time series, all sharing the same unit. A
//! [`StationaryTable`] holds a single value per country (used for Gini coefficients).
use crate::country::{CountryID, CountryValues};
use crate::error::{AllocationError, Result};
use indexmap::IndexMap;
use itertools::Itertools;
use std::ops::RangeInclusive;

/// One value per year over a contiguous range of years
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    unit: String,
    first_year: u32,
    values: Vec<f64>,
}

impl TimeSeries {
    /// Create a time series starting at `first_year`.
    ///
    /// Returns an error if `values` is empty.
    pub fn new(unit: impl Into<String>, first_year: u32, values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(AllocationError::EmptySeries);
        }

        Ok(Self {
            unit: unit.into(),
            first_year,
            values,
        })
    }

    /// Create a time series from `(year, value)` pairs, which may be in any order.
    ///
    /// The years must form a contiguous range with no duplicates.
    pub fn from_pairs<I>(unit: impl Into<String>, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u32, f64)>,
    {
        let pairs: Vec<_> = pairs.into_iter().sorted_by_key(|(year, _)| *year).collect();
        let first_year = pairs.first().ok_or(AllocationError::EmptySeries)?.0;

        for ((prev, _), (next, _)) in pairs.iter().tuple_windows() {
            if prev == next {
                return Err(AllocationError::DuplicateYear(*next));
            }
            if *next != prev + 1 {
                return Err(AllocationError::NonContiguousYears {
                    after: *prev,
                    next: *next,
                });
            }
        }

        let values = pairs.into_iter().map(|(_, value)| value).collect();
        Self::new(unit, first_year, values)
    }

    /// The unit of the values
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// The first year covered
    pub fn first_year(&self) -> u32 {
        self.first_year
    }

    /// The last year covered
    pub fn last_year(&self) -> u32 {
        self.first_year + (self.values.len() as u32) - 1
    }

    /// The range of years covered
    pub fn years(&self) -> RangeInclusive<u32> {
        self.first_year..=self.last_year()
    }

    /// Whether `year` is covered by this series
    pub fn contains_year(&self, year: u32) -> bool {
        self.years().contains(&year)
    }

    /// Get the value for `year`, if covered
    pub fn get(&self, year: u32) -> Option<f64> {
        let index = year.checked_sub(self.first_year)?;
        self.values.get(index as usize).copied()
    }

    /// All values, in year order
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Iterate over `(year, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        (self.first_year..).zip(self.values.iter().copied())
    }

    /// Get the values for the given years, or `None` if any year is not covered.
    pub fn window(&self, years: RangeInclusive<u32>) -> Option<&[f64]> {
        if years.is_empty() {
            return Some(&[]);
        }
        if !self.contains_year(*years.start()) || !self.contains_year(*years.end()) {
            return None;
        }

        let start = (years.start() - self.first_year) as usize;
        let end = (years.end() - self.first_year) as usize;
        Some(&self.values[start..=end])
    }

    /// The years in `years` which this series does not cover
    pub fn missing_years(&self, years: RangeInclusive<u32>) -> Vec<u32> {
        years.filter(|year| !self.contains_year(*year)).collect()
    }
}

/// A time series for each country, all with the same unit
#[derive(Debug, Clone, PartialEq)]
pub struct CountryTable {
    name: String,
    unit: String,
    series: IndexMap<CountryID, TimeSeries>,
}

impl CountryTable {
    /// Create a new table.
    ///
    /// # Arguments
    ///
    /// * `name` - What the table contains (e.g. `population`), used in error messages
    /// * `series` - A time series for each country
    ///
    /// # Returns
    ///
    /// The table, or an error if it is empty or its series have different units.
    pub fn new(name: &str, series: IndexMap<CountryID, TimeSeries>) -> Result<Self> {
        let units: Vec<String> = series
            .values()
            .map(|ts| ts.unit().to_string())
            .unique()
            .collect();

        match units.as_slice() {
            [] => Err(AllocationError::MissingCountries {
                table: name.to_string(),
                countries: Vec::new(),
            }),
            [unit] => Ok(Self {
                name: name.to_string(),
                unit: unit.clone(),
                series,
            }),
            _ => Err(AllocationError::MixedUnits {
                table: name.to_string(),
                units,
            }),
        }
    }

    /// What the table contains
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unit shared by every series
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Get the series for a country
    pub fn get(&self, country: &CountryID) -> Option<&TimeSeries> {
        self.series.get(country)
    }

    /// Iterate over every series, including any `World` row
    pub fn iter(&self) -> impl Iterator<Item = (&CountryID, &TimeSeries)> {
        self.series.iter()
    }

    /// Iterate over the country groups in the table, excluding any `World` row
    pub fn countries(&self) -> impl Iterator<Item = &CountryID> {
        self.series.keys().filter(|country| !country.is_world())
    }

    /// The series for the `World` row, if present
    pub fn world(&self) -> Option<&TimeSeries> {
        self.series
            .iter()
            .find_map(|(country, ts)| country.is_world().then_some(ts))
    }

    /// The last year covered by every country's series (excluding `World`)
    pub fn common_last_year(&self) -> Option<u32> {
        self.countries()
            .map(|country| self.series[country].last_year())
            .min()
    }

    /// Get a country's values for the given years.
    ///
    /// Returns an error if the country is absent or any year is not covered.
    pub fn window(&self, country: &CountryID, years: RangeInclusive<u32>) -> Result<&[f64]> {
        let ts = self
            .series
            .get(country)
            .ok_or_else(|| AllocationError::MissingCountries {
                table: self.name.clone(),
                countries: vec![country.clone()],
            })?;

        ts.window(years.clone())
            .ok_or_else(|| AllocationError::MissingYears {
                table: self.name.clone(),
                country: country.clone(),
                years: ts.missing_years(years),
            })
    }

    /// Get the value for each of `countries` in a single year
    pub fn values_in_year<'a, I>(&self, countries: I, year: u32) -> Result<CountryValues>
    where
        I: IntoIterator<Item = &'a CountryID>,
    {
        countries
            .into_iter()
            .map(|country| {
                let value = self.window(country, year..=year)?[0];
                Ok((country.clone(), value))
            })
            .collect()
    }

    /// Sum each of `countries` over the given years
    pub fn sum_over<'a, I>(&self, countries: I, years: RangeInclusive<u32>) -> Result<CountryValues>
    where
        I: IntoIterator<Item = &'a CountryID>,
    {
        countries
            .into_iter()
            .map(|country| {
                let sum = self.window(country, years.clone())?.iter().sum();
                Ok((country.clone(), sum))
            })
            .collect()
    }

    /// Check that every one of `countries` has a row in this table
    pub fn check_covers<'a, I>(&self, countries: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a CountryID>,
    {
        let missing: Vec<_> = countries
            .into_iter()
            .filter(|country| !self.series.contains_key(*country))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AllocationError::MissingCountries {
                table: self.name.clone(),
                countries: missing,
            })
        }
    }
}

/// A single value for each country
#[derive(Debug, Clone, PartialEq)]
pub struct StationaryTable {
    name: String,
    values: CountryValues,
}

impl StationaryTable {
    /// Create a new table
    pub fn new(name: &str, values: CountryValues) -> Self {
        Self {
            name: name.to_string(),
            values,
        }
    }

    /// What the table contains
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Iterate over the values
    pub fn iter(&self) -> impl Iterator<Item = (&CountryID, f64)> {
        self.values.iter().map(|(country, value)| (country, *value))
    }

    /// Get the value for a country, or an error if it is absent
    pub fn get(&self, country: &CountryID) -> Result<f64> {
        self.values
            .get(country)
            .copied()
            .ok_or_else(|| AllocationError::MissingCountries {
                table: self.name.clone(),
                countries: vec![country.clone()],
            })
    }
}
