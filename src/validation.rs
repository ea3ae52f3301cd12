//! Checks on the inputs to and outputs from an allocation.
use crate::allocation::AllocationData;
use crate::country::{CountryID, CountryValues, total};
use crate::error::{AllocationError, Result};
use crate::parameters::AllocationParameters;
use crate::timeseries::{CountryTable, StationaryTable, TimeSeries};
use indexmap::IndexMap;
use std::collections::HashSet;

/// Largest permitted difference from 1 of the sum of shares in any year
pub const SHARE_SUM_TOLERANCE: f64 = 1e-6;

/// Relative tolerance when comparing summed country emissions with the World value
const WORLD_CONSISTENCY_TOLERANCE: f64 = 1e-6;

/// Get a table which the approach or parameters require.
///
/// # Arguments
///
/// * `table` - The table, if supplied
/// * `name` - What the table contains
/// * `parameter` - The parameter which made the table necessary
/// * `value` - The value of that parameter
pub fn required<'a, T>(
    table: Option<&'a T>,
    name: &str,
    parameter: &str,
    value: impl ToString,
) -> Result<&'a T> {
    table.ok_or_else(|| AllocationError::MissingTable {
        table: name.to_string(),
        parameter: parameter.to_string(),
        value: value.to_string(),
    })
}

/// Check that every table needed by the requested approach and weights was supplied.
///
/// This runs before any numeric work so that configuration mistakes are reported first.
pub fn check_required_tables(params: &AllocationParameters, data: &AllocationData) -> Result<()> {
    let approach = params.approach;
    let adjusted = approach.is_adjusted();

    if approach.needs_emissions() {
        required(data.emissions.as_ref(), "emissions", "approach", approach)?;
    }
    if adjusted && params.responsibility_weight > 0.0 {
        required(
            data.emissions.as_ref(),
            "emissions",
            "responsibility_weight",
            params.responsibility_weight,
        )?;
    }
    if adjusted && params.capability_weight > 0.0 {
        required(
            data.gdp.as_ref(),
            "gdp",
            "capability_weight",
            params.capability_weight,
        )?;
    }
    // Inequality only enters through the capability adjustment
    if approach.uses_gini() && params.capability_weight > 0.0 {
        required(data.gini.as_ref(), "gini", "approach", approach)?;
        required(data.gdp.as_ref(), "gdp", "approach", approach)?;
    }
    if approach.uses_solver() {
        required(data.reference.as_ref(), "reference", "approach", approach)?;
    }

    Ok(())
}

/// Check that every value in a table is finite and, if `non_negative`, not less than zero
pub fn check_values(table: &CountryTable, non_negative: bool) -> Result<()> {
    let expected = if non_negative {
        "a finite, non-negative number"
    } else {
        "a finite number"
    };

    for (country, ts) in table.iter() {
        for (year, value) in ts.iter() {
            if !value.is_finite() || (non_negative && value < 0.0) {
                return Err(AllocationError::InvalidValue {
                    table: table.name().to_string(),
                    country: country.clone(),
                    year: Some(year),
                    value,
                    expected,
                });
            }
        }
    }

    Ok(())
}

/// Check that every Gini coefficient is in `[0, 1]`
pub fn check_gini(gini: &StationaryTable) -> Result<()> {
    for (country, value) in gini.iter() {
        if !(0.0..=1.0).contains(&value) {
            return Err(AllocationError::InvalidValue {
                table: gini.name().to_string(),
                country: country.clone(),
                year: None,
                value,
                expected: "a number in [0, 1]",
            });
        }
    }

    Ok(())
}

/// Check that a table has rows for exactly `countries` (plus an optional `World` row)
pub fn check_countries_match(table: &CountryTable, countries: &[CountryID]) -> Result<()> {
    table.check_covers(countries)?;

    let expected: HashSet<_> = countries.iter().collect();
    let unexpected: Vec<_> = table
        .countries()
        .filter(|country| !expected.contains(country))
        .cloned()
        .collect();
    if !unexpected.is_empty() {
        return Err(AllocationError::UnexpectedCountries {
            table: table.name().to_string(),
            countries: unexpected,
        });
    }

    Ok(())
}

/// Country emissions in `year`, checked against the World reference value.
///
/// # Returns
///
/// Each country's emissions in `year`, or an error if the World value is undefined or the
/// country values do not sum to it (relative tolerance 1e-6).
pub fn check_world_consistency(
    emissions: &CountryTable,
    countries: &[CountryID],
    reference: &TimeSeries,
    year: u32,
) -> Result<CountryValues> {
    let world = reference
        .get(year)
        .filter(|value| value.is_finite())
        .ok_or(AllocationError::UndefinedWorldValue { year })?;
    let values = emissions.values_in_year(countries, year)?;
    let country_sum = total(&values);

    if (country_sum - world).abs() > WORLD_CONSISTENCY_TOLERANCE * world.abs().max(1.0) {
        return Err(AllocationError::WorldMismatch {
            year,
            country_sum,
            world,
        });
    }

    Ok(values)
}

/// Check the shares produced by an allocation.
///
/// Every share must be finite and each year's shares must sum to 1 within
/// [`SHARE_SUM_TOLERANCE`]. Years in which the reference pathway is undefined are skipped.
pub fn check_shares(
    shares: &IndexMap<CountryID, TimeSeries>,
    reference: Option<&TimeSeries>,
) -> Result<()> {
    let Some(years) = shares.values().next().map(TimeSeries::years) else {
        return Ok(());
    };

    for year in years {
        if reference
            .and_then(|reference| reference.get(year))
            .is_some_and(f64::is_nan)
        {
            continue;
        }

        let values: CountryValues = shares
            .iter()
            .map(|(country, ts)| (country.clone(), ts.get(year).unwrap_or(f64::NAN)))
            .collect();
        let invalid: Vec<_> = values
            .iter()
            .filter(|(_, share)| !share.is_finite())
            .map(|(country, _)| country.clone())
            .collect();
        if !invalid.is_empty() {
            return Err(AllocationError::NonFiniteShares {
                step: format!("in {year}"),
                countries: invalid,
            });
        }

        let sum = total(&values);
        if (sum - 1.0).abs() > SHARE_SUM_TOLERANCE {
            return Err(AllocationError::ShareSumMismatch { year, sum });
        }
    }

    Ok(())
}

/// Run every input check which applies to `params.approach`.
///
/// # Returns
///
/// The countries to allocate between: every non-`World` row of the population table.
pub fn check_inputs(
    params: &AllocationParameters,
    data: &AllocationData,
) -> Result<Vec<CountryID>> {
    check_required_tables(params, data)?;

    let countries: Vec<CountryID> = data.population.countries().cloned().collect();
    if countries.is_empty() {
        return Err(AllocationError::MissingCountries {
            table: data.population.name().to_string(),
            countries: Vec::new(),
        });
    }
    check_values(&data.population, true)?;

    let approach = params.approach;
    if let Some(emissions) = &data.emissions {
        check_values(emissions, false)?;
        if approach.needs_emissions() {
            check_countries_match(emissions, &countries)?;
        }
    }
    if let Some(gdp) = &data.gdp {
        check_values(gdp, true)?;
    }
    if let Some(gini) = &data.gini {
        check_gini(gini)?;
    }

    Ok(countries)
}
