//! Pathway allocations following population, and the linear blend from emission shares to
//! population shares.
use super::{Allocation, shares_to_series};
use crate::adjustment::{
    CapabilityWindow, YearlyValues, yearly_adjustment_factors, yearly_capability_metric,
};
use crate::country::{CountryID, CountryValues};
use crate::error::{AllocationError, Result};
use crate::result::AllocationResult;
use crate::target::{adjusted_population, constrain_per_capita_deviation, normalise};
use indexmap::IndexMap;
use log::debug;
use std::ops::RangeInclusive;

/// Capability adjustment factors for each country and year of `years`.
///
/// Each year's capability is measured on GDP and population accumulated from the start of
/// `years`.
fn capability_factors(
    allocation: &Allocation,
    years: RangeInclusive<u32>,
) -> Result<Option<YearlyValues>> {
    let Some(gdp) = allocation.capability_gdp(years.clone())? else {
        return Ok(None);
    };

    let params = allocation.params;
    let metric = yearly_capability_metric(
        &gdp,
        &allocation.data.population,
        years,
        params.capability_per_capita,
        CapabilityWindow::Running,
    )?;

    Ok(Some(yearly_adjustment_factors(
        &metric,
        params.capability_functional_form,
        allocation.capability_exponent(),
    )))
}

/// Allocate a pathway in proportion to (adjusted) population.
///
/// Shares are recalculated for every year of the horizon unless
/// `preserve_first_allocation_year_shares` is set, in which case the first year's shares are
/// used throughout.
pub(crate) fn allocate(allocation: &Allocation) -> Result<AllocationResult> {
    let params = allocation.params;
    let first_year = allocation.first_year();
    let preserve = params.preserve_first_allocation_year_shares;
    let years = if preserve {
        first_year..=first_year
    } else {
        allocation.years.clone()
    };

    let responsibility = allocation.responsibility_factors(
        params.historical_responsibility_year..=first_year.saturating_sub(1),
    )?;
    let capability = capability_factors(allocation, years.clone())?;
    let sigma = params.deviation_sigma();

    let mut shares: IndexMap<CountryID, Vec<f64>> = allocation
        .countries
        .iter()
        .map(|country| (country.clone(), Vec::new()))
        .collect();
    for (idx, year) in years.enumerate() {
        let population = allocation
            .data
            .population
            .values_in_year(&allocation.countries, year)?;
        let capability: Option<CountryValues> = capability.as_ref().map(|factors| {
            factors
                .iter()
                .map(|(country, values)| (country.clone(), values[idx]))
                .collect()
        });
        let factors: Vec<&CountryValues> =
            responsibility.iter().chain(capability.iter()).collect();

        let adjusted = adjusted_population(&population, &factors);
        let mut year_shares = normalise(&adjusted, "adjusted population")?;
        if let Some(sigma) = sigma {
            year_shares = constrain_per_capita_deviation(&year_shares, &population, sigma)?;
        }
        for (country, share) in year_shares {
            shares[&country].push(share);
        }
    }

    if preserve {
        let len = allocation.years.clone().count();
        debug!("Using {first_year} shares for all {len} years of the horizon");
        for values in shares.values_mut() {
            let share = values[0];
            values.resize(len, share);
        }
    }

    let shares = shares_to_series(first_year, shares)?;
    Ok(allocation.finish(shares, None, None))
}

/// The weight given to emission shares in `year` when blending towards population shares.
///
/// This is 1 up to `first_year`, 0 from `convergence_year` and falls linearly in between.
fn blend_weight(year: u32, first_year: u32, convergence_year: u32) -> f64 {
    if year <= first_year {
        1.0
    } else if year >= convergence_year {
        0.0
    } else {
        f64::from(convergence_year - year) / f64::from(convergence_year - first_year)
    }
}

/// Allocate a pathway which moves linearly from first-year emission shares to first-year
/// population shares, arriving at `convergence_year`.
pub(crate) fn allocate_blend(allocation: &Allocation) -> Result<AllocationResult> {
    let params = allocation.params;
    let first_year = allocation.first_year();
    let convergence_year = params
        .convergence_year
        .ok_or_else(|| AllocationError::MissingParameter {
            name: "convergence_year",
            approach: params.approach.to_string(),
        })?;

    let countries = &allocation.countries;
    let emissions = allocation.emissions()?.values_in_year(countries, first_year)?;
    let emission_shares = normalise(&emissions, "first-year emissions")?;
    let population = allocation
        .data
        .population
        .values_in_year(countries, first_year)?;
    let population_shares = normalise(&population, "first-year population")?;

    let mut shares: IndexMap<CountryID, Vec<f64>> = countries
        .iter()
        .map(|country| (country.clone(), Vec::new()))
        .collect();
    for year in allocation.years.clone() {
        let weight = blend_weight(year, first_year, convergence_year);
        let blended: CountryValues = countries
            .iter()
            .map(|country| {
                let share = weight * emission_shares[country]
                    + (1.0 - weight) * population_shares[country];
                (country.clone(), share)
            })
            .collect();

        for (country, share) in normalise(&blended, &format!("blended shares in {year}"))? {
            shares[&country].push(share);
        }
    }

    let shares = shares_to_series(first_year, shares)?;
    Ok(allocation.finish(shares, None, None))
}
