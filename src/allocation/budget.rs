//! Budget allocations: a single share of a cumulative emissions budget for each country.
use super::{Allocation, shares_to_series};
use crate::adjustment::{CapabilityWindow, yearly_adjustment_factors, yearly_capability_metric};
use crate::country::{CountryID, CountryValues};
use crate::error::Result;
use crate::result::AllocationResult;
use crate::target::{adjusted_population, constrain_per_capita_deviation, normalise};
use indexmap::IndexMap;
use log::debug;

/// Allocate a budget in proportion to (adjusted) cumulative population.
///
/// Population is summed from the allocation year to the end of the horizon, with each year's
/// population scaled by that year's capability adjustment. With
/// `preserve_first_allocation_year_shares` only the allocation year counts. The result holds a
/// single share per country, for the allocation year.
pub(crate) fn allocate(allocation: &Allocation) -> Result<AllocationResult> {
    let params = allocation.params;
    let first_year = allocation.first_year();
    let years = if params.preserve_first_allocation_year_shares {
        first_year..=first_year
    } else {
        allocation.years.clone()
    };
    debug!(
        "Summing population over {}-{} for the budget in {first_year}",
        years.start(),
        years.end()
    );

    let countries = &allocation.countries;
    let population = &allocation.data.population;
    let capability = match allocation.capability_gdp(years.clone())? {
        Some(gdp) => {
            let metric = yearly_capability_metric(
                &gdp,
                population,
                years.clone(),
                params.capability_per_capita,
                CapabilityWindow::Yearly,
            )?;
            Some(yearly_adjustment_factors(
                &metric,
                params.capability_functional_form,
                allocation.capability_exponent(),
            ))
        }
        None => None,
    };

    let mut cumulative = CountryValues::new();
    let mut weighted = CountryValues::new();
    for country in countries {
        let values = population.window(country, years.clone())?;
        let factors = capability.as_ref().map(|factors| &factors[country]);
        let sum = values
            .iter()
            .enumerate()
            .map(|(idx, pop)| pop * factors.map_or(1.0, |factors| factors[idx]))
            .sum();
        cumulative.insert(country.clone(), values.iter().sum());
        weighted.insert(country.clone(), sum);
    }

    let responsibility = allocation.responsibility_factors(
        params.historical_responsibility_year..=first_year.saturating_sub(1),
    )?;
    let adjusted = adjusted_population(&weighted, &responsibility.iter().collect::<Vec<_>>());
    let mut shares = normalise(&adjusted, "adjusted cumulative population")?;
    if let Some(sigma) = params.deviation_sigma() {
        shares = constrain_per_capita_deviation(&shares, &cumulative, sigma)?;
    }

    let shares: IndexMap<CountryID, Vec<f64>> = shares
        .into_iter()
        .map(|(country, share)| (country, vec![share]))
        .collect();
    let shares = shares_to_series(first_year, shares)?;
    Ok(allocation.finish(shares, None, None))
}
