//! Cumulative per-capita convergence: pathways which start from current emission shares and
//! converge so that each country's cumulative share meets its (adjusted) population target.
use super::Allocation;
use crate::adjustment::{adjustment_factors, capability_metric};
use crate::convergence::{ConvergenceProblem, SolverOptions, YearFractions, solve};
use crate::country::CountryValues;
use crate::error::Result;
use crate::evolution::evolve_shares;
use crate::result::AllocationResult;
use crate::target::{normalise, target_shares};
use crate::validation::check_world_consistency;
use log::debug;

/// Target cumulative shares over the horizon.
///
/// These follow cumulative population, scaled by responsibility (historical emissions up to and
/// including the first allocation year) and capability (cumulative GDP over the horizon).
fn cumulative_targets(allocation: &Allocation) -> Result<CountryValues> {
    let params = allocation.params;
    let years = allocation.years.clone();
    let population = &allocation.data.population;
    let cumulative_population = population.sum_over(&allocation.countries, years.clone())?;

    let responsibility = allocation.responsibility_factors(
        params.historical_responsibility_year..=allocation.first_year(),
    )?;
    let capability = match allocation.capability_gdp(years.clone())? {
        Some(gdp) => {
            let metric =
                capability_metric(&gdp, population, years, params.capability_per_capita)?;
            Some(adjustment_factors(
                &metric,
                params.capability_functional_form,
                allocation.capability_exponent(),
            ))
        }
        None => None,
    };

    let factors: Vec<&CountryValues> = responsibility.iter().chain(capability.iter()).collect();
    target_shares(&cumulative_population, &factors, params.deviation_sigma())
}

/// Allocate a pathway by converging from first-year emission shares at the smallest speed which
/// meets the cumulative targets
pub(crate) fn allocate(allocation: &Allocation) -> Result<AllocationResult> {
    let params = allocation.params;
    let first_year = allocation.first_year();
    let reference = allocation.reference()?;

    let emissions = check_world_consistency(
        allocation.emissions()?,
        &allocation.countries,
        reference,
        first_year,
    )?;
    let initial = normalise(&emissions, "first-year emissions")?;
    let targets = cumulative_targets(allocation)?;
    let fractions = YearFractions::from_pathway(reference, allocation.years.clone())?;
    debug!(
        "Converging {} countries over {}-{}",
        allocation.countries.len(),
        fractions.first_year(),
        fractions.last_year()
    );

    let problem = ConvergenceProblem {
        initial: &initial,
        targets: &targets,
        fractions: &fractions,
    };
    let options = SolverOptions {
        max_speed: params.max_convergence_speed,
        strict: params.strict,
    };
    let solution = solve(&problem, &options, &allocation.context())?;

    let shares = evolve_shares(
        &initial,
        &solution.long_run,
        solution.speed,
        allocation.years.clone(),
    )?;

    Ok(allocation.finish(shares, Some(solution.speed), solution.diagnostics))
}
