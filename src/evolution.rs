//! Evolving shares year by year towards their long-run values.
use crate::country::{CountryID, CountryValues, total};
use crate::error::{AllocationError, Result};
use crate::result::SHARE_UNIT;
use crate::timeseries::TimeSeries;
use indexmap::IndexMap;
use std::ops::RangeInclusive;

/// Evolve shares from `initial` towards `long_run` at a constant speed.
///
/// The first year's shares are exactly `initial`. Each following year moves `speed` of the way
/// towards `long_run` and is then renormalised to sum to 1.
///
/// # Arguments
///
/// * `initial` - Shares in the first year of `years`
/// * `long_run` - The shares being converged towards
/// * `speed` - Convergence speed in `(0, 1]`
/// * `years` - The years to produce shares for
pub fn evolve_shares(
    initial: &CountryValues,
    long_run: &CountryValues,
    speed: f64,
    years: RangeInclusive<u32>,
) -> Result<IndexMap<CountryID, TimeSeries>> {
    let first_year = *years.start();
    let mut history: IndexMap<CountryID, Vec<f64>> = initial
        .iter()
        .map(|(country, share)| (country.clone(), vec![*share]))
        .collect();

    let mut current = initial.clone();
    for year in years.skip(1) {
        let raw: CountryValues = current
            .iter()
            .map(|(country, share)| {
                (country.clone(), share + speed * (long_run[country] - share))
            })
            .collect();

        let sum = total(&raw);
        let invalid: Vec<_> = raw
            .iter()
            .filter(|(_, share)| !share.is_finite())
            .map(|(country, _)| country.clone())
            .collect();
        if !invalid.is_empty() || !(sum.is_finite() && sum > 0.0) {
            return Err(AllocationError::NonFiniteShares {
                step: format!("when evolving shares to {year}"),
                countries: invalid,
            });
        }

        for (country, share) in &mut current {
            *share = raw[country] / sum;
            history[country].push(*share);
        }
    }

    history
        .into_iter()
        .map(|(country, values)| {
            let series = TimeSeries::new(SHARE_UNIT, first_year, values)?;
            Ok((country, series))
        })
        .collect()
}
