//! Building target shares from population and adjustment factors.
use crate::country::{CountryValues, total};
use crate::error::{AllocationError, Result};

/// Scale non-negative values so that they sum to 1.
///
/// # Arguments
///
/// * `values` - The values to normalise
/// * `step` - Description of the calculation, used in error messages
///
/// # Returns
///
/// The normalised values, or an error if they do not have a positive, finite sum.
pub fn normalise(values: &CountryValues, step: &str) -> Result<CountryValues> {
    let sum = total(values);
    if !(sum.is_finite() && sum > 0.0) {
        let countries = values
            .iter()
            .filter(|(_, value)| !value.is_finite())
            .map(|(country, _)| country.clone())
            .collect();
        return Err(AllocationError::NonFiniteShares {
            step: format!("when normalising {step} (total {sum})"),
            countries,
        });
    }

    Ok(values
        .iter()
        .map(|(country, value)| (country.clone(), value / sum))
        .collect())
}

/// Multiply each country's population by each of the given adjustment factors
pub fn adjusted_population(
    population: &CountryValues,
    factors: &[&CountryValues],
) -> CountryValues {
    population
        .iter()
        .map(|(country, pop)| {
            let adjusted = factors.iter().fold(*pop, |acc, f| acc * f[country]);
            (country.clone(), adjusted)
        })
        .collect()
}

/// Limit how far target shares may deviate from equal per-capita shares.
///
/// Deviations from the population baseline are clipped to `max_deviation_sigma` times their
/// population-weighted standard deviation, then the result is renormalised. A sigma of zero gives
/// the baseline exactly.
///
/// # Arguments
///
/// * `target` - Target shares summing to 1
/// * `population` - Population for the same countries (for a single year or cumulative)
/// * `max_deviation_sigma` - The clipping threshold in standard deviations
pub fn constrain_deviation(
    target: &CountryValues,
    population: &CountryValues,
    max_deviation_sigma: f64,
) -> Result<CountryValues> {
    if max_deviation_sigma.is_nan() || max_deviation_sigma < 0.0 {
        return Err(AllocationError::ParameterOutOfRange {
            name: "max_deviation_sigma",
            value: max_deviation_sigma,
            range: "[0, inf)",
        });
    }

    let baseline = normalise(population, "population baseline")?;
    let total_population = total(population);
    let weighted_variance: f64 = target
        .iter()
        .map(|(country, share)| (share - baseline[country]).powi(2) * population[country])
        .sum::<f64>()
        / total_population;
    let max_deviation = max_deviation_sigma * weighted_variance.sqrt();

    if max_deviation <= 0.0 {
        return Ok(baseline);
    }

    let constrained: CountryValues = target
        .iter()
        .map(|(country, share)| {
            let base = baseline[country];
            let deviation = (share - base).clamp(-max_deviation, max_deviation);
            (country.clone(), base + deviation)
        })
        .collect();

    normalise(&constrained, "deviation-constrained shares")
}

/// Limit how far each country's share per person may deviate from the equal per-capita share.
///
/// Per-capita shares (`share / population`) are clipped to within `max_deviation_sigma`
/// population-weighted standard deviations of `1 / Σpopulation`, converted back to shares and
/// renormalised. Unlike [`constrain_deviation`], this restrains countries with small populations
/// whose adjustment factors are extreme.
///
/// # Arguments
///
/// * `shares` - Shares summing to 1
/// * `population` - Population for the same countries (for a single year or cumulative)
/// * `max_deviation_sigma` - The clipping threshold in standard deviations
pub fn constrain_per_capita_deviation(
    shares: &CountryValues,
    population: &CountryValues,
    max_deviation_sigma: f64,
) -> Result<CountryValues> {
    if max_deviation_sigma.is_nan() || max_deviation_sigma < 0.0 {
        return Err(AllocationError::ParameterOutOfRange {
            name: "max_deviation_sigma",
            value: max_deviation_sigma,
            range: "[0, inf)",
        });
    }

    let empty: Vec<_> = population
        .iter()
        .filter(|(_, pop)| **pop <= 0.0 || pop.is_nan())
        .map(|(country, _)| country.clone())
        .collect();
    if !empty.is_empty() {
        return Err(AllocationError::ZeroPopulation {
            quantity: "per-capita deviation constraint",
            countries: empty,
        });
    }

    // Each country's baseline share per person is 1 / Σpopulation
    let baseline = normalise(population, "population baseline")?;
    let per_capita_deviation: CountryValues = shares
        .iter()
        .map(|(country, share)| {
            let deviation = (share - baseline[country]) / population[country];
            (country.clone(), deviation)
        })
        .collect();
    let variance = per_capita_deviation
        .iter()
        .map(|(country, deviation)| deviation.powi(2) * population[country])
        .sum::<f64>()
        / total(population);
    let max_deviation = max_deviation_sigma * variance.sqrt();

    if max_deviation <= 0.0 {
        return Ok(baseline);
    }

    let constrained: CountryValues = per_capita_deviation
        .iter()
        .map(|(country, deviation)| {
            let deviation = deviation.clamp(-max_deviation, max_deviation);
            (country.clone(), baseline[country] + deviation * population[country])
        })
        .collect();

    normalise(&constrained, "per-capita deviation-constrained shares")
}

/// Cumulative target shares: population scaled by the adjustment factors, normalised and then
/// optionally deviation-constrained.
///
/// # Arguments
///
/// * `population` - Population for each country (cumulative over the horizon, or one year)
/// * `factors` - Adjustment factors to apply
/// * `max_deviation_sigma` - Deviation constraint, if any
pub fn target_shares(
    population: &CountryValues,
    factors: &[&CountryValues],
    max_deviation_sigma: Option<f64>,
) -> Result<CountryValues> {
    let adjusted = adjusted_population(population, factors);
    let target = normalise(&adjusted, "adjusted population")?;

    match max_deviation_sigma {
        Some(sigma) => constrain_deviation(&target, population, sigma),
        None => Ok(target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::country::CountryID;
    use float_cmp::assert_approx_eq;
    use indexmap::indexmap;

    fn values(items: &[(&str, f64)]) -> CountryValues {
        items
            .iter()
            .map(|(country, value)| (CountryID::new(country), *value))
            .collect()
    }

    #[test]
    fn test_normalise() {
        let shares = normalise(&values(&[("A", 1.0), ("B", 3.0)]), "test").unwrap();
        assert_eq!(shares, values(&[("A", 0.25), ("B", 0.75)]));
    }

    #[test]
    fn test_normalise_zero() {
        assert_eq!(
            normalise(&values(&[("A", 0.0), ("B", 0.0)]), "test")
                .unwrap_err()
                .to_string(),
            "Invalid shares when normalising test (total 0): "
        );
    }

    #[test]
    fn test_adjusted_population() {
        let population = values(&[("A", 10.0), ("B", 20.0)]);
        let r = values(&[("A", 0.5), ("B", 1.0)]);
        let c = values(&[("A", 2.0), ("B", 0.25)]);
        assert_eq!(
            adjusted_population(&population, &[&r, &c]),
            values(&[("A", 10.0), ("B", 5.0)])
        );
        assert_eq!(adjusted_population(&population, &[]), population);
    }

    #[test]
    fn test_constrain_deviation_zero_sigma_is_baseline() {
        let population = values(&[("A", 1.0), ("B", 1.0), ("C", 2.0)]);
        let target = values(&[("A", 0.7), ("B", 0.2), ("C", 0.1)]);
        let constrained = constrain_deviation(&target, &population, 0.0).unwrap();
        assert_eq!(constrained, values(&[("A", 0.25), ("B", 0.25), ("C", 0.5)]));
    }

    #[test]
    fn test_constrain_deviation_large_sigma_is_unchanged() {
        let population = values(&[("A", 1.0), ("B", 1.0)]);
        let target = values(&[("A", 0.6), ("B", 0.4)]);
        let constrained = constrain_deviation(&target, &population, 10.0).unwrap();
        assert_approx_eq!(f64, constrained["A"], 0.6);
        assert_approx_eq!(f64, constrained["B"], 0.4);
    }

    #[test]
    fn test_constrain_deviation_clips_outlier() {
        // Baseline is 0.25 each; A deviates by +0.45 and the others by -0.15
        let population = values(&[("A", 1.0), ("B", 1.0), ("C", 1.0), ("D", 1.0)]);
        let target = values(&[("A", 0.7), ("B", 0.1), ("C", 0.1), ("D", 0.1)]);
        let constrained = constrain_deviation(&target, &population, 1.0).unwrap();

        // std = sqrt((0.45^2 + 3 * 0.15^2) / 4) = sqrt(0.0675)
        let max_dev = 0.0675_f64.sqrt();
        let raw_a = 0.25 + max_dev;
        let raw_other = 0.1;
        let sum = raw_a + 3.0 * raw_other;
        assert_approx_eq!(f64, constrained["A"], raw_a / sum);
        assert_approx_eq!(f64, constrained["B"], raw_other / sum);
        assert_approx_eq!(f64, constrained.values().sum::<f64>(), 1.0);
    }

    #[test]
    fn test_constrain_deviation_negative_sigma() {
        let population = indexmap! {"A".into() => 1.0};
        assert!(constrain_deviation(&population, &population, -1.0).is_err());
    }

    #[test]
    fn test_constrain_per_capita_deviation_small_country() {
        // One person with a tenth of the shares beside a thousand people with the rest
        let population = values(&[("A", 1.0), ("B", 1000.0)]);
        let shares = values(&[("A", 100.0 / 1100.0), ("B", 1000.0 / 1100.0)]);
        let constrained = constrain_per_capita_deviation(&shares, &population, 2.0).unwrap();

        let total_population = 1001.0;
        let mean = 1.0 / total_population;
        let variance = ((shares["A"] - mean).powi(2)
            + (shares["B"] / 1000.0 - mean).powi(2) * 1000.0)
            / total_population;
        let raw_a = mean + 2.0 * variance.sqrt();
        let expected_a = raw_a / (raw_a + shares["B"]);
        assert_approx_eq!(f64, constrained["A"], expected_a, epsilon = 1e-12);
        assert!(constrained["A"] < 0.008);
        assert_approx_eq!(f64, constrained.values().sum::<f64>(), 1.0, epsilon = 1e-12);

        // The share-space constraint leaves the small country untouched
        let share_space = constrain_deviation(&shares, &population, 2.0).unwrap();
        assert_approx_eq!(f64, share_space["A"], shares["A"], epsilon = 1e-12);
    }

    #[test]
    fn test_constrain_per_capita_deviation_zero_sigma_is_baseline() {
        let population = values(&[("A", 1.0), ("B", 3.0)]);
        let shares = values(&[("A", 0.9), ("B", 0.1)]);
        let constrained = constrain_per_capita_deviation(&shares, &population, 0.0).unwrap();
        assert_approx_eq!(f64, constrained["A"], 0.25, epsilon = 1e-12);
        assert_approx_eq!(f64, constrained["B"], 0.75, epsilon = 1e-12);
    }

    #[test]
    fn test_constrain_per_capita_deviation_zero_population() {
        let population = values(&[("A", 0.0), ("B", 3.0)]);
        let shares = values(&[("A", 0.5), ("B", 0.5)]);
        assert_eq!(
            constrain_per_capita_deviation(&shares, &population, 1.0).unwrap_err(),
            AllocationError::ZeroPopulation {
                quantity: "per-capita deviation constraint",
                countries: vec!["A".into()],
            }
        );
    }

    #[test]
    fn test_target_shares() {
        let population = values(&[("A", 1.0), ("B", 1.0)]);
        let factors = values(&[("A", 3.0), ("B", 1.0)]);
        let targets = target_shares(&population, &[&factors], None).unwrap();
        assert_eq!(targets, values(&[("A", 0.75), ("B", 0.25)]));

        let constrained = target_shares(&population, &[&factors], Some(0.0)).unwrap();
        assert_eq!(constrained, values(&[("A", 0.5), ("B", 0.5)]));
    }
}
