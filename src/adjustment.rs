//! Per-country adjustment factors for historical responsibility and economic capability.
//!
//! Each factor is derived from a metric (historical emissions or GDP, optionally per capita)
//! by [`relative_adjustment`], which maps larger metric values to smaller factors. Factors
//! multiply a country's population when building target shares, so a country with higher
//! historical emissions or greater capability receives a smaller share.
use crate::country::{CountryID, CountryValues, total};
use crate::error::{AllocationError, Result};
use crate::timeseries::{CountryTable, StationaryTable};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Serialize;
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};
use std::ops::RangeInclusive;

pub mod gini;
use gini::{GiniOptions, gini_adjusted_gdp};

/// Values for each country in each year of a horizon, in year order
pub type YearlyValues = IndexMap<CountryID, Vec<f64>>;

/// The weights given to responsibility and capability, as supplied by the caller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustmentWeights {
    responsibility: f64,
    capability: f64,
}

/// Weights normalised by their sum
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct NormalisedWeights {
    /// Normalised responsibility weight
    pub responsibility: f64,
    /// Normalised capability weight
    pub capability: f64,
}

impl AdjustmentWeights {
    /// Create a new weight pair.
    ///
    /// Each weight must be non-negative and together they must not exceed 1.
    pub fn new(responsibility: f64, capability: f64) -> Result<Self> {
        check_weight("responsibility_weight", responsibility)?;
        check_weight("capability_weight", capability)?;
        if responsibility + capability > 1.0 {
            return Err(AllocationError::WeightSumExceedsOne {
                responsibility,
                capability,
            });
        }

        Ok(Self {
            responsibility,
            capability,
        })
    }

    /// The responsibility weight as supplied
    pub fn responsibility(&self) -> f64 {
        self.responsibility
    }

    /// The capability weight as supplied
    pub fn capability(&self) -> f64 {
        self.capability
    }

    /// Divide both weights by their sum.
    ///
    /// If either weight is positive the results sum to exactly 1.0. If both are zero, both
    /// normalised weights are zero.
    pub fn normalised(&self) -> NormalisedWeights {
        let sum = self.responsibility + self.capability;
        if sum <= 0.0 {
            return NormalisedWeights::default();
        }

        let responsibility = self.responsibility / sum;
        NormalisedWeights {
            responsibility,
            capability: 1.0 - responsibility,
        }
    }
}

/// Check that a weight is non-negative
fn check_weight(name: &'static str, value: f64) -> Result<()> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(AllocationError::NegativeWeight { name, value })
    }
}

/// The transformation applied to a metric before it is raised to the adjustment exponent
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    DeserializeLabeledStringEnum,
    SerializeLabeledStringEnum,
)]
pub enum FunctionalForm {
    /// Inverse hyperbolic sine, which dampens differences between large values
    #[default]
    #[string = "asinh"]
    Asinh,
    /// The metric itself
    #[string = "power"]
    Power,
}

/// Map a metric value to an adjustment factor.
///
/// Non-positive and `NaN` values are treated as `1.0` (net sinks and non-emitters are given
/// minimal responsibility), so the result is always positive and finite for a finite exponent.
///
/// # Arguments
///
/// * `value` - The metric value
/// * `form` - The transformation to apply before exponentiation
/// * `exponent` - The normalised weight multiplied by the configured exponent
pub fn relative_adjustment(value: f64, form: FunctionalForm, exponent: f64) -> f64 {
    let value = if value > 0.0 { value } else { 1.0 };
    let transformed = match form {
        FunctionalForm::Asinh => value.asinh(),
        FunctionalForm::Power => value,
    };

    transformed.powf(-exponent)
}

/// Apply [`relative_adjustment`] to each country's metric
pub fn adjustment_factors(
    metric: &CountryValues,
    form: FunctionalForm,
    exponent: f64,
) -> CountryValues {
    metric
        .iter()
        .map(|(country, value)| (country.clone(), relative_adjustment(*value, form, exponent)))
        .collect()
}

/// Apply [`relative_adjustment`] to each country's metric in each year
pub fn yearly_adjustment_factors(
    metric: &YearlyValues,
    form: FunctionalForm,
    exponent: f64,
) -> YearlyValues {
    metric
        .iter()
        .map(|(country, values)| {
            let factors = values
                .iter()
                .map(|value| relative_adjustment(*value, form, exponent))
                .collect();
            (country.clone(), factors)
        })
        .collect()
}

/// Historical emissions for each country over `window`, optionally per capita.
///
/// # Arguments
///
/// * `emissions` - Historical emissions
/// * `population` - Population, used when `per_capita` is true
/// * `countries` - The countries being allocated (`World` must not be included)
/// * `window` - The years counted towards responsibility
/// * `per_capita` - Whether to divide by summed population over the same window
///
/// # Returns
///
/// The metric for each country, or an error if data is missing, population is zero or the
/// metric sums to zero or less.
pub fn responsibility_metric(
    emissions: &CountryTable,
    population: &CountryTable,
    countries: &[CountryID],
    window: RangeInclusive<u32>,
    per_capita: bool,
) -> Result<CountryValues> {
    let mut metric = emissions.sum_over(countries, window.clone())?;

    if per_capita {
        let population = population.sum_over(countries, window)?;
        check_nonzero_population(&population, "per-capita historical responsibility")?;
        for (country, value) in &mut metric {
            *value /= population[country];
        }
    }

    check_positive_total(&metric, "historical responsibility")?;

    Ok(metric)
}

/// Whether capability is measured per year or cumulatively up to each year
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityWindow {
    /// GDP in each year on its own
    Yearly,
    /// GDP summed from the start of the horizon up to each year
    Running,
}

/// GDP for each country and year, with the Gini adjustment applied if requested
pub fn adjusted_gdp(
    gdp: &CountryTable,
    population: &CountryTable,
    gini: Option<(&StationaryTable, &GiniOptions)>,
    countries: &[CountryID],
    years: RangeInclusive<u32>,
) -> Result<YearlyValues> {
    countries
        .iter()
        .map(|country| {
            let gdp_values = gdp.window(country, years.clone())?;
            let Some((gini_table, options)) = gini else {
                return Ok((country.clone(), gdp_values.to_vec()));
            };

            let coefficient = gini_table.get(country)?;
            let pop_values = population.window(country, years.clone())?;
            let adjusted: Vec<f64> = gdp_values
                .iter()
                .zip(pop_values)
                .map(|(&gdp, &pop)| {
                    if options.is_noop() {
                        return Ok(gdp);
                    }
                    if pop <= 0.0 {
                        return Err(AllocationError::ZeroPopulation {
                            quantity: "Gini-adjusted GDP",
                            countries: vec![country.clone()],
                        });
                    }
                    Ok(gini_adjusted_gdp(gdp, pop, coefficient, options))
                })
                .try_collect()?;
            Ok((country.clone(), adjusted))
        })
        .collect()
}

/// Capability metric accumulated over the whole horizon.
///
/// This is cumulative GDP divided by cumulative population when `per_capita`, otherwise
/// cumulative GDP.
pub fn capability_metric(
    gdp: &YearlyValues,
    population: &CountryTable,
    years: RangeInclusive<u32>,
    per_capita: bool,
) -> Result<CountryValues> {
    let countries = gdp.keys().cloned().collect_vec();
    let mut metric: CountryValues = gdp
        .iter()
        .map(|(country, values)| (country.clone(), values.iter().sum()))
        .collect();

    if per_capita {
        let population = population.sum_over(&countries, years)?;
        check_nonzero_population(&population, "per-capita capability")?;
        for (country, value) in &mut metric {
            *value /= population[country];
        }
    }

    check_positive_total(&metric, "capability")?;

    Ok(metric)
}

/// Capability metric for each year of the horizon.
///
/// With [`CapabilityWindow::Running`] each year's value uses GDP and population summed from the
/// start of `years`; with [`CapabilityWindow::Yearly`] each year stands alone.
pub fn yearly_capability_metric(
    gdp: &YearlyValues,
    population: &CountryTable,
    years: RangeInclusive<u32>,
    per_capita: bool,
    window: CapabilityWindow,
) -> Result<YearlyValues> {
    let mut zero_population = Vec::new();
    let mut metric = YearlyValues::new();
    for (country, gdp_values) in gdp {
        let pop_values = population.window(country, years.clone())?;
        let (mut gdp_acc, mut pop_acc) = (0.0, 0.0);
        let mut values = Vec::with_capacity(gdp_values.len());
        for (gdp, pop) in gdp_values.iter().zip(pop_values) {
            match window {
                CapabilityWindow::Running => {
                    gdp_acc += gdp;
                    pop_acc += pop;
                }
                CapabilityWindow::Yearly => (gdp_acc, pop_acc) = (*gdp, *pop),
            }

            if per_capita {
                if pop_acc <= 0.0 {
                    zero_population.push(country.clone());
                    break;
                }
                values.push(gdp_acc / pop_acc);
            } else {
                values.push(gdp_acc);
            }
        }
        metric.insert(country.clone(), values);
    }

    if !zero_population.is_empty() {
        return Err(AllocationError::ZeroPopulation {
            quantity: "per-capita capability",
            countries: zero_population,
        });
    }

    let year_count = years.count();
    for i in 0..year_count {
        let year_total: f64 = metric.values().map(|values| values[i]).sum();
        if year_total.is_nan() || year_total <= 0.0 {
            return Err(AllocationError::NonPositiveMetric {
                metric: "capability",
                total: year_total,
            });
        }
    }

    Ok(metric)
}

/// Check that no country has zero summed population
fn check_nonzero_population(population: &CountryValues, quantity: &'static str) -> Result<()> {
    let zero: Vec<_> = population
        .iter()
        .filter(|(_, pop)| **pop <= 0.0)
        .map(|(country, _)| country.clone())
        .collect();

    if zero.is_empty() {
        Ok(())
    } else {
        Err(AllocationError::ZeroPopulation {
            quantity,
            countries: zero,
        })
    }
}

/// Check that a metric sums to a positive number across countries
fn check_positive_total(metric: &CountryValues, name: &'static str) -> Result<()> {
    let sum = total(metric);
    if sum > 0.0 {
        Ok(())
    } else {
        Err(AllocationError::NonPositiveMetric {
            metric: name,
            total: sum,
        })
    }
}
