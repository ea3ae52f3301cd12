//! The result of an allocation and operations for consuming it.
use crate::adjustment::NormalisedWeights;
use crate::allocation::{AllocationKind, Approach};
use crate::country::{CountryID, CountryValues};
use crate::error::{AllocationError, Result};
use crate::timeseries::TimeSeries;
use indexmap::IndexMap;

/// The unit given to share time series
pub const SHARE_UNIT: &str = "dimensionless";

/// Ratios which round to this many decimal places are reported in warnings
const WARNING_DECIMAL_PLACES: i32 = 2;

/// Information about how closely a convergence allocation met its cumulative targets.
///
/// Attached to an [`AllocationResult`] when targets could only be approximated (lenient mode).
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceDiagnostics {
    /// Whether the feasibility fallback was needed to find valid long-run shares
    pub fallback_used: bool,
    /// Cumulative share actually achieved by each country
    pub achieved: CountryValues,
    /// Achieved cumulative share divided by target, for each country
    pub ratios: CountryValues,
}

impl ConvergenceDiagnostics {
    /// Advisory messages for countries whose achieved share differs visibly from their target.
    ///
    /// Each message has the form `strict=false:<ratio>`, with the ratio rounded to two decimal
    /// places. Countries whose ratio rounds to 1.00 are omitted.
    pub fn warnings(&self) -> IndexMap<CountryID, String> {
        let scale = 10f64.powi(WARNING_DECIMAL_PLACES);
        self.ratios
            .iter()
            .filter_map(|(country, ratio)| {
                let rounded = (ratio * scale).round() / scale;
                let unchanged = (rounded - 1.0).abs() < 0.5 / scale;
                (!unchanged).then(|| (country.clone(), format!("strict=false:{rounded:.2}")))
            })
            .collect()
    }
}

/// The shares allocated to each country under one approach
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationResult {
    approach: Approach,
    weights: NormalisedWeights,
    convergence_speed: Option<f64>,
    shares: IndexMap<CountryID, TimeSeries>,
    diagnostics: Option<ConvergenceDiagnostics>,
}

impl AllocationResult {
    /// Create a new result
    pub(crate) fn new(
        approach: Approach,
        weights: NormalisedWeights,
        convergence_speed: Option<f64>,
        shares: IndexMap<CountryID, TimeSeries>,
        diagnostics: Option<ConvergenceDiagnostics>,
    ) -> Self {
        Self {
            approach,
            weights,
            convergence_speed,
            shares,
            diagnostics,
        }
    }

    /// The approach used
    pub fn approach(&self) -> Approach {
        self.approach
    }

    /// The adjustment weights, normalised by their sum
    pub fn weights(&self) -> NormalisedWeights {
        self.weights
    }

    /// The convergence speed found by the solver (convergence approaches only)
    pub fn convergence_speed(&self) -> Option<f64> {
        self.convergence_speed
    }

    /// Each country's share in each year
    pub fn shares(&self) -> &IndexMap<CountryID, TimeSeries> {
        &self.shares
    }

    /// Diagnostics, if targets were only approximated
    pub fn diagnostics(&self) -> Option<&ConvergenceDiagnostics> {
        self.diagnostics.as_ref()
    }

    /// The years covered by the shares
    pub fn years(&self) -> Option<std::ops::RangeInclusive<u32>> {
        self.shares.values().next().map(TimeSeries::years)
    }

    /// Convert shares to absolute amounts by multiplying by the World reference.
    ///
    /// For pathway allocations the reference must cover every year of the result; for budget
    /// allocations it must cover the allocation year. Undefined reference values give undefined
    /// absolute values.
    pub fn absolute(&self, reference: &TimeSeries) -> Result<IndexMap<CountryID, TimeSeries>> {
        let Some(years) = self.years() else {
            return Ok(IndexMap::new());
        };

        let missing = reference.missing_years(years.clone());
        if !missing.is_empty() {
            let years = match self.approach.kind() {
                AllocationKind::Pathway => missing,
                AllocationKind::Budget => vec![*years.start()],
            };
            return Err(AllocationError::MissingYears {
                table: "reference".into(),
                country: crate::country::WORLD.into(),
                years,
            });
        }

        self.shares
            .iter()
            .map(|(country, shares)| {
                let values = shares
                    .iter()
                    .map(|(year, share)| {
                        share * reference.get(year).unwrap_or(f64::NAN)
                    })
                    .collect();
                let absolute = TimeSeries::new(reference.unit(), shares.first_year(), values)?;
                Ok((country.clone(), absolute))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::series;
    use indexmap::indexmap;

    fn pathway_result() -> AllocationResult {
        AllocationResult::new(
            Approach::EqualPerCapita,
            NormalisedWeights::default(),
            None,
            indexmap! {
                "A".into() => TimeSeries::new(SHARE_UNIT, 2020, vec![0.25, 0.5]).unwrap(),
                "B".into() => TimeSeries::new(SHARE_UNIT, 2020, vec![0.75, 0.5]).unwrap(),
            },
            None,
        )
    }

    #[test]
    fn test_absolute_pathway() {
        let reference = series(2019, &[1.0, 40.0, f64::NAN, 7.0]);
        let absolute = pathway_result().absolute(&reference).unwrap();
        assert_eq!(absolute["A"].values()[0], 10.0);
        assert!(absolute["A"].values()[1].is_nan());
        assert_eq!(absolute["B"].first_year(), 2020);
        assert_eq!(absolute["B"].unit(), "Mt");
    }

    #[test]
    fn test_absolute_missing_years() {
        let reference = series(2020, &[40.0]);
        assert_eq!(
            pathway_result().absolute(&reference).unwrap_err(),
            AllocationError::MissingYears {
                table: "reference".into(),
                country: "World".into(),
                years: vec![2021]
            }
        );
    }

    #[test]
    fn test_absolute_budget() {
        let result = AllocationResult::new(
            Approach::EqualPerCapitaBudget,
            NormalisedWeights::default(),
            None,
            indexmap! {
                "A".into() => TimeSeries::new(SHARE_UNIT, 2020, vec![0.2]).unwrap(),
                "B".into() => TimeSeries::new(SHARE_UNIT, 2020, vec![0.8]).unwrap(),
            },
            None,
        );
        let absolute = result.absolute(&series(2020, &[500.0])).unwrap();
        assert_eq!(absolute["A"].values(), [100.0]);
        assert_eq!(absolute["B"].values(), [400.0]);

        assert!(result.absolute(&series(2025, &[500.0])).is_err());
    }

    #[test]
    fn test_warnings() {
        let diagnostics = ConvergenceDiagnostics {
            fallback_used: true,
            achieved: CountryValues::new(),
            ratios: indexmap! {
                "A".into() => 0.8712,
                "B".into() => 1.004,
                "C".into() => 1.2,
                "D".into() => f64::INFINITY,
            },
        };
        let warnings = diagnostics.warnings();
        assert_eq!(warnings.len(), 3);
        assert_eq!(warnings["A"], "strict=false:0.87");
        assert_eq!(warnings["C"], "strict=false:1.20");
        assert_eq!(warnings["D"], "strict=false:inf");
        assert!(!warnings.contains_key("B"));
    }
}
