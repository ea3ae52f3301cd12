//! Allocation approaches and the entry point for running an allocation.
//!
//! Each equity approach is a variant of [`Approach`]. [`allocate`] checks the parameters and
//! input tables, dispatches to the implementation for the requested approach and validates the
//! shares it produces.
use crate::adjustment::{
    AdjustmentWeights, NormalisedWeights, YearlyValues, adjusted_gdp, adjustment_factors,
    responsibility_metric,
};
use crate::country::{CountryID, CountryValues, WORLD};
use crate::error::{AllocationContext, AllocationError, Result};
use crate::parameters::AllocationParameters;
use crate::result::{AllocationResult, ConvergenceDiagnostics, SHARE_UNIT};
use crate::timeseries::{CountryTable, StationaryTable, TimeSeries};
use crate::validation::{check_inputs, check_shares, required};
use indexmap::IndexMap;
use log::{info, warn};
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};
use std::ops::RangeInclusive;

pub mod budget;
pub mod convergence;
pub mod per_capita;

/// Whether an approach allocates a pathway or a budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationKind {
    /// A share for each year of the horizon
    Pathway,
    /// A single share of a cumulative budget
    Budget,
}

/// An equity approach for allocating emissions between countries
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, DeserializeLabeledStringEnum, SerializeLabeledStringEnum,
)]
pub enum Approach {
    /// Each year's shares follow that year's population
    #[string = "equal-per-capita"]
    EqualPerCapita,
    /// Population shares adjusted for responsibility and capability
    #[string = "per-capita-adjusted"]
    PerCapitaAdjusted,
    /// As [`Approach::PerCapitaAdjusted`], with Gini-adjusted GDP
    #[string = "per-capita-adjusted-gini"]
    PerCapitaAdjustedGini,
    /// Linear blend from current emission shares to population shares
    #[string = "per-capita-convergence"]
    PerCapitaConvergence,
    /// Convergence from emission shares to meet cumulative population shares
    #[string = "cumulative-per-capita-convergence"]
    CumulativePerCapitaConvergence,
    /// As [`Approach::CumulativePerCapitaConvergence`], with adjusted targets
    #[string = "cumulative-per-capita-convergence-adjusted"]
    CumulativePerCapitaConvergenceAdjusted,
    /// As [`Approach::CumulativePerCapitaConvergenceAdjusted`], with Gini-adjusted GDP
    #[string = "cumulative-per-capita-convergence-gini-adjusted"]
    CumulativePerCapitaConvergenceGiniAdjusted,
    /// Budget shares following cumulative population
    #[string = "equal-per-capita-budget"]
    EqualPerCapitaBudget,
    /// Budget shares following adjusted cumulative population
    #[string = "per-capita-adjusted-budget"]
    PerCapitaAdjustedBudget,
    /// As [`Approach::PerCapitaAdjustedBudget`], with Gini-adjusted GDP
    #[string = "per-capita-adjusted-gini-budget"]
    PerCapitaAdjustedGiniBudget,
}

impl Approach {
    /// Every approach
    pub const ALL: [Approach; 10] = [
        Self::EqualPerCapita,
        Self::PerCapitaAdjusted,
        Self::PerCapitaAdjustedGini,
        Self::PerCapitaConvergence,
        Self::CumulativePerCapitaConvergence,
        Self::CumulativePerCapitaConvergenceAdjusted,
        Self::CumulativePerCapitaConvergenceGiniAdjusted,
        Self::EqualPerCapitaBudget,
        Self::PerCapitaAdjustedBudget,
        Self::PerCapitaAdjustedGiniBudget,
    ];

    /// The approach's name, as used in parameter files
    pub fn name(self) -> &'static str {
        match self {
            Self::EqualPerCapita => "equal-per-capita",
            Self::PerCapitaAdjusted => "per-capita-adjusted",
            Self::PerCapitaAdjustedGini => "per-capita-adjusted-gini",
            Self::PerCapitaConvergence => "per-capita-convergence",
            Self::CumulativePerCapitaConvergence => "cumulative-per-capita-convergence",
            Self::CumulativePerCapitaConvergenceAdjusted => {
                "cumulative-per-capita-convergence-adjusted"
            }
            Self::CumulativePerCapitaConvergenceGiniAdjusted => {
                "cumulative-per-capita-convergence-gini-adjusted"
            }
            Self::EqualPerCapitaBudget => "equal-per-capita-budget",
            Self::PerCapitaAdjustedBudget => "per-capita-adjusted-budget",
            Self::PerCapitaAdjustedGiniBudget => "per-capita-adjusted-gini-budget",
        }
    }

    /// Look up an approach by name, ignoring case
    pub fn from_name(name: &str) -> Result<Self> {
        name.parse().map_err(|_| AllocationError::UnknownApproach(name.to_string()))
    }

    /// Whether this approach allocates a pathway or a budget
    pub fn kind(self) -> AllocationKind {
        match self {
            Self::EqualPerCapitaBudget
            | Self::PerCapitaAdjustedBudget
            | Self::PerCapitaAdjustedGiniBudget => AllocationKind::Budget,
            _ => AllocationKind::Pathway,
        }
    }

    /// Whether responsibility and capability adjustments apply
    pub fn is_adjusted(self) -> bool {
        matches!(
            self,
            Self::PerCapitaAdjusted
                | Self::PerCapitaAdjustedGini
                | Self::CumulativePerCapitaConvergenceAdjusted
                | Self::CumulativePerCapitaConvergenceGiniAdjusted
                | Self::PerCapitaAdjustedBudget
                | Self::PerCapitaAdjustedGiniBudget
        )
    }

    /// Whether GDP is adjusted for income inequality
    pub fn uses_gini(self) -> bool {
        matches!(
            self,
            Self::PerCapitaAdjustedGini
                | Self::CumulativePerCapitaConvergenceGiniAdjusted
                | Self::PerCapitaAdjustedGiniBudget
        )
    }

    /// Whether the convergence speed solver is used
    pub fn uses_solver(self) -> bool {
        matches!(
            self,
            Self::CumulativePerCapitaConvergence
                | Self::CumulativePerCapitaConvergenceAdjusted
                | Self::CumulativePerCapitaConvergenceGiniAdjusted
        )
    }

    /// Whether shares start from current emission shares
    pub fn needs_emissions(self) -> bool {
        self.uses_solver() || self == Self::PerCapitaConvergence
    }

    /// Whether the `convergence_year` parameter is needed
    pub fn uses_convergence_year(self) -> bool {
        self == Self::PerCapitaConvergence
    }
}

/// The tables an allocation draws on.
///
/// All tables must already be in consistent units. Which tables are needed depends on the
/// approach and parameters (see [`crate::validation::check_required_tables`]).
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationData {
    /// Population for each country; its non-`World` rows define the countries allocated to
    pub population: CountryTable,
    /// Historical and current emissions for each country
    pub emissions: Option<CountryTable>,
    /// GDP for each country
    pub gdp: Option<CountryTable>,
    /// Gini coefficient for each country
    pub gini: Option<StationaryTable>,
    /// The World emissions pathway or remaining budget
    pub reference: Option<TimeSeries>,
}

/// Everything an approach implementation needs to know about the allocation being run
pub(crate) struct Allocation<'a> {
    /// The parameters supplied
    pub params: &'a AllocationParameters,
    /// The input tables
    pub data: &'a AllocationData,
    /// The countries being allocated between
    pub countries: Vec<CountryID>,
    /// Adjustment weights (zero for unadjusted approaches)
    pub weights: NormalisedWeights,
    /// The allocation horizon
    pub years: RangeInclusive<u32>,
}

impl Allocation<'_> {
    /// The first allocation year
    pub fn first_year(&self) -> u32 {
        *self.years.start()
    }

    /// The emissions table
    pub fn emissions(&self) -> Result<&CountryTable> {
        required(
            self.data.emissions.as_ref(),
            "emissions",
            "approach",
            self.params.approach,
        )
    }

    /// The reference pathway
    pub fn reference(&self) -> Result<&TimeSeries> {
        required(
            self.data.reference.as_ref(),
            "reference",
            "approach",
            self.params.approach,
        )
    }

    /// Responsibility factors for historical emissions over `window`, if responsibility applies
    pub fn responsibility_factors(
        &self,
        window: RangeInclusive<u32>,
    ) -> Result<Option<CountryValues>> {
        if self.weights.responsibility <= 0.0 {
            return Ok(None);
        }

        let emissions = required(
            self.data.emissions.as_ref(),
            "emissions",
            "responsibility_weight",
            self.params.responsibility_weight,
        )?;
        let metric = responsibility_metric(
            emissions,
            &self.data.population,
            &self.countries,
            window,
            self.params.responsibility_per_capita,
        )?;

        Ok(Some(adjustment_factors(
            &metric,
            self.params.responsibility_functional_form,
            self.weights.responsibility * self.params.responsibility_exponent,
        )))
    }

    /// GDP over `years` (Gini-adjusted for Gini approaches), if capability applies
    pub fn capability_gdp(&self, years: RangeInclusive<u32>) -> Result<Option<YearlyValues>> {
        if self.weights.capability <= 0.0 {
            return Ok(None);
        }

        let gdp = required(
            self.data.gdp.as_ref(),
            "gdp",
            "capability_weight",
            self.params.capability_weight,
        )?;
        let options = self.params.gini_options()?;
        let gini = if self.params.approach.uses_gini() {
            let table = required(
                self.data.gini.as_ref(),
                "gini",
                "approach",
                self.params.approach,
            )?;
            if options.is_noop() {
                warn!(
                    "The Gini adjustment has no effect with income_floor = {} and \
                    max_gini_adjustment = {}",
                    options.income_floor(),
                    self.params.max_gini_adjustment
                );
            }
            Some((table, &options))
        } else {
            None
        };

        adjusted_gdp(gdp, &self.data.population, gini, &self.countries, years).map(Some)
    }

    /// The exponent applied to the capability metric
    pub fn capability_exponent(&self) -> f64 {
        self.weights.capability * self.params.capability_exponent
    }

    /// The parameters, in the form reported in errors
    pub fn context(&self) -> AllocationContext {
        AllocationContext {
            approach: self.params.approach.to_string(),
            responsibility_weight: self.params.responsibility_weight,
            capability_weight: self.params.capability_weight,
            first_year: *self.years.start(),
            last_year: *self.years.end(),
            max_convergence_speed: self.params.max_convergence_speed,
            max_deviation_sigma: self.params.deviation_sigma(),
        }
    }

    /// Package shares into a result
    pub fn finish(
        &self,
        shares: IndexMap<CountryID, TimeSeries>,
        convergence_speed: Option<f64>,
        diagnostics: Option<ConvergenceDiagnostics>,
    ) -> AllocationResult {
        AllocationResult::new(
            self.params.approach,
            self.weights,
            convergence_speed,
            shares,
            diagnostics,
        )
    }
}

/// Turn a share for each country and year into time series
pub(crate) fn shares_to_series(
    first_year: u32,
    shares: IndexMap<CountryID, Vec<f64>>,
) -> Result<IndexMap<CountryID, TimeSeries>> {
    shares
        .into_iter()
        .map(|(country, values)| Ok((country, TimeSeries::new(SHARE_UNIT, first_year, values)?)))
        .collect()
}

/// The years an allocation covers.
///
/// Budgets and pathways without a reference end at the last year covered by every country's
/// population. Pathways with a reference end at the reference's last year.
fn horizon(params: &AllocationParameters, data: &AllocationData) -> Result<RangeInclusive<u32>> {
    let first_year = params.first_allocation_year;
    let reference = match params.approach.kind() {
        AllocationKind::Pathway => data.reference.as_ref(),
        AllocationKind::Budget => None,
    };

    let (table, country, last_year) = match reference {
        Some(reference) => ("reference", CountryID::new(WORLD), reference.last_year()),
        None => {
            let population = &data.population;
            let (country, ts) = population
                .iter()
                .filter(|(country, _)| !country.is_world())
                .min_by_key(|(_, ts)| ts.last_year())
                .ok_or_else(|| AllocationError::MissingCountries {
                    table: population.name().to_string(),
                    countries: Vec::new(),
                })?;
            (population.name(), country.clone(), ts.last_year())
        }
    };

    if last_year < first_year {
        return Err(AllocationError::MissingYears {
            table: table.to_string(),
            country,
            years: vec![first_year],
        });
    }

    Ok(first_year..=last_year)
}

/// Allocate shares between countries.
///
/// # Arguments
///
/// * `params` - The approach and its parameters
/// * `data` - The input tables
///
/// # Returns
///
/// The shares for each country, or an error if the parameters or data are invalid or (in strict
/// mode) the cumulative targets cannot be met.
pub fn allocate(params: &AllocationParameters, data: &AllocationData) -> Result<AllocationResult> {
    params.validate()?;
    let countries = check_inputs(params, data)?;
    let years = horizon(params, data)?;

    let approach = params.approach;
    let weights = if approach.is_adjusted() {
        AdjustmentWeights::new(params.responsibility_weight, params.capability_weight)?
            .normalised()
    } else {
        if params.responsibility_weight > 0.0 || params.capability_weight > 0.0 {
            warn!("Adjustment weights are ignored by the {approach} approach");
        }
        NormalisedWeights::default()
    };

    info!(
        "Allocating between {} countries with the {approach} approach ({}-{})",
        countries.len(),
        years.start(),
        years.end()
    );
    let allocation = Allocation {
        params,
        data,
        countries,
        weights,
        years,
    };

    let result = match approach {
        Approach::EqualPerCapita | Approach::PerCapitaAdjusted | Approach::PerCapitaAdjustedGini => {
            per_capita::allocate(&allocation)?
        }
        Approach::PerCapitaConvergence => per_capita::allocate_blend(&allocation)?,
        Approach::CumulativePerCapitaConvergence
        | Approach::CumulativePerCapitaConvergenceAdjusted
        | Approach::CumulativePerCapitaConvergenceGiniAdjusted => {
            convergence::allocate(&allocation)?
        }
        Approach::EqualPerCapitaBudget
        | Approach::PerCapitaAdjustedBudget
        | Approach::PerCapitaAdjustedGiniBudget => budget::allocate(&allocation)?,
    };

    check_shares(result.shares(), data.reference.as_ref())?;

    if let Some(diagnostics) = result.diagnostics() {
        for (country, warning) in diagnostics.warnings() {
            warn!("{country}: {warning}");
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{country_table, series};
    use rstest::rstest;

    #[test]
    fn test_approach_names_round_trip() {
        for approach in Approach::ALL {
            assert_eq!(approach.name().parse::<Approach>().unwrap(), approach);
            assert_eq!(approach.to_string(), approach.name());
        }
    }

    #[test]
    fn test_unknown_approach() {
        assert_eq!(
            Approach::from_name("equal-per-person").unwrap_err(),
            AllocationError::UnknownApproach("equal-per-person".into())
        );
    }

    #[test]
    fn test_approach_from_name_ignores_case() {
        assert_eq!(
            Approach::from_name("Equal-Per-Capita-Budget").unwrap(),
            Approach::EqualPerCapitaBudget
        );
    }

    #[rstest]
    #[case(Approach::EqualPerCapitaBudget, AllocationKind::Budget)]
    #[case(Approach::PerCapitaAdjustedGiniBudget, AllocationKind::Budget)]
    #[case(Approach::PerCapitaConvergence, AllocationKind::Pathway)]
    #[case(Approach::CumulativePerCapitaConvergence, AllocationKind::Pathway)]
    fn test_approach_kind(#[case] approach: Approach, #[case] kind: AllocationKind) {
        assert_eq!(approach.kind(), kind);
    }

    #[test]
    fn test_approach_flags() {
        assert!(Approach::CumulativePerCapitaConvergenceGiniAdjusted.uses_gini());
        assert!(Approach::CumulativePerCapitaConvergenceGiniAdjusted.is_adjusted());
        assert!(!Approach::CumulativePerCapitaConvergence.is_adjusted());
        assert!(Approach::CumulativePerCapitaConvergence.needs_emissions());
        assert!(Approach::PerCapitaConvergence.needs_emissions());
        assert!(!Approach::PerCapitaConvergence.uses_solver());
        assert!(!Approach::PerCapitaAdjustedBudget.needs_emissions());
    }

    fn data(reference: Option<TimeSeries>) -> AllocationData {
        AllocationData {
            population: country_table(
                "population",
                2020,
                &[("A", &[1.0, 1.0, 1.0, 1.0]), ("B", &[1.0, 1.0, 1.0])],
            ),
            emissions: None,
            gdp: None,
            gini: None,
            reference,
        }
    }

    #[rstest]
    #[case(Approach::EqualPerCapita, None, 2020..=2022)]
    #[case(Approach::EqualPerCapita, Some(series(2015, &[1.0; 7])), 2020..=2021)]
    #[case(Approach::EqualPerCapitaBudget, Some(series(2015, &[1.0; 7])), 2020..=2022)]
    fn test_horizon(
        #[case] approach: Approach,
        #[case] reference: Option<TimeSeries>,
        #[case] expected: RangeInclusive<u32>,
    ) {
        let params = AllocationParameters::new(approach, 2020);
        assert_eq!(horizon(&params, &data(reference)).unwrap(), expected);
    }

    #[test]
    fn test_horizon_before_first_year() {
        let params = AllocationParameters::new(Approach::EqualPerCapita, 2030);
        assert_eq!(
            horizon(&params, &data(None)).unwrap_err(),
            AllocationError::MissingYears {
                table: "population".into(),
                country: "B".into(),
                years: vec![2030]
            }
        );
    }

    #[test]
    fn test_allocate_ignores_weights_for_unadjusted() {
        let mut params = AllocationParameters::new(Approach::EqualPerCapita, 2020);
        params.responsibility_weight = 0.5;
        let result = allocate(&params, &data(None)).unwrap();
        assert_eq!(result.weights(), NormalisedWeights::default());
        assert_eq!(result.shares()["A"].values(), [0.5, 0.5, 0.5]);
    }
}
