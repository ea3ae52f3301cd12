//! Errors raised by the allocation engine.
//!
//! Every failure carries enough structured context (parameter names and values, countries, years)
//! for the caller to act on it without re-running the calculation. Errors fall into three kinds:
//! problems with the caller's parameters, problems with the input data and failures of the
//! allocation itself.
use crate::country::{CountryID, format_countries};
use itertools::Itertools;
use std::fmt;
use thiserror::Error;

/// Convenience type for `Result<T, AllocationError>`.
pub type Result<T, E = AllocationError> = std::result::Result<T, E>;

/// The broad category an [`AllocationError`] falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or missing parameters supplied by the caller
    Configuration,
    /// Input data which is missing, inconsistent or out of range
    Data,
    /// The allocation could not be carried out with valid inputs
    Allocation,
}

/// An error raised while computing an allocation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocationError {
    /// A weight was negative
    #[error("{name} must be non-negative, got {value}")]
    NegativeWeight {
        /// Name of the parameter
        name: &'static str,
        /// The value supplied
        value: f64,
    },
    /// The two adjustment weights summed to more than one
    #[error(
        "responsibility_weight ({responsibility}) + capability_weight ({capability}) = {} \
        must not exceed 1.0",
        .responsibility + .capability
    )]
    WeightSumExceedsOne {
        /// The responsibility weight supplied
        responsibility: f64,
        /// The capability weight supplied
        capability: f64,
    },
    /// A numeric parameter was outside its permitted range
    #[error("{name} must be in {range}, got {value}")]
    ParameterOutOfRange {
        /// Name of the parameter
        name: &'static str,
        /// The value supplied
        value: f64,
        /// Human-readable description of the permitted range
        range: &'static str,
    },
    /// A parameter needed by the chosen approach was not supplied
    #[error("{name} must be provided for the {approach} approach")]
    MissingParameter {
        /// Name of the parameter
        name: &'static str,
        /// The approach which needs it
        approach: String,
    },
    /// Two year parameters were in the wrong order
    #[error("{earlier_name} ({earlier}) must be before {later_name} ({later})")]
    YearOrder {
        /// Name of the parameter which should be earlier
        earlier_name: &'static str,
        /// Its value
        earlier: u32,
        /// Name of the parameter which should be later
        later_name: &'static str,
        /// Its value
        later: u32,
    },
    /// A table needed by the parameters was not supplied
    #[error("{table} data must be provided when {parameter} = {value}")]
    MissingTable {
        /// The missing table
        table: String,
        /// The parameter which requires the table
        parameter: String,
        /// The value of that parameter
        value: String,
    },
    /// Approach name not recognised
    #[error("Unknown allocation approach '{0}'")]
    UnknownApproach(String),

    /// A time series had no values
    #[error("Time series cannot be empty")]
    EmptySeries,
    /// A time series contained the same year twice
    #[error("Year {0} appears more than once")]
    DuplicateYear(u32),
    /// A time series skipped one or more years
    #[error("Years must be contiguous, but {after} is followed by {next}")]
    NonContiguousYears {
        /// The last year before the gap
        after: u32,
        /// The first year after the gap
        next: u32,
    },
    /// A table mixed values with different units
    #[error("{table} data has mixed units: {}", .units.join(", "))]
    MixedUnits {
        /// The table name
        table: String,
        /// The distinct units found
        units: Vec<String>,
    },
    /// A table has no rows for some of the countries being allocated
    #[error("{table} data is missing for: {}", format_countries(.countries))]
    MissingCountries {
        /// The table name
        table: String,
        /// The countries with no data
        countries: Vec<CountryID>,
    },
    /// A table has rows for countries which are not being allocated
    #[error("{table} data contains countries not present in population data: {}",
        format_countries(.countries))]
    UnexpectedCountries {
        /// The table name
        table: String,
        /// The unexpected countries
        countries: Vec<CountryID>,
    },
    /// A country's series does not cover the years needed
    #[error("{table} data for {country} is missing years: {}", format_years(.years))]
    MissingYears {
        /// The table name
        table: String,
        /// The country concerned
        country: CountryID,
        /// The years not covered
        years: Vec<u32>,
    },
    /// A value was outside the range permitted for its table
    #[error("{table} value for {country}{} must be {expected}, got {value}",
        .year.map(|y| format!(" in {y}")).unwrap_or_default())]
    InvalidValue {
        /// The table name
        table: String,
        /// The country concerned
        country: CountryID,
        /// The year, for time series tables
        year: Option<u32>,
        /// The offending value
        value: f64,
        /// Description of the permitted values
        expected: &'static str,
    },
    /// Population was zero where a per-capita quantity was needed
    #[error("Zero population for {} when calculating {quantity}", format_countries(.countries))]
    ZeroPopulation {
        /// The quantity being calculated
        quantity: &'static str,
        /// Countries with zero population
        countries: Vec<CountryID>,
    },
    /// An adjustment metric summed to zero or less over all countries
    #[error("{metric} sums to {total} across all countries, but must be positive")]
    NonPositiveMetric {
        /// The metric concerned
        metric: &'static str,
        /// Its total
        total: f64,
    },
    /// Country emissions did not add up to the World value
    #[error(
        "Country emissions sum to {country_sum} in {year} but the World value is {world} \
        (difference {:.2e})",
        (.country_sum - .world).abs()
    )]
    WorldMismatch {
        /// The year checked
        year: u32,
        /// Sum over countries
        country_sum: f64,
        /// The World value
        world: f64,
    },
    /// The World reference value was undefined or missing in a year where it is needed
    #[error("World reference value is undefined in {year}")]
    UndefinedWorldValue {
        /// The year concerned
        year: u32,
    },
    /// The World reference pathway had a non-positive total over the horizon
    #[error("World reference pathway sums to {total} over {first_year}-{last_year}")]
    NonPositiveWorldTotal {
        /// Total over the horizon
        total: f64,
        /// Start of horizon
        first_year: u32,
        /// End of horizon
        last_year: u32,
    },

    /// There are no years after the first allocation year to converge over
    #[error(
        "Insufficient time horizon for convergence: no weight is given to years after \
        {first_year} (horizon ends {last_year})"
    )]
    InsufficientTimeHorizon {
        /// First allocation year
        first_year: u32,
        /// Last year of the horizon
        last_year: u32,
    },
    /// No convergence speed up to the maximum gives valid long-run shares
    #[error("{0}")]
    InfeasibleConvergence(Box<InfeasibilityReport>),
    /// Cumulative targets could not be reached to within tolerance
    #[error(
        "Cumulative targets not met: largest deviation {max_deviation:.2e} exceeds {tolerance:.0e} \
        (approach {approach}, convergence speed {speed:.6})"
    )]
    TargetsNotMet {
        /// Approach name
        approach: String,
        /// Speed used
        speed: f64,
        /// Largest absolute difference between achieved and target cumulative share
        max_deviation: f64,
        /// Tolerance applied
        tolerance: f64,
    },
    /// Shares became undefined or could not be normalised
    #[error("Invalid shares {step}: {}", format_countries(.countries))]
    NonFiniteShares {
        /// Description of the step at which it happened
        step: String,
        /// Countries with invalid shares (empty if the whole vector was degenerate)
        countries: Vec<CountryID>,
    },
    /// Shares in a year did not sum to one
    #[error("Shares in {year} sum to {sum} rather than 1")]
    ShareSumMismatch {
        /// The year concerned
        year: u32,
        /// The sum found
        sum: f64,
    },
}

impl AllocationError {
    /// The broad category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NegativeWeight { .. }
            | Self::WeightSumExceedsOne { .. }
            | Self::ParameterOutOfRange { .. }
            | Self::MissingParameter { .. }
            | Self::YearOrder { .. }
            | Self::MissingTable { .. }
            | Self::UnknownApproach(_) => ErrorKind::Configuration,
            Self::EmptySeries
            | Self::DuplicateYear(_)
            | Self::NonContiguousYears { .. }
            | Self::MixedUnits { .. }
            | Self::MissingCountries { .. }
            | Self::UnexpectedCountries { .. }
            | Self::MissingYears { .. }
            | Self::InvalidValue { .. }
            | Self::ZeroPopulation { .. }
            | Self::NonPositiveMetric { .. }
            | Self::WorldMismatch { .. }
            | Self::UndefinedWorldValue { .. }
            | Self::NonPositiveWorldTotal { .. } => ErrorKind::Data,
            Self::InsufficientTimeHorizon { .. }
            | Self::InfeasibleConvergence(_)
            | Self::TargetsNotMet { .. }
            | Self::NonFiniteShares { .. }
            | Self::ShareSumMismatch { .. } => ErrorKind::Allocation,
        }
    }
}

/// Format a sorted list of years, collapsing runs of consecutive years into `a-b` ranges
fn format_years(years: &[u32]) -> String {
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for &year in years {
        match ranges.last_mut() {
            Some((_, end)) if *end + 1 == year => *end = year,
            _ => ranges.push((year, year)),
        }
    }

    ranges
        .into_iter()
        .map(|(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        })
        .join(", ")
}

/// The parameters an allocation was attempted with, for inclusion in error reports
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationContext {
    /// Approach name
    pub approach: String,
    /// Responsibility weight as supplied
    pub responsibility_weight: f64,
    /// Capability weight as supplied
    pub capability_weight: f64,
    /// First year of the allocation horizon
    pub first_year: u32,
    /// Last year of the allocation horizon
    pub last_year: u32,
    /// Maximum convergence speed tried
    pub max_convergence_speed: f64,
    /// Deviation constraint applied to the targets, if any
    pub max_deviation_sigma: Option<f64>,
}

/// A country whose long-run share fell outside `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct Offender {
    /// The country
    pub country: CountryID,
    /// Its long-run share at the maximum speed
    pub long_run: f64,
    /// Its share of emissions in the first allocation year
    pub initial: f64,
    /// Its target cumulative share
    pub target: f64,
}

/// Details of why convergence was infeasible
#[derive(Debug, Clone, PartialEq)]
pub struct InfeasibilityReport {
    /// The parameters the allocation was attempted with
    pub context: AllocationContext,
    /// Countries needing a long-run share outside `[0, 1]`
    pub offenders: Vec<Offender>,
    /// Smallest long-run share at the maximum speed
    pub min_long_run: f64,
    /// Largest long-run share at the maximum speed
    pub max_long_run: f64,
}

impl fmt::Display for InfeasibilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ctx = &self.context;
        writeln!(
            f,
            "Convergence is infeasible: no speed up to max_convergence_speed = {} keeps long-run \
            shares within [0, 1] (range found: [{:.4}, {:.4}])",
            ctx.max_convergence_speed, self.min_long_run, self.max_long_run
        )?;
        writeln!(
            f,
            "  approach = {}, responsibility_weight = {}, capability_weight = {}, years = {}-{}, \
            max_deviation_sigma = {}",
            ctx.approach,
            ctx.responsibility_weight,
            ctx.capability_weight,
            ctx.first_year,
            ctx.last_year,
            ctx.max_deviation_sigma
                .map_or_else(|| "none".to_string(), |s| s.to_string()),
        )?;
        for offender in &self.offenders {
            writeln!(
                f,
                "  {}: long-run share {:.4}, initial share {:.4}, target {:.4}",
                offender.country, offender.long_run, offender.initial, offender.target
            )?;
        }
        write!(
            f,
            "Try a stricter deviation constraint, a higher max_convergence_speed or strict = false"
        )
    }
}
