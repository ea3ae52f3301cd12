//! Solver for cumulative per-capita convergence.
//!
//! Shares move each year a fixed fraction (the convergence speed) of the way from their current
//! value towards a long-run share:
//!
//! ```text
//! share(t + 1) = share(t) + speed * (long_run - share(t))
//! ```
//!
//! Weighting each year by its fraction of cumulative world emissions, a country's cumulative
//! share is `initial * w + long_run * (1 - w)`, where `w` is the weight remaining on the initial
//! share. For a fixed speed the long-run shares therefore follow in closed form from the target
//! cumulative shares, and the solver only needs to search for the speed. The smallest speed
//! which keeps every long-run share within `[0, 1]` is chosen, giving the smoothest transition
//! which still meets the targets.
use crate::country::{CountryID, CountryValues};
use crate::error::{AllocationContext, AllocationError, InfeasibilityReport, Offender, Result};
use crate::result::ConvergenceDiagnostics;
use crate::timeseries::TimeSeries;
use itertools::Itertools;
use log::{debug, info, warn};
use std::ops::RangeInclusive;

pub mod fallback;

/// Largest difference permitted between achieved and target cumulative shares
pub const TARGET_DEVIATION_TOLERANCE: f64 = 1e-4;

/// Lower bound of the convergence speed search
pub const MIN_CONVERGENCE_SPEED: f64 = 0.001;

/// The bisection stops once the bracket is narrower than this
const SPEED_TOLERANCE: f64 = 1e-6;

/// Weight left for the long-run shares below which convergence is degenerate
const DEGENERATE_WEIGHT: f64 = 1e-12;

/// Targets smaller than this are treated as zero when calculating ratios
const NEGLIGIBLE_TARGET: f64 = 1e-10;

/// The fraction of cumulative world emissions falling in each year of the horizon
#[derive(Debug, Clone, PartialEq)]
pub struct YearFractions {
    first_year: u32,
    fractions: Vec<f64>,
}

impl YearFractions {
    /// Calculate year fractions from the World reference pathway.
    ///
    /// # Arguments
    ///
    /// * `reference` - The World emissions pathway
    /// * `years` - The allocation horizon
    ///
    /// # Returns
    ///
    /// The fractions, or an error if the pathway is undefined in any year of the horizon or does
    /// not have a positive total.
    pub fn from_pathway(reference: &TimeSeries, years: RangeInclusive<u32>) -> Result<Self> {
        let values: Vec<f64> = years
            .clone()
            .map(|year| match reference.get(year) {
                Some(value) if value.is_finite() => Ok(value),
                _ => Err(AllocationError::UndefinedWorldValue { year }),
            })
            .try_collect()?;

        let total: f64 = values.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(AllocationError::NonPositiveWorldTotal {
                total,
                first_year: *years.start(),
                last_year: *years.end(),
            });
        }

        Ok(Self {
            first_year: *years.start(),
            fractions: values.into_iter().map(|value| value / total).collect(),
        })
    }

    /// The first year of the horizon
    pub fn first_year(&self) -> u32 {
        self.first_year
    }

    /// The last year of the horizon
    pub fn last_year(&self) -> u32 {
        self.first_year + self.fractions.len() as u32 - 1
    }

    /// The years of the horizon
    pub fn years(&self) -> RangeInclusive<u32> {
        self.first_year..=self.last_year()
    }

    /// The fraction for each year, in order
    pub fn fractions(&self) -> &[f64] {
        &self.fractions
    }

    /// The weight remaining on the initial shares for a given speed.
    ///
    /// This is `f_0 + sum_{k >= 1} f_k * (1 - speed)^k`.
    pub fn initial_weight(&self, speed: f64) -> f64 {
        let decay = 1.0 - speed;
        let mut factor = 1.0;
        let mut weight = 0.0;
        for fraction in &self.fractions {
            weight += fraction * factor;
            factor *= decay;
        }

        weight
    }

    /// Whether any weight is left for the years after the first
    fn has_room_to_converge(&self) -> bool {
        self.fractions.len() > 1 && 1.0 - self.fractions[0] > DEGENERATE_WEIGHT
    }
}

/// The long-run shares which give `targets` as cumulative shares, for initial weight `weight`.
///
/// `weight` must be less than 1.
pub fn long_run_shares(
    initial: &CountryValues,
    targets: &CountryValues,
    weight: f64,
) -> CountryValues {
    targets
        .iter()
        .map(|(country, target)| {
            let long_run = (target - initial[country] * weight) / (1.0 - weight);
            (country.clone(), long_run)
        })
        .collect()
}

/// The cumulative shares achieved by the given initial and long-run shares
pub fn achieved_cumulative(
    initial: &CountryValues,
    long_run: &CountryValues,
    weight: f64,
) -> CountryValues {
    long_run
        .iter()
        .map(|(country, long_run)| {
            let achieved = initial[country] * weight + long_run * (1.0 - weight);
            (country.clone(), achieved)
        })
        .collect()
}

/// Ratios of achieved to target cumulative share, for countries which missed their target.
///
/// Countries within [`TARGET_DEVIATION_TOLERANCE`] of their target are omitted. A negligible
/// target gives a ratio of infinity.
pub fn target_ratios(achieved: &CountryValues, targets: &CountryValues) -> CountryValues {
    targets
        .iter()
        .filter(|(country, target)| {
            (achieved[*country] - **target).abs() > TARGET_DEVIATION_TOLERANCE
        })
        .map(|(country, target)| {
            let ratio = if *target > NEGLIGIBLE_TARGET {
                achieved[country] / target
            } else {
                f64::INFINITY
            };
            (country.clone(), ratio)
        })
        .collect()
}

/// The inputs to the convergence solver
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceProblem<'a> {
    /// Each country's share of world emissions in the first allocation year
    pub initial: &'a CountryValues,
    /// Each country's target cumulative share over the horizon
    pub targets: &'a CountryValues,
    /// The fraction of cumulative emissions in each year
    pub fractions: &'a YearFractions,
}

impl ConvergenceProblem<'_> {
    /// The long-run shares needed at `speed`, if they are all valid fractions.
    ///
    /// Returns `None` if no weight is left for the long-run shares or any of them falls outside
    /// `[0, 1]`.
    pub fn check_speed(&self, speed: f64) -> Option<CountryValues> {
        let weight = self.fractions.initial_weight(speed);
        if 1.0 - weight <= DEGENERATE_WEIGHT {
            return None;
        }

        let long_run = long_run_shares(self.initial, self.targets, weight);
        long_run
            .values()
            .all(|share| (0.0..=1.0).contains(share))
            .then_some(long_run)
    }

    /// Describe why no valid long-run shares exist at `speed`
    fn infeasibility_report(&self, speed: f64, context: &AllocationContext) -> InfeasibilityReport {
        let weight = self.fractions.initial_weight(speed);
        let long_run = long_run_shares(self.initial, self.targets, weight);
        let (min_long_run, max_long_run) = long_run
            .values()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &share| {
                (min.min(share), max.max(share))
            });

        let offenders = long_run
            .iter()
            .filter(|(_, share)| !(0.0..=1.0).contains(*share))
            .sorted_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(country, &long_run)| Offender {
                country: country.clone(),
                long_run,
                initial: self.initial[country],
                target: self.targets[country],
            })
            .collect();

        InfeasibilityReport {
            context: context.clone(),
            offenders,
            min_long_run,
            max_long_run,
        }
    }
}

/// Options controlling the solver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    /// The largest convergence speed permitted, in `(0, 1]`
    pub max_speed: f64,
    /// Whether to fail rather than approximate when targets cannot be met
    pub strict: bool,
}

/// The outcome of [`solve`]
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceSolution {
    /// The chosen convergence speed
    pub speed: f64,
    /// The long-run shares, summing to 1
    pub long_run: CountryValues,
    /// Present if the targets were only approximated
    pub diagnostics: Option<ConvergenceDiagnostics>,
}

/// Find the minimum convergence speed which meets the cumulative targets.
///
/// # Arguments
///
/// * `problem` - Initial shares, targets and year fractions
/// * `options` - Maximum speed and strictness
/// * `context` - The allocation parameters, reported in errors
///
/// # Returns
///
/// The speed and long-run shares. In lenient mode infeasible targets are approximated (see
/// [`fallback`]) and diagnostics attached; in strict mode they are an error.
pub fn solve(
    problem: &ConvergenceProblem,
    options: &SolverOptions,
    context: &AllocationContext,
) -> Result<ConvergenceSolution> {
    let fractions = problem.fractions;
    let insufficient_horizon = || AllocationError::InsufficientTimeHorizon {
        first_year: fractions.first_year(),
        last_year: fractions.last_year(),
    };
    if !fractions.has_room_to_converge() {
        return Err(insufficient_horizon());
    }

    let max_weight = fractions.initial_weight(options.max_speed);
    if 1.0 - max_weight <= DEGENERATE_WEIGHT {
        return Err(insufficient_horizon());
    }

    let Some(mut best_long_run) = problem.check_speed(options.max_speed) else {
        let report = problem.infeasibility_report(options.max_speed, context);
        if options.strict {
            return Err(AllocationError::InfeasibleConvergence(Box::new(report)));
        }

        warn!(
            "Targets for {} cannot be met with max_convergence_speed = {} ({} countries need \
            long-run shares outside [0, 1]); approximating",
            context.approach,
            options.max_speed,
            report.offenders.len()
        );
        let repaired = fallback::repair(problem.initial, problem.targets, max_weight)?;
        let ratios = target_ratios(&repaired.achieved, problem.targets);
        return Ok(ConvergenceSolution {
            speed: options.max_speed,
            long_run: repaired.long_run,
            diagnostics: Some(ConvergenceDiagnostics {
                fallback_used: true,
                achieved: repaired.achieved,
                ratios,
            }),
        });
    };

    let mut best_speed = options.max_speed;
    let (mut low, mut high) = (MIN_CONVERGENCE_SPEED, options.max_speed);
    let mut iterations = 0;
    while high - low > SPEED_TOLERANCE {
        let mid = (low + high) / 2.0;
        if let Some(long_run) = problem.check_speed(mid) {
            best_speed = mid;
            best_long_run = long_run;
            high = mid;
        } else {
            low = mid;
        }
        iterations += 1;
    }
    debug!("Convergence speed search finished after {iterations} iterations");

    let weight = fractions.initial_weight(best_speed);
    let achieved = achieved_cumulative(problem.initial, &best_long_run, weight);
    let max_deviation = achieved
        .iter()
        .map(|(country, share)| (share - problem.targets[country]).abs())
        .fold(0.0, f64::max);

    let diagnostics = if max_deviation > TARGET_DEVIATION_TOLERANCE {
        if options.strict {
            return Err(AllocationError::TargetsNotMet {
                approach: context.approach.clone(),
                speed: best_speed,
                max_deviation,
                tolerance: TARGET_DEVIATION_TOLERANCE,
            });
        }

        warn!(
            "Cumulative targets for {} missed by up to {max_deviation:.2e} at convergence speed \
            {best_speed:.6}",
            context.approach
        );
        let ratios = target_ratios(&achieved, problem.targets);
        Some(ConvergenceDiagnostics {
            fallback_used: false,
            achieved,
            ratios,
        })
    } else {
        None
    };

    info!(
        "Convergence speed for {}: {best_speed:.6} (years {}-{})",
        context.approach,
        fractions.first_year(),
        fractions.last_year()
    );

    Ok(ConvergenceSolution {
        speed: best_speed,
        long_run: best_long_run,
        diagnostics,
    })
}

/// The countries of a share vector which lie outside `[0, 1]`
pub fn out_of_range(shares: &CountryValues) -> Vec<CountryID> {
    shares
        .iter()
        .filter(|(_, share)| !(0.0..=1.0).contains(*share))
        .map(|(country, _)| country.clone())
        .collect()
}
