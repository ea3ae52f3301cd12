//! Approximating cumulative targets which cannot be met at the maximum convergence speed.
//!
//! Countries whose long-run share falls outside `[0, 1]` are clipped to the nearest bound, which
//! fixes their achieved cumulative share. The cumulative share left over is divided among the
//! other countries in proportion to their original targets. Rescaling can push further countries
//! out of range, so clipping repeats until every long-run share is valid.
use super::{achieved_cumulative, long_run_shares};
use crate::country::{CountryID, CountryValues};
use crate::error::{AllocationError, Result};
use crate::target::normalise;
use indexmap::IndexMap;
use log::debug;

/// Long-run shares within this distance of `[0, 1]` are treated as valid
const FEASIBILITY_EPSILON: f64 = 1e-12;

/// Long-run shares which approximate infeasible targets
#[derive(Debug, Clone, PartialEq)]
pub struct Repair {
    /// Valid long-run shares, summing to 1
    pub long_run: CountryValues,
    /// The cumulative shares these long-run shares achieve
    pub achieved: CountryValues,
    /// Countries whose long-run share was clipped, in the order they were clipped
    pub clipped: Vec<CountryID>,
}

/// Clip `share` to `[0, 1]` if it lies outside by more than [`FEASIBILITY_EPSILON`]
fn clip(share: f64) -> Option<f64> {
    if share < -FEASIBILITY_EPSILON {
        Some(0.0)
    } else if share > 1.0 + FEASIBILITY_EPSILON {
        Some(1.0)
    } else {
        None
    }
}

/// Find the nearest valid long-run shares to those needed to meet `targets`.
///
/// # Arguments
///
/// * `initial` - Initial shares, summing to 1
/// * `targets` - Target cumulative shares, summing to 1
/// * `weight` - The weight remaining on the initial shares at the maximum convergence speed;
///   must be less than 1
pub fn repair(initial: &CountryValues, targets: &CountryValues, weight: f64) -> Result<Repair> {
    let remaining_weight = 1.0 - weight;
    let mut locked: IndexMap<CountryID, f64> = IndexMap::new();

    let free_long_run = loop {
        let locked_achieved: f64 = locked
            .iter()
            .map(|(country, long_run)| initial[country] * weight + long_run * remaining_weight)
            .sum();
        let remaining = 1.0 - locked_achieved;

        let free_targets: CountryValues = targets
            .iter()
            .filter(|(country, _)| !locked.contains_key(*country))
            .map(|(country, target)| (country.clone(), *target))
            .collect();
        if free_targets.is_empty() {
            break CountryValues::new();
        }

        let free_total: f64 = free_targets.values().sum();
        let goals: CountryValues = if free_total > 0.0 {
            free_targets
                .iter()
                .map(|(country, target)| (country.clone(), target * remaining / free_total))
                .collect()
        } else {
            let equal = remaining / free_targets.len() as f64;
            free_targets.keys().map(|country| (country.clone(), equal)).collect()
        };

        let long_run = long_run_shares(initial, &goals, weight);
        let newly_clipped: Vec<_> = long_run
            .iter()
            .filter_map(|(country, share)| clip(*share).map(|bound| (country.clone(), bound)))
            .collect();
        if newly_clipped.is_empty() {
            break long_run;
        }

        for (country, bound) in newly_clipped {
            debug!(
                "Clipping long-run share of {country} from {:.6} to {bound}",
                long_run[&country]
            );
            locked.insert(country, bound);
        }
    };

    let clipped = locked.keys().cloned().collect();
    let long_run: CountryValues = targets
        .keys()
        .map(|country| {
            let share = locked
                .get(country)
                .or_else(|| free_long_run.get(country))
                .copied()
                .unwrap_or_default();
            (country.clone(), share.clamp(0.0, 1.0))
        })
        .collect();
    let long_run = normalise(&long_run, "repaired long-run shares").map_err(|err| match err {
        AllocationError::NonFiniteShares { countries, .. } => AllocationError::NonFiniteShares {
            step: "when approximating infeasible targets".into(),
            countries,
        },
        other => other,
    })?;
    let achieved = achieved_cumulative(initial, &long_run, weight);

    Ok(Repair {
        long_run,
        achieved,
        clipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::values;
    use float_cmp::assert_approx_eq;

    #[test]
    fn test_repair_feasible_is_unchanged() {
        let initial = values(&[("A", 0.5), ("B", 0.5)]);
        let targets = values(&[("A", 0.6), ("B", 0.4)]);
        let repaired = repair(&initial, &targets, 0.5).unwrap();
        assert!(repaired.clipped.is_empty());
        assert_approx_eq!(f64, repaired.long_run["A"], 0.7, epsilon = 1e-12);
        assert_approx_eq!(f64, repaired.achieved["A"], 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_repair_clips_to_bounds() {
        // A needs (0.65 - 0.1) / 0.5 = 1.1 and B needs (0.15 - 0.25) / 0.5 = -0.2
        let initial = values(&[("A", 0.2), ("B", 0.5), ("C", 0.3)]);
        let targets = values(&[("A", 0.65), ("B", 0.15), ("C", 0.2)]);
        let repaired = repair(&initial, &targets, 0.5).unwrap();

        assert_eq!(repaired.clipped, vec![CountryID::new("A"), CountryID::new("B")]);
        assert_approx_eq!(f64, repaired.long_run["A"], 1.0, epsilon = 1e-12);
        assert_approx_eq!(f64, repaired.long_run["B"], 0.0, epsilon = 1e-12);
        assert_approx_eq!(f64, repaired.achieved["A"], 0.6, epsilon = 1e-12);
        assert_approx_eq!(f64, repaired.achieved["B"], 0.25, epsilon = 1e-12);

        // Only C's initial contribution is left for it
        assert_approx_eq!(f64, repaired.long_run["C"], 0.0, epsilon = 1e-12);
        assert_approx_eq!(f64, repaired.achieved["C"], 0.15, epsilon = 1e-12);
        assert_approx_eq!(f64, repaired.long_run.values().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_repair_clips_repeatedly() {
        // Clipping B frees less than C's rescaled target needs, so C is clipped too
        let initial = values(&[("A", 0.25), ("B", 0.25), ("C", 0.25), ("D", 0.25)]);
        let targets = values(&[("A", 0.41), ("B", 0.05), ("C", 0.13), ("D", 0.41)]);
        let repaired = repair(&initial, &targets, 0.5).unwrap();

        assert_eq!(repaired.clipped, vec![CountryID::new("B"), CountryID::new("C")]);
        assert_approx_eq!(f64, repaired.long_run["A"], 0.5, epsilon = 1e-12);
        assert_approx_eq!(f64, repaired.long_run["C"], 0.0, epsilon = 1e-12);
        assert_approx_eq!(f64, repaired.achieved["D"], 0.375, epsilon = 1e-12);
        assert_approx_eq!(f64, repaired.achieved.values().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_repair_is_idempotent() {
        let initial = values(&[("A", 0.2), ("B", 0.5), ("C", 0.3)]);
        let targets = values(&[("A", 0.65), ("B", 0.15), ("C", 0.2)]);
        let first = repair(&initial, &targets, 0.5).unwrap();
        let second = repair(&initial, &first.achieved, 0.5).unwrap();
        assert!(second.clipped.is_empty());
        for (country, share) in &first.long_run {
            assert_approx_eq!(f64, second.long_run[country], *share, epsilon = 1e-12);
        }
    }
}
