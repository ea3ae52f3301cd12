//! Property tests for the convergence solver and its building blocks.
use fair_shares::adjustment::AdjustmentWeights;
use fair_shares::convergence::fallback::repair;
use fair_shares::convergence::{
    ConvergenceProblem, SolverOptions, TARGET_DEVIATION_TOLERANCE, YearFractions,
    achieved_cumulative, long_run_shares, solve,
};
use fair_shares::country::{CountryID, CountryValues, total};
use fair_shares::error::AllocationContext;
use fair_shares::evolution::evolve_shares;
use fair_shares::timeseries::TimeSeries;
use proptest::collection::vec;
use proptest::prelude::{prop_assert, prop_assert_eq, prop_assume, proptest};

const EPS: f64 = 1e-9;

/// Shares proportional to `weights`, for countries `C0`, `C1`, ...
fn shares(weights: &[u32]) -> CountryValues {
    let sum: f64 = weights.iter().map(|w| f64::from(*w)).sum();
    weights
        .iter()
        .enumerate()
        .map(|(idx, w)| (CountryID::from(format!("C{idx}")), f64::from(*w) / sum))
        .collect()
}

fn fractions(pathway: &[u32]) -> YearFractions {
    let values = pathway.iter().map(|v| f64::from(*v)).collect();
    let reference = TimeSeries::new("Mt", 2020, values).unwrap();
    YearFractions::from_pathway(&reference, reference.years()).unwrap()
}

fn context() -> AllocationContext {
    AllocationContext {
        approach: "cumulative-per-capita-convergence".into(),
        responsibility_weight: 0.0,
        capability_weight: 0.0,
        first_year: 2020,
        last_year: 2050,
        max_convergence_speed: 0.9,
        max_deviation_sigma: None,
    }
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(64))]

    #[test]
    fn prop_faster_convergence_misses_targets_by_less(
        initial in vec(1u32..1000, 2..8),
        targets in vec(0u32..1000, 8),
        pathway in vec(1u32..1000, 2..40),
        low_bp in 1u32..10_000,
        step_bp in 0u32..10_000,
    ) {
        let n = initial.len();
        prop_assume!(targets[..n].iter().any(|w| *w > 0));
        let initial = shares(&initial);
        let targets = shares(&targets[..n]);
        let fractions = fractions(&pathway);
        let low = f64::from(low_bp) / 10_000.0;
        let high = (low + f64::from(step_bp) / 10_000.0).min(1.0);

        // Largest miss when each long-run share is limited to [0, 1]
        let max_miss = |speed: f64| {
            let weight = fractions.initial_weight(speed);
            let long_run: CountryValues = long_run_shares(&initial, &targets, weight)
                .into_iter()
                .map(|(country, share)| (country, share.clamp(0.0, 1.0)))
                .collect();
            let achieved = achieved_cumulative(&initial, &long_run, weight);
            targets
                .iter()
                .map(|(country, target)| (achieved[country] - target).abs())
                .fold(0.0, f64::max)
        };

        let (miss_low, miss_high) = (max_miss(low), max_miss(high));
        prop_assert!(
            miss_high <= miss_low + EPS,
            "miss at {high} is {miss_high}, more than {miss_low} at {low}"
        );
        prop_assert!(fractions.initial_weight(high) <= fractions.initial_weight(low) + EPS);
    }

    #[test]
    fn prop_feasible_targets_are_met(
        initial in vec(1u32..1000, 2..8),
        long_run in vec(0u32..1000, 8),
        pathway in vec(1u32..1000, 3..40),
        speed_bp in 500u32..9000,
    ) {
        let n = initial.len();
        prop_assume!(long_run[..n].iter().any(|w| *w > 0));
        let initial = shares(&initial);
        let long_run = shares(&long_run[..n]);
        let fractions = fractions(&pathway);

        // Targets which are known to be reachable at `speed`
        let speed = f64::from(speed_bp) / 10_000.0;
        let targets = achieved_cumulative(&initial, &long_run, fractions.initial_weight(speed));

        let problem = ConvergenceProblem {
            initial: &initial,
            targets: &targets,
            fractions: &fractions,
        };
        let options = SolverOptions { max_speed: 0.9, strict: true };
        let solution = solve(&problem, &options, &context()).unwrap();

        prop_assert!(solution.speed <= speed + 1e-6);
        prop_assert!(solution.diagnostics.is_none());
        prop_assert!((total(&solution.long_run) - 1.0).abs() < EPS);

        let achieved = achieved_cumulative(
            &initial,
            &solution.long_run,
            fractions.initial_weight(solution.speed),
        );
        for (country, target) in &targets {
            prop_assert!((achieved[country] - target).abs() <= TARGET_DEVIATION_TOLERANCE);
        }
    }

    #[test]
    fn prop_repair_is_idempotent(
        initial in vec(1u32..1000, 2..8),
        targets in vec(0u32..1000, 8),
        weight_bp in 100u32..9000,
    ) {
        let n = initial.len();
        prop_assume!(targets[..n].iter().any(|w| *w > 0));
        let initial = shares(&initial);
        let targets = shares(&targets[..n]);
        let weight = f64::from(weight_bp) / 10_000.0;

        let repaired = repair(&initial, &targets, weight).unwrap();
        prop_assert!(repaired.long_run.values().all(|s| (-EPS..=1.0 + EPS).contains(s)));
        prop_assert!((total(&repaired.long_run) - 1.0).abs() < EPS);

        // What was achieved can be achieved again without clipping
        let again = repair(&initial, &repaired.achieved, weight).unwrap();
        prop_assert!(again.clipped.is_empty(), "clipped {:?}", again.clipped);
        let direct = long_run_shares(&initial, &repaired.achieved, weight);
        for (country, share) in &repaired.long_run {
            prop_assert!((direct[country] - share).abs() < EPS);
        }
    }

    #[test]
    fn prop_evolved_shares_sum_to_one(
        initial in vec(1u32..1000, 2..8),
        long_run in vec(0u32..1000, 8),
        speed_bp in 1u32..=10_000,
        years in 1u32..60,
    ) {
        let n = initial.len();
        prop_assume!(long_run[..n].iter().any(|w| *w > 0));
        let initial = shares(&initial);
        let long_run = shares(&long_run[..n]);
        let speed = f64::from(speed_bp) / 10_000.0;

        let evolved = evolve_shares(&initial, &long_run, speed, 2020..=2020 + years).unwrap();
        for year in 2020..=2020 + years {
            let sum: f64 = evolved.values().map(|ts| ts.get(year).unwrap()).sum();
            prop_assert!((sum - 1.0).abs() < EPS, "sum in {year} is {sum}");
        }
        for (country, share) in &initial {
            prop_assert_eq!(evolved[country].get(2020), Some(*share));
        }
    }

    #[test]
    fn prop_normalised_weights_sum_to_one(
        responsibility_bp in 0u32..=10_000,
        capability_bp in 0u32..=10_000,
    ) {
        let responsibility = f64::from(responsibility_bp) / 10_000.0;
        let capability = f64::from(capability_bp) / 10_000.0;
        prop_assume!(responsibility + capability > 0.0 && responsibility + capability <= 1.0);

        let normalised = AdjustmentWeights::new(responsibility, capability)
            .unwrap()
            .normalised();
        prop_assert_eq!(normalised.responsibility + normalised.capability, 1.0);
    }
}
