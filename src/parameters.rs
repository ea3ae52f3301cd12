//! Defines the `AllocationParameters` struct, which represents the contents of `allocation.toml`.
use crate::adjustment::gini::GiniOptions;
use crate::adjustment::{AdjustmentWeights, FunctionalForm};
use crate::allocation::{AllocationKind, Approach};
use crate::error::{AllocationError, Result};
use crate::input::{input_err_msg, read_toml};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

const ALLOCATION_PARAMETERS_FILE_NAME: &str = "allocation.toml";

macro_rules! define_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

define_param_default!(default_historical_responsibility_year, u32, 1990);
define_param_default!(default_per_capita, bool, true);
define_param_default!(default_exponent, f64, 1.0);
define_param_default!(default_max_gini_adjustment, f64, 0.8);
define_param_default!(default_apply_deviation_constraint, bool, true);
define_param_default!(default_max_deviation_sigma, f64, 2.0);
define_param_default!(default_max_convergence_speed, f64, 0.9);
define_param_default!(default_strict, bool, true);

/// Income floor for the Gini-adjusted pathway approaches when none is given
const DEFAULT_PATHWAY_INCOME_FLOOR: f64 = 7500.0;

/// Parameters controlling a single allocation.
///
/// These are passed explicitly to [`crate::allocation::allocate`]; nothing is read from global
/// state.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AllocationParameters {
    /// The equity approach to allocate with
    pub approach: Approach,
    /// The first year of the allocation (the allocation year, for budgets)
    pub first_allocation_year: u32,
    /// The year by which shares have fully converged (per-capita-convergence only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convergence_year: Option<u32>,
    /// Weight given to historical responsibility
    #[serde(default)]
    pub responsibility_weight: f64,
    /// Weight given to economic capability
    #[serde(default)]
    pub capability_weight: f64,
    /// Start of the window over which historical emissions are counted
    #[serde(default = "default_historical_responsibility_year")]
    pub historical_responsibility_year: u32,
    /// Whether historical emissions are divided by population
    #[serde(default = "default_per_capita")]
    pub responsibility_per_capita: bool,
    /// Exponent applied to the responsibility metric (scaled by the normalised weight)
    #[serde(default = "default_exponent")]
    pub responsibility_exponent: f64,
    /// Transformation applied to the responsibility metric
    #[serde(default)]
    pub responsibility_functional_form: FunctionalForm,
    /// Whether GDP is divided by population
    #[serde(default = "default_per_capita")]
    pub capability_per_capita: bool,
    /// Exponent applied to the capability metric (scaled by the normalised weight)
    #[serde(default = "default_exponent")]
    pub capability_exponent: f64,
    /// Transformation applied to the capability metric
    #[serde(default)]
    pub capability_functional_form: FunctionalForm,
    /// Income per person below which income is discounted by the Gini adjustment.
    ///
    /// If not given, this is 7500 for pathway approaches and 0 (no adjustment) for budgets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub income_floor: Option<f64>,
    /// Largest fraction of GDP the Gini adjustment may remove
    #[serde(default = "default_max_gini_adjustment")]
    pub max_gini_adjustment: f64,
    /// Whether to limit how far adjusted shares may deviate from equal per-capita shares
    #[serde(default = "default_apply_deviation_constraint")]
    pub apply_deviation_constraint: bool,
    /// Largest permitted deviation, in population-weighted standard deviations
    #[serde(default = "default_max_deviation_sigma")]
    pub max_deviation_sigma: f64,
    /// Upper bound on the convergence speed
    #[serde(default = "default_max_convergence_speed")]
    pub max_convergence_speed: f64,
    /// Whether infeasible cumulative targets are an error (rather than approximated)
    #[serde(default = "default_strict")]
    pub strict: bool,
    /// Whether shares at the first allocation year are used for the whole horizon
    #[serde(default)]
    pub preserve_first_allocation_year_shares: bool,
}

impl AllocationParameters {
    /// Create parameters for `approach` starting in `first_allocation_year`, with every other
    /// parameter at its default value
    pub fn new(approach: Approach, first_allocation_year: u32) -> Self {
        Self {
            approach,
            first_allocation_year,
            convergence_year: None,
            responsibility_weight: 0.0,
            capability_weight: 0.0,
            historical_responsibility_year: default_historical_responsibility_year(),
            responsibility_per_capita: default_per_capita(),
            responsibility_exponent: default_exponent(),
            responsibility_functional_form: FunctionalForm::default(),
            capability_per_capita: default_per_capita(),
            capability_exponent: default_exponent(),
            capability_functional_form: FunctionalForm::default(),
            income_floor: None,
            max_gini_adjustment: default_max_gini_adjustment(),
            apply_deviation_constraint: default_apply_deviation_constraint(),
            max_deviation_sigma: default_max_deviation_sigma(),
            max_convergence_speed: default_max_convergence_speed(),
            strict: default_strict(),
            preserve_first_allocation_year_shares: false,
        }
    }

    /// Read parameters from `allocation.toml` in the specified model directory.
    ///
    /// # Arguments
    ///
    /// * `model_dir` - Folder containing model configuration files
    ///
    /// # Returns
    ///
    /// The file contents as an [`AllocationParameters`] struct or an error if the file is invalid
    pub fn from_path<P: AsRef<Path>>(model_dir: P) -> anyhow::Result<AllocationParameters> {
        let file_path = model_dir.as_ref().join(ALLOCATION_PARAMETERS_FILE_NAME);
        let params: AllocationParameters = read_toml(&file_path)?;

        params
            .validate()
            .with_context(|| input_err_msg(&file_path))?;

        Ok(params)
    }

    /// The adjustment weights, checked for validity
    pub fn weights(&self) -> Result<AdjustmentWeights> {
        AdjustmentWeights::new(self.responsibility_weight, self.capability_weight)
    }

    /// The income floor for the Gini adjustment, falling back to the approach's default
    pub fn income_floor(&self) -> f64 {
        self.income_floor.unwrap_or(match self.approach.kind() {
            AllocationKind::Pathway => DEFAULT_PATHWAY_INCOME_FLOOR,
            AllocationKind::Budget => 0.0,
        })
    }

    /// The Gini adjustment options, checked for validity
    pub fn gini_options(&self) -> Result<GiniOptions> {
        GiniOptions::new(self.income_floor(), self.max_gini_adjustment)
    }

    /// The deviation constraint to apply to target shares, if any
    pub fn deviation_sigma(&self) -> Option<f64> {
        self.apply_deviation_constraint
            .then_some(self.max_deviation_sigma)
    }

    /// Check that the parameters are consistent and within range
    pub fn validate(&self) -> Result<()> {
        // responsibility_weight and capability_weight
        self.weights()?;

        // income_floor and max_gini_adjustment
        self.gini_options()?;

        check_exponent("responsibility_exponent", self.responsibility_exponent)?;
        check_exponent("capability_exponent", self.capability_exponent)?;
        check_max_deviation_sigma(self.max_deviation_sigma)?;
        check_max_convergence_speed(self.max_convergence_speed)?;

        if self.approach.is_adjusted() && self.responsibility_weight > 0.0 {
            check_year_order(
                "historical_responsibility_year",
                self.historical_responsibility_year,
                "first_allocation_year",
                self.first_allocation_year,
            )?;
        }

        if self.approach.uses_convergence_year() {
            let convergence_year =
                self.convergence_year
                    .ok_or_else(|| AllocationError::MissingParameter {
                        name: "convergence_year",
                        approach: self.approach.to_string(),
                    })?;
            check_year_order(
                "first_allocation_year",
                self.first_allocation_year,
                "convergence_year",
                convergence_year,
            )?;
        }

        Ok(())
    }
}

/// Check that an adjustment exponent is valid
fn check_exponent(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(AllocationError::ParameterOutOfRange {
            name,
            value,
            range: "[0, inf)",
        })
    }
}

/// Check that the `max_deviation_sigma` parameter is valid
fn check_max_deviation_sigma(value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(AllocationError::ParameterOutOfRange {
            name: "max_deviation_sigma",
            value,
            range: "[0, inf)",
        })
    }
}

/// Check that the `max_convergence_speed` parameter is valid
pub(crate) fn check_max_convergence_speed(value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(AllocationError::ParameterOutOfRange {
            name: "max_convergence_speed",
            value,
            range: "(0, 1]",
        })
    }
}

/// Check that one year parameter comes strictly before another
fn check_year_order(
    earlier_name: &'static str,
    earlier: u32,
    later_name: &'static str,
    later: u32,
) -> Result<()> {
    if earlier < later {
        Ok(())
    } else {
        Err(AllocationError::YearOrder {
            earlier_name,
            earlier,
            later_name,
            later,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fmt::Display;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    /// Helper function to assert validation result based on expected validity
    fn assert_validation_result<T, U: Display>(
        result: Result<T>,
        expected_valid: bool,
        value: U,
        expected_error_fragment: &str,
    ) {
        if expected_valid {
            assert!(
                result.is_ok(),
                "Expected value {} to be valid, but got error: {:?}",
                value,
                result.err()
            );
        } else {
            assert!(
                result.is_err(),
                "Expected value {value} to be invalid, but it was accepted",
            );
            let error_message = result.err().unwrap().to_string();
            assert!(
                error_message.contains(expected_error_fragment),
                "Error message should mention the validation constraint, got: {error_message}",
            );
        }
    }

    #[test]
    fn test_allocation_params_from_path() {
        let dir = tempdir().unwrap();
        {
            let mut file = File::create(dir.path().join(ALLOCATION_PARAMETERS_FILE_NAME)).unwrap();
            writeln!(
                file,
                "approach = \"cumulative-per-capita-convergence-adjusted\"
first_allocation_year = 2020
responsibility_weight = 0.5
capability_functional_form = \"power\"
strict = false"
            )
            .unwrap();
        }

        let params = AllocationParameters::from_path(dir.path()).unwrap();
        assert_eq!(
            params.approach,
            Approach::CumulativePerCapitaConvergenceAdjusted
        );
        assert_eq!(params.first_allocation_year, 2020);
        assert_eq!(params.responsibility_weight, 0.5);
        assert_eq!(params.capability_weight, 0.0);
        assert_eq!(params.capability_functional_form, FunctionalForm::Power);
        assert_eq!(
            params.responsibility_functional_form,
            FunctionalForm::Asinh
        );
        assert_eq!(params.historical_responsibility_year, 1990);
        assert_eq!(params.deviation_sigma(), Some(2.0));
        assert_eq!(params.max_convergence_speed, 0.9);
        assert!(!params.strict);
    }

    #[test]
    fn test_allocation_params_from_path_invalid() {
        let dir = tempdir().unwrap();
        {
            let mut file = File::create(dir.path().join(ALLOCATION_PARAMETERS_FILE_NAME)).unwrap();
            writeln!(
                file,
                "approach = \"per-capita-adjusted\"
first_allocation_year = 2020
responsibility_weight = 0.7
capability_weight = 0.7"
            )
            .unwrap();
        }

        let err = AllocationParameters::from_path(dir.path()).unwrap_err();
        assert!(err.to_string().starts_with("Error reading"));
        assert_eq!(
            err.root_cause().to_string(),
            "responsibility_weight (0.7) + capability_weight (0.7) = 1.4 must not exceed 1.0"
        );
    }

    #[test]
    fn test_defaults_match_serde_defaults() {
        let from_toml: AllocationParameters = toml::from_str(
            "approach = \"equal-per-capita\"
first_allocation_year = 2025",
        )
        .unwrap();
        assert_eq!(
            from_toml,
            AllocationParameters::new(Approach::EqualPerCapita, 2025)
        );
    }

    #[test]
    fn test_unknown_functional_form_rejected() {
        let result = toml::from_str::<AllocationParameters>(
            "approach = \"per-capita-adjusted\"
first_allocation_year = 2025
capability_functional_form = \"log\"",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_deviation_sigma_disabled() {
        let mut params = AllocationParameters::new(Approach::EqualPerCapitaBudget, 2020);
        params.apply_deviation_constraint = false;
        assert_eq!(params.deviation_sigma(), None);
    }

    #[rstest]
    #[case(1.0, true)] // Valid maximum value
    #[case(0.9, true)] // Valid default value
    #[case(1e-3, true)] // Valid small value
    #[case(0.0, false)] // Invalid: zero
    #[case(1.1, false)] // Invalid: above one
    #[case(-0.5, false)] // Invalid: negative
    #[case(f64::NAN, false)] // Invalid: NaN value
    fn test_check_max_convergence_speed(#[case] value: f64, #[case] expected_valid: bool) {
        assert_validation_result(
            check_max_convergence_speed(value),
            expected_valid,
            value,
            "max_convergence_speed must be in (0, 1]",
        );
    }

    #[rstest]
    #[case(0.0, true)] // Valid: collapses to equal per capita
    #[case(2.0, true)] // Valid default value
    #[case(-1.0, false)] // Invalid: negative value
    #[case(f64::INFINITY, false)] // Invalid: infinite value
    #[case(f64::NAN, false)] // Invalid: NaN value
    fn test_check_max_deviation_sigma(#[case] value: f64, #[case] expected_valid: bool) {
        assert_validation_result(
            check_max_deviation_sigma(value),
            expected_valid,
            value,
            "max_deviation_sigma must be in [0, inf)",
        );
    }

    #[rstest]
    #[case(None, "convergence_year must be provided for the per-capita-convergence approach")]
    #[case(Some(2020), "first_allocation_year (2020) must be before convergence_year (2020)")]
    fn test_validate_convergence_year(#[case] convergence_year: Option<u32>, #[case] msg: &str) {
        let mut params = AllocationParameters::new(Approach::PerCapitaConvergence, 2020);
        params.convergence_year = convergence_year;
        assert_eq!(params.validate().unwrap_err().to_string(), msg);
    }

    #[rstest]
    #[case(Approach::PerCapitaAdjustedGini, None, 7500.0)]
    #[case(Approach::CumulativePerCapitaConvergenceGiniAdjusted, None, 7500.0)]
    #[case(Approach::PerCapitaAdjustedGiniBudget, None, 0.0)]
    #[case(Approach::PerCapitaAdjustedGiniBudget, Some(2000.0), 2000.0)]
    #[case(Approach::PerCapitaAdjustedGini, Some(0.0), 0.0)]
    fn test_income_floor_default(
        #[case] approach: Approach,
        #[case] income_floor: Option<f64>,
        #[case] expected: f64,
    ) {
        let mut params = AllocationParameters::new(approach, 2020);
        params.income_floor = income_floor;
        assert_eq!(params.income_floor(), expected);
    }

    #[test]
    fn test_validate_gini_options() {
        let mut params = AllocationParameters::new(Approach::PerCapitaAdjustedGini, 2020);
        params.max_gini_adjustment = 1.5;
        assert_eq!(
            params.validate().unwrap_err(),
            AllocationError::ParameterOutOfRange {
                name: "max_gini_adjustment",
                value: 1.5,
                range: "[0, 1]"
            }
        );
    }
}
