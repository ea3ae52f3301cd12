//! Adjusting GDP for within-country income inequality.
//!
//! Incomes are modelled as log-normal, with the shape parameter derived from the country's Gini
//! coefficient. The share of national income earned below an income floor is removed from GDP,
//! so countries where many people live below the floor are treated as less capable than their
//! average income suggests.
use crate::error::{AllocationError, Result};
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::function::erf::erf_inv;

/// Parameters for the Gini adjustment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GiniOptions {
    income_floor: f64,
    max_adjustment: f64,
}

impl GiniOptions {
    /// Create new options.
    ///
    /// # Arguments
    ///
    /// * `income_floor` - Income per person below which income is removed (same currency as GDP)
    /// * `max_adjustment` - The largest fraction of GDP which may be removed
    pub fn new(income_floor: f64, max_adjustment: f64) -> Result<Self> {
        if !(income_floor >= 0.0 && income_floor.is_finite()) {
            return Err(AllocationError::ParameterOutOfRange {
                name: "income_floor",
                value: income_floor,
                range: "[0, inf)",
            });
        }
        if !(0.0..=1.0).contains(&max_adjustment) {
            return Err(AllocationError::ParameterOutOfRange {
                name: "max_gini_adjustment",
                value: max_adjustment,
                range: "[0, 1]",
            });
        }

        Ok(Self {
            income_floor,
            max_adjustment,
        })
    }

    /// The income floor
    pub fn income_floor(&self) -> f64 {
        self.income_floor
    }

    /// The largest fraction of GDP which may be removed
    pub fn max_adjustment(&self) -> f64 {
        self.max_adjustment
    }

    /// Whether these options leave GDP unchanged
    pub fn is_noop(&self) -> bool {
        self.income_floor <= 0.0 || self.max_adjustment <= 0.0
    }
}

/// The share of total income earned by people with incomes below `income_floor`.
///
/// `mean_income` must be positive and `gini` in `[0, 1)`.
fn income_share_below_floor(mean_income: f64, gini: f64, income_floor: f64) -> f64 {
    let sigma = 2.0 * erf_inv(gini);
    if sigma <= 0.0 {
        // Everyone earns the mean
        return if mean_income < income_floor { 1.0 } else { 0.0 };
    }

    let normal = Normal::standard();
    let mu = mean_income.ln() - sigma * sigma / 2.0;
    let population_below = normal.cdf((income_floor.ln() - mu) / sigma);
    if population_below <= 0.0 {
        return 0.0;
    }
    if population_below >= 1.0 {
        return 1.0;
    }

    normal.cdf(normal.inverse_cdf(population_below) - sigma)
}

/// GDP with the income earned below the floor removed.
///
/// The result is never less than `gdp * (1 - max_adjustment)`. GDP is returned unchanged if the
/// options are a no-op, GDP is not positive or the Gini coefficient is 1 or more (in the limit
/// of total inequality no income is earned below the floor).
///
/// # Arguments
///
/// * `gdp` - Total GDP
/// * `population` - Total population; must be positive
/// * `gini` - Gini coefficient in `[0, 1]`
/// * `options` - Income floor and maximum adjustment
pub fn gini_adjusted_gdp(gdp: f64, population: f64, gini: f64, options: &GiniOptions) -> f64 {
    if options.is_noop() || gdp <= 0.0 || gini >= 1.0 {
        return gdp;
    }

    let share_below =
        income_share_below_floor(gdp / population, gini.max(0.0), options.income_floor);
    let adjusted = gdp * (1.0 - share_below);

    adjusted.max(gdp * (1.0 - options.max_adjustment))
}
