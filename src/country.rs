//! Country groups and per-country values.
use crate::id::define_id_type;
use indexmap::IndexMap;

define_id_type! {CountryID}

/// The code of the aggregate row covering every country (plus any residual)
pub const WORLD: &str = "World";

impl CountryID {
    /// Whether this is the `World` aggregate rather than an allocatable country group
    pub fn is_world(&self) -> bool {
        &*self.0 == WORLD
    }
}

/// A single number for each country, in a fixed order
pub type CountryValues = IndexMap<CountryID, f64>;

/// Sum of the values for all countries
pub fn total(values: &CountryValues) -> f64 {
    values.values().sum()
}

/// Format a list of countries for use in messages
pub fn format_countries<'a, I>(countries: I) -> String
where
    I: IntoIterator<Item = &'a CountryID>,
{
    let countries: Vec<_> = countries.into_iter().map(ToString::to_string).collect();
    countries.join(", ")
}
