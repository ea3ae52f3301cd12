//! Allocation of global emissions pathways and budgets between countries according to equity
//! principles.
//!
//! [`allocation::allocate`] is the entry point: it takes [`parameters::AllocationParameters`] and
//! [`allocation::AllocationData`] and returns an [`result::AllocationResult`] holding each
//! country's share in each year. The other modules provide the steps it is built from, plus a
//! file-based harness (`input`, `output`, `cli`) for running allocations from the command line.
#![warn(missing_docs)]
use std::path::PathBuf;

pub mod adjustment;
pub mod allocation;
pub mod cli;
pub mod convergence;
pub mod country;
pub mod error;
pub mod evolution;
pub mod id;
pub mod input;
pub mod log;
pub mod output;
pub mod parameters;
pub mod result;
pub mod settings;
pub mod target;
pub mod timeseries;
pub mod validation;

#[cfg(test)]
mod fixture;

/// Get the config folder for the program.
///
/// Falls back to the current directory if the platform has no config directory.
pub fn get_fair_shares_config_dir() -> PathBuf {
    let Some(mut config_dir) = dirs::config_dir() else {
        return PathBuf::from(".");
    };
    config_dir.push("fair-shares");

    config_dir
}
