//! Metropolis–Hastings and Hamiltonian Monte Carlo sampling over independent parallel
//! chains, with Gelman–Rubin and autocorrelation diagnostics.

pub mod core;
pub mod distributions;
pub mod error;
pub mod hmc;
pub mod io;
pub mod leapfrog;
pub mod metropolis_hastings;
pub mod stats;
