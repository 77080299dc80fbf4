//! A small MCMC demo: samples a correlated 2D Gaussian with Metropolis-Hastings and with
//! HMC, then prints convergence diagnostics for both.

use mcmc_engine::core::{init_with_rng, ChainRunner, MultiChainResult, Starts};
use mcmc_engine::distributions::{Gaussian2D, IsotropicGaussian};
use mcmc_engine::hmc::{HmcConfig, HMC};
use mcmc_engine::metropolis_hastings::MetropolisHastings;
use mcmc_engine::stats::{ess_autocorr, gelman_rubin};
use ndarray::Axis;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::error::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const N_CHAINS: usize = 4;
const BURNIN: usize = 1_000;
const SEED: u64 = 42;

fn report(name: &str, result: &MultiChainResult<f64>) -> Result<(), Box<dyn Error>> {
    let draws = result.discard(BURNIN)?;
    let diagnostics = gelman_rubin(&draws)?;
    let ess = ess_autocorr(&draws)?;
    let means = draws
        .mean_axis(Axis(0))
        .and_then(|m| m.mean_axis(Axis(0)))
        .ok_or("no draws to average")?;
    let acceptance: Vec<String> = result
        .runs()
        .iter()
        .map(|r| format!("{:.2}", r.acceptance_rate))
        .collect();

    println!("== {name} ==");
    println!("Mean after burn-in: ({:.2}, {:.2})", means[0], means[1]);
    println!("Acceptance per chain: [{}]", acceptance.join(", "));
    println!("R-hat: {:.4}", diagnostics.rhat());
    println!("n_eff (Gelman-Rubin): {:.1}", diagnostics.n_eff());
    println!("ESS (autocorrelation): {:.1}", ess);
    println!("max R-hat = {:.4}", diagnostics.max_rhat()?);
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let target = Gaussian2D::new([0.0, 0.0], [[2.0, 1.0], [1.0, 2.0]])?;
    // Overdispersed starts so that R-hat has something to detect.
    let mut rng = SmallRng::seed_from_u64(SEED);
    let starts: Vec<Vec<f64>> = init_with_rng::<f64, _>(N_CHAINS, 2, &mut rng)
        .into_iter()
        .map(|s| s.iter().map(|x| 10.0 * x).collect())
        .collect();

    let proposal = IsotropicGaussian::new(1.0)?;
    let mut mh = MetropolisHastings::new(target.clone(), proposal, starts.clone())?.set_seed(SEED);
    let mh_result = mh.run_progress(BURNIN + 10_000);
    report("Metropolis-Hastings", &mh_result)?;

    let config = HmcConfig::new(0.2, 15)?;
    let mut hmc = HMC::new(target, config, Starts::from(starts))?.set_seed(SEED);
    let hmc_result = hmc.run_progress(BURNIN + 2_000);
    report("HMC", &hmc_result)?;

    Ok(())
}
