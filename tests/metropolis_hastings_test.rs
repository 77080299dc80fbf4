//! End-to-end properties of the Metropolis-Hastings sampler: stationarity on a known
//! target, the Hastings correction for an asymmetric proposal, reproducibility and the
//! start-state guard.

use mcmc_engine::core::{ChainRunner, Starts};
use mcmc_engine::distributions::{Exponential, IsotropicGaussian, LogNormalWalk};
use mcmc_engine::error::McmcError;
use mcmc_engine::metropolis_hastings::MetropolisHastings;
use ndarray::s;

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: u64 = 42;

    /// Exponential(rate 0.5) from x0 = 1 with a Normal(x, 1) proposal: 10,000 steps per
    /// chain with the first 500 discarded. The mean of the pooled chains must be within
    /// 0.1 of the analytic mean 2.
    #[test]
    fn exponential_mean_is_recovered() {
        const N_CHAINS: usize = 16;
        const N_STEPS: usize = 10_000;
        const BURNIN: usize = 500;

        let target = Exponential::new(0.5_f64).unwrap();
        let proposal = IsotropicGaussian::new(1.0).unwrap();
        let starts = Starts::shared(&[1.0], N_CHAINS);
        let mut mh = MetropolisHastings::new(target, proposal, starts)
            .unwrap()
            .set_seed(SEED);

        let result = mh.run(N_STEPS);
        assert!(result.is_complete());
        // Row 0 is the start state, so the first 500 iterations end at row 500.
        let draws = result.discard(BURNIN + 1).unwrap();
        assert_eq!(draws.shape(), &[N_CHAINS, N_STEPS - BURNIN, 1]);
        assert!(draws.iter().all(|&x| x >= 0.0));

        let mean = draws.mean().unwrap();
        assert!(
            (mean - target.mean()).abs() < 0.1,
            "Expected a mean close to {}, got {mean}",
            target.mean()
        );
    }

    #[test]
    fn asymmetric_proposal_is_corrected() {
        const N_CHAINS: usize = 8;
        const N_STEPS: usize = 20_000;
        const BURNIN: usize = 1_000;

        let target = Exponential::new(0.5_f64).unwrap();
        let proposal = LogNormalWalk::new(0.8).unwrap();
        let starts = Starts::shared(&[1.0], N_CHAINS);
        let mut mh = MetropolisHastings::new(target, proposal, starts)
            .unwrap()
            .set_seed(SEED);

        let result = mh.run(N_STEPS);
        assert!(result.is_complete());
        let draws = result.discard(BURNIN + 1).unwrap();
        let mean = draws.mean().unwrap();
        // Without the correction the walk would target f(x)/x instead.
        assert!((mean - 2.0).abs() < 0.15, "Expected a mean close to 2, got {mean}");
    }

    #[test]
    fn identical_seeds_give_identical_chains() {
        let run = |seed: u64| {
            let target = Exponential::new(0.5_f64).unwrap();
            let proposal = IsotropicGaussian::new(1.0).unwrap();
            let mut mh = MetropolisHastings::new(target, proposal, vec![vec![1.0], vec![3.0]])
                .unwrap()
                .set_seed(seed);
            mh.run(2_000).to_array3().unwrap()
        };

        let first = run(SEED);
        let second = run(SEED);
        assert_eq!(first, second);
        assert!(first
            .iter()
            .zip(second.iter())
            .all(|(a, b)| a.to_bits() == b.to_bits()));

        assert_ne!(first, run(SEED + 100));
    }

    #[test]
    fn continuing_a_run_matches_one_long_run() {
        let make = || {
            let target = Exponential::new(0.5_f64).unwrap();
            let proposal = IsotropicGaussian::new(1.0).unwrap();
            MetropolisHastings::new(target, proposal, Starts::shared(&[1.0], 2))
                .unwrap()
                .set_seed(SEED)
        };

        let long = make().run(200).to_array3().unwrap();

        let mut split = make();
        split.run(120);
        let tail = split.run(80).to_array3().unwrap();
        assert_eq!(tail, long.slice(s![.., 120.., ..]));
    }

    #[test]
    fn zero_density_start_is_refused() {
        let target = Exponential::new(0.5_f64).unwrap();
        let proposal = IsotropicGaussian::new(1.0).unwrap();

        let shared = MetropolisHastings::new(target, proposal, Starts::shared(&[-1.0], 4));
        match shared {
            Err(McmcError::InvalidStart { state }) => assert_eq!(state, vec![-1.0]),
            other => panic!("Expected InvalidStart, got {other:?}"),
        }

        // One bad start among good ones still aborts before sampling.
        let mixed = MetropolisHastings::new(target, proposal, vec![vec![1.0], vec![-0.5]]);
        assert!(matches!(mixed, Err(McmcError::InvalidStart { .. })));
    }
}
