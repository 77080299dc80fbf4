//! A Hamiltonian (Hybrid) Monte Carlo sampler.
//!
//! This is modeled on the Metropolis–Hastings sampler but uses gradient-informed
//! proposals: each iteration draws a fresh momentum, simulates Hamiltonian dynamics with
//! the [leapfrog integrator](crate::leapfrog::leapfrog), and accepts the end point with
//! probability `min(1, exp(H(q, p) - H(q*, p*)))`. The momentum is thrown away after
//! every iteration.
//!
//! The target must implement [`GradientTarget`], supplying `∇(-log f)`.

use num_traits::Float;
use rand::prelude::*;
use rand_distr::{Standard, StandardNormal};

use crate::core::{chain_seed, HasChains, MarkovChain, Starts};
use crate::distributions::{check_logp, check_start, GradientTarget};
use crate::error::{McmcError, Result};
use crate::leapfrog::{checked_gradient, hamiltonian, leapfrog, validate};

/// Integrator settings for [`HMC`].
///
/// None of these are tuned automatically. Typical failure modes when they are off:
///
/// * too few leapfrog steps for the step size make the trajectory turn back on itself,
///   producing proposals close to 180° from the direction of travel;
/// * a step size that is too small explores slowly and mixes poorly, one that is too
///   large lets the energy error grow and the acceptance rate collapse;
/// * a mass that does not match the target's scale gives effective step sizes that
///   are too large in some directions and too small in others.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HmcConfig<T> {
    /// Leapfrog step size `ε`.
    pub step_size: T,
    /// Number of leapfrog steps `L` per iteration.
    pub n_leapfrog: usize,
    /// Scalar mass `m`; momenta are drawn from `N(0, m·I)`.
    pub mass: T,
}

impl<T: Float> HmcConfig<T> {
    /// Unit-mass configuration.
    pub fn new(step_size: T, n_leapfrog: usize) -> Result<Self> {
        let config = Self {
            step_size,
            n_leapfrog,
            mass: T::one(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_mass(mut self, mass: T) -> Result<Self> {
        self.mass = mass;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        validate(self.step_size, self.n_leapfrog, self.mass)
    }
}

/// Diagnostics of one HMC iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct HmcTransition<T> {
    /// End point of the leapfrog trajectory.
    pub proposed: Vec<T>,
    /// `H(q, p) - H(q*, p*)`; zero for exact dynamics.
    pub energy_change: T,
    /// `min(1, exp(energy_change))`.
    pub accept_prob: T,
    pub accepted: bool,
}

/// Hamiltonian Monte Carlo over a set of independent chains.
///
/// # Examples
///
/// ```rust
/// use mcmc_engine::core::{ChainRunner, Starts};
/// use mcmc_engine::distributions::Gaussian2D;
/// use mcmc_engine::hmc::{HmcConfig, HMC};
///
/// let target = Gaussian2D::new([0.0, 0.0], [[1.0, 0.5], [0.5, 2.0]]).unwrap();
/// let config = HmcConfig::new(0.1, 20).unwrap();
/// let mut sampler = HMC::new(target, config, Starts::shared(&[1.0, 1.0], 2))
///     .unwrap()
///     .set_seed(42);
///
/// let result = sampler.run(100);
/// assert!(result.is_complete());
/// assert_eq!(result[0].chain.len(), 101);
/// ```
#[derive(Debug, Clone)]
pub struct HMC<T, D> {
    /// The target distribution which provides log densities and gradients.
    pub target: D,
    pub config: HmcConfig<T>,
    pub chains: Vec<HMCMarkovChain<T, D>>,
    /// Global random seed; chain `i` is seeded with `seed + i`.
    pub seed: u64,
}

/// One HMC chain with its own target copy and random stream.
#[derive(Debug, Clone)]
pub struct HMCMarkovChain<T, D> {
    pub target: D,
    pub config: HmcConfig<T>,
    pub current_state: Vec<T>,
    pub seed: u64,
    pub rng: SmallRng,
    current_logp: T,
    n_steps: usize,
    n_accepted: usize,
}

impl<T, D> HMC<T, D>
where
    T: Float,
    D: GradientTarget<T> + Clone,
    StandardNormal: Distribution<T>,
    Standard: Distribution<T>,
{
    /// Builds the sampler, validating the configuration and every start state before
    /// any chain exists.
    pub fn new(target: D, config: HmcConfig<T>, starts: impl Into<Starts<T>>) -> Result<Self> {
        config.validate()?;
        let seed = thread_rng().gen::<u64>();
        let chains = starts
            .into()
            .into_states()?
            .iter()
            .enumerate()
            .map(|(i, s)| {
                HMCMarkovChain::new(target.clone(), config, s)
                    .map(|c| c.set_seed(chain_seed(seed, i)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            target,
            config,
            chains,
            seed,
        })
    }

    /// Sets a new global seed and reseeds every chain with `seed + i`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.chains = self
            .chains
            .into_iter()
            .enumerate()
            .map(|(i, chain)| chain.set_seed(chain_seed(seed, i)))
            .collect();
        self
    }
}

impl<T, D> HasChains<T> for HMC<T, D>
where
    T: Float + Send,
    D: GradientTarget<T> + Clone + Send,
    StandardNormal: Distribution<T>,
    Standard: Distribution<T>,
{
    type Chain = HMCMarkovChain<T, D>;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain> {
        &mut self.chains
    }
}

impl<T, D> HMCMarkovChain<T, D>
where
    T: Float,
    D: GradientTarget<T>,
    StandardNormal: Distribution<T>,
    Standard: Distribution<T>,
{
    /// Creates a chain at `initial_state`.
    ///
    /// Fails with [`McmcError::InvalidStart`] on zero density and with
    /// [`McmcError::Configuration`] if the gradient's dimension differs from the state's.
    pub fn new(target: D, config: HmcConfig<T>, initial_state: &[T]) -> Result<Self> {
        config.validate()?;
        let current_logp = target.unnorm_logp(initial_state);
        check_start(initial_state, current_logp)?;
        checked_gradient(&mut |q: &[T]| target.grad_potential(q), initial_state)?;

        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            target,
            config,
            current_state: initial_state.to_vec(),
            seed,
            rng: SmallRng::seed_from_u64(seed),
            current_logp,
            n_steps: 0,
            n_accepted: 0,
        })
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Draws `p ~ N(0, m·I)`.
    fn sample_momentum(&mut self) -> Vec<T> {
        let scale = self.config.mass.sqrt();
        (0..self.current_state.len())
            .map(|_| {
                let z: T = self.rng.sample(StandardNormal);
                z * scale
            })
            .collect()
    }

    /// Runs one full trajectory from the current state with momentum `p0` and returns
    /// the end point, its log density and `H(q, p) - H(q*, p*)`.
    pub fn simulate(&self, p0: &[T]) -> Result<(Vec<T>, T, T)> {
        let HmcConfig {
            step_size,
            n_leapfrog,
            mass,
        } = self.config;
        let target = &self.target;
        let (q1, p1) = leapfrog(
            &self.current_state,
            p0,
            |q: &[T]| target.grad_potential(q),
            step_size,
            n_leapfrog,
            mass,
        )?;
        let proposed_logp = check_logp(target.unnorm_logp(&q1), "end of the leapfrog trajectory")?;

        let h_current = hamiltonian(-self.current_logp, p0, mass);
        let h_proposed = hamiltonian(-proposed_logp, &p1, mass);
        let energy_change = if proposed_logp == T::neg_infinity() {
            T::neg_infinity()
        } else {
            h_current - h_proposed
        };
        if energy_change.is_nan() {
            return Err(McmcError::NumericEvaluation(
                "Hamiltonian difference is NaN".to_string(),
            ));
        }
        Ok((q1, proposed_logp, energy_change))
    }

    /// Performs one HMC iteration: momentum refresh, trajectory, accept/reject.
    pub fn transition(&mut self) -> Result<HmcTransition<T>> {
        let p0 = self.sample_momentum();
        let (proposed, proposed_logp, energy_change) = self.simulate(&p0)?;

        let u: T = self.rng.gen();
        let accepted = energy_change != T::neg_infinity() && u.ln() <= energy_change;

        self.n_steps += 1;
        if accepted {
            self.n_accepted += 1;
            self.current_state.clone_from(&proposed);
            self.current_logp = proposed_logp;
        }
        Ok(HmcTransition {
            proposed,
            energy_change,
            accept_prob: energy_change.min(T::zero()).exp(),
            accepted,
        })
    }
}

impl<T, D> MarkovChain<T> for HMCMarkovChain<T, D>
where
    T: Float,
    D: GradientTarget<T>,
    StandardNormal: Distribution<T>,
    Standard: Distribution<T>,
{
    fn step(&mut self) -> Result<&Vec<T>> {
        self.transition()?;
        Ok(&self.current_state)
    }

    fn current_state(&self) -> &Vec<T> {
        &self.current_state
    }

    fn acceptance_rate(&self) -> f64 {
        if self.n_steps == 0 {
            0.0
        } else {
            self.n_accepted as f64 / self.n_steps as f64
        }
    }
}
