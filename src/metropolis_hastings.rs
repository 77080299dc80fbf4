/*!
# Metropolis–Hastings Sampler

This module implements a generic Metropolis–Hastings sampler that works with any target
distribution `D` and proposal distribution `Q` implementing [`Target`] and [`Proposal`].
The sampler runs multiple independent Markov chains in parallel, started either from one
shared state or from one state per chain. A global seed makes runs reproducible; each chain
gets its own random stream seeded with the global seed plus its index.

Each iteration of a chain follows the same loop:

1. **Propose** a candidate from `g(· | current)`.
2. **Evaluate** the acceptance ratio
   `r = f(proposed) / f(current) · g(current | proposed) / g(proposed | current)`,
   where the correction factor is skipped for symmetric proposals.
3. **Decide** by drawing `u ~ Uniform(0, 1)` and accepting iff `u ≤ min(1, r)`.
4. **Advance** to the proposed state, or stay put on rejection.

## Example Usage

```rust
use mcmc_engine::core::{ChainRunner, Starts};
use mcmc_engine::distributions::{Gaussian2D, IsotropicGaussian};
use mcmc_engine::metropolis_hastings::MetropolisHastings;

let target = Gaussian2D::new([0.0, 0.0], [[1.0, 0.0], [0.0, 1.0]]).unwrap();
let proposal = IsotropicGaussian::new(1.0).unwrap();

let mut mh = MetropolisHastings::new(target, proposal, Starts::shared(&[0.0, 0.0], 4))
    .unwrap()
    .set_seed(42);

let result = mh.run(1000);
let draws = result.discard(100).unwrap();
assert_eq!(draws.shape(), &[4, 901, 2]);
```
*/

use num_traits::Float;
use rand::prelude::*;
use rand_distr::Standard;
use std::marker::Send;

use crate::core::{chain_seed, HasChains, MarkovChain, Starts};
use crate::distributions::{check_logp, check_start, Proposal, Target};
use crate::error::{McmcError, Result};

/// The transient record of one Metropolis–Hastings iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalOutcome<T> {
    /// The candidate drawn from the proposal.
    pub proposed: Vec<T>,
    /// `min(1, r)` for the candidate.
    pub accept_prob: T,
    /// Whether the chain moved to the candidate.
    pub accepted: bool,
}

/**
The Metropolis–Hastings sampler: a target, a proposal and a set of independent chains.

# Examples

```rust
use mcmc_engine::distributions::{Gaussian2D, IsotropicGaussian};
use mcmc_engine::metropolis_hastings::MetropolisHastings;

let target = Gaussian2D::new([0.0, 0.0], [[1.0, 0.0], [0.0, 1.0]]).unwrap();
let proposal = IsotropicGaussian::new(1.0).unwrap();
let mh = MetropolisHastings::new(target, proposal, vec![vec![0.0, 0.0], vec![1.0, 1.0]])
    .unwrap()
    .set_seed(42);
assert_eq!(mh.chains.len(), 2);
assert_eq!(mh.chains[1].seed, 43);
```
*/
#[derive(Debug, Clone)]
pub struct MetropolisHastings<T, D, Q> {
    /// The target distribution we want to sample from.
    pub target: D,
    /// The proposal distribution used to generate candidate states.
    pub proposal: Q,
    /// The vector of independent Markov chains.
    pub chains: Vec<MHMarkovChain<T, D, Q>>,
    /// The global random seed.
    pub seed: u64,
}

/// A single Markov chain for the Metropolis–Hastings algorithm.
///
/// Each chain stores its own copy of the target and proposal distributions,
/// maintains its current state, and draws every random number from its own generator.
#[derive(Debug, Clone)]
pub struct MHMarkovChain<T, D, Q> {
    /// The target distribution to sample from.
    pub target: D,
    /// The proposal distribution used to generate candidate states.
    pub proposal: Q,
    /// The current state of the chain.
    pub current_state: Vec<T>,
    /// The chain-specific random seed.
    pub seed: u64,
    /// The random number generator for this chain.
    pub rng: SmallRng,
    current_logp: T,
    n_steps: usize,
    n_accepted: usize,
}

impl<T, D, Q> MetropolisHastings<T, D, Q>
where
    T: Float,
    D: Target<T> + Clone,
    Q: Proposal<T> + Clone,
    Standard: Distribution<T>,
{
    /**
    Constructs a sampler with one chain per start state.

    Fails with [`McmcError::InvalidStart`] if the target density is zero at any start,
    and with [`McmcError::Configuration`] if the starts are empty or of mixed dimension.
    No chain is created in either case.
    */
    pub fn new(target: D, proposal: Q, starts: impl Into<Starts<T>>) -> Result<Self> {
        let seed = thread_rng().gen::<u64>();
        let chains = starts
            .into()
            .into_states()?
            .iter()
            .enumerate()
            .map(|(i, s)| {
                MHMarkovChain::new(target.clone(), proposal.clone(), s)
                    .map(|c| c.set_seed(chain_seed(seed, i)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            target,
            proposal,
            chains,
            seed,
        })
    }

    /**
    Sets a new global seed and reseeds every chain with `seed + i`, where `i` is the
    chain index.
    */
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

impl<T, D, Q> HasChains<T> for MetropolisHastings<T, D, Q>
where
    T: Float + Send,
    D: Target<T> + Clone + Send,
    Q: Proposal<T> + Clone + Send,
    Standard: Distribution<T>,
{
    type Chain = MHMarkovChain<T, D, Q>;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain> {
        &mut self.chains
    }
}

impl<T, D, Q> MHMarkovChain<T, D, Q>
where
    T: Float,
    D: Target<T>,
    Q: Proposal<T>,
    Standard: Distribution<T>,
{
    /**
    Creates a new chain at `initial_state`, validating that the target density there
    is positive and well defined.

    # Examples

    ```rust
    use mcmc_engine::distributions::{Exponential, IsotropicGaussian};
    use mcmc_engine::error::McmcError;
    use mcmc_engine::metropolis_hastings::MHMarkovChain;

    let target = Exponential::new(0.5).unwrap();
    let proposal = IsotropicGaussian::new(1.0).unwrap();
    let chain = MHMarkovChain::new(target, proposal, &[-1.0]);
    assert!(matches!(chain, Err(McmcError::InvalidStart { .. })));
    ```
    */
    pub fn new(target: D, proposal: Q, initial_state: &[T]) -> Result<Self> {
        let current_logp = target.unnorm_logp(initial_state);
        check_start(initial_state, current_logp)?;
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            target,
            proposal,
            current_state: initial_state.to_vec(),
            seed,
            rng: SmallRng::seed_from_u64(seed),
            current_logp,
            n_steps: 0,
            n_accepted: 0,
        })
    }

    /// Reseeds the chain's random stream.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Log of the unnormalized target density at the current state.
    pub fn current_logp(&self) -> T {
        self.current_logp
    }

    /// Draws a candidate from `g(· | current)`.
    fn propose(&mut self) -> Result<Vec<T>> {
        let proposed = self.proposal.sample(&self.current_state, &mut self.rng);
        if proposed.len() != self.current_state.len() {
            return Err(McmcError::Configuration(format!(
                "proposal returned a state of dimension {}, expected {}",
                proposed.len(),
                self.current_state.len()
            )));
        }
        Ok(proposed)
    }

    /// Returns the target log density at `proposed` and `log r`.
    fn evaluate(&self, proposed: &[T]) -> Result<(T, T)> {
        let proposed_logp = check_logp(self.target.unnorm_logp(proposed), "proposed state")?;

        // Zero density at the current state: move anywhere rather than stay stuck.
        if self.current_logp == T::neg_infinity() {
            return Ok((proposed_logp, T::infinity()));
        }
        if proposed_logp == T::neg_infinity() {
            return Ok((proposed_logp, T::neg_infinity()));
        }

        let mut log_ratio = proposed_logp - self.current_logp;
        if !self.proposal.is_symmetric() {
            let log_q_forward = self.proposal.logp(&self.current_state, proposed);
            let log_q_backward = self.proposal.logp(proposed, &self.current_state);
            log_ratio = log_ratio + (log_q_backward - log_q_forward);
        }
        if log_ratio.is_nan() {
            return Err(McmcError::NumericEvaluation(
                "acceptance ratio is NaN; the proposal density is undefined for this move"
                    .to_string(),
            ));
        }
        Ok((proposed_logp, log_ratio))
    }

    /// Computes the acceptance ratio `r` for moving from the current state to `proposed`
    /// without advancing the chain.
    pub fn acceptance_ratio(&self, proposed: &[T]) -> Result<T> {
        self.evaluate(proposed).map(|(_, log_ratio)| log_ratio.exp())
    }

    /// Draws `u ~ Uniform(0, 1)` and accepts iff `u ≤ min(1, r)`. A zero ratio never accepts.
    fn decide(&mut self, log_ratio: T) -> bool {
        let u: T = self.rng.gen();
        log_ratio != T::neg_infinity() && u.ln() <= log_ratio
    }

    /**
    Performs one Metropolis–Hastings iteration and reports what happened.

    The comparison is carried out in log space:

    \[
    \log r = \left[\log f(\text{proposed}) + \log g(\text{current} \mid \text{proposed})\right]
             - \left[\log f(\text{current}) + \log g(\text{proposed} \mid \text{current})\right]
    \]
    */
    pub fn transition(&mut self) -> Result<ProposalOutcome<T>> {
        let proposed = self.propose()?;
        let (proposed_logp, log_ratio) = self.evaluate(&proposed)?;
        let accepted = self.decide(log_ratio);

        self.n_steps += 1;
        if accepted {
            self.n_accepted += 1;
            self.current_state.clone_from(&proposed);
            self.current_logp = proposed_logp;
        }
        Ok(ProposalOutcome {
            proposed,
            accept_prob: log_ratio.min(T::zero()).exp(),
            accepted,
        })
    }
}

impl<T, D, Q> MarkovChain<T> for MHMarkovChain<T, D, Q>
where
    T: Float,
    D: Target<T>,
    Q: Proposal<T>,
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
