//! Chain bookkeeping shared by all samplers: the [`MarkovChain`] trait, start-point
//! handling, and the parallel [`ChainRunner`] that turns a set of chains into a
//! [`MultiChainResult`].

use std::ops::Index;
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ndarray::{s, Array2, Array3, ArrayView1, Axis};
use rand::prelude::*;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;

use crate::error::{McmcError, Result};

/// How often, in iterations, a progress bar refreshes its acceptance message.
const PROGRESS_REFRESH: usize = 100;

pub trait MarkovChain<T> {
    /// Does one iteration of the chain, returning the new current state.
    fn step(&mut self) -> Result<&Vec<T>>;

    /// Returns the current state without stepping.
    fn current_state(&self) -> &Vec<T>;

    /// Fraction of proposals accepted so far; zero before the first step.
    fn acceptance_rate(&self) -> f64;
}

/// Draws `n_chains` start points with `dim` standard-normal coordinates each.
///
/// Uses the thread-local generator; see [`init_with_rng`] for reproducible starts.
pub fn init<T>(n_chains: usize, dim: usize) -> Vec<Vec<T>>
where
    StandardNormal: Distribution<T>,
{
    init_with_rng(n_chains, dim, &mut thread_rng())
}

/// Like [`init`], but draws from the given generator.
pub fn init_with_rng<T, R>(n_chains: usize, dim: usize, rng: &mut R) -> Vec<Vec<T>>
where
    StandardNormal: Distribution<T>,
    R: Rng + ?Sized,
{
    (0..n_chains)
        .map(|_| (0..dim).map(|_| rng.sample(StandardNormal)).collect())
        .collect()
}

/// Start points for a multi-chain run.
#[derive(Debug, Clone, PartialEq)]
pub enum Starts<T> {
    /// One state broadcast to every chain.
    Shared { state: Vec<T>, n_chains: usize },
    /// A distinct state per chain.
    PerChain(Vec<Vec<T>>),
}

impl<T: Clone> Starts<T> {
    pub fn shared(state: &[T], n_chains: usize) -> Self {
        Starts::Shared {
            state: state.to_vec(),
            n_chains,
        }
    }

    /// Expands into one start state per chain, checking that there is at least one
    /// chain and that every state has the same, non-zero dimension.
    pub fn into_states(self) -> Result<Vec<Vec<T>>> {
        let states = match self {
            Starts::Shared { state, n_chains } => vec![state; n_chains],
            Starts::PerChain(states) => states,
        };
        let Some(first) = states.first() else {
            return Err(McmcError::Configuration(
                "at least one chain is required".to_string(),
            ));
        };
        let dim = first.len();
        if dim == 0 {
            return Err(McmcError::Configuration(
                "start states must have at least one coordinate".to_string(),
            ));
        }
        if let Some(i) = states.iter().position(|s| s.len() != dim) {
            return Err(McmcError::Configuration(format!(
                "start state {i} has dimension {}, expected {dim}",
                states[i].len()
            )));
        }
        Ok(states)
    }
}

impl<T> From<Vec<Vec<T>>> for Starts<T> {
    fn from(states: Vec<Vec<T>>) -> Self {
        Starts::PerChain(states)
    }
}

/// Derives the seed of chain `index` from a sampler-wide seed.
pub(crate) fn chain_seed(seed: u64, index: usize) -> u64 {
    seed.wrapping_add(index as u64)
}

/// Options for a single call to [`ChainRunner::run_with`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Iterations per chain. Fixed for the whole run.
    pub n_steps: usize,
    /// Chains stop at the first iteration boundary past this instant.
    pub deadline: Option<Instant>,
    /// Show one progress bar per chain.
    pub progress: bool,
}

impl RunOptions {
    pub fn new(n_steps: usize) -> Self {
        Self {
            n_steps,
            deadline: None,
            progress: false,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the deadline to `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }
}

/// The states visited by one chain, one row per state, starting with the initial state.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain<T> {
    draws: Array2<T>,
}

impl<T> Chain<T> {
    /// Number of stored states (iterations + 1 for a completed run).
    pub fn len(&self) -> usize {
        self.draws.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.nrows() == 0
    }

    pub fn dim(&self) -> usize {
        self.draws.ncols()
    }

    pub fn draws(&self) -> &Array2<T> {
        &self.draws
    }

    pub fn state(&self, i: usize) -> ArrayView1<'_, T> {
        self.draws.row(i)
    }

    pub fn into_inner(self) -> Array2<T> {
        self.draws
    }
}

/// Outcome of running one chain: the draws produced and, if the chain stopped early,
/// the error that stopped it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainRun<T> {
    pub index: usize,
    pub chain: Chain<T>,
    pub acceptance_rate: f64,
    pub error: Option<McmcError>,
}

impl<T> ChainRun<T> {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// All chains of a run, keyed by chain index. Chains that failed are kept and flagged.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiChainResult<T> {
    runs: Vec<ChainRun<T>>,
}

impl<T> MultiChainResult<T> {
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn runs(&self) -> &[ChainRun<T>] {
        &self.runs
    }

    pub fn get(&self, index: usize) -> Option<&ChainRun<T>> {
        self.runs.get(index)
    }

    pub fn is_complete(&self) -> bool {
        self.runs.iter().all(ChainRun::is_complete)
    }

    pub fn completed(&self) -> impl Iterator<Item = &ChainRun<T>> {
        self.runs.iter().filter(|r| r.is_complete())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ChainRun<T>> {
        self.runs.iter().filter(|r| !r.is_complete())
    }
}

impl<T: Clone> MultiChainResult<T> {
    /// Stacks the completed chains into a `[chain, draw, dim]` array after dropping the
    /// first `burn_in` states of each. Failed chains are left out.
    pub fn discard(&self, burn_in: usize) -> Result<Array3<T>> {
        let views: Vec<_> = self.completed().map(|r| r.chain.draws.view()).collect();
        let Some(first) = views.first() else {
            return Err(McmcError::Configuration(
                "no completed chains to collect".to_string(),
            ));
        };
        if burn_in >= first.nrows() {
            return Err(McmcError::Configuration(format!(
                "burn-in of {burn_in} leaves no draws from chains of length {}",
                first.nrows()
            )));
        }
        let stacked = ndarray::stack(Axis(0), &views)
            .map_err(|e| McmcError::Configuration(format!("chains cannot be stacked: {e}")))?;
        Ok(stacked.slice(s![.., burn_in.., ..]).to_owned())
    }

    /// All completed chains as a `[chain, draw, dim]` array, initial states included.
    pub fn to_array3(&self) -> Result<Array3<T>> {
        self.discard(0)
    }
}

impl<T> Index<usize> for MultiChainResult<T> {
    type Output = ChainRun<T>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.runs[index]
    }
}

impl<T> FromIterator<ChainRun<T>> for MultiChainResult<T> {
    fn from_iter<I: IntoIterator<Item = ChainRun<T>>>(iter: I) -> Self {
        let mut runs: Vec<_> = iter.into_iter().collect();
        runs.sort_by_key(|r| r.index);
        Self { runs }
    }
}

/// Runs `chain` for `options.n_steps` iterations and records every visited state.
///
/// The deadline, if any, is only checked between iterations. On error the draws
/// collected so far are kept and the error is returned next to them.
pub fn run_chain<T, M>(
    chain: &mut M,
    index: usize,
    options: &RunOptions,
    pb: Option<&ProgressBar>,
) -> ChainRun<T>
where
    M: MarkovChain<T>,
    T: Clone,
{
    let dim = chain.current_state().len();
    let mut flat: Vec<T> = Vec::with_capacity(dim * (options.n_steps + 1));
    flat.extend_from_slice(chain.current_state());

    let mut error = None;
    for i in 0..options.n_steps {
        if options.deadline.is_some_and(|d| Instant::now() >= d) {
            error = Some(McmcError::DeadlineExceeded {
                completed: i,
                requested: options.n_steps,
            });
            break;
        }
        match chain.step() {
            Ok(state) if state.len() == dim => flat.extend_from_slice(state),
            Ok(state) => {
                error = Some(McmcError::Configuration(format!(
                    "state dimension changed from {dim} to {} at iteration {}",
                    state.len(),
                    i + 1
                )));
                break;
            }
            Err(e) => {
                error = Some(e);
                break;
            }
        }
        if let Some(pb) = pb {
            pb.inc(1);
            if (i + 1) % PROGRESS_REFRESH == 0 {
                pb.set_message(format!("p(accept)≈{:.2}", chain.acceptance_rate()));
            }
        }
    }

    let rows = flat.len() / dim.max(1);
    let draws = Array2::from_shape_vec((rows, dim), flat)
        .expect("Expected every stored state to have the chain's dimension");
    let acceptance_rate = chain.acceptance_rate();
    match &error {
        None => tracing::debug!(chain = index, acceptance_rate, "chain finished"),
        Some(e) => tracing::warn!(chain = index, draws = rows, error = %e, "chain stopped early"),
    }
    ChainRun {
        index,
        chain: Chain { draws },
        acceptance_rate,
        error,
    }
}

/// Anything that owns several [`MarkovChain`]s.
pub trait HasChains<S> {
    type Chain: MarkovChain<S> + std::marker::Send;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain>;
}

/// Runs all chains of a sampler in parallel on the rayon pool.
///
/// Chains share nothing mutable; each owns its random stream. The result is built
/// only after every chain has returned. Running again continues each chain from
/// where the previous run left it.
pub trait ChainRunner<S>: HasChains<S>
where
    S: Clone + Send,
{
    fn run(&mut self, n_steps: usize) -> MultiChainResult<S> {
        self.run_with(&RunOptions::new(n_steps))
    }

    fn run_progress(&mut self, n_steps: usize) -> MultiChainResult<S> {
        self.run_with(&RunOptions::new(n_steps).with_progress(true))
    }

    fn run_with(&mut self, options: &RunOptions) -> MultiChainResult<S> {
        let n_chains = self.chains_mut().len();
        tracing::info!(n_chains, n_steps = options.n_steps, "running chains");

        let multi = options.progress.then(MultiProgress::new);
        let style = ProgressStyle::with_template(
            "{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        let result: MultiChainResult<S> = self
            .chains_mut()
            .par_iter_mut()
            .enumerate()
            .map(|(i, chain)| {
                let pb = multi.as_ref().map(|m| {
                    let pb = m.add(ProgressBar::new(options.n_steps as u64));
                    pb.set_prefix(format!("Chain {i}"));
                    pb.set_style(style.clone());
                    pb
                });
                let run = run_chain(chain, i, options, pb.as_ref());
                if let Some(pb) = pb {
                    pb.finish_with_message(match &run.error {
                        None => format!("Done! p(accept)≈{:.2}", run.acceptance_rate),
                        Some(e) => format!("Failed: {e}"),
                    });
                }
                run
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect();

        let n_failed = result.failed().count();
        if n_failed > 0 {
            tracing::warn!(n_failed, n_chains, "run finished with failed chains");
        } else {
            tracing::info!(n_chains, "run finished");
        }
        result
    }
}

impl<S, T> ChainRunner<S> for T
where
    S: Clone + Send,
    T: HasChains<S>,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{LogDensity, Proposal};
    use crate::metropolis_hastings::MetropolisHastings;

    /// Deterministic proposal that always moves one unit up.
    #[derive(Clone, Copy)]
    struct StepUp;

    impl Proposal<f64> for StepUp {
        fn sample<R: Rng>(&self, current: &[f64], _rng: &mut R) -> Vec<f64> {
            current.iter().map(|x| x + 1.0).collect()
        }

        fn logp(&self, _from: &[f64], _to: &[f64]) -> f64 {
            0.0
        }

        fn is_symmetric(&self) -> bool {
            true
        }
    }

    #[test]
    fn starts_broadcast_and_validate() {
        let states = Starts::shared(&[1.0, 2.0], 3).into_states().unwrap();
        assert_eq!(states, vec![vec![1.0, 2.0]; 3]);

        let err = Starts::PerChain(vec![vec![1.0], vec![1.0, 2.0]]).into_states();
        assert!(matches!(err, Err(McmcError::Configuration(_))));
        assert!(Starts::<f64>::shared(&[1.0], 0).into_states().is_err());
        assert!(Starts::<f64>::shared(&[], 2).into_states().is_err());
    }

    #[test]
    fn init_shapes() {
        let states: Vec<Vec<f64>> = init(4, 3);
        assert_eq!(states.len(), 4);
        assert!(states.iter().all(|s| s.len() == 3));
    }

    #[test]
    fn seeded_init_is_reproducible() {
        let draw = |seed: u64| -> Vec<Vec<f64>> {
            init_with_rng(4, 3, &mut SmallRng::seed_from_u64(seed))
        };
        let first = draw(42);
        assert_eq!(first.len(), 4);
        assert!(first.iter().all(|s| s.len() == 3));
        assert_eq!(first, draw(42));
        assert_ne!(first, draw(43));
    }

    #[test]
    fn numeric_failure_only_stops_its_own_chain() {
        // Well defined below 5, broken (NaN) from 5 upwards.
        let target = LogDensity(|x: &[f64]| if x[0] < 5.0 { 0.0 } else { f64::NAN });
        let mut mh =
            MetropolisHastings::new(target, StepUp, vec![vec![0.0], vec![-100.0]]).unwrap();
        let result = mh.run(100);

        assert_eq!(result.len(), 2);
        assert!(!result.is_complete());

        let failed = &result[0];
        assert!(matches!(failed.error, Some(McmcError::NumericEvaluation(_))));
        assert_eq!(failed.chain.len(), 5);
        assert_eq!(failed.chain.state(4)[0], 4.0);

        let ok = &result[1];
        assert!(ok.is_complete());
        assert_eq!(ok.chain.len(), 101);
        assert_eq!(ok.chain.state(100)[0], 0.0);
        assert_eq!(ok.acceptance_rate, 1.0);

        let stacked = result.discard(1).unwrap();
        assert_eq!(stacked.dim(), (1, 100, 1));
    }

    #[test]
    fn past_deadline_stops_before_first_iteration() {
        let target = LogDensity(|_: &[f64]| 0.0);
        let mut mh = MetropolisHastings::new(target, StepUp, Starts::shared(&[0.0], 2)).unwrap();
        let result = mh.run_with(&RunOptions::new(10).with_deadline(Instant::now()));
        for run in result.runs() {
            assert_eq!(
                run.error,
                Some(McmcError::DeadlineExceeded {
                    completed: 0,
                    requested: 10
                })
            );
            assert_eq!(run.chain.len(), 1);
        }
        assert!(result.discard(0).is_err());
    }

    #[test]
    fn deadline_mid_run_keeps_prefix() {
        let target = LogDensity(|_: &[f64]| {
            std::thread::sleep(Duration::from_millis(2));
            0.0
        });
        let mut mh = MetropolisHastings::new(target, StepUp, Starts::shared(&[0.0], 1)).unwrap();
        let result = mh.run_with(&RunOptions::new(10_000).with_timeout(Duration::from_millis(100)));

        let run = &result[0];
        let (completed, requested) = match &run.error {
            Some(McmcError::DeadlineExceeded {
                completed,
                requested,
            }) => (*completed, *requested),
            other => panic!("Expected a deadline error, got {other:?}"),
        };
        assert_eq!(requested, 10_000);
        assert!(completed > 0 && completed < 10_000, "completed = {completed}");
        assert_eq!(run.chain.len(), completed + 1);
        for k in 0..run.chain.len() {
            assert_eq!(run.chain.state(k)[0], k as f64);
        }
        assert!(!result.is_complete());
        assert!(result.discard(0).is_err());
    }

    #[test]
    fn discard_checks_burn_in() {
        let target = LogDensity(|_: &[f64]| 0.0);
        let mut mh = MetropolisHastings::new(target, StepUp, Starts::shared(&[0.0], 3)).unwrap();
        let result = mh.run(9);
        assert_eq!(result.to_array3().unwrap().dim(), (3, 10, 1));
        assert_eq!(result.discard(4).unwrap().dim(), (3, 6, 1));
        assert!(result.discard(10).is_err());
    }
}
