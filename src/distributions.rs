/*!
Target densities, gradient adapters and proposal distributions.

The samplers only ever look at *ratios* of target densities, so targets expose an
unnormalized log-density through [`Target`]. Hamiltonian Monte Carlo additionally needs
the gradient of the potential energy `U(x) = -log f(x)`, exposed through
[`GradientTarget`]. Proposals draw candidates with the random stream owned by the chain
that calls them, which keeps every chain reproducible on its own.

# Examples

```rust
use mcmc_engine::distributions::{Density, Gaussian2D, IsotropicGaussian, Proposal, Target};
use rand::rngs::SmallRng;
use rand::SeedableRng;

// A closure returning a plain density; zero outside the support.
let exponential = Density(|x: &[f64]| if x[0] < 0.0 { 0.0 } else { (-0.5 * x[0]).exp() });
assert_eq!(exponential.unnorm_logp(&[-1.0]), f64::NEG_INFINITY);

let gauss = Gaussian2D::new([0.0_f64, 0.0], [[1.0, 0.0], [0.0, 1.0]]).unwrap();
let lp = gauss.unnorm_logp(&[0.5, -0.5]);
assert!((lp + 0.25).abs() < 1e-12);

let proposal = IsotropicGaussian::new(1.0).unwrap();
let mut rng = SmallRng::seed_from_u64(42);
let candidate = proposal.sample(&[0.0, 0.0], &mut rng);
assert_eq!(candidate.len(), 2);
```
*/

use ndarray::{arr1, arr2, Array1, Array2};
use num_traits::{Float, FloatConst};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::{McmcError, Result};

/// Converts an `f64` literal into the scalar type of the chain.
pub(crate) fn lit<T: Float>(x: f64) -> T {
    T::from(x).unwrap_or_else(T::nan)
}

pub(crate) fn to_f64<T: Float>(x: T) -> f64 {
    x.to_f64().unwrap_or(f64::NAN)
}

pub(crate) fn to_f64_vec<T: Float>(x: &[T]) -> Vec<f64> {
    x.iter().map(|&v| to_f64(v)).collect()
}

/// A continuous target distribution we want to sample from.
pub trait Target<T: Float> {
    /// Log of the unnormalized density at `position`.
    ///
    /// Positions outside the support must return `-inf`, never NaN.
    fn unnorm_logp(&self, position: &[T]) -> T;
}

/// A target that also knows the gradient of its potential energy.
pub trait GradientTarget<T: Float>: Target<T> {
    /// Returns `∇U(position)` where `U = -log f`. Must have the same length as `position`.
    fn grad_potential(&self, position: &[T]) -> Vec<T>;
}

/// A target that can evaluate its fully normalized log-density.
pub trait Normalized<T: Float> {
    fn logp(&self, position: &[T]) -> T;
}

/// A proposal distribution `g(· | current)` for Metropolis–Hastings.
pub trait Proposal<T: Float> {
    /// Draws a candidate from `g(· | current)` using the caller's random stream.
    fn sample<R: Rng>(&self, current: &[T], rng: &mut R) -> Vec<T>;

    /// Evaluates `log g(to | from)`.
    fn logp(&self, from: &[T], to: &[T]) -> T;

    /// Whether `g(a | b) = g(b | a)` for all `a`, `b`. Symmetric proposals skip the
    /// Hastings correction and their [`Proposal::logp`] is never called by the sampler.
    fn is_symmetric(&self) -> bool {
        false
    }
}

/// Validates the log density found at a chain's initial state.
pub(crate) fn check_start<T: Float>(state: &[T], logp: T) -> Result<()> {
    if state.is_empty() {
        return Err(McmcError::Configuration(
            "start state must have at least one coordinate".to_string(),
        ));
    }
    check_logp(logp, "start state")?;
    if logp == T::neg_infinity() {
        return Err(McmcError::InvalidStart {
            state: to_f64_vec(state),
        });
    }
    Ok(())
}

/// Rejects NaN and `+inf` log densities; `-inf` is a legal value (zero density).
pub(crate) fn check_logp<T: Float>(logp: T, at: &str) -> Result<T> {
    if logp.is_nan() || logp == T::infinity() {
        return Err(McmcError::NumericEvaluation(format!(
            "log density at the {at} is {}",
            to_f64(logp)
        )));
    }
    Ok(logp)
}

/// Adapts a closure returning a log-density.
///
/// ```rust
/// use mcmc_engine::distributions::{LogDensity, Target};
///
/// let target = LogDensity(|x: &[f64]| -0.5 * x[0] * x[0]);
/// assert_eq!(target.unnorm_logp(&[2.0]), -2.0);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LogDensity<F>(pub F);

impl<T, F> Target<T> for LogDensity<F>
where
    T: Float,
    F: Fn(&[T]) -> T,
{
    fn unnorm_logp(&self, position: &[T]) -> T {
        (self.0)(position)
    }
}

/// Adapts a closure returning a non-negative (possibly unnormalized) density.
///
/// A density of zero maps to a log-density of `-inf`. Negative values break the
/// contract and are reported as NaN, which the samplers turn into
/// [`McmcError::NumericEvaluation`].
#[derive(Debug, Clone, Copy)]
pub struct Density<F>(pub F);

impl<T, F> Target<T> for Density<F>
where
    T: Float,
    F: Fn(&[T]) -> T,
{
    fn unnorm_logp(&self, position: &[T]) -> T {
        let density = (self.0)(position);
        if density < T::zero() {
            T::nan()
        } else {
            density.ln()
        }
    }
}

/// Pairs a log-density closure with a closure computing `∇(-log f)`.
///
/// ```rust
/// use mcmc_engine::distributions::{GradientTarget, WithGradient};
///
/// let target = WithGradient {
///     logp: |x: &[f64]| -0.5 * x.iter().map(|v| v * v).sum::<f64>(),
///     grad: |x: &[f64]| x.to_vec(),
/// };
/// assert_eq!(target.grad_potential(&[1.0, -2.0]), vec![1.0, -2.0]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct WithGradient<F, G> {
    pub logp: F,
    pub grad: G,
}

impl<T, F, G> Target<T> for WithGradient<F, G>
where
    T: Float,
    F: Fn(&[T]) -> T,
{
    fn unnorm_logp(&self, position: &[T]) -> T {
        (self.logp)(position)
    }
}

impl<T, F, G> GradientTarget<T> for WithGradient<F, G>
where
    T: Float,
    F: Fn(&[T]) -> T,
    G: Fn(&[T]) -> Vec<T>,
{
    fn grad_potential(&self, position: &[T]) -> Vec<T> {
        (self.grad)(position)
    }
}

/**
A 2D Gaussian distribution parameterized by a mean vector and a 2×2 covariance matrix.

# Examples

```rust
use mcmc_engine::distributions::{Gaussian2D, Normalized};

let gauss = Gaussian2D::new([0.0_f64, 0.0], [[1.0, 0.0], [0.0, 1.0]]).unwrap();
let lp = gauss.logp(&[0.5, -0.5]);
assert!((lp + 2.0878770664093453).abs() < 1e-12);
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian2D<T: Float> {
    pub mean: Array1<T>,
    pub cov: Array2<T>,
}

impl<T: Float> Gaussian2D<T> {
    /// Creates the distribution, rejecting covariances that are not symmetric positive definite.
    pub fn new(mean: [T; 2], cov: [[T; 2]; 2]) -> Result<Self> {
        let (a, b, c, d) = (cov[0][0], cov[0][1], cov[1][0], cov[1][1]);
        if b != c || a <= T::zero() || a * d - b * c <= T::zero() {
            return Err(McmcError::Configuration(
                "covariance of Gaussian2D must be symmetric positive definite".to_string(),
            ));
        }
        Ok(Self {
            mean: arr1(&mean),
            cov: arr2(&cov),
        })
    }

    fn det_and_precision(&self) -> (T, [[T; 2]; 2]) {
        let (a, b, c, d) = (
            self.cov[[0, 0]],
            self.cov[[0, 1]],
            self.cov[[1, 0]],
            self.cov[[1, 1]],
        );
        let det = a * d - b * c;
        (det, [[d / det, -b / det], [-c / det, a / det]])
    }

    fn centered(&self, position: &[T]) -> Option<[T; 2]> {
        (position.len() == 2).then(|| [position[0] - self.mean[0], position[1] - self.mean[1]])
    }

    fn mahalanobis(&self, diff: [T; 2]) -> T {
        let (_, p) = self.det_and_precision();
        diff[0] * (p[0][0] * diff[0] + p[0][1] * diff[1])
            + diff[1] * (p[1][0] * diff[0] + p[1][1] * diff[1])
    }
}

impl<T: Float> Target<T> for Gaussian2D<T> {
    fn unnorm_logp(&self, position: &[T]) -> T {
        match self.centered(position) {
            Some(diff) => -lit::<T>(0.5) * self.mahalanobis(diff),
            None => T::nan(),
        }
    }
}

impl<T: Float> GradientTarget<T> for Gaussian2D<T> {
    fn grad_potential(&self, position: &[T]) -> Vec<T> {
        let Some(diff) = self.centered(position) else {
            return vec![T::nan(); position.len()];
        };
        let (_, p) = self.det_and_precision();
        vec![
            p[0][0] * diff[0] + p[0][1] * diff[1],
            p[1][0] * diff[0] + p[1][1] * diff[1],
        ]
    }
}

impl<T: Float + FloatConst> Normalized<T> for Gaussian2D<T> {
    fn logp(&self, position: &[T]) -> T {
        let (det, _) = self.det_and_precision();
        let half = lit::<T>(0.5);
        -(T::TAU()).ln() - half * det.abs().ln() + self.unnorm_logp(position)
    }
}

/**
An isotropic Gaussian `N(0, std² I)` of any dimension.

As a [`Proposal`] it is the symmetric random walk `x' = x + std · z`; as a [`Target`]
it is the centered distribution itself, with gradient `x / std²`.

```rust
use mcmc_engine::distributions::{IsotropicGaussian, Proposal};

let proposal = IsotropicGaussian::new(0.5).unwrap();
assert!(proposal.is_symmetric());
assert!(IsotropicGaussian::new(0.0_f64).is_err());
```
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsotropicGaussian<T: Float> {
    pub std: T,
}

impl<T: Float> IsotropicGaussian<T> {
    pub fn new(std: T) -> Result<Self> {
        if !(std > T::zero() && std.is_finite()) {
            return Err(McmcError::Configuration(format!(
                "proposal standard deviation must be positive and finite, got {}",
                to_f64(std)
            )));
        }
        Ok(Self { std })
    }
}

impl<T> Proposal<T> for IsotropicGaussian<T>
where
    T: Float + FloatConst,
    StandardNormal: Distribution<T>,
{
    fn sample<R: Rng>(&self, current: &[T], rng: &mut R) -> Vec<T> {
        current
            .iter()
            .map(|&x| {
                let z: T = rng.sample(StandardNormal);
                x + self.std * z
            })
            .collect()
    }

    fn logp(&self, from: &[T], to: &[T]) -> T {
        let var = self.std * self.std;
        let two = lit::<T>(2.0);
        let d = lit::<T>(from.len() as f64);
        let sq = from
            .iter()
            .zip(to)
            .fold(T::zero(), |acc, (&f, &t)| acc + (t - f) * (t - f));
        -sq / (two * var) - d * lit::<T>(0.5) * (T::TAU() * var).ln()
    }

    fn is_symmetric(&self) -> bool {
        true
    }
}

impl<T: Float> Target<T> for IsotropicGaussian<T> {
    fn unnorm_logp(&self, position: &[T]) -> T {
        let sum = position.iter().fold(T::zero(), |acc, &x| acc + x * x);
        -lit::<T>(0.5) * sum / (self.std * self.std)
    }
}

impl<T: Float> GradientTarget<T> for IsotropicGaussian<T> {
    fn grad_potential(&self, position: &[T]) -> Vec<T> {
        let var = self.std * self.std;
        position.iter().map(|&x| x / var).collect()
    }
}

/// The one-dimensional exponential distribution with the given rate, supported on `x >= 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exponential<T: Float> {
    pub rate: T,
}

impl<T: Float> Exponential<T> {
    pub fn new(rate: T) -> Result<Self> {
        if !(rate > T::zero() && rate.is_finite()) {
            return Err(McmcError::Configuration(format!(
                "exponential rate must be positive and finite, got {}",
                to_f64(rate)
            )));
        }
        Ok(Self { rate })
    }

    /// Analytic mean `1 / rate`.
    pub fn mean(&self) -> T {
        T::one() / self.rate
    }
}

impl<T: Float> Target<T> for Exponential<T> {
    fn unnorm_logp(&self, position: &[T]) -> T {
        match position {
            [x] if *x < T::zero() => T::neg_infinity(),
            [x] => -self.rate * *x,
            _ => T::nan(),
        }
    }
}

impl<T: Float> Normalized<T> for Exponential<T> {
    fn logp(&self, position: &[T]) -> T {
        self.rate.ln() + self.unnorm_logp(position)
    }
}

/**
Multiplicative random walk on strictly positive states: `x'_i = x_i · exp(scale · z_i)`.

Each coordinate of the candidate is log-normally distributed around the current value,
so the proposal is asymmetric and the sampler applies the Hastings correction
`g(current | proposed) / g(proposed | current) = Π proposed_i / current_i`.
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogNormalWalk<T: Float> {
    pub scale: T,
}

impl<T: Float> LogNormalWalk<T> {
    pub fn new(scale: T) -> Result<Self> {
        if !(scale > T::zero() && scale.is_finite()) {
            return Err(McmcError::Configuration(format!(
                "log-normal walk scale must be positive and finite, got {}",
                to_f64(scale)
            )));
        }
        Ok(Self { scale })
    }
}

impl<T> Proposal<T> for LogNormalWalk<T>
where
    T: Float + FloatConst,
    StandardNormal: Distribution<T>,
{
    fn sample<R: Rng>(&self, current: &[T], rng: &mut R) -> Vec<T> {
        current
            .iter()
            .map(|&x| {
                let z: T = rng.sample(StandardNormal);
                x * (self.scale * z).exp()
            })
            .collect()
    }

    fn logp(&self, from: &[T], to: &[T]) -> T {
        let half = lit::<T>(0.5);
        let log_norm = -self.scale.ln() - half * T::TAU().ln();
        from.iter().zip(to).fold(T::zero(), |acc, (&f, &t)| {
            if f <= T::zero() || t <= T::zero() {
                return T::neg_infinity();
            }
            let z = (t.ln() - f.ln()) / self.scale;
            acc + log_norm - t.ln() - half * z * z
        })
    }
}
