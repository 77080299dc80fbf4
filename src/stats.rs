//! Convergence diagnostics computed from the output of several chains.
//!
//! All functions take draws shaped `[chain, draw, dim]`, as produced by
//! [`MultiChainResult::discard`](crate::core::MultiChainResult::discard), with the burn-in
//! already removed.

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use num_traits::Float;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::distributions::to_f64;
use crate::error::{McmcError, Result};

/// Gelman–Rubin quantities for one coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiagnosticSummary {
    /// Mean of the per-chain sample variances, `W`.
    pub within: f64,
    /// `n/(m-1) · Σ (x̄_i - x̄)²`, `B`.
    pub between: f64,
    /// Pooled variance estimate `((n-1)/n)·W + B/n`.
    pub var_hat: f64,
    /// `sqrt(var_hat / W)`; exactly `1.0` when `B = 0`.
    pub rhat: f64,
    /// `m·n·var_hat / B`; `+inf` when `B = 0`.
    pub n_eff: f64,
}

/// Per-coordinate diagnostics of a multi-chain run.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticReport {
    pub summaries: Vec<DiagnosticSummary>,
}

impl DiagnosticReport {
    pub fn rhat(&self) -> Array1<f64> {
        self.summaries.iter().map(|s| s.rhat).collect()
    }

    pub fn n_eff(&self) -> Array1<f64> {
        self.summaries.iter().map(|s| s.n_eff).collect()
    }

    /// Largest R-hat over all coordinates, the usual convergence criterion.
    pub fn max_rhat(&self) -> Result<f64> {
        self.rhat()
            .max()
            .copied()
            .map_err(|e| McmcError::Configuration(format!("no maximum R-hat: {e}")))
    }

    pub fn min_n_eff(&self) -> Result<f64> {
        self.n_eff()
            .min()
            .copied()
            .map_err(|e| McmcError::Configuration(format!("no minimum n_eff: {e}")))
    }
}

/// Converts draws to `f64` and checks that there are enough chains and draws and that
/// every value is finite.
fn prepare<T: Float>(draws: &Array3<T>, min_chains: usize) -> Result<Array3<f64>> {
    let (m, n, dim) = draws.dim();
    if m < min_chains {
        return Err(McmcError::Configuration(format!(
            "diagnostics need at least {min_chains} chains, got {m}"
        )));
    }
    if n < 2 {
        return Err(McmcError::Configuration(format!(
            "diagnostics need at least 2 draws per chain, got {n}"
        )));
    }
    if dim == 0 {
        return Err(McmcError::Configuration(
            "draws have no coordinates".to_string(),
        ));
    }
    let draws = draws.mapv(to_f64);
    if let Some(((c, t, d), x)) = draws.indexed_iter().find(|(_, x)| !x.is_finite()) {
        return Err(McmcError::NumericEvaluation(format!(
            "draw {t} of chain {c} has non-finite coordinate {d}: {x}"
        )));
    }
    Ok(draws)
}

/// Gelman–Rubin for one coordinate, `x` shaped `[chain, draw]`.
fn summarize(x: ArrayView2<f64>, coordinate: usize) -> Result<DiagnosticSummary> {
    let (m, n) = x.dim();
    let (m_f, n_f) = (m as f64, n as f64);

    let means = x
        .mean_axis(Axis(1))
        .ok_or_else(|| McmcError::Configuration("empty chains".to_string()))?;
    let within = x.var_axis(Axis(1), 1.0).sum() / m_f;
    if within == 0.0 {
        return Err(McmcError::DegenerateChain { coordinate });
    }

    let grand_mean = means.sum() / m_f;
    let between = if means.iter().all(|&mu| mu == means[0]) {
        0.0
    } else {
        n_f / (m_f - 1.0) * means.mapv(|mu| (mu - grand_mean).powi(2)).sum()
    };
    let var_hat = (n_f - 1.0) / n_f * within + between / n_f;

    let (rhat, n_eff) = if between == 0.0 {
        (1.0, f64::INFINITY)
    } else {
        ((var_hat / within).sqrt(), m_f * n_f * var_hat / between)
    };
    Ok(DiagnosticSummary {
        within,
        between,
        var_hat,
        rhat,
        n_eff,
    })
}

/**
Computes the Gelman–Rubin potential scale reduction factor and the matching effective
sample size for every coordinate.

`draws` is shaped `[chain, draw, dim]` and must hold at least 2 chains of at least 2
draws. Identical chains (`B = 0`) yield `rhat = 1.0` and `n_eff = +inf`; a coordinate
whose chains all have zero variance (`W = 0`) is reported as
[`McmcError::DegenerateChain`].

# Examples

```rust
use mcmc_engine::stats::gelman_rubin;
use ndarray::Array3;

let chain: Vec<f64> = (0..10).map(|i| (i as f64).sin()).collect();
let draws = Array3::from_shape_fn((3, 10, 1), |(_, t, _)| chain[t]);
let report = gelman_rubin(&draws).unwrap();
assert_eq!(report.summaries[0].rhat, 1.0);
assert!(report.summaries[0].n_eff.is_infinite());
```
*/
pub fn gelman_rubin<T: Float>(draws: &Array3<T>) -> Result<DiagnosticReport> {
    let draws = prepare(draws, 2)?;
    let (m, n, dim) = draws.dim();
    tracing::debug!(n_chains = m, n_draws = n, dim, "computing Gelman-Rubin diagnostics");

    let summaries = draws
        .axis_iter(Axis(2))
        .enumerate()
        .map(|(d, x)| summarize(x, d))
        .collect::<Result<Vec<_>>>()?;
    Ok(DiagnosticReport { summaries })
}

/// Biased autocovariance `γ_t = Σ (x_i - x̄)(x_{i+t} - x̄) / n` for `t = 0..n`, via FFT.
fn autocovariance(x: ArrayView1<f64>, planner: &mut FftPlanner<f64>) -> Vec<f64> {
    let n = x.len();
    let len = 2 * n;
    let mean = x.sum() / n as f64;
    let mut buf: Vec<Complex<f64>> = x
        .iter()
        .map(|&v| Complex::new(v - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)).take(len - n))
        .collect();

    planner.plan_fft_forward(len).process(&mut buf);
    buf.iter_mut().for_each(|c| *c = Complex::new(c.norm_sqr(), 0.0));
    planner.plan_fft_inverse(len).process(&mut buf);

    let scale = (len * n) as f64;
    buf[..n].iter().map(|c| c.re / scale).collect()
}

/// ESS of one coordinate, `x` shaped `[chain, draw]`.
fn ess_coordinate(
    x: ArrayView2<f64>,
    coordinate: usize,
    planner: &mut FftPlanner<f64>,
) -> Result<f64> {
    let (m, n) = x.dim();
    let (m_f, n_f) = (m as f64, n as f64);

    let acov: Vec<Vec<f64>> = x
        .axis_iter(Axis(0))
        .map(|chain| autocovariance(chain, planner))
        .collect();
    let mean_var = acov.iter().map(|a| a[0]).sum::<f64>() / m_f * n_f / (n_f - 1.0);
    let mut var_plus = mean_var * (n_f - 1.0) / n_f;
    if m > 1 {
        let means = x
            .mean_axis(Axis(1))
            .ok_or_else(|| McmcError::Configuration("empty chains".to_string()))?;
        var_plus += means.var(1.0);
    }
    if var_plus == 0.0 {
        return Err(McmcError::DegenerateChain { coordinate });
    }

    let rho: Vec<f64> = (0..n)
        .map(|t| {
            let mean_acov = acov.iter().map(|a| a[t]).sum::<f64>() / m_f;
            1.0 - (mean_var - mean_acov) / var_plus
        })
        .collect();

    // Initial positive sequence of lag pairs, made monotone.
    let mut tau = -1.0_f64;
    let mut previous = f64::INFINITY;
    for pair in rho.chunks_exact(2) {
        let gamma = pair[0] + pair[1];
        if gamma <= 0.0 {
            break;
        }
        let gamma = gamma.min(previous);
        tau += 2.0 * gamma;
        previous = gamma;
    }

    let total = m_f * n_f;
    Ok(total / tau.max(1.0 / total.log10()))
}

/**
Effective sample size of every coordinate, estimated from the autocorrelation of the
chains.

Autocovariances are computed per chain with an FFT, combined across chains with the
between-chain variance, and summed with Geyer's initial monotone sequence estimator.
A single chain is allowed here. Chains with zero variance in a coordinate are reported as
[`McmcError::DegenerateChain`].
*/
pub fn ess_autocorr<T: Float>(draws: &Array3<T>) -> Result<Array1<f64>> {
    let draws = prepare(draws, 1)?;
    let mut planner = FftPlanner::new();
    let ess = draws
        .axis_iter(Axis(2))
        .enumerate()
        .map(|(d, x)| ess_coordinate(x, d, &mut planner))
        .collect::<Result<Vec<_>>>()?;
    Ok(Array1::from(ess))
}
