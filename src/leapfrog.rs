//! Leapfrog integration of Hamiltonian dynamics.
//!
//! The integrator is a pure function of its inputs: it simulates the trajectory and
//! returns the terminal position and momentum without making any acceptance decision.
//! Its half-step / full-step / half-step structure makes it time-reversible and
//! volume-preserving, which the HMC acceptance test relies on.

use num_traits::Float;

use crate::distributions::{lit, to_f64};
use crate::error::{McmcError, Result};

/// Checks the integrator parameters before any gradient is evaluated.
pub(crate) fn validate<T: Float>(step_size: T, n_steps: usize, mass: T) -> Result<()> {
    if !(step_size > T::zero() && step_size.is_finite()) {
        return Err(McmcError::Configuration(format!(
            "leapfrog step size must be positive and finite, got {}",
            to_f64(step_size)
        )));
    }
    if n_steps == 0 {
        return Err(McmcError::Configuration(
            "number of leapfrog steps must be at least one".to_string(),
        ));
    }
    if !(mass > T::zero() && mass.is_finite()) {
        return Err(McmcError::Configuration(format!(
            "mass must be positive and finite, got {}",
            to_f64(mass)
        )));
    }
    Ok(())
}

/// Evaluates `grad_u` at `q` and checks its shape and values.
pub(crate) fn checked_gradient<T, G>(grad_u: &mut G, q: &[T]) -> Result<Vec<T>>
where
    T: Float,
    G: FnMut(&[T]) -> Vec<T>,
{
    let grad = grad_u(q);
    if grad.len() != q.len() {
        return Err(McmcError::Configuration(format!(
            "gradient has dimension {}, state has dimension {}",
            grad.len(),
            q.len()
        )));
    }
    if grad.iter().any(|g| !g.is_finite()) {
        return Err(McmcError::NumericEvaluation(format!(
            "gradient of the potential is not finite: {:?}",
            grad.iter().map(|&g| to_f64(g)).collect::<Vec<_>>()
        )));
    }
    Ok(grad)
}

/// `p ← p − scale · ∇U(q)`
fn kick<T: Float>(p: &mut [T], grad: &[T], scale: T) {
    p.iter_mut().zip(grad).for_each(|(p, &g)| *p = *p - scale * g);
}

/**
Simulates `n_steps` leapfrog steps of size `step_size` from `(q0, p0)`.

`grad_u` returns the gradient of the potential `U(q) = -log f(q)`, and `mass` is the
scalar mass of the kinetic energy `K(p) = pᵀp / (2m)`. The update order is

1. `p ← p − (ε/2)·∇U(q)`
2. `n_steps` times: `q ← q + (ε/m)·p`, followed (except after the last position
   update) by `p ← p − ε·∇U(q)`
3. `p ← p − (ε/2)·∇U(q)`

so `∇U` is evaluated `n_steps + 1` times.

# Examples

```rust
use mcmc_engine::leapfrog::leapfrog;

// Harmonic oscillator, U(q) = q²/2.
let (q, p) = leapfrog(&[1.0], &[0.0], |q: &[f64]| q.to_vec(), 0.01, 100, 1.0).unwrap();
// After t = 1 the exact solution is (cos 1, -sin 1).
assert!((q[0] - 1.0_f64.cos()).abs() < 1e-4);
assert!((p[0] + 1.0_f64.sin()).abs() < 1e-4);
```
*/
pub fn leapfrog<T, G>(
    q0: &[T],
    p0: &[T],
    mut grad_u: G,
    step_size: T,
    n_steps: usize,
    mass: T,
) -> Result<(Vec<T>, Vec<T>)>
where
    T: Float,
    G: FnMut(&[T]) -> Vec<T>,
{
    validate(step_size, n_steps, mass)?;
    if q0.len() != p0.len() {
        return Err(McmcError::Configuration(format!(
            "momentum has dimension {}, position has dimension {}",
            p0.len(),
            q0.len()
        )));
    }

    let half_step = step_size * lit::<T>(0.5);
    let drift = step_size / mass;
    let mut q = q0.to_vec();
    let mut p = p0.to_vec();

    let grad = checked_gradient(&mut grad_u, &q)?;
    kick(&mut p, &grad, half_step);

    for i in 0..n_steps {
        q.iter_mut().zip(&p).for_each(|(q, &p)| *q = *q + drift * p);
        let grad = checked_gradient(&mut grad_u, &q)?;
        if i + 1 < n_steps {
            kick(&mut p, &grad, step_size);
        } else {
            kick(&mut p, &grad, half_step);
        }
    }

    Ok((q, p))
}

/// Kinetic energy `K(p) = pᵀp / (2m)`.
pub fn kinetic_energy<T: Float>(momentum: &[T], mass: T) -> T {
    let sq = momentum.iter().fold(T::zero(), |acc, &p| acc + p * p);
    sq / (lit::<T>(2.0) * mass)
}

/// Total energy `H(q, p) = U(q) + K(p)` given the potential `U(q)`.
pub fn hamiltonian<T: Float>(potential: T, momentum: &[T], mass: T) -> T {
    potential + kinetic_energy(momentum, mass)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn grad_standard_normal(q: &[f64]) -> Vec<f64> {
        q.to_vec()
    }

    #[test]
    fn single_step_matches_hand_computation() {
        // U(q) = q²/2, ε = 0.1, m = 2:
        // p½ = 1 - 0.05·0.5 = 0.975; q1 = 0.5 + 0.05·0.975 = 0.54875; p1 = 0.975 - 0.05·0.54875
        let (q, p) = leapfrog(&[0.5], &[1.0], grad_standard_normal, 0.1, 1, 2.0).unwrap();
        assert_abs_diff_eq!(q[0], 0.54875, epsilon = 1e-15);
        assert_abs_diff_eq!(p[0], 0.975 - 0.05 * 0.54875, epsilon = 1e-15);
    }

    #[test]
    fn gradient_evaluated_once_per_step_plus_one() {
        let mut calls = 0;
        let counting = |q: &[f64]| {
            calls += 1;
            q.to_vec()
        };
        leapfrog(&[0.1, 0.2], &[0.3, -0.4], counting, 0.05, 7, 1.0).unwrap();
        assert_eq!(calls, 8);
    }

    #[test]
    fn trajectory_is_reversible() {
        let grad = |q: &[f64]| vec![q[0] * q[0] * q[0] + 0.5 * q[1], 0.5 * q[0] + 2.0 * q[1]];
        let (q0, p0) = (vec![0.7, -1.2], vec![0.4, 0.9]);
        let (q1, p1) = leapfrog(&q0, &p0, grad, 0.05, 40, 1.5).unwrap();
        let flipped: Vec<f64> = p1.iter().map(|p| -p).collect();
        let (q2, p2) = leapfrog(&q1, &flipped, grad, 0.05, 40, 1.5).unwrap();
        for i in 0..2 {
            assert_abs_diff_eq!(q2[i], q0[i], epsilon = 1e-10);
            assert_abs_diff_eq!(-p2[i], p0[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn energy_is_nearly_conserved_for_small_steps() {
        let potential = |q: &[f64]| 0.5 * q.iter().map(|x| x * x).sum::<f64>();
        let (q0, p0) = (vec![1.0, -0.5], vec![0.3, 1.1]);
        let h0 = hamiltonian(potential(&q0), &p0, 1.0);
        let (q1, p1) = leapfrog(&q0, &p0, grad_standard_normal, 0.01, 300, 1.0).unwrap();
        let h1 = hamiltonian(potential(&q1), &p1, 1.0);
        assert!((h1 - h0).abs() < 1e-4, "energy drifted by {}", h1 - h0);
    }

    #[test]
    fn rejects_bad_configuration() {
        let cases = [(0.0, 5, 1.0), (-0.1, 5, 1.0), (0.1, 0, 1.0), (0.1, 5, 0.0), (f64::NAN, 5, 1.0)];
        for (eps, steps, mass) in cases {
            let out = leapfrog(&[0.0], &[1.0], grad_standard_normal, eps, steps, mass);
            assert!(matches!(out, Err(McmcError::Configuration(_))));
        }
        let out = leapfrog(&[0.0, 1.0], &[1.0], grad_standard_normal, 0.1, 5, 1.0);
        assert!(matches!(out, Err(McmcError::Configuration(_))));
    }

    #[test]
    fn rejects_bad_gradients() {
        let short = leapfrog(&[0.0, 1.0], &[1.0, 0.0], |_: &[f64]| vec![0.0], 0.1, 3, 1.0);
        assert!(matches!(short, Err(McmcError::Configuration(_))));

        let blows_up = |q: &[f64]| vec![if q[0] > 0.15 { f64::NAN } else { q[0] }];
        let out = leapfrog(&[0.0], &[1.0], blows_up, 0.1, 5, 1.0);
        assert!(matches!(out, Err(McmcError::NumericEvaluation(_))));
    }

    #[test]
    fn kinetic_energy_scales_with_mass() {
        assert_eq!(kinetic_energy(&[1.0, 2.0], 1.0), 2.5);
        assert_eq!(kinetic_energy(&[1.0, 2.0], 5.0), 0.5);
        assert_eq!(hamiltonian(1.0, &[1.0, 2.0], 5.0), 1.5);
    }
}
