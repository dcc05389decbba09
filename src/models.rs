/*!
# Growth Models & Calibration Scenarios

Two toy tumor-growth systems and the scenario layer that turns a flat
calibration parameter vector θ into a validated, named-field model instance.

The [`ForwardModel`] trait is the seam between the samplers/optimizers
(which only see `&[f64]`) and the typed ODE world: a scenario knows the
length and meaning of θ, builds the right-hand side, supplies the initial
state, and extracts the observation noise scale. Invalid vectors (wrong
length, non-finite entries, non-positive scales) are rejected at
instantiation.
*/

use crate::ode::OdeSystem;
use std::error::Error;

/**
Logistic growth, dN/dt = r·N·(1 − N/K).

# Examples

```rust
use ode_calib::models::Logistic;
use ode_calib::ode::OdeSystem;

let sys = Logistic { r: 1.0, k: 10.0 };
let mut dydt = [0.0];
sys.rhs(0.0, &[5.0], &mut dydt);
assert_eq!(dydt[0], 2.5);
```
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Logistic {
    /// Per-capita growth rate.
    pub r: f64,
    /// Carrying capacity.
    pub k: f64,
}

impl OdeSystem for Logistic {
    fn dim(&self) -> usize {
        1
    }

    fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
        let n = y[0];
        dydt[0] = self.r * n * (1.0 - n / self.k);
    }
}

/// Logistic growth under a depleting drug: cells N are killed in
/// proportion to the drug concentration C, and the drug decays
/// exponentially.
///
/// dN/dt = r·N·(1 − N/K) − f·C·N,  dC/dt = −g·C.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogisticTreated {
    /// Per-capita growth rate.
    pub r: f64,
    /// Carrying capacity.
    pub k: f64,
    /// Kill-rate coefficient per unit drug concentration.
    pub f: f64,
    /// Drug decay rate.
    pub g: f64,
}

impl OdeSystem for LogisticTreated {
    fn dim(&self) -> usize {
        2
    }

    fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
        let (n, c) = (y[0], y[1]);
        dydt[0] = self.r * n * (1.0 - n / self.k) - self.f * c * n;
        dydt[1] = -self.g * c;
    }
}

/// A model instance realized from a parameter vector: the right-hand side,
/// the initial state to integrate from, and the observation noise scale.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance<R> {
    pub rhs: R,
    pub y0: Vec<f64>,
    pub sigma: f64,
}

/// Maps a calibration parameter vector onto a concrete ODE system.
///
/// Implementors fix which components of θ mean what; the rest of the crate
/// stays agnostic of the parameterization.
pub trait ForwardModel {
    /// The right-hand side type this scenario instantiates.
    type Rhs: OdeSystem;

    /// Length of the calibration parameter vector.
    fn n_params(&self) -> usize;

    /// Number of observed state compartments.
    fn state_dim(&self) -> usize;

    /// Splits θ into a validated model instance.
    fn instantiate(&self, theta: &[f64]) -> Result<Instance<Self::Rhs>, Box<dyn Error>>;
}

fn check_len(theta: &[f64], expected: usize) -> Result<(), Box<dyn Error>> {
    if theta.len() != expected {
        return Err(format!(
            "Expected a parameter vector of length {expected}, got {}.",
            theta.len()
        )
        .into());
    }
    if !theta.iter().all(|v| v.is_finite()) {
        return Err("Expected all parameters to be finite.".into());
    }
    Ok(())
}

/**
Untreated logistic growth from a known initial population.

θ = [r, K, σ]: growth rate, carrying capacity, and observation noise
standard deviation.

# Examples

```rust
use ode_calib::models::{ForwardModel, LogisticScenario};

let scenario = LogisticScenario { n0: 5.0 };
let instance = scenario.instantiate(&[0.25, 60.0, 3.6]).unwrap();
assert_eq!(instance.y0, vec![5.0]);
assert_eq!(instance.sigma, 3.6);
assert!(scenario.instantiate(&[0.25, 60.0]).is_err());
```
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogisticScenario {
    /// Initial population size.
    pub n0: f64,
}

impl ForwardModel for LogisticScenario {
    type Rhs = Logistic;

    fn n_params(&self) -> usize {
        3
    }

    fn state_dim(&self) -> usize {
        1
    }

    fn instantiate(&self, theta: &[f64]) -> Result<Instance<Logistic>, Box<dyn Error>> {
        check_len(theta, self.n_params())?;
        let (r, k, sigma) = (theta[0], theta[1], theta[2]);
        if k <= 0.0 {
            return Err("Expected a positive carrying capacity.".into());
        }
        if sigma <= 0.0 {
            return Err("Expected a positive noise standard deviation.".into());
        }
        Ok(Instance {
            rhs: Logistic { r, k },
            y0: vec![self.n0],
            sigma,
        })
    }
}

/// Logistic growth under treatment from known initial population and drug
/// concentration.
///
/// θ = [r, K, f, g, σ]. The four dynamical parameters follow the
/// [`LogisticTreated`] system; σ is the shared observation noise scale for
/// both compartments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreatmentScenario {
    /// Initial population size.
    pub n0: f64,
    /// Initial drug concentration.
    pub c0: f64,
}

impl ForwardModel for TreatmentScenario {
    type Rhs = LogisticTreated;

    fn n_params(&self) -> usize {
        5
    }

    fn state_dim(&self) -> usize {
        2
    }

    fn instantiate(&self, theta: &[f64]) -> Result<Instance<LogisticTreated>, Box<dyn Error>> {
        check_len(theta, self.n_params())?;
        let (r, k, f, g, sigma) = (theta[0], theta[1], theta[2], theta[3], theta[4]);
        if k <= 0.0 {
            return Err("Expected a positive carrying capacity.".into());
        }
        if sigma <= 0.0 {
            return Err("Expected a positive noise standard deviation.".into());
        }
        Ok(Instance {
            rhs: LogisticTreated { r, k, f, g },
            y0: vec![self.n0, self.c0],
            sigma,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ode::{solve_grid, IntegratorOpts};

    #[test]
    fn treated_rhs_values() {
        let sys = LogisticTreated {
            r: 0.1,
            k: 100.0,
            f: 0.05,
            g: 0.2,
        };
        let mut dydt = [0.0, 0.0];
        sys.rhs(0.0, &[10.0, 2.0], &mut dydt);
        assert!((dydt[0] - (-0.1)).abs() < 1e-12);
        assert!((dydt[1] - (-0.4)).abs() < 1e-12);
    }

    #[test]
    fn logistic_matches_closed_form() {
        let (r, k, n0) = (0.25, 60.0, 5.0);
        let times: Vec<f64> = (0..50).map(|t| t as f64).collect();
        let traj = solve_grid(
            &Logistic { r, k },
            &[n0],
            &times,
            &IntegratorOpts::default(),
        )
        .unwrap();
        for (i, &t) in times.iter().enumerate() {
            let expected = k / (1.0 + (k - n0) / n0 * (-r * t).exp());
            assert!(
                (traj[[i, 0]] - expected).abs() < 1e-4,
                "at t={t}: got {}, expected {expected}",
                traj[[i, 0]]
            );
        }
    }

    #[test]
    fn logistic_is_monotone_and_saturates() {
        let (r, k, n0) = (0.3, 40.0, 2.0);
        let times: Vec<f64> = (0..200).map(|t| t as f64 * 0.5).collect();
        let traj = solve_grid(
            &Logistic { r, k },
            &[n0],
            &times,
            &IntegratorOpts::default(),
        )
        .unwrap();
        for w in traj.column(0).to_vec().windows(2) {
            assert!(w[1] >= w[0] - 1e-9, "trajectory must be non-decreasing");
        }
        let last = traj[[times.len() - 1, 0]];
        assert!((last - k).abs() < 0.01 * k, "expected saturation near K, got {last}");
    }

    #[test]
    fn treatment_shrinks_the_population() {
        let untreated = LogisticTreated {
            r: 0.25,
            k: 60.0,
            f: 0.0,
            g: 0.1,
        };
        let treated = LogisticTreated { f: 0.3, ..untreated };
        let times: Vec<f64> = (0..30).map(|t| t as f64).collect();
        let y0 = [5.0, 1.0];
        let base = solve_grid(&untreated, &y0, &times, &IntegratorOpts::default()).unwrap();
        let hit = solve_grid(&treated, &y0, &times, &IntegratorOpts::default()).unwrap();
        assert!(hit[[10, 0]] < base[[10, 0]]);
        assert!(hit[[10, 1]] < y0[1], "drug concentration must decay");
    }

    #[test]
    fn instantiate_rejects_bad_vectors() {
        let scenario = LogisticScenario { n0: 5.0 };
        assert!(scenario.instantiate(&[0.2, 50.0, 3.0, 1.0]).is_err());
        assert!(scenario.instantiate(&[0.2, -50.0, 3.0]).is_err());
        assert!(scenario.instantiate(&[0.2, 50.0, 0.0]).is_err());
        assert!(scenario.instantiate(&[f64::NAN, 50.0, 3.0]).is_err());

        let treatment = TreatmentScenario { n0: 5.0, c0: 1.0 };
        assert!(treatment.instantiate(&[0.2, 50.0, 0.1, 0.1, 2.0]).is_ok());
        assert!(treatment.instantiate(&[0.2, 50.0, 0.1, 0.1]).is_err());
    }
}
