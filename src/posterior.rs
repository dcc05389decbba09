/*!
# Priors, Likelihood, and the Posterior Density

Everything the optimizer and the ensemble sampler need to score a candidate
parameter vector:

- [`Bounds`]: a finite box with a uniform prior — log-prior 0 inside, −∞
  outside (hard rejection, no smooth penalty).
- [`Target`]: the unnormalized log-density trait the samplers consume,
  generic over float precision.
- [`Posterior`]: bounds + dataset + forward model. The log-likelihood
  assumes i.i.d. Gaussian residuals over every compartment and time point;
  any forward-model failure (invalid θ, diverging integration, non-finite
  result) is mapped to −∞ so optimization and sampling treat the point as
  infeasible rather than erroring out mid-run.

Dimension agreement between θ, the bounds box, the scenario, and the
dataset is checked once at [`Posterior::new`]; a mismatch there is fatal,
not recoverable.
*/

use crate::data::Dataset;
use crate::models::ForwardModel;
use crate::ode::{solve_grid, IntegratorOpts};
use num_traits::Float;
use rand::distributions::uniform::SampleUniform;
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use std::error::Error;

/// A distribution we can evaluate up to a normalizing constant.
pub trait Target<T: Float> {
    /// Returns the unnormalized log-density at `theta`.
    fn log_prob(&self, theta: &[T]) -> T;
}

/**
A per-component box constraint doubling as an independent uniform prior.

# Examples

```rust
use ode_calib::posterior::Bounds;

let bounds = Bounds::new(vec![0.0, 10.0], vec![1.0, 200.0]).unwrap();
assert_eq!(bounds.dim(), 2);
assert!(bounds.contains(&[0.5, 60.0]));
assert_eq!(bounds.log_prior(&[0.5, 60.0]), 0.0);
assert_eq!(bounds.log_prior(&[2.0, 60.0]), f64::NEG_INFINITY);
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds<T> {
    lower: Vec<T>,
    upper: Vec<T>,
}

impl<T: Float> Bounds<T> {
    /// Builds a box from per-component lower and upper limits.
    ///
    /// Both vectors must have the same nonzero length, every limit must be
    /// finite, and each lower limit must lie strictly below its upper one.
    pub fn new(lower: Vec<T>, upper: Vec<T>) -> Result<Self, Box<dyn Error>> {
        if lower.is_empty() || lower.len() != upper.len() {
            return Err(format!(
                "Expected matching, non-empty bound vectors (got {} and {}).",
                lower.len(),
                upper.len()
            )
            .into());
        }
        for (lo, hi) in lower.iter().zip(&upper) {
            if !(lo.is_finite() && hi.is_finite()) {
                return Err("Expected finite bounds.".into());
            }
            if *lo >= *hi {
                return Err("Expected every lower bound to lie below its upper bound.".into());
            }
        }
        Ok(Self { lower, upper })
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &[T] {
        &self.lower
    }

    pub fn upper(&self) -> &[T] {
        &self.upper
    }

    /// Whether `theta` has the right dimension and lies inside the box.
    pub fn contains(&self, theta: &[T]) -> bool {
        theta.len() == self.dim()
            && theta
                .iter()
                .zip(self.lower.iter().zip(&self.upper))
                .all(|(x, (lo, hi))| *x >= *lo && *x <= *hi)
    }

    /// Log-density of the uniform prior: 0 inside the box, −∞ outside.
    pub fn log_prior(&self, theta: &[T]) -> T {
        if self.contains(theta) {
            T::zero()
        } else {
            T::neg_infinity()
        }
    }

    /// Width of component `i`.
    pub fn width(&self, i: usize) -> T {
        self.upper[i] - self.lower[i]
    }

    /// Center of the box, a reasonable default starting point.
    pub fn midpoint(&self) -> Vec<T> {
        let half = T::from(0.5).unwrap();
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| (*lo + *hi) * half)
            .collect()
    }
}

impl<T: Float + SampleUniform> Bounds<T> {
    /// Draws a point uniformly inside the box.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Vec<T> {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| Uniform::new_inclusive(*lo, *hi).sample(rng))
            .collect()
    }
}

/**
The posterior density of a calibration problem.

Combines a uniform prior over [`Bounds`] with a Gaussian log-likelihood
of the dataset under the scenario's forward model:

log L(θ) = −½ Σ [ln 2π + ln σ² + (D − Y(θ))² / σ²]

summed over every compartment and time point, with σ supplied by the
instantiated scenario (typically a calibrated component of θ).

# Examples

```rust
use ode_calib::data::synthesize;
use ode_calib::models::{Logistic, LogisticScenario};
use ode_calib::ode::IntegratorOpts;
use ode_calib::posterior::{Bounds, Posterior, Target};

let opts = IntegratorOpts::default();
let times: Vec<f64> = (0..50).map(|t| t as f64).collect();
let data = synthesize(&Logistic { r: 0.25, k: 60.0 }, &[5.0], &times, &[3.6], 2021, &opts).unwrap();

let bounds = Bounds::new(vec![0.01, 20.0, 0.5], vec![1.0, 150.0, 12.0]).unwrap();
let posterior = Posterior::new(LogisticScenario { n0: 5.0 }, data, bounds, opts).unwrap();

assert!(posterior.log_prob(&[0.25, 60.0, 3.6]).is_finite());
assert_eq!(posterior.log_prob(&[5.0, 60.0, 3.6]), f64::NEG_INFINITY);
```
*/
#[derive(Debug, Clone)]
pub struct Posterior<M: ForwardModel> {
    pub model: M,
    pub data: Dataset,
    pub bounds: Bounds<f64>,
    pub opts: IntegratorOpts,
}

impl<M: ForwardModel> Posterior<M> {
    /// Bundles the pieces of a calibration problem, verifying once that
    /// their dimensions agree.
    pub fn new(
        model: M,
        data: Dataset,
        bounds: Bounds<f64>,
        opts: IntegratorOpts,
    ) -> Result<Self, Box<dyn Error>> {
        if bounds.dim() != model.n_params() {
            return Err(format!(
                "Expected bounds of dimension {}, got {}.",
                model.n_params(),
                bounds.dim()
            )
            .into());
        }
        if data.n_compartments() != model.state_dim() {
            return Err(format!(
                "Expected {} observed compartments, got {}.",
                model.state_dim(),
                data.n_compartments()
            )
            .into());
        }
        Ok(Self {
            model,
            data,
            bounds,
            opts,
        })
    }

    /// Gaussian log-likelihood of the data at `theta`; −∞ for any candidate
    /// the forward model cannot evaluate to a finite trajectory.
    pub fn log_likelihood(&self, theta: &[f64]) -> f64 {
        let instance = match self.model.instantiate(theta) {
            Ok(instance) => instance,
            Err(_) => return f64::NEG_INFINITY,
        };
        let times = self
            .data
            .times
            .as_slice()
            .expect("Expected a contiguous time grid.");
        let predicted = match solve_grid(&instance.rhs, &instance.y0, times, &self.opts) {
            Ok(predicted) => predicted,
            Err(_) => return f64::NEG_INFINITY,
        };

        let var = instance.sigma * instance.sigma;
        let ln_norm = (2.0 * std::f64::consts::PI).ln() + var.ln();
        let mut log_lik = 0.0;
        for (observed, modeled) in self.data.observations.iter().zip(predicted.iter()) {
            let residual = observed - modeled;
            log_lik -= 0.5 * (ln_norm + residual * residual / var);
        }
        if log_lik.is_nan() {
            f64::NEG_INFINITY
        } else {
            log_lik
        }
    }
}

impl<M: ForwardModel> Target<f64> for Posterior<M> {
    /// Log-posterior up to a constant. Short-circuits on a −∞ prior so no
    /// forward-model evaluation is spent on out-of-bounds candidates.
    fn log_prob(&self, theta: &[f64]) -> f64 {
        let log_prior = self.bounds.log_prior(theta);
        if log_prior == f64::NEG_INFINITY {
            return f64::NEG_INFINITY;
        }
        log_prior + self.log_likelihood(theta)
    }
}
