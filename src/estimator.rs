/*!
# Maximum-Likelihood Point Estimation

Finds the parameter vector maximizing the posterior's log-likelihood under
its box constraints, by minimizing the negative log-posterior with a
Nelder–Mead simplex. The simplex is derivative-free, which suits an
objective built from a numerical ODE solve, and the bounds are enforced by
the +∞ cost the posterior assigns to any out-of-bounds or failed
evaluation — the simplex simply contracts away from infeasible vertices.
*/

use crate::models::ForwardModel;
use crate::posterior::{Posterior, Target};
use argmin::core::{
    CostFunction, Error as ArgminError, Executor, State, TerminationReason, TerminationStatus,
};
use argmin::solver::neldermead::NelderMead;
use std::error::Error;

/// Knobs for the simplex search.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    /// Iteration cap handed to the solver.
    pub max_iters: u64,
    /// Terminate once the sample standard deviation of the simplex's cost
    /// values falls below this.
    pub sd_tolerance: f64,
    /// Initial simplex displacement, as a fraction of each bound width.
    pub step_frac: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iters: 2_000,
            sd_tolerance: 1e-9,
            step_frac: 0.1,
        }
    }
}

/// The outcome of a maximum-likelihood fit.
#[derive(Debug, Clone, PartialEq)]
pub struct MaxLikEstimate {
    /// Best parameter vector found.
    pub theta: Vec<f64>,
    /// Log-likelihood at `theta`.
    pub log_likelihood: f64,
    /// Iterations the solver actually ran.
    pub iterations: u64,
    /// Whether the solver converged (rather than hitting the iteration cap).
    pub converged: bool,
}

struct NegLogPosterior<'a, M: ForwardModel> {
    target: &'a Posterior<M>,
}

impl<M: ForwardModel> CostFunction for NegLogPosterior<'_, M> {
    type Param = Vec<f64>;
    type Output = f64;

    /// Cost is −log-posterior; −∞ log-densities become +∞ costs, which the
    /// simplex treats as infeasible.
    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, ArgminError> {
        Ok(-self.target.log_prob(theta))
    }
}

/**
Maximizes the log-likelihood of `target` starting from `init`.

`init` must lie inside the bounds box; each simplex vertex displaces one
component by `step_frac` of its bound width (flipped inward at the edge of
the box). Returns the best vector, its log-likelihood, and convergence
status; comparing the estimate against known truth is the caller's
business.

# Errors

Fails on a dimension mismatch, an out-of-bounds starting point, or a
solver-level error. Hitting the iteration cap is not an error; it is
reported through [`MaxLikEstimate::converged`].
*/
pub fn maximum_likelihood<M: ForwardModel>(
    target: &Posterior<M>,
    init: &[f64],
    opts: &FitOptions,
) -> Result<MaxLikEstimate, Box<dyn Error>> {
    let dim = target.bounds.dim();
    if init.len() != dim {
        return Err(format!(
            "Expected a starting point of dimension {dim}, got {}.",
            init.len()
        )
        .into());
    }
    if !target.bounds.contains(init) {
        return Err("Expected the starting point to lie inside the bounds box.".into());
    }
    if !(opts.step_frac > 0.0 && opts.step_frac < 1.0) {
        return Err("Expected step_frac in (0, 1).".into());
    }

    let simplex = initial_simplex(target, init, opts.step_frac);
    let solver = NelderMead::new(simplex)
        .with_sd_tolerance(opts.sd_tolerance)
        .map_err(|e| format!("Invalid simplex tolerance: {e}"))?;

    let result = Executor::new(NegLogPosterior { target }, solver)
        .configure(|state| state.max_iters(opts.max_iters))
        .run()
        .map_err(|e| format!("Nelder-Mead failed: {e}"))?;

    let state = result.state();
    let theta = state
        .get_best_param()
        .cloned()
        .ok_or("Expected the solver to report a best parameter.")?;
    let converged = matches!(
        state.get_termination_status(),
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
    );
    Ok(MaxLikEstimate {
        log_likelihood: -state.get_best_cost(),
        iterations: state.get_iter(),
        converged,
        theta,
    })
}

/// `dim + 1` vertices: the starting point plus one per-coordinate
/// displacement, kept inside the box.
fn initial_simplex<M: ForwardModel>(
    target: &Posterior<M>,
    init: &[f64],
    step_frac: f64,
) -> Vec<Vec<f64>> {
    let mut vertices = Vec::with_capacity(init.len() + 1);
    vertices.push(init.to_vec());
    for i in 0..init.len() {
        let mut vertex = init.to_vec();
        let delta = step_frac * target.bounds.width(i);
        vertex[i] = if vertex[i] + delta <= target.bounds.upper()[i] {
            vertex[i] + delta
        } else {
            vertex[i] - delta
        };
        vertices.push(vertex);
    }
    vertices
}
