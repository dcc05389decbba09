/*!
# Adaptive ODE Integration

This module provides the forward-model primitive used everywhere else in the
crate: given a right-hand side `dy/dt = f(t, y)` implementing [`OdeSystem`],
an initial state, and a non-decreasing time grid, [`solve_grid`] returns the
trajectory at every grid point as an `Array2<f64>` (rows = time points,
columns = compartments).

Integration uses the Dormand–Prince 4(5) explicit pair with FSAL and
per-component error control. Accuracy is governed by [`IntegratorOpts`]; the
defaults keep integration error far below the observation-noise scales used
in calibration.

A system that diverges (non-finite state) or exhausts the step budget is
reported as an `Err`, never a panic, so likelihood code can map the failed
evaluation to an infeasible point.
*/

use ndarray::{aview1, Array2};
use std::error::Error;

/// Right-hand side of an ODE system `dy/dt = f(t, y)`.
///
/// Implementors hold their own parameters as named fields; the integrator
/// only sees the state dimension and the derivative evaluation.
pub trait OdeSystem {
    /// Number of state compartments.
    fn dim(&self) -> usize;

    /// Evaluates `f(t, y)` and writes the derivative into `dydt`.
    ///
    /// Both slices have length `dim()`.
    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]);
}

/**
Configuration for the adaptive integrator.

# Examples

```rust
use ode_calib::ode::IntegratorOpts;

let opts = IntegratorOpts::default();
assert!(opts.rtol > 0.0 && opts.atol > 0.0);
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct IntegratorOpts {
    /// Relative tolerance per component.
    pub rtol: f64,
    /// Absolute tolerance per component.
    pub atol: f64,
    /// Initial step size.
    pub h_init: f64,
    /// Smallest step the controller may take before giving up.
    pub h_min: f64,
    /// Total accepted/rejected step budget across the whole grid.
    pub max_steps: usize,
}

impl Default for IntegratorOpts {
    fn default() -> Self {
        Self {
            rtol: 1e-6,
            atol: 1e-9,
            h_init: 1e-2,
            h_min: 1e-12,
            max_steps: 100_000,
        }
    }
}

impl IntegratorOpts {
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        if !(self.rtol.is_finite() && self.rtol > 0.0) {
            return Err("Expected rtol to be finite and positive.".into());
        }
        if !(self.atol.is_finite() && self.atol > 0.0) {
            return Err("Expected atol to be finite and positive.".into());
        }
        if !(self.h_init.is_finite() && self.h_init > 0.0 && self.h_min > 0.0) {
            return Err("Expected initial and minimum step sizes to be positive.".into());
        }
        if self.max_steps == 0 {
            return Err("Expected a nonzero step budget.".into());
        }
        Ok(())
    }
}

// Dormand–Prince 4(5) tableau.
const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

// 5th-order weights; the solution advances on these (local extrapolation).
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// Difference against the embedded 4th-order weights, for the error estimate.
const E1: f64 = B1 - 5179.0 / 57600.0;
const E3: f64 = B3 - 7571.0 / 16695.0;
const E4: f64 = B4 - 393.0 / 640.0;
const E5: f64 = B5 - (-92097.0 / 339200.0);
const E6: f64 = B6 - 187.0 / 2100.0;
const E7: f64 = -1.0 / 40.0;

/**
Integrates `system` from `y0` across `times` and returns the trajectory.

The first row of the result is `y0` itself (the grid's first point is the
initial time); each subsequent row is the state at the corresponding grid
point. The grid must be non-empty, finite, and non-decreasing.

# Arguments

* `system` - The right-hand side to integrate.
* `y0` - Initial state; length must equal `system.dim()`.
* `times` - Non-decreasing evaluation grid.
* `opts` - Integrator tolerances and step budget.

# Examples

```rust
use ode_calib::ode::{solve_grid, IntegratorOpts, OdeSystem};

struct Decay;
impl OdeSystem for Decay {
    fn dim(&self) -> usize { 1 }
    fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) { dydt[0] = -y[0]; }
}

let traj = solve_grid(&Decay, &[1.0], &[0.0, 1.0], &IntegratorOpts::default()).unwrap();
assert!((traj[[1, 0]] - (-1.0f64).exp()).abs() < 1e-6);
```
*/
pub fn solve_grid<S: OdeSystem>(
    system: &S,
    y0: &[f64],
    times: &[f64],
    opts: &IntegratorOpts,
) -> Result<Array2<f64>, Box<dyn Error>> {
    opts.validate()?;
    let dim = system.dim();
    if y0.len() != dim {
        return Err(format!(
            "Expected initial state of length {dim}, got {}.",
            y0.len()
        )
        .into());
    }
    if times.is_empty() {
        return Err("Expected a non-empty time grid.".into());
    }
    if !times.iter().all(|t| t.is_finite()) || !y0.iter().all(|v| v.is_finite()) {
        return Err("Expected finite time grid and initial state.".into());
    }
    if times.windows(2).any(|w| w[1] < w[0]) {
        return Err("Expected a non-decreasing time grid.".into());
    }

    let mut traj = Array2::<f64>::zeros((times.len(), dim));
    let mut y = y0.to_vec();
    traj.row_mut(0).assign(&aview1(&y));

    let mut h = opts.h_init;
    let mut budget = opts.max_steps;
    for (row, pair) in times.windows(2).enumerate() {
        advance(system, &mut y, pair[0], pair[1], &mut h, opts, &mut budget)?;
        traj.row_mut(row + 1).assign(&aview1(&y));
    }
    Ok(traj)
}

/// Advances `y` from `t0` to `t1`, reusing and updating the step size `h`
/// and drawing accepted and rejected attempts from the shared `budget`.
fn advance<S: OdeSystem>(
    system: &S,
    y: &mut [f64],
    t0: f64,
    t1: f64,
    h: &mut f64,
    opts: &IntegratorOpts,
    budget: &mut usize,
) -> Result<(), Box<dyn Error>> {
    if t1 == t0 {
        return Ok(());
    }
    let dim = y.len();
    let mut t = t0;

    let mut k1 = vec![0.0; dim];
    let mut k2 = vec![0.0; dim];
    let mut k3 = vec![0.0; dim];
    let mut k4 = vec![0.0; dim];
    let mut k5 = vec![0.0; dim];
    let mut k6 = vec![0.0; dim];
    let mut k7 = vec![0.0; dim];
    let mut stage = vec![0.0; dim];
    let mut y_next = vec![0.0; dim];

    system.rhs(t, y, &mut k1);

    while t < t1 {
        if *budget == 0 {
            return Err(format!(
                "Integration exceeded the step budget at t = {t:.6e} (system may be stiff or diverging)."
            )
            .into());
        }
        *budget -= 1;

        let step = h.min(t1 - t).max(opts.h_min);

        for i in 0..dim {
            stage[i] = y[i] + step * A21 * k1[i];
        }
        system.rhs(t + step / 5.0, &stage, &mut k2);

        for i in 0..dim {
            stage[i] = y[i] + step * (A31 * k1[i] + A32 * k2[i]);
        }
        system.rhs(t + 0.3 * step, &stage, &mut k3);

        for i in 0..dim {
            stage[i] = y[i] + step * (A41 * k1[i] + A42 * k2[i] + A43 * k3[i]);
        }
        system.rhs(t + 0.8 * step, &stage, &mut k4);

        for i in 0..dim {
            stage[i] = y[i] + step * (A51 * k1[i] + A52 * k2[i] + A53 * k3[i] + A54 * k4[i]);
        }
        system.rhs(t + 8.0 / 9.0 * step, &stage, &mut k5);

        for i in 0..dim {
            stage[i] = y[i]
                + step * (A61 * k1[i] + A62 * k2[i] + A63 * k3[i] + A64 * k4[i] + A65 * k5[i]);
        }
        system.rhs(t + step, &stage, &mut k6);

        for i in 0..dim {
            y_next[i] =
                y[i] + step * (B1 * k1[i] + B3 * k3[i] + B4 * k4[i] + B5 * k5[i] + B6 * k6[i]);
        }

        if !y_next.iter().all(|v| v.is_finite()) {
            return Err(format!("Trajectory diverged near t = {t:.6e}.").into());
        }

        // FSAL stage, reused as k1 on acceptance.
        system.rhs(t + step, &y_next, &mut k7);

        let mut err = 0.0;
        for i in 0..dim {
            let e = step
                * (E1 * k1[i] + E3 * k3[i] + E4 * k4[i] + E5 * k5[i] + E6 * k6[i] + E7 * k7[i]);
            let scale = opts.atol + opts.rtol * y[i].abs().max(y_next[i].abs());
            err += (e / scale) * (e / scale);
        }
        err = (err / dim as f64).sqrt();

        if err <= 1.0 || step <= opts.h_min {
            if err > 1.0 {
                return Err(format!(
                    "Step size underflow at t = {t:.6e}; cannot meet tolerances."
                )
                .into());
            }
            t += step;
            y.copy_from_slice(&y_next);
            k1.copy_from_slice(&k7);
        }

        let factor = if err == 0.0 {
            5.0
        } else {
            (0.9 * err.powf(-0.2)).clamp(0.2, 5.0)
        };
        *h = (step * factor).max(opts.h_min);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ExpDecay {
        rate: f64,
    }

    impl OdeSystem for ExpDecay {
        fn dim(&self) -> usize {
            1
        }
        fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
            dydt[0] = -self.rate * y[0];
        }
    }

    /// dy/dt = y^2 blows up at t = 1/y0; integrating past the pole must fail
    /// cleanly instead of panicking.
    struct Blowup;

    impl OdeSystem for Blowup {
        fn dim(&self) -> usize {
            1
        }
        fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
            dydt[0] = y[0] * y[0];
        }
    }

    struct Coupled;

    impl OdeSystem for Coupled {
        fn dim(&self) -> usize {
            2
        }
        fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
            dydt[0] = -y[0] + y[1];
            dydt[1] = -y[1];
        }
    }

    #[test]
    fn exp_decay_matches_closed_form() {
        let times: Vec<f64> = (0..11).map(|i| i as f64 * 0.5).collect();
        let traj = solve_grid(&ExpDecay { rate: 1.3 }, &[2.0], &times, &IntegratorOpts::default())
            .unwrap();
        for (i, &t) in times.iter().enumerate() {
            let expected = 2.0 * (-1.3 * t).exp();
            assert!(
                (traj[[i, 0]] - expected).abs() < 1e-6,
                "at t={t}: got {}, expected {expected}",
                traj[[i, 0]]
            );
        }
    }

    #[test]
    fn first_row_is_initial_state() {
        let traj = solve_grid(
            &Coupled,
            &[1.0, 0.5],
            &[0.0, 1.0, 2.0],
            &IntegratorOpts::default(),
        )
        .unwrap();
        assert_eq!(traj[[0, 0]], 1.0);
        assert_eq!(traj[[0, 1]], 0.5);
        assert_eq!(traj.shape(), &[3, 2]);
    }

    #[test]
    fn blowup_is_an_error_not_a_panic() {
        let result = solve_grid(&Blowup, &[1.0], &[0.0, 2.0], &IntegratorOpts::default());
        assert!(result.is_err());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let result = solve_grid(
            &ExpDecay { rate: 1.0 },
            &[1.0, 2.0],
            &[0.0, 1.0],
            &IntegratorOpts::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn decreasing_grid_is_rejected() {
        let result = solve_grid(
            &ExpDecay { rate: 1.0 },
            &[1.0],
            &[0.0, 2.0, 1.0],
            &IntegratorOpts::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn repeated_grid_points_duplicate_the_state() {
        let traj = solve_grid(
            &ExpDecay { rate: 1.0 },
            &[1.0],
            &[0.0, 1.0, 1.0],
            &IntegratorOpts::default(),
        )
        .unwrap();
        assert_eq!(traj[[1, 0]], traj[[2, 0]]);
    }
}
