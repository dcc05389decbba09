//! Chain post-processing: burn-in handling, convergence diagnostics, and
//! posterior summaries.
//!
//! All functions operate on the sample cube produced by
//! [`EnsembleSampler::run`](crate::ensemble::EnsembleSampler::run), shaped
//! (steps, walkers, dims) in (step, walker) order.

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use rustfft::{num_complex::Complex, FftPlanner};
use std::error::Error;

/// Discards the first `burn_in` steps and flattens the remainder to a
/// ((steps − burn_in) · walkers, dims) matrix, preserving (step, walker)
/// order.
pub fn flatten_chain(chain: &Array3<f64>, burn_in: usize) -> Result<Array2<f64>, Box<dyn Error>> {
    let (steps, walkers, dim) = chain.dim();
    if burn_in >= steps {
        return Err(format!(
            "Expected burn-in ({burn_in}) smaller than the chain length ({steps})."
        )
        .into());
    }
    let kept = chain.slice(s![burn_in.., .., ..]).to_owned();
    let rows = (steps - burn_in) * walkers;
    Ok(kept
        .into_shape_with_order((rows, dim))
        .expect("Expected the sample cube to flatten."))
}

/**
Estimates the integrated autocorrelation time per dimension.

The autocovariance of each walker's trace is computed by FFT, normalized,
and averaged across walkers; the running estimate
τ(M) = 1 + 2 Σ_{t=1..M} ρ(t) is then cut off at the smallest window M with
M ≥ 5 τ(M). Burn-in should be chosen large relative to the largest
returned value before summarizing the flattened chain.
*/
pub fn integrated_autocorr_time(chain: &Array3<f64>) -> Result<Array1<f64>, Box<dyn Error>> {
    let (steps, walkers, dim) = chain.dim();
    if steps < 4 {
        return Err("Expected at least 4 steps to estimate autocorrelation.".into());
    }

    let mut planner = FftPlanner::<f64>::new();
    let mut taus = Array1::<f64>::zeros(dim);
    for d in 0..dim {
        let mut acf = vec![0.0; steps];
        for w in 0..walkers {
            let trace = chain.slice(s![.., w, d]).to_vec();
            for (sum, value) in acf.iter_mut().zip(autocorr_1d(&trace, &mut planner)?) {
                *sum += value;
            }
        }
        for value in acf.iter_mut() {
            *value /= walkers as f64;
        }

        let mut cumulative = 0.0;
        let mut running = vec![0.0; steps];
        for (t, &rho) in acf.iter().enumerate() {
            cumulative += rho;
            running[t] = 2.0 * cumulative - 1.0;
        }
        let mut window = steps - 1;
        for (t, &tau) in running.iter().enumerate() {
            if (t as f64) >= 5.0 * tau {
                window = t;
                break;
            }
        }
        taus[d] = running[window];
    }
    Ok(taus)
}

/// Normalized autocorrelation function of a single trace via FFT, with the
/// usual zero-padding to avoid circular wrap-around.
fn autocorr_1d(trace: &[f64], planner: &mut FftPlanner<f64>) -> Result<Vec<f64>, Box<dyn Error>> {
    let n = trace.len();
    let padded = 2 * n.next_power_of_two();
    let mean = trace.iter().sum::<f64>() / n as f64;

    let mut buffer: Vec<Complex<f64>> = Vec::with_capacity(padded);
    buffer.extend(trace.iter().map(|&v| Complex::new(v - mean, 0.0)));
    buffer.resize(padded, Complex::new(0.0, 0.0));

    planner.plan_fft_forward(padded).process(&mut buffer);
    for value in buffer.iter_mut() {
        *value = Complex::new(value.norm_sqr(), 0.0);
    }
    planner.plan_fft_inverse(padded).process(&mut buffer);

    let c0 = buffer[0].re;
    if !(c0.is_finite() && c0 > 0.0) {
        return Err("Expected a trace with nonzero variance.".into());
    }
    Ok((0..n).map(|t| buffer[t].re / c0).collect())
}

/// Potential scale reduction across walkers, per dimension: the ratio of
/// pooled to within-walker variance. Values near 1 indicate the walkers
/// agree on the stationary distribution.
pub fn rhat(chain: &Array3<f64>) -> Result<Array1<f64>, Box<dyn Error>> {
    let (steps, walkers, _) = chain.dim();
    if steps < 2 || walkers < 2 {
        return Err("Expected at least 2 steps and 2 walkers for rhat.".into());
    }
    let means = chain
        .mean_axis(Axis(0))
        .expect("Expected per-walker means to exist.");
    let within = chain
        .var_axis(Axis(0), 1.0)
        .mean_axis(Axis(0))
        .expect("Expected within-walker variances to exist.");
    let between_over_n = means.var_axis(Axis(0), 1.0);

    let n = steps as f64;
    let pooled = within.clone() * ((n - 1.0) / n) + between_over_n;
    Ok((pooled / within).mapv(f64::sqrt))
}

/// The largest [`rhat`] component, a single go/no-go convergence number.
pub fn rhat_max(chain: &Array3<f64>) -> Result<f64, Box<dyn Error>> {
    let all = rhat(chain)?;
    Ok(*all.max()?)
}

/// A percentile-based posterior summary for one dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CredibleInterval {
    pub lower: f64,
    pub median: f64,
    pub upper: f64,
}

impl CredibleInterval {
    pub fn brackets(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/**
Summarizes each column of a flattened chain with the `lo`th, 50th, and
`hi`th percentiles.

# Examples

```rust
use ndarray::arr2;
use ode_calib::stats::credible_intervals;

let flat = arr2(&[[1.0], [2.0], [3.0], [4.0], [5.0]]);
let summary = credible_intervals(&flat, 16.0, 84.0).unwrap();
assert_eq!(summary[0].median, 3.0);
assert!(summary[0].brackets(3.5));
```
*/
pub fn credible_intervals(
    flat: &Array2<f64>,
    lo: f64,
    hi: f64,
) -> Result<Vec<CredibleInterval>, Box<dyn Error>> {
    if !(0.0..=100.0).contains(&lo) || !(0.0..=100.0).contains(&hi) || lo >= hi {
        return Err("Expected percentiles with 0 <= lo < hi <= 100.".into());
    }
    let mut summaries = Vec::with_capacity(flat.ncols());
    for column in flat.columns() {
        let mut values = column.to_vec();
        if values.iter().any(|v| v.is_nan()) {
            return Err("Expected a NaN-free chain.".into());
        }
        values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
        summaries.push(CredibleInterval {
            lower: percentile_of_sorted(&values, lo),
            median: percentile_of_sorted(&values, 50.0),
            upper: percentile_of_sorted(&values, hi),
        });
    }
    Ok(summaries)
}

/// Linearly interpolated percentile of an arbitrary sample.
pub fn percentile(values: &[f64], q: f64) -> Result<f64, Box<dyn Error>> {
    if values.is_empty() {
        return Err("Expected a non-empty sample.".into());
    }
    if !(0.0..=100.0).contains(&q) {
        return Err("Expected a percentile in [0, 100].".into());
    }
    if values.iter().any(|v| v.is_nan()) {
        return Err("Expected a NaN-free sample.".into());
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
    Ok(percentile_of_sorted(&sorted, q))
}

fn percentile_of_sorted(sorted: &[f64], q: f64) -> f64 {
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let below = rank.floor() as usize;
    let above = rank.ceil() as usize;
    if below == above {
        return sorted[below];
    }
    let weight = rank - below as f64;
    sorted[below] * (1.0 - weight) + sorted[above] * weight
}
