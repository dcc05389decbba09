//! End-to-end calibration demo: synthesize noisy logistic-growth data,
//! recover the generating parameters by maximum likelihood, then sample the
//! posterior and report credible intervals.

use ode_calib::data::synthesize;
use ode_calib::ensemble::EnsembleSampler;
use ode_calib::estimator::{maximum_likelihood, FitOptions};
use ode_calib::models::{Logistic, LogisticScenario};
use ode_calib::ode::IntegratorOpts;
use ode_calib::posterior::{Bounds, Posterior};
use ode_calib::stats::{credible_intervals, flatten_chain, integrated_autocorr_time, rhat_max};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    const TRUE_R: f64 = 0.25;
    const TRUE_K: f64 = 60.0;
    const TRUE_SIGMA: f64 = 3.6;
    const N0: f64 = 5.0;
    const SEED: u64 = 2021;
    const N_WALKERS: usize = 32;
    const N_STEPS: usize = 2_000;

    let truth = [TRUE_R, TRUE_K, TRUE_SIGMA];
    let names = ["r", "K", "sigma"];

    let opts = IntegratorOpts::default();
    let times: Vec<f64> = (0..50).map(|t| t as f64).collect();
    let data = synthesize(
        &Logistic {
            r: TRUE_R,
            k: TRUE_K,
        },
        &[N0],
        &times,
        &[TRUE_SIGMA],
        SEED,
        &opts,
    )?;
    println!("Synthesized {} noisy observations", data.n_times());

    let bounds = Bounds::new(vec![0.01, 20.0, 0.5], vec![1.0, 150.0, 12.0])?;
    let posterior = Posterior::new(LogisticScenario { n0: N0 }, data, bounds, opts)?;

    let fit = maximum_likelihood(&posterior, &posterior.bounds.midpoint(), &FitOptions::default())?;
    println!(
        "Maximum likelihood after {} iterations (converged: {}):",
        fit.iterations, fit.converged
    );
    for ((name, got), want) in names.iter().zip(&fit.theta).zip(truth) {
        println!(
            "  {name:>5}: {got:8.4}  (true {want}, error {:.1}%)",
            (got - want).abs() / want * 100.0
        );
    }

    let bounds = posterior.bounds.clone();
    let mut sampler = EnsembleSampler::new(posterior, bounds, N_WALKERS)?.set_seed(SEED);
    let chain = sampler.run_progress(N_STEPS);
    println!("Mean acceptance rate: {:.2}", sampler.acceptance_rate());

    let tau = integrated_autocorr_time(&chain)?;
    let tau_max = tau.iter().cloned().fold(0.0, f64::max);
    let burn_in = ((10.0 * tau_max).ceil() as usize).min(N_STEPS / 2);
    println!("Integrated autocorrelation times {tau}; discarding {burn_in} steps as burn-in");
    let converged = chain.slice(ndarray::s![burn_in.., .., ..]).to_owned();
    println!("Max potential scale reduction: {:.3}", rhat_max(&converged)?);

    let flat = flatten_chain(&chain, burn_in)?;
    println!("Posterior medians with 16-84% credible intervals:");
    for ((name, ci), want) in names
        .iter()
        .zip(credible_intervals(&flat, 16.0, 84.0)?)
        .zip(truth)
    {
        println!(
            "  {name:>5}: {:8.4}  [{:8.4}, {:8.4}]  (true {want})",
            ci.median, ci.lower, ci.upper
        );
    }
    Ok(())
}
