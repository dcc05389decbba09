//! End-to-end calibration of the logistic growth model on synthetic data:
//! maximum-likelihood recovery, likelihood round-trip, and posterior
//! summaries from the ensemble sampler.

use ode_calib::data::synthesize;
use ode_calib::ensemble::EnsembleSampler;
use ode_calib::estimator::{maximum_likelihood, FitOptions};
use ode_calib::models::{Logistic, LogisticScenario};
use ode_calib::ode::IntegratorOpts;
use ode_calib::posterior::{Bounds, Posterior};
use ode_calib::stats::{credible_intervals, flatten_chain, integrated_autocorr_time, rhat_max};

const TRUE_R: f64 = 0.25;
const TRUE_K: f64 = 60.0;
const TRUE_SIGMA: f64 = 3.6;
const N0: f64 = 5.0;
const SEED: u64 = 2021;

fn calibration_problem() -> Posterior<LogisticScenario> {
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
    )
    .unwrap();
    let bounds = Bounds::new(vec![0.01, 20.0, 0.5], vec![1.0, 150.0, 12.0]).unwrap();
    Posterior::new(LogisticScenario { n0: N0 }, data, bounds, opts).unwrap()
}

#[test]
fn maximum_likelihood_recovers_truth_within_15_percent() {
    let posterior = calibration_problem();
    let init = posterior.bounds.midpoint();
    let fit = maximum_likelihood(&posterior, &init, &FitOptions::default()).unwrap();
    assert!(fit.converged, "simplex did not converge: {fit:?}");

    let truth = [TRUE_R, TRUE_K, TRUE_SIGMA];
    for ((got, want), name) in fit.theta.iter().zip(truth).zip(["r", "K", "sigma"]) {
        let rel = (got - want).abs() / want;
        assert!(
            rel < 0.15,
            "{name}: estimate {got} is {:.1}% off the true {want}",
            rel * 100.0
        );
    }
}

#[test]
fn estimate_is_not_worse_than_the_generating_parameters() {
    let posterior = calibration_problem();
    let init = posterior.bounds.midpoint();
    let fit = maximum_likelihood(&posterior, &init, &FitOptions::default()).unwrap();
    let at_truth = posterior.log_likelihood(&[TRUE_R, TRUE_K, TRUE_SIGMA]);
    assert!(
        fit.log_likelihood >= at_truth - 1e-6,
        "optimum {} below the log-likelihood at truth {at_truth}",
        fit.log_likelihood
    );
}

#[test]
fn posterior_summaries_bracket_the_truth() {
    const N_WALKERS: usize = 24;
    const N_STEPS: usize = 1_500;

    let posterior = calibration_problem();
    let bounds = posterior.bounds.clone();
    let mut sampler = EnsembleSampler::new(posterior, bounds, N_WALKERS)
        .unwrap()
        .set_seed(SEED);
    let chain = sampler.run(N_STEPS);

    // Burn-in chosen large relative to the slowest-mixing dimension.
    let tau = integrated_autocorr_time(&chain).unwrap();
    let tau_max = tau.iter().cloned().fold(0.0, f64::max);
    assert!(
        tau_max >= 1.0 && tau_max < N_STEPS as f64 / 10.0,
        "implausible autocorrelation time {tau_max}"
    );
    let burn_in = ((10.0 * tau_max).ceil() as usize).min(N_STEPS / 2);
    let flat = flatten_chain(&chain, burn_in).unwrap();

    let converged = chain.slice(ndarray::s![burn_in.., .., ..]).to_owned();
    assert!(
        rhat_max(&converged).unwrap() < 1.2,
        "walkers disagree after {N_STEPS} steps"
    );

    let truth = [TRUE_R, TRUE_K, TRUE_SIGMA];
    let narrow = credible_intervals(&flat, 16.0, 84.0).unwrap();
    for (ci, want) in narrow.iter().zip(truth) {
        // The median sits inside its own interval by construction, and in a
        // well-specified model it lands near the generating value.
        assert!(ci.brackets(ci.median));
        let rel = (ci.median - want).abs() / want;
        assert!(
            rel < 0.25,
            "posterior median {} far from the true {want}",
            ci.median
        );
    }

    let wide = credible_intervals(&flat, 2.5, 97.5).unwrap();
    let bracketed = wide
        .iter()
        .zip(truth)
        .filter(|(ci, want)| ci.brackets(*want))
        .count();
    assert!(
        bracketed >= 2,
        "only {bracketed} of 3 true parameters inside their 95% interval: {wide:?}"
    );
}
