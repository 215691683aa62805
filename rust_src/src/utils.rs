//! Shared numeric helpers for the IRT and estimation modules.

pub const LOG_2_PI: f64 = 1.8378770664093453;
pub const EPSILON: f64 = 1e-10;

/// Lower bound of the ability/difficulty scale.
pub const THETA_MIN: f64 = -3.0;
/// Upper bound of the ability/difficulty scale.
pub const THETA_MAX: f64 = 3.0;

/// Standard error reported when there is no information to estimate from.
pub const UNDEFINED_SE: f64 = 999.0;

#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let exp_x = x.exp();
        exp_x / (1.0 + exp_x)
    }
}

#[inline]
pub fn clip(x: f64, min: f64, max: f64) -> f64 {
    x.max(min).min(max)
}

/// Clamp a theta (or difficulty) value onto the reporting scale.
///
/// NaN maps to 0.0 so a corrupt estimate never leaks into selection.
#[inline]
pub fn clamp_theta(theta: f64) -> f64 {
    if theta.is_nan() {
        return 0.0;
    }
    clip(theta, THETA_MIN, THETA_MAX)
}

pub fn logsumexp(arr: &[f64]) -> f64 {
    if arr.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max_val = arr.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    let sum: f64 = arr.iter().map(|x| (x - max_val).exp()).sum();
    max_val + sum.ln()
}

/// Turn unnormalized log posterior values into probabilities summing to 1.
pub fn normalize_log_posterior(log_posterior: &[f64]) -> Vec<f64> {
    let log_norm = logsumexp(log_posterior);
    if !log_norm.is_finite() {
        let n = log_posterior.len().max(1) as f64;
        return vec![1.0 / n; log_posterior.len()];
    }
    log_posterior
        .iter()
        .map(|&lp| (lp - log_norm).exp())
        .collect()
}

/// Posterior mean and posterior standard deviation over a grid of nodes.
pub fn compute_eap_with_se(posterior: &[f64], nodes: &[f64]) -> (f64, f64) {
    let eap: f64 = posterior
        .iter()
        .zip(nodes.iter())
        .map(|(&p, &theta)| p * theta)
        .sum();

    let psd: f64 = posterior
        .iter()
        .zip(nodes.iter())
        .map(|(&p, &theta)| p * (theta - eap).powi(2))
        .sum::<f64>()
        .sqrt();

    (eap, psd)
}

/// Evenly spaced grid from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Log density of a normal distribution.
#[inline]
pub fn log_normal_density(x: f64, mean: f64, sd: f64) -> f64 {
    let z = (x - mean) / sd;
    -0.5 * z * z - sd.ln() - 0.5 * LOG_2_PI
}
