//! Ability estimation from a response history.
//!
//! Two estimators share the same input:
//! - Maximum likelihood via Newton-Raphson (`estimate_ability_mle`)
//! - Expected a posteriori over a fixed 41-point grid (`estimate_ability_eap`)
//!
//! [`EstimationMethod::for_response_count`] decides which one a session uses.

use serde::{Deserialize, Serialize};

use crate::item::Response;
use crate::utils::{
    EPSILON, THETA_MAX, THETA_MIN, UNDEFINED_SE, clamp_theta, compute_eap_with_se, linspace,
    log_normal_density, normalize_log_posterior,
};

/// Number of quadrature nodes used by EAP.
pub const EAP_QUADRATURE_POINTS: usize = 41;

/// Below this many responses the EAP estimator is used.
pub const DEFAULT_EAP_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    Mle,
    Eap,
}

impl EstimationMethod {
    /// EAP while evidence is sparse (fewer than 5 responses), MLE afterwards.
    pub fn for_response_count(n_responses: usize) -> Self {
        Self::for_response_count_with_threshold(n_responses, DEFAULT_EAP_THRESHOLD)
    }

    pub fn for_response_count_with_threshold(n_responses: usize, eap_threshold: usize) -> Self {
        if n_responses < eap_threshold {
            EstimationMethod::Eap
        } else {
            EstimationMethod::Mle
        }
    }
}

/// Point estimate of ability with its uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbilityEstimate {
    pub theta: f64,
    pub standard_error: f64,
    /// Newton-Raphson iterations; `None` for EAP.
    pub iterations: Option<usize>,
    /// MLE convergence flag; `None` for EAP, which always converges.
    pub converged: Option<bool>,
    pub method: EstimationMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MleOptions {
    pub initial_theta: f64,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for MleOptions {
    fn default() -> Self {
        Self {
            initial_theta: 0.0,
            max_iter: 20,
            tol: 0.001,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EapOptions {
    pub prior_mean: f64,
    pub prior_sd: f64,
}

impl Default for EapOptions {
    fn default() -> Self {
        Self {
            prior_mean: 0.0,
            prior_sd: 1.0,
        }
    }
}

/// Settings for the estimator selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSettings {
    pub eap_threshold: usize,
    /// Replace a non-converged MLE result with the EAP estimate.
    pub fallback_to_eap: bool,
    pub mle: MleOptions,
    pub eap: EapOptions,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            eap_threshold: DEFAULT_EAP_THRESHOLD,
            fallback_to_eap: true,
            mle: MleOptions::default(),
            eap: EapOptions::default(),
        }
    }
}

/// First and second derivatives of the summed log-likelihood at `theta`.
fn log_likelihood_derivatives(responses: &[Response], theta: f64) -> (f64, f64) {
    let mut d1 = 0.0;
    let mut d2 = 0.0;

    for response in responses {
        let (p, dp, d2p) = response.params.derivatives(theta);
        let q = 1.0 - p;
        let pq = p * q;
        if pq < EPSILON {
            continue;
        }
        let u = if response.is_correct { 1.0 } else { 0.0 };
        let resid = u - p;

        d1 += resid * dp / pq;
        d2 += (resid * d2p - dp * dp) / pq - resid * dp * dp * (1.0 - 2.0 * p) / (pq * pq);
    }

    (d1, d2)
}

fn total_information(responses: &[Response], theta: f64) -> f64 {
    responses.iter().map(|r| r.params.information(theta)).sum()
}

fn standard_error_from_information(info: f64) -> f64 {
    if info > EPSILON && info.is_finite() {
        1.0 / info.sqrt()
    } else {
        UNDEFINED_SE
    }
}

/// Maximum likelihood ability estimate via Newton-Raphson.
///
/// Stops when the (clamped) update moves theta by less than `tol`, or after
/// `max_iter` iterations with `converged = Some(false)` and the last theta kept.
pub fn estimate_ability_mle(responses: &[Response], options: MleOptions) -> AbilityEstimate {
    let mut theta = clamp_theta(options.initial_theta);

    if responses.is_empty() {
        return AbilityEstimate {
            theta,
            standard_error: UNDEFINED_SE,
            iterations: Some(0),
            converged: Some(false),
            method: EstimationMethod::Mle,
        };
    }

    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..options.max_iter {
        iterations = iter + 1;

        let (d1, mut d2) = log_likelihood_derivatives(responses, theta);
        // 3PL log-likelihood is not concave everywhere; use Fisher scoring there.
        if d2.is_nan() || d2 > -EPSILON {
            d2 = -total_information(responses, theta);
        }
        if d2.abs() < EPSILON || !d1.is_finite() {
            break;
        }

        let next = clamp_theta(theta - d1 / d2);
        let delta = (next - theta).abs();
        theta = next;

        if delta < options.tol {
            converged = true;
            break;
        }
    }

    let standard_error = standard_error_from_information(total_information(responses, theta));

    tracing::debug!(theta, standard_error, iterations, converged, "MLE ability estimate");

    AbilityEstimate {
        theta,
        standard_error,
        iterations: Some(iterations),
        converged: Some(converged),
        method: EstimationMethod::Mle,
    }
}

/// Expected a posteriori ability estimate with a normal prior.
///
/// With no responses this returns exactly `(prior_mean, prior_sd)`.
pub fn estimate_ability_eap(responses: &[Response], options: EapOptions) -> AbilityEstimate {
    let EapOptions {
        prior_mean,
        prior_sd,
    } = options;

    if responses.is_empty() {
        return AbilityEstimate {
            theta: prior_mean,
            standard_error: prior_sd,
            iterations: None,
            converged: None,
            method: EstimationMethod::Eap,
        };
    }

    let prior_sd = if prior_sd.is_finite() && prior_sd > 0.0 {
        prior_sd
    } else {
        tracing::warn!(prior_sd, "invalid prior standard deviation, using 1.0");
        1.0
    };

    let nodes = linspace(THETA_MIN, THETA_MAX, EAP_QUADRATURE_POINTS);

    let log_posterior: Vec<f64> = nodes
        .iter()
        .map(|&theta| {
            let log_prior = log_normal_density(theta, prior_mean, prior_sd);
            let log_like: f64 = responses
                .iter()
                .map(|r| {
                    let p = r.params.probability(theta).clamp(EPSILON, 1.0 - EPSILON);
                    if r.is_correct { p.ln() } else { (1.0 - p).ln() }
                })
                .sum();
            log_prior + log_like
        })
        .collect();

    let posterior = normalize_log_posterior(&log_posterior);
    let (theta, standard_error) = compute_eap_with_se(&posterior, &nodes);

    tracing::debug!(theta, standard_error, n = responses.len(), "EAP ability estimate");

    AbilityEstimate {
        theta: clamp_theta(theta),
        standard_error,
        iterations: None,
        converged: None,
        method: EstimationMethod::Eap,
    }
}

/// Estimate ability with whichever method the response count calls for.
pub fn estimate_ability(responses: &[Response], settings: &EstimatorSettings) -> AbilityEstimate {
    match EstimationMethod::for_response_count_with_threshold(
        responses.len(),
        settings.eap_threshold,
    ) {
        EstimationMethod::Eap => estimate_ability_eap(responses, settings.eap),
        EstimationMethod::Mle => {
            let mle = estimate_ability_mle(responses, settings.mle);
            if mle.converged == Some(false) && settings.fallback_to_eap {
                tracing::warn!(
                    theta = mle.theta,
                    iterations = ?mle.iterations,
                    "MLE did not converge, falling back to EAP"
                );
                return estimate_ability_eap(responses, settings.eap);
            }
            mle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irt::ItemParams;
    use chrono::Utc;
    use std::time::Duration;

    fn response(b: f64, a: f64, c: f64, correct: bool) -> Response {
        Response {
            item_id: format!("item-{b}-{a}-{correct}"),
            is_correct: correct,
            params: ItemParams::new(b, a, c),
            time_taken: Duration::from_secs(10),
            answered_at: Utc::now(),
        }
    }

    fn mixed_responses() -> Vec<Response> {
        vec![
            response(-1.5, 1.2, 0.2, true),
            response(-0.5, 1.0, 0.2, true),
            response(0.0, 1.4, 0.2, true),
            response(0.5, 0.9, 0.2, false),
            response(1.0, 1.1, 0.2, true),
            response(1.5, 1.3, 0.2, false),
            response(2.0, 1.0, 0.2, false),
        ]
    }

    #[test]
    fn method_switches_at_five_responses() {
        assert_eq!(EstimationMethod::for_response_count(0), EstimationMethod::Eap);
        assert_eq!(EstimationMethod::for_response_count(4), EstimationMethod::Eap);
        assert_eq!(EstimationMethod::for_response_count(5), EstimationMethod::Mle);
        assert_eq!(EstimationMethod::for_response_count(30), EstimationMethod::Mle);
    }

    #[test]
    fn all_correct_easy_items_reach_ceiling() {
        let responses: Vec<Response> = (0..10).map(|_| response(-2.0, 1.0, 0.25, true)).collect();
        let est = estimate_ability_mle(&responses, MleOptions::default());
        assert_eq!(est.converged, Some(true));
        assert!(est.iterations.unwrap() <= 20);
        assert!(est.theta > 2.9, "theta = {}", est.theta);
    }

    #[test]
    fn all_incorrect_hard_items_reach_floor() {
        let responses: Vec<Response> = (0..10).map(|_| response(2.0, 1.0, 0.0, false)).collect();
        let est = estimate_ability_mle(&responses, MleOptions::default());
        assert!(est.theta < -2.9, "theta = {}", est.theta);
    }

    #[test]
    fn mle_with_no_responses_is_degenerate() {
        let est = estimate_ability_mle(&[], MleOptions::default());
        assert_eq!(est.theta, 0.0);
        assert_eq!(est.standard_error, UNDEFINED_SE);
        assert_eq!(est.converged, Some(false));
    }

    #[test]
    fn mle_reports_non_convergence_when_out_of_iterations() {
        let options = MleOptions {
            max_iter: 1,
            ..MleOptions::default()
        };
        let est = estimate_ability_mle(&mixed_responses(), options);
        assert_eq!(est.iterations, Some(1));
        assert_eq!(est.converged, Some(false));
        assert!(est.theta != 0.0);
    }

    #[test]
    fn mle_lands_on_score_root() {
        let responses = mixed_responses();
        let est = estimate_ability_mle(&responses, MleOptions::default());
        assert_eq!(est.converged, Some(true));
        let (d1, _) = log_likelihood_derivatives(&responses, est.theta);
        assert!(d1.abs() < 0.01, "score at estimate = {d1}");
        assert!(est.standard_error > 0.0 && est.standard_error < UNDEFINED_SE);
    }

    #[test]
    fn eap_without_responses_returns_prior_exactly() {
        let est = estimate_ability_eap(&[], EapOptions::default());
        assert_eq!(est.theta, 0.0);
        assert_eq!(est.standard_error, 1.0);

        let est = estimate_ability_eap(
            &[],
            EapOptions {
                prior_mean: 0.7,
                prior_sd: 1.3,
            },
        );
        assert_eq!(est.theta, 0.7);
        assert_eq!(est.standard_error, 1.3);
        assert_eq!(est.converged, None);
    }

    #[test]
    fn eap_moves_toward_evidence_and_shrinks_uncertainty() {
        let correct = vec![response(0.0, 1.5, 0.2, true), response(0.5, 1.5, 0.2, true)];
        let est = estimate_ability_eap(&correct, EapOptions::default());
        assert!(est.theta > 0.0);
        assert!(est.standard_error < 1.0);

        let wrong = vec![response(0.0, 1.5, 0.2, false), response(-0.5, 1.5, 0.2, false)];
        let est = estimate_ability_eap(&wrong, EapOptions::default());
        assert!(est.theta < 0.0);
    }

    #[test]
    fn policy_uses_eap_then_mle() {
        let settings = EstimatorSettings::default();
        let responses = mixed_responses();

        let early = estimate_ability(&responses[..3], &settings);
        assert_eq!(early.method, EstimationMethod::Eap);

        let later = estimate_ability(&responses, &settings);
        assert_eq!(later.method, EstimationMethod::Mle);
    }

    #[test]
    fn policy_falls_back_to_eap_on_non_convergence() {
        let settings = EstimatorSettings {
            mle: MleOptions {
                max_iter: 1,
                ..MleOptions::default()
            },
            ..EstimatorSettings::default()
        };
        let est = estimate_ability(&mixed_responses(), &settings);
        assert_eq!(est.method, EstimationMethod::Eap);

        let settings = EstimatorSettings {
            fallback_to_eap: false,
            ..settings
        };
        let est = estimate_ability(&mixed_responses(), &settings);
        assert_eq!(est.method, EstimationMethod::Mle);
        assert_eq!(est.converged, Some(false));
    }
}
