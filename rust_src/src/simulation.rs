//! Monte Carlo simulation of adaptive test sessions.
//!
//! Simulated examinees with a known true theta answer items with the 3PL
//! probability; sessions run through the regular controller so selection,
//! estimation and stopping rules are exercised exactly as in production.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use ndarray::Array1;
use rand::prelude::*;
use rand_pcg::Pcg64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::TestConfig;
use crate::error::Result;
use crate::item::Item;
use crate::session::{TerminationReason, initialize_test_at, next_question, record_outcome};

/// Nominal time spent on each simulated item.
const SIMULATED_ITEM_TIME: Duration = Duration::from_secs(30);

/// Result of one simulated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedSession {
    pub true_theta: f64,
    pub theta: f64,
    pub standard_error: f64,
    pub administered: Vec<String>,
    pub responses: Vec<bool>,
    /// `None` when the pool ran out before a stopping rule fired.
    pub termination_reason: Option<TerminationReason>,
}

/// Run one session for an examinee with ability `true_theta`.
pub fn simulate_session<R: Rng + ?Sized>(
    true_theta: f64,
    pool: &[Item],
    config: &TestConfig,
    rng: &mut R,
) -> Result<SimulatedSession> {
    let started_at = Utc::now();
    let mut state = initialize_test_at(config.clone(), started_at)?;
    let mut administered = Vec::with_capacity(config.max_questions);
    let mut responses = Vec::with_capacity(config.max_questions);

    while !state.is_complete() {
        let Some(item) = next_question(&state, pool, rng) else {
            break;
        };

        let p = item.params.probability(true_theta);
        let correct = rng.random::<f64>() < p;

        let elapsed = SIMULATED_ITEM_TIME * (state.questions_answered as u32 + 1);
        let answered_at = started_at + TimeDelta::from_std(elapsed).unwrap_or(TimeDelta::zero());
        state = record_outcome(&state, item, correct, SIMULATED_ITEM_TIME, answered_at)?;

        administered.push(item.id.clone());
        responses.push(correct);
    }

    Ok(SimulatedSession {
        true_theta,
        theta: state.theta,
        standard_error: state.standard_error,
        administered,
        responses,
        termination_reason: state.termination_reason,
    })
}

fn task_seed(seed: u64, theta_idx: usize, stride: u64, rep: usize) -> u64 {
    seed.wrapping_add(theta_idx as u64 * stride)
        .wrapping_add(rep as u64)
}

/// Flattened results of a batch run, one entry per (theta, replication).
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationBatch {
    pub theta_est: Array1<f64>,
    pub se_est: Array1<f64>,
    pub n_items: Array1<usize>,
    pub true_theta: Array1<f64>,
}

/// Simulate `n_replications` sessions for every true theta in parallel.
///
/// Each task gets its own `Pcg64` seeded from `seed`, so results are
/// reproducible regardless of scheduling.
pub fn simulate_batch(
    true_thetas: &[f64],
    pool: &[Item],
    config: &TestConfig,
    n_replications: usize,
    seed: u64,
) -> Result<SimulationBatch> {
    config.validate()?;

    let tasks: Vec<(usize, usize)> = (0..true_thetas.len())
        .flat_map(|t| (0..n_replications).map(move |r| (t, r)))
        .collect();

    let results: Vec<SimulatedSession> = tasks
        .par_iter()
        .map(|&(theta_idx, rep)| {
            let mut rng = Pcg64::seed_from_u64(task_seed(seed, theta_idx, 1000, rep));
            simulate_session(true_thetas[theta_idx], pool, config, &mut rng)
        })
        .collect::<Result<_>>()?;

    let n_total = results.len();
    let mut theta_est = Array1::zeros(n_total);
    let mut se_est = Array1::zeros(n_total);
    let mut n_items = Array1::zeros(n_total);
    let mut true_theta = Array1::zeros(n_total);

    for (i, session) in results.into_iter().enumerate() {
        theta_est[i] = session.theta;
        se_est[i] = session.standard_error;
        n_items[i] = session.administered.len();
        true_theta[i] = session.true_theta;
    }

    Ok(SimulationBatch {
        theta_est,
        se_est,
        n_items,
        true_theta,
    })
}

/// Bias, MSE and average test length at each evaluation theta.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalAccuracy {
    pub theta: Array1<f64>,
    pub bias: Array1<f64>,
    pub mse: Array1<f64>,
    pub avg_items: Array1<f64>,
}

pub fn conditional_mse(
    eval_thetas: &[f64],
    pool: &[Item],
    config: &TestConfig,
    n_replications: usize,
    seed: u64,
) -> Result<ConditionalAccuracy> {
    config.validate()?;
    let n_reps = n_replications.max(1);

    let stats: Vec<(f64, f64, f64)> = eval_thetas
        .par_iter()
        .enumerate()
        .map(|(t_idx, &true_theta)| -> Result<(f64, f64, f64)> {
            let mut estimates = Vec::with_capacity(n_reps);
            let mut n_items_sum = 0.0;

            for rep in 0..n_reps {
                let mut rng = Pcg64::seed_from_u64(task_seed(seed, t_idx, 10000, rep));
                let session = simulate_session(true_theta, pool, config, &mut rng)?;
                estimates.push(session.theta);
                n_items_sum += session.administered.len() as f64;
            }

            let mean_est: f64 = estimates.iter().sum::<f64>() / n_reps as f64;
            let bias = mean_est - true_theta;
            let mse: f64 = estimates
                .iter()
                .map(|&e| (e - true_theta).powi(2))
                .sum::<f64>()
                / n_reps as f64;
            let avg_items = n_items_sum / n_reps as f64;

            Ok((bias, mse, avg_items))
        })
        .collect::<Result<_>>()?;

    let n_thetas = eval_thetas.len();
    let mut bias = Array1::zeros(n_thetas);
    let mut mse = Array1::zeros(n_thetas);
    let mut avg_items = Array1::zeros(n_thetas);

    for (i, (b, m, a)) in stats.into_iter().enumerate() {
        bias[i] = b;
        mse[i] = m;
        avg_items[i] = a;
    }

    Ok(ConditionalAccuracy {
        theta: Array1::from_vec(eval_thetas.to_vec()),
        bias,
        mse,
        avg_items,
    })
}
