//! Python bindings, enabled with the `python` feature.

use std::time::Duration;

use chrono::Utc;
use ndarray::Array1;
use numpy::{PyArray1, PyReadonlyArray1, ToPyArray};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::config::TestConfig;
use crate::error::CatError;
use crate::estimator::{EapOptions, MleOptions, estimate_ability_eap, estimate_ability_mle};
use crate::irt::ItemParams;
use crate::item::{Item, ItemKind, Response};
use crate::simulation::simulate_batch;

impl From<CatError> for PyErr {
    fn from(err: CatError) -> Self {
        PyValueError::new_err(err.to_string())
    }
}

fn item_params(
    difficulty: &PyReadonlyArray1<f64>,
    discrimination: &PyReadonlyArray1<f64>,
    guessing: &PyReadonlyArray1<f64>,
) -> PyResult<Vec<ItemParams>> {
    let diff = difficulty.as_array();
    let disc = discrimination.as_array();
    let guess = guessing.as_array();
    if diff.len() != disc.len() || diff.len() != guess.len() {
        return Err(PyValueError::new_err(
            "difficulty, discrimination and guessing must have equal length",
        ));
    }
    Ok((0..diff.len())
        .map(|j| ItemParams::new(diff[j], disc[j], guess[j]))
        .collect())
}

fn response_history(
    params: &[ItemParams],
    responses: &PyReadonlyArray1<i32>,
) -> PyResult<Vec<Response>> {
    let resp = responses.as_array();
    if resp.len() != params.len() {
        return Err(PyValueError::new_err(
            "responses must have one entry per item",
        ));
    }
    let now = Utc::now();
    Ok(params
        .iter()
        .zip(resp.iter())
        .enumerate()
        .filter(|(_, (_, r))| **r >= 0)
        .map(|(j, (p, &r))| Response {
            item_id: j.to_string(),
            is_correct: r == 1,
            params: *p,
            time_taken: Duration::ZERO,
            answered_at: now,
        })
        .collect())
}

/// Fisher information of each item at `theta`
#[pyfunction]
pub fn irt_item_information<'py>(
    py: Python<'py>,
    theta: f64,
    difficulty: PyReadonlyArray1<f64>,
    discrimination: PyReadonlyArray1<f64>,
    guessing: PyReadonlyArray1<f64>,
) -> PyResult<Bound<'py, PyArray1<f64>>> {
    let params = item_params(&difficulty, &discrimination, &guessing)?;
    let info: Array1<f64> = params.iter().map(|p| p.information(theta)).collect();
    Ok(info.to_pyarray(py))
}

/// EAP estimate from a response vector (-1 marks items not administered)
#[pyfunction]
#[pyo3(signature = (responses, difficulty, discrimination, guessing, prior_mean=0.0, prior_sd=1.0))]
pub fn cat_estimate_eap(
    responses: PyReadonlyArray1<i32>,
    difficulty: PyReadonlyArray1<f64>,
    discrimination: PyReadonlyArray1<f64>,
    guessing: PyReadonlyArray1<f64>,
    prior_mean: f64,
    prior_sd: f64,
) -> PyResult<(f64, f64)> {
    let params = item_params(&difficulty, &discrimination, &guessing)?;
    let history = response_history(&params, &responses)?;
    let est = estimate_ability_eap(
        &history,
        EapOptions {
            prior_mean,
            prior_sd,
        },
    );
    Ok((est.theta, est.standard_error))
}

/// Newton-Raphson MLE: (theta, se, iterations, converged)
#[pyfunction]
#[pyo3(signature = (
    responses, difficulty, discrimination, guessing, initial_theta=0.0, max_iter=20, tol=0.001
))]
#[allow(clippy::too_many_arguments)]
pub fn cat_estimate_mle(
    responses: PyReadonlyArray1<i32>,
    difficulty: PyReadonlyArray1<f64>,
    discrimination: PyReadonlyArray1<f64>,
    guessing: PyReadonlyArray1<f64>,
    initial_theta: f64,
    max_iter: usize,
    tol: f64,
) -> PyResult<(f64, f64, usize, bool)> {
    let params = item_params(&difficulty, &discrimination, &guessing)?;
    let history = response_history(&params, &responses)?;
    let est = estimate_ability_mle(
        &history,
        MleOptions {
            initial_theta,
            max_iter,
            tol,
        },
    );
    Ok((
        est.theta,
        est.standard_error,
        est.iterations.unwrap_or(0),
        est.converged.unwrap_or(false),
    ))
}

/// Run batch CAT simulations in parallel
#[pyfunction]
#[allow(clippy::too_many_arguments)]
#[allow(clippy::type_complexity)]
pub fn cat_simulate_batch<'py>(
    py: Python<'py>,
    true_thetas: PyReadonlyArray1<f64>,
    difficulty: PyReadonlyArray1<f64>,
    discrimination: PyReadonlyArray1<f64>,
    guessing: PyReadonlyArray1<f64>,
    se_threshold: f64,
    max_items: usize,
    min_items: usize,
    n_replications: usize,
    seed: u64,
) -> PyResult<(
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray1<usize>>,
    Bound<'py, PyArray1<f64>>,
)> {
    let params = item_params(&difficulty, &discrimination, &guessing)?;
    let pool: Vec<Item> = params
        .into_iter()
        .enumerate()
        .map(|(j, p)| {
            Item::new(
                j.to_string(),
                "simulation",
                "default",
                p,
                ItemKind::MultipleChoice {
                    options: Vec::new(),
                    correct_index: 0,
                },
            )
        })
        .collect();
    let thetas = true_thetas.as_array().to_vec();
    let config = TestConfig {
        min_questions: min_items,
        max_questions: max_items,
        target_precision: se_threshold,
        balance_by: None,
        ..TestConfig::default()
    };

    let batch = py.detach(|| simulate_batch(&thetas, &pool, &config, n_replications, seed))?;

    Ok((
        batch.theta_est.to_pyarray(py),
        batch.se_est.to_pyarray(py),
        batch.n_items.to_pyarray(py),
        batch.true_theta.to_pyarray(py),
    ))
}

/// Register functions with the Python module
pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(irt_item_information, m)?)?;
    m.add_function(wrap_pyfunction!(cat_estimate_eap, m)?)?;
    m.add_function(wrap_pyfunction!(cat_estimate_mle, m)?)?;
    m.add_function(wrap_pyfunction!(cat_simulate_batch, m)?)?;
    Ok(())
}
