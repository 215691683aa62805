//! Computerized Adaptive Testing (CAT) on the 3PL IRT model, plus bandit-style
//! subject recommendations.
//!
//! This crate provides:
//! - 3PL response probability and Fisher information
//! - Ability estimation (Newton-Raphson MLE, EAP quadrature) and the policy choosing between them
//! - Item selection (maximum information, difficulty matching, random) with content balancing
//! - A session controller with ordered stopping rules and session statistics
//! - Subject recommendations blending exploitation with a UCB-style exploration bonus
//! - Parallel Monte Carlo simulation of adaptive sessions
//!
//! Everything is a pure computation over explicitly passed state. Hosts persist
//! [`session::TestState`] between calls and must not run two `process_response`
//! calls for the same session concurrently.

#[cfg(feature = "python")]
use pyo3::prelude::*;

pub mod utils;

pub mod cache;
pub mod config;
pub mod error;
pub mod estimator;
pub mod irt;
pub mod item;
pub mod recommend;
pub mod selector;
pub mod session;
pub mod simulation;

#[cfg(feature = "python")]
pub mod python;

pub use config::TestConfig;
pub use error::{CatError, Result};
pub use estimator::{
    AbilityEstimate, EstimationMethod, estimate_ability, estimate_ability_eap, estimate_ability_mle,
};
pub use irt::{ItemParams, information, probability};
pub use item::{Answer, Item, ItemKind, Response, UsageUpdate};
pub use recommend::{Recommendation, SubjectScoreInput, generate_recommendations};
pub use selector::{SelectionOptions, SelectionStrategy, select_next_question};
pub use session::{TestState, initialize_test, process_response, should_terminate_test};

/// Python module for adaptest
#[cfg(feature = "python")]
#[pymodule]
fn adaptest_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    python::register(m)?;
    Ok(())
}
