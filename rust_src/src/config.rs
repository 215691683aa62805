//! Session configuration.
//!
//! Every field has a default, so a TOML document only needs the values it changes:
//!
//! ```toml
//! min_questions = 10
//! max_questions = 60
//! target_precision = 0.3
//!
//! [selection]
//! strategy = "maximum_information"
//! randomness = 0.1
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CatError, Result};
use crate::estimator::EstimatorSettings;
use crate::item::TagField;
use crate::selector::SelectionOptions;
use crate::utils::{THETA_MAX, THETA_MIN};

/// Parse any configuration type from TOML.
pub fn from_toml_str<T: DeserializeOwned>(s: &str) -> Result<T> {
    Ok(toml::from_str(s)?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    pub starting_theta: f64,
    pub min_questions: usize,
    pub max_questions: usize,
    /// Stop once this many questions are answered, if set.
    pub target_questions: Option<usize>,
    /// Stop once the standard error is at or below this value.
    pub target_precision: f64,
    /// Difficulty targeted by the first item of a session.
    pub initial_difficulty: f64,
    pub selection: SelectionOptions,
    pub estimator: EstimatorSettings,
    /// Group used for content balancing; `None` disables balancing.
    pub balance_by: Option<TagField>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            starting_theta: 0.0,
            min_questions: 10,
            max_questions: 60,
            target_questions: None,
            target_precision: 0.3,
            initial_difficulty: 0.0,
            selection: SelectionOptions::default(),
            estimator: EstimatorSettings::default(),
            balance_by: Some(TagField::ContentTag),
        }
    }
}

impl TestConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = from_toml_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_questions == 0 {
            return Err(CatError::InvalidConfig(
                "max_questions must be at least 1".into(),
            ));
        }
        if self.min_questions > self.max_questions {
            return Err(CatError::InvalidConfig(format!(
                "min_questions ({}) exceeds max_questions ({})",
                self.min_questions, self.max_questions
            )));
        }
        if let Some(target) = self.target_questions {
            if target < self.min_questions || target > self.max_questions {
                return Err(CatError::InvalidConfig(format!(
                    "target_questions ({target}) must lie within [{}, {}]",
                    self.min_questions, self.max_questions
                )));
            }
        }
        if !(self.target_precision.is_finite() && self.target_precision > 0.0) {
            return Err(CatError::InvalidConfig(format!(
                "target_precision must be positive, got {}",
                self.target_precision
            )));
        }
        if !(THETA_MIN..=THETA_MAX).contains(&self.starting_theta) {
            return Err(CatError::InvalidConfig(format!(
                "starting_theta must lie within [-3, 3], got {}",
                self.starting_theta
            )));
        }
        if !(0.0..=1.0).contains(&self.selection.randomness) {
            return Err(CatError::InvalidConfig(format!(
                "selection.randomness must lie within [0, 1], got {}",
                self.selection.randomness
            )));
        }
        if !(self.estimator.eap.prior_sd.is_finite() && self.estimator.eap.prior_sd > 0.0) {
            return Err(CatError::InvalidConfig(
                "estimator.eap.prior_sd must be positive".into(),
            ));
        }
        Ok(())
    }
}
