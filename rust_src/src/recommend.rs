//! Subject recommendations from ability, interest and learning-potential signals.
//!
//! Scores blend an exploitation term (weighted signals) with a UCB-style
//! exploration bonus that shrinks as a subject accumulates assessments and
//! confidence. Ranking supports category diversification and context-dependent
//! weight overrides.

use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

use crate::error::{CatError, Result};
use crate::utils::EPSILON;

/// Step size used when adapting weights from feedback.
pub const LEARNING_RATE: f64 = 0.1;
/// Fraction of the interest threshold kept when too few subjects qualify.
pub const INTEREST_RELAXATION: f64 = 0.7;
/// Upper bound for the exploration weight after feedback adjustments.
pub const MAX_EXPLORATION_WEIGHT: f64 = 0.5;
/// Half-width of the noise added in [`thompson_sampling`].
pub const THOMPSON_NOISE: f64 = 0.1;

/// Per-subject signals supplied by the subject profile store. Scores are 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectScoreInput {
    pub ability_score: f64,
    pub interest_score: f64,
    pub potential_score: f64,
    pub confidence: f64,
    pub assessment_count: u32,
    /// Content category used for diversification.
    pub category: String,
    /// Positive outcomes recorded for this subject.
    pub successes: u32,
    pub failures: u32,
    /// Recent improvement as a fraction in [0, 1].
    pub improvement_rate: f64,
    pub recent_positive_trend: bool,
}

impl Default for SubjectScoreInput {
    fn default() -> Self {
        Self {
            ability_score: 0.0,
            interest_score: 0.0,
            potential_score: 0.0,
            confidence: 0.0,
            assessment_count: 0,
            category: "general".to_string(),
            successes: 0,
            failures: 0,
            improvement_rate: 0.0,
            recent_positive_trend: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationWeights {
    pub ability: f64,
    pub interest: f64,
    pub potential: f64,
    /// Share of the final score given to the exploration bonus.
    pub exploration: f64,
}

impl Default for RecommendationWeights {
    fn default() -> Self {
        Self {
            ability: 0.4,
            interest: 0.3,
            potential: 0.3,
            exploration: 0.2,
        }
    }
}

impl RecommendationWeights {
    /// Rescale ability/interest/potential to sum to 1 and clamp exploration to [0, 1].
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        let ability = finite_non_negative(self.ability);
        let interest = finite_non_negative(self.interest);
        let potential = finite_non_negative(self.potential);
        let sum = ability + interest + potential;

        let exploration = finite_non_negative(self.exploration).min(1.0);

        if sum < EPSILON {
            return Self {
                exploration,
                ..defaults
            };
        }

        Self {
            ability: ability / sum,
            interest: interest / sum,
            potential: potential / sum,
            exploration,
        }
    }

    fn adjusted(self, delta: WeightAdjustment) -> Self {
        Self {
            ability: self.ability + delta.ability,
            interest: self.interest + delta.interest,
            potential: self.potential + delta.potential,
            exploration: self.exploration + delta.exploration,
        }
        .normalized()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationOptions {
    pub top_n: usize,
    pub min_interest: f64,
    pub min_ability: f64,
    /// Cap each category at `ceil(top_n / 3)` entries.
    pub diversify: bool,
    pub weights: RecommendationWeights,
}

impl Default for RecommendationOptions {
    fn default() -> Self {
        Self {
            top_n: 5,
            min_interest: 30.0,
            min_ability: 20.0,
            diversify: true,
            weights: RecommendationWeights::default(),
        }
    }
}

impl RecommendationOptions {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let options: Self = crate::config::from_toml_str(s)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("min_interest", self.min_interest),
            ("min_ability", self.min_ability),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(CatError::InvalidConfig(format!(
                    "{name} must lie within [0, 100], got {value}"
                )));
            }
        }
        let w = &self.weights;
        if [w.ability, w.interest, w.potential, w.exploration]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(CatError::InvalidConfig(
                "weights must be finite and non-negative".into(),
            ));
        }
        if w.exploration > 1.0 {
            return Err(CatError::InvalidConfig(format!(
                "weights.exploration must lie within [0, 1], got {}",
                w.exploration
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningTag {
    StrengthAndPassion,
    HighPotential,
    StrongInterest,
    NaturalTalent,
    GrowthOpportunity,
    BalancedFit,
}

impl ReasoningTag {
    /// First matching rule wins.
    pub fn for_input(input: &SubjectScoreInput) -> Self {
        let ability = input.ability_score;
        let interest = input.interest_score;
        let potential = input.potential_score;

        if ability >= 70.0 && interest >= 70.0 {
            ReasoningTag::StrengthAndPassion
        } else if potential >= 75.0 {
            ReasoningTag::HighPotential
        } else if interest >= 70.0 {
            ReasoningTag::StrongInterest
        } else if ability >= 70.0 {
            ReasoningTag::NaturalTalent
        } else if interest >= 50.0 && potential >= 60.0 {
            ReasoningTag::GrowthOpportunity
        } else {
            ReasoningTag::BalancedFit
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningTag::StrengthAndPassion => "strength_and_passion",
            ReasoningTag::HighPotential => "high_potential",
            ReasoningTag::StrongInterest => "strong_interest",
            ReasoningTag::NaturalTalent => "natural_talent",
            ReasoningTag::GrowthOpportunity => "growth_opportunity",
            ReasoningTag::BalancedFit => "balanced_fit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub subject_id: String,
    /// 0-100.
    pub score: f64,
    /// 1-based position in the returned list.
    pub rank: usize,
    pub reasoning: ReasoningTag,
}

#[inline]
fn finite_non_negative(x: f64) -> f64 {
    if x.is_finite() { x.max(0.0) } else { 0.0 }
}

/// Map a 0-100 score onto [0, 1].
#[inline]
fn unit(score: f64) -> f64 {
    if score.is_finite() {
        (score / 100.0).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// UCB-style bonus: (1 - confidence) * sqrt(2 ln(n + 2) / (n + 1)).
pub fn exploration_bonus(input: &SubjectScoreInput) -> f64 {
    let n = f64::from(input.assessment_count);
    (1.0 - unit(input.confidence)) * (2.0 * (n + 2.0).ln() / (n + 1.0)).sqrt()
}

/// Bandit score of one subject on a 0-100 scale.
pub fn recommendation_score(input: &SubjectScoreInput, weights: &RecommendationWeights) -> f64 {
    let w = weights.normalized();
    let exploitation = w.ability * unit(input.ability_score)
        + w.interest * unit(input.interest_score)
        + w.potential * unit(input.potential_score);
    let blended = exploitation * (1.0 - w.exploration) + exploration_bonus(input) * w.exploration;
    (blended * 100.0).clamp(0.0, 100.0)
}

fn passes(input: &SubjectScoreInput, min_interest: f64, min_ability: f64) -> bool {
    input.interest_score >= min_interest && input.ability_score >= min_ability
}

/// Score, filter, rank and optionally diversify subjects.
///
/// Returns an empty list when no subject qualifies even after relaxing the
/// interest threshold.
pub fn generate_recommendations(
    subjects: &BTreeMap<String, SubjectScoreInput>,
    options: &RecommendationOptions,
) -> Vec<Recommendation> {
    if options.top_n == 0 {
        return Vec::new();
    }

    let weights = options.weights.normalized();
    let mut survivors: Vec<(&String, &SubjectScoreInput)> = subjects
        .iter()
        .filter(|(_, input)| passes(input, options.min_interest, options.min_ability))
        .collect();

    if survivors.len() < options.top_n {
        let relaxed = options.min_interest * INTEREST_RELAXATION;
        tracing::debug!(
            qualified = survivors.len(),
            top_n = options.top_n,
            relaxed_min_interest = relaxed,
            "too few subjects qualify, relaxing interest threshold"
        );
        survivors = subjects
            .iter()
            .filter(|(_, input)| passes(input, relaxed, options.min_ability))
            .collect();
    }

    if survivors.is_empty() {
        tracing::debug!(subjects = subjects.len(), "no subject meets the thresholds");
        return Vec::new();
    }

    let mut scored: Vec<(&String, &SubjectScoreInput, f64)> = survivors
        .into_iter()
        .map(|(id, input)| (id, input, recommendation_score(input, &weights)))
        .collect();
    scored.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.0.cmp(b.0)));

    let n_categories = {
        let mut categories: Vec<&str> = scored
            .iter()
            .map(|(_, input, _)| input.category.as_str())
            .collect();
        categories.sort_unstable();
        categories.dedup();
        categories.len()
    };

    let diversify = options.diversify && n_categories >= 3;
    let selected: Vec<(&String, &SubjectScoreInput, f64)> = if diversify {
        let per_category = options.top_n.div_ceil(3);
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut selected = Vec::with_capacity(options.top_n);
        for (id, input, score) in scored {
            if selected.len() >= options.top_n {
                break;
            }
            let count = counts.entry(input.category.as_str()).or_default();
            if *count < per_category {
                *count += 1;
                selected.push((id, input, score));
            }
        }
        selected
    } else {
        scored.into_iter().take(options.top_n).collect()
    };

    selected
        .into_iter()
        .enumerate()
        .map(|(i, (id, input, score))| Recommendation {
            subject_id: id.clone(),
            score,
            rank: i + 1,
            reasoning: ReasoningTag::for_input(input),
        })
        .collect()
}

/// Learning potential on a 0-100 scale.
///
/// Base is 0.4 ability + 0.6 interest, plus up to 20 points for the improvement
/// rate and 10 for a recent positive trend, scaled by 0.7 + 0.3 confidence.
pub fn calculate_learning_potential(input: &SubjectScoreInput) -> f64 {
    let ability = finite_non_negative(input.ability_score).min(100.0);
    let interest = finite_non_negative(input.interest_score).min(100.0);
    let base = 0.4 * ability + 0.6 * interest;

    let mut bonus = finite_non_negative(input.improvement_rate).min(1.0) * 20.0;
    if input.recent_positive_trend {
        bonus += 10.0;
    }

    let confidence_multiplier = 0.7 + 0.3 * unit(input.confidence);
    ((base + bonus) * confidence_multiplier).clamp(0.0, 100.0)
}

fn beta_params(input: &SubjectScoreInput) -> (f64, f64) {
    (
        f64::from(input.successes) + 1.0,
        f64::from(input.failures) + 1.0,
    )
}

/// Mean of Beta(successes + 1, failures + 1) plus uniform noise in [-0.1, 0.1],
/// clamped to [0, 1]. [`thompson_draw`] samples the posterior itself.
pub fn thompson_sampling<R: Rng + ?Sized>(input: &SubjectScoreInput, rng: &mut R) -> f64 {
    let (alpha, beta) = beta_params(input);
    let mean = alpha / (alpha + beta);
    let noise = rng.random_range(-THOMPSON_NOISE..=THOMPSON_NOISE);
    (mean + noise).clamp(0.0, 1.0)
}

/// Sample from Beta(successes + 1, failures + 1).
pub fn thompson_draw<R: Rng + ?Sized>(input: &SubjectScoreInput, rng: &mut R) -> f64 {
    let (alpha, beta) = beta_params(input);
    match Beta::new(alpha, beta) {
        Ok(dist) => dist.sample(rng),
        Err(_) => alpha / (alpha + beta),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecentPerformance {
    Struggling,
    Steady,
    Excelling,
}

/// Situation in which recommendations are requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationContext {
    pub time_of_day: TimeOfDay,
    pub energy: EnergyLevel,
    pub recent_performance: RecentPerformance,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct WeightAdjustment {
    ability: f64,
    interest: f64,
    potential: f64,
    exploration: f64,
}

impl std::ops::Add for WeightAdjustment {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            ability: self.ability + rhs.ability,
            interest: self.interest + rhs.interest,
            potential: self.potential + rhs.potential,
            exploration: self.exploration + rhs.exploration,
        }
    }
}

const fn adjust(ability: f64, interest: f64, potential: f64, exploration: f64) -> WeightAdjustment {
    WeightAdjustment {
        ability,
        interest,
        potential,
        exploration,
    }
}

impl TimeOfDay {
    fn adjustment(self) -> WeightAdjustment {
        match self {
            TimeOfDay::Morning => adjust(0.1, 0.0, 0.0, 0.0),
            TimeOfDay::Afternoon => adjust(0.0, 0.0, 0.05, 0.0),
            TimeOfDay::Evening => adjust(0.0, 0.1, 0.0, 0.0),
            TimeOfDay::Night => adjust(0.0, 0.1, 0.0, -0.05),
        }
    }
}

impl EnergyLevel {
    fn adjustment(self) -> WeightAdjustment {
        match self {
            EnergyLevel::Low => adjust(-0.05, 0.1, 0.0, -0.05),
            EnergyLevel::Medium => WeightAdjustment::default(),
            EnergyLevel::High => adjust(0.0, 0.0, 0.1, 0.05),
        }
    }
}

impl RecentPerformance {
    fn adjustment(self) -> WeightAdjustment {
        match self {
            RecentPerformance::Struggling => adjust(-0.05, 0.1, 0.0, 0.0),
            RecentPerformance::Steady => WeightAdjustment::default(),
            RecentPerformance::Excelling => adjust(0.0, 0.0, 0.1, 0.05),
        }
    }
}

impl RecommendationContext {
    /// Weights after applying the context overrides to `base`.
    pub fn apply(&self, base: RecommendationWeights) -> RecommendationWeights {
        let delta = self.time_of_day.adjustment()
            + self.energy.adjustment()
            + self.recent_performance.adjustment();
        base.adjusted(delta)
    }
}

/// [`generate_recommendations`] with weights adapted to `context`.
pub fn contextual_recommendations(
    subjects: &BTreeMap<String, SubjectScoreInput>,
    context: &RecommendationContext,
    options: &RecommendationOptions,
) -> Vec<Recommendation> {
    let options = RecommendationOptions {
        weights: context.apply(options.weights),
        ..options.clone()
    };
    tracing::debug!(?context, weights = ?options.weights, "contextual recommendation weights");
    generate_recommendations(subjects, &options)
}

/// What the learner reported after following a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackOutcome {
    /// Did well in the subject.
    PerformedWell,
    /// Enjoyed the subject.
    Enjoyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationFeedback {
    pub accepted: bool,
    /// 1-5.
    pub rating: Option<u8>,
    pub outcome: Option<FeedbackOutcome>,
}

/// Nudge weights by [`LEARNING_RATE`] from feedback and renormalize.
///
/// The exploration weight of the result never exceeds [`MAX_EXPLORATION_WEIGHT`].
pub fn update_recommendation_weights(
    weights: RecommendationWeights,
    feedback: &RecommendationFeedback,
) -> RecommendationWeights {
    let mut delta = WeightAdjustment::default();

    if !feedback.accepted || feedback.rating.is_some_and(|r| r <= 2) {
        delta.exploration += LEARNING_RATE;
    }
    match feedback.outcome {
        Some(FeedbackOutcome::PerformedWell) => delta.ability += LEARNING_RATE,
        Some(FeedbackOutcome::Enjoyed) => delta.interest += LEARNING_RATE,
        None => {}
    }

    let mut updated = weights.adjusted(delta);
    updated.exploration = updated.exploration.min(MAX_EXPLORATION_WEIGHT);
    updated
}
