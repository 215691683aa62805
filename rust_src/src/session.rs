//! Adaptive test session lifecycle.
//!
//! A session moves Initialized -> InProgress -> Complete. State is passed in and a
//! new state handed back on every call; callers must serialize `process_response`
//! per session because each call re-estimates from the full history.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TestConfig;
use crate::error::{CatError, Result};
use crate::estimator::{AbilityEstimate, estimate_ability};
use crate::item::{Answer, Item, Response, UsageUpdate};
use crate::selector::{
    balance_content_coverage, select_initial_question, select_next_from, select_next_question,
};
use crate::utils::{UNDEFINED_SE, clamp_theta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    InProgress,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    MaxQuestionsReached,
    TargetQuestionsReached,
    SufficientPrecision,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::MaxQuestionsReached => "max_questions_reached",
            TerminationReason::TargetQuestionsReached => "target_questions_reached",
            TerminationReason::SufficientPrecision => "sufficient_precision",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating the stopping rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationDecision {
    pub stop: bool,
    pub reason: Option<TerminationReason>,
}

impl TerminationDecision {
    const CONTINUE: Self = Self {
        stop: false,
        reason: None,
    };

    fn stop(reason: TerminationReason) -> Self {
        Self {
            stop: true,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestState {
    pub session_id: Uuid,
    pub config: TestConfig,
    pub responses: Vec<Response>,
    pub used_item_ids: HashSet<String>,
    pub theta: f64,
    pub standard_error: f64,
    pub last_estimate: Option<AbilityEstimate>,
    pub questions_answered: usize,
    pub status: TestStatus,
    pub termination_reason: Option<TerminationReason>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TestState {
    pub fn is_complete(&self) -> bool {
        self.status == TestStatus::Complete
    }

    /// Usage increments for the most recent response.
    pub fn last_usage_update(&self) -> Option<UsageUpdate> {
        self.responses.last().map(UsageUpdate::from_response)
    }
}

/// Summary statistics of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStatistics {
    pub total_questions: usize,
    pub correct_answers: usize,
    /// Percentage of correct answers, 0-100.
    pub accuracy: f64,
    pub average_difficulty: f64,
    pub average_time_per_item: Duration,
    /// From start to end, or to the latest response while still in progress.
    pub total_time: Duration,
    pub final_theta: f64,
    pub final_standard_error: f64,
}

/// Start a new session.
pub fn initialize_test(config: TestConfig) -> Result<TestState> {
    initialize_test_at(config, Utc::now())
}

pub fn initialize_test_at(config: TestConfig, started_at: DateTime<Utc>) -> Result<TestState> {
    config.validate()?;
    let state = TestState {
        session_id: Uuid::new_v4(),
        theta: clamp_theta(config.starting_theta),
        standard_error: UNDEFINED_SE,
        config,
        responses: Vec::new(),
        used_item_ids: HashSet::new(),
        last_estimate: None,
        questions_answered: 0,
        status: TestStatus::InProgress,
        termination_reason: None,
        started_at,
        ended_at: None,
    };
    tracing::debug!(session_id = %state.session_id, "test session initialized");
    Ok(state)
}

/// Score `answer` against `item` and record it.
pub fn process_response(
    state: &TestState,
    item: &Item,
    answer: &Answer,
    time_taken: Duration,
) -> Result<TestState> {
    process_response_at(state, item, answer, time_taken, Utc::now())
}

pub fn process_response_at(
    state: &TestState,
    item: &Item,
    answer: &Answer,
    time_taken: Duration,
    now: DateTime<Utc>,
) -> Result<TestState> {
    let is_correct = item.kind.is_correct(answer);
    record_outcome(state, item, is_correct, time_taken, now)
}

/// Record an already scored response, re-estimate ability and apply the stopping rules.
pub fn record_outcome(
    state: &TestState,
    item: &Item,
    is_correct: bool,
    time_taken: Duration,
    now: DateTime<Utc>,
) -> Result<TestState> {
    if state.is_complete() {
        return Err(CatError::SessionComplete(state.session_id.to_string()));
    }
    if state.used_item_ids.contains(&item.id) {
        return Err(CatError::DuplicateItem(item.id.clone()));
    }

    let mut next = state.clone();
    next.responses.push(Response {
        item_id: item.id.clone(),
        is_correct,
        params: item.params,
        time_taken,
        answered_at: now,
    });
    next.used_item_ids.insert(item.id.clone());
    next.questions_answered = next.responses.len();

    let estimate = estimate_ability(&next.responses, &next.config.estimator);
    next.theta = estimate.theta;
    next.standard_error = estimate.standard_error;
    next.last_estimate = Some(estimate);

    let decision = should_terminate_test(&next);
    if decision.stop {
        next.status = TestStatus::Complete;
        next.termination_reason = decision.reason;
        next.ended_at = Some(now);
        tracing::info!(
            session_id = %next.session_id,
            questions = next.questions_answered,
            theta = next.theta,
            standard_error = next.standard_error,
            reason = ?decision.reason,
            "test session complete"
        );
    }

    Ok(next)
}

/// Evaluate the stopping rules in order: minimum length, maximum length,
/// target length, then precision.
pub fn should_terminate_test(state: &TestState) -> TerminationDecision {
    let config = &state.config;
    let answered = state.questions_answered;

    if answered < config.min_questions {
        return TerminationDecision::CONTINUE;
    }
    if answered >= config.max_questions {
        return TerminationDecision::stop(TerminationReason::MaxQuestionsReached);
    }
    if let Some(target) = config.target_questions {
        if answered >= target {
            return TerminationDecision::stop(TerminationReason::TargetQuestionsReached);
        }
    }
    if state.standard_error <= config.target_precision {
        return TerminationDecision::stop(TerminationReason::SufficientPrecision);
    }
    TerminationDecision::CONTINUE
}

/// Pick the next item for a session, or `None` if the session is over or the
/// pool is exhausted.
pub fn next_question<'a, R: Rng + ?Sized>(
    state: &TestState,
    pool: &'a [Item],
    rng: &mut R,
) -> Option<&'a Item> {
    if state.is_complete() {
        return None;
    }

    let config = &state.config;
    if state.responses.is_empty() {
        return select_initial_question(pool, config.initial_difficulty, rng);
    }

    let Some(field) = config.balance_by else {
        return select_next_question(
            state.theta,
            pool,
            &state.used_item_ids,
            &config.selection,
            rng,
        );
    };

    let used_items: Vec<&Item> = pool
        .iter()
        .filter(|item| state.used_item_ids.contains(&item.id))
        .collect();
    let balanced = balance_content_coverage(pool, &used_items, field);
    select_next_from(
        state.theta,
        balanced,
        &state.used_item_ids,
        &config.selection,
        rng,
    )
}

/// Accuracy, average difficulty, pacing and elapsed time of a session.
pub fn test_statistics(state: &TestState) -> TestStatistics {
    let total = state.responses.len();
    let correct = state.responses.iter().filter(|r| r.is_correct).count();

    let (accuracy, average_difficulty, average_time_per_item) = if total == 0 {
        (0.0, 0.0, Duration::ZERO)
    } else {
        let n = total as f64;
        let difficulty_sum: f64 = state.responses.iter().map(|r| r.params.difficulty).sum();
        let time_sum: Duration = state.responses.iter().map(|r| r.time_taken).sum();
        (
            correct as f64 / n * 100.0,
            difficulty_sum / n,
            time_sum / total as u32,
        )
    };

    let end = state
        .ended_at
        .or_else(|| state.responses.last().map(|r| r.answered_at))
        .unwrap_or(state.started_at);
    let total_time = (end - state.started_at).to_std().unwrap_or(Duration::ZERO);

    TestStatistics {
        total_questions: total,
        correct_answers: correct,
        accuracy,
        average_difficulty,
        average_time_per_item,
        total_time,
        final_theta: state.theta,
        final_standard_error: state.standard_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::EstimationMethod;
    use crate::irt::ItemParams;
    use crate::item::{ItemKind, TagField};
    use chrono::TimeDelta;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    fn mc_item(id: &str, b: f64, tag: &str) -> Item {
        Item::new(
            id,
            "science",
            tag,
            ItemParams::new(b, 1.2, 0.2),
            ItemKind::MultipleChoice {
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_index: 1,
            },
        )
    }

    fn pool(n: usize) -> Vec<Item> {
        (0..n)
            .map(|i| {
                let b = -2.5 + 5.0 * i as f64 / n.max(2) as f64;
                let tag = ["physics", "chemistry", "biology"][i % 3];
                mc_item(&format!("s{i:03}"), b, tag)
            })
            .collect()
    }

    fn config(min: usize, max: usize, precision: f64) -> TestConfig {
        TestConfig {
            min_questions: min,
            max_questions: max,
            target_precision: precision,
            ..TestConfig::default()
        }
    }

    fn state_with(config: TestConfig, answered: usize, se: f64) -> TestState {
        let mut state = initialize_test(config).unwrap();
        state.questions_answered = answered;
        state.standard_error = se;
        state
    }

    #[test]
    fn initialization_defaults() {
        let state = initialize_test(TestConfig::default()).unwrap();
        assert_eq!(state.questions_answered, 0);
        assert_eq!(state.theta, 0.0);
        assert_eq!(state.standard_error, UNDEFINED_SE);
        assert_eq!(state.status, TestStatus::InProgress);
        assert!(state.termination_reason.is_none());
        assert!(state.ended_at.is_none());
    }

    #[test]
    fn initialization_rejects_invalid_config() {
        assert!(initialize_test(config(20, 10, 0.3)).is_err());
    }

    #[test]
    fn process_response_appends_exactly_one() {
        let items = pool(30);
        let state = initialize_test(config(10, 60, 0.3)).unwrap();
        let next = process_response(
            &state,
            &items[3],
            &Answer::Choice(1),
            Duration::from_secs(12),
        )
        .unwrap();

        assert_eq!(next.responses.len(), state.responses.len() + 1);
        assert_eq!(next.questions_answered, next.responses.len());
        assert_eq!(next.used_item_ids.len(), state.used_item_ids.len() + 1);
        assert!(!state.used_item_ids.contains(&items[3].id));
        assert!(next.used_item_ids.contains(&items[3].id));
        assert!(next.responses[0].is_correct);
        assert_eq!(next.last_estimate.map(|e| e.method), Some(EstimationMethod::Eap));
        assert!(next.standard_error < UNDEFINED_SE);
    }

    #[test]
    fn duplicate_item_is_rejected() {
        let items = pool(5);
        let state = initialize_test(config(1, 5, 0.3)).unwrap();
        let state = process_response(
            &state,
            &items[0],
            &Answer::Choice(0),
            Duration::from_secs(5),
        )
        .unwrap();
        let err = process_response(
            &state,
            &items[0],
            &Answer::Choice(1),
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, CatError::DuplicateItem(id) if id == items[0].id));
    }

    #[test]
    fn complete_session_rejects_responses() {
        let items = pool(5);
        let state = initialize_test(config(1, 1, 0.3)).unwrap();
        let state = process_response(
            &state,
            &items[0],
            &Answer::Choice(1),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(state.is_complete());
        assert_eq!(state.termination_reason, Some(TerminationReason::MaxQuestionsReached));
        assert!(state.ended_at.is_some());

        let err = process_response(
            &state,
            &items[1],
            &Answer::Choice(1),
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, CatError::SessionComplete(_)));
    }

    #[test]
    fn precision_stop_waits_for_minimum() {
        let config = config(10, 60, 0.3);

        let at_eight = state_with(config.clone(), 8, 0.25);
        assert_eq!(should_terminate_test(&at_eight), TerminationDecision::CONTINUE);

        let at_ten = state_with(config, 10, 0.25);
        let decision = should_terminate_test(&at_ten);
        assert!(decision.stop);
        assert_eq!(decision.reason, Some(TerminationReason::SufficientPrecision));
    }

    #[test]
    fn stopping_rules_apply_in_order() {
        let mut config = config(5, 20, 0.3);
        config.target_questions = Some(12);

        // max beats target and precision
        let decision = should_terminate_test(&state_with(config.clone(), 20, 0.1));
        assert_eq!(decision.reason, Some(TerminationReason::MaxQuestionsReached));

        // target beats precision
        let decision = should_terminate_test(&state_with(config.clone(), 12, 0.1));
        assert_eq!(decision.reason, Some(TerminationReason::TargetQuestionsReached));

        let decision = should_terminate_test(&state_with(config.clone(), 7, 0.1));
        assert_eq!(decision.reason, Some(TerminationReason::SufficientPrecision));

        let decision = should_terminate_test(&state_with(config, 7, 0.5));
        assert!(!decision.stop);
        assert_eq!(decision.reason, None);
    }

    #[test]
    fn next_question_balances_content_and_skips_used() {
        let items = pool(30);
        let mut rng = Pcg64::seed_from_u64(5);
        let mut state = initialize_test(config(10, 12, 0.01)).unwrap();
        let start = state.started_at;

        for i in 0..12 {
            let item = next_question(&state, &items, &mut rng).unwrap();
            assert!(!state.used_item_ids.contains(&item.id));
            let answered_at = start + TimeDelta::seconds(10 * (i + 1));
            state = process_response_at(
                &state,
                item,
                &Answer::Choice(i as usize % 2),
                Duration::from_secs(10),
                answered_at,
            )
            .unwrap();
        }

        assert!(state.is_complete());
        assert!(next_question(&state, &items, &mut rng).is_none());

        let mut per_tag = std::collections::HashMap::new();
        for id in &state.used_item_ids {
            let item = items.iter().find(|i| &i.id == id).unwrap();
            *per_tag.entry(item.tag(TagField::ContentTag).to_string()).or_insert(0) += 1;
        }
        assert!(per_tag.values().all(|&count| count == 4), "{per_tag:?}");
    }

    #[test]
    fn statistics_summarize_session() {
        let items = pool(10);
        let start = Utc::now();
        let state = initialize_test_at(config(2, 2, 0.3), start).unwrap();
        let state = process_response_at(
            &state,
            &items[2],
            &Answer::Choice(1),
            Duration::from_secs(20),
            start + TimeDelta::seconds(20),
        )
        .unwrap();
        let state = process_response_at(
            &state,
            &items[6],
            &Answer::Choice(3),
            Duration::from_secs(40),
            start + TimeDelta::seconds(65),
        )
        .unwrap();

        let stats = test_statistics(&state);
        assert_eq!(stats.total_questions, 2);
        assert_eq!(stats.correct_answers, 1);
        assert!((stats.accuracy - 50.0).abs() < 1e-9);
        let expected_difficulty = (items[2].difficulty() + items[6].difficulty()) / 2.0;
        assert!((stats.average_difficulty - expected_difficulty).abs() < 1e-9);
        assert_eq!(stats.average_time_per_item, Duration::from_secs(30));
        assert_eq!(stats.total_time, Duration::from_secs(65));
    }

    #[test]
    fn statistics_of_empty_session() {
        let state = initialize_test(TestConfig::default()).unwrap();
        let stats = test_statistics(&state);
        assert_eq!(stats.total_questions, 0);
        assert_eq!(stats.accuracy, 0.0);
        assert_eq!(stats.total_time, Duration::ZERO);
    }

    #[test]
    fn usage_update_reflects_last_response() {
        let items = pool(4);
        let state = initialize_test(config(1, 4, 0.3)).unwrap();
        assert!(state.last_usage_update().is_none());
        let state = process_response(
            &state,
            &items[1],
            &Answer::Choice(1),
            Duration::from_secs(3),
        )
        .unwrap();
        let update = state.last_usage_update().unwrap();
        assert_eq!(update.item_id, items[1].id);
        assert_eq!(update.times_administered, 1);
        assert_eq!(update.times_correct, 1);
    }

    #[test]
    fn state_survives_json_round_trip() {
        let items = pool(4);
        let state = initialize_test(config(1, 4, 0.3)).unwrap();
        let state = process_response(
            &state,
            &items[0],
            &Answer::Choice(2),
            Duration::from_millis(1500),
        )
        .unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let restored: TestState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.session_id, state.session_id);
        assert_eq!(restored.used_item_ids, state.used_item_ids);
        assert_eq!(restored.questions_answered, 1);
        assert_eq!(restored.status, state.status);
        assert_eq!(restored.responses[0].time_taken, Duration::from_millis(1500));
        assert!((restored.theta - state.theta).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn never_stops_before_minimum(
            min in 1usize..40,
            extra_max in 0usize..40,
            answered_frac in 0.0f64..1.0,
            target_frac in proptest::option::of(0.0f64..=1.0),
            se in prop_oneof![Just(0.0), Just(-1.0), -50.0f64..50.0],
            precision in 0.01f64..2.0,
        ) {
            let max = min + extra_max;
            let answered = ((min as f64 * answered_frac) as usize).min(min - 1);
            let target = target_frac.map(|f| min + (extra_max as f64 * f) as usize);
            let config = TestConfig {
                target_questions: target,
                ..config(min, max, precision)
            };
            let decision = should_terminate_test(&state_with(config, answered, se));
            prop_assert!(!decision.stop);
            prop_assert_eq!(decision.reason, None);
        }

        #[test]
        fn responses_are_append_only(
            steps in proptest::collection::vec((0usize..30, any::<bool>()), 1..25),
        ) {
            let items = pool(30);
            let mut state = initialize_test(config(30, 30, 0.3)).unwrap();
            let start = state.started_at;

            for (i, (idx, correct)) in steps.into_iter().enumerate() {
                let item = &items[idx];
                let at = start + TimeDelta::seconds(i as i64 + 1);
                let result = record_outcome(&state, item, correct, Duration::from_secs(1), at);

                if state.used_item_ids.contains(&item.id) {
                    prop_assert!(matches!(result, Err(CatError::DuplicateItem(_))));
                    continue;
                }
                let next = result.unwrap();
                prop_assert_eq!(next.responses.len(), state.responses.len() + 1);
                prop_assert_eq!(next.questions_answered, state.questions_answered + 1);
                prop_assert_eq!(next.used_item_ids.len(), state.used_item_ids.len() + 1);
                prop_assert!(state.used_item_ids.is_subset(&next.used_item_ids));
                prop_assert!(next.used_item_ids.contains(&item.id));
                prop_assert_eq!(&next.responses[..state.responses.len()], &state.responses[..]);
                prop_assert_eq!(next.responses.last().map(|r| r.is_correct), Some(correct));
                state = next;
            }
        }
    }
}
