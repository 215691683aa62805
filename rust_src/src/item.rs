//! Items, typed item kinds, responses and usage bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::irt::ItemParams;

/// Which side of a forced-choice pair was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairSide {
    First,
    Second,
}

/// Item format together with the answer key its scoring needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemKind {
    /// Likert-style rating; ratings at or above `keyed_threshold` count as endorsement.
    ScaleRating { points: u8, keyed_threshold: u8 },
    MultipleChoice {
        options: Vec<String>,
        correct_index: usize,
    },
    /// Free text matched case-insensitively against accepted answers.
    OpenEnded { accepted_answers: Vec<String> },
    ForcedChoicePair {
        first: String,
        second: String,
        keyed: PairSide,
    },
    Ranking {
        options: Vec<String>,
        correct_order: Vec<usize>,
    },
}

/// An examinee's answer to an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Answer {
    Rating(u8),
    Choice(usize),
    Text(String),
    Pair(PairSide),
    Order(Vec<usize>),
}

impl ItemKind {
    /// Whether `answer` matches this item's key. A mismatched answer kind scores as incorrect.
    pub fn is_correct(&self, answer: &Answer) -> bool {
        match (self, answer) {
            (
                ItemKind::ScaleRating {
                    points,
                    keyed_threshold,
                },
                Answer::Rating(value),
            ) => *value <= *points && *value >= *keyed_threshold,
            (ItemKind::MultipleChoice { correct_index, .. }, Answer::Choice(index)) => {
                index == correct_index
            }
            (ItemKind::OpenEnded { accepted_answers }, Answer::Text(text)) => {
                let given = text.trim();
                accepted_answers
                    .iter()
                    .any(|accepted| accepted.trim().eq_ignore_ascii_case(given))
            }
            (ItemKind::ForcedChoicePair { keyed, .. }, Answer::Pair(side)) => side == keyed,
            (ItemKind::Ranking { correct_order, .. }, Answer::Order(order)) => {
                order == correct_order
            }
            (kind, answer) => {
                tracing::warn!(
                    ?kind,
                    ?answer,
                    "answer does not fit item kind, scoring as incorrect"
                );
                false
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ItemKind::ScaleRating { .. } => "scale_rating",
            ItemKind::MultipleChoice { .. } => "multiple_choice",
            ItemKind::OpenEnded { .. } => "open_ended",
            ItemKind::ForcedChoicePair { .. } => "forced_choice_pair",
            ItemKind::Ranking { .. } => "ranking",
        }
    }
}

/// A calibrated item as supplied by the item repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub subject: String,
    pub content_tag: String,
    pub params: ItemParams,
    pub kind: ItemKind,
}

impl Item {
    pub fn new(
        id: impl Into<String>,
        subject: impl Into<String>,
        content_tag: impl Into<String>,
        params: ItemParams,
        kind: ItemKind,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            content_tag: content_tag.into(),
            params,
            kind,
        }
    }

    pub fn difficulty(&self) -> f64 {
        self.params.difficulty
    }

    pub fn information(&self, theta: f64) -> f64 {
        self.params.information(theta)
    }

    pub fn tag(&self, field: TagField) -> &str {
        match field {
            TagField::ContentTag => &self.content_tag,
            TagField::Subject => &self.subject,
        }
    }
}

/// Item attribute used to group items for content balancing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagField {
    #[default]
    ContentTag,
    Subject,
}

/// One scored answer, frozen with the item parameters in effect when it was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub item_id: String,
    pub is_correct: bool,
    pub params: ItemParams,
    pub time_taken: Duration,
    pub answered_at: DateTime<Utc>,
}

/// Counter increments the item repository should apply after a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageUpdate {
    pub item_id: String,
    pub times_administered: u64,
    pub times_correct: u64,
}

impl UsageUpdate {
    pub fn from_response(response: &Response) -> Self {
        Self {
            item_id: response.item_id.clone(),
            times_administered: 1,
            times_correct: u64::from(response.is_correct),
        }
    }
}

/// Per-item usage counters shared between concurrent sessions.
#[derive(Debug, Default)]
pub struct ItemUsageStats {
    administered: AtomicU64,
    correct: AtomicU64,
}

impl ItemUsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, update: &UsageUpdate) {
        self.administered
            .fetch_add(update.times_administered, Ordering::Relaxed);
        self.correct.fetch_add(update.times_correct, Ordering::Relaxed);
    }

    pub fn times_administered(&self) -> u64 {
        self.administered.load(Ordering::Relaxed)
    }

    pub fn times_correct(&self) -> u64 {
        self.correct.load(Ordering::Relaxed)
    }

    /// Observed proportion correct, `None` before the item was ever administered.
    pub fn p_value(&self) -> Option<f64> {
        let n = self.times_administered();
        (n > 0).then(|| self.times_correct() as f64 / n as f64)
    }
}
