//! Next-item selection for adaptive tests.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::item::{Item, TagField};
use crate::utils::clamp_theta;

/// Number of items considered when picking the first item of a session.
pub const INITIAL_CANDIDATES: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Highest Fisher information at the current theta.
    #[default]
    MaximumInformation,
    /// Smallest |difficulty - theta|.
    DifficultyMatching,
    /// Uniform over unused items, for exploratory phases.
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionOptions {
    pub strategy: SelectionStrategy,
    /// Fraction of the ranked candidates to sample from. The top
    /// `ceil(candidates * randomness)` items (at least one) are eligible.
    pub randomness: f64,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::MaximumInformation,
            randomness: 0.1,
        }
    }
}

fn top_slice_len(n_candidates: usize, randomness: f64) -> usize {
    let fraction = if randomness.is_finite() {
        randomness.clamp(0.0, 1.0)
    } else {
        0.0
    };
    ((n_candidates as f64 * fraction).ceil() as usize).clamp(1, n_candidates.max(1))
}

fn pick_uniform<'a, R: Rng + ?Sized>(candidates: &[&'a Item], rng: &mut R) -> Option<&'a Item> {
    if candidates.is_empty() {
        return None;
    }
    Some(candidates[rng.random_range(0..candidates.len())])
}

/// Choose the next item for `theta` from the unused part of `pool`.
///
/// Returns `None` when every item in the pool has been used.
pub fn select_next_question<'a, R: Rng + ?Sized>(
    theta: f64,
    pool: &'a [Item],
    used_ids: &HashSet<String>,
    options: &SelectionOptions,
    rng: &mut R,
) -> Option<&'a Item> {
    select_next_from(theta, pool.iter(), used_ids, options, rng)
}

/// Like [`select_next_question`] over an already filtered set of items.
pub fn select_next_from<'a, I, R>(
    theta: f64,
    pool: I,
    used_ids: &HashSet<String>,
    options: &SelectionOptions,
    rng: &mut R,
) -> Option<&'a Item>
where
    I: IntoIterator<Item = &'a Item>,
    R: Rng + ?Sized,
{
    let theta = clamp_theta(theta);
    let mut candidates: Vec<&Item> = pool
        .into_iter()
        .filter(|item| !used_ids.contains(&item.id))
        .collect();

    if candidates.is_empty() {
        tracing::debug!(used = used_ids.len(), "no unused items left in pool");
        return None;
    }

    match options.strategy {
        SelectionStrategy::Random => return pick_uniform(&candidates, rng),
        SelectionStrategy::MaximumInformation => {
            candidates.sort_by(|a, b| {
                b.information(theta)
                    .total_cmp(&a.information(theta))
                    .then_with(|| a.id.cmp(&b.id))
            });
        }
        SelectionStrategy::DifficultyMatching => {
            candidates.sort_by(|a, b| {
                (a.difficulty() - theta)
                    .abs()
                    .total_cmp(&(b.difficulty() - theta).abs())
                    .then_with(|| a.id.cmp(&b.id))
            });
        }
    }

    let top = top_slice_len(candidates.len(), options.randomness);
    let chosen = pick_uniform(&candidates[..top], rng);
    if let Some(item) = chosen {
        tracing::debug!(
            item_id = %item.id,
            theta,
            strategy = ?options.strategy,
            candidates = candidates.len(),
            top,
            "selected next item"
        );
    }
    chosen
}

/// Pick uniformly among the 5 items whose difficulty is closest to `target_difficulty`.
pub fn select_initial_question<'a, R: Rng + ?Sized>(
    pool: &'a [Item],
    target_difficulty: f64,
    rng: &mut R,
) -> Option<&'a Item> {
    let target = clamp_theta(target_difficulty);
    let mut candidates: Vec<&Item> = pool.iter().collect();
    candidates.sort_by(|a, b| {
        (a.difficulty() - target)
            .abs()
            .total_cmp(&(b.difficulty() - target).abs())
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates.truncate(INITIAL_CANDIDATES);
    pick_uniform(&candidates, rng)
}

/// Restrict `pool` to unused items from the least-administered tag groups.
///
/// Usage is counted per `tag_field` value over `used_items`. Falls back to the
/// whole pool when the restriction would leave nothing to select.
pub fn balance_content_coverage<'a>(
    pool: &'a [Item],
    used_items: &[&Item],
    tag_field: TagField,
) -> Vec<&'a Item> {
    let used_ids: HashSet<&str> = used_items.iter().map(|item| item.id.as_str()).collect();

    let mut usage: HashMap<&str, usize> = HashMap::new();
    for item in used_items {
        *usage.entry(item.tag(tag_field)).or_default() += 1;
    }

    let unused: Vec<&Item> = pool
        .iter()
        .filter(|item| !used_ids.contains(item.id.as_str()))
        .collect();

    let min_usage = unused
        .iter()
        .map(|item| usage.get(item.tag(tag_field)).copied().unwrap_or(0))
        .min();

    let balanced: Vec<&Item> = match min_usage {
        Some(min_usage) => unused
            .into_iter()
            .filter(|item| usage.get(item.tag(tag_field)).copied().unwrap_or(0) == min_usage)
            .collect(),
        None => Vec::new(),
    };

    if balanced.is_empty() {
        return pool.iter().collect();
    }
    balanced
}
