//! Three-parameter logistic (3PL) response model.
//!
//! Malformed parameters are never rejected: they are clamped or replaced with
//! defaults and a warning is logged, so one bad item cannot abort a live session.

use serde::{Deserialize, Serialize};

use crate::utils::{EPSILON, THETA_MAX, THETA_MIN, clamp_theta, sigmoid};

pub const DEFAULT_DISCRIMINATION: f64 = 1.0;
pub const DEFAULT_GUESSING: f64 = 0.25;

/// Sanitized (a, b, c) triple of a 3PL item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemParams {
    pub difficulty: f64,
    pub discrimination: f64,
    pub guessing: f64,
}

impl ItemParams {
    /// Build parameters, clamping difficulty to [-3, 3], defaulting a
    /// non-positive discrimination to 1.0 and an out-of-range guessing to 0.25.
    pub fn new(difficulty: f64, discrimination: f64, guessing: f64) -> Self {
        let mut params = Self {
            difficulty,
            discrimination,
            guessing,
        };

        if !(THETA_MIN..=THETA_MAX).contains(&difficulty) {
            params.difficulty = clamp_theta(difficulty);
            tracing::warn!(
                difficulty,
                clamped = params.difficulty,
                "item difficulty outside [-3, 3], clamping"
            );
        }
        if !(discrimination.is_finite() && discrimination > 0.0) {
            params.discrimination = DEFAULT_DISCRIMINATION;
            tracing::warn!(discrimination, "non-positive discrimination, using 1.0");
        }
        if !(0.0..=1.0).contains(&guessing) {
            params.guessing = DEFAULT_GUESSING;
            tracing::warn!(guessing, "guessing outside [0, 1], using 0.25");
        }

        params
    }

    /// Whether `new` would leave these values untouched.
    pub fn is_valid(&self) -> bool {
        (THETA_MIN..=THETA_MAX).contains(&self.difficulty)
            && self.discrimination.is_finite()
            && self.discrimination > 0.0
            && (0.0..=1.0).contains(&self.guessing)
    }

    /// Probability of a correct response at `theta`.
    #[inline]
    pub fn probability(&self, theta: f64) -> f64 {
        let theta = clamp_theta(theta);
        let z = self.discrimination * (theta - self.difficulty);
        self.guessing + (1.0 - self.guessing) * sigmoid(z)
    }

    /// (P, P', P'') at `theta`.
    ///
    /// With L the 2PL logistic, P' = a(1-c)L(1-L) and P'' = a^2(1-c)L(1-L)(1-2L).
    #[inline]
    pub fn derivatives(&self, theta: f64) -> (f64, f64, f64) {
        let theta = clamp_theta(theta);
        let a = self.discrimination;
        let c = self.guessing;
        let l = sigmoid(a * (theta - self.difficulty));
        let lq = l * (1.0 - l);
        let p = c + (1.0 - c) * l;
        let dp = a * (1.0 - c) * lq;
        let d2p = a * a * (1.0 - c) * lq * (1.0 - 2.0 * l);
        (p, dp, d2p)
    }

    /// Fisher information at `theta`: a^2 (P-c)^2 (1-P) / ((1-c)^2 P).
    ///
    /// Zero when the denominator vanishes (c = 1 or P = 0) or P = 1.
    #[inline]
    pub fn information(&self, theta: f64) -> f64 {
        let c = self.guessing;
        let p = self.probability(theta);
        let denom = (1.0 - c).powi(2) * p;
        if denom.abs() < EPSILON || !denom.is_finite() {
            return 0.0;
        }
        let a = self.discrimination;
        let info = a * a * (p - c).powi(2) * (1.0 - p) / denom;
        if info.is_finite() { info.max(0.0) } else { 0.0 }
    }
}

/// 3PL probability of a correct response, in [guessing, 1].
pub fn probability(theta: f64, difficulty: f64, discrimination: f64, guessing: f64) -> f64 {
    let theta = sanitize_theta(theta);
    ItemParams::new(difficulty, discrimination, guessing).probability(theta)
}

/// Fisher information of a 3PL item at `theta`, always >= 0.
pub fn information(theta: f64, difficulty: f64, discrimination: f64, guessing: f64) -> f64 {
    let theta = sanitize_theta(theta);
    ItemParams::new(difficulty, discrimination, guessing).information(theta)
}

/// (P, P', P'') for raw parameters.
pub fn probability_derivatives(
    theta: f64,
    difficulty: f64,
    discrimination: f64,
    guessing: f64,
) -> (f64, f64, f64) {
    let theta = sanitize_theta(theta);
    ItemParams::new(difficulty, discrimination, guessing).derivatives(theta)
}

/// Sum of item information at `theta`.
pub fn test_information<'a, I>(theta: f64, items: I) -> f64
where
    I: IntoIterator<Item = &'a ItemParams>,
{
    items.into_iter().map(|p| p.information(theta)).sum()
}

fn sanitize_theta(theta: f64) -> f64 {
    if !(THETA_MIN..=THETA_MAX).contains(&theta) {
        let clamped = clamp_theta(theta);
        tracing::warn!(theta, clamped, "theta outside [-3, 3], clamping");
        return clamped;
    }
    theta
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn probability_at_difficulty_is_midpoint_above_guessing() {
        let p = probability(0.5, 0.5, 1.3, 0.2);
        assert!((p - 0.6).abs() < 1e-12, "got {p}");
    }

    #[test]
    fn malformed_parameters_are_defaulted() {
        let params = ItemParams::new(4.2, -1.0, 1.7);
        assert_eq!(params.difficulty, 3.0);
        assert_eq!(params.discrimination, DEFAULT_DISCRIMINATION);
        assert_eq!(params.guessing, DEFAULT_GUESSING);
        assert!(params.is_valid());

        let p = probability(0.0, 0.0, 0.0, -0.5);
        assert!((p - (0.25 + 0.75 * 0.5)).abs() < 1e-12);
    }

    #[test]
    fn information_is_zero_when_guessing_is_certain() {
        assert_eq!(information(0.0, 0.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn information_peaks_near_difficulty() {
        let b = 0.5;
        let grid: Vec<f64> = (0..=600).map(|i| -3.0 + i as f64 * 0.01).collect();
        let (best_theta, _) = grid
            .iter()
            .map(|&t| (t, information(t, b, 1.2, 0.0)))
            .fold((0.0, f64::NEG_INFINITY), |acc, x| if x.1 > acc.1 { x } else { acc });
        assert!((best_theta - b).abs() < 0.02, "peak at {best_theta}");

        // with guessing the peak shifts slightly above b but stays close
        let (best_theta, _) = grid
            .iter()
            .map(|&t| (t, information(t, b, 1.2, 0.2)))
            .fold((0.0, f64::NEG_INFINITY), |acc, x| if x.1 > acc.1 { x } else { acc });
        assert!(best_theta >= b && best_theta - b < 0.5, "peak at {best_theta}");
    }

    #[test]
    fn information_grows_with_discrimination_at_match_point() {
        let low = information(1.0, 1.0, 0.5, 0.2);
        let mid = information(1.0, 1.0, 1.0, 0.2);
        let high = information(1.0, 1.0, 2.0, 0.2);
        assert!(low < mid && mid < high);
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let params = ItemParams::new(-0.4, 1.6, 0.2);
        let h = 1e-5;
        for &theta in &[-1.5, 0.0, 0.7, 2.0] {
            let (p, dp, d2p) = params.derivatives(theta);
            assert!((p - params.probability(theta)).abs() < 1e-12);
            let num_dp =
                (params.probability(theta + h) - params.probability(theta - h)) / (2.0 * h);
            let num_d2p =
                (params.derivatives(theta + h).1 - params.derivatives(theta - h).1) / (2.0 * h);
            assert!((dp - num_dp).abs() < 1e-6);
            assert!((d2p - num_d2p).abs() < 1e-5);
        }
    }

    #[test]
    fn test_information_sums_items() {
        let items = [ItemParams::new(0.0, 1.0, 0.0), ItemParams::new(1.0, 2.0, 0.1)];
        let total = test_information(0.3, &items);
        let manual = items[0].information(0.3) + items[1].information(0.3);
        assert!((total - manual).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn probability_stays_within_guessing_and_one(
            theta in -3.0f64..=3.0,
            b in -3.0f64..=3.0,
            a in 0.01f64..4.0,
            c in 0.0f64..=1.0,
        ) {
            let p = probability(theta, b, a, c);
            prop_assert!(p >= c - 1e-12);
            prop_assert!(p <= 1.0 + 1e-12);
        }

        #[test]
        fn probability_is_non_decreasing_in_theta(
            t1 in -3.0f64..=3.0,
            t2 in -3.0f64..=3.0,
            b in -3.0f64..=3.0,
            a in 0.01f64..4.0,
            c in 0.0f64..=1.0,
        ) {
            let (lo, hi) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
            prop_assert!(probability(lo, b, a, c) <= probability(hi, b, a, c) + 1e-12);
        }

        #[test]
        fn information_is_never_negative(
            theta in -10.0f64..10.0,
            b in -10.0f64..10.0,
            a in -2.0f64..4.0,
            c in -1.0f64..2.0,
        ) {
            let info = information(theta, b, a, c);
            prop_assert!(info >= 0.0 && info.is_finite());
        }
    }
}
