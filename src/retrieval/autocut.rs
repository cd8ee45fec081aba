//! Knee detection on a ranked relevance curve
//!
//! Scores are normalized on both axes, reflected onto a concave increasing
//! shape, and compared against the diagonal. The first point where the
//! difference curve falls below the threshold set by the preceding local
//! maximum is the knee. Candidates past the knee are the long tail.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Curvature of the score curve
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Curve {
    #[default]
    Concave,
    Convex,
}

/// Direction of the score curve along the rank axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increasing,
    #[default]
    Decreasing,
}

/// Locates the knee of a score sequence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelevanceCutter {
    sensitivity: f64,
    curve: Curve,
    direction: Direction,
}

impl Default for RelevanceCutter {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            curve: Curve::Concave,
            direction: Direction::Decreasing,
        }
    }
}

impl RelevanceCutter {
    /// `sensitivity` must be finite and non-negative; larger values ignore
    /// shallower bends
    pub fn new(sensitivity: f64, curve: Curve, direction: Direction) -> Self {
        assert!(
            sensitivity.is_finite() && sensitivity >= 0.0,
            "sensitivity must be finite and non-negative"
        );
        Self {
            sensitivity,
            curve,
            direction,
        }
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    /// Index of the last candidate before the drop-off, if there is one.
    ///
    /// Fewer than three scores, identical scores, non-finite scores and curves
    /// without a clear bend all yield `None`.
    pub fn find_knee(&self, scores: &[f32]) -> Option<usize> {
        let n = scores.len();
        if n < 3 || scores.iter().any(|s| !s.is_finite()) {
            return None;
        }

        let min = scores.iter().copied().fold(f32::INFINITY, f32::min) as f64;
        let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
        if max <= min {
            return None;
        }

        let last = (n - 1) as f64;
        let x: Vec<f64> = (0..n).map(|i| i as f64 / last).collect();
        let y: Vec<f64> = scores.iter().map(|&s| (s as f64 - min) / (max - min)).collect();
        let y = self.to_canonical(y);

        let diff: Vec<f64> = y.iter().zip(&x).map(|(y, x)| y - x).collect();

        let is_max: Vec<bool> = (0..n)
            .map(|i| i > 0 && i < n - 1 && diff[i] >= diff[i - 1] && diff[i] >= diff[i + 1])
            .collect();
        let is_min: Vec<bool> = (0..n)
            .map(|i| i > 0 && i < n - 1 && diff[i] <= diff[i - 1] && diff[i] <= diff[i + 1])
            .collect();

        let first_max = is_max.iter().position(|&m| m)?;

        // mean spacing of the normalized rank axis
        let step = 1.0 / last;
        let mut threshold = f64::NEG_INFINITY;
        let mut threshold_index = first_max;

        for i in first_max..n - 1 {
            if is_max[i] {
                threshold = diff[i] - self.sensitivity * step;
                threshold_index = i;
            }
            if is_min[i] {
                threshold = 0.0;
            }

            if diff[i + 1] < threshold {
                let knee = self.from_canonical(threshold_index, n);
                debug!("Knee found at index {} of {}", knee, n);
                return Some(knee);
            }
        }

        debug!("No knee in {} scores", n);
        None
    }

    /// Number of leading candidates to keep; everything when there is no knee
    pub fn prefix_len(&self, scores: &[f32]) -> usize {
        self.find_knee(scores).map_or(scores.len(), |knee| knee + 1)
    }

    /// Reflect the normalized curve onto the concave increasing shape
    fn to_canonical(&self, mut y: Vec<f64>) -> Vec<f64> {
        match (self.direction, self.curve) {
            (Direction::Decreasing, Curve::Concave) => {
                y.reverse();
            }
            (Direction::Decreasing, Curve::Convex) => {
                y.iter_mut().for_each(|v| *v = 1.0 - *v);
            }
            (Direction::Increasing, Curve::Convex) => {
                y.iter_mut().for_each(|v| *v = 1.0 - *v);
                y.reverse();
            }
            (Direction::Increasing, Curve::Concave) => {}
        }
        y
    }

    /// Map an index of the canonical curve back to the input order
    fn from_canonical(&self, index: usize, n: usize) -> usize {
        match (self.direction, self.curve) {
            (Direction::Decreasing, Curve::Concave) | (Direction::Increasing, Curve::Convex) => {
                n - 1 - index
            }
            (Direction::Decreasing, Curve::Convex) | (Direction::Increasing, Curve::Concave) => {
                index
            }
        }
    }
}
